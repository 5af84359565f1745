//! Drives `meshqueue-core`'s contracts and `meshqueue-storage`'s tables into
//! running loops: the generic dispatcher, the fencing-token lease manager,
//! the scheduler, the fan-out coordinator, and outbox-join wiring.

mod dispatcher;
mod fanout;
mod idempotent;
mod join;
mod lease_manager;
mod registry;
mod scheduler;

pub use dispatcher::{reaper_loop, run_loop, DispatcherLoopConfig};
pub use fanout::{FanoutCoordinator, Planner, StaticPlanner};
pub use idempotent::IdempotentHandlerAdapter;
pub use join::OutboxJoinCoordinator;
pub use lease_manager::LeaseHandle;
pub use registry::{HandlerRegistry, HandlerRegistryBuilder};
pub use scheduler::Scheduler;
