//! Shared types and contracts for the coordination platform core.
//!
//! Exposes the data model, the error taxonomy, the `Handler`/`HandlerResult`
//! contract, and the `WorkQueue` trait that `meshqueue-storage` implements
//! per domain table and `meshqueue-engine` drives generically.

mod backoff;
mod error;
mod handler;
mod model;
mod queue;

pub use backoff::BackoffPolicy;
pub use error::{Error, Result};
pub use handler::{CancellationSignal, Handler, HandlerContext, HandlerResult, IdempotentHandler};
pub use model::*;
pub use queue::{WorkItemRecord, WorkItemReader, WorkQueue};
