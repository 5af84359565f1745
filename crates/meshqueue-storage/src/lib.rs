//! Postgres row-locking storage adapter.
//!
//! One literal-SQL module per table, each implementing
//! `meshqueue_core::WorkQueue` so `meshqueue-engine`'s dispatcher loop can be
//! written once against `dyn WorkQueue`. Mirrors `trace-core`'s
//! `lite::pgqueue::PgQueue` (one struct, one `Queue` impl) and
//! `harness::dispatcher`'s per-operation literal SQL style, generalized to
//! five tables instead of one.

mod fanout_cursor;
mod fanout_policy;
mod idempotency;
mod inbox;
mod job_runs;
mod jobs;
mod lease;
mod outbox;
mod outbox_join;
mod timers;

pub use fanout_cursor::FanoutCursorStore;
pub use fanout_policy::FanoutPolicyStore;
pub use idempotency::{IdempotencyStore, TryBeginOutcome};
pub use inbox::{IngestOutcome, InboxStore};
pub use job_runs::JobRunStore;
pub use jobs::JobStore;
pub use lease::{AcquireOutcome, LeaseStore};
pub use outbox::OutboxStore;
pub use outbox_join::OutboxJoinStore;
pub use timers::TimerStore;
