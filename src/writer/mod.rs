//! Batched writer for worker results.
//!
//! Workers buffer one [`Outcome`] per item and commit them in transactions of
//! up to `flush_threshold` records. A killed worker loses at most one buffer,
//! and those items simply stay pending for the next run.

mod batch;
mod retry;

pub use batch::{BatchWriter, Outcome, WriteStats, WriterConfig};
pub use retry::{RetryPolicy, retry_on_lock};
