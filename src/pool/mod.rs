//! Sharded worker pool.
//!
//! Workers are OS processes running a stage's fix-action. The pool starts them,
//! the orchestrator supervises them by liveness polling, and each worker
//! recomputes its own shard of the pending set from the store.

mod handle;
mod launcher;
pub mod probe;
mod shard;
mod stall;

pub use handle::{Liveness, WorkerHandle, WorkerProcess};
pub use launcher::WorkerPool;
pub use probe::{ProcessInfo, ProcessProbe, SystemProbe, matches_fix_action};
pub use shard::{ShardSpec, id_hash, partition, shard_of};
pub use stall::StallMonitor;
