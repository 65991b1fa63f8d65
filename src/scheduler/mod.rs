//! Resource scheduling.
//!
//! This module provides:
//! - **RunState**: live worker handles and stages disabled for the run.
//! - **ResourceScheduler**: picks which stages to start from a gap report,
//!   enforcing the single-accelerator rule and the rate-limited cap.
//!
//! # Example
//!
//! ```ignore
//! use stagehand::scheduler::{ResourceScheduler, RunState};
//!
//! let report = CompletionScanner::new(&registry).scan(&store)?;
//! for decision in ResourceScheduler::new().schedule(&registry, &report, &RunState::new()) {
//!     println!("start {} x{}", decision.stage, decision.shard_count);
//! }
//! ```

mod run_state;
mod select;

pub use run_state::{ReapedWorker, RunState};
pub use select::{ResourceScheduler, SchedulerConfig, StartDecision};
