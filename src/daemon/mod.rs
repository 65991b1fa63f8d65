//! Daemon core - control loop, restart recovery, and operator commands
//!
//! The orchestrator is a long-running process that:
//! - Scans the store for pending work each cycle
//! - Launches and supervises worker processes under resource limits
//! - Re-adopts workers left running by a previous instance
//! - Triggers the downstream export when the pipeline drains

mod control;
mod export;
mod recovery;
mod reset;
mod status;
mod tick;

pub use control::Orchestrator;
pub use export::ExportTrigger;
pub use recovery::{RecoveryAction, recover_workers};
pub use reset::{ResetSummary, reset_stage};
pub use status::{LiveWorker, StatusReport, collect_status};
pub use tick::{ControlConfig, CycleReport, RunMode, TickState};
