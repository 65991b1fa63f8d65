//! Read-only pipeline status.

use serde::Serialize;

use crate::daemon::recovery::{RecoveryAction, recover_workers};
use crate::error::Result;
use crate::pool::{ProcessProbe, ShardSpec};
use crate::registry::StageRegistry;
use crate::scanner::{CompletionScanner, GapReport, Violation};
use crate::store::Store;

/// A worker process found running for a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveWorker {
    pub stage: String,
    pub shard: Option<ShardSpec>,
    pub pid: u32,
}

/// Everything `--status` shows. Computing it never schedules or launches.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub gaps: GapReport,
    pub violations: Vec<Violation>,
    pub workers: Vec<LiveWorker>,
}

pub fn collect_status(registry: &StageRegistry, store: &Store, probe: &mut dyn ProcessProbe) -> Result<StatusReport> {
    let scanner = CompletionScanner::new(registry);
    let gaps = scanner.scan(store)?;
    let violations = scanner.check_consistency(store)?;

    let (_, actions) = recover_workers(registry, probe);
    let workers = actions
        .into_iter()
        .filter_map(|action| match action {
            RecoveryAction::Adopted { stage, shard, pid } => Some(LiveWorker { stage, shard, pid }),
            RecoveryAction::Ignored { .. } => None,
        })
        .collect();

    Ok(StatusReport {
        gaps,
        violations,
        workers,
    })
}
