//! Restart recovery - rebuilds run state from the OS process table
//!
//! Workers are not children of a restarted orchestrator, so the only way to know
//! they exist is to look for processes whose command line matches a stage's
//! fix-action. Adopting them keeps the scheduler from double-launching a stage
//! and keeps the single-accelerator rule honest across restarts.

use std::collections::HashMap;

use crate::pool::{ProcessProbe, ShardSpec, WorkerHandle, matches_fix_action};
use crate::registry::StageRegistry;

/// Result of inspecting one candidate process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Process taken over as a live worker
    Adopted {
        stage: String,
        shard: Option<ShardSpec>,
        pid: u32,
    },
    /// Matched a stage but its arguments could not be understood
    Ignored { stage: String, pid: u32, reason: String },
}

/// Find running workers for any registered stage.
///
/// Returns the handles to insert into the run state plus one action per
/// matched process. A process is matched against the first stage (in
/// topological order) whose fix-action it invokes.
pub fn recover_workers(registry: &StageRegistry, probe: &mut dyn ProcessProbe) -> (Vec<WorkerHandle>, Vec<RecoveryAction>) {
    let mut handles = Vec::new();
    let mut actions = Vec::new();
    // One adopted process per (stage, shard); duplicates are reported, not adopted.
    let mut seen: HashMap<(String, ShardSpec), u32> = HashMap::new();

    for process in probe.processes() {
        let Some(stage) = registry
            .stages()
            .iter()
            .find(|s| matches_fix_action(&process.cmd, &s.fix_action))
        else {
            continue;
        };

        let shard = match ShardSpec::from_args(&process.cmd[1..]) {
            Ok(shard) => shard,
            Err(e) => {
                actions.push(RecoveryAction::Ignored {
                    stage: stage.name.clone(),
                    pid: process.pid,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let key = (stage.name.clone(), shard.unwrap_or_else(ShardSpec::whole));
        if let Some(existing) = seen.get(&key) {
            actions.push(RecoveryAction::Ignored {
                stage: stage.name.clone(),
                pid: process.pid,
                reason: format!("duplicate of pid {}", existing),
            });
            continue;
        }
        seen.insert(key, process.pid);

        log::info!(
            "Adopting running worker for stage {} (pid {}, shard {})",
            stage.name,
            process.pid,
            shard.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
        );
        handles.push(WorkerHandle::adopted(&stage.name, shard, process.pid));
        actions.push(RecoveryAction::Adopted {
            stage: stage.name.clone(),
            shard,
            pid: process.pid,
        });
    }

    (handles, actions)
}
