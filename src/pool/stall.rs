//! Hung-worker detection.
//!
//! A worker makes progress when items it owned on the previous scan are no
//! longer pending. A live worker with no progress for `stall_scans` consecutive
//! scans is considered hung. A shard with nothing pending on the previous scan
//! has nothing to make progress on, so it is never idle.

use std::collections::{HashMap, HashSet};

use crate::pool::shard::ShardSpec;

#[derive(Debug, Default)]
struct ShardProgress {
    previous: HashSet<String>,
    idle_scans: u32,
}

/// Per-shard progress tracking across scans.
#[derive(Debug, Default)]
pub struct StallMonitor {
    shards: HashMap<(String, ShardSpec), ShardProgress>,
}

impl StallMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the shard's pending IDs for this scan and return how many
    /// consecutive scans it has gone without progress.
    ///
    /// The first observation of a shard never counts as idle.
    pub fn observe(&mut self, stage: &str, shard: ShardSpec, pending: &[String]) -> u32 {
        let key = (stage.to_string(), shard);
        let current: HashSet<String> = pending.iter().cloned().collect();

        let Some(progress) = self.shards.get_mut(&key) else {
            self.shards.insert(
                key,
                ShardProgress {
                    previous: current,
                    idle_scans: 0,
                },
            );
            return 0;
        };

        let advanced = progress.previous.iter().filter(|id| !current.contains(*id)).count();
        if advanced > 0 || progress.previous.is_empty() {
            progress.idle_scans = 0;
        } else {
            progress.idle_scans += 1;
        }
        progress.previous = current;
        progress.idle_scans
    }

    /// Whether `idle_scans` trips a threshold. A threshold of 0 disables detection.
    pub fn is_stalled(idle_scans: u32, threshold: u32) -> bool {
        threshold > 0 && idle_scans >= threshold
    }

    /// Drop tracking for a worker that exited or was killed.
    pub fn forget(&mut self, stage: &str, shard: ShardSpec) {
        self.shards.remove(&(stage.to_string(), shard));
    }

    pub fn tracked(&self) -> usize {
        self.shards.len()
    }
}
