//! In-memory record of live workers.
//!
//! Never persisted. After a restart it is rebuilt from the OS process table.

use std::collections::{BTreeMap, BTreeSet};

use crate::pool::{Liveness, ProcessProbe, ShardSpec, WorkerHandle};

/// A worker removed from the run state because it exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapedWorker {
    pub stage: String,
    pub shard: Option<ShardSpec>,
    pub pid: Option<u32>,
    pub success: bool,
    pub code: Option<i32>,
}

/// Live workers plus stages disabled for the rest of the run.
#[derive(Debug, Default)]
pub struct RunState {
    workers: Vec<WorkerHandle>,
    /// Stage name to the reason it was disabled.
    disabled: BTreeMap<String, String>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, handles: impl IntoIterator<Item = WorkerHandle>) {
        self.workers.extend(handles);
    }

    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    pub fn live_count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_live(&self, stage: &str) -> bool {
        self.workers.iter().any(|w| w.stage == stage)
    }

    /// Stages with at least one live worker.
    pub fn live_stages(&self) -> BTreeSet<&str> {
        self.workers.iter().map(|w| w.stage.as_str()).collect()
    }

    /// Shards of `stage` that currently have a worker.
    pub fn live_shards(&self, stage: &str) -> Vec<ShardSpec> {
        self.workers
            .iter()
            .filter(|w| w.stage == stage)
            .map(WorkerHandle::shard_or_whole)
            .collect()
    }

    pub fn disable(&mut self, stage: impl Into<String>, reason: impl Into<String>) {
        let stage = stage.into();
        let reason = reason.into();
        log::error!("Disabling stage {} for this run: {}", stage, reason);
        self.disabled.insert(stage, reason);
    }

    pub fn is_disabled(&self, stage: &str) -> bool {
        self.disabled.contains_key(stage)
    }

    pub fn disabled(&self) -> &BTreeMap<String, String> {
        &self.disabled
    }

    /// Poll every worker and drop the ones that exited.
    ///
    /// A worker whose status cannot be read is kept and retried next cycle.
    pub fn reap(&mut self, probe: &mut dyn ProcessProbe) -> Vec<ReapedWorker> {
        let mut reaped = Vec::new();
        let mut kept = Vec::with_capacity(self.workers.len());

        for mut worker in self.workers.drain(..) {
            match worker.poll(probe) {
                Ok(Liveness::Running) => kept.push(worker),
                Ok(Liveness::Exited { success, code }) => {
                    if success {
                        log::info!("Worker {} exited cleanly", worker.label());
                    } else {
                        tracing::warn!(worker = %worker.label(), code = ?code, "Worker exited with failure");
                    }
                    reaped.push(ReapedWorker {
                        stage: worker.stage.clone(),
                        shard: worker.shard,
                        pid: worker.pid,
                        success,
                        code,
                    });
                }
                Err(e) => {
                    log::warn!("Could not poll worker {}: {}", worker.label(), e);
                    kept.push(worker);
                }
            }
        }

        self.workers = kept;
        reaped
    }

    /// Signal the worker for one shard of a stage. Returns whether one was found.
    pub fn kill(&mut self, stage: &str, shard: ShardSpec, probe: &mut dyn ProcessProbe) -> bool {
        let Some(worker) = self
            .workers
            .iter_mut()
            .find(|w| w.stage == stage && w.shard_or_whole() == shard)
        else {
            return false;
        };
        if let Err(e) = worker.kill(probe) {
            log::warn!("Failed to kill worker {}: {}", worker.label(), e);
            return false;
        }
        tracing::warn!(worker = %worker.label(), pid = ?worker.pid, "Killed hung worker");
        true
    }
}
