//! Handles to running worker processes.

use std::time::Instant;

use tokio::process::Child;

use crate::error::Result;
use crate::pool::probe::ProcessProbe;
use crate::pool::shard::ShardSpec;

/// How the orchestrator came to know about a worker.
#[derive(Debug)]
pub enum WorkerProcess {
    /// Spawned by this orchestrator; exit status is observable.
    Spawned(Child),
    /// Found in the process table on startup; only liveness is observable.
    Adopted,
}

/// Result of polling a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    /// Exit code when known. Adopted workers and signal deaths report `None`.
    Exited { success: bool, code: Option<i32> },
}

/// One live worker process for one shard of one stage.
#[derive(Debug)]
pub struct WorkerHandle {
    pub stage: String,
    /// `None` for non-shardable stages.
    pub shard: Option<ShardSpec>,
    pub pid: Option<u32>,
    pub started_at: Instant,
    process: WorkerProcess,
}

impl WorkerHandle {
    pub fn spawned(stage: impl Into<String>, shard: Option<ShardSpec>, child: Child) -> Self {
        Self {
            stage: stage.into(),
            shard,
            pid: child.id(),
            started_at: Instant::now(),
            process: WorkerProcess::Spawned(child),
        }
    }

    pub fn adopted(stage: impl Into<String>, shard: Option<ShardSpec>, pid: u32) -> Self {
        Self {
            stage: stage.into(),
            shard,
            pid: Some(pid),
            started_at: Instant::now(),
            process: WorkerProcess::Adopted,
        }
    }

    pub fn is_adopted(&self) -> bool {
        matches!(self.process, WorkerProcess::Adopted)
    }

    /// The shard this worker covers, treating non-shardable workers as the whole set.
    pub fn shard_or_whole(&self) -> ShardSpec {
        self.shard.unwrap_or_else(ShardSpec::whole)
    }

    /// Human-readable label, e.g. `ocr[1/4]`.
    pub fn label(&self) -> String {
        match self.shard {
            Some(shard) => format!("{}[{}]", self.stage, shard),
            None => self.stage.clone(),
        }
    }

    /// Non-blocking liveness check.
    pub fn poll(&mut self, probe: &mut dyn ProcessProbe) -> Result<Liveness> {
        match &mut self.process {
            WorkerProcess::Spawned(child) => match child.try_wait()? {
                None => Ok(Liveness::Running),
                Some(status) => Ok(Liveness::Exited {
                    success: status.success(),
                    code: status.code(),
                }),
            },
            WorkerProcess::Adopted => {
                let alive = self.pid.is_some_and(|pid| probe.is_alive(pid));
                if alive {
                    Ok(Liveness::Running)
                } else {
                    Ok(Liveness::Exited {
                        success: true,
                        code: None,
                    })
                }
            }
        }
    }

    /// Signal a worker this orchestrator spawned. No-op for adopted workers.
    pub(crate) fn start_kill(&mut self) -> Result<()> {
        if let WorkerProcess::Spawned(child) = &mut self.process {
            child.start_kill()?;
        }
        Ok(())
    }

    /// Ask the worker to terminate. The handle stays live until a later poll
    /// observes the exit.
    pub fn kill(&mut self, probe: &mut dyn ProcessProbe) -> Result<()> {
        match &mut self.process {
            WorkerProcess::Spawned(child) => {
                child.start_kill()?;
            }
            WorkerProcess::Adopted => {
                if let Some(pid) = self.pid
                    && !probe.kill(pid)
                {
                    log::warn!("Could not signal adopted worker {} (pid {})", self.label(), pid);
                }
            }
        }
        Ok(())
    }
}
