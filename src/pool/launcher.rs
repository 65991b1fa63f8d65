//! Spawning fix-action processes.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{Result, StagehandError};
use crate::pool::handle::WorkerHandle;
use crate::pool::shard::ShardSpec;
use crate::registry::Stage;

/// Starts worker processes for a stage.
///
/// Children are not killed when their handle is dropped: stopping the
/// orchestrator leaves in-flight workers running.
#[derive(Debug, Clone, Default)]
pub struct WorkerPool {
    /// Per-worker stdout/stderr files go here; `None` discards output.
    log_dir: Option<PathBuf>,
    /// Extra environment for every worker.
    env: Vec<(String, String)>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Spawn `shard_count` workers (one for non-shardable stages).
    ///
    /// If any shard fails to start, shards already started are killed and the
    /// whole stage is reported as a spawn failure.
    pub fn launch(&self, stage: &Stage, shard_count: usize) -> Result<Vec<WorkerHandle>> {
        let shards: Vec<Option<ShardSpec>> = if stage.shardable {
            let count = shard_count.max(1);
            (0..count).map(|i| Some(ShardSpec { index: i, count })).collect()
        } else {
            vec![None]
        };

        let mut handles = Vec::with_capacity(shards.len());
        for shard in shards {
            match self.spawn_one(stage, shard) {
                Ok(handle) => {
                    tracing::info!(
                        stage = %stage.name,
                        shard = %shard.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
                        pid = handle.pid.unwrap_or_default(),
                        "Launched worker"
                    );
                    handles.push(handle);
                }
                Err(err) => {
                    for started in &mut handles {
                        if let Err(e) = started.start_kill() {
                            log::warn!("Failed to stop {} after spawn failure: {}", started.label(), e);
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(handles)
    }

    fn spawn_one(&self, stage: &Stage, shard: Option<ShardSpec>) -> Result<WorkerHandle> {
        let argv = stage.fix_action.command_line(shard.map(|s| (s.index, s.count)));
        let (program, args) = argv.split_first().ok_or_else(|| StagehandError::Spawn {
            stage: stage.name.clone(),
            message: "empty command line".to_string(),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("STAGEHAND_STAGE", &stage.name)
            .stdin(Stdio::null())
            .kill_on_drop(false);

        match &self.log_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                let name = match shard {
                    Some(s) => format!("{}-{}.log", stage.name, s.index),
                    None => format!("{}.log", stage.name),
                };
                let file = OpenOptions::new().create(true).append(true).open(dir.join(name))?;
                cmd.stdout(Stdio::from(file.try_clone()?)).stderr(Stdio::from(file));
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let child = cmd.spawn().map_err(|e| StagehandError::Spawn {
            stage: stage.name.clone(),
            message: format!("{}: {}", program, e),
        })?;

        Ok(WorkerHandle::spawned(&stage.name, shard, child))
    }
}
