//! Resource scheduler: which stages to start this cycle.
//!
//! One greedy pass over stages in topological order. A stage starts when it has
//! pending work, nothing running, and its resource class has room:
//! - `exclusive-accelerator`: no other exclusive stage live or already chosen
//! - `rate-limited-api`: live plus chosen worker processes below
//!   `rate_limited_max`; a sharded stage gets at most the remaining slots
//! - `cpu-parallel`: always

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::registry::{ResourceClass, Stage, StageRegistry};
use crate::scanner::GapReport;
use crate::scheduler::run_state::RunState;

/// Parallelism limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Shards for CPU-bound stages without their own `shards` setting.
    pub cpu_shards: usize,
    /// Shards for stages that load a model on CPU (each shard holds a copy).
    pub model_shards: usize,
    /// Concurrent `rate-limited-api` worker processes, shards included.
    pub rate_limited_max: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cpu_shards: num_cpus::get(),
            model_shards: 2,
            rate_limited_max: 1,
        }
    }
}

/// A stage the control loop should launch now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartDecision {
    pub stage: String,
    pub shard_count: usize,
}

/// Applies the resource rule to a gap report.
#[derive(Debug, Clone)]
pub struct ResourceScheduler {
    config: SchedulerConfig,
    cores: usize,
}

impl ResourceScheduler {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            cores: num_cpus::get(),
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the detected core count.
    pub fn with_cores(mut self, cores: usize) -> Self {
        self.cores = cores.max(1);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Decide which stages to start, in topological order.
    pub fn schedule(&self, registry: &StageRegistry, report: &GapReport, run_state: &RunState) -> Vec<StartDecision> {
        let live: HashSet<&str> = run_state.live_stages().into_iter().collect();
        let class_of = |name: &str| registry.stage(name).ok().map(|s| s.resource_class);

        let mut exclusive_busy = live
            .iter()
            .any(|s| class_of(*s) == Some(ResourceClass::ExclusiveAccelerator));
        let mut rate_limited = run_state
            .workers()
            .iter()
            .filter(|w| class_of(w.stage.as_str()) == Some(ResourceClass::RateLimitedApi))
            .count();

        let mut decisions = Vec::new();
        for stage in registry.stages() {
            let Some(gap) = report.get(&stage.name) else {
                continue;
            };
            let pending = gap.pending_count();
            if pending == 0 {
                continue;
            }
            if live.contains(stage.name.as_str()) {
                continue;
            }
            if run_state.is_disabled(&stage.name) {
                tracing::debug!(stage = %stage.name, pending, "Skipping disabled stage");
                continue;
            }

            let mut shard_count = self.shard_count(stage, pending);
            match stage.resource_class {
                ResourceClass::ExclusiveAccelerator => {
                    if exclusive_busy {
                        tracing::debug!(stage = %stage.name, pending, "Accelerator busy, deferring");
                        continue;
                    }
                    exclusive_busy = true;
                }
                ResourceClass::RateLimitedApi => {
                    let free = self.config.rate_limited_max.saturating_sub(rate_limited);
                    if free == 0 {
                        tracing::debug!(stage = %stage.name, pending, "Rate-limited slots full, deferring");
                        continue;
                    }
                    shard_count = shard_count.min(free);
                    rate_limited += shard_count;
                }
                ResourceClass::CpuParallel => {}
            }

            decisions.push(StartDecision {
                stage: stage.name.clone(),
                shard_count,
            });
        }

        decisions
    }

    /// `min(preferred, cores, pending)`, at least 1. Non-shardable stages get 1.
    pub fn shard_count(&self, stage: &Stage, pending: usize) -> usize {
        if !stage.shardable {
            return 1;
        }
        let preferred = stage.shards.unwrap_or(if stage.loads_model {
            self.config.model_shards
        } else {
            self.config.cpu_shards
        });
        preferred.min(self.cores).min(pending).max(1)
    }
}

impl Default for ResourceScheduler {
    fn default() -> Self {
        Self::new()
    }
}
