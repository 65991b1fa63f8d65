//! Control loop - scan, supervise, schedule, launch
//!
//! Each cycle:
//! 1. Reaps workers that exited since the last cycle
//! 2. Scans the store into a fresh gap report
//! 3. Kills workers that made no progress for their stage's stall threshold
//! 4. Asks the scheduler which stages to start and launches them
//! 5. Fires the export action on a transition into "nothing pending"
//!
//! The orchestrator never waits on a worker; everything it knows comes from
//! the store and from polling process liveness.

use std::time::Duration;

use crate::daemon::export::ExportTrigger;
use crate::daemon::recovery::{RecoveryAction, recover_workers};
use crate::daemon::tick::{ControlConfig, CycleReport, RunMode, TickState};
use crate::error::Result;
use crate::pool::{ProcessProbe, ShardSpec, StallMonitor, SystemProbe, WorkerPool};
use crate::registry::{FixAction, StageRegistry};
use crate::scanner::{CompletionScanner, GapReport};
use crate::scheduler::{ResourceScheduler, RunState};
use crate::store::Store;

/// Owns everything one orchestrator instance needs across cycles.
pub struct Orchestrator {
    registry: StageRegistry,
    store: Store,
    scheduler: ResourceScheduler,
    pool: WorkerPool,
    probe: Box<dyn ProcessProbe>,
    run_state: RunState,
    stalls: StallMonitor,
    export: ExportTrigger,
    config: ControlConfig,
    state: TickState,
}

impl Orchestrator {
    pub fn new(registry: StageRegistry, store: Store) -> Self {
        Self {
            registry,
            store,
            scheduler: ResourceScheduler::new(),
            pool: WorkerPool::new(),
            probe: Box::new(SystemProbe::new()),
            run_state: RunState::new(),
            stalls: StallMonitor::new(),
            export: ExportTrigger::new(None),
            config: ControlConfig::default(),
            state: TickState::new(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: ResourceScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_probe(mut self, probe: Box<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_export(mut self, action: Option<FixAction>) -> Self {
        self.export = ExportTrigger::new(action);
        self
    }

    pub fn with_config(mut self, config: ControlConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn run_state(&self) -> &RunState {
        &self.run_state
    }

    pub fn state(&self) -> &TickState {
        &self.state
    }

    /// Adopt workers left running by a previous orchestrator.
    pub fn recover(&mut self) -> Vec<RecoveryAction> {
        let (handles, actions) = recover_workers(&self.registry, self.probe.as_mut());
        if !handles.is_empty() {
            log::info!("Recovered {} running workers", handles.len());
        }
        self.run_state.add(handles);
        actions
    }

    /// Run one cycle. Must be called from within a tokio runtime.
    pub fn cycle(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport {
            cycle: self.state.cycles + 1,
            ..Default::default()
        };

        report.reaped = self.run_state.reap(self.probe.as_mut());
        for worker in &report.reaped {
            self.stalls
                .forget(&worker.stage, worker.shard.unwrap_or_else(ShardSpec::whole));
        }

        let gaps = CompletionScanner::new(&self.registry).scan(&self.store)?;

        report.killed = self.kill_stalled(&gaps);

        for decision in self.scheduler.schedule(&self.registry, &gaps, &self.run_state) {
            let stage = self.registry.stage(&decision.stage)?;
            match self.pool.launch(stage, decision.shard_count) {
                Ok(handles) => {
                    self.run_state.add(handles);
                    report.launched.push(decision);
                }
                Err(e) => {
                    self.run_state.disable(&decision.stage, e.to_string());
                    report.disabled.push(decision.stage);
                }
            }
        }

        self.export.reap();
        if self.export.observe(gaps.is_complete()) && self.export.is_configured() {
            match self.export.fire() {
                Ok(fired) => report.export_fired = fired,
                Err(e) => log::error!("Export failed to start: {}", e),
            }
        }

        report.live_workers = self.run_state.live_count();
        report.gaps = gaps;
        self.state.record(&report);

        tracing::info!(
            cycle = report.cycle,
            pending = report.gaps.total_pending(),
            launched = report.launched.len(),
            reaped = report.reaped.len(),
            killed = report.killed.len(),
            live = report.live_workers,
            "Cycle complete"
        );
        Ok(report)
    }

    /// Observe progress for every live worker and kill the hung ones.
    fn kill_stalled(&mut self, gaps: &GapReport) -> Vec<String> {
        let live: Vec<(String, ShardSpec, String)> = self
            .run_state
            .workers()
            .iter()
            .map(|w| (w.stage.clone(), w.shard_or_whole(), w.label()))
            .collect();

        let mut killed = Vec::new();
        for (stage_name, shard, label) in live {
            let Ok(stage) = self.registry.stage(&stage_name) else {
                continue;
            };
            let pending = gaps
                .get(&stage_name)
                .map(|g| shard.select(&g.pending_ids))
                .unwrap_or_default();
            let idle = self.stalls.observe(&stage_name, shard, &pending);
            if !StallMonitor::is_stalled(idle, stage.stall_scans()) {
                continue;
            }

            tracing::warn!(worker = %label, idle_scans = idle, "Worker made no progress, killing");
            if self.run_state.kill(&stage_name, shard, self.probe.as_mut()) {
                killed.push(label);
            }
            self.stalls.forget(&stage_name, shard);
        }
        killed
    }

    /// Cycle according to `mode`, calling `on_cycle` after each one.
    ///
    /// In watch mode a failed cycle is logged and retried next interval; in
    /// the bounded modes it ends the run. Ctrl-C during the inter-cycle sleep
    /// stops the loop; launched workers keep running.
    pub async fn run<F>(&mut self, mode: RunMode, mut on_cycle: F) -> Result<TickState>
    where
        F: FnMut(&CycleReport),
    {
        while mode.wants_cycle(self.state.cycles) {
            match self.cycle() {
                Ok(report) => on_cycle(&report),
                Err(e) if mode == RunMode::Watch => log::error!("Cycle failed: {}", e),
                Err(e) => return Err(e),
            }

            if !mode.wants_cycle(self.state.cycles) {
                break;
            }
            if self.sleep_or_interrupt(self.config.interval).await {
                log::info!("Interrupted, leaving {} workers running", self.run_state.live_count());
                self.state.request_shutdown();
                break;
            }
        }
        Ok(self.state.clone())
    }

    /// Returns true if interrupted.
    async fn sleep_or_interrupt(&self, interval: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(interval) => false,
            _ = tokio::signal::ctrl_c() => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::probe::fake::FakeProbe;
    use crate::registry::{ResourceClass, Stage, StageDefaults};
    use crate::scheduler::SchedulerConfig;

    fn orchestrator(stages: Vec<Stage>, items: usize) -> Orchestrator {
        let registry = StageRegistry::new(stages, &StageDefaults::default()).unwrap();
        let mut store = Store::open_in_memory().unwrap();
        let sources: Vec<String> = (0..items).map(|i| format!("/photos/{}.jpg", i)).collect();
        store.insert_items(&sources).unwrap();
        Orchestrator::new(registry, store)
            .with_probe(Box::new(FakeProbe::default()))
            .with_scheduler(ResourceScheduler::new().with_config(SchedulerConfig {
                cpu_shards: 2,
                model_shards: 1,
                rate_limited_max: 1,
            }))
            .with_config(ControlConfig::new(Duration::from_millis(10)))
    }

    fn sleeper(name: &str, class: ResourceClass) -> Stage {
        Stage::new(name, class, FixAction::new("sleep").arg("30"))
    }

    async fn wait_for_reap(orch: &mut Orchestrator) -> CycleReport {
        for _ in 0..200 {
            let report = orch.cycle().unwrap();
            if !report.reaped.is_empty() {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no worker exited");
    }

    fn stop_all(orch: &mut Orchestrator) {
        let live: Vec<(String, ShardSpec)> = orch
            .run_state
            .workers()
            .iter()
            .map(|w| (w.stage.clone(), w.shard_or_whole()))
            .collect();
        for (stage, shard) in live {
            orch.run_state.kill(&stage, shard, orch.probe.as_mut());
        }
    }

    #[tokio::test]
    async fn test_live_stage_is_not_relaunched() {
        let mut orch = orchestrator(vec![sleeper("exif", ResourceClass::CpuParallel)], 3);

        let first = orch.cycle().unwrap();
        assert_eq!(first.launched.len(), 1);
        assert_eq!(first.live_workers, 1);
        assert!(!first.export_fired);

        let second = orch.cycle().unwrap();
        assert!(second.launched.is_empty());
        assert_eq!(second.gaps.get("exif").unwrap().pending_count(), 3);

        stop_all(&mut orch);
    }

    #[tokio::test]
    async fn test_single_exclusive_stage_at_a_time() {
        let mut orch = orchestrator(
            vec![
                sleeper("ocr", ResourceClass::ExclusiveAccelerator),
                sleeper("captions", ResourceClass::ExclusiveAccelerator),
            ],
            2,
        );
        let report = orch.cycle().unwrap();
        assert_eq!(report.launched.len(), 1);
        assert!(orch.cycle().unwrap().launched.is_empty());
        stop_all(&mut orch);
    }

    #[tokio::test]
    async fn test_hung_worker_is_killed_and_reaped() {
        let stage = sleeper("faces", ResourceClass::CpuParallel).with_stall_scans(2);
        let mut orch = orchestrator(vec![stage], 2);

        assert_eq!(orch.cycle().unwrap().launched.len(), 1);
        assert!(orch.cycle().unwrap().killed.is_empty()); // first observation
        assert!(orch.cycle().unwrap().killed.is_empty()); // idle 1
        assert_eq!(orch.cycle().unwrap().killed, vec!["faces".to_string()]);

        let report = wait_for_reap(&mut orch).await;
        assert!(!report.reaped[0].success);
        assert_eq!(orch.state().total_killed, 1);
        stop_all(&mut orch);
    }

    #[tokio::test]
    async fn test_spawn_failure_disables_stage() {
        let broken = Stage::new(
            "ocr",
            ResourceClass::ExclusiveAccelerator,
            FixAction::new("/nonexistent/stagehand-ocr"),
        );
        let mut orch = orchestrator(vec![broken, Stage::new("exif", ResourceClass::CpuParallel, FixAction::new("true"))], 1);

        let report = orch.cycle().unwrap();
        assert_eq!(report.disabled, vec!["ocr".to_string()]);
        assert!(orch.run_state().is_disabled("ocr"));
        assert_eq!(report.launched.len(), 1);

        let again = orch.cycle().unwrap();
        assert!(again.disabled.is_empty());
        assert!(again.launched.iter().all(|d| d.stage != "ocr"));
    }

    #[tokio::test]
    async fn test_export_fires_once_when_complete() {
        let temp = tempfile::TempDir::new().unwrap();
        let marker = temp.path().join("exported");
        let mut orch = orchestrator(vec![Stage::new("exif", ResourceClass::CpuParallel, FixAction::new("true"))], 0)
            .with_export(Some(FixAction::new("touch").arg(marker.to_string_lossy())));

        assert!(orch.cycle().unwrap().export_fired);
        assert!(!orch.cycle().unwrap().export_fired);
        assert_eq!(orch.state().exports, 1);
    }

    #[tokio::test]
    async fn test_recover_prevents_double_launch() {
        let registry = StageRegistry::new(
            vec![Stage::new("exif", ResourceClass::CpuParallel, FixAction::new("exif-worker"))],
            &StageDefaults::default(),
        )
        .unwrap();
        let mut store = Store::open_in_memory().unwrap();
        store.insert_items(&["a.jpg"]).unwrap();
        let probe = FakeProbe::default().with(77, &["exif-worker"]);
        let mut orch = Orchestrator::new(registry, store).with_probe(Box::new(probe));

        let actions = orch.recover();
        assert_eq!(actions.len(), 1);
        assert!(orch.run_state().is_live("exif"));
        assert!(orch.cycle().unwrap().launched.is_empty());
    }

    #[tokio::test]
    async fn test_run_bounded_cycles() {
        let mut orch = orchestrator(vec![Stage::new("exif", ResourceClass::CpuParallel, FixAction::new("true"))], 0);
        let mut seen = Vec::new();
        let state = orch.run(RunMode::Cycles(3), |r| seen.push(r.cycle)).await.unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(state.cycles, 3);
        assert!(!state.shutdown_requested);
    }
}
