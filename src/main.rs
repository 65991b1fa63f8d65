use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod cli;

use cli::{Cli, Mode};
use stagehand::config::Config;
use stagehand::daemon::{ControlConfig, CycleReport, Orchestrator, RunMode, StatusReport, collect_status, reset_stage};
use stagehand::pool::{SystemProbe, WorkerPool};
use stagehand::scanner::CompletionScanner;
use stagehand::scheduler::ResourceScheduler;
use stagehand::store::Store;

fn setup_logging(level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stagehand")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("stagehand.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the config file
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.unwrap_or("info")))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn store_path(cli: &Cli, config: &Config) -> PathBuf {
    cli.store.clone().unwrap_or_else(|| config.store.path.clone())
}

fn open_store(path: &Path, config: &Config) -> Result<Store> {
    Store::open(path, &config.store.options()).context(format!("Failed to open store {}", path.display()))
}

/// Read-only modes never create the store; a missing one reads as empty.
fn open_store_read_only(path: &Path, config: &Config, json: bool) -> Result<Store> {
    if !path.exists() {
        log::warn!("No store at {}, reporting an empty pipeline", path.display());
        if !json {
            println!("{} {}", "No store at".yellow(), path.display());
        }
        return Store::open_in_memory().context("Failed to open empty store");
    }
    Store::open_read_only(path, &config.store.options()).context(format!("Failed to open store {}", path.display()))
}

/// Returns false when the run should exit nonzero.
async fn run_application(cli: &Cli, config: &Config) -> Result<bool> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let registry = config.registry().context("Invalid stage registry")?;
    let path = store_path(cli, config);
    info!("Using store {} with {} stages", path.display(), registry.len());

    match cli.mode() {
        Mode::Status => {
            let store = open_store_read_only(&path, config, cli.json)?;
            let status = collect_status(&registry, &store, &mut SystemProbe::new()).context("Failed to collect status")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
            Ok(true)
        }
        Mode::Check => {
            let store = open_store_read_only(&path, config, cli.json)?;
            let violations = CompletionScanner::new(&registry)
                .check_consistency(&store)
                .context("Consistency check failed")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&violations)?);
            } else if violations.is_empty() {
                println!("{}", "No consistency violations".green());
            } else {
                println!("{} {}", "Violations:".red().bold(), violations.len());
                for violation in &violations {
                    println!("  {}", violation);
                }
            }
            Ok(violations.is_empty())
        }
        Mode::Reset(stage) => {
            let mut store = open_store(&path, config)?;
            let summary = reset_stage(&registry, &mut store, &stage).context(format!("Failed to reset {}", stage))?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "{} {} ({} rows removed)",
                    "Reset:".yellow(),
                    summary.stages.join(", "),
                    summary.rows_removed
                );
                for name in &summary.untouched {
                    println!("  {} {} completes by query and was not reset", "warning:".yellow(), name);
                }
            }
            Ok(true)
        }
        Mode::Run(mode) => {
            let store = open_store(&path, config)?;
            let pool = worker_pool(cli, config, &path)?;
            let control = match cli.interval {
                Some(secs) => ControlConfig::new(Duration::from_secs(secs)),
                None => config.control.control_config(),
            };

            let mut orchestrator = Orchestrator::new(registry, store)
                .with_scheduler(ResourceScheduler::new().with_config(config.scheduler.clone()))
                .with_pool(pool)
                .with_export(config.export.clone())
                .with_config(control);

            let adopted = orchestrator.recover();
            if !adopted.is_empty() && !cli.json {
                println!("{} {} running workers", "Recovered:".cyan(), adopted.len());
            }

            if mode == RunMode::Watch && !cli.json {
                println!("{}", "Watching pipeline, Ctrl-C to stop".cyan());
            }
            let json = cli.json;
            let state = orchestrator
                .run(mode, |report| print_cycle(report, json))
                .await
                .context("Control loop failed")?;
            info!(
                "Finished after {} cycles: {} launched, {} failed exits, {} killed",
                state.cycles, state.total_launched, state.total_failed, state.total_killed
            );
            Ok(true)
        }
    }
}

/// Workers inherit where to find the config and store.
fn worker_pool(cli: &Cli, config: &Config, store: &Path) -> Result<WorkerPool> {
    let store = fs::canonicalize(store).unwrap_or_else(|_| store.to_path_buf());
    let mut pool = WorkerPool::new().env("STAGEHAND_STORE", store.to_string_lossy());
    if let Some(path) = &cli.config {
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.clone());
        pool = pool.env("STAGEHAND_CONFIG", path.to_string_lossy());
    }
    if let Some(dir) = &config.control.worker_log_dir {
        fs::create_dir_all(dir).context(format!("Failed to create worker log dir {}", dir.display()))?;
        pool = pool.with_log_dir(dir);
    }
    Ok(pool)
}

fn print_status(status: &StatusReport) {
    println!("{} {}", "Items:".bold(), status.gaps.item_total);
    println!(
        "{:<20} {:>9} {:>9} {:>9} {:>7} {:>7}",
        "STAGE", "PENDING", "COMPLETE", "ELIGIBLE", "FAILED", "DONE"
    );
    for gap in &status.gaps.stages {
        let pending = if gap.pending_count() == 0 {
            format!("{:>9}", 0).green()
        } else {
            format!("{:>9}", gap.pending_count()).yellow()
        };
        let failed = if gap.failed_count == 0 {
            format!("{:>7}", 0).normal()
        } else {
            format!("{:>7}", gap.failed_count).red()
        };
        println!(
            "{:<20} {} {:>9} {:>9} {} {:>6.1}%",
            gap.stage,
            pending,
            gap.complete_count,
            gap.eligible_total,
            failed,
            gap.percent_complete()
        );
    }

    if status.workers.is_empty() {
        println!("{}", "No live workers".dimmed());
    } else {
        println!("{}", "Live workers:".bold());
        for worker in &status.workers {
            let shard = worker.shard.map(|s| format!("[{}]", s)).unwrap_or_default();
            println!("  {}{} pid {}", worker.stage, shard, worker.pid);
        }
    }

    if !status.violations.is_empty() {
        println!("{} {}", "Violations:".red().bold(), status.violations.len());
        for violation in &status.violations {
            println!("  {}", violation);
        }
    }
}

fn print_cycle(report: &CycleReport, json: bool) {
    if json {
        match serde_json::to_string(report) {
            Ok(line) => println!("{}", line),
            Err(e) => log::error!("Failed to serialize cycle report: {}", e),
        }
        return;
    }

    let pending = report.gaps.total_pending();
    let header = format!("Cycle {}:", report.cycle);
    if pending == 0 {
        println!("{} {}", header.green(), "nothing pending");
    } else {
        println!("{} {} pending, {} live workers", header.cyan(), pending, report.live_workers);
    }
    for decision in &report.launched {
        println!("  {} {} x{}", "launched".green(), decision.stage, decision.shard_count);
    }
    if !report.reaped.is_empty() {
        println!(
            "  {} {} ({} failed)",
            "exited".normal(),
            report.reaped.len(),
            report.failed_exits()
        );
    }
    for label in &report.killed {
        println!("  {} {} (no progress)", "killed".red(), label);
    }
    for stage in &report.disabled {
        println!("  {} {} (fix-action would not start)", "disabled".red().bold(), stage);
    }
    if report.export_fired {
        println!("  {}", "export started".green().bold());
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    let ok = run_application(&cli, &config).await.context("Application failed")?;
    if !ok {
        std::process::exit(1);
    }

    Ok(())
}
