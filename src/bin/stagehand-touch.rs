//! Reference worker: marks every pending item of its shard as processed.
//!
//! Writes an `empty` sentinel per item (or a small `found` payload with
//! `--found`) through the batched writer. Useful for smoke tests and for
//! wiring a new stage before its real worker exists.

use clap::Parser;
use eyre::{Context, Result, eyre};
use log::info;
use std::path::PathBuf;
use std::time::Duration;

use stagehand::config::Config;
use stagehand::pool::ShardSpec;
use stagehand::store::Store;
use stagehand::worker::pending_for_shard;
use stagehand::writer::{BatchWriter, Outcome};

#[derive(Parser, Debug)]
#[command(name = "stagehand-touch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file declaring the stage
    #[arg(short, long, env = "STAGEHAND_CONFIG")]
    config: Option<PathBuf>,

    /// Datastore path (overrides config)
    #[arg(short, long, env = "STAGEHAND_STORE")]
    store: Option<PathBuf>,

    /// Stage to work on
    #[arg(long, env = "STAGEHAND_STAGE")]
    stage: String,

    /// This worker's shard index
    #[arg(long, requires = "shard_count")]
    shard: Option<usize>,

    /// Total shards for the stage
    #[arg(long, requires = "shard")]
    shard_count: Option<usize>,

    /// Pause per item, to simulate real work
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Stop after this many items
    #[arg(long)]
    limit: Option<usize>,

    /// Write a `found` payload instead of an `empty` sentinel
    #[arg(long)]
    found: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::load(args.config.as_ref()).context("Failed to load configuration")?;
    let registry = config.registry().context("Invalid stage registry")?;
    let stage = registry.stage(&args.stage).context("Unknown stage")?;

    let shard = match (args.shard, args.shard_count) {
        (Some(index), Some(count)) => ShardSpec::new(index, count).context("Invalid shard")?,
        (None, None) => ShardSpec::whole(),
        _ => return Err(eyre!("--shard and --shard-count go together")),
    };

    let path = args.store.clone().unwrap_or_else(|| config.store.path.clone());
    let mut store = Store::open(&path, &config.store.options()).context(format!("Failed to open store {}", path.display()))?;

    let mut pending = pending_for_shard(&registry, &store, &stage.name, shard)?;
    if let Some(limit) = args.limit {
        pending.truncate(limit);
    }

    let mut writer = BatchWriter::new(&mut store, stage, config.writer.clone())?;
    for item_id in pending {
        if args.delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(args.delay_ms));
        }
        let outcome = if args.found {
            Outcome::Found(serde_json::json!({ "touched_by": "stagehand-touch", "shard": shard }))
        } else {
            Outcome::Empty
        };
        writer.record(item_id, outcome)?;
    }
    let stats = writer.finish().context("Final flush failed")?;

    info!(
        "Stage {} shard {} done: {} records in {} flushes",
        stage.name,
        shard,
        stats.records(),
        stats.flushes
    );
    Ok(())
}
