pub mod models;
pub mod settings;
pub mod store;
pub mod timer;
pub mod utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};

use settings::SettingsStore;
use store::{MemoryStore, StaticIdentity};
use timer::{
    commands::{parse_key, Console, Outcome, HELP},
    TokioScheduler, VisibilityRelay,
};

pub use models::{ContentType, OwnerId, TrackingKey};
pub use timer::{ActivityTracker, BindOptions, TrackerPhase, TrackerSnapshot};
pub use utils::format_elapsed;

fn data_dir() -> PathBuf {
    std::env::var_os("STUDYTIME_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".studytime"))
}

async fn run_console() -> Result<()> {
    let data_dir = data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings = SettingsStore::new(data_dir.join("settings.json"))?;
    if !settings.path().exists() {
        // Leave an editable copy of the defaults behind.
        settings.update_tracking(settings.tracking())?;
    }
    let tracking = settings.tracking().with_env_overrides();
    info!(
        "tick every {}ms, flush every {} ticks, auto start {}",
        tracking.tick_interval_ms, tracking.flush_every_ticks, tracking.auto_start
    );

    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(StaticIdentity::from_env("STUDYTIME_USER"));
    let tracker = ActivityTracker::new(
        store.clone(),
        identity.clone(),
        Arc::new(TokioScheduler::current()),
        tracking.tracker_config(),
    );
    let console = Console::new(tracker, VisibilityRelay::default(), store, identity);

    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        let key = parse_key(args.iter().map(String::as_str))
            .context("usage: studytime [<chapter|quiz|exercise> <id> [chapter-id]]")?;
        console.tracker.bind(key).await;
    }

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match console.handle_line(&line).await {
            Ok(Outcome::Continue(Some(output))) => println!("{output}"),
            Ok(Outcome::Continue(None)) => {}
            Ok(Outcome::Quit) => break,
            Err(err) => eprintln!("error: {err:#}"),
        }
    }

    let last = console.tracker.snapshot();
    console.tracker.shutdown().await;
    info!("session ended at {}", last.formatted);
    Ok(())
}

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("studytime starting up...");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run_console()) {
        error!("{err:#}");
        std::process::exit(1);
    }
}
