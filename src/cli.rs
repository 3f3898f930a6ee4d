//! occupancyctl - inspect and drive the room occupancy monitor
//!
//! Talks to the database directly, so it works whether or not the daemon is
//! running. `run-once` performs a pipeline pass on this process; with the
//! daemon running, whichever pass claims the pending request first handles
//! it and the other reports no update requested.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::capture::Camera;
use crate::classify::FixedClassifier;
use crate::config::MonitorConfig;
use crate::monitor::{CycleOutcome, Monitor, Pipeline};
use crate::storage::{RoomStore, SqliteRoomStore};
use crate::upload::InMemoryObjectStore;

#[derive(Parser, Debug)]
#[command(name = "occupancyctl", about = "Inspect and drive the room occupancy monitor")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension)
    #[arg(long, global = true, env = "OCCUPANCY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the monitored room as JSON
    Show,

    /// Create the room row from the configured seed if it does not exist
    Seed,

    /// Ask the monitor for a fresh reading (sets the updating flag)
    Request,

    /// Run one capture/upload/classify/persist pass now
    RunOnce {
        /// Skip S3 and the model; record a fixed count instead
        #[arg(long)]
        dry_run: bool,
        /// Count recorded by --dry-run
        #[arg(long, default_value_t = 0, requires = "dry_run")]
        count: u32,
    },
}

pub fn run() -> Result<()> {
    crate::init_logging(None);
    let args = Args::parse();
    let cfg = MonitorConfig::load_from(args.config.as_deref())?;

    match args.command {
        Command::Show => {
            let mut store = SqliteRoomStore::open(&cfg.db_path)?;
            let room = store
                .find_by_name(&cfg.room.name)?
                .ok_or_else(|| anyhow!("no room named '{}' in {}", cfg.room.name, cfg.db_path))?;
            println!("{}", serde_json::to_string_pretty(&room)?);
        }
        Command::Seed => {
            let mut store = SqliteRoomStore::open(&cfg.db_path)?;
            let room = store.seed(&cfg.room)?;
            println!("{}", serde_json::to_string_pretty(&room)?);
        }
        Command::Request => {
            let mut store = SqliteRoomStore::open(&cfg.db_path)?;
            if !store.request_update(&cfg.room.name)? {
                return Err(anyhow!("no room named '{}' in {}", cfg.room.name, cfg.db_path));
            }
            println!("update requested for '{}'", cfg.room.name);
        }
        Command::RunOnce { dry_run, count } => {
            let pipeline = if dry_run {
                dry_run_pipeline(&cfg, count)?
            } else {
                Pipeline::from_config(&cfg)?
            };
            let monitor = Monitor::new(pipeline, cfg.poll_interval);
            match monitor.run_once()? {
                CycleOutcome::Idle => println!("no update requested for '{}'", cfg.room.name),
                CycleOutcome::RoomMissing => {
                    return Err(anyhow!("no room named '{}' in {}", cfg.room.name, cfg.db_path))
                }
                CycleOutcome::CaptureFailed => {
                    return Err(anyhow!("capture failed; request left pending"))
                }
                CycleOutcome::Updated { occupancy, picture } => {
                    println!("'{}' occupancy={} picture={}", cfg.room.name, occupancy, picture)
                }
            }
        }
    }

    Ok(())
}

fn dry_run_pipeline(cfg: &MonitorConfig, count: u32) -> Result<Pipeline> {
    Ok(Pipeline::new(
        cfg.room.name.clone(),
        Camera::new(cfg.camera.clone())?,
        Box::new(InMemoryObjectStore::default()),
        Box::new(FixedClassifier::new(count)),
        Box::new(SqliteRoomStore::open(&cfg.db_path)?),
    ))
}
