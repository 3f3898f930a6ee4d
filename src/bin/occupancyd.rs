//! occupancyd - room occupancy daemon
//!
//! This daemon:
//! 1. Loads `.env`, the config file and environment overrides
//! 2. Creates the room row on first start
//! 3. Serves the room API
//! 4. Polls the room's `updating` flag and runs capture → upload → classify → persist
//! 5. Stops both on Ctrl-C

use anyhow::{Context, Result};
use std::sync::mpsc;

use room_occupancy::{
    api::{ApiConfig, ApiServer},
    config::MonitorConfig,
    Monitor, Pipeline, RoomStore, SqliteRoomStore,
};

fn main() -> Result<()> {
    if let Some(path) = room_occupancy::init_logging(None) {
        log::info!("loaded environment from {}", path.display());
    }

    let cfg = MonitorConfig::load()?;

    let room = SqliteRoomStore::open(&cfg.db_path)?.seed(&cfg.room)?;
    log::info!(
        "monitoring '{}' (id={}, updating={}) in {}",
        room.name,
        room.id,
        room.updating,
        cfg.db_path
    );

    let api_handle = ApiServer::new(ApiConfig {
        addr: cfg.api_addr.clone(),
        db_path: cfg.db_path.clone(),
        room_name: cfg.room.name.clone(),
    })
    .spawn()?;
    log::info!("room api listening on {}", api_handle.addr);

    let pipeline = Pipeline::from_config(&cfg)?;
    let monitor_handle = Monitor::new(pipeline, cfg.poll_interval).spawn()?;
    log::info!(
        "monitor polling every {} ms, camera {}",
        cfg.poll_interval.as_millis(),
        cfg.camera.source
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("install Ctrl-C handler")?;

    log::info!("occupancyd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping monitor and API server...");
    monitor_handle.stop()?;
    api_handle.stop()?;

    Ok(())
}
