//! Room occupancy monitor.
//!
//! A single room row carries an `updating` flag. When the flag is set, the
//! monitor loop captures a webcam frame, uploads it to object storage, asks a
//! vision-language model how many people are in it, and writes the count back
//! to the row, clearing the flag.
//!
//! # Module Structure
//!
//! - `room`: the monitored room row and its seed values
//! - `storage`: room persistence (SQLite, in-memory)
//! - `capture`: snapshot sources (stub, HTTP, file, V4L2)
//! - `upload`: object storage (S3 with SigV4, in-memory)
//! - `classify`: occupancy estimation (OpenAI-compatible chat API, fixed)
//! - `monitor`: the capture → upload → classify → persist pipeline and its poll loop
//! - `api`: minimal HTTP server over the room row
//! - `config`: daemon configuration (file + environment)

use anyhow::{anyhow, Result};
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};

pub mod api;
pub mod capture;
pub mod classify;
pub mod cli;
pub mod config;
pub mod monitor;
pub mod room;
pub mod storage;
pub mod upload;

pub use capture::{Camera, CameraConfig, CaptureStats, Snapshot};
pub use classify::{parse_occupancy, FixedClassifier, OccupancyClassifier, OpenAiClassifier, OpenAiConfig};
pub use monitor::{CycleOutcome, Monitor, MonitorHandle, Pipeline};
pub use room::{object_key, Room, RoomSeed, DEFAULT_ROOM_NAME};
pub use storage::{InMemoryRoomStore, RoomStore, SqliteRoomStore};
pub use upload::{InMemoryObjectStore, ObjectStore, S3Config, S3ObjectStore};

/// Loads a `.env` file, then initialises `env_logger` (default filter `info`),
/// so a `RUST_LOG` set in the file takes effect. With `None` the file is
/// searched for from the working directory. Returns the file that was loaded.
pub fn init_logging(dotenv_file: Option<&Path>) -> Option<PathBuf> {
    let loaded = match dotenv_file {
        Some(path) => dotenv::from_path(path).ok().map(|()| path.to_path_buf()),
        None => dotenv::dotenv().ok(),
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
    loaded
}

/// Shared-cache in-memory SQLite URI. Every connection opened with the same
/// URI sees the same database while at least one connection stays open.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:room_occupancy_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

/// Normalizes a database location into something rusqlite can open.
///
/// Accepts a plain path, a `sqlite://` URL or a `file:` URI.
pub fn sqlite_path_from_url(database_url: &str) -> Result<String> {
    let trimmed = database_url.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("database location must not be empty"));
    }
    if let Some(rest) = trimmed.strip_prefix("sqlite://") {
        if rest.is_empty() {
            return Err(anyhow!("sqlite url is missing a path"));
        }
        return Ok(rest.to_string());
    }
    if let Some(rest) = trimmed.strip_prefix("sqlite:") {
        return Ok(rest.to_string());
    }
    if trimmed.starts_with("file:") {
        return Ok(trimmed.to_string());
    }
    if let Some((scheme, _)) = trimmed.split_once("://") {
        return Err(anyhow!(
            "unsupported database scheme '{}'; only sqlite is supported",
            scheme
        ));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_url_forms_are_normalized() -> Result<()> {
        assert_eq!(sqlite_path_from_url("rooms.db")?, "rooms.db");
        assert_eq!(sqlite_path_from_url("sqlite:///var/lib/rooms.db")?, "/var/lib/rooms.db");
        assert_eq!(sqlite_path_from_url("sqlite://rooms.db")?, "rooms.db");
        assert_eq!(sqlite_path_from_url("sqlite:rooms.db")?, "rooms.db");
        Ok(())
    }

    #[test]
    fn non_sqlite_urls_are_rejected() {
        let err = sqlite_path_from_url("postgresql://user@db/rooms").unwrap_err();
        assert!(err.to_string().contains("postgresql"));
        assert!(sqlite_path_from_url("   ").is_err());
    }

    #[test]
    fn shared_memory_uris_are_unique() {
        assert_ne!(shared_memory_uri(), shared_memory_uri());
    }
}
