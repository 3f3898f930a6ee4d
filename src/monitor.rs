//! The capture → upload → classify → persist pipeline and the loop that polls
//! the room's `updating` flag.
//!
//! Within one process, passes run with the pipeline lock held. Across
//! processes (the daemon and `occupancyctl run-once`), a pass first claims the
//! pending request in the room store, so only one of them captures and
//! commits it. A failed capture ends the pass with the flag still set and the
//! claim released, and the next poll tries again. Upload, classify and
//! persist failures are reported as errors and likewise leave the request
//! pending.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::capture::Camera;
use crate::classify::{OccupancyClassifier, OpenAiClassifier};
use crate::config::MonitorConfig;
use crate::room::{object_key, Room};
use crate::storage::{RoomStore, SqliteRoomStore};
use crate::upload::{ObjectStore, S3ObjectStore};

const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The room exists but no update was requested.
    Idle,
    /// No row carries the configured room name.
    RoomMissing,
    /// The camera produced no frame; the request stays pending.
    CaptureFailed,
    Updated { occupancy: u32, picture: String },
}

pub struct Pipeline {
    room_name: String,
    camera: Camera,
    objects: Box<dyn ObjectStore + Send>,
    classifier: Box<dyn OccupancyClassifier + Send>,
    rooms: Box<dyn RoomStore + Send>,
}

impl Pipeline {
    pub fn new(
        room_name: impl Into<String>,
        camera: Camera,
        objects: Box<dyn ObjectStore + Send>,
        classifier: Box<dyn OccupancyClassifier + Send>,
        rooms: Box<dyn RoomStore + Send>,
    ) -> Self {
        Self {
            room_name: room_name.into(),
            camera,
            objects,
            classifier,
            rooms,
        }
    }

    /// Production wiring: configured camera, S3, the chat model and SQLite.
    pub fn from_config(cfg: &MonitorConfig) -> Result<Self> {
        cfg.validate_remote()?;
        Ok(Self::new(
            cfg.room.name.clone(),
            Camera::new(cfg.camera.clone())?,
            Box::new(S3ObjectStore::new(cfg.s3.clone())?),
            Box::new(OpenAiClassifier::new(cfg.openai.clone())?),
            Box::new(SqliteRoomStore::open(&cfg.db_path)?),
        ))
    }

    pub fn room_name(&self) -> &str {
        &self.room_name
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn rooms_mut(&mut self) -> &mut dyn RoomStore {
        self.rooms.as_mut()
    }

    /// One pass: read the room, and if an update is pending, claim it,
    /// capture, upload, classify and commit. A request another process has
    /// already claimed is reported as `Idle`.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let Some(room) = self.rooms.find_by_name(&self.room_name)? else {
            return Ok(CycleOutcome::RoomMissing);
        };
        if !room.updating {
            return Ok(CycleOutcome::Idle);
        }
        if !self.rooms.claim_update(room.id)? {
            log::debug!("update for '{}' is claimed by another pass", room.name);
            return Ok(CycleOutcome::Idle);
        }

        let result = self.process_claimed(&room);
        if !matches!(result, Ok(CycleOutcome::Updated { .. })) {
            if let Err(err) = self.rooms.release_claim(room.id) {
                log::error!("failed to release claim on '{}': {:#}", room.name, err);
            }
        }
        result
    }

    fn process_claimed(&mut self, room: &Room) -> Result<CycleOutcome> {
        log::info!("update requested for '{}'; taking snapshot", room.name);
        let snapshot = match self.camera.capture() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::warn!("capture failed for '{}': {:#}", room.name, err);
                return Ok(CycleOutcome::CaptureFailed);
            }
        };

        let key = object_key(room.id);
        let picture = self
            .objects
            .put(&key, &snapshot.jpeg, snapshot.content_type())
            .with_context(|| format!("upload snapshot {}", key))?;
        let occupancy = self
            .classifier
            .estimate(&picture)
            .with_context(|| format!("classify snapshot {}", picture))?;
        self.rooms
            .record_occupancy(room.id, occupancy, &picture)
            .with_context(|| format!("record occupancy for '{}'", room.name))?;

        log::info!(
            "'{}' occupancy={} ({}x{} snapshot captured {} at {})",
            room.name,
            occupancy,
            snapshot.width,
            snapshot.height,
            snapshot.captured_at.to_rfc3339(),
            picture
        );
        Ok(CycleOutcome::Updated { occupancy, picture })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("room_name", &self.room_name)
            .field("camera", &self.camera.stats().source)
            .finish_non_exhaustive()
    }
}

fn run_locked(pipeline: &Mutex<Pipeline>) -> Result<CycleOutcome> {
    let mut pipeline = pipeline
        .lock()
        .map_err(|_| anyhow!("pipeline lock poisoned"))?;
    pipeline.run_cycle()
}

pub struct Monitor {
    pipeline: Arc<Mutex<Pipeline>>,
    poll_interval: Duration,
}

impl Monitor {
    pub fn new(pipeline: Pipeline, poll_interval: Duration) -> Self {
        Self {
            pipeline: Arc::new(Mutex::new(pipeline)),
            poll_interval,
        }
    }

    /// Runs one pass on the caller's thread.
    pub fn run_once(&self) -> Result<CycleOutcome> {
        run_locked(&self.pipeline)
    }

    /// Starts the poll loop on its own thread.
    pub fn spawn(self) -> Result<MonitorHandle> {
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let pipeline = self.pipeline.clone();
        let poll_interval = self.poll_interval;
        let join = std::thread::Builder::new()
            .name("occupancy-monitor".to_string())
            .spawn(move || run_monitor(pipeline, poll_interval, shutdown_thread))
            .context("spawn monitor thread")?;

        Ok(MonitorHandle {
            pipeline: self.pipeline,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_monitor(pipeline: Arc<Mutex<Pipeline>>, poll_interval: Duration, shutdown: Arc<AtomicBool>) {
    let mut passes = 0u64;
    let mut updates = 0u64;
    while !shutdown.load(Ordering::SeqCst) {
        passes += 1;
        match run_locked(&pipeline) {
            Ok(CycleOutcome::Updated { .. }) => updates += 1,
            Ok(CycleOutcome::RoomMissing) => {
                log::warn!("monitored room is missing; waiting for it to be created");
            }
            Ok(_) => {}
            Err(err) => log::error!("monitor pass failed: {:#}", err),
        }
        sleep_unless_shutdown(poll_interval, &shutdown);
    }
    log::info!("monitor stopped after {} passes, {} updates", passes, updates);
}

fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(SHUTDOWN_CHECK_INTERVAL));
    }
}

#[derive(Debug)]
pub struct MonitorHandle {
    pipeline: Arc<Mutex<Pipeline>>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Runs one pass now, waiting for any pass already in progress.
    pub fn run_once(&self) -> Result<CycleOutcome> {
        run_locked(&self.pipeline)
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("monitor thread panicked"))?;
        }
        Ok(())
    }
}
