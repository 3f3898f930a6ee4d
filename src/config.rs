use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::capture::{CameraConfig, MAX_FRAME_DIMENSION};
use crate::classify::OpenAiConfig;
use crate::room::RoomSeed;
use crate::upload::S3Config;

const DEFAULT_DB_PATH: &str = "occupancy.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_POLL_MS: u64 = 1_000;

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    database_url: Option<String>,
    poll_ms: Option<u64>,
    room: Option<RoomConfigFile>,
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    s3: Option<S3ConfigFile>,
    openai: Option<OpenAiConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct RoomConfigFile {
    name: Option<String>,
    description: Option<String>,
    location: Option<String>,
    total_occupancy: Option<u32>,
    computer_access: Option<bool>,
    whiteboard_access: Option<bool>,
    permitted_volume: Option<String>,
    update_on_create: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct S3ConfigFile {
    bucket: Option<String>,
    region: Option<String>,
    endpoint: Option<String>,
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiConfigFile {
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub db_path: String,
    pub room: RoomSeed,
    pub api_addr: String,
    pub poll_interval: Duration,
    pub camera: CameraConfig,
    pub s3: S3Config,
    pub openai: OpenAiConfig,
}

impl MonitorConfig {
    /// File named by `OCCUPANCY_CONFIG` (if any), then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = non_empty_env("OCCUPANCY_CONFIG");
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit config file instead of `OCCUPANCY_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Result<Self> {
        let db_path = match file.database_url.as_deref() {
            Some(url) => crate::sqlite_path_from_url(url)?,
            None => DEFAULT_DB_PATH.to_string(),
        };

        let defaults = RoomSeed::default();
        let room_file = file.room.unwrap_or_default();
        let room = RoomSeed {
            name: room_file.name.unwrap_or(defaults.name),
            description: room_file.description.unwrap_or(defaults.description),
            location: room_file.location.unwrap_or(defaults.location),
            total_occupancy: room_file
                .total_occupancy
                .unwrap_or(defaults.total_occupancy),
            updating: room_file.update_on_create.unwrap_or(defaults.updating),
            computer_access: room_file
                .computer_access
                .unwrap_or(defaults.computer_access),
            whiteboard_access: room_file
                .whiteboard_access
                .unwrap_or(defaults.whiteboard_access),
            permitted_volume: room_file
                .permitted_volume
                .unwrap_or(defaults.permitted_volume),
        };

        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());

        let camera_defaults = CameraConfig::default();
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraConfig {
            source: camera_file.source.unwrap_or(camera_defaults.source),
            width: camera_file.width.unwrap_or(camera_defaults.width),
            height: camera_file.height.unwrap_or(camera_defaults.height),
        };

        let s3_defaults = S3Config::default();
        let s3_file = file.s3.unwrap_or_default();
        let s3 = S3Config {
            bucket: s3_file.bucket.unwrap_or(s3_defaults.bucket),
            region: s3_file.region.unwrap_or(s3_defaults.region),
            access_key_id: s3_file.access_key_id,
            secret_access_key: s3_file.secret_access_key,
            endpoint: s3_file.endpoint,
        };

        let openai_defaults = OpenAiConfig::default();
        let openai_file = file.openai.unwrap_or_default();
        let openai = OpenAiConfig {
            api_key: openai_file.api_key,
            model: openai_file.model.unwrap_or(openai_defaults.model),
            base_url: openai_file.base_url.unwrap_or(openai_defaults.base_url),
            max_tokens: openai_file.max_tokens.unwrap_or(openai_defaults.max_tokens),
        };

        Ok(Self {
            db_path,
            room,
            api_addr,
            poll_interval: Duration::from_millis(file.poll_ms.unwrap_or(DEFAULT_POLL_MS)),
            camera,
            s3,
            openai,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = non_empty_env("DATABASE_URL") {
            self.db_path = crate::sqlite_path_from_url(&url)?;
        }
        if let Some(name) = non_empty_env("OCCUPANCY_ROOM") {
            self.room.name = name;
        }
        if let Some(addr) = non_empty_env("OCCUPANCY_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(poll) = non_empty_env("OCCUPANCY_POLL_MS") {
            let millis: u64 = poll.parse().map_err(|_| {
                anyhow!("OCCUPANCY_POLL_MS must be an integer number of milliseconds")
            })?;
            self.poll_interval = Duration::from_millis(millis);
        }
        if let Some(source) = non_empty_env("OCCUPANCY_CAMERA") {
            self.camera.source = source;
        }
        if let Some(bucket) = non_empty_env("S3_BUCKET") {
            self.s3.bucket = bucket;
        }
        if let Some(region) = non_empty_env("AWS_REGION") {
            self.s3.region = region;
        }
        if let Some(endpoint) = non_empty_env("S3_ENDPOINT") {
            self.s3.endpoint = Some(endpoint);
        }
        if let Some(key_id) = non_empty_env("AWS_ACCESS_KEY_ID") {
            self.s3.access_key_id = Some(key_id);
        }
        if let Some(secret) = non_empty_env("AWS_SECRET_ACCESS_KEY") {
            self.s3.secret_access_key = Some(secret);
        }
        if let Some(api_key) = non_empty_env("OPENAI_API_KEY") {
            self.openai.api_key = Some(api_key);
        }
        if let Some(model) = non_empty_env("OPENAI_MODEL") {
            self.openai.model = model;
        }
        if let Some(base_url) = non_empty_env("OPENAI_BASE_URL") {
            self.openai.base_url = base_url;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.room.name = self.room.name.trim().to_string();
        if self.room.name.is_empty() {
            return Err(anyhow!("room name must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        if self.camera.source.trim().is_empty() {
            return Err(anyhow!("camera source must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.camera.width > MAX_FRAME_DIMENSION || self.camera.height > MAX_FRAME_DIMENSION {
            return Err(anyhow!(
                "camera {}x{} exceeds the {} pixel limit per side",
                self.camera.width,
                self.camera.height,
                MAX_FRAME_DIMENSION
            ));
        }
        Ok(())
    }

    /// Checks the settings only the upload and classify steps need.
    pub fn validate_remote(&self) -> Result<()> {
        self.s3.validate()?;
        self.openai.validate()?;
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
