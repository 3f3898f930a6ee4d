//! Snapshot sources.
//!
//! This module provides the sources a room snapshot can come from:
//! - Stub source (`stub://name`, testing and dry runs)
//! - HTTP snapshot endpoints (IP cameras, ESP32-style `/capture` URLs)
//! - Local JPEG files (`file:///path` or a plain path)
//! - USB/V4L2 webcams (`/dev/videoN` or `v4l2://N`, feature: capture-v4l2)
//!
//! Every source produces a JPEG-encoded `Snapshot` held in memory. Snapshots
//! are never written to disk; the upload step sends the bytes directly.
//!
//! A capture is a single frame: sources open the device or endpoint, grab one
//! frame and release it again, so the camera is free between pipeline passes.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{GenericImageView, ImageFormat, RgbImage};

mod file;
mod http;
#[cfg(feature = "capture-v4l2")]
mod normalize;
mod synthetic;
#[cfg(feature = "capture-v4l2")]
mod v4l2;

use file::FileCamera;
use http::HttpCamera;
use synthetic::SyntheticCamera;
#[cfg(feature = "capture-v4l2")]
use v4l2::V4l2Camera;

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";
const JPEG_QUALITY: u8 = 85;
pub(crate) const MAX_JPEG_BYTES: usize = 10 * 1024 * 1024;
/// Largest frame width or height a camera is asked for.
pub const MAX_FRAME_DIMENSION: u32 = 8_192;

/// One captured frame, JPEG encoded.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Wraps JPEG bytes after checking that they decode.
    pub fn from_jpeg(jpeg: Vec<u8>) -> Result<Self> {
        if jpeg.is_empty() {
            return Err(anyhow!("empty jpeg snapshot"));
        }
        if jpeg.len() > MAX_JPEG_BYTES {
            return Err(anyhow!(
                "jpeg snapshot is {} bytes; limit is {}",
                jpeg.len(),
                MAX_JPEG_BYTES
            ));
        }
        let image = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
            .context("decode jpeg snapshot")?;
        let (width, height) = image.dimensions();
        Ok(Self {
            jpeg,
            width,
            height,
            captured_at: Utc::now(),
        })
    }

    /// Encodes packed RGB8 pixels.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let image = RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
            anyhow!("pixel buffer does not match {}x{} rgb frame", width, height)
        })?;
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
            .encode_image(&image)
            .context("encode jpeg snapshot")?;
        Ok(Self {
            jpeg,
            width,
            height,
            captured_at: Utc::now(),
        })
    }

    pub fn content_type(&self) -> &'static str {
        JPEG_CONTENT_TYPE
    }
}

/// Configuration for a camera.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConfig {
    /// Source locator; the scheme selects the backend.
    pub source: String,
    /// Preferred frame width (stub and V4L2 sources).
    pub width: u32,
    /// Preferred frame height (stub and V4L2 sources).
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: "/dev/video0".to_string(),
            width: 640,
            height: 480,
        }
    }
}

/// Capture statistics.
#[derive(Clone, Debug, Default)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub source: String,
}

pub struct Camera {
    backend: CameraBackend,
    stats: CaptureStats,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    Http(HttpCamera),
    File(FileCamera),
    #[cfg(feature = "capture-v4l2")]
    V4l2(V4l2Camera),
}

impl Camera {
    pub fn new(config: CameraConfig) -> Result<Self> {
        let source = config.source.trim().to_string();
        if source.is_empty() {
            return Err(anyhow!("camera source must not be empty"));
        }
        let backend = if source.starts_with("stub://") {
            CameraBackend::Synthetic(SyntheticCamera::new(config.width, config.height))
        } else if source.starts_with("http://") || source.starts_with("https://") {
            CameraBackend::Http(HttpCamera::new(&source)?)
        } else if source.starts_with("file://") {
            CameraBackend::File(FileCamera::from_url(&source)?)
        } else if is_v4l2_source(&source) {
            Self::v4l2_backend(&config)?
        } else if let Some((scheme, _)) = source.split_once("://") {
            return Err(anyhow!(
                "unsupported camera scheme '{}'; expected stub, http(s), file or v4l2",
                scheme
            ));
        } else {
            CameraBackend::File(FileCamera::new(&source))
        };
        Ok(Self {
            backend,
            stats: CaptureStats {
                source,
                ..CaptureStats::default()
            },
        })
    }

    #[cfg(feature = "capture-v4l2")]
    fn v4l2_backend(config: &CameraConfig) -> Result<CameraBackend> {
        Ok(CameraBackend::V4l2(V4l2Camera::new(
            &config.source,
            config.width,
            config.height,
        )?))
    }

    #[cfg(not(feature = "capture-v4l2"))]
    fn v4l2_backend(config: &CameraConfig) -> Result<CameraBackend> {
        Err(anyhow!(
            "camera source '{}' needs the capture-v4l2 feature",
            config.source
        ))
    }

    /// Capture one frame.
    pub fn capture(&mut self) -> Result<Snapshot> {
        let result = match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.capture(),
            CameraBackend::Http(camera) => camera.capture(),
            CameraBackend::File(camera) => camera.capture(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::V4l2(camera) => camera.capture(),
        };
        match &result {
            Ok(_) => {
                self.stats.frames_captured += 1;
                self.stats.last_error = None;
            }
            Err(err) => {
                self.stats.failures += 1;
                self.stats.last_error = Some(format!("{:#}", err));
            }
        }
        result
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }
}

fn is_v4l2_source(source: &str) -> bool {
    source.starts_with("/dev/video") || source.starts_with("v4l2://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            source: "stub://lounge".to_string(),
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn stub_camera_produces_decodable_jpeg() -> Result<()> {
        let mut camera = Camera::new(stub_config())?;
        let snapshot = camera.capture()?;
        assert_eq!(snapshot.width, 64);
        assert_eq!(snapshot.height, 48);

        let decoded = Snapshot::from_jpeg(snapshot.jpeg.clone())?;
        assert_eq!((decoded.width, decoded.height), (64, 48));
        assert_eq!(camera.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn snapshot_is_stamped_at_capture() -> Result<()> {
        let mut camera = Camera::new(stub_config())?;
        let before = Utc::now();
        let snapshot = camera.capture()?;
        assert!(snapshot.captured_at >= before);
        assert!(snapshot.captured_at <= Utc::now());
        Ok(())
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let config = CameraConfig {
            source: "rtsp://camera-1/stream".to_string(),
            ..stub_config()
        };
        let err = Camera::new(config).err().expect("rtsp is unsupported");
        assert!(err.to_string().contains("rtsp"));
    }

    #[test]
    fn missing_file_counts_as_failed_capture() -> Result<()> {
        let config = CameraConfig {
            source: "/nonexistent/room-snapshot.jpg".to_string(),
            ..stub_config()
        };
        let mut camera = Camera::new(config)?;
        assert!(camera.capture().is_err());
        assert_eq!(camera.stats().failures, 1);
        assert!(camera.stats().last_error.is_some());
        Ok(())
    }

    #[test]
    fn huge_stub_frame_fails_without_panicking() -> Result<()> {
        let mut camera = Camera::new(CameraConfig {
            source: "stub://a".to_string(),
            width: 70_000,
            height: 70_000,
        })?;
        assert!(camera.capture().is_err());
        assert_eq!(camera.stats().failures, 1);
        Ok(())
    }

    #[test]
    fn garbage_bytes_are_not_a_snapshot() {
        assert!(Snapshot::from_jpeg(Vec::new()).is_err());
        assert!(Snapshot::from_jpeg(b"not a jpeg".to_vec()).is_err());
    }

    #[test]
    fn rgb_buffer_size_must_match_dimensions() {
        assert!(Snapshot::from_rgb(vec![0u8; 10], 4, 4).is_err());
    }

    #[cfg(not(feature = "capture-v4l2"))]
    #[test]
    fn v4l2_source_requires_feature() {
        let config = CameraConfig {
            source: "/dev/video0".to_string(),
            ..stub_config()
        };
        assert!(Camera::new(config).is_err());
    }
}
