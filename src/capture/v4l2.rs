//! V4L2 webcam source.
//!
//! Opens the device for each capture, grabs one frame and closes it again, so
//! other programs can use the camera between pipeline passes. The device is
//! asked for MJPEG first; YUYV and RGB3 fall back to in-memory encoding.

use anyhow::{anyhow, Context, Result};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::FourCC;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::Snapshot;

/// Frames discarded after stream start while auto-exposure settles.
const WARMUP_FRAMES: usize = 3;

enum DeviceLocator {
    Path(String),
    Index(usize),
}

pub(super) struct V4l2Camera {
    locator: DeviceLocator,
    width: u32,
    height: u32,
}

impl V4l2Camera {
    pub(super) fn new(source: &str, width: u32, height: u32) -> Result<Self> {
        let locator = match source.strip_prefix("v4l2://") {
            Some(index) => DeviceLocator::Index(
                index
                    .parse()
                    .map_err(|_| anyhow!("v4l2 source '{}' must name a device index", source))?,
            ),
            None => DeviceLocator::Path(source.to_string()),
        };
        Ok(Self {
            locator,
            width,
            height,
        })
    }

    fn open(&self) -> Result<v4l::Device> {
        match &self.locator {
            DeviceLocator::Path(path) => {
                v4l::Device::with_path(path).with_context(|| format!("open v4l2 device {}", path))
            }
            DeviceLocator::Index(index) => {
                v4l::Device::new(*index).with_context(|| format!("open v4l2 device #{}", index))
            }
        }
    }

    pub(super) fn capture(&mut self) -> Result<Snapshot> {
        let mut device = self.open()?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.width;
        format.height = self.height;
        format.fourcc = FourCC::new(b"MJPG");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("v4l2: failed to request MJPEG: {}", err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        let mut stream = MmapStream::with_buffers(&mut device, Type::VideoCapture, 4)
            .context("create v4l2 buffer stream")?;
        for _ in 0..WARMUP_FRAMES {
            stream.next().context("capture v4l2 warmup frame")?;
        }
        let (buf, meta) = stream.next().context("capture v4l2 frame")?;
        let used = (meta.bytesused as usize).min(buf.len());
        let frame = if used == 0 { buf } else { &buf[..used] };

        match &format.fourcc.repr {
            b"MJPG" | b"JPEG" => Snapshot::from_jpeg(frame.to_vec()),
            b"YUYV" => {
                let rgb = normalize_to_rgb(frame, format.width, format.height, PixelFormat::Yuyv)?;
                Snapshot::from_rgb(rgb, format.width, format.height)
            }
            b"RGB3" => {
                let rgb =
                    normalize_to_rgb(frame, format.width, format.height, PixelFormat::Rgb24)?;
                Snapshot::from_rgb(rgb, format.width, format.height)
            }
            other => Err(anyhow!(
                "unsupported v4l2 pixel format {}",
                String::from_utf8_lossy(other)
            )),
        }
    }
}
