//! HTTP snapshot source.
//!
//! Fetches one JPEG per capture. Single-image endpoints (`/capture`,
//! `/snapshot.jpg`) are read to the end; multipart MJPEG streams are read only
//! until the first complete JPEG, then the connection is dropped.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;
use url::Url;

use super::{Snapshot, MAX_JPEG_BYTES};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub(super) struct HttpCamera {
    url: Url,
    agent: ureq::Agent,
}

impl HttpCamera {
    pub(super) fn new(source: &str) -> Result<Self> {
        let url = Url::parse(source).context("parse camera url")?;
        let agent = ureq::AgentBuilder::new().timeout(HTTP_TIMEOUT).build();
        Ok(Self { url, agent })
    }

    pub(super) fn capture(&mut self) -> Result<Snapshot> {
        let response = self
            .agent
            .get(self.url.as_str())
            .call()
            .with_context(|| format!("fetch snapshot from {}", self.url))?;
        let content_type = response
            .header("Content-Type")
            .unwrap_or("")
            .to_lowercase();
        let reader = response.into_reader().take(MAX_JPEG_BYTES as u64 * 2);
        let jpeg = if content_type.contains("multipart") {
            read_first_mjpeg_frame(reader)?
        } else {
            read_single_jpeg(reader)?
        };
        Snapshot::from_jpeg(jpeg)
    }
}

fn read_single_jpeg(mut reader: impl Read) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn read_first_mjpeg_frame(mut reader: impl Read) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(64 * 1024);
    let mut chunk = vec![0u8; 8192];
    loop {
        if let Some((start, end)) = find_jpeg_bounds(&buffer) {
            return Ok(buffer[start..end].to_vec());
        }
        let read = reader.read(&mut chunk).context("read mjpeg chunk")?;
        if read == 0 {
            return Err(anyhow!("mjpeg stream ended before a complete frame"));
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > MAX_JPEG_BYTES * 2 {
            return Err(anyhow!("no complete jpeg within {} bytes", MAX_JPEG_BYTES * 2));
        }
    }
}

/// Locates the first complete SOI..EOI span in `buffer`.
///
/// Walks the marker segments by their length fields, so an `FF D9` inside an
/// APPn payload (an EXIF thumbnail) does not end the frame. Bytes that do not
/// follow the segment structure fall back to scanning for the next `FF D9`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let mut pos = start + 2;
    loop {
        if *buffer.get(pos)? != 0xFF {
            return scan_for_eoi(buffer, pos).map(|end| (start, end));
        }
        let mut marker_at = pos + 1;
        while *buffer.get(marker_at)? == 0xFF {
            marker_at += 1;
        }
        match buffer[marker_at] {
            0xD9 => return Some((start, marker_at + 1)),
            0x01 | 0xD0..=0xD7 => pos = marker_at + 1,
            marker => {
                let len_hi = *buffer.get(marker_at + 1)? as usize;
                let len_lo = *buffer.get(marker_at + 2)? as usize;
                let segment_len = (len_hi << 8) | len_lo;
                if segment_len < 2 {
                    return scan_for_eoi(buffer, marker_at + 1).map(|end| (start, end));
                }
                let segment_end = marker_at + 1 + segment_len;
                pos = if marker == 0xDA {
                    next_marker_after_scan(buffer, segment_end)?
                } else {
                    segment_end
                };
            }
        }
    }
}

/// Skips entropy-coded data; returns the offset of the next real marker.
fn next_marker_after_scan(buffer: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 1 < buffer.len() {
        if buffer[i] == 0xFF {
            match buffer[i + 1] {
                0x00 | 0xD0..=0xD7 | 0xFF => i += 1,
                _ => return Some(i),
            }
        } else {
            i += 1;
        }
    }
    None
}

fn scan_for_eoi(buffer: &[u8], from: usize) -> Option<usize> {
    let offset = buffer.get(from..)?.windows(2).position(|w| w == [0xFF, 0xD9])?;
    Some(from + offset + 2)
}
