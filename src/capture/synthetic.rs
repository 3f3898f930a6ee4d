use anyhow::{anyhow, Result};

use super::{Snapshot, MAX_FRAME_DIMENSION};

/// Generates a gradient test card. Each capture shifts the pattern so
/// consecutive snapshots differ.
pub(super) struct SyntheticCamera {
    width: u32,
    height: u32,
    frame_count: u64,
}

impl SyntheticCamera {
    pub(super) fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            frame_count: 0,
        }
    }

    pub(super) fn capture(&mut self) -> Result<Snapshot> {
        if self.width > MAX_FRAME_DIMENSION || self.height > MAX_FRAME_DIMENSION {
            return Err(anyhow!(
                "{}x{} frame exceeds the {} pixel limit per side",
                self.width,
                self.height,
                MAX_FRAME_DIMENSION
            ));
        }
        let len = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("{}x{} frame is too large", self.width, self.height))?;
        self.frame_count += 1;
        let shift = (self.frame_count % 256) as u32;
        let mut pixels = Vec::with_capacity(len);
        for y in 0..self.height {
            for x in 0..self.width {
                pixels.push((x.wrapping_add(shift) % 256) as u8);
                pixels.push((y.wrapping_add(shift) % 256) as u8);
                pixels.push(((x ^ y) % 256) as u8);
            }
        }
        Snapshot::from_rgb(pixels, self.width, self.height)
    }
}
