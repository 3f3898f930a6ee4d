use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use url::Url;

use super::Snapshot;

/// Reads a JPEG from a local path on every capture. Useful with cameras that
/// drop snapshots into a directory, and for replaying a fixed image.
pub(super) struct FileCamera {
    path: PathBuf,
}

impl FileCamera {
    pub(super) fn new(path: &str) -> Self {
        Self {
            path: PathBuf::from(path),
        }
    }

    pub(super) fn from_url(source: &str) -> Result<Self> {
        let url = Url::parse(source).context("parse file camera url")?;
        let path = url
            .to_file_path()
            .map_err(|_| anyhow!("file camera url '{}' is not a local path", source))?;
        Ok(Self { path })
    }

    pub(super) fn capture(&mut self) -> Result<Snapshot> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("read snapshot file {}", self.path.display()))?;
        Snapshot::from_jpeg(bytes)
    }
}
