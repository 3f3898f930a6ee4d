//! Object storage for room snapshots.
//!
//! `ObjectStore::put` returns the URL the classifier will be given, so the
//! store decides how an object is addressed publicly.

use anyhow::Result;
use std::collections::BTreeMap;

mod s3;
pub(crate) mod sigv4;

pub use s3::{S3Config, S3ObjectStore};

pub trait ObjectStore {
    /// Stores `bytes` under `key`, replacing any previous object, and returns
    /// its public URL.
    fn put(&mut self, key: &str, bytes: &[u8], content_type: &str) -> Result<String>;
}

#[derive(Clone, Debug)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Keeps objects in a map and hands out `memory://` URLs.
#[derive(Clone, Debug, Default)]
pub struct InMemoryObjectStore {
    objects: BTreeMap<String, StoredObject>,
}

impl InMemoryObjectStore {
    pub fn get(&self, key: &str) -> Option<&StoredObject> {
        self.objects.get(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn put(&mut self, key: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        self.objects.insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(format!("memory://{}", key))
    }
}
