//! Offset persistence for resumable syncs.
//!
//! An [`Offset`] is a whole-map snapshot from partition identifier to opaque
//! position marker. It is rewritten wholesale at each checkpoint and at final
//! close, never incrementally. The file-backed store writes atomically
//! (temp file, fsync, rename) so the offset file is never partially written;
//! a read that observes a write in progress surfaces a retryable error
//! rather than corrupt data.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// A whole-map offset snapshot: partition identifier → position marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Offset(pub BTreeMap<String, String>);

impl Offset {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, partition: &str) -> Option<&str> {
        self.0.get(partition).map(String::as_str)
    }

    pub fn insert(&mut self, partition: String, position: String) {
        self.0.insert(partition, position);
    }
}

impl FromIterator<(String, String)> for Offset {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Port for offset persistence.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Reads the stored snapshot; empty if none was ever persisted.
    async fn read(&self) -> Result<Offset>;

    /// Replaces the stored snapshot atomically.
    async fn persist(&self, offset: &Offset) -> Result<()>;
}

/// File-backed offset store with atomic write-then-replace persistence.
pub struct FileOffsetStore {
    file_path: PathBuf,
}

impl FileOffsetStore {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
        }
    }

    fn temp_path(&self) -> PathBuf {
        self.file_path.with_extension("tmp")
    }
}

#[async_trait]
impl OffsetStore for FileOffsetStore {
    async fn read(&self) -> Result<Offset> {
        if !self.file_path.exists() {
            if self.temp_path().exists() {
                // A write is in flight; the snapshot will be readable once
                // the rename lands.
                return Err(Error::OffsetReadRace(format!(
                    "offset file {:?} is being replaced",
                    self.file_path
                )));
            }
            debug!("no offset file at {:?}, starting from scratch", self.file_path);
            return Ok(Offset::default());
        }

        let content = fs::read_to_string(&self.file_path).await?;
        match serde_json::from_str::<Offset>(&content) {
            Ok(offset) => {
                debug!("loaded offset snapshot with {} partition(s)", offset.0.len());
                Ok(offset)
            }
            // Unparsable content under write-then-rename means we raced the
            // writer; the next read sees a complete snapshot.
            Err(e) => Err(Error::OffsetReadRace(format!(
                "offset file {:?} unreadable: {e}",
                self.file_path
            ))),
        }
    }

    async fn persist(&self, offset: &Offset) -> Result<()> {
        let temp_path = self.temp_path();
        let json = serde_json::to_string_pretty(offset)?;
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &self.file_path).await?;
        info!("persisted offset snapshot to {:?}", self.file_path);
        Ok(())
    }
}
