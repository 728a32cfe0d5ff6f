//! Schema-history persistence for connectors that track DDL.
//!
//! The history is an opaque, ordered, append-only blob of newline-delimited
//! records. The file store persists it atomically in either a plain or a
//! gzip-compressed representation and reads back whichever is present. An
//! optional database-name filter, set per instance at construction, drops
//! history lines for other databases on read.

use crate::{Error, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// An opaque, ordered schema-history blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaHistory(pub Bytes);

impl SchemaHistory {
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self(content.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// Serialized as base64 so a checkpoint embedding the history stays valid JSON.
impl Serialize for SchemaHistory {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for SchemaHistory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let decoded = BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        Ok(Self(Bytes::from(decoded)))
    }
}

/// Port for schema-history persistence.
#[async_trait]
pub trait SchemaHistoryStore: Send + Sync {
    /// Reads the stored history; empty if none was ever persisted.
    async fn read(&self) -> Result<SchemaHistory>;

    /// Replaces the stored history.
    async fn persist(&self, history: &SchemaHistory) -> Result<()>;

    /// Replaces the stored history with a gzip-compressed representation.
    async fn persist_compressed(&self, history: &SchemaHistory) -> Result<()>;
}

/// File-backed schema-history store.
///
/// The database filter is an explicit per-instance field: two pipelines for
/// different databases each construct their own store.
pub struct FileSchemaHistoryStore {
    file_path: PathBuf,
    database: Option<String>,
}

impl FileSchemaHistoryStore {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            database: None,
        }
    }

    /// Keep only history lines whose `databaseName` field matches `database`.
    pub fn with_database_filter(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    fn compressed_path(&self) -> PathBuf {
        self.file_path.with_extension("gz")
    }

    fn apply_filter(&self, raw: Vec<u8>) -> Result<SchemaHistory> {
        let Some(database) = &self.database else {
            return Ok(SchemaHistory::new(raw));
        };
        let text = String::from_utf8(raw)
            .map_err(|e| Error::Config(format!("schema history is not valid UTF-8: {e}")))?;
        let mut kept = String::with_capacity(text.len());
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let matches = match serde_json::from_str::<serde_json::Value>(line) {
                Ok(record) => record
                    .get("databaseName")
                    .and_then(|name| name.as_str())
                    .map(|name| name == database)
                    // Records without a database name apply to all.
                    .unwrap_or(true),
                Err(_) => true,
            };
            if matches {
                kept.push_str(line);
                kept.push('\n');
            }
        }
        Ok(SchemaHistory::new(kept.into_bytes()))
    }

    async fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<()> {
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, path).await?;
        Ok(())
    }

    async fn remove_if_exists(&self, path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SchemaHistoryStore for FileSchemaHistoryStore {
    async fn read(&self) -> Result<SchemaHistory> {
        let compressed = self.compressed_path();
        if compressed.exists() {
            let raw = fs::read(&compressed).await?;
            let mut decoder = GzDecoder::new(raw.as_slice());
            let mut content = Vec::new();
            decoder
                .read_to_end(&mut content)
                .map_err(|e| Error::Config(format!("corrupt compressed schema history: {e}")))?;
            debug!("loaded compressed schema history ({} bytes)", content.len());
            return self.apply_filter(content);
        }
        if self.file_path.exists() {
            let content = fs::read(&self.file_path).await?;
            debug!("loaded schema history ({} bytes)", content.len());
            return self.apply_filter(content);
        }
        debug!("no schema history at {:?}", self.file_path);
        Ok(SchemaHistory::default())
    }

    async fn persist(&self, history: &SchemaHistory) -> Result<()> {
        self.write_atomic(&self.file_path, history.as_bytes()).await?;
        self.remove_if_exists(&self.compressed_path()).await?;
        info!("persisted schema history to {:?}", self.file_path);
        Ok(())
    }

    async fn persist_compressed(&self, history: &SchemaHistory) -> Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(history.as_bytes())?;
        let compressed = encoder.finish()?;
        self.write_atomic(&self.compressed_path(), &compressed).await?;
        self.remove_if_exists(&self.file_path).await?;
        info!(
            "persisted compressed schema history to {:?}",
            self.compressed_path()
        );
        Ok(())
    }
}
