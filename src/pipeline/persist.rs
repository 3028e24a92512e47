//! Persistence: append finished [`OcrRecord`]s to a store.
//!
//! Stores are append-only from the pipeline's point of view: no reads, no
//! updates, no deletes. A failed append is reported to the caller but never
//! changes what the user sees.
//!
//! Three stores ship with the crate:
//!
//! * [`JsonlRecordStore`]: one JSON object per line in a local file.
//! * [`HttpRecordStore`]: `POST` each record to a collection endpoint.
//! * [`MemoryRecordStore`]: in-process, for embedding the library and tests.

use crate::error::PersistenceError;
use crate::record::OcrRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Capability: append one immutable record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn record(&self, entry: &OcrRecord) -> Result<(), PersistenceError>;
}

// ── JSON Lines file ──────────────────────────────────────────────────────

/// Appends records as JSON Lines.
///
/// Each record is serialised up front and written with a single
/// `write_all`, so concurrent runs never interleave partial lines within
/// one process.
#[derive(Debug, Clone)]
pub struct JsonlRecordStore {
    path: PathBuf,
}

impl JsonlRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl RecordStore for JsonlRecordStore {
    async fn record(&self, entry: &OcrRecord) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(&line).await.map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;

        debug!("Appended {} byte record to {}", line.len(), self.path.display());
        Ok(())
    }
}

// ── Remote collection ────────────────────────────────────────────────────

/// `POST`s each record as JSON to a collection endpoint.
#[derive(Clone)]
pub struct HttpRecordStore {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRecordStore")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpRecordStore {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn record(&self, entry: &OcrRecord) -> Result<(), PersistenceError> {
        let mut request = self.client.post(&self.endpoint).json(entry);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| PersistenceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(PersistenceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!("Record posted to {}", self.endpoint);
        Ok(())
    }
}

// ── In-process ───────────────────────────────────────────────────────────

/// Keeps records in memory. Clones share the same backing list.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    records: Arc<Mutex<Vec<OcrRecord>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything appended so far, oldest first.
    pub fn records(&self) -> Vec<OcrRecord> {
        self.records
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn record(&self, entry: &OcrRecord) -> Result<(), PersistenceError> {
        self.records
            .lock()
            .map_err(|_| PersistenceError::Rejected("record list poisoned".to_string()))?
            .push(entry.clone());
        Ok(())
    }
}
