use crate::client::transport::{StorageTransport, TransportError};
use crate::config::{InitOptions, SessionConfig};
use crate::value::resolve::{resolve_files, ResolveError, ResolvedFile};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("file resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("failed to read file '{path}' for upload: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("server stored upload as '{returned}', expected '{expected}'")]
    InconsistentUpload { expected: String, returned: String },

    #[error("session has no active version; call init first")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, BatchError>;

/// One logical upload session against the storage server.
///
/// Lifecycle: [`BatchSession::new`] → [`init`](BatchSession::init) (registers
/// a version and starts the heartbeat) → [`add`](BatchSession::add) /
/// [`flush`](BatchSession::flush) → [`complete`](BatchSession::complete) or
/// [`cancel`](BatchSession::cancel). Methods take `&mut self`, so calls on a
/// session are serialized by construction; only the heartbeat task runs
/// alongside them.
pub struct BatchSession {
    config: SessionConfig,
    queue: Vec<PendingRecord>,
    active: Option<ActiveVersion>,
}

struct PendingRecord {
    record_type: String,
    payload: Value,
}

struct ActiveVersion {
    transport: Arc<StorageTransport>,
    version: String,
    timeout: Duration,
    heartbeat: JoinHandle<()>,
}

impl Drop for ActiveVersion {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

impl BatchSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            queue: Vec::new(),
            active: None,
        }
    }

    /// Register a new version under the configured batch name and start the
    /// heartbeat task.
    ///
    /// The server's reply carries the version id and the liveness timeout;
    /// the heartbeat runs at one fifth of that timeout. Registering again on
    /// a live session replaces the previous version and its heartbeat. On
    /// failure the session is left as it was.
    pub async fn init(&mut self, options: InitOptions) -> Result<()> {
        let transport = Arc::new(StorageTransport::new(&self.config, &options)?);

        let request = RegisterRequest {
            name: self.config.name.clone(),
        };
        let response: RegisterResponse =
            transport.post_json("/api/storage/versions", &request).await?;

        let timeout = Duration::from_secs(response.timeout);
        debug!(
            version = %response.version,
            timeout_secs = response.timeout,
            "Registered version"
        );

        let heartbeat = spawn_heartbeat(Arc::clone(&transport), response.version.clone(), timeout);
        self.active = Some(ActiveVersion {
            transport,
            version: response.version,
            timeout,
            heartbeat,
        });

        Ok(())
    }

    /// Queue one record. Once the queue reaches the configured buffer size
    /// the whole queue is flushed before this call returns.
    pub async fn add(&mut self, record_type: impl Into<String>, payload: Value) -> Result<()> {
        if self.active.is_none() {
            return Err(BatchError::NotInitialized);
        }

        self.queue.push(PendingRecord {
            record_type: record_type.into(),
            payload,
        });

        if self.queue.len() >= self.config.buffer {
            self.flush().await?;
        }

        Ok(())
    }

    /// Resolve, upload and submit everything queued so far.
    ///
    /// The queue is cleared only after the server accepted the full instance
    /// batch; any failure leaves it untouched so the call can be retried
    /// without data loss.
    pub async fn flush(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        let active = self.active.as_ref().ok_or(BatchError::NotInitialized)?;

        // Resolve every queued payload, accumulating instances and the
        // combined file list across records.
        let mut instances = Vec::with_capacity(self.queue.len());
        let mut files = Vec::new();
        for record in &self.queue {
            let resolved = resolve_files(&record.payload).await?;
            instances.push(Instance {
                record_type: record.record_type.clone(),
                body: resolved.body,
                files: resolved
                    .files
                    .iter()
                    .map(|f| f.identifier.clone())
                    .collect(),
            });
            files.extend(resolved.files);
        }

        let candidates = dedupe_by_identifier(files);
        if !candidates.is_empty() {
            upload_missing(&active.transport, candidates).await?;
        }

        let path = format!("/api/storage/versions/{}/instances", active.version);
        let _: serde_json::Value = active.transport.post_json(&path, &instances).await?;
        debug!(
            version = %active.version,
            count = instances.len(),
            "Submitted instances"
        );

        self.queue.clear();
        Ok(())
    }

    /// Flush remaining records, mark the version complete and stop the
    /// heartbeat.
    pub async fn complete(&mut self) -> Result<()> {
        self.flush().await?;

        let active = self.active.as_ref().ok_or(BatchError::NotInitialized)?;
        let path = format!("/api/storage/versions/{}/complete", active.version);
        let _: serde_json::Value = active
            .transport
            .post_json(&path, &serde_json::json!({}))
            .await?;
        debug!(version = %active.version, "Version completed");

        self.active = None;
        Ok(())
    }

    /// Mark the version cancelled and stop the heartbeat. Pending records
    /// are discarded with the session, not submitted.
    pub async fn cancel(&mut self) -> Result<()> {
        let active = self.active.as_ref().ok_or(BatchError::NotInitialized)?;
        let path = format!("/api/storage/versions/{}/cancel", active.version);
        let _: serde_json::Value = active
            .transport
            .post_json(&path, &serde_json::json!({}))
            .await?;
        debug!(version = %active.version, dropped = self.queue.len(), "Version cancelled");

        self.queue.clear();
        self.active = None;
        Ok(())
    }

    /// Stop the heartbeat task if it is running. Safe to call repeatedly;
    /// the session itself stays usable.
    pub fn stop(&mut self) {
        if let Some(active) = &self.active {
            active.heartbeat.abort();
        }
    }

    /// Number of records waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Version id assigned at registration, if the session is active.
    pub fn version(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.version.as_str())
    }

    /// Server-specified liveness timeout, if the session is active.
    pub fn timeout(&self) -> Option<Duration> {
        self.active.as_ref().map(|a| a.timeout)
    }
}

/// Ask the server which identifiers it already has, then upload the rest
/// one at a time, checking that the server echoes each identifier back.
async fn upload_missing(transport: &StorageTransport, candidates: Vec<ResolvedFile>) -> Result<()> {
    let identifiers: Vec<&str> = candidates.iter().map(|f| f.identifier.as_str()).collect();
    let known: Vec<String> = transport.post_json("/api/file/find", &identifiers).await?;
    let known: HashSet<String> = known.into_iter().collect();

    for file in candidates.iter().filter(|f| !known.contains(&f.identifier)) {
        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|source| BatchError::FileRead {
                path: file.path.clone(),
                source,
            })?;

        let response: UploadResponse = transport
            .post_multipart("/api/file/files", &file.identifier, bytes)
            .await?;

        if response.file_name != file.identifier {
            return Err(BatchError::InconsistentUpload {
                expected: file.identifier.clone(),
                returned: response.file_name,
            });
        }
        debug!(identifier = %file.identifier, "Uploaded file");
    }

    Ok(())
}

/// Keep the first occurrence of each identifier, preserving order.
fn dedupe_by_identifier(files: Vec<ResolvedFile>) -> Vec<ResolvedFile> {
    let mut seen = HashSet::new();
    files
        .into_iter()
        .filter(|f| seen.insert(f.identifier.clone()))
        .collect()
}

/// Periodic liveness signal for an active version.
///
/// Ticks at a fifth of the server timeout and only sends when the transport
/// has been idle for at least two fifths of it, so regular upload traffic
/// suppresses redundant heartbeats. Request failures are logged and the task
/// keeps running; the server will expire the version if they persist.
fn spawn_heartbeat(
    transport: Arc<StorageTransport>,
    version: String,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(version = %version, "Heartbeat task started");
        let mut timer = tokio::time::interval(timeout / 5);
        // The first tick completes immediately
        timer.tick().await;

        loop {
            timer.tick().await;

            if transport.idle_for() < timeout * 2 / 5 {
                continue;
            }

            let path = format!("/api/storage/versions/{}/heartbeat", version);
            match transport
                .post_json::<_, serde_json::Value>(&path, &serde_json::json!({}))
                .await
            {
                Ok(_) => debug!(version = %version, "Heartbeat sent"),
                Err(e) => warn!(version = %version, error = %e, "Heartbeat request failed"),
            }
        }
    })
}

// ===== Wire Types =====

#[derive(Debug, Serialize)]
struct RegisterRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    version: String,
    /// Liveness timeout in seconds.
    timeout: u64,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(rename = "fileName")]
    file_name: String,
}

/// A resolved record as submitted to the server.
#[derive(Debug, Clone, Serialize)]
pub struct Instance {
    #[serde(rename = "type")]
    pub record_type: String,
    pub body: serde_json::Value,
    pub files: Vec<String>,
}
