//! Poll history storage.
//!
//! One record per closed poll, queried by owning teacher. The session never
//! waits on the store: appends run in background tasks with a bounded number
//! of retries.

use crate::error::{SessionError, SessionResult};
use crate::protocol::OptionResult;
use crate::types::{Identity, Poll, PollId};
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Persisted layout of a closed poll
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollRecord {
    pub id: PollId,
    pub question: String,
    pub options: Vec<RecordOption>,
    pub owner_identity: Identity,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordOption {
    pub text: String,
    pub votes: u32,
}

impl PollRecord {
    pub fn from_results(poll: &Poll, results: &[OptionResult]) -> Self {
        Self {
            id: poll.id.clone(),
            question: poll.question.clone(),
            options: results
                .iter()
                .map(|r| RecordOption {
                    text: r.text.clone(),
                    votes: r.votes,
                })
                .collect(),
            owner_identity: poll.owner.clone(),
            created_at: poll.created_at.clone(),
        }
    }
}

/// Append/query contract the session needs from a history backend
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, record: &PollRecord) -> SessionResult<()>;

    /// Records of `owner`, oldest first
    async fn list_by_owner(&self, owner: &str) -> SessionResult<Vec<PollRecord>>;

    fn name(&self) -> &str;
}

/// Process-lifetime store
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: RwLock<Vec<PollRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, record: &PollRecord) -> SessionResult<()> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn list_by_owner(&self, owner: &str) -> SessionResult<Vec<PollRecord>> {
        let mut list: Vec<_> = self
            .records
            .read()
            .iter()
            .filter(|r| r.owner_identity == owner)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Append-only JSON lines file; survives restarts
#[derive(Debug)]
pub struct JsonFileHistoryStore {
    path: PathBuf,
    /// Serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl JsonFileHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HistoryStore for JsonFileHistoryStore {
    async fn append(&self, record: &PollRecord) -> SessionResult<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| SessionError::Storage(format!("Failed to encode record: {}", e)))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SessionError::Storage(e.to_string()))?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn list_by_owner(&self, owner: &str) -> SessionResult<Vec<PollRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SessionError::Storage(e.to_string())),
        };

        let mut list = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PollRecord>(line) {
                Ok(record) if record.owner_identity == owner => list.push(record),
                Ok(_) => {}
                Err(e) => {
                    // A torn last line after a crash should not hide the rest
                    tracing::warn!(
                        path = %self.path.display(),
                        line = line_no + 1,
                        "Skipping unreadable history line: {}",
                        e
                    );
                }
            }
        }
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    fn name(&self) -> &str {
        "json-file"
    }
}

/// Retry policy for background appends
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Append with linear backoff; gives up after `policy.attempts` tries
pub async fn append_with_retry(
    store: &dyn HistoryStore,
    record: &PollRecord,
    policy: RetryPolicy,
) -> SessionResult<()> {
    let attempts = policy.attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match store.append(record).await {
            Ok(()) => {
                tracing::info!(
                    poll_id = %record.id,
                    owner = %record.owner_identity,
                    store = store.name(),
                    "Poll saved to history"
                );
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(
                    poll_id = %record.id,
                    attempt,
                    attempts,
                    "History append failed: {}",
                    e
                );
                last_err = Some(e);
                if attempt < attempts {
                    let jitter = rand::rng().random_range(0..=policy.backoff.as_millis() as u64 / 4);
                    let delay = policy.backoff * attempt + Duration::from_millis(jitter);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| SessionError::Storage("append failed".to_string())))
}
