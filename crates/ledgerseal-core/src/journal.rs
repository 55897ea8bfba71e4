//! Append-only record journals (snapshots and audit events).
//!
//! # Format
//!
//! The file backend stores one canonical JSON object per line:
//! ```text
//! {"action":"trust_registry_rotated","actor_id":"ops@example.com",...}
//! {"action":"trust_admin_granted","actor_id":"ops@example.com",...}
//! ```
//!
//! Reads stream the file and hold at most the per-journal record limit in
//! memory. Pruning rewrites the whole file. Lines that fail to parse are
//! skipped with a warning on read and preserved on prune.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::canonical::to_canonical_string;
use crate::error::{TrustError, TrustResult};
use crate::store::write_atomic;

/// Record bound for journal payloads.
pub trait JournalRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> JournalRecord for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Append-only record log.
#[async_trait]
pub trait Journal<T: JournalRecord>: Send + Sync {
    /// Append one record.
    async fn append(&self, record: &T) -> TrustResult<()>;

    /// The most recent records, oldest first, bounded by the read limit.
    async fn read_all_bounded(&self) -> TrustResult<Vec<T>>;

    /// Up to `limit` most recent records, newest first.
    async fn read_recent(&self, limit: usize) -> TrustResult<Vec<T>> {
        let mut records = self.read_all_bounded().await?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    /// Drop every record for which `keep` is false, except the
    /// `protect_recent` newest records of the whole journal, which always
    /// survive. Not bounded by the read limit. Returns how many were dropped.
    async fn prune(
        &self,
        protect_recent: usize,
        keep: &(dyn for<'r> Fn(&'r T) -> bool + Send + Sync),
    ) -> TrustResult<usize>;
}

/// File-backed NDJSON journal.
pub struct NdjsonJournal<T> {
    path: PathBuf,
    read_limit: usize,
    lock: Mutex<()>,
    _record: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for NdjsonJournal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdjsonJournal")
            .field("path", &self.path)
            .field("read_limit", &self.read_limit)
            .finish()
    }
}

impl<T: JournalRecord> NdjsonJournal<T> {
    pub fn new(path: impl Into<PathBuf>, read_limit: usize) -> Self {
        Self {
            path: path.into(),
            read_limit: read_limit.max(1),
            lock: Mutex::new(()),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last `read_limit` non-empty lines with their line numbers.
    async fn read_tail(&self) -> TrustResult<Vec<(usize, String)>> {
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.read_error(e)),
        };

        let mut lines = BufReader::new(file).lines();
        let mut tail = VecDeque::with_capacity(self.read_limit);
        let mut line_number = 0;
        while let Some(line) = lines.next_line().await.map_err(|e| self.read_error(e))? {
            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            if tail.len() == self.read_limit {
                tail.pop_front();
            }
            tail.push_back((line_number, line));
        }
        Ok(tail.into())
    }

    fn read_error(&self, e: std::io::Error) -> TrustError {
        TrustError::storage(format!("failed to read {}: {}", self.path.display(), e))
    }

    async fn read_lines(&self) -> TrustResult<Vec<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.read_error(e)),
        }
    }

    fn parse_line(&self, line_number: usize, line: &str) -> Option<T> {
        match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    line = line_number,
                    error = %e,
                    "skipping unreadable journal line"
                );
                None
            }
        }
    }
}

#[async_trait]
impl<T: JournalRecord> Journal<T> for NdjsonJournal<T> {
    async fn append(&self, record: &T) -> TrustResult<()> {
        let mut line = to_canonical_string(record)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                TrustError::storage(format!("failed to open {}: {}", self.path.display(), e))
            })?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_all_bounded(&self) -> TrustResult<Vec<T>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read_tail()
            .await?
            .iter()
            .filter_map(|(line_number, line)| self.parse_line(*line_number, line))
            .collect())
    }

    async fn prune(
        &self,
        protect_recent: usize,
        keep: &(dyn for<'r> Fn(&'r T) -> bool + Send + Sync),
    ) -> TrustResult<usize> {
        let _guard = self.lock.lock().await;
        let lines = self.read_lines().await?;
        let records: Vec<Option<T>> = lines
            .iter()
            .enumerate()
            .map(|(index, line)| self.parse_line(index + 1, line))
            .collect();
        let first_protected = records
            .iter()
            .filter(|r| r.is_some())
            .count()
            .saturating_sub(protect_recent);

        let mut kept = String::new();
        let mut removed = 0;
        let mut position = 0;
        for (line, record) in lines.iter().zip(&records) {
            let retain = match record {
                Some(record) => {
                    let protected = position >= first_protected;
                    position += 1;
                    protected || keep(record)
                }
                None => true,
            };
            if retain {
                kept.push_str(line);
                kept.push('\n');
            } else {
                removed += 1;
            }
        }

        if removed > 0 {
            write_atomic(&self.path, &kept).await?;
        }
        Ok(removed)
    }
}

/// In-memory journal for tests and ephemeral runs.
pub struct MemoryJournal<T> {
    records: Mutex<Vec<T>>,
    fail_appends: AtomicBool,
}

impl<T> Default for MemoryJournal<T> {
    fn default() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail_appends: AtomicBool::new(false),
        }
    }
}

impl<T: JournalRecord> MemoryJournal<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent appends fail with a storage error.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl<T: JournalRecord> Journal<T> for MemoryJournal<T> {
    async fn append(&self, record: &T) -> TrustResult<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(TrustError::storage("journal append failed"));
        }
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn read_all_bounded(&self) -> TrustResult<Vec<T>> {
        Ok(self.records.lock().await.clone())
    }

    async fn prune(
        &self,
        protect_recent: usize,
        keep: &(dyn for<'r> Fn(&'r T) -> bool + Send + Sync),
    ) -> TrustResult<usize> {
        let mut records = self.records.lock().await;
        let before = records.len();
        let first_protected = before.saturating_sub(protect_recent);
        let mut position = 0;
        records.retain(|record| {
            let protected = position >= first_protected;
            position += 1;
            protected || keep(record)
        });
        Ok(before - records.len())
    }
}
