//! In-memory versioned note store.
//!
//! Used by tests and demos. Supports scripted failures, holding calls in
//! flight, and a propagation lag where reads trail the latest commit until
//! [`MemoryGateway::propagate`] is called.

use super::{CommitBatch, GatewayError, RemoteGateway, RemoteNote, RemoteSnapshot};
use crate::models::{NoteId, VersionToken};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::instrument;

#[derive(Debug, Default)]
struct Inner {
    notes: BTreeMap<NoteId, RemoteNote>,
    revision: u64,
    /// What reads return while lagging; `None` means reads are current.
    visible: Option<RemoteSnapshot>,
    lagging: bool,
    fetch_failures: VecDeque<GatewayError>,
    commit_failures: VecDeque<GatewayError>,
    fetch_calls: usize,
    commit_calls: usize,
    commits: Vec<CommitBatch>,
}

impl Inner {
    fn current(&self) -> RemoteSnapshot {
        RemoteSnapshot {
            notes: self.notes.clone(),
            version: Some(revision_token(self.revision)),
        }
    }

    fn bump(&mut self) -> VersionToken {
        self.revision += 1;
        revision_token(self.revision)
    }
}

fn revision_token(revision: u64) -> VersionToken {
    VersionToken::new(format!("r{revision}"))
}

/// Cloneable handle to a shared in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryGateway {
    inner: Arc<Mutex<Inner>>,
    gate: Arc<RwLock<()>>,
}

impl MemoryGateway {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding the given notes.
    #[must_use]
    pub fn with_notes<I, K, V>(notes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<NoteId>,
        V: Into<String>,
    {
        let gateway = Self::new();
        for (id, body) in notes {
            gateway.put_remote(id, body);
        }
        gateway
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes a note as if edited on another device.
    pub fn put_remote(&self, id: impl Into<NoteId>, body: impl Into<String>) -> VersionToken {
        let mut inner = self.lock();
        inner.notes.insert(id.into(), RemoteNote::hashed(body));
        inner.bump()
    }

    /// Deletes a note as if deleted on another device.
    pub fn remove_remote(&self, id: &NoteId) -> VersionToken {
        let mut inner = self.lock();
        inner.notes.remove(id);
        inner.bump()
    }

    /// Current body of a note in the store.
    #[must_use]
    pub fn body(&self, id: &NoteId) -> Option<String> {
        self.lock().notes.get(id).map(|note| note.body.clone())
    }

    /// Current id -> body view of the store.
    #[must_use]
    pub fn bodies(&self) -> BTreeMap<NoteId, String> {
        self.lock()
            .notes
            .iter()
            .map(|(id, note)| (id.clone(), note.body.clone()))
            .collect()
    }

    /// Current store version.
    #[must_use]
    pub fn version(&self) -> VersionToken {
        revision_token(self.lock().revision)
    }

    /// Makes reads return the state as of now until [`Self::propagate`].
    pub fn start_lagging(&self) {
        let mut inner = self.lock();
        inner.lagging = true;
        inner.visible = Some(inner.current());
    }

    /// Makes reads current again (or refreshes the lagging view).
    pub fn propagate(&self) {
        let mut inner = self.lock();
        if inner.lagging {
            inner.visible = Some(inner.current());
        }
    }

    /// Stops lagging.
    pub fn stop_lagging(&self) {
        let mut inner = self.lock();
        inner.lagging = false;
        inner.visible = None;
    }

    /// Makes the next fetch fail with `error`.
    pub fn fail_next_fetch(&self, error: GatewayError) {
        self.lock().fetch_failures.push_back(error);
    }

    /// Makes the next commit fail with `error`.
    pub fn fail_next_commit(&self, error: GatewayError) {
        self.lock().commit_failures.push_back(error);
    }

    /// Blocks every call until the returned guard is dropped.
    pub async fn hold(&self) -> OwnedRwLockWriteGuard<()> {
        Arc::clone(&self.gate).write_owned().await
    }

    /// Number of fetches started.
    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.lock().fetch_calls
    }

    /// Number of commits started.
    #[must_use]
    pub fn commit_calls(&self) -> usize {
        self.lock().commit_calls
    }

    /// Batches that were applied, in order.
    #[must_use]
    pub fn commits(&self) -> Vec<CommitBatch> {
        self.lock().commits.clone()
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    #[instrument(skip(self), fields(operation = "memory.fetch_all"))]
    async fn fetch_all(&self) -> Result<RemoteSnapshot, GatewayError> {
        self.lock().fetch_calls += 1;
        let _gate = self.gate.read().await;

        let mut inner = self.lock();
        if let Some(error) = inner.fetch_failures.pop_front() {
            return Err(error);
        }
        Ok(inner.visible.clone().unwrap_or_else(|| inner.current()))
    }

    #[instrument(skip(self, batch), fields(operation = "memory.commit_batch", entries = batch.len()))]
    async fn commit_batch(&self, batch: CommitBatch) -> Result<VersionToken, GatewayError> {
        self.lock().commit_calls += 1;
        let _gate = self.gate.read().await;

        let mut inner = self.lock();
        if let Some(error) = inner.commit_failures.pop_front() {
            return Err(error);
        }
        for (id, body) in &batch.upserts {
            inner.notes.insert(id.clone(), RemoteNote::hashed(body.clone()));
        }
        for id in &batch.deletes {
            inner.notes.remove(id);
        }
        inner.commits.push(batch);
        Ok(inner.bump())
    }
}
