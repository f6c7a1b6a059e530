//! Remote gateway: the versioned store that is the source of truth for notes.
//!
//! The coordinator only needs two calls from a store: read everything, and
//! write a batch of upserts and deletes atomically. Anything that can do that
//! (the GitHub API, a local git repository, an in-memory map) can back a
//! notebook.
//!
//! Notes map to files by appending `.md` to the id; other files are ignored.

mod git;
mod memory;
mod timeout;

pub use git::GitGateway;
pub use memory::MemoryGateway;
pub use timeout::WithTimeout;

use crate::models::{NoteId, SyncErrorKind, VersionToken};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error as ThisError;

/// File extension of note files.
pub const NOTE_EXTENSION: &str = "md";

/// Returns the store path of a note.
#[must_use]
pub fn note_path(id: &NoteId) -> String {
    format!("{id}.{NOTE_EXTENSION}")
}

/// Returns the note id for a store path, or `None` for non-note files.
#[must_use]
pub fn note_id_from_path(path: &str) -> Option<NoteId> {
    let stem = path.strip_suffix(".md")?;
    NoteId::new(stem).validated().ok()
}

/// Failure reported by a gateway call.
///
/// A batch that was only partly applied must be reported as a failure of the
/// whole batch.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum GatewayError {
    /// Missing or rejected credentials, or no target repository.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// Transport failure or timeout.
    #[error("network error: {0}")]
    Network(String),

    /// The remote refused the request (permissions, validation, conflicts).
    #[error("rejected by remote: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Maps the error onto the sync error taxonomy.
    #[must_use]
    pub const fn kind(&self) -> SyncErrorKind {
        match self {
            Self::AuthRequired(_) => SyncErrorKind::AuthRequired,
            Self::Network(_) => SyncErrorKind::Network,
            Self::Rejected(_) => SyncErrorKind::RemoteRejected,
        }
    }

    /// Returns the message without the class prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::AuthRequired(msg) | Self::Network(msg) | Self::Rejected(msg) => msg,
        }
    }
}

/// A note as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNote {
    /// Raw markdown body.
    pub body: String,
    /// Per-note version (blob id or content hash).
    pub version: VersionToken,
}

impl RemoteNote {
    /// Creates a remote note whose version is the content hash of its body.
    #[must_use]
    pub fn hashed(body: impl Into<String>) -> Self {
        let body = body.into();
        let version = VersionToken::for_content(&body);
        Self { body, version }
    }
}

/// Result of [`RemoteGateway::fetch_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteSnapshot {
    /// Every note in the store.
    pub notes: BTreeMap<NoteId, RemoteNote>,
    /// Version marker of the store state that was read, if the store has one.
    pub version: Option<VersionToken>,
}

impl RemoteSnapshot {
    /// An empty store.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// One atomic write: upserted bodies and deleted ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitBatch {
    /// Notes to create or overwrite.
    pub upserts: BTreeMap<NoteId, String>,
    /// Notes to delete.
    pub deletes: BTreeSet<NoteId>,
}

impl CommitBatch {
    /// Returns true if the batch writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }

    /// Number of entries in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.upserts.len() + self.deletes.len()
    }

    /// Commit message describing the batch.
    #[must_use]
    pub fn message(&self) -> String {
        match (self.upserts.len(), self.deletes.len()) {
            (1, 0) => self
                .upserts
                .keys()
                .next()
                .map_or_else(String::new, |id| format!("Update {}", note_path(id))),
            (0, 1) => self
                .deletes
                .iter()
                .next()
                .map_or_else(String::new, |id| format!("Delete {}", note_path(id))),
            (upserts, deletes) => format!("Sync notes ({upserts} updated, {deletes} deleted)"),
        }
    }
}

/// The narrow transport interface the sync coordinator consumes.
///
/// Implementations own their timeout policy; a timeout is a
/// [`GatewayError::Network`]. Success or failure is reported only by the
/// return value; the coordinator never reads back its own write.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Reads every note in the store.
    async fn fetch_all(&self) -> Result<RemoteSnapshot, GatewayError>;

    /// Applies a batch atomically and returns the new store version.
    async fn commit_batch(&self, batch: CommitBatch) -> Result<VersionToken, GatewayError>;
}
