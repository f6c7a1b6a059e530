//! Sync event types published to presentation.

use super::{SyncError, SyncState, VersionToken};
use crate::current_timestamp;
use uuid::Uuid;

/// Shared event metadata.
#[derive(Debug, Clone)]
pub struct EventMeta {
    /// Unique identifier for this event.
    pub event_id: String,
    /// Timestamp (Unix epoch seconds).
    pub timestamp: u64,
}

impl EventMeta {
    /// Creates new event metadata using the current timestamp.
    #[must_use]
    pub fn new() -> Self {
        Self::with_timestamp(current_timestamp())
    }

    /// Creates new event metadata with a specified timestamp.
    #[must_use]
    pub fn with_timestamp(timestamp: u64) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp,
        }
    }
}

impl Default for EventMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts from a settled pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullStats {
    /// Remote notes with no local counterpart.
    pub added: usize,
    /// Local notes overwritten with a different remote body.
    pub updated: usize,
    /// Local notes removed because the remote no longer has them.
    pub removed: usize,
    /// Ids where the local copy was kept over the remote one.
    pub kept_local: usize,
}

impl PullStats {
    /// Returns true if the pull changed nothing locally.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }
}

/// Counts from a settled push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushStats {
    /// Notes written.
    pub upserted: usize,
    /// Notes deleted.
    pub deleted: usize,
}

/// Events emitted by the coordinator.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The coordinator changed state.
    StateChanged {
        /// Event metadata.
        meta: EventMeta,
        /// Previous state.
        from: SyncState,
        /// New state.
        to: SyncState,
    },
    /// The local note set or pending-change count changed.
    NotesChanged {
        /// Event metadata.
        meta: EventMeta,
        /// Notes in the set.
        note_count: usize,
        /// Pending changes in the ledger.
        pending_changes: usize,
    },
    /// A pull settled successfully.
    Pulled {
        /// Event metadata.
        meta: EventMeta,
        /// Merge counts.
        stats: PullStats,
    },
    /// A push settled successfully.
    Pushed {
        /// Event metadata.
        meta: EventMeta,
        /// Batch counts.
        stats: PushStats,
        /// Marker returned by the remote.
        version: VersionToken,
    },
    /// A pull or push failed; the ledger is preserved.
    SyncFailed {
        /// Event metadata.
        meta: EventMeta,
        /// `"pull"` or `"push"`.
        direction: &'static str,
        /// The surfaced error.
        error: SyncError,
    },
}

impl SyncEvent {
    /// Returns the event type name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::NotesChanged { .. } => "notes_changed",
            Self::Pulled { .. } => "pulled",
            Self::Pushed { .. } => "pushed",
            Self::SyncFailed { .. } => "sync_failed",
        }
    }

    /// Returns the event metadata.
    #[must_use]
    pub const fn meta(&self) -> &EventMeta {
        match self {
            Self::StateChanged { meta, .. }
            | Self::NotesChanged { meta, .. }
            | Self::Pulled { meta, .. }
            | Self::Pushed { meta, .. }
            | Self::SyncFailed { meta, .. } => meta,
        }
    }

    /// Returns the timestamp of the event.
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        self.meta().timestamp
    }
}
