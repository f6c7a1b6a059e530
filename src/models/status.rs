//! Coordinator state and the status exposed to presentation.

use super::VersionToken;
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the sync coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Loading the local cache and auth context.
    Initializing,
    /// Steady state; nothing in flight.
    Idle,
    /// Fetching the remote note set.
    Pulling,
    /// Committing the drained change batch.
    Pushing,
}

impl SyncState {
    /// Returns the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Idle => "idle",
            Self::Pulling => "pulling",
            Self::Pushing => "pushing",
        }
    }

    /// Returns true while a pull or push is in flight.
    #[must_use]
    pub const fn is_syncing(self) -> bool {
        matches!(self, Self::Pulling | Self::Pushing)
    }

    /// Progress label for the in-flight states.
    #[must_use]
    pub const fn label(self) -> Option<&'static str> {
        match self {
            Self::Pulling => Some("Pulling…"),
            Self::Pushing => Some("Pushing…"),
            Self::Initializing | Self::Idle => None,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class of a sync failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    /// No credentials or target repository. Sync is disabled until reconfigured.
    AuthRequired,
    /// Transient transport failure. Retried on the next trigger.
    Network,
    /// The remote refused the operation. Not retried automatically.
    RemoteRejected,
}

impl SyncErrorKind {
    /// Returns the kind name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthRequired => "auth_required",
            Self::Network => "network",
            Self::RemoteRejected => "remote_rejected",
        }
    }

    /// Whether the next online/foreground trigger should retry.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Network)
    }
}

impl fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last sync failure, as surfaced in the error banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncError {
    /// Failure class.
    pub kind: SyncErrorKind,
    /// Message from the gateway, verbatim.
    pub message: String,
}

impl SyncError {
    /// Creates a sync error.
    #[must_use]
    pub fn new(kind: SyncErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Read-only status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Current coordinator state.
    pub state: SyncState,
    /// Last error, cleared by the next successful cycle.
    pub error: Option<SyncError>,
    /// Ids pending upsert or delete.
    pub pending_changes: usize,
    /// Marker returned by the last successful push.
    pub last_version: Option<VersionToken>,
}

impl SyncStatus {
    /// Pluralised pending-change summary, `None` when nothing is pending.
    #[must_use]
    pub fn pending_summary(&self) -> Option<String> {
        match self.pending_changes {
            0 => None,
            1 => Some("1 unpushed change".to_string()),
            n => Some(format!("{n} unpushed changes")),
        }
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Initializing,
            error: None,
            pending_changes: 0,
            last_version: None,
        }
    }
}
