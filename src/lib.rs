//! # Lumen
//!
//! Sync core for a notebook whose notes live as Markdown files in a git
//! repository.
//!
//! Edits apply locally at once and are pushed in debounced batches; pulls
//! merge the remote note set without clobbering changes that have not been
//! pushed yet. Connectivity and visibility changes trigger syncs, and every
//! failure is surfaced as a status instead of an error at the call site.
//!
//! ## Layout
//!
//! - [`models`]: notes, repository target, status and events
//! - [`gateway`]: the [`RemoteGateway`] trait and its implementations
//! - [`sync`]: change ledger, state machine, merge and the coordinator actor
//! - [`cache`]: local persistence between sessions
//! - [`config`] and [`observability`]: process setup
//!
//! ## Example
//!
//! ```rust,ignore
//! use lumen::{MemoryGateway, NoteId, RepoTarget, SyncCoordinator};
//! use std::sync::Arc;
//!
//! let handle = SyncCoordinator::new(Arc::new(MemoryGateway::new()))
//!     .with_repository(Some(RepoTarget::parse("octo/notes")?))
//!     .spawn();
//! handle.upsert_note(NoteId::parse("journal/today")?, "# Today")?;
//! handle.save()?;
//! let status = handle.idle().await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// Duplicate transitive versions come from git2's vendored dependencies.
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod cache;
pub mod config;
pub mod gateway;
pub mod models;
pub mod observability;
pub mod sync;

pub use cache::{CachedSession, JsonFileCache, MemoryCache, NoteCache};
pub use config::LumenConfig;
pub use gateway::{
    CommitBatch, GatewayError, GitGateway, MemoryGateway, RemoteGateway, RemoteNote,
    RemoteSnapshot, WithTimeout,
};
pub use models::{
    Note, NoteId, NoteSet, RepoTarget, SyncError, SyncErrorKind, SyncEvent, SyncState, SyncStatus,
    VersionToken,
};
pub use sync::{ChangeLedger, CoordinatorConfig, CoordinatorHandle, SyncCoordinator, Trigger};

/// Error type for lumen operations.
///
/// Sync failures never surface here; they are reported through
/// [`SyncStatus::error`]. This type covers setup, local I/O and a stopped
/// coordinator.
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed note ids, repository names, config values |
/// | `OperationFailed` | Cache, config or log file I/O fails |
/// | `Gateway` | A gateway is called directly, outside the coordinator |
/// | `CoordinatorStopped` | A handle is used after the coordinator exited |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A remote gateway call failed.
    #[error(transparent)]
    Gateway(#[from] gateway::GatewayError),

    /// The coordinator task is no longer running.
    #[error("sync coordinator stopped")]
    CoordinatorStopped,
}

/// Result type alias for lumen operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds, or 0 if the clock is before
/// the epoch.
///
/// ```rust
/// let ts = lumen::current_timestamp();
/// assert!(ts > 0);
/// ```
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
