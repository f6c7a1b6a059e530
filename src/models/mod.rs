//! Data models for notes and sync state.

mod events;
mod note;
mod repo;
mod status;

pub use events::{EventMeta, PullStats, PushStats, SyncEvent};
pub use note::{Note, NoteId, NoteSet, VersionToken, content_hash};
pub use repo::{DEFAULT_BRANCH, RepoTarget};
pub use status::{SyncError, SyncErrorKind, SyncState, SyncStatus};
