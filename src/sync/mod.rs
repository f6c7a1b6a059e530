//! Note synchronization.
//!
//! - [`ChangeLedger`]: ids with unsynced local changes
//! - [`SyncMachine`]: coordinator states and request coalescing
//! - [`merge_pull`]: folds a remote snapshot into the local note set
//! - [`PushDebounce`] and [`Trigger`]: when syncs happen
//! - [`SyncCoordinator`]: the actor tying them to a [`RemoteGateway`](crate::gateway::RemoteGateway)

mod coordinator;
mod ledger;
mod machine;
mod merge;
mod trigger;

pub use coordinator::{CoordinatorConfig, CoordinatorHandle, SyncCoordinator};
pub use ledger::ChangeLedger;
pub use machine::{Operation, SyncMachine};
pub use merge::{PushShield, merge_pull};
pub use trigger::{DEFAULT_PUSH_DEBOUNCE, PushDebounce, Trigger};
