//! Transition table of the sync coordinator.
//!
//! ```text
//!                 request_pull        request_push (ledger non-empty)
//! initializing    queue               queue
//! idle            -> pulling          -> pushing
//! pulling         queue (coalesced)   queue (coalesced)
//! pushing         queue (coalesced)   queue (coalesced)
//! ```
//!
//! Pull and push never run at the same time. Repeated requests while an
//! operation is in flight collapse into at most one follow-up of each kind,
//! started when the current operation settles: a queued push runs before a
//! queued pull, and a queued push is dropped if the ledger is empty by then.
//! Push requests against an empty ledger are ignored in every state.

use crate::models::SyncState;

/// Network operation the coordinator must start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Fetch and merge the remote note set.
    Pull,
    /// Drain the ledger and commit it.
    Push,
}

impl Operation {
    /// State the machine is in while the operation runs.
    #[must_use]
    pub const fn state(self) -> SyncState {
        match self {
            Self::Pull => SyncState::Pulling,
            Self::Push => SyncState::Pushing,
        }
    }

    /// Metric/log label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Push => "push",
        }
    }
}

/// State plus the queued follow-ups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMachine {
    state: SyncState,
    pull_queued: bool,
    push_queued: bool,
}

impl Default for SyncMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMachine {
    /// Starts in [`SyncState::Initializing`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SyncState::Initializing,
            pull_queued: false,
            push_queued: false,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SyncState {
        self.state
    }

    /// Returns true if a follow-up pull or push is waiting.
    #[must_use]
    pub const fn has_queued(&self) -> bool {
        self.pull_queued || self.push_queued
    }

    /// Returns true when idle with nothing queued.
    #[must_use]
    pub const fn is_quiescent(&self) -> bool {
        matches!(self.state, SyncState::Idle) && !self.has_queued()
    }

    /// Handles `PULL_NOTES`.
    pub fn request_pull(&mut self) -> Option<Operation> {
        match self.state {
            SyncState::Idle => self.start(Operation::Pull),
            SyncState::Initializing | SyncState::Pulling | SyncState::Pushing => {
                self.pull_queued = true;
                None
            },
        }
    }

    /// Handles `PUSH_NOTES`.
    pub fn request_push(&mut self, ledger_empty: bool) -> Option<Operation> {
        if ledger_empty {
            return None;
        }
        match self.state {
            SyncState::Idle => self.start(Operation::Push),
            SyncState::Initializing | SyncState::Pulling | SyncState::Pushing => {
                self.push_queued = true;
                None
            },
        }
    }

    /// Leaves `initializing`, starting whatever was requested meanwhile.
    pub fn finish_initializing(&mut self, ledger_empty: bool) -> Option<Operation> {
        if self.state != SyncState::Initializing {
            return None;
        }
        self.state = SyncState::Idle;
        self.next_queued(ledger_empty)
    }

    /// The in-flight operation settled (success or failure).
    pub fn settle(&mut self, ledger_empty: bool) -> Option<Operation> {
        if !self.state.is_syncing() {
            return None;
        }
        self.state = SyncState::Idle;
        self.next_queued(ledger_empty)
    }

    /// Drops queued follow-ups, e.g. when sync becomes unauthorised.
    pub fn clear_queued(&mut self) {
        self.pull_queued = false;
        self.push_queued = false;
    }

    fn next_queued(&mut self, ledger_empty: bool) -> Option<Operation> {
        if std::mem::take(&mut self.push_queued) && !ledger_empty {
            return self.start(Operation::Push);
        }
        if std::mem::take(&mut self.pull_queued) {
            return self.start(Operation::Pull);
        }
        None
    }

    fn start(&mut self, operation: Operation) -> Option<Operation> {
        self.state = operation.state();
        Some(operation)
    }
}
