//! Trigger sources and push debouncing.

use super::Operation;
use std::time::Duration;
use tokio::time::Instant;

/// Default quiet interval before an autosave push.
pub const DEFAULT_PUSH_DEBOUNCE: Duration = Duration::from_millis(1500);

/// Environment signals that should make the coordinator sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// The device came back online.
    ConnectivityRestored,
    /// The app returned to the foreground.
    AppForegrounded,
}

impl Trigger {
    /// Coordinator requests raised by this trigger, in order.
    #[must_use]
    pub const fn requests(self) -> &'static [Operation] {
        match self {
            Self::ConnectivityRestored => &[Operation::Pull, Operation::Push],
            Self::AppForegrounded => &[Operation::Pull],
        }
    }

    /// Returns the trigger name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectivityRestored => "connectivity_restored",
            Self::AppForegrounded => "app_foregrounded",
        }
    }
}

/// Coalesces bursts of local edits into one push after a quiet interval.
#[derive(Debug, Clone)]
pub struct PushDebounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl PushDebounce {
    /// Creates a debouncer with the given quiet interval.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Quiet interval.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Restarts the quiet interval after an edit.
    pub fn touch(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    /// Pending deadline, if an edit is waiting to be pushed.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true (once) if the deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            },
            _ => false,
        }
    }

    /// Drops the pending deadline (explicit save).
    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

impl Default for PushDebounce {
    fn default() -> Self {
        Self::new(DEFAULT_PUSH_DEBOUNCE)
    }
}
