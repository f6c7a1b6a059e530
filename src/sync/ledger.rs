//! Change ledger: local mutations not yet confirmed by the remote.
//!
//! Two disjoint id sets. The most recent intent for an id wins: recording a
//! delete drops a pending upsert for the same id and vice versa.

use crate::models::NoteId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Pending upserts and deletes, keyed by note id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLedger {
    #[serde(default)]
    upsert: BTreeSet<NoteId>,
    #[serde(default)]
    delete: BTreeSet<NoteId>,
}

impl ChangeLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `id` was created or edited locally.
    pub fn record_upsert(&mut self, id: NoteId) {
        self.delete.remove(&id);
        self.upsert.insert(id);
    }

    /// Records that `id` was deleted locally.
    pub fn record_delete(&mut self, id: NoteId) {
        self.upsert.remove(&id);
        self.delete.insert(id);
    }

    /// Takes every pending entry, leaving the ledger empty.
    ///
    /// Callers must hand the result back to [`Self::restore`] if the push it
    /// was drained for fails.
    #[must_use]
    pub fn drain(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Merges a drained snapshot back after a failed push.
    ///
    /// Entries recorded since the drain are newer intent and win over the
    /// snapshot for the same id.
    pub fn restore(&mut self, drained: Self) {
        for id in drained.upsert {
            if !self.contains(&id) {
                self.upsert.insert(id);
            }
        }
        for id in drained.delete {
            if !self.contains(&id) {
                self.delete.insert(id);
            }
        }
    }

    /// Number of pending ids.
    #[must_use]
    pub fn size(&self) -> usize {
        self.upsert.len() + self.delete.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upsert.is_empty() && self.delete.is_empty()
    }

    /// Returns true if `id` has any pending change.
    #[must_use]
    pub fn contains(&self, id: &NoteId) -> bool {
        self.upsert.contains(id) || self.delete.contains(id)
    }

    /// Returns true if `id` is pending an upsert.
    #[must_use]
    pub fn is_pending_upsert(&self, id: &NoteId) -> bool {
        self.upsert.contains(id)
    }

    /// Returns true if `id` is pending a delete.
    #[must_use]
    pub fn is_pending_delete(&self, id: &NoteId) -> bool {
        self.delete.contains(id)
    }

    /// Ids pending an upsert.
    #[must_use]
    pub const fn upserts(&self) -> &BTreeSet<NoteId> {
        &self.upsert
    }

    /// Ids pending a delete.
    #[must_use]
    pub const fn deletes(&self) -> &BTreeSet<NoteId> {
        &self.delete
    }
}
