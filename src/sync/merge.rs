//! Pull merge.
//!
//! Remote wins, except for ids with a pending local change, which keep their
//! optimistic local copy. Right after a push, ids that push wrote are also
//! protected from a read that does not reflect it yet (see [`PushShield`]).

use super::ChangeLedger;
use crate::gateway::{CommitBatch, RemoteSnapshot};
use crate::models::{Note, NoteId, NoteSet, PullStats, VersionToken};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What the last successful push wrote, keyed by id (`None` = deleted).
///
/// A snapshot carrying the push's version marker is known to include it.
/// Otherwise, ids whose remote state differs from what was written are
/// treated as stale for the next pull only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushShield {
    version: VersionToken,
    written: BTreeMap<NoteId, Option<String>>,
}

impl PushShield {
    /// Records the effect of a committed batch.
    #[must_use]
    pub fn new(version: VersionToken, batch: &CommitBatch) -> Self {
        let mut written: BTreeMap<NoteId, Option<String>> = batch
            .upserts
            .iter()
            .map(|(id, body)| (id.clone(), Some(body.clone())))
            .collect();
        written.extend(batch.deletes.iter().map(|id| (id.clone(), None)));
        Self { version, written }
    }

    /// Marker returned by the push.
    #[must_use]
    pub const fn version(&self) -> &VersionToken {
        &self.version
    }

    /// Ids whose state in `snapshot` does not match what the push wrote.
    #[must_use]
    pub fn stale_ids(&self, snapshot: &RemoteSnapshot) -> BTreeSet<NoteId> {
        if snapshot.version.as_ref() == Some(&self.version) {
            return BTreeSet::new();
        }
        self.written
            .iter()
            .filter(|(id, written)| {
                let remote = snapshot.notes.get(*id).map(|note| &note.body);
                remote != written.as_ref()
            })
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Merges a fetched snapshot into the local note set.
pub fn merge_pull(
    notes: &mut NoteSet,
    ledger: &ChangeLedger,
    snapshot: RemoteSnapshot,
    shield: Option<&PushShield>,
) -> PullStats {
    let stale = shield.map(|s| s.stale_ids(&snapshot)).unwrap_or_default();
    let protected = |id: &NoteId| ledger.contains(id) || stale.contains(id);
    let mut stats = PullStats::default();

    // Deleted elsewhere.
    let missing: Vec<NoteId> = notes
        .ids()
        .filter(|id| !snapshot.notes.contains_key(*id))
        .cloned()
        .collect();
    for id in missing {
        if protected(&id) {
            stats.kept_local += 1;
        } else {
            notes.remove(&id);
            stats.removed += 1;
        }
    }

    for (id, remote) in snapshot.notes {
        let local_body = notes.body(&id);
        if protected(&id) {
            if local_body != Some(remote.body.as_str()) {
                stats.kept_local += 1;
            }
            continue;
        }
        match local_body {
            None => stats.added += 1,
            Some(body) if body != remote.body => stats.updated += 1,
            Some(_) => {},
        }
        notes.insert(Note {
            id,
            body: remote.body,
            version: Some(remote.version),
        });
    }

    stats
}
