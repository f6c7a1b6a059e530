//! End-to-end coordinator scenarios against the in-memory gateway.
//!
//! Covers the merge rules (pending local changes beat the remote), failure
//! handling (the ledger survives every failed push), request coalescing while
//! an operation is in flight, the push debounce and the auth gate.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use async_trait::async_trait;
use lumen::cache::{MemoryCache, NoteCache};
use lumen::{
    CommitBatch, CoordinatorConfig, CoordinatorHandle, GatewayError, MemoryGateway, NoteId,
    RemoteGateway, RemoteSnapshot, RepoTarget, SyncCoordinator, SyncErrorKind, SyncEvent,
    SyncState, Trigger, VersionToken,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn id(s: &str) -> NoteId {
    NoteId::new(s)
}

fn repo() -> Option<RepoTarget> {
    Some(RepoTarget::new("octo", "notes"))
}

/// Debounce long enough that only explicit saves push.
fn manual_push() -> CoordinatorConfig {
    CoordinatorConfig {
        push_debounce: Duration::from_secs(3600),
        ..CoordinatorConfig::default()
    }
}

fn spawn(gateway: &MemoryGateway) -> CoordinatorHandle {
    SyncCoordinator::new(Arc::new(gateway.clone()))
        .with_repository(repo())
        .with_config(manual_push())
        .spawn()
}

async fn body(handle: &CoordinatorHandle, note: &str) -> Option<String> {
    handle.note(&id(note)).await.unwrap().map(|n| n.body)
}

// ============================================================================
// Startup
// ============================================================================

#[tokio::test]
async fn test_startup_pulls_remote_notes() {
    let gateway = MemoryGateway::with_notes([("a", "alpha"), ("dir/b", "beta")]);
    let handle = spawn(&gateway);

    let status = handle.idle().await.unwrap();
    assert_eq!(status.state, SyncState::Idle);
    assert_eq!(status.error, None);
    assert_eq!(gateway.fetch_calls(), 1);

    let notes = handle.notes().await.unwrap();
    assert_eq!(notes.len(), 2);
    assert_eq!(body(&handle, "dir/b").await.as_deref(), Some("beta"));
}

#[tokio::test]
async fn test_startup_without_pull() {
    let gateway = MemoryGateway::with_notes([("a", "alpha")]);
    let handle = SyncCoordinator::new(Arc::new(gateway.clone()))
        .with_repository(repo())
        .with_config(CoordinatorConfig {
            pull_on_start: false,
            ..manual_push()
        })
        .spawn();

    handle.idle().await.unwrap();
    assert_eq!(gateway.fetch_calls(), 0);
    assert!(handle.notes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cached_edits_are_flushed_on_next_start() {
    let gateway = MemoryGateway::new();
    let cache = MemoryCache::new();

    let first = SyncCoordinator::new(Arc::new(gateway.clone()))
        .with_cache(Arc::new(cache.clone()))
        .with_config(manual_push())
        .spawn();
    first.idle().await.unwrap();
    first.upsert_note(id("draft"), "offline edit").unwrap();
    first.shutdown().await.unwrap();
    assert_eq!(gateway.commit_calls(), 0);

    let session = cache.session().expect("session cached");
    assert!(session.ledger.is_pending_upsert(&id("draft")));

    let second = SyncCoordinator::new(Arc::new(gateway.clone()))
        .with_cache(Arc::new(cache.clone()))
        .with_repository(repo())
        .with_config(manual_push())
        .spawn();
    let status = second.idle().await.unwrap();

    assert_eq!(status.pending_changes, 0);
    assert_eq!(gateway.body(&id("draft")).as_deref(), Some("offline edit"));
    assert_eq!(body(&second, "draft").await.as_deref(), Some("offline edit"));
}

// ============================================================================
// Merge rules
// ============================================================================

#[tokio::test]
async fn test_new_note_is_pending_until_pushed() {
    let gateway = MemoryGateway::new();
    let handle = spawn(&gateway);
    handle.idle().await.unwrap();

    handle.upsert_note(id("a"), "hello").unwrap();
    let ledger = handle.ledger().await.unwrap();
    assert!(ledger.is_pending_upsert(&id("a")));
    assert_eq!(ledger.size(), 1);

    handle.save().unwrap();
    handle.idle().await.unwrap();
    assert!(handle.ledger().await.unwrap().is_empty());
    let notes = handle.notes().await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes.body(&id("a")), Some("hello"));
}

#[tokio::test]
async fn test_unpushed_edit_survives_pull() {
    let gateway = MemoryGateway::with_notes([("a", "x")]);
    let handle = spawn(&gateway);
    handle.idle().await.unwrap();

    handle.upsert_note(id("a"), "y").unwrap();
    gateway.put_remote("a", "z");
    handle.request_pull().unwrap();
    let status = handle.idle().await.unwrap();

    assert_eq!(body(&handle, "a").await.as_deref(), Some("y"));
    assert!(handle.ledger().await.unwrap().is_pending_upsert(&id("a")));
    assert_eq!(status.pending_changes, 1);
    assert_eq!(gateway.fetch_calls(), 2);
    assert_eq!(gateway.commit_calls(), 0);
}

#[tokio::test]
async fn test_push_then_pull_sees_pushed_body() {
    let gateway = MemoryGateway::with_notes([("a", "x")]);
    let handle = spawn(&gateway);
    handle.idle().await.unwrap();

    handle.upsert_note(id("a"), "y").unwrap();
    handle.save().unwrap();
    let status = handle.idle().await.unwrap();

    assert_eq!(gateway.body(&id("a")).as_deref(), Some("y"));
    assert_eq!(status.pending_changes, 0);
    assert_eq!(status.last_version, Some(gateway.version()));

    handle.request_pull().unwrap();
    handle.idle().await.unwrap();
    assert_eq!(body(&handle, "a").await.as_deref(), Some("y"));
}

#[tokio::test]
async fn test_remote_changes_apply_when_nothing_pending() {
    let gateway = MemoryGateway::with_notes([("a", "x"), ("b", "bee")]);
    let handle = spawn(&gateway);
    handle.idle().await.unwrap();

    gateway.put_remote("a", "edited elsewhere");
    gateway.put_remote("c", "new elsewhere");
    gateway.remove_remote(&id("b"));
    handle.notify(Trigger::AppForegrounded).unwrap();
    handle.idle().await.unwrap();

    assert_eq!(body(&handle, "a").await.as_deref(), Some("edited elsewhere"));
    assert_eq!(body(&handle, "c").await.as_deref(), Some("new elsewhere"));
    assert_eq!(body(&handle, "b").await, None);
}

#[tokio::test]
async fn test_unchanged_body_is_not_recorded() {
    let gateway = MemoryGateway::with_notes([("a", "x")]);
    let handle = spawn(&gateway);
    handle.idle().await.unwrap();

    handle.upsert_note(id("a"), "x").unwrap();
    assert_eq!(handle.pending_changes().await.unwrap(), 0);
}

#[tokio::test]
async fn test_propagation_lag_does_not_revert_push() {
    let gateway = MemoryGateway::with_notes([("a", "old")]);
    let handle = spawn(&gateway);
    handle.idle().await.unwrap();

    gateway.start_lagging();
    handle.upsert_note(id("a"), "new").unwrap();
    handle.save().unwrap();
    handle.idle().await.unwrap();

    // Reads still return the pre-push state.
    handle.request_pull().unwrap();
    handle.idle().await.unwrap();
    assert_eq!(body(&handle, "a").await.as_deref(), Some("new"));

    gateway.stop_lagging();
    handle.request_pull().unwrap();
    handle.idle().await.unwrap();
    assert_eq!(body(&handle, "a").await.as_deref(), Some("new"));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_offline_delete_is_retried_on_reconnect() {
    let gateway = MemoryGateway::with_notes([("a", "x")]);
    let handle = spawn(&gateway);
    handle.idle().await.unwrap();

    gateway.fail_next_commit(GatewayError::Network("offline".into()));
    handle.delete_note(id("a")).unwrap();
    handle.save().unwrap();
    let status = handle.idle().await.unwrap();

    let error = status.error.expect("push failure surfaced");
    assert_eq!(error.kind, SyncErrorKind::Network);
    assert_eq!(error.message, "offline");
    assert!(handle.ledger().await.unwrap().is_pending_delete(&id("a")));

    // The remote still has `a`; the pending delete keeps it gone locally.
    handle.request_pull().unwrap();
    handle.idle().await.unwrap();
    assert_eq!(body(&handle, "a").await, None);

    handle.notify(Trigger::ConnectivityRestored).unwrap();
    let status = handle.idle().await.unwrap();
    assert_eq!(status.error, None);
    assert_eq!(status.pending_changes, 0);
    assert_eq!(gateway.body(&id("a")), None);
}

#[tokio::test]
async fn test_retry_carries_failed_batch_and_new_edits() {
    let gateway = MemoryGateway::new();
    let handle = spawn(&gateway);
    handle.idle().await.unwrap();

    gateway.fail_next_commit(GatewayError::Network("timeout".into()));
    handle.upsert_note(id("a"), "first").unwrap();
    handle.save().unwrap();
    let status = handle.idle().await.unwrap();
    assert_eq!(status.error.map(|e| e.kind), Some(SyncErrorKind::Network));
    assert!(gateway.commits().is_empty());

    handle.upsert_note(id("b"), "second").unwrap();
    handle.request_push().unwrap();
    let status = handle.idle().await.unwrap();

    assert_eq!(status.error, None);
    assert_eq!(status.pending_changes, 0);
    let commits = gateway.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].upserts.len(), 2);
}

#[tokio::test]
async fn test_failed_pull_keeps_notes() {
    let gateway = MemoryGateway::with_notes([("a", "x")]);
    let handle = spawn(&gateway);
    handle.idle().await.unwrap();

    gateway.fail_next_fetch(GatewayError::Network("dns".into()));
    handle.request_pull().unwrap();
    let status = handle.idle().await.unwrap();

    assert_eq!(status.error.map(|e| e.kind), Some(SyncErrorKind::Network));
    assert_eq!(body(&handle, "a").await.as_deref(), Some("x"));
}

#[tokio::test]
async fn test_rejected_push_stays_surfaced_until_push_succeeds() {
    let gateway = MemoryGateway::new();
    let handle = spawn(&gateway);
    handle.idle().await.unwrap();

    gateway.fail_next_commit(GatewayError::Rejected("protected branch".into()));
    handle.upsert_note(id("a"), "x").unwrap();
    handle.save().unwrap();
    let status = handle.idle().await.unwrap();
    assert_eq!(
        status.error.map(|e| e.kind),
        Some(SyncErrorKind::RemoteRejected)
    );
    assert_eq!(status.pending_changes, 1);

    handle.request_pull().unwrap();
    let status = handle.idle().await.unwrap();
    assert!(status.error.is_some());

    handle.request_push().unwrap();
    let status = handle.idle().await.unwrap();
    assert_eq!(status.error, None);
    assert_eq!(gateway.body(&id("a")).as_deref(), Some("x"));
}

#[tokio::test]
async fn test_failed_push_does_not_override_later_delete() {
    let gateway = MemoryGateway::new();
    let handle = spawn(&gateway);
    handle.idle().await.unwrap();

    handle.upsert_note(id("a"), "v1").unwrap();
    gateway.fail_next_commit(GatewayError::Network("reset".into()));
    let guard = gateway.hold().await;
    handle.save().unwrap();
    handle.delete_note(id("a")).unwrap();
    drop(guard);
    handle.idle().await.unwrap();

    let ledger = handle.ledger().await.unwrap();
    assert!(ledger.is_pending_delete(&id("a")));
    assert!(!ledger.is_pending_upsert(&id("a")));
}

// ============================================================================
// In-flight behavior
// ============================================================================

#[tokio::test]
async fn test_requests_coalesce_while_in_flight() {
    let gateway = MemoryGateway::with_notes([("a", "x")]);
    let handle = spawn(&gateway);
    handle.idle().await.unwrap();

    let guard = gateway.hold().await;
    handle.request_pull().unwrap();
    handle.upsert_note(id("a"), "local").unwrap();
    for _ in 0..3 {
        handle.request_pull().unwrap();
        handle.request_push().unwrap();
    }
    assert_eq!(handle.status().await.unwrap().state, SyncState::Pulling);
    // Edits apply while the pull is in flight.
    assert_eq!(body(&handle, "a").await.as_deref(), Some("local"));

    drop(guard);
    let status = handle.idle().await.unwrap();

    // Startup pull, the held pull, one coalesced pull.
    assert_eq!(gateway.fetch_calls(), 3);
    assert_eq!(gateway.commit_calls(), 1);
    assert_eq!(status.pending_changes, 0);
    assert_eq!(gateway.body(&id("a")).as_deref(), Some("local"));
}

#[tokio::test]
async fn test_edit_during_push_stays_pending() {
    let gateway = MemoryGateway::new();
    let handle = spawn(&gateway);
    handle.idle().await.unwrap();

    handle.upsert_note(id("a"), "v1").unwrap();
    let guard = gateway.hold().await;
    handle.save().unwrap();
    handle.upsert_note(id("a"), "v2").unwrap();
    assert_eq!(handle.status().await.unwrap().state, SyncState::Pushing);
    drop(guard);
    let status = handle.idle().await.unwrap();

    assert_eq!(gateway.body(&id("a")).as_deref(), Some("v1"));
    assert_eq!(status.pending_changes, 1);
    assert_eq!(body(&handle, "a").await.as_deref(), Some("v2"));

    handle.save().unwrap();
    handle.idle().await.unwrap();
    assert_eq!(gateway.body(&id("a")).as_deref(), Some("v2"));
}

#[tokio::test]
async fn test_cache_keeps_in_flight_edits_pending() {
    let gateway = MemoryGateway::with_notes([("a", "remote")]);
    let cache = MemoryCache::new();
    let handle = SyncCoordinator::new(Arc::new(gateway.clone()))
        .with_cache(Arc::new(cache.clone()))
        .with_repository(repo())
        .with_config(manual_push())
        .spawn();
    handle.idle().await.unwrap();

    handle.upsert_note(id("a"), "local edit").unwrap();
    let guard = gateway.hold().await;
    handle.save().unwrap();
    handle.upsert_note(id("b"), "during push").unwrap();
    assert_eq!(handle.status().await.unwrap().state, SyncState::Pushing);

    let snapshot = cache.session().expect("session cached");
    assert!(snapshot.ledger.is_pending_upsert(&id("a")));
    assert!(snapshot.ledger.is_pending_upsert(&id("b")));

    // A crash now leaves only the snapshot; the next session must not let
    // the remote copy replace the unconfirmed edit.
    let restarted_cache = MemoryCache::new();
    restarted_cache.store(&snapshot).unwrap();
    let remote = MemoryGateway::with_notes([("a", "remote")]);
    let restarted = SyncCoordinator::new(Arc::new(remote.clone()))
        .with_cache(Arc::new(restarted_cache))
        .with_repository(repo())
        .with_config(manual_push())
        .spawn();
    restarted.idle().await.unwrap();
    assert_eq!(body(&restarted, "a").await.as_deref(), Some("local edit"));
    assert_eq!(remote.body(&id("a")).as_deref(), Some("local edit"));
    assert_eq!(remote.body(&id("b")).as_deref(), Some("during push"));

    drop(guard);
    handle.idle().await.unwrap();
    let settled = cache.session().expect("session cached");
    assert!(!settled.ledger.is_pending_upsert(&id("a")));
    assert!(settled.ledger.is_pending_upsert(&id("b")));
}

/// Panics on the first commit, then behaves like the wrapped store.
struct PanicsOnce {
    inner: MemoryGateway,
    armed: AtomicBool,
}

#[async_trait]
impl RemoteGateway for PanicsOnce {
    async fn fetch_all(&self) -> Result<RemoteSnapshot, GatewayError> {
        self.inner.fetch_all().await
    }

    async fn commit_batch(&self, batch: CommitBatch) -> Result<VersionToken, GatewayError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            panic!("store client crashed");
        }
        self.inner.commit_batch(batch).await
    }
}

#[tokio::test]
async fn test_panicking_gateway_is_reported_as_failure() {
    let inner = MemoryGateway::new();
    let handle = SyncCoordinator::new(Arc::new(PanicsOnce {
        inner: inner.clone(),
        armed: AtomicBool::new(true),
    }))
    .with_repository(repo())
    .with_config(manual_push())
    .spawn();
    handle.idle().await.unwrap();

    handle.upsert_note(id("a"), "kept").unwrap();
    handle.save().unwrap();
    let status = handle.idle().await.unwrap();
    assert_eq!(status.state, SyncState::Idle);
    assert_eq!(status.error.map(|e| e.kind), Some(SyncErrorKind::Network));
    assert_eq!(status.pending_changes, 1);

    handle.save().unwrap();
    let status = handle.idle().await.unwrap();
    assert_eq!(status.error, None);
    assert_eq!(status.pending_changes, 0);
    assert_eq!(inner.body(&id("a")).as_deref(), Some("kept"));
}

#[tokio::test]
async fn test_push_with_empty_ledger_is_ignored() {
    let gateway = MemoryGateway::new();
    let handle = spawn(&gateway);
    handle.idle().await.unwrap();

    handle.request_push().unwrap();
    handle.save().unwrap();
    let status = handle.idle().await.unwrap();
    assert_eq!(status.state, SyncState::Idle);
    assert_eq!(gateway.commit_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_edits_push_after_quiet_interval() {
    let gateway = MemoryGateway::new();
    let handle = SyncCoordinator::new(Arc::new(gateway.clone()))
        .with_repository(repo())
        .with_config(CoordinatorConfig {
            push_debounce: Duration::from_millis(1500),
            ..CoordinatorConfig::default()
        })
        .spawn();
    handle.idle().await.unwrap();

    handle.upsert_note(id("a"), "1").unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    handle.upsert_note(id("a"), "12").unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(gateway.commit_calls(), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    handle.idle().await.unwrap();
    let commits = gateway.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].upserts[&id("a")], "12");
}

// ============================================================================
// Auth
// ============================================================================

#[tokio::test]
async fn test_missing_repository_requires_auth() {
    let gateway = MemoryGateway::new();
    let handle = SyncCoordinator::new(Arc::new(gateway.clone()))
        .with_config(manual_push())
        .spawn();

    let status = handle.idle().await.unwrap();
    assert_eq!(
        status.error.map(|e| e.kind),
        Some(SyncErrorKind::AuthRequired)
    );

    handle.upsert_note(id("a"), "local only").unwrap();
    handle.save().unwrap();
    handle.request_pull().unwrap();
    let status = handle.idle().await.unwrap();
    assert_eq!(gateway.fetch_calls(), 0);
    assert_eq!(gateway.commit_calls(), 0);
    assert_eq!(status.pending_changes, 1);

    handle.set_repository(repo()).unwrap();
    let status = handle.idle().await.unwrap();
    assert_eq!(status.error, None);
    assert_eq!(status.pending_changes, 0);
    assert_eq!(gateway.body(&id("a")).as_deref(), Some("local only"));
}

#[tokio::test]
async fn test_rejected_credentials_block_sync_until_reconfigured() {
    let gateway = MemoryGateway::new();
    gateway.fail_next_fetch(GatewayError::AuthRequired("bad token".into()));
    let handle = spawn(&gateway);

    let status = handle.idle().await.unwrap();
    let error = status.error.expect("auth failure surfaced");
    assert_eq!(error.kind, SyncErrorKind::AuthRequired);
    assert_eq!(error.message, "bad token");

    handle.request_pull().unwrap();
    handle.idle().await.unwrap();
    assert_eq!(gateway.fetch_calls(), 1);

    handle.set_repository(repo()).unwrap();
    let status = handle.idle().await.unwrap();
    assert_eq!(gateway.fetch_calls(), 2);
    assert_eq!(status.error, None);
}

// ============================================================================
// Events and lifecycle
// ============================================================================

#[tokio::test]
async fn test_events_report_state_and_changes() {
    let gateway = MemoryGateway::with_notes([("a", "x")]);
    let handle = spawn(&gateway);
    handle.idle().await.unwrap();
    let mut events = handle.subscribe();

    handle.upsert_note(id("b"), "bee").unwrap();
    handle.save().unwrap();
    handle.idle().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let types: Vec<&str> = seen.iter().map(SyncEvent::event_type).collect();
    assert_eq!(types.first(), Some(&"notes_changed"));
    assert!(types.contains(&"pushed"));
    assert!(seen.iter().any(|event| matches!(
        event,
        SyncEvent::StateChanged {
            to: SyncState::Pushing,
            ..
        }
    )));
}

#[tokio::test]
async fn test_invalid_note_ids_are_rejected() {
    let gateway = MemoryGateway::new();
    let handle = spawn(&gateway);
    handle.idle().await.unwrap();

    for bad in ["todo.md", " a", "../x"] {
        assert!(matches!(
            handle.upsert_note(NoteId::new(bad), "buy milk"),
            Err(lumen::Error::InvalidInput(_))
        ));
        assert!(matches!(
            handle.delete_note(NoteId::new(bad)),
            Err(lumen::Error::InvalidInput(_))
        ));
    }
    assert_eq!(handle.pending_changes().await.unwrap(), 0);
    assert!(handle.notes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_handle() {
    let gateway = MemoryGateway::new();
    let handle = spawn(&gateway);
    handle.idle().await.unwrap();
    handle.shutdown().await.unwrap();

    assert!(matches!(
        handle.request_pull(),
        Err(lumen::Error::CoordinatorStopped)
    ));
    assert!(handle.status().await.is_err());
}
