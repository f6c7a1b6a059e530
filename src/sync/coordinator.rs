//! Sync coordinator actor.
//!
//! One task owns the note set, the change ledger and the state machine.
//! Everything that touches them arrives as a [`Message`] and is handled to
//! completion before the next one, so mutations apply in the order they were
//! issued. Gateway calls run on separate tasks and report back through a
//! second channel. Local edits therefore keep applying while a pull or push
//! is in flight.

use super::{ChangeLedger, Operation, PushDebounce, PushShield, SyncMachine, Trigger, merge_pull};
use crate::cache::{CachedSession, NoteCache};
use crate::gateway::{CommitBatch, GatewayError, RemoteGateway, RemoteSnapshot};
use crate::models::{
    EventMeta, Note, NoteId, NoteSet, PushStats, RepoTarget, SyncError, SyncErrorKind, SyncEvent,
    SyncState, SyncStatus, VersionToken,
};
use crate::observability::EventBus;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Quiet interval after the last edit before an automatic push.
    pub push_debounce: Duration,
    /// Pull once initialization finishes.
    pub pull_on_start: bool,
    /// Event bus buffer size.
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            push_debounce: super::DEFAULT_PUSH_DEBOUNCE,
            pull_on_start: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Requests accepted by the coordinator task.
#[derive(Debug)]
enum Message {
    Upsert { id: NoteId, body: String },
    Delete { id: NoteId },
    Request(Operation),
    Save,
    Trigger(Trigger),
    SetRepository(Option<RepoTarget>),
    Status(oneshot::Sender<SyncStatus>),
    Notes(oneshot::Sender<NoteSet>),
    Ledger(oneshot::Sender<ChangeLedger>),
    WhenIdle(oneshot::Sender<SyncStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Completion of a gateway call.
#[derive(Debug)]
enum Settled {
    Pull {
        result: std::result::Result<RemoteSnapshot, GatewayError>,
        started: Instant,
    },
    Push {
        batch: CommitBatch,
        result: std::result::Result<VersionToken, GatewayError>,
        started: Instant,
    },
}

/// Entry point for building a coordinator.
pub struct SyncCoordinator {
    gateway: Arc<dyn RemoteGateway>,
    cache: Option<Arc<dyn NoteCache>>,
    repository: Option<RepoTarget>,
    config: CoordinatorConfig,
}

impl SyncCoordinator {
    /// Starts building a coordinator over `gateway`.
    #[must_use]
    pub fn new(gateway: Arc<dyn RemoteGateway>) -> Self {
        Self {
            gateway,
            cache: None,
            repository: None,
            config: CoordinatorConfig::default(),
        }
    }

    /// Sets the local cache loaded during initialization.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn NoteCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the target repository. Without one, sync reports `auth_required`.
    #[must_use]
    pub fn with_repository(mut self, repository: Option<RepoTarget>) -> Self {
        self.repository = repository;
        self
    }

    /// Sets tuning options.
    #[must_use]
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawns the coordinator task on the current tokio runtime.
    #[must_use]
    pub fn spawn(self) -> CoordinatorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (settled_tx, settled_rx) = mpsc::unbounded_channel();
        let bus = EventBus::new(self.config.event_capacity);

        let authorized = self.repository.is_some();
        let actor = Actor {
            gateway: self.gateway,
            cache: self.cache,
            repository: self.repository,
            authorized,
            pull_on_start: self.config.pull_on_start,
            notes: NoteSet::new(),
            ledger: ChangeLedger::new(),
            in_flight: None,
            machine: SyncMachine::new(),
            error: None,
            last_version: None,
            shield: None,
            debounce: PushDebounce::new(self.config.push_debounce),
            bus: bus.clone(),
            settled_tx,
            idle_waiters: Vec::new(),
        };
        tokio::spawn(actor.run(rx, settled_rx));

        CoordinatorHandle { tx, bus }
    }
}

/// Cloneable handle used by presentation and trigger sources.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Message>,
    bus: EventBus,
}

impl CoordinatorHandle {
    fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| Error::CoordinatorStopped)
    }

    async fn ask<T>(&self, message: impl FnOnce(oneshot::Sender<T>) -> Message) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.send(message(reply))?;
        response.await.map_err(|_| Error::CoordinatorStopped)
    }

    /// Creates or edits a note. Applied locally at once, pushed after the
    /// debounce interval.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an id that is not a valid note
    /// path, and [`Error::CoordinatorStopped`] after shutdown.
    pub fn upsert_note(&self, id: NoteId, body: impl Into<String>) -> Result<()> {
        self.send(Message::Upsert {
            id: id.validated()?,
            body: body.into(),
        })
    }

    /// Deletes a note locally and records the delete for the next push.
    ///
    /// # Errors
    ///
    /// Same as [`Self::upsert_note`].
    pub fn delete_note(&self, id: NoteId) -> Result<()> {
        self.send(Message::Delete { id: id.validated()? })
    }

    /// `PULL_NOTES`.
    pub fn request_pull(&self) -> Result<()> {
        self.send(Message::Request(Operation::Pull))
    }

    /// `PUSH_NOTES`.
    pub fn request_push(&self) -> Result<()> {
        self.send(Message::Request(Operation::Push))
    }

    /// Explicit save: skips the debounce and pushes now.
    pub fn save(&self) -> Result<()> {
        self.send(Message::Save)
    }

    /// Forwards an environment trigger.
    pub fn notify(&self, trigger: Trigger) -> Result<()> {
        self.send(Message::Trigger(trigger))
    }

    /// Replaces the target repository. `None` disables sync.
    pub fn set_repository(&self, repository: Option<RepoTarget>) -> Result<()> {
        self.send(Message::SetRepository(repository))
    }

    /// Current status.
    pub async fn status(&self) -> Result<SyncStatus> {
        self.ask(Message::Status).await
    }

    /// Copy of the local note set.
    pub async fn notes(&self) -> Result<NoteSet> {
        self.ask(Message::Notes).await
    }

    /// A single note.
    pub async fn note(&self, id: &NoteId) -> Result<Option<Note>> {
        Ok(self.notes().await?.get(id).cloned())
    }

    /// Copy of the change ledger.
    pub async fn ledger(&self) -> Result<ChangeLedger> {
        self.ask(Message::Ledger).await
    }

    /// Number of unsynced changes.
    pub async fn pending_changes(&self) -> Result<usize> {
        Ok(self.status().await?.pending_changes)
    }

    /// Waits until the coordinator is idle with nothing in flight or queued.
    ///
    /// A pending debounced push does not count; call [`Self::save`] first to
    /// include it.
    pub async fn idle(&self) -> Result<SyncStatus> {
        self.ask(Message::WhenIdle).await
    }

    /// Stops the coordinator once the in-flight operation, if any, settles.
    pub async fn shutdown(&self) -> Result<()> {
        self.ask(Message::Shutdown).await
    }

    /// Subscribes to coordinator events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.bus.subscribe()
    }

    /// The coordinator's event bus.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.bus
    }
}

struct Actor {
    gateway: Arc<dyn RemoteGateway>,
    cache: Option<Arc<dyn NoteCache>>,
    repository: Option<RepoTarget>,
    authorized: bool,
    pull_on_start: bool,
    notes: NoteSet,
    ledger: ChangeLedger,
    /// Entries drained into the push that has not settled yet.
    in_flight: Option<ChangeLedger>,
    machine: SyncMachine,
    error: Option<(Operation, SyncError)>,
    last_version: Option<VersionToken>,
    shield: Option<PushShield>,
    debounce: PushDebounce,
    bus: EventBus,
    settled_tx: mpsc::UnboundedSender<Settled>,
    idle_waiters: Vec<oneshot::Sender<SyncStatus>>,
}

/// Runs a gateway call on its own task so a panic surfaces as a failure.
async fn supervised<T, F>(call: F) -> std::result::Result<T, GatewayError>
where
    T: Send + 'static,
    F: Future<Output = std::result::Result<T, GatewayError>> + Send + 'static,
{
    match tokio::spawn(call).await {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, "gateway task aborted");
            Err(GatewayError::Network(format!("gateway task failed: {e}")))
        },
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Message>,
        mut settled_rx: mpsc::UnboundedReceiver<Settled>,
    ) {
        self.initialize();

        let ack = loop {
            let deadline = self.debounce.deadline();
            tokio::select! {
                biased;
                Some(settled) = settled_rx.recv() => self.on_settled(settled),
                message = rx.recv() => match message {
                    Some(Message::Shutdown(ack)) => break Some(ack),
                    Some(message) => self.handle(message),
                    None => break None,
                },
                () = sleep_until(deadline) => {
                    if self.debounce.take_due(Instant::now()) {
                        debug!("edits settled, requesting push");
                        self.request(Operation::Push);
                    }
                },
            }
            self.release_idle_waiters();
        };

        rx.close();
        self.machine.clear_queued();
        if self.machine.state().is_syncing()
            && let Some(settled) = settled_rx.recv().await
        {
            self.on_settled(settled);
        }
        self.persist();
        drop(rx);
        debug!("sync coordinator stopped");
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    fn initialize(&mut self) {
        if let Some(cache) = &self.cache {
            match cache.load() {
                Ok(Some(session)) => {
                    info!(
                        notes = session.notes.len(),
                        pending = session.ledger.size(),
                        "loaded cached notebook"
                    );
                    self.notes = session.notes;
                    self.ledger = session.ledger;
                    self.last_version = session.last_version;
                },
                Ok(None) => debug!("no cached notebook"),
                Err(e) => warn!(error = %e, "ignoring unreadable note cache"),
            }
        }
        self.publish_notes_changed();

        if self.authorized {
            if self.pull_on_start {
                self.machine.request_pull();
            }
            // Flush edits left over from a previous session.
            self.machine.request_push(self.ledger.is_empty());
        } else {
            self.set_error(
                Operation::Pull,
                SyncError::new(SyncErrorKind::AuthRequired, "no repository configured"),
            );
        }

        let next = self.machine.finish_initializing(self.ledger.is_empty());
        self.advance(SyncState::Initializing, next);
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::Upsert { id, body } => self.upsert(id, body),
            Message::Delete { id } => self.delete(&id),
            Message::Request(operation) => self.request(operation),
            Message::Save => {
                self.debounce.cancel();
                self.request(Operation::Push);
            },
            Message::Trigger(trigger) => {
                debug!(trigger = trigger.as_str(), "trigger received");
                for operation in trigger.requests() {
                    self.request(*operation);
                }
            },
            Message::SetRepository(repository) => self.set_repository(repository),
            Message::Status(reply) => {
                let _ = reply.send(self.status());
            },
            Message::Notes(reply) => {
                let _ = reply.send(self.notes.clone());
            },
            Message::Ledger(reply) => {
                let _ = reply.send(self.ledger.clone());
            },
            Message::WhenIdle(reply) => self.idle_waiters.push(reply),
            // Handled by the run loop.
            Message::Shutdown(_) => {},
        }
    }

    fn upsert(&mut self, id: NoteId, body: String) {
        if self.notes.body(&id) == Some(body.as_str()) {
            debug!(note = %id, "body unchanged, skipping save");
            return;
        }
        let version = self.notes.get(&id).and_then(|note| note.version.clone());
        self.notes.insert(Note {
            id: id.clone(),
            body,
            version,
        });
        self.ledger.record_upsert(id);
        self.debounce.touch(Instant::now());
        self.after_local_change();
    }

    fn delete(&mut self, id: &NoteId) {
        if self.notes.remove(id).is_none() {
            debug!(note = %id, "delete of unknown note ignored");
            return;
        }
        self.ledger.record_delete(id.clone());
        self.debounce.touch(Instant::now());
        self.after_local_change();
    }

    fn after_local_change(&mut self) {
        self.publish_notes_changed();
        self.persist();
    }

    fn request(&mut self, operation: Operation) {
        if !self.authorized {
            debug!(operation = operation.as_str(), "sync disabled until a repository is configured");
            return;
        }
        let from = self.machine.state();
        let next = match operation {
            Operation::Pull => self.machine.request_pull(),
            Operation::Push => self.machine.request_push(self.ledger.is_empty()),
        };
        if next.is_none() && from.is_syncing() {
            debug!(operation = operation.as_str(), state = %from, "queued behind in-flight operation");
        }
        self.advance(from, next);
    }

    fn set_repository(&mut self, repository: Option<RepoTarget>) {
        self.repository = repository;
        if let Some(repository) = &self.repository {
            info!(repository = %repository, "repository configured");
            self.authorized = true;
            if matches!(&self.error, Some((_, e)) if e.kind == SyncErrorKind::AuthRequired) {
                self.error = None;
            }
            self.request(Operation::Pull);
            self.request(Operation::Push);
        } else {
            self.block_sync(SyncError::new(
                SyncErrorKind::AuthRequired,
                "no repository configured",
            ));
        }
    }

    fn block_sync(&mut self, error: SyncError) {
        self.authorized = false;
        self.machine.clear_queued();
        self.debounce.cancel();
        self.set_error(Operation::Pull, error);
    }

    /// Publishes the state change and launches `next`, if any.
    fn advance(&mut self, from: SyncState, next: Option<Operation>) {
        let to = self.machine.state();
        if from != to {
            debug!(%from, %to, "state transition");
            self.bus.publish(SyncEvent::StateChanged {
                meta: EventMeta::new(),
                from,
                to,
            });
        }
        match next {
            Some(Operation::Pull) => self.start_pull(),
            Some(Operation::Push) => self.start_push(),
            None => {},
        }
    }

    fn start_pull(&self) {
        let gateway = Arc::clone(&self.gateway);
        let settled = self.settled_tx.clone();
        let started = Instant::now();
        tokio::spawn(async move {
            let result = supervised(async move { gateway.fetch_all().await }).await;
            let _ = settled.send(Settled::Pull { result, started });
        });
    }

    fn start_push(&mut self) {
        let drained = self.ledger.drain();
        let mut batch = CommitBatch::default();
        for id in drained.upserts() {
            if let Some(body) = self.notes.body(id) {
                batch.upserts.insert(id.clone(), body.to_string());
            }
        }
        batch.deletes = drained.deletes().clone();

        if batch.is_empty() {
            self.ledger.restore(drained);
            self.settle();
            return;
        }
        debug!(
            upserts = batch.upserts.len(),
            deletes = batch.deletes.len(),
            "pushing batch"
        );

        self.in_flight = Some(drained);

        let gateway = Arc::clone(&self.gateway);
        let settled = self.settled_tx.clone();
        let started = Instant::now();
        let call = batch.clone();
        tokio::spawn(async move {
            let result = supervised(async move { gateway.commit_batch(call).await }).await;
            let _ = settled.send(Settled::Push {
                batch,
                result,
                started,
            });
        });
    }

    fn on_settled(&mut self, settled: Settled) {
        match settled {
            Settled::Pull { result, started } => {
                record_cycle(Operation::Pull, result.is_ok(), started);
                match result {
                    Ok(snapshot) => self.apply_pull(snapshot),
                    Err(e) => self.fail(Operation::Pull, &e),
                }
            },
            Settled::Push {
                batch,
                result,
                started,
            } => {
                record_cycle(Operation::Push, result.is_ok(), started);
                let drained = self.in_flight.take().unwrap_or_default();
                match result {
                    Ok(version) => self.apply_push(&batch, version),
                    Err(e) => {
                        self.ledger.restore(drained);
                        self.fail(Operation::Push, &e);
                        self.publish_notes_changed();
                    },
                }
            },
        }
        self.persist();
        self.settle();
    }

    fn apply_pull(&mut self, snapshot: RemoteSnapshot) {
        let stats = merge_pull(
            &mut self.notes,
            &self.ledger,
            snapshot,
            self.shield.as_ref(),
        );
        self.shield = None;
        self.clear_error(Operation::Pull);
        info!(
            added = stats.added,
            updated = stats.updated,
            removed = stats.removed,
            kept_local = stats.kept_local,
            "pull settled"
        );
        self.bus.publish(SyncEvent::Pulled {
            meta: EventMeta::new(),
            stats,
        });
        if !stats.is_empty() {
            self.publish_notes_changed();
        }
    }

    fn apply_push(&mut self, batch: &CommitBatch, version: VersionToken) {
        for id in batch.upserts.keys() {
            if !self.ledger.contains(id) {
                self.notes.set_version(id, version.clone());
            }
        }
        self.shield = Some(PushShield::new(version.clone(), batch));
        self.last_version = Some(version.clone());
        self.clear_error(Operation::Push);

        let stats = PushStats {
            upserted: batch.upserts.len(),
            deleted: batch.deletes.len(),
        };
        info!(
            upserted = stats.upserted,
            deleted = stats.deleted,
            version = version.short(),
            "push settled"
        );
        self.bus.publish(SyncEvent::Pushed {
            meta: EventMeta::new(),
            stats,
            version,
        });
        self.publish_notes_changed();
    }

    fn fail(&mut self, operation: Operation, e: &GatewayError) {
        let error = SyncError::new(e.kind(), e.message());
        warn!(
            operation = operation.as_str(),
            kind = %error.kind,
            error = %error.message,
            pending = self.ledger.size(),
            "sync failed, local changes kept"
        );
        if error.kind == SyncErrorKind::AuthRequired {
            self.block_sync(error);
        } else {
            self.set_error(operation, error);
        }
    }

    fn set_error(&mut self, operation: Operation, error: SyncError) {
        self.bus.publish(SyncEvent::SyncFailed {
            meta: EventMeta::new(),
            direction: operation.as_str(),
            error: error.clone(),
        });
        self.error = Some((operation, error));
    }

    /// A successful operation clears its own error and any network error.
    fn clear_error(&mut self, operation: Operation) {
        if matches!(&self.error, Some((origin, e)) if *origin == operation || e.kind == SyncErrorKind::Network)
        {
            self.error = None;
        }
    }

    fn settle(&mut self) {
        let from = self.machine.state();
        let next = self.machine.settle(self.ledger.is_empty());
        self.advance(from, next);
    }

    fn status(&self) -> SyncStatus {
        SyncStatus {
            state: self.machine.state(),
            error: self.error.as_ref().map(|(_, e)| e.clone()),
            pending_changes: self.ledger.size(),
            last_version: self.last_version.clone(),
        }
    }

    fn publish_notes_changed(&self) {
        #[allow(clippy::cast_precision_loss)]
        let pending = self.ledger.size() as f64;
        metrics::gauge!("notes_pending_changes").set(pending);
        self.bus.publish(SyncEvent::NotesChanged {
            meta: EventMeta::new(),
            note_count: self.notes.len(),
            pending_changes: self.ledger.size(),
        });
    }

    /// Writes the session to the cache.
    ///
    /// Entries of an unsettled push are still unconfirmed and are stored as
    /// pending, under any newer entry for the same id.
    fn persist(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        let mut ledger = self.ledger.clone();
        if let Some(in_flight) = &self.in_flight {
            ledger.restore(in_flight.clone());
        }
        let session = CachedSession {
            notes: self.notes.clone(),
            ledger,
            last_version: self.last_version.clone(),
            saved_at: 0,
        };
        if let Err(e) = cache.store(&session) {
            warn!(error = %e, "failed to write note cache");
        }
    }

    fn release_idle_waiters(&mut self) {
        if self.idle_waiters.is_empty() || !self.machine.is_quiescent() {
            return;
        }
        let status = self.status();
        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(status.clone());
        }
    }
}

fn record_cycle(operation: Operation, ok: bool, started: Instant) {
    let status = if ok { "success" } else { "error" };
    metrics::counter!(
        "notes_sync_total",
        "direction" => operation.as_str(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!("notes_sync_duration_ms", "direction" => operation.as_str())
        .record(started.elapsed().as_secs_f64() * 1000.0);
}
