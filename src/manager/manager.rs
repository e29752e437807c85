use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tokio_cron_scheduler::JobScheduler;
use tokio_util::sync::CancellationToken;

use super::errors::TickerError;
use super::registry::{Registry, Slot, SlotGuard, WorkerHandle};
use super::retry::{run_retry_queue, StartRetry};
use crate::config::ManagerConfig;
use crate::models::{validate_id, TickerConfig, TickerSpec, TickerState, TickerStatus};
use crate::pricing::PriceSource;
use crate::publisher::{PresencePublisher, PublishError, PublisherFactory};
use crate::store::{StoreError, TickerStore};
use crate::worker::backoff::delay_for;
use crate::worker::{StateBoard, TickerWorker, WorkerExit, WorkerSettings};

/// Sent by every worker task as it finishes
#[derive(Debug)]
struct WorkerExited {
    id: String,
    generation: u64,
    exit: WorkerExit,
}

/// Outcome of replaying the store at startup
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootReport {
    pub started: usize,
    /// Stored and valid, waiting on the start retry queue
    pub retrying: usize,
    /// Stored records that failed validation
    pub rejected: usize,
}

enum BootOutcome {
    Started,
    Retrying,
    Rejected,
    Skipped,
}

/// Ticker counts by status, for health reporting
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickerCounts {
    pub total: usize,
    pub starting: usize,
    pub running: usize,
    pub backing_off: usize,
    pub stopped: usize,
}

pub(super) struct Inner {
    pub(super) config: ManagerConfig,
    settings: WorkerSettings,
    pub(super) store: Arc<dyn TickerStore>,
    source: Arc<dyn PriceSource>,
    publishers: Arc<dyn PublisherFactory>,
    pub(super) registry: Registry,
    pub(super) board: Arc<StateBoard>,
    retries: mpsc::UnboundedSender<StartRetry>,
    exits: mpsc::UnboundedSender<WorkerExited>,
    generation: AtomicU64,
    shutdown: CancellationToken,
    pub(super) scheduler: tokio::sync::Mutex<Option<JobScheduler>>,
}

/// Owns every ticker's lifecycle: validation, persistence, worker start and
/// stop, and the background retry, reaper and reconcile tasks.
///
/// Cheap to clone; clones share one set of tickers. Must be created inside
/// a tokio runtime.
#[derive(Clone)]
pub struct TickerManager {
    pub(super) inner: Arc<Inner>,
}

impl TickerManager {
    pub fn new(
        config: ManagerConfig,
        store: Arc<dyn TickerStore>,
        source: Arc<dyn PriceSource>,
        publishers: Arc<dyn PublisherFactory>,
    ) -> Self {
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let inner = Arc::new(Inner {
            settings: WorkerSettings::from(&config),
            config,
            store,
            source,
            publishers,
            registry: Registry::new(),
            board: Arc::new(StateBoard::new()),
            retries: retry_tx,
            exits: exit_tx,
            generation: AtomicU64::new(0),
            shutdown: shutdown.clone(),
            scheduler: tokio::sync::Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(run_retry_queue(retry_rx, shutdown.clone(), move |retry| {
            if let Some(inner) = weak.upgrade() {
                let manager = TickerManager { inner };
                tokio::spawn(async move { manager.retry_start(retry).await });
            }
        }));
        tokio::spawn(reap_exits(Arc::downgrade(&inner), exit_rx, shutdown));

        Self { inner }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Validate, persist and start a new ticker. Returns its id.
    ///
    /// The record is durable before the worker starts. A publisher that
    /// cannot connect yet does not fail the call; the start is retried in
    /// the background.
    pub async fn create(&self, spec: TickerSpec) -> Result<String, TickerError> {
        let config = Arc::new(TickerConfig::from_spec(spec).map_err(TickerError::InvalidConfig)?);
        let id = config.id.clone();

        let mut slot = self.inner.registry.lock(&id).await;
        let stored = self.stored(&id).await?;
        if !slot.is_vacant() || stored {
            return Err(TickerError::DuplicateId(id));
        }

        self.inner.store.save_or_replace(&id, &config.to_spec()).await?;
        self.inner.board.insert(TickerState::starting(config.clone()));
        self.start(&mut slot, config.clone(), 0).await;

        tracing::info!(
            id = %id,
            symbol = %config.symbol,
            source = %config.source.kind(),
            "Ticker created"
        );
        Ok(id)
    }

    /// Stop a ticker and remove its record.
    ///
    /// If the store refuses the delete, the worker that was stopped is
    /// started again and the store error is returned.
    pub async fn delete(&self, id: &str) -> Result<(), TickerError> {
        known_id(id)?;
        let mut slot = self.inner.registry.lock(id).await;
        let stored = self.stored(id).await?;
        if slot.is_vacant() && !stored {
            return Err(TickerError::NotFound(id.to_string()));
        }

        let previous = slot.take();
        let config = previous.config().cloned();
        if let Slot::Live(handle) = previous {
            self.stop_worker(handle).await;
        }

        if let Err(e) = self.inner.store.delete(id).await {
            tracing::error!(id = %id, "Failed to delete ticker record, keeping ticker: {}", e);
            if let Some(config) = config {
                self.inner.board.insert(TickerState::starting(config.clone()));
                self.start(&mut slot, config, 0).await;
            }
            return Err(e.into());
        }

        self.inner.board.remove(id);
        tracing::info!(id = %id, "Ticker deleted");
        Ok(())
    }

    /// Snapshots of every known ticker, ordered by id
    pub fn list(&self) -> Vec<TickerState> {
        self.inner.board.list()
    }

    pub async fn get(&self, id: &str) -> Result<TickerState, TickerError> {
        known_id(id)?;
        if let Some(state) = self.inner.board.get(id) {
            return Ok(state);
        }

        let spec = self
            .inner
            .store
            .get(id)
            .await?
            .ok_or_else(|| TickerError::NotFound(id.to_string()))?;
        let config = TickerConfig::from_spec(spec).map_err(TickerError::InvalidConfig)?;
        let mut state = TickerState::starting(Arc::new(config));
        state.status = TickerStatus::Stopped;
        state.last_error = Some("not running".to_string());
        Ok(state)
    }

    /// Replace whatever runs under `id` with a fresh worker built from the
    /// stored record
    pub async fn restart(&self, id: &str) -> Result<(), TickerError> {
        known_id(id)?;
        let mut slot = self.inner.registry.lock(id).await;
        let spec = self
            .inner
            .store
            .get(id)
            .await?
            .ok_or_else(|| TickerError::NotFound(id.to_string()))?;
        let config = Arc::new(TickerConfig::from_spec(spec).map_err(TickerError::InvalidConfig)?);

        if let Slot::Live(handle) = slot.take() {
            self.stop_worker(handle).await;
        }
        self.inner.board.insert(TickerState::starting(config.clone()));
        self.start(&mut slot, config, 0).await;

        tracing::info!(id = %id, "Ticker restarted");
        Ok(())
    }

    /// Start a worker for every stored ticker, concurrently. Starts managed
    /// mode reconciliation afterwards when enabled.
    pub async fn boot(&self) -> Result<BootReport, TickerError> {
        let records = self.inner.store.load_all().await?;
        tracing::info!(count = records.len(), "Replaying stored tickers");

        let mut set = JoinSet::new();
        for (id, spec) in records {
            let manager = self.clone();
            set.spawn(async move { manager.boot_one(id, spec).await });
        }

        let mut report = BootReport::default();
        while let Some(outcome) = set.join_next().await {
            match outcome {
                Ok(BootOutcome::Started) => report.started += 1,
                Ok(BootOutcome::Retrying) => report.retrying += 1,
                Ok(BootOutcome::Rejected) => report.rejected += 1,
                Ok(BootOutcome::Skipped) => {}
                Err(e) => tracing::error!("Boot task failed: {}", e),
            }
        }

        tracing::info!(
            started = report.started,
            retrying = report.retrying,
            rejected = report.rejected,
            "Boot complete"
        );

        if self.inner.config.managed {
            self.start_reconciler().await?;
        }
        Ok(report)
    }

    async fn boot_one(&self, id: String, spec: TickerSpec) -> BootOutcome {
        let config = match TickerConfig::from_spec(spec) {
            Ok(config) if config.id == id => Arc::new(config),
            Ok(config) => {
                tracing::error!(id = %id, found = %config.id, "Stored ticker id does not match its record, skipping");
                return BootOutcome::Rejected;
            }
            Err(e) => {
                tracing::error!(id = %id, "Stored ticker is invalid, skipping: {}", e);
                return BootOutcome::Rejected;
            }
        };

        let mut slot = self.inner.registry.lock(&id).await;
        if !slot.is_vacant() {
            return BootOutcome::Skipped;
        }
        self.inner.board.insert(TickerState::starting(config.clone()));
        self.start(&mut slot, config, 0).await;

        match &*slot {
            Slot::Live(_) => BootOutcome::Started,
            Slot::Pending { .. } => BootOutcome::Retrying,
            Slot::Vacant => BootOutcome::Rejected,
        }
    }

    /// Stop the reconciler and retry queue, then drain every worker
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down ticker manager");
        self.stop_reconciler().await;
        self.inner.shutdown.cancel();

        let mut set = JoinSet::new();
        for id in self.inner.registry.ids() {
            let manager = self.clone();
            set.spawn(async move {
                let mut slot = manager.inner.registry.lock(&id).await;
                if let Slot::Live(handle) = slot.take() {
                    manager.stop_worker(handle).await;
                }
            });
        }
        while set.join_next().await.is_some() {}
        tracing::info!("Ticker manager stopped");
    }

    pub fn counts(&self) -> TickerCounts {
        let board = &self.inner.board;
        TickerCounts {
            total: board.len(),
            starting: board.count_by_status(TickerStatus::Starting),
            running: board.count_by_status(TickerStatus::Running),
            backing_off: board.count_by_status(TickerStatus::BackingOff),
            stopped: board.count_by_status(TickerStatus::Stopped),
        }
    }

    /// Connect a publisher and spawn the worker into `slot`, or queue a
    /// retry when the connect fails transiently
    pub(super) async fn start(&self, slot: &mut SlotGuard, config: Arc<TickerConfig>, attempt: u32) {
        let id = config.id.clone();
        if self.inner.shutdown.is_cancelled() {
            return;
        }

        let connect = self.inner.publishers.connect(&config);
        let result = match tokio::time::timeout(self.inner.config.start_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout),
        };

        match result {
            Ok(publisher) => {
                **slot = Slot::Live(self.spawn_worker(config, publisher));
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(id = %id, "Cannot start ticker: {}", e);
                self.inner.board.update(&id, |state| state.last_error = Some(e.to_string()));
                self.inner.board.transition(&id, TickerStatus::Stopped);
                **slot = Slot::Vacant;
            }
            Err(e) => {
                let generation = self.next_generation();
                let delay = delay_for(&self.inner.config.start_backoff, attempt);
                tracing::warn!(id = %id, attempt, retry_in = ?delay, "Ticker start failed: {}", e);
                self.inner.board.update(&id, |state| state.last_error = Some(e.to_string()));

                **slot = Slot::Pending {
                    config,
                    attempt,
                    generation,
                };
                let _ = self.inner.retries.send(StartRetry { id, generation, delay });
            }
        }
    }

    async fn retry_start(&self, retry: StartRetry) {
        let mut slot = self.inner.registry.lock(&retry.id).await;
        let (config, attempt) = match &*slot {
            Slot::Pending {
                config,
                attempt,
                generation,
            } if *generation == retry.generation => (config.clone(), *attempt),
            _ => return,
        };
        self.start(&mut slot, config, attempt.saturating_add(1)).await;
    }

    fn spawn_worker(
        &self,
        config: Arc<TickerConfig>,
        publisher: Box<dyn PresencePublisher>,
    ) -> WorkerHandle {
        let generation = self.next_generation();
        let cancel = self.inner.shutdown.child_token();
        let nudge = Arc::new(Notify::new());
        let worker = TickerWorker::new(
            config.clone(),
            self.inner.source.clone(),
            publisher,
            self.inner.board.clone(),
            self.inner.settings.clone(),
            cancel.clone(),
            nudge.clone(),
        );

        let exits = self.inner.exits.clone();
        let board = self.inner.board.clone();
        let id = config.id.clone();
        let join = tokio::spawn(async move {
            let exit = match AssertUnwindSafe(worker.run()).catch_unwind().await {
                Ok(exit) => exit,
                Err(_) => {
                    board.update(&id, |state| state.last_error = Some("worker panicked".to_string()));
                    board.transition(&id, TickerStatus::Stopped);
                    WorkerExit::Panicked
                }
            };
            let _ = exits.send(WorkerExited {
                id,
                generation,
                exit: exit.clone(),
            });
            exit
        });

        WorkerHandle {
            config,
            cancel,
            nudge,
            join,
            generation,
        }
    }

    /// Cancel a worker and wait for it, aborting past the drain timeout
    pub(super) async fn stop_worker(&self, mut handle: WorkerHandle) {
        let id = handle.config.id.clone();
        handle.cancel.cancel();

        match tokio::time::timeout(self.inner.config.drain_timeout, &mut handle.join).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!(id = %id, "Worker task failed: {}", e),
            Err(_) => {
                tracing::warn!(
                    id = %id,
                    timeout = ?self.inner.config.drain_timeout,
                    "Worker did not stop in time, aborting"
                );
                handle.join.abort();
                let _ = handle.join.await;
                self.inner.board.transition(&id, TickerStatus::Stopped);
            }
        }
    }

    /// Whether a record exists for `id`; an unreadable record still occupies it
    async fn stored(&self, id: &str) -> Result<bool, TickerError> {
        match self.inner.store.get(id).await {
            Ok(record) => Ok(record.is_some()),
            Err(StoreError::Corrupt { .. }) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    fn next_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Ids that fail validation were never created, so they are never looked up
fn known_id(id: &str) -> Result<(), TickerError> {
    validate_id(id).map_err(|_| TickerError::NotFound(id.to_string()))
}

/// Clear slots whose worker gave up or died, so the id can be restarted
async fn reap_exits(
    inner: Weak<Inner>,
    mut exits: mpsc::UnboundedReceiver<WorkerExited>,
    shutdown: CancellationToken,
) {
    loop {
        let exited = tokio::select! {
            _ = shutdown.cancelled() => break,
            exited = exits.recv() => match exited {
                Some(exited) => exited,
                None => break,
            },
        };

        if exited.exit == WorkerExit::Cancelled {
            continue;
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };

        let mut slot = inner.registry.lock(&exited.id).await;
        if !matches!(&*slot, Slot::Live(handle) if handle.generation == exited.generation) {
            continue;
        }
        slot.take();
        match &exited.exit {
            WorkerExit::RetryCeiling { errors, .. } => tracing::error!(
                id = %exited.id,
                errors,
                "Ticker stopped after repeated failures; restart or delete it"
            ),
            _ => tracing::error!(id = %exited.id, "Ticker worker panicked; restart or delete it"),
        }
    }
}
