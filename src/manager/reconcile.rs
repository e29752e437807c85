use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use super::errors::TickerError;
use super::manager::TickerManager;
use super::registry::Slot;
use crate::models::{TickerConfig, TickerSpec, TickerState};

/// What one reconciliation pass changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Stored tickers that had no worker
    pub started: usize,
    /// Live workers whose config no longer matched the store
    pub restarted: usize,
    /// Live configs written back to a store that had lost them
    pub repersisted: usize,
    /// Workers asked to publish again
    pub nudged: usize,
    /// Tickers left alone this pass because their record could not be read or written
    pub skipped: usize,
}

enum Action {
    Skip,
    Start,
    Replace,
    Nudge,
}

fn scheduler_error(e: JobSchedulerError) -> TickerError {
    TickerError::Scheduler(e.to_string())
}

impl TickerManager {
    /// Bring running tickers back in line with the store.
    ///
    /// The store wins: stored tickers without a worker are started, workers
    /// running a stale config are replaced, and every live worker re-publishes
    /// its display. Live tickers the store has lost are written back. A record
    /// that cannot be read only skips its own ticker; only a failed listing
    /// fails the pass.
    pub async fn reconcile(&self) -> Result<ReconcileReport, TickerError> {
        let stored: BTreeMap<String, TickerSpec> =
            self.inner.store.load_all().await?.into_iter().collect();
        let mut report = ReconcileReport::default();

        for id in stored.keys() {
            let mut slot = self.inner.registry.lock(id).await;
            // a delete may have landed since load_all
            let spec = match self.inner.store.get(id).await {
                Ok(Some(spec)) => spec,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(id = %id, "Skipping ticker in reconcile: {}", e);
                    report.skipped += 1;
                    continue;
                }
            };
            let config = match TickerConfig::from_spec(spec) {
                Ok(config) if config.id == *id => Arc::new(config),
                _ => continue,
            };

            let action = match &*slot {
                Slot::Pending { .. } => Action::Skip,
                Slot::Vacant => Action::Start,
                Slot::Live(handle) if handle.config != config => Action::Replace,
                Slot::Live(handle) => {
                    handle.nudge.notify_one();
                    Action::Nudge
                }
            };

            match action {
                Action::Skip => {}
                Action::Nudge => report.nudged += 1,
                Action::Start => {
                    tracing::info!(id = %id, "Starting stored ticker with no worker");
                    self.inner.board.insert(TickerState::starting(config.clone()));
                    self.start(&mut slot, config, 0).await;
                    report.started += 1;
                }
                Action::Replace => {
                    tracing::info!(id = %id, "Stored config changed, restarting worker");
                    if let Slot::Live(handle) = slot.take() {
                        self.stop_worker(handle).await;
                    }
                    self.inner.board.insert(TickerState::starting(config.clone()));
                    self.start(&mut slot, config, 0).await;
                    report.restarted += 1;
                }
            }
        }

        for id in self.inner.registry.ids() {
            if stored.contains_key(&id) {
                continue;
            }
            let slot = self.inner.registry.lock(&id).await;
            let Some(config) = slot.config().cloned() else {
                continue;
            };
            match self.inner.store.get(&id).await {
                Ok(None) => {}
                Ok(Some(_)) => continue,
                Err(e) => {
                    tracing::warn!(id = %id, "Skipping ticker in reconcile: {}", e);
                    report.skipped += 1;
                    continue;
                }
            }
            tracing::warn!(id = %id, "Running ticker missing from store, persisting it again");
            match self.inner.store.save_or_replace(&id, &config.to_spec()).await {
                Ok(()) => report.repersisted += 1,
                Err(e) => {
                    tracing::warn!(id = %id, "Failed to persist running ticker: {}", e);
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }

    /// Schedule [`reconcile`](Self::reconcile) every `reconcile_interval`
    pub(super) async fn start_reconciler(&self) -> Result<(), TickerError> {
        let mut current = self.inner.scheduler.lock().await;
        if current.is_some() {
            return Ok(());
        }

        let every = self.inner.config.reconcile_interval;
        let scheduler = JobScheduler::new().await.map_err(scheduler_error)?;
        let weak = Arc::downgrade(&self.inner);

        let job = Job::new_repeated_async(every, move |_uuid, _lock| {
            let weak = weak.clone();

            Box::pin(async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let manager = TickerManager { inner };

                match manager.reconcile().await {
                    Ok(report) => tracing::debug!(
                        started = report.started,
                        restarted = report.restarted,
                        repersisted = report.repersisted,
                        nudged = report.nudged,
                        skipped = report.skipped,
                        "Reconcile pass completed"
                    ),
                    Err(e) => tracing::error!("Reconcile pass failed: {}", e),
                }
            })
        })
        .map_err(scheduler_error)?;

        scheduler.add(job).await.map_err(scheduler_error)?;
        scheduler.start().await.map_err(scheduler_error)?;
        *current = Some(scheduler);

        tracing::info!(every = ?every, "Managed mode reconciliation scheduled");
        Ok(())
    }

    pub(super) async fn stop_reconciler(&self) {
        if let Some(mut scheduler) = self.inner.scheduler.lock().await.take() {
            if let Err(e) = scheduler.shutdown().await {
                tracing::warn!("Failed to stop reconcile scheduler: {}", e);
            }
        }
    }
}
