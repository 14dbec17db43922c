//! Per-source sync runs and their scheduling.
//!
//! Every source gets one [`SourceTask`]. A task runs at most one cycle at a
//! time; different sources run independently. Shutdown cancels the interval
//! loops between cycles and waits for every spawned run to finish.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use super::Upserter;
use crate::db::{Repository, LAST_SYNC_KEY};
use crate::errors::AppError;
use crate::models::{Classification, LabeledRecord, Source};
use crate::queue::DeliveryQueue;
use crate::render::{queue_item_for, Renderer};
use crate::sources::SourceAdapter;

/// Counts for one sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub cancelled: usize,
    pub unchanged: usize,
    pub errors: usize,
}

impl SyncSummary {
    fn record(&mut self, classification: Classification) {
        match classification {
            Classification::Created => self.created += 1,
            Classification::Updated => self.updated += 1,
            Classification::Cancelled => self.cancelled += 1,
            Classification::Unchanged => self.unchanged += 1,
        }
    }

    pub fn changes(&self) -> usize {
        self.created + self.updated + self.cancelled
    }
}

/// Receives the changed records of a cycle, in adapter order.
#[async_trait]
pub trait ChangeSink: Send + Sync {
    async fn deliver(&self, changes: Vec<LabeledRecord>);
}

/// Renders changes and appends them to the delivery queue.
pub struct QueueSink {
    queue: Arc<DeliveryQueue>,
    renderer: Arc<dyn Renderer>,
}

impl QueueSink {
    pub fn new(queue: Arc<DeliveryQueue>, renderer: Arc<dyn Renderer>) -> Self {
        Self { queue, renderer }
    }
}

#[async_trait]
impl ChangeSink for QueueSink {
    async fn deliver(&self, changes: Vec<LabeledRecord>) {
        for change in &changes {
            let item = self
                .queue
                .enqueue(queue_item_for(self.renderer.as_ref(), change))
                .await;
            tracing::debug!(id = item.id, record = %change.id, verb = %change.verb, "Queued change");
        }
    }
}

/// How often a source runs.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub interval: Duration,
    /// Wait before the first run
    pub initial_delay: Duration,
}

/// Sync pipeline for one source.
pub struct SourceTask {
    adapter: Arc<dyn SourceAdapter>,
    upserter: Upserter,
    repo: Repository,
    sink: Arc<dyn ChangeSink>,
    fetch_timeout: Duration,
    run_lock: Mutex<()>,
}

impl SourceTask {
    pub fn new(
        adapter: Arc<dyn SourceAdapter>,
        repo: Repository,
        sink: Arc<dyn ChangeSink>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            adapter,
            upserter: Upserter::new(repo.clone()),
            repo,
            sink,
            fetch_timeout,
            run_lock: Mutex::new(()),
        }
    }

    pub fn source(&self) -> Source {
        self.adapter.source()
    }

    /// Run one cycle, waiting for any cycle already in flight.
    pub async fn run_once(&self) -> Result<SyncSummary, AppError> {
        let _guard = self.run_lock.lock().await;
        self.run_cycle().await
    }

    /// Wipe this source's snapshots and watermark, then run a full cycle.
    pub async fn resync(&self) -> Result<SyncSummary, AppError> {
        let _guard = self.run_lock.lock().await;

        let removed = self.repo.clear_source(self.source()).await?;
        tracing::info!(source = %self.source(), removed, "Cleared snapshots for resync");

        self.run_cycle().await
    }

    /// Run on `schedule` until `shutdown` fires. A cycle in progress is allowed to finish.
    pub async fn run_forever(&self, schedule: Schedule, shutdown: CancellationToken) {
        if !schedule.initial_delay.is_zero() {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(schedule.initial_delay) => {}
            }
        }

        let mut ticker = tokio::time::interval(schedule.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.run_once().await {
                tracing::error!(source = %self.source(), error = %e, "Sync cycle failed");
            }
        }

        tracing::info!(source = %self.source(), "Sync loop stopped");
    }

    async fn run_cycle(&self) -> Result<SyncSummary, AppError> {
        let source = self.source();
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("sync", source = %source, run_id = %run_id);

        async move {
            let started = Utc::now();
            let since = if self.adapter.uses_watermark() {
                self.watermark().await?
            } else {
                None
            };

            let outcome = tokio::time::timeout(self.fetch_timeout, self.adapter.fetch(since))
                .await
                .map_err(|_| {
                    AppError::Timeout(format!(
                        "Fetch for {} exceeded {}s",
                        source,
                        self.fetch_timeout.as_secs_f32()
                    ))
                })?;

            let mut summary = SyncSummary::default();

            for failure in &outcome.failures {
                tracing::warn!(scope = %failure.scope, error = %failure.error, "Scope fetch failed");
                summary.errors += 1;
            }

            let mut changes = Vec::new();
            for record in &outcome.records {
                match self.upserter.upsert(record).await {
                    Ok(result) => {
                        summary.record(result.classification);
                        tracing::debug!(
                            record = %record.id(),
                            classification = result.classification.as_str(),
                            "Reconciled record"
                        );
                        if let Some(change) = result.change {
                            changes.push(change);
                        }
                    }
                    Err(e) => {
                        tracing::error!(record = %record.id(), error = %e, "Failed to store snapshot");
                        summary.errors += 1;
                    }
                }
            }

            if !changes.is_empty() {
                self.sink.deliver(changes).await;
            }

            // A partial cycle must not move the watermark past what it missed.
            if self.adapter.uses_watermark() && summary.errors == 0 {
                if let Err(e) = self
                    .repo
                    .set_meta(source, LAST_SYNC_KEY, &started.to_rfc3339())
                    .await
                {
                    tracing::error!(error = %e, "Failed to advance watermark");
                    summary.errors += 1;
                }
            }

            tracing::info!(
                changes = summary.changes(),
                created = summary.created,
                updated = summary.updated,
                cancelled = summary.cancelled,
                unchanged = summary.unchanged,
                errors = summary.errors,
                "Sync cycle complete"
            );

            Ok(summary)
        }
        .instrument(span)
        .await
    }

    async fn watermark(&self) -> Result<Option<DateTime<Utc>>, AppError> {
        let raw = self.repo.get_meta(self.source(), LAST_SYNC_KEY).await?;

        Ok(raw.and_then(|value| match DateTime::parse_from_rfc3339(&value) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                tracing::warn!(value = %value, "Ignoring unparsable watermark: {}", e);
                None
            }
        }))
    }
}

struct Registration {
    task: Arc<SourceTask>,
    schedule: Schedule,
}

/// Owns every source task and the background work spawned for them.
pub struct Scheduler {
    tasks: BTreeMap<Source, Registration>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            tasks: BTreeMap::new(),
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    pub fn register(&mut self, task: SourceTask, schedule: Schedule) {
        self.tasks.insert(
            task.source(),
            Registration {
                task: Arc::new(task),
                schedule,
            },
        );
    }

    pub fn sources(&self) -> Vec<Source> {
        self.tasks.keys().copied().collect()
    }

    /// Spawn the interval loop of every registered source.
    pub fn start(&self) {
        for registration in self.tasks.values() {
            let task = registration.task.clone();
            let schedule = registration.schedule;
            let shutdown = self.shutdown.clone();
            self.tracker
                .spawn(async move { task.run_forever(schedule, shutdown).await });
        }
    }

    /// Start a run in the background; `resync` wipes the source first.
    pub fn trigger(&self, source: Source, resync: bool) -> Result<(), AppError> {
        let registration = self.tasks.get(&source).ok_or_else(|| {
            AppError::BadRequest(format!("{} sync not configured", source))
        })?;
        if self.shutdown.is_cancelled() {
            return Err(AppError::Internal("Shutting down".to_string()));
        }

        let task = registration.task.clone();
        self.tracker.spawn(async move {
            let result = if resync {
                task.resync().await
            } else {
                task.run_once().await
            };
            if let Err(e) = result {
                tracing::error!(source = %source, error = %e, "Triggered sync failed");
            }
        });

        Ok(())
    }

    /// Stop the interval loops and wait for every spawned run to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
