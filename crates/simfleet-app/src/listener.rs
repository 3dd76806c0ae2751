//! Scheduler listeners
//!
//! Every notification is awaited before the scheduler takes its next step, so
//! a listener may do slow work (booting engines, tearing them down) without
//! racing the next batch.

use std::sync::{Arc, Mutex};

use futures_util::future::{self, BoxFuture, FutureExt};

use simfleet_core::prelude::*;
use simfleet_core::BatchIndices;
use simfleet_daemon::{ProcessExecutor, ProcessRunner};

use crate::registry::EngineRegistry;

/// Batch-boundary notifications.
///
/// Methods return boxed futures so listeners can be stored as trait objects.
/// All of them default to no-ops. An error aborts the run.
pub trait SchedulerListener: Send + Sync {
    /// Once, before the first batch
    fn on_fresh_start(&self) -> BoxFuture<'_, Result<()>> {
        future::ready(Ok(())).boxed()
    }

    fn on_batch_started(&self, _batch: BatchIndices) -> BoxFuture<'_, Result<()>> {
        future::ready(Ok(())).boxed()
    }

    fn on_batch_finished(&self, _batch: BatchIndices) -> BoxFuture<'_, Result<()>> {
        future::ready(Ok(())).boxed()
    }

    /// Once, after the last batch finished
    fn on_all_tests_finished(&self) -> BoxFuture<'_, Result<()>> {
        future::ready(Ok(())).boxed()
    }
}

// ─────────────────────────────────────────────────────────────────
// Engine Lifecycle
// ─────────────────────────────────────────────────────────────────

/// Boots the engines a batch needs when it starts and stops them when it ends
pub struct EngineLifecycleListener<R = ProcessExecutor> {
    registry: Arc<EngineRegistry<R>>,
}

impl<R> EngineLifecycleListener<R> {
    pub fn new(registry: Arc<EngineRegistry<R>>) -> Self {
        Self { registry }
    }
}

impl<R> SchedulerListener for EngineLifecycleListener<R>
where
    R: ProcessRunner + Send + Sync + 'static,
{
    fn on_batch_started(&self, batch: BatchIndices) -> BoxFuture<'_, Result<()>> {
        async move {
            let slots = self.registry.slots_for(&batch)?;
            info!("Batch {}: booting slots {:?}", batch, slots);
            self.registry.boot_slots(&slots).await
        }
        .boxed()
    }

    // Teardown failures leave engines Stopped with resources released, so
    // they are logged rather than aborting the run.
    fn on_batch_finished(&self, batch: BatchIndices) -> BoxFuture<'_, Result<()>> {
        async move {
            let slots = self.registry.slots_for(&batch)?;
            info!("Batch {}: tearing down slots {:?}", batch, slots);
            if let Err(e) = self.registry.teardown_slots(&slots).await {
                warn!("Batch {} teardown incomplete: {}", batch, e);
            }
            Ok(())
        }
        .boxed()
    }

    fn on_all_tests_finished(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            if let Err(e) = self.registry.teardown_all().await {
                warn!("Final teardown incomplete: {}", e);
            }
            Ok(())
        }
        .boxed()
    }
}

// ─────────────────────────────────────────────────────────────────
// Recording
// ─────────────────────────────────────────────────────────────────

/// One listener notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    FreshStart,
    BatchStarted(BatchIndices),
    BatchFinished(BatchIndices),
    AllTestsFinished,
}

impl Notification {
    /// Stage name used in `SchedulerAbort` errors and events
    pub fn stage(&self) -> &'static str {
        match self {
            Notification::FreshStart => "fresh_start",
            Notification::BatchStarted(_) => "batch_started",
            Notification::BatchFinished(_) => "batch_finished",
            Notification::AllTestsFinished => "all_tests_finished",
        }
    }
}

/// Records the notification sequence, optionally failing on one of them
#[derive(Debug, Default)]
pub struct RecordingListener {
    seen: Mutex<Vec<Notification>>,
    fail_on: Option<Notification>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with a driver error when `notification` arrives
    pub fn failing_on(notification: Notification) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            fail_on: Some(notification),
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, notification: Notification) -> BoxFuture<'_, Result<()>> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);

        let result = if self.fail_on == Some(notification) {
            Err(Error::driver(format!("{} rejected", notification.stage())))
        } else {
            Ok(())
        };
        future::ready(result).boxed()
    }
}

impl SchedulerListener for RecordingListener {
    fn on_fresh_start(&self) -> BoxFuture<'_, Result<()>> {
        self.record(Notification::FreshStart)
    }

    fn on_batch_started(&self, batch: BatchIndices) -> BoxFuture<'_, Result<()>> {
        self.record(Notification::BatchStarted(batch))
    }

    fn on_batch_finished(&self, batch: BatchIndices) -> BoxFuture<'_, Result<()>> {
        self.record(Notification::BatchFinished(batch))
    }

    fn on_all_tests_finished(&self) -> BoxFuture<'_, Result<()>> {
        self.record(Notification::AllTestsFinished)
    }
}
