//! Repeat scheduler
//!
//! Splits `total_retries` iterations into consecutive batches of
//! `partition_size` indices and runs them strictly one after another:
//!
//! ```text
//! on_fresh_start
//! for batch in [0,P) [P,2P) ... [kP,N):
//!     on_batch_started(batch)
//!     one worker per index, concurrently: before -> body -> after (x consume count)
//!     on_batch_finished(batch)
//! on_all_tests_finished
//! ```
//!
//! Every listener notification is awaited before the next step. A listener
//! error, a hook error or a worker panic aborts the run with
//! `SchedulerAbort`; engines are then torn down and no later batch starts.
//! Failed iterations only show up in the [`RunReport`].

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;

use simfleet_core::prelude::*;
use simfleet_core::{BatchIndices, IterationContext};
use simfleet_daemon::ProcessRunner;

use crate::consumer::{ConsumeOnce, IndexConsumer};
use crate::listener::{Notification, SchedulerListener};
use crate::registry::EngineRegistry;
use crate::report::{IterationOutcome, IterationRecord, RunReport, TestBody};

const DISPATCH_STAGE: &str = "dispatch";

/// Partition `[0, total)` into ascending contiguous batches of `size`
pub fn plan(total: usize, size: usize) -> Vec<BatchIndices> {
    if size == 0 {
        return Vec::new();
    }
    (0..total.div_ceil(size))
        .map(|p| BatchIndices::new(p * size, total.min((p + 1) * size)))
        .collect()
}

pub struct RepeatScheduler {
    total_retries: usize,
    partition_size: usize,
    listeners: Vec<Arc<dyn SchedulerListener>>,
    consumer: Arc<dyn IndexConsumer>,
}

impl std::fmt::Debug for RepeatScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeatScheduler")
            .field("total_retries", &self.total_retries)
            .field("partition_size", &self.partition_size)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl RepeatScheduler {
    pub fn schedule(
        total_retries: usize,
        partition_size: usize,
        listeners: Vec<Arc<dyn SchedulerListener>>,
    ) -> Result<Self> {
        if partition_size == 0 {
            return Err(Error::config_invalid("partition size must be at least 1"));
        }
        Ok(Self {
            total_retries,
            partition_size,
            listeners,
            consumer: Arc::new(ConsumeOnce),
        })
    }

    /// Replace the default [`ConsumeOnce`] policy
    pub fn with_consumer(mut self, consumer: impl IndexConsumer + 'static) -> Self {
        self.consumer = Arc::new(consumer);
        self
    }

    pub fn total_retries(&self) -> usize {
        self.total_retries
    }

    pub fn partition_size(&self) -> usize {
        self.partition_size
    }

    pub fn partition_count(&self) -> usize {
        self.total_retries.div_ceil(self.partition_size)
    }

    pub fn plan(&self) -> Vec<BatchIndices> {
        plan(self.total_retries, self.partition_size)
    }

    /// Every iteration the run will execute, batch by batch.
    ///
    /// Each index appears `consume_count(batch)` times in a row. Slots assume a
    /// pool of `engine_count` engines (at least one).
    pub fn tuples(&self, engine_count: usize) -> impl Iterator<Item = IterationContext> + '_ {
        let engines = engine_count.max(1);
        self.plan().into_iter().flat_map(move |batch| {
            let count = self.consumer.consume_count(&batch).max(1);
            batch.iter().flat_map(move |index| {
                (0..count).map(move |repetition| IterationContext {
                    index,
                    repetition,
                    slot: index % engines,
                })
            })
        })
    }

    /// Run every batch against `registry`, executing `body` once per tuple.
    pub async fn run<R>(
        &self,
        registry: Arc<EngineRegistry<R>>,
        body: Arc<dyn TestBody>,
    ) -> Result<RunReport>
    where
        R: ProcessRunner + Send + Sync + 'static,
    {
        info!(
            "Scheduling {} iterations in {} batches of {}",
            self.total_retries,
            self.partition_count(),
            self.partition_size
        );

        let result = self.run_batches(&registry, &body).await;

        if let Err(e) = &result {
            error!("Run aborted: {}", e);
            if let Err(teardown) = registry.teardown_all().await {
                warn!("Teardown after abort incomplete: {}", teardown);
            }
        }
        result
    }

    async fn run_batches<R>(
        &self,
        registry: &Arc<EngineRegistry<R>>,
        body: &Arc<dyn TestBody>,
    ) -> Result<RunReport>
    where
        R: ProcessRunner + Send + Sync + 'static,
    {
        let mut report = RunReport::default();

        self.notify(Notification::FreshStart).await?;

        for batch in self.plan() {
            self.notify(Notification::BatchStarted(batch)).await?;

            let records = self.dispatch(batch, registry, body).await?;
            let failed = records.iter().filter(|r| !r.outcome.is_passed()).count();
            info!(
                "Batch {} finished: {} iterations, {} failed",
                batch,
                records.len(),
                failed
            );
            report.finish_batch(batch, records);

            self.notify(Notification::BatchFinished(batch)).await?;
        }

        self.notify(Notification::AllTestsFinished).await?;

        info!(
            "All tests finished: {} passed, {} failed",
            report.passed(),
            report.failed()
        );
        Ok(report)
    }

    async fn notify(&self, notification: Notification) -> Result<()> {
        debug!("Notifying {} listeners: {:?}", self.listeners.len(), notification);

        for listener in &self.listeners {
            let result = match notification {
                Notification::FreshStart => listener.on_fresh_start().await,
                Notification::BatchStarted(batch) => listener.on_batch_started(batch).await,
                Notification::BatchFinished(batch) => listener.on_batch_finished(batch).await,
                Notification::AllTestsFinished => listener.on_all_tests_finished().await,
            };
            result.map_err(|e| Error::scheduler_abort(notification.stage(), e.to_string()))?;
        }
        Ok(())
    }

    /// Run one worker per index of `batch` and wait for all of them
    async fn dispatch<R>(
        &self,
        batch: BatchIndices,
        registry: &Arc<EngineRegistry<R>>,
        body: &Arc<dyn TestBody>,
    ) -> Result<Vec<IterationRecord>>
    where
        R: ProcessRunner + Send + Sync + 'static,
    {
        let count = self.consumer.consume_count(&batch).max(1);
        let mut workers = JoinSet::new();

        for index in batch.iter() {
            let slot = registry
                .slot_for(index)
                .map_err(|e| Error::scheduler_abort(DISPATCH_STAGE, e.to_string()))?;
            workers.spawn(run_index(
                Arc::clone(registry),
                Arc::clone(body),
                index,
                slot,
                count,
            ));
        }

        let mut records = Vec::with_capacity(batch.len() * count);
        while let Some(joined) = workers.join_next().await {
            let outcome = match joined {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(e) => Err(format!("worker panicked: {}", e)),
            };
            match outcome {
                Ok(batch_records) => records.extend(batch_records),
                Err(message) => {
                    workers.abort_all();
                    return Err(Error::scheduler_abort(DISPATCH_STAGE, message));
                }
            }
        }

        Ok(records)
    }
}

/// Worker for one index: its repetitions run back to back on the same slot
async fn run_index<R>(
    registry: Arc<EngineRegistry<R>>,
    body: Arc<dyn TestBody>,
    index: usize,
    slot: usize,
    count: usize,
) -> Result<Vec<IterationRecord>>
where
    R: ProcessRunner + Send + Sync + 'static,
{
    let mut records = Vec::with_capacity(count);

    for repetition in 0..count {
        let ctx = IterationContext {
            index,
            repetition,
            slot,
        };

        let guard = registry.before(ctx).await?;
        let started = Instant::now();
        let outcome = body.run(ctx, guard.info()).await;
        let elapsed = started.elapsed();
        let device = guard.info().device.clone();
        registry.after(guard, ctx).await?;

        if let IterationOutcome::Failed { message } = &outcome {
            warn!("Iteration {}.{} on {} failed: {}", index, repetition, device, message);
        }
        records.push(IterationRecord::new(ctx, device, outcome, elapsed));
    }

    Ok(records)
}
