//! Headless mode - NDJSON event output
//!
//! `simfleet run` writes one JSON event per line to stdout so CI scripts can
//! follow a run without parsing logs. Logs go to the log file only.
//!
//! # Example Output
//!
//! ```json
//! {"event":"fresh_start","total_retries":4,"partition_size":2,"engines":2,"timestamp":1704700001000}
//! {"event":"batch_started","lo":0,"hi":2,"timestamp":1704700001005}
//! {"event":"iteration_finished","index":0,"repetition":0,"slot":0,"device":"Pixel_6_API_33","outcome":"passed","duration_ms":5120,"timestamp":1704700006200}
//! ```

pub mod runner;

use std::io::{self, Write};
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::{self, BoxFuture, FutureExt};
use serde::Serialize;
use tokio::time::Instant;
use tracing::error;

use simfleet_app::{EngineInfo, IterationOutcome, IterationRecord, RunReport, SchedulerListener, TestBody};
use simfleet_core::prelude::Result;
use simfleet_core::{BatchIndices, IterationContext};

/// Events emitted in headless mode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeadlessEvent {
    /// The scheduler is about to run its first batch
    FreshStart {
        total_retries: usize,
        partition_size: usize,
        engines: usize,
        timestamp: i64,
    },

    BatchStarted { lo: usize, hi: usize, timestamp: i64 },

    /// One iteration of the suite finished, passed or failed
    IterationFinished {
        #[serde(flatten)]
        record: IterationRecord,
        timestamp: i64,
    },

    BatchFinished { lo: usize, hi: usize, timestamp: i64 },

    /// The run completed; engines are stopped
    AllTestsFinished {
        passed: usize,
        failed: usize,
        batches: usize,
        timestamp: i64,
    },

    /// An iteration `--dry-run` would execute
    IterationPlanned {
        index: usize,
        repetition: usize,
        slot: usize,
        device: Option<String>,
        timestamp: i64,
    },

    Error {
        message: String,
        fatal: bool,
        timestamp: i64,
    },
}

impl HeadlessEvent {
    /// Emit this event to stdout as JSON
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize headless event: {}", e);
                return;
            }
        };

        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write headless event to stdout: {}", e);
            return;
        }

        if let Err(e) = stdout.flush() {
            error!("Failed to flush headless stdout: {}", e);
        }
    }

    /// Get current timestamp in milliseconds
    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn fresh_start(total_retries: usize, partition_size: usize, engines: usize) -> Self {
        Self::FreshStart {
            total_retries,
            partition_size,
            engines,
            timestamp: Self::now(),
        }
    }

    pub fn batch_started(batch: BatchIndices) -> Self {
        Self::BatchStarted {
            lo: batch.lo,
            hi: batch.hi,
            timestamp: Self::now(),
        }
    }

    pub fn iteration_finished(record: IterationRecord) -> Self {
        Self::IterationFinished {
            record,
            timestamp: Self::now(),
        }
    }

    pub fn batch_finished(batch: BatchIndices) -> Self {
        Self::BatchFinished {
            lo: batch.lo,
            hi: batch.hi,
            timestamp: Self::now(),
        }
    }

    pub fn all_tests_finished(report: &RunReport) -> Self {
        Self::AllTestsFinished {
            passed: report.passed(),
            failed: report.failed(),
            batches: report.batches.len(),
            timestamp: Self::now(),
        }
    }

    pub fn iteration_planned(ctx: IterationContext, device: Option<String>) -> Self {
        Self::IterationPlanned {
            index: ctx.index,
            repetition: ctx.repetition,
            slot: ctx.slot,
            device,
            timestamp: Self::now(),
        }
    }

    pub fn error(message: String, fatal: bool) -> Self {
        Self::Error {
            message,
            fatal,
            timestamp: Self::now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Scheduler hooks
// ─────────────────────────────────────────────────────────────────

/// Emits `fresh_start`, `batch_started` and `batch_finished`.
///
/// `all_tests_finished` is emitted by the runner once the report is known.
#[derive(Debug, Clone, Copy)]
pub struct EventListener {
    total_retries: usize,
    partition_size: usize,
    engines: usize,
}

impl EventListener {
    pub fn new(total_retries: usize, partition_size: usize, engines: usize) -> Self {
        Self {
            total_retries,
            partition_size,
            engines,
        }
    }
}

impl SchedulerListener for EventListener {
    fn on_fresh_start(&self) -> BoxFuture<'_, Result<()>> {
        HeadlessEvent::fresh_start(self.total_retries, self.partition_size, self.engines).emit();
        future::ready(Ok(())).boxed()
    }

    fn on_batch_started(&self, batch: BatchIndices) -> BoxFuture<'_, Result<()>> {
        HeadlessEvent::batch_started(batch).emit();
        future::ready(Ok(())).boxed()
    }

    fn on_batch_finished(&self, batch: BatchIndices) -> BoxFuture<'_, Result<()>> {
        HeadlessEvent::batch_finished(batch).emit();
        future::ready(Ok(())).boxed()
    }
}

/// Wraps a test body and emits `iteration_finished` after every iteration
pub struct EventBody {
    inner: Arc<dyn TestBody>,
}

impl EventBody {
    pub fn new(inner: Arc<dyn TestBody>) -> Self {
        Self { inner }
    }
}

impl TestBody for EventBody {
    fn run<'a>(
        &'a self,
        ctx: IterationContext,
        engine: &'a EngineInfo,
    ) -> BoxFuture<'a, IterationOutcome> {
        async move {
            let started = Instant::now();
            let outcome = self.inner.run(ctx, engine).await;
            let record =
                IterationRecord::new(ctx, engine.device.clone(), outcome.clone(), started.elapsed());
            HeadlessEvent::iteration_finished(record).emit();
            outcome
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn to_value(event: &HeadlessEvent) -> serde_json::Value {
        let json = serde_json::to_string(event).expect("serialization failed");
        serde_json::from_str(&json).expect("invalid JSON")
    }

    #[test]
    fn test_fresh_start_serialization() {
        let value = to_value(&HeadlessEvent::fresh_start(11, 3, 2));

        assert_eq!(value["event"], "fresh_start");
        assert_eq!(value["total_retries"], 11);
        assert_eq!(value["partition_size"], 3);
        assert_eq!(value["engines"], 2);
        assert!(value["timestamp"].is_number());
    }

    #[test]
    fn test_batch_events_serialization() {
        let batch = BatchIndices::new(9, 11);

        let started = to_value(&HeadlessEvent::batch_started(batch));
        assert_eq!(started["event"], "batch_started");
        assert_eq!(started["lo"], 9);
        assert_eq!(started["hi"], 11);

        let finished = to_value(&HeadlessEvent::batch_finished(batch));
        assert_eq!(finished["event"], "batch_finished");
        assert_eq!(finished["hi"], 11);
    }

    #[test]
    fn test_iteration_finished_is_flat() {
        let record = IterationRecord::new(
            IterationContext {
                index: 4,
                repetition: 1,
                slot: 0,
            },
            "Pixel_6_API_33",
            IterationOutcome::failed("exit 1"),
            Duration::from_millis(250),
        );
        let value = to_value(&HeadlessEvent::iteration_finished(record));

        assert_eq!(value["event"], "iteration_finished");
        assert_eq!(value["index"], 4);
        assert_eq!(value["repetition"], 1);
        assert_eq!(value["device"], "Pixel_6_API_33");
        assert_eq!(value["outcome"], "failed");
        assert_eq!(value["message"], "exit 1");
        assert_eq!(value["duration_ms"], 250);
    }

    #[test]
    fn test_all_tests_finished_counts() {
        let value = to_value(&HeadlessEvent::all_tests_finished(&RunReport::default()));
        assert_eq!(value["event"], "all_tests_finished");
        assert_eq!(value["passed"], 0);
        assert_eq!(value["failed"], 0);
        assert_eq!(value["batches"], 0);
    }

    #[test]
    fn test_error_serialization() {
        let value = to_value(&HeadlessEvent::error("Run aborted".to_string(), true));

        assert_eq!(value["event"], "error");
        assert_eq!(value["message"], "Run aborted");
        assert_eq!(value["fatal"], true);
    }

    #[test]
    fn test_iteration_planned_serialization() {
        let ctx = IterationContext {
            index: 2,
            repetition: 0,
            slot: 1,
        };
        let value = to_value(&HeadlessEvent::iteration_planned(ctx, None));
        assert_eq!(value["event"], "iteration_planned");
        assert_eq!(value["slot"], 1);
        assert!(value["device"].is_null());
    }
}
