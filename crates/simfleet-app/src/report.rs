//! Test bodies and run reports

use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;

use simfleet_core::{BatchIndices, IterationContext};

use crate::registry::EngineInfo;

/// Result of one iteration of the suite
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IterationOutcome {
    Passed,
    Failed { message: String },
}

impl IterationOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        IterationOutcome::Failed {
            message: message.into(),
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, IterationOutcome::Passed)
    }
}

/// The work done for one iteration against a locked, ready engine.
///
/// Test failures are reported through [`IterationOutcome`], never as errors:
/// they do not stop the run.
pub trait TestBody: Send + Sync {
    fn run<'a>(
        &'a self,
        ctx: IterationContext,
        engine: &'a EngineInfo,
    ) -> BoxFuture<'a, IterationOutcome>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationRecord {
    #[serde(flatten)]
    pub context: IterationContext,
    pub device: String,
    #[serde(flatten)]
    pub outcome: IterationOutcome,
    pub duration_ms: u64,
}

impl IterationRecord {
    pub fn new(
        context: IterationContext,
        device: impl Into<String>,
        outcome: IterationOutcome,
        duration: Duration,
    ) -> Self {
        Self {
            context,
            device: device.into(),
            outcome,
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Everything that happened during one scheduler run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Batches that ran to completion, in order
    pub batches: Vec<BatchIndices>,
    /// One record per iteration, ordered by index then repetition
    pub iterations: Vec<IterationRecord>,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.iterations
            .iter()
            .filter(|r| r.outcome.is_passed())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.iterations.len() - self.passed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub(crate) fn finish_batch(&mut self, batch: BatchIndices, mut records: Vec<IterationRecord>) {
        records.sort_by_key(|r| (r.context.index, r.context.repetition));
        self.iterations.extend(records);
        self.batches.push(batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, outcome: IterationOutcome) -> IterationRecord {
        IterationRecord::new(
            IterationContext {
                index,
                repetition: 0,
                slot: 0,
            },
            "emulator-5554",
            outcome,
            Duration::from_millis(1500),
        )
    }

    #[test]
    fn test_counts() {
        let mut report = RunReport::default();
        report.finish_batch(
            BatchIndices::new(0, 3),
            vec![
                record(2, IterationOutcome::Passed),
                record(0, IterationOutcome::failed("assertion failed")),
                record(1, IterationOutcome::Passed),
            ],
        );

        assert_eq!(report.passed(), 2);
        assert_eq!(report.failed(), 1);
        assert!(!report.is_success());
        let order: Vec<usize> = report.iterations.iter().map(|r| r.context.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_record_serializes_flat() {
        let json = serde_json::to_value(record(4, IterationOutcome::failed("boom"))).unwrap();
        assert_eq!(json["index"], 4);
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["message"], "boom");
        assert_eq!(json["duration_ms"], 1500);
    }

    #[test]
    fn test_empty_report_is_success() {
        assert!(RunReport::default().is_success());
    }
}
