//! simfleet-app - Scheduling and orchestration for simfleet
//!
//! This crate partitions a retry count into batches, drives each batch through
//! the engine registry, and notifies listeners at batch boundaries. It also
//! loads the project configuration.

pub mod config;
pub mod consumer;
pub mod listener;
pub mod registry;
pub mod report;
pub mod scheduler;

// Re-export primary types
pub use consumer::{ConsumeOnce, ConsumeTimes, IndexConsumer};
pub use listener::{EngineLifecycleListener, Notification, RecordingListener, SchedulerListener};
pub use registry::{EngineInfo, EngineRegistry, NoopDriver, SessionDriver, SlotGuard};
pub use report::{IterationOutcome, IterationRecord, RunReport, TestBody};
pub use scheduler::RepeatScheduler;

// Re-export daemon types for the binary
pub use simfleet_daemon::{EngineEnv, PortAllocator, ProcessExecutor, ToolAvailability};
