//! simfleet Library
//!
//! Repeat-runs a mobile UI test suite across a pool of Android emulators and
//! iOS simulators, reporting progress as NDJSON on stdout.

pub mod headless;
pub mod suite;

// Re-export main entry points
pub use headless::runner::{run_headless, run_suite, RunOverrides};
pub use headless::HeadlessEvent;
pub use suite::CommandSuite;
