//! # simfleet-core - Core Domain Types
//!
//! Foundation crate for simfleet. Provides the error taxonomy, the domain
//! types shared by the process/engine layer and the scheduler, and logging
//! setup.
//!
//! This crate has **zero internal dependencies**.
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`RetryPolicy`] - `min_retries` / `max_retries` / fixed delay contract
//! - [`PortRange`] - Bounded, stepped range for port probing
//! - [`ProcessResult`] - Exit success plus merged output of one command
//! - [`EngineDescriptor`] - Platform, device identity and capabilities of an engine
//! - [`EngineState`] - Engine lifecycle state
//! - [`BatchIndices`] - One scheduling partition `[lo, hi)`
//! - [`IterationContext`] - Explicit index/slot context for a single iteration
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! ```rust
//! use simfleet_core::prelude::*;
//! ```

pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;

pub use error::{Error, Result, ResultExt};
pub use types::{
    BatchIndices, EngineDescriptor, EngineState, IterationContext, Platform, PortRange,
    ProcessResult, RetryPolicy,
};
