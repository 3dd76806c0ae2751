//! Domain types shared by the daemon and app layers

use std::collections::BTreeMap;
use std::ops::Range;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Platform
// ─────────────────────────────────────────────────────────────────

/// Mobile platform an engine runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    #[serde(alias = "iOS")]
    Ios,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Android => write!(f, "Android"),
            Platform::Ios => write!(f, "iOS"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Engine State
// ─────────────────────────────────────────────────────────────────

/// Lifecycle state of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Idle,
    Booting,
    Ready,
    TearingDown,
    Stopped,
}

impl EngineState {
    /// Whether the engine may be holding a port or process
    pub fn holds_resources(&self) -> bool {
        matches!(
            self,
            EngineState::Booting | EngineState::Ready | EngineState::TearingDown
        )
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "Idle"),
            EngineState::Booting => write!(f, "Booting"),
            EngineState::Ready => write!(f, "Ready"),
            EngineState::TearingDown => write!(f, "Tearing Down"),
            EngineState::Stopped => write!(f, "Stopped"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Retry Policy
// ─────────────────────────────────────────────────────────────────

/// Bounded, fixed-delay retry contract for polling and probing operations.
///
/// `min_retries` bounds operations that should basically always succeed
/// (settings changes, stop commands). `max_retries` bounds operations that are
/// expected to fail repeatedly before succeeding (boot readiness polling).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryPolicy {
    #[serde(default = "default_min_retries")]
    pub min_retries: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between attempts, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

fn default_min_retries() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    60
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_retries: default_min_retries(),
            max_retries: default_max_retries(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn new(min_retries: u32, max_retries: u32, delay: Duration) -> Result<Self> {
        let policy = Self {
            min_retries,
            max_retries,
            delay_ms: delay.as_millis() as u64,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_retries > self.max_retries {
            return Err(Error::config_invalid(format!(
                "min_retries ({}) must not exceed max_retries ({})",
                self.min_retries, self.max_retries
            )));
        }
        Ok(())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

// ─────────────────────────────────────────────────────────────────
// Port Range
// ─────────────────────────────────────────────────────────────────

/// Bounded range probed by the port allocator.
///
/// The probe starts at `port` and advances by `step` while the candidate stays
/// at or below `max_port` and the attempt number stays at or below `retries`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PortRange {
    pub port: u16,
    pub max_port: u16,
    #[serde(default = "default_step")]
    pub step: u16,
    pub retries: u32,
}

fn default_step() -> u16 {
    1
}

impl PortRange {
    pub fn new(port: u16, max_port: u16, step: u16, retries: u32) -> Result<Self> {
        let range = Self {
            port,
            max_port,
            step,
            retries,
        };
        range.validate()?;
        Ok(range)
    }

    /// Android emulator console ports: even numbers from 5554 to 5682
    pub fn android_default() -> Self {
        Self {
            port: 5554,
            max_port: 5682,
            step: 2,
            retries: 64,
        }
    }

    /// Ports handed to the iOS driver session
    pub fn ios_default() -> Self {
        Self {
            port: 8100,
            max_port: 8200,
            step: 1,
            retries: 100,
        }
    }

    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Android => Self::android_default(),
            Platform::Ios => Self::ios_default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.step == 0 {
            return Err(Error::config_invalid("port step must be greater than zero"));
        }
        if self.port > self.max_port {
            return Err(Error::config_invalid(format!(
                "port ({}) must not exceed max_port ({})",
                self.port, self.max_port
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// Process Result
// ─────────────────────────────────────────────────────────────────

/// Outcome of one external command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub exit_succeeded: bool,
    /// Merged stdout and stderr
    pub output: String,
}

impl ProcessResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            exit_succeeded: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            exit_succeeded: false,
            output: output.into(),
        }
    }

    /// Convert into the captured output, or a `ProcessExecution` error
    /// carrying that output when the command failed
    pub fn into_output(self, command: impl Into<String>) -> Result<String> {
        if self.exit_succeeded {
            Ok(self.output)
        } else {
            Err(Error::process_execution(command, self.output))
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Engine Descriptor
// ─────────────────────────────────────────────────────────────────

/// Configuration for a single engine, owned by that engine
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineDescriptor {
    pub platform: Platform,

    /// AVD name on Android, simulator UDID on iOS
    #[serde(rename = "device")]
    pub device_identity: String,

    /// Opaque capabilities forwarded to the session driver
    #[serde(default)]
    pub capabilities: BTreeMap<String, serde_json::Value>,
}

impl EngineDescriptor {
    pub fn new(platform: Platform, device_identity: impl Into<String>) -> Self {
        Self {
            platform,
            device_identity: device_identity.into(),
            capabilities: BTreeMap::new(),
        }
    }

    pub fn with_capability(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.capabilities.insert(key.into(), value);
        self
    }
}

// ─────────────────────────────────────────────────────────────────
// Batches and Iterations
// ─────────────────────────────────────────────────────────────────

/// Contiguous half-open index range `[lo, hi)` forming one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BatchIndices {
    pub lo: usize,
    pub hi: usize,
}

impl BatchIndices {
    pub fn new(lo: usize, hi: usize) -> Self {
        debug_assert!(lo <= hi);
        Self { lo, hi }
    }

    pub fn len(&self) -> usize {
        self.hi - self.lo
    }

    pub fn is_empty(&self) -> bool {
        self.lo == self.hi
    }

    pub fn range(&self) -> Range<usize> {
        self.lo..self.hi
    }

    pub fn iter(&self) -> Range<usize> {
        self.range()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.range().contains(&index)
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.range().collect()
    }
}

impl std::fmt::Display for BatchIndices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.lo, self.hi)
    }
}

/// Explicit per-iteration context passed to every hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct IterationContext {
    /// Retry index in `[0, total_retries)`
    pub index: usize,
    /// Which consumption of `index` this is (0-based)
    pub repetition: usize,
    /// Engine slot backing this iteration
    pub slot: usize,
}
