//! Error taxonomy shared by every simfleet crate

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors organized by the layer that raises them
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    // ─────────────────────────────────────────────────────────────
    // Process Errors
    // ─────────────────────────────────────────────────────────────
    /// The command ran but exited unsuccessfully. `output` is the merged
    /// stdout/stderr buffer.
    #[error("Command `{command}` failed: {output}")]
    ProcessExecution { command: String, output: String },

    #[error("Failed to start `{command}`: {reason}")]
    ProcessSpawn { command: String, reason: String },

    #[error("Required tool not available: {tool}")]
    ToolUnavailable { tool: String },

    // ─────────────────────────────────────────────────────────────
    // Port Errors
    // ─────────────────────────────────────────────────────────────
    #[error("No available port in {port}..={max_port} after {attempts} attempts")]
    PortUnavailable {
        port: u16,
        max_port: u16,
        attempts: u32,
    },

    // ─────────────────────────────────────────────────────────────
    // Engine Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Engine {device} did not become ready after {attempts} attempts")]
    EngineBootTimeout { device: String, attempts: u32 },

    #[error("Failed to apply settings on {device}: {message}")]
    EngineSettings { device: String, message: String },

    #[error("Teardown of {device} failed: {message}")]
    EngineTeardown { device: String, message: String },

    #[error("Engine {device} is {actual}, expected {expected}")]
    EngineState {
        device: String,
        expected: String,
        actual: String,
    },

    #[error("No engine registered for slot {slot}")]
    EngineNotFound { slot: usize },

    #[error("Session driver error: {message}")]
    Driver { message: String },

    // ─────────────────────────────────────────────────────────────
    // Scheduler Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Run aborted during {stage}: {message}")]
    SchedulerAbort { stage: String, message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn process_execution(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ProcessExecution {
            command: command.into(),
            output: output.into(),
        }
    }

    pub fn process_spawn(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProcessSpawn {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn tool_unavailable(tool: impl Into<String>) -> Self {
        Self::ToolUnavailable { tool: tool.into() }
    }

    pub fn engine_settings(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EngineSettings {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn engine_teardown(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EngineTeardown {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
        }
    }

    pub fn scheduler_abort(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchedulerAbort {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Captured output of a failed command, if this error carries one
    pub fn process_output(&self) -> Option<&str> {
        match self {
            Error::ProcessExecution { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Check if this is a recoverable error
    ///
    /// Recoverable errors are logged and the run continues.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::EngineTeardown { .. } | Error::EngineSettings { .. } | Error::Driver { .. }
        )
    }

    /// Check if this error should end the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SchedulerAbort { .. }
                | Error::PortUnavailable { .. }
                | Error::EngineBootTimeout { .. }
                | Error::ToolUnavailable { .. }
                | Error::ConfigInvalid { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions (for use with color-eyre)
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
