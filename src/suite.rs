//! Suite command test body
//!
//! Runs the configured shell command once per iteration. The command learns
//! which iteration and engine it is running against through `SIMFLEET_*`
//! environment variables.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use tracing::{debug, warn};

use simfleet_app::{EngineInfo, IterationOutcome, TestBody};
use simfleet_core::prelude::*;
use simfleet_core::IterationContext;
use simfleet_daemon::{CommandLine, ProcessExecutor, ProcessRunner};

/// Number of trailing output lines kept in a failure message
const FAILURE_TAIL_LINES: usize = 20;

pub const ENV_INDEX: &str = "SIMFLEET_INDEX";
pub const ENV_REPETITION: &str = "SIMFLEET_REPETITION";
pub const ENV_DEVICE: &str = "SIMFLEET_DEVICE";
pub const ENV_PORT: &str = "SIMFLEET_PORT";
pub const ENV_PLATFORM: &str = "SIMFLEET_PLATFORM";

/// Test body running an external command per iteration
#[derive(Debug)]
pub struct CommandSuite<R = ProcessExecutor> {
    command: CommandLine,
    runner: Arc<R>,
}

impl<R> CommandSuite<R>
where
    R: ProcessRunner + Send + Sync + 'static,
{
    /// Parse `command` into a suite; an empty or unbalanced command is invalid
    pub fn new(command: &str, runner: Arc<R>) -> Result<Self> {
        let command = CommandLine::parse(command).ok_or_else(|| {
            Error::config_invalid(format!("suite.command is not a runnable command: {:?}", command))
        })?;
        Ok(Self { command, runner })
    }

    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    /// The command for one iteration, with its environment filled in
    pub fn command_for(&self, ctx: IterationContext, engine: &EngineInfo) -> CommandLine {
        let device = engine.serial.as_deref().unwrap_or(&engine.device);
        let mut cmd = self
            .command
            .clone()
            .with_env(ENV_INDEX, ctx.index.to_string())
            .with_env(ENV_REPETITION, ctx.repetition.to_string())
            .with_env(ENV_DEVICE, device)
            .with_env(ENV_PLATFORM, engine.platform.to_string());
        if let Some(port) = engine.port {
            cmd = cmd.with_env(ENV_PORT, port.to_string());
        }
        cmd
    }
}

impl<R> TestBody for CommandSuite<R>
where
    R: ProcessRunner + Send + Sync + 'static,
{
    fn run<'a>(
        &'a self,
        ctx: IterationContext,
        engine: &'a EngineInfo,
    ) -> BoxFuture<'a, IterationOutcome> {
        async move {
            let cmd = self.command_for(ctx, engine);
            debug!(
                "Iteration {}.{} on slot {}: {}",
                ctx.index, ctx.repetition, ctx.slot, cmd
            );

            match self.runner.run(&cmd).await {
                Ok(result) if result.exit_succeeded => IterationOutcome::Passed,
                Ok(result) => {
                    warn!(
                        "Iteration {}.{} failed on {}",
                        ctx.index, ctx.repetition, engine.device
                    );
                    IterationOutcome::failed(failure_message(&result.output))
                }
                Err(e) => {
                    warn!("Suite command could not run: {}", e);
                    IterationOutcome::failed(e.to_string())
                }
            }
        }
        .boxed()
    }
}

/// Last lines of the suite output, or a stock message when it printed nothing
fn failure_message(output: &str) -> String {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return "suite command exited with failure".to_string();
    }
    let start = lines.len().saturating_sub(FAILURE_TAIL_LINES);
    lines[start..].join("\n")
}
