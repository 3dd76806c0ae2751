//! Test utilities for engine types
//!
//! Scripted process runner and port probe so engines can be driven through
//! their whole lifecycle without an SDK installed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use simfleet_core::prelude::*;
use simfleet_core::{EngineDescriptor, Platform, ProcessResult, RetryPolicy};

use crate::engine::EngineEnv;
use crate::port::{PortAllocator, PortProbe};
use crate::process::{CommandLine, ProcessHandle, ProcessRunner};
use crate::ToolAvailability;

#[derive(Debug)]
struct Rule {
    pattern: String,
    responses: Vec<ProcessResult>,
    next: usize,
}

impl Rule {
    /// Walk the scripted responses, repeating the last one once exhausted
    fn next_response(&mut self) -> ProcessResult {
        let last = self.responses.len().saturating_sub(1);
        let response = self.responses[self.next.min(last)].clone();
        self.next += 1;
        response
    }
}

#[derive(Debug, Default)]
struct FakeState {
    rules: Vec<Rule>,
    launch_failures: Vec<String>,
    calls: Vec<String>,
    commands: Vec<CommandLine>,
    launched: Vec<String>,
}

/// A fake process runner that:
/// - answers `run` from rules matched by substring of the rendered command
/// - succeeds with empty output when no rule matches
/// - records every command it was asked to run or launch
#[derive(Debug, Clone, Default)]
pub struct FakeProcessRunner {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Always answer commands containing `pattern` with `result`
    pub fn respond(&self, pattern: &str, result: ProcessResult) {
        self.respond_sequence(pattern, vec![result]);
    }

    /// Answer successive matching commands with `results` in order
    pub fn respond_sequence(&self, pattern: &str, results: Vec<ProcessResult>) {
        assert!(!results.is_empty(), "a rule needs at least one response");
        self.lock().rules.push(Rule {
            pattern: pattern.to_string(),
            responses: results,
            next: 0,
        });
    }

    /// Make `launch` fail for commands containing `pattern`
    pub fn fail_launch(&self, pattern: &str) {
        self.lock().launch_failures.push(pattern.to_string());
    }

    /// Every command passed to `run`, rendered
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Every command passed to `run`, including its environment
    pub fn commands(&self) -> Vec<CommandLine> {
        self.lock().commands.clone()
    }

    /// Every command passed to `launch`, rendered
    pub fn launched(&self) -> Vec<String> {
        self.lock().launched.clone()
    }

    pub fn count_matching(&self, pattern: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }
}

impl ProcessRunner for FakeProcessRunner {
    async fn run(&self, cmd: &CommandLine) -> Result<ProcessResult> {
        let rendered = cmd.to_string();
        let mut state = self.lock();
        state.calls.push(rendered.clone());
        state.commands.push(cmd.clone());

        let response = state
            .rules
            .iter_mut()
            .find(|rule| rendered.contains(&rule.pattern))
            .map(Rule::next_response)
            .unwrap_or_else(|| ProcessResult::success(""));
        Ok(response)
    }

    async fn launch(&self, cmd: &CommandLine) -> Result<ProcessHandle> {
        let rendered = cmd.to_string();
        let mut state = self.lock();

        if state.launch_failures.iter().any(|p| rendered.contains(p)) {
            return Err(Error::process_spawn(rendered, "scripted launch failure"));
        }

        state.launched.push(rendered.clone());
        Ok(ProcessHandle::detached(rendered))
    }
}

/// Port probe reporting a fixed set of ports as bound
#[derive(Debug, Clone, Default)]
pub struct FakePortProbe {
    occupied: HashSet<u16>,
}

impl FakePortProbe {
    pub fn occupied(ports: &[u16]) -> Self {
        Self {
            occupied: ports.iter().copied().collect(),
        }
    }
}

impl PortProbe for FakePortProbe {
    fn is_bound(&self, port: u16) -> bool {
        self.occupied.contains(&port)
    }
}

/// Retry policy with no delay: 2 min retries, 5 max retries
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        min_retries: 2,
        max_retries: 5,
        delay_ms: 0,
    }
}

/// Engine environment backed by the given fakes
pub fn test_env(runner: FakeProcessRunner, probe: FakePortProbe) -> EngineEnv<FakeProcessRunner> {
    EngineEnv {
        runner: Arc::new(runner),
        ports: Arc::new(PortAllocator::new(probe)),
        tools: Arc::new(ToolAvailability::default()),
        retry: fast_retry_policy(),
    }
}

pub fn android_descriptor(avd: &str) -> EngineDescriptor {
    EngineDescriptor::new(Platform::Android, avd)
}

pub fn ios_descriptor(udid: &str) -> EngineDescriptor {
    EngineDescriptor::new(Platform::Ios, udid)
}

/// Runner reporting every Android emulator booted on the first probe
pub fn ready_runner() -> FakeProcessRunner {
    let runner = FakeProcessRunner::new();
    runner.respond("getprop sys.boot_completed", ProcessResult::success("1"));
    runner
}
