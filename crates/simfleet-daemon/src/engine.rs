//! Engine lifecycle state machine
//!
//! ```text
//! Idle ──boot──▶ Booting ──ready──▶ Ready ──teardown──▶ TearingDown ──▶ Stopped
//!   ▲               │ launch failed / boot timeout               │
//!   │               └────────────── cleanup ────────────────────▶│
//!   └──────────────────────────── reset ◀────────────────────────┘
//! ```
//!
//! The port is acquired before anything is launched: if no port is free the
//! engine stays `Idle`. Every failure after the port was acquired runs the
//! same best-effort cleanup as `teardown`, so the port lease and process
//! handle are always released.

use std::sync::Arc;

use simfleet_core::prelude::*;
use simfleet_core::{EngineDescriptor, EngineState, Platform, PortRange, RetryPolicy};

use crate::platform::{DeviceControl, LaunchKind};
use crate::port::{PortAllocator, PortLease};
use crate::process::{CommandLine, ProcessExecutor, ProcessHandle, ProcessRunner};
use crate::retry::{poll_until, retry};
use crate::ToolAvailability;

/// Shared environment every engine of a run is built with
#[derive(Debug)]
pub struct EngineEnv<R = ProcessExecutor> {
    pub runner: Arc<R>,
    pub ports: Arc<PortAllocator>,
    pub tools: Arc<ToolAvailability>,
    pub retry: RetryPolicy,
}

impl<R> Clone for EngineEnv<R> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            ports: Arc::clone(&self.ports),
            tools: Arc::clone(&self.tools),
            retry: self.retry,
        }
    }
}

/// A device/simulator-backed engine and the resources it owns
#[derive(Debug)]
pub struct Engine<R = ProcessExecutor> {
    descriptor: EngineDescriptor,
    control: DeviceControl,
    port_range: PortRange,
    env: EngineEnv<R>,
    state: EngineState,
    lease: Option<PortLease>,
    process: Option<ProcessHandle>,
}

impl<R> Engine<R>
where
    R: ProcessRunner + Send + Sync + 'static,
{
    pub fn new(descriptor: EngineDescriptor, port_range: PortRange, env: EngineEnv<R>) -> Self {
        let control = DeviceControl::resolve(&descriptor);
        Self {
            descriptor,
            control,
            port_range,
            env,
            state: EngineState::Idle,
            lease: None,
            process: None,
        }
    }

    pub fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    pub fn device(&self) -> &str {
        &self.descriptor.device_identity
    }

    pub fn platform(&self) -> Platform {
        self.descriptor.platform
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Port leased for the current boot-teardown cycle
    pub fn port(&self) -> Option<u16> {
        self.lease.as_ref().map(PortLease::port)
    }

    /// Identifier the session driver should connect to, once booted
    pub fn serial(&self) -> Option<String> {
        self.port().map(|port| self.control.serial(port))
    }

    fn transition(&mut self, next: EngineState) {
        debug!("{}: {} -> {}", self.device(), self.state, next);
        self.state = next;
    }

    fn state_error(&self, expected: EngineState) -> Error {
        Error::EngineState {
            device: self.device().to_string(),
            expected: expected.to_string(),
            actual: self.state.to_string(),
        }
    }

    /// Boot the device and wait until it reports ready.
    ///
    /// Only valid from `Idle`. Port exhaustion fails immediately and leaves the
    /// engine `Idle`. Launch failure or readiness timeout leaves it `Stopped`
    /// with all resources released.
    #[instrument(skip(self), fields(device = %self.descriptor.device_identity))]
    pub async fn boot(&mut self) -> Result<()> {
        if self.state != EngineState::Idle {
            return Err(self.state_error(EngineState::Idle));
        }

        let lease = self.env.ports.acquire(&self.port_range).await?;
        let port = lease.port();
        self.lease = Some(lease);
        self.transition(EngineState::Booting);
        info!(
            "Booting {} {} on port {}",
            self.platform(),
            self.control.display_name(),
            port
        );

        if let Err(e) = self.launch(port).await {
            error!("Launch of {} failed: {}", self.device(), e);
            self.cleanup().await;
            return Err(e);
        }

        let attempts = self.env.retry.max_retries;
        let ready = {
            let this = &*self;
            poll_until(attempts, self.env.retry.delay(), move || this.probe_ready(port)).await
        };

        if !ready {
            warn!(
                "{} not ready after {} attempts, tearing down",
                self.device(),
                attempts
            );
            self.cleanup().await;
            return Err(Error::EngineBootTimeout {
                device: self.device().to_string(),
                attempts,
            });
        }

        self.transition(EngineState::Ready);
        info!("{} is ready on port {}", self.device(), port);
        Ok(())
    }

    async fn launch(&mut self, port: u16) -> Result<()> {
        let cmd = self.control.launch_command(&self.env.tools, port);
        match self.control.launch_kind() {
            LaunchKind::Background => {
                let handle = self.env.runner.launch(&cmd).await?;
                self.process = Some(handle);
            }
            LaunchKind::Blocking => {
                let result = self.env.runner.run(&cmd).await?;
                if !result.exit_succeeded && !self.control.is_benign_failure(&result.output) {
                    return Err(Error::process_execution(cmd.to_string(), result.output));
                }
            }
        }
        Ok(())
    }

    async fn probe_ready(&self, port: u16) -> Result<bool> {
        let cmd = self.control.readiness_command(&self.env.tools, port);
        let result = self.env.runner.run(&cmd).await?;
        Ok(result.exit_succeeded && self.control.is_ready(&result.output))
    }

    /// Apply the platform's test settings (e.g. disable animations).
    ///
    /// Each command gets `min_retries` retries. A failure is returned as
    /// `EngineSettings`; the engine stays `Ready`.
    pub async fn apply_settings(&mut self) -> Result<()> {
        if self.state != EngineState::Ready {
            return Err(self.state_error(EngineState::Ready));
        }
        let Some(port) = self.port() else {
            return Err(self.state_error(EngineState::Ready));
        };

        for cmd in self.control.settings_commands(&self.env.tools, port) {
            if let Err(e) = self.run_with_min_retries(&cmd).await {
                warn!("Settings command failed on {}: {}", self.device(), e);
                return Err(Error::engine_settings(self.device(), e.to_string()));
            }
        }

        debug!("Applied settings on {}", self.device());
        Ok(())
    }

    async fn run_with_min_retries(&self, cmd: &CommandLine) -> Result<String> {
        let runner = &self.env.runner;
        let control = &self.control;
        retry(self.env.retry.min_retries, self.env.retry.delay(), move || async move {
            let result = runner.run(cmd).await?;
            if result.exit_succeeded || control.is_benign_failure(&result.output) {
                Ok(result.output)
            } else {
                Err(Error::process_execution(cmd.to_string(), result.output))
            }
        })
        .await
    }

    /// Stop the device and release its port and process.
    ///
    /// A no-op on `Idle` and `Stopped` engines. Resources are released and the
    /// engine ends `Stopped` even when the stop command fails; that failure is
    /// returned as `EngineTeardown`.
    #[instrument(skip(self), fields(device = %self.descriptor.device_identity))]
    pub async fn teardown(&mut self) -> Result<()> {
        match self.state {
            EngineState::Idle | EngineState::Stopped => {
                debug!("{} already {}, nothing to tear down", self.device(), self.state);
                return Ok(());
            }
            _ => {}
        }

        match self.cleanup().await {
            Some(message) => Err(Error::engine_teardown(self.device(), message)),
            None => {
                info!("{} stopped", self.device());
                Ok(())
            }
        }
    }

    /// Best-effort stop. Returns a description of what failed, if anything.
    async fn cleanup(&mut self) -> Option<String> {
        self.transition(EngineState::TearingDown);
        let mut failures = Vec::new();

        if let Some(port) = self.port() {
            let cmd = self.control.stop_command(&self.env.tools, port);
            if let Err(e) = self.run_with_min_retries(&cmd).await {
                warn!("Stop command failed for {}: {}", self.device(), e);
                failures.push(e.to_string());
            }
        }

        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.kill().await {
                warn!("Failed to kill {}: {}", process.label(), e);
                failures.push(e.to_string());
            }
        }

        if let Some(lease) = self.lease.take() {
            lease.release();
        }

        self.transition(EngineState::Stopped);

        if failures.is_empty() {
            None
        } else {
            Some(failures.join("; "))
        }
    }

    /// Make a `Stopped` engine bootable again
    pub fn reset(&mut self) -> Result<()> {
        match self.state {
            EngineState::Stopped => {
                self.transition(EngineState::Idle);
                Ok(())
            }
            EngineState::Idle => Ok(()),
            _ => Err(self.state_error(EngineState::Stopped)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ready_runner, test_env, FakePortProbe, FakeProcessRunner};
    use simfleet_core::ProcessResult;
    use tokio_test::{assert_err, assert_ok};

    fn android_engine(runner: FakeProcessRunner, occupied: &[u16]) -> Engine<FakeProcessRunner> {
        let env = test_env(runner, FakePortProbe::occupied(occupied));
        Engine::new(
            EngineDescriptor::new(Platform::Android, "Pixel_6_API_33"),
            PortRange::new(5554, 5560, 2, 3).unwrap(),
            env,
        )
    }

    #[tokio::test]
    async fn test_boot_reaches_ready() {
        let runner = ready_runner();
        let mut engine = android_engine(runner.clone(), &[5554]);

        engine.boot().await.unwrap();

        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.port(), Some(5556));
        assert_eq!(engine.serial().as_deref(), Some("emulator-5556"));
        assert_eq!(
            runner.launched(),
            vec!["emulator -avd Pixel_6_API_33 -port 5556 -no-snapshot-load -no-boot-anim"]
        );
    }

    #[tokio::test]
    async fn test_boot_polls_until_ready() {
        let runner = FakeProcessRunner::new();
        runner.respond_sequence(
            "getprop sys.boot_completed",
            vec![
                ProcessResult::failure("error: device offline"),
                ProcessResult::success(""),
                ProcessResult::success("1"),
            ],
        );
        let mut engine = android_engine(runner.clone(), &[]);

        engine.boot().await.unwrap();

        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(runner.count_matching("getprop"), 3);
    }

    #[tokio::test]
    async fn test_port_exhaustion_never_launches() {
        let runner = ready_runner();
        let mut engine = android_engine(runner.clone(), &[5554, 5556, 5558, 5560]);

        let err = engine.boot().await.unwrap_err();

        assert!(matches!(err, Error::PortUnavailable { .. }));
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(runner.calls().is_empty());
        assert!(runner.launched().is_empty());
    }

    #[tokio::test]
    async fn test_boot_timeout_stops_and_releases() {
        let runner = FakeProcessRunner::new();
        runner.respond("getprop sys.boot_completed", ProcessResult::success("0"));
        let mut engine = android_engine(runner.clone(), &[]);
        let ports = Arc::clone(&engine.env.ports);

        let err = engine.boot().await.unwrap_err();

        assert!(matches!(
            err,
            Error::EngineBootTimeout { attempts: 5, .. }
        ));
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(engine.port(), None);
        assert!(ports.reserved_ports().is_empty());
        assert_eq!(runner.count_matching("getprop"), 5);
        assert_eq!(runner.count_matching("emu kill"), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_stops_engine() {
        let runner = ready_runner();
        runner.fail_launch("emulator -avd");
        let mut engine = android_engine(runner.clone(), &[]);

        let err = engine.boot().await.unwrap_err();

        assert!(matches!(err, Error::ProcessSpawn { .. }));
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.env.ports.reserved_ports().is_empty());
        assert_eq!(runner.count_matching("getprop"), 0);
    }

    #[tokio::test]
    async fn test_boot_requires_idle() {
        let mut engine = android_engine(ready_runner(), &[]);
        engine.boot().await.unwrap();

        let err = engine.boot().await.unwrap_err();
        assert!(matches!(err, Error::EngineState { .. }));
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn test_teardown_twice_is_noop() {
        let runner = ready_runner();
        let mut engine = android_engine(runner.clone(), &[]);
        engine.boot().await.unwrap();

        assert_ok!(engine.teardown().await);
        assert_eq!(engine.state(), EngineState::Stopped);

        assert_ok!(engine.teardown().await);
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(runner.count_matching("emu kill"), 1);
    }

    #[tokio::test]
    async fn test_teardown_of_idle_engine_is_noop() {
        let runner = ready_runner();
        let mut engine = android_engine(runner.clone(), &[]);
        engine.teardown().await.unwrap();
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_failure_still_releases_resources() {
        let runner = ready_runner();
        runner.respond("emu kill", ProcessResult::failure("error: device offline"));
        let mut engine = android_engine(runner.clone(), &[]);
        engine.boot().await.unwrap();

        let err = engine.teardown().await.unwrap_err();

        assert!(matches!(err, Error::EngineTeardown { .. }));
        assert!(err.is_recoverable());
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.env.ports.reserved_ports().is_empty());
        // one attempt plus min_retries
        assert_eq!(runner.count_matching("emu kill"), 3);
    }

    #[tokio::test]
    async fn test_apply_settings_uses_min_retries() {
        let runner = ready_runner();
        runner.respond_sequence(
            "window_animation_scale",
            vec![
                ProcessResult::failure("cmd: Can't find service: settings"),
                ProcessResult::success(""),
            ],
        );
        let mut engine = android_engine(runner.clone(), &[]);
        engine.boot().await.unwrap();

        engine.apply_settings().await.unwrap();
        assert_eq!(runner.count_matching("window_animation_scale"), 2);
        assert_eq!(runner.count_matching("animator_duration_scale"), 1);
    }

    #[tokio::test]
    async fn test_apply_settings_failure_is_reported() {
        let runner = ready_runner();
        runner.respond(
            "transition_animation_scale",
            ProcessResult::failure("Security exception"),
        );
        let mut engine = android_engine(runner.clone(), &[]);
        engine.boot().await.unwrap();

        let err = engine.apply_settings().await.unwrap_err();
        assert!(matches!(err, Error::EngineSettings { .. }));
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn test_apply_settings_requires_ready() {
        let mut engine = android_engine(ready_runner(), &[]);
        assert!(matches!(
            engine.apply_settings().await,
            Err(Error::EngineState { .. })
        ));
    }

    #[tokio::test]
    async fn test_reset_allows_reboot_on_same_range() {
        let runner = ready_runner();
        let mut engine = android_engine(runner.clone(), &[]);

        assert_ok!(engine.boot().await);
        assert_err!(engine.reset());
        engine.teardown().await.unwrap();
        engine.reset().unwrap();
        assert_eq!(engine.state(), EngineState::Idle);

        engine.boot().await.unwrap();
        assert_eq!(engine.port(), Some(5554));
        assert_eq!(runner.launched().len(), 2);
    }

    #[tokio::test]
    async fn test_ios_boot_tolerates_already_booted() {
        let runner = FakeProcessRunner::new();
        runner.respond(
            "simctl boot",
            ProcessResult::failure("Unable to boot device in current state: Booted"),
        );
        runner.respond(
            "simctl list devices",
            ProcessResult::success(
                r#"{"devices":{"com.apple.CoreSimulator.SimRuntime.iOS-17-2":[
                {"udid":"ABC-123","name":"iPhone 15","state":"Booted","isAvailable":true}]}}"#,
            ),
        );
        let env = test_env(runner.clone(), FakePortProbe::occupied(&[]));
        let mut engine = Engine::new(
            EngineDescriptor::new(Platform::Ios, "ABC-123"),
            PortRange::ios_default(),
            env,
        );

        engine.boot().await.unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.port(), Some(8100));
        assert!(runner.launched().is_empty());

        engine.teardown().await.unwrap();
        assert_eq!(runner.count_matching("simctl shutdown ABC-123"), 1);
    }

    #[tokio::test]
    async fn test_ios_boot_failure_is_process_error() {
        let runner = FakeProcessRunner::new();
        runner.respond("simctl boot", ProcessResult::failure("Invalid device: ABC-123"));
        let env = test_env(runner.clone(), FakePortProbe::occupied(&[]));
        let mut engine = Engine::new(
            EngineDescriptor::new(Platform::Ios, "ABC-123"),
            PortRange::ios_default(),
            env,
        );

        let err = engine.boot().await.unwrap_err();
        assert_eq!(err.process_output(), Some("Invalid device: ABC-123"));
        assert_eq!(engine.state(), EngineState::Stopped);
    }
}
