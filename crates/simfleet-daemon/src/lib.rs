//! # simfleet-daemon - Device and Process Management
//!
//! Runs external tools, allocates ports, and drives emulators/simulators
//! through their boot-to-teardown lifecycle.
//!
//! Depends on [`simfleet_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Process Execution
//! - [`CommandLine`] - Program, arguments and environment overrides
//! - [`ProcessRunner`] - Seam between engines and the OS process launcher
//! - [`ProcessExecutor`] - `tokio::process` implementation with merged output
//!
//! ### Ports and Retries
//! - [`PortAllocator`] - Bounded linear port probe with in-process reservations
//! - [`poll_until()`], [`retry()`] - Fixed-delay bounded retry helpers
//!
//! ### Engines
//! - [`Engine`] - Lifecycle state machine for one device
//! - [`DeviceControl`] - Per-platform lifecycle commands
//! - [`IosSimulator`], [`AndroidAvd`] - Platform-specific device types
//! - [`ToolAvailability`] - Check for Android SDK, iOS tools

pub mod avds;
pub mod engine;
pub mod platform;
pub mod port;
pub mod process;
pub mod retry;
pub mod simulators;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tool_availability;

// Public API re-exports
pub use avds::{list_android_avds, AndroidAvd};
pub use engine::{Engine, EngineEnv};
pub use platform::{DeviceControl, LaunchKind};
pub use port::{find_available_port, LocalPortProbe, PortAllocator, PortLease, PortProbe};
pub use process::{
    execute_with, CommandLine, Completion, ProcessExecutor, ProcessHandle, ProcessRunner,
};
pub use retry::{poll_until, retry};
pub use simulators::{group_simulators_by_runtime, list_ios_simulators, IosSimulator, SimulatorState};
pub use tool_availability::ToolAvailability;

use simfleet_core::prelude::*;

/// Devices that can back an engine on this machine
#[derive(Debug, Default)]
pub struct DeviceInventory {
    pub android: Vec<AndroidAvd>,
    pub ios: Vec<IosSimulator>,
    /// Per-platform discovery problems, shown instead of a device list
    pub errors: Vec<String>,
}

impl DeviceInventory {
    pub fn is_empty(&self) -> bool {
        self.android.is_empty() && self.ios.is_empty()
    }
}

/// List AVDs and simulators for every platform whose tools are installed.
///
/// A failing platform is reported in [`DeviceInventory::errors`] rather than
/// failing the whole listing.
pub async fn discover_devices<R>(runner: &R, tools: &ToolAvailability) -> DeviceInventory
where
    R: ProcessRunner + Sync,
{
    let mut inventory = DeviceInventory::default();

    match tools.android_unavailable_message() {
        Some(msg) => inventory.errors.push(msg.to_string()),
        None => match list_android_avds(runner, tools).await {
            Ok(avds) => inventory.android = avds,
            Err(e) => {
                warn!("Failed to list Android AVDs: {}", e);
                inventory.errors.push(format!("Android: {}", e));
            }
        },
    }

    match tools.ios_unavailable_message() {
        Some(msg) => inventory.errors.push(msg.to_string()),
        None => match list_ios_simulators(runner).await {
            Ok(sims) => inventory.ios = sims,
            Err(e) => {
                warn!("Failed to list iOS simulators: {}", e);
                inventory.errors.push(format!("iOS: {}", e));
            }
        },
    }

    inventory
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeProcessRunner;
    use simfleet_core::ProcessResult;

    fn all_tools() -> ToolAvailability {
        ToolAvailability {
            xcrun_simctl: true,
            emulator_path: Some("/sdk/emulator/emulator".to_string()),
            adb_path: Some("/sdk/platform-tools/adb".to_string()),
        }
    }

    #[tokio::test]
    async fn test_discover_devices_lists_both_platforms() {
        let runner = FakeProcessRunner::new();
        runner.respond(
            "-list-avds",
            ProcessResult::success("Pixel_6_API_33\nNexus_5X_API_29"),
        );
        runner.respond(
            "simctl list devices",
            ProcessResult::success(
                r#"{"devices":{"com.apple.CoreSimulator.SimRuntime.iOS-17-2":[
                {"udid":"ABC","name":"iPhone 15","state":"Shutdown","isAvailable":true}]}}"#,
            ),
        );

        let inventory = discover_devices(&runner, &all_tools()).await;

        assert_eq!(inventory.android.len(), 2);
        assert_eq!(inventory.ios.len(), 1);
        assert!(inventory.errors.is_empty());
    }

    #[tokio::test]
    async fn test_discover_devices_reports_platform_failures() {
        let runner = FakeProcessRunner::new();
        runner.respond("-list-avds", ProcessResult::failure("emulator: crashed"));
        runner.respond("simctl list devices", ProcessResult::success("{}"));

        let inventory = discover_devices(&runner, &all_tools()).await;

        assert!(inventory.is_empty());
        assert_eq!(inventory.errors.len(), 2);
        assert!(inventory.errors[0].starts_with("Android"));
    }

    #[tokio::test]
    async fn test_discover_devices_without_tools() {
        let runner = FakeProcessRunner::new();
        let inventory = discover_devices(&runner, &ToolAvailability::default()).await;
        assert!(inventory.is_empty());
        assert_eq!(inventory.errors.len(), 2);
        assert!(runner.calls().is_empty());
    }
}
