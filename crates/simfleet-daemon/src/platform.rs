//! Per-platform device control
//!
//! [`DeviceControl`] is resolved once from an [`EngineDescriptor`] and tells
//! the engine which command lines to run at each lifecycle step.

use simfleet_core::{EngineDescriptor, Platform};

use crate::avds::{self, AndroidAvd};
use crate::process::CommandLine;
use crate::simulators::{self, IosSimulator, SimulatorState};
use crate::ToolAvailability;

/// Capability name used to give an iOS simulator a display name
const DEVICE_NAME_CAPABILITY: &str = "deviceName";

/// How the launch command behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchKind {
    /// Long-running process owned by the engine (Android emulator)
    Background,
    /// Command that returns once the boot was requested (`simctl boot`)
    Blocking,
}

/// Platform-specific lifecycle commands for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceControl {
    Android(AndroidAvd),
    Ios(IosSimulator),
}

impl DeviceControl {
    pub fn resolve(descriptor: &EngineDescriptor) -> Self {
        match descriptor.platform {
            Platform::Android => {
                DeviceControl::Android(AndroidAvd::from_name(&descriptor.device_identity))
            }
            Platform::Ios => {
                let name = descriptor
                    .capabilities
                    .get(DEVICE_NAME_CAPABILITY)
                    .and_then(|v| v.as_str());
                DeviceControl::Ios(IosSimulator::from_udid(&descriptor.device_identity, name))
            }
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            DeviceControl::Android(_) => Platform::Android,
            DeviceControl::Ios(_) => Platform::Ios,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            DeviceControl::Android(a) => &a.display_name,
            DeviceControl::Ios(s) => &s.name,
        }
    }

    /// Identifier the automation driver uses to reach the running device
    pub fn serial(&self, port: u16) -> String {
        match self {
            DeviceControl::Android(_) => AndroidAvd::serial(port),
            DeviceControl::Ios(s) => s.udid.clone(),
        }
    }

    pub fn launch_kind(&self) -> LaunchKind {
        match self {
            DeviceControl::Android(_) => LaunchKind::Background,
            DeviceControl::Ios(_) => LaunchKind::Blocking,
        }
    }

    pub fn launch_command(&self, tools: &ToolAvailability, port: u16) -> CommandLine {
        match self {
            DeviceControl::Android(a) => a.launch_command(tools, port),
            DeviceControl::Ios(s) => s.boot_command(),
        }
    }

    pub fn readiness_command(&self, tools: &ToolAvailability, port: u16) -> CommandLine {
        match self {
            DeviceControl::Android(_) => AndroidAvd::boot_completed_command(tools, port),
            DeviceControl::Ios(_) => IosSimulator::list_command(),
        }
    }

    /// Evaluate the output of a successful readiness command
    pub fn is_ready(&self, output: &str) -> bool {
        match self {
            DeviceControl::Android(_) => avds::is_boot_completed(output),
            DeviceControl::Ios(s) => matches!(
                simulators::simulator_state(output, &s.udid),
                Ok(Some(SimulatorState::Booted))
            ),
        }
    }

    pub fn stop_command(&self, tools: &ToolAvailability, port: u16) -> CommandLine {
        match self {
            DeviceControl::Android(_) => AndroidAvd::kill_command(tools, port),
            DeviceControl::Ios(s) => s.shutdown_command(),
        }
    }

    pub fn settings_commands(&self, tools: &ToolAvailability, port: u16) -> Vec<CommandLine> {
        match self {
            DeviceControl::Android(_) => AndroidAvd::settings_commands(tools, port),
            DeviceControl::Ios(s) => s.settings_commands(),
        }
    }

    /// Whether a failed launch/stop only says the device is already there
    pub fn is_benign_failure(&self, output: &str) -> bool {
        match self {
            DeviceControl::Android(_) => false,
            DeviceControl::Ios(_) => simulators::is_already_in_state(output),
        }
    }
}
