//! iOS simulator commands using `xcrun simctl`
//!
//! Discovery parses `xcrun simctl list devices -j`. The same JSON is used as
//! the readiness probe: a simulator is ready once its state is `Booted`.

use crate::process::{CommandLine, ProcessRunner};
use serde::Deserialize;
use simfleet_core::prelude::*;
use std::collections::{BTreeMap, HashMap};

/// A bootable iOS simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IosSimulator {
    pub udid: String,
    pub name: String,
    pub runtime: String, // e.g., "iOS 17.2"
    pub state: SimulatorState,
    pub device_type: String, // e.g., "iPhone 15 Pro"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorState {
    Shutdown,
    Booted,
    Booting,
    Unknown,
}

impl From<&str> for SimulatorState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "shutdown" => SimulatorState::Shutdown,
            "booted" => SimulatorState::Booted,
            "booting" => SimulatorState::Booting,
            _ => SimulatorState::Unknown,
        }
    }
}

/// JSON output from `xcrun simctl list devices -j`
#[derive(Debug, Deserialize)]
struct SimctlOutput {
    devices: HashMap<String, Vec<SimctlDevice>>,
}

#[derive(Debug, Deserialize)]
struct SimctlDevice {
    #[serde(rename = "udid")]
    udid: String,
    name: String,
    state: String,
    #[serde(rename = "isAvailable")]
    is_available: Option<bool>,
}

impl IosSimulator {
    /// Simulator known only by UDID, as configured for an engine
    pub fn from_udid(udid: impl Into<String>, name: Option<&str>) -> Self {
        let udid = udid.into();
        let name = name.map(str::to_string).unwrap_or_else(|| udid.clone());
        Self {
            device_type: name.clone(),
            name,
            udid,
            runtime: "unknown".to_string(),
            state: SimulatorState::Unknown,
        }
    }

    fn simctl<I, S>(args: I) -> CommandLine
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all = vec!["simctl".to_string()];
        all.extend(args.into_iter().map(Into::into));
        CommandLine::new("xcrun", all)
    }

    pub fn boot_command(&self) -> CommandLine {
        Self::simctl(["boot", self.udid.as_str()])
    }

    pub fn list_command() -> CommandLine {
        Self::simctl(["list", "devices", "-j"])
    }

    pub fn shutdown_command(&self) -> CommandLine {
        Self::simctl(["shutdown", self.udid.as_str()])
    }

    /// Turn on Reduce Motion so UI tests don't wait on animations
    pub fn settings_commands(&self) -> Vec<CommandLine> {
        vec![Self::simctl([
            "spawn",
            self.udid.as_str(),
            "defaults",
            "write",
            "com.apple.Accessibility",
            "ReduceMotionEnabled",
            "-bool",
            "true",
        ])]
    }
}

/// Whether a failed `boot`/`shutdown` only reports the state we wanted anyway
///
/// e.g. "Unable to boot device in current state: Booted"
pub fn is_already_in_state(output: &str) -> bool {
    output.contains("current state: Booted") || output.contains("current state: Shutdown")
}

/// List all available iOS simulators
pub async fn list_ios_simulators<R>(runner: &R) -> Result<Vec<IosSimulator>>
where
    R: ProcessRunner + Sync,
{
    let output = crate::process::execute_with(runner, &IosSimulator::list_command()).await?;
    parse_simctl_output(&output)
}

/// Parse `xcrun simctl list devices -j`, keeping available simulators only
pub fn parse_simctl_output(json_str: &str) -> Result<Vec<IosSimulator>> {
    let parsed: SimctlOutput = serde_json::from_str(json_str)
        .map_err(|e| Error::protocol(format!("Failed to parse simctl output: {}", e)))?;

    let mut simulators = Vec::new();

    for (runtime_key, devices) in parsed.devices {
        let runtime = parse_runtime_name(&runtime_key);

        for device in devices {
            if device.is_available == Some(false) {
                continue;
            }

            simulators.push(IosSimulator {
                udid: device.udid,
                name: device.name.clone(),
                runtime: runtime.clone(),
                state: SimulatorState::from(device.state.as_str()),
                device_type: device.name, // simctl gives name as device type
            });
        }
    }

    // Sort by runtime (newest first), then by name
    simulators.sort_by(|a, b| b.runtime.cmp(&a.runtime).then_with(|| a.name.cmp(&b.name)));

    Ok(simulators)
}

/// State of `udid` in a simctl listing, if it is listed
pub fn simulator_state(json_str: &str, udid: &str) -> Result<Option<SimulatorState>> {
    Ok(parse_simctl_output(json_str)?
        .into_iter()
        .find(|s| s.udid == udid)
        .map(|s| s.state))
}

/// Parse runtime identifier to friendly name
/// "com.apple.CoreSimulator.SimRuntime.iOS-17-2" -> "iOS 17.2"
fn parse_runtime_name(identifier: &str) -> String {
    if let Some(suffix) = identifier.strip_prefix("com.apple.CoreSimulator.SimRuntime.") {
        if let Some((os_name, version)) = suffix.split_once('-') {
            let version_formatted = version.replace('-', ".");
            format!("{} {}", os_name, version_formatted)
        } else {
            suffix.to_string()
        }
    } else {
        identifier.to_string()
    }
}

/// Group simulators by runtime for display
pub fn group_simulators_by_runtime(simulators: &[IosSimulator]) -> Vec<(&str, Vec<&IosSimulator>)> {
    let mut groups: BTreeMap<&str, Vec<&IosSimulator>> = BTreeMap::new();

    for sim in simulators {
        groups.entry(&sim.runtime).or_default().push(sim);
    }

    // Newest runtime first
    let mut result: Vec<_> = groups.into_iter().collect();
    result.sort_by(|a, b| b.0.cmp(a.0));
    result
}
