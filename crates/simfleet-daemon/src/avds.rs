//! Android Virtual Device (AVD) commands
//!
//! Lists AVDs via `emulator -list-avds` and builds the command lines an
//! Android engine uses over its lifecycle. An emulator started with
//! `-port <p>` is addressed by adb as `emulator-<p>`.

use crate::process::{CommandLine, ProcessRunner};
use crate::ToolAvailability;
use simfleet_core::prelude::*;
use regex::Regex;
use std::sync::LazyLock;

/// Static regex pattern for extracting API level from AVD names
static API_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_API_(\d+)$").expect("Invalid API pattern regex"));

/// Global settings zeroed so UI tests don't wait on animations
const ANIMATION_SETTINGS: [&str; 3] = [
    "window_animation_scale",
    "transition_animation_scale",
    "animator_duration_scale",
];

/// An Android Virtual Device (AVD)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndroidAvd {
    /// AVD name (used for boot command)
    pub name: String,
    /// Friendly display name
    pub display_name: String,
    /// API level (e.g., 33 for Android 13)
    pub api_level: Option<u32>,
}

impl AndroidAvd {
    /// Build from an AVD name, deriving display name and API level
    pub fn from_name(name: &str) -> Self {
        let name = name.trim().to_string();
        let (display_name, api_level) = parse_avd_name(&name);
        Self {
            name,
            display_name,
            api_level,
        }
    }

    /// adb serial of this AVD when running on `port`
    pub fn serial(port: u16) -> String {
        format!("emulator-{}", port)
    }

    /// Start the emulator on the given console port
    pub fn launch_command(&self, tools: &ToolAvailability, port: u16) -> CommandLine {
        CommandLine::new(
            tools.emulator(),
            [
                "-avd".to_string(),
                self.name.clone(),
                "-port".to_string(),
                port.to_string(),
                "-no-snapshot-load".to_string(),
                "-no-boot-anim".to_string(),
            ],
        )
    }

    /// Query the `sys.boot_completed` property
    pub fn boot_completed_command(tools: &ToolAvailability, port: u16) -> CommandLine {
        CommandLine::new(
            tools.adb(),
            [
                "-s".to_string(),
                Self::serial(port),
                "shell".to_string(),
                "getprop".to_string(),
                "sys.boot_completed".to_string(),
            ],
        )
    }

    /// Stop the emulator through its console
    pub fn kill_command(tools: &ToolAvailability, port: u16) -> CommandLine {
        CommandLine::new(
            tools.adb(),
            ["-s".to_string(), Self::serial(port), "emu".to_string(), "kill".to_string()],
        )
    }

    /// Commands disabling system animations
    pub fn settings_commands(tools: &ToolAvailability, port: u16) -> Vec<CommandLine> {
        ANIMATION_SETTINGS
            .iter()
            .map(|setting| {
                CommandLine::new(
                    tools.adb(),
                    [
                        "-s".to_string(),
                        Self::serial(port),
                        "shell".to_string(),
                        "settings".to_string(),
                        "put".to_string(),
                        "global".to_string(),
                        setting.to_string(),
                        "0".to_string(),
                    ],
                )
            })
            .collect()
    }
}

/// Whether `getprop sys.boot_completed` output reports a finished boot
pub fn is_boot_completed(output: &str) -> bool {
    output.lines().any(|line| line.trim() == "1")
}

/// List all available Android AVDs
pub async fn list_android_avds<R>(runner: &R, tools: &ToolAvailability) -> Result<Vec<AndroidAvd>>
where
    R: ProcessRunner + Sync,
{
    let cmd = CommandLine::new(tools.emulator(), ["-list-avds"]);
    let output = crate::process::execute_with(runner, &cmd).await?;
    Ok(parse_avd_list(&output))
}

/// Parse the output of `emulator -list-avds`
///
/// Output format is one AVD name per line.
fn parse_avd_list(output: &str) -> Vec<AndroidAvd> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        // Diagnostic lines such as "INFO    | ..." are not AVD names
        .filter(|line| !line.contains('|'))
        .map(AndroidAvd::from_name)
        .collect()
}

/// Parse AVD name to extract display name and API level
///
/// Common naming patterns:
/// - "Pixel_6_API_33" -> ("Pixel 6", Some(33))
/// - "Nexus_5X_API_29" -> ("Nexus 5X", Some(29))
/// - "My_Custom_AVD" -> ("My Custom AVD", None)
fn parse_avd_name(name: &str) -> (String, Option<u32>) {
    if let Some(caps) = API_PATTERN.captures(name) {
        let api_level = caps.get(1).and_then(|m| m.as_str().parse().ok());
        let display = API_PATTERN.replace(name, "").replace('_', " ");
        return (display.trim().to_string(), api_level);
    }

    (name.replace('_', " "), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_avd_list() {
        let output = "Pixel_6_API_33\nNexus_5X_API_29\nMy_Custom_AVD\n";
        let avds = parse_avd_list(output);

        assert_eq!(avds.len(), 3);
        assert_eq!(avds[0].name, "Pixel_6_API_33");
        assert_eq!(avds[1].name, "Nexus_5X_API_29");
        assert_eq!(avds[2].name, "My_Custom_AVD");
    }

    #[test]
    fn test_parse_avd_list_skips_diagnostics() {
        let output = "INFO    | Storing crashdata in: /tmp/android\nPixel_6_API_33\n";
        let avds = parse_avd_list(output);
        assert_eq!(avds.len(), 1);
        assert_eq!(avds[0].api_level, Some(33));
    }

    #[test]
    fn test_parse_avd_list_with_whitespace() {
        let output = "  Pixel_6_API_33  \n\n  Nexus_5X_API_29\n";
        let avds = parse_avd_list(output);

        assert_eq!(avds.len(), 2);
        assert_eq!(avds[0].name, "Pixel_6_API_33");
        assert_eq!(avds[1].name, "Nexus_5X_API_29");
    }

    #[test]
    fn test_parse_avd_name_with_api() {
        let (display, api) = parse_avd_name("Pixel_6_Pro_API_34");
        assert_eq!(display, "Pixel 6 Pro");
        assert_eq!(api, Some(34));
    }

    #[test]
    fn test_parse_avd_name_without_api() {
        let (display, api) = parse_avd_name("My_Custom_AVD");
        assert_eq!(display, "My Custom AVD");
        assert_eq!(api, None);
    }

    #[test]
    fn test_launch_command_uses_port() {
        let avd = AndroidAvd::from_name("Pixel_6_API_33");
        let cmd = avd.launch_command(&ToolAvailability::default(), 5556);
        assert_eq!(
            cmd.to_string(),
            "emulator -avd Pixel_6_API_33 -port 5556 -no-snapshot-load -no-boot-anim"
        );
    }

    #[test]
    fn test_adb_commands_target_serial() {
        let tools = ToolAvailability::default();
        assert_eq!(
            AndroidAvd::boot_completed_command(&tools, 5554).to_string(),
            "adb -s emulator-5554 shell getprop sys.boot_completed"
        );
        assert_eq!(
            AndroidAvd::kill_command(&tools, 5554).to_string(),
            "adb -s emulator-5554 emu kill"
        );
    }

    #[test]
    fn test_settings_commands_disable_animations() {
        let cmds = AndroidAvd::settings_commands(&ToolAvailability::default(), 5560);
        assert_eq!(cmds.len(), 3);
        assert!(cmds
            .iter()
            .all(|c| c.args.ends_with(&["0".to_string()]) && c.args[1] == "emulator-5560"));
    }

    #[test]
    fn test_is_boot_completed() {
        assert!(is_boot_completed("1\n"));
        assert!(is_boot_completed("  1  "));
        assert!(!is_boot_completed(""));
        assert!(!is_boot_completed("0"));
        assert!(!is_boot_completed("error: device offline"));
    }
}
