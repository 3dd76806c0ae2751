//! Tool availability checking for engine management
//!
//! Engines drive devices through three external tools: `emulator` and `adb`
//! from the Android SDK, and `xcrun simctl` from Xcode. This module locates
//! them once at startup; engine commands fall back to the bare program name
//! when a tool was not found so the failure surfaces as a process error.

use std::process::Stdio;
use tokio::process::Command;

/// Resolved locations of the external tools engines need
#[derive(Debug, Clone, Default)]
pub struct ToolAvailability {
    /// Whether `xcrun simctl` is available (macOS with Xcode)
    pub xcrun_simctl: bool,

    /// Path to the Android `emulator` command if found
    pub emulator_path: Option<String>,

    /// Path to `adb` if found
    pub adb_path: Option<String>,
}

impl ToolAvailability {
    /// Check tool availability (run once at startup)
    pub async fn check() -> Self {
        let xcrun_simctl = Self::check_xcrun_simctl().await;
        let emulator_path = Self::find_tool(&Self::get_emulator_paths());
        let adb_path = Self::find_tool(&Self::get_adb_paths());

        tracing::debug!(
            "Tools: xcrun_simctl={} emulator={:?} adb={:?}",
            xcrun_simctl,
            emulator_path,
            adb_path
        );

        Self {
            xcrun_simctl,
            emulator_path,
            adb_path,
        }
    }

    /// Check if xcrun simctl is available
    async fn check_xcrun_simctl() -> bool {
        // Only available on macOS
        #[cfg(not(target_os = "macos"))]
        return false;

        #[cfg(target_os = "macos")]
        {
            Command::new("xcrun")
                .args(["simctl", "help"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .inspect_err(|e| tracing::debug!("xcrun simctl check failed: {}", e))
                .unwrap_or(false)
        }
    }

    /// First candidate that resolves to an executable
    fn find_tool(candidates: &[String]) -> Option<String> {
        candidates.iter().find_map(|candidate| {
            which::which(candidate)
                .inspect_err(|e| tracing::trace!("{} not usable: {}", candidate, e))
                .ok()
                .map(|path| path.to_string_lossy().into_owned())
        })
    }

    /// Get list of paths to try for the emulator command
    fn get_emulator_paths() -> Vec<String> {
        Self::sdk_paths("emulator", "emulator/emulator")
    }

    /// Get list of paths to try for adb
    fn get_adb_paths() -> Vec<String> {
        Self::sdk_paths("adb", "platform-tools/adb")
    }

    fn sdk_paths(program: &str, sdk_relative: &str) -> Vec<String> {
        let mut paths = vec![program.to_string()];

        // Check ANDROID_HOME/<tool>
        if let Ok(android_home) = std::env::var("ANDROID_HOME") {
            paths.push(format!("{}/{}", android_home, sdk_relative));
        }

        // Check ANDROID_SDK_ROOT/<tool>
        if let Ok(sdk_root) = std::env::var("ANDROID_SDK_ROOT") {
            paths.push(format!("{}/{}", sdk_root, sdk_relative));
        }

        paths
    }

    /// Program used to launch Android emulators
    pub fn emulator(&self) -> &str {
        self.emulator_path.as_deref().unwrap_or("emulator")
    }

    /// Program used to talk to Android devices
    pub fn adb(&self) -> &str {
        self.adb_path.as_deref().unwrap_or("adb")
    }

    pub fn android_available(&self) -> bool {
        self.emulator_path.is_some() && self.adb_path.is_some()
    }

    /// Get user-friendly message for unavailable iOS tools
    pub fn ios_unavailable_message(&self) -> Option<&'static str> {
        if self.xcrun_simctl {
            None
        } else {
            #[cfg(target_os = "macos")]
            {
                Some("Xcode not installed. Install Xcode to manage iOS simulators.")
            }

            #[cfg(not(target_os = "macos"))]
            {
                Some("iOS simulators are only available on macOS.")
            }
        }
    }

    /// Get user-friendly message for unavailable Android tools
    pub fn android_unavailable_message(&self) -> Option<&'static str> {
        if self.android_available() {
            None
        } else {
            Some("Android SDK not found. Set ANDROID_HOME or install Android Studio.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_tool_availability_default() {
        let availability = ToolAvailability::default();
        assert!(!availability.xcrun_simctl);
        assert!(availability.emulator_path.is_none());
        assert!(availability.adb_path.is_none());
        assert_eq!(availability.emulator(), "emulator");
        assert_eq!(availability.adb(), "adb");
    }

    #[test]
    fn test_resolved_paths_are_used() {
        let availability = ToolAvailability {
            xcrun_simctl: false,
            emulator_path: Some("/sdk/emulator/emulator".to_string()),
            adb_path: Some("/sdk/platform-tools/adb".to_string()),
        };
        assert_eq!(availability.emulator(), "/sdk/emulator/emulator");
        assert_eq!(availability.adb(), "/sdk/platform-tools/adb");
        assert!(availability.android_unavailable_message().is_none());
    }

    #[test]
    fn test_ios_unavailable_message() {
        let availability = ToolAvailability::default();
        assert!(availability.ios_unavailable_message().is_some());
    }

    #[test]
    fn test_android_unavailable_without_adb() {
        let availability = ToolAvailability {
            xcrun_simctl: false,
            emulator_path: Some("/path/to/emulator".to_string()),
            adb_path: None,
        };
        assert!(availability.android_unavailable_message().is_some());
    }

    #[test]
    #[serial]
    fn test_emulator_paths_includes_env_vars() {
        std::env::set_var("ANDROID_HOME", "/test/android");
        let paths = ToolAvailability::get_emulator_paths();
        assert!(paths.contains(&"/test/android/emulator/emulator".to_string()));
        std::env::remove_var("ANDROID_HOME");
    }

    #[test]
    #[serial]
    fn test_adb_paths_includes_sdk_root() {
        std::env::set_var("ANDROID_SDK_ROOT", "/test/sdk");
        let paths = ToolAvailability::get_adb_paths();
        assert!(paths.contains(&"/test/sdk/platform-tools/adb".to_string()));
        std::env::remove_var("ANDROID_SDK_ROOT");
    }

    #[test]
    fn test_paths_include_bare_program() {
        assert_eq!(ToolAvailability::get_adb_paths()[0], "adb");
        assert_eq!(ToolAvailability::get_emulator_paths()[0], "emulator");
    }

    #[test]
    fn test_find_tool_skips_missing() {
        let found = ToolAvailability::find_tool(&["simfleet-definitely-missing".to_string()]);
        assert!(found.is_none());
    }
}
