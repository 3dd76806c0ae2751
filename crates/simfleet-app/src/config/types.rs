//! Configuration types for simfleet
//!
//! Defines:
//! - `Settings` - Contents of `.simfleet/config.toml`
//! - Per-section types for scheduling, ports and the test suite

use serde::{Deserialize, Serialize};
use simfleet_core::prelude::*;
use simfleet_core::{EngineDescriptor, Platform, PortRange, RetryPolicy};

use crate::registry::ensure_distinct_devices;

/// Project settings (.simfleet/config.toml)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub ports: PortSettings,

    #[serde(default)]
    pub suite: SuiteSettings,

    /// Engine pool, in slot order
    #[serde(default)]
    pub engines: Vec<EngineDescriptor>,
}

/// How the retry count is partitioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct SchedulerSettings {
    /// Total number of iterations `N`
    #[serde(default = "default_total_retries")]
    pub total_retries: usize,

    /// Iterations per batch `P`; also the per-batch concurrency bound
    #[serde(default = "default_partition_size")]
    pub partition_size: usize,

    /// Repetitions of every index within its batch
    #[serde(default = "default_consume")]
    pub consume: usize,
}

fn default_total_retries() -> usize {
    1
}

fn default_partition_size() -> usize {
    1
}

fn default_consume() -> usize {
    1
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            total_retries: default_total_retries(),
            partition_size: default_partition_size(),
            consume: default_consume(),
        }
    }
}

/// Port ranges probed per platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PortSettings {
    #[serde(default = "PortRange::android_default")]
    pub android: PortRange,

    #[serde(default = "PortRange::ios_default")]
    pub ios: PortRange,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            android: PortRange::android_default(),
            ios: PortRange::ios_default(),
        }
    }
}

impl PortSettings {
    pub fn for_platform(&self, platform: Platform) -> PortRange {
        match platform {
            Platform::Android => self.android,
            Platform::Ios => self.ios,
        }
    }
}

/// The command run once per iteration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SuiteSettings {
    /// Command line; empty means no suite configured
    #[serde(default)]
    pub command: String,
}

impl Settings {
    /// Check every cross-field invariant
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.total_retries == 0 {
            return Err(Error::config_invalid("scheduler.total_retries must be at least 1"));
        }
        if self.scheduler.partition_size == 0 {
            return Err(Error::config_invalid("scheduler.partition_size must be at least 1"));
        }
        if self.scheduler.consume == 0 {
            return Err(Error::config_invalid("scheduler.consume must be at least 1"));
        }

        self.retry.validate()?;
        self.ports.android.validate()?;
        self.ports.ios.validate()?;

        for (slot, engine) in self.engines.iter().enumerate() {
            if engine.device_identity.trim().is_empty() {
                return Err(Error::config_invalid(format!(
                    "engines[{}].device must not be empty",
                    slot
                )));
            }
        }
        ensure_distinct_devices(&self.engines)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.scheduler.total_retries, 1);
        assert_eq!(settings.scheduler.partition_size, 1);
        assert_eq!(settings.retry, RetryPolicy::default());
        assert_eq!(settings.ports.android, PortRange::android_default());
        assert!(settings.engines.is_empty());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let settings: Settings = toml::from_str(
            r#"
[scheduler]
total_retries = 11

[ports.ios]
port = 9000
max_port = 9010
retries = 10
"#,
        )
        .unwrap();

        assert_eq!(settings.scheduler.total_retries, 11);
        assert_eq!(settings.scheduler.partition_size, 1);
        assert_eq!(settings.ports.ios.port, 9000);
        assert_eq!(settings.ports.ios.step, 1);
        assert_eq!(settings.ports.android, PortRange::android_default());
    }

    #[test]
    fn test_engines_parse_with_capabilities() {
        let settings: Settings = toml::from_str(
            r#"
[[engines]]
platform = "android"
device = "Pixel_6_API_33"
[engines.capabilities]
appPackage = "com.example"

[[engines]]
platform = "ios"
device = "ABC-123"
"#,
        )
        .unwrap();

        assert_eq!(settings.engines.len(), 2);
        assert_eq!(settings.engines[0].platform, Platform::Android);
        assert_eq!(
            settings.engines[0].capabilities["appPackage"],
            serde_json::json!("com.example")
        );
        assert_eq!(settings.engines[1].device_identity, "ABC-123");
        assert!(settings.engines[1].capabilities.is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_partition_size() {
        let mut settings = Settings::default();
        settings.scheduler.partition_size = 0;
        assert!(matches!(
            settings.validate(),
            Err(Error::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_retry_bounds() {
        let mut settings = Settings::default();
        settings.retry.min_retries = 10;
        settings.retry.max_retries = 2;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_device() {
        let mut settings = Settings::default();
        settings
            .engines
            .push(EngineDescriptor::new(Platform::Android, "  "));
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("engines[0]"));
    }

    #[test]
    fn test_validate_rejects_shared_device() {
        let mut settings = Settings::default();
        settings.engines = vec![
            EngineDescriptor::new(Platform::Android, "Pixel_6_API_33"),
            EngineDescriptor::new(Platform::Android, "Pixel_6_API_33"),
        ];
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
        assert!(err.to_string().contains("engines[0] and engines[1]"));
    }

    #[test]
    fn test_ports_for_platform() {
        let ports = PortSettings::default();
        assert_eq!(ports.for_platform(Platform::Ios).port, 8100);
        assert_eq!(ports.for_platform(Platform::Android).step, 2);
    }
}
