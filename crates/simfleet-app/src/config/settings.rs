//! Settings parser for .simfleet/config.toml

use super::types::Settings;
use simfleet_core::prelude::*;
use std::path::{Path, PathBuf};

const CONFIG_FILENAME: &str = "config.toml";
const SIMFLEET_DIR: &str = ".simfleet";

/// Path of the project config file
pub fn config_path(project_path: &Path) -> PathBuf {
    project_path.join(SIMFLEET_DIR).join(CONFIG_FILENAME)
}

/// Load settings from .simfleet/config.toml
///
/// Returns default settings if file doesn't exist or can't be parsed.
pub fn load_settings(project_path: &Path) -> Settings {
    let config_path = config_path(project_path);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Load settings, failing instead of falling back to defaults
pub fn load_settings_strict(project_path: &Path) -> Result<Settings> {
    let config_path = config_path(project_path);
    if !config_path.exists() {
        return Err(Error::ConfigNotFound { path: config_path });
    }

    let content = std::fs::read_to_string(&config_path)?;
    let settings: Settings = toml::from_str(&content)?;
    settings.validate()?;
    Ok(settings)
}

/// Create .simfleet/config.toml with commented defaults.
///
/// Returns the config path. An existing file is left untouched.
pub fn init_config_dir(project_path: &Path) -> Result<PathBuf> {
    let simfleet_dir = project_path.join(SIMFLEET_DIR);

    if !simfleet_dir.exists() {
        std::fs::create_dir_all(&simfleet_dir)
            .map_err(|e| Error::config(format!("Failed to create .simfleet dir: {}", e)))?;
        info!("Created .simfleet directory");
    }

    let config_path = simfleet_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        std::fs::write(&config_path, generate_default_config())
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
        info!("Created default config.toml");
    }

    Ok(config_path)
}

fn generate_default_config() -> String {
    r#"# simfleet configuration

[scheduler]
total_retries = 1       # Iterations to run (N)
partition_size = 1      # Iterations per batch, run concurrently (P)
consume = 1             # Times each iteration is repeated within its batch

[retry]
min_retries = 3         # Settings and stop commands
max_retries = 60        # Boot readiness polling
delay_ms = 1000         # Fixed delay between attempts

[ports.android]
port = 5554
max_port = 5682
step = 2
retries = 64

[ports.ios]
port = 8100
max_port = 8200
step = 1
retries = 100

[suite]
# Run once per iteration with SIMFLEET_INDEX, SIMFLEET_REPETITION,
# SIMFLEET_DEVICE, SIMFLEET_PORT and SIMFLEET_PLATFORM set
command = ""

# One table per engine, in slot order
# [[engines]]
# platform = "android"
# device = "Pixel_6_API_33"
#
# [[engines]]
# platform = "ios"
# device = "<simulator udid>"
# [engines.capabilities]
# deviceName = "iPhone 15"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use simfleet_core::Platform;
    use tempfile::tempdir;

    #[test]
    fn test_load_settings_defaults() {
        let temp = tempdir().unwrap();
        let settings = load_settings(temp.path());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_settings_custom() {
        let temp = tempdir().unwrap();
        let simfleet_dir = temp.path().join(".simfleet");
        std::fs::create_dir_all(&simfleet_dir).unwrap();

        let config = r#"
[scheduler]
total_retries = 11
partition_size = 3

[retry]
delay_ms = 250

[suite]
command = "./run-tests.sh --shard"

[[engines]]
platform = "iOS"
device = "ABC-123"
"#;
        std::fs::write(simfleet_dir.join("config.toml"), config).unwrap();

        let settings = load_settings(temp.path());

        assert_eq!(settings.scheduler.total_retries, 11);
        assert_eq!(settings.scheduler.partition_size, 3);
        assert_eq!(settings.retry.delay_ms, 250);
        assert_eq!(settings.retry.max_retries, 60);
        assert_eq!(settings.suite.command, "./run-tests.sh --shard");
        assert_eq!(settings.engines[0].platform, Platform::Ios);
    }

    #[test]
    fn test_load_settings_invalid_toml() {
        let temp = tempdir().unwrap();
        let simfleet_dir = temp.path().join(".simfleet");
        std::fs::create_dir_all(&simfleet_dir).unwrap();

        std::fs::write(simfleet_dir.join("config.toml"), "not valid toml {{{{").unwrap();

        // Should return defaults
        let settings = load_settings(temp.path());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_settings_strict_reports_errors() {
        let temp = tempdir().unwrap();
        assert!(matches!(
            load_settings_strict(temp.path()),
            Err(Error::ConfigNotFound { .. })
        ));

        let simfleet_dir = temp.path().join(".simfleet");
        std::fs::create_dir_all(&simfleet_dir).unwrap();
        std::fs::write(simfleet_dir.join("config.toml"), "[scheduler]\npartition_size = 0\n")
            .unwrap();
        assert!(matches!(
            load_settings_strict(temp.path()),
            Err(Error::ConfigInvalid { .. })
        ));

        std::fs::write(simfleet_dir.join("config.toml"), "[scheduler\n").unwrap();
        assert!(matches!(
            load_settings_strict(temp.path()),
            Err(Error::Toml(_))
        ));
    }

    #[test]
    fn test_init_config_dir() {
        let temp = tempdir().unwrap();

        let path = init_config_dir(temp.path()).unwrap();

        assert_eq!(path, temp.path().join(".simfleet/config.toml"));
        assert!(path.exists());

        // Default file parses to the default settings
        let content = std::fs::read_to_string(&path).unwrap();
        let settings: Settings = toml::from_str(&content).expect("Default config should be valid TOML");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_init_config_dir_idempotent() {
        let temp = tempdir().unwrap();
        let path = init_config_dir(temp.path()).unwrap();

        std::fs::write(&path, "[scheduler]\ntotal_retries = 5\n").unwrap();

        // Second init should not overwrite
        init_config_dir(temp.path()).unwrap();
        let settings = load_settings(temp.path());
        assert_eq!(settings.scheduler.total_retries, 5);
    }
}
