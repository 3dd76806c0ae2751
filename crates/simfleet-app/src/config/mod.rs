//! Configuration file parsing for simfleet
//!
//! Supports `.simfleet/config.toml`: scheduling, retry policy, port ranges,
//! the suite command, and the engine pool.

pub mod settings;
pub mod types;

pub use settings::{config_path, init_config_dir, load_settings, load_settings_strict};
pub use types::*;
