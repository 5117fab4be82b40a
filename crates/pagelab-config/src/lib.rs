//! Configuration for the PageLab audit pool.
//!
//! This crate handles:
//! - The resolved [`Settings`] value and its defaults
//! - Optional KDL configuration files
//! - Command-line flags with environment variable fallbacks
//! - Handing settings to worker processes through the environment

pub mod args;
pub mod error;
pub mod file;
pub mod settings;

pub use args::SettingsArgs;
pub use error::{ConfigError, ConfigResult};
pub use file::{load_settings_file, parse_settings};
pub use settings::{EngineSettings, Settings};
