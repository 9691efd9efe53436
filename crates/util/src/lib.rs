//! Environment-driven settings for the famdomain service.

pub mod config;

use std::path::PathBuf;

pub use config::{
    AppConfig, ConfigError, Environment, PlatformConfig, ProvisioningTuning, RegistrarConfig,
    SearchTuning, DEFAULT_BIND_ADDR,
};

/// Loads `.env` into the process environment, returning its path when one was found.
pub fn load_env_file() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}
