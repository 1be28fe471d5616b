//! Daemon configuration handling.

use anyhow::{Context, Result};
use credrotor_core::config::{self, CredrotorConfig};
use std::path::{Path, PathBuf};

/// Pick the configuration file: explicit flag, then `CREDROTOR_CONFIG`, then
/// the platform config directory.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    config::resolve_config_path(explicit).context("Failed to determine the config location")
}

/// Load and validate the configuration at `path`.
pub fn load_config(path: &Path) -> Result<CredrotorConfig> {
    config::load_from_path(path)
        .with_context(|| format!("Failed to load config from {:?}", path))
}
