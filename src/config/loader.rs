// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{RawSettings, RunConfig, Settings};
use crate::config::validate::validate_run_config;
use crate::errors::{Result, StratrunError};

/// Load raw settings from a TOML file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawSettings> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let settings: RawSettings = toml::from_str(&contents)?;

    Ok(settings)
}

/// Load and validate settings.
///
/// A missing settings file is not an error: every section has defaults, so
/// the orchestrator runs with `Settings::default()`.
pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    if !path.exists() {
        debug!(path = %path.display(), "settings file not found; using defaults");
        return Ok(Settings::default());
    }

    let raw = load_from_path(path)?;
    Settings::try_from(raw)
}

/// Load a run configuration from JSON (`.json`) or TOML (anything else)
/// and validate it.
pub fn load_run_config(path: impl AsRef<Path>) -> Result<RunConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        StratrunError::config(format!("reading run config {}: {e}", path.display()))
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let cfg: RunConfig = if is_json {
        serde_json::from_str(&contents)
            .map_err(|e| StratrunError::config(format!("parsing {}: {e}", path.display())))?
    } else {
        toml::from_str(&contents)
            .map_err(|e| StratrunError::config(format!("parsing {}: {e}", path.display())))?
    };

    validate_run_config(&cfg)?;
    Ok(cfg)
}

/// Default settings path: `Stratrun.toml` in the working directory.
pub fn default_settings_path() -> PathBuf {
    PathBuf::from("Stratrun.toml")
}
