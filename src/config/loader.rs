// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::config::model::{ConfigOverrides, RawConfigFile, Settings};
use crate::errors::{AssayerError, Result};

/// Load a configuration file and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; use [`load_and_validate`] to get
/// checked [`Settings`].
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load the config file if there is one.
///
/// An explicit path must exist. Without one, `Assayer.toml` in the current
/// directory is used when present; otherwise every key starts unset.
pub fn load_optional(path: Option<&Path>) -> Result<RawConfigFile> {
    match path {
        Some(path) => {
            if !path.is_file() {
                return Err(AssayerError::ConfigError(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            load_from_path(path)
        }
        None => {
            let default = default_config_path();
            if default.is_file() {
                debug!(path = %default.display(), "using default config file");
                load_from_path(default)
            } else {
                Ok(RawConfigFile::default())
            }
        }
    }
}

/// Load the config file (if any), apply CLI overrides and validate.
pub fn load_and_validate(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Settings> {
    let raw = load_optional(path)?.merge(overrides);
    Settings::try_from(raw)
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("Assayer.toml")
}
