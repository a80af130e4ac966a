// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Loading of `glue-dispense.toml` sections.

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the shared configuration file.
pub const CONFIG_FILE_NAME: &str = "glue-dispense.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),
}

/// Candidate config locations, most specific first:
/// working directory, user config dir, then `/etc`.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("glue-dispense").join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from("/etc/glue-dispense").join(CONFIG_FILE_NAME));
    paths
}

/// Pick section `key` out of TOML `content`. `Ok(None)` when absent.
fn parse_section<T: DeserializeOwned>(
    content: &str,
    key: &str,
    origin: &Path,
) -> Result<Option<T>, ConfigError> {
    let table: toml::Table = toml::from_str(content).map_err(|e| parse_err(origin, e))?;
    let Some(section) = table.get(key) else {
        return Ok(None);
    };

    // round-trip through text so serde defaults apply to missing keys
    let section_toml = toml::to_string(section).map_err(|e| parse_err(origin, e))?;
    toml::from_str::<T>(&section_toml)
        .map(Some)
        .map_err(|e| parse_err(origin, e))
}

fn parse_err(origin: &Path, e: impl std::fmt::Display) -> ConfigError {
    ConfigError::ParseError(origin.to_path_buf(), e.to_string())
}

fn load_section_from_file<T: DeserializeOwned>(
    path: &Path,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
    parse_section(&content, key, path)
}

/// A configuration stored as one `[section]` of `glue-dispense.toml`.
pub trait ConfigFile: Sized + Default + DeserializeOwned {
    /// Section header, e.g. `"glue-server"`.
    fn section_key() -> &'static str;

    /// Parse the section out of TOML text. A missing section is an error.
    fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        parse_section::<Self>(content, Self::section_key(), Path::new("<string>"))?
            .ok_or_else(|| missing_section::<Self>(Path::new("<string>")))
    }

    /// Load the section from `path`. A missing section is an error.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        load_section_from_file::<Self>(path, Self::section_key())?
            .ok_or_else(|| missing_section::<Self>(path))
    }

    /// Load the first file on [`config_search_paths`] carrying the section.
    ///
    /// Yields the defaults and no path when none does.
    fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in config_search_paths() {
            if !path.exists() {
                continue;
            }
            if let Some(cfg) = load_section_from_file::<Self>(&path, Self::section_key())? {
                return Ok((cfg, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }
}

fn missing_section<T: ConfigFile>(path: &Path) -> ConfigError {
    ConfigError::ParseError(
        path.to_path_buf(),
        format!("missing [{}] section", T::section_key()),
    )
}
