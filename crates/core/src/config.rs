//! Configuration loading helpers.
//!
//! Each component owns a `serde`-derived config struct with a `Default` impl;
//! this module only knows how to read them from TOML.

use crate::error::Result;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Parse a configuration value from a TOML document.
pub fn from_toml_str<T: DeserializeOwned>(content: &str) -> Result<T> {
    Ok(toml::from_str(content)?)
}

/// Read and parse a TOML configuration file.
pub fn from_toml_file<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    from_toml_str(&content)
}
