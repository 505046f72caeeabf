//! XML configuration support.
//! - Loads settings from config.xml (quick_xml + serde).
//! - A missing config file means defaults; a malformed one is an error.
//!
//! Notes:
//! - Unknown XML fields are rejected to surface misconfigurations early.
//! - Empty elements count as unset.

use anyhow::{Context, Result};
use quick_xml::de::from_str as from_xml_str;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::paths::config_path;
use super::types::{Config, LogLevel};

/// Struct mirroring the XML config for deserialization.
#[derive(Debug, Deserialize)]
#[serde(rename = "config")]
#[serde(deny_unknown_fields)]
struct XmlConfig {
    #[serde(default)]
    backup_ext: Option<String>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    rotate: Option<u32>,
    /// Lock timeout in seconds
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    timeout: Option<u64>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    strict: Option<bool>,
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default)]
    log_file: Option<String>,
}

// Trims surrounding whitespace before parsing; empty means unset.
fn de_trimmed_opt<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse::<T>().map(Some).map_err(serde::de::Error::custom),
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

// Map XmlConfig -> Config
fn xml_to_config(parsed: XmlConfig) -> Result<Config> {
    let mut cfg = Config::default();
    cfg.backup_ext = non_empty(parsed.backup_ext.as_deref()).map(str::to_owned);
    cfg.rotate = parsed.rotate.unwrap_or(0);
    cfg.timeout = Duration::from_secs(parsed.timeout.unwrap_or(0));
    cfg.strict = parsed.strict.unwrap_or(false);
    if let Some(s) = non_empty(parsed.log_level.as_deref()) {
        cfg.log_level = s.parse::<LogLevel>().map_err(anyhow::Error::msg)?;
    }
    cfg.log_file = non_empty(parsed.log_file.as_deref()).map(PathBuf::from);
    Ok(cfg)
}

/// Load a Config from a specific XML file path.
pub fn load_config_from_xml_path(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read config xml '{}'", path.display()))?;
    let parsed: XmlConfig = from_xml_str(&contents)
        .with_context(|| format!("parse config xml '{}'", path.display()))?;
    xml_to_config(parsed).with_context(|| format!("invalid value in config xml '{}'", path.display()))
}

/// Load the effective Config.
///
/// An explicit path must exist. Otherwise `$ATOMICFILE_CONFIG` or the default
/// location is used, and a missing file yields defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(p) = explicit {
        return load_config_from_xml_path(p);
    }
    let Some(path) = config_path() else {
        return Ok(Config::default());
    };
    match fs::metadata(&path) {
        Ok(_) => {
            debug!(path = %path.display(), "loading config");
            load_config_from_xml_path(&path)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file; using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e).with_context(|| format!("stat config xml '{}'", path.display())),
    }
}
