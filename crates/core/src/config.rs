// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleet configuration.
//!
//! A global `config.toml` lives in the config directory
//! (`$PIOREACTOR_CONFIG_DIR`, default `$HOME/.pioreactor`); an optional
//! `unit_config.toml` next to it carries per-host overrides and wins
//! key-by-key. `pios sync-configs` is what ships both files to workers.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level configuration shared by jobs and CLIs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub pumps: PumpRates,
}

/// MQTT broker endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keepalive in seconds; doubles as the only per-operation timeout.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

/// Leader election and worker inventory.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// Hostname of the unit allowed to run `pios` commands.
    #[serde(default)]
    pub leader: String,
    /// Experiment name all jobs on this host participate in.
    #[serde(default = "default_experiment")]
    pub experiment: String,
    /// Active worker units addressed by `$broadcast`.
    #[serde(default)]
    pub inventory: Vec<String>,
}

/// Linear ml↔seconds conversion per pump. Calibration itself happens
/// elsewhere; jobs only consume the resulting coefficients.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PumpRates {
    #[serde(default = "default_rate")]
    pub media_ml_per_second: f64,
    #[serde(default = "default_rate")]
    pub alt_media_ml_per_second: f64,
    #[serde(default = "default_rate")]
    pub waste_ml_per_second: f64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keepalive() -> u64 {
    10
}

fn default_experiment() -> String {
    "latest".to_string()
}

fn default_rate() -> f64 {
    1.0
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self { leader: String::new(), experiment: default_experiment(), inventory: Vec::new() }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port(), keepalive_secs: default_keepalive() }
    }
}

impl Default for PumpRates {
    fn default() -> Self {
        Self {
            media_ml_per_second: default_rate(),
            alt_media_ml_per_second: default_rate(),
            waste_ml_per_second: default_rate(),
        }
    }
}

impl Config {
    /// Load from the config directory, overlaying `unit_config.toml` when
    /// present.
    pub fn load() -> Result<Self, ConfigError> {
        let dir = config_dir()?;
        Self::load_from(&dir.join("config.toml"), Some(&dir.join("unit_config.toml")))
    }

    /// Load from explicit paths. The unit file is optional on disk.
    pub fn load_from(global: &Path, unit: Option<&Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(global)
            .map_err(|e| ConfigError::Read(global.to_path_buf(), e))?;
        let mut value: toml::Value =
            toml::from_str(&text).map_err(|e| ConfigError::Parse(global.to_path_buf(), e))?;

        if let Some(unit_path) = unit {
            if unit_path.exists() {
                let text = std::fs::read_to_string(unit_path)
                    .map_err(|e| ConfigError::Read(unit_path.to_path_buf(), e))?;
                let overlay: toml::Value = toml::from_str(&text)
                    .map_err(|e| ConfigError::Parse(unit_path.to_path_buf(), e))?;
                merge(&mut value, overlay);
            }
        }

        value.try_into().map_err(|e| ConfigError::Parse(global.to_path_buf(), e))
    }
}

/// Overlay `incoming` onto `base`, table-by-table; leaves replace wholesale.
fn merge(base: &mut toml::Value, incoming: toml::Value) {
    match (base, incoming) {
        (toml::Value::Table(base), toml::Value::Table(incoming)) => {
            for (key, value) in incoming {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, incoming) => *base = incoming,
    }
}

/// Directory holding `config.toml` and `unit_config.toml`.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(dir) = std::env::var("PIOREACTOR_CONFIG_DIR") {
        return Ok(PathBuf::from(dir));
    }
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".pioreactor"))
        .map_err(|_| ConfigError::NoConfigDir)
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine config directory (no $HOME)")]
    NoConfigDir,

    #[error("Failed to read {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
