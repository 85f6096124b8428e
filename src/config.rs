//! Configuration loading.
//!
//! Settings live in an optional TOML file, `~/.psachecker/config.toml` unless
//! `--config` points elsewhere. Every field has a default, so a missing file
//! or an empty one yields a working configuration. Command-line flags are
//! applied on top by the binary.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::types::PolicyVersion;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Pod Security policy settings.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Evaluation limits.
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Pod Security policy settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Policy version every level is evaluated at.
    #[serde(default)]
    pub version: PolicyVersion,
}

/// Evaluation limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluationConfig {
    /// Resources evaluated at the same time.
    #[serde(default = "default_max_concurrent_resources")]
    pub max_concurrent_resources: usize,

    /// Deadline for a whole run in seconds. `0` disables it.
    #[serde(default)]
    pub timeout_secs: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_resources: default_max_concurrent_resources(),
            timeout_secs: 0,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// Default value functions for serde

fn default_max_concurrent_resources() -> usize {
    8
}
fn default_log_level() -> String {
    "warn".to_owned()
}

/// Parse configuration from TOML text.
///
/// # Errors
///
/// Returns an error if the text is not valid configuration.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let config: Config = toml::from_str(contents)?;
    if config.evaluation.max_concurrent_resources == 0 {
        anyhow::bail!("evaluation.max_concurrent_resources must be at least 1");
    }
    Ok(config)
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    parse_config(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))
}

/// Load `explicit` if given, else the default file when it exists, else
/// defaults.
///
/// # Errors
///
/// Returns an error if a config file exists but cannot be read or parsed, or
/// an explicit path does not exist.
pub fn load_or_default(explicit: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    let Ok(dir) = config_dir() else {
        return Ok(Config::default());
    };
    let path = dir.join("config.toml");
    if path.is_file() {
        load_config(&path)
    } else {
        Ok(Config::default())
    }
}

/// Resolve the default config directory (`~/.psachecker/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".psachecker"))
}
