//! Configuration: CLI flags, TOML file, bundled-default fallback.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Bundled default configuration, used when the configured file cannot be
/// read or parsed.
pub const DEFAULT_CONFIG: &str = include_str!("../../config.sample.toml");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Buffering insert proxy for columnar stores", long_about = None)]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(long, short, env = "BULKHOUSE_CONFIG", default_value = "bulkhouse.toml")]
    pub config: PathBuf,

    /// Log every incoming query (overrides the config file)
    #[arg(long)]
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickhouseConfig {
    /// Backend endpoints, tried in round-robin order.
    pub servers: Vec<String>,
    /// How long a failed server is excluded from selection.
    pub down_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the proxy listens on.
    pub listen: String,
    pub clickhouse: ClickhouseConfig,
    /// Accumulated row count that triggers an immediate flush.
    pub flush_count: usize,
    /// Periodic flush interval.
    pub flush_interval_ms: u64,
    /// Directory for undeliverable-insert dump files.
    pub dump_dir: PathBuf,
    /// Deadline for the shutdown drain before the process exits anyway.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub debug: bool,
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Bundled { reason: String },
}

impl Config {
    /// Load and validate configuration.
    ///
    /// An unreadable or unparseable file falls back to the bundled default;
    /// an invalid bundled default (or failing validation) is the one fatal
    /// startup error.
    pub fn load(path: &Path) -> Result<(Self, ConfigSource), ConfigError> {
        let (config, source) = match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str::<Self>(&text) {
                Ok(config) => (config, ConfigSource::File(path.to_path_buf())),
                Err(err) => (
                    Self::bundled()?,
                    ConfigSource::Bundled {
                        reason: format!("config file {} is invalid: {err}", path.display()),
                    },
                ),
            },
            Err(err) => (
                Self::bundled()?,
                ConfigSource::Bundled {
                    reason: format!("config file {} is unreadable: {err}", path.display()),
                },
            ),
        };

        config.validate()?;
        Ok((config, source))
    }

    pub fn bundled() -> Result<Self, ConfigError> {
        Ok(toml::from_str(DEFAULT_CONFIG)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Invalid("listen address cannot be empty".into()));
        }
        if self.clickhouse.servers.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one backend server is required".into(),
            ));
        }
        for server in &self.clickhouse.servers {
            validate_server_url(server)?;
        }
        if self.flush_count == 0 {
            return Err(ConfigError::Invalid("flush_count must be at least 1".into()));
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "flush_interval_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn down_timeout(&self) -> Duration {
        Duration::from_secs(self.clickhouse.down_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn validate_server_url(server: &str) -> Result<(), ConfigError> {
    let url = Url::parse(server)
        .map_err(|e| ConfigError::Invalid(format!("invalid server URL {server}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!(
            "server URL {server} must use http or https"
        )));
    }
    Ok(())
}
