//! Agent configuration
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! environment variables and command-line flags (both handled by clap).
//! The result is validated once and treated as immutable afterwards.

use clap::{Parser, ValueEnum};
use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Wire protocol used to reach the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Rpc,
}

/// Command-line flags; every flag can also come from the environment
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "pulse-agent")]
#[command(about = "Samples host and process statistics and reports them to a pulse collector")]
pub struct AgentArgs {
    /// JSON configuration file
    #[arg(short = 'c', long = "config", env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Collector HTTP address (host:port)
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Collector RPC address (host:port)
    #[arg(long, env = "ADDRESS_RPC")]
    pub address_rpc: Option<String>,

    #[arg(long, env = "TRANSPORT", value_enum)]
    pub transport: Option<TransportKind>,

    /// Seconds between samples
    #[arg(short = 'p', long, env = "POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Seconds between reports
    #[arg(short = 'r', long, env = "REPORT_INTERVAL")]
    pub report_interval: Option<u64>,

    /// Shared signing key; empty disables signing
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// Maximum simultaneous outbound requests
    #[arg(short = 'l', long, env = "RATE_LIMIT")]
    pub rate_limit: Option<usize>,

    /// PEM public key of the collector; enables payload encryption
    #[arg(long, env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Resolved agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub address: String,
    pub address_rpc: String,
    pub transport: TransportKind,
    pub poll_interval: u64,
    pub report_interval: u64,
    pub key: String,
    pub rate_limit: usize,
    pub crypto_key: Option<PathBuf>,
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            address_rpc: "localhost:3200".to_string(),
            transport: TransportKind::Http,
            poll_interval: 2,
            report_interval: 10,
            key: String::new(),
            rate_limit: 1,
            crypto_key: None,
            log_level: "info".to_string(),
        }
    }
}

impl AgentConfig {
    /// Build the configuration from defaults, the optional file and `args`
    pub fn load(args: AgentArgs) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(path) = &args.config {
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Json));
        }

        let mut config: AgentConfig = builder.build()?.try_deserialize()?;
        config.apply(args);
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, args: AgentArgs) {
        if let Some(v) = args.address {
            self.address = v;
        }
        if let Some(v) = args.address_rpc {
            self.address_rpc = v;
        }
        if let Some(v) = args.transport {
            self.transport = v;
        }
        if let Some(v) = args.poll_interval {
            self.poll_interval = v;
        }
        if let Some(v) = args.report_interval {
            self.report_interval = v;
        }
        if let Some(v) = args.key {
            self.key = v;
        }
        if let Some(v) = args.rate_limit {
            self.rate_limit = v;
        }
        if args.crypto_key.is_some() {
            self.crypto_key = args.crypto_key;
        }
        if let Some(v) = args.log_level {
            self.log_level = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval == 0 {
            return Err(ConfigError::Invalid("poll_interval must be > 0".to_string()));
        }
        if self.report_interval == 0 {
            return Err(ConfigError::Invalid("report_interval must be > 0".to_string()));
        }
        if self.rate_limit == 0 {
            return Err(ConfigError::Invalid("rate_limit must be >= 1".to_string()));
        }
        validate_host_port(&self.address)?;
        validate_host_port(&self.address_rpc)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval)
    }
}

fn validate_host_port(address: &str) -> Result<(), ConfigError> {
    let valid = address
        .rsplit_once(':')
        .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
        .unwrap_or(false);

    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "address '{}' must be host:port",
            address
        )))
    }
}
