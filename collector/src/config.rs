//! Collector configuration
//!
//! Same layering as the agent: defaults, optional JSON file, then environment
//! variables and flags through clap.

use clap::Parser;
use config::{Config, File, FileFormat};
use ipnet::IpNet;
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

#[derive(Parser, Debug, Default, Clone)]
#[command(name = "pulse-collector")]
#[command(about = "Receives metric batches from pulse agents and keeps their current state")]
pub struct CollectorArgs {
    /// JSON configuration file
    #[arg(short = 'c', long = "config", env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP listen address (host:port)
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// RPC listen address (host:port)
    #[arg(long, env = "ADDRESS_RPC")]
    pub address_rpc: Option<String>,

    /// Seconds between snapshot writes; 0 writes after every update
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    pub store_interval: Option<u64>,

    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    pub file_storage_path: Option<PathBuf>,

    /// Replay the snapshot file on startup
    #[arg(short = 'r', long, env = "RESTORE")]
    pub restore: Option<bool>,

    /// SQLite database path; selects the relational backend
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// Shared signing key; empty disables signature checks
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// PEM private key; enables payload decryption
    #[arg(long, env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// Only callers inside this CIDR are admitted
    #[arg(short = 't', long, env = "TRUSTED_SUBNET")]
    pub trusted_subnet: Option<String>,

    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Seconds in-flight requests get to finish on shutdown
    #[arg(long, env = "SHUTDOWN_GRACE")]
    pub shutdown_grace: Option<u64>,
}

/// Resolved collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub address: String,
    pub address_rpc: String,
    pub store_interval: u64,
    pub file_storage_path: PathBuf,
    pub restore: bool,
    pub database_dsn: String,
    pub key: String,
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: String,
    pub log_level: String,
    pub shutdown_grace: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            address_rpc: "localhost:3200".to_string(),
            store_interval: 300,
            file_storage_path: PathBuf::from("/tmp/metrics-db.json"),
            restore: true,
            database_dsn: String::new(),
            key: String::new(),
            crypto_key: None,
            trusted_subnet: String::new(),
            log_level: "info".to_string(),
            shutdown_grace: 10,
        }
    }
}

impl CollectorConfig {
    pub fn load(args: CollectorArgs) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(path) = &args.config {
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Json));
        }

        let mut config: CollectorConfig = builder.build()?.try_deserialize()?;
        config.apply(args);
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, args: CollectorArgs) {
        if let Some(v) = args.address {
            self.address = v;
        }
        if let Some(v) = args.address_rpc {
            self.address_rpc = v;
        }
        if let Some(v) = args.store_interval {
            self.store_interval = v;
        }
        if let Some(v) = args.file_storage_path {
            self.file_storage_path = v;
        }
        if let Some(v) = args.restore {
            self.restore = v;
        }
        if let Some(v) = args.database_dsn {
            self.database_dsn = v;
        }
        if let Some(v) = args.key {
            self.key = v;
        }
        if args.crypto_key.is_some() {
            self.crypto_key = args.crypto_key;
        }
        if let Some(v) = args.trusted_subnet {
            self.trusted_subnet = v;
        }
        if let Some(v) = args.log_level {
            self.log_level = v;
        }
        if let Some(v) = args.shutdown_grace {
            self.shutdown_grace = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_host_port(&self.address)?;
        validate_host_port(&self.address_rpc)?;
        self.trusted_subnet()?;
        if self.file_storage_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "file_storage_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Parsed CIDR; `None` admits every caller
    pub fn trusted_subnet(&self) -> Result<Option<IpNet>, ConfigError> {
        let raw = self.trusted_subnet.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<IpNet>().map(Some).map_err(|e| {
            ConfigError::Invalid(format!("trusted_subnet '{}': {}", raw, e))
        })
    }

    /// `None` selects the sync backup policy
    pub fn store_interval(&self) -> Option<Duration> {
        (self.store_interval > 0).then(|| Duration::from_secs(self.store_interval))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }

    pub fn database_path(&self) -> Option<&str> {
        let dsn = self.database_dsn.trim();
        (!dsn.is_empty()).then_some(dsn)
    }
}

fn validate_host_port(address: &str) -> Result<(), ConfigError> {
    let valid = address
        .rsplit_once(':')
        .map(|(_, port)| port.parse::<u16>().is_ok())
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CollectorConfig::load(CollectorArgs::default()).unwrap();
        assert_eq!(config.address, "localhost:8080");
        assert_eq!(config.address_rpc, "localhost:3200");
        assert_eq!(config.store_interval(), Some(Duration::from_secs(300)));
        assert_eq!(config.file_storage_path, PathBuf::from("/tmp/metrics-db.json"));
        assert!(config.restore);
        assert!(config.database_path().is_none());
        assert!(config.trusted_subnet().unwrap().is_none());
        assert_eq!(config.shutdown_grace(), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_interval_selects_sync_policy() {
        let args = CollectorArgs {
            store_interval: Some(0),
            ..Default::default()
        };
        assert_eq!(CollectorConfig::load(args).unwrap().store_interval(), None);
    }

    #[test]
    fn test_file_then_flags() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"store_interval": 5, "restore": false, "trusted_subnet": "10.0.0.0/8"}}"#
        )
        .unwrap();

        let args = CollectorArgs {
            config: Some(file.path().to_path_buf()),
            store_interval: Some(7),
            ..Default::default()
        };
        let config = CollectorConfig::load(args).unwrap();
        assert_eq!(config.store_interval, 7);
        assert!(!config.restore);
        assert_eq!(
            config.trusted_subnet().unwrap(),
            Some("10.0.0.0/8".parse().unwrap())
        );
    }

    #[test]
    fn test_bad_cidr_is_rejected() {
        let args = CollectorArgs {
            trusted_subnet: Some("192.168.1.0/33".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            CollectorConfig::load(args),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_parse_flags() {
        let args = CollectorArgs::try_parse_from([
            "pulse-collector",
            "-i",
            "0",
            "-r",
            "false",
            "-t",
            "192.168.1.0/24",
            "-d",
            "/var/lib/pulse/metrics.db",
        ])
        .unwrap();
        assert_eq!(args.store_interval, Some(0));
        assert_eq!(args.restore, Some(false));
        assert_eq!(args.trusted_subnet.as_deref(), Some("192.168.1.0/24"));
        assert_eq!(args.database_dsn.as_deref(), Some("/var/lib/pulse/metrics.db"));
    }
}
