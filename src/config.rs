//! Configuration module for Tidedrive.

use serde::Deserialize;
use std::path::Path;

use crate::access::SharingPolicy;
use crate::{DriveError, Result};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/tidedrive.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Walrus blob store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WalrusConfig {
    /// Base URL of the publisher (uploads).
    #[serde(default = "default_publisher_url")]
    pub publisher_url: String,
    /// Base URL of the aggregator (downloads).
    #[serde(default = "default_aggregator_url")]
    pub aggregator_url: String,
    /// Number of storage epochs to certify uploads for.
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    /// Whether uploads are stored as deletable blobs.
    #[serde(default = "default_deletable")]
    pub deletable: bool,
}

fn default_publisher_url() -> String {
    "https://publisher.walrus-testnet.walrus.space".to_string()
}

fn default_aggregator_url() -> String {
    "https://aggregator.walrus-testnet.walrus.space".to_string()
}

fn default_epochs() -> u32 {
    5
}

fn default_deletable() -> bool {
    true
}

impl Default for WalrusConfig {
    fn default() -> Self {
        Self {
            publisher_url: default_publisher_url(),
            aggregator_url: default_aggregator_url(),
            epochs: default_epochs(),
            deletable: default_deletable(),
        }
    }
}

/// Sharing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SharingConfig {
    /// Who may manage collaborators: "admin" or "owner".
    #[serde(default = "default_sharing_policy")]
    pub policy: String,
}

fn default_sharing_policy() -> String {
    "admin".to_string()
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            policy: default_sharing_policy(),
        }
    }
}

impl SharingConfig {
    /// Parse the configured policy string.
    pub fn policy(&self) -> Result<SharingPolicy> {
        self.policy
            .parse()
            .map_err(|e: String| DriveError::Config(e))
    }
}

/// Listing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingConfig {
    /// Default number of levels returned by nested listings.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_depth() -> usize {
    3
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/tidedrive.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Walrus blob store configuration.
    #[serde(default)]
    pub walrus: WalrusConfig,
    /// Sharing configuration.
    #[serde(default)]
    pub sharing: SharingConfig,
    /// Listing configuration.
    #[serde(default)]
    pub listing: ListingConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(DriveError::Io)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| DriveError::Config(format!("config parse error: {e}")))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.sharing.policy()?;
        if self.walrus.epochs == 0 {
            return Err(DriveError::Config(
                "walrus.epochs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.database.path, "data/tidedrive.db");
        assert_eq!(config.walrus.epochs, 5);
        assert!(config.walrus.deletable);
        assert_eq!(config.listing.max_depth, 3);
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.sharing.policy().unwrap(),
            SharingPolicy::AdminCollaborators
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = Config::parse(
            r#"
            [database]
            path = "/tmp/drive.db"

            [walrus]
            epochs = 2

            [sharing]
            policy = "owner"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.path, "/tmp/drive.db");
        assert_eq!(config.walrus.epochs, 2);
        // Untouched sections keep their defaults.
        assert_eq!(config.listing.max_depth, 3);
        assert_eq!(config.sharing.policy().unwrap(), SharingPolicy::OwnerOnly);
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let config = Config::parse("[sharing]\npolicy = \"anyone\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_epochs_rejected() {
        let config = Config::parse("[walrus]\nepochs = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error_is_config() {
        assert!(matches!(
            Config::parse("not valid toml ["),
            Err(DriveError::Config(_))
        ));
    }
}
