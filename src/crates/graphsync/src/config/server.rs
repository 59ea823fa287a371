//! Server configuration
//!
//! Loads and parses the graphsync TOML configuration file with database,
//! cluster, session and security settings. Every section has defaults so a
//! missing file still yields a runnable single-process setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Server identification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerIdentity {
    /// Human-readable process name, shown in logs
    #[serde(default = "default_server_name")]
    pub name: String,
}

fn default_server_name() -> String {
    "graphsync".to_string()
}

impl Default for ServerIdentity {
    fn default() -> Self {
        Self {
            name: default_server_name(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file path
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "graphsync.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Cluster configuration
///
/// The publisher and direct sockets derive from the HTTP port
/// (`+1000`/`+1001`), so only the advertised host and the timing knobs
/// live here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Host advertised to peers (and bound for cluster sockets)
    #[serde(default = "default_host")]
    pub host: String,
    /// Registry heartbeat interval
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Peer discovery sweep interval
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_secs: u64,
    /// Default direct request timeout
    #[serde(default = "default_direct_timeout")]
    pub direct_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_discovery_interval() -> u64 {
    30
}

fn default_direct_timeout() -> u64 {
    10
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            refresh_interval_secs: default_refresh_interval(),
            discovery_interval_secs: default_discovery_interval(),
            direct_timeout_secs: default_direct_timeout(),
        }
    }
}

/// Session manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Auto-save flusher interval
    #[serde(default = "default_autosave_interval")]
    pub autosave_interval_secs: u64,
    /// Eviction sweep interval
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Instruction batch cap; larger batches close the socket
    #[serde(default = "default_max_instruction_batch")]
    pub max_instruction_batch: usize,
    /// Element cap per batchCreateElements message
    #[serde(default = "default_max_create_batch")]
    pub max_create_batch: usize,
}

fn default_autosave_interval() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    10
}

fn default_max_instruction_batch() -> usize {
    20
}

fn default_max_create_batch() -> usize {
    200
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autosave_interval_secs: default_autosave_interval(),
            sweep_interval_secs: default_sweep_interval(),
            max_instruction_batch: default_max_instruction_batch(),
            max_create_batch: default_max_create_batch(),
        }
    }
}

/// Security mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityMode {
    /// No authentication required
    #[default]
    Open,
    /// Token-based authentication on register
    SecretKey,
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    /// Security mode
    #[serde(default)]
    pub mode: SecurityMode,
    /// Secret key (can be overridden by the SECRET_KEY environment variable)
    #[serde(default)]
    pub secret_key: Option<String>,
}

/// Complete server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerIdentity,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl ServerConfig {
    /// Load configuration from `CONFIG_PATH` or `config/graphsync.toml`
    ///
    /// A missing file yields the defaults; a present but malformed file is
    /// an error.
    pub fn load() -> Result<Self, ServerConfigError> {
        let path = std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/graphsync.toml"));
        if !path.exists() {
            tracing::warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, ServerConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: ServerConfig = toml::from_str(&raw)?;

        if let Ok(secret) = std::env::var("SECRET_KEY") {
            config.security.secret_key = Some(secret);
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ServerConfigError> {
        if self.security.mode == SecurityMode::SecretKey && self.security.secret_key.is_none() {
            return Err(ServerConfigError::InvalidConfig(
                "security.mode = \"secret-key\" requires security.secret_key or SECRET_KEY".into(),
            ));
        }
        if self.session.max_instruction_batch == 0 {
            return Err(ServerConfigError::InvalidConfig(
                "session.max_instruction_batch must be positive".into(),
            ));
        }
        Ok(())
    }

    /// SQLite connection string for the configured database path
    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.database.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.session.max_instruction_batch, 20);
        assert_eq!(config.session.autosave_interval_secs, 30);
        assert_eq!(config.session.sweep_interval_secs, 10);
        assert_eq!(config.cluster.refresh_interval_secs, 60);
        assert_eq!(config.cluster.discovery_interval_secs, 30);
        assert_eq!(config.cluster.direct_timeout_secs, 10);
        assert_eq!(config.security.mode, SecurityMode::Open);
    }

    #[test]
    fn test_parse_partial_toml() {
        let raw = r#"
            [server]
            name = "node-1"

            [session]
            autosave_interval_secs = 5
        "#;
        let config: ServerConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.server.name, "node-1");
        assert_eq!(config.session.autosave_interval_secs, 5);
        // untouched sections fall back to defaults
        assert_eq!(config.session.max_instruction_batch, 20);
    }

    #[test]
    fn test_secret_key_mode_requires_key() {
        let config = ServerConfig {
            security: SecurityConfig {
                mode: SecurityMode::SecretKey,
                secret_key: None,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_url() {
        let config = ServerConfig::default();
        assert_eq!(config.database_url(), "sqlite:graphsync.db?mode=rwc");
    }
}
