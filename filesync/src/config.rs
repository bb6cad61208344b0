//! Configuration management for the sync engine.
//!
//! The configuration lives in a TOML file at the root of the synchronized tree
//! and carries the sync checkpoint alongside the connection settings.

use crate::remote::Protocol;
use crate::utils::errors::{Result, SyncError};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration file name, always excluded from synchronization.
pub const CONFIG_FILE_NAME: &str = ".filesync.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Checkpoint: files modified after this RFC3339 instant are pending
    #[serde(default = "default_last_update_date")]
    pub last_update_date: String,

    /// Remote server host
    pub host: String,

    /// Remote server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login user
    pub username: String,

    /// Maximum simultaneous transfers
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Root folder on the server
    #[serde(default = "default_server_folder")]
    pub server_folder: String,

    /// One of SFTP, FTP, FTPS-IMPLICIT, FTPS-EXPLICIT
    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub ftp: FtpConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SshConfig {
    /// known_hosts ledger (default: ~/.ssh/known_hosts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts: Option<PathBuf>,

    /// Private key tried when password authentication fails (default: ~/.ssh/id_rsa)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FtpConfig {
    /// Accept self-signed or otherwise invalid FTPS certificates
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Control connection timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// Default values
fn default_last_update_date() -> String {
    format_checkpoint(DateTime::<Utc>::UNIX_EPOCH)
}

fn default_port() -> u16 {
    22
}

fn default_max_connections() -> usize {
    3
}

fn default_server_folder() -> String {
    ".".to_string()
}

fn default_protocol() -> String {
    "SFTP".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            accept_invalid_certs: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            last_update_date: default_last_update_date(),
            host: "localhost".to_string(),
            port: default_port(),
            username: "test".to_string(),
            max_connections: default_max_connections(),
            server_folder: default_server_folder(),
            protocol: default_protocol(),
            log: LogConfig::default(),
            ssh: SshConfig::default(),
            ftp: FtpConfig::default(),
        }
    }
}

/// Render a checkpoint the way it is stored on disk.
pub fn format_checkpoint(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse an RFC3339 checkpoint; a malformed value is a configuration error.
pub fn parse_checkpoint(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SyncError::Config(format!("invalid last_update_date '{}': {}", value, e)))
}

impl SyncConfig {
    /// Path of the configuration file inside a synchronized root
    pub fn path_in(root: &Path) -> PathBuf {
        root.join(CONFIG_FILE_NAME)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: SyncConfig = toml::from_str(&content)
            .map_err(|e| SyncError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Persist configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SyncError::Config(format!("cannot serialize configuration: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values no sync pass can run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(SyncError::Config(
                "max_connections must be a positive integer".to_string(),
            ));
        }
        self.checkpoint()?;
        Ok(())
    }

    pub fn checkpoint(&self) -> Result<DateTime<Utc>> {
        parse_checkpoint(&self.last_update_date)
    }

    /// Move the checkpoint forward; never called for a failed pass.
    pub fn advance_checkpoint(&mut self, instant: DateTime<Utc>) {
        self.last_update_date = format_checkpoint(instant);
    }

    pub fn protocol(&self) -> Result<Protocol> {
        self.protocol.parse()
    }

    pub fn known_hosts_path(&self) -> PathBuf {
        self.ssh
            .known_hosts
            .clone()
            .unwrap_or_else(|| ssh_dir().join("known_hosts"))
    }

    pub fn identity_file_path(&self) -> PathBuf {
        self.ssh
            .identity_file
            .clone()
            .unwrap_or_else(|| ssh_dir().join("id_rsa"))
    }
}

fn ssh_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".ssh")
}
