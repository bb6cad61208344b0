//! Remote file transfer backends.
//!
//! Every backend exposes the same blocking capability surface through
//! [`RemoteSession`]. The backend is chosen once from the configured protocol
//! identifier; the rest of the engine only sees `Arc<dyn RemoteSession>`.

pub mod ftp;
pub mod path;
pub mod sftp;

#[cfg(test)]
pub(crate) mod memory;

use crate::config::SyncConfig;
use crate::trust::TrustVerifier;
use crate::utils::errors::{Result, SyncError};
use crate::utils::prompt::Prompter;
use chrono::{DateTime, Utc};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Supported transfer protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Sftp,
    Ftp,
    FtpsImplicit,
    FtpsExplicit,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Sftp => "SFTP",
            Protocol::Ftp => "FTP",
            Protocol::FtpsImplicit => "FTPS-IMPLICIT",
            Protocol::FtpsExplicit => "FTPS-EXPLICIT",
        }
    }
}

impl FromStr for Protocol {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SFTP" => Ok(Protocol::Sftp),
            "FTP" => Ok(Protocol::Ftp),
            "FTPS-IMPLICIT" => Ok(Protocol::FtpsImplicit),
            "FTPS-EXPLICIT" => Ok(Protocol::FtpsExplicit),
            other => Err(SyncError::UnsupportedProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a remote directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Absolute `/`-separated remote path
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

impl RemoteEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Capabilities of an authenticated remote session.
///
/// Calls block; the orchestrator runs them on the blocking pool and may issue
/// several at once, so implementations synchronize internally.
pub trait RemoteSession: Send + Sync {
    /// Entries of one directory (no recursion, no `.`/`..`).
    fn list(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Stream a remote file into `sink`, returning the bytes copied.
    fn get(&self, path: &str, sink: Box<dyn Write + Send>) -> Result<u64>;

    /// Create or replace a remote file with the content of `source`.
    fn put(&self, path: &str, source: Box<dyn Read + Send>) -> Result<u64>;

    /// Remove a remote file. `Ok(false)` when there was nothing to remove.
    fn remove(&self, path: &str) -> Result<bool>;

    /// Create `path` and any missing parent directories.
    fn make_dir_all(&self, path: &str) -> Result<()>;

    /// Whether a regular file exists at `path`.
    fn exists(&self, path: &str) -> Result<bool>;

    fn close(&self) -> Result<()>;
}

/// Connect and authenticate against the configured backend.
///
/// For SFTP the host key is checked by `verifier` before any credential is sent.
pub fn connect(
    config: &SyncConfig,
    secret: &str,
    verifier: &TrustVerifier,
    prompter: &dyn Prompter,
) -> Result<Arc<dyn RemoteSession>> {
    config.validate()?;
    let protocol = config.protocol()?;
    info!(
        "Connecting to {}@{}:{} over {}",
        config.username, config.host, config.port, protocol
    );

    let session: Arc<dyn RemoteSession> = match protocol {
        Protocol::Sftp => Arc::new(sftp::SftpSession::connect(config, secret, verifier, prompter)?),
        Protocol::Ftp | Protocol::FtpsImplicit | Protocol::FtpsExplicit => {
            Arc::new(ftp::FtpSession::connect(config, protocol, secret)?)
        }
    };

    info!("Connected to {}:{}", config.host, config.port);
    Ok(session)
}
