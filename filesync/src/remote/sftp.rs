//! SFTP backend on top of libssh2.

use super::path;
use super::{EntryKind, RemoteEntry, RemoteSession};
use crate::config::SyncConfig;
use crate::trust::{normalize_host, HostKey, TrustVerifier};
use crate::utils::errors::{Result, SyncError};
use crate::utils::prompt::Prompter;
use chrono::{DateTime, Utc};
use ssh2::{ErrorCode, FileStat, Session, Sftp};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::Path;
use tracing::{debug, warn};

// LIBSSH2_FX_NO_SUCH_FILE
const SFTP_NO_SUCH_FILE: i32 = 2;

pub struct SftpSession {
    session: Session,
}

impl SftpSession {
    /// Dial, verify the host key, then authenticate.
    pub fn connect(
        config: &SyncConfig,
        secret: &str,
        verifier: &TrustVerifier,
        prompter: &dyn Prompter,
    ) -> Result<Self> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
            SyncError::Connection(format!("cannot reach {}:{}: {}", config.host, config.port, e))
        })?;
        let remote = tcp.peer_addr()?;

        let mut session = Session::new().map_err(connection_error)?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(connection_error)?;

        let (blob, _) = session
            .host_key()
            .ok_or_else(|| SyncError::Connection("server presented no host key".to_string()))?;
        let key = HostKey::from_blob(blob)?;
        verifier.verify(&normalize_host(&config.host, config.port), remote, &key, prompter)?;

        authenticate(&session, config, secret)?;
        Ok(Self { session })
    }

    fn sftp(&self) -> Result<Sftp> {
        self.session.sftp().map_err(connection_error)
    }
}

fn authenticate(session: &Session, config: &SyncConfig, secret: &str) -> Result<()> {
    if let Err(e) = session.userauth_password(&config.username, secret) {
        debug!("Password authentication failed: {}", e);
    }

    if !session.authenticated() {
        let identity = config.identity_file_path();
        if identity.exists() {
            debug!("Trying public key {}", identity.display());
            if let Err(e) = session.userauth_pubkey_file(&config.username, None, &identity, None) {
                warn!("Public key authentication with {} failed: {}", identity.display(), e);
            }
        }
    }

    if !session.authenticated() {
        return Err(SyncError::Connection(format!(
            "authentication failed for {}@{}",
            config.username, config.host
        )));
    }
    Ok(())
}

impl RemoteSession for SftpSession {
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let sftp = self.sftp()?;
        let listing = sftp
            .readdir(Path::new(dir))
            .map_err(|e| SyncError::transfer(dir, e))?;

        let mut entries = Vec::with_capacity(listing.len());
        for (entry_path, stat) in listing {
            let name = match entry_path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };
            if name == "." || name == ".." {
                continue;
            }
            entries.push(RemoteEntry {
                path: path::join(dir, Path::new(&name)),
                kind: if stat.is_dir() { EntryKind::Directory } else { EntryKind::File },
                size: stat.size.unwrap_or(0),
                modified_at: stat
                    .mtime
                    .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0))
                    .unwrap_or_default(),
            });
        }
        Ok(entries)
    }

    fn get(&self, remote: &str, mut sink: Box<dyn Write + Send>) -> Result<u64> {
        let sftp = self.sftp()?;
        let mut file = sftp
            .open(Path::new(remote))
            .map_err(|e| SyncError::transfer(remote, e))?;
        let copied = io::copy(&mut file, &mut sink).map_err(|e| SyncError::transfer(remote, e))?;
        sink.flush()?;
        Ok(copied)
    }

    fn put(&self, remote: &str, mut source: Box<dyn Read + Send>) -> Result<u64> {
        let sftp = self.sftp()?;
        let mut file = sftp
            .create(Path::new(remote))
            .map_err(|e| SyncError::transfer(remote, e))?;
        let copied = io::copy(&mut source, &mut file).map_err(|e| SyncError::transfer(remote, e))?;
        file.close().map_err(|e| SyncError::transfer(remote, e))?;
        Ok(copied)
    }

    fn remove(&self, remote: &str) -> Result<bool> {
        let sftp = self.sftp()?;
        match sftp.unlink(Path::new(remote)) {
            Ok(()) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(SyncError::transfer(remote, e)),
        }
    }

    fn make_dir_all(&self, dir: &str) -> Result<()> {
        let sftp = self.sftp()?;
        for ancestor in path::ancestors(dir) {
            if stat(&sftp, &ancestor)?.is_some() {
                continue;
            }
            if let Err(e) = sftp.mkdir(Path::new(&ancestor), 0o755) {
                // another task may have created it in the meantime
                match stat(&sftp, &ancestor)? {
                    Some(stat) if stat.is_dir() => {}
                    _ => return Err(SyncError::transfer(ancestor, e)),
                }
            }
        }
        Ok(())
    }

    fn exists(&self, remote: &str) -> Result<bool> {
        let sftp = self.sftp()?;
        Ok(stat(&sftp, remote)?.map_or(false, |stat| stat.is_file()))
    }

    fn close(&self) -> Result<()> {
        self.session
            .disconnect(None, "sync finished", None)
            .map_err(connection_error)
    }
}

fn stat(sftp: &Sftp, dir: &str) -> Result<Option<FileStat>> {
    match sftp.stat(Path::new(dir)) {
        Ok(stat) => Ok(Some(stat)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(SyncError::transfer(dir, e)),
    }
}

fn is_not_found(err: &ssh2::Error) -> bool {
    matches!(err.code(), ErrorCode::SFTP(SFTP_NO_SUCH_FILE))
}

fn connection_error(err: ssh2::Error) -> SyncError {
    SyncError::Connection(err.to_string())
}
