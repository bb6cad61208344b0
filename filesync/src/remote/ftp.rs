//! FTP and FTPS backend.
//!
//! An FTP control connection handles one command at a time, so the session
//! pools up to `max_connections` of them with r2d2. Each operation checks a
//! connection out on the blocking thread it already runs on. Connections are
//! dialed lazily, pinged with `NOOP` on checkout and discarded after an I/O
//! failure, so a dropped control channel is replaced on the next checkout.

use super::path;
use super::{EntryKind, Protocol, RemoteEntry, RemoteSession};
use crate::config::SyncConfig;
use crate::utils::errors::{Result, SyncError};
use chrono::{DateTime, Utc};
use r2d2::{HandleError, ManageConnection, Pool};
use std::io::{self, Read, Write};
use std::net::ToSocketAddrs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use suppaftp::list::File as ListEntry;
use suppaftp::native_tls::TlsConnector;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpResult, NativeTlsConnector, NativeTlsFtpStream, Status};
use tracing::{debug, warn};

/// Everything needed to open one control connection
struct FtpConnectionManager {
    host: String,
    port: u16,
    username: String,
    password: String,
    protocol: Protocol,
    accept_invalid_certs: bool,
    timeout: Duration,
}

impl FtpConnectionManager {
    fn dial(&self) -> Result<NativeTlsFtpStream> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| self.connection_error(e))?
            .next()
            .ok_or_else(|| self.connection_error("no address resolved"))?;

        let mut stream = match self.protocol {
            Protocol::FtpsImplicit => {
                NativeTlsFtpStream::connect_secure_implicit(addr, self.tls()?, &self.host)
            }
            _ => NativeTlsFtpStream::connect_timeout(addr, self.timeout),
        }
        .map_err(|e| self.connection_error(e))?;

        if self.protocol == Protocol::FtpsExplicit {
            stream = stream
                .into_secure(self.tls()?, &self.host)
                .map_err(|e| self.connection_error(e))?;
        }

        stream
            .login(&self.username, &self.password)
            .map_err(|e| SyncError::Connection(format!("login as {} failed: {}", self.username, e)))?;
        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| self.connection_error(e))?;
        Ok(stream)
    }

    fn tls(&self) -> Result<NativeTlsConnector> {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()
            .map_err(|e| self.connection_error(e))?;
        Ok(NativeTlsConnector::from(connector))
    }

    fn connection_error(&self, err: impl std::fmt::Display) -> SyncError {
        SyncError::Connection(format!("{}:{}: {}", self.host, self.port, err))
    }
}

/// A pooled control connection
struct FtpConnection {
    stream: NativeTlsFtpStream,
    broken: bool,
}

impl Drop for FtpConnection {
    fn drop(&mut self) {
        if self.broken {
            return;
        }
        if let Err(e) = self.stream.quit() {
            debug!("FTP connection did not quit cleanly: {}", e);
        }
    }
}

impl ManageConnection for FtpConnectionManager {
    type Connection = FtpConnection;
    type Error = SyncError;

    fn connect(&self) -> Result<FtpConnection> {
        debug!("Dialing FTP connection to {}:{}", self.host, self.port);
        Ok(FtpConnection {
            stream: self.dial()?,
            broken: false,
        })
    }

    fn is_valid(&self, conn: &mut FtpConnection) -> Result<()> {
        conn.stream.noop().map_err(|e| {
            conn.broken = true;
            self.connection_error(e)
        })
    }

    fn has_broken(&self, conn: &mut FtpConnection) -> bool {
        conn.broken
    }
}

/// Routes pool errors into the log
#[derive(Debug)]
struct TracingErrorHandler;

impl HandleError<SyncError> for TracingErrorHandler {
    fn handle_error(&self, error: SyncError) {
        warn!("FTP pool: {}", error);
    }
}

pub struct FtpSession {
    pool: Mutex<Option<Pool<FtpConnectionManager>>>,
}

impl FtpSession {
    /// Build the pool after one eager login, so bad credentials fail here
    /// rather than as a checkout timeout.
    pub fn connect(config: &SyncConfig, protocol: Protocol, secret: &str) -> Result<Self> {
        let manager = FtpConnectionManager {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: secret.to_string(),
            protocol,
            accept_invalid_certs: config.ftp.accept_invalid_certs,
            timeout: Duration::from_secs(config.ftp.timeout_secs),
        };
        drop(manager.connect()?);

        let pool = Pool::builder()
            .max_size(u32::try_from(config.max_connections).unwrap_or(u32::MAX))
            .min_idle(Some(0))
            .connection_timeout(manager.timeout.max(Duration::from_secs(1)))
            .error_handler(Box::new(TracingErrorHandler))
            .build(manager)
            .map_err(|e| SyncError::Connection(e.to_string()))?;

        Ok(Self {
            pool: Mutex::new(Some(pool)),
        })
    }

    fn pool(&self) -> Result<Pool<FtpConnectionManager>> {
        self.pool
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| SyncError::Connection("FTP session already closed".to_string()))
    }

    /// Run `op` on a checked-out connection.
    fn run<T>(
        &self,
        path: &str,
        op: impl FnOnce(&mut NativeTlsFtpStream) -> FtpResult<T>,
    ) -> Result<T> {
        let mut conn = self
            .pool()?
            .get()
            .map_err(|e| SyncError::Connection(e.to_string()))?;
        op(&mut conn.stream).map_err(|e| {
            if matches!(e, FtpError::ConnectionError(_)) {
                warn!("FTP connection lost during {}: {}", path, e);
                conn.broken = true;
            }
            SyncError::transfer(path, e)
        })
    }
}

impl RemoteSession for FtpSession {
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let lines = self.run(dir, |stream| {
            let listing = stream.list(Some(dir));
            if matches!(&listing, Err(e) if is_unavailable(e)) {
                warn!("Skipping unreadable remote directory {}", dir);
            }
            or_if_unavailable(listing, Vec::new())
        })?;
        Ok(entries_from_listing(dir, &lines))
    }

    fn get(&self, remote: &str, mut sink: Box<dyn Write + Send>) -> Result<u64> {
        self.run(remote, |stream| {
            let mut data = stream.retr_as_stream(remote)?;
            let copied = io::copy(&mut data, &mut sink).map_err(FtpError::ConnectionError)?;
            stream.finalize_retr_stream(data)?;
            sink.flush().map_err(FtpError::ConnectionError)?;
            Ok(copied)
        })
    }

    fn put(&self, remote: &str, mut source: Box<dyn Read + Send>) -> Result<u64> {
        self.run(remote, |stream| stream.put_file(remote, &mut source))
    }

    fn remove(&self, remote: &str) -> Result<bool> {
        self.run(remote, |stream| or_if_unavailable(stream.rm(remote).map(|_| true), false))
    }

    fn make_dir_all(&self, dir: &str) -> Result<()> {
        self.run(dir, |stream| {
            for ancestor in path::ancestors(dir) {
                match stream.mkdir(&ancestor) {
                    Ok(()) => {}
                    // existing directories are refused with a server-specific code
                    Err(FtpError::UnexpectedResponse(response)) => {
                        debug!("MKD {} refused: {:?}", ancestor, response.status);
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })
    }

    fn exists(&self, remote: &str) -> Result<bool> {
        self.run(remote, |stream| file_exists(stream, remote))
    }

    fn close(&self) -> Result<()> {
        // dropping the last pool handle quits every idle connection
        if let Some(pool) = self.pool.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let state = pool.state();
            debug!("Closing FTP pool with {} connections", state.connections);
        }
        Ok(())
    }
}

/// Check a file with SIZE, then MDTM, then NLST, moving on whenever the
/// server does not implement a command.
fn file_exists(stream: &mut NativeTlsFtpStream, target: &str) -> FtpResult<bool> {
    if let Some(found) = answered(stream.size(target))? {
        return Ok(found);
    }
    debug!("SIZE not supported, checking {} with MDTM", target);
    if let Some(found) = answered(stream.mdtm(target))? {
        return Ok(found);
    }
    debug!("MDTM not supported, checking {} with NLST", target);
    or_if_unavailable(stream.nlst(Some(target)), Vec::new()).map(|names| !names.is_empty())
}

/// `Some(true)` on success, `Some(false)` on 550, `None` when unimplemented.
fn answered<T>(result: FtpResult<T>) -> FtpResult<Option<bool>> {
    match result {
        Ok(_) => Ok(Some(true)),
        Err(e) if is_unavailable(&e) => Ok(Some(false)),
        Err(e) if is_not_implemented(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

fn or_if_unavailable<T>(result: FtpResult<T>, fallback: T) -> FtpResult<T> {
    match result {
        Err(e) if is_unavailable(&e) => Ok(fallback),
        other => other,
    }
}

fn entries_from_listing(dir: &str, lines: &[String]) -> Vec<RemoteEntry> {
    let mut entries = Vec::with_capacity(lines.len());
    for line in lines {
        let entry: ListEntry = match line.parse() {
            Ok(entry) => entry,
            Err(_) => {
                debug!("Ignoring unparseable listing line: {}", line);
                continue;
            }
        };
        if entry.name() == "." || entry.name() == ".." {
            continue;
        }
        entries.push(RemoteEntry {
            path: path::join(dir, Path::new(entry.name())),
            kind: if entry.is_directory() {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            size: entry.size() as u64,
            modified_at: DateTime::<Utc>::from(entry.modified()),
        });
    }
    entries
}

/// 550: file or directory missing or not accessible
fn is_unavailable(err: &FtpError) -> bool {
    matches!(err, FtpError::UnexpectedResponse(response) if response.status == Status::FileUnavailable)
}

fn is_not_implemented(err: &FtpError) -> bool {
    matches!(
        err,
        FtpError::UnexpectedResponse(response)
            if matches!(response.status, Status::NotImplemented | Status::CommandNotImplemented)
    )
}
