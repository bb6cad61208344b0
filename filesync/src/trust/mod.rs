//! Trust-on-first-use verification of remote host keys.
//!
//! A host seen for the first time is accepted only after the operator
//! confirms its fingerprint; afterwards the key recorded in the ledger must
//! match on every connection.

pub mod host_key;
pub mod known_hosts;

pub use host_key::HostKey;
pub use known_hosts::{normalize_host, HostStatus, KnownHosts};

use crate::utils::errors::{Result, SyncError};
use crate::utils::prompt::Prompter;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, warn};

/// Decides whether a remote identity is trusted.
///
/// The ledger is read on first use and only ever appended to.
pub struct TrustVerifier {
    ledger_path: PathBuf,
    ledger: Mutex<Option<KnownHosts>>,
}

impl TrustVerifier {
    pub fn new(ledger_path: impl Into<PathBuf>) -> Self {
        Self {
            ledger_path: ledger_path.into(),
            ledger: Mutex::new(None),
        }
    }

    /// Verify `key` presented by `host` (in known_hosts form, see
    /// [`normalize_host`]) reached at `remote`.
    pub fn verify(
        &self,
        host: &str,
        remote: SocketAddr,
        key: &HostKey,
        prompter: &dyn Prompter,
    ) -> Result<()> {
        if remote.ip().is_loopback() {
            warn!("Skipping known_hosts verification for loopback address {}", remote);
            return Ok(());
        }

        let mut guard = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        let ledger = match &mut *guard {
            Some(ledger) => ledger,
            slot => slot.insert(KnownHosts::open(&self.ledger_path)?),
        };

        match ledger.check(host, key) {
            HostStatus::Trusted => Ok(()),
            HostStatus::Mismatch => {
                warn!(
                    "{} is not a key of {}: either a man-in-the-middle attack or {} has reconfigured its host key",
                    key.fingerprint(),
                    host,
                    host
                );
                Err(SyncError::HostKeyMismatch {
                    host: host.to_string(),
                    fingerprint: key.fingerprint(),
                })
            }
            HostStatus::Unknown => {
                warn!("{} is not a trusted host", host);
                let question = format!(
                    "The authenticity of host '{}' ({}) can't be established.\n{} key fingerprint is {}.\nAdd the host to {}?",
                    host,
                    remote.ip(),
                    key.algorithm(),
                    key.fingerprint(),
                    self.ledger_path.display()
                );
                if !prompter.confirm(&question)? {
                    return Err(SyncError::HostRejected(host.to_string()));
                }
                ledger.append(host, key)?;
                info!("Added {} ({}) to {}", host, key.fingerprint(), self.ledger_path.display());
                Ok(())
            }
        }
    }
}
