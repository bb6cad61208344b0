//! SSH host public keys as presented during key exchange.

use crate::utils::errors::{Result, SyncError};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::fmt;

/// Public key of a remote host in SSH wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKey {
    algorithm: String,
    blob: Vec<u8>,
}

impl HostKey {
    /// Parse a wire-encoded key; the algorithm name is its leading string.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        let algorithm = read_ssh_string(blob)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| SyncError::Connection("malformed host key from server".to_string()))?;

        Ok(Self {
            algorithm: algorithm.to_string(),
            blob: blob.to_vec(),
        })
    }

    /// Parse the `keytype base64` pair of a known_hosts line.
    pub fn from_openssh(algorithm: &str, encoded: &str) -> Option<Self> {
        let blob = STANDARD.decode(encoded).ok()?;
        let key = Self::from_blob(&blob).ok()?;
        (key.algorithm == algorithm).then_some(key)
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.blob)
    }

    /// OpenSSH style `SHA256:...` fingerprint
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.blob);
        format!("SHA256:{}", STANDARD_NO_PAD.encode(digest))
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm, self.fingerprint())
    }
}

/// First length-prefixed string of an SSH wire buffer
fn read_ssh_string(buf: &[u8]) -> Option<&[u8]> {
    let len_bytes: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    buf.get(4..4usize.checked_add(len)?)
}

#[cfg(test)]
pub(crate) fn test_key(algorithm: &str, seed: u8) -> HostKey {
    let mut blob = Vec::new();
    blob.extend_from_slice(&(algorithm.len() as u32).to_be_bytes());
    blob.extend_from_slice(algorithm.as_bytes());
    blob.extend_from_slice(&32u32.to_be_bytes());
    blob.extend_from_slice(&[seed; 32]);
    HostKey::from_blob(&blob).unwrap()
}
