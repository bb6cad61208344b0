//! OpenSSH `known_hosts` compatible host-key ledger.
//!
//! The ledger is append-only: trusting a new host adds one line, existing
//! lines are never rewritten.

use super::host_key::HostKey;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use globset::GlobBuilder;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

type HmacSha1 = Hmac<Sha1>;

const HASH_MAGIC: &str = "|1|";
const SALT_LEN: usize = 20;
const DEFAULT_SSH_PORT: u16 = 22;

/// Host name as it appears in known_hosts: bare for port 22, `[host]:port` otherwise.
pub fn normalize_host(host: &str, port: u16) -> String {
    let host = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase();
    if port == DEFAULT_SSH_PORT {
        host
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// Host part of a ledger line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    /// `|1|salt|hash` entry
    Hashed { salt: Vec<u8>, hash: Vec<u8> },
    /// Comma separated patterns, `*`/`?` wildcards and `!` negation allowed
    Plain(Vec<String>),
}

impl HostPattern {
    /// Hash `host` with a fresh random salt.
    pub fn hashed(host: &str) -> Self {
        let mut salt = vec![0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let hash = hmac_sha1(&salt, host);
        HostPattern::Hashed { salt, hash }
    }

    fn parse(field: &str) -> Option<Self> {
        if let Some(rest) = field.strip_prefix(HASH_MAGIC) {
            let (salt, hash) = rest.split_once('|')?;
            return Some(HostPattern::Hashed {
                salt: STANDARD.decode(salt).ok()?,
                hash: STANDARD.decode(hash).ok()?,
            });
        }
        Some(HostPattern::Plain(
            field.split(',').map(|p| p.to_string()).collect(),
        ))
    }

    pub fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Hashed { salt, hash } => {
                let Ok(mut mac) = HmacSha1::new_from_slice(salt) else {
                    return false;
                };
                mac.update(host.as_bytes());
                mac.verify_slice(hash).is_ok()
            }
            HostPattern::Plain(patterns) => {
                let mut matched = false;
                for pattern in patterns {
                    if let Some(negated) = pattern.strip_prefix('!') {
                        if wildcard_match(negated, host) {
                            return false;
                        }
                    } else if wildcard_match(pattern, host) {
                        matched = true;
                    }
                }
                matched
            }
        }
    }
}

impl std::fmt::Display for HostPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostPattern::Hashed { salt, hash } => write!(
                f,
                "{}{}|{}",
                HASH_MAGIC,
                STANDARD.encode(salt),
                STANDARD.encode(hash)
            ),
            HostPattern::Plain(patterns) => write!(f, "{}", patterns.join(",")),
        }
    }
}

fn hmac_sha1(salt: &[u8], host: &str) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = HmacSha1::new_from_slice(salt).unwrap_or_else(|_| unreachable!());
    mac.update(host.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// OpenSSH host patterns only know `*` and `?`; every other glob
/// metacharacter is matched literally.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '[' | ']' | '{' | '}') {
            escaped.push('[');
            escaped.push(c);
            escaped.push(']');
        } else {
            escaped.push(c);
        }
    }

    match GlobBuilder::new(&escaped)
        .case_insensitive(true)
        .literal_separator(false)
        .backslash_escape(false)
        .build()
    {
        Ok(glob) => glob.compile_matcher().is_match(text),
        Err(e) => {
            debug!("Ignoring unusable host pattern {}: {}", pattern, e);
            false
        }
    }
}

/// One trusted `(host, key)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownHost {
    pub pattern: HostPattern,
    pub key: HostKey,
}

impl KnownHost {
    /// Parse one ledger line. Comments, blank lines, `@` markers and lines
    /// with unreadable keys yield `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
            return None;
        }
        let mut fields = line.split_whitespace();
        let pattern = HostPattern::parse(fields.next()?)?;
        let algorithm = fields.next()?;
        let key = HostKey::from_openssh(algorithm, fields.next()?)?;
        Some(Self { pattern, key })
    }

    pub fn to_line(&self) -> String {
        format!("{} {} {}", self.pattern, self.key.algorithm(), self.key.to_base64())
    }
}

/// Outcome of looking a host up in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    /// An entry for the host carries the presented key
    Trusted,
    /// Entries exist for the host but none carries the presented key
    Mismatch,
    /// No entry for the host
    Unknown,
}

/// In-memory view of a known_hosts file.
#[derive(Debug)]
pub struct KnownHosts {
    path: PathBuf,
    entries: Vec<KnownHost>,
    /// The file does not end with a line break
    unterminated: bool,
}

impl KnownHosts {
    /// Load the ledger, creating an empty file (and its directory) when absent.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
                restrict_permissions(parent, 0o700)?;
            }
        }
        if !path.exists() {
            append_options().open(path)?;
            restrict_permissions(path, 0o600)?;
        }

        let content = fs::read_to_string(path)?;
        let entries: Vec<KnownHost> = content.lines().filter_map(KnownHost::parse_line).collect();
        debug!("Loaded {} known host entries from {}", entries.len(), path.display());

        Ok(Self {
            path: path.to_path_buf(),
            entries,
            unterminated: !content.is_empty() && !content.ends_with('\n'),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn check(&self, host: &str, key: &HostKey) -> HostStatus {
        let mut seen = false;
        for entry in self.entries.iter().filter(|e| e.pattern.matches(host)) {
            if entry.key == *key {
                return HostStatus::Trusted;
            }
            seen = true;
        }
        if seen {
            HostStatus::Mismatch
        } else {
            HostStatus::Unknown
        }
    }

    /// Append a hashed entry for `host` to the file, then to the in-memory view.
    pub fn append(&mut self, host: &str, key: &HostKey) -> std::io::Result<()> {
        let entry = KnownHost {
            pattern: HostPattern::hashed(host),
            key: key.clone(),
        };

        let separator = if self.unterminated { "\n" } else { "" };
        let mut file = append_options().open(&self.path)?;
        file.write_all(format!("{}{}\n", separator, entry.to_line()).as_bytes())?;
        file.sync_all()?;
        self.unterminated = false;

        self.entries.push(entry);
        Ok(())
    }
}

fn append_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    options
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::host_key::test_key;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("example.org", 22), "example.org");
        assert_eq!(normalize_host("example.org", 2222), "[example.org]:2222");
        assert_eq!(normalize_host("[::1]", 2200), "[::1]:2200");
        assert_eq!(normalize_host("Example.ORG", 22), "example.org");
    }

    #[test]
    fn test_hashed_pattern_matches_only_its_host() {
        let pattern = HostPattern::hashed("example.org");
        assert!(pattern.matches("example.org"));
        assert!(!pattern.matches("example.com"));

        let line = pattern.to_string();
        assert!(line.starts_with("|1|"));
        assert_eq!(HostPattern::parse(&line), Some(pattern));
    }

    #[test]
    fn test_plain_patterns() {
        let pattern = HostPattern::parse("*.example.org,!bad.example.org,10.0.0.?").unwrap();
        assert!(pattern.matches("www.example.org"));
        assert!(pattern.matches("WWW.Example.org"));
        assert!(pattern.matches("10.0.0.7"));
        assert!(!pattern.matches("bad.example.org"));
        assert!(!pattern.matches("10.0.0.17"));
        assert!(!pattern.matches("example.net"));
    }

    #[test]
    fn test_wildcards_and_literal_brackets() {
        assert!(wildcard_match("[files.example.org]:2222", "[files.example.org]:2222"));
        assert!(!wildcard_match("[files.example.org]:2222", "f:2222"));
        assert!(wildcard_match("[*.example.org]:*", "[cdn.example.org]:2200"));
        assert!(wildcard_match("HOST?.Example.org", "host1.example.org"));
        assert!(!wildcard_match("{a,b}.example.org", "a.example.org"));

        let many_stars = format!("{}b", "*a".repeat(30));
        assert!(!wildcard_match(&many_stars, &"a".repeat(60)));
    }

    #[test]
    fn test_parse_line_skips_noise() {
        let key = test_key("ssh-ed25519", 1);
        let line = format!("host.example ssh-ed25519 {} user@box", key.to_base64());

        assert_eq!(KnownHost::parse_line(&line).unwrap().key, key);
        assert!(KnownHost::parse_line("# comment").is_none());
        assert!(KnownHost::parse_line("   ").is_none());
        assert!(KnownHost::parse_line(&format!("@revoked * ssh-ed25519 {}", key.to_base64())).is_none());
        assert!(KnownHost::parse_line("host ssh-ed25519 not-base64!").is_none());
    }

    #[test]
    fn test_open_creates_missing_ledger() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("ssh/known_hosts");

        let ledger = KnownHosts::open(&path)?;
        assert!(ledger.is_empty());
        assert!(path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path)?.permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
        Ok(())
    }

    #[test]
    fn test_check_and_append() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("known_hosts");
        let key = test_key("ssh-ed25519", 1);
        let other = test_key("ssh-ed25519", 2);

        let mut ledger = KnownHosts::open(&path)?;
        assert_eq!(ledger.check("example.org", &key), HostStatus::Unknown);

        ledger.append("example.org", &key)?;
        assert_eq!(ledger.check("example.org", &key), HostStatus::Trusted);
        assert_eq!(ledger.check("example.org", &other), HostStatus::Mismatch);
        assert_eq!(ledger.check("[example.org]:2222", &key), HostStatus::Unknown);

        let reopened = KnownHosts::open(&path)?;
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.check("example.org", &key), HostStatus::Trusted);
        Ok(())
    }

    #[test]
    fn test_append_after_unterminated_line() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("known_hosts");
        let old = test_key("ssh-rsa", 9);
        fs::write(&path, format!("old.example ssh-rsa {}", old.to_base64()))?;

        let mut ledger = KnownHosts::open(&path)?;
        ledger.append("new.example", &test_key("ssh-ed25519", 4))?;

        let reopened = KnownHosts::open(&path)?;
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.check("old.example", &old), HostStatus::Trusted);
        Ok(())
    }

    #[test]
    fn test_append_preserves_existing_lines() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("known_hosts");
        let existing = format!("# managed by hand\nold.example ssh-rsa {}\n", test_key("ssh-rsa", 9).to_base64());
        fs::write(&path, &existing)?;

        let mut ledger = KnownHosts::open(&path)?;
        ledger.append("new.example", &test_key("ssh-ed25519", 4))?;

        let content = fs::read_to_string(&path)?;
        assert!(content.starts_with(&existing));
        assert_eq!(content.lines().count(), 3);
        Ok(())
    }
}
