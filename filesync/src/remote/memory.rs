//! In-memory remote used by the transfer tests.

use super::path;
use super::{EntryKind, RemoteEntry, RemoteSession};
use crate::utils::errors::{Result, SyncError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

#[derive(Default)]
pub struct MemoryRemote {
    files: Mutex<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>,
    dirs: Mutex<BTreeSet<String>>,
    failing: Mutex<HashSet<String>>,
    removed: Mutex<Vec<String>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    transfers: AtomicUsize,
}

/// Counts concurrent operations for the lifetime of the guard
struct Busy<'a>(&'a MemoryRemote);

impl<'a> Busy<'a> {
    fn enter(remote: &'a MemoryRemote) -> Self {
        let now = remote.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        remote.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = remote.latency {
            thread::sleep(latency);
        }
        Busy(remote)
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every get/put sleeps for `latency` so overlapping calls are observable.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn insert_file(&self, remote: &str, content: &[u8]) {
        let remote = path::normalize(remote);
        self.add_dirs(&path::parent(&remote));
        self.files
            .lock()
            .unwrap()
            .insert(remote, (content.to_vec(), Utc::now()));
    }

    pub fn file(&self, remote: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(&path::normalize(remote))
            .map(|(content, _)| content.clone())
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    pub fn has_dir(&self, remote: &str) -> bool {
        self.dirs.lock().unwrap().contains(&path::normalize(remote))
    }

    /// Make every get/put/remove of `remote` fail.
    pub fn fail_on(&self, remote: &str) {
        self.failing.lock().unwrap().insert(path::normalize(remote));
    }

    /// Paths passed to `remove`, in call order, whether or not they existed.
    pub fn removed_paths(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.load(Ordering::SeqCst)
    }

    fn add_dirs(&self, dir: &str) {
        let mut dirs = self.dirs.lock().unwrap();
        for ancestor in path::ancestors(dir) {
            dirs.insert(ancestor);
        }
    }

    fn check(&self, remote: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(remote) {
            return Err(SyncError::transfer(remote, "injected failure"));
        }
        Ok(())
    }
}

impl RemoteSession for MemoryRemote {
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let dir = path::normalize(dir);
        let mut entries = Vec::new();
        for sub in self.dirs.lock().unwrap().iter() {
            if sub != &dir && path::parent(sub) == dir {
                entries.push(RemoteEntry {
                    path: sub.clone(),
                    kind: EntryKind::Directory,
                    size: 0,
                    modified_at: DateTime::<Utc>::UNIX_EPOCH,
                });
            }
        }
        for (file, (content, modified_at)) in self.files.lock().unwrap().iter() {
            if path::parent(file) == dir {
                entries.push(RemoteEntry {
                    path: file.clone(),
                    kind: EntryKind::File,
                    size: content.len() as u64,
                    modified_at: *modified_at,
                });
            }
        }
        Ok(entries)
    }

    fn get(&self, remote: &str, mut sink: Box<dyn Write + Send>) -> Result<u64> {
        let _busy = Busy::enter(self);
        self.check(remote)?;
        let content = self
            .file(remote)
            .ok_or_else(|| SyncError::transfer(remote, "no such file"))?;
        sink.write_all(&content)?;
        sink.flush()?;
        self.transfers.fetch_add(1, Ordering::SeqCst);
        Ok(content.len() as u64)
    }

    fn put(&self, remote: &str, mut source: Box<dyn Read + Send>) -> Result<u64> {
        let _busy = Busy::enter(self);
        self.check(remote)?;
        if !self.has_dir(&path::parent(remote)) && path::parent(remote) != "/" {
            return Err(SyncError::transfer(remote, "parent directory missing"));
        }
        let mut content = Vec::new();
        source.read_to_end(&mut content)?;
        let size = content.len() as u64;
        self.files
            .lock()
            .unwrap()
            .insert(path::normalize(remote), (content, Utc::now()));
        self.transfers.fetch_add(1, Ordering::SeqCst);
        Ok(size)
    }

    fn remove(&self, remote: &str) -> Result<bool> {
        let _busy = Busy::enter(self);
        self.check(remote)?;
        self.removed.lock().unwrap().push(remote.to_string());
        Ok(self.files.lock().unwrap().remove(&path::normalize(remote)).is_some())
    }

    fn make_dir_all(&self, dir: &str) -> Result<()> {
        self.add_dirs(dir);
        Ok(())
    }

    fn exists(&self, remote: &str) -> Result<bool> {
        Ok(self.files.lock().unwrap().contains_key(&path::normalize(remote)))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
