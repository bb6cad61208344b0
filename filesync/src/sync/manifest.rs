//! Manifest types for incremental sync support.
//!
//! A manifest records every tracked file of the local tree with its size and
//! mtime, plus soft-deleted entries that still have to be removed remotely.
//! It is serialized as `.filesync.files.json` at the root of the tree.

use crate::config::CONFIG_FILE_NAME;
use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Manifest file name, always excluded from synchronization.
pub const MANIFEST_FILE_NAME: &str = ".filesync.files.json";

/// Files the engine writes into the tree it tracks.
pub const RESERVED_FILE_NAMES: [&str; 2] = [CONFIG_FILE_NAME, MANIFEST_FILE_NAME];

/// True when the basename of `path` is one of the engine's own files.
pub fn is_reserved(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| RESERVED_FILE_NAMES.contains(&name))
        .unwrap_or(false)
}

/// Metadata for a single tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub absolute_path: PathBuf,
    pub relative_path: PathBuf,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

impl FileRecord {
    /// Soft-deleted copy of this record, detected at `detected_at`.
    pub fn into_deleted(self, detected_at: DateTime<Utc>) -> Self {
        if self.deleted {
            return self;
        }
        Self {
            deleted: true,
            modified_at: detected_at,
            ..self
        }
    }
}

/// Snapshot of the tracked tree keyed by absolute path.
///
/// Backed by a sorted map so that equal manifests serialize to equal bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    files: BTreeMap<PathBuf, FileRecord>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record under its absolute path, replacing any previous one
    pub fn insert(&mut self, record: FileRecord) -> Option<FileRecord> {
        self.files.insert(record.absolute_path.clone(), record)
    }

    pub fn get(&self, absolute_path: &Path) -> Option<&FileRecord> {
        self.files.get(absolute_path)
    }

    pub fn contains(&self, absolute_path: &Path) -> bool {
        self.files.contains_key(absolute_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.keys()
    }

    pub fn deleted_count(&self) -> usize {
        self.files.values().filter(|r| r.deleted).count()
    }

    /// Drop soft-deleted entries once their removal has been propagated.
    /// Returns how many entries were purged.
    pub fn purge_deleted(&mut self) -> usize {
        let before = self.files.len();
        self.files.retain(|_, record| !record.deleted);
        before - self.files.len()
    }
}

impl FromIterator<FileRecord> for Manifest {
    fn from_iter<I: IntoIterator<Item = FileRecord>>(iter: I) -> Self {
        let mut manifest = Manifest::new();
        for record in iter {
            manifest.insert(record);
        }
        manifest
    }
}

/// Durable storage for the manifest of one tree.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for the manifest file living at the root of `root`
    pub fn in_root(root: &Path) -> Self {
        Self::new(root.join(MANIFEST_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored manifest; `None` if none was written yet.
    pub fn load(&self) -> Result<Option<Manifest>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let manifest: Manifest = serde_json::from_str(&content)?;
        debug!("Loaded manifest {} ({} entries)", self.path.display(), manifest.len());
        Ok(Some(manifest))
    }

    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        let mut content = serde_json::to_string_pretty(manifest)?;
        content.push('\n');
        std::fs::write(&self.path, content)?;
        debug!("Stored manifest {} ({} entries)", self.path.display(), manifest.len());
        Ok(())
    }
}
