//! Manifest reconciliation.
//!
//! Pure functions over manifests: merge-by-recency, set subtraction and change
//! selection against the sync checkpoint. Deletions are found by subtracting a
//! fresh scan from the previous manifest, since the tool runs once per sync and
//! keeps no filesystem watcher.

use super::manifest::{is_reserved, FileRecord, Manifest};
use crate::config::parse_checkpoint;
use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Union of both manifests. For a key present in both, the record with the
/// strictly later `modified_at` wins; on a tie the record from `a` is kept.
pub fn merge(a: &Manifest, b: &Manifest) -> Manifest {
    let mut merged = a.clone();
    for record in b.records() {
        let newer = match merged.get(&record.absolute_path) {
            Some(existing) => record.modified_at > existing.modified_at,
            None => true,
        };
        if newer {
            merged.insert(record.clone());
        }
    }
    merged
}

/// Records of `a` whose key is absent from `b`.
pub fn subtract(a: &Manifest, b: &Manifest) -> Manifest {
    a.records()
        .filter(|record| !b.contains(&record.absolute_path))
        .cloned()
        .collect()
}

/// Fold a fresh scan together with the previous manifest.
///
/// Paths tracked before but missing from the scan come back as soft deletes
/// stamped with `detected_at`. Entries that were already soft deletes keep
/// their first detection time so an unchanged tree reconciles to the same
/// manifest.
///
/// A vanished entry whose relative path is still present in the scan (the
/// tree was moved or renamed) maps to a live remote file and is dropped
/// instead of becoming a deletion.
pub fn reconcile(previous: &Manifest, fresh: &Manifest, detected_at: DateTime<Utc>) -> Manifest {
    let live: HashSet<&Path> = fresh
        .records()
        .filter(|record| !record.deleted)
        .map(|record| record.relative_path.as_path())
        .collect();
    let deletions: Manifest = subtract(previous, fresh)
        .records()
        .filter(|record| !live.contains(record.relative_path.as_path()))
        .cloned()
        .map(|record| record.into_deleted(detected_at))
        .collect();
    merge(fresh, &deletions)
}

/// Keep one record per relative path, which is one per remote target.
///
/// A live record wins over a deletion; between records of the same kind the
/// later `modified_at` wins. Output is ordered by relative path.
pub fn one_per_target(records: Vec<FileRecord>) -> Vec<FileRecord> {
    let mut by_target: BTreeMap<PathBuf, FileRecord> = BTreeMap::new();
    for record in records {
        match by_target.get(&record.relative_path) {
            Some(kept) if (!kept.deleted, kept.modified_at) >= (!record.deleted, record.modified_at) => {}
            _ => {
                by_target.insert(record.relative_path.clone(), record);
            }
        }
    }
    by_target.into_values().collect()
}

/// Records modified strictly after `checkpoint`, reserved files excluded.
pub fn changed_since(manifest: &Manifest, checkpoint: DateTime<Utc>) -> Vec<FileRecord> {
    manifest
        .records()
        .filter(|record| record.modified_at > checkpoint && !is_reserved(&record.absolute_path))
        .cloned()
        .collect()
}

/// Like [`changed_since`] with the checkpoint as stored in the configuration.
/// A checkpoint that is not RFC3339 is a configuration error.
pub fn select_changed_since(manifest: &Manifest, checkpoint: &str) -> Result<Vec<FileRecord>> {
    let checkpoint = parse_checkpoint(checkpoint)?;
    Ok(changed_since(manifest, checkpoint))
}
