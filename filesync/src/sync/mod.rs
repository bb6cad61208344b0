//! Incremental sync state: manifest storage and reconciliation.

pub mod diff;
pub mod manifest;

use crate::fs::walker::{scan, WalkOptions};
use crate::utils::errors::Result;
use chrono::Utc;
use manifest::{Manifest, ManifestStore};
use std::path::Path;
use tracing::info;

/// Scan `root`, fold in deletions against the stored manifest and persist the result.
///
/// Nothing is written when the scan fails, so an incomplete walk never
/// replaces the previous manifest.
pub fn refresh_manifest(root: &Path, store: &ManifestStore) -> Result<Manifest> {
    let fresh = scan(root, &WalkOptions::default())?;
    let detected_at = Utc::now();

    let reconciled = match store.load()? {
        Some(previous) => diff::reconcile(&previous, &fresh, detected_at),
        None => fresh,
    };

    store.save(&reconciled)?;
    info!(
        "Scanned {}: {} files tracked, {} pending deletions",
        root.display(),
        reconciled.len() - reconciled.deleted_count(),
        reconciled.deleted_count()
    );
    Ok(reconciled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_refresh_is_idempotent() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("a.txt"), b"a")?;
        fs::create_dir(dir.path().join("sub"))?;
        fs::write(dir.path().join("sub/b.txt"), b"bb")?;
        let store = ManifestStore::in_root(dir.path());

        refresh_manifest(dir.path(), &store)?;
        let first = fs::read(store.path())?;
        refresh_manifest(dir.path(), &store)?;
        let second = fs::read(store.path())?;

        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_refresh_is_idempotent_with_pending_deletion() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("a.txt"), b"a")?;
        fs::write(dir.path().join("b.txt"), b"b")?;
        let store = ManifestStore::in_root(dir.path());

        refresh_manifest(dir.path(), &store)?;
        fs::remove_file(dir.path().join("b.txt"))?;

        refresh_manifest(dir.path(), &store)?;
        let first = fs::read(store.path())?;
        refresh_manifest(dir.path(), &store)?;
        let second = fs::read(store.path())?;

        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_refresh_marks_removed_file() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("a.txt"), b"a")?;
        fs::write(dir.path().join("b.txt"), b"b")?;
        let store = ManifestStore::in_root(dir.path());

        let before = refresh_manifest(dir.path(), &store)?;
        assert_eq!(before.deleted_count(), 0);

        fs::remove_file(dir.path().join("b.txt"))?;
        let after = refresh_manifest(dir.path(), &store)?;

        let root = dir.path().canonicalize()?;
        let b = after.get(&root.join("b.txt")).unwrap();
        assert!(b.deleted);
        assert!(b.modified_at >= before.get(&root.join("b.txt")).unwrap().modified_at);
        assert!(!after.get(&root.join("a.txt")).unwrap().deleted);

        // the stored copy carries the soft delete too
        assert_eq!(store.load()?, Some(after));
        Ok(())
    }

    #[test]
    fn test_refresh_never_tracks_its_own_files() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("a.txt"), b"a")?;
        let store = ManifestStore::in_root(dir.path());

        refresh_manifest(dir.path(), &store)?;
        let manifest = refresh_manifest(dir.path(), &store)?;
        assert_eq!(manifest.len(), 1);
        Ok(())
    }
}
