//! Directory traversal producing manifest snapshots.
//!
//! Walks the synchronized tree and records one entry per regular file.
//! The engine's own configuration and manifest files are never tracked.

use super::metadata::FileStamp;
use crate::sync::manifest::{FileRecord, Manifest, RESERVED_FILE_NAMES};
use crate::utils::errors::Result;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Basenames skipped wherever they appear (exact match)
    pub exclude_names: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            exclude_names: RESERVED_FILE_NAMES.iter().map(|n| n.to_string()).collect(),
        }
    }
}

/// Build a record from a DirEntry.
/// Symlinks are resolved to their target; links to directories and broken
/// links yield `None`. Any other failure to resolve a link is an error.
fn record_from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<FileRecord>> {
    let path = entry.path();
    let relative_path = path.strip_prefix(root).unwrap_or(path).to_path_buf();

    let stamp = if entry.path_is_symlink() {
        match std::fs::metadata(path) {
            Ok(resolved) if resolved.is_dir() => return Ok(None),
            Ok(resolved) => FileStamp::from_metadata(&resolved)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        }
    } else {
        FileStamp::from_metadata(&entry.metadata()?)?
    };

    Ok(Some(FileRecord {
        absolute_path: path.to_path_buf(),
        relative_path,
        size: stamp.size,
        modified_at: stamp.modified_at,
        deleted: false,
    }))
}

/// Walk `root` and collect a fresh manifest.
///
/// Any traversal error (permission, I/O) aborts the walk.
///
/// # Example
/// ```no_run
/// use filesync::fs::walker::{scan, WalkOptions};
/// use std::path::Path;
///
/// let manifest = scan(Path::new("."), &WalkOptions::default()).unwrap();
/// println!("Tracking {} files", manifest.len());
/// ```
pub fn scan(root: &Path, options: &WalkOptions) -> Result<Manifest> {
    let root = root.canonicalize()?;
    let mut manifest = Manifest::new();

    let walker = WalkDir::new(&root)
        .into_iter()
        .filter_entry(|entry| !should_exclude(entry, &options.exclude_names));

    for entry in walker {
        let entry = entry?;

        if entry.file_type().is_dir() {
            continue;
        }

        if let Some(record) = record_from_entry(&entry, &root)? {
            manifest.insert(record);
        }
    }

    Ok(manifest)
}

/// Check if a directory entry is one of the excluded basenames
fn should_exclude(entry: &DirEntry, names: &[String]) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let file_name = entry.file_name().to_string_lossy();
    names.iter().any(|name| *name == file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::SyncError;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_scan_empty_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let manifest = scan(temp_dir.path(), &WalkOptions::default())?;
        assert!(manifest.is_empty());
        Ok(())
    }

    #[test]
    fn test_scan_with_subdirectories() -> Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"content1")?;
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"content22")?;

        let manifest = scan(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(manifest.len(), 2);

        let root = temp_dir.path().canonicalize()?;
        let nested = manifest.get(&root.join("subdir/file2.txt")).unwrap();
        assert_eq!(nested.relative_path, PathBuf::from("subdir/file2.txt"));
        assert_eq!(nested.size, 9);
        assert!(!nested.deleted);

        Ok(())
    }

    #[test]
    fn test_scan_skips_reserved_files() -> Result<()> {
        let temp_dir = TempDir::new()?;

        fs::write(temp_dir.path().join("file.txt"), b"keep")?;
        fs::write(temp_dir.path().join(".filesync.toml"), b"host = 'x'")?;
        fs::write(temp_dir.path().join(".filesync.files.json"), b"{}")?;
        fs::create_dir(temp_dir.path().join("nested"))?;
        fs::write(temp_dir.path().join("nested/.filesync.toml"), b"")?;
        fs::write(temp_dir.path().join("nested/filesync.toml"), b"")?;

        let manifest = scan(temp_dir.path(), &WalkOptions::default())?;
        let mut relative: Vec<_> = manifest.records().map(|r| r.relative_path.clone()).collect();
        relative.sort();
        assert_eq!(
            relative,
            vec![PathBuf::from("file.txt"), PathBuf::from("nested/filesync.toml")]
        );

        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_scan_resolves_file_symlinks_only() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("dir"))?;
        fs::write(temp_dir.path().join("target.txt"), b"12345")?;
        std::os::unix::fs::symlink(temp_dir.path().join("target.txt"), temp_dir.path().join("link.txt"))?;
        std::os::unix::fs::symlink(temp_dir.path().join("dir"), temp_dir.path().join("dirlink"))?;
        std::os::unix::fs::symlink(temp_dir.path().join("missing"), temp_dir.path().join("broken"))?;

        let manifest = scan(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(manifest.len(), 2);

        let root = temp_dir.path().canonicalize()?;
        assert_eq!(manifest.get(&root.join("link.txt")).unwrap().size, 5);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_scan_surfaces_unreadable_link_target() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new()?;
        let locked = temp_dir.path().join("locked");
        fs::create_dir(&locked)?;
        fs::write(locked.join("secret.txt"), b"x")?;
        std::os::unix::fs::symlink(locked.join("secret.txt"), temp_dir.path().join("link.txt"))?;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000))?;

        let options = WalkOptions {
            exclude_names: vec!["locked".to_string()],
        };
        let readable = fs::metadata(temp_dir.path().join("link.txt")).is_ok();
        let result = scan(temp_dir.path(), &options);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;

        if !readable {
            match result {
                Err(SyncError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::PermissionDenied),
                other => panic!("expected a permission error, got {:?}", other.map(|m| m.len())),
            }
        }
        Ok(())
    }

    #[test]
    fn test_scan_missing_root_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = scan(&temp_dir.path().join("nope"), &WalkOptions::default());
        assert!(matches!(result, Err(SyncError::Io(_))));
    }

    #[test]
    #[cfg(unix)]
    fn test_scan_unreadable_directory_is_traversal_error() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new()?;
        let locked = temp_dir.path().join("locked");
        fs::create_dir(&locked)?;
        fs::write(locked.join("secret.txt"), b"x")?;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000))?;

        // root ignores permission bits
        let readable = fs::read_dir(&locked).is_ok();
        let result = scan(temp_dir.path(), &WalkOptions::default());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;

        if !readable {
            assert!(matches!(result, Err(SyncError::Traversal(_))));
        }
        Ok(())
    }
}
