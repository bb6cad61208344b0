//! Transfer executor - drives push and clone passes over a connected session.
//!
//! Every file of a pass gets its own task, spawned up front. A semaphore of
//! `max_connections` permits bounds how many of them talk to the server at
//! once; the blocking backend call runs on the blocking pool while the permit
//! is held.
//!
//! The first failing task cancels the pass: tasks still waiting for a permit
//! give up, tasks already transferring run to completion. Nothing is
//! persisted after a failed pass and files already transferred stay on the
//! remote side.

use crate::config::SyncConfig;
use crate::remote::{path, RemoteEntry, RemoteSession};
use crate::sync::manifest::{is_reserved, FileRecord, ManifestStore};
use crate::sync::{diff, refresh_manifest};
use crate::transfer::progress::{Direction, PassProgress, PassSummary};
use crate::utils::errors::{Result, SyncError};
use chrono::Utc;
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Remote directories already created during this pass
#[derive(Default)]
struct CreatedDirs(Mutex<HashSet<String>>);

impl CreatedDirs {
    fn ensure(&self, session: &dyn RemoteSession, dir: &str) -> Result<()> {
        if dir == "/" || self.0.lock().unwrap_or_else(|e| e.into_inner()).contains(dir) {
            return Ok(());
        }
        session.make_dir_all(dir)?;
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(dir.to_string());
        Ok(())
    }
}

/// Runs push and clone passes against one remote session
pub struct TransferExecutor {
    session: Arc<dyn RemoteSession>,
    remote_root: String,
    max_connections: usize,
}

impl TransferExecutor {
    pub fn new(session: Arc<dyn RemoteSession>, config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            session,
            remote_root: path::remote_root(&config.server_folder),
            max_connections: config.max_connections,
        })
    }

    /// Upload everything under `root` that changed since the checkpoint and
    /// replay local deletions.
    ///
    /// On success the checkpoint in `config` advances and is saved to
    /// `config_path`, and soft deletes are purged from the manifest.
    pub async fn push(
        &self,
        root: &Path,
        config: &mut SyncConfig,
        config_path: &Path,
    ) -> Result<PassSummary> {
        let checkpoint = config.checkpoint()?;

        let store = ManifestStore::in_root(root);
        let mut manifest = {
            let label = root.display().to_string();
            let root = root.to_path_buf();
            let store = store.clone();
            tokio::task::spawn_blocking(move || refresh_manifest(&root, &store))
                .await
                .map_err(|e| join_failure(&label, e))??
        };

        let pending = diff::one_per_target(diff::changed_since(&manifest, checkpoint));
        let deletions = pending.iter().filter(|r| r.deleted).count();
        let total_bytes = pending.iter().filter(|r| !r.deleted).map(|r| r.size).sum();
        info!(
            "Pushing {} changes since {} ({} uploads, {} deletions) to {} with up to {} connections",
            pending.len(),
            config.last_update_date,
            pending.len() - deletions,
            deletions,
            self.remote_root,
            self.max_connections
        );

        let progress = Arc::new(PassProgress::new(Direction::Push, pending.len(), total_bytes));
        let created_dirs = Arc::new(CreatedDirs::default());

        let jobs = pending.into_iter().map(|record| {
            let session = Arc::clone(&self.session);
            let remote_root = self.remote_root.clone();
            let progress = Arc::clone(&progress);
            let created_dirs = Arc::clone(&created_dirs);
            let target = path::join(&self.remote_root, &record.relative_path);
            (target, move || push_record(&*session, &remote_root, &record, &progress, &created_dirs))
        });
        self.run_bounded(jobs).await?;

        config.advance_checkpoint(Utc::now());
        config.save(config_path)?;
        let purged = manifest.purge_deleted();
        store.save(&manifest)?;
        info!(
            "Checkpoint advanced to {}, {} deletions purged from the manifest",
            config.last_update_date, purged
        );

        let summary = progress.summary();
        summary.log();
        Ok(summary)
    }

    /// Download the whole remote tree into `root`.
    pub async fn clone_tree(&self, root: &Path) -> Result<PassSummary> {
        let files: Vec<(RemoteEntry, String)> = self
            .walk_remote()
            .await?
            .into_iter()
            .filter_map(|entry| {
                let relative = path::relative_to(&self.remote_root, &entry.path)?;
                if is_reserved(Path::new(&relative)) {
                    warn!("Not cloning reserved file {}", entry.path);
                    return None;
                }
                Some((entry, relative))
            })
            .collect();

        let total_bytes = files.iter().map(|(entry, _)| entry.size).sum();
        info!(
            "Cloning {} files from {} into {} with up to {} connections",
            files.len(),
            self.remote_root,
            root.display(),
            self.max_connections
        );

        let progress = Arc::new(PassProgress::new(Direction::Clone, files.len(), total_bytes));
        let jobs = files.into_iter().map(|(entry, relative)| {
            let session = Arc::clone(&self.session);
            let progress = Arc::clone(&progress);
            let local = root.join(&relative);
            let target = entry.path.clone();
            (target, move || download_entry(&*session, &entry, &local, &progress))
        });
        self.run_bounded(jobs).await?;

        let summary = progress.summary();
        summary.log();
        Ok(summary)
    }

    /// Breadth-first listing of the remote root; each level's listings share
    /// the connection bound.
    async fn walk_remote(&self) -> Result<Vec<RemoteEntry>> {
        let mut files = Vec::new();
        let mut level = vec![self.remote_root.clone()];

        while !level.is_empty() {
            let jobs = std::mem::take(&mut level).into_iter().map(|dir| {
                let session = Arc::clone(&self.session);
                let target = dir.clone();
                (target, move || session.list(&dir))
            });

            let mut next = Vec::new();
            for entries in self.run_bounded(jobs).await? {
                for entry in entries {
                    if entry.is_dir() {
                        next.push(entry.path);
                    } else {
                        files.push(entry);
                    }
                }
            }
            level = next;
        }

        Ok(files)
    }

    /// Spawn one task per job, admit at most `max_connections` at a time and
    /// wait for all of them.
    ///
    /// Results come back in job order. When tasks fail, the error of the first
    /// failed job in that order is returned.
    async fn run_bounded<T, F, I>(&self, jobs: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = (String, F)>,
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));
        let cancel_token = CancellationToken::new();

        let handles: Vec<(String, JoinHandle<Result<Option<T>>>)> = jobs
            .into_iter()
            .map(|(target, job)| {
                let semaphore = Arc::clone(&semaphore);
                let cancel = cancel_token.clone();
                let label = target.clone();

                let handle = tokio::spawn(async move {
                    let permit = tokio::select! {
                        permit = semaphore.acquire_owned() => permit.map_err(|e| {
                            SyncError::transfer(&label, format!("admission closed: {}", e))
                        })?,
                        _ = cancel.cancelled() => return Ok(None),
                    };
                    if cancel.is_cancelled() {
                        return Ok(None);
                    }

                    let result = tokio::task::spawn_blocking(job)
                        .await
                        .map_err(|e| join_failure(&label, e))
                        .and_then(|result| result);
                    drop(permit);

                    if let Err(e) = &result {
                        warn!("Transfer of {} failed: {}", label, e);
                        cancel.cancel();
                    }
                    result.map(Some)
                });
                (target, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for (target, handle) in handles {
            let outcome = handle.await.map_err(|e| join_failure(&target, e)).and_then(|r| r);
            match outcome {
                Ok(Some(value)) => results.push(value),
                Ok(None) => {}
                Err(e) => {
                    cancel_token.cancel();
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }
}

fn push_record(
    session: &dyn RemoteSession,
    remote_root: &str,
    record: &FileRecord,
    progress: &PassProgress,
    created_dirs: &CreatedDirs,
) -> Result<()> {
    let remote = path::join(remote_root, &record.relative_path);

    if record.deleted {
        let removed = session.remove(&remote)?;
        if !removed {
            warn!("{} is already absent on the server, skipping deletion", remote);
        }
        progress.deletion_done(&remote, removed);
        return Ok(());
    }

    created_dirs.ensure(session, &path::parent(&remote))?;
    let source = File::open(&record.absolute_path)
        .map_err(|e| SyncError::transfer(record.absolute_path.display().to_string(), e))?;
    let bytes = session.put(&remote, Box::new(source))?;
    if !session.exists(&remote)? {
        return Err(SyncError::transfer(remote, "file missing on the server after upload"));
    }
    progress.file_done(&remote, bytes);
    Ok(())
}

fn download_entry(
    session: &dyn RemoteSession,
    entry: &RemoteEntry,
    local: &Path,
    progress: &PassProgress,
) -> Result<()> {
    let local_error = |e: std::io::Error| SyncError::transfer(local.display().to_string(), e);

    if let Some(parent) = local.parent() {
        fs::create_dir_all(parent).map_err(local_error)?;
    }
    let file = File::create(local).map_err(local_error)?;
    let sink = file.try_clone().map_err(local_error)?;

    let bytes = session.get(&entry.path, Box::new(sink))?;
    file.sync_all().map_err(local_error)?;

    let written = fs::metadata(local).map_err(local_error)?.len();
    if written != bytes {
        return Err(SyncError::transfer(
            local.display().to_string(),
            format!("expected {} bytes on disk, found {}", bytes, written),
        ));
    }
    progress.file_done(&entry.path, bytes);
    Ok(())
}

fn join_failure(target: &str, err: JoinError) -> SyncError {
    SyncError::transfer(target, format!("transfer task failed: {}", err))
}
