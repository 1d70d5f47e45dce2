//! Backup orchestration: lock, preflight, snapshot, archive, upload, then
//! either prune or report to the dashboard.
//!
//! Every failure after the lock is taken releases it before the error
//! surfaces. A pending dashboard session is settled with a failure callback
//! on any error, and the [`ExitGuard`] covers runs that never return.

use std::fmt;

use camino::Utf8Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::archive::ArchiveError;
use crate::dash::{CallbackOutcome, CallbackTransport, ExitGuard};
use crate::database::DatabaseError;
use crate::disk::{DiskError, HostDisk, Shortfall, SpaceOperation, SpaceProbe};
use crate::fs_ops::{self, FsError};
use crate::lock::LockError;
use crate::metadata::{BackupMetadata, ContentCounts, MANIFEST_FILE, MetadataError};
use crate::preflight::PreflightError;
use crate::process::{CommandRunner, ProcessError};
use crate::remote::{BackupId, HostResources, PruneSummary, RemoteError, UploadTuning};
use crate::site::{SiteKind, SiteSnapshot};
use crate::toolkit::Toolkit;

/// Errors that abort a backup.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Raised when another run holds the site lock.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// Raised when a required tool or the remote is unavailable.
    #[error(transparent)]
    Preflight(#[from] PreflightError),
    /// Raised when the site or the free space cannot be measured.
    #[error(transparent)]
    Disk(#[from] DiskError),
    /// Raised when the backup would not fit on disk.
    #[error(transparent)]
    InsufficientSpace(#[from] Shortfall),
    /// Raised when the database size cannot be estimated.
    #[error(transparent)]
    Database(#[from] DatabaseError),
    /// Raised when the working directory cannot be prepared.
    #[error(transparent)]
    Fs(#[from] FsError),
    /// Raised when metadata or the manifest cannot be written.
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    /// Raised when the WordPress inventory cannot be collected.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Raised when composing the archives fails.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    /// Raised when listing or uploading fails.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Milestones of a backup run, logged as the run advances.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackupStage {
    /// The site lock is held.
    Locked,
    /// Tools, remote and disk space were checked.
    PreflightOk,
    /// Metadata and the WordPress manifest were written.
    SnapshotTaken,
    /// Archives were composed in the working directory.
    Archived,
    /// The generation reached the remote.
    Uploaded,
    /// Old generations were pruned.
    Pruned,
    /// The dashboard accepted the success callback.
    DashReported,
    /// The new generation was removed after a rejected callback.
    RolledBack,
    /// The site lock was released.
    Unlocked,
}

impl fmt::Display for BackupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Locked => "locked",
            Self::PreflightOk => "preflight-ok",
            Self::SnapshotTaken => "snapshot-taken",
            Self::Archived => "archived",
            Self::Uploaded => "uploaded",
            Self::Pruned => "pruned",
            Self::DashReported => "dash-reported",
            Self::RolledBack => "rolled-back",
            Self::Unlocked => "unlocked",
        };
        f.write_str(label)
    }
}

/// Summary of a finished backup run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackupReport {
    /// Identifier of the uploaded generation.
    pub id: BackupId,
    /// Full remote path of the generation, including the remote name.
    pub remote_path: String,
    /// Metadata stored with the generation.
    pub metadata: BackupMetadata,
    /// Pruning outcome; `None` when pruning was skipped.
    pub retention: Option<PruneSummary>,
    /// Dashboard outcome when callbacks were requested.
    pub dash: Option<CallbackOutcome>,
    /// Last stage reached before unlocking.
    pub final_stage: BackupStage,
}

/// Runs backups for one site at a time.
#[derive(Debug)]
pub struct BackupOrchestrator<R: CommandRunner + Clone, P: SpaceProbe = HostDisk> {
    tools: Toolkit<R>,
    probe: P,
    host: Option<HostResources>,
}

impl<R: CommandRunner + Clone> BackupOrchestrator<R> {
    /// Builds an orchestrator measuring the host file system.
    #[must_use]
    pub const fn new(tools: Toolkit<R>) -> Self {
        Self {
            tools,
            probe: HostDisk,
            host: None,
        }
    }
}

impl<R: CommandRunner + Clone, P: SpaceProbe> BackupOrchestrator<R, P> {
    /// Replaces the size and free-space source.
    #[must_use]
    pub fn with_space_probe<Q: SpaceProbe>(self, probe: Q) -> BackupOrchestrator<R, Q> {
        BackupOrchestrator {
            tools: self.tools,
            probe,
            host: self.host,
        }
    }

    /// Fixes the host figures used for transfer tuning instead of probing.
    #[must_use]
    pub const fn with_host_resources(mut self, host: HostResources) -> Self {
        self.host = Some(host);
        self
    }

    /// Remote generations of `site`, most recent first. Takes no lock.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Remote`] when the listing fails.
    pub fn list(&self, site: &str) -> Result<Vec<BackupId>, BackupError> {
        Ok(self.tools.store.list_generations(site)?)
    }

    /// Takes a backup of `site`.
    ///
    /// `guard` carries an armed dashboard session when callbacks were
    /// requested. A rejected success callback is not an error: the new
    /// generation is rolled back and the report says so.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError`] for the first step that failed; the lock is
    /// released and a pending dashboard session is told about the failure.
    pub async fn run<T>(
        &self,
        site: &SiteSnapshot,
        mut guard: Option<ExitGuard<T>>,
    ) -> Result<BackupReport, BackupError>
    where
        T: CallbackTransport + Clone + 'static,
    {
        info!(site = %site.url, site_type = site.kind.tag(), "starting backup");
        let result = self.run_locked(site, guard.as_mut()).await;
        if let Err(err) = &result {
            warn!(site = %site.url, error = %err, "backup failed");
            if let Some(active) = guard.as_mut() {
                active.settle().await;
            }
        }
        result
    }

    async fn run_locked<T>(
        &self,
        site: &SiteSnapshot,
        guard: Option<&mut ExitGuard<T>>,
    ) -> Result<BackupReport, BackupError>
    where
        T: CallbackTransport + Clone + 'static,
    {
        fs_ops::create_dir_all(self.tools.backup_root())?;
        let lock = self.tools.locks.acquire(&site.url)?;
        enter(site, BackupStage::Locked);
        let result = self.pipeline(site, guard).await;
        lock.release_logged();
        enter(site, BackupStage::Unlocked);
        result
    }

    async fn pipeline<T>(
        &self,
        site: &SiteSnapshot,
        guard: Option<&mut ExitGuard<T>>,
    ) -> Result<BackupReport, BackupError>
    where
        T: CallbackTransport + Clone + 'static,
    {
        self.tools.preflight.run(&self.tools.store)?;
        self.ensure_space(site)?;
        enter(site, BackupStage::PreflightOk);

        let work_dir = self.tools.work_dir(&site.url);
        fs_ops::remove_dir_all_if_exists(&work_dir)?;
        fs_ops::create_dir_all(&work_dir)?;

        let counts = self.snapshot_wordpress(site, &work_dir)?;
        let id = BackupId::generate();
        let remote_path = self.tools.store.generation_path(&site.url, &id);
        let metadata = BackupMetadata::for_site(site, without_remote(&remote_path), counts);
        metadata.persist(&work_dir, self.tools.backup_root())?;
        enter(site, BackupStage::SnapshotTaken);

        self.tools.composer.compose(site, &work_dir)?;
        enter(site, BackupStage::Archived);

        self.upload(&work_dir, &remote_path)?;
        fs_ops::remove_dir_all_if_exists(&work_dir)?;
        enter(site, BackupStage::Uploaded);

        let (retention, dash, final_stage) = match guard {
            Some(active) => match active.report_success(&metadata).await {
                Ok(()) => {
                    enter(site, BackupStage::DashReported);
                    (Some(self.prune(site)), Some(active.outcome()), BackupStage::Pruned)
                }
                Err(err) => {
                    warn!(site = %site.url, error = %err, "dashboard callback failed, rolling back newly uploaded backup");
                    self.roll_back(&remote_path);
                    enter(site, BackupStage::RolledBack);
                    (None, Some(active.outcome()), BackupStage::RolledBack)
                }
            },
            None => (Some(self.prune(site)), None, BackupStage::Pruned),
        };
        Ok(BackupReport {
            id,
            remote_path,
            metadata,
            retention,
            dash,
            final_stage,
        })
    }

    fn ensure_space(&self, site: &SiteSnapshot) -> Result<(), BackupError> {
        let mut required = self.probe.directory_size(&site.htdocs_dir())?;
        debug!(site = %site.url, size = required, "site size");
        if let Some(credentials) = site.kind.database() {
            let database = self.tools.database.estimate_size(site, credentials)?;
            required = required.saturating_add(database);
            debug!(site = %site.url, size = required, "site size with database");
        }
        let available = self.probe.free_space(self.tools.backup_root())?;
        debug!(free = available, "free space in backup root");
        match Shortfall::check(SpaceOperation::Backup, required, available) {
            Some(shortfall) => Err(shortfall.into()),
            None => Ok(()),
        }
    }

    fn snapshot_wordpress(
        &self,
        site: &SiteSnapshot,
        work_dir: &Utf8Path,
    ) -> Result<Option<ContentCounts>, BackupError> {
        if !matches!(site.kind, SiteKind::WordPress { .. }) {
            return Ok(None);
        }
        let inventory = self.tools.wordpress.collect(site)?;
        inventory.manifest.write(&work_dir.join(MANIFEST_FILE))?;
        Ok(Some(inventory.counts))
    }

    fn upload(&self, work_dir: &Utf8Path, remote_path: &str) -> Result<(), BackupError> {
        let store = &self.tools.store;
        let host = self.host.unwrap_or_else(HostResources::detect);
        let tuning = UploadTuning::for_host(host, store.backend_is_s3()?);
        debug!(?tuning, "upload tuning");
        store.upload(work_dir, remote_path, &tuning)?;
        match store.confirm(remote_path) {
            Ok(listing) => info!(
                remote_path,
                contents = %listing.replace('\n', " "),
                "backup uploaded to remote storage"
            ),
            Err(err) => warn!(remote_path, error = %err, "could not list the uploaded backup"),
        }
        Ok(())
    }

    fn prune(&self, site: &SiteSnapshot) -> PruneSummary {
        let summary = self.tools.store.prune(&site.url, self.tools.retention);
        enter(site, BackupStage::Pruned);
        summary
    }

    fn roll_back(&self, remote_path: &str) {
        info!(remote_path, "deleting unregistered backup");
        match self.tools.store.purge(remote_path) {
            Ok(()) => info!(remote_path, "removed unregistered backup from remote storage"),
            Err(err) => warn!(
                error = %err,
                "Failed to delete backup from remote storage. Please manually delete: {remote_path}"
            ),
        }
    }
}

fn enter(site: &SiteSnapshot, stage: BackupStage) {
    debug!(site = %site.url, %stage, "backup stage reached");
}

/// Generation path as recorded in metadata: without the `<remote>:` prefix.
fn without_remote(remote_path: &str) -> &str {
    remote_path
        .split_once(':')
        .map_or(remote_path, |(_, path)| path)
}
