//! Restore orchestration: lock, preflight, select and fetch a generation,
//! verify it matches the live site, then lay it back per site type.
//!
//! Nothing below the site tree is written until the generation has been
//! selected, sized and verified.

use camino::Utf8Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::archive::{ArchiveError, extracted_sql};
use crate::database::DatabaseError;
use crate::disk::{DiskError, HostDisk, Shortfall, SpaceOperation, SpaceProbe};
use crate::fs_ops::{self, FsError};
use crate::lock::LockError;
use crate::metadata::{BackupMetadata, METADATA_FILE, MetadataError};
use crate::preflight::PreflightError;
use crate::process::{CommandRunner, ProcessError};
use crate::remote::{BackupId, DownloadTuning, HostResources, RemoteError};
use crate::site::{DatabaseCredentials, SiteKind, SiteSnapshot};
use crate::toolkit::Toolkit;
use crate::wordpress::WordPressError;

/// Mode applied to the content directory before extraction.
const CONTENT_DIR_MODE: u32 = 0o755;

/// Ways a stored generation can disagree with the live site.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum Incompatibility {
    /// The site type changed since the backup.
    #[error("Site type does not match with the backed up site.")]
    SiteType,
    /// Exactly one of backup and site has a database.
    #[error("Database mismatch between backup and current site.")]
    Database,
    /// The container content path changed since the backup.
    #[error("Site public-dir does not match with the backed up site.")]
    PublicDir,
}

/// Checks that `metadata` describes a backup of a site shaped like `site`.
///
/// # Errors
///
/// Returns the first [`Incompatibility`] found.
pub fn verify_compatibility(
    site: &SiteSnapshot,
    metadata: &BackupMetadata,
) -> Result<(), Incompatibility> {
    if site.kind.tag() != metadata.site_type {
        return Err(Incompatibility::SiteType);
    }
    if site.has_database() != metadata.has_database() {
        return Err(Incompatibility::Database);
    }
    if site.container_fs_path != metadata.site_container_fs_path {
        return Err(Incompatibility::PublicDir);
    }
    Ok(())
}

/// Errors that abort a restore.
#[derive(Debug, Error)]
pub enum RestoreError {
    /// Raised when another run holds the site lock.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// Raised when a required tool or the remote is unavailable.
    #[error(transparent)]
    Preflight(#[from] PreflightError),
    /// Raised when selection, sizing or download fails.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// Raised when free space cannot be determined.
    #[error(transparent)]
    Disk(#[from] DiskError),
    /// Raised when the generation would not fit on disk.
    #[error(transparent)]
    InsufficientSpace(#[from] Shortfall),
    /// Raised when the stored generation does not match the site.
    #[error(transparent)]
    Incompatible(#[from] Incompatibility),
    /// Raised when local directories cannot be prepared.
    #[error(transparent)]
    Fs(#[from] FsError),
    /// Raised when the stored metadata cannot be read.
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    /// Raised when extraction fails.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    /// Raised when the database replay fails.
    #[error(transparent)]
    Database(#[from] DatabaseError),
    /// Raised when a WP-CLI step fails.
    #[error(transparent)]
    WordPress(#[from] WordPressError),
    /// Raised when re-enabling or reloading the site fails.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Summary of a finished restore.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RestoreReport {
    /// Generation that was restored.
    pub id: BackupId,
    /// Metadata stored with the generation.
    pub metadata: BackupMetadata,
    /// Whether compose overlays were restored and the site re-enabled.
    pub overlays_restored: bool,
}

/// Restores sites from remote generations.
#[derive(Debug)]
pub struct RestoreOrchestrator<R: CommandRunner + Clone, P: SpaceProbe = HostDisk> {
    tools: Toolkit<R>,
    probe: P,
    host: Option<HostResources>,
}

impl<R: CommandRunner + Clone> RestoreOrchestrator<R> {
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

impl<R: CommandRunner + Clone, P: SpaceProbe> RestoreOrchestrator<R, P> {
    /// Replaces the free-space source.
    #[must_use]
    pub fn with_space_probe<Q: SpaceProbe>(self, probe: Q) -> RestoreOrchestrator<R, Q> {
        RestoreOrchestrator {
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

    /// Restores `site` from `requested`, or from the newest generation.
    ///
    /// # Errors
    ///
    /// Returns [`RestoreError`] for the first step that failed; the lock is
    /// released before the error is returned.
    pub fn run(
        &self,
        site: &SiteSnapshot,
        requested: Option<&str>,
    ) -> Result<RestoreReport, RestoreError> {
        info!(site = %site.url, site_type = site.kind.tag(), "starting restore");
        fs_ops::create_dir_all(self.tools.backup_root())?;
        let lock = self.tools.locks.acquire(&site.url)?;
        let result = self.pipeline(site, requested);
        lock.release_logged();
        result
    }

    fn pipeline(
        &self,
        site: &SiteSnapshot,
        requested: Option<&str>,
    ) -> Result<RestoreReport, RestoreError> {
        self.tools.preflight.run(&self.tools.store)?;
        let id = self.tools.store.select_generation(&site.url, requested)?;
        let remote_path = self.tools.store.generation_path(&site.url, &id);
        self.ensure_space(&remote_path)?;
        info!(site = %site.url, backup = %id, "restoring backup");

        let work_dir = self.tools.work_dir(&site.url);
        let metadata = self.ensure_local_copy(site, &remote_path, &work_dir)?;
        verify_compatibility(site, &metadata)?;
        debug!(site = %site.url, "backup metadata verified");

        self.prepare_site_dir(site)?;
        let archive = work_dir.join(site.archive_name());
        let overlays_restored = match &site.kind {
            SiteKind::Html | SiteKind::Php { .. } => self.restore_site(site, &archive, &work_dir)?,
            SiteKind::WordPress { database } => {
                self.restore_wordpress(site, database.as_ref(), &archive, &work_dir)?
            }
        };
        if overlays_restored {
            info!(site = %site.url, "re-enabling site to apply custom docker-compose files");
            self.tools.sites.enable(&site.url)?;
        }
        fs_ops::remove_dir_all_if_exists(&work_dir)?;

        info!(site = %site.url, "reloading site");
        self.tools.sites.reload(&site.url)?;
        info!(site = %site.url, backup = %id, "site restored");
        Ok(RestoreReport {
            id,
            metadata,
            overlays_restored,
        })
    }

    fn ensure_space(&self, remote_path: &str) -> Result<(), RestoreError> {
        let required = self.tools.store.generation_size(remote_path)?;
        debug!(remote_path, size = required, "remote backup size");
        let available = self.probe.free_space(self.tools.backup_root())?;
        match Shortfall::check(SpaceOperation::Restore, required, available) {
            Some(shortfall) => Err(shortfall.into()),
            None => Ok(()),
        }
    }

    /// Reuses a working copy of the same generation left by an earlier
    /// attempt, otherwise downloads it afresh.
    fn ensure_local_copy(
        &self,
        site: &SiteSnapshot,
        remote_path: &str,
        work_dir: &Utf8Path,
    ) -> Result<BackupMetadata, RestoreError> {
        let expected = remote_path
            .split_once(':')
            .map_or(remote_path, |(_, path)| path);
        if fs_ops::exists(&work_dir.join(METADATA_FILE))?
            && fs_ops::exists(&work_dir.join(site.archive_name()))?
            && let Ok(cached) = BackupMetadata::load(work_dir)
            && cached.remote_path == expected
        {
            info!(%work_dir, "using the local copy of the backup");
            return Ok(cached);
        }

        fs_ops::remove_dir_all_if_exists(work_dir)?;
        fs_ops::create_dir_all(work_dir)?;
        let host = self.host.unwrap_or_else(HostResources::detect);
        self.tools
            .store
            .download(remote_path, work_dir, &DownloadTuning::for_host(host))?;
        Ok(BackupMetadata::load(work_dir)?)
    }

    fn prepare_site_dir(&self, site: &SiteSnapshot) -> Result<(), RestoreError> {
        let content = site.content_dir();
        fs_ops::create_dir_all(&content)?;
        fs_ops::set_mode(&content, CONTENT_DIR_MODE)?;
        if matches!(site.kind, SiteKind::WordPress { .. })
            && let Some(subpath) = site.wp_cli_subpath()
        {
            let htdocs = site.htdocs_dir();
            fs_ops::create_dir_all(&htdocs)?;
            fs_ops::write(&htdocs.join("wp-cli.yml"), &format!("path: {subpath}"))?;
        }
        self.tools.unpacker.normalize_ownership(site)?;
        Ok(())
    }

    fn restore_site(
        &self,
        site: &SiteSnapshot,
        archive: &Utf8Path,
        work_dir: &Utf8Path,
    ) -> Result<bool, RestoreError> {
        let unpacker = &self.tools.unpacker;
        unpacker.restore_tree(site, archive)?;
        if fs_ops::exists(&extracted_sql(site))? {
            if let Some(credentials) = site.kind.database() {
                self.tools.database.restore(site, credentials)?;
            }
            unpacker.remove_sql(site)?;
        }
        let overlays = unpacker.restore_overlays(site, work_dir)?;
        unpacker.restore_nginx(site, work_dir)?;
        if matches!(site.kind, SiteKind::Php { .. }) {
            unpacker.restore_php(site, work_dir)?;
        }
        Ok(overlays)
    }

    fn restore_wordpress(
        &self,
        site: &SiteSnapshot,
        database: Option<&DatabaseCredentials>,
        archive: &Utf8Path,
        work_dir: &Utf8Path,
    ) -> Result<bool, RestoreError> {
        let unpacker = &self.tools.unpacker;
        let wordpress = &self.tools.wordpress;
        info!(site = %site.url, "restoring site files");
        let manifest = unpacker.read_manifest(archive, work_dir)?;
        wordpress.core_download(site, &manifest.wordpress_version)?;
        unpacker.restore_wp_config(site, archive)?;
        if let Some(credentials) = database {
            wordpress.configure_database(site, credentials)?;
            if unpacker.extract_sql(site, archive)? {
                self.tools.database.restore(site, credentials)?;
            }
            unpacker.remove_sql(site)?;
        }
        unpacker.restore_wp_content(site, archive)?;
        let overlays = unpacker.restore_overlays(site, work_dir)?;
        unpacker.normalize_ownership(site)?;
        unpacker.restore_nginx(site, work_dir)?;
        unpacker.restore_php(site, work_dir)?;
        wordpress.cache_flush(site);
        Ok(overlays)
    }
}

#[cfg(test)]
mod tests;
