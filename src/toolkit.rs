//! Wiring shared by the backup and restore orchestrators.

use camino::{Utf8Path, Utf8PathBuf};

use crate::archive::{ArchiveComposer, ArchiveTool, ArchiveUnpacker};
use crate::config::BackupConfig;
use crate::database::DatabaseAdapter;
use crate::lock::LockManager;
use crate::preflight::{HostPlatform, Preflight};
use crate::process::CommandRunner;
use crate::remote::{RemoteStore, RetentionPolicy};
use crate::site::SiteManager;
use crate::wordpress::WpCli;

/// Every collaborator an operation needs, built from one command runner.
#[derive(Clone, Debug)]
pub struct Toolkit<R: CommandRunner + Clone> {
    pub(crate) sites: SiteManager<R>,
    pub(crate) store: RemoteStore<R>,
    pub(crate) preflight: Preflight<R>,
    pub(crate) database: DatabaseAdapter<R>,
    pub(crate) wordpress: WpCli<R>,
    pub(crate) composer: ArchiveComposer<R>,
    pub(crate) unpacker: ArchiveUnpacker<R>,
    pub(crate) locks: LockManager,
    pub(crate) retention: RetentionPolicy,
    backup_root: Utf8PathBuf,
}

impl<R: CommandRunner + Clone> Toolkit<R> {
    /// Builds the collaborators described by `config`.
    #[must_use]
    pub fn from_config(runner: R, config: &BackupConfig, platform: HostPlatform) -> Self {
        let backup_root = config.backup_root_path();
        let binaries = config.archive_binaries();
        let sites = SiteManager::new(runner.clone(), config.ee_bin.as_str())
            .with_sites_root(config.sites_root.as_str());
        let database = DatabaseAdapter::new(sites.clone());
        let archive = ArchiveTool::new(runner.clone(), binaries.clone());
        Self {
            store: RemoteStore::new(runner.clone(), &config.rclone_bin, &config.rclone_path),
            preflight: Preflight::new(runner, platform, &binaries),
            wordpress: WpCli::new(sites.clone()),
            composer: ArchiveComposer::new(archive.clone(), database.clone()),
            unpacker: ArchiveUnpacker::new(archive, &config.runtime_user),
            locks: LockManager::new(backup_root.clone()),
            retention: config.retention(),
            database,
            sites,
            backup_root,
        }
    }

    /// Site manager used for lookups.
    #[must_use]
    pub const fn sites(&self) -> &SiteManager<R> {
        &self.sites
    }

    /// Remote generation store.
    #[must_use]
    pub const fn store(&self) -> &RemoteStore<R> {
        &self.store
    }

    /// Working root holding locks, work directories and metadata copies.
    #[must_use]
    pub fn backup_root(&self) -> &Utf8Path {
        &self.backup_root
    }

    /// Per-site working directory below the backup root.
    #[must_use]
    pub fn work_dir(&self, site: &str) -> Utf8PathBuf {
        self.backup_root.join(site)
    }
}
