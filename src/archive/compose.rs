//! Backup-side composition: which trees go into which archive for each site
//! type.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use super::{ArchiveError, ArchiveTool, CONFIG_ARCHIVE, Compress, OVERLAY_ARCHIVE};
use crate::database::{DatabaseAdapter, SQL_DIR};
use crate::fs_ops;
use crate::metadata::MANIFEST_FILE;
use crate::process::CommandRunner;
use crate::site::{CUSTOM_COMPOSE_FILE, DatabaseCredentials, SiteKind, SiteSnapshot};

const UPLOADS: &str = "wp-content/uploads";
const BEDROCK_DIR: &str = "current";
const WP_CLI_YML: &str = "wp-cli.yml";

/// Artifacts written into the working directory for one generation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ComposedArchives {
    /// `<site>.zip` holding content, and the dump when present.
    pub primary: Utf8PathBuf,
    /// `conf.zip` holding nginx and php settings.
    pub config: Utf8PathBuf,
    /// Overlay files copied or archived next to the primary archive.
    pub overlays: Vec<Utf8PathBuf>,
}

/// Builds the archives for one generation.
#[derive(Clone, Debug)]
pub struct ArchiveComposer<R: CommandRunner> {
    tool: ArchiveTool<R>,
    database: DatabaseAdapter<R>,
}

impl<R: CommandRunner> ArchiveComposer<R> {
    /// Builds a composer.
    pub const fn new(tool: ArchiveTool<R>, database: DatabaseAdapter<R>) -> Self {
        Self { tool, database }
    }

    /// Writes every archive for `site` into `work_dir`.
    ///
    /// For WordPress sites a `meta.json` already present in `work_dir` is
    /// merged into the primary archive and then removed.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when any archiving step fails.
    pub fn compose(
        &self,
        site: &SiteSnapshot,
        work_dir: &Utf8Path,
    ) -> Result<ComposedArchives, ArchiveError> {
        let primary = work_dir.join(site.archive_name());
        let config = work_dir.join(CONFIG_ARCHIVE);
        let overlays = match &site.kind {
            SiteKind::Html => {
                self.archive_site_tree(site, &primary)?;
                let overlays = self.archive_overlays(site, work_dir)?;
                self.archive_nginx(site, &config)?;
                overlays
            }
            SiteKind::Php { database } => {
                let overlays = self.archive_overlays(site, work_dir)?;
                self.archive_nginx(site, &config)?;
                self.archive_php(site, &config)?;
                self.archive_database(site, database.as_ref(), work_dir, &primary)?;
                self.archive_site_tree(site, &primary)?;
                overlays
            }
            SiteKind::WordPress { database } => {
                let overlays = self.archive_overlays(site, work_dir)?;
                self.archive_nginx(site, &config)?;
                self.archive_php(site, &config)?;
                self.archive_database(site, database.as_ref(), work_dir, &primary)?;
                self.archive_wordpress(site, work_dir, &primary)?;
                overlays
            }
        };
        Ok(ComposedArchives {
            primary,
            config,
            overlays,
        })
    }

    fn archive_site_tree(&self, site: &SiteSnapshot, archive: &Utf8Path) -> Result<(), ArchiveError> {
        info!(site = %site.url, "backing up site files, this may take some time");
        self.tool
            .compress(&Compress::add(&site.app_dir(), archive, &["."]))
    }

    fn archive_overlays(
        &self,
        site: &SiteSnapshot,
        work_dir: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, ArchiveError> {
        let mut written = Vec::new();
        let compose_file = site.custom_compose_file();
        if fs_ops::exists(&compose_file)? {
            let target = work_dir.join(CUSTOM_COMPOSE_FILE);
            fs_ops::copy(&compose_file, &target)?;
            written.push(target);
        }
        let compose_dir = site.custom_compose_dir();
        if fs_ops::exists(&compose_dir)? {
            let target = work_dir.join(OVERLAY_ARCHIVE);
            self.tool
                .compress(&Compress::add(&compose_dir, &target, &["."]))?;
            written.push(target);
        }
        Ok(written)
    }

    fn archive_nginx(&self, site: &SiteSnapshot, config: &Utf8Path) -> Result<(), ArchiveError> {
        info!(site = %site.url, "backing up nginx configuration");
        self.tool
            .compress(&Compress::add(&site.config_dir(), config, &["nginx"]))
    }

    fn archive_php(&self, site: &SiteSnapshot, config: &Utf8Path) -> Result<(), ArchiveError> {
        info!(site = %site.url, "backing up php configuration");
        self.tool
            .compress(&Compress::update(&site.config_dir(), config, &["php"]))
    }

    fn archive_database(
        &self,
        site: &SiteSnapshot,
        credentials: Option<&DatabaseCredentials>,
        work_dir: &Utf8Path,
        archive: &Utf8Path,
    ) -> Result<(), ArchiveError> {
        let Some(credentials) = credentials else {
            return Ok(());
        };
        let sql_dir = self.database.dump(site, credentials, work_dir)?;
        self.tool
            .compress(&Compress::update(work_dir, archive, &[SQL_DIR]))?;
        fs_ops::remove_dir_all_if_exists(&sql_dir)?;
        Ok(())
    }

    fn archive_wordpress(
        &self,
        site: &SiteSnapshot,
        work_dir: &Utf8Path,
        archive: &Utf8Path,
    ) -> Result<(), ArchiveError> {
        let Some(root) = wordpress_root(&site.content_dir())? else {
            warn!(site = %site.url, "wp-content directory not found, backing up the complete site directory");
            return self.archive_site_tree(site, archive);
        };
        info!(site = %site.url, "backing up site files, this may take some time");

        let config_dir = root.parent().map_or_else(|| root.clone(), Utf8Path::to_path_buf);
        self.tool
            .compress(&Compress::add(&config_dir, archive, &["wp-config.php"]))?;

        let manifest = work_dir.join(MANIFEST_FILE);
        let include_manifest = fs_ops::exists(&manifest)?;
        let mut members = Vec::with_capacity(2);
        if include_manifest {
            members.push(manifest.as_str());
        }
        members.push("wp-content");
        self.tool.compress(
            &Compress::update(&root, archive, &members)
                .storing_links()
                .excluding(UPLOADS),
        )?;
        if include_manifest {
            fs_ops::remove_file_if_exists(&manifest)?;
        }

        if fs_ops::exists(&root.join(UPLOADS))? {
            self.tool
                .compress(&Compress::update(&root, archive, &[UPLOADS]))?;
        }
        Ok(())
    }
}

/// Finds the directory holding `wp-content`, switching to a Bedrock-style
/// `current/` release when needed.
fn wordpress_root(content_dir: &Utf8Path) -> Result<Option<Utf8PathBuf>, ArchiveError> {
    if fs_ops::exists(&content_dir.join("wp-content"))? {
        return Ok(Some(content_dir.to_path_buf()));
    }
    let release = content_dir.join(BEDROCK_DIR);
    if !fs_ops::exists(&release.join("wp-content"))? {
        return Ok(None);
    }
    let wp_cli = content_dir.join(WP_CLI_YML);
    if !fs_ops::exists(&wp_cli)? {
        fs_ops::write(&wp_cli, &format!("path: {BEDROCK_DIR}/"))?;
    }
    Ok(Some(release))
}
