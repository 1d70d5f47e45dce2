//! Restore-side extraction: the inverse of composition for each site type.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use super::{ArchiveError, ArchiveTool, CONFIG_ARCHIVE, Extract, OVERLAY_ARCHIVE};
use crate::database::SQL_DIR;
use crate::fs_ops;
use crate::metadata::{MANIFEST_FILE, MetaManifest};
use crate::process::CommandRunner;
use crate::site::{CUSTOM_COMPOSE_FILE, SiteSnapshot};

const UPLOADS: &str = "wp-content/uploads";

/// Location of an extracted dump below `app/`.
#[must_use]
pub fn extracted_sql(site: &SiteSnapshot) -> Utf8PathBuf {
    site.app_dir().join(SQL_DIR).join(site.sql_file_name())
}

/// Extracts a downloaded generation over a site.
#[derive(Clone, Debug)]
pub struct ArchiveUnpacker<R: CommandRunner> {
    tool: ArchiveTool<R>,
    owner: String,
}

impl<R: CommandRunner> ArchiveUnpacker<R> {
    /// Builds an unpacker that hands extracted files to `runtime_user`.
    pub fn new(tool: ArchiveTool<R>, runtime_user: &str) -> Self {
        Self {
            tool,
            owner: format!("{runtime_user}:{runtime_user}"),
        }
    }

    /// Normalises ownership of the site's `app/` tree.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when `chown` fails.
    pub fn normalize_ownership(&self, site: &SiteSnapshot) -> Result<(), ArchiveError> {
        self.tool.chown(&site.app_dir(), &self.owner)
    }

    /// Replaces the whole `app/` tree with the archive contents.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when clearing or extraction fails.
    pub fn restore_tree(&self, site: &SiteSnapshot, archive: &Utf8Path) -> Result<(), ArchiveError> {
        info!(site = %site.url, "restoring site files");
        let app = site.app_dir();
        fs_ops::create_dir_all(&app)?;
        fs_ops::clear_dir(&app)?;
        self.tool.extract(&Extract::all(archive, &app))?;
        self.normalize_ownership(site)
    }

    /// Extracts only the dump into `app/sql/`. Returns `false` when the
    /// archive carries no dump.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when extraction fails.
    pub fn extract_sql(&self, site: &SiteSnapshot, archive: &Utf8Path) -> Result<bool, ArchiveError> {
        let member = format!("{SQL_DIR}/{}", site.sql_file_name());
        self.tool
            .extract(&Extract::members(archive, &[member.as_str()], &site.app_dir()))
    }

    /// Deletes the extracted `app/sql/` directory.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when removal fails.
    pub fn remove_sql(&self, site: &SiteSnapshot) -> Result<(), ArchiveError> {
        fs_ops::remove_dir_all_if_exists(&site.app_dir().join(SQL_DIR))?;
        Ok(())
    }

    /// Extracts and parses `meta.json` into `work_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when the manifest is absent or malformed.
    pub fn read_manifest(
        &self,
        archive: &Utf8Path,
        work_dir: &Utf8Path,
    ) -> Result<MetaManifest, ArchiveError> {
        self.tool
            .extract(&Extract::members(archive, &[MANIFEST_FILE], work_dir))?;
        Ok(MetaManifest::read(&work_dir.join(MANIFEST_FILE))?)
    }

    /// Restores `wp-config.php` next to the content directory.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when extraction or `chown` fails.
    pub fn restore_wp_config(
        &self,
        site: &SiteSnapshot,
        archive: &Utf8Path,
    ) -> Result<(), ArchiveError> {
        let content = site.content_dir();
        let target = content
            .parent()
            .map_or_else(|| content.clone(), Utf8Path::to_path_buf);
        self.tool
            .extract(&Extract::members(archive, &["wp-config.php"], &target))?;
        self.tool.chown(&target, &self.owner)
    }

    /// Replaces `wp-content` while keeping a symlinked `uploads` in place,
    /// then extracts uploads on their own.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when moving or extraction fails.
    pub fn restore_wp_content(
        &self,
        site: &SiteSnapshot,
        archive: &Utf8Path,
    ) -> Result<(), ArchiveError> {
        info!(site = %site.url, "restoring site files");
        let content = site.content_dir();
        let uploads = content.join(UPLOADS);
        let parked = content.join("uploads");

        let relocated = fs_ops::is_symlink(&uploads)?;
        if relocated {
            fs_ops::rename(&uploads, &parked)?;
        }
        fs_ops::remove_dir_all_if_exists(&content.join("wp-content"))?;
        self.tool.extract(
            &Extract::members(archive, &["wp-content/*"], &content)
                .excluding("wp-content/uploads/*"),
        )?;
        if relocated {
            fs_ops::rename(&parked, &uploads)?;
        }
        let had_uploads = self
            .tool
            .extract(&Extract::members(archive, &["wp-content/uploads/*"], &content))?;
        if !had_uploads {
            debug!(site = %site.url, "archive carries no uploads");
        }
        Ok(())
    }

    /// Restores overlay files. Returns `true` when anything was restored.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when copying or extraction fails.
    pub fn restore_overlays(
        &self,
        site: &SiteSnapshot,
        work_dir: &Utf8Path,
    ) -> Result<bool, ArchiveError> {
        let mut restored = false;
        let compose_file = work_dir.join(CUSTOM_COMPOSE_FILE);
        if fs_ops::exists(&compose_file)? {
            fs_ops::copy(&compose_file, &site.custom_compose_file())?;
            restored = true;
        }
        let overlay_archive = work_dir.join(OVERLAY_ARCHIVE);
        if fs_ops::exists(&overlay_archive)? {
            let target = site.custom_compose_dir();
            fs_ops::create_dir_all(&target)?;
            self.tool.extract(&Extract::all(&overlay_archive, &target))?;
            restored = true;
        }
        if restored {
            info!(site = %site.url, "custom docker-compose file(s) updated");
        }
        Ok(restored)
    }

    /// Lays the archived nginx configuration over the site's.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when extraction or `rsync` fails.
    pub fn restore_nginx(&self, site: &SiteSnapshot, work_dir: &Utf8Path) -> Result<(), ArchiveError> {
        info!(site = %site.url, "restoring nginx configuration");
        self.unpack_config(work_dir)?;
        let nginx = work_dir.join("nginx");
        if fs_ops::exists(&nginx)? {
            self.tool.sync(
                &format!("{nginx}/"),
                &format!("{}/", site.config_dir().join("nginx")),
            )?;
        }
        Ok(())
    }

    /// Lays the archived php-fpm pool, `php.ini` and custom ini over the
    /// site's.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when extraction or `rsync` fails.
    pub fn restore_php(&self, site: &SiteSnapshot, work_dir: &Utf8Path) -> Result<(), ArchiveError> {
        info!(site = %site.url, "restoring php configuration");
        let php = work_dir.join("php");
        if !fs_ops::exists(&php)? {
            self.unpack_config(work_dir)?;
        }
        if !fs_ops::exists(&php)? {
            return Ok(());
        }
        let site_php = site.config_dir().join("php");
        let pool = php.join("php-fpm.d");
        if fs_ops::exists(&pool)? {
            self.tool.sync(
                &format!("{pool}/"),
                &format!("{}/", site_php.join("php-fpm.d")),
            )?;
        }
        for relative in ["php/php.ini", "php/conf.d/custom.ini"] {
            let source = php.join(relative);
            if fs_ops::exists(&source)? {
                self.tool
                    .sync(source.as_str(), site_php.join(relative).as_str())?;
            } else {
                debug!(path = %source, "archived php setting absent, skipping");
            }
        }
        Ok(())
    }

    fn unpack_config(&self, work_dir: &Utf8Path) -> Result<(), ArchiveError> {
        let archive = work_dir.join(CONFIG_ARCHIVE);
        self.tool.extract(&Extract::all(&archive, work_dir))?;
        Ok(())
    }
}
