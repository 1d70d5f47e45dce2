//! Unit tests for the restore orchestrator.

use std::os::unix::fs::PermissionsExt;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::preflight::HostPlatform;
use crate::test_support::{FixedSpace, ScriptedRunner, config_for, generation_listing};

const SITE: &str = "h.test";
const NEWEST: &str = "1704000003_2024-01-03-00-00-00";

struct Harness {
    _temp: TempDir,
    root: Utf8PathBuf,
    runner: ScriptedRunner,
}

impl Harness {
    fn orchestrator(&self, space: FixedSpace) -> RestoreOrchestrator<ScriptedRunner, FixedSpace> {
        let tools = Toolkit::from_config(
            self.runner.clone(),
            &config_for(&self.root),
            HostPlatform::Other,
        );
        RestoreOrchestrator::new(tools)
            .with_space_probe(space)
            .with_host_resources(HostResources {
                cores: 4,
                available_ram_mib: 4096,
            })
    }

    fn work_dir(&self, site: &str) -> Utf8PathBuf {
        self.root.join("backup").join(site)
    }

    fn site(&self, url: &str, kind: SiteKind, container_fs_path: &str) -> SiteSnapshot {
        SiteSnapshot {
            url: url.to_owned(),
            kind,
            fs_root: self.root.join("sites").join(url),
            container_fs_path: container_fs_path.to_owned(),
            php_version: Some(String::from("8.2")),
        }
    }

    /// Makes the download materialise `metadata` and an archive.
    fn stored_generation(&self, site: &SiteSnapshot, metadata: &BackupMetadata) {
        let work_dir = self.work_dir(&site.url);
        self.runner.creates_file_on(
            "rclone copy",
            work_dir.join(METADATA_FILE),
            serde_json::to_string(metadata).expect("metadata json"),
        );
        self.runner
            .creates_file_on("rclone copy", work_dir.join(site.archive_name()), "zip");
    }

    fn commands(&self) -> Vec<String> {
        self.runner.command_strings()
    }
}

#[fixture]
fn harness() -> Harness {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
    let runner = ScriptedRunner::new();
    runner.on("listremotes", 0, "easyengine:\n");
    runner.on("lsf --dirs-only", 0, generation_listing(3));
    runner.on("size --json", 0, r#"{"count":3,"bytes":4096}"#);
    runner.succeed_by_default();
    Harness {
        _temp: temp,
        root,
        runner,
    }
}

fn position(commands: &[String], fragment: &str) -> usize {
    commands
        .iter()
        .position(|command| command.contains(fragment))
        .unwrap_or_else(|| panic!("no command containing {fragment}"))
}

fn credentials() -> DatabaseCredentials {
    DatabaseCredentials {
        name: String::from("site_db"),
        user: String::from("site"),
        password: String::from("secret"),
        host: String::from("global-db"),
    }
}

fn metadata_for(site: &SiteSnapshot, id: &str) -> BackupMetadata {
    BackupMetadata::for_site(site, format!("easyengine/{}/{id}", site.url), None)
}

#[rstest]
fn php_restore_replays_database_and_configuration(harness: Harness) {
    let site = harness.site(
        SITE,
        SiteKind::Php {
            database: Some(credentials()),
        },
        "/var/www/htdocs",
    );
    harness.stored_generation(&site, &metadata_for(&site, NEWEST));
    let work_dir = harness.work_dir(SITE);
    harness.runner.creates_file_on(
        "h.test.zip -d",
        site.app_dir().join("sql").join("h.test.sql"),
        "-- dump",
    );
    harness
        .runner
        .creates_file_on("conf.zip", work_dir.join("nginx/site.conf"), "server {}");
    harness
        .runner
        .creates_file_on("conf.zip", work_dir.join("php/php/php.ini"), "memory_limit=256M");

    let report = harness
        .orchestrator(FixedSpace::roomy())
        .run(&site, None)
        .expect("restore");

    assert_eq!(report.id.as_str(), NEWEST);
    assert!(!report.overlays_restored);
    let commands = harness.commands();
    let download = &commands[position(&commands, "rclone copy")];
    assert!(download.contains("--multi-thread-streams 8"));
    assert!(download.contains(&format!("easyengine:easyengine/{SITE}/{NEWEST}")));
    assert!(position(&commands, "rclone copy") < position(&commands, "h.test.zip -d"));
    assert!(position(&commands, "h.test.zip -d") < position(&commands, "--command=mysql"));
    let php_ini = position(&commands, "rsync -a");
    assert!(commands[php_ini].contains("php/php.ini"));
    assert!(position(&commands, "--command=mysql") < php_ini);
    assert!(php_ini < position(&commands, "site reload h.test"));
    assert!(commands.iter().all(|command| !command.contains("site enable")));

    assert!(!site.app_dir().join("sql").exists(), "extracted dump is removed");
    assert!(!work_dir.exists(), "work dir is removed after restore");
    assert!(!harness.root.join(format!("backup/{SITE}.lock")).exists());
}

#[rstest]
fn unknown_id_aborts_before_download(harness: Harness) {
    let site = harness.site(SITE, SiteKind::Html, "/var/www/htdocs");

    let err = harness
        .orchestrator(FixedSpace::roomy())
        .run(&site, Some("1600000000_2020-09-13-12-26-40"))
        .expect_err("unknown id");

    assert!(matches!(
        err,
        RestoreError::Remote(RemoteError::InvalidBackupId { .. })
    ));
    assert!(
        harness
            .commands()
            .iter()
            .all(|command| !command.contains("rclone copy"))
    );
    assert!(!site.app_dir().exists());
    assert!(!harness.root.join(format!("backup/{SITE}.lock")).exists());
}

#[rstest]
fn requested_id_is_restored(harness: Harness) {
    let id = "1704000001_2024-01-01-00-00-00";
    let site = harness.site(SITE, SiteKind::Html, "/var/www/htdocs");
    harness.stored_generation(&site, &metadata_for(&site, id));
    let requested = format!("{id}/");

    let report = harness
        .orchestrator(FixedSpace::roomy())
        .run(&site, Some(requested.as_str()))
        .expect("restore");

    assert_eq!(report.id.as_str(), id);
    let commands = harness.commands();
    assert!(commands[position(&commands, "rclone copy")].contains(id));
}

#[rstest]
fn incompatible_metadata_aborts_before_extraction(harness: Harness) {
    let site = harness.site(SITE, SiteKind::Html, "/var/www/htdocs");
    let mut metadata = metadata_for(&site, NEWEST);
    metadata.site_type = String::from("wp");
    harness.stored_generation(&site, &metadata);

    let err = harness
        .orchestrator(FixedSpace::roomy())
        .run(&site, None)
        .expect_err("type mismatch");

    assert!(matches!(
        err,
        RestoreError::Incompatible(Incompatibility::SiteType)
    ));
    assert_eq!(
        err.to_string(),
        "Site type does not match with the backed up site."
    );
    assert!(
        harness
            .commands()
            .iter()
            .all(|command| !command.starts_with("unzip"))
    );
    assert!(!site.app_dir().exists());
}

#[rstest]
fn shortfall_aborts_before_download(harness: Harness) {
    let site = harness.site(SITE, SiteKind::Html, "/var/www/htdocs");

    let err = harness
        .orchestrator(FixedSpace::new(0, 1000))
        .run(&site, None)
        .expect_err("not enough space");

    let RestoreError::InsufficientSpace(shortfall) = err else {
        panic!("expected a shortfall, got {err:?}");
    };
    assert_eq!(shortfall.required, 4096);
    assert_eq!(shortfall.additional(), 3096);
    assert!(
        harness
            .commands()
            .iter()
            .all(|command| !command.contains("rclone copy"))
    );
}

#[rstest]
fn matching_local_copy_is_reused(harness: Harness) {
    let site = harness.site(SITE, SiteKind::Html, "/var/www/htdocs");
    let work_dir = harness.work_dir(SITE);
    metadata_for(&site, NEWEST)
        .persist(&work_dir, &harness.root.join("backup"))
        .expect("cached metadata");
    std::fs::write(work_dir.join(site.archive_name()), "zip").expect("cached archive");

    harness
        .orchestrator(FixedSpace::roomy())
        .run(&site, None)
        .expect("restore");

    assert!(
        harness
            .commands()
            .iter()
            .all(|command| !command.contains("rclone copy"))
    );
}

#[rstest]
fn stale_local_copy_is_downloaded_again(harness: Harness) {
    let site = harness.site(SITE, SiteKind::Html, "/var/www/htdocs");
    let work_dir = harness.work_dir(SITE);
    metadata_for(&site, "1704000001_2024-01-01-00-00-00")
        .persist(&work_dir, &harness.root.join("backup"))
        .expect("cached metadata");
    std::fs::write(work_dir.join(site.archive_name()), "zip").expect("cached archive");
    harness.stored_generation(&site, &metadata_for(&site, NEWEST));

    let report = harness
        .orchestrator(FixedSpace::roomy())
        .run(&site, None)
        .expect("restore");

    assert_eq!(
        report.metadata.remote_path,
        format!("easyengine/{SITE}/{NEWEST}")
    );
    assert!(
        harness
            .commands()
            .iter()
            .any(|command| command.contains("rclone copy"))
    );
}

#[rstest]
fn wordpress_restore_rebuilds_core_then_content(harness: Harness) {
    let site = harness.site(
        "blog.test",
        SiteKind::WordPress {
            database: Some(credentials()),
        },
        "/var/www/htdocs/public",
    );
    let work_dir = harness.work_dir("blog.test");
    harness.stored_generation(&site, &metadata_for(&site, NEWEST));
    harness.runner.creates_file_on(
        "meta.json -d",
        work_dir.join("meta.json"),
        r#"{"siteUrl":"blog.test","wordpressVersion":"6.4.2"}"#,
    );
    harness.runner.creates_file_on(
        "rclone copy",
        work_dir.join("docker-compose-custom.yml"),
        "services: {}",
    );

    let report = harness
        .orchestrator(FixedSpace::roomy())
        .run(&site, None)
        .expect("restore");

    assert!(report.overlays_restored);
    let wp_cli = std::fs::read_to_string(site.htdocs_dir().join("wp-cli.yml")).expect("wp-cli.yml");
    assert_eq!(wp_cli, "path: public/");
    assert!(site.custom_compose_file().exists());
    let mode = std::fs::metadata(site.content_dir())
        .expect("content dir")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);

    let commands = harness.commands();
    assert!(commands[position(&commands, "core download")].contains("--version=6.4.2"));
    assert!(position(&commands, "core download") < position(&commands, "wp-config.php -d"));
    assert!(position(&commands, "wp-config.php -d") < position(&commands, "config set DB_NAME"));
    assert!(position(&commands, "config set DB_NAME") < position(&commands, "sql/blog.test.sql"));
    assert!(position(&commands, "sql/blog.test.sql") < position(&commands, "--command=mysql"));
    assert!(position(&commands, "--command=mysql") < position(&commands, "wp-content/*"));
    assert!(position(&commands, "wp-content/*") < position(&commands, "cache flush"));
    assert!(
        position(&commands, "site enable blog.test --force")
            < position(&commands, "site reload blog.test")
    );
}

#[rstest]
#[case::matching("html", None, "/var/www/htdocs", None)]
#[case::site_type("php", None, "/var/www/htdocs", Some(Incompatibility::SiteType))]
#[case::database("html", Some("old_db"), "/var/www/htdocs", Some(Incompatibility::Database))]
#[case::blank_database_name("html", Some(" "), "/var/www/htdocs", None)]
#[case::public_dir("html", None, "/var/www/htdocs/public", Some(Incompatibility::PublicDir))]
fn compatibility_checks(
    #[case] site_type: &str,
    #[case] db_name: Option<&str>,
    #[case] container_fs_path: &str,
    #[case] expected: Option<Incompatibility>,
) {
    let site = SiteSnapshot {
        url: SITE.to_owned(),
        kind: SiteKind::Html,
        fs_root: Utf8PathBuf::from("/opt/easyengine/sites/h.test"),
        container_fs_path: String::from("/var/www/htdocs"),
        php_version: None,
    };
    let metadata = BackupMetadata {
        site_url: SITE.to_owned(),
        site_type: site_type.to_owned(),
        db_name: db_name.map(str::to_owned),
        site_container_fs_path: container_fs_path.to_owned(),
        php_version: None,
        remote_path: format!("easyengine/{SITE}/{NEWEST}"),
        wordpress: None,
    };

    assert_eq!(verify_compatibility(&site, &metadata).err(), expected);
}
