//! Unit tests for the database adapter.

use rstest::{fixture, rstest};

use super::*;
use crate::site::SiteKind;
use crate::test_support::ScriptedRunner;

struct Harness {
    _temp: tempfile::TempDir,
    site: SiteSnapshot,
    credentials: DatabaseCredentials,
    runner: ScriptedRunner,
    adapter: DatabaseAdapter<ScriptedRunner>,
    work_dir: Utf8PathBuf,
}

#[fixture]
fn harness() -> Harness {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
    let credentials = DatabaseCredentials {
        name: String::from("shop_db"),
        user: String::from("shop"),
        password: String::from("p@ss word"),
        host: String::from("global-db"),
    };
    let site = SiteSnapshot {
        url: String::from("shop.test"),
        kind: SiteKind::Php {
            database: Some(credentials.clone()),
        },
        fs_root: root.join("sites/shop.test"),
        container_fs_path: String::from("/var/www/htdocs"),
        php_version: None,
    };
    let runner = ScriptedRunner::new();
    let adapter = DatabaseAdapter::new(SiteManager::new(runner.clone(), "ee"));
    Harness {
        _temp: temp,
        site,
        credentials,
        runner,
        adapter,
        work_dir: root.join("backups/shop.test"),
    }
}

#[rstest]
fn dump_moves_file_into_work_tree(harness: Harness) {
    std::fs::create_dir_all(harness.site.htdocs_dir()).expect("htdocs");
    std::fs::write(harness.site.htdocs_dir().join("shop.test.sql"), "-- dump").expect("dump");
    harness.runner.push_success();

    let sql_dir = harness
        .adapter
        .dump(&harness.site, &harness.credentials, &harness.work_dir)
        .expect("dump");

    assert_eq!(sql_dir, harness.work_dir.join("sql"));
    assert!(sql_dir.join("shop.test.sql").exists());
    assert!(!harness.site.htdocs_dir().join("shop.test.sql").exists());

    let command = harness.runner.invocations()[0].command_string();
    assert!(command.starts_with("ee shell shop.test --skip-tty --command=mysqldump --skip-ssl"));
    assert!(command.contains("-p'p@ss word'"));
    assert!(command.contains("--single-transaction shop_db > /var/www/htdocs/shop.test.sql"));
}

#[rstest]
fn dump_failure_hides_credentials(harness: Harness) {
    harness.runner.push_failure(2);
    let err = harness
        .adapter
        .dump(&harness.site, &harness.credentials, &harness.work_dir)
        .expect_err("dump should fail");
    let rendered = err.to_string();
    assert!(rendered.contains("database dump failed for shop.test"));
    assert!(!rendered.contains("p@ss word"));
}

#[rstest]
fn restore_replays_shared_sql_path(harness: Harness) {
    harness.runner.push_success();
    harness
        .adapter
        .restore(&harness.site, &harness.credentials)
        .expect("restore");
    let command = harness.runner.invocations()[0].command_string();
    assert!(command.contains("mysql --skip-ssl -u shop"));
    assert!(command.ends_with("shop_db < /var/www/sql/shop.test.sql 2>/dev/null"));
}

#[rstest]
#[case("123456\n", 123_456)]
#[case("NULL\n", 0)]
#[case("", 0)]
fn estimate_size_parses_single_value(
    harness: Harness,
    #[case] stdout: &str,
    #[case] expected: u64,
) {
    harness.runner.push_output(Some(0), stdout, "");
    let size = harness
        .adapter
        .estimate_size(&harness.site, &harness.credentials)
        .expect("size");
    assert_eq!(size, expected);
}
