//! Unit tests for metadata persistence.

use rstest::rstest;

use super::*;
use crate::site::{DatabaseCredentials, SiteKind};

fn wordpress_site() -> SiteSnapshot {
    SiteSnapshot {
        url: String::from("blog.test"),
        kind: SiteKind::WordPress {
            database: Some(DatabaseCredentials {
                name: String::from("blog_db"),
                user: String::from("blog"),
                password: String::from("s3cret"),
                host: String::from("global-db"),
            }),
        },
        fs_root: Utf8PathBuf::from("/opt/easyengine/sites/blog.test"),
        container_fs_path: String::from("/var/www/htdocs"),
        php_version: Some(String::from("8.2")),
    }
}

#[rstest]
#[case("12", 12)]
#[case(" 7\n", 7)]
#[case("-", 0)]
#[case("", 0)]
#[case("Error: not installed", 0)]
#[case("-3", 0)]
#[case("12.5", 12)]
#[case("+4", 4)]
#[case("9 posts", 9)]
#[case("99999999999999999999999", u64::MAX)]
fn sanitize_count_keeps_leading_digits(#[case] raw: &str, #[case] expected: u64) {
    assert_eq!(sanitize_count(raw), expected);
}

#[test]
fn metadata_omits_password_and_keeps_db_name() {
    let metadata = BackupMetadata::for_site(&wordpress_site(), "easyengine/blog.test/1_x", None);
    let json = serde_json::to_string(&metadata).expect("serialise");
    assert!(!json.contains("s3cret"));
    assert!(json.contains("\"db_name\":\"blog_db\""));
    assert!(metadata.has_database());
}

#[test]
fn persist_writes_work_copy_and_root_snapshot() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
    let work = root.join("blog.test");
    let counts = ContentCounts {
        post_count: String::from("3"),
        wp_version: String::from("6.5.2"),
        ..ContentCounts::default()
    };
    let metadata =
        BackupMetadata::for_site(&wordpress_site(), "easyengine/blog.test/1_x", Some(counts));

    metadata.persist(&work, &root).expect("persist");

    assert!(root.join("blog.test.metadata.json").exists());
    let loaded = BackupMetadata::load(&work).expect("load");
    assert_eq!(loaded, metadata);
}

#[test]
fn load_reports_parse_errors_with_path() {
    let temp = tempfile::tempdir().expect("tempdir");
    let work = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
    std::fs::write(work.join(METADATA_FILE), "{not json").expect("write");

    let Err(MetadataError::Parse { path, .. }) = BackupMetadata::load(&work) else {
        panic!("expected parse error");
    };
    assert_eq!(path, work.join(METADATA_FILE));
}

#[test]
fn manifest_uses_camel_case_keys() {
    let manifest = MetaManifest {
        site_url: String::from("blog.test"),
        php_version: Some(String::from("8.2")),
        wordpress_version: String::from("6.5.2"),
        plugins: vec![InventoryItem {
            name: String::from("akismet"),
            status: String::from("active"),
            version: String::from("5.3"),
        }],
        themes: Vec::new(),
    };
    let json = serde_json::to_value(&manifest).expect("serialise");
    assert_eq!(json["wordpressVersion"], "6.5.2");
    assert_eq!(json["siteUrl"], "blog.test");
    assert_eq!(json["plugins"][0]["name"], "akismet");
}
