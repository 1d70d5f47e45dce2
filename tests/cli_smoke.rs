//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Runs the binary from an empty directory with no configuration in reach.
fn isolated(home: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("site-backup");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env_remove("SITE_BACKUP_CONFIG_PATH")
        .env_remove("SITE_BACKUP_ED_API_URL")
        .env_remove("RUST_LOG");
    cmd
}

fn home() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"))
}

#[test]
fn bare_invocation_prints_usage() {
    let home = home();
    isolated(&home)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_both_operations() {
    let home = home();
    isolated(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("backup").and(predicate::str::contains("restore")));
}

#[test]
fn malformed_dash_auth_is_rejected() {
    let home = home();
    isolated(&home)
        .args(["backup", "h.test", "--dash-auth", "no-separator"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "Invalid --dash-auth format. Expected: backup-id:backup-verification-token",
        ));
}

#[test]
fn dash_auth_requires_api_url() {
    let home = home();
    isolated(&home)
        .args(["backup", "h.test", "--dash-auth", "bk-1:token"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("ed-api-url is not configured"))
        .stderr(predicate::str::contains("bk-1:token").not());
}

#[test]
fn list_conflicts_with_dash_auth() {
    let home = home();
    isolated(&home)
        .args(["backup", "h.test", "--list", "--dash-auth", "bk-1:token"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn missing_site_manager_fails_restore() {
    let home = home();
    isolated(&home)
        .env("SITE_BACKUP_EE_BIN", "/nonexistent/ee")
        .env("SITE_BACKUP_BACKUP_ROOT", home.path().join("backup"))
        .args(["restore", "h.test"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("/nonexistent/ee"));
}
