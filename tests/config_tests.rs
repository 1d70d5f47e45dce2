//! Tests for configuration validation and derived settings.

use std::time::Duration;

use camino::Utf8Path;
use rstest::*;

use site_backup::config::{BackupConfig, ConfigError};
use site_backup::test_support::config_for;

#[fixture]
fn valid_config() -> BackupConfig {
    config_for(Utf8Path::new("/srv/backup-test"))
}

#[rstest]
fn valid_config_passes_validation(valid_config: BackupConfig) {
    assert_eq!(valid_config.validate(), Ok(()));
}

/// Every required field names its environment variable, the config file
/// and its TOML key when left blank.
#[rstest]
#[case::backup_root(|cfg: &mut BackupConfig| cfg.backup_root.clear(), "SITE_BACKUP_BACKUP_ROOT", "backup_root")]
#[case::sites_root(|cfg: &mut BackupConfig| cfg.sites_root.clear(), "SITE_BACKUP_SITES_ROOT", "sites_root")]
#[case::rclone_bin(|cfg: &mut BackupConfig| cfg.rclone_bin.clear(), "SITE_BACKUP_RCLONE_BIN", "rclone_bin")]
#[case::rclone_path(|cfg: &mut BackupConfig| cfg.rclone_path = String::from("  "), "SITE_BACKUP_RCLONE_PATH", "rclone_path")]
#[case::ee_bin(|cfg: &mut BackupConfig| cfg.ee_bin.clear(), "SITE_BACKUP_EE_BIN", "ee_bin")]
#[case::seven_zip(|cfg: &mut BackupConfig| cfg.seven_zip_bin.clear(), "SITE_BACKUP_SEVEN_ZIP_BIN", "seven_zip_bin")]
#[case::unzip(|cfg: &mut BackupConfig| cfg.unzip_bin.clear(), "SITE_BACKUP_UNZIP_BIN", "unzip_bin")]
#[case::rsync(|cfg: &mut BackupConfig| cfg.rsync_bin.clear(), "SITE_BACKUP_RSYNC_BIN", "rsync_bin")]
#[case::runtime_user(|cfg: &mut BackupConfig| cfg.runtime_user.clear(), "SITE_BACKUP_RUNTIME_USER", "runtime_user")]
fn blank_fields_produce_actionable_errors(
    valid_config: BackupConfig,
    #[case] mutate: fn(&mut BackupConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let error = cfg.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("site-backup.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn rclone_path_without_remote_name_is_rejected(valid_config: BackupConfig) {
    let cfg = BackupConfig {
        rclone_path: String::from("easyengine"),
        ..valid_config
    };

    let error = cfg.validate().expect_err("remote name is required");
    assert!(
        matches!(error, ConfigError::Invalid(ref message) if message.contains("<remote>:<base>")),
        "unexpected error: {error}"
    );
}

#[rstest]
fn zero_generations_is_rejected(valid_config: BackupConfig) {
    let cfg = BackupConfig {
        no_of_backups: 0,
        ..valid_config
    };

    let error = cfg.validate().expect_err("at least one generation");
    assert!(
        error.to_string().contains("SITE_BACKUP_NO_OF_BACKUPS"),
        "unexpected error: {error}"
    );
}

#[rstest]
fn derived_settings_follow_fields(valid_config: BackupConfig) {
    let cfg = BackupConfig {
        dash_retry_delay_secs: 45,
        seven_zip_bin: String::from("/usr/local/bin/7zz"),
        ..valid_config
    };

    assert_eq!(cfg.backup_root_path(), "/srv/backup-test/backup");
    assert_eq!(cfg.dash_retry_delay(), Duration::from_secs(45));
    assert_eq!(cfg.archive_binaries().seven_zip, "/usr/local/bin/7zz");
    assert_eq!(cfg.archive_binaries().unzip, "unzip");
}
