//! Unit tests for the remote store, transfer tuning and retention.

use rstest::{fixture, rstest};

use super::*;
use crate::test_support::ScriptedRunner;

const SITE: &str = "blog.test";

#[fixture]
fn runner() -> ScriptedRunner {
    ScriptedRunner::new()
}

fn store(runner: &ScriptedRunner) -> RemoteStore<ScriptedRunner> {
    RemoteStore::new(runner.clone(), "rclone", "easyengine:easyengine/")
}

fn id(day: u32) -> BackupId {
    BackupId::from_listing(&format!("17000{day:05}_2024-01-{day:02}-10-00-00"))
        .expect("valid id")
}

fn listing(days: impl IntoIterator<Item = u32>) -> String {
    days.into_iter()
        .map(|day| format!("{}/\n", id(day)))
        .collect()
}

#[rstest]
fn generated_ids_carry_a_timestamp() {
    let generated = BackupId::generate();
    let (epoch, stamp) = generated.as_str().split_once('_').expect("separator");
    assert!(epoch.parse::<i64>().is_ok());
    assert_eq!(stamp.len(), 19);
    assert_eq!(BackupId::from_listing(generated.as_str()), Some(generated.clone()));
}

#[rstest]
#[case("1700000000_2024-01-01-10-00-00/", Some("1700000000_2024-01-01-10-00-00"))]
#[case("notes/", None)]
#[case("2024-01-01", None)]
fn listing_entries_are_filtered(#[case] entry: &str, #[case] expected: Option<&str>) {
    assert_eq!(
        BackupId::from_listing(entry).as_ref().map(BackupId::as_str),
        expected
    );
}

#[rstest]
fn list_generations_sorts_newest_first(runner: ScriptedRunner) {
    runner.push_output(Some(0), format!("{}stray/\n", listing([2, 9, 4])), "");
    let generations = store(&runner).list_generations(SITE).expect("list");
    assert_eq!(generations, [id(9), id(4), id(2)]);
    assert_eq!(
        runner.command_strings(),
        ["rclone lsf --dirs-only easyengine:easyengine/blog.test"]
    );
}

#[rstest]
fn list_failure_is_a_transfer_error(runner: ScriptedRunner) {
    runner.push_failure(3);
    let err = store(&runner).list_generations(SITE).expect_err("list fails");
    assert!(matches!(err, RemoteError::Transfer { operation: "list", .. }));
}

#[rstest]
fn selection_defaults_to_newest(runner: ScriptedRunner) {
    runner.push_output(Some(0), listing([1, 3, 2]), "");
    let selected = store(&runner).select_generation(SITE, None).expect("select");
    assert_eq!(selected, id(3));
}

#[rstest]
fn selection_accepts_listed_id(runner: ScriptedRunner) {
    runner.push_output(Some(0), listing([1, 3, 2]), "");
    let wanted = id(2);
    let selected = store(&runner)
        .select_generation(SITE, Some(wanted.as_str()))
        .expect("select");
    assert_eq!(selected, wanted);
}

#[rstest]
fn selection_rejects_unknown_id(runner: ScriptedRunner) {
    runner.push_output(Some(0), listing([1]), "");
    let err = store(&runner)
        .select_generation(SITE, Some("1_2000-01-01-00-00-00"))
        .expect_err("unknown id");
    assert_eq!(
        err.to_string(),
        "Invalid backup ID provided.\nPlease provide a valid ID from the list using 'ee site backup --list blog.test'."
    );
}

#[rstest]
fn selection_without_generations_fails(runner: ScriptedRunner) {
    runner.push_output(Some(0), "", "");
    let err = store(&runner).select_generation(SITE, None).expect_err("empty");
    assert_eq!(
        err,
        RemoteError::NoGenerations {
            site: SITE.to_owned()
        }
    );
}

#[rstest]
fn generation_size_reads_bytes(runner: ScriptedRunner) {
    runner.push_output(Some(0), r#"{"count":3,"bytes":52428800,"sizeless":0}"#, "");
    let size = store(&runner)
        .generation_size("easyengine:easyengine/blog.test/x")
        .expect("size");
    assert_eq!(size, 52_428_800);
}

#[rstest]
#[case("[easyengine]\ntype = s3\nprovider = AWS\n", true)]
#[case("[easyengine]\ntype = b2\naccount = s3-lookalike\n", false)]
fn backend_detection_reads_type_line(
    runner: ScriptedRunner,
    #[case] config: &str,
    #[case] s3: bool,
) {
    runner.push_output(Some(0), config, "");
    assert_eq!(store(&runner).backend_is_s3().expect("detect"), s3);
    assert_eq!(runner.command_strings(), ["rclone config show easyengine"]);
}

#[rstest]
#[case(1, 2)]
#[case(4, 2)]
#[case(6, 3)]
#[case(64, 4)]
fn upload_transfers_are_clamped(#[case] cores: u64, #[case] transfers: u64) {
    let host = HostResources {
        cores,
        available_ram_mib: 1000,
    };
    assert_eq!(UploadTuning::for_host(host, false).transfers, transfers);
}

#[rstest]
fn upload_buffer_is_capped() {
    let host = HostResources {
        cores: 8,
        available_ram_mib: 64_000,
    };
    let tuning = UploadTuning::for_host(host, true);
    assert_eq!(tuning.buffer_mib, 4096);
    assert_eq!(tuning.s3_upload_concurrency, Some(16));
}

#[rstest]
fn upload_renders_tuned_command(runner: ScriptedRunner) {
    runner.push_success();
    let tuning = UploadTuning::for_host(
        HostResources {
            cores: 20,
            available_ram_mib: 2000,
        },
        true,
    );
    store(&runner)
        .upload(
            camino::Utf8Path::new("/backups/blog.test"),
            "easyengine:easyengine/blog.test/id",
            &tuning,
        )
        .expect("upload");
    assert_eq!(
        runner.command_strings(),
        [
            "rclone copy --s3-chunk-size=64M --s3-upload-concurrency 32 --transfers 4 --checkers 4 \
             --buffer-size 500M /backups/blog.test easyengine:easyengine/blog.test/id"
        ]
    );
}

#[rstest]
fn download_uses_stream_count(runner: ScriptedRunner) {
    runner.push_success();
    let tuning = DownloadTuning::for_host(HostResources {
        cores: 3,
        available_ram_mib: 0,
    });
    store(&runner)
        .download(
            "easyengine:easyengine/blog.test/id",
            camino::Utf8Path::new("/backups/blog.test"),
            &tuning,
        )
        .expect("download");
    assert_eq!(
        runner.command_strings(),
        ["rclone copy --multi-thread-streams 6 easyengine:easyengine/blog.test/id /backups/blog.test"]
    );
}

#[rstest]
#[case(8, 0)]
#[case(9, 2)]
#[case(10, 3)]
#[case(11, 4)]
fn retention_keeps_one_spare(#[case] stored: u32, #[case] purged: usize) {
    let generations: Vec<BackupId> = (1..=stored).rev().map(id).collect();
    let excess = RetentionPolicy::new(7).excess(&generations);
    assert_eq!(excess.len(), purged);
    if let Some(first) = excess.first() {
        assert_eq!(first, &id(1), "oldest generation goes first");
    }
}

#[rstest]
fn prune_continues_after_a_failed_purge(runner: ScriptedRunner) {
    runner.on("lsf --dirs-only", 0, listing(1..=11));
    runner.on(&format!("purge easyengine:easyengine/blog.test/{}", id(2)), 1, "");
    runner.succeed_by_default();

    let summary = store(&runner).prune(SITE, RetentionPolicy::new(7));

    assert_eq!(summary.purged, [id(1), id(3), id(4)]);
    assert_eq!(summary.failed, [id(2)]);
    let purges = runner
        .command_strings()
        .into_iter()
        .filter(|command| command.contains(" purge "))
        .count();
    assert_eq!(purges, 4);
}

#[rstest]
fn prune_tolerates_listing_failure(runner: ScriptedRunner) {
    runner.push_failure(1);
    let summary = store(&runner).prune(SITE, RetentionPolicy::default());
    assert_eq!(summary, PruneSummary::default());
}
