//! Unit tests for the command runner helpers.

use rstest::rstest;

use super::*;

fn output(code: Option<i32>, stderr: &str) -> CommandOutput {
    CommandOutput {
        code,
        stdout: String::new(),
        stderr: stderr.to_owned(),
    }
}

#[rstest]
#[case(Some(0), true)]
#[case(Some(1), false)]
#[case(None, false)]
fn is_success_only_for_zero(#[case] code: Option<i32>, #[case] expected: bool) {
    assert_eq!(output(code, "").is_success(), expected);
}

#[test]
fn require_success_maps_failure_with_trimmed_stderr() {
    let err = output(Some(2), "boom\n")
        .require_success("7z")
        .expect_err("non-zero exit should fail");
    assert_eq!(
        err,
        ProcessError::CommandFailure {
            program: String::from("7z"),
            status: Some(2),
            status_text: String::from("2"),
            stderr: String::from("boom"),
        }
    );
}

#[test]
fn missing_exit_code_reports_unknown_status() {
    let err = output(None, "").into_failure("rclone");
    assert!(err.to_string().contains("status unknown"));
}

#[rstest]
#[case(Some(1), true)]
#[case(Some(11), true)]
#[case(Some(2), false)]
#[case(None, false)]
fn exited_with_any_matches_listed_codes(#[case] code: Option<i32>, #[case] expected: bool) {
    assert_eq!(output(code, "").exited_with_any(&[1, 11]), expected);
}

#[test]
fn process_runner_honours_working_directory() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = camino::Utf8Path::from_path(temp.path()).expect("utf8 tempdir");
    let result = ProcessCommandRunner
        .run_in(Some(dir), "pwd", &[])
        .expect("pwd should spawn");
    assert!(result.is_success());
    let reported = std::fs::canonicalize(result.stdout.trim()).expect("canonical pwd");
    let expected = std::fs::canonicalize(temp.path()).expect("canonical tempdir");
    assert_eq!(reported, expected);
}

#[test]
fn process_runner_reports_spawn_failure() {
    let err = ProcessCommandRunner
        .run("definitely-not-a-real-binary-1b2c", &[])
        .expect_err("missing binary should fail to spawn");
    assert!(matches!(err, ProcessError::Spawn { .. }));
}
