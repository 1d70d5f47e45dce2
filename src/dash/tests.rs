//! Unit tests for dashboard callbacks and the exit guard.

use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::metadata::ContentCounts;
use crate::test_support::ScriptedTransport;

const API_URL: &str = "https://dash.example.com/api/method/";

#[fixture]
fn transport() -> ScriptedTransport {
    ScriptedTransport::new()
}

fn client(transport: &ScriptedTransport) -> DashClient<ScriptedTransport> {
    DashClient::new(transport.clone(), API_URL, Duration::ZERO)
}

fn session() -> DashSession {
    let auth: DashAuth = "bk-42:tok-secret".parse().expect("auth");
    DashSession::new(String::from("blog.test"), auth)
}

fn metadata() -> BackupMetadata {
    BackupMetadata {
        site_url: String::from("blog.test"),
        site_type: String::from("wp"),
        db_name: Some(String::from("blog_db")),
        site_container_fs_path: String::from("/var/www/htdocs"),
        php_version: Some(String::from("8.2")),
        remote_path: String::from("easyengine/blog.test/1700000000_2023-11-14-22-13-20"),
        wordpress: Some(ContentCounts {
            post_count: String::from("12"),
            page_count: String::from("3"),
            comment_count: String::from("-"),
            upload_count: String::from("7"),
            plugin_count: String::from("oops"),
            theme_count: String::from("2"),
            user_count: String::from("1"),
            wp_version: String::from("6.4.2"),
        }),
    }
}

#[rstest]
#[case("bk-42:tok", Some(("bk-42", "tok")))]
#[case("bk-42:tok:with:colons", Some(("bk-42", "tok:with:colons")))]
#[case("bk-42", None)]
#[case(":tok", None)]
#[case("bk-42:", None)]
fn auth_parsing(#[case] raw: &str, #[case] expected: Option<(&str, &str)>) {
    let parsed = raw.parse::<DashAuth>().ok();
    assert_eq!(
        parsed
            .as_ref()
            .map(|auth| (auth.backup_id.as_str(), auth.verify_token.as_str())),
        expected
    );
}

#[rstest]
fn auth_debug_hides_token() {
    let rendered = format!("{:?}", session().auth());
    assert!(rendered.contains("bk-42"));
    assert!(!rendered.contains("tok-secret"));
}

#[rstest]
fn connect_requires_api_url() {
    let err = DashClient::connect(Some("  "), Duration::ZERO).expect_err("blank url");
    assert_eq!(err, DashError::MissingApiUrl);
}

#[rstest]
#[tokio::test]
async fn success_payload_sanitises_counts(transport: ScriptedTransport) {
    transport.push_status(200);
    let mut session = session();

    client(&transport)
        .send_success(&mut session, &metadata())
        .await
        .expect("delivered");

    assert_eq!(session.outcome(), CallbackOutcome::Succeeded);
    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].url,
        "https://dash.example.com/api/method/easydash.easydash.doctype.site_backup.site_backup.on_ee_backup_success"
    );
    assert_eq!(
        requests[0].body,
        json!({
            "site": "blog.test",
            "backup": "bk-42",
            "verify": "tok-secret",
            "metadata": {
                "post_count": 12,
                "theme_count": 2,
                "user_count": 1,
                "plugin_count": 0,
                "wp_version": "6.4.2",
                "comment_count": 0,
                "page_count": 3,
                "upload_count": 7,
                "site_type": "wp",
                "remote_path": "easyengine/blog.test/1700000000_2023-11-14-22-13-20",
            },
        })
    );
}

#[rstest]
#[tokio::test]
async fn server_errors_exhaust_four_attempts(transport: ScriptedTransport) {
    transport.always(503);
    let mut session = session();

    let err = client(&transport)
        .send_success(&mut session, &metadata())
        .await
        .expect_err("should fail");

    assert_eq!(transport.requests().len(), 4);
    assert!(matches!(err, DashError::Delivery { attempts: 4, .. }));
    assert_eq!(session.outcome(), CallbackOutcome::FailedFinal);
}

#[rstest]
#[tokio::test]
async fn client_errors_are_final(transport: ScriptedTransport) {
    transport.push_status(404);
    let mut session = session();

    let err = client(&transport)
        .send_success(&mut session, &metadata())
        .await
        .expect_err("should fail");

    assert_eq!(transport.requests().len(), 1);
    assert!(matches!(err, DashError::Delivery { attempts: 1, .. }));
}

#[rstest]
#[tokio::test]
async fn connection_errors_are_retried(transport: ScriptedTransport) {
    transport.push_connection_error();
    transport.push_status(502);
    transport.push_status(201);
    let mut session = session();

    client(&transport)
        .send_success(&mut session, &metadata())
        .await
        .expect("third attempt succeeds");

    assert_eq!(transport.requests().len(), 3);
}

#[rstest]
#[tokio::test]
async fn failure_payload_carries_only_identity(transport: ScriptedTransport) {
    transport.push_status(200);
    let mut session = session();

    client(&transport)
        .send_failure(&mut session)
        .await
        .expect("delivered");

    let requests = transport.requests();
    assert!(requests[0].url.ends_with("on_ee_backup_failure"));
    assert_eq!(
        requests[0].body,
        json!({"site": "blog.test", "backup": "bk-42", "verify": "tok-secret"})
    );
    assert_eq!(session.outcome(), CallbackOutcome::FailedFinal);
}

#[rstest]
#[tokio::test]
async fn dropped_guard_reports_failure(transport: ScriptedTransport) {
    transport.always(200);
    let guard = ExitGuard::arm(client(&transport), session());
    drop(guard);

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].url.ends_with("on_ee_backup_failure"));
}

#[rstest]
#[tokio::test]
async fn reported_guard_stays_silent_on_drop(transport: ScriptedTransport) {
    transport.push_status(404);
    let mut guard = ExitGuard::arm(client(&transport), session());
    let result = guard.report_success(&metadata()).await;
    assert!(result.is_err());
    assert_eq!(guard.outcome(), CallbackOutcome::FailedFinal);
    drop(guard);

    assert_eq!(transport.requests().len(), 1);
}

#[rstest]
#[tokio::test]
async fn settle_sends_failure_once(transport: ScriptedTransport) {
    transport.always(200);
    let mut guard = ExitGuard::arm(client(&transport), session());
    guard.settle().await;
    guard.settle().await;
    drop(guard);

    assert_eq!(transport.requests().len(), 1);
}
