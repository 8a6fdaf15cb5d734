// Integration tests for `Rest` using wiremock.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sastre_api::{Error, Rest, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

fn server_facts() -> serde_json::Value {
    json!({
        "data": {
            "platformVersion": "20.4.1",
            "CSRFToken": "token-abc123",
        }
    })
}

async fn mock_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/j_security_check"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dataservice/client/server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(server_facts()))
        .mount(server)
        .await;
}

async fn connect(server: &MockServer) -> Rest {
    Rest::connect(
        server.uri().parse().unwrap(),
        "admin",
        "secret",
        None,
        &TransportConfig::default(),
    )
    .await
    .unwrap()
}

// ── Login ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_captures_version_and_token() {
    let server = MockServer::start().await;
    mock_login(&server).await;

    let session = connect(&server).await;
    assert_eq!(session.server_version(), "20.4.1");

    // The CSRF token must be sent on subsequent requests.
    Mock::given(method("GET"))
        .and(path("/dataservice/template/device"))
        .and(wiremock::matchers::header("X-XSRF-TOKEN", "token-abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&server)
        .await;

    session.get_json("template/device").await.unwrap();
}

#[tokio::test]
async fn test_login_rejected_on_html_body() {
    let server = MockServer::start().await;

    // A bad login bounces back to the login page with HTTP 200.
    Mock::given(method("POST"))
        .and(path("/j_security_check"))
        .and(body_string_contains("j_username=admin"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;

    let err = Rest::connect(
        server.uri().parse().unwrap(),
        "admin",
        "wrong",
        None,
        &TransportConfig::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Authentication { .. }));
}

// ── Error mapping ───────────────────────────────────────────────────

#[tokio::test]
async fn test_forbidden_is_fatal_auth_error() {
    let server = MockServer::start().await;
    mock_login(&server).await;
    let session = connect(&server).await;

    Mock::given(method("GET"))
        .and(path("/dataservice/template/policy/vsmart"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1) // no retries on auth failures
        .mount(&server)
        .await;

    let err = session.get_json("template/policy/vsmart").await.unwrap_err();
    assert!(matches!(err, Error::Authentication { .. }));
}

#[tokio::test]
async fn test_status_error_carries_controller_message() {
    let server = MockServer::start().await;
    mock_login(&server).await;
    let session = connect(&server).await;

    Mock::given(method("DELETE"))
        .and(path("/dataservice/template/policy/list/site/abc"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": {"message": "Template is attached"}
        })))
        .mount(&server)
        .await;

    let err = session
        .delete("template/policy/list/site/abc")
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert!(err.to_string().contains("Template is attached"));
}

// ── Rate limiting ───────────────────────────────────────────────────

#[tokio::test]
async fn test_rate_limit_retries_then_succeeds() {
    let server = MockServer::start().await;
    mock_login(&server).await;
    let session = connect(&server).await;

    // Two 429s, then success.
    Mock::given(method("POST"))
        .and(path("/dataservice/template/policy/list/site"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dataservice/template/policy/list/site"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"listId": "new-id"})))
        .mount(&server)
        .await;

    let reply = session
        .post_json("template/policy/list/site", &json!({"name": "DC1"}))
        .await
        .unwrap();
    assert_eq!(reply["listId"], "new-id");
}

#[tokio::test]
async fn test_rate_limit_exhausts_after_budget() {
    let server = MockServer::start().await;
    mock_login(&server).await;
    let session = connect(&server).await;

    Mock::given(method("GET"))
        .and(path("/dataservice/template/feature"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = session.get_json("template/feature").await.unwrap_err();
    assert!(matches!(err, Error::RateLimitExhausted { .. }));
}

// ── Action polling ──────────────────────────────────────────────────

#[tokio::test]
async fn test_poll_action_until_done() {
    let server = MockServer::start().await;
    mock_login(&server).await;
    let session = connect(&server).await;

    Mock::given(method("GET"))
        .and(path("/dataservice/device/action/status/push-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "summary": {"status": "in_progress"},
            "data": []
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dataservice/device/action/status/push-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "summary": {"status": "done"},
            "data": [{"status": "Success", "host-name": "edge1", "activity": ["Done"]}]
        })))
        .mount(&server)
        .await;

    let status = session
        .poll_action(
            "push-123",
            Duration::from_secs(5),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
    assert!(status.is_successful());
}

#[tokio::test]
async fn test_poll_action_times_out() {
    let server = MockServer::start().await;
    mock_login(&server).await;
    let session = connect(&server).await;

    Mock::given(method("GET"))
        .and(path("/dataservice/device/action/status/stuck-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "summary": {"status": "in_progress"},
            "data": []
        })))
        .mount(&server)
        .await;

    let err = session
        .poll_action(
            "stuck-1",
            Duration::from_millis(150),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ActionTimeout { .. }));
}
