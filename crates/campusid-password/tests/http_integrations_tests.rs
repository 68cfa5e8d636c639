//! HTTP dispatcher behavior against a mock downstream endpoint.

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use campusid_core::CorrelationId;
use campusid_password::{HttpIntegrations, Integrations, ACTION_CHANGE_PASSWORD};

fn dispatcher(server: &MockServer) -> HttpIntegrations {
    HttpIntegrations::new(server.uri()).unwrap()
}

#[tokio::test]
async fn successful_dispatch_returns_downstream_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/cloud-idp/change_password"))
        .and(body_partial_json(json!({
            "action": "change_password",
            "system": "cloud-idp",
            "params": { "username": "luke.skywalker" },
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "success": true, "code": "ok" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (ok, code) = dispatcher(&server)
        .do_synchronous_action(
            ACTION_CHANGE_PASSWORD,
            "cloud-idp",
            CorrelationId::new(),
            &json!({ "username": "luke.skywalker" }),
        )
        .await;

    assert!(ok);
    assert_eq!(code, "ok");
}

#[tokio::test]
async fn semantic_rejection_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/cloud-idp/change_password"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": false, "code": "policy_rejected" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (ok, code) = dispatcher(&server)
        .do_synchronous_action(
            ACTION_CHANGE_PASSWORD,
            "cloud-idp",
            CorrelationId::new(),
            &json!({}),
        )
        .await;

    assert!(!ok);
    assert_eq!(code, "policy_rejected");
}

#[tokio::test]
async fn transient_server_errors_retry_then_succeed() {
    let server = MockServer::start().await;
    // The first two attempts hit a 500, the third succeeds.
    Mock::given(method("POST"))
        .and(path("/hooks/attendance/change_password"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hooks/attendance/change_password"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "success": true, "code": "ok" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (ok, code) = dispatcher(&server)
        .do_synchronous_action(
            ACTION_CHANGE_PASSWORD,
            "attendance",
            CorrelationId::new(),
            &json!({}),
        )
        .await;

    assert!(ok);
    assert_eq!(code, "ok");
}

#[tokio::test]
async fn persistent_server_errors_exhaust_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/attendance/change_password"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let (ok, code) = dispatcher(&server)
        .do_synchronous_action(
            ACTION_CHANGE_PASSWORD,
            "attendance",
            CorrelationId::new(),
            &json!({}),
        )
        .await;

    assert!(!ok);
    assert_eq!(code, "http_500");
}

#[tokio::test]
async fn client_error_is_semantic_and_final() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/mail/change_password"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let (ok, code) = dispatcher(&server)
        .do_synchronous_action(
            ACTION_CHANGE_PASSWORD,
            "mail",
            CorrelationId::new(),
            &json!({}),
        )
        .await;

    assert!(!ok);
    assert_eq!(code, "http_403");
}

#[tokio::test]
async fn unreachable_endpoint_reports_unavailable() {
    // A port nothing listens on.
    let http = HttpIntegrations::new("http://127.0.0.1:9").unwrap();

    let (ok, code) = http
        .do_synchronous_action(
            ACTION_CHANGE_PASSWORD,
            "cloud-idp",
            CorrelationId::new(),
            &json!({}),
        )
        .await;

    assert!(!ok);
    assert_eq!(code, "unavailable");
}

#[tokio::test]
async fn unparseable_response_fails_closed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/mail/change_password"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .expect(1)
        .mount(&server)
        .await;

    let (ok, code) = dispatcher(&server)
        .do_synchronous_action(
            ACTION_CHANGE_PASSWORD,
            "mail",
            CorrelationId::new(),
            &json!({}),
        )
        .await;

    assert!(!ok);
    assert_eq!(code, "invalid_response");
}
