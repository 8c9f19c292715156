//! Happy paths, credential precedence, and attribute propagation.

use super::*;
use axum::http::StatusCode;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_jwt_happy_path_propagates_attributes() {
    let harness = harness_with(|_| {}).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/verify-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(valid_token_json("u-1")))
        .expect(1)
        .mount(&harness.identity)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/authorization/check-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(access_granted_json("read_write")))
        .expect(1)
        .mount(&harness.authz)
        .await;
    // The backend only matches when the propagated attributes arrived.
    Mock::given(method("GET"))
        .and(path("/api/v1/agents/42/api/chat"))
        .and(header("x-user-id", "u-1"))
        .and(header("x-auth-method", "jwt"))
        .and(header("x-access-level", "read_write"))
        .and(header("x-permission-source", "subscription"))
        .and(header("x-subscription-tier", "pro"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .expect(1)
        .mount(&harness.backend)
        .await;

    let response = harness
        .send(body_of(
            get("/api/v1/agents/42/api/chat").header("authorization", "Bearer good-token"),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    // Rate-limit headers ride on every admitted response.
    assert!(response.headers().contains_key("x-ratelimit-limit"));
    assert!(response.headers().contains_key("x-ratelimit-remaining"));
    assert!(response.headers().contains_key("x-ratelimit-reset"));
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_jwt_wins_over_api_key() {
    let harness = harness_with(|_| {}).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/verify-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(valid_token_json("u-1")))
        .expect(1)
        .mount(&harness.identity)
        .await;
    // The API key must never be verified when a bearer token is present.
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/verify-api-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"valid": true})))
        .expect(0)
        .mount(&harness.identity)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&harness.backend)
        .await;

    let response = harness
        .send(body_of(
            get("/api/v1/billing/invoices")
                .header("authorization", "Bearer good-token")
                .header("x-api-key", "k-123"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_jwt_does_not_fall_back_to_api_key() {
    let harness = harness_with(|_| {}).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/verify-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({"valid": false, "error": "expired"}),
        ))
        .expect(1)
        .mount(&harness.identity)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/verify-api-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"valid": true})))
        .expect(0)
        .mount(&harness.identity)
        .await;

    let response = harness
        .send(body_of(
            get("/api/v1/billing/invoices")
                .header("authorization", "Bearer stale-token")
                .header("x-api-key", "k-123"),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"], "unauthenticated");
}

#[tokio::test]
async fn test_api_key_auth_when_no_jwt() {
    let harness = harness_with(|_| {}).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/verify-api-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "valid": true,
            "key_id": "k-1",
            "organization_id": "org-9",
            "name": "ci",
            "permissions": ["read"]
        })))
        .expect(1)
        .mount(&harness.identity)
        .await;
    Mock::given(method("GET"))
        .and(header("x-user-id", "k-1"))
        .and(header("x-organization-id", "org-9"))
        .and(header("x-auth-method", "api_key"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&harness.backend)
        .await;

    let response = harness
        .send(body_of(
            get("/api/v1/billing/invoices").header("x-api-key", "pk-live-1234"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_access_denied_is_403_with_reason() {
    let harness = harness_with(|_| {}).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/verify-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(valid_token_json("u-1")))
        .mount(&harness.identity)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/authorization/check-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "has_access": false,
            "user_access_level": "none",
            "reason": "subscription required"
        })))
        .mount(&harness.authz)
        .await;

    let response = harness
        .send(body_of(
            get("/api/v1/agents/42/api/chat").header("authorization", "Bearer good-token"),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body["error"], "forbidden");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("subscription required"));
}

#[tokio::test]
async fn test_anonymous_on_mapped_resource_is_401() {
    let harness = harness_with(|_| {}).await;

    let response = harness
        .send(body_of(get("/api/v1/agents/42/api/chat")))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_anonymous_on_unmapped_path_is_forwarded() {
    let harness = harness_with(|_| {}).await;

    Mock::given(method("GET"))
        .and(path("/api/v1/billing/invoices"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&harness.backend)
        .await;

    let response = harness
        .send(body_of(get("/api/v1/billing/invoices")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // No identity: no attribute headers reached the backend.
    let received = harness.backend.received_requests().await.unwrap();
    assert!(!received[0].headers.contains_key("x-user-id"));
}

#[tokio::test]
async fn test_public_paths_bypass_the_pipeline() {
    // No identity/authz/backend mocks at all: public paths need none.
    let harness = harness_with(|_| {}).await;

    let response = harness.send(body_of(get("/health"))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = harness.send(body_of(get("/ready"))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_spoofed_attribute_headers_are_stripped() {
    let harness = harness_with(|_| {}).await;

    Mock::given(method("GET"))
        .and(path("/api/v1/billing/invoices"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&harness.backend)
        .await;

    let response = harness
        .send(body_of(
            get("/api/v1/billing/invoices")
                .header("x-user-id", "forged-admin")
                .header("x-access-level", "admin"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let received = harness.backend.received_requests().await.unwrap();
    assert!(!received[0].headers.contains_key("x-user-id"));
    assert!(!received[0].headers.contains_key("x-access-level"));
}

#[tokio::test]
async fn test_mapped_mcp_path_checks_exact_resource() {
    let harness = harness_with(|_| {}).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/verify-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(valid_token_json("u-1")))
        .mount(&harness.identity)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/authorization/check-access"))
        .and(wiremock::matchers::body_json(serde_json::json!({
            "user_id": "u-1",
            "resource_type": "mcp_tool",
            "resource_name": "tool_execution",
            "required_access_level": "read_write"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(access_granted_json("read_write")))
        .expect(1)
        .mount(&harness.authz)
        .await;

    // /api/v1/mcp has no backend in the catalog; 404 after admission is
    // fine, the point is the exact check-access tuple above.
    let response = harness
        .send(body_of(
            get("/api/v1/mcp/server-1/tools/call").header("authorization", "Bearer good-token"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
