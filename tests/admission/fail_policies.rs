//! Breaker-open and collaborator-outage behavior under both fail policies.

use super::*;
use axum::http::StatusCode;
use portcullis_gateway::config::FailPolicy;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_breaker_opens_after_consecutive_5xx_and_fails_closed() {
    let harness = harness_with(|config| {
        config.auth.fail_policy = FailPolicy::FailClosed;
        config.auth.circuit_breaker.threshold = 5;
    })
    .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/verify-token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(5)
        .mount(&harness.identity)
        .await;

    // Five failures trip the breaker; each fails closed with 503.
    for i in 0..5 {
        let response = harness
            .send(body_of(
                get("/api/v1/billing/invoices")
                    .header("authorization", format!("Bearer token-{}", i)),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    // The sixth call observes breaker-open: no upstream call (expect(5)
    // above), same classified response.
    let response = harness
        .send(body_of(
            get("/api/v1/billing/invoices").header("authorization", "Bearer token-6"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"], "upstream_unavailable");
}

#[tokio::test]
async fn test_fail_closed_rejects_everything_but_public_paths() {
    let harness = harness_with(|config| {
        config.auth.fail_policy = FailPolicy::FailClosed;
    })
    .await;
    harness
        .gateway
        .ctx
        .identity
        .auth_breaker()
        .unwrap()
        .force_open();

    for (uri, credential) in [
        ("/api/v1/agents/42/api/chat", "authorization"),
        ("/api/v1/billing/invoices", "authorization"),
        ("/api/v1/billing/invoices", "x-api-key"),
    ] {
        let builder = match credential {
            "authorization" => get(uri).header("authorization", "Bearer t"),
            _ => get(uri).header("x-api-key", "k"),
        };
        let response = harness.send(body_of(builder)).await;
        assert_eq!(
            response.status(),
            StatusCode::SERVICE_UNAVAILABLE,
            "expected fail-closed rejection for {}",
            uri
        );
    }

    // Public bypass is unaffected by the outage.
    let response = harness.send(body_of(get("/health"))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_fail_open_admits_cached_token_during_outage() {
    let harness = harness_with(|config| {
        config.auth.fail_policy = FailPolicy::FailOpen;
    })
    .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/verify-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(valid_token_json("u-1")))
        .expect(1)
        .mount(&harness.identity)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&harness.backend)
        .await;

    // Warm the verification cache.
    let response = harness
        .send(body_of(
            get("/api/v1/billing/invoices").header("authorization", "Bearer good-token"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Collaborator goes dark. The cached verdict is consulted before the
    // breaker, so the same token is still admitted with full identity.
    harness
        .gateway
        .ctx
        .identity
        .auth_breaker()
        .unwrap()
        .force_open();

    let response = harness
        .send(body_of(
            get("/api/v1/billing/invoices").header("authorization", "Bearer good-token"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let received = harness.backend.received_requests().await.unwrap();
    let last = received.last().unwrap();
    assert_eq!(last.headers.get("x-user-id").unwrap(), "u-1");
}

#[tokio::test]
async fn test_fail_open_uncached_token_continues_as_anonymous() {
    let harness = harness_with(|config| {
        config.auth.fail_policy = FailPolicy::FailOpen;
    })
    .await;
    harness
        .gateway
        .ctx
        .identity
        .auth_breaker()
        .unwrap()
        .force_open();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&harness.backend)
        .await;

    // Unmapped path: anonymous continuation reaches the backend.
    let response = harness
        .send(body_of(
            get("/api/v1/billing/invoices").header("authorization", "Bearer unknown-token"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let received = harness.backend.received_requests().await.unwrap();
    assert!(!received[0].headers.contains_key("x-user-id"));

    // Mapped path: anonymous cannot pass the resource check.
    let response = harness
        .send(body_of(
            get("/api/v1/agents/42/api/chat").header("authorization", "Bearer unknown-token"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_authorization_fail_open_allows_during_outage() {
    let harness = harness_with(|config| {
        config.authorization.fail_policy = FailPolicy::FailOpen;
    })
    .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/verify-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(valid_token_json("u-1")))
        .mount(&harness.identity)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&harness.backend)
        .await;
    harness
        .gateway
        .ctx
        .identity
        .authz_breaker()
        .unwrap()
        .force_open();

    let response = harness
        .send(body_of(
            get("/api/v1/agents/42/history").header("authorization", "Bearer good-token"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_authorization_fail_closed_rejects_during_outage() {
    let harness = harness_with(|config| {
        config.authorization.fail_policy = FailPolicy::FailClosed;
    })
    .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/verify-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(valid_token_json("u-1")))
        .mount(&harness.identity)
        .await;
    harness
        .gateway
        .ctx
        .identity
        .authz_breaker()
        .unwrap()
        .force_open();

    let response = harness
        .send(body_of(
            get("/api/v1/agents/42/history").header("authorization", "Bearer good-token"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"], "upstream_unavailable");
}

#[tokio::test]
async fn test_auth_breaker_does_not_affect_authorization_breaker() {
    let harness = harness_with(|_| {}).await;
    harness
        .gateway
        .ctx
        .identity
        .auth_breaker()
        .unwrap()
        .force_open();

    use portcullis_breaker::CircuitState;
    assert_eq!(
        harness.gateway.ctx.identity.auth_breaker().unwrap().state(),
        CircuitState::Open
    );
    assert_eq!(
        harness.gateway.ctx.identity.authz_breaker().unwrap().state(),
        CircuitState::Closed
    );
}
