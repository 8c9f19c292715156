//! Rate limiting through the full pipeline.

use super::*;
use axum::http::StatusCode;
use wiremock::matchers::method;
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_burst_exhaustion_returns_429_with_retry_after() {
    // Slow refill so the burst boundary is exact regardless of test speed:
    // burst = 0.5 rps x 40 = 20 requests.
    let harness = harness_with(|config| {
        config.rate_limiting.free_rps = 0.5;
        config.rate_limiting.burst_multiplier = 40.0;
    })
    .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&harness.backend)
        .await;

    for i in 0..20 {
        let response = harness
            .send(body_of(
                get("/api/v1/billing/invoices").header("x-forwarded-for", "198.51.100.7"),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK, "request {} should pass", i);
    }

    let response = harness
        .send(body_of(
            get("/api/v1/billing/invoices").header("x-forwarded-for", "198.51.100.7"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    assert!(response.headers().contains_key("x-ratelimit-limit"));
    assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "0");

    let body = json_body(response).await;
    assert_eq!(body["error"], "rate_limit_exceeded");
    assert_eq!(body["current_tier"], "free");
    assert!(body["retry_after"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_distinct_ips_have_distinct_buckets() {
    let harness = harness_with(|config| {
        config.rate_limiting.free_rps = 0.5;
        config.rate_limiting.burst_multiplier = 2.0; // burst = 1
    })
    .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&harness.backend)
        .await;

    let send_from = |ip: &'static str| {
        harness.send(body_of(
            get("/api/v1/billing/invoices").header("x-forwarded-for", ip),
        ))
    };

    assert_eq!(send_from("198.51.100.1").await.status(), StatusCode::OK);
    assert_eq!(
        send_from("198.51.100.1").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    // A different caller is unaffected.
    assert_eq!(send_from("198.51.100.2").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_user_key_wins_over_ip() {
    let harness = harness_with(|config| {
        config.rate_limiting.free_rps = 0.5;
        config.rate_limiting.burst_multiplier = 2.0; // burst = 1 per key
    })
    .await;

    wiremock::Mock::given(method("POST"))
        .and(wiremock::matchers::path("/api/v1/auth/verify-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(valid_token_json("u-1")))
        .mount(&harness.identity)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&harness.backend)
        .await;

    // Exhaust the IP bucket anonymously.
    let anon = get("/api/v1/billing/invoices").header("x-forwarded-for", "198.51.100.9");
    assert_eq!(harness.send(body_of(anon)).await.status(), StatusCode::OK);

    // The authenticated user from the same IP draws from their own bucket.
    let authed = get("/api/v1/billing/invoices")
        .header("x-forwarded-for", "198.51.100.9")
        .header("authorization", "Bearer good-token");
    assert_eq!(harness.send(body_of(authed)).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_headers_count_down() {
    let harness = harness_with(|config| {
        config.rate_limiting.free_rps = 10.0;
        config.rate_limiting.burst_multiplier = 2.0;
    })
    .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&harness.backend)
        .await;

    let remaining = |response: &axum::response::Response| -> u32 {
        response
            .headers()
            .get("x-ratelimit-remaining")
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap()
    };

    let first = harness
        .send(body_of(
            get("/api/v1/billing/invoices").header("x-forwarded-for", "198.51.100.3"),
        ))
        .await;
    assert_eq!(first.headers().get("x-ratelimit-limit").unwrap(), "10");
    let remaining_first = remaining(&first);
    assert_eq!(remaining_first, 19);

    // Five more rapid requests drain faster than the bucket refills.
    let mut last = first;
    for _ in 0..5 {
        last = harness
            .send(body_of(
                get("/api/v1/billing/invoices").header("x-forwarded-for", "198.51.100.3"),
            ))
            .await;
    }
    assert!(remaining(&last) <= remaining_first - 3);
}
