//! Desired-state composition and upserts.

use super::*;
use portcullis_gateway::reconciler::TickStats;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_first_tick_creates_route_with_both_uris() {
    let harness = harness_with(|_| {}).await;

    let _catalog = catalog(&harness.registry, &["billing"]).await;
    let _health = service_health(
        &harness.registry,
        "billing",
        serde_json::json!([instance(
            "billing",
            "10.0.0.5",
            8200,
            serde_json::json!({"api_path": "/api/v1/billing"})
        )]),
    )
    .await;
    let _admin = admin_accepts(&harness.admin, serde_json::json!({"total": 0, "list": []})).await;

    let stats = harness.reconciler.tick().await;
    assert_eq!(
        stats,
        TickStats {
            synced: 1,
            skipped: 0,
            failed: 0,
            deleted: 0
        }
    );

    let bodies = put_bodies(&harness.admin, "billing_route").await;
    assert_eq!(bodies.len(), 1);
    let spec = &bodies[0];
    assert_eq!(
        spec["uris"],
        serde_json::json!(["/api/v1/billing", "/api/v1/billing/*"])
    );
    assert_eq!(spec["upstream"]["type"], "roundrobin");
    assert_eq!(spec["upstream"]["nodes"]["10.0.0.5:8200"], 1);
    assert_eq!(spec["labels"]["managed-by"], "portcullis-reconciler");
    assert_eq!(spec["labels"]["service-name"], "billing");
    assert_eq!(spec["plugins"]["limit-count"]["rejected_code"], 429);
}

#[tokio::test]
async fn test_second_tick_adds_new_service_without_touching_existing() {
    let harness = harness_with(|_| {}).await;

    // First tick: only billing.
    {
        let _catalog = catalog(&harness.registry, &["billing"]).await;
        let _health = service_health(
            &harness.registry,
            "billing",
            serde_json::json!([instance(
                "billing",
                "10.0.0.5",
                8200,
                serde_json::json!({"api_path": "/api/v1/billing"})
            )]),
        )
        .await;
        let _admin =
            admin_accepts(&harness.admin, serde_json::json!({"total": 0, "list": []})).await;
        assert_eq!(harness.reconciler.tick().await.synced, 1);
    }

    // Second tick: notifications joined the catalog.
    {
        let _catalog = catalog(&harness.registry, &["billing", "notifications"]).await;
        let _billing = service_health(
            &harness.registry,
            "billing",
            serde_json::json!([instance(
                "billing",
                "10.0.0.5",
                8200,
                serde_json::json!({"api_path": "/api/v1/billing"})
            )]),
        )
        .await;
        let _notifications = service_health(
            &harness.registry,
            "notifications",
            serde_json::json!([instance(
                "notifications",
                "10.0.0.6",
                8300,
                serde_json::json!({"api_path": "/api/v1/notifications"})
            )]),
        )
        .await;
        let _admin = admin_accepts(
            &harness.admin,
            serde_json::json!({"total": 1, "list": [managed_route("billing_route", "billing")]}),
        )
        .await;

        let stats = harness.reconciler.tick().await;
        assert_eq!(stats.synced, 2);
        assert_eq!(stats.deleted, 0);
    }

    let bodies = put_bodies(&harness.admin, "notifications_route").await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(
        bodies[0]["uris"],
        serde_json::json!(["/api/v1/notifications", "/api/v1/notifications/*"])
    );
}

#[tokio::test]
async fn test_unchanged_catalog_reconverges_to_identical_routes() {
    let harness = harness_with(|_| {}).await;

    let _catalog = catalog(&harness.registry, &["billing"]).await;
    let _health = service_health(
        &harness.registry,
        "billing",
        serde_json::json!([instance(
            "billing",
            "10.0.0.5",
            8200,
            serde_json::json!({"api_path": "/api/v1/billing"})
        )]),
    )
    .await;
    let _admin = admin_accepts(
        &harness.admin,
        serde_json::json!({"total": 1, "list": [managed_route("billing_route", "billing")]}),
    )
    .await;

    let first = harness.reconciler.tick().await;
    let second = harness.reconciler.tick().await;
    assert_eq!(first, second);
    assert_eq!(second.deleted, 0);

    // The upsert is unconditional, so both ticks PUT, but the desired
    // route is byte-identical: the route set converges.
    let bodies = put_bodies(&harness.admin, "billing_route").await;
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0], bodies[1]);
}

#[tokio::test]
async fn test_services_without_path_metadata_are_skipped() {
    let harness = harness_with(|_| {}).await;

    let _catalog = catalog(&harness.registry, &["billing", "worker"]).await;
    let _billing = service_health(
        &harness.registry,
        "billing",
        serde_json::json!([instance(
            "billing",
            "10.0.0.5",
            8200,
            serde_json::json!({"api_path": "/api/v1/billing"})
        )]),
    )
    .await;
    let _worker = service_health(
        &harness.registry,
        "worker",
        serde_json::json!([instance("worker", "10.0.0.9", 9000, serde_json::json!({}))]),
    )
    .await;
    let _admin = admin_accepts(&harness.admin, serde_json::json!({"total": 0, "list": []})).await;

    let stats = harness.reconciler.tick().await;
    assert_eq!(stats.synced, 1);
    assert_eq!(stats.skipped, 1);
    assert!(put_bodies(&harness.admin, "worker_route").await.is_empty());
}

#[tokio::test]
async fn test_one_failing_service_does_not_block_the_rest() {
    let harness = harness_with(|_| {}).await;

    let _catalog = catalog(&harness.registry, &["billing", "notifications"]).await;
    let _billing = service_health(
        &harness.registry,
        "billing",
        serde_json::json!([instance(
            "billing",
            "10.0.0.5",
            8200,
            serde_json::json!({"api_path": "/api/v1/billing"})
        )]),
    )
    .await;
    let _notifications = service_health(
        &harness.registry,
        "notifications",
        serde_json::json!([instance(
            "notifications",
            "10.0.0.6",
            8300,
            serde_json::json!({"api_path": "/api/v1/notifications"})
        )]),
    )
    .await;

    // billing's upsert is rejected; notifications' succeeds.
    let _billing_put = Mock::given(method("PUT"))
        .and(path("/apisix/admin/routes/billing_route"))
        .respond_with(ResponseTemplate::new(500))
        .mount_as_scoped(&harness.admin)
        .await;
    let _admin = admin_accepts(&harness.admin, serde_json::json!({"total": 0, "list": []})).await;

    let stats = harness.reconciler.tick().await;
    assert_eq!(stats.synced, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(put_bodies(&harness.admin, "notifications_route").await.len(), 1);
}

#[tokio::test]
async fn test_rewrite_service_gets_proxy_rewrite_plugin() {
    let harness = harness_with(|config| {
        config.path_rewrite_services = vec!["mcp_service".to_string()];
    })
    .await;

    let _catalog = catalog(&harness.registry, &["mcp_service"]).await;
    let _health = service_health(
        &harness.registry,
        "mcp_service",
        serde_json::json!([instance(
            "mcp_service",
            "10.0.0.7",
            7000,
            serde_json::json!({"api_path": "/api/v1/mcp", "auth_required": "true"})
        )]),
    )
    .await;
    let _admin = admin_accepts(&harness.admin, serde_json::json!({"total": 0, "list": []})).await;

    harness.reconciler.tick().await;

    let bodies = put_bodies(&harness.admin, "mcp_service_route").await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(
        bodies[0]["plugins"]["proxy-rewrite"]["regex_uri"],
        serde_json::json!(["^/api/v1/mcp(/.*)$", "$1"])
    );
    assert!(bodies[0]["plugins"]["jwt-auth"].is_object());
}

#[tokio::test]
async fn test_registry_itself_is_never_routed() {
    let harness = harness_with(|_| {}).await;

    let _catalog = catalog(&harness.registry, &["consul", "billing"]).await;
    let _health = service_health(
        &harness.registry,
        "billing",
        serde_json::json!([instance(
            "billing",
            "10.0.0.5",
            8200,
            serde_json::json!({"api_path": "/api/v1/billing"})
        )]),
    )
    .await;
    let _admin = admin_accepts(&harness.admin, serde_json::json!({"total": 0, "list": []})).await;

    let stats = harness.reconciler.tick().await;
    assert_eq!(stats.synced, 1);
    assert!(put_bodies(&harness.admin, "consul_route").await.is_empty());
}

#[tokio::test]
async fn test_unresolvable_node_is_omitted() {
    let harness = harness_with(|_| {}).await;

    let _catalog = catalog(&harness.registry, &["billing"]).await;
    let _health = service_health(
        &harness.registry,
        "billing",
        serde_json::json!([
            instance(
                "billing",
                "10.0.0.5",
                8200,
                serde_json::json!({"api_path": "/api/v1/billing"})
            ),
            instance(
                "billing",
                "nonexistent.invalid",
                8200,
                serde_json::json!({"api_path": "/api/v1/billing"})
            )
        ]),
    )
    .await;
    let _admin = admin_accepts(&harness.admin, serde_json::json!({"total": 0, "list": []})).await;

    let stats = harness.reconciler.tick().await;
    assert_eq!(stats.synced, 1);

    let bodies = put_bodies(&harness.admin, "billing_route").await;
    let nodes = bodies[0]["upstream"]["nodes"].as_object().unwrap();
    assert_eq!(nodes.len(), 1);
    assert!(nodes.contains_key("10.0.0.5:8200"));
}

#[tokio::test]
async fn test_admin_key_is_sent_on_upserts() {
    let harness = harness_with(|_| {}).await;

    let _catalog = catalog(&harness.registry, &["billing"]).await;
    let _health = service_health(
        &harness.registry,
        "billing",
        serde_json::json!([instance(
            "billing",
            "10.0.0.5",
            8200,
            serde_json::json!({"api_path": "/api/v1/billing"})
        )]),
    )
    .await;
    let _put = Mock::given(method("PUT"))
        .and(header("X-API-KEY", "test-admin-key"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount_as_scoped(&harness.admin)
        .await;
    let _list = Mock::given(method("GET"))
        .and(path("/apisix/admin/routes"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"total": 0, "list": []})),
        )
        .mount_as_scoped(&harness.admin)
        .await;

    let stats = harness.reconciler.tick().await;
    assert_eq!(stats.synced, 1);
}
