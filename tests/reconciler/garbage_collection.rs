//! Orphan deletion and the managed-by guard.

use super::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_departed_service_route_is_deleted() {
    let harness = harness_with(|_| {}).await;

    // billing left the catalog; notifications remains.
    let _catalog = catalog(&harness.registry, &["notifications"]).await;
    let _health = service_health(
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

    let _delete = Mock::given(method("DELETE"))
        .and(path("/apisix/admin/routes/billing_route"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount_as_scoped(&harness.admin)
        .await;
    let _admin = admin_accepts(
        &harness.admin,
        serde_json::json!({
            "total": 2,
            "list": [
                managed_route("billing_route", "billing"),
                managed_route("notifications_route", "notifications"),
            ]
        }),
    )
    .await;

    let stats = harness.reconciler.tick().await;
    assert_eq!(stats.synced, 1);
    assert_eq!(stats.deleted, 1);

    // notifications_route must not have been deleted.
    let deletes: Vec<_> = harness
        .admin
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "DELETE")
        .collect();
    assert_eq!(deletes.len(), 1);
    assert!(deletes[0].url.path().ends_with("/billing_route"));
}

#[tokio::test]
async fn test_unmanaged_routes_are_never_touched() {
    let harness = harness_with(|_| {}).await;

    let _catalog = catalog(&harness.registry, &["notifications"]).await;
    let _health = service_health(
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

    // A hand-authored route with no labels, plus one with unrelated labels:
    // neither belongs to a catalog service, neither may be deleted.
    let _delete = Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount_as_scoped(&harness.admin)
        .await;
    let _admin = admin_accepts(
        &harness.admin,
        serde_json::json!({
            "total": 3,
            "list": [
                {"value": {"id": 42, "name": "hand-made"}},
                {"value": {"id": "ops_route", "name": "ops_route",
                           "labels": {"team": "platform"}}},
                managed_route("notifications_route", "notifications"),
            ]
        }),
    )
    .await;

    let stats = harness.reconciler.tick().await;
    assert_eq!(stats.deleted, 0);
}

#[tokio::test]
async fn test_failed_delete_is_counted_and_does_not_stop_the_tick() {
    let harness = harness_with(|_| {}).await;

    let _catalog = catalog(&harness.registry, &["notifications"]).await;
    let _health = service_health(
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

    let _delete = Mock::given(method("DELETE"))
        .and(path("/apisix/admin/routes/billing_route"))
        .respond_with(ResponseTemplate::new(500))
        .mount_as_scoped(&harness.admin)
        .await;
    let _admin = admin_accepts(
        &harness.admin,
        serde_json::json!({
            "total": 2,
            "list": [
                managed_route("billing_route", "billing"),
                managed_route("notifications_route", "notifications"),
            ]
        }),
    )
    .await;

    let stats = harness.reconciler.tick().await;
    assert_eq!(stats.synced, 1);
    assert_eq!(stats.deleted, 0);
    assert_eq!(stats.failed, 1);
}
