mod support;

use api::models::{ResourceFilter, ResourceStatus};
use support::{ADMIN, USER, backend, client, tool_a};

#[tokio::test]
async fn test_submit_then_approve() {
    let setup = backend().await;
    let user = client(&setup.backend, USER).await;
    let admin = client(&setup.backend, ADMIN).await;

    let stats_before = admin.stats.admin_stats().await.unwrap();
    let catalogue = user.resources.list_approved(&ResourceFilter::default()).await.unwrap();
    assert!(catalogue.is_empty());

    // Submitted resources wait for moderation
    let created = user.resources.create(&tool_a()).await.unwrap();
    assert_eq!(created.status, ResourceStatus::Pending);
    assert_eq!(created.user_id, setup.user_id);
    assert_eq!(created.title, "Tool A");

    let own = user.resources.list_own().await.unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].resource.id, created.id);
    assert_eq!(own[0].average_rating, None);

    // Separate clients do not share a cache
    admin.cache.invalidate(&api::keys::family(api::keys::ADMIN_STATS)).await;
    let stats_pending = admin.stats.admin_stats().await.unwrap();
    assert_eq!(stats_pending.pending, stats_before.pending + 1);

    let moderated = admin
        .resources
        .update_status(created.id, ResourceStatus::Approved)
        .await
        .unwrap();
    assert_eq!(moderated.status, ResourceStatus::Approved);

    let stats_after = admin.stats.admin_stats().await.unwrap();
    assert_eq!(stats_after.pending, stats_pending.pending - 1);
    assert_eq!(stats_after.approved, stats_pending.approved + 1);
    assert_eq!(stats_after.total, stats_pending.total);

    let admin_list = admin.resources.list_all().await.unwrap();
    assert_eq!(admin_list[0].resource.status, ResourceStatus::Approved);
    assert_eq!(admin_list[0].owner_name.as_deref(), Some("Ada Lovelace"));

    user.cache.invalidate(&api::keys::family(api::keys::RESOURCES)).await;
    let catalogue = user.resources.list_approved(&ResourceFilter::default()).await.unwrap();
    assert_eq!(catalogue.len(), 1);
    assert_eq!(catalogue[0].id, created.id);
    assert_eq!(catalogue[0].status, ResourceStatus::Approved);
}
