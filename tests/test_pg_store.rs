//! PostgreSQL store checks. Need a live database:
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/hypervisors cargo test --test test_pg_store -- --ignored
//! ```

use hypervisor_queue::database::{self, Collection, PgStore, Store};
use hypervisor_queue::queue_item::{QueueItem, QueueItemType};
use hypervisor_queue::queue_store::QueueStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn pg_store() -> Arc<PgStore> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = database::connect(&url, 5).await.expect("connect");
    Arc::new(PgStore::new(pool))
}

// Cada test usa su propia red para no pisarse con otros
fn scratch_network() -> String {
    format!("test_{}", uuid::Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore]
async fn test_pg_upsert_and_find() {
    let store = pg_store().await;
    let network = scratch_network();

    let first = store
        .upsert_many(&network, Collection::Status, vec![("a".to_string(), json!({ "block": 5 }))])
        .await
        .unwrap();
    assert_eq!(first.upserted, 1);

    let second = store
        .upsert_many(&network, Collection::Status, vec![("a".to_string(), json!({ "block": 6 }))])
        .await
        .unwrap();
    assert_eq!(second.upserted, 0);

    let doc = store.find_one(&network, Collection::Status, "a").await.unwrap().unwrap();
    assert_eq!(doc["block"], json!(6));
    assert!(store.find_one(&network, Collection::Static, "a").await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn test_pg_claim_is_exclusive() {
    let store = pg_store().await;
    let network = scratch_network();
    let queue = QueueStore::new(store.clone());
    queue
        .enqueue(&network, vec![QueueItem::block(1, "0xh"), QueueItem::price(1, "0xt")])
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let queue = queue.clone();
            let network = network.clone();
            tokio::spawn(async move {
                queue
                    .claim_one(&network, Some(&[QueueItemType::Block][..]))
                    .await
                    .unwrap()
            })
        })
        .collect();
    let claimed = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter_map(|r| r.unwrap())
        .count();
    assert_eq!(claimed, 1);

    // Lease older than the TTL goes back to the pool
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let released = queue.reap_expired(&network, Duration::from_secs(1), 5).await.unwrap();
    assert_eq!(released, 1);
    assert!(queue.claim_one(&network, None).await.unwrap().is_some());
}

#[tokio::test]
#[ignore]
async fn test_pg_unlock_resets_count() {
    let store = pg_store().await;
    let network = scratch_network();
    let queue = QueueStore::new(store.clone());

    let mut stuck = QueueItem::price(7, "0xt");
    stuck.count = 11;
    stuck.processing = 1.0;
    store.queue_replace(&network, stuck.to_document()).await.unwrap();

    assert_eq!(queue.stuck_items(&network, 5).await.unwrap().len(), 1);
    assert!(queue.unlock(&network, &stuck.id, true).await.unwrap());
    assert!(!queue.unlock(&network, "missing", false).await.unwrap());

    let claimed = queue.claim_one(&network, None).await.unwrap().unwrap();
    assert_eq!(claimed.id, stuck.id);
    assert_eq!(claimed.count, 0);
}

#[tokio::test]
#[ignore]
async fn test_pg_writes_require_current_lease() {
    let store = pg_store().await;
    let network = scratch_network();
    let queue = QueueStore::new(store.clone());
    queue.enqueue(&network, vec![QueueItem::block(3, "0xh")]).await.unwrap();

    let first = queue.claim_one(&network, None).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(queue.reap_expired(&network, Duration::from_secs(1), 5).await.unwrap(), 1);
    let second = queue.claim_one(&network, None).await.unwrap().unwrap();

    assert!(!queue.release(&network, &first).await.unwrap());
    assert!(!queue.complete(&network, &first).await.unwrap());
    assert!(queue.claim_one(&network, None).await.unwrap().is_none());
    assert!(queue.complete(&network, &second).await.unwrap());
}
