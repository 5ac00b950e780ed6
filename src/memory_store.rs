// In-process Store: documents en DashMap, cola detrás de un Mutex
//
// Used by the test-suite and by `queue_worker --dry-run`. The queue lives
// behind a single mutex so that claim is one critical section, which gives
// the same at-most-one-claimant guarantee as the PostgreSQL statement.

use crate::database::{Collection, DocFilter, QueueFilter, Store, WriteResult};
use crate::queue_item::{QueueDocument, QueueItemType};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

type DocKey = (String, &'static str, String);

#[derive(Default)]
pub struct MemoryStore {
    documents: DashMap<DocKey, Value>,
    queues: Mutex<HashMap<String, HashMap<String, QueueDocument>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(network: &str, collection: Collection, id: &str) -> DocKey {
        (
            collection.scope(network).to_string(),
            collection.as_str(),
            id.to_string(),
        )
    }

    fn queues(&self) -> Result<MutexGuard<'_, HashMap<String, HashMap<String, QueueDocument>>>> {
        self.queues
            .lock()
            .map_err(|_| anyhow!("memory queue lock poisoned"))
    }

    /// Number of documents in a collection (test helper).
    pub fn count(&self, network: &str, collection: Collection) -> usize {
        let scope = collection.scope(network);
        self.documents
            .iter()
            .filter(|entry| {
                let (s, c, _) = entry.key();
                s == scope && *c == collection.as_str()
            })
            .count()
    }

    /// Snapshot of a network's queue ordered by creation (test helper).
    pub fn queue_snapshot(&self, network: &str) -> Result<Vec<QueueDocument>> {
        let queues = self.queues()?;
        let mut docs: Vec<QueueDocument> = queues
            .get(network)
            .map(|q| q.values().cloned().collect())
            .unwrap_or_default();
        docs.sort_by(|a, b| a.creation.total_cmp(&b.creation).then(a.id.cmp(&b.id)));
        Ok(docs)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_one(
        &self,
        network: &str,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Value>> {
        Ok(self
            .documents
            .get(&Self::key(network, collection, id))
            .map(|doc| doc.value().clone()))
    }

    async fn find_many(
        &self,
        network: &str,
        collection: Collection,
        filter: &DocFilter,
    ) -> Result<Vec<Value>> {
        let scope = collection.scope(network);
        Ok(self
            .documents
            .iter()
            .filter(|entry| {
                let (s, c, _) = entry.key();
                s == scope && *c == collection.as_str() && filter.matches(entry.value())
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn upsert_many(
        &self,
        network: &str,
        collection: Collection,
        docs: Vec<(String, Value)>,
    ) -> Result<WriteResult> {
        let mut result = WriteResult::default();
        for (id, doc) in docs {
            match self.documents.insert(Self::key(network, collection, &id), doc.clone()) {
                None => result.upserted += 1,
                Some(previous) if previous == doc => result.matched += 1,
                Some(_) => result.modified += 1,
            }
        }
        Ok(result)
    }

    async fn delete_one(
        &self,
        network: &str,
        collection: Collection,
        id: &str,
    ) -> Result<WriteResult> {
        let deleted = self
            .documents
            .remove(&Self::key(network, collection, id))
            .map_or(0, |_| 1);
        Ok(WriteResult {
            deleted,
            ..Default::default()
        })
    }

    async fn queue_upsert(&self, network: &str, docs: Vec<QueueDocument>) -> Result<WriteResult> {
        let mut result = WriteResult::default();
        let mut queues = self.queues()?;
        let queue = queues.entry(network.to_string()).or_default();
        for doc in docs {
            match queue.get_mut(&doc.id) {
                Some(existing) if existing.data == doc.data => result.matched += 1,
                Some(existing) => {
                    existing.data = doc.data;
                    result.modified += 1;
                }
                None => {
                    queue.insert(doc.id.clone(), doc);
                    result.upserted += 1;
                }
            }
        }
        Ok(result)
    }

    async fn queue_claim_one(
        &self,
        network: &str,
        types: Option<&[QueueItemType]>,
        now: f64,
    ) -> Result<Option<QueueDocument>> {
        let mut queues = self.queues()?;
        let Some(queue) = queues.get_mut(network) else {
            return Ok(None);
        };

        let candidate = queue
            .values()
            .filter(|doc| doc.processing == 0.0)
            .filter(|doc| types.map_or(true, |ts| ts.iter().any(|t| t.as_str() == doc.item_type)))
            .min_by(|a, b| a.creation.total_cmp(&b.creation).then(a.id.cmp(&b.id)))
            .map(|doc| doc.id.clone());

        Ok(candidate.and_then(|id| {
            queue.get_mut(&id).map(|doc| {
                doc.processing = now;
                doc.clone()
            })
        }))
    }

    async fn queue_replace(&self, network: &str, doc: QueueDocument) -> Result<WriteResult> {
        let mut queues = self.queues()?;
        let queue = queues.entry(network.to_string()).or_default();
        let result = match queue.insert(doc.id.clone(), doc.clone()) {
            None => WriteResult { upserted: 1, ..Default::default() },
            Some(previous) if previous == doc => WriteResult { matched: 1, ..Default::default() },
            Some(_) => WriteResult { modified: 1, ..Default::default() },
        };
        Ok(result)
    }

    async fn queue_replace_leased(
        &self,
        network: &str,
        doc: QueueDocument,
        lease: f64,
    ) -> Result<bool> {
        let mut queues = self.queues()?;
        let Some(current) = queues.get_mut(network).and_then(|q| q.get_mut(&doc.id)) else {
            return Ok(false);
        };
        if current.processing != lease {
            return Ok(false);
        }
        *current = doc;
        Ok(true)
    }

    async fn queue_delete_leased(&self, network: &str, id: &str, lease: f64) -> Result<bool> {
        let mut queues = self.queues()?;
        let Some(queue) = queues.get_mut(network) else {
            return Ok(false);
        };
        if queue.get(id).map_or(true, |doc| doc.processing != lease) {
            return Ok(false);
        }
        Ok(queue.remove(id).is_some())
    }

    async fn queue_release_expired(
        &self,
        network: &str,
        claimed_before: f64,
        below_count: u32,
    ) -> Result<u64> {
        let mut queues = self.queues()?;
        let mut released = 0;
        if let Some(queue) = queues.get_mut(network) {
            for doc in queue.values_mut() {
                if doc.processing > 0.0 && doc.processing < claimed_before && doc.count < below_count {
                    doc.processing = 0.0;
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    async fn queue_find(&self, network: &str, filter: &QueueFilter) -> Result<Vec<QueueDocument>> {
        let mut docs: Vec<QueueDocument> = self
            .queue_snapshot(network)?
            .into_iter()
            .filter(|doc| filter.matches(doc))
            .collect();
        if let Some(limit) = filter.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue_item::QueueItem;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_reports_match_modify_insert() {
        let store = MemoryStore::new();
        let docs = vec![("a".to_string(), json!({ "v": 1 }))];
        let first = store.upsert_many("ethereum", Collection::Status, docs.clone()).await.unwrap();
        assert_eq!(first.upserted, 1);
        let second = store.upsert_many("ethereum", Collection::Status, docs).await.unwrap();
        assert_eq!(second.matched, 1);
        let third = store
            .upsert_many("ethereum", Collection::Status, vec![("a".to_string(), json!({ "v": 2 }))])
            .await
            .unwrap();
        assert_eq!(third.modified, 1);
    }

    #[tokio::test]
    async fn test_global_collections_visible_from_every_network() {
        let store = MemoryStore::new();
        store
            .upsert_many("ethereum", Collection::Prices, vec![("p".to_string(), json!({}))])
            .await
            .unwrap();
        assert!(store.find_one("polygon", Collection::Prices, "p").await.unwrap().is_some());
        assert!(store.find_one("polygon", Collection::Status, "p").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queue_upsert_keeps_counters() {
        let store = MemoryStore::new();
        let mut doc = QueueItem::price(10, "0xt").to_document();
        doc.count = 4;
        doc.processing = 123.0;
        store.queue_replace("ethereum", doc.clone()).await.unwrap();

        let mut again = QueueItem::price(10, "0xt").to_document();
        again.count = 0;
        store.queue_upsert("ethereum", vec![again]).await.unwrap();

        let stored = store.queue_snapshot("ethereum").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].count, 4);
        assert_eq!(stored[0].processing, 123.0);
        assert_eq!(stored[0].creation, doc.creation);
    }

    #[tokio::test]
    async fn test_leased_writes_need_the_current_lease() {
        let store = MemoryStore::new();
        let mut doc = QueueItem::price(10, "0xt").to_document();
        doc.processing = 200.0;
        store.queue_replace("ethereum", doc.clone()).await.unwrap();

        let mut stale = doc.clone();
        stale.processing = 0.0;
        stale.count = 1;
        assert!(!store.queue_replace_leased("ethereum", stale, 100.0).await.unwrap());
        assert!(!store.queue_delete_leased("ethereum", &doc.id, 100.0).await.unwrap());
        assert_eq!(store.queue_snapshot("ethereum").unwrap()[0], doc);

        let mut released = doc.clone();
        released.processing = 0.0;
        assert!(store.queue_replace_leased("ethereum", released, 200.0).await.unwrap());
        assert!(store.queue_delete_leased("ethereum", &doc.id, 0.0).await.unwrap());
        assert!(store.queue_snapshot("ethereum").unwrap().is_empty());
        assert!(!store.queue_replace_leased("ethereum", doc, 0.0).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_respects_type_filter() {
        let store = MemoryStore::new();
        store
            .queue_upsert(
                "ethereum",
                vec![QueueItem::price(10, "0xt").to_document(), QueueItem::block(10, "0xh").to_document()],
            )
            .await
            .unwrap();

        let claimed = store
            .queue_claim_one("ethereum", Some(&[QueueItemType::Block]), 1.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.item_type, "block");
        assert!(store
            .queue_claim_one("ethereum", Some(&[QueueItemType::Block]), 2.0)
            .await
            .unwrap()
            .is_none());
    }
}
