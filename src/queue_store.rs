//! # Queue Store
//!
//! Engine-facing operations over the `queue` collection of one store:
//! idempotent enqueue, atomic claim, release, completion, and the operator
//! actions (lease reaping, stuck listing, manual unlock).

use crate::database::{QueueFilter, Store, WriteResult};
use crate::errors::ScraperError;
use crate::metrics;
use crate::queue_item::{QueueDocument, QueueItem, QueueItemType};
use crate::utils::now_ts;
use anyhow::Result;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct QueueStore {
    store: Arc<dyn Store>,
}

impl QueueStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Bulk upsert keyed by identity.
    ///
    /// Items sharing an id inside the batch collapse to the last one. An
    /// identity already in the queue keeps its `creation`, `count` and lease.
    pub async fn enqueue(&self, network: &str, items: Vec<QueueItem>) -> Result<WriteResult> {
        if items.is_empty() {
            return Ok(WriteResult::default());
        }

        let mut order: Vec<String> = Vec::with_capacity(items.len());
        let mut by_id: HashMap<String, QueueDocument> = HashMap::with_capacity(items.len());
        for item in items {
            let doc = item.to_document();
            if by_id.insert(doc.id.clone(), doc).is_none() {
                order.push(item.id);
            }
        }
        let docs: Vec<QueueDocument> = order
            .into_iter()
            .filter_map(|id| by_id.remove(&id))
            .collect();

        let total = docs.len();
        let result = self.store.queue_upsert(network, docs).await?;
        metrics::increment_enqueued(network, result.upserted);
        debug!(
            "[Queue] {} enqueue: {} items ({} new, {} updated, {} unchanged)",
            network, total, result.upserted, result.modified, result.matched
        );
        Ok(result)
    }

    /// Claims one unclaimed item, optionally restricted to `types`.
    ///
    /// A row whose type this build does not know is released and the error is
    /// raised. A row whose payload cannot be decoded is parked: `count` is
    /// bumped and the lease kept so only the reaper or an unlock frees it.
    pub async fn claim_one(
        &self,
        network: &str,
        types: Option<&[QueueItemType]>,
    ) -> Result<Option<QueueItem>, ScraperError> {
        let Some(doc) = self.store.queue_claim_one(network, types, now_ts()).await? else {
            return Ok(None);
        };

        match QueueItem::from_document(doc.clone()) {
            Ok(item) => {
                metrics::increment_claims(network, item.item_type().as_str());
                Ok(Some(item))
            }
            Err(err @ ScraperError::UnknownQueueType(_)) => {
                let lease = doc.processing;
                let mut released = doc;
                released.processing = 0.0;
                self.store.queue_replace_leased(network, released, lease).await?;
                Err(err)
            }
            Err(err) => {
                warn!("⚠️ [Queue] {} parking undecodable item {}: {}", network, doc.id, err);
                let lease = doc.processing;
                let mut parked = doc;
                parked.count = parked.count.saturating_add(1);
                self.store.queue_replace_leased(network, parked, lease).await?;
                Err(err)
            }
        }
    }

    // release / complete / persist_with_count solo escriben si la fila sigue
    // con el lease de `item.processing`. Devuelven false si el lease se perdió
    // (reaper + otro worker) y no tocan la fila.

    /// Clears the lease so the item can be claimed again.
    pub async fn release(&self, network: &str, item: &QueueItem) -> Result<bool> {
        let mut doc = item.to_document();
        doc.processing = 0.0;
        let held = self.store.queue_replace_leased(network, doc, item.processing).await?;
        self.note_lost_lease(network, item, held);
        Ok(held)
    }

    /// Removes a finished item from the queue.
    pub async fn complete(&self, network: &str, item: &QueueItem) -> Result<bool> {
        let held = self
            .store
            .queue_delete_leased(network, &item.id, item.processing)
            .await?;
        self.note_lost_lease(network, item, held);
        Ok(held)
    }

    /// Writes the item back as-is, lease included.
    pub async fn persist_with_count(&self, network: &str, item: &QueueItem) -> Result<bool> {
        let held = self
            .store
            .queue_replace_leased(network, item.to_document(), item.processing)
            .await?;
        self.note_lost_lease(network, item, held);
        Ok(held)
    }

    fn note_lost_lease(&self, network: &str, item: &QueueItem, held: bool) {
        if !held {
            metrics::increment_lease_lost(network);
            warn!(
                "⚠️ [Queue] {} {} lease {:.3} lost, row left to its current owner",
                network, item.id, item.processing
            );
        }
    }

    /// Releases leases older than `lease_ttl` on items still under the
    /// auto-retry threshold. Parked items are left for `unlock`.
    pub async fn reap_expired(
        &self,
        network: &str,
        lease_ttl: Duration,
        soft_retry_limit: u32,
    ) -> Result<u64> {
        let claimed_before = now_ts() - lease_ttl.as_secs_f64();
        let released = self
            .store
            .queue_release_expired(network, claimed_before, soft_retry_limit)
            .await?;
        if released > 0 {
            metrics::increment_reaped(network, released);
            info!("♻️ [Queue] {} released {} expired leases", network, released);
        }
        Ok(released)
    }

    /// Claimed rows past `soft_retry_limit` failures, oldest first: parked
    /// items and the ones refused at the retry ceiling. Neither comes back
    /// without `unlock`.
    pub async fn stuck_items(
        &self,
        network: &str,
        soft_retry_limit: u32,
    ) -> Result<Vec<QueueDocument>> {
        let filter = QueueFilter {
            min_count: Some(soft_retry_limit.saturating_add(1)),
            claimed: Some(true),
            ..Default::default()
        };
        let stuck = self.store.queue_find(network, &filter).await?;
        metrics::set_stuck_items(network, stuck.len() as f64);
        Ok(stuck)
    }

    /// Manual repair: clears the lease and, if asked, the failure count.
    /// Returns false when no item has that id.
    pub async fn unlock(&self, network: &str, id: &str, reset_count: bool) -> Result<bool> {
        let filter = QueueFilter {
            id: Some(id.to_string()),
            ..Default::default()
        };
        let Some(mut doc) = self.store.queue_find(network, &filter).await?.into_iter().next() else {
            return Ok(false);
        };

        doc.processing = 0.0;
        if reset_count {
            doc.count = 0;
        }
        self.store.queue_replace(network, doc).await?;
        info!(
            "🔓 [Queue] {} unlocked {} (count reset: {})",
            network, id, reset_count
        );
        Ok(true)
    }
}
