//! # Dependency Expander
//!
//! Fans persisted records back out into queue work.
//!
//! - A hypervisor status implies prices for both pool tokens and, when the
//!   hypervisor has supply, one reward status (plus a reward token price) per
//!   reward stream already active at that block.
//! - An operation implies hypervisor statuses around its block.
//!
//! Only work whose target record is still missing is enqueued; the queue
//! upsert collapses anything two expanders compute at the same time.

use crate::queue_item::QueueItem;
use crate::queue_store::QueueStore;
use crate::record_store::RecordStore;
use crate::types::{BlockRecord, HypervisorStatus, RawOperation};
use anyhow::Result;
use log::{debug, info, warn};
use std::collections::HashSet;

/// Operation topics that change hypervisor state.
pub const EXPANDABLE_TOPICS: [&str; 5] = ["deposit", "withdraw", "rebalance", "zeroBurn", "transfer"];

pub fn is_expandable_topic(topic: &str) -> bool {
    EXPANDABLE_TOPICS.contains(&topic)
}

/// Blocks whose hypervisor state an operation touches.
///
/// Value-moving topics need the state before and after the operation;
/// transfers only move shares, so the operation block is enough.
pub fn operation_blocks(topic: &str, block: u64) -> Vec<u64> {
    if topic == "transfer" || block == 0 {
        vec![block]
    } else {
        vec![block, block - 1]
    }
}

#[derive(Clone)]
pub struct DependencyExpander {
    records: RecordStore,
    queue: QueueStore,
}

impl DependencyExpander {
    pub fn new(records: RecordStore, queue: QueueStore) -> Self {
        Self { records, queue }
    }

    /// Work implied by a status snapshot, without enqueueing it.
    pub async fn plan_status(&self, network: &str, status: &HypervisorStatus) -> Result<Vec<QueueItem>> {
        let mut items = Vec::new();
        let mut planned_prices: HashSet<String> = HashSet::new();

        for token in status.pool_tokens() {
            if planned_prices.insert(token.address.to_lowercase())
                && !self.records.has_price(network, status.block, &token.address).await?
            {
                items.push(QueueItem::price(status.block, &token.address));
            }
        }

        let has_supply = match status.has_supply() {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "⚠️ [Expander] {} {} unreadable totalSupply '{}': {}",
                    network, status.id, status.total_supply, e
                );
                false
            }
        };
        if !has_supply {
            debug!(
                "[Expander] {} {} has zero supply at block {}, skipping rewards",
                network, status.address, status.block
            );
            return Ok(items);
        }

        let reward_statics = self
            .records
            .reward_statics_for(network, &status.address, status.block)
            .await?;
        for reward_static in reward_statics {
            // El filtro del store ya lo garantiza; se repite por si el store es laxo
            if reward_static.block > status.block {
                continue;
            }
            if !self
                .records
                .has_reward_status(network, &reward_static, status.block)
                .await?
            {
                let token = reward_static.reward_token.clone();
                items.push(QueueItem::reward_status(reward_static, status.clone()));

                if planned_prices.insert(token.to_lowercase())
                    && !self.records.has_price(network, status.block, &token).await?
                {
                    items.push(QueueItem::price(status.block, &token));
                }
            }
        }

        Ok(items)
    }

    /// Enqueues the work implied by a status snapshot. Returns the number of
    /// items handed to the queue.
    pub async fn expand_status(&self, network: &str, status: &HypervisorStatus) -> Result<usize> {
        let items = self.plan_status(network, status).await?;
        let count = items.len();
        if count > 0 {
            self.queue.enqueue(network, items).await?;
            debug!(
                "[Expander] {} status {} -> {} queue items",
                network, status.id, count
            );
        }
        Ok(count)
    }

    /// Expands a persisted operation. `approval` and other non-state topics
    /// produce nothing.
    pub async fn expand_operation(&self, network: &str, operation: &RawOperation) -> Result<usize> {
        if !is_expandable_topic(&operation.topic) {
            debug!(
                "[Expander] {} ignoring {} operation {}",
                network,
                operation.topic,
                operation.operation_id()
            );
            return Ok(0);
        }

        let mut items = Vec::new();
        let mut expanded = 0;
        for block in operation_blocks(&operation.topic, operation.block_number) {
            match self
                .records
                .hypervisor_status(network, &operation.address, block)
                .await?
            {
                Some(status) => {
                    expanded += self.expand_status(network, &status).await?;
                }
                None => {
                    items.push(QueueItem::hypervisor_status(block, &operation.address));
                    match operation.timestamp {
                        Some(ts) if block == operation.block_number => {
                            self.records
                                .save_block(&BlockRecord::new(network, block, ts))
                                .await?;
                        }
                        _ => items.push(QueueItem::block(block, &operation.address)),
                    }
                }
            }
        }

        let count = items.len();
        if count > 0 {
            self.queue.enqueue(network, items).await?;
            info!(
                "📥 [Expander] {} {} at block {} -> {} queue items",
                network, operation.topic, operation.block_number, count
            );
        }
        Ok(count + expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_blocks() {
        assert_eq!(operation_blocks("deposit", 1000), vec![1000, 999]);
        assert_eq!(operation_blocks("zeroBurn", 1000), vec![1000, 999]);
        assert_eq!(operation_blocks("transfer", 1000), vec![1000]);
    }

    #[test]
    fn test_approval_is_not_expandable() {
        assert!(!is_expandable_topic("approval"));
        assert!(is_expandable_topic("rebalance"));
    }
}
