//! Typed access to the record collections.
//!
//! Handlers and the dependency expander never touch JSON directly; they go
//! through these helpers, which pick the right collection and id builder.

use crate::database::{Collection, DocFilter, Store, WriteResult};
use crate::types::conversions::normalize_address;
use crate::types::ids;
use crate::types::{
    BlockRecord, HypervisorStatic, HypervisorStatus, OperationRecord, PriceRecord, RewardStatic,
    RewardStatus,
};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct RecordStore {
    store: Arc<dyn Store>,
}

impl RecordStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    async fn get<T: DeserializeOwned>(
        &self,
        network: &str,
        collection: Collection,
        id: &str,
    ) -> Result<Option<T>> {
        match self.store.find_one(network, collection, id).await? {
            Some(doc) => {
                let record = serde_json::from_value(doc).with_context(|| {
                    format!("malformed {} document {}", collection.as_str(), id)
                })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn exists(&self, network: &str, collection: Collection, id: &str) -> Result<bool> {
        Ok(self.store.find_one(network, collection, id).await?.is_some())
    }

    async fn put<T: Serialize>(
        &self,
        network: &str,
        collection: Collection,
        id: &str,
        record: &T,
    ) -> Result<WriteResult> {
        let doc = serde_json::to_value(record)?;
        self.store
            .upsert_many(network, collection, vec![(id.to_string(), doc)])
            .await
    }

    // --- reads ---

    pub async fn hypervisor_static(
        &self,
        network: &str,
        address: &str,
    ) -> Result<Option<HypervisorStatic>> {
        self.get(network, Collection::Static, &normalize_address(address))
            .await
    }

    /// Reward streams of `hypervisor` already active at `max_block`.
    pub async fn reward_statics_for(
        &self,
        network: &str,
        hypervisor: &str,
        max_block: u64,
    ) -> Result<Vec<RewardStatic>> {
        let filter = DocFilter::new()
            .eq("hypervisor_address", normalize_address(hypervisor))
            .lte("block", max_block);
        let docs = self
            .store
            .find_many(network, Collection::RewardsStatic, &filter)
            .await?;

        let mut statics = Vec::with_capacity(docs.len());
        for doc in docs {
            statics.push(serde_json::from_value::<RewardStatic>(doc)?);
        }
        statics.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(statics)
    }

    pub async fn hypervisor_status(
        &self,
        network: &str,
        address: &str,
        block: u64,
    ) -> Result<Option<HypervisorStatus>> {
        self.get(network, Collection::Status, &ids::hypervisor_status_id(address, block))
            .await
    }

    pub async fn has_hypervisor_status(&self, network: &str, address: &str, block: u64) -> Result<bool> {
        self.exists(network, Collection::Status, &ids::hypervisor_status_id(address, block))
            .await
    }

    pub async fn has_price(&self, network: &str, block: u64, token: &str) -> Result<bool> {
        self.exists(network, Collection::Prices, &ids::price_id(network, block, token))
            .await
    }

    pub async fn has_reward_status(&self, network: &str, reward_static: &RewardStatic, block: u64) -> Result<bool> {
        self.exists(network, Collection::RewardsStatus, &reward_static.status_id(block))
            .await
    }

    pub async fn block_timestamp(&self, network: &str, block: u64) -> Result<Option<u64>> {
        let record: Option<BlockRecord> = self
            .get(network, Collection::Blocks, &ids::block_id(network, block))
            .await?;
        Ok(record.map(|r| r.timestamp))
    }

    // --- writes ---

    pub async fn save_hypervisor_static(&self, record: &HypervisorStatic) -> Result<WriteResult> {
        self.put(&record.network, Collection::Static, &record.id, record)
            .await
    }

    pub async fn save_reward_static(&self, record: &RewardStatic) -> Result<WriteResult> {
        self.put(&record.network, Collection::RewardsStatic, &record.id, record)
            .await
    }

    pub async fn save_hypervisor_status(&self, record: &HypervisorStatus) -> Result<WriteResult> {
        self.put(&record.network, Collection::Status, &record.id, record)
            .await
    }

    /// Saves several reward statuses in one bulk write.
    pub async fn save_reward_statuses(&self, network: &str, records: &[RewardStatus]) -> Result<WriteResult> {
        if records.is_empty() {
            return Ok(WriteResult::default());
        }
        let mut docs = Vec::with_capacity(records.len());
        for record in records {
            docs.push((record.id.clone(), serde_json::to_value(record)?));
        }
        self.store
            .upsert_many(network, Collection::RewardsStatus, docs)
            .await
    }

    pub async fn save_price(&self, record: &PriceRecord) -> Result<WriteResult> {
        self.put(&record.network, Collection::Prices, &record.id, record)
            .await
    }

    pub async fn save_block(&self, record: &BlockRecord) -> Result<WriteResult> {
        self.put(&record.network, Collection::Blocks, &record.id, record)
            .await
    }

    pub async fn save_operation(&self, record: &OperationRecord) -> Result<WriteResult> {
        self.put(&record.network, Collection::Operations, &record.id, record)
            .await
    }
}
