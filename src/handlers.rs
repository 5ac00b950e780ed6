//! # Fetch-and-Persist Handlers
//!
//! One handler per queue item type. Each returns:
//!
//! - `Ok(true)`: the work is done (or there was nothing to do).
//! - `Ok(false)`: transient failure, the retry policy decides what happens.
//! - `Err(ScraperError)`: structural problem that needs an operator.

use crate::chain_reader::ChainReader;
use crate::dependency_expander::DependencyExpander;
use crate::errors::ScraperError;
use crate::price_oracle::PriceOracle;
use crate::queue_item::{QueueItem, RewardStatusTask};
use crate::record_store::RecordStore;
use crate::types::ids;
use crate::types::{BlockRecord, HypervisorStatic, OperationRecord, PriceRecord, RawOperation, RewardStatus};
use log::{debug, info, warn};
use std::sync::Arc;

/// Collaborators shared by every handler.
#[derive(Clone)]
pub struct Handlers {
    records: RecordStore,
    expander: DependencyExpander,
    chain: Arc<dyn ChainReader>,
    prices: Arc<dyn PriceOracle>,
}

impl Handlers {
    pub fn new(
        records: RecordStore,
        expander: DependencyExpander,
        chain: Arc<dyn ChainReader>,
        prices: Arc<dyn PriceOracle>,
    ) -> Self {
        Self {
            records,
            expander,
            chain,
            prices,
        }
    }

    /// Static config of a hypervisor; `Ok(None)` means the store itself failed.
    async fn require_static(
        &self,
        network: &str,
        address: &str,
    ) -> Result<Option<HypervisorStatic>, ScraperError> {
        match self.records.hypervisor_static(network, address).await {
            Ok(Some(hypervisor)) => Ok(Some(hypervisor)),
            Ok(None) => Err(ScraperError::MissingStatic {
                network: network.to_string(),
                address: address.to_string(),
            }),
            Err(e) => {
                warn!("⚠️ [Handlers] {} static lookup for {} failed: {:#}", network, address, e);
                Ok(None)
            }
        }
    }

    pub async fn hypervisor_status(&self, network: &str, item: &QueueItem) -> Result<bool, ScraperError> {
        let Some(hypervisor) = self.require_static(network, &item.address).await? else {
            return Ok(false);
        };

        let status = match self
            .chain
            .get_hypervisor_status(network, &hypervisor, item.block)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                warn!(
                    "⚠️ [Handlers] {} hypervisor status {} at {} unavailable: {:#}",
                    network, item.address, item.block, e
                );
                return Ok(false);
            }
        };

        let written = match self.records.save_hypervisor_status(&status).await {
            Ok(result) => result.took_effect(),
            Err(e) => {
                warn!("⚠️ [Handlers] {} saving status {} failed: {:#}", network, status.id, e);
                return Ok(false);
            }
        };
        if !written {
            return Ok(false);
        }

        if let Err(e) = self.expander.expand_status(network, &status).await {
            warn!("⚠️ [Handlers] {} expanding status {} failed: {:#}", network, status.id, e);
            return Ok(false);
        }
        Ok(true)
    }

    pub async fn reward_status(
        &self,
        network: &str,
        item: &QueueItem,
        task: &RewardStatusTask,
    ) -> Result<bool, ScraperError> {
        let reward_static = &task.reward_static;
        if item.block < reward_static.block {
            debug!(
                "[Handlers] {} reward {} starts at {}, nothing to do at {}",
                network, reward_static.id, reward_static.block, item.block
            );
            return Ok(true);
        }

        let computed = match self
            .chain
            .get_reward_status(network, &task.hypervisor_status, reward_static)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    "⚠️ [Handlers] {} reward status {} at {} unavailable: {:#}",
                    network, reward_static.id, item.block, e
                );
                return Ok(false);
            }
        };

        let paying: Vec<RewardStatus> = computed.into_iter().filter(RewardStatus::is_paying).collect();
        if paying.is_empty() {
            debug!(
                "[Handlers] {} reward {} pays nothing at {}",
                network, reward_static.id, item.block
            );
            return Ok(true);
        }

        match self.records.save_reward_statuses(network, &paying).await {
            Ok(result) => Ok(result.took_effect()),
            Err(e) => {
                warn!("⚠️ [Handlers] {} saving reward status failed: {:#}", network, e);
                Ok(false)
            }
        }
    }

    pub async fn price(&self, network: &str, item: &QueueItem) -> Result<bool, ScraperError> {
        let Some(quote) = self.prices.get_price(network, &item.address, item.block).await else {
            debug!(
                "[Handlers] {} no price for {} at {}",
                network, item.address, item.block
            );
            return Ok(false);
        };
        if quote.price <= 0.0 {
            return Ok(false);
        }

        let record = PriceRecord {
            id: ids::price_id(network, item.block, &item.address),
            network: network.to_string(),
            block: item.block,
            address: item.address.clone(),
            price: quote.price,
            source: quote.source,
        };
        match self.records.save_price(&record).await {
            Ok(result) => Ok(result.took_effect()),
            Err(e) => {
                warn!("⚠️ [Handlers] {} saving price {} failed: {:#}", network, record.id, e);
                Ok(false)
            }
        }
    }

    pub async fn block(&self, network: &str, item: &QueueItem) -> Result<bool, ScraperError> {
        let timestamp = match self.chain.get_block_timestamp(network, item.block).await {
            Ok(ts) => ts,
            Err(e) => {
                warn!(
                    "⚠️ [Handlers] {} timestamp of block {} unavailable: {:#}",
                    network, item.block, e
                );
                return Ok(false);
            }
        };

        match self
            .records
            .save_block(&BlockRecord::new(network, item.block, timestamp))
            .await
        {
            Ok(result) => Ok(result.took_effect()),
            Err(e) => {
                warn!("⚠️ [Handlers] {} saving block {} failed: {:#}", network, item.block, e);
                Ok(false)
            }
        }
    }

    pub async fn operation(
        &self,
        network: &str,
        raw: &RawOperation,
    ) -> Result<bool, ScraperError> {
        // Sin static no hay nada que guardar: error antes de tocar la chain
        let Some(hypervisor) = self.require_static(network, &raw.address).await? else {
            return Ok(false);
        };

        let timestamp = match self.operation_timestamp(network, raw).await {
            Some(ts) => ts,
            None => return Ok(false),
        };

        let mut stored_raw = raw.clone();
        stored_raw.timestamp = None;
        let record = OperationRecord {
            id: raw.operation_id(),
            network: network.to_string(),
            timestamp,
            decimals_token0: hypervisor.token0.decimals,
            decimals_token1: hypervisor.token1.decimals,
            decimals_contract: hypervisor.decimals,
            raw: stored_raw,
        };
        if let Err(e) = self.records.save_operation(&record).await {
            warn!("⚠️ [Handlers] {} saving operation {} failed: {:#}", network, record.id, e);
            return Ok(false);
        }

        let status_known = match self
            .records
            .has_hypervisor_status(network, &raw.address, raw.block_number)
            .await
        {
            Ok(known) => known,
            Err(e) => {
                warn!("⚠️ [Handlers] {} status lookup failed: {:#}", network, e);
                return Ok(false);
            }
        };
        if !status_known {
            let mut with_ts = raw.clone();
            with_ts.timestamp = Some(timestamp);
            if let Err(e) = self.expander.expand_operation(network, &with_ts).await {
                warn!("⚠️ [Handlers] {} expanding operation {} failed: {:#}", network, record.id, e);
                return Ok(false);
            }
        }

        info!(
            "✅ [Handlers] {} {} {} stored",
            network, raw.topic, record.id
        );
        Ok(true)
    }

    /// Decoder timestamp, then the global block record, then the chain.
    async fn operation_timestamp(&self, network: &str, raw: &RawOperation) -> Option<u64> {
        if let Some(ts) = raw.timestamp {
            return Some(ts);
        }
        match self.records.block_timestamp(network, raw.block_number).await {
            Ok(Some(ts)) => return Some(ts),
            Ok(None) => {}
            Err(e) => warn!("⚠️ [Handlers] {} block record lookup failed: {:#}", network, e),
        }
        match self.chain.get_block_timestamp(network, raw.block_number).await {
            Ok(ts) => Some(ts),
            Err(e) => {
                warn!(
                    "⚠️ [Handlers] {} timestamp of block {} unavailable: {:#}",
                    network, raw.block_number, e
                );
                None
            }
        }
    }
}
