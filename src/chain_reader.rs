//! # Chain Reader
//!
//! On-chain reads the handlers depend on, behind the [`ChainReader`] trait so
//! the queue engine can run against fakes in tests.
//!
//! [`RpcChainReader`] reads through one [`RpcPool`] per network. Status
//! snapshots use the private-first ranking (archive state at old blocks);
//! everything else prefers public endpoints.

use crate::contracts::{Hypervisor, Rewarder, HYPERVISOR_ABI};
use crate::rpc_pool::{RpcPool, RpcPreference};
use crate::types::conversions::{address_to_string, normalize_address, string_to_address};
use crate::types::ids;
use crate::types::{
    HypervisorStatic, HypervisorStatus, RawOperation, RewardStatic, RewardStatus, TotalAmounts,
    OPERATION_TOPICS,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::abi::{RawLog, Token};
use ethers::prelude::Middleware;
use ethers::types::{Address, BlockId, BlockNumber, Filter, Log, H256, I256};
use log::{debug, warn};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Full snapshot of a hypervisor at `block`.
    async fn get_hypervisor_status(
        &self,
        network: &str,
        hypervisor: &HypervisorStatic,
        block: u64,
    ) -> Result<HypervisorStatus>;

    async fn get_block_timestamp(&self, network: &str, block: u64) -> Result<u64>;

    /// Reward status records of one stream at the snapshot's block.
    async fn get_reward_status(
        &self,
        network: &str,
        hypervisor_status: &HypervisorStatus,
        reward_static: &RewardStatic,
    ) -> Result<Vec<RewardStatus>>;

    /// Decoded hypervisor events emitted by `addresses` in `[from, to]`.
    async fn get_operation_logs(
        &self,
        network: &str,
        addresses: &[String],
        from: u64,
        to: u64,
    ) -> Result<Vec<RawOperation>>;

    async fn latest_block(&self, network: &str) -> Result<u64>;
}

pub struct RpcChainReader {
    pools: HashMap<String, Arc<RpcPool>>,
}

fn at_block(block: u64) -> BlockId {
    BlockId::Number(BlockNumber::Number(block.into()))
}

impl RpcChainReader {
    pub fn new(pools: HashMap<String, Arc<RpcPool>>) -> Self {
        Self { pools }
    }

    fn pool(&self, network: &str) -> Result<&Arc<RpcPool>> {
        self.pools
            .get(network)
            .ok_or_else(|| anyhow!("no RPC pool configured for network {}", network))
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn get_hypervisor_status(
        &self,
        network: &str,
        hypervisor: &HypervisorStatic,
        block: u64,
    ) -> Result<HypervisorStatus> {
        let pool = self.pool(network)?;
        let address = string_to_address(&hypervisor.address)?;
        let at = at_block(block);

        // Sin cache: cada snapshot se lee fresco del nodo
        let (total_supply, (total0, total1), symbol) = pool
            .call(RpcPreference::PrivateFirst, "hypervisor_status", |provider| async move {
                let contract = Hypervisor::new(address, provider);
                let total_supply = contract.total_supply().block(at).call().await?;
                let amounts = contract.get_total_amounts().block(at).call().await?;
                let symbol = contract.symbol().block(at).call().await?;
                Ok::<_, anyhow::Error>((total_supply, amounts, symbol))
            })
            .await?;
        let timestamp = self.get_block_timestamp(network, block).await?;

        Ok(HypervisorStatus {
            id: ids::hypervisor_status_id(&hypervisor.address, block),
            network: network.to_string(),
            dex: hypervisor.dex.clone(),
            address: normalize_address(&hypervisor.address),
            block,
            timestamp,
            symbol,
            decimals: hypervisor.decimals,
            total_supply: total_supply.to_string(),
            total_amounts: TotalAmounts {
                total0: total0.to_string(),
                total1: total1.to_string(),
            },
            pool_address: normalize_address(&hypervisor.pool_address),
            token0: hypervisor.token0.clone(),
            token1: hypervisor.token1.clone(),
        })
    }

    async fn get_block_timestamp(&self, network: &str, block: u64) -> Result<u64> {
        let pool = self.pool(network)?;
        let timestamp = pool
            .call(RpcPreference::PublicFirst, "eth_getBlockByNumber", |provider| async move {
                let header = provider
                    .get_block(block)
                    .await?
                    .ok_or_else(|| anyhow!("block {} not found", block))?;
                Ok::<_, anyhow::Error>(header.timestamp.as_u64())
            })
            .await?;
        Ok(timestamp)
    }

    async fn get_reward_status(
        &self,
        network: &str,
        hypervisor_status: &HypervisorStatus,
        reward_static: &RewardStatic,
    ) -> Result<Vec<RewardStatus>> {
        let pool = self.pool(network)?;
        let rewarder = string_to_address(&reward_static.rewarder_address)?;
        let hypervisor = string_to_address(&hypervisor_status.address)?;
        let at = at_block(hypervisor_status.block);

        let (per_second, staked) = pool
            .call(RpcPreference::PublicFirst, "reward_status", |provider| async move {
                let per_second = Rewarder::new(rewarder, provider.clone())
                    .reward_per_second()
                    .block(at)
                    .call()
                    .await?;
                let staked = Hypervisor::new(hypervisor, provider)
                    .balance_of(rewarder)
                    .block(at)
                    .call()
                    .await?;
                Ok::<_, anyhow::Error>((per_second, staked))
            })
            .await?;

        Ok(vec![RewardStatus {
            id: reward_static.status_id(hypervisor_status.block),
            network: network.to_string(),
            block: hypervisor_status.block,
            timestamp: hypervisor_status.timestamp,
            hypervisor_address: normalize_address(&hypervisor_status.address),
            rewarder_address: normalize_address(&reward_static.rewarder_address),
            rewarder_type: reward_static.rewarder_type.clone(),
            reward_token: normalize_address(&reward_static.reward_token),
            reward_token_symbol: reward_static.reward_token_symbol.clone(),
            reward_token_decimals: reward_static.reward_token_decimals,
            rewards_per_second: per_second.to_string(),
            total_hypervisor_token_qtty: staked.to_string(),
        }])
    }

    async fn get_operation_logs(
        &self,
        network: &str,
        addresses: &[String],
        from: u64,
        to: u64,
    ) -> Result<Vec<RawOperation>> {
        if addresses.is_empty() || from > to {
            return Ok(vec![]);
        }
        let pool = self.pool(network)?;
        let mut targets: Vec<Address> = Vec::with_capacity(addresses.len());
        for address in addresses {
            targets.push(string_to_address(address)?);
        }
        let filter = Filter::new()
            .address(targets)
            .topic0(operation_signatures())
            .from_block(from)
            .to_block(to);

        let logs = pool
            .call(RpcPreference::PublicFirst, "eth_getLogs", |provider| {
                let filter = filter.clone();
                async move { Ok::<_, anyhow::Error>(provider.get_logs(&filter).await?) }
            })
            .await?;

        let mut operations = Vec::with_capacity(logs.len());
        for log in &logs {
            match decode_operation(log) {
                Some(op) => operations.push(op),
                None => debug!("[ChainReader] {} skipping undecodable log {:?}", network, log.transaction_hash),
            }
        }
        if operations.len() < logs.len() {
            warn!(
                "⚠️ [ChainReader] {} decoded {}/{} logs in [{}, {}]",
                network,
                operations.len(),
                logs.len(),
                from,
                to
            );
        }
        Ok(operations)
    }

    async fn latest_block(&self, network: &str) -> Result<u64> {
        let pool = self.pool(network)?;
        let block = pool
            .call(RpcPreference::PublicFirst, "eth_blockNumber", |provider| async move {
                Ok::<_, anyhow::Error>(provider.get_block_number().await?.as_u64())
            })
            .await?;
        Ok(block)
    }
}

/// topic0 of every hypervisor event the feed turns into an operation.
pub fn operation_signatures() -> Vec<H256> {
    HYPERVISOR_ABI
        .events()
        .filter(|e| OPERATION_TOPICS.contains(&lower_first(&e.name).as_str()))
        .map(|e| e.signature())
        .collect()
}

/// Decodes a hypervisor log against the contract ABI.
/// Events outside `OPERATION_TOPICS` yield `None`.
///
/// The topic is the event name with a lower-case first letter (`Deposit` ->
/// `deposit`, `ZeroBurn` -> `zeroBurn`); parameters keep their ABI names.
pub fn decode_operation(log: &Log) -> Option<RawOperation> {
    let signature = *log.topics.first()?;
    let event = HYPERVISOR_ABI.events().find(|e| e.signature() == signature)?;
    let topic = lower_first(&event.name);
    if !OPERATION_TOPICS.contains(&topic.as_str()) {
        return None;
    }
    let parsed = event
        .parse_log(RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        })
        .ok()?;

    let mut fields = Map::new();
    for param in parsed.params {
        fields.insert(param.name, token_to_json(param.value));
    }

    Some(RawOperation {
        topic,
        address: address_to_string(log.address),
        block_number: log.block_number?.as_u64(),
        log_index: log.log_index?.as_u64(),
        transaction_hash: format!("{:?}", log.transaction_hash?),
        timestamp: None,
        fields,
    })
}

fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

// Enteros como string decimal: superan el rango de f64/JSON
fn token_to_json(token: Token) -> Value {
    match token {
        Token::Address(a) => Value::String(address_to_string(a)),
        Token::Uint(v) => Value::String(v.to_string()),
        Token::Int(v) => Value::String(I256::from_raw(v).to_string()),
        Token::Bool(b) => Value::Bool(b),
        Token::String(s) => Value::String(s),
        other => Value::String(other.to_string()),
    }
}
