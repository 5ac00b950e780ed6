//! # Price Oracle
//!
//! USD prices for tokens at a block, tried across sources in configured order.
//!
//! A missing price is an expected outcome (`None`), not an error: the PRICE
//! handler turns it into a soft failure and the queue retries later.
//!
//! ## Sources
//!
//! - **fixed**: configured per-network prices (stablecoins, pegged tokens).
//! - **chainlink**: `latestRoundData()` of the token's aggregator, read at the
//!   requested block through the network's RPC pool.

use crate::contracts::AggregatorV3Interface;
use crate::rpc_pool::{RpcPool, RpcPreference};
use crate::settings::Settings;
use crate::types::conversions::{normalize_address, string_to_address};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{Address, BlockId, BlockNumber, I256};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSourceKind {
    Fixed,
    Chainlink,
}

impl PriceSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSourceKind::Fixed => "fixed",
            PriceSourceKind::Chainlink => "chainlink",
        }
    }
}

impl fmt::Display for PriceSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A price and the source that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub price: f64,
    pub source: String,
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_price(&self, network: &str, token: &str, block: u64) -> Option<PriceQuote>;
}

/// One backend of the oracle chain.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn kind(&self) -> PriceSourceKind;

    /// `Ok(None)` when this source does not know the token.
    async fn fetch(&self, network: &str, token: &str, block: u64) -> Result<Option<f64>>;
}

/// Configured prices, independent of the block.
pub struct FixedPriceSource {
    prices: HashMap<String, HashMap<String, f64>>,
}

impl FixedPriceSource {
    pub fn new(prices: HashMap<String, HashMap<String, f64>>) -> Self {
        let prices = prices
            .into_iter()
            .map(|(network, tokens)| {
                let tokens = tokens
                    .into_iter()
                    .map(|(token, price)| (normalize_address(&token), price))
                    .collect();
                (network, tokens)
            })
            .collect();
        Self { prices }
    }
}

#[async_trait]
impl PriceSource for FixedPriceSource {
    fn kind(&self) -> PriceSourceKind {
        PriceSourceKind::Fixed
    }

    async fn fetch(&self, network: &str, token: &str, _block: u64) -> Result<Option<f64>> {
        Ok(self
            .prices
            .get(network)
            .and_then(|tokens| tokens.get(&normalize_address(token)))
            .copied())
    }
}

/// Chainlink aggregators read at the requested block.
pub struct ChainlinkPriceSource {
    pools: HashMap<String, Arc<RpcPool>>,
    oracles: HashMap<String, HashMap<String, Address>>,
    // Los decimals del oracle no cambian: cache en memoria
    decimals_cache: DashMap<Address, u8>,
}

impl ChainlinkPriceSource {
    pub fn new(
        pools: HashMap<String, Arc<RpcPool>>,
        oracles: HashMap<String, HashMap<String, String>>,
    ) -> Self {
        let mut parsed: HashMap<String, HashMap<String, Address>> = HashMap::new();
        for (network, tokens) in oracles {
            let entry = parsed.entry(network.clone()).or_default();
            for (token, oracle) in tokens {
                match string_to_address(&oracle) {
                    Ok(addr) => {
                        entry.insert(normalize_address(&token), addr);
                    }
                    Err(e) => warn!(
                        "⚠️ [PriceOracle] ignoring chainlink oracle {} for {} on {}: {}",
                        oracle, token, network, e
                    ),
                }
            }
        }
        Self {
            pools,
            oracles: parsed,
            decimals_cache: DashMap::new(),
        }
    }

    async fn oracle_decimals(&self, pool: &RpcPool, oracle: Address) -> Result<u8> {
        if let Some(decimals) = self.decimals_cache.get(&oracle) {
            return Ok(*decimals);
        }
        let decimals = pool
            .call(RpcPreference::PublicFirst, "decimals", |provider| async move {
                Ok::<_, anyhow::Error>(AggregatorV3Interface::new(oracle, provider).decimals().call().await?)
            })
            .await?;
        // Feeds típicamente 8 o 18
        let decimals = if decimals <= 36 { decimals } else { 8 };
        self.decimals_cache.insert(oracle, decimals);
        Ok(decimals)
    }
}

#[async_trait]
impl PriceSource for ChainlinkPriceSource {
    fn kind(&self) -> PriceSourceKind {
        PriceSourceKind::Chainlink
    }

    async fn fetch(&self, network: &str, token: &str, block: u64) -> Result<Option<f64>> {
        let Some(oracle) = self
            .oracles
            .get(network)
            .and_then(|tokens| tokens.get(&normalize_address(token)))
            .copied()
        else {
            return Ok(None);
        };
        let Some(pool) = self.pools.get(network) else {
            return Ok(None);
        };

        let decimals = self.oracle_decimals(pool, oracle).await?;
        let at = BlockId::Number(BlockNumber::Number(block.into()));
        let (_, answer, _, _, _) = pool
            .call(RpcPreference::PublicFirst, "latestRoundData", |provider| async move {
                Ok::<_, anyhow::Error>(AggregatorV3Interface::new(oracle, provider)
                    .latest_round_data()
                    .block(at)
                    .call()
                    .await?)
            })
            .await?;

        Ok(scale_answer(answer, decimals))
    }
}

fn scale_answer(answer: I256, decimals: u8) -> Option<f64> {
    if answer <= I256::zero() {
        return None;
    }
    let raw: f64 = answer.to_string().parse().ok()?;
    Some(raw / 10f64.powi(decimals as i32))
}

/// Tries each source in order; the first positive price wins.
pub struct PriceOracleChain {
    sources: Vec<Arc<dyn PriceSource>>,
}

impl PriceOracleChain {
    pub fn new(sources: Vec<Arc<dyn PriceSource>>) -> Self {
        Self { sources }
    }

    /// Builds the chain described by `[price_feeds]` and the per-network tables.
    pub fn from_settings(settings: &Settings, pools: &HashMap<String, Arc<RpcPool>>) -> Self {
        let mut sources: Vec<Arc<dyn PriceSource>> = Vec::new();
        for kind in &settings.price_feeds.source_order {
            let source: Arc<dyn PriceSource> = match kind {
                PriceSourceKind::Fixed => Arc::new(FixedPriceSource::new(
                    settings
                        .networks
                        .iter()
                        .map(|(name, n)| (name.clone(), n.fixed_prices.clone()))
                        .collect(),
                )),
                PriceSourceKind::Chainlink => Arc::new(ChainlinkPriceSource::new(
                    pools.clone(),
                    settings
                        .networks
                        .iter()
                        .map(|(name, n)| (name.clone(), n.chainlink_oracles.clone()))
                        .collect(),
                )),
            };
            sources.push(source);
        }
        Self::new(sources)
    }
}

#[async_trait]
impl PriceOracle for PriceOracleChain {
    async fn get_price(&self, network: &str, token: &str, block: u64) -> Option<PriceQuote> {
        for source in &self.sources {
            match source.fetch(network, token, block).await {
                Ok(Some(price)) if price > 0.0 && price.is_finite() => {
                    return Some(PriceQuote {
                        price,
                        source: source.kind().as_str().to_string(),
                    });
                }
                Ok(_) => {}
                Err(e) => debug!(
                    "[PriceOracle] {} failed for {} at {} on {}: {:#}",
                    source.kind(),
                    token,
                    block,
                    network,
                    e
                ),
            }
        }
        None
    }
}
