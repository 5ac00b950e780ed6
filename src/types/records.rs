// Documentos persistidos por los handlers (formato de la base de datos)

use crate::types::conversions::{is_positive_amount, ConversionError};
use crate::types::ids;
use serde::{Deserialize, Serialize};

/// ERC20 metadata attached to hypervisors and reward streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: String,
    #[serde(default)]
    pub symbol: String,
    pub decimals: u8,
}

/// Immutable configuration of a hypervisor, written once when it is first seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypervisorStatic {
    /// Hypervisor address (lower-cased); doubles as the document id.
    pub id: String,
    pub address: String,
    pub network: String,
    pub dex: String,
    /// Creation block of the hypervisor contract.
    pub block: u64,
    pub pool_address: String,
    pub decimals: u8,
    pub token0: TokenInfo,
    pub token1: TokenInfo,
}

/// Underlying token amounts managed by a hypervisor at a given block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TotalAmounts {
    pub total0: String,
    pub total1: String,
}

/// Point-in-time snapshot of a hypervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypervisorStatus {
    pub id: String,
    pub network: String,
    pub dex: String,
    pub address: String,
    pub block: u64,
    pub timestamp: u64,
    #[serde(default)]
    pub symbol: String,
    pub decimals: u8,
    #[serde(rename = "totalSupply")]
    pub total_supply: String,
    #[serde(rename = "totalAmounts", default)]
    pub total_amounts: TotalAmounts,
    pub pool_address: String,
    pub token0: TokenInfo,
    pub token1: TokenInfo,
}

impl HypervisorStatus {
    /// A hypervisor without shares cannot carry a meaningful reward status.
    pub fn has_supply(&self) -> Result<bool, ConversionError> {
        is_positive_amount(&self.total_supply)
    }

    pub fn pool_tokens(&self) -> [&TokenInfo; 2] {
        [&self.token0, &self.token1]
    }
}

/// Static definition of a reward stream paying LPs of one hypervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardStatic {
    pub id: String,
    pub network: String,
    /// Block at which the reward stream became active for the hypervisor.
    pub block: u64,
    pub timestamp: u64,
    pub hypervisor_address: String,
    pub rewarder_address: String,
    pub rewarder_type: String,
    #[serde(rename = "rewarder_refIds", default)]
    pub rewarder_ref_ids: Vec<String>,
    #[serde(rename = "rewardToken")]
    pub reward_token: String,
    #[serde(rename = "rewardToken_symbol", default)]
    pub reward_token_symbol: String,
    #[serde(rename = "rewardToken_decimals")]
    pub reward_token_decimals: u8,
}

impl RewardStatic {
    pub fn status_id(&self, block: u64) -> String {
        ids::reward_status_id(
            &self.hypervisor_address,
            &self.rewarder_address,
            &self.reward_token,
            block,
        )
    }
}

/// Reward rate of one stream at a given block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardStatus {
    pub id: String,
    pub network: String,
    pub block: u64,
    pub timestamp: u64,
    pub hypervisor_address: String,
    pub rewarder_address: String,
    pub rewarder_type: String,
    #[serde(rename = "rewardToken")]
    pub reward_token: String,
    #[serde(rename = "rewardToken_symbol", default)]
    pub reward_token_symbol: String,
    #[serde(rename = "rewardToken_decimals")]
    pub reward_token_decimals: u8,
    #[serde(rename = "rewards_perSecond")]
    pub rewards_per_second: String,
    #[serde(rename = "total_hypervisorToken_qtty", default)]
    pub total_hypervisor_token_qtty: String,
}

impl RewardStatus {
    /// Streams paying nothing are not worth a document.
    pub fn is_paying(&self) -> bool {
        is_positive_amount(&self.rewards_per_second).unwrap_or(false)
    }
}

/// USD price of a token at a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub id: String,
    pub network: String,
    pub block: u64,
    pub address: String,
    pub price: f64,
    pub source: String,
}

/// Timestamp of a block, shared by all consumers of a network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub id: String,
    pub network: String,
    pub block: u64,
    pub timestamp: u64,
}

impl BlockRecord {
    pub fn new(network: &str, block: u64, timestamp: u64) -> Self {
        Self {
            id: ids::block_id(network, block),
            network: network.to_string(),
            block,
            timestamp,
        }
    }
}

/// Hypervisor event topics the operation feed decodes.
pub const OPERATION_TOPICS: [&str; 6] = [
    "deposit",
    "withdraw",
    "rebalance",
    "zeroBurn",
    "transfer",
    "approval",
];

/// A decoded hypervisor event log, as produced by the chain reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOperation {
    pub topic: String,
    pub address: String,
    #[serde(rename = "blockNumber")]
    pub block_number: u64,
    #[serde(rename = "logIndex")]
    pub log_index: u64,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    /// Block timestamp when the decoder already knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Topic-specific decoded fields (sender, shares, amounts, ticks...).
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl RawOperation {
    pub fn operation_id(&self) -> String {
        ids::operation_id(self.log_index, &self.transaction_hash)
    }
}

/// Operation document: the raw log plus timestamp and token decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub network: String,
    pub timestamp: u64,
    pub decimals_token0: u8,
    pub decimals_token1: u8,
    pub decimals_contract: u8,
    #[serde(flatten)]
    pub raw: RawOperation,
}
