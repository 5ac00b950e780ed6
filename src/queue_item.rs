//! # Queue Item
//!
//! The unit of deferred work. A queue item names a block, a contract address
//! and a task kind; its id is derived from those so that enqueueing the same
//! work twice collapses into one stored row.
//!
//! `processing` is a lease: `0.0` means unclaimed, any other value is the
//! unix time (seconds) of the claim that owns the item. `creation` is set the
//! first time an identity is built and survives every later write. `count`
//! is the failure counter the retry policy escalates on.

use crate::errors::ScraperError;
use crate::types::conversions::normalize_address;
use crate::types::ids;
use crate::types::{HypervisorStatus, RawOperation, RewardStatic};
use crate::utils::now_ts;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of work kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemType {
    HypervisorStatus,
    RewardStatus,
    Price,
    Block,
    Operation,
}

impl QueueItemType {
    pub const ALL: [QueueItemType; 5] = [
        QueueItemType::HypervisorStatus,
        QueueItemType::RewardStatus,
        QueueItemType::Price,
        QueueItemType::Block,
        QueueItemType::Operation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemType::HypervisorStatus => "hypervisor_status",
            QueueItemType::RewardStatus => "reward_status",
            QueueItemType::Price => "price",
            QueueItemType::Block => "block",
            QueueItemType::Operation => "operation",
        }
    }
}

impl fmt::Display for QueueItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueItemType {
    type Err = ScraperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueItemType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| ScraperError::UnknownQueueType(s.to_string()))
    }
}

/// Payload of a reward status task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardStatusTask {
    pub reward_static: RewardStatic,
    pub hypervisor_status: HypervisorStatus,
}

/// What the item asks for, with the data each kind needs.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueTask {
    HypervisorStatus,
    RewardStatus(Box<RewardStatusTask>),
    Price,
    Block,
    Operation(Box<RawOperation>),
}

impl QueueTask {
    pub fn item_type(&self) -> QueueItemType {
        match self {
            QueueTask::HypervisorStatus => QueueItemType::HypervisorStatus,
            QueueTask::RewardStatus(_) => QueueItemType::RewardStatus,
            QueueTask::Price => QueueItemType::Price,
            QueueTask::Block => QueueItemType::Block,
            QueueTask::Operation(_) => QueueItemType::Operation,
        }
    }

    fn data(&self) -> serde_json::Value {
        match self {
            QueueTask::RewardStatus(task) => {
                serde_json::to_value(task.as_ref()).unwrap_or(serde_json::Value::Null)
            }
            QueueTask::Operation(raw) => {
                serde_json::to_value(raw.as_ref()).unwrap_or(serde_json::Value::Null)
            }
            _ => serde_json::Value::Object(Default::default()),
        }
    }

    fn disambiguators(&self) -> Vec<String> {
        match self {
            QueueTask::RewardStatus(task) => vec![
                task.reward_static.rewarder_address.clone(),
                task.reward_static.reward_token.clone(),
            ],
            QueueTask::Operation(raw) => {
                vec![raw.log_index.to_string(), raw.transaction_hash.clone()]
            }
            _ => Vec::new(),
        }
    }
}

/// Stored shape of a queue item (one row / document of the `queue` collection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDocument {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub block: u64,
    pub address: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub processing: f64,
    #[serde(default)]
    pub creation: f64,
    #[serde(default)]
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub id: String,
    pub block: u64,
    pub address: String,
    pub task: QueueTask,
    pub processing: f64,
    pub creation: f64,
    pub count: u32,
}

impl QueueItem {
    /// Builds an item from untyped parts, validating the type-specific payload.
    pub fn new(
        item_type: QueueItemType,
        block: u64,
        address: &str,
        data: serde_json::Value,
    ) -> Result<Self, ScraperError> {
        let task = parse_task(item_type, data)?;
        Ok(Self::from_task(task, block, address))
    }

    fn from_task(task: QueueTask, block: u64, address: &str) -> Self {
        let address = normalize_address(address);
        let id = Self::build_id(&task, block, &address);
        Self {
            id,
            block,
            address,
            task,
            processing: 0.0,
            creation: now_ts(),
            count: 0,
        }
    }

    pub fn hypervisor_status(block: u64, hypervisor: &str) -> Self {
        Self::from_task(QueueTask::HypervisorStatus, block, hypervisor)
    }

    pub fn price(block: u64, token: &str) -> Self {
        Self::from_task(QueueTask::Price, block, token)
    }

    pub fn block(block: u64, address: &str) -> Self {
        Self::from_task(QueueTask::Block, block, address)
    }

    pub fn reward_status(reward_static: RewardStatic, hypervisor_status: HypervisorStatus) -> Self {
        let block = hypervisor_status.block;
        let address = hypervisor_status.address.clone();
        Self::from_task(
            QueueTask::RewardStatus(Box::new(RewardStatusTask {
                reward_static,
                hypervisor_status,
            })),
            block,
            &address,
        )
    }

    pub fn operation(raw: RawOperation) -> Self {
        let block = raw.block_number;
        let address = raw.address.clone();
        Self::from_task(QueueTask::Operation(Box::new(raw)), block, &address)
    }

    /// Identity of a task at `(block, address)`.
    pub fn build_id(task: &QueueTask, block: u64, address: &str) -> String {
        let extra = task.disambiguators();
        let extra: Vec<&str> = extra.iter().map(String::as_str).collect();
        ids::queue_id(task.item_type().as_str(), block, address, &extra)
    }

    pub fn item_type(&self) -> QueueItemType {
        self.task.item_type()
    }

    pub fn is_claimed(&self) -> bool {
        self.processing != 0.0
    }

    /// Loads a stored row as-is (lease and counters untouched).
    pub fn from_document(doc: QueueDocument) -> Result<Self, ScraperError> {
        let item_type: QueueItemType = doc.item_type.parse()?;
        let task = parse_task(item_type, doc.data)?;
        Ok(Self {
            id: doc.id,
            block: doc.block,
            address: normalize_address(&doc.address),
            task,
            processing: doc.processing,
            creation: doc.creation,
            count: doc.count,
        })
    }

    /// Re-hydrates a stored row as a new attempt at the same unit of work.
    ///
    /// A row that already has a `creation` time keeps it and gets its
    /// `count` bumped by one; a row that was never created starts now.
    pub fn rehydrate(doc: QueueDocument) -> Result<Self, ScraperError> {
        let mut item = Self::from_document(doc)?;
        if item.creation != 0.0 {
            item.count = item.count.saturating_add(1);
        } else {
            item.creation = now_ts();
        }
        Ok(item)
    }

    pub fn to_document(&self) -> QueueDocument {
        QueueDocument {
            id: self.id.clone(),
            item_type: self.item_type().as_str().to_string(),
            block: self.block,
            address: self.address.clone(),
            data: self.task.data(),
            processing: self.processing,
            creation: self.creation,
            count: self.count,
        }
    }
}

fn parse_task(item_type: QueueItemType, data: serde_json::Value) -> Result<QueueTask, ScraperError> {
    match item_type {
        QueueItemType::HypervisorStatus => Ok(QueueTask::HypervisorStatus),
        QueueItemType::Price => Ok(QueueTask::Price),
        QueueItemType::Block => Ok(QueueTask::Block),
        QueueItemType::RewardStatus => {
            if data.get("reward_static").map_or(true, |v| v.is_null()) {
                return Err(ScraperError::invalid(item_type, "missing reward_static"));
            }
            if data.get("hypervisor_status").map_or(true, |v| v.is_null()) {
                return Err(ScraperError::invalid(item_type, "missing hypervisor_status"));
            }
            let task: RewardStatusTask = serde_json::from_value(data)
                .map_err(|e| ScraperError::invalid(item_type, e.to_string()))?;
            Ok(QueueTask::RewardStatus(Box::new(task)))
        }
        QueueItemType::Operation => {
            let raw: RawOperation = serde_json::from_value(data)
                .map_err(|e| ScraperError::invalid(item_type, e.to_string()))?;
            Ok(QueueTask::Operation(Box::new(raw)))
        }
    }
}
