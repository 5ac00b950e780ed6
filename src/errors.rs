// src/errors.rs

//! Structural error taxonomy.
//!
//! Transient failures (rate limits, missing historical state, empty price
//! lookups) never surface as errors: handlers turn them into a `false` outcome
//! and the retry policy takes over. The variants here are the conditions that
//! must reach the operator.

use crate::queue_item::QueueItemType;

#[derive(Debug, thiserror::Error)]
pub enum ScraperError {
    /// No static configuration stored for a hypervisor address.
    #[error("no static hypervisor found for {address} on {network}")]
    MissingStatic { network: String, address: String },

    /// A queue payload is missing a required sub-field or cannot be decoded.
    #[error("invalid {item_type} queue item: {reason}")]
    InvalidQueueItem {
        item_type: QueueItemType,
        reason: String,
    },

    /// The stored queue row carries a type this build does not know.
    #[error("unknown queue item type '{0}' (code and queue schema are out of sync)")]
    UnknownQueueType(String),

    /// Store-level failure during the completion bookkeeping.
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl ScraperError {
    pub fn invalid(item_type: QueueItemType, reason: impl Into<String>) -> Self {
        Self::InvalidQueueItem {
            item_type,
            reason: reason.into(),
        }
    }
}
