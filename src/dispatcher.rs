//! # Queue Processor
//!
//! `claim → dispatch → completion policy` for one item. Workers call
//! [`QueueProcessor::claim_and_process`] in a loop; several workers (tasks or
//! processes) can share one queue.

use crate::errors::ScraperError;
use crate::handlers::Handlers;
use crate::metrics;
use crate::queue_item::{QueueItem, QueueItemType, QueueTask};
use crate::queue_store::QueueStore;
use crate::retry_policy::{RetryPolicy, Settled};
use log::warn;
use tracing::{info_span, Instrument};

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Nothing claimable.
    Empty,
    /// Over the retry ceiling: left claimed and untouched for an operator.
    Refused { id: String, count: u32 },
    Processed {
        id: String,
        item_type: QueueItemType,
        success: bool,
    },
    /// Handler ran, but the lease expired and another worker owns the row
    /// now; its state was left alone.
    LeaseLost { id: String, item_type: QueueItemType },
}

#[derive(Clone)]
pub struct QueueProcessor {
    queue: QueueStore,
    handlers: Handlers,
    policy: RetryPolicy,
    max_attempts: u32,
}

impl QueueProcessor {
    pub fn new(queue: QueueStore, handlers: Handlers, policy: RetryPolicy, max_attempts: u32) -> Self {
        Self {
            queue,
            handlers,
            policy,
            max_attempts,
        }
    }

    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    /// Claims one item (optionally of the given types) and processes it.
    pub async fn claim_and_process(
        &self,
        network: &str,
        types: Option<&[QueueItemType]>,
    ) -> Result<ProcessOutcome, ScraperError> {
        match self.queue.claim_one(network, types).await? {
            Some(item) => self.process_item(network, item).await,
            None => Ok(ProcessOutcome::Empty),
        }
    }

    /// Runs an already claimed item through its handler and the retry policy.
    pub async fn process_item(
        &self,
        network: &str,
        item: QueueItem,
    ) -> Result<ProcessOutcome, ScraperError> {
        if item.count > self.max_attempts {
            warn!(
                "⛔ [Queue] {} {} refused: {} failures exceed the ceiling of {}, needs manual unlock",
                network, item.id, item.count, self.max_attempts
            );
            metrics::increment_refused(network);
            return Ok(ProcessOutcome::Refused {
                id: item.id,
                count: item.count,
            });
        }

        let span = info_span!(
            "queue_item",
            network = network,
            id = %item.id,
            item_type = %item.item_type(),
            count = item.count
        );
        let outcome = self.dispatch(network, &item).instrument(span).await;
        let settled = self.policy.apply(&self.queue, network, &item, outcome).await?;

        let item_type = item.item_type();
        Ok(match settled {
            Settled::Done(success) => ProcessOutcome::Processed {
                id: item.id,
                item_type,
                success,
            },
            Settled::LeaseLost => ProcessOutcome::LeaseLost {
                id: item.id,
                item_type,
            },
        })
    }

    async fn dispatch(&self, network: &str, item: &QueueItem) -> Result<bool, ScraperError> {
        match &item.task {
            QueueTask::HypervisorStatus => self.handlers.hypervisor_status(network, item).await,
            QueueTask::RewardStatus(task) => self.handlers.reward_status(network, item, task).await,
            QueueTask::Price => self.handlers.price(network, item).await,
            QueueTask::Block => self.handlers.block(network, item).await,
            QueueTask::Operation(raw) => self.handlers.operation(network, raw).await,
        }
    }
}
