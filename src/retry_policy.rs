//! Completion/retry policy applied to every claimed item once its handler
//! returns.
//!
//! | outcome      | count (at claim)   | action                                   |
//! |--------------|--------------------|------------------------------------------|
//! | `Ok(true)`   | any                | delete                                   |
//! | `Ok(false)`  | `< soft_limit`     | count + 1, release                       |
//! | `Ok(false)`  | `>= soft_limit`    | count + 1, persist with the lease kept   |
//! | `Err(_)`     | any                | count + 1, release, re-raise             |
//!
//! Nothing is written once the claim lease is no longer the row's lease.

use crate::errors::ScraperError;
use crate::metrics;
use crate::queue_item::QueueItem;
use crate::queue_store::QueueStore;
use crate::utils::now_ts;
use log::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Complete,
    Release,
    /// Written back with its lease; only the reaper (below the soft limit)
    /// or a manual unlock frees it.
    Park,
    ReleaseAndRaise,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Complete => "complete",
            Decision::Release => "release",
            Decision::Park => "park",
            Decision::ReleaseAndRaise => "error",
        }
    }
}

/// What [`RetryPolicy::apply`] did with the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// Decision written; carries the handler result.
    Done(bool),
    /// The row was reclaimed by someone else after our lease expired.
    LeaseLost,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub soft_retry_limit: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { soft_retry_limit: 5 }
    }
}

impl RetryPolicy {
    pub fn new(soft_retry_limit: u32) -> Self {
        Self { soft_retry_limit }
    }

    pub fn decide(&self, outcome: &Result<bool, ScraperError>, count: u32) -> Decision {
        match outcome {
            Ok(true) => Decision::Complete,
            Ok(false) if count < self.soft_retry_limit => Decision::Release,
            Ok(false) => Decision::Park,
            Err(_) => Decision::ReleaseAndRaise,
        }
    }

    /// Applies the decision to the queue and hands back the handler outcome
    /// (errors are re-raised after the lease is cleared). Every write is
    /// conditional on the claim lease; when it moved on, nothing is written
    /// and [`Settled::LeaseLost`] comes back.
    pub async fn apply(
        &self,
        queue: &QueueStore,
        network: &str,
        item: &QueueItem,
        outcome: Result<bool, ScraperError>,
    ) -> Result<Settled, ScraperError> {
        let decision = self.decide(&outcome, item.count);
        metrics::increment_outcome(network, item.item_type().as_str(), decision.as_str());

        let held = match decision {
            Decision::Complete => {
                let held = queue.complete(network, item).await?;
                if held {
                    let now = now_ts();
                    let processing_secs = (now - item.processing).max(0.0);
                    let lifetime_secs = (now - item.creation).max(0.0);
                    metrics::record_completion(item.item_type().as_str(), processing_secs, lifetime_secs);
                    info!(
                        "✅ [Queue] {} {} done in {:.2}s (lifetime {:.1}s, attempts {})",
                        network,
                        item.id,
                        processing_secs,
                        lifetime_secs,
                        item.count + 1
                    );
                }
                held
            }
            Decision::Release => {
                let retried = QueueItem::rehydrate(item.to_document())?;
                let held = queue.release(network, &retried).await?;
                if held {
                    info!(
                        "🔁 [Queue] {} {} failed, released for retry (count {})",
                        network, item.id, retried.count
                    );
                }
                held
            }
            Decision::Park => {
                let retried = QueueItem::rehydrate(item.to_document())?;
                let held = queue.persist_with_count(network, &retried).await?;
                if held {
                    warn!(
                        "⛔ [Queue] {} {} failed {} times, parked until unlocked",
                        network, item.id, retried.count
                    );
                }
                held
            }
            Decision::ReleaseAndRaise => {
                let retried = QueueItem::rehydrate(item.to_document())?;
                match queue.release(network, &retried).await {
                    Ok(held) => held,
                    Err(e) => {
                        error!("❌ [Queue] {} could not release {} after error: {:#}", network, item.id, e);
                        true
                    }
                }
            }
        };

        let success = outcome?;
        Ok(if held { Settled::Done(success) } else { Settled::LeaseLost })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(&Ok(true), 0), Decision::Complete);
        assert_eq!(policy.decide(&Ok(true), 9), Decision::Complete);
        assert_eq!(policy.decide(&Ok(false), 3), Decision::Release);
        assert_eq!(policy.decide(&Ok(false), 4), Decision::Release);
        assert_eq!(policy.decide(&Ok(false), 5), Decision::Park);
        assert_eq!(policy.decide(&Ok(false), 7), Decision::Park);
        let err = Err(ScraperError::UnknownQueueType("x".to_string()));
        assert_eq!(policy.decide(&err, 0), Decision::ReleaseAndRaise);
    }
}
