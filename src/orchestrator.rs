//! # Orchestrator
//!
//! Runs the queue engine for one network:
//!
//! 1. **Workers**: `settings.queue.workers` tasks pulling
//!    `claim_and_process` in a loop, sleeping when the queue is empty.
//! 2. **Reaper**: releases expired leases and reports stuck items.
//! 3. **Operation feed**: scans hypervisor event logs in block chunks and
//!    enqueues each event as an OPERATION item.
//!
//! Everything stops when the shutdown channel flips to `true`. An unknown
//! stored work type stops the whole engine with an error.

use crate::chain_reader::{ChainReader, RpcChainReader};
use crate::database::Store;
use crate::dependency_expander::DependencyExpander;
use crate::dispatcher::{ProcessOutcome, QueueProcessor};
use crate::errors::ScraperError;
use crate::handlers::Handlers;
use crate::price_oracle::{PriceOracle, PriceOracleChain};
use crate::queue_item::{QueueItem, QueueItemType};
use crate::queue_store::QueueStore;
use crate::record_store::RecordStore;
use crate::retry_policy::RetryPolicy;
use crate::rpc_pool::RpcPool;
use crate::settings::Settings;
use crate::utils::create_block_chunks;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub struct Orchestrator {
    network: String,
    settings: Settings,
    processor: QueueProcessor,
    queue: QueueStore,
    chain: Arc<dyn ChainReader>,
}

impl Orchestrator {
    /// Wires the engine around explicit collaborators.
    pub fn new(
        network: &str,
        settings: Settings,
        store: Arc<dyn Store>,
        chain: Arc<dyn ChainReader>,
        prices: Arc<dyn PriceOracle>,
    ) -> Self {
        let records = RecordStore::new(store.clone());
        let queue = QueueStore::new(store);
        let expander = DependencyExpander::new(records.clone(), queue.clone());
        let handlers = Handlers::new(records, expander, chain.clone(), prices);
        let processor = QueueProcessor::new(
            queue.clone(),
            handlers,
            RetryPolicy::new(settings.queue.soft_retry_limit),
            settings.queue.max_attempts,
        );

        Self {
            network: network.to_string(),
            settings,
            processor,
            queue,
            chain,
        }
    }

    /// Builds RPC pools, chain reader and price oracle from `settings`.
    pub fn from_settings(network: &str, settings: Settings, store: Arc<dyn Store>) -> Result<Self> {
        let network_settings = settings
            .network(network)
            .ok_or_else(|| anyhow!("network '{}' is not configured", network))?;

        let mut pools: HashMap<String, Arc<RpcPool>> = HashMap::new();
        pools.insert(
            network.to_string(),
            Arc::new(RpcPool::new(network, &network_settings.rpc, &settings.rpc)?),
        );

        let chain: Arc<dyn ChainReader> = Arc::new(RpcChainReader::new(pools.clone()));
        let prices: Arc<dyn PriceOracle> = Arc::new(PriceOracleChain::from_settings(&settings, &pools));
        Ok(Self::new(network, settings, store, chain, prices))
    }

    pub fn processor(&self) -> &QueueProcessor {
        &self.processor
    }

    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    /// Runs workers, reaper and operation feed until shutdown.
    pub async fn run(
        &self,
        types: Option<Vec<QueueItemType>>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        for worker_id in 0..self.settings.queue.workers {
            tasks.spawn(worker_loop(
                worker_id,
                self.network.clone(),
                self.processor.clone(),
                types.clone(),
                Duration::from_millis(self.settings.queue.poll_interval_ms),
                shutdown.clone(),
            ));
        }

        tasks.spawn(reaper_loop(
            self.network.clone(),
            self.queue.clone(),
            self.settings.clone(),
            shutdown.clone(),
        ));

        let hypervisors = self
            .settings
            .network(&self.network)
            .map(|n| n.hypervisors.clone())
            .unwrap_or_default();
        if self.settings.operation_feed.enabled && !hypervisors.is_empty() {
            tasks.spawn(operation_feed_loop(
                self.network.clone(),
                hypervisors,
                self.chain.clone(),
                self.queue.clone(),
                self.settings.clone(),
                shutdown.clone(),
            ));
        }

        info!(
            "🚀 [Orchestrator] {} running {} workers",
            self.network, self.settings.queue.workers
        );

        let mut first_error: Option<anyhow::Error> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => Err(anyhow!("engine task panicked: {}", e)),
            };
            if let Err(e) = result {
                error!("❌ [Orchestrator] {} stopping: {:#}", self.network, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
                tasks.abort_all();
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("🛑 [Orchestrator] {} stopped", self.network);
                Ok(())
            }
        }
    }

    /// Processes items until the queue has nothing claimable. Returns how
    /// many items went through a handler.
    pub async fn drain(&self, types: Option<&[QueueItemType]>) -> Result<usize, ScraperError> {
        let mut processed = 0;
        loop {
            match self.processor.claim_and_process(&self.network, types).await? {
                ProcessOutcome::Empty => return Ok(processed),
                ProcessOutcome::Refused { .. } => {}
                ProcessOutcome::Processed { .. } | ProcessOutcome::LeaseLost { .. } => {
                    processed += 1
                }
            }
        }
    }
}

/// Sleeps for `period` unless shutdown is requested first. Returns true on shutdown.
async fn sleep_or_shutdown(period: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(period) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

async fn worker_loop(
    worker_id: usize,
    network: String,
    processor: QueueProcessor,
    types: Option<Vec<QueueItemType>>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    debug!("[Worker {}] {} started", worker_id, network);
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        match processor.claim_and_process(&network, types.as_deref()).await {
            Ok(ProcessOutcome::Empty) => {
                if sleep_or_shutdown(poll_interval, &mut shutdown).await {
                    return Ok(());
                }
            }
            Ok(_) => {}
            Err(e @ ScraperError::UnknownQueueType(_)) => {
                return Err(anyhow!(e));
            }
            Err(e) => {
                error!("❌ [Worker {}] {}: {}", worker_id, network, e);
                if sleep_or_shutdown(poll_interval, &mut shutdown).await {
                    return Ok(());
                }
            }
        }
    }
}

async fn reaper_loop(
    network: String,
    queue: QueueStore,
    settings: Settings,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let lease_ttl = Duration::from_secs(settings.queue.lease_ttl_seconds);
    let period = Duration::from_secs(settings.queue.reaper_interval_seconds.max(1));
    loop {
        if let Err(e) = queue
            .reap_expired(&network, lease_ttl, settings.queue.soft_retry_limit)
            .await
        {
            warn!("⚠️ [Reaper] {} lease reaping failed: {:#}", network, e);
        }
        match queue
            .stuck_items(&network, settings.queue.soft_retry_limit)
            .await
        {
            Ok(stuck) if !stuck.is_empty() => warn!(
                "⛔ [Reaper] {} has {} parked or refused items awaiting unlock",
                network,
                stuck.len()
            ),
            Ok(_) => {}
            Err(e) => warn!("⚠️ [Reaper] {} stuck item query failed: {:#}", network, e),
        }

        if sleep_or_shutdown(period, &mut shutdown).await {
            return Ok(());
        }
    }
}

async fn operation_feed_loop(
    network: String,
    hypervisors: Vec<String>,
    chain: Arc<dyn ChainReader>,
    queue: QueueStore,
    settings: Settings,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let feed = settings.operation_feed;
    let period = Duration::from_secs(feed.interval_seconds.max(1));
    let mut next_block: Option<u64> = (feed.start_block > 0).then_some(feed.start_block);

    loop {
        match chain.latest_block(&network).await {
            Ok(head) => {
                let from = *next_block.get_or_insert(head);
                for (start, end) in create_block_chunks(from, head, feed.chunk_size) {
                    match chain
                        .get_operation_logs(&network, &hypervisors, start, end)
                        .await
                    {
                        Ok(operations) => {
                            let items: Vec<QueueItem> =
                                operations.into_iter().map(QueueItem::operation).collect();
                            if !items.is_empty() {
                                info!(
                                    "📡 [OperationFeed] {} blocks {}-{}: {} operations",
                                    network,
                                    start,
                                    end,
                                    items.len()
                                );
                                if let Err(e) = queue.enqueue(&network, items).await {
                                    warn!("⚠️ [OperationFeed] {} enqueue failed: {:#}", network, e);
                                    break;
                                }
                            }
                            next_block = Some(end + 1);
                        }
                        Err(e) => {
                            warn!(
                                "⚠️ [OperationFeed] {} logs {}-{} failed: {:#}",
                                network, start, end, e
                            );
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!("⚠️ [OperationFeed] {} head lookup failed: {:#}", network, e),
        }

        if sleep_or_shutdown(period, &mut shutdown).await {
            return Ok(());
        }
    }
}
