//! End-to-end behaviour of the queue engine against the in-memory store and
//! fake chain/price collaborators.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use hypervisor_queue::chain_reader::ChainReader;
use hypervisor_queue::database::{Collection, Store};
use hypervisor_queue::dependency_expander::DependencyExpander;
use hypervisor_queue::dispatcher::{ProcessOutcome, QueueProcessor};
use hypervisor_queue::errors::ScraperError;
use hypervisor_queue::handlers::Handlers;
use hypervisor_queue::memory_store::MemoryStore;
use hypervisor_queue::price_oracle::{PriceOracle, PriceQuote};
use hypervisor_queue::queue_item::{QueueDocument, QueueItem, QueueItemType};
use hypervisor_queue::queue_store::QueueStore;
use hypervisor_queue::record_store::RecordStore;
use hypervisor_queue::retry_policy::RetryPolicy;
use hypervisor_queue::types::ids;
use hypervisor_queue::types::{
    HypervisorStatic, HypervisorStatus, RawOperation, RewardStatic, RewardStatus, TokenInfo,
    TotalAmounts,
};
use itertools::Itertools;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const NETWORK: &str = "ethereum";
const HYPERVISOR: &str = "0x00000000000000000000000000000000000000h1";
const TOKEN0: &str = "0x00000000000000000000000000000000000000t0";
const TOKEN1: &str = "0x00000000000000000000000000000000000000t1";
const BLOCK_TS: u64 = 1_700_000_000;

struct FakeChain {
    total_supply: String,
    rewards_per_second: String,
    status_calls: AtomicUsize,
    reward_calls: AtomicUsize,
    timestamp_calls: AtomicUsize,
    fail_timestamps: bool,
}

impl FakeChain {
    fn new(total_supply: &str) -> Self {
        Self {
            total_supply: total_supply.to_string(),
            rewards_per_second: "1000".to_string(),
            status_calls: AtomicUsize::new(0),
            reward_calls: AtomicUsize::new(0),
            timestamp_calls: AtomicUsize::new(0),
            fail_timestamps: false,
        }
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn get_hypervisor_status(
        &self,
        network: &str,
        hypervisor: &HypervisorStatic,
        block: u64,
    ) -> Result<HypervisorStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(status_for(network, hypervisor, block, &self.total_supply))
    }

    async fn get_block_timestamp(&self, _network: &str, block: u64) -> Result<u64> {
        self.timestamp_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_timestamps {
            return Err(anyhow!("block {} timestamp unavailable", block));
        }
        Ok(BLOCK_TS + block)
    }

    async fn get_reward_status(
        &self,
        network: &str,
        hypervisor_status: &HypervisorStatus,
        reward_static: &RewardStatic,
    ) -> Result<Vec<RewardStatus>> {
        self.reward_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![RewardStatus {
            id: reward_static.status_id(hypervisor_status.block),
            network: network.to_string(),
            block: hypervisor_status.block,
            timestamp: hypervisor_status.timestamp,
            hypervisor_address: hypervisor_status.address.clone(),
            rewarder_address: reward_static.rewarder_address.clone(),
            rewarder_type: reward_static.rewarder_type.clone(),
            reward_token: reward_static.reward_token.clone(),
            reward_token_symbol: reward_static.reward_token_symbol.clone(),
            reward_token_decimals: reward_static.reward_token_decimals,
            rewards_per_second: self.rewards_per_second.clone(),
            total_hypervisor_token_qtty: "10".to_string(),
        }])
    }

    async fn get_operation_logs(
        &self,
        _network: &str,
        _addresses: &[String],
        _from: u64,
        _to: u64,
    ) -> Result<Vec<RawOperation>> {
        Ok(vec![])
    }

    async fn latest_block(&self, _network: &str) -> Result<u64> {
        Err(anyhow!("not used"))
    }
}

struct FakePrices {
    price: Option<f64>,
}

#[async_trait]
impl PriceOracle for FakePrices {
    async fn get_price(&self, _network: &str, _token: &str, _block: u64) -> Option<PriceQuote> {
        self.price.map(|price| PriceQuote {
            price,
            source: "fake".to_string(),
        })
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    records: RecordStore,
    queue: QueueStore,
    expander: DependencyExpander,
    processor: QueueProcessor,
    chain: Arc<FakeChain>,
}

fn harness(chain: FakeChain, price: Option<f64>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let records = RecordStore::new(store.clone());
    let queue = QueueStore::new(store.clone());
    let expander = DependencyExpander::new(records.clone(), queue.clone());
    let chain = Arc::new(chain);
    let handlers = Handlers::new(
        records.clone(),
        expander.clone(),
        chain.clone(),
        Arc::new(FakePrices { price }),
    );
    let processor = QueueProcessor::new(queue.clone(), handlers, RetryPolicy::new(5), 10);
    Harness {
        store,
        records,
        queue,
        expander,
        processor,
        chain,
    }
}

fn token(address: &str, symbol: &str, decimals: u8) -> TokenInfo {
    TokenInfo {
        address: address.to_string(),
        symbol: symbol.to_string(),
        decimals,
    }
}

fn hypervisor_static() -> HypervisorStatic {
    HypervisorStatic {
        id: HYPERVISOR.to_string(),
        address: HYPERVISOR.to_string(),
        network: NETWORK.to_string(),
        dex: "uniswapv3".to_string(),
        block: 10,
        pool_address: "0xpool".to_string(),
        decimals: 18,
        token0: token(TOKEN0, "WETH", 18),
        token1: token(TOKEN1, "USDC", 6),
    }
}

fn status_for(network: &str, hypervisor: &HypervisorStatic, block: u64, supply: &str) -> HypervisorStatus {
    HypervisorStatus {
        id: ids::hypervisor_status_id(&hypervisor.address, block),
        network: network.to_string(),
        dex: hypervisor.dex.clone(),
        address: hypervisor.address.clone(),
        block,
        timestamp: BLOCK_TS + block,
        symbol: "xWETH-USDC".to_string(),
        decimals: hypervisor.decimals,
        total_supply: supply.to_string(),
        total_amounts: TotalAmounts {
            total0: "5".to_string(),
            total1: "7".to_string(),
        },
        pool_address: hypervisor.pool_address.clone(),
        token0: hypervisor.token0.clone(),
        token1: hypervisor.token1.clone(),
    }
}

fn reward_static(rewarder: &str, reward_token: &str, block: u64) -> RewardStatic {
    RewardStatic {
        id: ids::reward_static_id(HYPERVISOR, rewarder, reward_token),
        network: NETWORK.to_string(),
        block,
        timestamp: 0,
        hypervisor_address: HYPERVISOR.to_string(),
        rewarder_address: rewarder.to_string(),
        rewarder_type: "masterchef_v2".to_string(),
        rewarder_ref_ids: vec![],
        reward_token: reward_token.to_string(),
        reward_token_symbol: "RWD".to_string(),
        reward_token_decimals: 18,
    }
}

fn operation(topic: &str, block: u64, timestamp: Option<u64>) -> RawOperation {
    let mut fields = serde_json::Map::new();
    fields.insert("shares".to_string(), serde_json::json!("1000"));
    RawOperation {
        topic: topic.to_string(),
        address: HYPERVISOR.to_string(),
        block_number: block,
        log_index: 7,
        transaction_hash: "0xtx".to_string(),
        timestamp,
        fields,
    }
}

async fn seed_statics(h: &Harness) {
    h.records.save_hypervisor_static(&hypervisor_static()).await.unwrap();
    h.records
        .save_reward_static(&reward_static("0xrewarder1", "0xreward1", 500))
        .await
        .unwrap();
    h.records
        .save_reward_static(&reward_static("0xrewarder2", "0xreward2", 900))
        .await
        .unwrap();
    // Starts after the scenario block: never expanded at 1000
    h.records
        .save_reward_static(&reward_static("0xrewarder3", "0xreward3", 2000))
        .await
        .unwrap();
}

/// Stores `item` as claimed by this test and returns it with that lease.
async fn claimed(h: &Harness, mut item: QueueItem) -> QueueItem {
    item.processing = 42.0;
    h.store.queue_replace(NETWORK, item.to_document()).await.unwrap();
    item
}

fn queued(h: &Harness) -> Vec<QueueDocument> {
    h.store.queue_snapshot(NETWORK).unwrap()
}

fn queued_of(h: &Harness, item_type: QueueItemType) -> Vec<QueueDocument> {
    queued(h)
        .into_iter()
        .filter(|d| d.item_type == item_type.as_str())
        .collect()
}

fn find(h: &Harness, id: &str) -> Option<QueueDocument> {
    queued(h).into_iter().find(|d| d.id == id)
}

#[tokio::test]
async fn test_deposit_scenario_end_to_end() {
    let h = harness(FakeChain::new("1000"), Some(1.0));
    seed_statics(&h).await;

    let enqueued = h
        .expander
        .expand_operation(NETWORK, &operation("deposit", 1000, Some(BLOCK_TS)))
        .await
        .unwrap();
    assert_eq!(enqueued, 3);

    let status_blocks: Vec<u64> = queued_of(&h, QueueItemType::HypervisorStatus)
        .iter()
        .map(|d| d.block)
        .sorted()
        .collect();
    assert_eq!(status_blocks, vec![999, 1000]);

    let block_items = queued_of(&h, QueueItemType::Block);
    assert_eq!(block_items.len(), 1);
    assert_eq!(block_items[0].block, 999);
    assert_eq!(h.records.block_timestamp(NETWORK, 1000).await.unwrap(), Some(BLOCK_TS));
    assert_eq!(h.records.block_timestamp(NETWORK, 999).await.unwrap(), None);

    // Process the block-1000 status
    let id = QueueItem::hypervisor_status(1000, HYPERVISOR).id;
    let doc = find(&h, &id).unwrap();
    let item = QueueItem::from_document(doc).unwrap();
    let outcome = h.processor.process_item(NETWORK, item).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Processed { success: true, .. }));
    assert!(find(&h, &id).is_none());
    assert!(h.records.has_hypervisor_status(NETWORK, HYPERVISOR, 1000).await.unwrap());

    let prices: Vec<String> = queued_of(&h, QueueItemType::Price)
        .into_iter()
        .map(|d| d.address)
        .sorted()
        .collect();
    assert_eq!(prices, vec!["0xreward1", "0xreward2", TOKEN0, TOKEN1].into_iter().sorted().collect::<Vec<_>>());
    assert!(queued_of(&h, QueueItemType::Price).iter().all(|d| d.block == 1000));
    assert_eq!(queued_of(&h, QueueItemType::RewardStatus).len(), 2);

    // Expanding again adds nothing new
    let status = h.records.hypervisor_status(NETWORK, HYPERVISOR, 1000).await.unwrap().unwrap();
    let before = queued(&h).len();
    h.expander.expand_status(NETWORK, &status).await.unwrap();
    assert_eq!(queued(&h).len(), before);
}

#[tokio::test]
async fn test_satisfied_dependencies_are_not_enqueued() {
    let h = harness(FakeChain::new("1000"), Some(1.0));
    seed_statics(&h).await;
    let status = status_for(NETWORK, &hypervisor_static(), 1000, "1000");

    // Price of token0 already known, first reward stream already recorded
    let price = claimed(&h, QueueItem::price(1000, TOKEN0)).await;
    let processed = h.processor.process_item(NETWORK, price).await.unwrap();
    assert!(matches!(processed, ProcessOutcome::Processed { success: true, .. }));
    let rs = reward_static("0xrewarder1", "0xreward1", 500);
    let task = claimed(&h, QueueItem::reward_status(rs, status.clone())).await;
    let processed = h.processor.process_item(NETWORK, task).await.unwrap();
    assert!(matches!(processed, ProcessOutcome::Processed { success: true, .. }));

    let planned = h.expander.plan_status(NETWORK, &status).await.unwrap();
    let ids: Vec<String> = planned.iter().map(|i| i.id.clone()).collect();
    assert!(!ids.contains(&QueueItem::price(1000, TOKEN0).id));
    assert!(ids.contains(&QueueItem::price(1000, TOKEN1).id));
    assert_eq!(
        planned
            .iter()
            .filter(|i| i.item_type() == QueueItemType::RewardStatus)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_zero_supply_skips_reward_expansion() {
    let h = harness(FakeChain::new("0"), Some(1.0));
    seed_statics(&h).await;
    let status = status_for(NETWORK, &hypervisor_static(), 1000, "0");

    h.expander.expand_status(NETWORK, &status).await.unwrap();

    assert!(queued_of(&h, QueueItemType::RewardStatus).is_empty());
    assert_eq!(queued_of(&h, QueueItemType::Price).len(), 2);
}

#[tokio::test]
async fn test_approval_never_expands() {
    let h = harness(FakeChain::new("1000"), Some(1.0));
    seed_statics(&h).await;

    let count = h
        .expander
        .expand_operation(NETWORK, &operation("approval", 1000, Some(BLOCK_TS)))
        .await
        .unwrap();
    assert_eq!(count, 0);

    // Through the handler: stored, but nothing queued
    let item = QueueItem::operation(operation("approval", 1000, None));
    h.queue.enqueue(NETWORK, vec![item]).await.unwrap();
    let outcome = h.processor.claim_and_process(NETWORK, None).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Processed { success: true, .. }));
    assert!(queued(&h).is_empty());
    assert_eq!(h.store.count(NETWORK, Collection::Operations), 1);
}

#[tokio::test]
async fn test_transfer_only_touches_its_block() {
    let h = harness(FakeChain::new("1000"), Some(1.0));
    seed_statics(&h).await;

    h.expander
        .expand_operation(NETWORK, &operation("transfer", 1000, Some(BLOCK_TS)))
        .await
        .unwrap();
    let statuses = queued_of(&h, QueueItemType::HypervisorStatus);
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].block, 1000);
    assert!(queued_of(&h, QueueItemType::Block).is_empty());
}

#[tokio::test]
async fn test_operation_handler_stores_and_expands() {
    let h = harness(FakeChain::new("1000"), Some(1.0));
    seed_statics(&h).await;

    h.queue
        .enqueue(NETWORK, vec![QueueItem::operation(operation("deposit", 1000, None))])
        .await
        .unwrap();
    let outcome = h
        .processor
        .claim_and_process(NETWORK, Some(&[QueueItemType::Operation][..]))
        .await
        .unwrap();
    assert!(matches!(outcome, ProcessOutcome::Processed { success: true, .. }));

    let stored = h
        .store
        .find_one(NETWORK, Collection::Operations, &ids::operation_id(7, "0xtx"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["timestamp"], serde_json::json!(BLOCK_TS + 1000));
    assert_eq!(stored["decimals_token1"], serde_json::json!(6));
    assert_eq!(stored["topic"], serde_json::json!("deposit"));

    assert_eq!(queued_of(&h, QueueItemType::HypervisorStatus).len(), 2);
    assert_eq!(h.records.block_timestamp(NETWORK, 1000).await.unwrap(), Some(BLOCK_TS + 1000));
}

#[tokio::test]
async fn test_reward_predating_block_is_trivially_done() {
    let h = harness(FakeChain::new("1000"), Some(1.0));
    let status = status_for(NETWORK, &hypervisor_static(), 100, "1000");
    let item = QueueItem::reward_status(reward_static("0xrewarder1", "0xreward1", 500), status);
    h.queue.enqueue(NETWORK, vec![item]).await.unwrap();

    let outcome = h.processor.claim_and_process(NETWORK, None).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Processed { success: true, .. }));
    assert_eq!(h.chain.reward_calls.load(Ordering::SeqCst), 0);
    assert!(queued(&h).is_empty());
}

#[tokio::test]
async fn test_zero_reward_rate_is_success_without_record() {
    let mut chain = FakeChain::new("1000");
    chain.rewards_per_second = "0".to_string();
    let h = harness(chain, Some(1.0));
    let status = status_for(NETWORK, &hypervisor_static(), 1000, "1000");
    let item = QueueItem::reward_status(reward_static("0xrewarder1", "0xreward1", 500), status);
    h.queue.enqueue(NETWORK, vec![item]).await.unwrap();

    let outcome = h.processor.claim_and_process(NETWORK, None).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Processed { success: true, .. }));
    assert_eq!(h.chain.reward_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.count(NETWORK, Collection::RewardsStatus), 0);
}

#[tokio::test]
async fn test_retry_ceiling() {
    let h = harness(FakeChain::new("1000"), Some(1.0));

    let mut over = QueueItem::block(50, HYPERVISOR);
    over.count = 11;
    over.processing = 1.0;
    let outcome = h.processor.process_item(NETWORK, over).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Refused { count: 11, .. }));
    assert_eq!(h.chain.timestamp_calls.load(Ordering::SeqCst), 0);

    let mut at_limit = QueueItem::block(51, HYPERVISOR);
    at_limit.count = 10;
    let at_limit = claimed(&h, at_limit).await;
    let outcome = h.processor.process_item(NETWORK, at_limit).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Processed { success: true, .. }));
    assert_eq!(h.chain.timestamp_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_completion_transition_table() {
    // No price available: every PRICE item fails softly
    let h = harness(FakeChain::new("1000"), None);

    let mut soft = QueueItem::price(10, "0xaaa");
    soft.count = 3;
    soft.processing = 5.0;
    h.store.queue_replace(NETWORK, soft.to_document()).await.unwrap();
    h.processor.process_item(NETWORK, soft.clone()).await.unwrap();
    let stored = find(&h, &soft.id).unwrap();
    assert_eq!(stored.count, 4);
    assert_eq!(stored.processing, 0.0);
    assert_eq!(stored.creation, soft.creation);

    let mut hard = QueueItem::price(10, "0xbbb");
    hard.count = 7;
    hard.processing = 5.0;
    h.store.queue_replace(NETWORK, hard.to_document()).await.unwrap();
    h.processor.process_item(NETWORK, hard.clone()).await.unwrap();
    let stored = find(&h, &hard.id).unwrap();
    assert_eq!(stored.count, 8);
    assert_eq!(stored.processing, 5.0);

    // Parked item is not reclaimable; the released one is
    let claimed = h.queue.claim_one(NETWORK, None).await.unwrap().unwrap();
    assert_eq!(claimed.id, soft.id);
    assert!(h.queue.claim_one(NETWORK, None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_parked_and_refused_items_are_listed_as_stuck() {
    let h = harness(FakeChain::new("1000"), None);
    h.queue
        .enqueue(NETWORK, vec![QueueItem::price(10, "0xaaa"), QueueItem::price(10, "0xbbb")])
        .await
        .unwrap();

    // Fifth soft failure parks the item
    let mut parked = h.queue.claim_one(NETWORK, None).await.unwrap().unwrap();
    parked.count = 5;
    h.queue.persist_with_count(NETWORK, &parked).await.unwrap();
    h.processor.process_item(NETWORK, parked.clone()).await.unwrap();
    assert_eq!(find(&h, &parked.id).unwrap().count, 6);

    let mut refused = h.queue.claim_one(NETWORK, None).await.unwrap().unwrap();
    refused.count = 11;
    h.queue.persist_with_count(NETWORK, &refused).await.unwrap();
    let outcome = h.processor.process_item(NETWORK, refused.clone()).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Refused { .. }));

    let stuck: Vec<String> = h
        .queue
        .stuck_items(NETWORK, 5)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .sorted()
        .collect();
    assert_eq!(stuck, vec![parked.id.clone(), refused.id.clone()].into_iter().sorted().collect::<Vec<_>>());

    // A released item with a high count is not stuck
    h.queue.unlock(NETWORK, &refused.id, false).await.unwrap();
    assert_eq!(h.queue.stuck_items(NETWORK, 5).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_expired_worker_does_not_overwrite_new_claimant() {
    let h = harness(FakeChain::new("1000"), None);
    h.queue.enqueue(NETWORK, vec![QueueItem::price(10, TOKEN0)]).await.unwrap();

    let slow = h.queue.claim_one(NETWORK, None).await.unwrap().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let reaped = h
        .queue
        .reap_expired(NETWORK, std::time::Duration::from_millis(1), 5)
        .await
        .unwrap();
    assert_eq!(reaped, 1);
    let current = h.queue.claim_one(NETWORK, None).await.unwrap().unwrap();

    // No price: the slow worker would release with count + 1
    let outcome = h.processor.process_item(NETWORK, slow.clone()).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::LeaseLost { .. }));

    let stored = find(&h, &slow.id).unwrap();
    assert_eq!(stored.processing, current.processing);
    assert_eq!(stored.count, 0);
    assert!(h.queue.claim_one(NETWORK, None).await.unwrap().is_none());

    // The current owner still settles it normally
    let outcome = h.processor.process_item(NETWORK, current).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Processed { success: false, .. }));
    assert_eq!(find(&h, &slow.id).unwrap().count, 1);
}

#[tokio::test]
async fn test_expired_worker_error_leaves_row_alone() {
    let h = harness(FakeChain::new("1000"), Some(1.0));
    h.queue
        .enqueue(NETWORK, vec![QueueItem::hypervisor_status(1000, "0xunknown")])
        .await
        .unwrap();

    let slow = h.queue.claim_one(NETWORK, None).await.unwrap().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    h.queue
        .reap_expired(NETWORK, std::time::Duration::from_millis(1), 5)
        .await
        .unwrap();
    let current = h.queue.claim_one(NETWORK, None).await.unwrap().unwrap();

    let err = h.processor.process_item(NETWORK, slow).await.unwrap_err();
    assert!(matches!(err, ScraperError::MissingStatic { .. }));
    let stored = queued(&h);
    assert_eq!(stored[0].processing, current.processing);
    assert_eq!(stored[0].count, 0);
}

#[tokio::test]
async fn test_operation_without_static_fails_before_timestamp_lookup() {
    let mut chain = FakeChain::new("1000");
    chain.fail_timestamps = true;
    let h = harness(chain, Some(1.0));
    h.queue
        .enqueue(NETWORK, vec![QueueItem::operation(operation("deposit", 1000, None))])
        .await
        .unwrap();

    let err = h.processor.claim_and_process(NETWORK, None).await.unwrap_err();
    assert!(matches!(err, ScraperError::MissingStatic { .. }));
    assert_eq!(h.chain.timestamp_calls.load(Ordering::SeqCst), 0);

    let stored = queued(&h);
    assert_eq!(stored[0].count, 1);
    assert_eq!(stored[0].processing, 0.0);
    assert_eq!(h.store.count(NETWORK, Collection::Operations), 0);
}

#[tokio::test]
async fn test_success_deletes_item() {
    let h = harness(FakeChain::new("1000"), Some(2.5));
    h.queue.enqueue(NETWORK, vec![QueueItem::price(10, TOKEN0)]).await.unwrap();

    let outcome = h.processor.claim_and_process(NETWORK, None).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Processed { success: true, .. }));
    assert!(queued(&h).is_empty());
    assert!(h.records.has_price(NETWORK, 10, TOKEN0).await.unwrap());
}

#[tokio::test]
async fn test_missing_static_raises_and_releases() {
    let h = harness(FakeChain::new("1000"), Some(1.0));
    h.queue
        .enqueue(NETWORK, vec![QueueItem::hypervisor_status(1000, "0xunknown")])
        .await
        .unwrap();

    let err = h.processor.claim_and_process(NETWORK, None).await.unwrap_err();
    assert!(matches!(err, ScraperError::MissingStatic { .. }));
    assert_eq!(h.chain.status_calls.load(Ordering::SeqCst), 0);

    let stored = queued(&h);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].count, 1);
    assert_eq!(stored[0].processing, 0.0);
}

#[tokio::test]
async fn test_enqueue_is_idempotent_on_identity() {
    let h = harness(FakeChain::new("1000"), Some(1.0));
    let a = QueueItem::hypervisor_status(1000, HYPERVISOR);
    let b = QueueItem::hypervisor_status(1000, &HYPERVISOR.to_uppercase().replace("0X", "0x"));
    assert_eq!(a.id, b.id);

    h.queue.enqueue(NETWORK, vec![a]).await.unwrap();
    h.queue.enqueue(NETWORK, vec![b]).await.unwrap();
    assert_eq!(queued(&h).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_item_has_one_claimant() {
    let store = Arc::new(MemoryStore::new());
    let queue = QueueStore::new(store.clone());
    queue.enqueue(NETWORK, vec![QueueItem::block(1, HYPERVISOR)]).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.claim_one(NETWORK, None).await.unwrap() })
        })
        .collect();
    let results = futures::future::join_all(handles).await;

    let winners = results
        .into_iter()
        .map(|r| r.unwrap())
        .filter(Option::is_some)
        .count();
    assert_eq!(winners, 1);
}
