//! # Hypervisor Queue
//!
//! Queue-driven scraping and reconciliation engine for liquidity-provision
//! vaults ("hypervisors") on EVM chains.
//!
//! ## Overview
//!
//! The engine decides which on-chain data still needs to be fetched, runs
//! that work with at most one claimant per queue item, retries partial
//! failures a bounded number of times, and fans new work back out when a
//! freshly stored record implies more (a hypervisor status implies prices
//! and reward statuses; an operation implies statuses around its block).
//!
//! ## Architecture
//!
//! ### Queue
//! [`queue_item`] defines the unit of work and its identity, [`queue_store`]
//! the enqueue/claim/release/complete primitives over a [`database::Store`].
//!
//! ### Processing
//! [`dispatcher`] claims and routes items to [`handlers`]; [`retry_policy`]
//! decides what happens to an item after its handler returns;
//! [`dependency_expander`] enqueues the work a new record implies.
//!
//! ### Collaborators
//! [`chain_reader`] (RPC reads through [`rpc_pool`]), [`price_oracle`], and
//! the stores in [`database`] (PostgreSQL) and [`memory_store`].

// Core Types
/// Persisted records, identities and conversions
pub mod types;
/// Structural error taxonomy
pub mod errors;
/// Queue work items
pub mod queue_item;

// Queue Engine
/// Queue primitives over a store
pub mod queue_store;
/// Fan-out of new work from persisted records
pub mod dependency_expander;
/// One fetch-and-persist handler per work type
pub mod handlers;
/// Completion/retry state machine
pub mod retry_policy;
/// Claim and dispatch
pub mod dispatcher;
/// Workers, lease reaper and operation feed
pub mod orchestrator;

// Storage
/// Store trait and PostgreSQL implementation
pub mod database;
/// In-process store
pub mod memory_store;
/// Typed record access
pub mod record_store;

// Chain Access
/// RPC endpoint pool with cooldown failover
pub mod rpc_pool;
/// On-chain reads
pub mod chain_reader;
/// Price sources and the ordered oracle chain
pub mod price_oracle;
/// Smart contract ABIs (read-only)
pub mod contracts;

// Infrastructure
/// Metrics and observability
pub mod metrics;
/// Configuration management
pub mod settings;
/// General utilities
pub mod utils;

// Re-exports for convenience
pub use database::{PgStore, Store};
pub use dispatcher::{ProcessOutcome, QueueProcessor};
pub use errors::ScraperError;
pub use memory_store::MemoryStore;
pub use orchestrator::Orchestrator;
pub use queue_item::{QueueItem, QueueItemType};
pub use settings::Settings;
