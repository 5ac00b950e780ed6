//! # Document Store
//!
//! The persistence seam of the engine. Records live in collections scoped
//! either per network (`status`, `queue`, ...) or globally (`prices`,
//! `blocks`, whose ids already carry the network).
//!
//! Two implementations exist: [`PgStore`] (PostgreSQL, JSONB documents) and
//! [`crate::memory_store::MemoryStore`] (single process, used by tests and
//! dry runs).
//!
//! ## Queue primitives
//!
//! The queue gets dedicated operations because it needs guarantees the
//! generic document calls cannot give:
//!
//! - `queue_upsert` keeps `creation`, `count` and `processing` of an existing
//!   identity and only refreshes the payload.
//! - `queue_claim_one` selects and marks one unclaimed row in a single atomic
//!   statement, so two workers never receive the same row.

use crate::queue_item::{QueueDocument, QueueItemType};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres, QueryBuilder, Row};
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

/// PostgreSQL connection pool type alias.
pub type DbPool = Pool<Postgres>;

/// Database schema name
pub const SCHEMA: &str = "hypervisor_queue";

/// Scope used by collections shared across networks.
pub const GLOBAL_SCOPE: &str = "global";

/// Document collections handled by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Static,
    RewardsStatic,
    Status,
    RewardsStatus,
    Operations,
    Prices,
    Blocks,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Static => "static",
            Collection::RewardsStatic => "rewards_static",
            Collection::Status => "status",
            Collection::RewardsStatus => "rewards_status",
            Collection::Operations => "operations",
            Collection::Prices => "prices",
            Collection::Blocks => "blocks",
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Collection::Prices | Collection::Blocks)
    }

    /// Storage scope of this collection for `network`.
    pub fn scope<'a>(&self, network: &'a str) -> &'a str {
        if self.is_global() {
            GLOBAL_SCOPE
        } else {
            network
        }
    }
}

/// Outcome of a write, in document-database terms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteResult {
    /// Existing documents that were already identical.
    pub matched: u64,
    /// Existing documents that changed.
    pub modified: u64,
    /// Documents created by the write.
    pub upserted: u64,
    pub deleted: u64,
}

impl WriteResult {
    /// Insert, modify and match all mean the document is now in the store.
    pub fn took_effect(&self) -> bool {
        self.matched + self.modified + self.upserted > 0
    }
}

/// Conjunctive document filter (`field == value` and `field <= bound`).
#[derive(Debug, Clone, Default)]
pub struct DocFilter {
    pub eq: Vec<(String, Value)>,
    pub lte: Vec<(String, u64)>,
}

impl DocFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.eq.push((field.to_string(), value.into()));
        self
    }

    pub fn lte(mut self, field: &str, bound: u64) -> Self {
        self.lte.push((field.to_string(), bound));
        self
    }

    /// Evaluates the filter against an in-memory document.
    pub fn matches(&self, doc: &Value) -> bool {
        let eq_ok = self
            .eq
            .iter()
            .all(|(field, value)| doc.get(field) == Some(value));
        let lte_ok = self.lte.iter().all(|(field, bound)| {
            doc.get(field)
                .and_then(Value::as_u64)
                .map_or(false, |v| v <= *bound)
        });
        eq_ok && lte_ok
    }
}

/// Operator-side view over the queue.
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub id: Option<String>,
    pub types: Option<Vec<QueueItemType>>,
    pub min_count: Option<u32>,
    pub claimed: Option<bool>,
    pub limit: Option<usize>,
}

impl QueueFilter {
    pub fn matches(&self, doc: &QueueDocument) -> bool {
        if let Some(id) = &self.id {
            if &doc.id != id {
                return false;
            }
        }
        if let Some(types) = &self.types {
            if !types.iter().any(|t| t.as_str() == doc.item_type) {
                return false;
            }
        }
        if let Some(min_count) = self.min_count {
            if doc.count < min_count {
                return false;
            }
        }
        if let Some(claimed) = self.claimed {
            if (doc.processing != 0.0) != claimed {
                return false;
            }
        }
        true
    }
}

/// Collection-scoped document store with atomic queue primitives.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn find_one(&self, network: &str, collection: Collection, id: &str)
        -> Result<Option<Value>>;

    async fn find_many(
        &self,
        network: &str,
        collection: Collection,
        filter: &DocFilter,
    ) -> Result<Vec<Value>>;

    /// Upserts `(id, document)` pairs, last write wins.
    async fn upsert_many(
        &self,
        network: &str,
        collection: Collection,
        docs: Vec<(String, Value)>,
    ) -> Result<WriteResult>;

    async fn delete_one(&self, network: &str, collection: Collection, id: &str)
        -> Result<WriteResult>;

    /// Inserts new identities; existing ones only get their payload refreshed.
    async fn queue_upsert(&self, network: &str, docs: Vec<QueueDocument>) -> Result<WriteResult>;

    /// Atomically claims one unclaimed row, setting `processing = now`.
    async fn queue_claim_one(
        &self,
        network: &str,
        types: Option<&[QueueItemType]>,
        now: f64,
    ) -> Result<Option<QueueDocument>>;

    /// Writes the whole row (lease and counters included).
    async fn queue_replace(&self, network: &str, doc: QueueDocument) -> Result<WriteResult>;

    /// Same write, but only while the stored row still carries `lease`.
    /// False when the row is gone or someone else claimed it since.
    async fn queue_replace_leased(&self, network: &str, doc: QueueDocument, lease: f64)
        -> Result<bool>;

    /// Deletes the row only while it still carries `lease`.
    async fn queue_delete_leased(&self, network: &str, id: &str, lease: f64) -> Result<bool>;

    /// Clears leases taken before `claimed_before` on rows with `count < below_count`.
    async fn queue_release_expired(
        &self,
        network: &str,
        claimed_before: f64,
        below_count: u32,
    ) -> Result<u64>;

    async fn queue_find(&self, network: &str, filter: &QueueFilter) -> Result<Vec<QueueDocument>>;
}

/// Connects to PostgreSQL, retrying with exponential backoff to survive
/// DNS/startup races, and makes sure the schema exists.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<DbPool> {
    // Force UTF-8 client encoding FIRST to avoid Windows sqlx bug with non-ASCII error messages
    std::env::set_var("PGCLIENTENCODING", "UTF8");

    let strategy = ExponentialBackoff::from_millis(2)
        .factor(100)
        .max_delay(Duration::from_secs(13))
        .map(jitter)
        .take(9);

    let mut attempt = 0u32;
    let pool = Retry::spawn(strategy, || {
        attempt += 1;
        let current = attempt;
        async move {
            let result = PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(5))
                .connect(database_url)
                .await;
            if let Err(e) = &result {
                log::warn!("DB connect attempt {} failed: {}. Retrying...", current, e);
            }
            result
        }
    })
    .await?;

    log::info!("✅ Successfully connected to database.");
    initialize_database(&pool).await?;
    Ok(pool)
}

pub async fn initialize_database(pool: &DbPool) -> Result<()> {
    const MIGRATION_LOCK_ID: i64 = 0x4859505251554555; // "HYPRQUEU" in hex

    let mut tx = pool.begin().await?;

    log::info!("Acquiring database migration lock...");
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(tx.as_mut())
        .await?;

    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", SCHEMA))
        .execute(tx.as_mut())
        .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {}.documents (
            scope TEXT NOT NULL,
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            doc JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (scope, collection, id)
        )",
        SCHEMA
    ))
    .execute(tx.as_mut())
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {}.queue (
            network TEXT NOT NULL,
            id TEXT NOT NULL,
            item_type TEXT NOT NULL,
            block BIGINT NOT NULL,
            address TEXT NOT NULL,
            data JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            processing DOUBLE PRECISION NOT NULL DEFAULT 0,
            creation DOUBLE PRECISION NOT NULL,
            count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (network, id)
        )",
        SCHEMA
    ))
    .execute(tx.as_mut())
    .await?;

    // Claims only ever look at unclaimed rows
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_queue_unclaimed
         ON {}.queue(network, item_type, creation) WHERE processing = 0",
        SCHEMA
    ))
    .execute(tx.as_mut())
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_queue_count ON {}.queue(network, count)",
        SCHEMA
    ))
    .execute(tx.as_mut())
    .await?;

    tx.commit().await?;
    log::info!("Database initialization complete, transaction committed.");
    Ok(())
}

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: String,
    item_type: String,
    block: i64,
    address: String,
    data: Value,
    processing: f64,
    creation: f64,
    count: i32,
}

impl From<QueueRow> for QueueDocument {
    fn from(row: QueueRow) -> Self {
        QueueDocument {
            id: row.id,
            item_type: row.item_type,
            block: row.block.max(0) as u64,
            address: row.address,
            data: row.data,
            processing: row.processing,
            creation: row.creation,
            count: row.count.max(0) as u32,
        }
    }
}

const QUEUE_COLUMNS: &str = "id, item_type, block, address, data, processing, creation, count";

/// PostgreSQL-backed [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn push_insert_outcome(result: &mut WriteResult, inserted: Option<bool>) {
        match inserted {
            Some(true) => result.upserted += 1,
            Some(false) => result.modified += 1,
            // ON CONFLICT ... WHERE filtered the update out: identical document
            None => result.matched += 1,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_one(
        &self,
        network: &str,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Value>> {
        let row = sqlx::query(&format!(
            "SELECT doc FROM {}.documents WHERE scope = $1 AND collection = $2 AND id = $3",
            SCHEMA
        ))
        .bind(collection.scope(network))
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => Some(row.try_get::<Value, _>("doc")?),
            None => None,
        })
    }

    async fn find_many(
        &self,
        network: &str,
        collection: Collection,
        filter: &DocFilter,
    ) -> Result<Vec<Value>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT doc FROM {}.documents WHERE scope = ",
            SCHEMA
        ));
        qb.push_bind(collection.scope(network).to_string());
        qb.push(" AND collection = ");
        qb.push_bind(collection.as_str());
        for (field, value) in &filter.eq {
            qb.push(" AND doc -> ");
            qb.push_bind(field.clone());
            qb.push(" = ");
            qb.push_bind(value.clone());
        }
        for (field, bound) in &filter.lte {
            qb.push(" AND (doc ->> ");
            qb.push_bind(field.clone());
            qb.push(")::numeric <= ");
            qb.push_bind(*bound as i64);
        }

        let docs = qb
            .build_query_scalar::<Value>()
            .fetch_all(&self.pool)
            .await?;
        Ok(docs)
    }

    async fn upsert_many(
        &self,
        network: &str,
        collection: Collection,
        docs: Vec<(String, Value)>,
    ) -> Result<WriteResult> {
        let mut result = WriteResult::default();
        if docs.is_empty() {
            return Ok(result);
        }

        let mut tx = self.pool.begin().await?;
        for (id, doc) in docs {
            let inserted: Option<bool> = sqlx::query_scalar(&format!(
                "INSERT INTO {schema}.documents (scope, collection, id, doc)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (scope, collection, id) DO UPDATE
                 SET doc = EXCLUDED.doc, updated_at = NOW()
                 WHERE {schema}.documents.doc IS DISTINCT FROM EXCLUDED.doc
                 RETURNING (xmax = 0) AS inserted",
                schema = SCHEMA
            ))
            .bind(collection.scope(network))
            .bind(collection.as_str())
            .bind(&id)
            .bind(&doc)
            .fetch_optional(tx.as_mut())
            .await?;
            Self::push_insert_outcome(&mut result, inserted);
        }
        tx.commit().await?;

        Ok(result)
    }

    async fn delete_one(
        &self,
        network: &str,
        collection: Collection,
        id: &str,
    ) -> Result<WriteResult> {
        let deleted = sqlx::query(&format!(
            "DELETE FROM {}.documents WHERE scope = $1 AND collection = $2 AND id = $3",
            SCHEMA
        ))
        .bind(collection.scope(network))
        .bind(collection.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(WriteResult {
            deleted,
            ..Default::default()
        })
    }

    async fn queue_upsert(&self, network: &str, docs: Vec<QueueDocument>) -> Result<WriteResult> {
        let mut result = WriteResult::default();
        if docs.is_empty() {
            return Ok(result);
        }

        let mut tx = self.pool.begin().await?;
        for doc in docs {
            let inserted: Option<bool> = sqlx::query_scalar(&format!(
                "INSERT INTO {schema}.queue (network, id, item_type, block, address, data, processing, creation, count)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (network, id) DO UPDATE
                 SET data = EXCLUDED.data
                 WHERE {schema}.queue.data IS DISTINCT FROM EXCLUDED.data
                 RETURNING (xmax = 0) AS inserted",
                schema = SCHEMA
            ))
            .bind(network)
            .bind(&doc.id)
            .bind(&doc.item_type)
            .bind(doc.block as i64)
            .bind(&doc.address)
            .bind(&doc.data)
            .bind(doc.processing)
            .bind(doc.creation)
            .bind(doc.count as i32)
            .fetch_optional(tx.as_mut())
            .await?;
            Self::push_insert_outcome(&mut result, inserted);
        }
        tx.commit().await?;

        Ok(result)
    }

    async fn queue_claim_one(
        &self,
        network: &str,
        types: Option<&[QueueItemType]>,
        now: f64,
    ) -> Result<Option<QueueDocument>> {
        let type_names: Option<Vec<String>> =
            types.map(|ts| ts.iter().map(|t| t.as_str().to_string()).collect());

        // Un solo UPDATE: seleccionar y marcar en la misma sentencia
        let row: Option<QueueRow> = sqlx::query_as(&format!(
            "UPDATE {schema}.queue SET processing = $2
             WHERE network = $1 AND id = (
                SELECT id FROM {schema}.queue
                WHERE network = $1 AND processing = 0
                  AND ($3::text[] IS NULL OR item_type = ANY($3))
                ORDER BY creation
                LIMIT 1
                FOR UPDATE SKIP LOCKED
             )
             RETURNING {columns}",
            schema = SCHEMA,
            columns = QUEUE_COLUMNS
        ))
        .bind(network)
        .bind(now)
        .bind(type_names)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(QueueDocument::from))
    }

    async fn queue_replace(&self, network: &str, doc: QueueDocument) -> Result<WriteResult> {
        let inserted: Option<bool> = sqlx::query_scalar(&format!(
            "INSERT INTO {schema}.queue (network, id, item_type, block, address, data, processing, creation, count)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (network, id) DO UPDATE
             SET item_type = EXCLUDED.item_type, block = EXCLUDED.block, address = EXCLUDED.address,
                 data = EXCLUDED.data, processing = EXCLUDED.processing,
                 creation = EXCLUDED.creation, count = EXCLUDED.count
             RETURNING (xmax = 0) AS inserted",
            schema = SCHEMA
        ))
        .bind(network)
        .bind(&doc.id)
        .bind(&doc.item_type)
        .bind(doc.block as i64)
        .bind(&doc.address)
        .bind(&doc.data)
        .bind(doc.processing)
        .bind(doc.creation)
        .bind(doc.count as i32)
        .fetch_optional(&self.pool)
        .await?;

        let mut result = WriteResult::default();
        Self::push_insert_outcome(&mut result, inserted);
        Ok(result)
    }

    async fn queue_replace_leased(
        &self,
        network: &str,
        doc: QueueDocument,
        lease: f64,
    ) -> Result<bool> {
        let updated = sqlx::query(&format!(
            "UPDATE {}.queue
             SET item_type = $3, block = $4, address = $5, data = $6,
                 processing = $7, creation = $8, count = $9
             WHERE network = $1 AND id = $2 AND processing = $10",
            SCHEMA
        ))
        .bind(network)
        .bind(&doc.id)
        .bind(&doc.item_type)
        .bind(doc.block as i64)
        .bind(&doc.address)
        .bind(&doc.data)
        .bind(doc.processing)
        .bind(doc.creation)
        .bind(doc.count as i32)
        .bind(lease)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn queue_delete_leased(&self, network: &str, id: &str, lease: f64) -> Result<bool> {
        let deleted = sqlx::query(&format!(
            "DELETE FROM {}.queue WHERE network = $1 AND id = $2 AND processing = $3",
            SCHEMA
        ))
        .bind(network)
        .bind(id)
        .bind(lease)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(deleted == 1)
    }

    async fn queue_release_expired(
        &self,
        network: &str,
        claimed_before: f64,
        below_count: u32,
    ) -> Result<u64> {
        let released = sqlx::query(&format!(
            "UPDATE {}.queue SET processing = 0
             WHERE network = $1 AND processing > 0 AND processing < $2 AND count < $3",
            SCHEMA
        ))
        .bind(network)
        .bind(claimed_before)
        .bind(below_count as i32)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(released)
    }

    async fn queue_find(&self, network: &str, filter: &QueueFilter) -> Result<Vec<QueueDocument>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM {}.queue WHERE network = ",
            QUEUE_COLUMNS, SCHEMA
        ));
        qb.push_bind(network.to_string());
        if let Some(id) = &filter.id {
            qb.push(" AND id = ");
            qb.push_bind(id.clone());
        }
        if let Some(types) = &filter.types {
            let names: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();
            qb.push(" AND item_type = ANY(");
            qb.push_bind(names);
            qb.push(")");
        }
        if let Some(min_count) = filter.min_count {
            qb.push(" AND count >= ");
            qb.push_bind(min_count as i32);
        }
        match filter.claimed {
            Some(true) => {
                qb.push(" AND processing <> 0");
            }
            Some(false) => {
                qb.push(" AND processing = 0");
            }
            None => {}
        }
        qb.push(" ORDER BY creation");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit as i64);
        }

        let rows: Vec<QueueRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(QueueDocument::from).collect())
    }
}
