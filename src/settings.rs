use crate::price_oracle::PriceSourceKind;
use crate::rpc_pool::EndpointKind;
use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    /// Empty means "use the in-memory store" (dry runs).
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

/// Retry thresholds, lease and worker pool of the queue engine.
#[derive(Debug, Deserialize, Clone)]
pub struct QueueSettings {
    /// Failures below this count are released for automatic retry.
    #[serde(default = "default_soft_retry_limit")]
    pub soft_retry_limit: u32,
    /// Items above this count are refused at dispatch.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_lease_ttl_seconds")]
    pub lease_ttl_seconds: u64,
    #[serde(default = "default_reaper_interval_seconds")]
    pub reaper_interval_seconds: u64,
    /// Sleep between polls when the queue is empty.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_soft_retry_limit() -> u32 {
    5
}
fn default_max_attempts() -> u32 {
    10
}
fn default_lease_ttl_seconds() -> u64 {
    1_800 // 30 min
}
fn default_reaper_interval_seconds() -> u64 {
    60
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_workers() -> usize {
    4
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            soft_retry_limit: default_soft_retry_limit(),
            max_attempts: default_max_attempts(),
            lease_ttl_seconds: default_lease_ttl_seconds(),
            reaper_interval_seconds: default_reaper_interval_seconds(),
            poll_interval_ms: default_poll_interval_ms(),
            workers: default_workers(),
        }
    }
}

/// Cooldown policy shared by every endpoint pool.
#[derive(Debug, Deserialize, Clone)]
pub struct RpcSettings {
    #[serde(default = "default_consecutive_failure_threshold")]
    pub consecutive_failure_threshold: u32,
    #[serde(default = "default_short_cooldown_seconds")]
    pub short_cooldown_seconds: u64,
    #[serde(default = "default_lifetime_failure_threshold")]
    pub lifetime_failure_threshold: u32,
    #[serde(default = "default_long_cooldown_public_seconds")]
    pub long_cooldown_public_seconds: u64,
    #[serde(default = "default_long_cooldown_private_seconds")]
    pub long_cooldown_private_seconds: u64,
    #[serde(default = "default_rate_limit_cooldown_seconds")]
    pub rate_limit_cooldown_seconds: u64,
    #[serde(default = "default_qps_per_endpoint")]
    pub qps_per_endpoint: u32,
}

fn default_consecutive_failure_threshold() -> u32 {
    3
}
fn default_short_cooldown_seconds() -> u64 {
    120
}
fn default_lifetime_failure_threshold() -> u32 {
    100
}
fn default_long_cooldown_public_seconds() -> u64 {
    86_400 // 1 día
}
fn default_long_cooldown_private_seconds() -> u64 {
    3_600
}
fn default_rate_limit_cooldown_seconds() -> u64 {
    60
}
fn default_qps_per_endpoint() -> u32 {
    25
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            consecutive_failure_threshold: default_consecutive_failure_threshold(),
            short_cooldown_seconds: default_short_cooldown_seconds(),
            lifetime_failure_threshold: default_lifetime_failure_threshold(),
            long_cooldown_public_seconds: default_long_cooldown_public_seconds(),
            long_cooldown_private_seconds: default_long_cooldown_private_seconds(),
            rate_limit_cooldown_seconds: default_rate_limit_cooldown_seconds(),
            qps_per_endpoint: default_qps_per_endpoint(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RpcProviderSettings {
    pub url: String,
    #[serde(default = "default_endpoint_kind")]
    pub kind: EndpointKind,
}

fn default_endpoint_kind() -> EndpointKind {
    EndpointKind::Public
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NetworkSettings {
    #[serde(default)]
    pub rpc: Vec<RpcProviderSettings>,
    /// Hypervisors whose event logs feed the queue.
    #[serde(default)]
    pub hypervisors: Vec<String>,
    /// Token -> USD price used by the fixed source (stablecoins, pegged tokens).
    #[serde(default)]
    pub fixed_prices: HashMap<String, f64>,
    /// Token -> Chainlink aggregator address.
    #[serde(default)]
    pub chainlink_oracles: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PriceFeedSettings {
    #[serde(default = "default_source_order")]
    pub source_order: Vec<PriceSourceKind>,
}

fn default_source_order() -> Vec<PriceSourceKind> {
    vec![PriceSourceKind::Fixed, PriceSourceKind::Chainlink]
}

impl Default for PriceFeedSettings {
    fn default() -> Self {
        Self {
            source_order: default_source_order(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OperationFeedSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// First block scanned when nothing has been scanned yet (0 = chain head).
    #[serde(default)]
    pub start_block: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_feed_interval_seconds")]
    pub interval_seconds: u64,
}

fn default_true() -> bool {
    true
}
fn default_chunk_size() -> u64 {
    2_000
}
fn default_feed_interval_seconds() -> u64 {
    30
}

impl Default for OperationFeedSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            start_block: 0,
            chunk_size: default_chunk_size(),
            interval_seconds: default_feed_interval_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Prometheus exporter address (observability builds only).
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            metrics_addr: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub rpc: RpcSettings,
    #[serde(default)]
    pub networks: HashMap<String, NetworkSettings>,
    #[serde(default)]
    pub price_feeds: PriceFeedSettings,
    #[serde(default)]
    pub operation_feed: OperationFeedSettings,
    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    /// Loads the file at `path` plus environment overrides, then validates.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("HQ_DATABASE_URL") {
            if !url.trim().is_empty() {
                self.database.url = url.trim().to_string();
            }
        }

        // HQ_RPC_<NETWORK>_URLS replaces the endpoints of an already configured network
        for (name, network) in self.networks.iter_mut() {
            let key = format!("HQ_RPC_{}_URLS", name.to_uppercase());
            if let Ok(raw) = env::var(&key) {
                let urls = parse_string_list(&raw);
                if !urls.is_empty() {
                    network.rpc = urls
                        .into_iter()
                        .map(|url| RpcProviderSettings {
                            url,
                            kind: EndpointKind::Private,
                        })
                        .collect();
                }
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.soft_retry_limit > self.queue.max_attempts {
            return Err(ConfigError::Message(format!(
                "queue.soft_retry_limit ({}) must not exceed queue.max_attempts ({})",
                self.queue.soft_retry_limit, self.queue.max_attempts
            )));
        }
        if self.queue.workers == 0 {
            return Err(ConfigError::Message("queue.workers must be at least 1".to_string()));
        }
        for (name, network) in &self.networks {
            for provider in &network.rpc {
                if let Err(e) = url::Url::parse(&provider.url) {
                    return Err(ConfigError::Message(format!(
                        "networks.{}.rpc: invalid url '{}': {}",
                        name, provider.url, e
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn network(&self, name: &str) -> Option<&NetworkSettings> {
        self.networks.get(name)
    }
}

/// Accepts a JSON array or a comma separated list.
pub fn parse_string_list(input: &str) -> Vec<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return vec![];
    }

    if trimmed.starts_with('[') {
        if let Ok(v) = serde_json::from_str::<Vec<String>>(trimmed) {
            return v;
        }
    }

    trimmed
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|s| s.trim().trim_matches('"').trim_matches('\'').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
