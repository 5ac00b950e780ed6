// src/rpc_pool.rs

//! Per-network pool of RPC endpoints with cooldown-based failover.
//!
//! Each endpoint tracks two failure counters. Consecutive failures (reset on
//! success) trigger a short cooldown once they reach a small threshold.
//! Aggregate failures (never reset by success) trigger a long cooldown once
//! they reach a large threshold; public endpoints sit out much longer than
//! private ones. Rate-limit responses cool the endpoint down immediately.
//!
//! ```rust,ignore
//! let pool = RpcPool::new("ethereum", &network.rpc, &settings.rpc)?;
//! let block = pool
//!     .call(RpcPreference::PublicFirst, "eth_blockNumber", |p| async move {
//!         Ok(p.get_block_number().await?.as_u64())
//!     })
//!     .await?;
//! ```

use crate::metrics;
use crate::settings::{RpcProviderSettings, RpcSettings};
use ethers::prelude::{Http, Provider};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

type DefaultDirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Paid/dedicated endpoints are `Private`; shared free ones are `Public`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Public,
    Private,
}

/// Ranking used when picking endpoints for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcPreference {
    /// Status snapshots: dedicated nodes keep full archive state.
    PrivateFirst,
    PublicFirst,
}

#[derive(Debug, thiserror::Error)]
pub enum RpcPoolError {
    #[error("no RPC endpoints configured for {0}")]
    NoEndpoints(String),
    #[error("invalid RPC url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("all RPC endpoints of {network} are cooling down")]
    AllCoolingDown { network: String },
    #[error("{method} failed on {network} after {attempts} endpoints: {last_error}")]
    Exhausted {
        network: String,
        method: String,
        attempts: usize,
        last_error: String,
    },
}

#[derive(Debug, Clone)]
struct EndpointHealth {
    consecutive_failures: u32,
    lifetime_failures: u32,
    cooldown_until: Option<Instant>,
}

/// One RPC endpoint and its health bookkeeping.
pub struct Endpoint {
    url: String,
    kind: EndpointKind,
    provider: Arc<Provider<Http>>,
    limiter: DefaultDirectRateLimiter,
    health: Mutex<EndpointHealth>,
}

impl Endpoint {
    fn health(&self) -> MutexGuard<'_, EndpointHealth> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn is_cooling_down(&self, now: Instant) -> bool {
        self.health().cooldown_until.map_or(false, |until| now < until)
    }
}

/// Point-in-time view of an endpoint, for logs and operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStats {
    pub url: String,
    pub kind: EndpointKind,
    pub consecutive_failures: u32,
    pub lifetime_failures: u32,
    pub cooling_down: bool,
}

pub struct RpcPool {
    network: String,
    endpoints: Vec<Arc<Endpoint>>,
    settings: RpcSettings,
}

impl RpcPool {
    pub fn new(
        network: &str,
        providers: &[RpcProviderSettings],
        settings: &RpcSettings,
    ) -> Result<Self, RpcPoolError> {
        if providers.is_empty() {
            return Err(RpcPoolError::NoEndpoints(network.to_string()));
        }

        let qps = NonZeroU32::new(settings.qps_per_endpoint.max(1)).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(qps);

        let mut endpoints = Vec::with_capacity(providers.len());
        for provider in providers {
            let client = Provider::<Http>::try_from(provider.url.as_str()).map_err(|e| {
                RpcPoolError::InvalidUrl {
                    url: provider.url.clone(),
                    reason: e.to_string(),
                }
            })?;
            endpoints.push(Arc::new(Endpoint {
                url: provider.url.clone(),
                kind: provider.kind,
                provider: Arc::new(client),
                limiter: RateLimiter::direct(quota),
                health: Mutex::new(EndpointHealth {
                    consecutive_failures: 0,
                    lifetime_failures: 0,
                    cooldown_until: None,
                }),
            }));
        }

        info!(
            "✅ [RpcPool] {} ready with {} endpoints ({} private)",
            network,
            endpoints.len(),
            endpoints.iter().filter(|e| e.kind == EndpointKind::Private).count()
        );

        Ok(Self {
            network: network.to_string(),
            endpoints,
            settings: settings.clone(),
        })
    }

    /// Endpoints not cooling down, ordered by `preference` then by
    /// consecutive failures. Ties are shuffled so load spreads.
    pub fn ranked(&self, preference: RpcPreference) -> Vec<Arc<Endpoint>> {
        let now = Instant::now();
        let mut rng = rand::thread_rng();
        let mut available: Vec<(u8, u32, u32, Arc<Endpoint>)> = self
            .endpoints
            .iter()
            .filter(|e| !e.is_cooling_down(now))
            .map(|e| {
                let tier = match (preference, e.kind) {
                    (RpcPreference::PrivateFirst, EndpointKind::Private)
                    | (RpcPreference::PublicFirst, EndpointKind::Public) => 0,
                    _ => 1,
                };
                let failures = e.health().consecutive_failures;
                (tier, failures, rng.gen::<u32>(), Arc::clone(e))
            })
            .collect();
        available.sort_by_key(|(tier, failures, jitter, _)| (*tier, *failures, *jitter));
        available.into_iter().map(|(_, _, _, e)| e).collect()
    }

    /// Runs `action` against ranked endpoints until one succeeds.
    pub async fn call<T, F, Fut>(
        &self,
        preference: RpcPreference,
        method: &str,
        action: F,
    ) -> Result<T, RpcPoolError>
    where
        F: Fn(Arc<Provider<Http>>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let candidates = self.ranked(preference);
        if candidates.is_empty() {
            warn!("⚠️ [RpcPool] {} has no endpoint available for {}", self.network, method);
            return Err(RpcPoolError::AllCoolingDown {
                network: self.network.clone(),
            });
        }

        let mut last_error = String::new();
        let attempts = candidates.len();
        for endpoint in candidates {
            endpoint.limiter.until_ready().await;
            metrics::record_rpc_request(&endpoint.url);

            match action(Arc::clone(&endpoint.provider)).await {
                Ok(value) => {
                    self.report_success(&endpoint);
                    return Ok(value);
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    if is_rate_limit_error(&message) {
                        self.report_rate_limit(&endpoint);
                    } else {
                        self.report_failure(&endpoint);
                    }
                    debug!(
                        "[RpcPool] {} {} failed on {}: {}",
                        self.network, method, endpoint.url, message
                    );
                    last_error = message;
                }
            }
        }

        Err(RpcPoolError::Exhausted {
            network: self.network.clone(),
            method: method.to_string(),
            attempts,
            last_error,
        })
    }

    pub fn report_success(&self, endpoint: &Endpoint) {
        endpoint.health().consecutive_failures = 0;
    }

    pub fn report_failure(&self, endpoint: &Endpoint) {
        let mut health = endpoint.health();
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.lifetime_failures = health.lifetime_failures.saturating_add(1);

        if health.lifetime_failures >= self.settings.lifetime_failure_threshold {
            let cooldown = self.long_cooldown(endpoint.kind);
            health.cooldown_until = Some(Instant::now() + cooldown);
            // Aggregate counter restarts once the long cooldown is served
            health.lifetime_failures = 0;
            health.consecutive_failures = 0;
            metrics::increment_rpc_cooldown(&endpoint.url, "long");
            warn!(
                "🧊 [RpcPool] {} endpoint {} reached the failure ceiling, cooling down for {:?}",
                self.network, endpoint.url, cooldown
            );
        } else if health.consecutive_failures >= self.settings.consecutive_failure_threshold {
            let cooldown = Duration::from_secs(self.settings.short_cooldown_seconds);
            health.cooldown_until = Some(Instant::now() + cooldown);
            health.consecutive_failures = 0;
            metrics::increment_rpc_cooldown(&endpoint.url, "short");
            warn!(
                "⚠️ [RpcPool] {} endpoint {} failing repeatedly, cooling down for {:?}",
                self.network, endpoint.url, cooldown
            );
        }
    }

    /// Rate-limited endpoints step aside right away.
    pub fn report_rate_limit(&self, endpoint: &Endpoint) {
        let mut health = endpoint.health();
        health.lifetime_failures = health.lifetime_failures.saturating_add(1);
        let cooldown = Duration::from_secs(self.settings.rate_limit_cooldown_seconds);
        health.cooldown_until = Some(Instant::now() + cooldown);
        metrics::increment_rpc_429(&endpoint.url);
        warn!(
            "Rate limit error reported for {} endpoint {}. Backing off for {:?}",
            self.network, endpoint.url, cooldown
        );
    }

    fn long_cooldown(&self, kind: EndpointKind) -> Duration {
        match kind {
            EndpointKind::Public => Duration::from_secs(self.settings.long_cooldown_public_seconds),
            EndpointKind::Private => Duration::from_secs(self.settings.long_cooldown_private_seconds),
        }
    }

    pub fn stats(&self) -> Vec<EndpointStats> {
        let now = Instant::now();
        self.endpoints
            .iter()
            .map(|e| {
                let health = e.health();
                EndpointStats {
                    url: e.url.clone(),
                    kind: e.kind,
                    consecutive_failures: health.consecutive_failures,
                    lifetime_failures: health.lifetime_failures,
                    cooling_down: health.cooldown_until.map_or(false, |until| now < until),
                }
            })
            .collect()
    }
}

fn is_rate_limit_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("429")
        || lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("exceeded")
        || lower.contains("compute units")
}
