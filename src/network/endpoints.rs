//! Per-chain endpoint pool with health tracking and rate limiting
//!
//! Requests pick the least-loaded healthy endpoint. A transport failure
//! marks the endpoint Degraded for a cool-down; it is re-probed afterwards.
//! Each endpoint carries its own token bucket.

use alloy::providers::ProviderBuilder;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::{BotError, BotResult};
use crate::types::{ChainId, EndpointHealth};
use crate::ConcreteProvider;

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct Endpoint {
    pub url: String,
    pub provider: Arc<ConcreteProvider>,
    in_flight: AtomicUsize,
    consecutive_failures: AtomicU32,
    state: Mutex<EndpointState>,
    bucket: Mutex<TokenBucket>,
    rate_per_sec: f64,
}

struct EndpointState {
    health: EndpointHealth,
    degraded_since: Option<Instant>,
}

impl Endpoint {
    fn new(url: String, rate_per_sec: u32) -> BotResult<Self> {
        let parsed = url
            .parse()
            .map_err(|e| BotError::Config(format!("invalid RPC URL {}: {}", url, e)))?;
        let provider: Arc<ConcreteProvider> =
            Arc::new(ProviderBuilder::new().on_http(parsed).boxed());
        Ok(Self {
            url,
            provider,
            in_flight: AtomicUsize::new(0),
            consecutive_failures: AtomicU32::new(0),
            state: Mutex::new(EndpointState {
                health: EndpointHealth::Healthy,
                degraded_since: None,
            }),
            bucket: Mutex::new(TokenBucket {
                tokens: rate_per_sec as f64,
                last_refill: Instant::now(),
            }),
            rate_per_sec: rate_per_sec as f64,
        })
    }

    async fn try_acquire_token(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        let elapsed = bucket.last_refill.elapsed().as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.rate_per_sec);
        bucket.last_refill = Instant::now();
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn load(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }
}

pub struct EndpointPool {
    pub chain: ChainId,
    endpoints: Vec<Arc<Endpoint>>,
    cooldown: Duration,
}

impl EndpointPool {
    pub fn new(
        chain: ChainId,
        urls: &[String],
        rate_per_sec: u32,
        cooldown: Duration,
    ) -> BotResult<Self> {
        if urls.is_empty() {
            return Err(BotError::Config(format!(
                "no endpoints configured for {}",
                chain
            )));
        }
        let endpoints = urls
            .iter()
            .map(|u| Endpoint::new(u.clone(), rate_per_sec).map(Arc::new))
            .collect::<BotResult<Vec<_>>>()?;
        Ok(Self {
            chain,
            endpoints,
            cooldown,
        })
    }

    /// Least-loaded endpoint that is healthy (or whose cool-down expired)
    /// and has a rate token available.
    pub async fn pick(&self) -> BotResult<Arc<Endpoint>> {
        let mut candidates: Vec<&Arc<Endpoint>> = Vec::with_capacity(self.endpoints.len());
        for ep in &self.endpoints {
            let mut state = ep.state.lock().await;
            match state.health {
                EndpointHealth::Healthy => candidates.push(ep),
                EndpointHealth::Degraded | EndpointHealth::Down => {
                    if let Some(since) = state.degraded_since {
                        if since.elapsed() >= self.cooldown {
                            debug!(chain = %self.chain, url = %ep.url, "re-probing endpoint after cool-down");
                            state.health = EndpointHealth::Healthy;
                            state.degraded_since = None;
                            candidates.push(ep);
                        }
                    }
                }
            }
        }

        candidates.sort_by_key(|ep| ep.load());
        for ep in candidates {
            if ep.try_acquire_token().await {
                return Ok(Arc::clone(ep));
            }
        }

        Err(BotError::retryable(
            self.chain,
            "no healthy endpoint with rate budget available",
        ))
    }

    pub fn begin_request(&self, ep: &Endpoint) {
        ep.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn end_request(&self, ep: &Endpoint, success: bool) {
        ep.in_flight.fetch_sub(1, Ordering::Relaxed);
        if success {
            ep.consecutive_failures.store(0, Ordering::Relaxed);
            return;
        }

        let failures = ep.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = ep.state.lock().await;
        if state.health == EndpointHealth::Healthy {
            warn!(chain = %self.chain, url = %ep.url, failures, "marking endpoint Degraded");
            state.health = EndpointHealth::Degraded;
            state.degraded_since = Some(Instant::now());
        } else if failures >= 10 {
            state.health = EndpointHealth::Down;
            state.degraded_since = Some(Instant::now());
        }
    }

    pub async fn health_counts(&self) -> (usize, usize, usize) {
        let mut healthy = 0;
        let mut degraded = 0;
        let mut down = 0;
        for ep in &self.endpoints {
            match ep.state.lock().await.health {
                EndpointHealth::Healthy => healthy += 1,
                EndpointHealth::Degraded => degraded += 1,
                EndpointHealth::Down => down += 1,
            }
        }
        (healthy, degraded, down)
    }

    pub async fn all_down(&self) -> bool {
        let (healthy, degraded, _) = self.health_counts().await;
        healthy == 0 && degraded == 0
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> EndpointPool {
        EndpointPool::new(
            ChainId::Ethereum,
            &[
                "http://localhost:8545".to_string(),
                "http://localhost:8546".to_string(),
            ],
            100,
            Duration::from_millis(20),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn failover_marks_degraded_and_reprobes() {
        let pool = pool();
        let primary = pool.pick().await.unwrap();
        pool.begin_request(&primary);
        pool.end_request(&primary, false).await;

        let (healthy, degraded, _) = pool.health_counts().await;
        assert_eq!((healthy, degraded), (1, 1));

        // Failover picks the remaining healthy endpoint.
        let secondary = pool.pick().await.unwrap();
        assert_ne!(secondary.url, primary.url);

        // After the cool-down the degraded endpoint is eligible again.
        tokio::time::sleep(Duration::from_millis(25)).await;
        let (healthy, _, _) = {
            let _ = pool.pick().await.unwrap();
            pool.health_counts().await
        };
        assert_eq!(healthy, 2);
    }

    #[tokio::test]
    async fn least_loaded_endpoint_wins() {
        let pool = pool();
        let first = pool.pick().await.unwrap();
        pool.begin_request(&first);
        let second = pool.pick().await.unwrap();
        assert_ne!(first.url, second.url);
    }

    #[tokio::test]
    async fn rate_limit_exhausts() {
        let pool = EndpointPool::new(
            ChainId::Ethereum,
            &["http://localhost:8545".to_string()],
            2,
            Duration::from_secs(30),
        )
        .unwrap();
        assert!(pool.pick().await.is_ok());
        assert!(pool.pick().await.is_ok());
        assert!(pool.pick().await.is_err());
    }
}
