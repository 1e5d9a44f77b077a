//! Retry logic with jittered exponential backoff
//!
//! Retryable transport failures are retried at most `max_attempts` times per
//! call; the final failure is surfaced to the caller categorized.

use std::time::Duration;
use tracing::warn;

use crate::errors::{BotError, BotResult};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            exponential_base: 2.0,
        }
    }
}

pub async fn retry_with_backoff<F, Fut, T>(
    operation: F,
    config: &RetryConfig,
    context: &str,
) -> BotResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = BotResult<T>>,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay_ms;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt >= config.max_attempts => {
                return Err(e);
            }
            Err(e) => {
                warn!(
                    "Attempt {}/{} failed for {}: {}. Retrying in {}ms...",
                    attempt, config.max_attempts, context, e, delay
                );

                tokio::time::sleep(Duration::from_millis(delay)).await;

                delay = (delay as f64 * config.exponential_base) as u64;
                delay = delay.min(config.max_delay_ms);
                let jitter = (delay as f64 * 0.1 * (rand::random::<f64>() - 0.5)) as u64;
                delay = delay.saturating_add(jitter);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChainId;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transport_errors_up_to_cap() {
        let calls = AtomicU32::new(0);
        let cfg = RetryConfig {
            initial_delay_ms: 1,
            ..Default::default()
        };
        let result: BotResult<()> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err(BotError::retryable(ChainId::Ethereum, "boom")) }
            },
            &cfg,
            "test op",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let cfg = RetryConfig {
            initial_delay_ms: 1,
            ..Default::default()
        };
        let result: BotResult<()> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::Relaxed);
                async {
                    Err(BotError::NonRetryableTransport {
                        chain: ChainId::Ethereum,
                        message: "malformed".into(),
                    })
                }
            },
            &cfg,
            "test op",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
