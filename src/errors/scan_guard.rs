//! Per-chain scan guard
//!
//! Pauses a chain's scanning loop once the client failure rate crosses a
//! threshold, and reopens after a cool-down. A single venue timeout never
//! trips the guard; only chain-client failures count.

use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

struct GuardState {
    consecutive_failures: u32,
    paused_since: Option<Instant>,
}

pub struct ScanGuard {
    state: RwLock<GuardState>,
    max_consecutive_failures: u32,
    backoff: Duration,
}

impl ScanGuard {
    pub fn new(max_consecutive_failures: u32, backoff: Duration) -> Self {
        Self {
            state: RwLock::new(GuardState {
                consecutive_failures: 0,
                paused_since: None,
            }),
            max_consecutive_failures,
            backoff,
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        state.consecutive_failures = 0;
        state.paused_since = None;
    }

    /// Returns true when this failure tripped the guard.
    pub async fn record_failure(&self, chain: &str) -> bool {
        let mut state = self.state.write().await;
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.max_consecutive_failures && state.paused_since.is_none()
        {
            state.paused_since = Some(Instant::now());
            warn!(
                chain,
                failures = state.consecutive_failures,
                "scan guard tripped, pausing chain scanning"
            );
            return true;
        }
        false
    }

    pub async fn can_scan(&self, chain: &str) -> bool {
        let mut state = self.state.write().await;
        match state.paused_since {
            None => true,
            Some(since) if since.elapsed() >= self.backoff => {
                info!(chain, "scan guard cool-down complete, resuming");
                state.paused_since = None;
                state.consecutive_failures = 0;
                true
            }
            Some(_) => false,
        }
    }

    pub async fn is_paused(&self) -> bool {
        self.state.read().await.paused_since.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trips_after_threshold_and_reopens() {
        let guard = ScanGuard::new(3, Duration::from_millis(20));
        assert!(guard.can_scan("test").await);

        assert!(!guard.record_failure("test").await);
        assert!(!guard.record_failure("test").await);
        assert!(guard.record_failure("test").await);
        assert!(!guard.can_scan("test").await);

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(guard.can_scan("test").await);
    }

    #[tokio::test]
    async fn success_resets_counter() {
        let guard = ScanGuard::new(2, Duration::from_secs(60));
        guard.record_failure("test").await;
        guard.record_success().await;
        assert!(!guard.record_failure("test").await);
    }
}
