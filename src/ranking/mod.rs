//! Ranking order and admission control
//!
//! Candidates are ranked by a total order so identical inputs always sort
//! identically. Admission rules gate what the executor may touch; rejected
//! candidates stay observable tagged with their reason.

use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::Config;
use crate::types::{ChainId, Opportunity};

/// Net profit desc, confidence desc, gas asc, pair id lex. Total over the
/// opportunity id as the final tie-breaker.
pub fn rank_cmp(a: &Opportunity, b: &Opportunity) -> Ordering {
    b.net_profit_usd
        .cmp(&a.net_profit_usd)
        .then_with(|| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.gas_cost_usd.cmp(&b.gas_cost_usd))
        .then_with(|| a.pair.cmp(&b.pair))
        .then_with(|| a.id.cmp(&b.id))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    GasCeilingExceeded,
    PositionTooLarge,
    PairCoolDown,
    LowConfidence,
    RiskClassBlocked,
    NotFlashEligible,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::GasCeilingExceeded => "gas-ceiling-exceeded",
            RejectReason::PositionTooLarge => "position-too-large",
            RejectReason::PairCoolDown => "pair-cool-down",
            RejectReason::LowConfidence => "low-confidence",
            RejectReason::RiskClassBlocked => "risk-class-blocked",
            RejectReason::NotFlashEligible => "not-flash-eligible",
        };
        f.write_str(s)
    }
}

/// Admission rules applied before a candidate is offered for execution.
pub struct AdmissionController {
    recent_attempts: RwLock<HashMap<(ChainId, String), Instant>>,
}

impl AdmissionController {
    pub fn new() -> Self {
        Self {
            recent_attempts: RwLock::new(HashMap::new()),
        }
    }

    pub async fn admit(
        &self,
        opp: &Opportunity,
        config: &Config,
        current_gas_gwei: Decimal,
    ) -> Result<(), RejectReason> {
        if current_gas_gwei > Decimal::from(config.max_gas_price_gwei) {
            return Err(RejectReason::GasCeilingExceeded);
        }
        if opp.notional_usd > config.max_position_size_usd {
            return Err(RejectReason::PositionTooLarge);
        }
        if opp.confidence < config.min_confidence_auto {
            return Err(RejectReason::LowConfidence);
        }
        if !config.auto_risk_allowlist.contains(&opp.risk) {
            return Err(RejectReason::RiskClassBlocked);
        }

        let cooldown = Duration::from_secs(config.pair_cooldown_secs);
        let attempts = self.recent_attempts.read().await;
        if let Some(last) = attempts.get(&(opp.chain, opp.pair.clone())) {
            if last.elapsed() < cooldown {
                return Err(RejectReason::PairCoolDown);
            }
        }
        Ok(())
    }

    /// Record an attempt, successful or not, starting the pair cool-down.
    pub async fn record_attempt(&self, chain: ChainId, pair: &str) {
        self.recent_attempts
            .write()
            .await
            .insert((chain, pair.to_string()), Instant::now());
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::opportunity::tests::sample_opportunity;
    use rust_decimal_macros::dec;

    fn config() -> Config {
        let mut cfg = Config::load();
        cfg.rpc_endpoints
            .insert(ChainId::Polygon, vec!["http://localhost:8545".into()]);
        cfg
    }

    #[test]
    fn ranking_is_stable_and_total() {
        let mut a = sample_opportunity();
        a.id = "0x01".into();
        let mut b = sample_opportunity();
        b.id = "0x02".into();
        b.net_profit_usd = dec!(100);
        let mut c = sample_opportunity();
        c.id = "0x03".into();
        c.confidence = 95.0;

        let mut first = vec![a.clone(), b.clone(), c.clone()];
        let mut second = vec![c, a, b];
        first.sort_by(rank_cmp);
        second.sort_by(rank_cmp);

        let ids: Vec<&str> = first.iter().map(|o| o.id.as_str()).collect();
        let ids2: Vec<&str> = second.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ids2);
        assert_eq!(ids[0], "0x02"); // highest net profit first
        assert_eq!(ids[1], "0x03"); // confidence breaks the tie
    }

    #[tokio::test]
    async fn gas_ceiling_rejects() {
        let ctl = AdmissionController::new();
        let cfg = config();
        let opp = sample_opportunity();
        let res = ctl.admit(&opp, &cfg, dec!(500)).await;
        assert_eq!(res, Err(RejectReason::GasCeilingExceeded));
    }

    #[tokio::test]
    async fn cooldown_rejects_repeat_attempts() {
        let ctl = AdmissionController::new();
        let cfg = config();
        let opp = sample_opportunity();

        assert!(ctl.admit(&opp, &cfg, dec!(40)).await.is_ok());
        ctl.record_attempt(opp.chain, &opp.pair).await;
        assert_eq!(
            ctl.admit(&opp, &cfg, dec!(40)).await,
            Err(RejectReason::PairCoolDown)
        );
    }

    #[tokio::test]
    async fn oversized_position_rejects() {
        let ctl = AdmissionController::new();
        let cfg = config();
        let mut opp = sample_opportunity();
        opp.notional_usd = cfg.max_position_size_usd + dec!(1);
        assert_eq!(
            ctl.admit(&opp, &cfg, dec!(40)).await,
            Err(RejectReason::PositionTooLarge)
        );
    }
}
