//! Arbitrage opportunity types and the stable content-hash id

use alloy::primitives::keccak256;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::ChainId;

pub const TREND_SAMPLE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskClass {
    Low,
    Medium,
    High,
}

impl RiskClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskClass::Low => "Low",
            RiskClass::Medium => "Medium",
            RiskClass::High => "High",
        }
    }
}

impl std::str::FromStr for RiskClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(RiskClass::Low),
            "medium" => Ok(RiskClass::Medium),
            "high" => Ok(RiskClass::High),
            other => Err(format!("unknown risk class: {}", other)),
        }
    }
}

/// One side of the trade: the venue and its effective price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSide {
    pub venue: String,
    pub price: Decimal,
}

/// The fundamental unit produced by the scanner. Upserted into the live map
/// under its stable id; retired by freshness TTL or promotion to execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub chain: ChainId,
    pub pair: String,
    pub buy: TradeSide,
    pub sell: TradeSide,
    pub spread_bps: Decimal,
    /// Reference notional in base units, capped by the lesser venue depth.
    pub notional: Decimal,
    pub notional_usd: Decimal,
    pub gross_profit_usd: Decimal,
    pub gas_cost_usd: Decimal,
    pub slippage_reserve_usd: Decimal,
    pub flash_fee_usd: Decimal,
    pub net_profit_usd: Decimal,
    /// Scoring heuristic output, clamped to [0, 100]. Never feeds back into
    /// the profit identity.
    pub confidence: f64,
    pub risk: RiskClass,
    pub flash_loan_eligible: bool,
    /// Last N sell-side prices, newest last.
    pub trend: VecDeque<Decimal>,
    pub volatility_pct: f64,
    pub impact_pct: f64,
    pub freshness: DateTime<Utc>,
    /// Admission-control rejection reason, if any. Rejected candidates stay
    /// visible to observers for a short window.
    pub rejection: Option<String>,
}

impl Opportunity {
    /// `netProfit = grossProfit − gasCost − slippageReserve − flashFee`.
    pub fn profit_identity_holds(&self) -> bool {
        self.net_profit_usd
            == self.gross_profit_usd
                - self.gas_cost_usd
                - self.slippage_reserve_usd
                - self.flash_fee_usd
    }

    pub fn push_trend_sample(&mut self, price: Decimal) {
        if self.trend.len() == TREND_SAMPLE_LEN {
            self.trend.pop_front();
        }
        self.trend.push_back(price);
    }
}

/// Deterministic content-hash id. Timestamps are bucketed to one second so
/// successive scans of the same spread upsert the same row.
pub fn stable_id(
    pair: &str,
    buy_venue: &str,
    sell_venue: &str,
    chain: ChainId,
    ts: DateTime<Utc>,
) -> String {
    let preimage = format!(
        "{}|{}|{}|{}|{}",
        pair,
        buy_venue,
        sell_venue,
        chain.as_str(),
        ts.timestamp()
    );
    let digest = keccak256(preimage.as_bytes());
    format!("0x{}", hex_prefix(&digest[..12]))
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stable_id_is_deterministic_within_a_second_bucket() {
        let t0 = Utc.timestamp_opt(1_700_000_000, 100_000_000).unwrap();
        let t1 = Utc.timestamp_opt(1_700_000_000, 900_000_000).unwrap();
        let a = stable_id("WETH/USDT", "uniswap_v3", "sushiswap", ChainId::Ethereum, t0);
        let b = stable_id("WETH/USDT", "uniswap_v3", "sushiswap", ChainId::Ethereum, t1);
        assert_eq!(a, b);

        let t2 = Utc.timestamp_opt(1_700_000_001, 0).unwrap();
        let c = stable_id("WETH/USDT", "uniswap_v3", "sushiswap", ChainId::Ethereum, t2);
        assert_ne!(a, c);
    }

    #[test]
    fn stable_id_distinguishes_direction() {
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let ab = stable_id("WETH/USDT", "uniswap_v3", "sushiswap", ChainId::Ethereum, t);
        let ba = stable_id("WETH/USDT", "sushiswap", "uniswap_v3", ChainId::Ethereum, t);
        assert_ne!(ab, ba);
    }

    #[test]
    fn trend_ring_is_bounded() {
        let mut opp = sample_opportunity();
        for i in 0..(TREND_SAMPLE_LEN + 5) {
            opp.push_trend_sample(Decimal::from(i as i64));
        }
        assert_eq!(opp.trend.len(), TREND_SAMPLE_LEN);
        assert_eq!(*opp.trend.back().unwrap(), Decimal::from(20));
    }

    pub(crate) fn sample_opportunity() -> Opportunity {
        use rust_decimal_macros::dec;
        Opportunity {
            id: "0xabc".into(),
            chain: ChainId::Polygon,
            pair: "MATIC/USDT".into(),
            buy: TradeSide {
                venue: "quickswap".into(),
                price: dec!(0.8924),
            },
            sell: TradeSide {
                venue: "sushiswap".into(),
                price: dec!(0.8941),
            },
            spread_bps: dec!(19.05),
            notional: dec!(40000),
            notional_usd: dec!(35696),
            gross_profit_usd: dec!(70.65),
            gas_cost_usd: dec!(12.80),
            slippage_reserve_usd: dec!(3.35),
            flash_fee_usd: dec!(0),
            net_profit_usd: dec!(54.50),
            confidence: 80.0,
            risk: RiskClass::Low,
            flash_loan_eligible: true,
            trend: VecDeque::new(),
            volatility_pct: 0.4,
            impact_pct: 0.2,
            freshness: Utc::now(),
            rejection: None,
        }
    }

    #[test]
    fn profit_identity() {
        assert!(sample_opportunity().profit_identity_holds());
    }

    #[test]
    fn serde_round_trip_is_lossless() {
        let mut opp = sample_opportunity();
        opp.push_trend_sample(Decimal::new(8941, 4));
        opp.rejection = Some("pair-cool-down".into());

        let json = serde_json::to_string(&opp).unwrap();
        let back: Opportunity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, opp);
    }
}
