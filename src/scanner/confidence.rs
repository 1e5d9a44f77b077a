//! Confidence scoring and risk classification
//!
//! Confidence is a weighted combination of depth headroom, inverted
//! volatility, venue-class penalties, and quote staleness, clamped to
//! [0, 100]. Weights are configurable; defaults live in the config module.

use crate::config::ConfidenceWeights;
use crate::types::{PricingModel, Quote, RiskClass};

pub struct ConfidenceInputs<'a> {
    pub buy_quote: &'a Quote,
    pub sell_quote: &'a Quote,
    /// Reference notional in base units.
    pub notional: f64,
    pub volatility_pct: f64,
    pub buy_model: PricingModel,
    pub sell_model: PricingModel,
    /// Older quote of the two, in milliseconds.
    pub staleness_ms: i64,
    /// Freshness TTL of the chain, the staleness horizon.
    pub ttl_ms: u64,
}

pub fn score(inputs: &ConfidenceInputs<'_>, weights: &ConfidenceWeights) -> f64 {
    // Depth headroom: how much of the lesser depth the notional consumes.
    let min_depth = f64::min(
        decimal_to_f64(inputs.buy_quote.depth),
        decimal_to_f64(inputs.sell_quote.depth),
    );
    let depth_score = if min_depth <= 0.0 {
        0.0
    } else {
        (1.0 - (inputs.notional / min_depth)).clamp(0.0, 1.0)
    };

    // Inverted volatility: 0% vol scores 1, 5%+ scores 0.
    let volatility_score = (1.0 - inputs.volatility_pct / 5.0).clamp(0.0, 1.0);

    // Venue-class penalty, worst side counts; degraded quotes cost extra.
    let mut venue_penalty = f64::max(
        inputs.buy_model.confidence_penalty(),
        inputs.sell_model.confidence_penalty(),
    );
    if inputs.buy_quote.approximate || inputs.sell_quote.approximate {
        venue_penalty += 10.0;
    }
    if inputs.buy_quote.reduced_confidence || inputs.sell_quote.reduced_confidence {
        venue_penalty += 15.0;
    }
    let venue_score = (1.0 - venue_penalty / 50.0).clamp(0.0, 1.0);

    // Staleness of the older quote against the chain's freshness TTL.
    let staleness_score =
        (1.0 - inputs.staleness_ms as f64 / inputs.ttl_ms as f64).clamp(0.0, 1.0);

    let combined = weights.depth * depth_score
        + weights.volatility * volatility_score
        + weights.venue * venue_score
        + weights.staleness * staleness_score;

    (combined * 100.0).clamp(0.0, 100.0)
}

/// Fixed thresholds over (confidence, volatility, impact).
pub fn classify_risk(confidence: f64, volatility_pct: f64, impact_pct: f64) -> RiskClass {
    if confidence >= 75.0 && volatility_pct < 2.0 && impact_pct < 0.5 {
        RiskClass::Low
    } else if confidence >= 50.0 && volatility_pct < 5.0 && impact_pct < 1.5 {
        RiskClass::Medium
    } else {
        RiskClass::High
    }
}

fn decimal_to_f64(d: rust_decimal::Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChainId, VenueId};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn quote(depth: rust_decimal::Decimal) -> Quote {
        Quote {
            venue: VenueId::new(ChainId::Polygon, "quickswap"),
            pair_id: "USDT/WMATIC".into(),
            block_number: 1,
            sampled_at: Utc::now(),
            mid_price: dec!(0.89),
            buy_price: dec!(0.8924),
            sell_price: dec!(0.8941),
            depth,
            fee_bps: 30,
            approximate: false,
            reduced_confidence: false,
        }
    }

    fn inputs<'a>(buy: &'a Quote, sell: &'a Quote) -> ConfidenceInputs<'a> {
        ConfidenceInputs {
            buy_quote: buy,
            sell_quote: sell,
            notional: 1000.0,
            volatility_pct: 0.5,
            buy_model: PricingModel::ConstantProductV2,
            sell_model: PricingModel::ConstantProductV2,
            staleness_ms: 500,
            ttl_ms: 15_000,
        }
    }

    #[test]
    fn deep_calm_fresh_quotes_score_high() {
        let buy = quote(dec!(100000));
        let sell = quote(dec!(100000));
        let c = score(&inputs(&buy, &sell), &ConfidenceWeights::default());
        assert!(c >= 75.0, "confidence = {}", c);
    }

    #[test]
    fn thin_depth_drags_confidence_down() {
        let deep = quote(dec!(100000));
        let thin = quote(dec!(1100));
        let high = score(&inputs(&deep, &deep), &ConfidenceWeights::default());
        let low = score(&inputs(&thin, &thin), &ConfidenceWeights::default());
        assert!(low < high);
    }

    #[test]
    fn confidence_is_clamped() {
        let buy = quote(dec!(0));
        let mut i = inputs(&buy, &buy);
        i.volatility_pct = 50.0;
        i.staleness_ms = 60_000;
        let c = score(&i, &ConfidenceWeights::default());
        assert!((0.0..=100.0).contains(&c));
    }

    #[test]
    fn risk_thresholds_are_ordered() {
        assert_eq!(classify_risk(90.0, 0.5, 0.1), RiskClass::Low);
        assert_eq!(classify_risk(60.0, 3.0, 1.0), RiskClass::Medium);
        assert_eq!(classify_risk(40.0, 8.0, 3.0), RiskClass::High);
    }
}
