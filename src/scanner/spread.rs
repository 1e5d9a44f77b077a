//! Spread computation: quotes in, candidate opportunities out
//!
//! Pure over its inputs so the whole candidate path is testable without a
//! chain behind it.

use chrono::Utc;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::collections::VecDeque;

use super::confidence::{classify_risk, score, ConfidenceInputs};
use crate::config::ConfidenceWeights;
use crate::types::{
    stable_id, ChainId, Opportunity, PricingModel, Quote, TradeSide,
};
use crate::utils::spread_bps;

pub struct SpreadContext<'a> {
    pub chain: ChainId,
    pub pair_id: String,
    /// Reference notional in base units, before depth capping.
    pub reference_notional: Decimal,
    /// USD value of one quote-token unit (1 for USD-pegged quotes).
    pub quote_usd: Decimal,
    pub gas_cost_usd: Decimal,
    /// Slippage reserve as a fraction of gross profit.
    pub slippage_tolerance: Decimal,
    /// Cheapest available flash fee in bps, None when flash loans are off or
    /// no provider serves the chain.
    pub flash_fee_bps: Option<u32>,
    pub min_profit_usd: Decimal,
    pub volatility_pct: f64,
    pub weights: &'a ConfidenceWeights,
}

fn model_of(quote: &Quote, models: &[(String, PricingModel)]) -> PricingModel {
    models
        .iter()
        .find(|(name, _)| *name == quote.venue.name)
        .map(|(_, m)| *m)
        .unwrap_or(PricingModel::ConstantProductV2)
}

/// Every ordered venue pair with sell > buy becomes a candidate; those that
/// clear `min_profit_usd` after gas, slippage reserve, and flash fee are
/// returned.
pub fn compute_candidates(
    quotes: &[Quote],
    models: &[(String, PricingModel)],
    ctx: &SpreadContext<'_>,
) -> Vec<Opportunity> {
    let mut out = Vec::new();
    if quotes.len() < 2 {
        return out;
    }

    let now = Utc::now();
    let ttl_ms = ctx.chain.metadata().freshness_ttl_ms;

    for buy_quote in quotes {
        for sell_quote in quotes {
            if buy_quote.venue == sell_quote.venue {
                continue;
            }
            if sell_quote.sell_price <= buy_quote.buy_price {
                continue;
            }

            let notional = ctx
                .reference_notional
                .min(buy_quote.depth)
                .min(sell_quote.depth);
            if notional <= Decimal::ZERO {
                continue;
            }

            let gross_usd =
                notional * (sell_quote.sell_price - buy_quote.buy_price) * ctx.quote_usd;
            let slippage_reserve_usd = gross_usd * ctx.slippage_tolerance;
            let flash_fee_usd = match ctx.flash_fee_bps {
                Some(bps) => {
                    let borrow_usd = notional * buy_quote.buy_price * ctx.quote_usd;
                    borrow_usd * Decimal::from(bps) / dec!(10000)
                }
                None => Decimal::ZERO,
            };
            let net_usd = gross_usd - ctx.gas_cost_usd - slippage_reserve_usd - flash_fee_usd;
            if net_usd < ctx.min_profit_usd {
                continue;
            }

            let staleness_ms = buy_quote
                .staleness_ms(now)
                .max(sell_quote.staleness_ms(now));
            let confidence = score(
                &ConfidenceInputs {
                    buy_quote,
                    sell_quote,
                    notional: notional.to_f64().unwrap_or(0.0),
                    volatility_pct: ctx.volatility_pct,
                    buy_model: model_of(buy_quote, models),
                    sell_model: model_of(sell_quote, models),
                    staleness_ms,
                    ttl_ms,
                },
                ctx.weights,
            );

            // Impact estimated from how far the effective prices sit off mid.
            let impact_pct = estimate_impact_pct(buy_quote, sell_quote);
            let risk = classify_risk(confidence, ctx.volatility_pct, impact_pct);

            let mut trend = VecDeque::new();
            trend.push_back(sell_quote.sell_price);

            out.push(Opportunity {
                id: stable_id(
                    &ctx.pair_id,
                    &buy_quote.venue.name,
                    &sell_quote.venue.name,
                    ctx.chain,
                    now,
                ),
                chain: ctx.chain,
                pair: ctx.pair_id.clone(),
                buy: TradeSide {
                    venue: buy_quote.venue.name.clone(),
                    price: buy_quote.buy_price,
                },
                sell: TradeSide {
                    venue: sell_quote.venue.name.clone(),
                    price: sell_quote.sell_price,
                },
                spread_bps: spread_bps(buy_quote.buy_price, sell_quote.sell_price),
                notional,
                notional_usd: notional * buy_quote.buy_price * ctx.quote_usd,
                gross_profit_usd: gross_usd,
                gas_cost_usd: ctx.gas_cost_usd,
                slippage_reserve_usd,
                flash_fee_usd,
                net_profit_usd: net_usd,
                confidence,
                risk,
                flash_loan_eligible: ctx.flash_fee_bps.is_some(),
                trend,
                volatility_pct: ctx.volatility_pct,
                impact_pct,
                freshness: now,
                rejection: None,
            });
        }
    }

    out
}

fn estimate_impact_pct(buy_quote: &Quote, sell_quote: &Quote) -> f64 {
    let buy_off = if buy_quote.mid_price.is_zero() {
        Decimal::ZERO
    } else {
        (buy_quote.buy_price - buy_quote.mid_price).abs() / buy_quote.mid_price
    };
    let sell_off = if sell_quote.mid_price.is_zero() {
        Decimal::ZERO
    } else {
        (sell_quote.mid_price - sell_quote.sell_price).abs() / sell_quote.mid_price
    };
    (buy_off.max(sell_off) * dec!(100)).to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VenueId;

    fn quote(venue: &str, buy: Decimal, sell: Decimal, depth: Decimal) -> Quote {
        Quote {
            venue: VenueId::new(ChainId::Polygon, venue),
            pair_id: "USDT/WMATIC".into(),
            block_number: 77,
            sampled_at: Utc::now(),
            mid_price: (buy + sell) / dec!(2),
            buy_price: buy,
            sell_price: sell,
            depth,
            fee_bps: 30,
            approximate: false,
            reduced_confidence: false,
        }
    }

    fn ctx(weights: &ConfidenceWeights) -> SpreadContext<'_> {
        SpreadContext {
            chain: ChainId::Polygon,
            pair_id: "USDT/WMATIC".into(),
            reference_notional: dec!(41560),
            quote_usd: dec!(1),
            gas_cost_usd: dec!(12.80),
            slippage_tolerance: dec!(0.0474),
            flash_fee_bps: None,
            min_profit_usd: dec!(10),
            volatility_pct: 0.4,
            weights,
        }
    }

    #[test]
    fn polygon_two_venue_spread_emits_expected_net() {
        let weights = ConfidenceWeights::default();
        let quotes = vec![
            quote("quickswap", dec!(0.8924), dec!(0.8920), dec!(100000)),
            quote("sushiswap", dec!(0.8945), dec!(0.8941), dec!(100000)),
        ];
        let models = vec![
            ("quickswap".to_string(), PricingModel::ConstantProductV2),
            ("sushiswap".to_string(), PricingModel::ConstantProductV2),
        ];
        let candidates = compute_candidates(&quotes, &models, &ctx(&weights));
        assert_eq!(candidates.len(), 1);

        let opp = &candidates[0];
        assert_eq!(opp.buy.venue, "quickswap");
        assert_eq!(opp.sell.venue, "sushiswap");
        // gross = 41560 × (0.8941 − 0.8924) = 70.652; net ≈ 54.50 after
        // $12.80 gas and the slippage reserve.
        assert!(
            (opp.net_profit_usd - dec!(54.50)).abs() < dec!(0.10),
            "net = {}",
            opp.net_profit_usd
        );
        assert!(opp.confidence >= 75.0, "confidence = {}", opp.confidence);
        assert!(opp.profit_identity_holds());
    }

    #[test]
    fn notional_is_capped_by_lesser_depth() {
        let weights = ConfidenceWeights::default();
        let quotes = vec![
            quote("quickswap", dec!(0.80), dec!(0.79), dec!(100000)),
            quote("sushiswap", dec!(0.90), dec!(0.89), dec!(5000)),
        ];
        let models = vec![];
        let candidates = compute_candidates(&quotes, &models, &ctx(&weights));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].notional, dec!(5000));
    }

    #[test]
    fn sub_minimum_profit_is_not_emitted() {
        let weights = ConfidenceWeights::default();
        // 1 bp spread cannot clear $12.80 gas at this size.
        let quotes = vec![
            quote("quickswap", dec!(0.8924), dec!(0.8923), dec!(1000)),
            quote("sushiswap", dec!(0.8926), dec!(0.8925), dec!(1000)),
        ];
        let candidates = compute_candidates(&quotes, &[], &ctx(&weights));
        assert!(candidates.is_empty());
    }

    #[test]
    fn flash_fee_enters_the_identity() {
        let weights = ConfidenceWeights::default();
        let quotes = vec![
            quote("quickswap", dec!(0.80), dec!(0.79), dec!(100000)),
            quote("sushiswap", dec!(0.90), dec!(0.89), dec!(100000)),
        ];
        let mut context = ctx(&weights);
        context.flash_fee_bps = Some(5);
        let candidates = compute_candidates(&quotes, &[], &context);
        assert_eq!(candidates.len(), 1);
        let opp = &candidates[0];
        assert!(opp.flash_fee_usd > Decimal::ZERO);
        assert!(opp.profit_identity_holds());
    }

    #[test]
    fn single_venue_yields_nothing() {
        let weights = ConfidenceWeights::default();
        let quotes = vec![quote("quickswap", dec!(0.89), dec!(0.90), dec!(1000))];
        assert!(compute_candidates(&quotes, &[], &ctx(&weights)).is_empty());
    }
}
