//! StableSwap venue adapter
//!
//! Newton-iterates the stable invariant. Iterations are capped; a quote that
//! does not converge is still emitted but flagged approximate.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use super::constant_product::DEPTH_SLIPPAGE_CEILING;
use super::{encode_approve, pool_for, selector, swap_tokens, view_call, QuoteCache, VenueAdapter};
use crate::errors::{BotError, BotResult};
use crate::network::ChainClient;
use crate::types::{Call, Quote, SwapSide, TokenPair, VenueSpec};
use crate::utils::units_to_decimal;

pub const MAX_NEWTON_ITERS: u32 = 32;
const CONVERGENCE_EPS: Decimal = dec!(0.0000000001);

/// Invariant D for a two-coin pool, Newton-iterated. Returns (D, converged).
pub fn invariant_d(x: Decimal, y: Decimal, amp: Decimal) -> (Decimal, bool) {
    let s = x + y;
    if s.is_zero() {
        return (Decimal::ZERO, true);
    }
    let ann = amp * dec!(4);
    let mut d = s;
    for _ in 0..MAX_NEWTON_ITERS {
        let d_p = d * d * d / (dec!(4) * x * y);
        let d_next = (ann * s + dec!(2) * d_p) * d / ((ann - Decimal::ONE) * d + dec!(3) * d_p);
        if (d_next - d).abs() <= CONVERGENCE_EPS {
            return (d_next, true);
        }
        d = d_next;
    }
    (d, false)
}

/// New out-coin balance given the new in-coin balance, holding D. Returns
/// (y, converged).
pub fn solve_y(x_new: Decimal, d: Decimal, amp: Decimal) -> (Decimal, bool) {
    let ann = amp * dec!(4);
    let c = d * d * d / (dec!(4) * x_new * ann);
    let b = x_new + d / ann;
    let mut y = d;
    for _ in 0..MAX_NEWTON_ITERS {
        let y_next = (y * y + c) / (dec!(2) * y + b - d);
        if (y_next - y).abs() <= CONVERGENCE_EPS {
            return (y_next, true);
        }
        y = y_next;
    }
    (y, false)
}

/// Output for `amount_in` against balances (x, y). Returns (out, converged).
pub fn stable_amount_out(
    amount_in: Decimal,
    balance_in: Decimal,
    balance_out: Decimal,
    amp: Decimal,
    fee_bps: u32,
) -> (Decimal, bool) {
    let (d, d_ok) = invariant_d(balance_in, balance_out, amp);
    let (y_new, y_ok) = solve_y(balance_in + amount_in, d, amp);
    let gross_out = (balance_out - y_new).max(Decimal::ZERO);
    let fee = Decimal::from(fee_bps) / dec!(10000);
    (gross_out * (Decimal::ONE - fee), d_ok && y_ok)
}

pub struct StableCurveAdapter {
    spec: &'static VenueSpec,
    client: Arc<ChainClient>,
    cache: Arc<QuoteCache>,
}

impl StableCurveAdapter {
    pub fn new(spec: &'static VenueSpec, client: Arc<ChainClient>, cache: Arc<QuoteCache>) -> Self {
        Self {
            spec,
            client,
            cache,
        }
    }

    fn indices(&self) -> (u8, u8) {
        self.spec.coin_indices.unwrap_or((0, 1))
    }

    async fn word(&self, pool: Address, data: Vec<u8>, block: u64) -> BotResult<U256> {
        let raw = self.client.call(&view_call(pool, data), Some(block)).await?;
        if raw.len() < 32 {
            return Err(BotError::NonRetryableTransport {
                chain: self.client.chain,
                message: "short response from stable pool".into(),
            });
        }
        Ok(U256::from_be_slice(&raw[..32]))
    }

    async fn balances_and_amp(
        &self,
        pool: Address,
        pair: &TokenPair,
        block: u64,
    ) -> BotResult<(Decimal, Decimal, Decimal)> {
        let (i, j) = self.indices();
        let bal_call = |idx: u8| {
            let mut data = selector("balances(uint256)");
            data.extend_from_slice(&U256::from(idx).to_be_bytes::<32>());
            data
        };

        let raw_base = self.word(pool, bal_call(i), block).await?;
        let raw_quote = self.word(pool, bal_call(j), block).await?;
        let amp_raw = self.word(pool, selector("A()"), block).await?;

        if raw_base.is_zero() || raw_quote.is_zero() {
            return Err(BotError::InsufficientLiquidity {
                context: format!("stable pool {} has an empty coin balance", pool),
            });
        }

        Ok((
            units_to_decimal(raw_base, pair.base.decimals),
            units_to_decimal(raw_quote, pair.quote.decimals),
            units_to_decimal(amp_raw, 0),
        ))
    }
}

#[async_trait]
impl VenueAdapter for StableCurveAdapter {
    fn spec(&self) -> &'static VenueSpec {
        self.spec
    }

    async fn quote_pair(
        &self,
        pair: &TokenPair,
        reference_notional: Decimal,
        block: u64,
    ) -> BotResult<Quote> {
        let pool = pool_for(self.spec, pair)?;
        if let Some(cached) = self.cache.get(pool, block, reference_notional) {
            return Ok(cached);
        }

        let (bal_base, bal_quote, amp) = self.balances_and_amp(pool, pair, block).await?;

        // Marginal price from an epsilon probe so the mid reflects the curve
        // at the current point.
        let probe = bal_base * dec!(0.000001);
        let (probe_out, _) = stable_amount_out(probe, bal_base, bal_quote, amp, 0);
        let mid = probe_out / probe;

        let (out_quote, sell_ok) =
            stable_amount_out(reference_notional, bal_base, bal_quote, amp, self.spec.fee_bps);
        let sell_price = out_quote / reference_notional;

        // Buying base: spend quote, receive base; price = quote in per base out.
        let quote_in_estimate = reference_notional * mid;
        let (base_out, buy_ok) = stable_amount_out(
            quote_in_estimate,
            bal_quote,
            bal_base,
            amp,
            self.spec.fee_bps,
        );
        if base_out.is_zero() {
            return Err(BotError::InsufficientLiquidity {
                context: format!("stable pool {} quoted zero output", pool),
            });
        }
        let buy_price = quote_in_estimate / base_out;

        let quote = Quote {
            venue: self.spec.id.clone(),
            pair_id: pair.id(),
            block_number: block,
            sampled_at: Utc::now(),
            mid_price: mid,
            buy_price,
            sell_price,
            depth: bal_base * DEPTH_SLIPPAGE_CEILING,
            fee_bps: self.spec.fee_bps,
            approximate: !(sell_ok && buy_ok),
            reduced_confidence: false,
        };
        self.cache.insert(pool, block, reference_notional, quote.clone());
        Ok(quote)
    }

    fn build_swap(
        &self,
        pair: &TokenPair,
        side: SwapSide,
        amount_in: U256,
        min_amount_out: U256,
        _recipient: Address,
    ) -> BotResult<Vec<Call>> {
        let (token_in, _) = swap_tokens(pair, side);
        let (base_idx, quote_idx) = self.indices();
        let (i, j) = match side {
            SwapSide::Buy => (quote_idx, base_idx),
            SwapSide::Sell => (base_idx, quote_idx),
        };

        let mut data = selector("exchange(int128,int128,uint256,uint256)");
        data.extend_from_slice(&U256::from(i).to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(j).to_be_bytes::<32>());
        data.extend_from_slice(&amount_in.to_be_bytes::<32>());
        data.extend_from_slice(&min_amount_out.to_be_bytes::<32>());

        Ok(vec![
            encode_approve(token_in, self.spec.router, amount_in),
            Call {
                to: self.spec.router,
                data: data.into(),
                value: U256::ZERO,
            },
        ])
    }

    async fn price_impact(
        &self,
        pair: &TokenPair,
        amount_in: Decimal,
        block: u64,
    ) -> BotResult<Decimal> {
        let pool = pool_for(self.spec, pair)?;
        let (bal_base, bal_quote, amp) = self.balances_and_amp(pool, pair, block).await?;

        let probe = bal_base * dec!(0.000001);
        let (probe_out, _) = stable_amount_out(probe, bal_base, bal_quote, amp, 0);
        let mid = probe_out / probe;
        let (out, _) = stable_amount_out(amount_in, bal_base, bal_quote, amp, 0);
        let effective = out / amount_in;
        Ok(((mid - effective) / mid).max(Decimal::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_pool_trades_near_par() {
        // A deep, balanced stable pool with high amplification trades ~1:1.
        let (out, converged) =
            stable_amount_out(dec!(1000), dec!(1_000_000), dec!(1_000_000), dec!(100), 4);
        assert!(converged);
        assert!(out > dec!(995) && out < dec!(1000), "out = {}", out);
    }

    #[test]
    fn imbalanced_pool_penalizes_the_heavy_side() {
        let (balanced, _) =
            stable_amount_out(dec!(1000), dec!(1_000_000), dec!(1_000_000), dec!(100), 0);
        let (imbalanced, _) =
            stable_amount_out(dec!(1000), dec!(1_900_000), dec!(100_000), dec!(100), 0);
        assert!(imbalanced < balanced);
    }

    #[test]
    fn invariant_holds_under_solve_y() {
        let amp = dec!(100);
        let (d, ok) = invariant_d(dec!(500_000), dec!(500_000), amp);
        assert!(ok);
        let (y, ok) = solve_y(dec!(600_000), d, amp);
        assert!(ok);
        // Re-deriving D from the new balances lands on the same invariant.
        let (d2, _) = invariant_d(dec!(600_000), y, amp);
        assert!((d2 - d).abs() / d < dec!(0.000001));
    }
}
