//! Constant-product (x·y=k) venue adapter

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolValue;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{encode_approve, pool_for, pool_token0, selector, swap_tokens, view_call, QuoteCache, VenueAdapter};
use crate::errors::{BotError, BotResult};
use crate::network::ChainClient;
use crate::types::{Call, Quote, SwapSide, TokenPair, VenueSpec};
use crate::utils::units_to_decimal;

/// Price-move ceiling at which quoted depth is measured.
pub const DEPTH_SLIPPAGE_CEILING: Decimal = dec!(0.01);

const SWAP_DEADLINE_SECS: u64 = 1200;

/// New output-side reserve after swapping `amount_in`:
/// `y' = y·x / (x + amount_in·(1−fee))`.
pub fn new_reserve_out(
    amount_in: Decimal,
    reserve_in: Decimal,
    reserve_out: Decimal,
    fee_bps: u32,
) -> Decimal {
    let fee = Decimal::from(fee_bps) / dec!(10000);
    let effective_in = amount_in * (Decimal::ONE - fee);
    reserve_out * reserve_in / (reserve_in + effective_in)
}

pub fn amount_out(
    amount_in: Decimal,
    reserve_in: Decimal,
    reserve_out: Decimal,
    fee_bps: u32,
) -> Decimal {
    reserve_out - new_reserve_out(amount_in, reserve_in, reserve_out, fee_bps)
}

/// Input required for a desired output, rounded up by the caller's slippage
/// margin rather than an explicit +1.
pub fn amount_in(
    amount_out: Decimal,
    reserve_in: Decimal,
    reserve_out: Decimal,
    fee_bps: u32,
) -> BotResult<Decimal> {
    if amount_out >= reserve_out {
        return Err(BotError::InsufficientLiquidity {
            context: format!(
                "requested {} exceeds pool reserve {}",
                amount_out, reserve_out
            ),
        });
    }
    let fee = Decimal::from(fee_bps) / dec!(10000);
    Ok(reserve_in * amount_out / ((reserve_out - amount_out) * (Decimal::ONE - fee)))
}

/// `impact = 1 − (y'·x) / (y·(x + amount_in))`.
pub fn impact(amount_in: Decimal, reserve_in: Decimal, reserve_out: Decimal, fee_bps: u32) -> Decimal {
    let y_new = new_reserve_out(amount_in, reserve_in, reserve_out, fee_bps);
    Decimal::ONE - (y_new * reserve_in) / (reserve_out * (reserve_in + amount_in))
}

pub struct ConstantProductAdapter {
    spec: &'static VenueSpec,
    client: Arc<ChainClient>,
    cache: Arc<QuoteCache>,
}

impl ConstantProductAdapter {
    pub fn new(spec: &'static VenueSpec, client: Arc<ChainClient>, cache: Arc<QuoteCache>) -> Self {
        Self {
            spec,
            client,
            cache,
        }
    }

    /// Reserves oriented to (base, quote), scaled by token decimals.
    async fn reserves(
        &self,
        pool: Address,
        pair: &TokenPair,
        block: u64,
    ) -> BotResult<(Decimal, Decimal)> {
        let raw = self
            .client
            .call(&view_call(pool, selector("getReserves()")), Some(block))
            .await?;
        let (r0, r1, _ts) = <(U256, U256, U256)>::abi_decode(&raw, true).map_err(|e| {
            BotError::NonRetryableTransport {
                chain: self.client.chain,
                message: format!("failed to decode getReserves(): {}", e),
            }
        })?;

        if r0.is_zero() || r1.is_zero() {
            return Err(BotError::InsufficientLiquidity {
                context: format!("pool {} has zero reserves", pool),
            });
        }

        let token0 = pool_token0(&self.client, pool, block).await?;
        let (raw_base, raw_quote) = if token0 == pair.base.address {
            (r0, r1)
        } else {
            (r1, r0)
        };
        Ok((
            units_to_decimal(raw_base, pair.base.decimals),
            units_to_decimal(raw_quote, pair.quote.decimals),
        ))
    }
}

#[async_trait]
impl VenueAdapter for ConstantProductAdapter {
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

        let (r_base, r_quote) = self.reserves(pool, pair, block).await?;
        let mid = r_quote / r_base;

        let out_quote = amount_out(reference_notional, r_base, r_quote, self.spec.fee_bps);
        let sell_price = out_quote / reference_notional;
        let in_quote = amount_in(reference_notional, r_quote, r_base, self.spec.fee_bps)?;
        let buy_price = in_quote / reference_notional;

        let quote = Quote {
            venue: self.spec.id.clone(),
            pair_id: pair.id(),
            block_number: block,
            sampled_at: Utc::now(),
            mid_price: mid,
            buy_price,
            sell_price,
            depth: r_base * DEPTH_SLIPPAGE_CEILING,
            fee_bps: self.spec.fee_bps,
            approximate: false,
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
        recipient: Address,
    ) -> BotResult<Vec<Call>> {
        let (token_in, token_out) = swap_tokens(pair, side);
        let router = self.spec.router;

        let deadline = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| BotError::Fatal {
                message: format!("system clock before epoch: {}", e),
            })?
            .as_secs()
            + SWAP_DEADLINE_SECS;

        let mut data =
            selector("swapExactTokensForTokens(uint256,uint256,address[],address,uint256)");
        data.extend_from_slice(&amount_in.to_be_bytes::<32>());
        data.extend_from_slice(&min_amount_out.to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(160).to_be_bytes::<32>());
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(recipient.as_slice());
        data.extend_from_slice(&U256::from(deadline).to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(2u8).to_be_bytes::<32>());
        for addr in [token_in, token_out] {
            data.extend_from_slice(&[0u8; 12]);
            data.extend_from_slice(addr.as_slice());
        }

        Ok(vec![
            encode_approve(token_in, router, amount_in),
            Call {
                to: router,
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
        let (r_base, r_quote) = self.reserves(pool, pair, block).await?;
        Ok(impact(amount_in, r_base, r_quote, self.spec.fee_bps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_out_matches_constant_product() {
        // 10 in against 1000/1000 at 30 bps: 9.97 effective, out ≈ 9.8716
        let out = amount_out(dec!(10), dec!(1000), dec!(1000), 30);
        assert_eq!(out.round_dp(4), dec!(9.8716));
    }

    #[test]
    fn amount_in_inverts_amount_out() {
        let out = amount_out(dec!(10), dec!(1000), dec!(1000), 30);
        let back = amount_in(out, dec!(1000), dec!(1000), 30).unwrap();
        assert!((back - dec!(10)).abs() < dec!(0.000001));
    }

    #[test]
    fn impact_grows_with_size() {
        let small = impact(dec!(1), dec!(1000), dec!(1000), 30);
        let large = impact(dec!(100), dec!(1000), dec!(1000), 30);
        assert!(large > small);
        assert!(small > Decimal::ZERO);
    }

    #[test]
    fn oversized_request_is_rejected() {
        assert!(amount_in(dec!(1000), dec!(1000), dec!(1000), 30).is_err());
    }
}
