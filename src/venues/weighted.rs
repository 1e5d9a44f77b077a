//! Weighted-pool venue adapter
//!
//! Spot price and outputs follow the weighted-mean formula with per-token
//! weights from the registry.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::constant_product::DEPTH_SLIPPAGE_CEILING;
use super::{encode_approve, pool_for, selector, swap_tokens, view_call, QuoteCache, VenueAdapter};
use crate::errors::{BotError, BotResult};
use crate::network::ChainClient;
use crate::types::{Call, Quote, SwapSide, TokenPair, VenueSpec};
use crate::utils::units_to_decimal;

const SWAP_DEADLINE_SECS: u64 = 1200;

/// `out = B_out · (1 − (B_in / (B_in + in·(1−fee)))^(w_in/w_out))`.
pub fn weighted_amount_out(
    amount_in: Decimal,
    balance_in: Decimal,
    weight_in: Decimal,
    balance_out: Decimal,
    weight_out: Decimal,
    fee_bps: u32,
) -> Decimal {
    let fee = Decimal::from(fee_bps) / dec!(10000);
    let effective_in = amount_in * (Decimal::ONE - fee);
    let ratio = balance_in / (balance_in + effective_in);
    let exponent = weight_in / weight_out;
    balance_out * (Decimal::ONE - ratio.powd(exponent))
}

/// Spot price of base in quote units: `(B_q / w_q) / (B_b / w_b)`.
pub fn weighted_spot_price(
    balance_base: Decimal,
    weight_base: Decimal,
    balance_quote: Decimal,
    weight_quote: Decimal,
) -> Decimal {
    (balance_quote / weight_quote) / (balance_base / weight_base)
}

pub struct WeightedAdapter {
    spec: &'static VenueSpec,
    client: Arc<ChainClient>,
    cache: Arc<QuoteCache>,
}

impl WeightedAdapter {
    pub fn new(spec: &'static VenueSpec, client: Arc<ChainClient>, cache: Arc<QuoteCache>) -> Self {
        Self {
            spec,
            client,
            cache,
        }
    }

    fn weights(&self) -> BotResult<(Decimal, Decimal)> {
        let (wb, wq) = self.spec.weights.ok_or_else(|| {
            BotError::Config(format!(
                "weighted venue {} is missing token weights",
                self.spec.id.name
            ))
        })?;
        let wb = Decimal::try_from(wb).map_err(|e| BotError::Config(e.to_string()))?;
        let wq = Decimal::try_from(wq).map_err(|e| BotError::Config(e.to_string()))?;
        Ok((wb, wq))
    }

    /// Pool token balances via `balanceOf(pool)` on each pair token.
    async fn balances(
        &self,
        pool: Address,
        pair: &TokenPair,
        block: u64,
    ) -> BotResult<(Decimal, Decimal)> {
        let balance_of = |holder: Address| {
            let mut data = selector("balanceOf(address)");
            data.extend_from_slice(&[0u8; 12]);
            data.extend_from_slice(holder.as_slice());
            data
        };

        let raw_base = self
            .client
            .call(&view_call(pair.base.address, balance_of(pool)), Some(block))
            .await?;
        let raw_quote = self
            .client
            .call(&view_call(pair.quote.address, balance_of(pool)), Some(block))
            .await?;
        if raw_base.len() < 32 || raw_quote.len() < 32 {
            return Err(BotError::NonRetryableTransport {
                chain: self.client.chain,
                message: "short balanceOf response".into(),
            });
        }

        let base = units_to_decimal(U256::from_be_slice(&raw_base[..32]), pair.base.decimals);
        let quote = units_to_decimal(U256::from_be_slice(&raw_quote[..32]), pair.quote.decimals);
        if base.is_zero() || quote.is_zero() {
            return Err(BotError::InsufficientLiquidity {
                context: format!("weighted pool {} holds a zero balance", pool),
            });
        }
        Ok((base, quote))
    }
}

#[async_trait]
impl VenueAdapter for WeightedAdapter {
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

        let (bal_base, bal_quote) = self.balances(pool, pair, block).await?;
        let (w_base, w_quote) = self.weights()?;
        let mid = weighted_spot_price(bal_base, w_base, bal_quote, w_quote);

        let out_quote = weighted_amount_out(
            reference_notional,
            bal_base,
            w_base,
            bal_quote,
            w_quote,
            self.spec.fee_bps,
        );
        let sell_price = out_quote / reference_notional;

        let quote_in = reference_notional * mid;
        let base_out = weighted_amount_out(
            quote_in,
            bal_quote,
            w_quote,
            bal_base,
            w_base,
            self.spec.fee_bps,
        );
        if base_out.is_zero() {
            return Err(BotError::InsufficientLiquidity {
                context: format!("weighted pool {} quoted zero output", pool),
            });
        }
        let buy_price = quote_in / base_out;

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
        let pool = pool_for(self.spec, pair)?;
        let vault = self.spec.router;

        let deadline = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| BotError::Fatal {
                message: format!("system clock before epoch: {}", e),
            })?
            .as_secs()
            + SWAP_DEADLINE_SECS;

        // Vault swap with the pool id derived from the pool address.
        let mut pool_id = [0u8; 32];
        pool_id[..20].copy_from_slice(pool.as_slice());

        let mut data = selector(
            "swap((bytes32,uint8,address,address,uint256,bytes),(address,bool,address,bool),uint256,uint256)",
        );
        // Head: offset to the dynamic SingleSwap tuple (7 words of head),
        // then the static FundManagement tuple, limit, deadline.
        data.extend_from_slice(&U256::from(224).to_be_bytes::<32>());
        // FundManagement: sender, fromInternalBalance, recipient, toInternalBalance.
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(recipient.as_slice());
        data.extend_from_slice(&U256::ZERO.to_be_bytes::<32>());
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(recipient.as_slice());
        data.extend_from_slice(&U256::ZERO.to_be_bytes::<32>());
        data.extend_from_slice(&min_amount_out.to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(deadline).to_be_bytes::<32>());
        // SingleSwap tail: poolId, kind (GIVEN_IN), assetIn, assetOut, amount, userData.
        data.extend_from_slice(&pool_id);
        data.extend_from_slice(&U256::ZERO.to_be_bytes::<32>());
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(token_in.as_slice());
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(token_out.as_slice());
        data.extend_from_slice(&amount_in.to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(192).to_be_bytes::<32>());
        data.extend_from_slice(&U256::ZERO.to_be_bytes::<32>());

        Ok(vec![
            encode_approve(token_in, vault, amount_in),
            Call {
                to: vault,
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
        let (bal_base, bal_quote) = self.balances(pool, pair, block).await?;
        let (w_base, w_quote) = self.weights()?;

        let mid = weighted_spot_price(bal_base, w_base, bal_quote, w_quote);
        let out = weighted_amount_out(amount_in, bal_base, w_base, bal_quote, w_quote, 0);
        let effective = out / amount_in;
        Ok(((mid - effective) / mid).max(Decimal::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_weights_reduce_to_constant_product() {
        let weighted = weighted_amount_out(dec!(10), dec!(1000), dec!(0.5), dec!(1000), dec!(0.5), 30);
        let v2 = super::super::constant_product::amount_out(dec!(10), dec!(1000), dec!(1000), 30);
        assert!((weighted - v2).abs() < dec!(0.0001), "{} vs {}", weighted, v2);
    }

    #[test]
    fn spot_price_respects_weights() {
        // 80/20 pool: spot = (B_q/0.2)/(B_b/0.8) = 4·B_q/B_b
        let spot = weighted_spot_price(dec!(1000), dec!(0.8), dec!(1000), dec!(0.2));
        assert_eq!(spot, dec!(4));
    }
}
