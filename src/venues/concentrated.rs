//! Concentrated-liquidity (V3) venue adapter
//!
//! Quotes against the pool's current active-tick liquidity via virtual
//! reserves. This is a single-tick approximation: when the in-tick depth is
//! below the reference notional the quote is flagged reduced-confidence.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::constant_product::{amount_in, amount_out, impact, DEPTH_SLIPPAGE_CEILING};
use super::{encode_approve, pool_for, pool_token0, selector, swap_tokens, view_call, QuoteCache, VenueAdapter};
use crate::errors::{BotError, BotResult};
use crate::network::ChainClient;
use crate::types::{Call, Quote, SwapSide, TokenPair, VenueSpec};
use crate::utils::units_to_decimal;

const SWAP_DEADLINE_SECS: u64 = 1200;

struct TickState {
    /// Virtual base reserve within the active tick, scaled to base decimals.
    base_virtual: Decimal,
    /// Virtual quote reserve within the active tick, scaled to quote decimals.
    quote_virtual: Decimal,
}

pub struct ConcentratedAdapter {
    spec: &'static VenueSpec,
    client: Arc<ChainClient>,
    cache: Arc<QuoteCache>,
}

impl ConcentratedAdapter {
    pub fn new(spec: &'static VenueSpec, client: Arc<ChainClient>, cache: Arc<QuoteCache>) -> Self {
        Self {
            spec,
            client,
            cache,
        }
    }

    async fn word(&self, pool: Address, sig: &str, block: u64) -> BotResult<U256> {
        let raw = self
            .client
            .call(&view_call(pool, selector(sig)), Some(block))
            .await?;
        if raw.len() < 32 {
            return Err(BotError::NonRetryableTransport {
                chain: self.client.chain,
                message: format!("short response from {}", sig),
            });
        }
        Ok(U256::from_be_slice(&raw[..32]))
    }

    /// Virtual reserves at the current price: x = L·2^96/√P, y = L·√P/2^96.
    async fn tick_state(
        &self,
        pool: Address,
        pair: &TokenPair,
        block: u64,
    ) -> BotResult<TickState> {
        let sqrt_price_x96 = self.word(pool, "slot0()", block).await?;
        let liquidity = self.word(pool, "liquidity()", block).await?;

        if liquidity.is_zero() || sqrt_price_x96.is_zero() {
            return Err(BotError::InsufficientLiquidity {
                context: format!("pool {} has no active-tick liquidity", pool),
            });
        }

        let q96 = U256::from(1u8) << 96;
        let x_virtual_raw = liquidity
            .checked_mul(q96)
            .ok_or_else(|| BotError::NonRetryableTransport {
                chain: self.client.chain,
                message: "overflow computing virtual reserves".into(),
            })?
            / sqrt_price_x96;
        let y_virtual_raw = liquidity * sqrt_price_x96 / q96;

        let token0 = pool_token0(&self.client, pool, block).await?;
        let (raw_base, raw_quote, base_dec, quote_dec) = if token0 == pair.base.address {
            (x_virtual_raw, y_virtual_raw, pair.base.decimals, pair.quote.decimals)
        } else {
            (y_virtual_raw, x_virtual_raw, pair.base.decimals, pair.quote.decimals)
        };

        Ok(TickState {
            base_virtual: units_to_decimal(raw_base, base_dec),
            quote_virtual: units_to_decimal(raw_quote, quote_dec),
        })
    }
}

#[async_trait]
impl VenueAdapter for ConcentratedAdapter {
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

        let state = self.tick_state(pool, pair, block).await?;
        let mid = state.quote_virtual / state.base_virtual;

        let out_quote = amount_out(
            reference_notional,
            state.base_virtual,
            state.quote_virtual,
            self.spec.fee_bps,
        );
        let sell_price = out_quote / reference_notional;
        let in_quote = amount_in(
            reference_notional,
            state.quote_virtual,
            state.base_virtual,
            self.spec.fee_bps,
        )?;
        let buy_price = in_quote / reference_notional;

        let depth = state.base_virtual * DEPTH_SLIPPAGE_CEILING;

        let quote = Quote {
            venue: self.spec.id.clone(),
            pair_id: pair.id(),
            block_number: block,
            sampled_at: Utc::now(),
            mid_price: mid,
            buy_price,
            sell_price,
            depth,
            fee_bps: self.spec.fee_bps,
            approximate: false,
            reduced_confidence: depth < reference_notional,
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

        // exactInputSingle with all-static struct members encoded inline.
        let mut data = selector(
            "exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160))",
        );
        for addr in [token_in, token_out] {
            data.extend_from_slice(&[0u8; 12]);
            data.extend_from_slice(addr.as_slice());
        }
        data.extend_from_slice(&U256::from(self.spec.fee_bps * 100).to_be_bytes::<32>());
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(recipient.as_slice());
        data.extend_from_slice(&U256::from(deadline).to_be_bytes::<32>());
        data.extend_from_slice(&amount_in.to_be_bytes::<32>());
        data.extend_from_slice(&min_amount_out.to_be_bytes::<32>());
        data.extend_from_slice(&U256::ZERO.to_be_bytes::<32>());

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
        let state = self.tick_state(pool, pair, block).await?;
        Ok(impact(
            amount_in,
            state.base_virtual,
            state.quote_virtual,
            self.spec.fee_bps,
        ))
    }
}
