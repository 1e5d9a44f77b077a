//! Venue adapters: uniform quoting, swap building, and impact estimation
//!
//! Adapters are pure functions of on-chain reads plus the pair; the only
//! hidden state is a per-pool quote cache keyed by (pool, block) with a TTL
//! of one block.

pub mod cache;
pub mod concentrated;
pub mod constant_product;
pub mod stable_curve;
pub mod weighted;

pub use cache::QuoteCache;
pub use concentrated::ConcentratedAdapter;
pub use constant_product::ConstantProductAdapter;
pub use stable_curve::StableCurveAdapter;
pub use weighted::WeightedAdapter;

use alloy::primitives::{keccak256, Address, U256};
use alloy::rpc::types::eth::TransactionRequest;
use alloy::sol_types::SolValue;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::errors::{BotError, BotResult};
use crate::network::ChainClient;
use crate::types::{Call, PricingModel, Quote, SwapSide, TokenPair, VenueSpec};

/// The uniform contract every venue implements.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn spec(&self) -> &'static VenueSpec;

    /// Effective buy/sell prices for the reference notional (base units)
    /// after the pool's own fee, plus depth at the slippage ceiling. All
    /// reads are pinned to `block` so one tick observes one height.
    async fn quote_pair(
        &self,
        pair: &TokenPair,
        reference_notional: Decimal,
        block: u64,
    ) -> BotResult<Quote>;

    /// Low-level call(s) needed to execute the swap, approval included.
    fn build_swap(
        &self,
        pair: &TokenPair,
        side: SwapSide,
        amount_in: U256,
        min_amount_out: U256,
        recipient: Address,
    ) -> BotResult<Vec<Call>>;

    /// Relative price change induced by `amount_in` of base, as a fraction.
    async fn price_impact(
        &self,
        pair: &TokenPair,
        amount_in: Decimal,
        block: u64,
    ) -> BotResult<Decimal>;
}

/// Construct the adapter matching the venue's pricing model.
pub fn adapter_for(
    spec: &'static VenueSpec,
    client: Arc<ChainClient>,
    cache: Arc<QuoteCache>,
) -> Box<dyn VenueAdapter> {
    match spec.model {
        PricingModel::ConstantProductV2 => {
            Box::new(ConstantProductAdapter::new(spec, client, cache))
        }
        PricingModel::ConcentratedV3 => Box::new(ConcentratedAdapter::new(spec, client, cache)),
        PricingModel::StableCurve => Box::new(StableCurveAdapter::new(spec, client, cache)),
        PricingModel::WeightedPool => Box::new(WeightedAdapter::new(spec, client, cache)),
    }
}

pub(crate) fn selector(signature: &str) -> Vec<u8> {
    keccak256(signature.as_bytes())[..4].to_vec()
}

pub(crate) fn view_call(to: Address, data: Vec<u8>) -> TransactionRequest {
    TransactionRequest::default().to(to).input(data.into())
}

/// Resolve the pinned pool for `pair` or fail with a config-shaped error.
pub(crate) fn pool_for(spec: &VenueSpec, pair: &TokenPair) -> BotResult<Address> {
    spec.pool_for(&pair.id()).ok_or_else(|| {
        BotError::Config(format!(
            "venue {} has no pool pinned for {}",
            spec.id.name,
            pair.id()
        ))
    })
}

/// `token0()` of a V2-style pool, used to orient reserves against the pair.
pub(crate) async fn pool_token0(
    client: &ChainClient,
    pool: Address,
    block: u64,
) -> BotResult<Address> {
    let raw = client
        .call(&view_call(pool, selector("token0()")), Some(block))
        .await?;
    Address::abi_decode(&raw, true).map_err(|e| BotError::NonRetryableTransport {
        chain: client.chain,
        message: format!("failed to decode token0(): {}", e),
    })
}

/// ERC-20 approve + the venue swap call share this encoding.
pub(crate) fn encode_approve(token: Address, spender: Address, amount: U256) -> Call {
    let mut data = selector("approve(address,uint256)");
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(spender.as_slice());
    data.extend_from_slice(&amount.to_be_bytes::<32>());
    Call {
        to: token,
        data: data.into(),
        value: U256::ZERO,
    }
}

/// (token_in, token_out) for a swap side against the pair.
pub(crate) fn swap_tokens(pair: &TokenPair, side: SwapSide) -> (Address, Address) {
    match side {
        SwapSide::Buy => (pair.quote.address, pair.base.address),
        SwapSide::Sell => (pair.base.address, pair.quote.address),
    }
}
