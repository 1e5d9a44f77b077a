//! Flash-loan plan assembly and simulation
//!
//! Borrow the buy-side token, swap at the buy venue, swap back at the sell
//! venue for the repayment plus margin, repay within the provider callback.
//! Plans are simulated against the current block before anything is signed.

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{debug, info};

use super::providers::{choose_provider, providers_for};
use crate::config::Config;
use crate::errors::{BotError, BotResult};
use crate::network::ChainClient;
use crate::types::{Call, Opportunity, SwapSide, TokenPair, TradePlan};
use crate::utils::{decimal_to_units, pow10};
use crate::venues::{selector, VenueAdapter};

/// Repayment headroom demanded from the sell leg, beyond fee.
const REPAY_EPSILON: Decimal = dec!(0.0001);

pub const GAS_LIMIT_HEADROOM_NUM: u64 = 12;
pub const GAS_LIMIT_HEADROOM_DEN: u64 = 10;

pub struct FlashLoanPlanner {
    client: Arc<ChainClient>,
}

impl FlashLoanPlanner {
    pub fn new(client: Arc<ChainClient>) -> Self {
        Self { client }
    }

    /// Assemble the call bundle for `opp`. With `use_flash_loans` the swap
    /// steps are wrapped in a provider envelope; otherwise the plan runs on
    /// owned capital.
    pub async fn plan(
        &self,
        opp: &Opportunity,
        pair: &TokenPair,
        buy_adapter: &dyn VenueAdapter,
        sell_adapter: &dyn VenueAdapter,
        config: &Config,
        recipient: Address,
        block: u64,
    ) -> BotResult<TradePlan> {
        // The buy leg spends the quote token; that is what gets borrowed.
        let borrow_decimal = opp.notional * opp.buy.price;
        let borrow_amount = decimal_to_units(borrow_decimal, pair.quote.decimals);
        let notional_units = decimal_to_units(opp.notional, pair.base.decimals);

        let slippage_keep = Decimal::ONE - config.slippage_tolerance;
        let min_base_out = decimal_to_units(opp.notional * slippage_keep, pair.base.decimals);

        let mut calls: Vec<Call> = Vec::new();
        calls.extend(buy_adapter.build_swap(
            pair,
            SwapSide::Buy,
            borrow_amount,
            min_base_out,
            recipient,
        )?);

        let (envelope, provider_name, flash_fee_usd) = if config.use_flash_loans {
            let provider = choose_provider(
                opp.chain,
                &self.client,
                pair.quote.address,
                borrow_amount,
                block,
            )
            .await?;

            let fee_fraction = Decimal::from(provider.fee_bps) / dec!(10000);
            let repay = borrow_decimal * (Decimal::ONE + fee_fraction + REPAY_EPSILON);
            let min_quote_out = decimal_to_units(repay, pair.quote.decimals);

            calls.extend(sell_adapter.build_swap(
                pair,
                SwapSide::Sell,
                notional_units,
                min_quote_out,
                recipient,
            )?);

            let envelope = encode_flash_envelope(
                provider.address,
                recipient,
                pair.quote.address,
                borrow_amount,
                buy_adapter.spec().router,
                sell_adapter.spec().router,
                pair.base.address,
            );

            // Fee in USD via the opportunity's notional pricing.
            let quote_usd = if opp.notional_usd.is_zero() || borrow_decimal.is_zero() {
                Decimal::ONE
            } else {
                opp.notional_usd / borrow_decimal
            };
            (
                Some(envelope),
                Some(provider.name.to_string()),
                borrow_decimal * fee_fraction * quote_usd,
            )
        } else {
            let repay = borrow_decimal * (Decimal::ONE + REPAY_EPSILON);
            let min_quote_out = decimal_to_units(repay, pair.quote.decimals);
            calls.extend(sell_adapter.build_swap(
                pair,
                SwapSide::Sell,
                notional_units,
                min_quote_out,
                recipient,
            )?);
            (None, None, Decimal::ZERO)
        };

        debug!(
            chain = %opp.chain,
            pair = %opp.pair,
            provider = provider_name.as_deref().unwrap_or("owned-capital"),
            steps = calls.len(),
            "assembled trade plan"
        );

        Ok(TradePlan {
            chain: opp.chain,
            calls,
            envelope,
            borrow_amount,
            flash_provider: provider_name,
            flash_fee_usd,
            gas_limit: None,
        })
    }

    /// Replay each step via `eth_call` against `block` and size the gas
    /// limit at simulated gas × 1.2. Any reverting step rejects the plan.
    pub async fn simulate(&self, plan: &mut TradePlan, from: Address, block: u64) -> BotResult<()> {
        let mut total_gas: u64 = 0;

        for (index, call) in plan.calls.iter().enumerate() {
            let tx = alloy::rpc::types::eth::TransactionRequest::default()
                .from(from)
                .to(call.to)
                .value(call.value)
                .input(call.data.clone().into());

            self.client.call(&tx, Some(block)).await.map_err(|e| match e {
                BotError::SimulationRevert { reason } => BotError::SimulationRevert {
                    reason: format!("step {} reverted: {}", index, reason),
                },
                other => other,
            })?;

            total_gas += self.client.estimate_gas(&tx).await.unwrap_or(150_000);
        }

        plan.gas_limit = Some(total_gas * GAS_LIMIT_HEADROOM_NUM / GAS_LIMIT_HEADROOM_DEN);
        info!(
            chain = %plan.chain,
            gas_limit = plan.gas_limit,
            "plan simulation succeeded"
        );
        Ok(())
    }

    /// Eligibility predicate used by the scanner: flash loans enabled and at
    /// least one provider configured for the chain.
    pub fn eligible(config: &Config, chain: crate::types::ChainId) -> bool {
        config.use_flash_loans && !providers_for(chain).is_empty()
    }
}

/// Aave-style `flashLoanSimple(receiver, asset, amount, params, referralCode)`
/// with the two routers and the counter token packed into `params` for the
/// receiver callback.
fn encode_flash_envelope(
    provider: Address,
    receiver: Address,
    asset: Address,
    amount: U256,
    buy_router: Address,
    sell_router: Address,
    counter_token: Address,
) -> Call {
    let mut data = selector("flashLoanSimple(address,address,uint256,bytes,uint16)");
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(receiver.as_slice());
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(asset.as_slice());
    data.extend_from_slice(&amount.to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(160).to_be_bytes::<32>());
    data.extend_from_slice(&U256::ZERO.to_be_bytes::<32>());
    // params: abi.encode(buy_router, sell_router, counter_token)
    data.extend_from_slice(&U256::from(96).to_be_bytes::<32>());
    for addr in [buy_router, sell_router, counter_token] {
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(addr.as_slice());
    }

    Call {
        to: provider,
        data: data.into(),
        value: U256::ZERO,
    }
}

/// USD value of the flash fee for a borrow, without building a plan.
pub fn flash_fee_usd(borrow_usd: Decimal, fee_bps: u32) -> Decimal {
    borrow_usd * Decimal::from(fee_bps) / pow10(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn envelope_targets_the_provider_with_the_flash_selector() {
        let call = encode_flash_envelope(
            address!("a97684ead0e402dc232d5a977953df7ecbab3cdb"),
            address!("0000000000000000000000000000000000000001"),
            address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"),
            U256::from(1_000_000u64),
            address!("7a250d5630b4cf539739df2c5dacb4c659f2488d"),
            address!("d9e1ce17f2641f24ae83637ab66a2cca9c378b9f"),
            address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
        );
        assert_eq!(
            call.to,
            address!("a97684ead0e402dc232d5a977953df7ecbab3cdb")
        );
        assert_eq!(
            &call.data[..4],
            &selector("flashLoanSimple(address,address,uint256,bytes,uint16)")[..]
        );
        assert_eq!(call.value, U256::ZERO);
    }

    #[test]
    fn flash_fee_is_linear_in_bps() {
        assert_eq!(flash_fee_usd(dec!(10000), 5), dec!(5));
        assert_eq!(flash_fee_usd(dec!(10000), 0), dec!(0));
    }
}
