//! Gas price tracking with EMA smoothing
//!
//! EIP-1559 chains derive the next base fee and a median priority fee from
//! `eth_feeHistory`. Legacy chains use `eth_gasPrice` as both the effective
//! price and the fee cap, with a zero priority fee.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::errors::{BotError, BotResult};
use crate::network::client::ChainClient;
use crate::types::ChainId;
use crate::utils::wei_to_gwei;

#[derive(Debug, Clone)]
pub struct GasSample {
    pub chain: ChainId,
    pub base_fee_gwei: Decimal,
    pub priority_fee_gwei: Decimal,
    /// EMA-smoothed effective price used for cost estimates and the ceiling
    /// check.
    pub smoothed_gwei: Decimal,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    pub sampled_at: DateTime<Utc>,
}

pub struct GasTracker {
    chain: ChainId,
    client: Arc<ChainClient>,
    alpha: Decimal,
    state: RwLock<Option<GasSample>>,
}

impl GasTracker {
    pub fn new(chain: ChainId, client: Arc<ChainClient>) -> Self {
        let alpha = Decimal::try_from(chain.metadata().gas_ema_alpha).unwrap_or(Decimal::ONE);
        Self {
            chain,
            client,
            alpha,
            state: RwLock::new(None),
        }
    }

    pub async fn sample(&self) -> BotResult<GasSample> {
        let meta = self.chain.metadata();
        let (base_wei, priority_wei) = if meta.eip1559 {
            self.eip1559_fees().await?
        } else {
            (self.client.raw_gas_price().await?, 0)
        };

        let effective_gwei = wei_to_gwei(base_wei + priority_wei);
        let previous = self.state.read().await.as_ref().map(|s| s.smoothed_gwei);
        let smoothed = match previous {
            Some(prev) => self.alpha * effective_gwei + (Decimal::ONE - self.alpha) * prev,
            None => effective_gwei,
        };

        let sample = GasSample {
            chain: self.chain,
            base_fee_gwei: wei_to_gwei(base_wei),
            priority_fee_gwei: wei_to_gwei(priority_wei),
            smoothed_gwei: smoothed,
            max_fee_per_gas: base_wei + priority_wei,
            max_priority_fee_per_gas: priority_wei,
            sampled_at: Utc::now(),
        };
        *self.state.write().await = Some(sample.clone());
        Ok(sample)
    }

    async fn eip1559_fees(&self) -> BotResult<(u128, u128)> {
        let history = self.client.fee_history().await?;
        let last_base = history
            .base_fee_per_gas
            .last()
            .copied()
            .ok_or_else(|| BotError::retryable(self.chain, "empty base fee history"))?;
        // Worst-case next-block base fee.
        let next_base = (last_base * 1125) / 1000;

        let priority = match &history.reward {
            Some(rewards) if !rewards.is_empty() => {
                let mut sum = 0u128;
                let mut count = 0u128;
                for block_reward in rewards {
                    if let Some(r) = block_reward.first() {
                        sum += *r;
                        count += 1;
                    }
                }
                if count > 0 {
                    sum / count
                } else {
                    2_000_000_000
                }
            }
            _ => 2_000_000_000,
        };

        Ok((next_base, priority))
    }

    pub async fn latest(&self) -> Option<GasSample> {
        self.state.read().await.clone()
    }

    /// Smoothed gwei, or the fresh sample when none is cached yet.
    pub async fn current_gwei(&self) -> BotResult<Decimal> {
        if let Some(sample) = self.latest().await {
            return Ok(sample.smoothed_gwei);
        }
        Ok(self.sample().await?.smoothed_gwei)
    }
}

/// USD cost of the chain's fixed gas budget at `gas_gwei`.
pub fn gas_cost_usd(chain: ChainId, gas_gwei: Decimal, native_usd: Decimal) -> Decimal {
    let units = Decimal::from(chain.metadata().gas_units_budget);
    units * gas_gwei * Decimal::new(1, 9) * native_usd
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn gas_cost_scales_with_budget_and_price() {
        // 450k units at 30 gwei with ETH at $3200: 0.0135 ETH = $43.20
        let cost = gas_cost_usd(ChainId::Ethereum, dec!(30), dec!(3200));
        assert_eq!(cost, dec!(43.20));
    }
}
