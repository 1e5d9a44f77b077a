//! Flash-loan provider selection
//!
//! Preference order: zero-fee provider first, then the cheapest fee among
//! providers with sufficient liquidity in the borrow token.

use alloy::primitives::{Address, U256};

use crate::config::registry::FLASH_PROVIDERS;
use crate::errors::{BotError, BotResult};
use crate::network::ChainClient;
use crate::types::ChainId;
use crate::venues::{selector, view_call};

#[derive(Debug, Clone)]
pub struct FlashProvider {
    pub name: &'static str,
    pub address: Address,
    pub fee_bps: u32,
}

pub fn providers_for(chain: ChainId) -> Vec<FlashProvider> {
    FLASH_PROVIDERS
        .get(&chain)
        .map(|list| {
            let mut providers: Vec<FlashProvider> = list
                .iter()
                .map(|(name, address, fee_bps)| FlashProvider {
                    name,
                    address: *address,
                    fee_bps: *fee_bps,
                })
                .collect();
            providers.sort_by_key(|p| p.fee_bps);
            providers
        })
        .unwrap_or_default()
}

/// Cheapest fee available on the chain, used by the scanner's eligibility
/// predicate before a concrete plan exists.
pub fn cheapest_fee_bps(chain: ChainId) -> Option<u32> {
    providers_for(chain).first().map(|p| p.fee_bps)
}

/// Pick the best provider holding at least `amount` of `token`.
pub async fn choose_provider(
    chain: ChainId,
    client: &ChainClient,
    token: Address,
    amount: U256,
    block: u64,
) -> BotResult<FlashProvider> {
    let candidates = providers_for(chain);
    if candidates.is_empty() {
        return Err(BotError::InsufficientLiquidity {
            context: format!("no flash-loan provider configured for {}", chain),
        });
    }

    for provider in candidates {
        let mut data = selector("balanceOf(address)");
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(provider.address.as_slice());

        let raw = client.call(&view_call(token, data), Some(block)).await?;
        if raw.len() >= 32 {
            let liquidity = U256::from_be_slice(&raw[..32]);
            if liquidity >= amount {
                return Ok(provider);
            }
        }
    }

    Err(BotError::InsufficientLiquidity {
        context: format!(
            "no provider on {} holds the requested borrow amount",
            chain
        ),
    })
}
