//! Chain identifiers and static per-chain metadata

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of networks the engine scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainId {
    Ethereum,
    Polygon,
    Arbitrum,
    Bsc,
    Avalanche,
    Base,
}

pub const ALL_CHAINS: [ChainId; 6] = [
    ChainId::Ethereum,
    ChainId::Polygon,
    ChainId::Arbitrum,
    ChainId::Bsc,
    ChainId::Avalanche,
    ChainId::Base,
];

/// Static metadata pinned per chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainMetadata {
    /// Numeric EVM chain id used when signing.
    pub chain_id: u64,
    pub gas_symbol: &'static str,
    pub block_time_ms: u64,
    pub finality_depth: u64,
    pub eip1559: bool,
    /// Scan cadence for the opportunity scanner.
    pub scan_interval_ms: u64,
    /// Live-view freshness TTL for opportunities on this chain.
    pub freshness_ttl_ms: u64,
    /// Fixed gas budget (units) assumed for a two-leg arbitrage.
    pub gas_units_budget: u64,
    /// EMA smoothing factor for the gas tracker.
    pub gas_ema_alpha: f64,
}

impl ChainId {
    pub fn metadata(&self) -> &'static ChainMetadata {
        match self {
            ChainId::Ethereum => &ChainMetadata {
                chain_id: 1,
                gas_symbol: "ETH",
                block_time_ms: 12_000,
                finality_depth: 12,
                eip1559: true,
                scan_interval_ms: 5_000,
                freshness_ttl_ms: 30_000,
                gas_units_budget: 450_000,
                gas_ema_alpha: 0.3,
            },
            ChainId::Polygon => &ChainMetadata {
                chain_id: 137,
                gas_symbol: "MATIC",
                block_time_ms: 2_000,
                finality_depth: 64,
                eip1559: true,
                scan_interval_ms: 1_500,
                freshness_ttl_ms: 15_000,
                gas_units_budget: 420_000,
                gas_ema_alpha: 0.4,
            },
            ChainId::Arbitrum => &ChainMetadata {
                chain_id: 42161,
                gas_symbol: "ETH",
                block_time_ms: 250,
                finality_depth: 20,
                eip1559: true,
                scan_interval_ms: 1_000,
                freshness_ttl_ms: 10_000,
                gas_units_budget: 900_000,
                gas_ema_alpha: 0.5,
            },
            ChainId::Bsc => &ChainMetadata {
                chain_id: 56,
                gas_symbol: "BNB",
                block_time_ms: 3_000,
                finality_depth: 15,
                eip1559: false,
                scan_interval_ms: 2_000,
                freshness_ttl_ms: 15_000,
                gas_units_budget: 420_000,
                gas_ema_alpha: 0.4,
            },
            ChainId::Avalanche => &ChainMetadata {
                chain_id: 43114,
                gas_symbol: "AVAX",
                block_time_ms: 2_000,
                finality_depth: 1,
                eip1559: true,
                scan_interval_ms: 1_500,
                freshness_ttl_ms: 15_000,
                gas_units_budget: 420_000,
                gas_ema_alpha: 0.4,
            },
            ChainId::Base => &ChainMetadata {
                chain_id: 8453,
                gas_symbol: "ETH",
                block_time_ms: 2_000,
                finality_depth: 10,
                eip1559: true,
                scan_interval_ms: 1_500,
                freshness_ttl_ms: 15_000,
                gas_units_budget: 500_000,
                gas_ema_alpha: 0.4,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainId::Ethereum => "ethereum",
            ChainId::Polygon => "polygon",
            ChainId::Arbitrum => "arbitrum",
            ChainId::Bsc => "bsc",
            ChainId::Avalanche => "avalanche",
            ChainId::Base => "base",
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethereum" => Ok(ChainId::Ethereum),
            "polygon" => Ok(ChainId::Polygon),
            "arbitrum" => Ok(ChainId::Arbitrum),
            "bsc" => Ok(ChainId::Bsc),
            "avalanche" => Ok(ChainId::Avalanche),
            "base" => Ok(ChainId::Base),
            other => Err(format!("unknown chain: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_chain_parses_its_own_name() {
        for chain in ALL_CHAINS {
            assert_eq!(chain.as_str().parse::<ChainId>().unwrap(), chain);
        }
    }

    #[test]
    fn legacy_chains_are_flagged() {
        assert!(!ChainId::Bsc.metadata().eip1559);
        assert!(ChainId::Ethereum.metadata().eip1559);
    }
}
