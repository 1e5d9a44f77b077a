//! Engine configuration and environment variable handling

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use crate::errors::{BotError, BotResult};
use crate::types::{ChainId, RiskClass, ALL_CHAINS};

// Configuration bounds
pub const MIN_PROFIT_FLOOR_USD: Decimal = dec!(0.10);
pub const MAX_SLIPPAGE_TOLERANCE: Decimal = dec!(0.05);
pub const MAX_GAS_CEILING_GWEI: u32 = 2_000;
pub const MAX_POSITION_CEILING_USD: Decimal = dec!(1_000_000);

// Execution limits
pub const DEFAULT_EXECUTION_DEADLINE_SECS: u64 = 90;
pub const DEFAULT_MAX_REPLACEMENTS: u32 = 3;
pub const DEFAULT_GLOBAL_EXECUTION_CAP: usize = 4;
pub const DEFAULT_PAIR_COOLDOWN_SECS: u64 = 120;

/// Weights for the confidence score. Inputs are fixed (depth headroom,
/// inverted volatility, venue-class penalty, quote staleness); the exact
/// weights are configurable with these defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub depth: f64,
    pub volatility: f64,
    pub venue: f64,
    pub staleness: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            depth: 0.35,
            volatility: 0.30,
            venue: 0.20,
            staleness: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub min_profit_usd: Decimal,
    pub max_gas_price_gwei: u32,
    /// Slippage reserve as a fraction of gross profit.
    pub slippage_tolerance: Decimal,
    pub use_flash_loans: bool,
    /// Simulate but never broadcast.
    pub dry_run_mode: bool,
    pub max_position_size_usd: Decimal,
    /// Standardized trade size used when quoting across venues, in USD.
    pub reference_notional_usd: Decimal,
    pub min_confidence_auto: f64,
    pub auto_risk_allowlist: Vec<RiskClass>,
    pub pair_cooldown_secs: u64,
    pub execution_deadline_secs: u64,
    pub max_replacements: u32,
    pub global_execution_cap: usize,
    pub rpc_concurrency_per_chain: usize,
    pub endpoint_rate_limit_per_sec: u32,
    pub endpoint_cooldown_secs: u64,
    pub chain_down_fatal_secs: u64,
    pub confidence_weights: ConfidenceWeights,
    /// Comma-separated endpoint URLs per chain, from `<CHAIN>_RPC`.
    pub rpc_endpoints: HashMap<ChainId, Vec<String>>,
    pub database_url: String,
    pub api_bind: String,
    pub data_dir: String,
    /// Signer material stays out of band: read from the environment, never
    /// logged, never serialized onto the API.
    #[serde(skip_serializing)]
    pub private_key: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        let mut rpc_endpoints = HashMap::new();
        for chain in ALL_CHAINS {
            let key = format!("{}_RPC", chain.as_str().to_ascii_uppercase());
            if let Ok(urls) = env::var(&key) {
                let endpoints: Vec<String> = urls
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if !endpoints.is_empty() {
                    rpc_endpoints.insert(chain, endpoints);
                }
            }
        }

        Self {
            min_profit_usd: env::var("MIN_PROFIT_USD")
                .ok()
                .and_then(|s| Decimal::from_str(&s).ok())
                .unwrap_or(dec!(10))
                .max(MIN_PROFIT_FLOOR_USD),
            max_gas_price_gwei: env::var("MAX_GAS_PRICE_GWEI")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(150)
                .min(MAX_GAS_CEILING_GWEI),
            slippage_tolerance: env::var("SLIPPAGE_TOLERANCE")
                .ok()
                .and_then(|s| Decimal::from_str(&s).ok())
                .unwrap_or(dec!(0.005))
                .min(MAX_SLIPPAGE_TOLERANCE),
            use_flash_loans: env::var("USE_FLASH_LOANS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            dry_run_mode: env::var("DRY_RUN_MODE")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            max_position_size_usd: env::var("MAX_POSITION_SIZE")
                .ok()
                .and_then(|s| Decimal::from_str(&s).ok())
                .unwrap_or(dec!(50_000))
                .min(MAX_POSITION_CEILING_USD),
            reference_notional_usd: env::var("REFERENCE_NOTIONAL_USD")
                .ok()
                .and_then(|s| Decimal::from_str(&s).ok())
                .unwrap_or(dec!(10_000)),
            min_confidence_auto: env::var("MIN_CONFIDENCE_AUTO")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(75.0),
            auto_risk_allowlist: vec![RiskClass::Low, RiskClass::Medium],
            pair_cooldown_secs: env::var("PAIR_COOLDOWN_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PAIR_COOLDOWN_SECS),
            execution_deadline_secs: env::var("EXECUTION_DEADLINE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_EXECUTION_DEADLINE_SECS),
            max_replacements: DEFAULT_MAX_REPLACEMENTS,
            global_execution_cap: DEFAULT_GLOBAL_EXECUTION_CAP,
            rpc_concurrency_per_chain: env::var("RPC_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8),
            endpoint_rate_limit_per_sec: 20,
            endpoint_cooldown_secs: 30,
            chain_down_fatal_secs: 300,
            confidence_weights: ConfidenceWeights::default(),
            rpc_endpoints,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/db/arbnexus.db?mode=rwc".to_string()),
            api_bind: env::var("API_BIND").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            private_key: env::var("PRIVATE_KEY").ok(),
        }
    }

    pub fn validate(&self) -> BotResult<()> {
        if self.rpc_endpoints.is_empty() {
            return Err(BotError::Config(
                "no RPC endpoints configured; set at least one <CHAIN>_RPC".into(),
            ));
        }
        if self.slippage_tolerance < Decimal::ZERO {
            return Err(BotError::Config("SLIPPAGE_TOLERANCE must be >= 0".into()));
        }
        if self.reference_notional_usd <= Decimal::ZERO {
            return Err(BotError::Config("REFERENCE_NOTIONAL_USD must be > 0".into()));
        }
        if self.max_position_size_usd < self.reference_notional_usd {
            return Err(BotError::Config(
                "MAX_POSITION_SIZE must be >= REFERENCE_NOTIONAL_USD".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.min_confidence_auto) {
            return Err(BotError::Config(
                "MIN_CONFIDENCE_AUTO must be within [0, 100]".into(),
            ));
        }
        let w = &self.confidence_weights;
        let sum = w.depth + w.volatility + w.venue + w.staleness;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(BotError::Config(format!(
                "confidence weights must sum to 1.0, got {:.4}",
                sum
            )));
        }
        Ok(())
    }

    pub fn configured_chains(&self) -> Vec<ChainId> {
        ALL_CHAINS
            .into_iter()
            .filter(|c| self.rpc_endpoints.contains_key(c))
            .collect()
    }
}

/// Runtime update document accepted on `PUT /config`. Unrecognized keys are
/// rejected at deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ConfigPatch {
    pub min_profit_usd: Option<Decimal>,
    pub max_gas_price_gwei: Option<u32>,
    pub slippage_tolerance: Option<Decimal>,
    pub use_flash_loans: Option<bool>,
    pub dry_run_mode: Option<bool>,
    pub max_position_size: Option<Decimal>,
    pub min_confidence_auto: Option<f64>,
}

impl ConfigPatch {
    /// Apply onto a copy of the current config; the result is re-validated
    /// before it replaces the active revision.
    pub fn apply(&self, current: &Config) -> BotResult<Config> {
        let mut next = current.clone();
        if let Some(v) = self.min_profit_usd {
            next.min_profit_usd = v;
        }
        if let Some(v) = self.max_gas_price_gwei {
            next.max_gas_price_gwei = v;
        }
        if let Some(v) = self.slippage_tolerance {
            next.slippage_tolerance = v;
        }
        if let Some(v) = self.use_flash_loans {
            next.use_flash_loans = v;
        }
        if let Some(v) = self.dry_run_mode {
            next.dry_run_mode = v;
        }
        if let Some(v) = self.max_position_size {
            next.max_position_size_usd = v;
        }
        if let Some(v) = self.min_confidence_auto {
            next.min_confidence_auto = v;
        }
        next.validate()?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        let mut cfg = Config::load();
        cfg.rpc_endpoints
            .insert(ChainId::Polygon, vec!["http://localhost:8545".into()]);
        cfg
    }

    #[test]
    fn default_config_validates() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn unknown_patch_keys_are_rejected() {
        let raw = r#"{"MIN_PROFIT_USD": "5", "NOT_A_KEY": 1}"#;
        assert!(serde_json::from_str::<ConfigPatch>(raw).is_err());
    }

    #[test]
    fn patch_is_revalidated() {
        let cfg = base_config();
        let patch = ConfigPatch {
            max_position_size: Some(dec!(1)),
            ..Default::default()
        };
        assert!(patch.apply(&cfg).is_err());

        let patch = ConfigPatch {
            min_profit_usd: Some(dec!(25)),
            ..Default::default()
        };
        let next = patch.apply(&cfg).unwrap();
        assert_eq!(next.min_profit_usd, dec!(25));
    }
}
