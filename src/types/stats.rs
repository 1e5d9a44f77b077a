//! Portfolio statistics and alert types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::ChainId;

/// Aggregates served on `/api/stats` and snapshotted to the store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PortfolioStats {
    pub total_scans: u64,
    pub opportunities_found: u64,
    pub trades_executed: u64,
    pub successful_trades: u64,
    pub failed_trades: u64,
    pub total_profit_usd: Decimal,
    pub today_profit_usd: Decimal,
    pub gas_spent_usd: Decimal,
    pub win_rate: f64,
    pub avg_profit_usd: Decimal,
    pub sharpe_ratio: f64,
    pub max_drawdown_usd: Decimal,
    pub active_capital_usd: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub category: String,
    pub chain: Option<ChainId>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn chain_halted(chain: ChainId, message: impl Into<String>) -> Self {
        Self {
            severity: AlertSeverity::Critical,
            category: "chain".into(),
            chain: Some(chain),
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}
