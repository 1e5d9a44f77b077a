//! Execution records and the submission state machine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{ChainId, TradePlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionStatus {
    New,
    Planned,
    Simulated,
    Submitted,
    Pending,
    Confirmed,
    Reverted,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Confirmed
                | ExecutionStatus::Reverted
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
        )
    }

    /// Legal state-machine edges. `Confirmed -> Pending` is the reorg path.
    pub fn can_transition(from: ExecutionStatus, to: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (from, to),
            (New, Planned)
                | (Planned, Simulated)
                | (Simulated, Submitted)
                | (Submitted, Pending)
                | (Pending, Confirmed)
                | (Pending, Reverted)
                | (Pending, Failed)
                | (Submitted, Failed)
                | (Confirmed, Pending)
                | (New, Cancelled)
                | (Planned, Cancelled)
                | (Simulated, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::New => "new",
            ExecutionStatus::Planned => "planned",
            ExecutionStatus::Simulated => "simulated",
            ExecutionStatus::Submitted => "submitted",
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Confirmed => "confirmed",
            ExecutionStatus::Reverted => "reverted",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ExecutionStatus::New),
            "planned" => Ok(ExecutionStatus::Planned),
            "simulated" => Ok(ExecutionStatus::Simulated),
            "submitted" => Ok(ExecutionStatus::Submitted),
            "pending" => Ok(ExecutionStatus::Pending),
            "confirmed" => Ok(ExecutionStatus::Confirmed),
            "reverted" => Ok(ExecutionStatus::Reverted),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status: {}", other)),
        }
    }
}

/// One attempted trade. Created by the execution engine, transitions through
/// the state machine once, then is immutable history.
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub id: String,
    pub opportunity_id: String,
    pub chain: ChainId,
    pub pair: String,
    pub status: ExecutionStatus,
    #[serde(skip)]
    pub plan: Option<TradePlan>,
    pub nonce: Option<u64>,
    pub tx_hashes: Vec<String>,
    pub expected_profit_usd: Decimal,
    pub realized_profit_usd: Option<Decimal>,
    pub gas_used: Option<u64>,
    pub gas_price_gwei: Option<Decimal>,
    pub block_number: Option<u64>,
    pub revert_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn new(opportunity_id: String, chain: ChainId, pair: String, expected: Decimal) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            opportunity_id,
            chain,
            pair,
            status: ExecutionStatus::New,
            plan: None,
            nonce: None,
            tx_hashes: Vec::new(),
            expected_profit_usd: expected,
            realized_profit_usd: None,
            gas_used: None,
            gas_price_gwei: None,
            block_number: None,
            revert_reason: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutionStatus::*;
    use super::*;

    #[test]
    fn happy_path_is_legal() {
        let path = [New, Planned, Simulated, Submitted, Pending, Confirmed];
        for pair in path.windows(2) {
            assert!(
                ExecutionStatus::can_transition(pair[0], pair[1]),
                "{:?} -> {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn reorg_reopens_confirmed_only() {
        assert!(ExecutionStatus::can_transition(Confirmed, Pending));
        assert!(!ExecutionStatus::can_transition(Reverted, Pending));
        assert!(!ExecutionStatus::can_transition(Failed, Pending));
    }

    #[test]
    fn cancel_is_pre_submission_only() {
        assert!(ExecutionStatus::can_transition(Simulated, Cancelled));
        assert!(!ExecutionStatus::can_transition(Submitted, Cancelled));
        assert!(!ExecutionStatus::can_transition(Pending, Cancelled));
    }

    #[test]
    fn no_regressions() {
        assert!(!ExecutionStatus::can_transition(Pending, Submitted));
        assert!(!ExecutionStatus::can_transition(Confirmed, New));
    }
}
