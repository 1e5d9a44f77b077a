//! Chain and endpoint health reporting types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::ChainId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndpointHealth {
    Healthy,
    Degraded,
    Down,
}

/// Per-chain health view served on `/api/chains`.
#[derive(Debug, Clone, Serialize)]
pub struct ChainHealthSnapshot {
    pub chain: ChainId,
    pub status: EndpointHealth,
    pub block_number: u64,
    pub gas_price_gwei: Decimal,
    pub gas_ceiling_exceeded: bool,
    pub healthy_endpoints: usize,
    pub degraded_endpoints: usize,
    pub scanning_paused: bool,
    pub last_check: DateTime<Utc>,
}
