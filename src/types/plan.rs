//! Venue-agnostic call plans produced by the flash-loan planner
//!
//! The engine never constructs EVM bytecode itself; adapters emit the call
//! data and the planner sequences it.

use alloy::primitives::{Address, Bytes, U256};
use rust_decimal::Decimal;
use serde::Serialize;

use super::ChainId;

/// A single low-level contract call.
#[derive(Debug, Clone, Serialize)]
pub struct Call {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// Which side of the pair a swap moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SwapSide {
    /// Spend quote token, receive base token.
    Buy,
    /// Spend base token, receive quote token.
    Sell,
}

/// Ordered call bundle for one arbitrage attempt, optionally wrapped in a
/// flash-loan envelope.
#[derive(Debug, Clone, Serialize)]
pub struct TradePlan {
    pub chain: ChainId,
    /// Swap steps in execution order, used for simulation and for
    /// owned-capital execution.
    pub calls: Vec<Call>,
    /// Flash-loan wrapper that gets broadcast instead of the raw steps when
    /// the plan borrows.
    pub envelope: Option<Call>,
    /// Borrowed amount in the buy-side token's smallest units; zero when the
    /// trade runs on owned capital.
    pub borrow_amount: U256,
    pub flash_provider: Option<String>,
    pub flash_fee_usd: Decimal,
    /// Simulated gas × 1.2, set after a successful simulation.
    pub gas_limit: Option<u64>,
}

impl TradePlan {
    pub fn uses_flash_loan(&self) -> bool {
        self.flash_provider.is_some()
    }
}
