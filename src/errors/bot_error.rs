//! Error taxonomy for the engine
//!
//! Recovery is local wherever possible; only `Fatal` surfaces globally.

use std::time::Duration;
use thiserror::Error;

use crate::types::ChainId;

#[derive(Error, Debug)]
pub enum BotError {
    /// RPC timeout, 5xx, connection reset. Retried internally with jittered
    /// exponential backoff before surfacing.
    #[error("retryable transport error on {chain}: {message}")]
    RetryableTransport { chain: ChainId, message: String },

    /// 4xx from RPC or malformed response. Never retried; the endpoint is
    /// marked Degraded.
    #[error("non-retryable transport error on {chain}: {message}")]
    NonRetryableTransport { chain: ChainId, message: String },

    #[error("deadline of {deadline:?} exceeded during {operation}")]
    DeadlineExceeded {
        operation: String,
        deadline: Duration,
    },

    /// Confirmation height regressed; the execution re-enters Pending.
    #[error("chain reorg on {chain}: confirmation depth regressed from {from} to {to}")]
    ChainReorg { chain: ChainId, from: u64, to: u64 },

    #[error("simulation reverted: {reason}")]
    SimulationRevert { reason: String },

    #[error("insufficient liquidity: {context}")]
    InsufficientLiquidity { context: String },

    /// Gas ceiling, position size, or cool-down violation.
    #[error("budget violation: {reason}")]
    Budget { reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    /// Store unwritable, signer unavailable, or all endpoints down past the
    /// fatal window. Halts the affected chain; other chains continue.
    #[error("fatal: {message}")]
    Fatal { message: String },
}

impl BotError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BotError::RetryableTransport { .. } | BotError::DeadlineExceeded { .. }
        )
    }

    pub fn retryable(chain: ChainId, message: impl Into<String>) -> Self {
        BotError::RetryableTransport {
            chain,
            message: message.into(),
        }
    }
}

pub type BotResult<T> = Result<T, BotError>;
