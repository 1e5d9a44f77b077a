//! Multi-chain DEX arbitrage engine
//!
//! Continuously samples venue quotes across chains, ranks risk-adjusted
//! arbitrage candidates, optionally executes them atomically behind
//! flash-loan credit, and serves observers a live read model over HTTP and
//! WebSocket.

pub mod api;
pub mod config;
pub mod errors;
pub mod execution;
pub mod flashloan;
pub mod network;
pub mod ranking;
pub mod scanner;
pub mod state;
pub mod storage;
pub mod types;
pub mod utils;
pub mod venues;

// Re-export commonly used items
pub use config::Config;
pub use errors::{BotError, BotResult};
pub use state::AppState;
pub use types::*;

// Type alias for our concrete provider
pub type ConcreteProvider = alloy::providers::RootProvider<alloy::transports::BoxTransport>;
