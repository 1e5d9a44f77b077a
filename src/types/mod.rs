//! Core data types and structures

pub mod chain;
pub mod execution;
pub mod health;
pub mod opportunity;
pub mod plan;
pub mod quote;
pub mod stats;
pub mod tokens;
pub mod venue;

pub use chain::*;
pub use execution::*;
pub use health::*;
pub use opportunity::*;
pub use plan::*;
pub use quote::*;
pub use stats::*;
pub use tokens::*;
pub use venue::*;
