//! Execution engine: nonce allocation, submission state machine, settlement

pub mod engine;
pub mod nonce;
pub mod settlement;

pub use engine::*;
pub use nonce::*;
pub use settlement::*;
