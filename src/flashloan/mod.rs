//! Flash-loan provider choice, plan assembly, and simulation

pub mod planner;
pub mod providers;

pub use planner::*;
pub use providers::*;
