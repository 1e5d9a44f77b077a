//! Opportunity scanner: sampling, spread computation, candidate emission

pub mod confidence;
pub mod engine;
pub mod live;
pub mod spread;
pub mod volatility;

pub use confidence::*;
pub use engine::*;
pub use live::*;
pub use spread::*;
pub use volatility::*;
