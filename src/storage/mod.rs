//! Durable store, retention, and the live-view cache

pub mod cache;
pub mod retention;
pub mod store;

pub use cache::*;
pub use retention::*;
pub use store::*;
