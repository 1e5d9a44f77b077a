//! Chain client pool: typed RPC access, endpoint health, retries, rate limits

pub mod client;
pub mod endpoints;
pub mod gas;
pub mod price_feed;
pub mod retry;

pub use client::*;
pub use endpoints::*;
pub use gas::*;
pub use price_feed::*;
pub use retry::*;
