//! Price quotes sampled from venues

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::VenueId;

/// One venue's view of a pair at a block. Quotes live only inside the
/// scanner window and are never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    pub venue: VenueId,
    pub pair_id: String,
    pub block_number: u64,
    pub sampled_at: DateTime<Utc>,
    /// Mid price of base in quote units.
    pub mid_price: Decimal,
    /// Effective price paid when buying base with the reference notional,
    /// after the pool's own fee.
    pub buy_price: Decimal,
    /// Effective price received when selling base at the reference notional.
    pub sell_price: Decimal,
    /// Depth available within the configured slippage ceiling, in base units.
    pub depth: Decimal,
    pub fee_bps: u32,
    /// Set when a StableCurve quote did not converge within the iteration cap.
    pub approximate: bool,
    /// Set when a ConcentratedV3 quote fell back to single-tick math with
    /// insufficient next-tick depth.
    pub reduced_confidence: bool,
}

impl Quote {
    /// Age of the quote relative to `now`, in milliseconds.
    pub fn staleness_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.sampled_at).num_milliseconds().max(0)
    }
}
