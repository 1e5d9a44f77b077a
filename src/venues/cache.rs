//! Per-pool quote cache keyed by (pool, block, notional)
//!
//! Keying on the block number makes the TTL exactly one block: a new height
//! misses and refreshes. The notional is part of the key because effective
//! prices depend on trade size. Stale blocks are pruned by time so the map
//! stays bounded.

use alloy::primitives::Address;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::time::{Duration, Instant};

use crate::types::Quote;

const PRUNE_AFTER: Duration = Duration::from_secs(60);

pub struct QuoteCache {
    entries: DashMap<(Address, u64, Decimal), (Quote, Instant)>,
}

impl QuoteCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, pool: Address, block: u64, notional: Decimal) -> Option<Quote> {
        self.entries
            .get(&(pool, block, notional))
            .map(|entry| entry.value().0.clone())
    }

    pub fn insert(&self, pool: Address, block: u64, notional: Decimal, quote: Quote) {
        self.entries
            .insert((pool, block, notional), (quote, Instant::now()));
        if self.entries.len() > 4096 {
            self.prune();
        }
    }

    pub fn prune(&self) {
        self.entries
            .retain(|_, (_, inserted)| inserted.elapsed() < PRUNE_AFTER);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for QuoteCache {
    fn default() -> Self {
        Self::new()
    }
}
