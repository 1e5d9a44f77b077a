//! Venue identification and static registry types

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use super::ChainId;

/// Pricing model class a venue implements. Fixes which quote formula the
/// adapter applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PricingModel {
    ConstantProductV2,
    ConcentratedV3,
    StableCurve,
    WeightedPool,
}

impl PricingModel {
    /// Confidence penalty applied for less predictable venue classes.
    pub fn confidence_penalty(&self) -> f64 {
        match self {
            PricingModel::ConstantProductV2 => 0.0,
            PricingModel::ConcentratedV3 => 5.0,
            PricingModel::StableCurve => 8.0,
            PricingModel::WeightedPool => 10.0,
        }
    }
}

/// A venue is a DEX deployment on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VenueId {
    pub chain: ChainId,
    pub name: String,
}

impl VenueId {
    pub fn new(chain: ChainId, name: impl Into<String>) -> Self {
        Self {
            chain,
            name: name.into(),
        }
    }
}

/// Static venue descriptor from the registry: router plus the pinned pool
/// per pair id.
#[derive(Debug, Clone)]
pub struct VenueSpec {
    pub id: VenueId,
    pub model: PricingModel,
    pub fee_bps: u32,
    pub router: Address,
    /// (pair id, pool address) for every pinned pair this venue serves.
    pub pools: Vec<(String, Address)>,
    /// Normalized token weights, WeightedPool only (base weight, quote weight).
    pub weights: Option<(f64, f64)>,
    /// Coin indices inside the pool, StableCurve only (base index, quote index).
    pub coin_indices: Option<(u8, u8)>,
}

impl VenueSpec {
    pub fn pool_for(&self, pair_id: &str) -> Option<Address> {
        self.pools
            .iter()
            .find(|(id, _)| id == pair_id)
            .map(|(_, addr)| *addr)
    }
}
