//! Pinned token, pair, and venue registry
//!
//! Pairs and pools are fixed at configuration time; the scanner never
//! discovers venues dynamically.

use alloy::primitives::{address, Address};
use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::types::{ChainId, PricingModel, Token, TokenPair, VenueId, VenueSpec};

fn token(symbol: &str, addr: Address, decimals: u8) -> Token {
    Token {
        address: addr,
        decimals,
        symbol: symbol.to_string(),
    }
}

fn venue(
    chain: ChainId,
    name: &str,
    model: PricingModel,
    fee_bps: u32,
    router: Address,
    pools: Vec<(&str, Address)>,
) -> VenueSpec {
    VenueSpec {
        id: VenueId::new(chain, name),
        model,
        fee_bps,
        router,
        pools: pools
            .into_iter()
            .map(|(pair, addr)| (pair.to_string(), addr))
            .collect(),
        weights: None,
        coin_indices: None,
    }
}

lazy_static! {
    /// Pinned trading pairs per chain.
    pub static ref PAIRS: HashMap<ChainId, Vec<TokenPair>> = {
        let weth = token("WETH", address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"), 18);
        let usdt = token("USDT", address!("dac17f958d2ee523a2206206994597c13d831ec7"), 6);
        let usdc = token("USDC", address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"), 6);
        let bal = token("BAL", address!("ba100000625a3754423978a60c9317c58a424e3d"), 18);

        let wmatic = token("WMATIC", address!("0d500b1d8e8ef31e21c99d1db9a6444d3adf1270"), 18);
        let usdt_poly = token("USDT", address!("c2132d05d31c914a87c6611c10748aeb04b58e8f"), 6);
        let usdc_poly = token("USDC", address!("2791bca1f2de4661ed88a30c99a7a9449aa84174"), 6);

        let weth_arb = token("WETH", address!("82af49447d8a07e3bd95bd0d56f35241523fbab1"), 18);
        let usdc_arb = token("USDC", address!("ff970a61a04b1ca14834a43f5de4533ebddb5cc8"), 6);

        let wbnb = token("WBNB", address!("bb4cdb9cbd36b01bd1cbaef60af814a3f6f0ee75"), 18);
        let usdt_bsc = token("USDT", address!("55d398326f99059ff775485246999027b3197955"), 18);

        let wavax = token("WAVAX", address!("b31f66aa3c1e785363f0875a1b74e27b85fd66c7"), 18);
        let usdc_avax = token("USDC", address!("b97ef9ef8734c71904d8002f8b6bc66dd9c48a6e"), 6);

        let weth_base = token("WETH", address!("4200000000000000000000000000000000000006"), 18);
        let usdc_base = token("USDC", address!("833589fcd6edb6e08f4c7c32d4f71b54bda02913"), 6);

        let mut m = HashMap::new();
        m.insert(ChainId::Ethereum, vec![
            TokenPair::new(weth.clone(), usdt.clone()),
            TokenPair::new(weth.clone(), usdc.clone()),
            TokenPair::new(usdc.clone(), usdt.clone()),
            TokenPair::new(bal, weth.clone()),
        ]);
        m.insert(ChainId::Polygon, vec![
            TokenPair::new(wmatic.clone(), usdt_poly),
            TokenPair::new(wmatic, usdc_poly),
        ]);
        m.insert(ChainId::Arbitrum, vec![TokenPair::new(weth_arb, usdc_arb)]);
        m.insert(ChainId::Bsc, vec![TokenPair::new(wbnb, usdt_bsc)]);
        m.insert(ChainId::Avalanche, vec![TokenPair::new(wavax, usdc_avax)]);
        m.insert(ChainId::Base, vec![TokenPair::new(weth_base, usdc_base)]);
        m
    };

    /// Configured venues per chain. Router addresses follow the upstream
    /// deployments; pool addresses pin one pool per served pair.
    pub static ref VENUES: HashMap<ChainId, Vec<VenueSpec>> = {
        let mut m = HashMap::new();

        m.insert(ChainId::Ethereum, vec![
            venue(
                ChainId::Ethereum,
                "uniswap_v2",
                PricingModel::ConstantProductV2,
                30,
                address!("7a250d5630b4cf539739df2c5dacb4c659f2488d"),
                vec![
                    ("USDT/WETH", address!("0d4a11d5eeaac28ec3f61d100daf4d40471f1852")),
                    ("USDC/WETH", address!("b4e16d0168e52d35cacd2c6185b44281ec28c9dc")),
                ],
            ),
            venue(
                ChainId::Ethereum,
                "sushiswap",
                PricingModel::ConstantProductV2,
                30,
                address!("d9e1ce17f2641f24ae83637ab66a2cca9c378b9f"),
                vec![
                    ("USDT/WETH", address!("06da0fd433c1a5d7a4faa01111c044910a184553")),
                    ("USDC/WETH", address!("397ff1542f962076d0bfe58ea045ffa2d347aca0")),
                ],
            ),
            venue(
                ChainId::Ethereum,
                "uniswap_v3",
                PricingModel::ConcentratedV3,
                5,
                address!("e592427a0aece92de3edee1f18e0157c05861564"),
                vec![
                    ("USDC/WETH", address!("88e6a0c2ddd26feeb64f039a2c41296fcb3f5640")),
                    ("USDT/WETH", address!("11b815efb8f581194ae79006d24e0d814b7697f6")),
                ],
            ),
            VenueSpec {
                coin_indices: Some((1, 2)),
                ..venue(
                    ChainId::Ethereum,
                    "curve",
                    PricingModel::StableCurve,
                    4,
                    address!("bebc44782c7db0a1a60cb6fe97d0b483032ff1c7"),
                    vec![("USDC/USDT", address!("bebc44782c7db0a1a60cb6fe97d0b483032ff1c7"))],
                )
            },
            VenueSpec {
                weights: Some((0.8, 0.2)),
                ..venue(
                    ChainId::Ethereum,
                    "balancer",
                    PricingModel::WeightedPool,
                    100,
                    address!("ba12222222228d8ba445958a75a0704d566bf2c8"),
                    vec![("BAL/WETH", address!("5c6ee304399dbdb9c8ef030ab642b10820db8f56"))],
                )
            },
        ]);

        m.insert(ChainId::Polygon, vec![
            venue(
                ChainId::Polygon,
                "quickswap",
                PricingModel::ConstantProductV2,
                30,
                address!("a5e0829caced8ffdd4de3c43696c57f7d7a678ff"),
                vec![
                    ("USDT/WMATIC", address!("604229c960e5cacf2aaeac8be68ac07ba9df81c3")),
                    ("USDC/WMATIC", address!("6e7a5fafcec6bb1e78bae2a1f0b612012bf14827")),
                ],
            ),
            venue(
                ChainId::Polygon,
                "sushiswap",
                PricingModel::ConstantProductV2,
                30,
                address!("1b02da8cb0d097eb8d57a175b88c7d8b47997506"),
                vec![("USDC/WMATIC", address!("cd353f79d9fade311fc3119b841e1f456b54e858"))],
            ),
            venue(
                ChainId::Polygon,
                "uniswap_v3",
                PricingModel::ConcentratedV3,
                5,
                address!("e592427a0aece92de3edee1f18e0157c05861564"),
                vec![("USDT/WMATIC", address!("9b08288c3be4f62bbf8d1c20ac9c5e6f9467d8b7"))],
            ),
        ]);

        m.insert(ChainId::Arbitrum, vec![
            venue(
                ChainId::Arbitrum,
                "sushiswap",
                PricingModel::ConstantProductV2,
                30,
                address!("1b02da8cb0d097eb8d57a175b88c7d8b47997506"),
                vec![("USDC/WETH", address!("905dfcd5649217c42684f23958568e533c711aa3"))],
            ),
            venue(
                ChainId::Arbitrum,
                "camelot",
                PricingModel::ConstantProductV2,
                30,
                address!("c873fecbd354f5a56e00e710b90ef4201db2448d"),
                vec![("USDC/WETH", address!("84652bb2539513baf36e225c930fdd8eaa63ce27"))],
            ),
            venue(
                ChainId::Arbitrum,
                "uniswap_v3",
                PricingModel::ConcentratedV3,
                5,
                address!("e592427a0aece92de3edee1f18e0157c05861564"),
                vec![("USDC/WETH", address!("c31e54c7a869b9fcbecc14363cf510d1c41fa443"))],
            ),
        ]);

        m.insert(ChainId::Bsc, vec![
            venue(
                ChainId::Bsc,
                "pancakeswap_v2",
                PricingModel::ConstantProductV2,
                25,
                address!("10ed43c718714eb63d5aa57b78b54704e256024e"),
                vec![("USDT/WBNB", address!("16b9a82891338f9ba80e2d6970fdda79d1eb0dae"))],
            ),
            venue(
                ChainId::Bsc,
                "pancakeswap_v3",
                PricingModel::ConcentratedV3,
                5,
                address!("1b81d678ffb9c0263b24a97847620c99d213eb14"),
                vec![("USDT/WBNB", address!("36696169c63e42cd08ce11f5deebbcebae652050"))],
            ),
        ]);

        m.insert(ChainId::Avalanche, vec![
            venue(
                ChainId::Avalanche,
                "traderjoe",
                PricingModel::ConstantProductV2,
                30,
                address!("60ae616a2155ee3d9a68541ba4544862310933d4"),
                vec![("USDC/WAVAX", address!("f4003f4efbe8691b60249e6afbd307abe7758adb"))],
            ),
            venue(
                ChainId::Avalanche,
                "pangolin",
                PricingModel::ConstantProductV2,
                30,
                address!("e54ca86531e17ef3616d22ca28b0d458b6c89106"),
                vec![("USDC/WAVAX", address!("0e0100ab771e9288e0aa97e11557e6654c3a9665"))],
            ),
        ]);

        m.insert(ChainId::Base, vec![
            venue(
                ChainId::Base,
                "aerodrome",
                PricingModel::ConstantProductV2,
                30,
                address!("cf77a3ba9a5ca399b7c97c74d54e5b1beb874e43"),
                vec![("USDC/WETH", address!("cdac0d6c6c59727a65f871236188350531885c43"))],
            ),
            venue(
                ChainId::Base,
                "uniswap_v3",
                PricingModel::ConcentratedV3,
                5,
                address!("e592427a0aece92de3edee1f18e0157c05861564"),
                vec![("USDC/WETH", address!("d0b53d9277642d899df5c87a3966a349a798f224"))],
            ),
        ]);

        m
    };

    /// Flash-loan pool providers per chain (Aave v3 style), with their fee in
    /// basis points. Zero-fee providers are preferred by the planner.
    pub static ref FLASH_PROVIDERS: HashMap<ChainId, Vec<(&'static str, Address, u32)>> = {
        let mut m = HashMap::new();
        m.insert(ChainId::Ethereum, vec![
            ("balancer_vault", address!("ba12222222228d8ba445958a75a0704d566bf2c8"), 0),
            ("aave_v3", address!("a97684ead0e402dc232d5a977953df7ecbab3cdb"), 5),
        ]);
        m.insert(ChainId::Polygon, vec![
            ("balancer_vault", address!("ba12222222228d8ba445958a75a0704d566bf2c8"), 0),
            ("aave_v3", address!("a97684ead0e402dc232d5a977953df7ecbab3cdb"), 5),
        ]);
        m.insert(ChainId::Arbitrum, vec![
            ("balancer_vault", address!("ba12222222228d8ba445958a75a0704d566bf2c8"), 0),
            ("aave_v3", address!("a97684ead0e402dc232d5a977953df7ecbab3cdb"), 5),
        ]);
        m.insert(ChainId::Bsc, vec![
            ("aave_v3", address!("ff75a4b698e3ec95e608ac0f22a03b8368e05f5d"), 5),
        ]);
        m.insert(ChainId::Avalanche, vec![
            ("aave_v3", address!("a97684ead0e402dc232d5a977953df7ecbab3cdb"), 5),
        ]);
        m.insert(ChainId::Base, vec![
            ("balancer_vault", address!("ba12222222228d8ba445958a75a0704d566bf2c8"), 0),
            ("aave_v3", address!("e20fcbdbffc4dd138ce8b2e6fbb6cb49777ad64d"), 5),
        ]);
        m
    };
}

pub fn pairs_for(chain: ChainId) -> &'static [TokenPair] {
    PAIRS.get(&chain).map(|v| v.as_slice()).unwrap_or(&[])
}

pub fn venues_for(chain: ChainId) -> &'static [VenueSpec] {
    VENUES.get(&chain).map(|v| v.as_slice()).unwrap_or(&[])
}

/// Venues on `chain` that serve `pair_id`.
pub fn venues_for_pair(chain: ChainId, pair_id: &str) -> Vec<&'static VenueSpec> {
    venues_for(chain)
        .iter()
        .filter(|v| v.pool_for(pair_id).is_some())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_chain_has_at_least_two_venues_per_pinned_pair() {
        for (chain, pairs) in PAIRS.iter() {
            for pair in pairs {
                let serving = venues_for_pair(*chain, &pair.id());
                assert!(
                    !serving.is_empty(),
                    "no venue serves {} on {}",
                    pair.id(),
                    chain
                );
            }
        }
    }

    #[test]
    fn weighted_venues_carry_weights() {
        for specs in VENUES.values() {
            for spec in specs {
                if spec.model == PricingModel::WeightedPool {
                    let (w0, w1) = spec.weights.expect("weighted pool without weights");
                    assert!((w0 + w1 - 1.0).abs() < 1e-9);
                }
            }
        }
    }
}
