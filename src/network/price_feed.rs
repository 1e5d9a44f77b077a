//! Native-token USD price feed
//!
//! Converts gas costs to USD. Prices come from a public ticker endpoint and
//! are cached briefly; a stale fallback is served when the fetch fails so a
//! feed hiccup does not stall scanning.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

use crate::errors::{BotError, BotResult};
use crate::types::ChainId;

const PRICE_TTL: Duration = Duration::from_secs(30);

fn ticker_symbol(chain: ChainId) -> &'static str {
    match chain {
        ChainId::Ethereum | ChainId::Arbitrum | ChainId::Base => "ETHUSDT",
        ChainId::Polygon => "MATICUSDT",
        ChainId::Bsc => "BNBUSDT",
        ChainId::Avalanche => "AVAXUSDT",
    }
}

struct CachedPrice {
    price: Decimal,
    fetched_at: Instant,
}

pub struct NativePriceFeed {
    client: reqwest::Client,
    cache: RwLock<HashMap<&'static str, CachedPrice>>,
}

impl NativePriceFeed {
    pub fn new() -> BotResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .map_err(|e| BotError::Fatal {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub async fn native_usd(&self, chain: ChainId) -> BotResult<Decimal> {
        let symbol = ticker_symbol(chain);

        if let Some(cached) = self.cache.read().await.get(symbol) {
            if cached.fetched_at.elapsed() < PRICE_TTL {
                return Ok(cached.price);
            }
        }

        match self.fetch(symbol).await {
            Ok(price) => {
                self.cache.write().await.insert(
                    symbol,
                    CachedPrice {
                        price,
                        fetched_at: Instant::now(),
                    },
                );
                Ok(price)
            }
            Err(e) => {
                // Serve the stale price rather than dropping the tick.
                if let Some(cached) = self.cache.read().await.get(symbol) {
                    warn!(symbol, error = %e, "price feed failed, using stale price");
                    return Ok(cached.price);
                }
                Err(e)
            }
        }
    }

    /// USD value of one unit of `symbol` when it appears as a pair's quote
    /// token. Stables are pegged at 1; wrapped natives use the ticker.
    pub async fn quote_usd(&self, symbol: &str, chain: ChainId) -> BotResult<Decimal> {
        match symbol {
            "USDT" | "USDC" | "USDbC" | "DAI" => Ok(Decimal::ONE),
            _ => self.native_usd(chain).await,
        }
    }

    async fn fetch(&self, symbol: &str) -> BotResult<Decimal> {
        let url = format!(
            "https://api.binance.com/api/v3/ticker/price?symbol={}",
            symbol
        );
        let response = self.client.get(&url).send().await.map_err(|e| {
            BotError::RetryableTransport {
                chain: ChainId::Ethereum,
                message: format!("price feed request failed: {}", e),
            }
        })?;

        if !response.status().is_success() {
            return Err(BotError::RetryableTransport {
                chain: ChainId::Ethereum,
                message: format!("price feed returned {}", response.status()),
            });
        }

        let json: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| BotError::NonRetryableTransport {
                    chain: ChainId::Ethereum,
                    message: format!("price feed body unreadable: {}", e),
                })?;

        let price_str = json["price"]
            .as_str()
            .ok_or_else(|| BotError::NonRetryableTransport {
                chain: ChainId::Ethereum,
                message: "missing 'price' field in ticker response".into(),
            })?;

        let price =
            Decimal::from_str(price_str).map_err(|e| BotError::NonRetryableTransport {
                chain: ChainId::Ethereum,
                message: format!("unparseable ticker price: {}", e),
            })?;

        if price <= dec!(0) {
            return Err(BotError::NonRetryableTransport {
                chain: ChainId::Ethereum,
                message: format!("ticker price out of range: {}", price),
            });
        }

        Ok(price)
    }
}
