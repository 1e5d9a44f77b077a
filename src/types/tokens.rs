//! Token and trading-pair definitions
//!
//! Pairs are pinned at configuration time; there is no dynamic discovery.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    pub decimals: u8,
    pub symbol: String,
}

/// An unordered pair of tokens. The configured order (base, quote) is kept
/// for display, but equality and the pair id ignore it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenPair {
    pub base: Token,
    pub quote: Token,
}

impl TokenPair {
    pub fn new(base: Token, quote: Token) -> Self {
        Self { base, quote }
    }

    /// Canonical pair id, e.g. `WETH/USDT`. Symbols are sorted so that both
    /// orderings of the same two tokens produce the same id.
    pub fn id(&self) -> String {
        let (a, b) = if self.base.symbol <= self.quote.symbol {
            (&self.base.symbol, &self.quote.symbol)
        } else {
            (&self.quote.symbol, &self.base.symbol)
        };
        format!("{}/{}", a, b)
    }

    /// Display id in configured order, e.g. `WETH/USDT`.
    pub fn display(&self) -> String {
        format!("{}/{}", self.base.symbol, self.quote.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn tok(sym: &str, dec: u8) -> Token {
        Token {
            address: address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
            decimals: dec,
            symbol: sym.to_string(),
        }
    }

    #[test]
    fn pair_id_is_order_independent() {
        let a = TokenPair::new(tok("WETH", 18), tok("USDT", 6));
        let b = TokenPair::new(tok("USDT", 6), tok("WETH", 18));
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id(), "USDT/WETH");
    }
}
