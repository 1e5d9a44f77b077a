//! Settlement: realized profit from receipt logs
//!
//! On confirmation the realized profit is the signer's net balance delta in
//! the quote token, read from Transfer events in the receipt. A reverted
//! execution realizes the negated gas spend.

use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::rpc::types::eth::Log;
use lazy_static::lazy_static;
use rust_decimal::Decimal;

use crate::utils::units_to_decimal;

lazy_static! {
    static ref TRANSFER_TOPIC: B256 = keccak256("Transfer(address,address,uint256)".as_bytes());
}

fn topic_address(topic: &B256) -> Address {
    Address::from_slice(&topic.as_slice()[12..])
}

/// Net quote-token delta for `signer` across the receipt's Transfer events,
/// in USD.
pub fn realized_profit_usd(
    logs: &[Log],
    signer: Address,
    quote_token: Address,
    quote_decimals: u8,
    quote_usd: Decimal,
) -> Decimal {
    let mut inflow = U256::ZERO;
    let mut outflow = U256::ZERO;

    for log in logs {
        if log.inner.address != quote_token {
            continue;
        }
        let topics = log.inner.data.topics();
        if topics.len() != 3 || topics[0] != *TRANSFER_TOPIC {
            continue;
        }
        let from = topic_address(&topics[1]);
        let to = topic_address(&topics[2]);
        let data = &log.inner.data.data;
        if data.len() < 32 {
            continue;
        }
        let amount = U256::from_be_slice(&data[..32]);

        if to == signer {
            inflow += amount;
        }
        if from == signer {
            outflow += amount;
        }
    }

    let inflow_dec = units_to_decimal(inflow, quote_decimals);
    let outflow_dec = units_to_decimal(outflow, quote_decimals);
    (inflow_dec - outflow_dec) * quote_usd
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, Bytes, LogData};
    use rust_decimal_macros::dec;

    const SIGNER: Address = address!("0000000000000000000000000000000000000011");
    const USDC: Address = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");

    fn transfer(token: Address, from: Address, to: Address, amount: u64) -> Log {
        let mut padded_from = B256::ZERO;
        padded_from.0[12..].copy_from_slice(from.as_slice());
        let mut padded_to = B256::ZERO;
        padded_to.0[12..].copy_from_slice(to.as_slice());

        Log {
            inner: alloy::primitives::Log {
                address: token,
                data: LogData::new_unchecked(
                    vec![*TRANSFER_TOPIC, padded_from, padded_to],
                    Bytes::from(U256::from(amount).to_be_bytes::<32>().to_vec()),
                ),
            },
            ..Default::default()
        }
    }

    #[test]
    fn profit_is_inflow_minus_outflow_in_quote_units() {
        let pool = address!("0000000000000000000000000000000000000022");
        let logs = vec![
            // Spent 10_000 USDC (6 decimals), received back 10_054.50.
            transfer(USDC, SIGNER, pool, 10_000_000_000),
            transfer(USDC, pool, SIGNER, 10_054_500_000),
        ];
        let profit = realized_profit_usd(&logs, SIGNER, USDC, 6, dec!(1));
        assert_eq!(profit, dec!(54.50));
    }

    #[test]
    fn unrelated_tokens_and_parties_are_ignored() {
        let other_token = address!("0000000000000000000000000000000000000033");
        let third_party = address!("0000000000000000000000000000000000000044");
        let pool = address!("0000000000000000000000000000000000000022");
        let logs = vec![
            transfer(other_token, SIGNER, pool, 999_000_000),
            transfer(USDC, third_party, pool, 500_000_000),
        ];
        let profit = realized_profit_usd(&logs, SIGNER, USDC, 6, dec!(1));
        assert_eq!(profit, Decimal::ZERO);
    }
}
