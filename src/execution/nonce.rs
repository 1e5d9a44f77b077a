//! Per-(chain, signer) nonce allocation
//!
//! Strictly increasing, gap-free. A reserved nonce is returned to the pool
//! only when it was never broadcast and is still the newest reservation;
//! otherwise it stays held until its execution reaches a terminal state.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::errors::BotResult;
use crate::network::ChainClient;
use crate::storage::Store;
use crate::types::ChainId;

#[derive(Default)]
struct NonceState {
    next: Option<u64>,
    held: BTreeSet<u64>,
}

pub struct NonceAllocator {
    signer: String,
    store: Store,
    chains: Mutex<HashMap<ChainId, Arc<Mutex<NonceState>>>>,
}

impl NonceAllocator {
    pub fn new(signer: String, store: Store) -> Self {
        Self {
            signer,
            store,
            chains: Mutex::new(HashMap::new()),
        }
    }

    async fn chain_state(&self, chain: ChainId) -> Arc<Mutex<NonceState>> {
        let mut chains = self.chains.lock().await;
        Arc::clone(chains.entry(chain).or_default())
    }

    /// Reserve the next nonce. On first use the counter syncs from the
    /// chain, preferring the persisted value when it is ahead.
    pub async fn reserve(&self, chain: ChainId, client: &ChainClient) -> BotResult<u64> {
        let state = self.chain_state(chain).await;
        let mut state = state.lock().await;

        let nonce = match state.next {
            Some(nonce) => nonce,
            None => {
                let signer_addr = self.signer.parse().map_err(|e| {
                    crate::errors::BotError::Config(format!("bad signer address: {}", e))
                })?;
                let on_chain = client.transaction_count(signer_addr).await?;
                let persisted = self.store.load_nonce(chain, &self.signer).await?;
                let synced = persisted.map_or(on_chain, |p| p.max(on_chain));
                info!(chain = %chain, next = synced, "nonce counter synced");
                synced
            }
        };
        state.next = Some(nonce + 1);
        state.held.insert(nonce);
        self.store.persist_nonce(chain, &self.signer, nonce + 1).await?;
        Ok(nonce)
    }

    /// Return a never-broadcast nonce to the pool. Only the newest
    /// reservation can be rewound; anything else would open a gap.
    pub async fn release_unused(&self, chain: ChainId, nonce: u64) -> BotResult<()> {
        let state = self.chain_state(chain).await;
        let mut state = state.lock().await;
        state.held.remove(&nonce);
        if state.next == Some(nonce + 1) {
            state.next = Some(nonce);
            self.store.persist_nonce(chain, &self.signer, nonce).await?;
        }
        Ok(())
    }

    /// Mark a nonce's execution terminal; the nonce is spent (or abandoned)
    /// and never reused.
    pub async fn complete(&self, chain: ChainId, nonce: u64) {
        let state = self.chain_state(chain).await;
        state.lock().await.held.remove(&nonce);
    }

    /// Nonces still held by non-terminal executions.
    pub async fn held(&self, chain: ChainId) -> Vec<u64> {
        let state = self.chain_state(chain).await;
        let state = state.lock().await;
        state.held.iter().copied().collect()
    }

    pub fn signer(&self) -> &str {
        &self.signer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNER: &str = "0x0000000000000000000000000000000000000001";

    async fn allocator() -> NonceAllocator {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let alloc = NonceAllocator::new(SIGNER.to_string(), store);
        // Seed the counter directly; reserve() would try the network.
        let state = alloc.chain_state(ChainId::Polygon).await;
        state.lock().await.next = Some(10);
        alloc
    }

    async fn reserve_seeded(alloc: &NonceAllocator, chain: ChainId) -> u64 {
        let state = alloc.chain_state(chain).await;
        let mut state = state.lock().await;
        let nonce = state.next.unwrap();
        state.next = Some(nonce + 1);
        state.held.insert(nonce);
        nonce
    }

    #[tokio::test]
    async fn nonces_are_strictly_increasing_and_unique() {
        let alloc = allocator().await;
        let a = reserve_seeded(&alloc, ChainId::Polygon).await;
        let b = reserve_seeded(&alloc, ChainId::Polygon).await;
        let c = reserve_seeded(&alloc, ChainId::Polygon).await;
        assert_eq!((a, b, c), (10, 11, 12));
        assert_eq!(alloc.held(ChainId::Polygon).await, vec![10, 11, 12]);
    }

    #[tokio::test]
    async fn releasing_the_newest_rewinds_the_counter() {
        let alloc = allocator().await;
        let a = reserve_seeded(&alloc, ChainId::Polygon).await;
        let b = reserve_seeded(&alloc, ChainId::Polygon).await;

        alloc.release_unused(ChainId::Polygon, b).await.unwrap();
        let again = reserve_seeded(&alloc, ChainId::Polygon).await;
        assert_eq!(again, b);

        // Releasing an older nonce must not rewind past newer reservations.
        alloc.release_unused(ChainId::Polygon, a).await.unwrap();
        let next = reserve_seeded(&alloc, ChainId::Polygon).await;
        assert_eq!(next, again + 1);
    }

    #[tokio::test]
    async fn completion_frees_the_held_set_without_reuse() {
        let alloc = allocator().await;
        let a = reserve_seeded(&alloc, ChainId::Polygon).await;
        alloc.complete(ChainId::Polygon, a).await;
        assert!(alloc.held(ChainId::Polygon).await.is_empty());
        let b = reserve_seeded(&alloc, ChainId::Polygon).await;
        assert!(b > a);
    }
}
