//! Typed RPC client per chain
//!
//! Every request carries a deadline, fails over across the endpoint pool,
//! and categorizes transport failures per the error taxonomy.

use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::Provider;
use alloy::rpc::types::eth::{Filter, Log, TransactionReceipt, TransactionRequest};
use alloy::rpc::types::BlockNumberOrTag;
use alloy::transports::{RpcError, TransportErrorKind};
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::Config;
use crate::errors::{BotError, BotResult};
use crate::network::endpoints::EndpointPool;
use crate::network::retry::{retry_with_backoff, RetryConfig};
use crate::types::ChainId;
use crate::ConcreteProvider;

const ATTEMPTS_PER_REQUEST: u32 = 3;

pub struct ChainClient {
    pub chain: ChainId,
    pool: EndpointPool,
    deadline: Duration,
    last_block: AtomicU64,
    last_response_ms: AtomicU64,
}

impl ChainClient {
    pub fn new(chain: ChainId, urls: &[String], config: &Config) -> BotResult<Self> {
        let pool = EndpointPool::new(
            chain,
            urls,
            config.endpoint_rate_limit_per_sec,
            Duration::from_secs(config.endpoint_cooldown_secs),
        )?;
        Ok(Self {
            chain,
            pool,
            deadline: Duration::from_millis(chain.metadata().block_time_ms.clamp(2_000, 8_000)),
            last_block: AtomicU64::new(0),
            last_response_ms: AtomicU64::new(0),
        })
    }

    /// Run `op` against the least-loaded healthy endpoint. Retryable
    /// failures back off with jitter and fail over to another endpoint, at
    /// most `ATTEMPTS_PER_REQUEST` tries per call.
    async fn request<T, F, Fut>(&self, label: &str, op: F) -> BotResult<T>
    where
        F: Fn(Arc<ConcreteProvider>) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let retry = RetryConfig {
            max_attempts: ATTEMPTS_PER_REQUEST,
            ..Default::default()
        };
        retry_with_backoff(|| self.attempt(label, &op), &retry, label).await
    }

    async fn attempt<T, F, Fut>(&self, label: &str, op: &F) -> BotResult<T>
    where
        F: Fn(Arc<ConcreteProvider>) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let endpoint = self.pool.pick().await?;
        self.pool.begin_request(&endpoint);
        let started = Instant::now();

        let outcome = tokio::time::timeout(self.deadline, op(Arc::clone(&endpoint.provider))).await;
        self.last_response_ms
            .store(started.elapsed().as_millis() as u64, Ordering::Relaxed);

        match outcome {
            Ok(Ok(value)) => {
                self.pool.end_request(&endpoint, true).await;
                Ok(value)
            }
            Ok(Err(rpc_err)) => {
                let (err, endpoint_fault) = self.classify(rpc_err);
                self.pool.end_request(&endpoint, !endpoint_fault).await;
                debug!(chain = %self.chain, label, error = %err, "rpc attempt failed");
                Err(err)
            }
            Err(_elapsed) => {
                self.pool.end_request(&endpoint, false).await;
                Err(BotError::DeadlineExceeded {
                    operation: format!("{} on {}", label, self.chain),
                    deadline: self.deadline,
                })
            }
        }
    }

    fn classify(&self, err: RpcError<TransportErrorKind>) -> (BotError, bool) {
        match err {
            RpcError::ErrorResp(payload) => {
                let message = payload.message.to_string();
                if message.to_ascii_lowercase().contains("revert") {
                    // A revert is a valid node response, not an endpoint fault.
                    (BotError::SimulationRevert { reason: message }, false)
                } else {
                    (
                        BotError::NonRetryableTransport {
                            chain: self.chain,
                            message,
                        },
                        true,
                    )
                }
            }
            RpcError::Transport(kind) => (
                BotError::RetryableTransport {
                    chain: self.chain,
                    message: kind.to_string(),
                },
                true,
            ),
            other => (
                BotError::NonRetryableTransport {
                    chain: self.chain,
                    message: other.to_string(),
                },
                true,
            ),
        }
    }

    pub async fn block_number(&self) -> BotResult<u64> {
        let block = self
            .request("eth_blockNumber", |provider| async move {
                provider.get_block_number().await
            })
            .await?;
        self.last_block.store(block, Ordering::Relaxed);
        Ok(block)
    }

    pub async fn raw_gas_price(&self) -> BotResult<u128> {
        self.request("eth_gasPrice", |provider| async move {
            provider.get_gas_price().await
        })
        .await
    }

    pub async fn fee_history(
        &self,
    ) -> BotResult<alloy::rpc::types::eth::FeeHistory> {
        self.request("eth_feeHistory", |provider| async move {
            provider
                .get_fee_history(5, BlockNumberOrTag::Latest, &[50.0])
                .await
        })
        .await
    }

    pub async fn call(&self, tx: &TransactionRequest, block: Option<u64>) -> BotResult<Bytes> {
        let tx = tx.clone();
        self.request("eth_call", move |provider| {
            let tx = tx.clone();
            async move {
                match block {
                    Some(number) => provider.call(&tx).block(number.into()).await,
                    None => provider.call(&tx).await,
                }
            }
        })
        .await
    }

    /// Concurrent batch of `eth_call`s against the same block.
    pub async fn batch_call(
        &self,
        txs: &[TransactionRequest],
        block: Option<u64>,
    ) -> Vec<BotResult<Bytes>> {
        join_all(txs.iter().map(|tx| self.call(tx, block))).await
    }

    pub async fn estimate_gas(&self, tx: &TransactionRequest) -> BotResult<u64> {
        let tx = tx.clone();
        self.request("eth_estimateGas", move |provider| {
            let tx = tx.clone();
            async move { provider.estimate_gas(&tx).await.map(|gas| gas as u64) }
        })
        .await
    }

    pub async fn send_raw_transaction(&self, raw: &[u8]) -> BotResult<B256> {
        let raw = raw.to_vec();
        self.request("eth_sendRawTransaction", move |provider| {
            let raw = raw.clone();
            async move {
                let pending = provider.send_raw_transaction(&raw).await?;
                Ok(*pending.tx_hash())
            }
        })
        .await
    }

    pub async fn transaction_receipt(&self, hash: B256) -> BotResult<Option<TransactionReceipt>> {
        self.request("eth_getTransactionReceipt", move |provider| async move {
            provider.get_transaction_receipt(hash).await
        })
        .await
    }

    pub async fn get_logs(&self, filter: &Filter) -> BotResult<Vec<Log>> {
        let filter = filter.clone();
        self.request("eth_getLogs", move |provider| {
            let filter = filter.clone();
            async move { provider.get_logs(&filter).await }
        })
        .await
    }

    pub async fn transaction_count(&self, address: Address) -> BotResult<u64> {
        self.request("eth_getTransactionCount", move |provider| async move {
            provider.get_transaction_count(address).await
        })
        .await
    }

    pub fn last_seen_block(&self) -> u64 {
        self.last_block.load(Ordering::Relaxed)
    }

    pub fn last_response_time_ms(&self) -> u64 {
        self.last_response_ms.load(Ordering::Relaxed)
    }

    pub async fn health_counts(&self) -> (usize, usize, usize) {
        self.pool.health_counts().await
    }

    pub async fn all_endpoints_down(&self) -> bool {
        self.pool.all_down().await
    }
}

/// One client per configured chain.
pub struct ChainClientPool {
    clients: HashMap<ChainId, Arc<ChainClient>>,
}

impl ChainClientPool {
    pub fn from_config(config: &Config) -> BotResult<Self> {
        let mut clients = HashMap::new();
        for (chain, urls) in &config.rpc_endpoints {
            clients.insert(*chain, Arc::new(ChainClient::new(*chain, urls, config)?));
        }
        if clients.is_empty() {
            return Err(BotError::Config("no chains configured".into()));
        }
        Ok(Self { clients })
    }

    pub fn get(&self, chain: ChainId) -> BotResult<Arc<ChainClient>> {
        self.clients
            .get(&chain)
            .cloned()
            .ok_or_else(|| BotError::Config(format!("chain {} not configured", chain)))
    }

    pub fn chains(&self) -> Vec<ChainId> {
        self.clients.keys().copied().collect()
    }

    /// True when at least one chain has a live endpoint. Used by startup to
    /// decide exit code 3.
    pub async fn any_endpoint_alive(&self) -> bool {
        for client in self.clients.values() {
            if client.block_number().await.is_ok() {
                return true;
            }
        }
        false
    }
}
