//! Execution engine
//!
//! Drives each admitted candidate through the submission state machine:
//! plan, simulate, reserve a nonce, broadcast, track confirmation through
//! finality, settle. At most one in-flight execution per (chain, pair) and
//! a global cap across chains.

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256};
use alloy::rpc::types::eth::{TransactionReceipt, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tracing::{debug, info, warn};

use super::nonce::NonceAllocator;
use super::settlement::realized_profit_usd;
use crate::config::registry;
use crate::errors::{BotError, BotResult};
use crate::flashloan::FlashLoanPlanner;
use crate::state::AppState;
use crate::types::{
    Alert, AlertSeverity, Call, ChainId, Execution, ExecutionStatus, Opportunity, TokenPair,
    TradePlan,
};
use crate::utils::wei_to_gwei;

const REPLACEMENT_GAS_BUMP_NUM: u128 = 125;
const REPLACEMENT_GAS_BUMP_DEN: u128 = 100;
/// Extra confirmation polls after finality, watching for a reorg.
const POST_CONFIRM_CHECKS: u32 = 2;

pub struct ExecutionEngine {
    state: Arc<AppState>,
    nonces: Arc<NonceAllocator>,
    wallet: Option<EthereumWallet>,
    signer_address: Option<Address>,
    in_flight: Arc<RwLock<HashSet<(ChainId, String)>>>,
    /// Raw payloads already broadcast, keyed by (chain, nonce). Makes
    /// submission idempotent.
    submitted: Arc<RwLock<HashMap<(ChainId, u64), B256>>>,
    slots: Arc<Semaphore>,
}

impl ExecutionEngine {
    pub async fn new(state: Arc<AppState>) -> BotResult<Arc<Self>> {
        let (wallet, signer_address, signer_label, cap) = {
            let config = state.config.read().await;
            let cap = config.global_execution_cap;
            match config.private_key.as_deref() {
                Some(key) => {
                    let signer = PrivateKeySigner::from_str(key).map_err(|e| BotError::Fatal {
                        message: format!("signer key unusable: {}", e),
                    })?;
                    let address = signer.address();
                    (
                        Some(EthereumWallet::from(signer)),
                        Some(address),
                        format!("{:?}", address),
                        cap,
                    )
                }
                None => (None, None, "unsigned".to_string(), cap),
            }
        };

        Ok(Arc::new(Self {
            nonces: Arc::new(NonceAllocator::new(signer_label, state.store.clone())),
            state,
            wallet,
            signer_address,
            in_flight: Arc::new(RwLock::new(HashSet::new())),
            submitted: Arc::new(RwLock::new(HashMap::new())),
            slots: Arc::new(Semaphore::new(cap)),
        }))
    }

    /// Executor worker: consumes admitted candidates until the channel
    /// closes on shutdown.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Opportunity>) {
        info!("execution engine started");
        while let Some(opp) = rx.recv().await {
            let key = (opp.chain, opp.pair.clone());
            {
                let mut in_flight = self.in_flight.write().await;
                if !in_flight.insert(key.clone()) {
                    debug!(pair = %opp.pair, chain = %opp.chain, "pair already in flight, skipping");
                    continue;
                }
            }

            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                let permit = engine.slots.clone().acquire_owned().await;
                if permit.is_err() {
                    engine.in_flight.write().await.remove(&key);
                    return;
                }
                if let Err(e) = engine.execute_one(opp).await {
                    warn!(error = %e, "execution attempt failed");
                }
                engine.in_flight.write().await.remove(&key);
            });
        }
        info!("execution engine channel closed, stopping");
    }

    /// Journal a transition everywhere it must land: execution record,
    /// durable store, stream, stats cache.
    async fn transition(&self, execution: &mut Execution, to: ExecutionStatus) -> BotResult<()> {
        if execution.status != to && !ExecutionStatus::can_transition(execution.status, to) {
            return Err(BotError::Store(format!(
                "illegal transition {} -> {}",
                execution.status.as_str(),
                to.as_str()
            )));
        }
        execution.status = to;
        if to.is_terminal() {
            execution.ended_at = Some(Utc::now());
        }
        self.state.store.record_execution(execution).await?;
        self.state.events.execution_transition(execution);
        self.state.stats_cache.invalidate().await;
        Ok(())
    }

    async fn execute_one(&self, opp: Opportunity) -> BotResult<()> {
        let chain = opp.chain;
        let mut execution = Execution::new(
            opp.id.clone(),
            chain,
            opp.pair.clone(),
            opp.net_profit_usd,
        );
        self.state.store.record_execution(&execution).await?;
        self.state.events.execution_transition(&execution);

        self.state.admission.record_attempt(chain, &opp.pair).await;

        let outcome = self.drive(&mut execution, &opp).await;

        // Any failure mid-flight must still land the execution in a terminal
        // state; the store refuses to restart over dangling rows.
        if let Err(e) = &outcome {
            if !execution.status.is_terminal() {
                if execution.revert_reason.is_none() {
                    execution.revert_reason = Some(e.to_string());
                }
                let terminal = match execution.status {
                    ExecutionStatus::Submitted | ExecutionStatus::Pending => {
                        ExecutionStatus::Failed
                    }
                    _ => ExecutionStatus::Cancelled,
                };
                if let Err(journal_err) = self.transition(&mut execution, terminal).await {
                    warn!(error = %journal_err, "failed to journal terminal state");
                }
            }
        }

        if let Some(nonce) = execution.nonce {
            self.nonces.complete(chain, nonce).await;
        }
        self.update_stats(&execution).await;
        outcome
    }

    async fn drive(&self, execution: &mut Execution, opp: &Opportunity) -> BotResult<()> {
        let chain = opp.chain;
        let client = self.state.clients.get(chain)?;
        let config = self.state.config.read().await.clone();

        let Some(pair) = find_pair(chain, &opp.pair) else {
            execution.revert_reason = Some("pair not in registry".into());
            return self.transition(execution, ExecutionStatus::Cancelled).await;
        };

        let adapters = self.state.adapters.get(&chain).ok_or_else(|| {
            BotError::Config(format!("no adapters for chain {}", chain))
        })?;
        let (Some(buy_adapter), Some(sell_adapter)) =
            (adapters.get(&opp.buy.venue), adapters.get(&opp.sell.venue))
        else {
            execution.revert_reason = Some("venue adapter missing".into());
            return self.transition(execution, ExecutionStatus::Cancelled).await;
        };

        // Plans are built and simulated against one block.
        let block = client.block_number().await?;
        let recipient = self.signer_address.unwrap_or(Address::ZERO);

        let planner = FlashLoanPlanner::new(Arc::clone(&client));
        let mut plan = match planner
            .plan(
                opp,
                pair,
                buy_adapter.as_ref(),
                sell_adapter.as_ref(),
                &config,
                recipient,
                block,
            )
            .await
        {
            Ok(plan) => plan,
            Err(BotError::InsufficientLiquidity { context }) => {
                self.state
                    .live
                    .mark_rejected(chain, &opp.id, &format!("insufficient-liquidity: {}", context))
                    .await;
                execution.revert_reason = Some(context);
                return self.transition(execution, ExecutionStatus::Cancelled).await;
            }
            Err(e) => return Err(e),
        };
        execution.plan = Some(plan.clone());
        self.transition(execution, ExecutionStatus::Planned).await?;

        if let Err(e) = planner.simulate(&mut plan, recipient, block).await {
            let reason = e.to_string();
            self.state
                .live
                .mark_rejected(chain, &opp.id, &format!("simulation-revert: {}", reason))
                .await;
            execution.revert_reason = Some(reason);
            return self.transition(execution, ExecutionStatus::Cancelled).await;
        }
        execution.plan = Some(plan.clone());

        let nonce = self.nonces.reserve(chain, &client).await?;
        execution.nonce = Some(nonce);
        self.transition(execution, ExecutionStatus::Simulated).await?;

        if config.dry_run_mode {
            info!(id = %execution.id, "dry-run mode: plan simulated, not broadcasting");
            execution.revert_reason = Some("dry-run".into());
            self.nonces.release_unused(chain, nonce).await?;
            self.nonces.complete(chain, nonce).await;
            return self.transition(execution, ExecutionStatus::Cancelled).await;
        }

        let Some(wallet) = self.wallet.as_ref() else {
            self.state
                .raise_alert(Alert {
                    severity: AlertSeverity::Critical,
                    category: "execution".into(),
                    chain: Some(chain),
                    message: "signer unavailable, cannot broadcast".into(),
                    created_at: Utc::now(),
                })
                .await;
            execution.revert_reason = Some("signer-unavailable".into());
            self.nonces.release_unused(chain, nonce).await?;
            self.nonces.complete(chain, nonce).await;
            return self.transition(execution, ExecutionStatus::Cancelled).await;
        };

        self.broadcast_and_track(execution, &plan, wallet, nonce, &client, &config, pair)
            .await
    }

    async fn broadcast_and_track(
        &self,
        execution: &mut Execution,
        plan: &TradePlan,
        wallet: &EthereumWallet,
        nonce: u64,
        client: &crate::network::ChainClient,
        config: &crate::config::Config,
        pair: &TokenPair,
    ) -> BotResult<()> {
        let chain = execution.chain;
        // A flash plan broadcasts one atomic envelope. An owned-capital plan
        // broadcasts its steps as separate transactions: each setup step
        // must land before the next goes out; the last one is the
        // profit-realizing call the engine tracks through finality.
        let (setup_calls, final_call): (Vec<Call>, Call) = match &plan.envelope {
            Some(envelope) => (Vec::new(), envelope.clone()),
            None => {
                let Some((last, rest)) = plan.calls.split_last() else {
                    return Err(BotError::SimulationRevert {
                        reason: "empty plan".into(),
                    });
                };
                (rest.to_vec(), last.clone())
            }
        };

        let gas_sample = match self.state.gas.get(&chain) {
            Some(tracker) => tracker.sample().await?,
            None => return Err(BotError::Config(format!("no gas tracker for {}", chain))),
        };

        let mut max_fee = gas_sample.max_fee_per_gas;
        let mut priority = gas_sample.max_priority_fee_per_gas;
        let gas_limit = plan.gas_limit.unwrap_or(500_000);
        let mut replacements: u32 = 0;

        let mut next_nonce = nonce;
        for (index, call) in setup_calls.iter().enumerate() {
            let step_hash = self
                .submit_idempotent(chain, call, next_nonce, gas_limit, max_fee, priority, wallet, client)
                .await?;
            execution.tx_hashes.push(format!("{:?}", step_hash));
            if index == 0 {
                self.transition(execution, ExecutionStatus::Submitted).await?;
                self.transition(execution, ExecutionStatus::Pending).await?;
            } else {
                self.state.store.record_execution(execution).await?;
            }

            match self.await_receipt(client, step_hash, config).await? {
                Some(receipt) if receipt.status() => {
                    self.nonces.complete(chain, next_nonce).await;
                }
                Some(receipt) => {
                    return self.settle_reverted(execution, &receipt, call, client).await;
                }
                None => {
                    execution.revert_reason =
                        Some(format!("setup step {} never confirmed", index));
                    return self.transition(execution, ExecutionStatus::Failed).await;
                }
            }
            next_nonce = self.nonces.reserve(chain, client).await?;
        }

        let raw = self
            .sign(chain, &final_call, next_nonce, gas_limit, max_fee, priority, wallet)
            .await?;

        // Idempotent on (chain, nonce): a nonce already broadcast reuses its
        // recorded hash instead of double-submitting.
        let already = self.submitted.read().await.get(&(chain, next_nonce)).copied();
        let mut tx_hash = match already {
            Some(hash) => hash,
            None => {
                let hash = client.send_raw_transaction(&raw).await?;
                self.submitted.write().await.insert((chain, next_nonce), hash);
                hash
            }
        };
        execution.tx_hashes.push(format!("{:?}", tx_hash));
        if setup_calls.is_empty() {
            self.transition(execution, ExecutionStatus::Submitted).await?;
            // The broadcast ack is the node acknowledging the payload.
            self.transition(execution, ExecutionStatus::Pending).await?;
        } else {
            self.state.store.record_execution(execution).await?;
        }
        let nonce = next_nonce;
        execution.nonce = Some(nonce);
        let call = final_call;

        let meta = chain.metadata();
        let poll = Duration::from_millis(meta.block_time_ms.clamp(500, 12_000));
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(config.execution_deadline_secs);

        loop {
            tokio::time::sleep(poll).await;

            match client.transaction_receipt(tx_hash).await? {
                Some(receipt) if !receipt.status() => {
                    return self.settle_reverted(execution, &receipt, &call, client).await;
                }
                Some(receipt) => {
                    let mined_at = receipt.block_number.unwrap_or_default();
                    let tip = client.block_number().await?;
                    if tip < mined_at + meta.finality_depth {
                        continue;
                    }

                    self.transition(execution, ExecutionStatus::Confirmed).await?;

                    // Watch a little longer: a reorg that drops the receipt
                    // reopens the execution.
                    match self
                        .confirm_against_reorg(execution, tx_hash, mined_at, client)
                        .await?
                    {
                        None => {
                            return self.settle_confirmed(execution, &receipt, pair).await;
                        }
                        Some(()) => {
                            // Receipt vanished: rebroadcast the same payload
                            // with the same nonce and keep waiting.
                            warn!(id = %execution.id, "reorg detected, re-broadcasting");
                            tx_hash = client.send_raw_transaction(&raw).await?;
                            self.submitted.write().await.insert((chain, nonce), tx_hash);
                            execution.tx_hashes.push(format!("{:?}", tx_hash));
                            self.state.store.record_execution(execution).await?;
                            continue;
                        }
                    }
                }
                None if tokio::time::Instant::now() >= deadline => {
                    if replacements >= config.max_replacements {
                        execution.revert_reason =
                            Some("confirmation deadline exceeded after replacements".into());
                        return self.transition(execution, ExecutionStatus::Failed).await;
                    }
                    replacements += 1;
                    max_fee = max_fee * REPLACEMENT_GAS_BUMP_NUM / REPLACEMENT_GAS_BUMP_DEN;
                    priority = priority * REPLACEMENT_GAS_BUMP_NUM / REPLACEMENT_GAS_BUMP_DEN;
                    warn!(
                        id = %execution.id,
                        replacements,
                        "execution deadline passed, submitting replacement with higher gas"
                    );
                    let replacement = self
                        .sign(
                            chain,
                            &call,
                            nonce,
                            plan.gas_limit.unwrap_or(500_000),
                            max_fee,
                            priority,
                            wallet,
                        )
                        .await?;
                    tx_hash = client.send_raw_transaction(&replacement).await?;
                    self.submitted.write().await.insert((chain, nonce), tx_hash);
                    execution.tx_hashes.push(format!("{:?}", tx_hash));
                    self.state.store.record_execution(execution).await?;
                }
                None => continue,
            }
        }
    }

    /// Poll for a setup transaction's receipt until the execution deadline.
    async fn await_receipt(
        &self,
        client: &crate::network::ChainClient,
        tx_hash: B256,
        config: &crate::config::Config,
    ) -> BotResult<Option<TransactionReceipt>> {
        let poll = Duration::from_millis(client.chain.metadata().block_time_ms.clamp(500, 12_000));
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(config.execution_deadline_secs);
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(poll).await;
            if let Some(receipt) = client.transaction_receipt(tx_hash).await? {
                return Ok(Some(receipt));
            }
        }
        Ok(None)
    }

    /// Poll a few more times after Confirmed. Returns Some(()) when the
    /// receipt disappeared (reorg) after moving the execution back to
    /// Pending.
    async fn confirm_against_reorg(
        &self,
        execution: &mut Execution,
        tx_hash: B256,
        mined_at: u64,
        client: &crate::network::ChainClient,
    ) -> BotResult<Option<()>> {
        let poll = Duration::from_millis(execution.chain.metadata().block_time_ms.clamp(500, 12_000));
        for _ in 0..POST_CONFIRM_CHECKS {
            tokio::time::sleep(poll).await;
            match client.transaction_receipt(tx_hash).await? {
                Some(receipt) if receipt.block_number.unwrap_or_default() == mined_at => continue,
                _ => {
                    let tip = client.block_number().await.unwrap_or(mined_at);
                    debug!(
                        id = %execution.id,
                        mined_at,
                        tip,
                        "confirmation height regressed"
                    );
                    self.transition(execution, ExecutionStatus::Pending).await?;
                    return Ok(Some(()));
                }
            }
        }
        Ok(None)
    }

    async fn settle_confirmed(
        &self,
        execution: &mut Execution,
        receipt: &TransactionReceipt,
        pair: &TokenPair,
    ) -> BotResult<()> {
        let signer = self.signer_address.unwrap_or(Address::ZERO);
        let quote_usd = self
            .state
            .price_feed
            .quote_usd(&pair.quote.symbol, execution.chain)
            .await
            .unwrap_or(Decimal::ONE);

        execution.block_number = receipt.block_number;
        execution.gas_used = Some(receipt.gas_used as u64);
        execution.gas_price_gwei = Some(wei_to_gwei(receipt.effective_gas_price));
        execution.realized_profit_usd = Some(realized_profit_usd(
            receipt.inner.logs(),
            signer,
            pair.quote.address,
            pair.quote.decimals,
            quote_usd,
        ));

        info!(
            id = %execution.id,
            realized = %execution.realized_profit_usd.unwrap_or_default(),
            "execution confirmed and settled"
        );
        self.state.store.record_execution(execution).await?;
        self.state.events.execution_transition(execution);
        Ok(())
    }

    async fn settle_reverted(
        &self,
        execution: &mut Execution,
        receipt: &TransactionReceipt,
        call: &Call,
        client: &crate::network::ChainClient,
    ) -> BotResult<()> {
        // Replay at the mined block to recover the revert reason.
        let replay = TransactionRequest::default()
            .from(self.signer_address.unwrap_or(Address::ZERO))
            .to(call.to)
            .value(call.value)
            .input(call.data.clone().into());
        let reason = match client
            .call(&replay, receipt.block_number)
            .await
        {
            Err(BotError::SimulationRevert { reason }) => reason,
            _ => "revert reason unavailable".to_string(),
        };

        let gas_native = Decimal::from(receipt.gas_used) * wei_to_gwei(receipt.effective_gas_price)
            * dec!(0.000000001);
        let native_usd = self
            .state
            .price_feed
            .native_usd(execution.chain)
            .await
            .unwrap_or(Decimal::ZERO);

        execution.block_number = receipt.block_number;
        execution.gas_used = Some(receipt.gas_used as u64);
        execution.gas_price_gwei = Some(wei_to_gwei(receipt.effective_gas_price));
        execution.revert_reason = Some(reason);
        execution.realized_profit_usd = Some(-(gas_native * native_usd));

        self.transition(execution, ExecutionStatus::Reverted).await
    }

    /// Sign and broadcast, reusing the recorded hash when this (chain,
    /// nonce) already went out.
    #[allow(clippy::too_many_arguments)]
    async fn submit_idempotent(
        &self,
        chain: ChainId,
        call: &Call,
        nonce: u64,
        gas_limit: u64,
        max_fee: u128,
        priority: u128,
        wallet: &EthereumWallet,
        client: &crate::network::ChainClient,
    ) -> BotResult<B256> {
        if let Some(hash) = self.submitted.read().await.get(&(chain, nonce)).copied() {
            return Ok(hash);
        }
        let raw = self
            .sign(chain, call, nonce, gas_limit, max_fee, priority, wallet)
            .await?;
        let hash = client.send_raw_transaction(&raw).await?;
        self.submitted.write().await.insert((chain, nonce), hash);
        Ok(hash)
    }

    #[allow(clippy::too_many_arguments)]
    async fn sign(
        &self,
        chain: ChainId,
        call: &Call,
        nonce: u64,
        gas_limit: u64,
        max_fee: u128,
        priority: u128,
        wallet: &EthereumWallet,
    ) -> BotResult<Vec<u8>> {
        let meta = chain.metadata();
        let mut tx = TransactionRequest::default()
            .from(self.signer_address.unwrap_or(Address::ZERO))
            .to(call.to)
            .value(call.value)
            .input(call.data.clone().into())
            .nonce(nonce)
            .gas_limit(gas_limit);
        tx.chain_id = Some(meta.chain_id);

        if meta.eip1559 {
            tx = tx
                .max_fee_per_gas(max_fee)
                .max_priority_fee_per_gas(priority);
        } else {
            // Legacy chains: eth_gasPrice is both effective price and cap.
            tx.gas_price = Some(max_fee);
        }

        let envelope = tx.build(wallet).await.map_err(|e| BotError::Fatal {
            message: format!("signing failed: {}", e),
        })?;
        Ok(envelope.encoded_2718())
    }

    async fn update_stats(&self, execution: &Execution) {
        let mut stats = self.state.stats.write().await;
        match execution.status {
            ExecutionStatus::Confirmed => {
                stats.trades_executed += 1;
                stats.successful_trades += 1;
                if let Some(profit) = execution.realized_profit_usd {
                    stats.total_profit_usd += profit;
                    stats.today_profit_usd += profit;
                    if -profit > stats.max_drawdown_usd {
                        stats.max_drawdown_usd = -profit;
                    }
                }
            }
            ExecutionStatus::Reverted | ExecutionStatus::Failed => {
                stats.trades_executed += 1;
                stats.failed_trades += 1;
                if let Some(loss) = execution.realized_profit_usd {
                    stats.total_profit_usd += loss;
                    stats.today_profit_usd += loss;
                }
            }
            // Cancelled attempts (dry-run included) are not trades.
            _ => return,
        }
        if let (Some(gas_used), Some(gwei)) = (execution.gas_used, execution.gas_price_gwei) {
            stats.gas_spent_usd += Decimal::from(gas_used) * gwei * dec!(0.000000001);
        }
        if stats.trades_executed > 0 {
            stats.win_rate =
                stats.successful_trades as f64 / stats.trades_executed as f64 * 100.0;
            if let Ok(trades) = Decimal::try_from(stats.trades_executed as i64) {
                if !trades.is_zero() {
                    stats.avg_profit_usd = stats.total_profit_usd / trades;
                }
            }
        }
    }

    pub fn signer_address(&self) -> Option<Address> {
        self.signer_address
    }
}

pub(crate) fn find_pair(chain: ChainId, pair_id: &str) -> Option<&'static TokenPair> {
    registry::pairs_for(chain).iter().find(|p| p.id() == pair_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_pairs_resolve_by_id() {
        let pair = find_pair(ChainId::Ethereum, "USDT/WETH").expect("pair");
        assert_eq!(pair.quote.symbol, "USDT");
        assert!(find_pair(ChainId::Ethereum, "FOO/BAR").is_none());
    }
}
