//! Per-chain scanning loop
//!
//! One worker per chain. Within a tick all venue quotes observe the same
//! block height; quote fan-out is bounded by the chain's RPC concurrency
//! budget and the tick deadline. Partial results are acceptable when at
//! least two venues answered.

use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::spread::{compute_candidates, SpreadContext};
use super::volatility::VolatilityWindow;
use crate::config::registry;
use crate::errors::{BotError, BotResult};
use crate::flashloan::{cheapest_fee_bps, FlashLoanPlanner};
use crate::network::gas_cost_usd;
use crate::ranking::rank_cmp;
use crate::state::AppState;
use crate::types::{Alert, ChainId, Quote, TokenPair};

const VOLATILITY_WINDOW: Duration = Duration::from_secs(300);
const CHAIN_METRIC_EVERY_TICKS: u64 = 12;

pub struct ChainScanner {
    state: Arc<AppState>,
    chain: ChainId,
    volatility: HashMap<String, VolatilityWindow>,
    ticks: u64,
    endpoints_down_since: Option<Instant>,
}

impl ChainScanner {
    pub fn new(state: Arc<AppState>, chain: ChainId) -> Self {
        Self {
            state,
            chain,
            volatility: HashMap::new(),
            ticks: 0,
            endpoints_down_since: None,
        }
    }

    /// Scanner[chain] worker loop. Runs until the process shuts down or the
    /// chain is halted as fatal.
    pub async fn run(mut self) {
        let interval = Duration::from_millis(self.chain.metadata().scan_interval_ms);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(chain = %self.chain, "scanner started");

        loop {
            ticker.tick().await;

            if !self.state.is_running() {
                continue;
            }

            let guard = match self.state.guards.get(&self.chain) {
                Some(guard) => Arc::clone(guard),
                None => return,
            };
            if !guard.can_scan(self.chain.as_str()).await {
                self.state
                    .update_status(self.chain, |s| s.scanning_paused = true)
                    .await;
                continue;
            }
            self.state
                .update_status(self.chain, |s| s.scanning_paused = false)
                .await;

            match self.tick().await {
                Ok(()) => {
                    guard.record_success().await;
                    self.endpoints_down_since = None;
                }
                Err(e) => {
                    warn!(chain = %self.chain, error = %e, "scan tick failed");
                    guard.record_failure(self.chain.as_str()).await;
                    if self.chain_is_fatally_down().await {
                        return;
                    }
                }
            }
        }
    }

    /// All endpoints down past the fatal window halts this chain only.
    async fn chain_is_fatally_down(&mut self) -> bool {
        let Ok(client) = self.state.clients.get(self.chain) else {
            return true;
        };
        if !client.all_endpoints_down().await {
            self.endpoints_down_since = None;
            return false;
        }

        let fatal_window = {
            let config = self.state.config.read().await;
            Duration::from_secs(config.chain_down_fatal_secs)
        };
        let since = *self.endpoints_down_since.get_or_insert_with(Instant::now);
        if since.elapsed() < fatal_window {
            return false;
        }

        self.state
            .update_status(self.chain, |s| s.halted = true)
            .await;
        self.state
            .raise_alert(Alert::chain_halted(
                self.chain,
                format!(
                    "all endpoints down for over {}s, halting chain",
                    fatal_window.as_secs()
                ),
            ))
            .await;
        warn!(chain = %self.chain, "chain halted, scanner exiting");
        true
    }

    async fn tick(&mut self) -> BotResult<()> {
        let config = self.state.config.read().await.clone();
        let client = self.state.clients.get(self.chain)?;
        let tracker = self
            .state
            .gas
            .get(&self.chain)
            .ok_or_else(|| BotError::Config(format!("no gas tracker for {}", self.chain)))?;

        let gas_sample = tracker.sample().await?;
        if let Err(e) = self.state.store.record_gas_sample(&gas_sample).await {
            debug!(error = %e, "gas sample not journaled");
        }

        let gas_gwei = gas_sample.smoothed_gwei;
        self.state
            .update_status(self.chain, |s| s.gas_gwei = gas_gwei)
            .await;

        // Hard ceiling: the whole tick aborts, nothing is emitted.
        if gas_gwei > Decimal::from(config.max_gas_price_gwei) {
            self.state
                .update_status(self.chain, |s| s.gas_ceiling_exceeded = true)
                .await;
            debug!(
                chain = %self.chain,
                gas = %gas_gwei,
                ceiling = config.max_gas_price_gwei,
                "gas ceiling exceeded, tick aborted"
            );
            return Ok(());
        }
        self.state
            .update_status(self.chain, |s| s.gas_ceiling_exceeded = false)
            .await;

        // Coherent height for every quote in this tick.
        let block = client.block_number().await?;
        self.state
            .update_status(self.chain, |s| s.last_block = block)
            .await;

        let native_usd = self.state.price_feed.native_usd(self.chain).await?;
        let gas_usd = gas_cost_usd(self.chain, gas_gwei, native_usd);

        for pair in registry::pairs_for(self.chain) {
            if let Err(e) = self
                .scan_pair(pair, block, gas_usd, &config)
                .await
            {
                // One pair failing must not starve the others.
                debug!(chain = %self.chain, pair = %pair.id(), error = %e, "pair scan failed");
            }
        }

        self.state.live.retire_expired(self.chain).await;

        {
            let mut stats = self.state.stats.write().await;
            stats.total_scans += 1;
        }

        self.ticks += 1;
        if self.ticks % CHAIN_METRIC_EVERY_TICKS == 0 {
            let (healthy, degraded, _) = client.health_counts().await;
            let status = if degraded > 0 { "degraded" } else { "healthy" };
            if let Err(e) = self
                .state
                .store
                .record_chain_metric(
                    self.chain,
                    block,
                    healthy,
                    degraded,
                    status,
                    client.last_response_time_ms(),
                )
                .await
            {
                debug!(error = %e, "chain metric not journaled");
            }
        }

        Ok(())
    }

    async fn scan_pair(
        &mut self,
        pair: &'static TokenPair,
        block: u64,
        gas_usd: Decimal,
        config: &crate::config::Config,
    ) -> BotResult<()> {
        let pair_id = pair.id();
        let adapters = self
            .state
            .adapters
            .get(&self.chain)
            .ok_or_else(|| BotError::Config(format!("no adapters for {}", self.chain)))?;

        let serving: Vec<_> = registry::venues_for_pair(self.chain, &pair_id)
            .into_iter()
            .filter_map(|spec| adapters.get(&spec.id.name).map(|a| (spec, Arc::clone(a))))
            .collect();
        if serving.len() < 2 {
            return Ok(());
        }

        let quote_usd = self
            .state
            .price_feed
            .quote_usd(&pair.quote.symbol, self.chain)
            .await?;

        let semaphore = Arc::new(Semaphore::new(config.rpc_concurrency_per_chain));
        let tick_deadline = Duration::from_millis(self.chain.metadata().scan_interval_ms);

        // One-unit probe to price the reference notional in base units.
        let probe_notional = Decimal::ONE;
        let probe = serving[0]
            .1
            .quote_pair(pair, probe_notional, block)
            .await?;
        let base_usd = probe.mid_price * quote_usd;
        if base_usd.is_zero() {
            return Err(BotError::InsufficientLiquidity {
                context: format!("zero mid price for {}", pair_id),
            });
        }
        let reference_notional = config.reference_notional_usd / base_usd;

        let quote_futures = serving.iter().map(|(spec, adapter)| {
            let semaphore = Arc::clone(&semaphore);
            let adapter = Arc::clone(adapter);
            let name = spec.id.name.clone();
            async move {
                let _permit = semaphore.acquire().await;
                let result = adapter.quote_pair(pair, reference_notional, block).await;
                (name, result)
            }
        });

        let results = match tokio::time::timeout(tick_deadline, join_all(quote_futures)).await {
            Ok(results) => results,
            Err(_) => {
                return Err(BotError::DeadlineExceeded {
                    operation: format!("quote fan-out for {}", pair_id),
                    deadline: tick_deadline,
                })
            }
        };

        let mut quotes: Vec<Quote> = Vec::new();
        for (venue, result) in results {
            match result {
                Ok(quote) => quotes.push(quote),
                Err(e) => debug!(chain = %self.chain, venue, error = %e, "venue quote failed"),
            }
        }
        // A single venue timing out does not fail the tick.
        if quotes.len() < 2 {
            return Ok(());
        }

        let mid = quotes[0].mid_price;
        let window = self
            .volatility
            .entry(pair_id.clone())
            .or_insert_with(|| VolatilityWindow::new(VOLATILITY_WINDOW));
        window.push(decimal_to_f64(mid * quote_usd));
        let volatility_pct = window.volatility_pct().unwrap_or(0.0);

        let flash_fee_bps = if FlashLoanPlanner::eligible(config, self.chain) {
            cheapest_fee_bps(self.chain)
        } else {
            None
        };

        let models: Vec<_> = serving
            .iter()
            .map(|(spec, _)| (spec.id.name.clone(), spec.model))
            .collect();
        let ctx = SpreadContext {
            chain: self.chain,
            pair_id: pair_id.clone(),
            reference_notional,
            quote_usd,
            gas_cost_usd: gas_usd,
            slippage_tolerance: config.slippage_tolerance,
            flash_fee_bps,
            min_profit_usd: config.min_profit_usd,
            volatility_pct,
            weights: &config.confidence_weights,
        };

        let mut candidates = compute_candidates(&quotes, &models, &ctx);
        if candidates.is_empty() {
            return Ok(());
        }
        candidates.sort_by(rank_cmp);

        {
            let mut stats = self.state.stats.write().await;
            stats.opportunities_found += candidates.len() as u64;
        }

        for candidate in &candidates {
            self.state.live.upsert(candidate.clone()).await;
            if let Err(e) = self.state.store.record_opportunity_revision(candidate).await {
                debug!(error = %e, "opportunity revision not journaled");
            }
        }

        // Auto-execution: offer the best admitted candidate; tag the rest of
        // the rejections so observers see why.
        if self.state.is_armed() {
            let gas_gwei = {
                let board = self.state.status.read().await;
                board
                    .get(&self.chain)
                    .map(|s| s.gas_gwei)
                    .unwrap_or_default()
            };
            for candidate in candidates {
                match self.state.admission.admit(&candidate, config, gas_gwei).await {
                    Ok(()) => {
                        debug!(id = %candidate.id, "candidate admitted for execution");
                        if let Err(e) = self.state.exec_tx.send(candidate).await {
                            warn!(error = %e, "executor channel closed");
                        }
                        break;
                    }
                    Err(reason) => {
                        self.state
                            .live
                            .mark_rejected(self.chain, &candidate.id, &reason.to_string())
                            .await;
                    }
                }
            }
        }

        Ok(())
    }
}

fn decimal_to_f64(d: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or(0.0)
}
