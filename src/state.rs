//! Shared application state
//!
//! One instance wires the chain clients, venue adapters, live view, store,
//! and control flags together. Worker tasks and the API surface both hang
//! off an `Arc<AppState>`.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info};

use crate::api::stream::EventBus;
use crate::config::{registry, Config};
use crate::errors::{BotResult, ScanGuard};
use crate::network::{ChainClientPool, GasTracker, NativePriceFeed};
use crate::ranking::AdmissionController;
use crate::scanner::LiveOpportunityMap;
use crate::storage::{Store, TtlCell};
use crate::types::{
    Alert, ChainHealthSnapshot, ChainId, EndpointHealth, Opportunity, PortfolioStats,
};
use crate::venues::{adapter_for, QuoteCache, VenueAdapter};

const STATS_CACHE_TTL: Duration = Duration::from_secs(5);

/// Mutable per-chain status board backing `GET /api/chains`.
#[derive(Debug, Clone, Default)]
pub struct ChainStatus {
    pub last_block: u64,
    pub gas_gwei: Decimal,
    pub gas_ceiling_exceeded: bool,
    pub scanning_paused: bool,
    pub halted: bool,
}

pub struct AppState {
    pub config: RwLock<Config>,
    pub store: Store,
    pub clients: ChainClientPool,
    pub gas: HashMap<ChainId, Arc<GasTracker>>,
    pub price_feed: NativePriceFeed,
    pub adapters: HashMap<ChainId, HashMap<String, Arc<dyn VenueAdapter>>>,
    pub live: Arc<LiveOpportunityMap>,
    pub admission: AdmissionController,
    pub events: Arc<EventBus>,
    pub guards: HashMap<ChainId, Arc<ScanGuard>>,
    pub status: RwLock<HashMap<ChainId, ChainStatus>>,
    pub stats: RwLock<PortfolioStats>,
    pub stats_cache: TtlCell<PortfolioStats>,
    pub running: AtomicBool,
    pub armed: AtomicBool,
    pub exec_tx: mpsc::Sender<Opportunity>,
}

impl AppState {
    pub async fn build(
        config: Config,
        store: Store,
        exec_tx: mpsc::Sender<Opportunity>,
    ) -> BotResult<Arc<Self>> {
        let clients = ChainClientPool::from_config(&config)?;
        let events = Arc::new(EventBus::new());
        let chains = config.configured_chains();

        let mut gas = HashMap::new();
        let mut adapters: HashMap<ChainId, HashMap<String, Arc<dyn VenueAdapter>>> =
            HashMap::new();
        let mut guards = HashMap::new();
        let mut status = HashMap::new();

        for chain in &chains {
            let client = clients.get(*chain)?;
            gas.insert(*chain, Arc::new(GasTracker::new(*chain, Arc::clone(&client))));

            let cache = Arc::new(QuoteCache::new());
            let mut chain_adapters = HashMap::new();
            for spec in registry::venues_for(*chain) {
                let adapter: Arc<dyn VenueAdapter> =
                    Arc::from(adapter_for(spec, Arc::clone(&client), Arc::clone(&cache)));
                chain_adapters.insert(spec.id.name.clone(), adapter);
            }
            adapters.insert(*chain, chain_adapters);

            guards.insert(
                *chain,
                Arc::new(ScanGuard::new(5, Duration::from_secs(30))),
            );
            status.insert(*chain, ChainStatus::default());
        }

        let live = Arc::new(LiveOpportunityMap::new(&chains, Arc::clone(&events)));

        // Run flags restored from the key-value region so controls survive
        // restarts.
        let running = store
            .kv_get("bot_running")
            .await?
            .map(|v| v == "true")
            .unwrap_or(false);
        let armed = store
            .kv_get("auto_armed")
            .await?
            .map(|v| v == "true")
            .unwrap_or(false);

        Ok(Arc::new(Self {
            config: RwLock::new(config),
            store,
            clients,
            gas,
            price_feed: NativePriceFeed::new()?,
            adapters,
            live,
            admission: AdmissionController::new(),
            events,
            guards,
            status: RwLock::new(status),
            stats: RwLock::new(PortfolioStats::default()),
            stats_cache: TtlCell::new(STATS_CACHE_TTL),
            running: AtomicBool::new(running),
            armed: AtomicBool::new(armed),
            exec_tx,
        }))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    pub async fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::SeqCst);
        if let Err(e) = self
            .store
            .kv_put("bot_running", if value { "true" } else { "false" })
            .await
        {
            error!(error = %e, "failed to persist bot_running flag");
        }
        info!(running = value, "bot run flag changed");
    }

    pub async fn set_armed(&self, value: bool) {
        self.armed.store(value, Ordering::SeqCst);
        if let Err(e) = self
            .store
            .kv_put("auto_armed", if value { "true" } else { "false" })
            .await
        {
            error!(error = %e, "failed to persist auto_armed flag");
        }
        info!(armed = value, "auto-execute arm flag changed");
    }

    pub async fn update_status<F>(&self, chain: ChainId, update: F)
    where
        F: FnOnce(&mut ChainStatus),
    {
        let mut board = self.status.write().await;
        update(board.entry(chain).or_default());
    }

    /// Per-chain health rows for the observer API.
    pub async fn chain_snapshots(&self) -> Vec<ChainHealthSnapshot> {
        let board = self.status.read().await;
        let mut out = Vec::new();
        for chain in self.clients.chains() {
            let entry = board.get(&chain).cloned().unwrap_or_default();
            let (healthy, degraded, _down) = match self.clients.get(chain) {
                Ok(client) => client.health_counts().await,
                Err(_) => (0, 0, 0),
            };
            let status = if entry.halted || healthy + degraded == 0 {
                EndpointHealth::Down
            } else if degraded > 0 || entry.scanning_paused {
                EndpointHealth::Degraded
            } else {
                EndpointHealth::Healthy
            };
            out.push(ChainHealthSnapshot {
                chain,
                status,
                block_number: entry.last_block,
                gas_price_gwei: entry.gas_gwei,
                gas_ceiling_exceeded: entry.gas_ceiling_exceeded,
                healthy_endpoints: healthy,
                degraded_endpoints: degraded,
                scanning_paused: entry.scanning_paused,
                last_check: Utc::now(),
            });
        }
        out.sort_by_key(|s| s.chain.as_str());
        out
    }

    /// Store the alert and push it onto the stream.
    pub async fn raise_alert(&self, alert: Alert) {
        self.events.alert(&alert);
        if let Err(e) = self.store.record_alert(&alert).await {
            error!(error = %e, "failed to persist alert");
        }
    }
}
