//! Arbitrage engine entry point
//!
//! Startup order matters for the exit codes: configuration (1), store (2),
//! chain endpoints (3). After that, workers run until shutdown.

use arbnexus::api::{build_router, ApiContext};
use arbnexus::config::Config;
use arbnexus::execution::ExecutionEngine;
use arbnexus::scanner::ChainScanner;
use arbnexus::state::AppState;
use arbnexus::storage::{RetentionSweeper, Store};
use arbnexus::{utils, Opportunity};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const EXIT_CONFIG_INVALID: i32 = 1;
const EXIT_STORE_UNREACHABLE: i32 = 2;
const EXIT_NO_HEALTHY_ENDPOINTS: i32 = 3;

const EXECUTION_QUEUE_DEPTH: usize = 64;
const STATS_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config = Config::load();

    utils::setup_output_directories(&config.data_dir)?;
    let _logging_guard = utils::setup_logging(&format!("{}/logs", config.data_dir))?;

    info!("arbnexus multi-chain arbitrage engine starting");
    info!("   Min profit: ${}", config.min_profit_usd);
    info!("   Gas ceiling: {} gwei", config.max_gas_price_gwei);
    info!("   Flash loans: {}", config.use_flash_loans);
    info!("   Dry run: {}", config.dry_run_mode);
    info!(
        "   Chains: {:?}",
        config.configured_chains().iter().map(|c| c.as_str()).collect::<Vec<_>>()
    );

    if let Err(e) = config.validate() {
        error!("configuration invalid: {}", e);
        std::process::exit(EXIT_CONFIG_INVALID);
    }

    let store = match Store::new(&config.database_url).await {
        Ok(store) => store,
        Err(e) => {
            error!("store unreachable: {}", e);
            std::process::exit(EXIT_STORE_UNREACHABLE);
        }
    };

    // In-flight executions do not survive restarts; the audit trail must be
    // resolved before the engine will run again.
    match store.has_non_terminal_executions().await {
        Ok(true) => {
            error!("refusing to start: non-terminal executions found in the store");
            std::process::exit(EXIT_STORE_UNREACHABLE);
        }
        Ok(false) => {}
        Err(e) => {
            error!("store unreachable: {}", e);
            std::process::exit(EXIT_STORE_UNREACHABLE);
        }
    }

    let (exec_tx, exec_rx) = mpsc::channel::<Opportunity>(EXECUTION_QUEUE_DEPTH);
    let state = match AppState::build(config, store, exec_tx).await {
        Ok(state) => state,
        Err(e) => {
            error!("startup failed: {}", e);
            std::process::exit(EXIT_CONFIG_INVALID);
        }
    };

    if !state.clients.any_endpoint_alive().await {
        error!("no healthy chain endpoints reachable");
        std::process::exit(EXIT_NO_HEALTHY_ENDPOINTS);
    }

    // Scanner[chain] workers.
    for chain in state.clients.chains() {
        let scanner = ChainScanner::new(Arc::clone(&state), chain);
        tokio::spawn(scanner.run());
    }

    // Executor worker.
    let engine = match ExecutionEngine::new(Arc::clone(&state)).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("execution engine unusable: {}", e);
            std::process::exit(EXIT_CONFIG_INVALID);
        }
    };
    tokio::spawn(Arc::clone(&engine).run(exec_rx));

    // Retention worker.
    tokio::spawn(RetentionSweeper::new(state.store.clone()).run());

    // Stats publisher worker.
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATS_SNAPSHOT_INTERVAL);
            loop {
                ticker.tick().await;
                let stats = state.stats.read().await.clone();
                if let Err(e) = state.store.record_stats_snapshot(&stats).await {
                    warn!(error = %e, "stats snapshot not persisted");
                }
            }
        });
    }

    // Observer API.
    let bind_addr = state.config.read().await.api_bind.clone();
    let router = build_router(ApiContext::new(Arc::clone(&state)));
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("observer API listening on {}", bind_addr);

    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            info!("shutdown signal received");
            shutdown_state.set_running(false).await;
        })
        .await?;

    let stats = state.stats.read().await;
    info!("final statistics:");
    info!("   Scans: {}", stats.total_scans);
    info!("   Opportunities found: {}", stats.opportunities_found);
    info!("   Trades executed: {}", stats.trades_executed);
    info!("   Total profit: ${}", stats.total_profit_usd);
    info!("clean shutdown");

    Ok(())
}
