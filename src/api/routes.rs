//! Observer API handlers
//!
//! Read model over the live view and the store, plus the idempotent bot
//! controls. Wire shapes use camelCase to match the dashboard.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::warn;

use crate::scanner::SnapshotFilter;
use crate::state::AppState;
use crate::storage::ExecutionRow;
use crate::types::{ChainId, Opportunity, PortfolioStats, RiskClass};

pub struct ApiContext {
    pub app: Arc<AppState>,
    /// Token bucket for manual execution requests.
    pub execute_bucket: Mutex<(f64, Instant)>,
}

pub const MAX_EXECUTIONS_PER_MINUTE: f64 = 10.0;

impl ApiContext {
    pub fn new(app: Arc<AppState>) -> Arc<Self> {
        Arc::new(Self {
            app,
            execute_bucket: Mutex::new((MAX_EXECUTIONS_PER_MINUTE, Instant::now())),
        })
    }

    async fn allow_execute(&self) -> bool {
        let mut bucket = self.execute_bucket.lock().await;
        let refill = bucket.1.elapsed().as_secs_f64() * (MAX_EXECUTIONS_PER_MINUTE / 60.0);
        bucket.0 = (bucket.0 + refill).min(MAX_EXECUTIONS_PER_MINUTE);
        bucket.1 = Instant::now();
        if bucket.0 >= 1.0 {
            bucket.0 -= 1.0;
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityDto {
    pub id: String,
    pub pair: String,
    pub chain: String,
    pub buy_exchange: String,
    pub sell_exchange: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub spread_bps: Decimal,
    pub profit: Decimal,
    pub gas_estimate: Decimal,
    pub net_profit: Decimal,
    pub confidence: f64,
    pub risk: String,
    pub flash_loan_available: bool,
    pub rejection: Option<String>,
    pub detected_at: DateTime<Utc>,
}

impl From<&Opportunity> for OpportunityDto {
    fn from(opp: &Opportunity) -> Self {
        Self {
            id: opp.id.clone(),
            pair: opp.pair.clone(),
            chain: opp.chain.to_string(),
            buy_exchange: opp.buy.venue.clone(),
            sell_exchange: opp.sell.venue.clone(),
            buy_price: opp.buy.price,
            sell_price: opp.sell.price,
            spread_bps: opp.spread_bps,
            profit: opp.gross_profit_usd,
            gas_estimate: opp.gas_cost_usd,
            net_profit: opp.net_profit_usd,
            confidence: opp.confidence,
            risk: opp.risk.as_str().to_string(),
            flash_loan_available: opp.flash_loan_eligible,
            rejection: opp.rejection.clone(),
            detected_at: opp.freshness,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsDto {
    pub total_pnl: Decimal,
    pub today_pnl: Decimal,
    pub win_rate: f64,
    pub total_trades: u64,
    pub average_profit: Decimal,
    pub max_drawdown: Decimal,
    pub sharpe_ratio: f64,
    pub active_capital: Decimal,
    pub total_scans: u64,
    pub opportunities_found: u64,
}

impl From<&PortfolioStats> for StatsDto {
    fn from(stats: &PortfolioStats) -> Self {
        Self {
            total_pnl: stats.total_profit_usd,
            today_pnl: stats.today_profit_usd,
            win_rate: stats.win_rate,
            total_trades: stats.trades_executed,
            average_profit: stats.avg_profit_usd,
            max_drawdown: stats.max_drawdown_usd,
            sharpe_ratio: stats.sharpe_ratio,
            active_capital: stats.active_capital_usd,
            total_scans: stats.total_scans,
            opportunities_found: stats.opportunities_found,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDto {
    pub name: String,
    pub status: String,
    pub block_number: u64,
    pub gas: Decimal,
    pub gas_ceiling_exceeded: bool,
    pub healthy_endpoints: usize,
    pub degraded_endpoints: usize,
    pub scanning_paused: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDto {
    pub id: String,
    pub opportunity_id: String,
    pub chain: String,
    pub pair: String,
    pub status: String,
    pub tx_hash: Option<String>,
    pub profit: Option<String>,
    pub gas_used: Option<i64>,
    pub revert_reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl From<ExecutionRow> for ExecutionDto {
    fn from(row: ExecutionRow) -> Self {
        Self {
            id: row.execution_id,
            opportunity_id: row.opportunity_id,
            chain: row.chain,
            pair: row.pair,
            status: row.status,
            tx_hash: row.tx_hash,
            profit: row.realized_profit_usd,
            gas_used: row.gas_used,
            revert_reason: row.revert_reason,
            recorded_at: row.recorded_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct OpportunityQuery {
    pub chain: Option<String>,
    #[serde(rename = "minProfit")]
    pub min_profit: Option<Decimal>,
    pub risk: Option<String>,
}

pub async fn get_opportunities(
    State(ctx): State<Arc<ApiContext>>,
    Query(params): Query<OpportunityQuery>,
) -> Result<Json<Vec<OpportunityDto>>, StatusCode> {
    let chain = match params.chain.as_deref() {
        Some(raw) => Some(raw.parse::<ChainId>().map_err(|_| StatusCode::BAD_REQUEST)?),
        None => None,
    };
    let risk = match params.risk.as_deref() {
        Some(raw) => Some(raw.parse::<RiskClass>().map_err(|_| StatusCode::BAD_REQUEST)?),
        None => None,
    };

    let snapshot = ctx
        .app
        .live
        .snapshot(&SnapshotFilter {
            chain,
            min_profit_usd: params.min_profit,
            risk,
        })
        .await;
    Ok(Json(snapshot.iter().map(OpportunityDto::from).collect()))
}

pub async fn get_stats(
    State(ctx): State<Arc<ApiContext>>,
) -> Result<Json<StatsDto>, StatusCode> {
    if let Some(cached) = ctx.app.stats_cache.get().await {
        return Ok(Json(StatsDto::from(&cached)));
    }
    let stats = ctx.app.stats.read().await.clone();
    ctx.app.stats_cache.put(stats.clone()).await;
    Ok(Json(StatsDto::from(&stats)))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub series: String,
    pub window: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryPointDto {
    pub ts: DateTime<Utc>,
    pub value: f64,
}

pub async fn get_stats_history(
    State(ctx): State<Arc<ApiContext>>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryPointDto>>, StatusCode> {
    let hours = parse_window_hours(params.window.as_deref().unwrap_or("24h"))
        .ok_or(StatusCode::BAD_REQUEST)?;
    let points = ctx
        .app
        .store
        .stats_history(&params.series, hours)
        .await
        .map_err(|e| {
            warn!(error = %e, "stats history query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(
        points
            .into_iter()
            .map(|p| HistoryPointDto {
                ts: p.ts,
                value: p.value,
            })
            .collect(),
    ))
}

pub fn parse_window_hours(window: &str) -> Option<i64> {
    let (number, unit) = window.split_at(window.len().checked_sub(1)?);
    let n: i64 = number.parse().ok()?;
    match unit {
        "h" => Some(n),
        "d" => Some(n * 24),
        "w" => Some(n * 24 * 7),
        _ => None,
    }
}

pub async fn get_chains(State(ctx): State<Arc<ApiContext>>) -> Json<Vec<ChainDto>> {
    let snapshots = ctx.app.chain_snapshots().await;
    Json(
        snapshots
            .into_iter()
            .map(|s| ChainDto {
                name: s.chain.to_string(),
                status: format!("{:?}", s.status).to_lowercase(),
                block_number: s.block_number,
                gas: s.gas_price_gwei,
                gas_ceiling_exceeded: s.gas_ceiling_exceeded,
                healthy_endpoints: s.healthy_endpoints,
                degraded_endpoints: s.degraded_endpoints,
                scanning_paused: s.scanning_paused,
            })
            .collect(),
    )
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

pub async fn get_executions(
    State(ctx): State<Arc<ApiContext>>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<ExecutionDto>>, StatusCode> {
    let rows = ctx
        .app
        .store
        .recent_executions(params.limit.unwrap_or(50).clamp(1, 500))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(rows.into_iter().map(ExecutionDto::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    pub acknowledged: Option<bool>,
    pub limit: Option<i64>,
}

pub async fn get_alerts(
    State(ctx): State<Arc<ApiContext>>,
    Query(params): Query<AlertQuery>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let rows = ctx
        .app
        .store
        .recent_alerts(
            params.acknowledged.unwrap_or(false),
            params.limit.unwrap_or(50).clamp(1, 500),
        )
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let alerts: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|a| {
            serde_json::json!({
                "id": a.id,
                "severity": a.severity,
                "category": a.category,
                "chain": a.chain,
                "message": a.message,
                "createdAt": a.created_at,
                "acknowledged": a.acknowledged,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({ "total": alerts.len(), "alerts": alerts })))
}

pub async fn ack_alert(
    State(ctx): State<Arc<ApiContext>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    let found = ctx
        .app
        .store
        .acknowledge_alert(id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if found {
        Ok(StatusCode::OK)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

// Bot controls: all idempotent, all 200 on success.

pub async fn bot_start(State(ctx): State<Arc<ApiContext>>) -> StatusCode {
    ctx.app.set_running(true).await;
    StatusCode::OK
}

pub async fn bot_stop(State(ctx): State<Arc<ApiContext>>) -> StatusCode {
    ctx.app.set_running(false).await;
    StatusCode::OK
}

pub async fn bot_arm(State(ctx): State<Arc<ApiContext>>) -> StatusCode {
    ctx.app.set_armed(true).await;
    StatusCode::OK
}

pub async fn bot_disarm(State(ctx): State<Arc<ApiContext>>) -> StatusCode {
    ctx.app.set_armed(false).await;
    StatusCode::OK
}

pub async fn get_config(State(ctx): State<Arc<ApiContext>>) -> Json<serde_json::Value> {
    let config = ctx.app.config.read().await;
    Json(serde_json::to_value(&*config).unwrap_or_default())
}

pub async fn put_config(
    State(ctx): State<Arc<ApiContext>>,
    Json(patch): Json<crate::config::ConfigPatch>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let next = {
        let current = ctx.app.config.read().await;
        patch
            .apply(&current)
            .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?
    };

    *ctx.app.config.write().await = next.clone();

    let revision = Utc::now().timestamp().to_string();
    if let Err(e) = ctx.app.store.kv_put("config_revision", &revision).await {
        warn!(error = %e, "config revision not persisted");
    }
    Ok(Json(serde_json::to_value(&next).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub opportunity_id: String,
}

/// Manual execution of a live opportunity, rate limited.
pub async fn execute(
    State(ctx): State<Arc<ApiContext>>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    if !ctx.allow_execute().await {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            format!(
                "rate limit exceeded, max {} executions per minute",
                MAX_EXECUTIONS_PER_MINUTE
            ),
        ));
    }

    let Some(opp) = ctx.app.live.find(&request.opportunity_id).await else {
        return Err((StatusCode::NOT_FOUND, "opportunity not found".into()));
    };

    ctx.app
        .exec_tx
        .send(opp)
        .await
        .map_err(|_| (StatusCode::SERVICE_UNAVAILABLE, "executor unavailable".into()))?;

    Ok(Json(serde_json::json!({
        "status": "queued",
        "opportunityId": request.opportunity_id,
    })))
}

pub async fn root(State(ctx): State<Arc<ApiContext>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "online",
        "botRunning": ctx.app.is_running(),
        "autoExecuteArmed": ctx.app.is_armed(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_parsing_covers_units() {
        assert_eq!(parse_window_hours("24h"), Some(24));
        assert_eq!(parse_window_hours("7d"), Some(168));
        assert_eq!(parse_window_hours("2w"), Some(336));
        assert_eq!(parse_window_hours("nope"), None);
        assert_eq!(parse_window_hours(""), None);
    }
}
