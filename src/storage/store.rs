//! Durable time-series store
//!
//! SQLite behind sqlx. Six append-only series plus a small key-value region.
//! The store is the only writer of durable history and rejects execution
//! status regressions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use std::str::FromStr;

use crate::errors::{BotError, BotResult};
use crate::network::GasSample;
use crate::types::{
    Alert, ChainId, Execution, ExecutionStatus, Opportunity, PortfolioStats,
};

#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExecutionRow {
    pub execution_id: String,
    pub opportunity_id: String,
    pub chain: String,
    pub pair: String,
    pub status: String,
    pub nonce: Option<i64>,
    pub tx_hash: Option<String>,
    pub gas_used: Option<i64>,
    pub gas_price_gwei: Option<String>,
    pub expected_profit_usd: String,
    pub realized_profit_usd: Option<String>,
    pub revert_reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlertRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub severity: String,
    pub category: String,
    pub chain: Option<String>,
    pub message: String,
    pub acknowledged: bool,
}

#[derive(Debug, Clone)]
pub struct HistoryPoint {
    pub ts: DateTime<Utc>,
    pub value: f64,
}

impl Store {
    pub async fn new(database_url: &str) -> BotResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| BotError::Store(format!("connect failed: {}", e)))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| BotError::Store(format!("migration failed: {}", e)))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Opportunities (revisions keyed by (id, revision_ts))
    // ------------------------------------------------------------------

    pub async fn record_opportunity_revision(&self, opp: &Opportunity) -> BotResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO opportunities
                (opportunity_id, revision_ts, chain, pair, buy_venue, sell_venue,
                 buy_price, sell_price, spread_bps, notional_usd, gross_profit_usd,
                 gas_cost_usd, slippage_reserve_usd, flash_fee_usd, net_profit_usd,
                 confidence, risk, flash_loan_eligible, rejection)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&opp.id)
        .bind(opp.freshness)
        .bind(opp.chain.as_str())
        .bind(&opp.pair)
        .bind(&opp.buy.venue)
        .bind(&opp.sell.venue)
        .bind(opp.buy.price.to_string())
        .bind(opp.sell.price.to_string())
        .bind(opp.spread_bps.to_string())
        .bind(opp.notional_usd.to_string())
        .bind(opp.gross_profit_usd.to_string())
        .bind(opp.gas_cost_usd.to_string())
        .bind(opp.slippage_reserve_usd.to_string())
        .bind(opp.flash_fee_usd.to_string())
        .bind(opp.net_profit_usd.to_string())
        .bind(opp.confidence)
        .bind(opp.risk.as_str())
        .bind(opp.flash_loan_eligible)
        .bind(&opp.rejection)
        .execute(&self.pool)
        .await
        .map_err(|e| BotError::Store(format!("opportunity insert failed: {}", e)))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Executions (append-only transition journal)
    // ------------------------------------------------------------------

    /// Journal a transition. Regressions against the last recorded status
    /// for the same execution are rejected.
    pub async fn record_execution(&self, execution: &Execution) -> BotResult<()> {
        if let Some(last) = self.last_execution_status(&execution.id).await? {
            if last != execution.status
                && !ExecutionStatus::can_transition(last, execution.status)
            {
                return Err(BotError::Store(format!(
                    "illegal execution transition {} -> {} for {}",
                    last.as_str(),
                    execution.status.as_str(),
                    execution.id
                )));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO executions
                (execution_id, opportunity_id, chain, pair, status, nonce, tx_hash,
                 block_number, gas_used, gas_price_gwei, expected_profit_usd,
                 realized_profit_usd, revert_reason, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.opportunity_id)
        .bind(execution.chain.as_str())
        .bind(&execution.pair)
        .bind(execution.status.as_str())
        .bind(execution.nonce.map(|n| n as i64))
        .bind(execution.tx_hashes.last())
        .bind(execution.block_number.map(|n| n as i64))
        .bind(execution.gas_used.map(|n| n as i64))
        .bind(execution.gas_price_gwei.map(|g| g.to_string()))
        .bind(execution.expected_profit_usd.to_string())
        .bind(execution.realized_profit_usd.map(|p| p.to_string()))
        .bind(&execution.revert_reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| BotError::Store(format!("execution insert failed: {}", e)))?;
        Ok(())
    }

    pub async fn last_execution_status(
        &self,
        execution_id: &str,
    ) -> BotResult<Option<ExecutionStatus>> {
        let row = sqlx::query(
            "SELECT status FROM executions WHERE execution_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BotError::Store(format!("status query failed: {}", e)))?;

        match row {
            Some(row) => {
                let status: String = row.get("status");
                Ok(Some(status.parse().map_err(BotError::Store)?))
            }
            None => Ok(None),
        }
    }

    /// True when any execution's latest journaled status is non-terminal.
    /// Startup refuses to run in that case.
    pub async fn has_non_terminal_executions(&self) -> BotResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM (
                SELECT execution_id, status,
                       ROW_NUMBER() OVER (PARTITION BY execution_id ORDER BY id DESC) AS rn
                FROM executions
            ) WHERE rn = 1 AND status NOT IN ('confirmed', 'reverted', 'failed', 'cancelled')
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BotError::Store(format!("non-terminal scan failed: {}", e)))?;
        let n: i64 = row.get("n");
        Ok(n > 0)
    }

    pub async fn recent_executions(&self, limit: i64) -> BotResult<Vec<ExecutionRow>> {
        sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT execution_id, opportunity_id, chain, pair, status, nonce, tx_hash,
                   gas_used, gas_price_gwei, expected_profit_usd, realized_profit_usd,
                   revert_reason, recorded_at
            FROM executions
            WHERE id IN (SELECT MAX(id) FROM executions GROUP BY execution_id)
            ORDER BY recorded_at DESC LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BotError::Store(format!("executions query failed: {}", e)))
    }

    pub async fn execution_history(&self, execution_id: &str) -> BotResult<Vec<ExecutionRow>> {
        sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT execution_id, opportunity_id, chain, pair, status, nonce, tx_hash,
                   gas_used, gas_price_gwei, expected_profit_usd, realized_profit_usd,
                   revert_reason, recorded_at
            FROM executions WHERE execution_id = ? ORDER BY id ASC
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BotError::Store(format!("execution history query failed: {}", e)))
    }

    // ------------------------------------------------------------------
    // Stats snapshots
    // ------------------------------------------------------------------

    pub async fn record_stats_snapshot(&self, stats: &PortfolioStats) -> BotResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stats_snapshots
                (recorded_at, total_scans, opportunities_found, trades_executed,
                 successful_trades, failed_trades, total_profit_usd, today_profit_usd,
                 gas_spent_usd, win_rate, avg_profit_usd, sharpe_ratio,
                 max_drawdown_usd, active_capital_usd)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now())
        .bind(stats.total_scans as i64)
        .bind(stats.opportunities_found as i64)
        .bind(stats.trades_executed as i64)
        .bind(stats.successful_trades as i64)
        .bind(stats.failed_trades as i64)
        .bind(stats.total_profit_usd.to_string())
        .bind(stats.today_profit_usd.to_string())
        .bind(stats.gas_spent_usd.to_string())
        .bind(stats.win_rate)
        .bind(stats.avg_profit_usd.to_string())
        .bind(stats.sharpe_ratio)
        .bind(stats.max_drawdown_usd.to_string())
        .bind(stats.active_capital_usd.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| BotError::Store(format!("stats insert failed: {}", e)))?;
        Ok(())
    }

    pub async fn latest_stats(&self) -> BotResult<Option<PortfolioStats>> {
        let row = sqlx::query(
            "SELECT * FROM stats_snapshots ORDER BY recorded_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BotError::Store(format!("stats query failed: {}", e)))?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(PortfolioStats {
            total_scans: row.get::<i64, _>("total_scans") as u64,
            opportunities_found: row.get::<i64, _>("opportunities_found") as u64,
            trades_executed: row.get::<i64, _>("trades_executed") as u64,
            successful_trades: row.get::<i64, _>("successful_trades") as u64,
            failed_trades: row.get::<i64, _>("failed_trades") as u64,
            total_profit_usd: parse_decimal(row.get("total_profit_usd"))?,
            today_profit_usd: parse_decimal(row.get("today_profit_usd"))?,
            gas_spent_usd: parse_decimal(row.get("gas_spent_usd"))?,
            win_rate: row.get("win_rate"),
            avg_profit_usd: parse_decimal(row.get("avg_profit_usd"))?,
            sharpe_ratio: row.get("sharpe_ratio"),
            max_drawdown_usd: parse_decimal(row.get("max_drawdown_usd"))?,
            active_capital_usd: parse_decimal(row.get("active_capital_usd"))?,
        }))
    }

    /// Downsampled series for `/stats/history`.
    pub async fn stats_history(
        &self,
        series: &str,
        window_hours: i64,
    ) -> BotResult<Vec<HistoryPoint>> {
        let column = match series {
            "profit" => "CAST(total_profit_usd AS REAL)",
            "trades" => "CAST(trades_executed AS REAL)",
            "gas" => "CAST(gas_spent_usd AS REAL)",
            other => {
                return Err(BotError::Config(format!("unknown history series: {}", other)))
            }
        };
        let sql = format!(
            r#"
            SELECT datetime((strftime('%s', recorded_at) / 3600) * 3600, 'unixepoch') AS bucket,
                   AVG({}) AS value
            FROM stats_snapshots
            WHERE julianday(recorded_at) >= julianday('now', ?)
            GROUP BY bucket ORDER BY bucket ASC
            "#,
            column
        );
        let rows = sqlx::query(&sql)
            .bind(format!("-{} hours", window_hours))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BotError::Store(format!("history query failed: {}", e)))?;

        rows.into_iter()
            .map(|row| {
                let bucket: String = row.get("bucket");
                let ts = DateTime::parse_from_rfc3339(&format!("{}Z", bucket.replace(' ', "T")))
                    .map_err(|e| BotError::Store(format!("bad bucket timestamp: {}", e)))?
                    .with_timezone(&Utc);
                Ok(HistoryPoint {
                    ts,
                    value: row.get("value"),
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Gas samples / chain metrics / alerts
    // ------------------------------------------------------------------

    pub async fn record_gas_sample(&self, sample: &GasSample) -> BotResult<()> {
        sqlx::query(
            r#"
            INSERT INTO gas_samples (recorded_at, chain, base_fee_gwei, priority_fee_gwei, smoothed_gwei)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(sample.sampled_at)
        .bind(sample.chain.as_str())
        .bind(sample.base_fee_gwei.to_string())
        .bind(sample.priority_fee_gwei.to_string())
        .bind(sample.smoothed_gwei.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| BotError::Store(format!("gas sample insert failed: {}", e)))?;
        Ok(())
    }

    pub async fn record_chain_metric(
        &self,
        chain: ChainId,
        block_number: u64,
        healthy: usize,
        degraded: usize,
        status: &str,
        response_time_ms: u64,
    ) -> BotResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chain_metrics
                (recorded_at, chain, block_number, healthy_endpoints, degraded_endpoints, status, response_time_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now())
        .bind(chain.as_str())
        .bind(block_number as i64)
        .bind(healthy as i64)
        .bind(degraded as i64)
        .bind(status)
        .bind(response_time_ms as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| BotError::Store(format!("chain metric insert failed: {}", e)))?;
        Ok(())
    }

    pub async fn record_alert(&self, alert: &Alert) -> BotResult<()> {
        sqlx::query(
            "INSERT INTO alerts (created_at, severity, category, chain, message) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(alert.created_at)
        .bind(alert.severity.as_str())
        .bind(&alert.category)
        .bind(alert.chain.map(|c| c.as_str()))
        .bind(&alert.message)
        .execute(&self.pool)
        .await
        .map_err(|e| BotError::Store(format!("alert insert failed: {}", e)))?;
        Ok(())
    }

    pub async fn recent_alerts(
        &self,
        include_acknowledged: bool,
        limit: i64,
    ) -> BotResult<Vec<AlertRow>> {
        let sql = if include_acknowledged {
            "SELECT * FROM alerts ORDER BY created_at DESC LIMIT ?"
        } else {
            "SELECT * FROM alerts WHERE acknowledged = 0 ORDER BY created_at DESC LIMIT ?"
        };
        sqlx::query_as::<_, AlertRow>(sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BotError::Store(format!("alerts query failed: {}", e)))
    }

    pub async fn acknowledge_alert(&self, id: i64) -> BotResult<bool> {
        let result = sqlx::query("UPDATE alerts SET acknowledged = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| BotError::Store(format!("alert ack failed: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Key-value region
    // ------------------------------------------------------------------

    pub async fn kv_put(&self, key: &str, value: &str) -> BotResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_state (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| BotError::Store(format!("kv put failed: {}", e)))?;
        Ok(())
    }

    pub async fn kv_get(&self, key: &str) -> BotResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BotError::Store(format!("kv get failed: {}", e)))?;
        Ok(row.map(|r| r.get("value")))
    }

    pub async fn persist_nonce(&self, chain: ChainId, signer: &str, nonce: u64) -> BotResult<()> {
        self.kv_put(&format!("nonce:{}:{}", chain.as_str(), signer), &nonce.to_string())
            .await
    }

    pub async fn load_nonce(&self, chain: ChainId, signer: &str) -> BotResult<Option<u64>> {
        Ok(self
            .kv_get(&format!("nonce:{}:{}", chain.as_str(), signer))
            .await?
            .and_then(|v| v.parse().ok()))
    }
}

fn parse_decimal(raw: String) -> BotResult<Decimal> {
    Decimal::from_str(&raw).map_err(|e| BotError::Store(format!("bad decimal '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::opportunity::tests::sample_opportunity;
    use crate::types::Execution;
    use rust_decimal_macros::dec;

    async fn store() -> Store {
        Store::new("sqlite::memory:").await.expect("store")
    }

    #[tokio::test]
    async fn opportunity_revisions_upsert_by_id_and_ts() {
        let store = store().await;
        let opp = sample_opportunity();
        store.record_opportunity_revision(&opp).await.unwrap();
        store.record_opportunity_revision(&opp).await.unwrap();

        let row = sqlx::query("SELECT COUNT(*) AS n FROM opportunities")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let n: i64 = row.get("n");
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn execution_regressions_are_rejected() {
        let store = store().await;
        let mut exec = Execution::new(
            "0xopp".into(),
            ChainId::Polygon,
            "USDT/WMATIC".into(),
            dec!(54.50),
        );
        exec.status = ExecutionStatus::Pending;
        store.record_execution(&exec).await.unwrap();

        exec.status = ExecutionStatus::Confirmed;
        store.record_execution(&exec).await.unwrap();

        // Reorg path is legal...
        exec.status = ExecutionStatus::Pending;
        store.record_execution(&exec).await.unwrap();

        // ...but a jump back to Submitted is not.
        exec.status = ExecutionStatus::Submitted;
        assert!(store.record_execution(&exec).await.is_err());

        let history = store.execution_history(&exec.id).await.unwrap();
        let states: Vec<&str> = history.iter().map(|r| r.status.as_str()).collect();
        assert_eq!(states, vec!["pending", "confirmed", "pending"]);
    }

    #[tokio::test]
    async fn non_terminal_executions_block_restart() {
        let store = store().await;
        assert!(!store.has_non_terminal_executions().await.unwrap());

        let mut exec = Execution::new(
            "0xopp".into(),
            ChainId::Polygon,
            "USDT/WMATIC".into(),
            dec!(10),
        );
        exec.status = ExecutionStatus::Pending;
        store.record_execution(&exec).await.unwrap();
        assert!(store.has_non_terminal_executions().await.unwrap());

        exec.status = ExecutionStatus::Confirmed;
        store.record_execution(&exec).await.unwrap();
        assert!(!store.has_non_terminal_executions().await.unwrap());
    }

    #[tokio::test]
    async fn kv_round_trips_and_nonces_persist() {
        let store = store().await;
        store.kv_put("bot_running", "true").await.unwrap();
        assert_eq!(
            store.kv_get("bot_running").await.unwrap().as_deref(),
            Some("true")
        );

        store
            .persist_nonce(ChainId::Ethereum, "0xsigner", 42)
            .await
            .unwrap();
        assert_eq!(
            store.load_nonce(ChainId::Ethereum, "0xsigner").await.unwrap(),
            Some(42)
        );
    }

    #[tokio::test]
    async fn stats_snapshot_round_trips() {
        let store = store().await;
        let stats = PortfolioStats {
            total_scans: 10,
            trades_executed: 3,
            total_profit_usd: dec!(123.45),
            ..Default::default()
        };
        store.record_stats_snapshot(&stats).await.unwrap();
        let latest = store.latest_stats().await.unwrap().unwrap();
        assert_eq!(latest.total_scans, 10);
        assert_eq!(latest.total_profit_usd, dec!(123.45));
    }
}
