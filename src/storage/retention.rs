//! Retention sweeper
//!
//! Periodic, low-priority. Downsamples before deleting so the bucket tables
//! keep history past the raw retention horizon. Executions are never swept;
//! they are the audit trail.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{BotError, BotResult};
use crate::storage::store::Store;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

// Raw retention horizons.
const OPPORTUNITIES_DAYS: i64 = 7;
const STATS_DAYS: i64 = 90;
const GAS_DAYS: i64 = 30;
const CHAIN_METRICS_DAYS: i64 = 7;
const ALERTS_DAYS: i64 = 30;

pub struct RetentionSweeper {
    store: Store,
}

impl RetentionSweeper {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn run_once(&self) -> BotResult<SweepReport> {
        let mut report = SweepReport::default();

        self.downsample_stats_hourly().await?;
        self.downsample_gas_5min().await?;
        self.downsample_chain_metrics_5min().await?;

        report.opportunities = self
            .delete_older_than("opportunities", "revision_ts", OPPORTUNITIES_DAYS)
            .await?;
        report.stats = self
            .delete_older_than("stats_snapshots", "recorded_at", STATS_DAYS)
            .await?;
        report.gas = self
            .delete_older_than("gas_samples", "recorded_at", GAS_DAYS)
            .await?;
        report.chain_metrics = self
            .delete_older_than("chain_metrics", "recorded_at", CHAIN_METRICS_DAYS)
            .await?;
        report.alerts = self
            .delete_older_than("alerts", "created_at", ALERTS_DAYS)
            .await?;

        if report.total() > 0 {
            info!(
                opportunities = report.opportunities,
                stats = report.stats,
                gas = report.gas,
                chain_metrics = report.chain_metrics,
                alerts = report.alerts,
                "retention sweep deleted raw rows"
            );
        } else {
            debug!("retention sweep found nothing to delete");
        }
        Ok(report)
    }

    async fn delete_older_than(&self, table: &str, ts_col: &str, days: i64) -> BotResult<u64> {
        // julianday() parses both RFC3339 and SQLite datetime strings, so
        // mixed timestamp formats compare correctly.
        let sql = format!(
            "DELETE FROM {} WHERE julianday({}) < julianday('now', '-{} days')",
            table, ts_col, days
        );
        let result = sqlx::query(&sql)
            .execute(self.store.pool())
            .await
            .map_err(|e| BotError::Store(format!("sweep of {} failed: {}", table, e)))?;
        Ok(result.rows_affected())
    }

    async fn downsample_stats_hourly(&self) -> BotResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO stats_hourly (bucket_ts, trades_executed, successful_trades, total_profit_usd, gas_spent_usd)
            SELECT datetime((strftime('%s', recorded_at) / 3600) * 3600, 'unixepoch'),
                   MAX(trades_executed),
                   MAX(successful_trades),
                   CAST(AVG(CAST(total_profit_usd AS REAL)) AS TEXT),
                   CAST(AVG(CAST(gas_spent_usd AS REAL)) AS TEXT)
            FROM stats_snapshots
            GROUP BY 1
            "#,
        )
        .execute(self.store.pool())
        .await
        .map_err(|e| BotError::Store(format!("stats downsample failed: {}", e)))?;
        Ok(())
    }

    async fn downsample_gas_5min(&self) -> BotResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO gas_5min (bucket_ts, chain, avg_gwei, max_gwei)
            SELECT datetime((strftime('%s', recorded_at) / 300) * 300, 'unixepoch'),
                   chain,
                   CAST(AVG(CAST(smoothed_gwei AS REAL)) AS TEXT),
                   CAST(MAX(CAST(smoothed_gwei AS REAL)) AS TEXT)
            FROM gas_samples
            GROUP BY 1, 2
            "#,
        )
        .execute(self.store.pool())
        .await
        .map_err(|e| BotError::Store(format!("gas downsample failed: {}", e)))?;
        Ok(())
    }

    async fn downsample_chain_metrics_5min(&self) -> BotResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO chain_metrics_5min (bucket_ts, chain, avg_response_time_ms, healthy_ratio)
            SELECT datetime((strftime('%s', recorded_at) / 300) * 300, 'unixepoch'),
                   chain,
                   CAST(AVG(response_time_ms) AS INTEGER),
                   AVG(CAST(healthy_endpoints AS REAL) / MAX(healthy_endpoints + degraded_endpoints, 1))
            FROM chain_metrics
            GROUP BY 1, 2
            "#,
        )
        .execute(self.store.pool())
        .await
        .map_err(|e| BotError::Store(format!("chain metric downsample failed: {}", e)))?;
        Ok(())
    }

    /// Long-running sweep loop; errors are logged, never fatal.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "retention sweep failed");
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub opportunities: u64,
    pub stats: u64,
    pub gas: u64,
    pub chain_metrics: u64,
    pub alerts: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.opportunities + self.stats + self.gas + self.chain_metrics + self.alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::opportunity::tests::sample_opportunity;
    use chrono::{Duration as ChronoDuration, Utc};
    use sqlx::Row;

    #[tokio::test]
    async fn sweep_deletes_only_rows_past_raw_retention() {
        let store = Store::new("sqlite::memory:").await.unwrap();

        let mut fresh = sample_opportunity();
        fresh.freshness = Utc::now();
        store.record_opportunity_revision(&fresh).await.unwrap();

        let mut old = sample_opportunity();
        old.id = "0xold".into();
        old.freshness = Utc::now() - ChronoDuration::days(10);
        store.record_opportunity_revision(&old).await.unwrap();

        let sweeper = RetentionSweeper::new(store.clone());
        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report.opportunities, 1);

        let row = sqlx::query("SELECT COUNT(*) AS n FROM opportunities")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let n: i64 = row.get("n");
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn old_gas_samples_survive_in_buckets() {
        use crate::network::GasSample;
        use crate::types::ChainId;
        use rust_decimal_macros::dec;

        let store = Store::new("sqlite::memory:").await.unwrap();
        let sample = GasSample {
            chain: ChainId::Ethereum,
            base_fee_gwei: dec!(40),
            priority_fee_gwei: dec!(2),
            smoothed_gwei: dec!(42),
            max_fee_per_gas: 42_000_000_000,
            max_priority_fee_per_gas: 2_000_000_000,
            sampled_at: Utc::now() - ChronoDuration::days(45),
        };
        store.record_gas_sample(&sample).await.unwrap();

        let sweeper = RetentionSweeper::new(store.clone());
        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report.gas, 1);

        let row = sqlx::query("SELECT COUNT(*) AS n FROM gas_5min")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let n: i64 = row.get("n");
        assert_eq!(n, 1);
    }
}
