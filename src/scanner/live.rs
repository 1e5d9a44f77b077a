//! Live opportunity map
//!
//! The scanner is the only writer, one task per chain; observers take
//! snapshot reads. Revisions for the same stable id apply in timestamp
//! order and late arrivals are dropped. Freshness past the chain TTL
//! retires the row from the live view.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::api::stream::EventBus;
use crate::ranking::rank_cmp;
use crate::types::{ChainId, Opportunity, RiskClass};
use rust_decimal::Decimal;

#[derive(Debug, Default, Clone)]
pub struct SnapshotFilter {
    pub chain: Option<ChainId>,
    pub min_profit_usd: Option<Decimal>,
    pub risk: Option<RiskClass>,
}

pub struct LiveOpportunityMap {
    by_chain: HashMap<ChainId, RwLock<HashMap<String, Opportunity>>>,
    events: Arc<EventBus>,
}

impl LiveOpportunityMap {
    pub fn new(chains: &[ChainId], events: Arc<EventBus>) -> Self {
        let by_chain = chains
            .iter()
            .map(|c| (*c, RwLock::new(HashMap::new())))
            .collect();
        Self { by_chain, events }
    }

    /// Upsert by stable id. Returns false when the revision is older than
    /// the stored one and was dropped.
    pub async fn upsert(&self, mut opp: Opportunity) -> bool {
        let Some(shard) = self.by_chain.get(&opp.chain) else {
            return false;
        };
        let mut map = shard.write().await;

        if let Some(existing) = map.get(&opp.id) {
            if existing.freshness > opp.freshness {
                debug!(id = %opp.id, "dropping out-of-order opportunity revision");
                return false;
            }
            // Carry the trend history forward, then append this revision's
            // sell-side sample.
            let newest = opp.trend.back().copied();
            opp.trend = existing.trend.clone();
            if let Some(price) = newest {
                opp.push_trend_sample(price);
            }
        }

        self.events.opportunity_upsert(&opp);
        map.insert(opp.id.clone(), opp);
        true
    }

    /// Tag a live opportunity with a rejection reason. It stays observable
    /// until its freshness TTL retires it.
    pub async fn mark_rejected(&self, chain: ChainId, id: &str, reason: &str) {
        if let Some(shard) = self.by_chain.get(&chain) {
            let mut map = shard.write().await;
            if let Some(opp) = map.get_mut(id) {
                opp.rejection = Some(reason.to_string());
                self.events.opportunity_upsert(opp);
            }
        }
    }

    /// Drop rows whose freshness exceeded the chain TTL. Returns retired ids.
    pub async fn retire_expired(&self, chain: ChainId) -> Vec<String> {
        let Some(shard) = self.by_chain.get(&chain) else {
            return Vec::new();
        };
        let ttl = ChronoDuration::milliseconds(chain.metadata().freshness_ttl_ms as i64);
        let cutoff = Utc::now() - ttl;

        let mut map = shard.write().await;
        let expired: Vec<String> = map
            .iter()
            .filter(|(_, opp)| opp.freshness < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            map.remove(id);
            self.events.opportunity_retire(id);
        }
        expired
    }

    /// Remove an opportunity promoted to execution.
    pub async fn take(&self, chain: ChainId, id: &str) -> Option<Opportunity> {
        let shard = self.by_chain.get(&chain)?;
        let removed = shard.write().await.remove(id);
        if removed.is_some() {
            self.events.opportunity_retire(id);
        }
        removed
    }

    pub async fn get(&self, chain: ChainId, id: &str) -> Option<Opportunity> {
        let shard = self.by_chain.get(&chain)?;
        shard.read().await.get(id).cloned()
    }

    pub async fn find(&self, id: &str) -> Option<Opportunity> {
        for shard in self.by_chain.values() {
            if let Some(opp) = shard.read().await.get(id) {
                return Some(opp.clone());
            }
        }
        None
    }

    /// Ranked snapshot across chains with optional filters.
    pub async fn snapshot(&self, filter: &SnapshotFilter) -> Vec<Opportunity> {
        let mut out = Vec::new();
        for (chain, shard) in &self.by_chain {
            if let Some(wanted) = filter.chain {
                if *chain != wanted {
                    continue;
                }
            }
            let map = shard.read().await;
            for opp in map.values() {
                if let Some(min) = filter.min_profit_usd {
                    if opp.net_profit_usd < min {
                        continue;
                    }
                }
                if let Some(risk) = filter.risk {
                    if opp.risk != risk {
                        continue;
                    }
                }
                out.push(opp.clone());
            }
        }
        out.sort_by(rank_cmp);
        out
    }

    pub async fn len(&self) -> usize {
        let mut total = 0;
        for shard in self.by_chain.values() {
            total += shard.read().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::opportunity::tests::sample_opportunity;
    use rust_decimal_macros::dec;

    fn map() -> LiveOpportunityMap {
        LiveOpportunityMap::new(&[ChainId::Polygon], Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn upsert_then_snapshot_round_trips() {
        let live = map();
        let opp = sample_opportunity();
        assert!(live.upsert(opp.clone()).await);

        let snap = live.snapshot(&SnapshotFilter::default()).await;
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id, opp.id);
    }

    #[tokio::test]
    async fn out_of_order_revision_is_dropped() {
        let live = map();
        let mut newer = sample_opportunity();
        newer.freshness = Utc::now();
        let mut older = newer.clone();
        older.freshness = newer.freshness - ChronoDuration::seconds(5);
        older.net_profit_usd = dec!(1);

        assert!(live.upsert(newer.clone()).await);
        assert!(!live.upsert(older).await);

        let stored = live.get(ChainId::Polygon, &newer.id).await.unwrap();
        assert_eq!(stored.net_profit_usd, newer.net_profit_usd);
    }

    #[tokio::test]
    async fn stale_rows_retire() {
        let live = map();
        let mut opp = sample_opportunity();
        opp.freshness = Utc::now() - ChronoDuration::seconds(600);
        live.upsert(opp.clone()).await;

        let retired = live.retire_expired(ChainId::Polygon).await;
        assert_eq!(retired, vec![opp.id]);
        assert!(live.is_empty().await);
    }

    #[tokio::test]
    async fn snapshot_filters_apply() {
        let live = map();
        let mut low = sample_opportunity();
        low.id = "0xlow".into();
        low.net_profit_usd = dec!(5);
        low.risk = RiskClass::High;
        let mut high = sample_opportunity();
        high.id = "0xhigh".into();
        live.upsert(low).await;
        live.upsert(high).await;

        let filtered = live
            .snapshot(&SnapshotFilter {
                min_profit_usd: Some(dec!(10)),
                ..Default::default()
            })
            .await;
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "0xhigh");

        let by_risk = live
            .snapshot(&SnapshotFilter {
                risk: Some(RiskClass::High),
                ..Default::default()
            })
            .await;
        assert_eq!(by_risk.len(), 1);
        assert_eq!(by_risk[0].id, "0xlow");
    }

    #[tokio::test]
    async fn trend_accumulates_across_revisions() {
        let live = map();
        let mut first = sample_opportunity();
        first.trend.push_back(dec!(0.8941));
        live.upsert(first.clone()).await;

        let mut second = first.clone();
        second.freshness = Utc::now() + ChronoDuration::seconds(1);
        second.trend.clear();
        second.trend.push_back(dec!(0.8950));
        live.upsert(second).await;

        let stored = live.get(ChainId::Polygon, &first.id).await.unwrap();
        assert_eq!(stored.trend.len(), 2);
        assert_eq!(*stored.trend.back().unwrap(), dec!(0.8950));
    }
}
