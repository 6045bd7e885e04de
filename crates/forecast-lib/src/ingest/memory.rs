//! In-memory store for tests and local demos

use super::{async_trait, StoreError, TimeSeriesStore};
use crate::models::MetricPoint;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Deterministic store backed by a map, able to simulate outages per metric
#[derive(Default)]
pub struct InMemoryStore {
    series: RwLock<HashMap<String, Vec<MetricPoint>>>,
    unreachable: RwLock<HashSet<String>>,
    queries: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the history held for `metric`
    pub async fn insert(&self, metric: &str, points: Vec<MetricPoint>) {
        self.series.write().await.insert(metric.to_string(), points);
    }

    /// Make every query for `metric` fail as if the store were down
    pub async fn set_unreachable(&self, metric: &str) {
        self.unreachable.write().await.insert(metric.to_string());
    }

    /// Number of queries served or refused so far
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TimeSeriesStore for InMemoryStore {
    async fn query(
        &self,
        metric: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<MetricPoint>, StoreError> {
        self.queries.fetch_add(1, Ordering::Relaxed);

        if self.unreachable.read().await.contains(metric) {
            return Err(StoreError::Unreachable(format!(
                "simulated outage for {}",
                metric
            )));
        }

        let series = self.series.read().await;
        let points = series
            .get(metric)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.timestamp >= start && p.timestamp < end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        Ok(points)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
