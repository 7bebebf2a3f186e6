use crate::domain::market::LatestStockMetric;
use crate::domain::rules::ScoringRules;
use crate::error::EngineError;
use crate::storage::Store;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Contribution of one metric to a total score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricScore {
    pub metric_name: String,
    pub value: f64,
    /// Tier score of the matched range, `None` when no range matched.
    pub tier: Option<f64>,
    pub weight: f64,
    pub contribution: f64,
}

/// Per-rule breakdown of a snapshot, in rule-name order.
///
/// If a metric appears more than once, the row with the latest `recorded_at` is used; rows
/// recorded at the same instant resolve to the larger value. Metrics without a rule are ignored.
pub fn breakdown(rules: &ScoringRules, snapshot: &[LatestStockMetric]) -> Vec<MetricScore> {
    let mut latest: BTreeMap<&str, &LatestStockMetric> = BTreeMap::new();
    for row in snapshot {
        let newer = latest.get(row.metric_name.as_str()).map_or(true, |seen| {
            row.recorded_at
                .cmp(&seen.recorded_at)
                .then_with(|| row.value.total_cmp(&seen.value))
                .is_gt()
        });
        if newer {
            latest.insert(row.metric_name.as_str(), row);
        }
    }

    rules
        .iter()
        .filter_map(|(name, rule)| {
            let row = latest.get(name)?;
            let tier = rule.tier(row.value).map(|r| r.score);
            Some(MetricScore {
                metric_name: name.to_string(),
                value: row.value,
                tier,
                weight: rule.weight,
                contribution: tier.map(|t| t * rule.weight).unwrap_or(0.0),
            })
        })
        .collect()
}

/// Sum of weighted tier scores. Independent of snapshot ordering.
pub fn score_snapshot(rules: &ScoringRules, snapshot: &[LatestStockMetric]) -> f64 {
    breakdown(rules, snapshot)
        .iter()
        .map(|m| m.contribution)
        .sum()
}

#[derive(Clone)]
pub struct ScoringEngine {
    store: Arc<dyn Store>,
    rules: Arc<ScoringRules>,
}

impl ScoringEngine {
    pub fn new(store: Arc<dyn Store>, rules: Arc<ScoringRules>) -> Self {
        Self { store, rules }
    }

    pub fn rules(&self) -> &ScoringRules {
        &self.rules
    }

    /// Scores the latest persisted value of every metric of the stock.
    pub async fn score(&self, stock_id: Uuid) -> Result<f64, EngineError> {
        let snapshot = self.latest_snapshot(stock_id).await?;
        let score = score_snapshot(&self.rules, &snapshot);
        tracing::debug!(%stock_id, metrics = snapshot.len(), score, "scored stock");
        Ok(score)
    }

    pub async fn latest_snapshot(
        &self,
        stock_id: Uuid,
    ) -> Result<Vec<LatestStockMetric>, EngineError> {
        self.store
            .find_latest_stock_metrics(stock_id)
            .await
            .map_err(EngineError::Storage)
    }
}
