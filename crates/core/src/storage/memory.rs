use crate::domain::market::{LatestStockMetric, Metric, Stock, StockMetric};
use crate::domain::recommendation::{Action, Analysis, Recommendation};
use crate::domain::user::{NewUser, User};
use crate::storage::Store;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Descriptions for the metrics the scoring rules know about.
pub const CANONICAL_METRICS: [(&str, &str); 6] = [
    ("P/E Ratio", "Price-to-Earnings Ratio: A measure of valuation"),
    ("EPS", "Earnings Per Share: A measure of profitability"),
    ("Market Cap", "Market Capitalization: Total value of a company's shares"),
    ("Revenue Growth", "Growth in company revenue over time"),
    ("Dividend Yield", "The dividend income relative to the stock price"),
    ("Debt/Equity Ratio", "A measure of a company's financial leverage"),
];

#[derive(Debug, Default)]
struct Tables {
    users: Vec<User>,
    stocks: Vec<Stock>,
    metrics: Vec<Metric>,
    stock_metrics: Vec<StockMetric>,
    analyses: Vec<Analysis>,
    recommendations: Vec<Recommendation>,
}

impl Tables {
    fn insert_user(&mut self, id: Uuid, user: &NewUser) -> anyhow::Result<User> {
        anyhow::ensure!(
            self.users.iter().all(|u| u.email != user.email),
            "insert users failed: email {} already registered",
            user.email
        );
        let user = User {
            id,
            email: user.email.clone(),
            firstname: user.firstname.clone(),
            lastname: user.lastname.clone(),
            created_at: Utc::now(),
        };
        self.users.push(user.clone());
        Ok(user)
    }

    fn upsert_stock(&mut self, symbol: &str, company: &str) -> Stock {
        if let Some(existing) = self.stocks.iter_mut().find(|s| s.symbol == symbol) {
            existing.company = company.to_string();
            return existing.clone();
        }
        let stock = Stock {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            company: company.to_string(),
        };
        self.stocks.push(stock.clone());
        stock
    }
}

/// Process-local store for dry runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    failing_metric_writes: HashSet<Uuid>,
    fail_recommendation_writes: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding the canonical metric catalog.
    pub fn with_canonical_metrics() -> Self {
        let store = Self::new();
        for (name, description) in CANONICAL_METRICS {
            store.insert_metric(name, description);
        }
        store
    }

    /// Registers a placeholder user and returns its id.
    pub fn insert_user(&self) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        let user = NewUser {
            email: format!("user-{id}@example.com"),
            firstname: "Dry".into(),
            lastname: "Run".into(),
        };
        let mut tables = self.lock()?;
        tables.insert_user(id, &user)?;
        Ok(id)
    }

    pub fn insert_stock(&self, symbol: &str, company: &str) -> anyhow::Result<Stock> {
        Ok(self.lock()?.upsert_stock(symbol, company))
    }

    fn insert_metric(&self, name: &str, description: &str) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.metrics.push(Metric {
                id: Uuid::new_v4(),
                name: name.to_string(),
                description: description.to_string(),
            });
        }
    }

    /// Makes every write of the named metric fail.
    pub fn fail_metric_writes(mut self, metric_name: &str) -> Self {
        let ids: Vec<Uuid> = self
            .tables
            .get_mut()
            .map(|t| {
                t.metrics
                    .iter()
                    .filter(|m| m.name == metric_name)
                    .map(|m| m.id)
                    .collect()
            })
            .unwrap_or_default();
        self.failing_metric_writes.extend(ids);
        self
    }

    pub fn fail_recommendation_writes(mut self) -> Self {
        self.fail_recommendation_writes = true;
        self
    }

    pub fn stock_metrics(&self) -> Vec<StockMetric> {
        self.lock().map(|t| t.stock_metrics.clone()).unwrap_or_default()
    }

    pub fn analyses(&self) -> Vec<Analysis> {
        self.lock().map(|t| t.analyses.clone()).unwrap_or_default()
    }

    pub fn recommendations(&self) -> Vec<Recommendation> {
        self.lock().map(|t| t.recommendations.clone()).unwrap_or_default()
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait::async_trait]
impl Store for InMemoryStore {
    async fn find_stock_by_symbol(&self, symbol: &str) -> anyhow::Result<Option<Stock>> {
        Ok(self.lock()?.stocks.iter().find(|s| s.symbol == symbol).cloned())
    }

    async fn upsert_stock(&self, symbol: &str, company: &str) -> anyhow::Result<Stock> {
        Ok(self.lock()?.upsert_stock(symbol, company))
    }

    async fn user_exists(&self, user_id: Uuid) -> anyhow::Result<bool> {
        Ok(self.lock()?.users.iter().any(|u| u.id == user_id))
    }

    async fn create_user(&self, user: &NewUser) -> anyhow::Result<User> {
        self.lock()?.insert_user(Uuid::new_v4(), user)
    }

    async fn list_metrics(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Metric>> {
        anyhow::ensure!(limit >= 0 && offset >= 0, "limit and offset must be non-negative");
        let mut metrics = self.lock()?.metrics.clone();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(metrics
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn create_stock_metric(
        &self,
        stock_id: Uuid,
        metric_id: Uuid,
        value: f64,
    ) -> anyhow::Result<StockMetric> {
        anyhow::ensure!(
            !self.failing_metric_writes.contains(&metric_id),
            "insert stock_metric failed (metric_id={metric_id})"
        );
        let mut tables = self.lock()?;
        anyhow::ensure!(
            tables.metrics.iter().any(|m| m.id == metric_id),
            "stock_metric references unknown metric {metric_id}"
        );
        let row = StockMetric {
            id: Uuid::new_v4(),
            stock_id,
            metric_id,
            value,
            recorded_at: Utc::now(),
        };
        tables.stock_metrics.push(row.clone());
        Ok(row)
    }

    async fn find_latest_stock_metrics(
        &self,
        stock_id: Uuid,
    ) -> anyhow::Result<Vec<LatestStockMetric>> {
        let tables = self.lock()?;
        let mut latest: BTreeMap<Uuid, &StockMetric> = BTreeMap::new();
        // Later inserts win ties on recorded_at.
        for row in tables.stock_metrics.iter().filter(|r| r.stock_id == stock_id) {
            let newer = latest
                .get(&row.metric_id)
                .map_or(true, |seen| row.recorded_at >= seen.recorded_at);
            if newer {
                latest.insert(row.metric_id, row);
            }
        }

        let mut out = Vec::with_capacity(latest.len());
        for (metric_id, row) in latest {
            let Some(metric) = tables.metrics.iter().find(|m| m.id == metric_id) else {
                continue;
            };
            out.push(LatestStockMetric {
                metric_name: metric.name.clone(),
                value: row.value,
                recorded_at: row.recorded_at,
            });
        }
        Ok(out)
    }

    async fn create_analysis(
        &self,
        user_id: Uuid,
        stock_id: Uuid,
        score: f64,
    ) -> anyhow::Result<Analysis> {
        let analysis = Analysis {
            id: Uuid::new_v4(),
            user_id,
            stock_id,
            score,
            created_at: Utc::now(),
        };
        self.lock()?.analyses.push(analysis.clone());
        Ok(analysis)
    }

    async fn create_recommendation(
        &self,
        analysis_id: Uuid,
        action: Action,
        confidence_level: f64,
        reason: &str,
    ) -> anyhow::Result<Recommendation> {
        anyhow::ensure!(!self.fail_recommendation_writes, "insert recommendation failed");
        let mut tables = self.lock()?;
        anyhow::ensure!(
            tables.analyses.iter().any(|a| a.id == analysis_id),
            "recommendation references unknown analysis {analysis_id}"
        );
        let recommendation = Recommendation {
            id: Uuid::new_v4(),
            analysis_id,
            action,
            confidence_level,
            reason: reason.to_string(),
            created_at: Utc::now(),
        };
        tables.recommendations.push(recommendation.clone());
        Ok(recommendation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_metrics_pick_most_recent_row() {
        let store = InMemoryStore::with_canonical_metrics();
        let stock = store.insert_stock("IBM", "International Business Machines").unwrap();
        let metrics = store.list_metrics(50, 0).await.unwrap();
        let eps = metrics.iter().find(|m| m.name == "EPS").unwrap();

        store.create_stock_metric(stock.id, eps.id, 1.0).await.unwrap();
        store.create_stock_metric(stock.id, eps.id, 2.0).await.unwrap();

        let latest = store.find_latest_stock_metrics(stock.id).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].metric_name, "EPS");
        assert_eq!(latest[0].value, 2.0);
        assert_eq!(store.stock_metrics().len(), 2);
    }

    #[tokio::test]
    async fn list_metrics_pages_by_name() {
        let store = InMemoryStore::with_canonical_metrics();
        let first = store.list_metrics(2, 0).await.unwrap();
        let names: Vec<_> = first.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Debt/Equity Ratio", "Dividend Yield"]);
        assert_eq!(store.list_metrics(50, 4).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn created_user_exists_and_email_is_unique() {
        let store = InMemoryStore::new();
        let new_user = NewUser {
            email: "jane.smith@example.com".into(),
            firstname: "Jane".into(),
            lastname: "Smith".into(),
        };
        let user = store.create_user(&new_user).await.unwrap();
        assert!(store.user_exists(user.id).await.unwrap());
        assert!(!store.user_exists(Uuid::new_v4()).await.unwrap());

        let err = store.create_user(&new_user).await.unwrap_err();
        assert!(err.to_string().contains("already registered"), "{err}");
    }

    #[tokio::test]
    async fn upsert_stock_keeps_id_and_refreshes_company() {
        let store = InMemoryStore::new();
        let first = store.upsert_stock("AAPL", "Apple").await.unwrap();
        let second = store.upsert_stock("AAPL", "Apple Inc.").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.company, "Apple Inc.");

        let found = store.find_stock_by_symbol("AAPL").await.unwrap().unwrap();
        assert_eq!(found, second);
    }

    #[tokio::test]
    async fn recommendation_requires_analysis() {
        let store = InMemoryStore::new();
        let err = store
            .create_recommendation(Uuid::new_v4(), Action::Hold, 50.0, "")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown analysis"));
    }
}
