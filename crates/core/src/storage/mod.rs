pub mod analyses;
pub mod lock;
pub mod memory;
pub mod stocks;
pub mod users;

use crate::domain::market::{LatestStockMetric, Metric, Stock, StockMetric};
use crate::domain::recommendation::{Action, Analysis, Recommendation};
use crate::domain::user::{NewUser, User};
use anyhow::Context;
use uuid::Uuid;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Persistence operations the analysis engine depends on.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn find_stock_by_symbol(&self, symbol: &str) -> anyhow::Result<Option<Stock>>;

    async fn upsert_stock(&self, symbol: &str, company: &str) -> anyhow::Result<Stock>;

    async fn user_exists(&self, user_id: Uuid) -> anyhow::Result<bool>;

    /// `user` is expected to be validated already.
    async fn create_user(&self, user: &NewUser) -> anyhow::Result<User>;

    async fn list_metrics(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Metric>>;

    async fn create_stock_metric(
        &self,
        stock_id: Uuid,
        metric_id: Uuid,
        value: f64,
    ) -> anyhow::Result<StockMetric>;

    async fn find_latest_stock_metrics(
        &self,
        stock_id: Uuid,
    ) -> anyhow::Result<Vec<LatestStockMetric>>;

    async fn create_analysis(
        &self,
        user_id: Uuid,
        stock_id: Uuid,
        score: f64,
    ) -> anyhow::Result<Analysis>;

    async fn create_recommendation(
        &self,
        analysis_id: Uuid,
        action: Action,
        confidence_level: f64,
        reason: &str,
    ) -> anyhow::Result<Recommendation>;

    /// Writes an analysis and its recommendation. Implementations that can should make this
    /// atomic; the default runs the two writes in sequence.
    async fn create_analysis_with_recommendation(
        &self,
        user_id: Uuid,
        stock_id: Uuid,
        score: f64,
        action: Action,
        confidence_level: f64,
        reason: &str,
    ) -> anyhow::Result<(Analysis, Recommendation)> {
        let analysis = self.create_analysis(user_id, stock_id, score).await?;
        let recommendation = self
            .create_recommendation(analysis.id, action, confidence_level, reason)
            .await?;
        Ok((analysis, recommendation))
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn find_stock_by_symbol(&self, symbol: &str) -> anyhow::Result<Option<Stock>> {
        stocks::find_stock_by_symbol(&self.pool, symbol).await
    }

    async fn upsert_stock(&self, symbol: &str, company: &str) -> anyhow::Result<Stock> {
        stocks::upsert_stock(&self.pool, symbol, company).await
    }

    async fn user_exists(&self, user_id: Uuid) -> anyhow::Result<bool> {
        users::user_exists(&self.pool, user_id).await
    }

    async fn create_user(&self, user: &NewUser) -> anyhow::Result<User> {
        users::create_user(&self.pool, user).await
    }

    async fn list_metrics(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Metric>> {
        stocks::list_metrics(&self.pool, limit, offset).await
    }

    async fn create_stock_metric(
        &self,
        stock_id: Uuid,
        metric_id: Uuid,
        value: f64,
    ) -> anyhow::Result<StockMetric> {
        stocks::create_stock_metric(&self.pool, stock_id, metric_id, value).await
    }

    async fn find_latest_stock_metrics(
        &self,
        stock_id: Uuid,
    ) -> anyhow::Result<Vec<LatestStockMetric>> {
        stocks::find_latest_stock_metrics(&self.pool, stock_id).await
    }

    async fn create_analysis(
        &self,
        user_id: Uuid,
        stock_id: Uuid,
        score: f64,
    ) -> anyhow::Result<Analysis> {
        analyses::create_analysis(&self.pool, user_id, stock_id, score).await
    }

    async fn create_recommendation(
        &self,
        analysis_id: Uuid,
        action: Action,
        confidence_level: f64,
        reason: &str,
    ) -> anyhow::Result<Recommendation> {
        analyses::create_recommendation(&self.pool, analysis_id, action, confidence_level, reason)
            .await
    }

    async fn create_analysis_with_recommendation(
        &self,
        user_id: Uuid,
        stock_id: Uuid,
        score: f64,
        action: Action,
        confidence_level: f64,
        reason: &str,
    ) -> anyhow::Result<(Analysis, Recommendation)> {
        analyses::persist_analysis_with_recommendation(
            &self.pool,
            user_id,
            stock_id,
            score,
            action,
            confidence_level,
            reason,
        )
        .await
    }
}
