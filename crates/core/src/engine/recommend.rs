use crate::domain::market::normalize_symbol;
use crate::domain::recommendation::{Action, Recommendation};
use crate::domain::rules::ScoringRules;
use crate::engine::confidence::confidence_level;
use crate::engine::extract::MetricExtractor;
use crate::engine::scoring::ScoringEngine;
use crate::error::EngineError;
use crate::ingest::aggregate::ConcurrentAggregator;
use crate::ingest::provider::MarketDataProvider;
use crate::storage::Store;
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

/// Runs a full analysis for a symbol and records the resulting recommendation.
#[derive(Clone)]
pub struct RecommendationBuilder {
    store: Arc<dyn Store>,
    extractor: MetricExtractor,
    scoring: ScoringEngine,
}

impl RecommendationBuilder {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn MarketDataProvider>,
        rules: Arc<ScoringRules>,
    ) -> Self {
        let extractor = MetricExtractor::new(store.clone(), ConcurrentAggregator::new(provider));
        let scoring = ScoringEngine::new(store.clone(), rules);
        Self {
            store,
            extractor,
            scoring,
        }
    }

    pub fn scoring(&self) -> &ScoringEngine {
        &self.scoring
    }

    /// Refreshes metrics, scores them and persists an analysis with its recommendation.
    ///
    /// Everything, persistence included, must finish before `deadline`; otherwise in-flight
    /// work is dropped and `DeadlineExceeded` is returned.
    pub async fn recommend(
        &self,
        user_id: Uuid,
        symbol: &str,
        deadline: Instant,
    ) -> Result<Recommendation, EngineError> {
        let run = self.run(user_id, symbol, deadline);
        let res = match tokio::time::timeout_at(deadline, run).await {
            Ok(res) => res,
            Err(_) => Err(EngineError::DeadlineExceeded),
        };
        if let Err(EngineError::DeadlineExceeded) = res {
            tracing::warn!(%user_id, %symbol, "analysis deadline exceeded");
        }
        res
    }

    async fn run(
        &self,
        user_id: Uuid,
        symbol: &str,
        deadline: Instant,
    ) -> Result<Recommendation, EngineError> {
        let symbol = normalize_symbol(symbol);

        if !self
            .store
            .user_exists(user_id)
            .await
            .map_err(EngineError::Storage)?
        {
            return Err(EngineError::UserNotFound(user_id));
        }

        let stock = self
            .store
            .find_stock_by_symbol(&symbol)
            .await
            .map_err(EngineError::Storage)?
            .ok_or_else(|| EngineError::StockNotFound(symbol.clone()))?;

        let fresh = match self.extractor.refresh(&stock, deadline).await {
            Err(err) if err.is_deadline_exceeded() => return Err(EngineError::DeadlineExceeded),
            res => res?,
        };
        let score = self.scoring.score(stock.id).await?;

        let action = Action::from_score(score);
        let values: Vec<f64> = fresh.iter().map(|m| m.value).collect();
        let confidence = confidence_level(&values);

        let (analysis, recommendation) = self
            .store
            .create_analysis_with_recommendation(user_id, stock.id, score, action, confidence, "")
            .await
            .map_err(|e| {
                tracing::error!(%symbol, error = %format!("{e:#}"), "failed to persist analysis");
                EngineError::Storage(e)
            })?;

        tracing::info!(
            %symbol,
            %user_id,
            analysis_id = %analysis.id,
            recommendation_id = %recommendation.id,
            score,
            %action,
            confidence,
            fresh_metrics = fresh.len(),
            "recommendation recorded"
        );

        Ok(recommendation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::provider::testing::{Reply, StubProvider};
    use crate::ingest::types::{AnnualReport, BalanceSheet, Overview};
    use crate::storage::memory::InMemoryStore;
    use std::time::Duration;

    fn overview() -> Overview {
        [
            ("PERatio", "8"),
            ("EPS", "6"),
            ("QuarterlyRevenueGrowthYOY", "0.15"),
            ("DividendYield", "0.04"),
            ("MarketCapitalization", "50000000000"),
        ]
        .into_iter()
        .collect()
    }

    fn balance_sheet(equity: &str) -> BalanceSheet {
        BalanceSheet {
            symbol: "IBM".into(),
            annual_reports: vec![AnnualReport {
                fiscal_date_ending: "2023-12-31".into(),
                total_liabilities: "30".into(),
                total_shareholder_equity: equity.into(),
            }],
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        user_id: Uuid,
    }

    fn fixture(store: InMemoryStore) -> Fixture {
        let user_id = store.insert_user().unwrap();
        store.insert_stock("IBM", "International Business Machines").unwrap();
        Fixture {
            store: Arc::new(store),
            user_id,
        }
    }

    fn builder(store: Arc<InMemoryStore>, stub: StubProvider) -> RecommendationBuilder {
        RecommendationBuilder::new(store, Arc::new(stub), Arc::new(ScoringRules::canonical()))
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn strong_buy_end_to_end() {
        let fx = fixture(InMemoryStore::with_canonical_metrics());
        let builder = builder(
            fx.store.clone(),
            StubProvider::new(Reply::Ok(overview()), Reply::Ok(balance_sheet("100"))),
        );

        let rec = builder.recommend(fx.user_id, "\"IBM\"", soon()).await.unwrap();
        assert_eq!(rec.action, Action::StrongBuy);
        assert_eq!(rec.reason, "");
        assert!((0.0..=100.0).contains(&rec.confidence_level));

        let analyses = fx.store.analyses();
        assert_eq!(analyses.len(), 1);
        assert_eq!(analyses[0].id, rec.analysis_id);
        assert!((analyses[0].score - 9.04).abs() < 1e-9);
        assert_eq!(fx.store.stock_metrics().len(), 6);
    }

    #[tokio::test]
    async fn partial_fetch_still_recommends() {
        let fx = fixture(InMemoryStore::with_canonical_metrics());
        let builder = builder(
            fx.store.clone(),
            StubProvider::new(Reply::Ok(overview()), Reply::Fail("balance sheet down")),
        );

        let rec = builder.recommend(fx.user_id, "IBM", soon()).await.unwrap();
        // Without Debt/Equity: 9.04 - 1.6.
        let score = fx.store.analyses()[0].score;
        assert!((score - 7.44).abs() < 1e-9, "score = {score}");
        assert_eq!(rec.action, Action::Buy);
        assert_eq!(fx.store.stock_metrics().len(), 5);
    }

    #[tokio::test]
    async fn unknown_stock_is_not_found() {
        let fx = fixture(InMemoryStore::with_canonical_metrics());
        let builder = builder(
            fx.store.clone(),
            StubProvider::new(Reply::Ok(overview()), Reply::Ok(balance_sheet("100"))),
        );

        let err = builder.recommend(fx.user_id, "MSFT", soon()).await.unwrap_err();
        assert!(matches!(err, EngineError::StockNotFound(ref s) if s == "MSFT"));
        assert!(err.is_not_found());
        assert!(fx.store.analyses().is_empty());
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let fx = fixture(InMemoryStore::with_canonical_metrics());
        let builder = builder(
            fx.store.clone(),
            StubProvider::new(Reply::Ok(overview()), Reply::Ok(balance_sheet("100"))),
        );

        let err = builder.recommend(Uuid::new_v4(), "IBM", soon()).await.unwrap_err();
        assert!(matches!(err, EngineError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn total_fetch_failure_aborts_run() {
        let fx = fixture(InMemoryStore::with_canonical_metrics());
        let builder = builder(
            fx.store.clone(),
            StubProvider::new(Reply::Fail("overview down"), Reply::Fail("balance sheet down")),
        );

        let err = builder.recommend(fx.user_id, "IBM", soon()).await.unwrap_err();
        assert!(matches!(err, EngineError::TotalFetchFailure { .. }));
        assert!(fx.store.analyses().is_empty());
        assert!(fx.store.recommendations().is_empty());
    }

    #[tokio::test]
    async fn constant_batch_is_fully_confident() {
        let fx = fixture(InMemoryStore::with_canonical_metrics());
        let overview: Overview = [("EPS", "3")].into_iter().collect();
        let builder = builder(
            fx.store.clone(),
            StubProvider::new(Reply::Ok(overview), Reply::Ok(balance_sheet("10"))),
        );

        // EPS = 3 and Debt/Equity = 30 / 10 = 3.
        let rec = builder.recommend(fx.user_id, "IBM", soon()).await.unwrap();
        assert_eq!(rec.confidence_level, 100.0);
    }

    #[tokio::test]
    async fn empty_batch_has_zero_confidence() {
        let fx = fixture(InMemoryStore::with_canonical_metrics());
        let overview: Overview = [("Symbol", "IBM")].into_iter().collect();
        let builder = builder(
            fx.store.clone(),
            StubProvider::new(Reply::Ok(overview), Reply::Ok(balance_sheet("0"))),
        );

        let rec = builder.recommend(fx.user_id, "IBM", soon()).await.unwrap();
        assert_eq!(rec.confidence_level, 0.0);
        assert_eq!(rec.action, Action::StrongSell);
    }

    #[tokio::test]
    async fn recommendation_write_failure_surfaces() {
        let fx = fixture(InMemoryStore::with_canonical_metrics().fail_recommendation_writes());
        let builder = builder(
            fx.store.clone(),
            StubProvider::new(Reply::Ok(overview()), Reply::Ok(balance_sheet("100"))),
        );

        let err = builder.recommend(fx.user_id, "IBM", soon()).await.unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(fx.store.recommendations().is_empty());
    }

    #[tokio::test]
    async fn expired_deadline_returns_promptly() {
        let fx = fixture(InMemoryStore::with_canonical_metrics());
        let builder = builder(fx.store.clone(), StubProvider::new(Reply::Hang, Reply::Hang));

        let err = tokio::time::timeout(
            Duration::from_secs(1),
            builder.recommend(fx.user_id, "IBM", Instant::now()),
        )
        .await
        .expect("recommend must honour the deadline")
        .unwrap_err();
        assert!(matches!(err, EngineError::DeadlineExceeded), "{err:?}");
        assert!(fx.store.analyses().is_empty());
    }

    #[tokio::test]
    async fn fetch_timeout_is_deadline_exceeded() {
        let fx = fixture(InMemoryStore::with_canonical_metrics());
        let builder = builder(fx.store.clone(), StubProvider::new(Reply::Hang, Reply::Hang));

        let deadline = Instant::now() + Duration::from_millis(50);
        let err = tokio::time::timeout(
            Duration::from_secs(2),
            builder.recommend(fx.user_id, "IBM", deadline),
        )
        .await
        .expect("recommend must honour the deadline")
        .unwrap_err();
        assert!(matches!(err, EngineError::DeadlineExceeded), "{err:?}");
        assert!(fx.store.stock_metrics().is_empty());
    }

    #[tokio::test]
    async fn provider_failures_stay_total_fetch_failure() {
        let fx = fixture(InMemoryStore::with_canonical_metrics());
        let builder = builder(
            fx.store.clone(),
            StubProvider::new(Reply::Fail("overview down"), Reply::Hang),
        );

        let deadline = Instant::now() + Duration::from_millis(50);
        let err = builder.recommend(fx.user_id, "IBM", deadline).await.unwrap_err();
        assert!(matches!(err, EngineError::TotalFetchFailure { .. }), "{err:?}");
    }
}
