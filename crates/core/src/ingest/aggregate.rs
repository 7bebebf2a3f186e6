use crate::error::{EngineError, FetchError};
use crate::ingest::provider::MarketDataProvider;
use crate::ingest::types::FacetBundle;
use crate::ingest::Facet;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

/// Fetches the overview and balance sheet facets of a symbol concurrently.
#[derive(Clone)]
pub struct ConcurrentAggregator {
    provider: Arc<dyn MarketDataProvider>,
}

impl ConcurrentAggregator {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    /// Succeeds when at least one facet arrives before `deadline`; the missing facet is `None`.
    ///
    /// Both fetches are joined in place, so returning (or dropping this future) never leaves
    /// a fetch running in the background.
    pub async fn aggregate(
        &self,
        symbol: &str,
        deadline: Instant,
    ) -> Result<FacetBundle, EngineError> {
        let (overview, balance_sheet) = tokio::join!(
            bounded(Facet::Overview, deadline, self.provider.fetch_overview(symbol)),
            bounded(Facet::BalanceSheet, deadline, self.provider.fetch_balance_sheet(symbol)),
        );

        match (overview, balance_sheet) {
            (Err(overview), Err(balance_sheet)) => Err(EngineError::TotalFetchFailure {
                overview,
                balance_sheet,
            }),
            (overview, balance_sheet) => {
                let overview = overview
                    .map_err(|err| log_partial_failure(symbol, &err))
                    .ok();
                let balance_sheet = balance_sheet
                    .map_err(|err| log_partial_failure(symbol, &err))
                    .ok();
                Ok(FacetBundle {
                    overview,
                    balance_sheet,
                })
            }
        }
    }
}

async fn bounded<T>(
    facet: Facet,
    deadline: Instant,
    fetch: impl Future<Output = Result<T, FetchError>>,
) -> Result<T, FetchError> {
    if Instant::now() >= deadline {
        return Err(FetchError::DeadlineExceeded { facet });
    }
    match tokio::time::timeout_at(deadline, fetch).await {
        Ok(res) => res,
        Err(_) => Err(FetchError::DeadlineExceeded { facet }),
    }
}

fn log_partial_failure(symbol: &str, err: &FetchError) {
    tracing::warn!(
        %symbol,
        facet = %err.facet(),
        error = %err,
        "facet fetch failed; continuing with partial data"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::provider::testing::{Reply, StubProvider};
    use crate::ingest::types::{BalanceSheet, Overview};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn overview() -> Overview {
        [("PERatio", "8.0")].into_iter().collect()
    }

    fn balance_sheet() -> BalanceSheet {
        BalanceSheet {
            symbol: "IBM".into(),
            annual_reports: vec![],
        }
    }

    fn aggregator(stub: StubProvider) -> ConcurrentAggregator {
        ConcurrentAggregator::new(Arc::new(stub))
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn returns_both_facets() {
        let agg = aggregator(StubProvider::new(Reply::Ok(overview()), Reply::Ok(balance_sheet())));
        let bundle = agg.aggregate("IBM", soon()).await.unwrap();
        assert_eq!(bundle.overview, Some(overview()));
        assert_eq!(bundle.balance_sheet, Some(balance_sheet()));
    }

    #[tokio::test]
    async fn tolerates_one_failure() {
        let agg = aggregator(StubProvider::new(
            Reply::Fail("provider A down"),
            Reply::Ok(balance_sheet()),
        ));
        let bundle = agg.aggregate("IBM", soon()).await.unwrap();
        assert!(bundle.overview.is_none());
        assert_eq!(bundle.balance_sheet, Some(balance_sheet()));

        let agg = aggregator(StubProvider::new(
            Reply::Ok(overview()),
            Reply::Fail("provider B down"),
        ));
        let bundle = agg.aggregate("IBM", soon()).await.unwrap();
        assert_eq!(bundle.overview, Some(overview()));
        assert!(bundle.balance_sheet.is_none());
    }

    #[tokio::test]
    async fn both_failures_keep_both_causes() {
        let agg = aggregator(StubProvider::new(
            Reply::Fail("provider A down"),
            Reply::Fail("provider B down"),
        ));
        let err = agg.aggregate("IBM", soon()).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("provider A down"), "{msg}");
        assert!(msg.contains("provider B down"), "{msg}");
        match err {
            EngineError::TotalFetchFailure {
                overview,
                balance_sheet,
            } => {
                assert_eq!(overview.facet(), Facet::Overview);
                assert_eq!(balance_sheet.facet(), Facet::BalanceSheet);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_facet_is_cut_off_at_deadline() {
        let agg = aggregator(StubProvider::new(Reply::Ok(overview()), Reply::Hang));
        let deadline = Instant::now() + Duration::from_millis(50);
        let bundle = tokio::time::timeout(Duration::from_secs(2), agg.aggregate("IBM", deadline))
            .await
            .expect("aggregate must honour the deadline")
            .unwrap();
        assert_eq!(bundle.overview, Some(overview()));
        assert!(bundle.balance_sheet.is_none());
    }

    #[tokio::test]
    async fn expired_deadline_fails_both_without_leaking() {
        let stub = StubProvider::new(Reply::Hang, Reply::Hang);
        let in_flight = stub.in_flight.clone();
        let agg = aggregator(stub);

        let err = tokio::time::timeout(Duration::from_secs(1), agg.aggregate("IBM", Instant::now()))
            .await
            .expect("aggregate must return promptly")
            .unwrap_err();

        match err {
            EngineError::TotalFetchFailure {
                overview,
                balance_sheet,
            } => {
                assert!(matches!(
                    overview,
                    FetchError::DeadlineExceeded { facet: Facet::Overview }
                ));
                assert!(matches!(
                    balance_sheet,
                    FetchError::DeadlineExceeded { facet: Facet::BalanceSheet }
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropping_the_call_drops_both_fetches() {
        let mut stub = StubProvider::new(Reply::Hang, Reply::Hang);
        stub.delay = Duration::from_millis(1);
        let in_flight = stub.in_flight.clone();
        let agg = aggregator(stub);

        let res = tokio::time::timeout(
            Duration::from_millis(50),
            agg.aggregate("IBM", Instant::now() + Duration::from_secs(60)),
        )
        .await;
        assert!(res.is_err());
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }
}
