use crate::domain::market::{Metric, MetricCatalog, Stock, StockMetric, DEBT_EQUITY_RATIO};
use crate::error::EngineError;
use crate::ingest::aggregate::ConcurrentAggregator;
use crate::ingest::types::{BalanceSheet, Overview};
use crate::ingest::Facet;
use crate::storage::Store;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

/// Size of the metric catalog page read per run.
pub const METRIC_PAGE_SIZE: i64 = 50;

// Metric name -> overview field.
const OVERVIEW_FIELDS: [(&str, &str); 5] = [
    ("P/E Ratio", "PERatio"),
    ("EPS", "EPS"),
    ("Dividend Yield", "DividendYield"),
    ("Market Cap", "MarketCapitalization"),
    ("Revenue Growth", "QuarterlyRevenueGrowthYOY"),
];

pub fn overview_field(metric_name: &str) -> Option<&'static str> {
    OVERVIEW_FIELDS
        .iter()
        .find(|(name, _)| *name == metric_name)
        .map(|(_, field)| *field)
}

#[derive(Debug, Error, PartialEq)]
pub enum DerivationError {
    #[error("no annual reports available")]
    NoAnnualReports,

    #[error("field {field} is missing")]
    MissingField { field: &'static str },

    #[error("field {field} is not a number: {raw:?}")]
    Unparsable { field: &'static str, raw: String },

    #[error("total shareholder equity is zero")]
    ZeroEquity,

    #[error("{facet} is unavailable")]
    FacetUnavailable { facet: Facet },

    #[error("no source for metric")]
    NoSource,
}

/// Liabilities over equity from the most recent annual report.
pub fn debt_equity_ratio(balance_sheet: &BalanceSheet) -> Result<f64, DerivationError> {
    let report = balance_sheet
        .most_recent()
        .ok_or(DerivationError::NoAnnualReports)?;

    let liabilities = parse_number("totalLiabilities", &report.total_liabilities)?;
    let equity = parse_number("totalShareholderEquity", &report.total_shareholder_equity)?;
    if equity == 0.0 {
        return Err(DerivationError::ZeroEquity);
    }
    Ok(liabilities / equity)
}

fn overview_value(overview: &Overview, field: &'static str) -> Result<f64, DerivationError> {
    let raw = overview
        .field(field)
        .ok_or(DerivationError::MissingField { field })?;
    parse_number(field, raw)
}

// Upstream uses placeholders like "None" or "-" for unknown values.
fn parse_number(field: &'static str, raw: &str) -> Result<f64, DerivationError> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(DerivationError::Unparsable {
            field,
            raw: raw.to_string(),
        }),
    }
}

/// Value of one catalog metric from whichever facet carries it.
pub fn derive_metric(
    metric_name: &str,
    overview: Option<&Overview>,
    balance_sheet: Option<&BalanceSheet>,
) -> Result<f64, DerivationError> {
    if metric_name == DEBT_EQUITY_RATIO {
        let balance_sheet = balance_sheet.ok_or(DerivationError::FacetUnavailable {
            facet: Facet::BalanceSheet,
        })?;
        return debt_equity_ratio(balance_sheet);
    }

    let field = overview_field(metric_name).ok_or(DerivationError::NoSource)?;
    let overview = overview.ok_or(DerivationError::FacetUnavailable {
        facet: Facet::Overview,
    })?;
    overview_value(overview, field)
}

/// Derives a value for every catalog metric the available facets can answer.
///
/// A failed derivation is logged and skipped; it never aborts the rest of the batch.
pub fn derive_values(
    symbol: &str,
    overview: Option<&Overview>,
    balance_sheet: Option<&BalanceSheet>,
    catalog: &MetricCatalog,
) -> Vec<(Metric, f64)> {
    let mut out = Vec::with_capacity(catalog.len());

    for metric in catalog.iter() {
        match derive_metric(&metric.name, overview, balance_sheet) {
            Ok(value) => out.push((metric.clone(), value)),
            Err(DerivationError::FacetUnavailable { facet }) => {
                tracing::debug!(
                    %symbol,
                    metric = %metric.name,
                    %facet,
                    "facet missing after partial fetch; skipping metric"
                );
            }
            Err(DerivationError::NoSource) => {
                tracing::debug!(%symbol, metric = %metric.name, "no source for metric; skipping");
            }
            Err(err) => {
                tracing::warn!(
                    %symbol,
                    metric = %metric.name,
                    error = %err,
                    "failed to derive metric; skipping"
                );
            }
        }
    }

    out
}

/// Turns fetched facets into persisted stock metrics.
#[derive(Clone)]
pub struct MetricExtractor {
    store: Arc<dyn Store>,
    aggregator: ConcurrentAggregator,
}

impl MetricExtractor {
    pub fn new(store: Arc<dyn Store>, aggregator: ConcurrentAggregator) -> Self {
        Self { store, aggregator }
    }

    /// Fetches both facets for `stock` and records every metric that can be derived.
    ///
    /// Fails only when the catalog cannot be read or both facets are unavailable.
    pub async fn refresh(
        &self,
        stock: &Stock,
        deadline: Instant,
    ) -> Result<Vec<StockMetric>, EngineError> {
        let metrics = self
            .store
            .list_metrics(METRIC_PAGE_SIZE, 0)
            .await
            .map_err(EngineError::Storage)?;
        let catalog = MetricCatalog::new(metrics);

        let bundle = self.aggregator.aggregate(&stock.symbol, deadline).await?;
        tracing::debug!(
            symbol = %stock.symbol,
            provider = self.aggregator.provider_name(),
            overview = bundle.overview.is_some(),
            balance_sheet = bundle.balance_sheet.is_some(),
            "facets fetched"
        );

        Ok(self
            .extract_and_persist(
                stock,
                bundle.overview.as_ref(),
                bundle.balance_sheet.as_ref(),
                &catalog,
            )
            .await)
    }

    /// Returns only the rows that were actually written.
    pub async fn extract_and_persist(
        &self,
        stock: &Stock,
        overview: Option<&Overview>,
        balance_sheet: Option<&BalanceSheet>,
        catalog: &MetricCatalog,
    ) -> Vec<StockMetric> {
        let derived = derive_values(&stock.symbol, overview, balance_sheet, catalog);

        let mut persisted = Vec::with_capacity(derived.len());
        for (metric, value) in derived {
            match self
                .store
                .create_stock_metric(stock.id, metric.id, value)
                .await
            {
                Ok(row) => persisted.push(row),
                Err(err) => {
                    tracing::warn!(
                        symbol = %stock.symbol,
                        metric = %metric.name,
                        error = %format!("{err:#}"),
                        "failed to save stock metric; dropping"
                    );
                }
            }
        }

        tracing::debug!(
            symbol = %stock.symbol,
            derived = persisted.len(),
            tracked = catalog.len(),
            "stock metrics refreshed"
        );
        persisted
    }
}
