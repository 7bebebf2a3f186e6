use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const DEBT_EQUITY_RATIO: &str = "Debt/Equity Ratio";

/// Symbols registered by a fresh seed.
pub const DEFAULT_STOCKS: [(&str, &str); 10] = [
    ("AAPL", "Apple Inc."),
    ("MSFT", "Microsoft Corporation"),
    ("GOOGL", "Alphabet Inc."),
    ("AMZN", "Amazon.com Inc."),
    ("TSLA", "Tesla Inc."),
    ("META", "Meta Platforms Inc."),
    ("NVDA", "NVIDIA Corporation"),
    ("JPM", "JPMorgan Chase & Co."),
    ("V", "Visa Inc."),
    ("JNJ", "Johnson & Johnson"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub id: Uuid,
    pub symbol: String,
    pub company: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMetric {
    pub id: Uuid,
    pub stock_id: Uuid,
    pub metric_id: Uuid,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Most recent observation of one metric for a stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestStockMetric {
    pub metric_name: String,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Metrics the system tracks, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MetricCatalog {
    by_name: BTreeMap<String, Metric>,
}

impl MetricCatalog {
    pub fn new(metrics: impl IntoIterator<Item = Metric>) -> Self {
        let by_name = metrics
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();
        Self { by_name }
    }

    pub fn get(&self, name: &str) -> Option<&Metric> {
        self.by_name.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Metric> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Strips whitespace and any surrounding quotes clients tend to send with a ticker.
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(name: &str) -> Metric {
        Metric {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn catalog_iterates_by_name() {
        let catalog =
            MetricCatalog::new(vec![metric("P/E Ratio"), metric("EPS"), metric("Market Cap")]);
        let names: Vec<_> = catalog.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["EPS", "Market Cap", "P/E Ratio"]);
        assert!(catalog.get("EPS").is_some());
        assert!(catalog.get("Beta").is_none());
    }

    #[test]
    fn normalize_symbol_strips_quotes() {
        assert_eq!(normalize_symbol(" \"AAPL\" "), "AAPL");
        assert_eq!(normalize_symbol("'MSFT'"), "MSFT");
        assert_eq!(normalize_symbol("IBM"), "IBM");
        assert_eq!(normalize_symbol("\"\""), "");
    }
}
