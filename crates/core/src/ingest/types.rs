use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Company overview as a flat key/value summary (every value is a string upstream).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Overview(pub BTreeMap<String, String>);

impl Overview {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Overview {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceSheet {
    #[serde(default)]
    pub symbol: String,
    /// Most recent fiscal year first.
    #[serde(rename = "annualReports", default)]
    pub annual_reports: Vec<AnnualReport>,
}

impl BalanceSheet {
    pub fn most_recent(&self) -> Option<&AnnualReport> {
        self.annual_reports.first()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnualReport {
    #[serde(rename = "fiscalDateEnding", default)]
    pub fiscal_date_ending: String,
    #[serde(rename = "totalLiabilities", default)]
    pub total_liabilities: String,
    #[serde(rename = "totalShareholderEquity", default)]
    pub total_shareholder_equity: String,
}

/// Daily price series, passed through as the provider reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailySeries {
    #[serde(rename = "Meta Data", default)]
    pub meta_data: BTreeMap<String, String>,
    /// Trading date -> OHLCV fields ("1. open", "2. high", ...).
    #[serde(rename = "Time Series (Daily)", default)]
    pub time_series: BTreeMap<String, BTreeMap<String, String>>,
}

impl DailySeries {
    /// Most recent trading day and its fields.
    pub fn latest(&self) -> Option<(&str, &BTreeMap<String, String>)> {
        self.time_series
            .iter()
            .next_back()
            .map(|(date, fields)| (date.as_str(), fields))
    }
}

/// Both facets for a symbol; a facet is `None` when its fetch failed.
#[derive(Debug, Clone, Default)]
pub struct FacetBundle {
    pub overview: Option<Overview>,
    pub balance_sheet: Option<BalanceSheet>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_balance_sheet_shape() {
        let v = json!({
            "symbol": "IBM",
            "annualReports": [
                {
                    "fiscalDateEnding": "2023-12-31",
                    "reportedCurrency": "USD",
                    "totalLiabilities": "112628000000",
                    "totalShareholderEquity": "22533000000"
                },
                {
                    "fiscalDateEnding": "2022-12-31",
                    "totalLiabilities": "105222000000",
                    "totalShareholderEquity": "21944000000"
                }
            ],
            "quarterlyReports": []
        });

        let parsed: BalanceSheet = serde_json::from_value(v).unwrap();
        assert_eq!(parsed.symbol, "IBM");
        assert_eq!(parsed.annual_reports.len(), 2);
        let recent = parsed.most_recent().unwrap();
        assert_eq!(recent.fiscal_date_ending, "2023-12-31");
        assert_eq!(recent.total_liabilities, "112628000000");
    }

    #[test]
    fn parses_overview_as_string_map() {
        let v = json!({"Symbol": "IBM", "PERatio": "22.5", "EPS": "8.14"});
        let parsed: Overview = serde_json::from_value(v).unwrap();
        assert_eq!(parsed.field("PERatio"), Some("22.5"));
        assert_eq!(parsed.field("DividendYield"), None);
    }

    #[test]
    fn parses_daily_series_shape() {
        let v = json!({
            "Meta Data": {
                "1. Information": "Daily Prices (open, high, low, close) and Volumes",
                "2. Symbol": "IBM"
            },
            "Time Series (Daily)": {
                "2024-05-02": {"1. open": "166.5", "4. close": "168.4", "5. volume": "3000000"},
                "2024-05-03": {"1. open": "168.5", "4. close": "165.7", "5. volume": "4100000"}
            }
        });
        let parsed: DailySeries = serde_json::from_value(v).unwrap();
        assert_eq!(parsed.meta_data["2. Symbol"], "IBM");
        let (date, fields) = parsed.latest().unwrap();
        assert_eq!(date, "2024-05-03");
        assert_eq!(fields["4. close"], "165.7");
    }

    #[test]
    fn rejects_non_string_overview_values() {
        let v = json!({"PERatio": 22.5});
        assert!(serde_json::from_value::<Overview>(v).is_err());
    }
}
