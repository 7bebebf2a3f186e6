pub mod aggregate;
pub mod provider;
pub mod types;

use std::fmt;

/// One of the independent data shapes fetched per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facet {
    Overview,
    BalanceSheet,
    DailySeries,
}

impl Facet {
    /// Alpha Vantage `function` query value.
    pub fn function(&self) -> &'static str {
        match self {
            Facet::Overview => "OVERVIEW",
            Facet::BalanceSheet => "BALANCE_SHEET",
            Facet::DailySeries => "TIME_SERIES_DAILY",
        }
    }
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facet::Overview => f.write_str("overview"),
            Facet::BalanceSheet => f.write_str("balance sheet"),
            Facet::DailySeries => f.write_str("daily series"),
        }
    }
}
