use crate::config::Settings;
use crate::error::FetchError;
use crate::ingest::types::{BalanceSheet, DailySeries, Overview};
use crate::ingest::Facet;
use anyhow::Context;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const QUERY_PATH: &str = "/query";

// Alpha Vantage answers HTTP 200 with one of these keys instead of data.
const ERROR_MESSAGE_KEY: &str = "Error Message";
const THROTTLE_KEYS: [&str; 2] = ["Note", "Information"];

#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fetch_overview(&self, symbol: &str) -> Result<Overview, FetchError>;

    async fn fetch_balance_sheet(&self, symbol: &str) -> Result<BalanceSheet, FetchError>;

    async fn fetch_daily_series(&self, symbol: &str) -> Result<DailySeries, FetchError>;
}

#[derive(Debug, Clone)]
pub struct AlphaVantageClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AlphaVantageClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_alpha_vantage_api_key()?.to_string();
        let base_url = settings
            .alpha_vantage_base_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout_secs = settings
            .alpha_vantage_timeout_secs
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build market data http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), QUERY_PATH)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        facet: Facet,
        symbol: &str,
    ) -> Result<T, FetchError> {
        let res = self
            .http
            .get(self.url())
            .query(&[
                ("function", facet.function()),
                ("symbol", symbol),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .context("market data request failed")
            .map_err(|e| FetchError::provider(facet, e))?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                facet,
                symbol: symbol.to_string(),
            });
        }

        let text = res
            .text()
            .await
            .context("failed to read market data response")
            .map_err(|e| FetchError::provider(facet, e))?;

        if !status.is_success() {
            return Err(FetchError::provider(
                facet,
                anyhow::anyhow!("market data HTTP {status}: {text}"),
            ));
        }

        let raw = serde_json::from_str::<Value>(&text)
            .with_context(|| format!("market data response is not valid JSON: {text}"))
            .map_err(|e| FetchError::provider(facet, e))?;

        classify_body(facet, symbol, &raw)?;

        serde_json::from_value::<T>(raw)
            .with_context(|| format!("failed to parse {facet} response"))
            .map_err(|e| FetchError::provider(facet, e))
    }
}

/// Maps in-band provider errors to typed failures.
fn classify_body(facet: Facet, symbol: &str, raw: &Value) -> Result<(), FetchError> {
    let Some(obj) = raw.as_object() else {
        return Err(FetchError::provider(
            facet,
            anyhow::anyhow!("market data response is not a JSON object"),
        ));
    };

    if obj.is_empty() || obj.contains_key(ERROR_MESSAGE_KEY) {
        return Err(FetchError::NotFound {
            facet,
            symbol: symbol.to_string(),
        });
    }

    if let Some(note) = THROTTLE_KEYS.iter().find_map(|k| obj.get(*k)) {
        return Err(FetchError::provider(
            facet,
            anyhow::anyhow!("market data provider refused request: {note}"),
        ));
    }

    Ok(())
}

#[async_trait::async_trait]
impl MarketDataProvider for AlphaVantageClient {
    fn provider_name(&self) -> &'static str {
        "alpha_vantage"
    }

    async fn fetch_overview(&self, symbol: &str) -> Result<Overview, FetchError> {
        self.fetch(Facet::Overview, symbol).await
    }

    async fn fetch_balance_sheet(&self, symbol: &str) -> Result<BalanceSheet, FetchError> {
        self.fetch(Facet::BalanceSheet, symbol).await
    }

    async fn fetch_daily_series(&self, symbol: &str) -> Result<DailySeries, FetchError> {
        self.fetch(Facet::DailySeries, symbol).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    pub(crate) enum Reply<T> {
        Ok(T),
        Fail(&'static str),
        Hang,
    }

    /// Canned provider; counts in-flight calls so tests can check nothing is left running.
    pub(crate) struct StubProvider {
        pub overview: Reply<Overview>,
        pub balance_sheet: Reply<BalanceSheet>,
        pub daily_series: Reply<DailySeries>,
        pub delay: Duration,
        pub in_flight: Arc<AtomicUsize>,
    }

    impl StubProvider {
        pub fn new(overview: Reply<Overview>, balance_sheet: Reply<BalanceSheet>) -> Self {
            Self {
                overview,
                balance_sheet,
                daily_series: Reply::Fail("no daily series stubbed"),
                delay: Duration::ZERO,
                in_flight: Arc::new(AtomicUsize::new(0)),
            }
        }

        async fn reply<T: Clone>(&self, facet: Facet, reply: &Reply<T>) -> Result<T, FetchError> {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let _guard = InFlight(self.in_flight.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match reply {
                Reply::Ok(v) => Ok(v.clone()),
                Reply::Fail(msg) => Err(FetchError::provider(facet, anyhow::anyhow!(*msg))),
                Reply::Hang => std::future::pending().await,
            }
        }
    }

    struct InFlight(Arc<AtomicUsize>);

    impl Drop for InFlight {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl MarketDataProvider for StubProvider {
        fn provider_name(&self) -> &'static str {
            "stub"
        }

        async fn fetch_overview(&self, _symbol: &str) -> Result<Overview, FetchError> {
            self.reply(Facet::Overview, &self.overview).await
        }

        async fn fetch_balance_sheet(&self, _symbol: &str) -> Result<BalanceSheet, FetchError> {
            self.reply(Facet::BalanceSheet, &self.balance_sheet).await
        }

        async fn fetch_daily_series(&self, _symbol: &str) -> Result<DailySeries, FetchError> {
            self.reply(Facet::DailySeries, &self.daily_series).await
        }
    }
}
