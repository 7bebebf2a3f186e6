pub mod domain;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod storage;

pub mod config {
    use anyhow::Context;
    use std::time::Duration;

    const DEFAULT_ANALYSIS_TIMEOUT_SECS: u64 = 5;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub alpha_vantage_api_key: Option<String>,
        pub alpha_vantage_base_url: Option<String>,
        pub alpha_vantage_timeout_secs: Option<u64>,
        pub analysis_timeout_secs: u64,
        pub scoring_rules_path: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let analysis_timeout_secs = match std::env::var("ANALYSIS_TIMEOUT_SECS") {
                Ok(s) => s
                    .parse::<u64>()
                    .with_context(|| format!("ANALYSIS_TIMEOUT_SECS is not a number: {s}"))?,
                Err(_) => DEFAULT_ANALYSIS_TIMEOUT_SECS,
            };

            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                alpha_vantage_api_key: std::env::var("ALPHA_VANTAGE_API_KEY").ok(),
                alpha_vantage_base_url: std::env::var("ALPHA_VANTAGE_BASE_URL").ok(),
                alpha_vantage_timeout_secs: std::env::var("ALPHA_VANTAGE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok()),
                analysis_timeout_secs,
                scoring_rules_path: std::env::var("SCORING_RULES_PATH")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_alpha_vantage_api_key(&self) -> anyhow::Result<&str> {
            self.alpha_vantage_api_key
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .context("ALPHA_VANTAGE_API_KEY is required")
        }

        /// End-to-end budget for a single analysis run.
        pub fn analysis_timeout(&self) -> Duration {
            Duration::from_secs(self.analysis_timeout_secs)
        }
    }
}
