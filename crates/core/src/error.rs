use crate::ingest::Facet;
use thiserror::Error;

/// Failure of a single facet fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{facet} not found for {symbol}")]
    NotFound { facet: Facet, symbol: String },

    #[error("{facet} fetch deadline exceeded")]
    DeadlineExceeded { facet: Facet },

    #[error("{facet} fetch failed: {source:#}")]
    Provider {
        facet: Facet,
        #[source]
        source: anyhow::Error,
    },
}

impl FetchError {
    pub fn facet(&self) -> Facet {
        match self {
            FetchError::NotFound { facet, .. }
            | FetchError::DeadlineExceeded { facet }
            | FetchError::Provider { facet, .. } => *facet,
        }
    }

    pub fn provider(facet: Facet, source: impl Into<anyhow::Error>) -> Self {
        FetchError::Provider {
            facet,
            source: source.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("stock not found: {0}")]
    StockNotFound(String),

    #[error("user not found: {0}")]
    UserNotFound(uuid::Uuid),

    #[error("failed to fetch stock data: {overview} & {balance_sheet}")]
    TotalFetchFailure {
        overview: FetchError,
        balance_sheet: FetchError,
    },

    #[error("analysis deadline exceeded")]
    DeadlineExceeded,

    #[error("storage failure: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl EngineError {
    /// True when the run ran out of time, including a fetch stage where every facet timed out.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(
            self,
            EngineError::DeadlineExceeded
                | EngineError::TotalFetchFailure {
                    overview: FetchError::DeadlineExceeded { .. },
                    balance_sheet: FetchError::DeadlineExceeded { .. },
                }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::StockNotFound(_) | EngineError::UserNotFound(_)
        )
    }
}
