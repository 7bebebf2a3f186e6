use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use findata_core::domain::contract::RuleSetDocument;
use findata_core::domain::market::{normalize_symbol, LatestStockMetric};
use findata_core::domain::recommendation::Recommendation;
use findata_core::domain::rules::ScoringRules;
use findata_core::domain::user::{NewUser, User};
use findata_core::engine::scoring::{breakdown, MetricScore};
use findata_core::engine::RecommendationBuilder;
use findata_core::error::{EngineError, FetchError};
use findata_core::ingest::provider::{AlphaVantageClient, MarketDataProvider};
use findata_core::ingest::types::DailySeries;
use findata_core::storage::{PgStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = findata_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let rules = Arc::new(load_rules(&settings)?);

    let provider: Option<Arc<dyn MarketDataProvider>> =
        match AlphaVantageClient::from_settings(&settings) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(
                    error = %e,
                    "market data client unavailable; starting API in degraded mode"
                );
                None
            }
        };

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match findata_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(
                        error = %e,
                        "db migrations failed; starting API in degraded mode"
                    );
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let store = pool.map(|pool| Arc::new(PgStore::new(pool)) as Arc<dyn Store>);
    let state = AppState::new(store, provider, rules, settings.analysis_timeout());

    let app = router(state).layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/users", post(create_user))
        .route(
            "/users/:user_id/stocks/:symbol/analysis",
            post(analyze_stock),
        )
        .route("/stocks/:symbol/metrics", get(get_latest_metrics))
        .route("/stocks/:symbol/daily", get(get_daily_series))
        .with_state(state)
}

fn load_rules(settings: &findata_core::config::Settings) -> anyhow::Result<ScoringRules> {
    match settings.scoring_rules_path.as_deref() {
        Some(path) => {
            let rules = RuleSetDocument::load(path)?;
            tracing::info!(%path, rules = rules.len(), "loaded scoring rules");
            Ok(rules)
        }
        None => Ok(ScoringRules::canonical()),
    }
}

async fn healthz() -> &'static str {
    "ok"
}

/// Shared handler state. Each dependency is optional; routes needing a missing one answer 503.
#[derive(Clone)]
struct AppState {
    store: Option<Arc<dyn Store>>,
    provider: Option<Arc<dyn MarketDataProvider>>,
    builder: Option<Arc<RecommendationBuilder>>,
    rules: Arc<ScoringRules>,
    analysis_timeout: Duration,
}

impl AppState {
    fn new(
        store: Option<Arc<dyn Store>>,
        provider: Option<Arc<dyn MarketDataProvider>>,
        rules: Arc<ScoringRules>,
        analysis_timeout: Duration,
    ) -> Self {
        let builder = match (&store, &provider) {
            (Some(store), Some(provider)) => Some(Arc::new(RecommendationBuilder::new(
                store.clone(),
                provider.clone(),
                rules.clone(),
            ))),
            _ => None,
        };
        Self {
            store,
            provider,
            builder,
            rules,
            analysis_timeout,
        }
    }
}

#[derive(Debug, Serialize)]
struct RecommendationDto {
    id: Uuid,
    analysis_id: Uuid,
    action: String,
    confidence_level: String,
    reason: String,
}

impl From<Recommendation> for RecommendationDto {
    fn from(r: Recommendation) -> Self {
        Self {
            id: r.id,
            analysis_id: r.analysis_id,
            action: r.action.to_string(),
            confidence_level: format!("{:.2}", r.confidence_level),
            reason: r.reason,
        }
    }
}

#[derive(Debug, Serialize)]
struct LatestMetricsDto {
    symbol: String,
    score: f64,
    metrics: Vec<LatestStockMetric>,
    breakdown: Vec<MetricScore>,
}

async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), StatusCode> {
    let new_user = payload.validate().map_err(|e| {
        tracing::info!(error = %e, "rejected user payload");
        StatusCode::BAD_REQUEST
    })?;

    let Some(store) = &state.store else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let user = store.create_user(&new_user).await.map_err(|e| {
        sentry_anyhow::capture_anyhow(&e);
        tracing::error!(error = %format!("{e:#}"), "failed to create user");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    tracing::info!(user_id = %user.id, "user created");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn analyze_stock(
    State(state): State<AppState>,
    Path((user_id, symbol)): Path<(String, String)>,
) -> Result<Json<RecommendationDto>, StatusCode> {
    let user_id = Uuid::parse_str(&user_id).map_err(|_| StatusCode::BAD_REQUEST)?;
    let symbol = required_symbol(&symbol)?;

    let Some(builder) = &state.builder else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let deadline = tokio::time::Instant::now() + state.analysis_timeout;
    let recommendation = builder
        .recommend(user_id, &symbol, deadline)
        .await
        .map_err(|e| status_for(&symbol, e))?;

    Ok(Json(recommendation.into()))
}

async fn get_latest_metrics(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<LatestMetricsDto>, StatusCode> {
    let symbol = required_symbol(&symbol)?;

    let Some(store) = &state.store else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let stock = store
        .find_stock_by_symbol(&symbol)
        .await
        .map_err(|e| status_for(&symbol, EngineError::Storage(e)))?
        .ok_or(StatusCode::NOT_FOUND)?;

    let metrics = store
        .find_latest_stock_metrics(stock.id)
        .await
        .map_err(|e| status_for(&symbol, EngineError::Storage(e)))?;

    let breakdown = breakdown(&state.rules, &metrics);
    let score: f64 = breakdown.iter().map(|m| m.contribution).sum();

    Ok(Json(LatestMetricsDto {
        symbol: stock.symbol,
        score,
        metrics,
        breakdown,
    }))
}

/// Daily price series straight from the market data provider.
async fn get_daily_series(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<DailySeries>, StatusCode> {
    let symbol = required_symbol(&symbol)?;

    let Some(provider) = &state.provider else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let deadline = tokio::time::Instant::now() + state.analysis_timeout;
    let fetch = provider.fetch_daily_series(&symbol);
    let series = match tokio::time::timeout_at(deadline, fetch).await {
        Ok(res) => res,
        Err(_) => Err(FetchError::DeadlineExceeded {
            facet: findata_core::ingest::Facet::DailySeries,
        }),
    };

    match series {
        Ok(series) => Ok(Json(series)),
        Err(FetchError::NotFound { .. }) => Err(StatusCode::NOT_FOUND),
        Err(FetchError::DeadlineExceeded { .. }) => {
            tracing::warn!(%symbol, "daily series fetch timed out");
            Err(StatusCode::GATEWAY_TIMEOUT)
        }
        Err(e) => {
            let err = anyhow::Error::new(e);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(%symbol, error = %format!("{err:#}"), "daily series fetch failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn required_symbol(raw: &str) -> Result<String, StatusCode> {
    let symbol = normalize_symbol(raw);
    if symbol.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(symbol)
}

fn status_for(symbol: &str, err: EngineError) -> StatusCode {
    match err {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        e if e.is_deadline_exceeded() => {
            tracing::warn!(%symbol, "analysis timed out");
            StatusCode::GATEWAY_TIMEOUT
        }
        e => {
            let err = anyhow::Error::new(e);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(%symbol, error = %format!("{err:#}"), "analysis failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &findata_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
