use anyhow::Context;
use clap::{Parser, Subcommand};
use findata_core::domain::contract::RuleSetDocument;
use findata_core::domain::market::{normalize_symbol, Stock, DEFAULT_STOCKS};
use findata_core::domain::rules::ScoringRules;
use findata_core::domain::user::{NewUser, User};
use findata_core::engine::RecommendationBuilder;
use findata_core::ingest::provider::{AlphaVantageClient, MarketDataProvider};
use findata_core::storage::memory::InMemoryStore;
use findata_core::storage::{PgStore, Store};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "findata_worker")]
#[command(about = "Batch analysis and maintenance for the findata store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Analyse symbols and record a recommendation for each
    Analyze {
        /// Symbols to analyse, comma separated (e.g. AAPL,MSFT).
        #[arg(long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,

        /// User the analyses are recorded for.
        #[arg(long)]
        user_id: Option<Uuid>,

        /// Fetch, score and recommend against an in-memory store instead of the database.
        #[arg(long)]
        dry_run: bool,
    },
    /// Register the default stock universe, extra symbols and optionally a user
    Seed {
        /// Extra symbols to register on top of the defaults, comma separated.
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,

        #[arg(long, requires_all = ["firstname", "lastname"])]
        email: Option<String>,

        #[arg(long, requires = "email")]
        firstname: Option<String>,

        #[arg(long, requires = "email")]
        lastname: Option<String>,
    },
    /// Print the active scoring rules as a JSON rule-set document
    Rules,
}

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

    let rules = Arc::new(match settings.scoring_rules_path.as_deref() {
        Some(path) => RuleSetDocument::load(path)?,
        None => ScoringRules::canonical(),
    });

    match Cli::parse().command {
        Commands::Analyze {
            symbols,
            user_id,
            dry_run,
        } => analyze(&settings, rules, &symbols, user_id, dry_run).await,
        Commands::Seed {
            symbols,
            email,
            firstname,
            lastname,
        } => {
            let user = match (email, firstname, lastname) {
                (Some(email), Some(firstname), Some(lastname)) => Some(NewUser {
                    email,
                    firstname,
                    lastname,
                }),
                _ => None,
            };
            let store = connect(&settings).await?;
            let report = seed(&store, &symbols, user).await?;
            if let Some(user) = &report.user {
                println!("{}", user.id);
            }
            Ok(())
        }
        Commands::Rules => {
            println!("{}", rules_json(&rules)?);
            Ok(())
        }
    }
}

async fn connect(settings: &findata_core::config::Settings) -> anyhow::Result<PgStore> {
    let db_url = settings.require_database_url()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    findata_core::storage::migrate(&pool).await?;
    Ok(PgStore::new(pool))
}

async fn analyze(
    settings: &findata_core::config::Settings,
    rules: Arc<ScoringRules>,
    symbols: &[String],
    user_id: Option<Uuid>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let symbols = normalize_symbols(symbols);
    anyhow::ensure!(!symbols.is_empty(), "at least one symbol is required");

    let provider: Arc<dyn MarketDataProvider> =
        Arc::new(AlphaVantageClient::from_settings(settings)?);

    if dry_run {
        let store = InMemoryStore::with_canonical_metrics();
        let user_id = store.insert_user()?;
        for symbol in &symbols {
            store.insert_stock(symbol, symbol)?;
        }
        let builder = RecommendationBuilder::new(Arc::new(store), provider, rules);

        let failures = run_batch(&builder, None, user_id, &symbols, settings).await;
        tracing::info!(dry_run = true, symbols = symbols.len(), failures, "batch finished");
        return Ok(());
    }

    let user_id = user_id.context("--user-id is required unless --dry-run is set")?;
    let store = connect(settings).await?;
    let builder = RecommendationBuilder::new(Arc::new(store.clone()), provider, rules);

    let failures = run_batch(&builder, Some(&store), user_id, &symbols, settings).await;
    tracing::info!(symbols = symbols.len(), failures, "batch finished");

    anyhow::ensure!(failures < symbols.len(), "every analysis in the batch failed");
    Ok(())
}

fn normalize_symbols(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|s| normalize_symbol(s))
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug)]
struct SeedReport {
    stocks: Vec<Stock>,
    user: Option<User>,
}

/// Upserts the default universe plus `extra` symbols, then creates `user` if given.
async fn seed(
    store: &dyn Store,
    extra: &[String],
    user: Option<NewUser>,
) -> anyhow::Result<SeedReport> {
    let mut stocks = Vec::new();
    for (symbol, company) in DEFAULT_STOCKS {
        stocks.push(store.upsert_stock(symbol, company).await?);
    }
    for symbol in normalize_symbols(extra) {
        if DEFAULT_STOCKS.iter().any(|(known, _)| *known == symbol) {
            continue;
        }
        stocks.push(store.upsert_stock(&symbol, &symbol).await?);
    }
    tracing::info!(stocks = stocks.len(), "stock universe seeded");

    let user = match user {
        Some(user) => {
            let user = store.create_user(&user.validate()?).await?;
            tracing::info!(user_id = %user.id, "user created");
            Some(user)
        }
        None => None,
    };

    Ok(SeedReport { stocks, user })
}

fn rules_json(rules: &ScoringRules) -> anyhow::Result<String> {
    serde_json::to_string_pretty(&RuleSetDocument::from(rules))
        .context("serialize scoring rules failed")
}

/// Analyses each symbol in turn; returns how many failed.
async fn run_batch(
    builder: &RecommendationBuilder,
    pg: Option<&PgStore>,
    user_id: Uuid,
    symbols: &[String],
    settings: &findata_core::config::Settings,
) -> usize {
    let mut failures = 0;
    for symbol in symbols {
        if let Err(err) = analyse_one(builder, pg, user_id, symbol, settings).await {
            failures += 1;
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(
                %symbol,
                error = %format!("{err:#}"),
                "analysis failed; continuing with batch"
            );
        }
    }
    failures
}

async fn analyse_one(
    builder: &RecommendationBuilder,
    pg: Option<&PgStore>,
    user_id: Uuid,
    symbol: &str,
    settings: &findata_core::config::Settings,
) -> anyhow::Result<()> {
    // Hold the advisory lock on one connection for the whole run.
    let mut lock = match pg {
        Some(store) => {
            let stock = store
                .find_stock_by_symbol(symbol)
                .await?
                .with_context(|| format!("stock not found: {symbol}"))?;
            let mut conn = store
                .pool()
                .acquire()
                .await
                .context("acquire lock connection failed")?;
            let acquired =
                findata_core::storage::lock::try_acquire_stock_lock(&mut conn, stock.id).await?;
            if !acquired {
                tracing::warn!(%symbol, "stock lock not acquired; another run in progress");
                return Ok(());
            }
            Some((conn, stock.id))
        }
        None => None,
    };

    let deadline = tokio::time::Instant::now() + settings.analysis_timeout();
    let result = builder.recommend(user_id, symbol, deadline).await;

    if let Some((conn, stock_id)) = lock.as_mut() {
        let _ = findata_core::storage::lock::release_stock_lock(conn, *stock_id).await;
    }

    let recommendation = result?;
    tracing::info!(
        %symbol,
        action = %recommendation.action,
        confidence = recommendation.confidence_level,
        recommendation_id = %recommendation.id,
        "analysis complete"
    );
    Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Commands, clap::Error> {
        let argv = std::iter::once("findata_worker").chain(args.iter().copied());
        Cli::try_parse_from(argv).map(|cli| cli.command)
    }

    #[test]
    fn parses_comma_separated_symbols() {
        let Commands::Analyze {
            symbols,
            user_id,
            dry_run,
        } = parse(&["analyze", "--symbols", "AAPL,MSFT", "--dry-run"]).unwrap()
        else {
            panic!("expected analyze");
        };
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
        assert!(dry_run);
        assert!(user_id.is_none());
    }

    #[test]
    fn requires_symbols() {
        assert!(parse(&["analyze", "--dry-run"]).is_err());
    }

    #[test]
    fn parses_user_id() {
        let id = Uuid::new_v4();
        let Commands::Analyze { user_id, .. } =
            parse(&["analyze", "--symbols", "IBM", "--user-id", &id.to_string()]).unwrap()
        else {
            panic!("expected analyze");
        };
        assert_eq!(user_id, Some(id));
    }

    #[test]
    fn seed_user_needs_every_field() {
        assert!(parse(&["seed", "--email", "ada@example.com"]).is_err());
        assert!(parse(&["seed", "--firstname", "Ada"]).is_err());
        assert!(parse(&[
            "seed",
            "--email",
            "ada@example.com",
            "--firstname",
            "Ada",
            "--lastname",
            "Lovelace",
        ])
        .is_ok());
        assert!(matches!(parse(&["seed"]).unwrap(), Commands::Seed { .. }));
    }

    #[test]
    fn normalizes_and_drops_blank_symbols() {
        let raw = vec![" \"AAPL\" ".to_string(), "''".to_string(), "MSFT".to_string()];
        assert_eq!(normalize_symbols(&raw), vec!["AAPL", "MSFT"]);
    }

    #[tokio::test]
    async fn seed_registers_defaults_extras_and_user() {
        let store = InMemoryStore::new();
        let user = NewUser {
            email: "Ada@Example.com".into(),
            firstname: "Ada".into(),
            lastname: "Lovelace".into(),
        };

        let report = seed(&store, &["NVDA".into(), "AAPL".into()], Some(user))
            .await
            .unwrap();

        assert_eq!(report.stocks.len(), DEFAULT_STOCKS.len() + 1);
        let nvda = store.find_stock_by_symbol("NVDA").await.unwrap().unwrap();
        assert_eq!(nvda.company, "NVDA");
        let aapl = store.find_stock_by_symbol("AAPL").await.unwrap().unwrap();
        assert_eq!(aapl.company, "Apple Inc.");

        let user = report.user.unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert!(store.user_exists(user.id).await.unwrap());
    }

    #[tokio::test]
    async fn reseeding_keeps_stock_ids() {
        let store = InMemoryStore::new();
        let first = seed(&store, &[], None).await.unwrap();
        let second = seed(&store, &[], None).await.unwrap();

        let ids = |r: &SeedReport| r.stocks.iter().map(|s| s.id).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        assert!(second.user.is_none());
    }

    #[tokio::test]
    async fn seed_rejects_invalid_user() {
        let store = InMemoryStore::new();
        let user = NewUser {
            email: "nobody".into(),
            firstname: "Ada".into(),
            lastname: "Lovelace".into(),
        };
        assert!(seed(&store, &[], Some(user)).await.is_err());
    }

    #[test]
    fn rules_json_reloads_to_the_same_table() {
        let rules = ScoringRules::canonical();
        let json = rules_json(&rules).unwrap();
        let reloaded = RuleSetDocument::from_json(&json)
            .unwrap()
            .validate_and_into_rules()
            .unwrap();
        assert_eq!(reloaded.len(), rules.len());
        assert!(json.contains("P/E Ratio"));
    }
}
