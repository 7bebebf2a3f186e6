use crate::domain::market::{LatestStockMetric, Metric, Stock, StockMetric};
use anyhow::Context;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub async fn find_stock_by_symbol(
    pool: &sqlx::PgPool,
    symbol: &str,
) -> anyhow::Result<Option<Stock>> {
    let row = sqlx::query_as::<_, (Uuid, String, String)>(
        "SELECT id, symbol, company FROM stock WHERE symbol = $1",
    )
    .bind(symbol)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("select stock failed (symbol={symbol})"))?;

    Ok(row.map(|(id, symbol, company)| Stock {
        id,
        symbol,
        company,
    }))
}

/// Registers a stock, or refreshes the company name of an existing symbol.
pub async fn upsert_stock(
    pool: &sqlx::PgPool,
    symbol: &str,
    company: &str,
) -> anyhow::Result<Stock> {
    let (id, symbol, company) = sqlx::query_as::<_, (Uuid, String, String)>(
        "INSERT INTO stock (symbol, company) \
         VALUES ($1, $2) \
         ON CONFLICT (symbol) DO UPDATE SET company = EXCLUDED.company \
         RETURNING id, symbol, company",
    )
    .bind(symbol)
    .bind(company)
    .fetch_one(pool)
    .await
    .with_context(|| format!("upsert stock failed (symbol={symbol})"))?;

    Ok(Stock {
        id,
        symbol,
        company,
    })
}

pub async fn list_metrics(
    pool: &sqlx::PgPool,
    limit: i64,
    offset: i64,
) -> anyhow::Result<Vec<Metric>> {
    let rows = sqlx::query_as::<_, (Uuid, String, String)>(
        "SELECT id, name, description FROM metric ORDER BY name LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("select metric failed")?;

    Ok(rows
        .into_iter()
        .map(|(id, name, description)| Metric {
            id,
            name,
            description,
        })
        .collect())
}

pub async fn create_stock_metric(
    pool: &sqlx::PgPool,
    stock_id: Uuid,
    metric_id: Uuid,
    value: f64,
) -> anyhow::Result<StockMetric> {
    let (id, recorded_at): (Uuid, DateTime<Utc>) = sqlx::query_as(
        "INSERT INTO stock_metric (stock_id, metric_id, value, recorded_at) \
         VALUES ($1, $2, $3, $4) \
         RETURNING id, recorded_at",
    )
    .bind(stock_id)
    .bind(metric_id)
    .bind(value)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .with_context(|| {
        format!("insert stock_metric failed (stock_id={stock_id}, metric_id={metric_id})")
    })?;

    Ok(StockMetric {
        id,
        stock_id,
        metric_id,
        value,
        recorded_at,
    })
}

pub async fn find_latest_stock_metrics(
    pool: &sqlx::PgPool,
    stock_id: Uuid,
) -> anyhow::Result<Vec<LatestStockMetric>> {
    let rows = sqlx::query_as::<_, (String, f64, DateTime<Utc>)>(
        "SELECT DISTINCT ON (sm.metric_id) m.name, sm.value, sm.recorded_at \
         FROM stock_metric sm \
         INNER JOIN metric m ON sm.metric_id = m.id \
         WHERE sm.stock_id = $1 \
         ORDER BY sm.metric_id, sm.recorded_at DESC",
    )
    .bind(stock_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("select latest stock_metric failed (stock_id={stock_id})"))?;

    Ok(rows
        .into_iter()
        .map(|(metric_name, value, recorded_at)| LatestStockMetric {
            metric_name,
            value,
            recorded_at,
        })
        .collect())
}
