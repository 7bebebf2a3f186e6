use crate::domain::recommendation::{Action, Analysis, Recommendation};
use anyhow::Context;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub async fn create_analysis(
    pool: &sqlx::PgPool,
    user_id: Uuid,
    stock_id: Uuid,
    score: f64,
) -> anyhow::Result<Analysis> {
    let mut conn = pool.acquire().await.context("acquire connection failed")?;
    insert_analysis(&mut conn, user_id, stock_id, score).await
}

pub async fn create_recommendation(
    pool: &sqlx::PgPool,
    analysis_id: Uuid,
    action: Action,
    confidence_level: f64,
    reason: &str,
) -> anyhow::Result<Recommendation> {
    let mut conn = pool.acquire().await.context("acquire connection failed")?;
    insert_recommendation(&mut conn, analysis_id, action, confidence_level, reason).await
}

/// Inserts the analysis and its recommendation in one transaction, so a failed second write
/// cannot leave an analysis without a recommendation.
pub async fn persist_analysis_with_recommendation(
    pool: &sqlx::PgPool,
    user_id: Uuid,
    stock_id: Uuid,
    score: f64,
    action: Action,
    confidence_level: f64,
    reason: &str,
) -> anyhow::Result<(Analysis, Recommendation)> {
    anyhow::ensure!(
        (0.0..=100.0).contains(&confidence_level),
        "confidence_level must be between 0 and 100 (got {confidence_level})"
    );

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let analysis = insert_analysis(&mut tx, user_id, stock_id, score).await?;
    let recommendation =
        insert_recommendation(&mut tx, analysis.id, action, confidence_level, reason).await?;

    tx.commit().await.context("commit transaction failed")?;
    Ok((analysis, recommendation))
}

async fn insert_analysis(
    conn: &mut sqlx::PgConnection,
    user_id: Uuid,
    stock_id: Uuid,
    score: f64,
) -> anyhow::Result<Analysis> {
    let (id, created_at): (Uuid, DateTime<Utc>) = sqlx::query_as(
        "INSERT INTO analysis (user_id, stock_id, score) \
         VALUES ($1, $2, $3) \
         RETURNING id, created_at",
    )
    .bind(user_id)
    .bind(stock_id)
    .bind(score)
    .fetch_one(&mut *conn)
    .await
    .context("insert analysis failed")?;

    Ok(Analysis {
        id,
        user_id,
        stock_id,
        score,
        created_at,
    })
}

async fn insert_recommendation(
    conn: &mut sqlx::PgConnection,
    analysis_id: Uuid,
    action: Action,
    confidence_level: f64,
    reason: &str,
) -> anyhow::Result<Recommendation> {
    let (id, created_at): (Uuid, DateTime<Utc>) = sqlx::query_as(
        "INSERT INTO recommendation (analysis_id, action, confidence_level, reason) \
         VALUES ($1, $2, $3, $4) \
         RETURNING id, created_at",
    )
    .bind(analysis_id)
    .bind(action.as_str())
    .bind(confidence_level)
    .bind(reason)
    .fetch_one(&mut *conn)
    .await
    .context("insert recommendation failed")?;

    Ok(Recommendation {
        id,
        analysis_id,
        action,
        confidence_level,
        reason: reason.to_string(),
        created_at,
    })
}
