use anyhow::Context;
use uuid::Uuid;

// Advisory locks are scoped to the Postgres session. Used by batch runs as a best-effort guard
// against two workers analysing the same stock at once.
const LOCK_NAMESPACE: i64 = 0x4649_4E44_4154; // "FINDAT"

fn lock_key_for_stock(stock_id: Uuid) -> i64 {
    let (hi, lo) = stock_id.as_u64_pair();
    LOCK_NAMESPACE ^ ((hi ^ lo) as i64)
}

pub async fn try_acquire_stock_lock(
    conn: &mut sqlx::PgConnection,
    stock_id: Uuid,
) -> anyhow::Result<bool> {
    let key = lock_key_for_stock(stock_id);
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;
    Ok(acquired.0)
}

pub async fn release_stock_lock(
    conn: &mut sqlx::PgConnection,
    stock_id: Uuid,
) -> anyhow::Result<()> {
    let key = lock_key_for_stock(stock_id);
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(key)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to release advisory lock (key={key})"))?;
    Ok(())
}
