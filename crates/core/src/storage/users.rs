use crate::domain::user::{NewUser, User};
use anyhow::Context;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub async fn user_exists(pool: &sqlx::PgPool, user_id: Uuid) -> anyhow::Result<bool> {
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .with_context(|| format!("select users failed (user_id={user_id})"))?;
    Ok(exists.0)
}

pub async fn create_user(pool: &sqlx::PgPool, user: &NewUser) -> anyhow::Result<User> {
    let (id, created_at): (Uuid, DateTime<Utc>) = sqlx::query_as(
        "INSERT INTO users (email, firstname, lastname) \
         VALUES ($1, $2, $3) \
         RETURNING id, created_at",
    )
    .bind(&user.email)
    .bind(&user.firstname)
    .bind(&user.lastname)
    .fetch_one(pool)
    .await
    .with_context(|| format!("insert users failed (email={})", user.email))?;

    Ok(User {
        id,
        email: user.email.clone(),
        firstname: user.firstname.clone(),
        lastname: user.lastname.clone(),
        created_at,
    })
}
