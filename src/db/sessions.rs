use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::models::User;

pub async fn create<'e, E: PgExecutor<'e>>(
    db: E,
    token: &str,
    user_id: i64,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn find_user<'e, E: PgExecutor<'e>>(db: E, token: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT users.* FROM sessions
        JOIN users ON users.id = sessions.user_id
        WHERE sessions.token = $1 AND sessions.expires_at > NOW()
        "#,
    )
    .bind(token)
    .fetch_optional(db)
    .await
}

pub async fn delete<'e, E: PgExecutor<'e>>(db: E, token: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE token = $1")
        .bind(token)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn purge_expired<'e, E: PgExecutor<'e>>(db: E) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}
