use sqlx::PgExecutor;

use crate::models::user::UserChanges;
use crate::models::User;

pub struct NewUserRecord<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub is_author: bool,
    pub is_client: bool,
    pub bio: Option<&'a str>,
}

pub async fn find<'e, E: PgExecutor<'e>>(db: E, id: i64) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn find_by_email<'e, E: PgExecutor<'e>>(
    db: E,
    email: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
        .bind(email.trim())
        .fetch_optional(db)
        .await
}

pub async fn find_many<'e, E: PgExecutor<'e>>(db: E, ids: &[i64]) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ANY($1)")
        .bind(ids)
        .fetch_all(db)
        .await
}

pub async fn list<'e, E: PgExecutor<'e>>(
    db: E,
    is_author: Option<bool>,
    is_client: Option<bool>,
) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users
        WHERE ($1::boolean IS NULL OR is_author = $1)
          AND ($2::boolean IS NULL OR is_client = $2)
        ORDER BY id
        "#,
    )
    .bind(is_author)
    .bind(is_client)
    .fetch_all(db)
    .await
}

pub async fn insert<'e, E: PgExecutor<'e>>(
    db: E,
    user: &NewUserRecord<'_>,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (name, email, password_hash, is_author, is_client, bio)
        VALUES ($1, LOWER($2), $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(user.name.trim())
    .bind(user.email.trim())
    .bind(user.password_hash)
    .bind(user.is_author)
    .bind(user.is_client)
    .bind(user.bio)
    .fetch_one(db)
    .await
}

pub async fn update<'e, E: PgExecutor<'e>>(
    db: E,
    id: i64,
    changes: &UserChanges,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        UPDATE users SET
            name = COALESCE($2, name),
            email = COALESCE(LOWER($3), email),
            bio = COALESCE($4, bio),
            is_author = COALESCE($5, is_author),
            is_client = COALESCE($6, is_client),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(changes.name.as_deref().map(str::trim))
    .bind(changes.email.as_deref().map(str::trim))
    .bind(changes.bio.as_deref())
    .bind(changes.is_author)
    .bind(changes.is_client)
    .fetch_optional(db)
    .await
}

/// Flags the user as an author; a no-op when already set.
pub async fn mark_author<'e, E: PgExecutor<'e>>(db: E, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET is_author = TRUE, updated_at = NOW() WHERE id = $1 AND NOT is_author")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn delete<'e, E: PgExecutor<'e>>(db: E, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}
