use sqlx::PgExecutor;

use super::models::{convert_all, ChallengeRow};
use crate::models::{ArticleChallenge, NormalizeRule};

pub struct ChallengeRecord<'a> {
    pub prompt: &'a str,
    pub answer_hash: &'a str,
    pub normalize_rule: NormalizeRule,
    pub hint: Option<&'a str>,
    pub enabled: bool,
}

pub async fn for_article<'e, E: PgExecutor<'e>>(
    db: E,
    article_id: i64,
) -> Result<Vec<ArticleChallenge>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ChallengeRow>(
        "SELECT * FROM article_challenges WHERE article_id = $1 ORDER BY id",
    )
    .bind(article_id)
    .fetch_all(db)
    .await?;
    convert_all(rows)
}

/// Enabled challenges, oldest first. The first one is the article's
/// designated challenge.
pub async fn enabled_for_article<'e, E: PgExecutor<'e>>(
    db: E,
    article_id: i64,
) -> Result<Vec<ArticleChallenge>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ChallengeRow>(
        "SELECT * FROM article_challenges WHERE article_id = $1 AND enabled ORDER BY id",
    )
    .bind(article_id)
    .fetch_all(db)
    .await?;
    convert_all(rows)
}

pub async fn count_enabled<'e, E: PgExecutor<'e>>(db: E, article_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM article_challenges WHERE article_id = $1 AND enabled",
    )
    .bind(article_id)
    .fetch_one(db)
    .await
}

pub async fn find<'e, E: PgExecutor<'e>>(
    db: E,
    article_id: i64,
    id: i64,
) -> Result<Option<ArticleChallenge>, sqlx::Error> {
    sqlx::query_as::<_, ChallengeRow>(
        "SELECT * FROM article_challenges WHERE article_id = $1 AND id = $2",
    )
    .bind(article_id)
    .bind(id)
    .fetch_optional(db)
    .await?
    .map(ArticleChallenge::try_from)
    .transpose()
}

pub async fn insert<'e, E: PgExecutor<'e>>(
    db: E,
    article_id: i64,
    record: &ChallengeRecord<'_>,
) -> Result<ArticleChallenge, sqlx::Error> {
    sqlx::query_as::<_, ChallengeRow>(
        r#"
        INSERT INTO article_challenges (article_id, prompt, answer_hash, normalize_rule, hint, enabled)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(article_id)
    .bind(record.prompt)
    .bind(record.answer_hash)
    .bind(record.normalize_rule.as_str())
    .bind(record.hint)
    .bind(record.enabled)
    .fetch_one(db)
    .await?
    .try_into()
}

pub async fn update<'e, E: PgExecutor<'e>>(
    db: E,
    id: i64,
    record: &ChallengeRecord<'_>,
) -> Result<ArticleChallenge, sqlx::Error> {
    sqlx::query_as::<_, ChallengeRow>(
        r#"
        UPDATE article_challenges
        SET prompt = $2, answer_hash = $3, normalize_rule = $4, hint = $5, enabled = $6, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(record.prompt)
    .bind(record.answer_hash)
    .bind(record.normalize_rule.as_str())
    .bind(record.hint)
    .bind(record.enabled)
    .fetch_one(db)
    .await?
    .try_into()
}

pub async fn delete<'e, E: PgExecutor<'e>>(db: E, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM article_challenges WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}
