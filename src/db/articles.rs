use sqlx::PgExecutor;

use super::models::{convert_all, ArticleRow};
use crate::models::{Article, Visibility};

/// Listing filters. Private articles are only listed for their author.
#[derive(Debug, Default)]
pub struct ArticleFilter {
    pub search: Option<String>,
    pub visibility: Option<Visibility>,
    pub author_id: Option<i64>,
    pub viewer_id: Option<i64>,
}

pub async fn find<'e, E: PgExecutor<'e>>(db: E, id: i64) -> Result<Option<Article>, sqlx::Error> {
    sqlx::query_as::<_, ArticleRow>("SELECT * FROM articles WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?
        .map(Article::try_from)
        .transpose()
}

/// Like [`find`], but holds a row lock until the transaction ends.
pub async fn find_for_update<'e, E: PgExecutor<'e>>(db: E, id: i64) -> Result<Option<Article>, sqlx::Error> {
    sqlx::query_as::<_, ArticleRow>("SELECT * FROM articles WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(db)
        .await?
        .map(Article::try_from)
        .transpose()
}

const FILTER_CLAUSE: &str = r#"
    WHERE (visibility <> 'private' OR author_id = $1)
      AND ($2::text IS NULL OR title ILIKE '%' || $2 || '%' OR body ILIKE '%' || $2 || '%')
      AND ($3::text IS NULL OR visibility = $3)
      AND ($4::bigint IS NULL OR author_id = $4)
"#;

pub async fn count<'e, E: PgExecutor<'e>>(db: E, filter: &ArticleFilter) -> Result<i64, sqlx::Error> {
    let sql = format!("SELECT COUNT(*) FROM articles {}", FILTER_CLAUSE);
    let total = sqlx::query_scalar::<_, i64>(&sql)
        .bind(filter.viewer_id)
        .bind(filter.search.as_deref())
        .bind(filter.visibility.map(Visibility::as_str))
        .bind(filter.author_id)
        .fetch_one(db)
        .await?;
    Ok(total)
}

pub async fn page<'e, E: PgExecutor<'e>>(
    db: E,
    filter: &ArticleFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<Article>, sqlx::Error> {
    let sql = format!(
        "SELECT * FROM articles {} ORDER BY created_at DESC, id DESC LIMIT $5 OFFSET $6",
        FILTER_CLAUSE
    );
    let rows = sqlx::query_as::<_, ArticleRow>(&sql)
        .bind(filter.viewer_id)
        .bind(filter.search.as_deref())
        .bind(filter.visibility.map(Visibility::as_str))
        .bind(filter.author_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?;
    convert_all(rows)
}

/// Public and restricted articles, newest first.
pub async fn listed<'e, E: PgExecutor<'e>>(db: E) -> Result<Vec<Article>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ArticleRow>(
        "SELECT * FROM articles WHERE visibility IN ('public', 'restricted') ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(db)
    .await?;
    convert_all(rows)
}

pub async fn insert<'e, E: PgExecutor<'e>>(
    db: E,
    title: &str,
    body: &str,
    visibility: Visibility,
    author_id: i64,
) -> Result<Article, sqlx::Error> {
    sqlx::query_as::<_, ArticleRow>(
        r#"
        INSERT INTO articles (title, body, visibility, author_id)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(title)
    .bind(body)
    .bind(visibility.as_str())
    .bind(author_id)
    .fetch_one(db)
    .await?
    .try_into()
}

pub async fn update<'e, E: PgExecutor<'e>>(
    db: E,
    id: i64,
    title: &str,
    body: &str,
    visibility: Visibility,
) -> Result<Article, sqlx::Error> {
    sqlx::query_as::<_, ArticleRow>(
        r#"
        UPDATE articles
        SET title = $2, body = $3, visibility = $4, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(title)
    .bind(body)
    .bind(visibility.as_str())
    .fetch_one(db)
    .await?
    .try_into()
}

pub async fn delete<'e, E: PgExecutor<'e>>(db: E, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM articles WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}
