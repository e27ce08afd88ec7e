use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

use crate::models::{Article, ArticleChallenge, Commission, CommissionStatus, NormalizeRule, Visibility};

#[derive(Debug, FromRow)]
pub struct ArticleRow {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub visibility: String,
    pub author_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ArticleRow> for Article {
    type Error = sqlx::Error;

    fn try_from(row: ArticleRow) -> Result<Self, Self::Error> {
        Ok(Article {
            id: row.id,
            title: row.title,
            body: row.body,
            visibility: row.visibility.parse::<Visibility>().map_err(decode_error)?,
            author_id: row.author_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct ChallengeRow {
    pub id: i64,
    pub article_id: i64,
    pub prompt: String,
    pub answer_hash: String,
    pub normalize_rule: String,
    pub hint: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ChallengeRow> for ArticleChallenge {
    type Error = sqlx::Error;

    fn try_from(row: ChallengeRow) -> Result<Self, Self::Error> {
        Ok(ArticleChallenge {
            id: row.id,
            article_id: row.article_id,
            prompt: row.prompt,
            answer_hash: row.answer_hash,
            normalize_rule: row.normalize_rule.parse::<NormalizeRule>().map_err(decode_error)?,
            hint: row.hint,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct CommissionRow {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub budget: Option<Decimal>,
    pub status: i32,
    pub customer_id: i64,
    pub assigned_author_id: Option<i64>,
    pub estimated_delivery_date: Option<NaiveDate>,
    pub progress_pct: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<CommissionRow> for Commission {
    type Error = sqlx::Error;

    fn try_from(row: CommissionRow) -> Result<Self, Self::Error> {
        Ok(Commission {
            id: row.id,
            title: row.title,
            description: row.description,
            budget: row.budget,
            status: CommissionStatus::try_from(row.status).map_err(decode_error)?,
            customer_id: row.customer_id,
            assigned_author_id: row.assigned_author_id,
            estimated_delivery_date: row.estimated_delivery_date,
            progress_pct: row.progress_pct,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn decode_error<E: Into<Box<dyn std::error::Error + Send + Sync>>>(err: E) -> sqlx::Error {
    sqlx::Error::Decode(err.into())
}

/// Converts a batch of rows, failing on the first one that does not decode.
pub fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, sqlx::Error>
where
    T: TryFrom<R, Error = sqlx::Error>,
{
    rows.into_iter().map(T::try_from).collect()
}
