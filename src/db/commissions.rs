use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::PgExecutor;

use super::models::{convert_all, CommissionRow};
use crate::models::{Commission, CommissionStatus};

#[derive(Debug, Default)]
pub struct CommissionFilter {
    pub status: Option<CommissionStatus>,
    pub customer_id: Option<i64>,
    pub assigned_author_id: Option<i64>,
}

pub struct NewCommission<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub budget: Option<Decimal>,
    pub customer_id: i64,
    pub estimated_delivery_date: NaiveDate,
}

pub async fn find<'e, E: PgExecutor<'e>>(db: E, id: i64) -> Result<Option<Commission>, sqlx::Error> {
    sqlx::query_as::<_, CommissionRow>("SELECT * FROM commissions WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?
        .map(Commission::try_from)
        .transpose()
}

/// Like [`find`], but holds a row lock until the transaction ends so status
/// changes on the same commission run one after another.
pub async fn find_for_update<'e, E: PgExecutor<'e>>(db: E, id: i64) -> Result<Option<Commission>, sqlx::Error> {
    sqlx::query_as::<_, CommissionRow>("SELECT * FROM commissions WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(db)
        .await?
        .map(Commission::try_from)
        .transpose()
}

pub async fn list<'e, E: PgExecutor<'e>>(
    db: E,
    filter: &CommissionFilter,
) -> Result<Vec<Commission>, sqlx::Error> {
    let rows = sqlx::query_as::<_, CommissionRow>(
        r#"
        SELECT * FROM commissions
        WHERE ($1::integer IS NULL OR status = $1)
          AND ($2::bigint IS NULL OR customer_id = $2)
          AND ($3::bigint IS NULL OR assigned_author_id = $3)
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(filter.status.map(CommissionStatus::code))
    .bind(filter.customer_id)
    .bind(filter.assigned_author_id)
    .fetch_all(db)
    .await?;
    convert_all(rows)
}

const SCHEDULE_LOCK_KEY: i64 = 0x6174_656c_6965_72;

/// Serializes delivery scheduling across creates. Released on commit or
/// rollback.
pub async fn lock_schedule<'e, E: PgExecutor<'e>>(db: E) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEDULE_LOCK_KEY)
        .execute(db)
        .await?;
    Ok(())
}

/// Commissions an author is still on the hook for. Cancelled ones do not
/// need an assignee and open ones never have one.
pub async fn count_active_assignments<'e, E: PgExecutor<'e>>(db: E, author_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM commissions WHERE assigned_author_id = $1 AND status <> $2",
    )
    .bind(author_id)
    .bind(CommissionStatus::Cancelled.code())
    .fetch_one(db)
    .await
}

/// Clears the author from cancelled commissions so the account can go.
pub async fn release_cancelled_assignments<'e, E: PgExecutor<'e>>(db: E, author_id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE commissions SET assigned_author_id = NULL, updated_at = NOW() WHERE assigned_author_id = $1 AND status = $2",
    )
    .bind(author_id)
    .bind(CommissionStatus::Cancelled.code())
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

/// Delivery date of the most recently created commission that is not
/// cancelled, if it has one. Creates insert under [`lock_schedule`], so id
/// order is creation order; `created_at` is the transaction start and can
/// lag behind a create that waited on the lock.
pub async fn latest_scheduled_delivery<'e, E: PgExecutor<'e>>(
    db: E,
) -> Result<Option<NaiveDate>, sqlx::Error> {
    let date = sqlx::query_scalar::<_, Option<NaiveDate>>(
        r#"
        SELECT estimated_delivery_date FROM commissions
        WHERE status <> $1
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(CommissionStatus::Cancelled.code())
    .fetch_optional(db)
    .await?;
    Ok(date.flatten())
}

pub async fn insert<'e, E: PgExecutor<'e>>(
    db: E,
    commission: &NewCommission<'_>,
) -> Result<Commission, sqlx::Error> {
    sqlx::query_as::<_, CommissionRow>(
        r#"
        INSERT INTO commissions (title, description, budget, status, customer_id, estimated_delivery_date, progress_pct)
        VALUES ($1, $2, $3, $4, $5, $6, 0)
        RETURNING *
        "#,
    )
    .bind(commission.title)
    .bind(commission.description)
    .bind(commission.budget)
    .bind(CommissionStatus::Open.code())
    .bind(commission.customer_id)
    .bind(commission.estimated_delivery_date)
    .fetch_one(db)
    .await?
    .try_into()
}

/// Writes every mutable column of an already validated commission.
pub async fn save<'e, E: PgExecutor<'e>>(db: E, commission: &Commission) -> Result<Commission, sqlx::Error> {
    sqlx::query_as::<_, CommissionRow>(
        r#"
        UPDATE commissions SET
            title = $2,
            description = $3,
            budget = $4,
            status = $5,
            assigned_author_id = $6,
            estimated_delivery_date = $7,
            progress_pct = $8,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(commission.id)
    .bind(&commission.title)
    .bind(commission.description.as_deref())
    .bind(commission.budget)
    .bind(commission.status.code())
    .bind(commission.assigned_author_id)
    .bind(commission.estimated_delivery_date)
    .bind(commission.progress_pct)
    .fetch_one(db)
    .await?
    .try_into()
}

pub async fn delete<'e, E: PgExecutor<'e>>(db: E, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM commissions WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}
