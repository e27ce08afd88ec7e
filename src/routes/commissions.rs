use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgConnection, PgExecutor};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::auth::create_account;
use super::{Payload, Wrapped};
use crate::auth::{AuthorUser, MaybeUser};
use crate::db;
use crate::db::commissions::{CommissionFilter, NewCommission};
use crate::error::{AppError, AppResult};
use crate::mailer;
use crate::models::commission::{self, next_delivery_date, plan_status_update, CommissionCheck};
use crate::models::user::{emails_match, normalize_email, NewUser};
use crate::models::{is_blank, Commission, CommissionStatus, User, UserSummary, ValidationErrors};
use crate::state::AppState;

const ANONYMOUS_CUSTOMER: &str = "Anonymous";

/// Full record with the people involved, shown to authors.
#[derive(Debug, Serialize)]
pub struct CommissionDetail {
    #[serde(flatten)]
    pub commission: Commission,
    pub customer: Option<UserSummary>,
    pub assigned_author: Option<UserSummary>,
}

/// What anyone may see: no customer or assignee references.
#[derive(Debug, Serialize)]
pub struct PublicCommission {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub budget: Option<Decimal>,
    pub status: CommissionStatus,
    pub estimated_delivery_date: Option<NaiveDate>,
    pub progress_pct: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Commission> for PublicCommission {
    fn from(c: Commission) -> Self {
        Self {
            id: c.id,
            title: c.title,
            description: c.description,
            budget: c.budget,
            status: c.status,
            estimated_delivery_date: c.estimated_delivery_date,
            progress_pct: c.progress_pct,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CommissionView {
    Detail(CommissionDetail),
    Public(PublicCommission),
}

#[derive(Deserialize)]
pub struct CommissionQuery {
    pub status: Option<String>,
    pub customer_id: Option<i64>,
    pub assigned_author_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct CommissionInput {
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    pub budget: Option<Decimal>,
    pub estimated_delivery_date: Option<NaiveDate>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommissionChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub budget: Option<Decimal>,
    pub estimated_delivery_date: Option<NaiveDate>,
    /// Identifies the customer when the caller is not an author.
    pub customer_email: Option<String>,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub assigned_author_id: i64,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: String,
    pub progress_pct: Option<i32>,
}

#[derive(Deserialize, Default)]
pub struct EmailRequest {
    pub email: Option<String>,
}

#[derive(Serialize)]
pub struct VerifiedResponse {
    pub success: bool,
    pub commission: CommissionDetail,
}

/// Who a new commission is for, before anything is written.
enum CustomerRef {
    ByEmail(String),
    SignedIn(User),
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !is_blank(v))
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

async fn find_commission(state: &AppState, id: i64) -> AppResult<Commission> {
    db::commissions::find(state.pool.as_ref(), id)
        .await?
        .ok_or(AppError::NotFound("Commission"))
}

/// Row-locked read; the lock is held until the transaction ends.
async fn lock_commission(conn: &mut PgConnection, id: i64) -> AppResult<Commission> {
    db::commissions::find_for_update(conn, id)
        .await?
        .ok_or(AppError::NotFound("Commission"))
}

async fn load_customer<'e, E: PgExecutor<'e>>(db: E, commission: &Commission) -> AppResult<User> {
    db::users::find(db, commission.customer_id)
        .await?
        .ok_or(AppError::NotFound("Customer"))
}

/// Attaches customer and assignee summaries with a single user lookup.
async fn details(state: &AppState, commissions: Vec<Commission>) -> AppResult<Vec<CommissionDetail>> {
    let mut ids: Vec<i64> = commissions
        .iter()
        .flat_map(|c| std::iter::once(c.customer_id).chain(c.assigned_author_id))
        .collect();
    ids.sort_unstable();
    ids.dedup();

    let users: HashMap<i64, UserSummary> = db::users::find_many(state.pool.as_ref(), &ids)
        .await?
        .iter()
        .map(|u| (u.id, UserSummary::from(u)))
        .collect();

    Ok(commissions
        .into_iter()
        .map(|commission| CommissionDetail {
            customer: users.get(&commission.customer_id).cloned(),
            assigned_author: commission
                .assigned_author_id
                .and_then(|id| users.get(&id).cloned()),
            commission,
        })
        .collect())
}

async fn detail(state: &AppState, commission: Commission) -> AppResult<CommissionDetail> {
    details(state, vec![commission])
        .await?
        .pop()
        .ok_or_else(|| AppError::Internal("commission detail went missing".to_string()))
}

async fn render(state: &AppState, commissions: Vec<Commission>, viewer: &MaybeUser) -> AppResult<Vec<CommissionView>> {
    if viewer.is_author() {
        Ok(details(state, commissions)
            .await?
            .into_iter()
            .map(CommissionView::Detail)
            .collect())
    } else {
        Ok(commissions
            .into_iter()
            .map(|c| CommissionView::Public(c.into()))
            .collect())
    }
}

/// Only authors and the customer (identified by email) may touch a
/// commission, and only while nobody has picked it up.
fn ensure_editable(commission: &Commission, customer: &User, viewer: &MaybeUser, email: Option<&str>) -> AppResult<()> {
    let is_customer = email.map_or(false, |e| emails_match(e, &customer.email));
    if !viewer.is_author() && !is_customer {
        return Err(AppError::Forbidden(
            "You are not allowed to modify this commission".to_string(),
        ));
    }
    if commission.status != CommissionStatus::Open {
        return Err(AppError::Forbidden(
            "Only open commissions can be modified".to_string(),
        ));
    }
    Ok(())
}

/// The assignee was deleted between the lookup and the save.
fn missing_assignee(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            ValidationErrors::single("assigned_author", "must exist").into()
        }
        _ => AppError::Database(err),
    }
}

/// Resolves the customer by email, creating a client account with a random
/// password when none exists. The account shares the caller's transaction.
async fn find_or_create_customer(
    conn: &mut PgConnection,
    bcrypt_cost: u32,
    email: &str,
    name: Option<String>,
) -> AppResult<User> {
    if let Some(user) = db::users::find_by_email(&mut *conn, email).await? {
        return Ok(user);
    }

    let new_user = NewUser {
        name: non_blank(name).unwrap_or_else(|| ANONYMOUS_CUSTOMER.to_string()),
        email: normalize_email(email),
        password: Uuid::new_v4().simple().to_string(),
        password_confirmation: None,
        bio: None,
    };
    let user = create_account(conn, bcrypt_cost, &new_user, true, false).await?;
    tracing::info!(user_id = user.id, "Created client account for commission");
    Ok(user)
}

/// Next delivery slot after the latest scheduled one. A failed lookup is
/// rolled back to a savepoint so the surrounding transaction stays usable.
async fn scheduled_delivery(conn: &mut PgConnection, today: NaiveDate) -> Result<NaiveDate, sqlx::Error> {
    let mut savepoint = conn.begin().await?;
    match db::commissions::latest_scheduled_delivery(&mut *savepoint).await {
        Ok(previous) => {
            savepoint.commit().await?;
            Ok(next_delivery_date(previous, today))
        }
        Err(e) => {
            tracing::warn!("Could not look up the delivery schedule, starting from today: {}", e);
            savepoint.rollback().await?;
            Ok(next_delivery_date(None, today))
        }
    }
}

pub async fn index(
    State(state): State<Arc<AppState>>,
    viewer: MaybeUser,
    Query(query): Query<CommissionQuery>,
) -> AppResult<Json<Vec<CommissionView>>> {
    let status = non_blank(query.status)
        .map(|s| s.parse::<CommissionStatus>())
        .transpose()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let filter = CommissionFilter {
        status,
        customer_id: query.customer_id,
        assigned_author_id: query.assigned_author_id,
    };
    let commissions = db::commissions::list(state.pool.as_ref(), &filter).await?;
    Ok(Json(render(&state, commissions, &viewer).await?))
}

pub async fn available(
    State(state): State<Arc<AppState>>,
    viewer: MaybeUser,
) -> AppResult<Json<Vec<CommissionView>>> {
    let filter = CommissionFilter {
        status: Some(CommissionStatus::Open),
        ..Default::default()
    };
    let commissions = db::commissions::list(state.pool.as_ref(), &filter).await?;
    Ok(Json(render(&state, commissions, &viewer).await?))
}

pub async fn show(
    State(state): State<Arc<AppState>>,
    viewer: MaybeUser,
    Path(id): Path<i64>,
) -> AppResult<Json<CommissionView>> {
    let commission = find_commission(&state, id).await?;
    let view = if viewer.is_author() {
        CommissionView::Detail(detail(&state, commission).await?)
    } else {
        CommissionView::Public(commission.into())
    };
    Ok(Json(view))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    viewer: MaybeUser,
    Payload(payload): Payload<Wrapped<CommissionInput>>,
) -> AppResult<(StatusCode, Json<CommissionDetail>)> {
    let input = payload.into_inner();
    let customer = match (non_blank(input.customer_email.clone()), viewer.0) {
        (Some(email), _) => CustomerRef::ByEmail(email),
        (None, Some(user)) => CustomerRef::SignedIn(user),
        (None, None) => {
            return Err(ValidationErrors::single("customer", "must exist").into());
        }
    };

    let today = today();
    let mut tx = state.pool.begin().await?;
    db::commissions::lock_schedule(&mut *tx).await?;

    // A rejected commission rolls back any customer account made for it.
    let customer = match customer {
        CustomerRef::ByEmail(email) => {
            find_or_create_customer(&mut *tx, state.config.bcrypt_cost, &email, input.customer_name.clone())
                .await?
        }
        CustomerRef::SignedIn(user) => user,
    };

    let estimated_delivery_date = match input.estimated_delivery_date {
        Some(date) => date,
        None => scheduled_delivery(&mut *tx, today).await?,
    };

    commission::validate(
        &CommissionCheck {
            title: &input.title,
            budget: input.budget,
            progress_pct: 0,
            estimated_delivery_date: Some(estimated_delivery_date),
            delivery_date_changed: input.estimated_delivery_date.is_some(),
            status: CommissionStatus::Open,
            customer_is_client: customer.is_client,
            assignee_is_author: None,
        },
        None,
        today,
    )?;

    let created = db::commissions::insert(
        &mut *tx,
        &NewCommission {
            title: input.title.trim(),
            description: input.description.as_deref(),
            budget: input.budget,
            customer_id: customer.id,
            estimated_delivery_date,
        },
    )
    .await?;
    tx.commit().await?;

    tracing::info!(
        commission_id = created.id,
        customer_id = customer.id,
        delivery = %estimated_delivery_date,
        "Commission submitted"
    );
    state
        .mailer
        .notify(mailer::commission_submitted(&created, &customer));

    Ok((StatusCode::CREATED, Json(detail(&state, created).await?)))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    viewer: MaybeUser,
    Path(id): Path<i64>,
    Payload(payload): Payload<Wrapped<CommissionChanges>>,
) -> AppResult<Json<CommissionDetail>> {
    let changes = payload.into_inner();
    let mut tx = state.pool.begin().await?;
    let mut commission = lock_commission(&mut *tx, id).await?;
    let customer = load_customer(&mut *tx, &commission).await?;
    ensure_editable(&commission, &customer, &viewer, changes.customer_email.as_deref())?;

    let previous_status = commission.status;
    let delivery_date_changed = changes
        .estimated_delivery_date
        .map_or(false, |d| Some(d) != commission.estimated_delivery_date);

    if let Some(title) = changes.title {
        commission.title = title.trim().to_string();
    }
    if let Some(description) = changes.description {
        commission.description = Some(description);
    }
    if let Some(budget) = changes.budget {
        commission.budget = Some(budget);
    }
    if let Some(date) = changes.estimated_delivery_date {
        commission.estimated_delivery_date = Some(date);
    }

    commission::validate(
        &CommissionCheck {
            title: &commission.title,
            budget: commission.budget,
            progress_pct: commission.progress_pct,
            estimated_delivery_date: commission.estimated_delivery_date,
            delivery_date_changed,
            status: commission.status,
            customer_is_client: customer.is_client,
            assignee_is_author: None,
        },
        Some(previous_status),
        today(),
    )?;

    let saved = db::commissions::save(&mut *tx, &commission).await?;
    tx.commit().await?;
    tracing::info!(commission_id = id, "Commission updated");
    Ok(Json(detail(&state, saved).await?))
}

/// The customer's email may come in a JSON body or as `?email=`.
pub async fn destroy(
    State(state): State<Arc<AppState>>,
    viewer: MaybeUser,
    Path(id): Path<i64>,
    Query(query): Query<EmailRequest>,
    body: Option<Json<EmailRequest>>,
) -> AppResult<StatusCode> {
    let email = body
        .and_then(|Json(b)| non_blank(b.email))
        .or_else(|| non_blank(query.email));

    let mut tx = state.pool.begin().await?;
    let commission = lock_commission(&mut *tx, id).await?;
    let customer = load_customer(&mut *tx, &commission).await?;
    ensure_editable(&commission, &customer, &viewer, email.as_deref())?;

    db::commissions::delete(&mut *tx, id).await?;
    tx.commit().await?;
    tracing::info!(commission_id = id, "Commission deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn assign(
    State(state): State<Arc<AppState>>,
    AuthorUser(user): AuthorUser,
    Path(id): Path<i64>,
    Payload(payload): Payload<Wrapped<AssignRequest>>,
) -> AppResult<Json<CommissionDetail>> {
    let request = payload.into_inner();
    let mut tx = state.pool.begin().await?;
    let mut commission = lock_commission(&mut *tx, id).await?;
    let customer = load_customer(&mut *tx, &commission).await?;
    let assignee = db::users::find(&mut *tx, request.assigned_author_id)
        .await?
        .ok_or_else(|| ValidationErrors::single("assigned_author", "must exist"))?;

    let previous_status = commission.status;
    commission.status = CommissionStatus::Assigned;
    commission.assigned_author_id = Some(assignee.id);

    commission::validate(
        &CommissionCheck {
            title: &commission.title,
            budget: commission.budget,
            progress_pct: commission.progress_pct,
            estimated_delivery_date: commission.estimated_delivery_date,
            delivery_date_changed: false,
            status: commission.status,
            customer_is_client: customer.is_client,
            assignee_is_author: Some(assignee.is_author),
        },
        Some(previous_status),
        today(),
    )?;

    let saved = db::commissions::save(&mut *tx, &commission)
        .await
        .map_err(missing_assignee)?;
    tx.commit().await?;
    tracing::info!(
        commission_id = id,
        assigned_author_id = assignee.id,
        by = user.id,
        "Commission assigned"
    );
    if previous_status != saved.status {
        state
            .mailer
            .notify(mailer::commission_status_updated(&saved, &customer));
    }
    Ok(Json(detail(&state, saved).await?))
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    AuthorUser(user): AuthorUser,
    Path(id): Path<i64>,
    Payload(payload): Payload<Wrapped<StatusRequest>>,
) -> AppResult<Json<CommissionDetail>> {
    let request = payload.into_inner();
    let target: CommissionStatus = request
        .status
        .parse()
        .map_err(|_| ValidationErrors::single("status", "is not included in the list"))?;

    let mut tx = state.pool.begin().await?;
    let mut commission = lock_commission(&mut *tx, id).await?;
    let customer = load_customer(&mut *tx, &commission).await?;

    let plan = plan_status_update(commission.status, commission.assigned_author_id, target, user.id);
    let assignee_is_author = match plan.assigned_author_id {
        Some(author_id) if author_id == user.id => Some(user.is_author),
        Some(author_id) => Some(
            db::users::find(&mut *tx, author_id)
                .await?
                .map_or(false, |u| u.is_author),
        ),
        None => None,
    };

    let previous_status = commission.status;
    commission.status = target;
    commission.assigned_author_id = plan.assigned_author_id;
    if let Some(progress_pct) = request.progress_pct {
        commission.progress_pct = progress_pct;
    }

    commission::validate(
        &CommissionCheck {
            title: &commission.title,
            budget: commission.budget,
            progress_pct: commission.progress_pct,
            estimated_delivery_date: commission.estimated_delivery_date,
            delivery_date_changed: false,
            status: commission.status,
            customer_is_client: customer.is_client,
            assignee_is_author,
        },
        Some(plan.transition_from),
        today(),
    )?;

    let saved = db::commissions::save(&mut *tx, &commission)
        .await
        .map_err(missing_assignee)?;
    tx.commit().await?;
    if plan.claimed {
        tracing::info!(commission_id = id, author_id = user.id, "Commission claimed");
    }
    tracing::info!(
        commission_id = id,
        from = %previous_status,
        to = %saved.status,
        progress = saved.progress_pct,
        "Commission status updated"
    );
    state
        .mailer
        .notify(mailer::commission_status_updated(&saved, &customer));

    Ok(Json(detail(&state, saved).await?))
}

pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Payload(payload): Payload<EmailRequest>,
) -> AppResult<Json<VerifiedResponse>> {
    let email = non_blank(payload.email)
        .ok_or_else(|| AppError::BadRequest("Email is required".to_string()))?;

    let commission = find_commission(&state, id).await?;
    let customer = load_customer(state.pool.as_ref(), &commission).await?;
    if !emails_match(&email, &customer.email) {
        return Err(AppError::Unauthorized(
            "Email does not match this commission".to_string(),
        ));
    }

    Ok(Json(VerifiedResponse {
        success: true,
        commission: detail(&state, commission).await?,
    }))
}

pub async fn send_success_email(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    let commission = find_commission(&state, id).await?;
    let customer = load_customer(state.pool.as_ref(), &commission).await?;
    state
        .mailer
        .notify(mailer::commission_submitted(&commission, &customer));
    tracing::info!(commission_id = id, "Confirmation email re-sent");
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Confirmation email sent",
    })))
}
