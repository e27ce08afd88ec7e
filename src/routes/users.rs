use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::create_account;
use super::{Payload, Wrapped};
use crate::auth::CurrentUser;
use crate::db;
use crate::error::{assignment_conflict, email_conflict, AppError, AppResult, AUTHOR_HAS_COMMISSIONS};
use crate::models::user::{NewUser, UserChanges};
use crate::models::{User, ValidationErrors, BASE};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserQuery {
    pub is_author: Option<bool>,
    pub is_client: Option<bool>,
}

pub async fn index(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> AppResult<Json<Vec<User>>> {
    let users = db::users::list(state.pool.as_ref(), query.is_author, query.is_client).await?;
    Ok(Json(users))
}

pub async fn authors(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<User>>> {
    Ok(Json(db::users::list(state.pool.as_ref(), Some(true), None).await?))
}

pub async fn clients(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<User>>> {
    Ok(Json(db::users::list(state.pool.as_ref(), None, Some(true)).await?))
}

pub async fn show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<User>> {
    db::users::find(state.pool.as_ref(), id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("User"))
}

/// Creates an account without starting a session.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Payload(payload): Payload<Wrapped<NewUser>>,
) -> AppResult<(StatusCode, Json<User>)> {
    let new_user = payload.into_inner();
    let user = create_account(state.pool.as_ref(), state.config.bcrypt_cost, &new_user, true, false).await?;
    tracing::info!(user_id = user.id, "User created");
    Ok((StatusCode::CREATED, Json(user)))
}

fn ensure_self(current: &User, id: i64) -> AppResult<()> {
    if current.id == id {
        Ok(())
    } else {
        Err(AppError::Forbidden("You can only modify your own account".to_string()))
    }
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<i64>,
    Payload(payload): Payload<Wrapped<UserChanges>>,
) -> AppResult<Json<User>> {
    ensure_self(&current, id)?;
    let changes = payload.into_inner();
    changes.validate()?;

    let user = db::users::update(state.pool.as_ref(), id, &changes)
        .await
        .map_err(email_conflict)?
        .ok_or(AppError::NotFound("User"))?;
    Ok(Json(user))
}

/// An author still assigned to a commission that needs one cannot go.
fn check_deletable(assigned_commissions: i64) -> Result<(), ValidationErrors> {
    if assigned_commissions > 0 {
        Err(ValidationErrors::single(BASE, AUTHOR_HAS_COMMISSIONS))
    } else {
        Ok(())
    }
}

pub async fn destroy(
    State(state): State<Arc<AppState>>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    ensure_self(&current, id)?;

    let mut tx = state.pool.begin().await?;
    let assigned = db::commissions::count_active_assignments(&mut *tx, id).await?;
    if let Err(errors) = check_deletable(assigned) {
        tracing::info!(user_id = id, assigned, "User deletion refused");
        return Err(errors.into());
    }

    let released = db::commissions::release_cancelled_assignments(&mut *tx, id).await?;
    // The foreign key still catches an assignment made after the count.
    if !db::users::delete(&mut *tx, id).await.map_err(assignment_conflict)? {
        return Err(AppError::NotFound("User"));
    }
    tx.commit().await?;

    tracing::info!(user_id = id, released, "User deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommissionStatus;
    use crate::routes::test_support::{account, live_state, offline_router, open_commission};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn assigned_authors_cannot_be_deleted() {
        let err = check_deletable(2).unwrap_err();
        assert_eq!(err.messages_for(BASE), vec![AUTHOR_HAS_COMMISSIONS]);
        assert!(check_deletable(0).is_ok());
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn deleting_an_assigned_author_is_refused() {
        let Some(state) = live_state().await else { return };
        let pool = state.pool.as_ref();
        let author = account(&state, false, true).await;
        let customer = account(&state, true, false).await;
        let mut commission = open_commission(&state, customer.id).await;
        commission.status = CommissionStatus::Assigned;
        commission.assigned_author_id = Some(author.id);
        db::commissions::save(pool, &commission).await.unwrap();

        let err = destroy(State(state.clone()), CurrentUser(author.clone()), Path(author.id))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(db::users::find(pool, author.id).await.unwrap().is_some());

        // A cancelled commission no longer holds its author.
        commission.status = CommissionStatus::Cancelled;
        db::commissions::save(pool, &commission).await.unwrap();
        let status = destroy(State(state.clone()), CurrentUser(author.clone()), Path(author.id))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        let released = db::commissions::find(pool, commission.id).await.unwrap().unwrap();
        assert_eq!(released.assigned_author_id, None);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn foreign_key_blocks_deleting_an_assignee() {
        let Some(state) = live_state().await else { return };
        let pool = state.pool.as_ref();
        let author = account(&state, false, true).await;
        let customer = account(&state, true, false).await;
        let mut commission = open_commission(&state, customer.id).await;
        commission.status = CommissionStatus::InProgress;
        commission.assigned_author_id = Some(author.id);
        db::commissions::save(pool, &commission).await.unwrap();

        // Deleting without the count, as a racing assignment would.
        let err = db::users::delete(pool, author.id)
            .await
            .map_err(assignment_conflict)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn updating_a_user_requires_login() {
        let resp = offline_router()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/users/1")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"New name"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn deleting_a_user_requires_login() {
        let resp = offline_router()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/users/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
