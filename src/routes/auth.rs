use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use sqlx::{Acquire, Postgres};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::{Payload, Wrapped};
use crate::auth::{self, CurrentUser};
use crate::db;
use crate::db::users::NewUserRecord;
use crate::error::{email_conflict, AppError, AppResult};
use crate::models::user::NewUser;
use crate::models::{User, ValidationErrors};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub message: String,
    pub user: User,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub user: User,
}

/// Creates an account with the given client/author flags after running the
/// registration validations. Nothing touches the database until the input
/// is valid, and passing a transaction keeps the account inside it.
///
/// The future is boxed as `Send` so handlers calling this with a borrowed
/// connection stay `Send` (generic `Acquire` futures otherwise are not).
pub(crate) fn create_account<'a, 'c, A>(
    db: A,
    bcrypt_cost: u32,
    new_user: &'a NewUser,
    is_client: bool,
    is_author: bool,
) -> Pin<Box<dyn Future<Output = AppResult<User>> + Send + 'a>>
where
    A: Acquire<'c, Database = Postgres> + Send + 'a,
    A::Connection: Send,
{
    Box::pin(async move {
        new_user.validate()?;

        let mut conn = db.acquire().await?;
        if db::users::find_by_email(&mut *conn, &new_user.email)
            .await?
            .is_some()
        {
            return Err(ValidationErrors::single("email", "has already been taken").into());
        }

        let password_hash = auth::hash_password(new_user.password.clone(), bcrypt_cost).await?;
        db::users::insert(
            &mut *conn,
            &NewUserRecord {
                name: &new_user.name,
                email: &new_user.email,
                password_hash: &password_hash,
                is_author,
                is_client,
                bio: new_user.bio.as_deref(),
            },
        )
        .await
        .map_err(email_conflict)
    })
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Payload(payload): Payload<Wrapped<NewUser>>,
) -> AppResult<(StatusCode, CookieJar, Json<SessionResponse>)> {
    let new_user = payload.into_inner();
    let user = match create_account(state.pool.as_ref(), state.config.bcrypt_cost, &new_user, true, false).await {
        Ok(user) => user,
        Err(e) => {
            if let AppError::Validation(errors) = &e {
                tracing::info!("Registration rejected: {}", errors);
            }
            return Err(e);
        }
    };

    let jar = auth::start_session(&state, jar, user.id).await?;
    tracing::info!(user_id = user.id, "User registered");

    Ok((
        StatusCode::CREATED,
        jar,
        Json(SessionResponse {
            message: "Registration successful".to_string(),
            user,
        }),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Payload(payload): Payload<LoginRequest>,
) -> AppResult<(CookieJar, Json<SessionResponse>)> {
    let invalid = || AppError::Unauthorized("Invalid email or password".to_string());

    let user = db::users::find_by_email(state.pool.as_ref(), &payload.email)
        .await?
        .ok_or_else(invalid)?;
    if !auth::verify_password(payload.password, user.password_hash.clone()).await {
        return Err(invalid());
    }

    match db::sessions::purge_expired(state.pool.as_ref()).await {
        Ok(0) => {}
        Ok(n) => tracing::debug!("Purged {} expired sessions", n),
        Err(e) => tracing::warn!("Failed to purge expired sessions: {}", e),
    }

    let jar = auth::start_session(&state, jar, user.id).await?;
    tracing::info!(user_id = user.id, "User logged in");

    Ok((
        jar,
        Json(SessionResponse {
            message: "Login successful".to_string(),
            user,
        }),
    ))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<serde_json::Value>)> {
    let jar = auth::end_session(&state, jar).await?;
    tracing::info!(user_id = user.id, "User logged out");
    Ok((jar, Json(serde_json::json!({ "message": "Logged out" }))))
}

pub async fn me(CurrentUser(user): CurrentUser) -> Json<MeResponse> {
    Json(MeResponse { user })
}
