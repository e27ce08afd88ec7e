//! Cookie sessions and password hashing.
//!
//! The session cookie carries an opaque token; the `sessions` table maps it
//! to a user. The user is looked up at most once per request and cached in
//! the request extensions.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::db;
use crate::error::AppError;
use crate::models::User;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "atelier_session";

/// The logged-in user, if any.
#[derive(Clone)]
pub struct MaybeUser(pub Option<User>);

/// Rejects anonymous requests with 401.
pub struct CurrentUser(pub User);

/// Rejects anonymous requests with 401 and non-authors with 403.
pub struct AuthorUser(pub User);

impl MaybeUser {
    pub fn id(&self) -> Option<i64> {
        self.0.as_ref().map(|u| u.id)
    }

    pub fn is_author(&self) -> bool {
        self.0.as_ref().map_or(false, |u| u.is_author)
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        if let Some(cached) = parts.extensions.get::<MaybeUser>() {
            return Ok(cached.clone());
        }

        let jar = CookieJar::from_headers(&parts.headers);
        let user = match jar.get(SESSION_COOKIE) {
            Some(cookie) => db::sessions::find_user(state.pool.as_ref(), cookie.value()).await?,
            None => None,
        };

        let resolved = MaybeUser(user);
        parts.extensions.insert(resolved.clone());
        Ok(resolved)
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        match MaybeUser::from_request_parts(parts, state).await? {
            MaybeUser(Some(user)) => Ok(CurrentUser(user)),
            MaybeUser(None) => Err(AppError::login_required()),
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthorUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if user.is_author {
            Ok(AuthorUser(user))
        } else {
            Err(AppError::author_required())
        }
    }
}

fn new_session_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Persists a new session for `user_id` and sets its cookie.
pub async fn start_session(state: &AppState, jar: CookieJar, user_id: i64) -> Result<CookieJar, AppError> {
    let token = new_session_token();
    let expires_at = Utc::now() + Duration::hours(state.config.session_ttl_hours);
    db::sessions::create(state.pool.as_ref(), &token, user_id, expires_at).await?;

    let cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.session_cookie_secure);
    Ok(jar.add(cookie))
}

pub async fn end_session(state: &AppState, jar: CookieJar) -> Result<CookieJar, AppError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        db::sessions::delete(state.pool.as_ref(), cookie.value()).await?;
    }
    Ok(jar.remove(Cookie::build(SESSION_COOKIE).path("/")))
}

pub async fn hash_password(password: String, cost: u32) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// `false` for a wrong password or an unreadable hash.
pub async fn verify_password(password: String, password_hash: String) -> bool {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &password_hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_tokens_are_long_and_unique() {
        let a = new_session_token();
        let b = new_session_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn password_round_trip() {
        let hash = hash_password("secret1".to_string(), 4).await.unwrap();
        assert!(verify_password("secret1".to_string(), hash.clone()).await);
        assert!(!verify_password("secret2".to_string(), hash).await);
    }

    #[tokio::test]
    async fn unreadable_hash_does_not_verify() {
        assert!(!verify_password("secret1".to_string(), "plain".to_string()).await);
    }
}
