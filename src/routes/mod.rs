pub mod articles;
pub mod auth;
pub mod challenges;
pub mod commissions;
pub mod users;

use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::{header, HeaderValue, Method},
    routing::{get, post, put},
    Json, Router,
};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Resource keys a client may nest a payload under.
const RESOURCE_KEYS: [&str; 4] = ["user", "article", "article_challenge", "commission"];

/// Accepts a payload either bare or nested under its resource name, e.g.
/// `{"title": ..}` and `{"article": {"title": ..}}`.
#[derive(Debug)]
pub enum Wrapped<T> {
    Nested(T),
    Flat(T),
}

impl<T> Wrapped<T> {
    pub fn into_inner(self) -> T {
        match self {
            Wrapped::Nested(inner) => inner,
            Wrapped::Flat(inner) => inner,
        }
    }
}

// Hand-written so a bad field reports its own error instead of a generic
// "no variant matched".
impl<'de, T: DeserializeOwned> Deserialize<'de> for Wrapped<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut value = Value::deserialize(deserializer)?;
        let nested = value.as_object_mut().and_then(|map| {
            let key = RESOURCE_KEYS
                .iter()
                .find(|key| map.get(**key).map_or(false, Value::is_object))?;
            map.remove(*key)
        });

        match nested {
            Some(inner) => T::deserialize(inner).map(Wrapped::Nested),
            None => T::deserialize(value).map(Wrapped::Flat),
        }
        .map_err(D::Error::custom)
    }
}

/// JSON request body. Unreadable bodies are answered in the API's error
/// shape rather than axum's plain-text rejection.
pub struct Payload<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Payload(value))
    }
}

fn cors(state: &AppState) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true);

    match state.config.frontend_origin.parse::<HeaderValue>() {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            tracing::warn!(
                "FRONTEND_ORIGIN {:?} is not a valid header value, cross-origin requests disabled",
                state.config.frontend_origin
            );
            layer
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Sessions
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", axum::routing::delete(auth::logout))
        .route("/me", get(auth::me))
        // Users
        .route("/users", get(users::index).post(users::create))
        .route("/users/authors", get(users::authors))
        .route("/users/clients", get(users::clients))
        .route(
            "/users/:id",
            get(users::show)
                .put(users::update)
                .patch(users::update)
                .delete(users::destroy),
        )
        // Articles
        .route("/articles", get(articles::index).post(articles::create))
        .route("/articles/public", get(articles::public))
        .route(
            "/articles/:id",
            get(articles::show)
                .put(articles::update)
                .patch(articles::update)
                .delete(articles::destroy),
        )
        .route("/articles/:id/publish", post(articles::publish).put(articles::publish))
        .route(
            "/articles/:id/unpublish",
            post(articles::unpublish).put(articles::unpublish),
        )
        .route("/articles/:id/challenge", get(articles::challenge))
        .route("/articles/:id/verify_access", post(articles::verify_access))
        .route(
            "/articles/:id/challenges",
            get(challenges::index).post(challenges::create),
        )
        .route(
            "/articles/:id/challenges/:challenge_id",
            get(challenges::show)
                .put(challenges::update)
                .patch(challenges::update)
                .delete(challenges::destroy),
        )
        .route(
            "/articles/:id/challenges/:challenge_id/verify",
            post(challenges::verify),
        )
        // Commissions
        .route("/commissions", get(commissions::index).post(commissions::create))
        .route("/commissions/available", get(commissions::available))
        .route(
            "/commissions/:id",
            get(commissions::show)
                .put(commissions::update)
                .patch(commissions::update)
                .delete(commissions::destroy),
        )
        .route("/commissions/:id/assign", put(commissions::assign))
        .route("/commissions/:id/status", put(commissions::update_status))
        .route("/commissions/:id/verify_email", post(commissions::verify_email))
        .route(
            "/commissions/:id/send_success_email",
            post(commissions::send_success_email),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors(&state))
        .with_state(state)
}


#[cfg(test)]
mod tests {
    use super::test_support::offline_router;
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_returns_version() {
        let resp = offline_router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(json.status, "ok");
        assert_eq!(json.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let resp = offline_router()
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn wrapped_payloads_accept_both_shapes() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Payload {
            title: String,
        }

        let flat: Wrapped<Payload> = serde_json::from_str(r#"{"title":"a"}"#).unwrap();
        let nested: Wrapped<Payload> = serde_json::from_str(r#"{"article":{"title":"a"}}"#).unwrap();
        assert_eq!(flat.into_inner().title, "a");
        assert_eq!(nested.into_inner().title, "a");
    }

    #[test]
    fn wrapped_errors_name_the_offending_field() {
        #[derive(Debug, Deserialize)]
        struct Payload {
            #[allow(dead_code)]
            title: String,
        }

        let err = serde_json::from_str::<Wrapped<Payload>>(r#"{"article":{"title":5}}"#).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("invalid type"), "{}", message);
        assert!(!message.contains("did not match any variant"));

        let err = serde_json::from_str::<Wrapped<Payload>>(r#"{"body":"x"}"#).unwrap_err();
        assert!(err.to_string().contains("missing field `title`"));
    }

    async fn post_json(uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let resp = offline_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn mistyped_body_is_a_json_validation_error() {
        let (status, json) = post_json("/register", r#"{"user":{"name":5}}"#).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["error"], "Validation failed");
        assert!(json["errors"].is_array());
        assert!(json["fields"]["base"].is_array());
    }

    #[tokio::test]
    async fn malformed_body_is_a_json_bad_request() {
        let (status, json) = post_json("/login", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
    }
}
