use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::models::{ValidationErrorBody, ValidationErrors, BASE};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl AppError {
    pub fn login_required() -> Self {
        AppError::Unauthorized("Please log in first".to_string())
    }

    pub fn author_required() -> Self {
        AppError::Forbidden("Author permission required".to_string())
    }

    pub fn not_owner() -> Self {
        AppError::Forbidden("You do not own this resource".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            AppError::Validation(errors) => {
                let body = ValidationErrorBody {
                    error: "Validation failed".to_string(),
                    errors: errors.full_messages(),
                    fields: errors.by_field(),
                };
                (status, Json(body)).into_response()
            }
            AppError::Database(sqlx::Error::RowNotFound) => (
                status,
                Json(ErrorBody {
                    error: "Record not found".to_string(),
                }),
            )
                .into_response(),
            AppError::Database(_) | AppError::Internal(_) => {
                tracing::error!("Request failed: {}", self);
                (
                    status,
                    Json(ErrorBody {
                        error: "Internal server error, please try again later".to_string(),
                    }),
                )
                    .into_response()
            }
            other => (
                status,
                Json(ErrorBody {
                    error: other.to_string(),
                }),
            )
                .into_response(),
        }
    }
}

/// A body that parses but does not fit the payload type is a validation
/// failure. Anything else about the body is a bad request.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(e) => {
                AppError::Validation(ValidationErrors::single(BASE, e.body_text()))
            }
            other => AppError::BadRequest(other.body_text()),
        }
    }
}

/// Maps a unique violation on the email index to a field error.
pub fn email_conflict(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Validation(ValidationErrors::single("email", "has already been taken"))
        }
        _ => AppError::Database(err),
    }
}

pub const AUTHOR_HAS_COMMISSIONS: &str = "cannot delete an author with assigned commissions";

/// Maps a foreign key violation from a commission still pointing at the user.
pub fn assignment_conflict(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            AppError::Validation(ValidationErrors::single(BASE, AUTHOR_HAS_COMMISSIONS))
        }
        _ => AppError::Database(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_unprocessable_entity() {
        let err = AppError::from(ValidationErrors::single("title", "can't be blank"));
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn missing_row_maps_to_not_found() {
        let err = AppError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_errors_hide_detail() {
        let response = AppError::Internal("pool exhausted".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn non_database_errors_pass_through_conflict_mapping() {
        assert!(matches!(
            assignment_conflict(sqlx::Error::RowNotFound),
            AppError::Database(sqlx::Error::RowNotFound)
        ));
        assert!(matches!(
            email_conflict(sqlx::Error::PoolTimedOut),
            AppError::Database(sqlx::Error::PoolTimedOut)
        ));
    }

    #[test]
    fn auth_taxonomy() {
        assert_eq!(AppError::login_required().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::author_required().status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotFound("Article").to_string(), "Article not found");
    }
}
