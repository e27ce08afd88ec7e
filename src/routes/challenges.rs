//! Challenge management for an article's owner, plus a public single-challenge
//! check.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::articles::{ensure_owner, AnswerRequest};
use super::{Payload, Wrapped};
use crate::auth::{CurrentUser, MaybeUser};
use crate::db;
use crate::db::challenges::ChallengeRecord;
use crate::error::{AppError, AppResult};
use crate::models::article::{access_for, NEEDS_CHALLENGE};
use crate::models::challenge::{hash_answer_blocking, verify_blocking};
use crate::models::{
    is_blank, Access, Article, ArticleChallenge, ChallengeInput, NormalizeRule, User,
    ValidationErrors, Visibility, BASE,
};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ChallengeChanges {
    pub prompt: Option<String>,
    pub answer: Option<String>,
    pub normalize_rule: Option<NormalizeRule>,
    /// An empty hint clears it.
    pub hint: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    pub correct: bool,
}

async fn owned_article(state: &AppState, id: i64, user: &User) -> AppResult<Article> {
    let article = db::articles::find(state.pool.as_ref(), id)
        .await?
        .ok_or(AppError::NotFound("Article"))?;
    ensure_owner(&article, user)?;
    Ok(article)
}

/// Rejects switching off the last enabled challenge of a restricted article.
/// `enabled_count` must be read under the article's row lock.
fn check_gate_kept(
    article: &Article,
    challenge: &ArticleChallenge,
    still_enabled: bool,
    enabled_count: i64,
) -> Result<(), ValidationErrors> {
    let switching_off = challenge.enabled && !still_enabled;
    if article.visibility == Visibility::Restricted && switching_off && enabled_count <= 1 {
        Err(ValidationErrors::single(BASE, NEEDS_CHALLENGE))
    } else {
        Ok(())
    }
}

/// Validates a change set against the stored challenge. A new rule only
/// makes sense together with a new answer, since the stored hash was taken
/// of the answer normalized under the old rule.
pub fn validate_changes(
    current: &ArticleChallenge,
    changes: &ChallengeChanges,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if let Some(prompt) = &changes.prompt {
        if is_blank(prompt) {
            errors.add("prompt", "can't be blank");
        }
    }
    match (&changes.answer, changes.normalize_rule) {
        (Some(answer), _) if is_blank(answer) => errors.add("answer", "can't be blank"),
        (None, Some(rule)) if rule != current.normalize_rule => {
            errors.add("answer", "must be provided when changing normalize_rule")
        }
        _ => {}
    }
    errors.into_result()
}

pub async fn index(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(article_id): Path<i64>,
) -> AppResult<Json<Vec<ArticleChallenge>>> {
    owned_article(&state, article_id, &user).await?;
    Ok(Json(
        db::challenges::for_article(state.pool.as_ref(), article_id).await?,
    ))
}

pub async fn show(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path((article_id, challenge_id)): Path<(i64, i64)>,
) -> AppResult<Json<ArticleChallenge>> {
    owned_article(&state, article_id, &user).await?;
    db::challenges::find(state.pool.as_ref(), article_id, challenge_id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("Challenge"))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(article_id): Path<i64>,
    Payload(payload): Payload<Wrapped<ChallengeInput>>,
) -> AppResult<(StatusCode, Json<ArticleChallenge>)> {
    owned_article(&state, article_id, &user).await?;
    let input = payload.into_inner();
    input.validate()?;

    let answer_hash =
        hash_answer_blocking(input.answer.clone(), input.normalize_rule, state.config.bcrypt_cost)
            .await?;
    let challenge = db::challenges::insert(
        state.pool.as_ref(),
        article_id,
        &ChallengeRecord {
            prompt: input.prompt.trim(),
            answer_hash: &answer_hash,
            normalize_rule: input.normalize_rule,
            hint: input.hint.as_deref().filter(|h| !is_blank(h)),
            enabled: input.enabled.unwrap_or(true),
        },
    )
    .await?;

    tracing::info!(article_id, challenge_id = challenge.id, "Challenge created");
    Ok((StatusCode::CREATED, Json(challenge)))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path((article_id, challenge_id)): Path<(i64, i64)>,
    Payload(payload): Payload<Wrapped<ChallengeChanges>>,
) -> AppResult<Json<ArticleChallenge>> {
    let changes = payload.into_inner();

    let mut tx = state.pool.begin().await?;
    let article = db::articles::find_for_update(&mut *tx, article_id)
        .await?
        .ok_or(AppError::NotFound("Article"))?;
    ensure_owner(&article, &user)?;
    let current = db::challenges::find(&mut *tx, article_id, challenge_id)
        .await?
        .ok_or(AppError::NotFound("Challenge"))?;

    let enabled = changes.enabled.unwrap_or(current.enabled);
    let mut errors = ValidationErrors::new();
    if let Err(e) = validate_changes(&current, &changes) {
        errors.merge(e);
    }
    let enabled_count = db::challenges::count_enabled(&mut *tx, article_id).await?;
    if let Err(e) = check_gate_kept(&article, &current, enabled, enabled_count) {
        errors.merge(e);
    }
    errors.into_result()?;

    let normalize_rule = changes.normalize_rule.unwrap_or(current.normalize_rule);
    let answer_hash = match changes.answer {
        Some(answer) => hash_answer_blocking(answer, normalize_rule, state.config.bcrypt_cost)
            .await?,
        None => current.answer_hash.clone(),
    };
    let prompt = changes.prompt.unwrap_or_else(|| current.prompt.clone());
    let hint = match changes.hint {
        Some(hint) if is_blank(&hint) => None,
        Some(hint) => Some(hint),
        None => current.hint.clone(),
    };

    let updated = db::challenges::update(
        &mut *tx,
        challenge_id,
        &ChallengeRecord {
            prompt: prompt.trim(),
            answer_hash: &answer_hash,
            normalize_rule,
            hint: hint.as_deref(),
            enabled,
        },
    )
    .await?;
    tx.commit().await?;

    tracing::info!(article_id, challenge_id, "Challenge updated");
    Ok(Json(updated))
}

pub async fn destroy(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path((article_id, challenge_id)): Path<(i64, i64)>,
) -> AppResult<StatusCode> {
    let mut tx = state.pool.begin().await?;
    let article = db::articles::find_for_update(&mut *tx, article_id)
        .await?
        .ok_or(AppError::NotFound("Article"))?;
    ensure_owner(&article, &user)?;
    let challenge = db::challenges::find(&mut *tx, article_id, challenge_id)
        .await?
        .ok_or(AppError::NotFound("Challenge"))?;

    let enabled_count = db::challenges::count_enabled(&mut *tx, article_id).await?;
    check_gate_kept(&article, &challenge, false, enabled_count)?;

    db::challenges::delete(&mut *tx, challenge_id).await?;
    tx.commit().await?;

    tracing::info!(article_id, challenge_id, "Challenge deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn verify(
    State(state): State<Arc<AppState>>,
    viewer: MaybeUser,
    Path((article_id, challenge_id)): Path<(i64, i64)>,
    Payload(payload): Payload<AnswerRequest>,
) -> AppResult<Json<VerifyResponse>> {
    let answer = match payload.answer {
        Some(answer) if !is_blank(&answer) => answer,
        _ => return Err(AppError::BadRequest("Answer cannot be blank".to_string())),
    };

    let article = db::articles::find(state.pool.as_ref(), article_id)
        .await?
        .ok_or(AppError::NotFound("Article"))?;
    if access_for(&article, viewer.id()) == Access::Hidden {
        return Err(AppError::NotFound("Article"));
    }
    let challenge = db::challenges::find(state.pool.as_ref(), article_id, challenge_id)
        .await?
        .ok_or(AppError::NotFound("Challenge"))?;

    let correct = verify_blocking(challenge, answer).await;
    tracing::debug!(article_id, challenge_id, correct, "Challenge answer checked");
    Ok(Json(VerifyResponse { correct }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::offline_router;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use tower::ServiceExt;

    fn article(visibility: Visibility) -> Article {
        Article {
            id: 3,
            title: "Glaze recipes".to_string(),
            body: "Body".to_string(),
            visibility,
            author_id: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn challenge(enabled: bool) -> ArticleChallenge {
        ArticleChallenge {
            id: 7,
            article_id: 3,
            prompt: "Kiln brand?".to_string(),
            answer_hash: "$2b$04$placeholder".to_string(),
            normalize_rule: NormalizeRule::Trim,
            hint: None,
            enabled,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn last_enabled_challenge_of_restricted_article_stays() {
        let restricted = article(Visibility::Restricted);
        let err = check_gate_kept(&restricted, &challenge(true), false, 1).unwrap_err();
        assert_eq!(err.full_messages(), vec![NEEDS_CHALLENGE]);

        assert!(check_gate_kept(&restricted, &challenge(true), false, 2).is_ok());
        assert!(check_gate_kept(&restricted, &challenge(false), false, 1).is_ok());
        assert!(check_gate_kept(&article(Visibility::Public), &challenge(true), false, 1).is_ok());
    }

    #[test]
    fn changing_rule_needs_a_new_answer() {
        let changes = ChallengeChanges {
            normalize_rule: Some(NormalizeRule::CiTrim),
            ..Default::default()
        };
        let err = validate_changes(&challenge(true), &changes).unwrap_err();
        assert!(err.has("answer"));

        let with_answer = ChallengeChanges {
            normalize_rule: Some(NormalizeRule::CiTrim),
            answer: Some("Skutt".to_string()),
            ..Default::default()
        };
        assert!(validate_changes(&challenge(true), &with_answer).is_ok());
    }

    #[test]
    fn same_rule_without_answer_is_fine() {
        let changes = ChallengeChanges {
            normalize_rule: Some(NormalizeRule::Trim),
            prompt: Some("Which kiln?".to_string()),
            ..Default::default()
        };
        assert!(validate_changes(&challenge(true), &changes).is_ok());
    }

    #[tokio::test]
    async fn blank_answer_is_rejected_before_lookup() {
        let resp = offline_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/articles/3/challenges/7/verify")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"answer":"   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "Answer cannot be blank");
    }

    #[tokio::test]
    async fn listing_challenges_requires_login() {
        let resp = offline_router()
            .oneshot(
                Request::builder()
                    .uri("/articles/3/challenges")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
