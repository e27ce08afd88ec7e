use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::{Payload, Wrapped};
use crate::auth::{CurrentUser, MaybeUser};
use crate::db;
use crate::db::articles::ArticleFilter;
use crate::db::challenges::ChallengeRecord;
use crate::error::{AppError, AppResult};
use crate::models::article::{self, access_for};
use crate::models::challenge::{hash_answer_blocking, unlocks_any};
use crate::models::{
    is_blank, Access, Article, ArticleView, ChallengeInput, User, UserSummary, ValidationErrors,
    Visibility,
};
use crate::state::AppState;

pub const DEFAULT_PER_PAGE: i64 = 10;
pub const MAX_PER_PAGE: i64 = 100;

#[derive(Deserialize)]
pub struct ArticleQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub visibility: Option<String>,
    pub author_id: Option<i64>,
}

#[derive(Serialize)]
pub struct ArticlePage {
    pub articles: Vec<ArticleView>,
    pub current_page: i64,
    pub total_pages: i64,
    pub total_count: i64,
    pub per_page: i64,
}

#[derive(Deserialize)]
pub struct ArticleInput {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub visibility: Option<Visibility>,
    /// Required when the article is created as restricted.
    pub challenge: Option<ChallengeInput>,
}

#[derive(Deserialize, Default)]
pub struct ArticleChanges {
    pub title: Option<String>,
    pub body: Option<String>,
    pub visibility: Option<Visibility>,
}

#[derive(Deserialize)]
pub struct AnswerRequest {
    pub answer: Option<String>,
}

#[derive(Serialize)]
pub struct ChallengePrompt {
    pub id: i64,
    pub prompt: String,
    pub hint: Option<String>,
}

/// Clamps paging parameters to `(page, per_page)`.
pub fn paging(page: Option<i64>, per_page: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    (page, per_page)
}

pub fn total_pages(total_count: i64, per_page: i64) -> i64 {
    (total_count + per_page - 1) / per_page
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn author_summaries(state: &AppState, articles: &[Article]) -> AppResult<HashMap<i64, UserSummary>> {
    let mut ids: Vec<i64> = articles.iter().map(|a| a.author_id).collect();
    ids.sort_unstable();
    ids.dedup();
    let users = db::users::find_many(state.pool.as_ref(), &ids).await?;
    Ok(users.iter().map(|u| (u.id, UserSummary::from(u))).collect())
}

/// Renders the articles the viewer may see, dropping hidden ones.
async fn render(state: &AppState, articles: Vec<Article>, viewer_id: Option<i64>) -> AppResult<Vec<ArticleView>> {
    let authors = author_summaries(state, &articles).await?;
    Ok(articles
        .into_iter()
        .filter_map(|article| {
            let access = access_for(&article, viewer_id);
            if access == Access::Hidden {
                return None;
            }
            let author = authors.get(&article.author_id).cloned();
            Some(ArticleView::new(article, author, access))
        })
        .collect())
}

async fn render_one(state: &AppState, article: Article, access: Access) -> AppResult<ArticleView> {
    let author = db::users::find(state.pool.as_ref(), article.author_id)
        .await?
        .as_ref()
        .map(UserSummary::from);
    Ok(ArticleView::new(article, author, access))
}

/// Loads an article the viewer is allowed to know exists.
async fn find_visible(state: &AppState, id: i64, viewer_id: Option<i64>) -> AppResult<(Article, Access)> {
    let article = db::articles::find(state.pool.as_ref(), id)
        .await?
        .ok_or(AppError::NotFound("Article"))?;
    match access_for(&article, viewer_id) {
        Access::Hidden => Err(AppError::NotFound("Article")),
        access => Ok((article, access)),
    }
}

/// Private articles of other users are reported as missing, everything else
/// as forbidden.
pub(crate) fn ensure_owner(article: &Article, user: &User) -> AppResult<()> {
    if article.author_id == user.id {
        Ok(())
    } else if article.visibility == Visibility::Private {
        Err(AppError::NotFound("Article"))
    } else {
        Err(AppError::not_owner())
    }
}

pub async fn index(
    State(state): State<Arc<AppState>>,
    viewer: MaybeUser,
    Query(query): Query<ArticleQuery>,
) -> AppResult<Json<ArticlePage>> {
    let (page, per_page) = paging(query.page, query.per_page);
    let visibility = non_empty(query.visibility)
        .map(|v| v.parse::<Visibility>())
        .transpose()
        .map_err(AppError::BadRequest)?;

    let filter = ArticleFilter {
        search: non_empty(query.search).map(|s| s.trim().to_string()),
        visibility,
        author_id: query.author_id,
        viewer_id: viewer.id(),
    };

    let total_count = db::articles::count(state.pool.as_ref(), &filter).await?;
    let articles =
        db::articles::page(state.pool.as_ref(), &filter, per_page, (page - 1) * per_page).await?;

    Ok(Json(ArticlePage {
        articles: render(&state, articles, viewer.id()).await?,
        current_page: page,
        total_pages: total_pages(total_count, per_page),
        total_count,
        per_page,
    }))
}

/// Public and restricted articles; restricted bodies stay hidden.
pub async fn public(State(state): State<Arc<AppState>>, viewer: MaybeUser) -> AppResult<Json<Vec<ArticleView>>> {
    let articles = db::articles::listed(state.pool.as_ref()).await?;
    Ok(Json(render(&state, articles, viewer.id()).await?))
}

pub async fn show(
    State(state): State<Arc<AppState>>,
    viewer: MaybeUser,
    Path(id): Path<i64>,
) -> AppResult<Json<ArticleView>> {
    let (article, access) = find_visible(&state, id, viewer.id()).await?;
    Ok(Json(render_one(&state, article, access).await?))
}

/// A challenge sent along with a new article counts toward the gate unless
/// it is explicitly disabled.
pub fn enabled_challenge_count(challenge: Option<&ChallengeInput>) -> usize {
    challenge.map_or(0, |c| usize::from(c.enabled.unwrap_or(true)))
}

/// Article and inline challenge rules for a create, reported together.
fn validate_input(input: &ArticleInput, visibility: Visibility) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let enabled_challenges = enabled_challenge_count(input.challenge.as_ref());
    if let Err(e) = article::validate(&input.title, &input.body, visibility, enabled_challenges) {
        errors.merge(e);
    }
    if let Some(challenge) = &input.challenge {
        if let Err(e) = challenge.validate() {
            errors.merge(e);
        }
    }
    errors.into_result()
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Payload(payload): Payload<Wrapped<ArticleInput>>,
) -> AppResult<(StatusCode, Json<ArticleView>)> {
    let input = payload.into_inner();
    let visibility = input.visibility.unwrap_or_default();
    validate_input(&input, visibility)?;

    let answer_hash = match &input.challenge {
        Some(c) => Some(
            hash_answer_blocking(c.answer.clone(), c.normalize_rule, state.config.bcrypt_cost)
                .await?,
        ),
        None => None,
    };

    let mut tx = state.pool.begin().await?;
    let article =
        db::articles::insert(&mut *tx, input.title.trim(), &input.body, visibility, user.id).await?;
    if let (Some(challenge), Some(answer_hash)) = (&input.challenge, &answer_hash) {
        db::challenges::insert(
            &mut *tx,
            article.id,
            &ChallengeRecord {
                prompt: challenge.prompt.trim(),
                answer_hash,
                normalize_rule: challenge.normalize_rule,
                hint: challenge.hint.as_deref(),
                enabled: challenge.enabled.unwrap_or(true),
            },
        )
        .await?;
    }
    // Publishing makes the user an author.
    db::users::mark_author(&mut *tx, user.id).await?;
    tx.commit().await?;

    if !user.is_author {
        tracing::info!(user_id = user.id, "User became an author");
    }
    tracing::info!(article_id = article.id, visibility = %article.visibility, "Article created");

    let author = UserSummary::from(&user);
    Ok((StatusCode::CREATED, Json(ArticleView::full(article, Some(author)))))
}

/// Applies changes under a row lock so the challenge count cannot change
/// between validation and write.
async fn apply_changes(state: &AppState, user: &User, id: i64, changes: ArticleChanges) -> AppResult<Article> {
    let mut tx = state.pool.begin().await?;
    let current = db::articles::find_for_update(&mut *tx, id)
        .await?
        .ok_or(AppError::NotFound("Article"))?;
    ensure_owner(&current, user)?;

    let title = changes.title.unwrap_or(current.title);
    let body = changes.body.unwrap_or(current.body);
    let visibility = changes.visibility.unwrap_or(current.visibility);
    let enabled_challenges = if visibility == Visibility::Restricted {
        db::challenges::count_enabled(&mut *tx, id).await? as usize
    } else {
        0
    };
    article::validate(&title, &body, visibility, enabled_challenges)?;

    let updated = db::articles::update(&mut *tx, id, title.trim(), &body, visibility).await?;
    tx.commit().await?;
    Ok(updated)
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Payload(payload): Payload<Wrapped<ArticleChanges>>,
) -> AppResult<Json<ArticleView>> {
    let article = apply_changes(&state, &user, id, payload.into_inner()).await?;
    Ok(Json(render_one(&state, article, Access::Full).await?))
}

pub async fn publish(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<ArticleView>> {
    let changes = ArticleChanges {
        visibility: Some(Visibility::Public),
        ..Default::default()
    };
    let article = apply_changes(&state, &user, id, changes).await?;
    tracing::info!(article_id = id, "Article published");
    Ok(Json(render_one(&state, article, Access::Full).await?))
}

pub async fn unpublish(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<ArticleView>> {
    let changes = ArticleChanges {
        visibility: Some(Visibility::Private),
        ..Default::default()
    };
    let article = apply_changes(&state, &user, id, changes).await?;
    tracing::info!(article_id = id, "Article unpublished");
    Ok(Json(render_one(&state, article, Access::Full).await?))
}

pub async fn destroy(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    let article = db::articles::find(state.pool.as_ref(), id)
        .await?
        .ok_or(AppError::NotFound("Article"))?;
    ensure_owner(&article, &user)?;
    db::articles::delete(state.pool.as_ref(), id).await?;
    tracing::info!(article_id = id, "Article deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Prompt of the article's designated challenge, the oldest enabled one.
pub async fn challenge(
    State(state): State<Arc<AppState>>,
    viewer: MaybeUser,
    Path(id): Path<i64>,
) -> AppResult<Json<ChallengePrompt>> {
    let (article, _) = find_visible(&state, id, viewer.id()).await?;
    if article.visibility != Visibility::Restricted {
        return Err(AppError::BadRequest(
            "Article does not require challenge verification".to_string(),
        ));
    }

    let designated = db::challenges::enabled_for_article(state.pool.as_ref(), id)
        .await?
        .into_iter()
        .next()
        .ok_or(AppError::NotFound("Challenge"))?;

    Ok(Json(ChallengePrompt {
        id: designated.id,
        prompt: designated.prompt,
        hint: designated.hint,
    }))
}

pub async fn verify_access(
    State(state): State<Arc<AppState>>,
    viewer: MaybeUser,
    Path(id): Path<i64>,
    Payload(payload): Payload<AnswerRequest>,
) -> AppResult<Response> {
    let (article, _) = find_visible(&state, id, viewer.id()).await?;
    if article.visibility != Visibility::Restricted {
        return Err(AppError::BadRequest(
            "Article does not require answer verification".to_string(),
        ));
    }
    let answer = match payload.answer {
        Some(answer) if !is_blank(&answer) => answer,
        _ => return Err(AppError::BadRequest("Answer is required".to_string())),
    };

    let challenges = db::challenges::enabled_for_article(state.pool.as_ref(), id).await?;
    if !unlocks_any(challenges, answer).await {
        tracing::info!(article_id = id, "Article access denied: incorrect answer");
        return Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "success": false, "error": "Incorrect answer" })),
        )
            .into_response());
    }

    let view = render_one(&state, article, Access::Full).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Answer verified successfully",
        "article": view,
    }))
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::article::NEEDS_CHALLENGE;
    use crate::models::BASE;
    use crate::routes::test_support::offline_router;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn paging_is_clamped() {
        assert_eq!(paging(None, None), (1, DEFAULT_PER_PAGE));
        assert_eq!(paging(Some(0), Some(0)), (1, 1));
        assert_eq!(paging(Some(3), Some(1000)), (3, MAX_PER_PAGE));
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
    }

    fn restricted_input(challenge: serde_json::Value) -> ArticleInput {
        serde_json::from_value(serde_json::json!({
            "title": "Kiln log",
            "body": "Cone 6",
            "visibility": "restricted",
            "challenge": challenge
        }))
        .unwrap()
    }

    #[test]
    fn restricted_create_without_challenge_is_invalid() {
        let input = restricted_input(serde_json::Value::Null);
        assert_eq!(enabled_challenge_count(input.challenge.as_ref()), 0);
        let err = validate_input(&input, Visibility::Restricted).unwrap_err();
        assert_eq!(err.messages_for(BASE), vec![NEEDS_CHALLENGE]);
    }

    #[test]
    fn disabled_inline_challenge_does_not_open_the_gate() {
        let input = restricted_input(serde_json::json!({
            "prompt": "Glaze colour?",
            "answer": "celadon",
            "enabled": false
        }));
        assert_eq!(enabled_challenge_count(input.challenge.as_ref()), 0);
        let err = validate_input(&input, Visibility::Restricted).unwrap_err();
        assert_eq!(err.messages_for(BASE), vec![NEEDS_CHALLENGE]);
        assert!(!err.has("prompt"));
    }

    #[test]
    fn inline_challenge_is_enabled_by_default() {
        let input = restricted_input(serde_json::json!({
            "prompt": "Glaze colour?",
            "answer": "celadon"
        }));
        assert_eq!(enabled_challenge_count(input.challenge.as_ref()), 1);
        assert!(validate_input(&input, Visibility::Restricted).is_ok());

        let public = restricted_input(serde_json::Value::Null);
        assert!(validate_input(&public, Visibility::Public).is_ok());
    }

    #[tokio::test]
    async fn creating_an_article_requires_login() {
        let body = serde_json::json!({ "title": "Kiln log", "body": "Cone 6" });
        let resp = offline_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/articles")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn publishing_requires_login() {
        let resp = offline_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/articles/1/publish")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
