use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::user::UserSummary;
use super::validation::{is_blank, ValidationErrors, BASE};

pub const NEEDS_CHALLENGE: &str = "restricted article must have at least one enabled challenge";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    #[serde(alias = "publicly_visible")]
    Public,
    Restricted,
    #[serde(alias = "privately_visible")]
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Restricted => "restricted",
            Visibility::Private => "private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" | "publicly_visible" => Ok(Visibility::Public),
            "restricted" => Ok(Visibility::Restricted),
            "private" | "privately_visible" => Ok(Visibility::Private),
            other => Err(format!("unknown visibility {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub visibility: Visibility,
    pub author_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a given viewer may see of an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Full,
    /// Metadata only; the body stays behind the challenge.
    Gated,
    Hidden,
}

pub fn access_for(article: &Article, viewer_id: Option<i64>) -> Access {
    if viewer_id == Some(article.author_id) {
        return Access::Full;
    }
    match article.visibility {
        Visibility::Public => Access::Full,
        Visibility::Restricted => Access::Gated,
        Visibility::Private => Access::Hidden,
    }
}

/// Title/body presence plus the restricted-needs-a-challenge rule.
pub fn validate(
    title: &str,
    body: &str,
    visibility: Visibility,
    enabled_challenges: usize,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if is_blank(title) {
        errors.add("title", "can't be blank");
    }
    if is_blank(body) {
        errors.add("body", "can't be blank");
    }
    if visibility == Visibility::Restricted && enabled_challenges == 0 {
        errors.add(BASE, NEEDS_CHALLENGE);
    }
    errors.into_result()
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticleView {
    pub id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub visibility: Visibility,
    pub author_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<UserSummary>,
    pub requires_challenge: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArticleView {
    /// Renders the article for `access`. Callers filter out hidden articles
    /// before getting here.
    pub fn new(article: Article, author: Option<UserSummary>, access: Access) -> Self {
        let gated = access != Access::Full;
        Self {
            id: article.id,
            title: article.title,
            body: if gated { None } else { Some(article.body) },
            visibility: article.visibility,
            author_id: article.author_id,
            author,
            requires_challenge: gated,
            created_at: article.created_at,
            updated_at: article.updated_at,
        }
    }

    pub fn full(article: Article, author: Option<UserSummary>) -> Self {
        Self::new(article, author, Access::Full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(visibility: Visibility) -> Article {
        Article {
            id: 10,
            title: "Notes on glazing".to_string(),
            body: "Secret body".to_string(),
            visibility,
            author_id: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn restricted_article_needs_an_enabled_challenge() {
        let err = validate("Title", "Body", Visibility::Restricted, 0).unwrap_err();
        assert_eq!(
            err.full_messages(),
            vec!["restricted article must have at least one enabled challenge"]
        );
        assert!(validate("Title", "Body", Visibility::Restricted, 1).is_ok());
        assert!(validate("Title", "Body", Visibility::Public, 0).is_ok());
    }

    #[test]
    fn title_and_body_are_required() {
        let err = validate("", " ", Visibility::Private, 0).unwrap_err();
        assert!(err.has("title"));
        assert!(err.has("body"));
    }

    #[test]
    fn access_by_visibility() {
        assert_eq!(access_for(&article(Visibility::Public), None), Access::Full);
        assert_eq!(access_for(&article(Visibility::Restricted), Some(2)), Access::Gated);
        assert_eq!(access_for(&article(Visibility::Private), None), Access::Hidden);
        assert_eq!(access_for(&article(Visibility::Private), Some(1)), Access::Full);
        assert_eq!(access_for(&article(Visibility::Restricted), Some(1)), Access::Full);
    }

    #[test]
    fn gated_view_withholds_body() {
        let view = ArticleView::new(article(Visibility::Restricted), None, Access::Gated);
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("body").is_none());
        assert_eq!(json["requires_challenge"], true);
        assert_eq!(json["visibility"], "restricted");
    }

    #[test]
    fn visibility_accepts_frontend_aliases() {
        let v: Visibility = serde_json::from_str("\"publicly_visible\"").unwrap();
        assert_eq!(v, Visibility::Public);
        assert_eq!("privately_visible".parse::<Visibility>(), Ok(Visibility::Private));
        assert!("secret".parse::<Visibility>().is_err());
    }
}
