use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::validation::{is_blank, ValidationErrors};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_BIO_LEN: usize = 1000;

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();

fn email_regex() -> &'static Regex {
    EMAIL_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$")
            .expect("email pattern is valid")
    })
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_author: bool,
    pub is_client: bool,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Embedded in article and commission payloads.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub bio: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            bio: user.bio.clone(),
        }
    }
}

/// Emails are compared and stored lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn emails_match(a: &str, b: &str) -> bool {
    normalize_email(a) == normalize_email(b)
}

fn validate_name(errors: &mut ValidationErrors, name: &str) {
    let len = name.trim().chars().count();
    if len == 0 {
        errors.add("name", "can't be blank");
    } else if len < 2 {
        errors.add("name", "is too short (minimum is 2 characters)");
    } else if len > 50 {
        errors.add("name", "is too long (maximum is 50 characters)");
    }
}

fn validate_email(errors: &mut ValidationErrors, email: &str) {
    if is_blank(email) {
        errors.add("email", "can't be blank");
    } else if !email_regex().is_match(email.trim()) {
        errors.add("email", "is invalid");
    }
}

fn validate_bio(errors: &mut ValidationErrors, bio: Option<&str>) {
    if bio.map_or(false, |b| b.chars().count() > MAX_BIO_LEN) {
        errors.add("bio", "is too long (maximum is 1000 characters)");
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: Option<String>,
    pub bio: Option<String>,
}

impl NewUser {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        validate_name(&mut errors, &self.name);
        validate_email(&mut errors, &self.email);
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            errors.add("password", "is too short (minimum is 6 characters)");
        }
        if let Some(confirmation) = &self.password_confirmation {
            if confirmation != &self.password {
                errors.add("password_confirmation", "doesn't match Password");
            }
        }
        validate_bio(&mut errors, self.bio.as_deref());
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub is_author: Option<bool>,
    pub is_client: Option<bool>,
}

impl UserChanges {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Some(name) = &self.name {
            validate_name(&mut errors, name);
        }
        if let Some(email) = &self.email {
            validate_email(&mut errors, email);
        }
        validate_bio(&mut errors, self.bio.as_deref());
        errors.into_result()
    }
}
