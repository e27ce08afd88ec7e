//! Answer-gated access for restricted articles.
//!
//! Answers are normalized according to the challenge's rule, then hashed
//! with bcrypt. Plaintext answers are never stored or compared directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::validation::{is_blank, ValidationErrors};
use crate::error::AppError;

/// Leniency applied to an answer before hashing and before comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeRule {
    None,
    #[default]
    Trim,
    Ci,
    CiTrim,
}

impl NormalizeRule {
    pub const ALL: [NormalizeRule; 4] = [
        NormalizeRule::None,
        NormalizeRule::Trim,
        NormalizeRule::Ci,
        NormalizeRule::CiTrim,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NormalizeRule::None => "none",
            NormalizeRule::Trim => "trim",
            NormalizeRule::Ci => "ci",
            NormalizeRule::CiTrim => "ci_trim",
        }
    }

    pub fn apply(self, answer: &str) -> String {
        match self {
            NormalizeRule::None => answer.to_string(),
            NormalizeRule::Trim => answer.trim().to_string(),
            NormalizeRule::Ci => answer.to_lowercase(),
            NormalizeRule::CiTrim => answer.trim().to_lowercase(),
        }
    }
}

impl fmt::Display for NormalizeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NormalizeRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NormalizeRule::ALL
            .into_iter()
            .find(|rule| rule.as_str() == s)
            .ok_or_else(|| format!("unknown normalize rule {}", s))
    }
}

pub fn hash_answer(answer: &str, rule: NormalizeRule, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(rule.apply(answer), cost)
}

/// `false` on mismatch. A stored hash bcrypt cannot parse also counts as a
/// mismatch.
pub fn verify_answer(candidate: &str, rule: NormalizeRule, answer_hash: &str) -> bool {
    match bcrypt::verify(rule.apply(candidate), answer_hash) {
        Ok(matched) => matched,
        Err(e) => {
            tracing::warn!("Unreadable challenge answer hash: {}", e);
            false
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticleChallenge {
    pub id: i64,
    pub article_id: i64,
    pub prompt: String,
    #[serde(skip_serializing)]
    pub answer_hash: String,
    pub normalize_rule: NormalizeRule,
    pub hint: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArticleChallenge {
    pub fn verify(&self, candidate: &str) -> bool {
        verify_answer(candidate, self.normalize_rule, &self.answer_hash)
    }
}

/// The gate opens when any enabled challenge accepts the answer. bcrypt is
/// CPU bound, so the comparisons run on the blocking pool.
pub async fn unlocks_any(challenges: Vec<ArticleChallenge>, answer: String) -> bool {
    let result = tokio::task::spawn_blocking(move || {
        challenges
            .iter()
            .filter(|c| c.enabled)
            .any(|c| c.verify(&answer))
    })
    .await;

    match result {
        Ok(matched) => matched,
        Err(e) => {
            tracing::error!("Answer verification task failed: {}", e);
            false
        }
    }
}

/// Checks a single challenge regardless of its enabled flag.
pub async fn verify_blocking(challenge: ArticleChallenge, answer: String) -> bool {
    tokio::task::spawn_blocking(move || challenge.verify(&answer))
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Answer verification task failed: {}", e);
            false
        })
}

pub async fn hash_answer_blocking(
    answer: String,
    rule: NormalizeRule,
    cost: u32,
) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || hash_answer(&answer, rule, cost))
        .await
        .map_err(|e| AppError::Internal(format!("answer hashing task failed: {}", e)))?
        .map_err(|e| AppError::Internal(format!("answer hashing failed: {}", e)))
}

/// Incoming challenge definition, with the answer still in plaintext.
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeInput {
    pub prompt: String,
    pub answer: String,
    #[serde(default)]
    pub normalize_rule: NormalizeRule,
    pub hint: Option<String>,
    pub enabled: Option<bool>,
}

impl ChallengeInput {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if is_blank(&self.prompt) {
            errors.add("prompt", "can't be blank");
        }
        if is_blank(&self.answer) {
            errors.add("answer", "can't be blank");
        }
        errors.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COST: u32 = 4;

    fn challenge(answer: &str, rule: NormalizeRule, enabled: bool) -> ArticleChallenge {
        ArticleChallenge {
            id: 1,
            article_id: 1,
            prompt: "What is the cat's name?".to_string(),
            answer_hash: hash_answer(answer, rule, COST).unwrap(),
            normalize_rule: rule,
            hint: None,
            enabled,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn normalization_rules() {
        assert_eq!(NormalizeRule::None.apply("  Cat "), "  Cat ");
        assert_eq!(NormalizeRule::Trim.apply("  Cat "), "Cat");
        assert_eq!(NormalizeRule::Ci.apply("  Cat "), "  cat ");
        assert_eq!(NormalizeRule::CiTrim.apply("  Cat "), "cat");
    }

    #[test]
    fn ci_trim_matches_padded_mixed_case_answer() {
        let hash = bcrypt::hash("cat", COST).unwrap();
        assert!(verify_answer("  Cat ", NormalizeRule::CiTrim, &hash));
    }

    #[test]
    fn none_rule_is_exact() {
        let hash = bcrypt::hash("cat", COST).unwrap();
        assert!(!verify_answer("Cat", NormalizeRule::None, &hash));
        assert!(verify_answer("cat", NormalizeRule::None, &hash));
    }

    #[test]
    fn verification_is_deterministic() {
        let hash = bcrypt::hash("cat", COST).unwrap();
        let first = verify_answer(" CAT", NormalizeRule::CiTrim, &hash);
        for _ in 0..3 {
            assert_eq!(verify_answer(" CAT", NormalizeRule::CiTrim, &hash), first);
        }
    }

    #[test]
    fn stored_hash_is_of_the_normalized_answer() {
        let hash = hash_answer("  Tabby ", NormalizeRule::CiTrim, COST).unwrap();
        assert!(bcrypt::verify("tabby", &hash).unwrap());
        assert!(!hash.contains("tabby"));
    }

    #[test]
    fn malformed_hash_is_a_mismatch() {
        assert!(!verify_answer("cat", NormalizeRule::Trim, "not-a-bcrypt-hash"));
    }

    #[test]
    fn rule_names_parse_and_serialize() {
        assert_eq!("ci_trim".parse::<NormalizeRule>(), Ok(NormalizeRule::CiTrim));
        assert!("loose".parse::<NormalizeRule>().is_err());
        assert_eq!(serde_json::to_value(NormalizeRule::None).unwrap(), "none");
        assert!(serde_json::from_str::<NormalizeRule>("\"loose\"").is_err());
        assert_eq!(NormalizeRule::default(), NormalizeRule::Trim);
    }

    #[test]
    fn answer_hash_is_never_serialized() {
        let json = serde_json::to_value(challenge("cat", NormalizeRule::Trim, true)).unwrap();
        assert!(json.get("answer_hash").is_none());
        assert_eq!(json["normalize_rule"], "trim");
    }

    #[tokio::test]
    async fn any_enabled_challenge_unlocks() {
        let challenges = vec![
            challenge("dog", NormalizeRule::Trim, true),
            challenge("cat", NormalizeRule::CiTrim, true),
        ];
        assert!(unlocks_any(challenges.clone(), " CAT ".to_string()).await);
        assert!(!unlocks_any(challenges, "bird".to_string()).await);
    }

    #[tokio::test]
    async fn disabled_challenges_never_unlock() {
        let challenges = vec![challenge("cat", NormalizeRule::Trim, false)];
        assert!(!unlocks_any(challenges, "cat".to_string()).await);
    }

    #[tokio::test]
    async fn single_verification_ignores_enabled_flag() {
        let disabled = challenge("cat", NormalizeRule::Ci, false);
        assert!(verify_blocking(disabled.clone(), "CAT".to_string()).await);
        assert!(!verify_blocking(disabled, "dog".to_string()).await);
    }

    #[tokio::test]
    async fn hashing_reports_rejected_cost_as_internal_error() {
        let hash = hash_answer_blocking("cat".to_string(), NormalizeRule::Trim, COST).await.unwrap();
        assert!(verify_answer(" cat ", NormalizeRule::Trim, &hash));

        // bcrypt refuses costs below 4
        let err = hash_answer_blocking("cat".to_string(), NormalizeRule::Trim, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(ref msg) if msg.starts_with("answer hashing failed")));
    }

    #[test]
    fn challenge_input_requires_prompt_and_answer() {
        let input = ChallengeInput {
            prompt: " ".to_string(),
            answer: String::new(),
            normalize_rule: NormalizeRule::Trim,
            hint: None,
            enabled: None,
        };
        let err = input.validate().unwrap_err();
        assert!(err.has("prompt"));
        assert!(err.has("answer"));
    }
}
