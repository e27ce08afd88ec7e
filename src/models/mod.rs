pub mod article;
pub mod challenge;
pub mod commission;
pub mod user;
mod validation;

pub use article::{Access, Article, ArticleView, Visibility};
pub use challenge::{ArticleChallenge, ChallengeInput, NormalizeRule};
pub use commission::{Commission, CommissionStatus};
pub use user::{User, UserSummary};
pub use validation::{is_blank, ValidationErrorBody, ValidationErrors, BASE};
