//! Commission lifecycle: the status machine, the status/assignee invariant and
//! the delivery schedule. Everything here is pure; handlers gather the facts
//! from the database and ask these functions whether a write may proceed.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::validation::{is_blank, ValidationErrors};

/// Days between consecutive estimated deliveries.
pub const DELIVERY_INTERVAL_DAYS: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Open,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
}

impl CommissionStatus {
    pub const ALL: [CommissionStatus; 5] = [
        CommissionStatus::Open,
        CommissionStatus::Assigned,
        CommissionStatus::InProgress,
        CommissionStatus::Completed,
        CommissionStatus::Cancelled,
    ];

    /// Integer code stored in the `status` column.
    pub fn code(self) -> i32 {
        match self {
            CommissionStatus::Open => 0,
            CommissionStatus::Assigned => 1,
            CommissionStatus::InProgress => 2,
            CommissionStatus::Completed => 3,
            CommissionStatus::Cancelled => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommissionStatus::Open => "open",
            CommissionStatus::Assigned => "assigned",
            CommissionStatus::InProgress => "in_progress",
            CommissionStatus::Completed => "completed",
            CommissionStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses reachable in one step.
    pub fn allowed_next(self) -> &'static [CommissionStatus] {
        use CommissionStatus::*;
        match self {
            Open => &[Assigned, Cancelled],
            Assigned => &[InProgress, Cancelled],
            InProgress => &[Completed, Cancelled],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, to: CommissionStatus) -> bool {
        self.allowed_next().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    /// Whether a commission in this status must have an assigned author.
    /// `None` means the status does not constrain the assignee.
    pub fn assignee_rule(self) -> Option<bool> {
        match self {
            CommissionStatus::Open => Some(false),
            CommissionStatus::Assigned
            | CommissionStatus::InProgress
            | CommissionStatus::Completed => Some(true),
            CommissionStatus::Cancelled => None,
        }
    }

    pub fn requires_assignee(self) -> bool {
        self.assignee_rule() == Some(true)
    }

    /// Wording used in customer notifications.
    pub fn display_text(self) -> &'static str {
        match self {
            CommissionStatus::Open => "Open",
            CommissionStatus::Assigned => "Assigned to an author",
            CommissionStatus::InProgress => "In progress",
            CommissionStatus::Completed => "Completed",
            CommissionStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for CommissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not a valid status", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for CommissionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommissionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl TryFrom<i32> for CommissionStatus {
    type Error = UnknownStatus;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        CommissionStatus::ALL
            .into_iter()
            .find(|status| status.code() == value)
            .ok_or_else(|| UnknownStatus(value.to_string()))
    }
}

/// Rejects a status change that is not in the transition table. Only fires
/// when a previous status exists and actually differs from the new one, so
/// creation is never checked here.
pub fn check_transition(
    from: Option<CommissionStatus>,
    to: CommissionStatus,
) -> Result<(), ValidationErrors> {
    match from {
        Some(from) if from != to && !from.can_transition_to(to) => Err(ValidationErrors::single(
            "status",
            format!("transition from {} to {} is not allowed", from, to),
        )),
        _ => Ok(()),
    }
}

/// Checks assignee presence against the target status.
pub fn check_assignee(status: CommissionStatus, has_assignee: bool) -> Result<(), ValidationErrors> {
    match status.assignee_rule() {
        Some(false) if has_assignee => Err(ValidationErrors::single(
            "assigned_author",
            "must be blank when status is open",
        )),
        Some(true) if !has_assignee => Err(ValidationErrors::single(
            "assigned_author",
            format!("must be present when status is {}", status),
        )),
        _ => Ok(()),
    }
}

/// Everything the commission validations need to know about a pending write.
#[derive(Debug, Clone)]
pub struct CommissionCheck<'a> {
    pub title: &'a str,
    pub budget: Option<Decimal>,
    pub progress_pct: i32,
    pub estimated_delivery_date: Option<NaiveDate>,
    /// Only a newly set delivery date has to lie in the future.
    pub delivery_date_changed: bool,
    pub status: CommissionStatus,
    pub customer_is_client: bool,
    /// `Some(is_author)` when an author is assigned.
    pub assignee_is_author: Option<bool>,
}

/// Runs every commission rule and collects all failures. `previous` is the
/// persisted status for updates and `None` on create.
pub fn validate(
    check: &CommissionCheck<'_>,
    previous: Option<CommissionStatus>,
    today: NaiveDate,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if is_blank(check.title) {
        errors.add("title", "can't be blank");
    }
    if let Some(budget) = check.budget {
        if budget < Decimal::ZERO {
            errors.add("budget", "must be greater than or equal to 0");
        }
    }
    if !(0..=100).contains(&check.progress_pct) {
        errors.add("progress_pct", "must be between 0 and 100");
    }
    if check.delivery_date_changed {
        if let Some(date) = check.estimated_delivery_date {
            if date <= today {
                errors.add(
                    "estimated_delivery_date",
                    format!("must be greater than {}", today),
                );
            }
        }
    }
    if !check.customer_is_client {
        errors.add("customer", "must be a client");
    }
    if check.assignee_is_author == Some(false) {
        errors.add("assigned_author", "must be an author");
    }
    if let Err(e) = check_assignee(check.status, check.assignee_is_author.is_some()) {
        errors.merge(e);
    }
    if let Err(e) = check_transition(previous, check.status) {
        errors.merge(e);
    }

    errors.into_result()
}

/// Outcome of planning a status update issued by an author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPlan {
    /// Status the transition check starts from.
    pub transition_from: CommissionStatus,
    pub assigned_author_id: Option<i64>,
    /// The acting author was assigned as part of this update.
    pub claimed: bool,
}

/// When the target needs an assignee and there is none, the acting author
/// claims the commission. Claiming an open commission is the open→assigned
/// step, so the remaining transition is checked from `assigned`.
pub fn plan_status_update(
    current: CommissionStatus,
    assigned_author_id: Option<i64>,
    target: CommissionStatus,
    actor_id: i64,
) -> StatusPlan {
    if target.requires_assignee() && assigned_author_id.is_none() {
        let transition_from = if current == CommissionStatus::Open {
            CommissionStatus::Assigned
        } else {
            current
        };
        StatusPlan {
            transition_from,
            assigned_author_id: Some(actor_id),
            claimed: true,
        }
    } else {
        StatusPlan {
            transition_from: current,
            assigned_author_id,
            claimed: false,
        }
    }
}

/// Next delivery slot: one interval after the latest scheduled delivery, or
/// one interval from today when nothing is scheduled.
pub fn next_delivery_date(previous: Option<NaiveDate>, today: NaiveDate) -> NaiveDate {
    let base = previous.unwrap_or(today);
    base + Duration::days(DELIVERY_INTERVAL_DAYS)
}

#[derive(Debug, Clone, Serialize)]
pub struct Commission {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub budget: Option<Decimal>,
    pub status: CommissionStatus,
    pub customer_id: i64,
    pub assigned_author_id: Option<i64>,
    pub estimated_delivery_date: Option<NaiveDate>,
    pub progress_pct: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use CommissionStatus::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn check(status: CommissionStatus, assignee: Option<bool>) -> CommissionCheck<'static> {
        CommissionCheck {
            title: "Portrait of a cat",
            budget: Some(Decimal::new(12_050, 2)),
            progress_pct: 0,
            estimated_delivery_date: Some(day(2026, 11, 3)),
            delivery_date_changed: false,
            status,
            customer_is_client: true,
            assignee_is_author: assignee,
        }
    }

    #[test]
    fn transition_table() {
        assert_eq!(Open.allowed_next(), &[Assigned, Cancelled]);
        assert_eq!(Assigned.allowed_next(), &[InProgress, Cancelled]);
        assert_eq!(InProgress.allowed_next(), &[Completed, Cancelled]);
        assert!(Completed.is_terminal());
        assert!(Cancelled.is_terminal());
    }

    #[test]
    fn only_listed_transitions_are_accepted() {
        for from in CommissionStatus::ALL {
            for to in CommissionStatus::ALL {
                let result = check_transition(Some(from), to);
                let expected = from == to || from.allowed_next().contains(&to);
                assert_eq!(result.is_ok(), expected, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn completed_to_open_is_rejected_with_both_states_named() {
        let err = check_transition(Some(Completed), Open).unwrap_err();
        assert_eq!(
            err.messages_for("status"),
            vec!["transition from completed to open is not allowed"]
        );
    }

    #[test]
    fn creation_skips_the_transition_check() {
        assert!(check_transition(None, Completed).is_ok());
    }

    #[test]
    fn assignee_consistency_follows_target_status() {
        assert!(check_assignee(Open, false).is_ok());
        assert!(check_assignee(Open, true).is_err());
        for status in [Assigned, InProgress, Completed] {
            assert!(check_assignee(status, true).is_ok());
            let err = check_assignee(status, false).unwrap_err();
            assert_eq!(
                err.full_messages(),
                vec![format!("Assigned author must be present when status is {}", status)]
            );
        }
        assert!(check_assignee(Cancelled, true).is_ok());
        assert!(check_assignee(Cancelled, false).is_ok());
    }

    #[test]
    fn status_codes_and_names_round_trip() {
        assert_eq!(CommissionStatus::try_from(2), Ok(InProgress));
        assert!(CommissionStatus::try_from(9).is_err());
        assert_eq!("in_progress".parse::<CommissionStatus>(), Ok(InProgress));
        assert!("done".parse::<CommissionStatus>().is_err());
        assert_eq!(serde_json::to_value(InProgress).unwrap(), "in_progress");
    }

    #[test]
    fn validate_collects_every_failure() {
        let mut c = check(Assigned, Some(false));
        c.title = "  ";
        c.progress_pct = 101;
        c.budget = Some(Decimal::new(-1, 0));
        c.customer_is_client = false;

        let err = validate(&c, Some(Completed), day(2026, 10, 19)).unwrap_err();
        assert!(err.has("title"));
        assert!(err.has("progress_pct"));
        assert!(err.has("budget"));
        assert!(err.has("customer"));
        assert_eq!(err.messages_for("assigned_author"), vec!["must be an author"]);
        assert!(err.has("status"));
    }

    #[test]
    fn delivery_date_must_be_in_the_future_when_set() {
        let today = day(2026, 10, 19);
        let mut c = check(Open, None);
        c.estimated_delivery_date = Some(today);
        c.delivery_date_changed = true;
        assert!(validate(&c, None, today).is_err());

        c.estimated_delivery_date = Some(day(2026, 10, 20));
        assert!(validate(&c, None, today).is_ok());

        // A date that has since passed does not block unrelated updates.
        c.estimated_delivery_date = Some(day(2026, 1, 1));
        c.delivery_date_changed = false;
        assert!(validate(&c, Some(Open), today).is_ok());
    }

    #[test]
    fn zero_budget_is_allowed() {
        let mut c = check(Open, None);
        c.budget = Some(Decimal::ZERO);
        assert!(validate(&c, None, day(2026, 10, 19)).is_ok());
    }

    #[test]
    fn in_progress_on_unassigned_open_commission_claims_it() {
        let plan = plan_status_update(Open, None, InProgress, 7);
        assert_eq!(plan.assigned_author_id, Some(7));
        assert!(plan.claimed);
        assert!(check_transition(Some(plan.transition_from), InProgress).is_ok());
        assert!(check_assignee(InProgress, plan.assigned_author_id.is_some()).is_ok());
    }

    #[test]
    fn claiming_does_not_skip_the_table() {
        let plan = plan_status_update(Open, None, Completed, 7);
        assert!(check_transition(Some(plan.transition_from), Completed).is_err());

        let plan = plan_status_update(Cancelled, None, InProgress, 7);
        assert_eq!(plan.transition_from, Cancelled);
        assert!(check_transition(Some(plan.transition_from), InProgress).is_err());
    }

    #[test]
    fn existing_assignee_is_kept() {
        let plan = plan_status_update(Assigned, Some(3), InProgress, 7);
        assert_eq!(plan.assigned_author_id, Some(3));
        assert!(!plan.claimed);
        assert_eq!(plan.transition_from, Assigned);
    }

    #[test]
    fn delivery_schedule_chains_from_previous_commission() {
        let today = day(2026, 10, 19);
        let first = next_delivery_date(None, today);
        assert_eq!(first, day(2026, 11, 3));

        let second = next_delivery_date(Some(first), today);
        assert_eq!(second, day(2026, 11, 18));
    }
}
