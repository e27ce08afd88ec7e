//! Customer notifications for commissions.
//!
//! Delivery is best effort: [`Mailer::dispatch`] spawns the send and only
//! logs failures, so no request ever waits on or fails because of mail.

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tera::Context;
use thiserror::Error;
use tracing::{error, info};

use crate::config::Config;
use crate::models::{Commission, User};
use crate::templates::{get_tera, COMMISSION_STATUS_UPDATED, COMMISSION_SUBMITTED};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Mail relay rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

#[derive(Clone)]
pub struct Mailer {
    client: Client,
    api_url: Option<String>,
    api_key: Option<String>,
    from: String,
}

impl Mailer {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            api_url: config.mail_api_url.clone(),
            api_key: config.mail_api_key.clone(),
            from: config.mail_from.clone(),
        })
    }

    /// Sends one message. Without a relay configured the message is logged
    /// instead.
    pub async fn deliver(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let Some(url) = self.api_url.as_deref() else {
            info!(to = %mail.to, subject = %mail.subject, "Mail relay not configured, skipping delivery");
            return Ok(());
        };

        let mut request = self.client.post(url).json(&RelayRequest {
            from: &self.from,
            to: &mail.to,
            subject: &mail.subject,
            text: &mail.body,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(to = %mail.to, subject = %mail.subject, "Mail delivered");
        Ok(())
    }

    /// Fire and forget.
    pub fn dispatch(&self, mail: OutgoingMail) {
        let mailer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = mailer.deliver(&mail).await {
                error!("Mail delivery to {} failed: {}", mail.to, e);
            }
        });
    }

    /// Renders and dispatches; a rendering failure is logged like a delivery
    /// failure.
    pub fn notify(&self, rendered: Result<OutgoingMail, MailError>) {
        match rendered {
            Ok(mail) => self.dispatch(mail),
            Err(e) => error!("Could not prepare mail: {}", e),
        }
    }
}

fn commission_context(commission: &Commission, customer: &User) -> Context {
    let mut ctx = Context::new();
    ctx.insert("customer_name", &customer.name);
    ctx.insert("title", &commission.title);
    ctx.insert("description", &commission.description);
    ctx.insert("budget", &commission.budget.map(|b| b.to_string()));
    ctx.insert(
        "estimated_delivery_date",
        &commission
            .estimated_delivery_date
            .map(|d| d.format("%Y-%m-%d").to_string()),
    );
    ctx.insert("progress_pct", &commission.progress_pct);
    ctx
}

pub fn commission_submitted(commission: &Commission, customer: &User) -> Result<OutgoingMail, MailError> {
    let ctx = commission_context(commission, customer);
    Ok(OutgoingMail {
        to: customer.email.clone(),
        subject: format!("Commission received - {}", commission.title),
        body: get_tera().render(COMMISSION_SUBMITTED, &ctx)?,
    })
}

pub fn commission_status_updated(
    commission: &Commission,
    customer: &User,
) -> Result<OutgoingMail, MailError> {
    let mut ctx = commission_context(commission, customer);
    ctx.insert("status_text", commission.status.display_text());
    Ok(OutgoingMail {
        to: customer.email.clone(),
        subject: format!("Commission status update - {}", commission.title),
        body: get_tera().render(COMMISSION_STATUS_UPDATED, &ctx)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommissionStatus;
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    fn customer() -> User {
        User {
            id: 4,
            name: "Lin".to_string(),
            email: "lin@example.com".to_string(),
            password_hash: String::new(),
            is_author: false,
            is_client: true,
            bio: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn commission(status: CommissionStatus) -> Commission {
        Commission {
            id: 9,
            title: "Harbour at dusk".to_string(),
            description: Some("Watercolour, A4".to_string()),
            budget: Some(Decimal::new(8000, 2)),
            status,
            customer_id: 4,
            assigned_author_id: None,
            estimated_delivery_date: NaiveDate::from_ymd_opt(2026, 11, 3),
            progress_pct: 40,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn submitted_mail_mentions_schedule() {
        let mail = commission_submitted(&commission(CommissionStatus::Open), &customer()).unwrap();
        assert_eq!(mail.to, "lin@example.com");
        assert_eq!(mail.subject, "Commission received - Harbour at dusk");
        assert!(mail.body.contains("Hello Lin"));
        assert!(mail.body.contains("Budget: 80.00"));
        assert!(mail.body.contains("Estimated delivery: 2026-11-03"));
    }

    #[test]
    fn status_mail_uses_readable_status() {
        let mail =
            commission_status_updated(&commission(CommissionStatus::InProgress), &customer()).unwrap();
        assert!(mail.body.contains("is now: In progress"));
        assert!(mail.body.contains("Progress: 40%"));
    }

    #[tokio::test]
    async fn delivery_without_relay_is_a_noop() {
        let mailer = Mailer::new(&Config::for_tests()).unwrap();
        let mail = commission_submitted(&commission(CommissionStatus::Open), &customer()).unwrap();
        assert!(mailer.deliver(&mail).await.is_ok());
    }
}
