//! Outbound notification sending.
//!
//! `EmailTransport` is the seam to the mail provider: the production
//! implementation speaks the SendGrid v3 mail/send API over HTTP, tests
//! substitute a fake. The transport is injected into `Notifier`, never a
//! process-wide singleton.
//!
//! `Notifier` owns the result-object contract: transport failures are
//! converted into `SendOutcome { success: false, .. }` and never propagate
//! past this boundary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::EmailConfig;
use crate::db::{DeadlineRecord, HearingRecord, MatterRecord, RelevantParty};
use crate::email::context::EmailContext;
use crate::email::templates::{self, EmailContent};
use crate::error::EmailError;

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// Timeout on the outbound send so a provider hang cannot stall a whole
/// scheduler run.
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// A fully-assembled outbound message, provider-agnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to: Vec<String>,
    pub from_address: String,
    pub from_name: String,
    pub reply_to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub headers: Vec<(String, String)>,
    pub custom_args: Vec<(String, String)>,
    pub track_clicks: bool,
    pub track_opens: bool,
}

/// The seam to the mail provider. Sends to whatever recipient list it is
/// given; audience filtering happens above.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), EmailError>;
}

/// SendGrid v3 `mail/send` transport.
pub struct SendGridTransport {
    client: reqwest::Client,
    api_key: SecretString,
    endpoint: String,
}

impl SendGridTransport {
    pub fn new(api_key: SecretString) -> Result<Self, EmailError> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(EmailError::Transport)?;
        Ok(Self {
            client,
            api_key,
            endpoint: SENDGRID_SEND_URL.to_string(),
        })
    }

    /// Build the transport from optional configuration. `None` API key means
    /// the provider is not configured; surfaced immediately, no retry.
    pub fn from_config(config: &EmailConfig) -> Result<Self, EmailError> {
        let api_key = config
            .sendgrid_api_key
            .clone()
            .ok_or(EmailError::NotConfigured)?;
        Self::new(api_key)
    }
}

#[async_trait]
impl EmailTransport for SendGridTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<(), EmailError> {
        let to: Vec<_> = message.to.iter().map(|e| json!({ "email": e })).collect();
        let custom_args: serde_json::Map<String, serde_json::Value> = message
            .custom_args
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        let headers: serde_json::Map<String, serde_json::Value> = message
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();

        let body = json!({
            "personalizations": [{
                "to": to,
                "custom_args": custom_args,
            }],
            "from": { "email": message.from_address, "name": message.from_name },
            "reply_to": { "email": message.reply_to },
            "subject": message.subject,
            "content": [
                { "type": "text/plain", "value": message.text },
                { "type": "text/html", "value": message.html },
            ],
            "headers": headers,
            "tracking_settings": {
                "click_tracking": { "enable": message.track_clicks },
                "open_tracking": { "enable": message.track_opens },
            },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(EmailError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Stand-in transport for installs without a provider API key. Every send
/// fails immediately with `NotConfigured`; the `Notifier` turns that into a
/// failed outcome, so sweeps still run and report.
pub struct UnconfiguredTransport;

#[async_trait]
impl EmailTransport for UnconfiguredTransport {
    async fn send(&self, _message: &OutboundMessage) -> Result<(), EmailError> {
        Err(EmailError::NotConfigured)
    }
}

/// Per-send result object. Callers branch on `success`, never on panics or
/// propagated errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    pub message_ids: Vec<String>,
    pub error: Option<String>,
}

impl SendOutcome {
    fn sent(message_ids: Vec<String>) -> Self {
        Self {
            success: true,
            message_ids,
            error: None,
        }
    }

    /// Empty audience: success with zero messages, no transport call.
    fn skipped() -> Self {
        Self {
            success: true,
            message_ids: Vec::new(),
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            message_ids: Vec::new(),
            error: Some(error),
        }
    }
}

/// High-level notification sender: renders content, attaches context
/// metadata, and drives the transport.
pub struct Notifier {
    transport: Arc<dyn EmailTransport>,
    config: EmailConfig,
}

impl Notifier {
    pub fn new(transport: Arc<dyn EmailTransport>, config: EmailConfig) -> Self {
        Self { transport, config }
    }

    pub async fn send_deadline_reminder(
        &self,
        matter: &MatterRecord,
        deadline: &DeadlineRecord,
        parties: &[RelevantParty],
    ) -> SendOutcome {
        self.send_deadline_reminder_at(matter, deadline, parties, Utc::now())
            .await
    }

    pub async fn send_deadline_reminder_at(
        &self,
        matter: &MatterRecord,
        deadline: &DeadlineRecord,
        parties: &[RelevantParty],
        now: DateTime<Utc>,
    ) -> SendOutcome {
        let recipients = recipient_emails(parties, |p| p.notify_deadlines);
        if recipients.is_empty() {
            debug!(deadline_id = deadline.id, "no opted-in recipients, skipping send");
            return SendOutcome::skipped();
        }
        let context = EmailContext::Deadline {
            matter_id: matter.id,
            deadline_id: deadline.id,
        };
        let content = templates::deadline_reminder(matter, deadline, &self.config.firm_name, now);
        self.dispatch(recipients, content, context, now).await
    }

    pub async fn send_hearing_notification(
        &self,
        matter: &MatterRecord,
        hearing: &HearingRecord,
        parties: &[RelevantParty],
    ) -> SendOutcome {
        self.send_hearing_notification_at(matter, hearing, parties, Utc::now())
            .await
    }

    pub async fn send_hearing_notification_at(
        &self,
        matter: &MatterRecord,
        hearing: &HearingRecord,
        parties: &[RelevantParty],
        now: DateTime<Utc>,
    ) -> SendOutcome {
        let recipients = recipient_emails(parties, |p| p.notify_hearings);
        if recipients.is_empty() {
            debug!(hearing_id = hearing.id, "no opted-in recipients, skipping send");
            return SendOutcome::skipped();
        }
        let context = EmailContext::Hearing {
            matter_id: matter.id,
            hearing_id: hearing.id,
        };
        let content = templates::hearing_notification(matter, hearing, &self.config.firm_name, now);
        self.dispatch(recipients, content, context, now).await
    }

    async fn dispatch(
        &self,
        to: Vec<String>,
        content: EmailContent,
        context: EmailContext,
        now: DateTime<Utc>,
    ) -> SendOutcome {
        let headers = context.headers(&self.config.domain, now);
        let message_id = headers
            .iter()
            .find(|(name, _)| name == "Message-ID")
            .map(|(_, value)| value.clone())
            .unwrap_or_default();

        let message = OutboundMessage {
            to,
            from_address: self.config.from_address.clone(),
            from_name: self.config.firm_name.clone(),
            reply_to: context.reply_address(&self.config.domain),
            subject: content.subject,
            text: content.text,
            html: content.html,
            headers,
            custom_args: context.custom_args(),
            track_clicks: true,
            track_opens: true,
        };

        match self.transport.send(&message).await {
            Ok(()) => SendOutcome::sent(vec![message_id]),
            Err(err) => {
                warn!(matter_id = context.matter_id(), "notification send failed: {err}");
                SendOutcome::failed(err.to_string())
            }
        }
    }
}

fn recipient_emails(
    parties: &[RelevantParty],
    opted_in: impl Fn(&RelevantParty) -> bool,
) -> Vec<String> {
    parties
        .iter()
        .filter(|p| !p.email.trim().is_empty() && opted_in(p))
        .map(|p| p.email.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::DeadlineStatus;
    use crate::testing::FakeTransport;

    fn email_config() -> EmailConfig {
        EmailConfig {
            sendgrid_api_key: None,
            domain: "firm.example.com".to_string(),
            from_address: "notifications@firm.example.com".to_string(),
            firm_name: "Eastwick Law".to_string(),
            app_base_url: "https://app.firm.example.com".to_string(),
        }
    }

    fn matter() -> MatterRecord {
        MatterRecord {
            id: 42,
            title: "Smith v. Jones".to_string(),
            number: "2026-CV-0042".to_string(),
            practice_area: None,
            client_id: 1,
            client_name: "Alice Smith".to_string(),
            client_email: None,
        }
    }

    fn deadline(due_at: DateTime<Utc>) -> DeadlineRecord {
        DeadlineRecord {
            id: 19,
            matter_id: 42,
            title: "Answer due".to_string(),
            source: None,
            due_at,
            status: DeadlineStatus::Open,
            trigger_event: None,
            created_at: due_at,
            updated_at: due_at,
        }
    }

    fn party(email: &str, deadlines: bool, hearings: bool) -> RelevantParty {
        RelevantParty {
            name: "P".to_string(),
            email: email.to_string(),
            notify_deadlines: deadlines,
            notify_hearings: hearings,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).single().expect("valid time")
    }

    #[tokio::test]
    async fn empty_party_list_short_circuits() {
        let transport = Arc::new(FakeTransport::default());
        let notifier = Notifier::new(transport.clone(), email_config());
        let outcome = notifier
            .send_deadline_reminder_at(&matter(), &deadline(now() + Duration::days(7)), &[], now())
            .await;
        assert_eq!(outcome, SendOutcome::skipped());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn all_opted_out_short_circuits() {
        let transport = Arc::new(FakeTransport::default());
        let notifier = Notifier::new(transport.clone(), email_config());
        let parties = vec![party("a@x.com", false, true), party("", true, true)];
        let outcome = notifier
            .send_deadline_reminder_at(
                &matter(),
                &deadline(now() + Duration::days(7)),
                &parties,
                now(),
            )
            .await;
        assert!(outcome.success);
        assert!(outcome.message_ids.is_empty());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn send_attaches_context_metadata() {
        let transport = Arc::new(FakeTransport::default());
        let notifier = Notifier::new(transport.clone(), email_config());
        let parties = vec![party("a@x.com", true, false)];
        let outcome = notifier
            .send_deadline_reminder_at(
                &matter(),
                &deadline(now() + Duration::days(7)),
                &parties,
                now(),
            )
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.message_ids.len(), 1);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        let msg = &sent[0];
        assert_eq!(msg.to, vec!["a@x.com".to_string()]);
        assert_eq!(
            msg.reply_to,
            "replies+matter-42-deadline-19@firm.example.com"
        );
        assert!(msg.track_clicks && msg.track_opens);
        assert!(msg.subject.contains("Answer due"));
        assert!(msg.subject.contains("Smith v. Jones"));
        assert!(
            msg.custom_args
                .contains(&("deadline_id".to_string(), "19".to_string()))
        );
        assert!(
            msg.headers
                .iter()
                .any(|(n, v)| n == "X-App-Matter-ID" && v == "42")
        );
    }

    #[tokio::test]
    async fn transport_failure_becomes_result_object() {
        let transport = Arc::new(FakeTransport::failing("connection reset"));
        let notifier = Notifier::new(transport, email_config());
        let parties = vec![party("a@x.com", true, false)];
        let outcome = notifier
            .send_deadline_reminder_at(
                &matter(),
                &deadline(now() + Duration::days(7)),
                &parties,
                now(),
            )
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().is_some_and(|e| e.contains("connection reset")));
        assert!(outcome.message_ids.is_empty());
    }
}
