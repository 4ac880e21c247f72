//! Inbound email processing: reply routing and delivery-event ingestion.
//!
//! Detached from the HTTP layer so it can run against a fake store and
//! cleaner in tests. The webhook handlers in `server.rs` only parse the
//! provider payload and map `InboundError` to a status code.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::db::{
    CommunicationChannel, CommunicationDirection, CreateCommunicationParams,
    CreateNotificationParams, Database, NotificationPriority, RecordEmailEventParams,
    SchemaCapabilities,
};
use crate::email::context::{
    EmailContext, HEADER_DEADLINE_ID, HEADER_HEARING_ID, HEADER_MATTER_ID, parse_id_header,
};
use crate::email::reply::ReplyCleaner;
use crate::error::InboundError;

/// An inbound email as posted by the provider's parse webhook.
#[derive(Debug, Clone, Default)]
pub struct InboundEmail {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    /// Raw `headers` form field: a JSON object of header name to value.
    pub headers_json: Option<String>,
}

/// Outcome of a successfully-routed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReplyResult {
    pub communication_id: i64,
    pub matter_id: i64,
    pub context: EmailContext,
}

fn parse_headers(raw: Option<&str>) -> serde_json::Map<String, serde_json::Value> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return serde_json::Map::new();
    };
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) => {
            warn!("inbound headers field is not a JSON object, ignoring");
            serde_json::Map::new()
        }
        Err(err) => {
            warn!("unparseable inbound headers field, ignoring: {err}");
            serde_json::Map::new()
        }
    }
}

fn header_value<'a>(
    headers: &'a serde_json::Map<String, serde_json::Value>,
    name: &str,
) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, value)| value.as_str())
}

/// Recover context from the recipient address, falling back per field to the
/// custom headers.
fn recover_context(
    to: &str,
    headers: &serde_json::Map<String, serde_json::Value>,
) -> Option<EmailContext> {
    let from_address = EmailContext::parse_reply_address(to);

    let header_matter = parse_id_header(header_value(headers, HEADER_MATTER_ID));
    let header_deadline = parse_id_header(header_value(headers, HEADER_DEADLINE_ID));
    let header_hearing = parse_id_header(header_value(headers, HEADER_HEARING_ID));

    let matter_id = from_address.map(|ctx| ctx.matter_id()).or(header_matter);
    let deadline_id = from_address
        .and_then(|ctx| ctx.deadline_id())
        .or(header_deadline);
    let hearing_id = from_address
        .and_then(|ctx| ctx.hearing_id())
        .or(header_hearing);

    EmailContext::from_parts(matter_id, deadline_id, hearing_id)
}

fn snippet(body: &str, max: usize) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= max {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max).collect();
    format!("{}...", cut.trim_end())
}

/// Route one inbound reply into the domain store.
pub async fn process_inbound_reply(
    db: &dyn Database,
    caps: SchemaCapabilities,
    cleaner: &dyn ReplyCleaner,
    app_base_url: &str,
    payload: &InboundEmail,
) -> Result<InboundReplyResult, InboundError> {
    let headers = parse_headers(payload.headers_json.as_deref());
    let context =
        recover_context(&payload.to, &headers).ok_or(InboundError::InvalidReplyContext)?;

    let matter = db
        .get_matter(context.matter_id())
        .await?
        .ok_or(InboundError::MatterNotFound(context.matter_id()))?;

    let raw_body = if payload.text.trim().is_empty() {
        payload.html.as_str()
    } else {
        payload.text.as_str()
    };
    let body = cleaner.clean(raw_body);

    let metadata = json!({
        "subject": payload.subject,
        "message_id": header_value(&headers, "Message-ID"),
        "references": header_value(&headers, "References"),
        "deadline_id": context.deadline_id(),
        "hearing_id": context.hearing_id(),
        "reply_type": context.kind(),
    });
    let communication_id = db
        .create_communication(&CreateCommunicationParams {
            matter_id: matter.id,
            channel: CommunicationChannel::Email,
            direction: CommunicationDirection::Inbound,
            from_address: payload.from.clone(),
            to_address: payload.to.clone(),
            body: body.clone(),
            metadata,
        })
        .await?;

    if let Some(deadline_id) = context.deadline_id() {
        if caps.deadline_notes {
            let note = format!("Email Reply: {body}");
            if let Err(err) = db.add_deadline_note(deadline_id, &note).await {
                warn!(deadline_id, "deadline note insert failed, continuing: {err}");
            }
        }
        db.touch_deadline(deadline_id).await?;
    }

    if let Some(hearing_id) = context.hearing_id() {
        let note = format!("Email from {}: {}", payload.from, body);
        db.append_hearing_note(hearing_id, &note).await?;
    }

    if caps.notifications {
        let link = match context {
            EmailContext::Deadline { deadline_id, .. } => {
                format!("{app_base_url}/matters/{}/deadlines/{deadline_id}", matter.id)
            }
            EmailContext::Hearing { hearing_id, .. } => {
                format!("{app_base_url}/matters/{}/hearings/{hearing_id}", matter.id)
            }
            EmailContext::Matter { .. } => {
                format!("{app_base_url}/matters/{}/communications", matter.id)
            }
        };
        let notification = CreateNotificationParams {
            matter_id: matter.id,
            title: "Email reply received".to_string(),
            body: format!("{} replied on {}: {}", payload.from, matter.title, snippet(&body, 140)),
            priority: NotificationPriority::Medium,
            link: Some(link),
        };
        if let Err(err) = db.create_notification(&notification).await {
            warn!(matter_id = matter.id, "reply notification insert failed: {err}");
        }
    }

    info!(
        matter_id = matter.id,
        communication_id,
        reply_type = context.kind(),
        "inbound reply routed"
    );
    Ok(InboundReplyResult {
        communication_id,
        matter_id: matter.id,
        context,
    })
}

/// A provider delivery event (bounce/open/click/etc.).
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryEvent {
    pub event: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub sg_message_id: Option<String>,
    #[serde(default)]
    pub matter_id: Option<serde_json::Value>,
    #[serde(default)]
    pub deadline_id: Option<serde_json::Value>,
    #[serde(default)]
    pub hearing_id: Option<serde_json::Value>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Custom args come back as strings, older payloads as numbers.
fn coerce_id(value: Option<&serde_json::Value>) -> Option<i64> {
    match value? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Counts from one delivery-event webhook call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DeliveryEventStats {
    pub processed: usize,
    pub skipped: usize,
}

/// Ingest a batch of delivery events. Each event is best-effort: malformed
/// entries and failed inserts are counted and skipped, never fatal.
pub async fn process_delivery_events(
    db: &dyn Database,
    caps: SchemaCapabilities,
    events: &[serde_json::Value],
) -> DeliveryEventStats {
    let mut stats = DeliveryEventStats::default();
    for raw in events {
        let event: DeliveryEvent = match serde_json::from_value(raw.clone()) {
            Ok(event) => event,
            Err(err) => {
                warn!("skipping malformed delivery event: {err}");
                stats.skipped += 1;
                continue;
            }
        };
        let occurred_at: DateTime<Utc> = event
            .timestamp
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now);
        let matter_id = coerce_id(event.matter_id.as_ref());

        let mut recorded = true;
        if caps.email_events {
            let params = RecordEmailEventParams {
                event: event.event.clone(),
                email: event.email.clone(),
                occurred_at,
                provider_message_id: event.sg_message_id.clone(),
                matter_id,
                deadline_id: coerce_id(event.deadline_id.as_ref()),
                hearing_id: coerce_id(event.hearing_id.as_ref()),
                reason: event.reason.clone(),
                payload: raw.clone(),
            };
            // A failed insert still gets the bounce notification below.
            if let Err(err) = db.record_email_event(&params).await {
                warn!(event = %event.event, "email event insert failed, continuing: {err}");
                recorded = false;
            }
        }

        if matches!(event.event.as_str(), "bounce" | "dropped") {
            if let Some(matter_id) = matter_id {
                if caps.notifications {
                    let notification = CreateNotificationParams {
                        matter_id,
                        title: "Notification email delivery failed".to_string(),
                        body: format!(
                            "{} to {} ({})",
                            event.event,
                            event.email,
                            event.reason.as_deref().unwrap_or("no reason given"),
                        ),
                        priority: NotificationPriority::High,
                        link: None,
                    };
                    if let Err(err) = db.create_notification(&notification).await {
                        warn!(matter_id, "delivery-failure notification insert failed: {err}");
                    }
                }
            }
        }
        if recorded {
            stats.processed += 1;
        } else {
            stats.skipped += 1;
        }
    }
    stats
}
