//! Context codec: bidirectional mapping between application context
//! (matter, optional deadline or hearing) and email addressing metadata.
//!
//! This is the only place the wire format is touched. Everything else works
//! with the `EmailContext` enum. Pure functions, no I/O.
//!
//! Reply-To wire format (bit-exact, consumed by the inbound webhook):
//! `replies+matter-<digits>(-deadline-<digits>)?(-hearing-<digits>)?@<domain>`

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const HEADER_MATTER_ID: &str = "X-App-Matter-ID";
pub const HEADER_TYPE: &str = "X-App-Type";
pub const HEADER_DEADLINE_ID: &str = "X-App-Deadline-ID";
pub const HEADER_HEARING_ID: &str = "X-App-Hearing-ID";

// Unanchored: the inbound `to` field often carries the full header value
// with a display name, e.g. `"Firm Replies" <replies+matter-42@...>`.
static REPLY_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"replies\+matter-(\d+)(?:-deadline-(\d+))?(?:-hearing-(\d+))?@")
        .expect("reply address pattern is valid")
});

/// Application context carried in outbound email metadata and recovered from
/// inbound replies. A context is always anchored to a matter and optionally
/// narrowed to one deadline or one hearing, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmailContext {
    Matter { matter_id: i64 },
    Deadline { matter_id: i64, deadline_id: i64 },
    Hearing { matter_id: i64, hearing_id: i64 },
}

impl EmailContext {
    /// Build a context from loose parts, e.g. decoded header values.
    ///
    /// A deadline id wins over a hearing id when both are supplied; a
    /// hearing-suffixed address therefore never also carries a deadline
    /// suffix. Returns `None` without a matter id.
    pub fn from_parts(
        matter_id: Option<i64>,
        deadline_id: Option<i64>,
        hearing_id: Option<i64>,
    ) -> Option<Self> {
        let matter_id = matter_id?;
        if let Some(deadline_id) = deadline_id {
            return Some(Self::Deadline {
                matter_id,
                deadline_id,
            });
        }
        if let Some(hearing_id) = hearing_id {
            return Some(Self::Hearing {
                matter_id,
                hearing_id,
            });
        }
        Some(Self::Matter { matter_id })
    }

    pub fn matter_id(&self) -> i64 {
        match *self {
            Self::Matter { matter_id }
            | Self::Deadline { matter_id, .. }
            | Self::Hearing { matter_id, .. } => matter_id,
        }
    }

    pub fn deadline_id(&self) -> Option<i64> {
        match *self {
            Self::Deadline { deadline_id, .. } => Some(deadline_id),
            _ => None,
        }
    }

    pub fn hearing_id(&self) -> Option<i64> {
        match *self {
            Self::Hearing { hearing_id, .. } => Some(hearing_id),
            _ => None,
        }
    }

    /// Context kind, used for the `X-App-Type` header and the communication
    /// metadata `reply_type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Matter { .. } => "matter",
            Self::Deadline { .. } => "deadline",
            Self::Hearing { .. } => "hearing",
        }
    }

    /// The most specific resource tag: deadline over hearing over matter.
    fn resource_tag(&self) -> String {
        match *self {
            Self::Deadline { deadline_id, .. } => format!("deadline-{deadline_id}"),
            Self::Hearing { hearing_id, .. } => format!("hearing-{hearing_id}"),
            Self::Matter { matter_id } => format!("matter-{matter_id}"),
        }
    }

    /// Deterministic thread id for References/In-Reply-To.
    pub fn thread_id(&self, domain: &str) -> String {
        format!("<thread-{}@{domain}>", self.resource_tag())
    }

    /// Message-ID for an outbound send: `<resource>-<unix-millis>@<domain>`.
    pub fn message_id(&self, domain: &str, now: DateTime<Utc>) -> String {
        format!(
            "<{}-{}@{domain}>",
            self.resource_tag(),
            now.timestamp_millis()
        )
    }

    /// Encode the context into a Reply-To address.
    pub fn reply_address(&self, domain: &str) -> String {
        let suffix = match *self {
            Self::Matter { .. } => String::new(),
            Self::Deadline { deadline_id, .. } => format!("-deadline-{deadline_id}"),
            Self::Hearing { hearing_id, .. } => format!("-hearing-{hearing_id}"),
        };
        format!("replies+matter-{}{suffix}@{domain}", self.matter_id())
    }

    /// Decode a context from a Reply-To style address, including the
    /// display-name form (`"Name" <addr>`) providers put in the `to` field.
    /// `None` when the address does not match the fixed pattern; the caller
    /// falls back to header-derived context.
    pub fn parse_reply_address(address: &str) -> Option<Self> {
        let caps = REPLY_ADDRESS.captures(address.trim())?;
        let matter_id = caps.get(1)?.as_str().parse().ok()?;
        let deadline_id = caps.get(2).and_then(|m| m.as_str().parse().ok());
        let hearing_id = caps.get(3).and_then(|m| m.as_str().parse().ok());
        Self::from_parts(Some(matter_id), deadline_id, hearing_id)
    }

    /// Outbound headers carrying the context, plus threading headers.
    ///
    /// Deadline and hearing id headers are always present, empty when the
    /// context does not carry them. References/In-Reply-To are only emitted
    /// for deadline contexts, matching the app's established threading
    /// behavior.
    pub fn headers(&self, domain: &str, now: DateTime<Utc>) -> Vec<(String, String)> {
        let mut headers = vec![
            (HEADER_MATTER_ID.to_string(), self.matter_id().to_string()),
            (HEADER_TYPE.to_string(), self.kind().to_string()),
            (
                HEADER_DEADLINE_ID.to_string(),
                self.deadline_id().map(|id| id.to_string()).unwrap_or_default(),
            ),
            (
                HEADER_HEARING_ID.to_string(),
                self.hearing_id().map(|id| id.to_string()).unwrap_or_default(),
            ),
            ("Message-ID".to_string(), self.message_id(domain, now)),
        ];
        if self.deadline_id().is_some() {
            let thread = self.thread_id(domain);
            headers.push(("References".to_string(), thread.clone()));
            headers.push(("In-Reply-To".to_string(), thread));
        }
        headers
    }

    /// Custom provider args mirroring the context headers, for webhook
    /// correlation on delivery events.
    pub fn custom_args(&self) -> Vec<(String, String)> {
        let mut args = vec![
            ("matter_id".to_string(), self.matter_id().to_string()),
            ("type".to_string(), self.kind().to_string()),
        ];
        if let Some(id) = self.deadline_id() {
            args.push(("deadline_id".to_string(), id.to_string()));
        }
        if let Some(id) = self.hearing_id() {
            args.push(("hearing_id".to_string(), id.to_string()));
        }
        args
    }
}

/// Decode an id from a header value. Empty strings decode to `None`, never
/// to zero.
pub fn parse_id_header(value: Option<&str>) -> Option<i64> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    const DOMAIN: &str = "firm.example.com";

    #[test]
    fn matter_address_round_trips() {
        let ctx = EmailContext::Matter { matter_id: 42 };
        let addr = ctx.reply_address(DOMAIN);
        assert_eq!(addr, "replies+matter-42@firm.example.com");
        assert_eq!(EmailContext::parse_reply_address(&addr), Some(ctx));
    }

    #[test]
    fn deadline_address_round_trips() {
        let ctx = EmailContext::Deadline {
            matter_id: 7,
            deadline_id: 19,
        };
        let addr = ctx.reply_address(DOMAIN);
        assert_eq!(addr, "replies+matter-7-deadline-19@firm.example.com");
        assert_eq!(EmailContext::parse_reply_address(&addr), Some(ctx));
    }

    #[test]
    fn hearing_address_round_trips() {
        let ctx = EmailContext::Hearing {
            matter_id: 7,
            hearing_id: 3,
        };
        let addr = ctx.reply_address(DOMAIN);
        assert_eq!(addr, "replies+matter-7-hearing-3@firm.example.com");
        assert_eq!(EmailContext::parse_reply_address(&addr), Some(ctx));
    }

    #[test]
    fn display_name_recipient_decodes() {
        assert_eq!(
            EmailContext::parse_reply_address(
                r#""Eastwick Replies" <replies+matter-42@firm.example.com>"#
            ),
            Some(EmailContext::Matter { matter_id: 42 })
        );
        assert_eq!(
            EmailContext::parse_reply_address(
                "Eastwick Law <replies+matter-7-deadline-19@firm.example.com>"
            ),
            Some(EmailContext::Deadline {
                matter_id: 7,
                deadline_id: 19
            })
        );
    }

    #[test]
    fn deadline_wins_over_hearing() {
        let ctx = EmailContext::from_parts(Some(1), Some(2), Some(3)).expect("context");
        assert_eq!(
            ctx,
            EmailContext::Deadline {
                matter_id: 1,
                deadline_id: 2
            }
        );
        assert_eq!(ctx.reply_address(DOMAIN), "replies+matter-1-deadline-2@firm.example.com");
    }

    #[test]
    fn no_matter_id_means_no_context() {
        assert_eq!(EmailContext::from_parts(None, Some(2), Some(3)), None);
    }

    #[test]
    fn non_matching_address_is_none() {
        assert_eq!(EmailContext::parse_reply_address("alice@firm.example.com"), None);
        assert_eq!(EmailContext::parse_reply_address("replies+matter-x@firm.example.com"), None);
        assert_eq!(EmailContext::parse_reply_address(""), None);
    }

    #[test]
    fn headers_include_empty_strings_for_absent_ids() {
        let ctx = EmailContext::Matter { matter_id: 9 };
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).single().expect("valid time");
        let headers = ctx.headers(DOMAIN, now);
        let get = |name: &str| {
            headers
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get(HEADER_MATTER_ID), Some("9"));
        assert_eq!(get(HEADER_TYPE), Some("matter"));
        assert_eq!(get(HEADER_DEADLINE_ID), Some(""));
        assert_eq!(get(HEADER_HEARING_ID), Some(""));
        assert!(get("Message-ID").expect("message id").starts_with("<matter-9-"));
        assert_eq!(get("References"), None);
        assert_eq!(get("In-Reply-To"), None);
    }

    #[test]
    fn deadline_headers_carry_thread_id() {
        let ctx = EmailContext::Deadline {
            matter_id: 9,
            deadline_id: 4,
        };
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).single().expect("valid time");
        let headers = ctx.headers(DOMAIN, now);
        let thread: Vec<_> = headers
            .iter()
            .filter(|(n, _)| n == "References" || n == "In-Reply-To")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(thread, vec![
            "<thread-deadline-4@firm.example.com>",
            "<thread-deadline-4@firm.example.com>"
        ]);
    }

    #[test]
    fn empty_header_value_decodes_to_none() {
        assert_eq!(parse_id_header(Some("")), None);
        assert_eq!(parse_id_header(Some("  ")), None);
        assert_eq!(parse_id_header(Some("42")), Some(42));
        assert_eq!(parse_id_header(None), None);
    }

    #[test]
    fn message_id_embeds_millis_and_domain() {
        let ctx = EmailContext::Hearing {
            matter_id: 1,
            hearing_id: 8,
        };
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).single().expect("valid time");
        assert_eq!(
            ctx.message_id(DOMAIN, now),
            "<hearing-8-1700000000123@firm.example.com>"
        );
    }
}
