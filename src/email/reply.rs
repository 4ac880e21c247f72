//! Quoted-content stripping for inbound replies.
//!
//! Regex-based and best-effort: the goal is to isolate the new text a
//! correspondent typed above the quoted thread. False positives/negatives
//! are an accepted limitation. The heuristic sits behind `ReplyCleaner` so
//! it can be swapped for a proper reply-parsing library without touching
//! callers.

use std::sync::LazyLock;

use regex::Regex;

/// Extracts the new content from a raw reply body.
pub trait ReplyCleaner: Send + Sync {
    fn clean(&self, body: &str) -> String;
}

// Truncation points: everything from the first match onward is quoted
// thread, an Outlook-style reply header, a signature, or a sign-off.
static QUOTE_INTRO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^On .{0,200}wrote:\s*$").expect("valid pattern"));
static OUTLOOK_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^From:\s").expect("valid pattern"));
static SIGNATURE_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^-{2,}\s*$").expect("valid pattern"));
static SIGN_OFF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Best regards,").expect("valid pattern"));

// Line filters: quoted lines and stray reply-header fields.
static QUOTED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*>").expect("valid pattern"));
static HEADER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(Sent|To|Subject):\s").expect("valid pattern"));
static GREETING_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(Hi|Hello|Dear)\s.{0,100},\s*$").expect("valid pattern"));

/// The default regex-based cleaner.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexReplyCleaner;

impl ReplyCleaner for RegexReplyCleaner {
    fn clean(&self, body: &str) -> String {
        let mut cut = body.len();
        for pattern in [&QUOTE_INTRO, &OUTLOOK_HEADER, &SIGNATURE_SEPARATOR, &SIGN_OFF] {
            if let Some(m) = pattern.find(body) {
                cut = cut.min(m.start());
            }
        }
        let truncated = &body[..cut];

        let kept: Vec<&str> = truncated
            .lines()
            .filter(|line| {
                !QUOTED_LINE.is_match(line)
                    && !HEADER_LINE.is_match(line)
                    && !GREETING_LINE.is_match(line)
            })
            .collect();

        kept.join("\n").trim().to_string()
    }
}
