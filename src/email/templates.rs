//! Subject/text/HTML rendering for notification emails. Pure functions over
//! domain records.
//!
//! All interpolated matter/client/party strings are HTML-escaped before
//! entering markup; domain data is staff-entered and must not be able to
//! inject markup into recipients' mail clients.

use chrono::{DateTime, Utc};

use crate::db::{DeadlineRecord, HearingRecord, MatterRecord};

/// Urgency thresholds in days-until-due. Design constants, not configurable.
const URGENT_DAYS: i64 = 1;
const WARNING_DAYS: i64 = 3;

const URGENT_COLOR: &str = "#dc2626";
const WARNING_COLOR: &str = "#d97706";
const NORMAL_COLOR: &str = "#2563eb";

/// Rendered email parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContent {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Days until `target`, rounded up. A deadline due later today is 1 day out
/// by this measure only once it is past `now` by any amount under a day.
pub fn days_until(target: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (target - now).num_milliseconds();
    (millis as f64 / 86_400_000.0).ceil() as i64
}

fn day_noun(days: i64) -> &'static str {
    if days == 1 { "day" } else { "days" }
}

fn urgency_color(days: i64) -> &'static str {
    if days <= URGENT_DAYS {
        URGENT_COLOR
    } else if days <= WARNING_DAYS {
        WARNING_COLOR
    } else {
        NORMAL_COLOR
    }
}

/// Minimal HTML escaping for interpolated strings.
pub fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn html_detail_row(label: &str, value: &str) -> String {
    format!(
        "<tr><td style=\"padding:4px 12px 4px 0;color:#6b7280;\">{}</td>\
         <td style=\"padding:4px 0;color:#111827;\">{}</td></tr>",
        html_escape(label),
        html_escape(value)
    )
}

fn html_shell(heading: &str, banner: &str, detail_rows: &str, footer: &str) -> String {
    format!(
        "<div style=\"font-family:Arial,Helvetica,sans-serif;max-width:600px;margin:0 auto;\">\
         <h2 style=\"color:#111827;\">{heading}</h2>\
         {banner}\
         <table style=\"border-collapse:collapse;margin:16px 0;\">{detail_rows}</table>\
         <p style=\"color:#6b7280;font-size:12px;\">{footer}</p>\
         </div>"
    )
}

/// Render a deadline reminder email.
pub fn deadline_reminder(
    matter: &MatterRecord,
    deadline: &DeadlineRecord,
    firm_name: &str,
    now: DateTime<Utc>,
) -> EmailContent {
    let days = days_until(deadline.due_at, now);
    let due_date = deadline.due_at.format("%A, %B %-d, %Y").to_string();
    let subject = format!("Deadline Reminder: {} - {}", deadline.title, matter.title);

    let mut text = format!(
        "Deadline Reminder\n\n\
         {} is due in {} {} on {}.\n\n\
         Matter: {} ({})\n\
         Client: {}\n",
        deadline.title,
        days,
        day_noun(days),
        due_date,
        matter.title,
        matter.number,
        matter.client_name,
    );
    if let Some(source) = deadline.source.as_deref().filter(|s| !s.is_empty()) {
        text.push_str(&format!("Source: {source}\n"));
    }
    text.push_str(&format!(
        "\nReply to this email to add a note to the deadline.\n\n{firm_name}\n"
    ));

    let banner = format!(
        "<p style=\"font-size:16px;\">\
         <strong>{}</strong> is due in \
         <span style=\"color:{};font-weight:bold;\">{} {}</span> on {}.</p>",
        html_escape(&deadline.title),
        urgency_color(days),
        days,
        day_noun(days),
        html_escape(&due_date),
    );
    let mut rows = String::new();
    rows.push_str(&html_detail_row(
        "Matter",
        &format!("{} ({})", matter.title, matter.number),
    ));
    rows.push_str(&html_detail_row("Client", &matter.client_name));
    if let Some(source) = deadline.source.as_deref().filter(|s| !s.is_empty()) {
        rows.push_str(&html_detail_row("Source", source));
    }
    let footer = format!(
        "Reply to this email to add a note to the deadline. Sent by {}.",
        html_escape(firm_name)
    );
    let html = html_shell("Deadline Reminder", &banner, &rows, &footer);

    EmailContent {
        subject,
        text,
        html,
    }
}

/// Render a hearing notification email. Optional courtroom/judge/court
/// fields are omitted entirely when absent.
pub fn hearing_notification(
    matter: &MatterRecord,
    hearing: &HearingRecord,
    firm_name: &str,
    now: DateTime<Utc>,
) -> EmailContent {
    let days = days_until(hearing.starts_at, now);
    let when = hearing
        .starts_at
        .format("%A, %B %-d, %Y at %-I:%M %p")
        .to_string();
    let subject = format!("Hearing Notice: {} - {}", hearing.hearing_type, matter.title);

    let mut text = format!(
        "Hearing Notice\n\n\
         {} scheduled in {} {} on {}.\n\n\
         Matter: {} ({})\n\
         Client: {}\n",
        hearing.hearing_type,
        days,
        day_noun(days),
        when,
        matter.title,
        matter.number,
        matter.client_name,
    );
    if let Some(court) = hearing.court_name.as_deref().filter(|s| !s.is_empty()) {
        text.push_str(&format!("Court: {court}\n"));
    }
    if let Some(courtroom) = hearing.courtroom.as_deref().filter(|s| !s.is_empty()) {
        text.push_str(&format!("Courtroom: {courtroom}\n"));
    }
    if let Some(judge) = hearing.judge_name.as_deref().filter(|s| !s.is_empty()) {
        text.push_str(&format!("Judge: {judge}\n"));
    }
    text.push_str(&format!(
        "\nReply to this email to add a note to the hearing.\n\n{firm_name}\n"
    ));

    let banner = format!(
        "<p style=\"font-size:16px;\">\
         <strong>{}</strong> scheduled in \
         <span style=\"color:{};font-weight:bold;\">{} {}</span> on {}.</p>",
        html_escape(&hearing.hearing_type),
        urgency_color(days),
        days,
        day_noun(days),
        html_escape(&when),
    );
    let mut rows = String::new();
    rows.push_str(&html_detail_row(
        "Matter",
        &format!("{} ({})", matter.title, matter.number),
    ));
    rows.push_str(&html_detail_row("Client", &matter.client_name));
    if let Some(court) = hearing.court_name.as_deref().filter(|s| !s.is_empty()) {
        rows.push_str(&html_detail_row("Court", court));
    }
    if let Some(courtroom) = hearing.courtroom.as_deref().filter(|s| !s.is_empty()) {
        rows.push_str(&html_detail_row("Courtroom", courtroom));
    }
    if let Some(judge) = hearing.judge_name.as_deref().filter(|s| !s.is_empty()) {
        rows.push_str(&html_detail_row("Judge", judge));
    }
    let footer = format!(
        "Reply to this email to add a note to the hearing. Sent by {}.",
        html_escape(firm_name)
    );
    let html = html_shell("Hearing Notice", &banner, &rows, &footer);

    EmailContent {
        subject,
        text,
        html,
    }
}
