//! Database abstraction layer.
//!
//! A backend-agnostic `Database` trait unifies persistence for the
//! notification service. The one production implementation lives in
//! `postgres.rs` (`deadpool-postgres` + `tokio-postgres`); tests use an
//! in-memory fake. Consumers hold `Arc<dyn Database>` and leaf components
//! can depend on a specific sub-trait instead.
//!
//! Optional tables (`email_reminders`, `hearing_reminders`, `deadline_notes`,
//! `notifications`, `email_events`) may be absent on partially-migrated
//! installs. Their availability is probed once at startup into
//! `SchemaCapabilities`; call sites check the flag instead of swallowing
//! per-write errors, but a missing table still never blocks sending or
//! inbound processing.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;

/// Deadline lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadlineStatus {
    Open,
    Completed,
}

impl DeadlineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Completed => "completed",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Direction of a logged communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationDirection {
    Inbound,
    Outbound,
}

impl CommunicationDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

/// Channel of a logged communication. Only `Email` rows are created here;
/// the wider app logs the other channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationChannel {
    Email,
    Phone,
    Letter,
    InPerson,
}

impl CommunicationChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Letter => "letter",
            Self::InPerson => "in_person",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "email" => Some(Self::Email),
            "phone" => Some(Self::Phone),
            "letter" => Some(Self::Letter),
            "in_person" => Some(Self::InPerson),
            _ => None,
        }
    }
}

/// Internal notification priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
}

impl NotificationPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// A matter joined with its client, as loaded for notification rendering
/// and inbound reply routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatterRecord {
    pub id: i64,
    pub title: String,
    pub number: String,
    pub practice_area: Option<String>,
    pub client_id: i64,
    pub client_name: String,
    pub client_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineRecord {
    pub id: i64,
    pub matter_id: i64,
    pub title: String,
    pub source: Option<String>,
    pub due_at: DateTime<Utc>,
    pub status: DeadlineStatus,
    pub trigger_event: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HearingRecord {
    pub id: i64,
    pub matter_id: i64,
    pub hearing_type: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub courtroom: Option<String>,
    pub judge_name: Option<String>,
    pub court_name: Option<String>,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A recipient configured on a matter's notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevantParty {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub notify_deadlines: bool,
    #[serde(default)]
    pub notify_hearings: bool,
}

/// Per-matter notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatterSettingsRecord {
    pub matter_id: i64,
    pub calendar_reminders_enabled: bool,
    pub notify_relevant_parties: bool,
    pub reminder_days_before: Option<Vec<i32>>,
    pub relevant_parties: Option<Vec<RelevantParty>>,
}

/// Reminder offsets to fire when none are configured.
pub const DEFAULT_REMINDER_DAYS: [i32; 3] = [7, 3, 1];

impl MatterSettingsRecord {
    /// Configured offsets, falling back to 7/3/1 days before.
    pub fn reminder_offsets(&self) -> Vec<i32> {
        match &self.reminder_days_before {
            Some(days) if !days.is_empty() => days.clone(),
            _ => DEFAULT_REMINDER_DAYS.to_vec(),
        }
    }

    pub fn parties(&self) -> &[RelevantParty] {
        self.relevant_parties.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone)]
pub struct CreateCommunicationParams {
    pub matter_id: i64,
    pub channel: CommunicationChannel,
    pub direction: CommunicationDirection,
    pub from_address: String,
    pub to_address: String,
    pub body: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct CreateNotificationParams {
    pub matter_id: i64,
    pub title: String,
    pub body: String,
    pub priority: NotificationPriority,
    pub link: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecordEmailEventParams {
    pub event: String,
    pub email: String,
    pub occurred_at: DateTime<Utc>,
    pub provider_message_id: Option<String>,
    pub matter_id: Option<i64>,
    pub deadline_id: Option<i64>,
    pub hearing_id: Option<i64>,
    pub reason: Option<String>,
    pub payload: serde_json::Value,
}

/// Availability flags for the optional tables, probed once at startup.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaCapabilities {
    pub deadline_ledger: bool,
    pub hearing_ledger: bool,
    pub deadline_notes: bool,
    pub notifications: bool,
    pub email_events: bool,
}

impl SchemaCapabilities {
    /// All optional tables present. Used by tests and fresh installs.
    pub fn all() -> Self {
        Self {
            deadline_ledger: true,
            hearing_ledger: true,
            deadline_notes: true,
            notifications: true,
            email_events: true,
        }
    }
}

// ==================== Sub-traits ====================

#[async_trait]
pub trait MatterStore: Send + Sync {
    /// Load a matter joined with its client. `None` when the id is unknown.
    async fn get_matter(&self, id: i64) -> Result<Option<MatterRecord>, DatabaseError>;
}

#[async_trait]
pub trait DeadlineStore: Send + Sync {
    /// Open deadlines for a matter with `due_at` inside `[from, to]`.
    async fn list_open_deadlines_due_between(
        &self,
        matter_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DeadlineRecord>, DatabaseError>;

    /// Bump `updated_at` after an inbound reply touched the deadline.
    async fn touch_deadline(&self, id: i64) -> Result<(), DatabaseError>;

    /// Insert a note row for a deadline. Requires the `deadline_notes`
    /// capability.
    async fn add_deadline_note(&self, deadline_id: i64, note: &str)
    -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait HearingStore: Send + Sync {
    /// Hearings for a matter with `starts_at` inside `[from, to]`.
    async fn list_hearings_between(
        &self,
        matter_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HearingRecord>, DatabaseError>;

    /// Append to the hearing's free-text notes (blank-line separated, never
    /// overwritten) and bump `updated_at`.
    async fn append_hearing_note(&self, id: i64, note: &str) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait MatterSettingsStore: Send + Sync {
    /// Settings rows with calendar reminders enabled, party notification
    /// enabled, and a non-null party list.
    async fn list_reminder_enabled_settings(
        &self,
    ) -> Result<Vec<MatterSettingsRecord>, DatabaseError>;
}

#[async_trait]
pub trait CommunicationStore: Send + Sync {
    /// Insert a communication row, returning its id.
    async fn create_communication(
        &self,
        params: &CreateCommunicationParams,
    ) -> Result<i64, DatabaseError>;
}

#[async_trait]
pub trait ReminderLedgerStore: Send + Sync {
    /// Whether a reminder for this (deadline, offset) pair was already
    /// recorded on `day`.
    async fn deadline_reminder_sent_on(
        &self,
        deadline_id: i64,
        reminder_days: i32,
        day: NaiveDate,
    ) -> Result<bool, DatabaseError>;

    /// Record a sent deadline reminder. Idempotent per (deadline, offset,
    /// day): a duplicate record is a no-op, not an error.
    async fn record_deadline_reminder(
        &self,
        deadline_id: i64,
        reminder_days: i32,
        day: NaiveDate,
    ) -> Result<(), DatabaseError>;

    async fn hearing_reminder_sent_on(
        &self,
        hearing_id: i64,
        reminder_days: i32,
        day: NaiveDate,
    ) -> Result<bool, DatabaseError>;

    async fn record_hearing_reminder(
        &self,
        hearing_id: i64,
        reminder_days: i32,
        day: NaiveDate,
    ) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(
        &self,
        params: &CreateNotificationParams,
    ) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait EmailEventStore: Send + Sync {
    async fn record_email_event(
        &self,
        params: &RecordEmailEventParams,
    ) -> Result<(), DatabaseError>;
}

/// The combined persistence interface.
pub trait Database:
    MatterStore
    + DeadlineStore
    + HearingStore
    + MatterSettingsStore
    + CommunicationStore
    + ReminderLedgerStore
    + NotificationStore
    + EmailEventStore
    + Send
    + Sync
{
}

impl<T> Database for T where
    T: MatterStore
        + DeadlineStore
        + HearingStore
        + MatterSettingsStore
        + CommunicationStore
        + ReminderLedgerStore
        + NotificationStore
        + EmailEventStore
        + Send
        + Sync
{
}

/// Parse a JSONB array of integers, skipping malformed entries.
pub(crate) fn parse_json_i32_array(value: &serde_json::Value) -> Vec<i32> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|entry| entry.as_i64())
                .filter_map(|n| i32::try_from(n).ok())
                .collect()
        })
        .unwrap_or_default()
}
