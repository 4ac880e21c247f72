//! PostgreSQL backend for the `Database` trait.
//!
//! The schema is owned by the main practice-management app; this service
//! only issues parameterized queries against it. Optional tables are probed
//! once via `probe_capabilities` so a partially-migrated install degrades
//! (no dedupe ledger, no notes) instead of erroring per write.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::NoTls;
use tracing::warn;

use crate::config::DatabaseConfig;
use crate::db::{
    CommunicationStore, CreateCommunicationParams, CreateNotificationParams, DeadlineRecord,
    DeadlineStatus, DeadlineStore, EmailEventStore, HearingRecord, HearingStore, MatterRecord,
    MatterSettingsRecord, MatterSettingsStore, MatterStore, NotificationStore,
    RecordEmailEventParams, ReminderLedgerStore, RelevantParty, SchemaCapabilities,
    parse_json_i32_array,
};
use crate::error::DatabaseError;

/// PostgreSQL database backend over a deadpool connection pool.
pub struct PgBackend {
    pool: Pool,
}

impl PgBackend {
    /// Create a backend from configuration and verify connectivity.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .map_err(|e: tokio_postgres::Error| DatabaseError::Pool(e.to_string()))?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .build()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;

        let backend = Self { pool };
        // Fail fast on unreachable/misconfigured databases.
        backend.conn().await?;
        Ok(backend)
    }

    async fn conn(&self) -> Result<Object, DatabaseError> {
        self.pool
            .get()
            .await
            .map_err(|e| DatabaseError::Pool(e.to_string()))
    }

    /// Probe which optional tables exist. Run once at startup.
    pub async fn probe_capabilities(&self) -> Result<SchemaCapabilities, DatabaseError> {
        let names = [
            "email_reminders",
            "hearing_reminders",
            "deadline_notes",
            "notifications",
            "email_events",
        ];
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_name = ANY($1)",
                &[&names.as_slice()],
            )
            .await?;
        let present: Vec<String> = rows.into_iter().map(|row| row.get(0)).collect();
        let has = |name: &str| present.iter().any(|t| t == name);
        Ok(SchemaCapabilities {
            deadline_ledger: has("email_reminders"),
            hearing_ledger: has("hearing_reminders"),
            deadline_notes: has("deadline_notes"),
            notifications: has("notifications"),
            email_events: has("email_events"),
        })
    }
}

fn row_to_matter_record(row: &tokio_postgres::Row) -> MatterRecord {
    MatterRecord {
        id: row.get("id"),
        title: row.get("title"),
        number: row.get("number"),
        practice_area: row.get("practice_area"),
        client_id: row.get("client_id"),
        client_name: row.get("client_name"),
        client_email: row.get("client_email"),
    }
}

fn row_to_deadline_record(row: &tokio_postgres::Row) -> Result<DeadlineRecord, DatabaseError> {
    let status_raw: String = row.get("status");
    let status = DeadlineStatus::from_db_value(&status_raw).ok_or_else(|| {
        DatabaseError::Serialization(format!("invalid deadline status '{status_raw}'"))
    })?;
    Ok(DeadlineRecord {
        id: row.get("id"),
        matter_id: row.get("matter_id"),
        title: row.get("title"),
        source: row.get("source"),
        due_at: row.get("due_at"),
        status,
        trigger_event: row.get("trigger_event"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_hearing_record(row: &tokio_postgres::Row) -> HearingRecord {
    HearingRecord {
        id: row.get("id"),
        matter_id: row.get("matter_id"),
        hearing_type: row.get("hearing_type"),
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
        courtroom: row.get("courtroom"),
        judge_name: row.get("judge_name"),
        court_name: row.get("court_name"),
        notes: row.get("notes"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_settings_record(row: &tokio_postgres::Row) -> MatterSettingsRecord {
    let reminder_days_value: Option<serde_json::Value> = row.get("reminder_days_before");
    let reminder_days_before = reminder_days_value
        .as_ref()
        .map(parse_json_i32_array)
        .filter(|days| !days.is_empty());

    let parties_value: Option<serde_json::Value> = row.get("relevant_parties");
    let relevant_parties = parties_value.and_then(|value| {
        serde_json::from_value::<Vec<RelevantParty>>(value)
            .map_err(|e| {
                warn!(
                    matter_id = row.get::<_, i64>("matter_id"),
                    "unparseable relevant_parties, treating as empty: {e}"
                );
            })
            .ok()
    });

    MatterSettingsRecord {
        matter_id: row.get("matter_id"),
        calendar_reminders_enabled: row.get("calendar_reminders_enabled"),
        notify_relevant_parties: row.get("notify_relevant_parties"),
        reminder_days_before,
        relevant_parties,
    }
}

#[async_trait]
impl MatterStore for PgBackend {
    async fn get_matter(&self, id: i64) -> Result<Option<MatterRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT m.id, m.title, m.number, m.practice_area, m.client_id, \
                        c.name AS client_name, c.email AS client_email \
                 FROM matters m JOIN clients c ON c.id = m.client_id \
                 WHERE m.id = $1",
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(row_to_matter_record))
    }
}

#[async_trait]
impl DeadlineStore for PgBackend {
    async fn list_open_deadlines_due_between(
        &self,
        matter_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DeadlineRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT id, matter_id, title, source, due_at, status, trigger_event, \
                        created_at, updated_at \
                 FROM deadlines \
                 WHERE matter_id = $1 AND status = $2 AND due_at BETWEEN $3 AND $4 \
                 ORDER BY due_at ASC",
                &[&matter_id, &DeadlineStatus::Open.as_str(), &from, &to],
            )
            .await?;
        rows.iter().map(row_to_deadline_record).collect()
    }

    async fn touch_deadline(&self, id: i64) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute("UPDATE deadlines SET updated_at = NOW() WHERE id = $1", &[&id])
            .await?;
        Ok(())
    }

    async fn add_deadline_note(
        &self,
        deadline_id: i64,
        note: &str,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO deadline_notes (deadline_id, note) VALUES ($1, $2)",
            &[&deadline_id, &note],
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl HearingStore for PgBackend {
    async fn list_hearings_between(
        &self,
        matter_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HearingRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT id, matter_id, hearing_type, starts_at, ends_at, courtroom, \
                        judge_name, court_name, notes, updated_at \
                 FROM hearings \
                 WHERE matter_id = $1 AND starts_at BETWEEN $2 AND $3 \
                 ORDER BY starts_at ASC",
                &[&matter_id, &from, &to],
            )
            .await?;
        Ok(rows.iter().map(row_to_hearing_record).collect())
    }

    async fn append_hearing_note(&self, id: i64, note: &str) -> Result<(), DatabaseError> {
        // Append, never overwrite. Blank line between entries.
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE hearings SET \
                notes = CASE WHEN notes IS NULL OR notes = '' THEN $2 \
                             ELSE notes || E'\\n\\n' || $2 END, \
                updated_at = NOW() \
             WHERE id = $1",
            &[&id, &note],
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MatterSettingsStore for PgBackend {
    async fn list_reminder_enabled_settings(
        &self,
    ) -> Result<Vec<MatterSettingsRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT matter_id, calendar_reminders_enabled, notify_relevant_parties, \
                        reminder_days_before, relevant_parties \
                 FROM matter_settings \
                 WHERE calendar_reminders_enabled = TRUE \
                   AND notify_relevant_parties = TRUE \
                   AND relevant_parties IS NOT NULL",
                &[],
            )
            .await?;
        Ok(rows.iter().map(row_to_settings_record).collect())
    }
}

#[async_trait]
impl CommunicationStore for PgBackend {
    async fn create_communication(
        &self,
        params: &CreateCommunicationParams,
    ) -> Result<i64, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                "INSERT INTO communications \
                 (matter_id, channel, direction, from_address, to_address, body, metadata) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 RETURNING id",
                &[
                    &params.matter_id,
                    &params.channel.as_str(),
                    &params.direction.as_str(),
                    &params.from_address,
                    &params.to_address,
                    &params.body,
                    &params.metadata,
                ],
            )
            .await?;
        Ok(row.get(0))
    }
}

#[async_trait]
impl ReminderLedgerStore for PgBackend {
    async fn deadline_reminder_sent_on(
        &self,
        deadline_id: i64,
        reminder_days: i32,
        day: NaiveDate,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT 1 FROM email_reminders \
                 WHERE deadline_id = $1 AND reminder_days = $2 AND sent_date = $3",
                &[&deadline_id, &reminder_days, &day],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn record_deadline_reminder(
        &self,
        deadline_id: i64,
        reminder_days: i32,
        day: NaiveDate,
    ) -> Result<(), DatabaseError> {
        // ON CONFLICT keeps overlapping scheduler runs from double-recording.
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO email_reminders (deadline_id, reminder_days, sent_date) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (deadline_id, reminder_days, sent_date) DO NOTHING",
            &[&deadline_id, &reminder_days, &day],
        )
        .await?;
        Ok(())
    }

    async fn hearing_reminder_sent_on(
        &self,
        hearing_id: i64,
        reminder_days: i32,
        day: NaiveDate,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT 1 FROM hearing_reminders \
                 WHERE hearing_id = $1 AND reminder_days = $2 AND sent_date = $3",
                &[&hearing_id, &reminder_days, &day],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn record_hearing_reminder(
        &self,
        hearing_id: i64,
        reminder_days: i32,
        day: NaiveDate,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO hearing_reminders (hearing_id, reminder_days, sent_date) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (hearing_id, reminder_days, sent_date) DO NOTHING",
            &[&hearing_id, &reminder_days, &day],
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for PgBackend {
    async fn create_notification(
        &self,
        params: &CreateNotificationParams,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO notifications (matter_id, title, body, priority, link) \
             VALUES ($1, $2, $3, $4, $5)",
            &[
                &params.matter_id,
                &params.title,
                &params.body,
                &params.priority.as_str(),
                &params.link,
            ],
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EmailEventStore for PgBackend {
    async fn record_email_event(
        &self,
        params: &RecordEmailEventParams,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO email_events \
             (event, email, occurred_at, provider_message_id, matter_id, deadline_id, \
              hearing_id, reason, payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            &[
                &params.event,
                &params.email,
                &params.occurred_at,
                &params.provider_message_id,
                &params.matter_id,
                &params.deadline_id,
                &params.hearing_id,
                &params.reason,
                &params.payload,
            ],
        )
        .await?;
        Ok(())
    }
}
