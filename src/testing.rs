//! In-memory fakes and fixtures shared across unit tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::db::{
    CommunicationStore, CreateCommunicationParams, CreateNotificationParams, DeadlineRecord,
    DeadlineStatus, DeadlineStore, EmailEventStore, HearingRecord, HearingStore, MatterRecord,
    MatterSettingsRecord, MatterSettingsStore, MatterStore, NotificationStore,
    RecordEmailEventParams, RelevantParty, ReminderLedgerStore,
};
use crate::email::sender::{EmailTransport, OutboundMessage};
use crate::error::{DatabaseError, EmailError};

// ==================== Transport ====================

/// Records every message it is asked to send; optionally fails each send.
#[derive(Default)]
pub struct FakeTransport {
    sent: Mutex<Vec<OutboundMessage>>,
    failure: Option<String>,
}

impl FakeTransport {
    pub fn failing(message: &str) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failure: Some(message.to_string()),
        }
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().expect("transport lock").clone()
    }
}

#[async_trait]
impl EmailTransport for FakeTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<(), EmailError> {
        if let Some(body) = &self.failure {
            return Err(EmailError::Rejected {
                status: 502,
                body: body.clone(),
            });
        }
        self.sent.lock().expect("transport lock").push(message.clone());
        Ok(())
    }
}

// ==================== Database ====================

#[derive(Default)]
struct FakeState {
    matters: Vec<MatterRecord>,
    deadlines: Vec<DeadlineRecord>,
    hearings: Vec<HearingRecord>,
    settings: Vec<MatterSettingsRecord>,
    communications: Vec<CreateCommunicationParams>,
    notifications: Vec<CreateNotificationParams>,
    email_events: Vec<RecordEmailEventParams>,
    deadline_notes: Vec<(i64, String)>,
    hearing_notes: Vec<(i64, String)>,
    touched_deadlines: Vec<i64>,
    deadline_ledger: HashSet<(i64, i32, NaiveDate)>,
    hearing_ledger: HashSet<(i64, i32, NaiveDate)>,
    deadline_queries: usize,
    hearing_queries: usize,
    fail_settings: bool,
    fail_email_events: bool,
}

/// In-memory `Database` implementation backed by vectors behind one mutex.
#[derive(Default)]
pub struct FakeDatabase {
    state: Mutex<FakeState>,
}

impl FakeDatabase {
    pub fn insert_matter(&self, matter: MatterRecord) {
        self.state.lock().expect("db lock").matters.push(matter);
    }

    pub fn insert_deadline(&self, deadline: DeadlineRecord) {
        self.state.lock().expect("db lock").deadlines.push(deadline);
    }

    pub fn insert_hearing(&self, hearing: HearingRecord) {
        self.state.lock().expect("db lock").hearings.push(hearing);
    }

    pub fn insert_settings(&self, settings: MatterSettingsRecord) {
        self.state.lock().expect("db lock").settings.push(settings);
    }

    /// Make `list_reminder_enabled_settings` fail, to exercise abort paths.
    pub fn fail_settings_query(&self) {
        self.state.lock().expect("db lock").fail_settings = true;
    }

    /// Make `record_email_event` fail, to exercise best-effort paths.
    pub fn fail_email_event_inserts(&self) {
        self.state.lock().expect("db lock").fail_email_events = true;
    }

    pub fn deadline_query_count(&self) -> usize {
        self.state.lock().expect("db lock").deadline_queries
    }

    pub fn hearing_query_count(&self) -> usize {
        self.state.lock().expect("db lock").hearing_queries
    }

    pub fn communications(&self) -> Vec<CreateCommunicationParams> {
        self.state.lock().expect("db lock").communications.clone()
    }

    pub fn notifications(&self) -> Vec<CreateNotificationParams> {
        self.state.lock().expect("db lock").notifications.clone()
    }

    pub fn email_events(&self) -> Vec<RecordEmailEventParams> {
        self.state.lock().expect("db lock").email_events.clone()
    }

    pub fn deadline_notes(&self) -> Vec<(i64, String)> {
        self.state.lock().expect("db lock").deadline_notes.clone()
    }

    pub fn hearing_notes(&self) -> Vec<(i64, String)> {
        self.state.lock().expect("db lock").hearing_notes.clone()
    }

    pub fn touched_deadlines(&self) -> Vec<i64> {
        self.state.lock().expect("db lock").touched_deadlines.clone()
    }

    pub fn deadline_ledger_len(&self) -> usize {
        self.state.lock().expect("db lock").deadline_ledger.len()
    }

    pub fn hearing_ledger_len(&self) -> usize {
        self.state.lock().expect("db lock").hearing_ledger.len()
    }
}

#[async_trait]
impl MatterStore for FakeDatabase {
    async fn get_matter(&self, id: i64) -> Result<Option<MatterRecord>, DatabaseError> {
        let state = self.state.lock().expect("db lock");
        Ok(state.matters.iter().find(|m| m.id == id).cloned())
    }
}

#[async_trait]
impl DeadlineStore for FakeDatabase {
    async fn list_open_deadlines_due_between(
        &self,
        matter_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DeadlineRecord>, DatabaseError> {
        let mut state = self.state.lock().expect("db lock");
        state.deadline_queries += 1;
        Ok(state
            .deadlines
            .iter()
            .filter(|d| {
                d.matter_id == matter_id
                    && d.status == DeadlineStatus::Open
                    && d.due_at >= from
                    && d.due_at <= to
            })
            .cloned()
            .collect())
    }

    async fn touch_deadline(&self, id: i64) -> Result<(), DatabaseError> {
        self.state.lock().expect("db lock").touched_deadlines.push(id);
        Ok(())
    }

    async fn add_deadline_note(
        &self,
        deadline_id: i64,
        note: &str,
    ) -> Result<(), DatabaseError> {
        self.state
            .lock()
            .expect("db lock")
            .deadline_notes
            .push((deadline_id, note.to_string()));
        Ok(())
    }
}

#[async_trait]
impl HearingStore for FakeDatabase {
    async fn list_hearings_between(
        &self,
        matter_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HearingRecord>, DatabaseError> {
        let mut state = self.state.lock().expect("db lock");
        state.hearing_queries += 1;
        Ok(state
            .hearings
            .iter()
            .filter(|h| h.matter_id == matter_id && h.starts_at >= from && h.starts_at <= to)
            .cloned()
            .collect())
    }

    async fn append_hearing_note(&self, id: i64, note: &str) -> Result<(), DatabaseError> {
        self.state
            .lock()
            .expect("db lock")
            .hearing_notes
            .push((id, note.to_string()));
        Ok(())
    }
}

#[async_trait]
impl MatterSettingsStore for FakeDatabase {
    async fn list_reminder_enabled_settings(
        &self,
    ) -> Result<Vec<MatterSettingsRecord>, DatabaseError> {
        let state = self.state.lock().expect("db lock");
        if state.fail_settings {
            return Err(DatabaseError::Pool("settings unavailable".to_string()));
        }
        Ok(state
            .settings
            .iter()
            .filter(|s| s.calendar_reminders_enabled && s.notify_relevant_parties)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CommunicationStore for FakeDatabase {
    async fn create_communication(
        &self,
        params: &CreateCommunicationParams,
    ) -> Result<i64, DatabaseError> {
        let mut state = self.state.lock().expect("db lock");
        state.communications.push(params.clone());
        Ok(state.communications.len() as i64)
    }
}

#[async_trait]
impl ReminderLedgerStore for FakeDatabase {
    async fn deadline_reminder_sent_on(
        &self,
        deadline_id: i64,
        reminder_days: i32,
        day: NaiveDate,
    ) -> Result<bool, DatabaseError> {
        let state = self.state.lock().expect("db lock");
        Ok(state.deadline_ledger.contains(&(deadline_id, reminder_days, day)))
    }

    async fn record_deadline_reminder(
        &self,
        deadline_id: i64,
        reminder_days: i32,
        day: NaiveDate,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().expect("db lock");
        state.deadline_ledger.insert((deadline_id, reminder_days, day));
        Ok(())
    }

    async fn hearing_reminder_sent_on(
        &self,
        hearing_id: i64,
        reminder_days: i32,
        day: NaiveDate,
    ) -> Result<bool, DatabaseError> {
        let state = self.state.lock().expect("db lock");
        Ok(state.hearing_ledger.contains(&(hearing_id, reminder_days, day)))
    }

    async fn record_hearing_reminder(
        &self,
        hearing_id: i64,
        reminder_days: i32,
        day: NaiveDate,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().expect("db lock");
        state.hearing_ledger.insert((hearing_id, reminder_days, day));
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for FakeDatabase {
    async fn create_notification(
        &self,
        params: &CreateNotificationParams,
    ) -> Result<(), DatabaseError> {
        self.state.lock().expect("db lock").notifications.push(params.clone());
        Ok(())
    }
}

#[async_trait]
impl EmailEventStore for FakeDatabase {
    async fn record_email_event(
        &self,
        params: &RecordEmailEventParams,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().expect("db lock");
        if state.fail_email_events {
            return Err(DatabaseError::Pool("email_events unavailable".to_string()));
        }
        state.email_events.push(params.clone());
        Ok(())
    }
}

// ==================== Fixtures ====================

pub fn matter_fixture(id: i64) -> MatterRecord {
    MatterRecord {
        id,
        title: "Smith v. Jones".to_string(),
        number: format!("2026-CV-{id:04}"),
        practice_area: Some("Litigation".to_string()),
        client_id: id * 10,
        client_name: "Alice Smith".to_string(),
        client_email: Some("alice@example.com".to_string()),
    }
}

pub fn deadline_fixture(id: i64, matter_id: i64, due_at: DateTime<Utc>) -> DeadlineRecord {
    DeadlineRecord {
        id,
        matter_id,
        title: "Answer due".to_string(),
        source: None,
        due_at,
        status: DeadlineStatus::Open,
        trigger_event: None,
        created_at: due_at,
        updated_at: due_at,
    }
}

pub fn hearing_fixture(id: i64, matter_id: i64, starts_at: DateTime<Utc>) -> HearingRecord {
    HearingRecord {
        id,
        matter_id,
        hearing_type: "Motion Hearing".to_string(),
        starts_at,
        ends_at: None,
        courtroom: None,
        judge_name: None,
        court_name: None,
        notes: None,
        updated_at: starts_at,
    }
}

pub fn party_fixture(email: &str) -> RelevantParty {
    RelevantParty {
        name: "Party".to_string(),
        email: email.to_string(),
        notify_deadlines: true,
        notify_hearings: true,
    }
}

pub fn settings_fixture(matter_id: i64) -> MatterSettingsRecord {
    MatterSettingsRecord {
        matter_id,
        calendar_reminders_enabled: true,
        notify_relevant_parties: true,
        reminder_days_before: None,
        relevant_parties: Some(vec![party_fixture("party@example.com")]),
    }
}

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0)
        .single()
        .expect("valid time")
}
