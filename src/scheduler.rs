//! Scheduled reminder sweeps over matters with calendar reminders enabled.
//!
//! One sweep walks every reminder-enabled matter, finds open deadlines and
//! upcoming hearings whose date falls inside a configured offset window, and
//! hands them to the `Notifier`. A sent-reminder ledger keyed by
//! (resource, offset, calendar day) keeps overlapping or re-run sweeps from
//! mailing the same reminder twice. Failures are isolated per matter: one
//! broken matter never stops the sweep.

use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{Database, MatterRecord, MatterSettingsRecord, SchemaCapabilities};
use crate::email::sender::Notifier;
use crate::error::DatabaseError;

/// Counts for one category of reminders in a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReminderStats {
    pub sent: u32,
    pub errors: u32,
}

impl ReminderStats {
    fn absorb(&mut self, other: ReminderStats) {
        self.sent += other.sent;
        self.errors += other.errors;
    }
}

/// Result of a full sweep, serialized into the manual-trigger response.
#[derive(Debug, Clone, Serialize)]
pub struct ReminderRunSummary {
    pub success: bool,
    pub deadline_reminders: ReminderStats,
    pub hearing_reminders: ReminderStats,
    pub total_sent: u32,
    pub total_errors: u32,
    pub timestamp: DateTime<Utc>,
}

/// The calendar-day window `[00:00:00, 23:59:59.999]` UTC that is `offset`
/// days after `now`'s date. Windows for distinct offsets never overlap.
pub fn offset_window(now: DateTime<Utc>, offset: i32) -> (DateTime<Utc>, DateTime<Utc>) {
    let base = now.date_naive();
    let day = if offset >= 0 {
        base.checked_add_days(Days::new(offset as u64))
    } else {
        base.checked_sub_days(Days::new(offset.unsigned_abs() as u64))
    }
    .unwrap_or(base);
    let start = day.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
    let end = day
        .and_hms_milli_opt(23, 59, 59, 999)
        .unwrap_or_default()
        .and_utc();
    (start, end)
}

pub struct ReminderScheduler {
    db: Arc<dyn Database>,
    caps: SchemaCapabilities,
    notifier: Arc<Notifier>,
}

impl ReminderScheduler {
    pub fn new(db: Arc<dyn Database>, caps: SchemaCapabilities, notifier: Arc<Notifier>) -> Self {
        Self { db, caps, notifier }
    }

    /// Run a full sweep now.
    pub async fn run(&self) -> ReminderRunSummary {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> ReminderRunSummary {
        let (deadline_stats, hearing_stats) = match self.db.list_reminder_enabled_settings().await
        {
            Ok(rows) => (
                self.deadline_pass(&rows, now).await,
                self.hearing_pass(&rows, now).await,
            ),
            Err(err) => {
                warn!("reminder sweep aborted, settings query failed: {err}");
                (
                    ReminderStats { sent: 0, errors: 1 },
                    ReminderStats::default(),
                )
            }
        };

        let total_sent = deadline_stats.sent + hearing_stats.sent;
        let total_errors = deadline_stats.errors + hearing_stats.errors;
        let summary = ReminderRunSummary {
            success: total_errors == 0,
            deadline_reminders: deadline_stats,
            hearing_reminders: hearing_stats,
            total_sent,
            total_errors,
            timestamp: now,
        };
        info!(total_sent, total_errors, "reminder sweep finished");
        summary
    }

    /// Deadline-reminder sweep on its own, e.g. for targeted re-runs.
    pub async fn send_deadline_reminders(&self) -> ReminderStats {
        self.send_deadline_reminders_at(Utc::now()).await
    }

    pub async fn send_deadline_reminders_at(&self, now: DateTime<Utc>) -> ReminderStats {
        match self.db.list_reminder_enabled_settings().await {
            Ok(rows) => self.deadline_pass(&rows, now).await,
            Err(err) => {
                warn!("deadline sweep aborted, settings query failed: {err}");
                ReminderStats { sent: 0, errors: 1 }
            }
        }
    }

    pub async fn send_hearing_reminders(&self) -> ReminderStats {
        self.send_hearing_reminders_at(Utc::now()).await
    }

    pub async fn send_hearing_reminders_at(&self, now: DateTime<Utc>) -> ReminderStats {
        match self.db.list_reminder_enabled_settings().await {
            Ok(rows) => self.hearing_pass(&rows, now).await,
            Err(err) => {
                warn!("hearing sweep aborted, settings query failed: {err}");
                ReminderStats { sent: 0, errors: 1 }
            }
        }
    }

    async fn deadline_pass(
        &self,
        rows: &[MatterSettingsRecord],
        now: DateTime<Utc>,
    ) -> ReminderStats {
        let mut stats = ReminderStats::default();
        for settings in rows {
            match self.load_matter(settings).await {
                Ok(Some(matter)) => {
                    stats.absorb(self.sweep_deadlines(&matter, settings, now).await);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(matter_id = settings.matter_id, "matter load failed: {err}");
                    stats.errors += 1;
                }
            }
        }
        stats
    }

    async fn hearing_pass(
        &self,
        rows: &[MatterSettingsRecord],
        now: DateTime<Utc>,
    ) -> ReminderStats {
        let mut stats = ReminderStats::default();
        for settings in rows {
            match self.load_matter(settings).await {
                Ok(Some(matter)) => {
                    stats.absorb(self.sweep_hearings(&matter, settings, now).await);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(matter_id = settings.matter_id, "matter load failed: {err}");
                    stats.errors += 1;
                }
            }
        }
        stats
    }

    async fn load_matter(
        &self,
        settings: &MatterSettingsRecord,
    ) -> Result<Option<MatterRecord>, DatabaseError> {
        let matter = self.db.get_matter(settings.matter_id).await?;
        if matter.is_none() {
            warn!(matter_id = settings.matter_id, "settings row without matter, skipping");
        }
        Ok(matter)
    }

    async fn sweep_deadlines(
        &self,
        matter: &MatterRecord,
        settings: &MatterSettingsRecord,
        now: DateTime<Utc>,
    ) -> ReminderStats {
        let mut stats = ReminderStats::default();
        if settings.parties().is_empty() {
            debug!(matter_id = matter.id, "no relevant parties configured, skipping matter");
            return stats;
        }
        let today = now.date_naive();
        for offset in settings.reminder_offsets() {
            let (from, to) = offset_window(now, offset);
            let deadlines = match self
                .db
                .list_open_deadlines_due_between(matter.id, from, to)
                .await
            {
                Ok(deadlines) => deadlines,
                Err(err) => {
                    warn!(matter_id = matter.id, offset, "deadline query failed: {err}");
                    stats.errors += 1;
                    continue;
                }
            };
            for deadline in &deadlines {
                match self
                    .already_sent_deadline(deadline.id, offset, today)
                    .await
                {
                    Ok(true) => {
                        debug!(deadline_id = deadline.id, offset, "reminder already sent today");
                        continue;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!(deadline_id = deadline.id, "ledger check failed: {err}");
                        stats.errors += 1;
                        continue;
                    }
                }
                let outcome = self
                    .notifier
                    .send_deadline_reminder_at(matter, deadline, settings.parties(), now)
                    .await;
                if !outcome.success {
                    stats.errors += 1;
                    continue;
                }
                if outcome.message_ids.is_empty() {
                    continue;
                }
                stats.sent += 1;
                if self.caps.deadline_ledger {
                    if let Err(err) = self
                        .db
                        .record_deadline_reminder(deadline.id, offset, today)
                        .await
                    {
                        warn!(deadline_id = deadline.id, "ledger record failed: {err}");
                        stats.errors += 1;
                    }
                }
            }
        }
        stats
    }

    async fn sweep_hearings(
        &self,
        matter: &MatterRecord,
        settings: &MatterSettingsRecord,
        now: DateTime<Utc>,
    ) -> ReminderStats {
        let mut stats = ReminderStats::default();
        if settings.parties().is_empty() {
            debug!(matter_id = matter.id, "no relevant parties configured, skipping matter");
            return stats;
        }
        let today = now.date_naive();
        for offset in settings.reminder_offsets() {
            let (from, to) = offset_window(now, offset);
            let hearings = match self.db.list_hearings_between(matter.id, from, to).await {
                Ok(hearings) => hearings,
                Err(err) => {
                    warn!(matter_id = matter.id, offset, "hearing query failed: {err}");
                    stats.errors += 1;
                    continue;
                }
            };
            for hearing in &hearings {
                match self.already_sent_hearing(hearing.id, offset, today).await {
                    Ok(true) => {
                        debug!(hearing_id = hearing.id, offset, "reminder already sent today");
                        continue;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!(hearing_id = hearing.id, "ledger check failed: {err}");
                        stats.errors += 1;
                        continue;
                    }
                }
                let outcome = self
                    .notifier
                    .send_hearing_notification_at(matter, hearing, settings.parties(), now)
                    .await;
                if !outcome.success {
                    stats.errors += 1;
                    continue;
                }
                if outcome.message_ids.is_empty() {
                    continue;
                }
                stats.sent += 1;
                if self.caps.hearing_ledger {
                    if let Err(err) = self
                        .db
                        .record_hearing_reminder(hearing.id, offset, today)
                        .await
                    {
                        warn!(hearing_id = hearing.id, "ledger record failed: {err}");
                        stats.errors += 1;
                    }
                }
            }
        }
        stats
    }

    /// Without the ledger table the check is skipped, so a re-run re-sends.
    /// Missing tables must never block sending.
    async fn already_sent_deadline(
        &self,
        deadline_id: i64,
        offset: i32,
        day: NaiveDate,
    ) -> Result<bool, DatabaseError> {
        if !self.caps.deadline_ledger {
            return Ok(false);
        }
        self.db
            .deadline_reminder_sent_on(deadline_id, offset, day)
            .await
    }

    async fn already_sent_hearing(
        &self,
        hearing_id: i64,
        offset: i32,
        day: NaiveDate,
    ) -> Result<bool, DatabaseError> {
        if !self.caps.hearing_ledger {
            return Ok(false);
        }
        self.db
            .hearing_reminder_sent_on(hearing_id, offset, day)
            .await
    }
}
