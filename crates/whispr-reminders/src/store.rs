use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{types::Type, Connection, OptionalExtension, Transaction};
use tracing::{debug, info, instrument};
use whispr_core::{
    reminder::{Extracted, ReminderKind},
    time::{format_ts, now_millis, parse_ts},
    types::{ReminderId, UserId},
};

use crate::{
    db::init_db,
    error::{ReminderError, Result},
    types::{MarkOutcome, PendingEntry, Reminder, ReminderStatus, ScheduleEntry},
};

const REMINDER_COLUMNS: &str = "id, user_id, original_message, task, course, kind, deadline,
                                location, notes, status, version, created_at, updated_at";

/// SQLite-backed reminder records and their schedule entries.
///
/// Every mutation bumps `version`. The schedule list is only replaced as a
/// whole and under a version check; delivery marks single entries in a
/// transaction so concurrent deliveries of the same reminder never lose an
/// update.
pub struct ReminderStore {
    conn: Arc<Mutex<Connection>>,
}

impl ReminderStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        init_db(&*conn.lock().map_err(|_| ReminderError::LockPoisoned)?)?;
        Ok(Self { conn })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ReminderError::LockPoisoned)
    }

    /// Insert a new `pending` reminder with an empty schedule.
    #[instrument(skip(self, user_id, original_message, extracted), fields(user_id = %user_id))]
    pub fn create(
        &self,
        user_id: &UserId,
        original_message: &str,
        extracted: Extracted,
    ) -> Result<Reminder> {
        let now = now_millis();
        let reminder = Reminder {
            id: ReminderId::new(),
            user_id: user_id.clone(),
            original_message: original_message.to_string(),
            extracted,
            status: ReminderStatus::Pending,
            scheduled_reminders: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO reminders
             (id, user_id, original_message, task, course, kind, deadline,
              location, notes, status, version, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,0,?11,?11)",
            rusqlite::params![
                reminder.id.as_str(),
                reminder.user_id.as_str(),
                reminder.original_message,
                reminder.extracted.task,
                reminder.extracted.course,
                reminder.extracted.kind.as_str(),
                reminder.extracted.deadline.map(format_ts),
                reminder.extracted.location,
                reminder.extracted.notes,
                reminder.status.as_str(),
                format_ts(now),
            ],
        )?;

        info!(reminder_id = %reminder.id, "reminder created");
        Ok(reminder)
    }

    pub fn get(&self, id: &ReminderId) -> Result<Option<Reminder>> {
        let conn = self.lock()?;
        load(&conn, id)
    }

    /// Overwrite the whole schedule list in one transaction.
    ///
    /// Fails with [`ReminderError::VersionConflict`] when the reminder was
    /// written since `expected_version` was read. Returns the new version.
    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    pub fn replace_schedule(
        &self,
        id: &ReminderId,
        entries: &[ScheduleEntry],
        expected_version: i64,
    ) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let n = tx.execute(
            "UPDATE reminders SET version = version + 1, updated_at = ?1
             WHERE id = ?2 AND version = ?3",
            rusqlite::params![format_ts(now_millis()), id.as_str(), expected_version],
        )?;
        if n == 0 {
            return Err(missing_or_conflict(&tx, id, expected_version)?);
        }

        tx.execute(
            "DELETE FROM reminder_schedule WHERE reminder_id = ?1",
            [id.as_str()],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO reminder_schedule (reminder_id, idx, scheduled_for, sent, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (idx, entry) in entries.iter().enumerate() {
                stmt.execute(rusqlite::params![
                    id.as_str(),
                    idx,
                    format_ts(entry.scheduled_for),
                    entry.sent,
                    entry.sent_at.map(format_ts),
                ])?;
            }
        }
        tx.commit()?;

        Ok(expected_version + 1)
    }

    /// Record a successful delivery of schedule entry `index`.
    ///
    /// The entry and the reminder status are updated together. A cancelled
    /// reminder is left untouched, and an index outside the schedule is
    /// reported rather than treated as an error.
    #[instrument(skip(self, sent_at))]
    pub fn mark_entry_sent(
        &self,
        id: &ReminderId,
        index: usize,
        sent_at: DateTime<Utc>,
    ) -> Result<MarkOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM reminders WHERE id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(status) = status else {
            return Ok(MarkOutcome::MissingReminder);
        };
        if status == ReminderStatus::Cancelled.as_str() {
            return Ok(MarkOutcome::Cancelled);
        }

        let sent: Option<bool> = tx
            .query_row(
                "SELECT sent FROM reminder_schedule WHERE reminder_id = ?1 AND idx = ?2",
                rusqlite::params![id.as_str(), index],
                |row| row.get(0),
            )
            .optional()?;
        match sent {
            None => return Ok(MarkOutcome::MissingEntry),
            Some(true) => return Ok(MarkOutcome::AlreadySent),
            Some(false) => {}
        }

        let now = format_ts(now_millis());
        tx.execute(
            "UPDATE reminder_schedule SET sent = 1, sent_at = ?1
             WHERE reminder_id = ?2 AND idx = ?3",
            rusqlite::params![format_ts(sent_at), id.as_str(), index],
        )?;
        tx.execute(
            "UPDATE reminders
             SET status = CASE WHEN status IN ('pending', 'sent') THEN 'sent' ELSE status END,
                 version = version + 1,
                 updated_at = ?1
             WHERE id = ?2",
            rusqlite::params![now, id.as_str()],
        )?;
        tx.commit()?;

        Ok(MarkOutcome::Marked)
    }

    /// Mark a reminder cancelled. Jobs already queued for it stay queued and
    /// are skipped when they fire.
    #[instrument(skip(self))]
    pub fn cancel(&self, id: &ReminderId) -> Result<()> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE reminders SET status = 'cancelled', version = version + 1, updated_at = ?1
             WHERE id = ?2",
            rusqlite::params![format_ts(now_millis()), id.as_str()],
        )?;
        if n == 0 {
            return Err(ReminderError::NotFound { id: id.to_string() });
        }
        info!(reminder_id = %id, "reminder cancelled");
        Ok(())
    }

    /// Cancel the user's pending or sent reminder whose id ends with
    /// `id_suffix`. Returns the cancelled reminder, or `None` when nothing
    /// matched.
    #[instrument(skip(self))]
    pub fn cancel_for_user(&self, user_id: &UserId, id_suffix: &str) -> Result<Option<Reminder>> {
        let suffix = id_suffix.trim();
        if suffix.is_empty() {
            return Ok(None);
        }

        let candidate = {
            let conn = self.lock()?;
            let sql = format!(
                "SELECT {REMINDER_COLUMNS} FROM reminders
                 WHERE user_id = ?1 AND status IN ('pending', 'sent')
                 ORDER BY created_at"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.as_str()], row_to_reminder)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().find(|r| r.id.as_str().ends_with(suffix))
        };

        let Some(mut reminder) = candidate else {
            debug!(suffix, "no reminder matches id suffix");
            return Ok(None);
        };
        self.cancel(&reminder.id)?;
        reminder.status = ReminderStatus::Cancelled;
        Ok(Some(reminder))
    }

    /// Pending or sent reminders of a user whose deadline has not passed,
    /// soonest first.
    pub fn find_active_for_user(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE user_id = ?1 AND status IN ('pending', 'sent') AND deadline >= ?2
             ORDER BY deadline, id"
        );
        query_with_schedules(&conn, &sql, rusqlite::params![user_id.as_str(), format_ts(now)])
    }

    /// Pending reminders with a future deadline and no schedule entries at
    /// all: never scheduled, or scheduling crashed before persisting.
    pub fn find_unscheduled(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders r
             WHERE r.status = 'pending' AND r.deadline > ?1
               AND NOT EXISTS (SELECT 1 FROM reminder_schedule s WHERE s.reminder_id = r.id)
             ORDER BY r.deadline, r.id"
        );
        query_with_schedules(&conn, &sql, rusqlite::params![format_ts(now)])
    }

    /// Undelivered entries of live reminders whose deadline is still ahead.
    pub fn find_unsent_entries(&self, now: DateTime<Utc>) -> Result<Vec<PendingEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT s.reminder_id, s.idx, s.scheduled_for
             FROM reminder_schedule s JOIN reminders r ON r.id = s.reminder_id
             WHERE s.sent = 0 AND r.status IN ('pending', 'sent') AND r.deadline > ?1
             ORDER BY s.scheduled_for, s.reminder_id, s.idx",
        )?;
        let entries = stmt
            .query_map([format_ts(now)], |row| {
                Ok(PendingEntry {
                    reminder_id: ReminderId::from(row.get::<_, String>(0)?),
                    index: row.get(1)?,
                    scheduled_for: timestamp(row, 2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

// --- private helpers -------------------------------------------------------

fn missing_or_conflict(tx: &Transaction<'_>, id: &ReminderId, expected: i64) -> Result<ReminderError> {
    let exists = tx
        .query_row("SELECT 1 FROM reminders WHERE id = ?1", [id.as_str()], |_| Ok(()))
        .optional()?
        .is_some();
    Ok(if exists {
        ReminderError::VersionConflict {
            id: id.to_string(),
            expected,
        }
    } else {
        ReminderError::NotFound { id: id.to_string() }
    })
}

fn load(conn: &Connection, id: &ReminderId) -> Result<Option<Reminder>> {
    let sql = format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1");
    let Some(mut reminder) = conn
        .query_row(&sql, [id.as_str()], row_to_reminder)
        .optional()?
    else {
        return Ok(None);
    };
    reminder.scheduled_reminders = load_schedule(conn, &reminder.id)?;
    Ok(Some(reminder))
}

fn query_with_schedules(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Reminder>> {
    let mut stmt = conn.prepare(sql)?;
    let mut reminders = stmt
        .query_map(params, row_to_reminder)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for reminder in &mut reminders {
        reminder.scheduled_reminders = load_schedule(conn, &reminder.id)?;
    }
    Ok(reminders)
}

fn load_schedule(conn: &Connection, id: &ReminderId) -> Result<Vec<ScheduleEntry>> {
    let mut stmt = conn.prepare_cached(
        "SELECT scheduled_for, sent, sent_at FROM reminder_schedule
         WHERE reminder_id = ?1 ORDER BY idx",
    )?;
    let entries = stmt
        .query_map([id.as_str()], |row| {
            let sent_at = row
                .get::<_, Option<String>>(2)?
                .map(|raw| parse_ts(&raw).map_err(|e| conversion(2, e)))
                .transpose()?;
            Ok(ScheduleEntry {
                scheduled_for: timestamp(row, 0)?,
                sent: row.get(1)?,
                sent_at,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// Map a row selected with `REMINDER_COLUMNS`; the schedule is loaded
/// separately.
fn row_to_reminder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reminder> {
    let kind = row
        .get::<_, String>(5)?
        .parse::<ReminderKind>()
        .unwrap_or_default();
    let deadline = row
        .get::<_, Option<String>>(6)?
        .map(|raw| parse_ts(&raw).map_err(|e| conversion(6, e)))
        .transpose()?;
    let status = row
        .get::<_, String>(9)?
        .parse::<ReminderStatus>()
        .map_err(|e| conversion(9, e))?;

    Ok(Reminder {
        id: ReminderId::from(row.get::<_, String>(0)?),
        user_id: UserId::from(row.get::<_, String>(1)?),
        original_message: row.get(2)?,
        extracted: Extracted {
            task: row.get(3)?,
            course: row.get(4)?,
            kind,
            deadline,
            location: row.get(7)?,
            notes: row.get(8)?,
        },
        status,
        scheduled_reminders: Vec::new(),
        version: row.get(10)?,
        created_at: timestamp(row, 11)?,
        updated_at: timestamp(row, 12)?,
    })
}

fn timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_ts(&row.get::<_, String>(idx)?).map_err(|e| conversion(idx, e))
}

fn conversion<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> ReminderStore {
        let conn = Connection::open_in_memory().unwrap();
        ReminderStore::new(Arc::new(Mutex::new(conn))).unwrap()
    }

    fn essay(deadline: DateTime<Utc>) -> Extracted {
        Extracted {
            course: Some("ENG 101".into()),
            kind: ReminderKind::Assignment,
            ..Extracted::task("Essay draft").with_deadline(deadline)
        }
    }

    fn two_entries(now: DateTime<Utc>) -> Vec<ScheduleEntry> {
        vec![
            ScheduleEntry::planned(now + Duration::hours(24)),
            ScheduleEntry::planned(now + Duration::hours(47)),
        ]
    }

    #[test]
    fn create_and_get_round_trip() {
        let reminders = store();
        let deadline = now_millis() + Duration::hours(48);
        let user = UserId::new();
        let created = reminders.create(&user, "Essay due", essay(deadline)).unwrap();

        let stored = reminders.get(&created.id).unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Pending);
        assert_eq!(stored.extracted, created.extracted);
        assert_eq!(stored.user_id, user);
        assert!(stored.scheduled_reminders.is_empty());
        assert_eq!(stored.version, 0);
    }

    #[test]
    fn replace_schedule_checks_version() {
        let reminders = store();
        let now = now_millis();
        let r = reminders
            .create(&UserId::new(), "msg", essay(now + Duration::hours(48)))
            .unwrap();

        let v1 = reminders.replace_schedule(&r.id, &two_entries(now), r.version).unwrap();
        assert_eq!(v1, 1);
        assert_eq!(reminders.get(&r.id).unwrap().unwrap().scheduled_reminders.len(), 2);

        // Stale writer.
        let err = reminders.replace_schedule(&r.id, &[], r.version).unwrap_err();
        assert!(matches!(err, ReminderError::VersionConflict { expected: 0, .. }));
        assert_eq!(reminders.get(&r.id).unwrap().unwrap().scheduled_reminders.len(), 2);

        let err = reminders
            .replace_schedule(&ReminderId::from("missing"), &[], 0)
            .unwrap_err();
        assert!(matches!(err, ReminderError::NotFound { .. }));
    }

    #[test]
    fn marking_an_entry_flips_status_and_keeps_the_other_entry() {
        let reminders = store();
        let now = now_millis();
        let r = reminders
            .create(&UserId::new(), "msg", essay(now + Duration::hours(48)))
            .unwrap();
        reminders.replace_schedule(&r.id, &two_entries(now), r.version).unwrap();

        let sent_at = now + Duration::hours(24);
        assert_eq!(reminders.mark_entry_sent(&r.id, 0, sent_at).unwrap(), MarkOutcome::Marked);
        assert_eq!(
            reminders.mark_entry_sent(&r.id, 0, sent_at).unwrap(),
            MarkOutcome::AlreadySent
        );

        let stored = reminders.get(&r.id).unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Sent);
        assert!(stored.scheduled_reminders[0].sent);
        assert_eq!(stored.scheduled_reminders[0].sent_at, Some(sent_at));
        assert!(!stored.scheduled_reminders[1].sent);
        assert_eq!(stored.scheduled_reminders[1].sent_at, None);
    }

    #[test]
    fn marking_tolerates_missing_targets() {
        let reminders = store();
        let now = now_millis();
        let r = reminders
            .create(&UserId::new(), "msg", essay(now + Duration::hours(48)))
            .unwrap();
        assert_eq!(
            reminders.mark_entry_sent(&r.id, 3, now).unwrap(),
            MarkOutcome::MissingEntry
        );
        assert_eq!(
            reminders.mark_entry_sent(&ReminderId::from("gone"), 0, now).unwrap(),
            MarkOutcome::MissingReminder
        );
    }

    #[test]
    fn marking_never_overwrites_cancelled() {
        let reminders = store();
        let now = now_millis();
        let r = reminders
            .create(&UserId::new(), "msg", essay(now + Duration::hours(48)))
            .unwrap();
        reminders.replace_schedule(&r.id, &two_entries(now), r.version).unwrap();
        reminders.cancel(&r.id).unwrap();

        assert_eq!(
            reminders.mark_entry_sent(&r.id, 0, now).unwrap(),
            MarkOutcome::Cancelled
        );
        let stored = reminders.get(&r.id).unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Cancelled);
        assert!(!stored.scheduled_reminders[0].sent);
    }

    #[test]
    fn cancel_for_user_matches_suffix_of_own_reminders_only() {
        let reminders = store();
        let now = now_millis();
        let alice = UserId::new();
        let bob = UserId::new();
        let mine = reminders
            .create(&alice, "msg", essay(now + Duration::hours(48)))
            .unwrap();

        assert!(reminders.cancel_for_user(&bob, mine.id.short()).unwrap().is_none());
        assert!(reminders.cancel_for_user(&alice, "").unwrap().is_none());

        let cancelled = reminders.cancel_for_user(&alice, mine.id.short()).unwrap().unwrap();
        assert_eq!(cancelled.id, mine.id);
        assert_eq!(cancelled.status, ReminderStatus::Cancelled);
        // Already cancelled reminders are not candidates any more.
        assert!(reminders.cancel_for_user(&alice, mine.id.short()).unwrap().is_none());
    }

    #[test]
    fn active_listing_skips_past_and_cancelled() {
        let reminders = store();
        let now = now_millis();
        let user = UserId::new();
        let later = reminders.create(&user, "a", essay(now + Duration::hours(72))).unwrap();
        let sooner = reminders.create(&user, "b", essay(now + Duration::hours(2))).unwrap();
        reminders.create(&user, "c", essay(now - Duration::hours(1))).unwrap();
        let gone = reminders.create(&user, "d", essay(now + Duration::hours(5))).unwrap();
        reminders.cancel(&gone.id).unwrap();

        let ids: Vec<_> = reminders
            .find_active_for_user(&user, now)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![sooner.id, later.id]);
    }

    #[test]
    fn unscheduled_query_only_returns_empty_future_pending() {
        let reminders = store();
        let now = now_millis();
        let user = UserId::new();
        let bare = reminders.create(&user, "a", essay(now + Duration::hours(48))).unwrap();
        let scheduled = reminders.create(&user, "b", essay(now + Duration::hours(48))).unwrap();
        reminders
            .replace_schedule(&scheduled.id, &two_entries(now), scheduled.version)
            .unwrap();
        reminders.create(&user, "c", essay(now - Duration::hours(1))).unwrap();
        let cancelled = reminders.create(&user, "d", essay(now + Duration::hours(48))).unwrap();
        reminders.cancel(&cancelled.id).unwrap();

        let found = reminders.find_unscheduled(now).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, bare.id);
    }

    #[test]
    fn unsent_entries_exclude_sent_and_cancelled() {
        let reminders = store();
        let now = now_millis();
        let user = UserId::new();
        let r = reminders.create(&user, "a", essay(now + Duration::hours(48))).unwrap();
        reminders.replace_schedule(&r.id, &two_entries(now), r.version).unwrap();
        reminders.mark_entry_sent(&r.id, 0, now).unwrap();
        let c = reminders.create(&user, "b", essay(now + Duration::hours(48))).unwrap();
        reminders.replace_schedule(&c.id, &two_entries(now), c.version).unwrap();
        reminders.cancel(&c.id).unwrap();

        let entries = reminders.find_unsent_entries(now).unwrap();
        assert_eq!(
            entries,
            vec![PendingEntry {
                reminder_id: r.id,
                index: 1,
                scheduled_for: now + Duration::hours(47),
            }]
        );
    }
}
