use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rusqlite::{types::Type, Connection, OptionalExtension};
use tracing::{info, instrument};
use whispr_core::{
    time::{format_ts, now_millis, parse_ts},
    types::UserId,
};

use crate::{
    db::init_db,
    error::{ReminderError, Result},
    scheduler::MAX_OFFSET_HOURS,
    types::{QuietHours, User},
};

const USER_COLUMNS: &str = "id, phone_number, name, timezone, reminder_timing,
                            quiet_start, quiet_end, is_active, created_at, last_active";

/// SQLite-backed user records.
pub struct UserStore {
    conn: Arc<Mutex<Connection>>,
}

impl UserStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        init_db(&*conn.lock().map_err(|_| ReminderError::LockPoisoned)?)?;
        Ok(Self { conn })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ReminderError::LockPoisoned)
    }

    pub fn get(&self, id: &UserId) -> Result<Option<User>> {
        let conn = self.lock()?;
        get_by(&conn, "id", id.as_str())
    }

    pub fn find_by_phone(&self, phone_number: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        get_by(&conn, "phone_number", phone_number)
    }

    /// Look up the user behind a contact address, creating them with default
    /// preferences on first contact. The flag is `true` when the user was
    /// just created.
    #[instrument(skip(self))]
    pub fn get_or_create(&self, phone_number: &str) -> Result<(User, bool)> {
        let conn = self.lock()?;
        if let Some(user) = get_by(&conn, "phone_number", phone_number)? {
            return Ok((user, false));
        }

        let user = User::new(phone_number, now_millis());
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users
             (id, phone_number, name, timezone, reminder_timing,
              quiet_start, quiet_end, is_active, created_at, last_active)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?9)",
            rusqlite::params![
                user.id.as_str(),
                user.phone_number,
                user.name,
                user.timezone,
                serde_json::to_string(&user.reminder_timing)?,
                user.quiet_hours.start,
                user.quiet_hours.end,
                user.is_active,
                format_ts(user.created_at),
            ],
        )?;
        if inserted == 0 {
            // Another connection created the same contact in between.
            let existing = get_by(&conn, "phone_number", phone_number)?.ok_or_else(|| {
                ReminderError::UserNotFound {
                    id: phone_number.to_string(),
                }
            })?;
            return Ok((existing, false));
        }

        info!(user_id = %user.id, "new user created");
        Ok((user, true))
    }

    /// Record an inbound interaction.
    pub fn touch(&self, id: &UserId) -> Result<()> {
        self.update(id, "last_active", format_ts(now_millis()))
    }

    pub fn set_active(&self, id: &UserId, active: bool) -> Result<()> {
        self.update(id, "is_active", active)
    }

    pub fn set_reminder_timing(&self, id: &UserId, offsets: &[u32]) -> Result<()> {
        if let Some(&hours) = offsets.iter().find(|&&h| h > MAX_OFFSET_HOURS) {
            return Err(ReminderError::InvalidOffset(hours));
        }
        self.update(id, "reminder_timing", serde_json::to_string(offsets)?)
    }

    pub fn set_timezone(&self, id: &UserId, timezone: &str) -> Result<()> {
        timezone
            .parse::<Tz>()
            .map_err(|_| ReminderError::InvalidTimezone(timezone.to_string()))?;
        self.update(id, "timezone", timezone)
    }

    pub fn set_quiet_hours(&self, id: &UserId, quiet: QuietHours) -> Result<()> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE users SET quiet_start = ?1, quiet_end = ?2 WHERE id = ?3",
            rusqlite::params![quiet.start % 24, quiet.end % 24, id.as_str()],
        )?;
        not_found_if_zero(n, id)
    }

    // --- private helpers ---------------------------------------------------

    /// Single-column update; `column` is always a literal from this module.
    fn update<V: rusqlite::ToSql>(&self, id: &UserId, column: &str, value: V) -> Result<()> {
        let conn = self.lock()?;
        let sql = format!("UPDATE users SET {column} = ?1 WHERE id = ?2");
        let n = conn.execute(&sql, rusqlite::params![value, id.as_str()])?;
        not_found_if_zero(n, id)
    }
}

fn not_found_if_zero(n: usize, id: &UserId) -> Result<()> {
    if n == 0 {
        return Err(ReminderError::UserNotFound {
            id: id.to_string(),
        });
    }
    Ok(())
}

fn get_by(conn: &Connection, column: &str, value: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1");
    Ok(conn.query_row(&sql, [value], row_to_user).optional()?)
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let reminder_timing: Vec<u32> = serde_json::from_str(&row.get::<_, String>(4)?)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?;
    Ok(User {
        id: UserId::from(row.get::<_, String>(0)?),
        phone_number: row.get(1)?,
        name: row.get(2)?,
        timezone: row.get(3)?,
        reminder_timing,
        quiet_hours: QuietHours {
            start: row.get(5)?,
            end: row.get(6)?,
        },
        is_active: row.get(7)?,
        created_at: timestamp(row, 8)?,
        last_active: timestamp(row, 9)?,
    })
}

fn timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_ts(&row.get::<_, String>(idx)?)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> UserStore {
        let conn = Connection::open_in_memory().unwrap();
        UserStore::new(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn first_contact_creates_user_once() {
        let users = store();
        let (created, is_new) = users.get_or_create("whatsapp:+2348000000001").unwrap();
        assert!(is_new);
        let (again, is_new) = users.get_or_create("whatsapp:+2348000000001").unwrap();
        assert!(!is_new);
        assert_eq!(created.id, again.id);
        assert_eq!(again.reminder_timing, vec![24, 1]);
        assert_eq!(again.timezone, "Africa/Lagos");
    }

    #[test]
    fn preferences_are_persisted() {
        let users = store();
        let (user, _) = users.get_or_create("+1").unwrap();
        users.set_reminder_timing(&user.id, &[48, 24, 0]).unwrap();
        users.set_active(&user.id, false).unwrap();
        users.set_timezone(&user.id, "Europe/London").unwrap();
        users
            .set_quiet_hours(&user.id, QuietHours { start: 23, end: 6 })
            .unwrap();

        let stored = users.find_by_phone("+1").unwrap().unwrap();
        assert_eq!(stored.reminder_timing, vec![48, 24, 0]);
        assert!(!stored.is_active);
        assert_eq!(stored.timezone, "Europe/London");
        assert_eq!(stored.quiet_hours, QuietHours { start: 23, end: 6 });
    }

    #[test]
    fn invalid_timezone_is_rejected() {
        let users = store();
        let (user, _) = users.get_or_create("+1").unwrap();
        assert!(matches!(
            users.set_timezone(&user.id, "Nowhere/Land"),
            Err(ReminderError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn oversized_offsets_are_rejected() {
        let users = store();
        let (user, _) = users.get_or_create("+1").unwrap();
        assert!(matches!(
            users.set_reminder_timing(&user.id, &[u32::MAX, 1]),
            Err(ReminderError::InvalidOffset(u32::MAX))
        ));
        users.set_reminder_timing(&user.id, &[MAX_OFFSET_HOURS]).unwrap();
        assert_eq!(users.get(&user.id).unwrap().unwrap().reminder_timing, vec![MAX_OFFSET_HOURS]);
    }

    #[test]
    fn updates_on_unknown_user_fail() {
        let users = store();
        assert!(matches!(
            users.touch(&UserId::from("missing")),
            Err(ReminderError::UserNotFound { .. })
        ));
    }
}
