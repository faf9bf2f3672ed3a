use rusqlite::Connection;

/// Initialise the user and reminder tables. Idempotent.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    create_users_table(conn)?;
    create_reminders_table(conn)?;
    create_schedule_table(conn)?;
    Ok(())
}

fn create_users_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id              TEXT    NOT NULL PRIMARY KEY,
            phone_number    TEXT    NOT NULL UNIQUE,
            name            TEXT,
            timezone        TEXT    NOT NULL,
            reminder_timing TEXT    NOT NULL,          -- JSON array of hour offsets
            quiet_start     INTEGER NOT NULL,
            quiet_end       INTEGER NOT NULL,
            is_active       INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT    NOT NULL,
            last_active     TEXT    NOT NULL
        ) STRICT;",
    )
}

fn create_reminders_table(conn: &Connection) -> rusqlite::Result<()> {
    // `version` is bumped on every write; schedule replacement compares it.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS reminders (
            id               TEXT    NOT NULL PRIMARY KEY,
            user_id          TEXT    NOT NULL,
            original_message TEXT    NOT NULL,
            task             TEXT    NOT NULL,
            course           TEXT,
            kind             TEXT    NOT NULL DEFAULT 'other',
            deadline         TEXT,
            location         TEXT,
            notes            TEXT,
            status           TEXT    NOT NULL DEFAULT 'pending',
            version          INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_reminders_user ON reminders (user_id, status);
        CREATE INDEX IF NOT EXISTS idx_reminders_due ON reminders (status, deadline);",
    )
}

fn create_schedule_table(conn: &Connection) -> rusqlite::Result<()> {
    // One row per schedule entry. (reminder_id, idx) is what a queued job
    // points at, so rows are only ever inserted as a whole list or marked.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS reminder_schedule (
            reminder_id   TEXT    NOT NULL,
            idx           INTEGER NOT NULL,
            scheduled_for TEXT    NOT NULL,
            sent          INTEGER NOT NULL DEFAULT 0,
            sent_at       TEXT,
            PRIMARY KEY (reminder_id, idx)
        ) STRICT;",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('users', 'reminders', 'reminder_schedule')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }
}
