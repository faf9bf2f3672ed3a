use rusqlite::Connection;

use crate::error::Result;

/// Initialise the delay-queue schema in `conn`.
///
/// Creates the `delay_jobs` table (idempotent) and an index matching the
/// polling query so claiming due jobs stays cheap as the table grows.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS delay_jobs (
            id            TEXT    NOT NULL PRIMARY KEY,
            queue         TEXT    NOT NULL,
            dedup_key     TEXT    UNIQUE,       -- NULL allowed for un-keyed jobs
            payload       TEXT    NOT NULL,     -- opaque JSON payload
            status        TEXT    NOT NULL DEFAULT 'pending',
            run_at        TEXT    NOT NULL,     -- eligible at or after this instant
            attempts      INTEGER NOT NULL DEFAULT 0,
            max_attempts  INTEGER NOT NULL,
            backoff       TEXT    NOT NULL,     -- JSON-encoded Backoff enum
            last_error    TEXT,
            created_at    TEXT    NOT NULL,
            updated_at    TEXT    NOT NULL
        ) STRICT;

        -- Efficient polling: WHERE queue = ? AND status = 'pending' AND run_at <= ?
        CREATE INDEX IF NOT EXISTS idx_delay_jobs_due ON delay_jobs (queue, status, run_at);
        ",
    )?;
    Ok(())
}
