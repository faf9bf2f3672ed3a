use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{types::Type, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use whispr_core::time::{format_ts, now_millis, parse_ts};

use crate::{
    backoff::retry_at,
    db::init_db,
    error::{QueueError, Result},
    types::{Backoff, Job, JobOptions, JobStatus, QueueCounts},
};

const JOB_COLUMNS: &str = "id, queue, dedup_key, payload, status, run_at, attempts,
                           max_attempts, backoff, last_error, created_at, updated_at";

/// Shared handle onto the durable delay queue.
///
/// Cheap to clone; every clone talks to the same connection. Producers use
/// [`DelayQueue::enqueue`]; the [`crate::QueueEngine`] uses the claim/complete/fail
/// methods to drive execution.
#[derive(Clone)]
pub struct DelayQueue {
    conn: Arc<Mutex<Connection>>,
}

impl DelayQueue {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        init_db(&*conn.lock().map_err(|_| QueueError::LockPoisoned)?)?;
        Ok(Self { conn })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| QueueError::LockPoisoned)
    }

    /// Add a job that becomes eligible `opts.delay` from now.
    pub fn enqueue<T: Serialize>(&self, queue: &str, payload: &T, opts: JobOptions) -> Result<Job> {
        self.enqueue_at(queue, payload, opts, now_millis())
    }

    /// Add a job relative to an explicit `now`.
    ///
    /// When `opts.key` is already present the existing job is returned and
    /// nothing is inserted.
    #[instrument(skip(self, payload, opts, now), fields(key = ?opts.key))]
    pub fn enqueue_at<T: Serialize>(
        &self,
        queue: &str,
        payload: &T,
        opts: JobOptions,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let payload = serde_json::to_string(payload)?;
        let backoff_json = serde_json::to_string(&opts.backoff)?;
        let delay = opts.delay.max(Duration::zero());
        let run_at = now + delay;
        let max_attempts = opts.max_attempts.max(1);
        let id = Uuid::now_v7().to_string();
        let now_str = format_ts(now);

        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO delay_jobs
             (id, queue, dedup_key, payload, status, run_at, attempts,
              max_attempts, backoff, last_error, created_at, updated_at)
             VALUES (?1,?2,?3,?4,'pending',?5,0,?6,?7,NULL,?8,?8)",
            rusqlite::params![
                id,
                queue,
                opts.key,
                payload,
                format_ts(run_at),
                max_attempts,
                backoff_json,
                now_str
            ],
        )?;

        if inserted == 0 {
            if let Some(key) = opts.key.as_deref() {
                if let Some(existing) = find_by_key(&conn, key)? {
                    debug!(job_id = %existing.id, "job with this key already queued");
                    return Ok(existing);
                }
            }
            return Err(QueueError::JobNotFound { id });
        }

        info!(job_id = %id, run_at = %format_ts(run_at), max_attempts, "job enqueued");

        Ok(Job {
            id,
            queue: queue.to_string(),
            key: opts.key,
            payload,
            status: JobStatus::Pending,
            run_at,
            attempts: 0,
            max_attempts,
            backoff: opts.backoff,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {JOB_COLUMNS} FROM delay_jobs WHERE id = ?1");
        Ok(conn.query_row(&sql, [id], row_to_job).optional()?)
    }

    pub fn find_by_key(&self, key: &str) -> Result<Option<Job>> {
        find_by_key(&*self.lock()?, key)
    }

    /// All jobs of a queue lane, oldest first.
    pub fn list(&self, queue: &str) -> Result<Vec<Job>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM delay_jobs WHERE queue = ?1 ORDER BY created_at, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map([queue], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub fn counts(&self, queue: &str) -> Result<QueueCounts> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM delay_jobs WHERE queue = ?1 GROUP BY status")?;
        let rows = stmt.query_map([queue], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let (status, n) = row?;
            let n = u64::try_from(n).unwrap_or(0);
            match status.parse::<JobStatus>() {
                Ok(JobStatus::Pending) => counts.pending = n,
                Ok(JobStatus::Running) => counts.running = n,
                Ok(JobStatus::Completed) => counts.completed = n,
                Ok(JobStatus::Failed) => counts.failed = n,
                Err(e) => warn!("ignoring unknown status in counts: {e}"),
            }
        }
        Ok(counts)
    }

    /// Delete completed and failed jobs last touched before `older_than`.
    ///
    /// Keyed jobs are removed too, which re-opens their key for enqueueing.
    pub fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let n = conn.execute(
            "DELETE FROM delay_jobs
             WHERE status IN ('completed', 'failed') AND updated_at < ?1",
            [format_ts(older_than)],
        )?;
        if n > 0 {
            info!(count = n, "finished jobs purged");
        }
        Ok(n)
    }

    // --- engine-facing operations ------------------------------------------

    /// Atomically move up to `limit` due jobs from `pending` to `running`,
    /// counting the attempt.
    pub(crate) fn claim_due(&self, queue: &str, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now_str = format_ts(now);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut jobs = {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM delay_jobs
                 WHERE queue = ?1 AND status = 'pending' AND run_at <= ?2
                 ORDER BY run_at, id
                 LIMIT ?3"
            );
            let mut stmt = tx.prepare_cached(&sql)?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = stmt
                .query_map(rusqlite::params![queue, now_str, limit], row_to_job)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        for job in &mut jobs {
            tx.execute(
                "UPDATE delay_jobs SET status = 'running', attempts = attempts + 1, updated_at = ?1
                 WHERE id = ?2",
                rusqlite::params![now_str, job.id],
            )?;
            job.status = JobStatus::Running;
            job.attempts += 1;
            job.updated_at = now;
        }
        tx.commit()?;
        Ok(jobs)
    }

    pub(crate) fn complete(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE delay_jobs SET status = 'completed', updated_at = ?1 WHERE id = ?2",
            rusqlite::params![format_ts(now), id],
        )?;
        if n == 0 {
            return Err(QueueError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Record a failed attempt: schedule a retry when budget remains,
    /// otherwise abandon the job. Returns the job's new status.
    pub(crate) fn fail(&self, job: &Job, error: &str, now: DateTime<Utc>) -> Result<JobStatus> {
        let conn = self.lock()?;
        let now_str = format_ts(now);

        if job.attempts >= job.max_attempts {
            conn.execute(
                "UPDATE delay_jobs SET status = 'failed', last_error = ?1, updated_at = ?2
                 WHERE id = ?3",
                rusqlite::params![error, now_str, job.id],
            )?;
            return Ok(JobStatus::Failed);
        }

        let next = retry_at(&job.backoff, job.attempts, now);
        conn.execute(
            "UPDATE delay_jobs SET status = 'pending', run_at = ?1, last_error = ?2, updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![format_ts(next), error, now_str, job.id],
        )?;
        Ok(JobStatus::Pending)
    }

    /// Return jobs left `running` by a previous process to `pending` so they
    /// are attempted again.
    pub(crate) fn recover_stale(&self, queue: &str, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE delay_jobs SET status = 'pending', updated_at = ?1
             WHERE queue = ?2 AND status = 'running'",
            rusqlite::params![format_ts(now), queue],
        )?;
        Ok(n)
    }
}

fn find_by_key(conn: &Connection, key: &str) -> Result<Option<Job>> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM delay_jobs WHERE dedup_key = ?1");
    Ok(conn.query_row(&sql, [key], row_to_job).optional()?)
}

/// Map a row selected with `JOB_COLUMNS` to a [`Job`].
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let status = row
        .get::<_, String>(4)?
        .parse::<JobStatus>()
        .map_err(|e| conversion(4, e))?;
    let backoff: Backoff =
        serde_json::from_str(&row.get::<_, String>(8)?).map_err(|e| conversion(8, e))?;

    Ok(Job {
        id: row.get(0)?,
        queue: row.get(1)?,
        key: row.get(2)?,
        payload: row.get(3)?,
        status,
        run_at: timestamp(row, 5)?,
        attempts: row.get(6)?,
        max_attempts: row.get(7)?,
        backoff,
        last_error: row.get(9)?,
        created_at: timestamp(row, 10)?,
        updated_at: timestamp(row, 11)?,
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
