// 🔒 Ledger lock - one mutating job at a time
//
// Backfill, recalculation and grant sync all take the same named lock row
// before touching `student_fees`. The row is inserted under a unique key,
// so a second process loses the race cleanly and changes nothing.

use crate::errors::{LedgerError, Result};
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

pub const LEDGER_LOCK: &str = "student_fee_ledger";

/// Held lock; released on drop
#[derive(Debug)]
pub struct LedgerLock<'conn> {
    conn: &'conn Connection,
    run_id: String,
    job: String,
}

impl<'conn> LedgerLock<'conn> {
    /// Take the ledger lock for `job`, reclaiming it if older than `stale_after_secs`
    pub fn acquire(conn: &'conn Connection, job: &str, stale_after_secs: i64) -> Result<Self> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        let reclaimed = conn.execute(
            "DELETE FROM job_locks WHERE name = ?1 AND acquired_at < ?2",
            params![LEDGER_LOCK, now - stale_after_secs],
        )?;
        if reclaimed > 0 {
            tracing::warn!(job, "reclaimed stale ledger lock");
        }

        let inserted = conn.execute(
            "INSERT INTO job_locks (name, run_id, job, acquired_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO NOTHING",
            params![LEDGER_LOCK, run_id, job, now],
        )?;

        if inserted == 0 {
            let holder: Option<(String, i64)> = conn
                .query_row(
                    "SELECT job, acquired_at FROM job_locks WHERE name = ?1",
                    [LEDGER_LOCK],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (held_by, acquired_at) = holder.unwrap_or_else(|| ("unknown".to_string(), now));
            let started_at = Utc
                .timestamp_opt(acquired_at, 0)
                .single()
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| acquired_at.to_string());

            tracing::warn!(job, held_by = %held_by, "ledger lock busy");
            return Err(LedgerError::JobInProgress {
                job: held_by,
                started_at,
            });
        }

        tracing::debug!(job, run_id = %run_id, "ledger lock acquired");
        Ok(LedgerLock {
            conn,
            run_id,
            job: job.to_string(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl Drop for LedgerLock<'_> {
    fn drop(&mut self) {
        let released = self.conn.execute(
            "DELETE FROM job_locks WHERE name = ?1 AND run_id = ?2",
            params![LEDGER_LOCK, self.run_id],
        );
        if let Err(e) = released {
            tracing::warn!(job = %self.job, error = %e, "failed to release ledger lock");
        }
    }
}

/// Whether any job currently holds the ledger lock
pub fn is_locked(conn: &Connection) -> Result<bool> {
    let held: i64 = conn.query_row(
        "SELECT COUNT(*) FROM job_locks WHERE name = ?1",
        [LEDGER_LOCK],
        |row| row.get(0),
    )?;
    Ok(held > 0)
}
