use crate::errors::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Event for audit trail: every ledger mutation leaves one behind
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Open (or create) the ledger database and make sure the schema exists
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Students + enrollment clearance
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            grade_level TEXT,
            school_year TEXT,
            enrollment_status TEXT NOT NULL DEFAULT 'not-enrolled',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollment_clearances (
            student_id INTEGER PRIMARY KEY,
            registrar_clearance INTEGER NOT NULL DEFAULT 0,
            accounting_clearance INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
        )",
        [],
    )?;

    // ==========================================================================
    // Fee items (assignment rules)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_items (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            amount REAL NOT NULL CHECK (amount >= 0),
            is_active INTEGER NOT NULL DEFAULT 1,
            school_year TEXT,
            grade_level TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Student fee ledger - one row per (student, school year)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_fees (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            school_year TEXT NOT NULL,
            registration_fee REAL NOT NULL DEFAULT 0,
            tuition_fee REAL NOT NULL DEFAULT 0,
            misc_fee REAL NOT NULL DEFAULT 0,
            books_fee REAL NOT NULL DEFAULT 0,
            other_fees REAL NOT NULL DEFAULT 0,
            total_amount REAL NOT NULL DEFAULT 0,
            total_paid REAL NOT NULL DEFAULT 0,
            balance REAL NOT NULL DEFAULT 0,
            grant_discount REAL NOT NULL DEFAULT 0,
            updated_at TEXT,
            UNIQUE(student_id, school_year),
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
        )",
        [],
    )?;

    // ==========================================================================
    // Grant recipients (read-only for the ledger jobs)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grant_recipients (
            id INTEGER PRIMARY KEY,
            student_id INTEGER NOT NULL,
            school_year TEXT NOT NULL,
            status TEXT NOT NULL,
            discount_amount REAL NOT NULL DEFAULT 0,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
        )",
        [],
    )?;

    // ==========================================================================
    // Job locks (serializes ledger mutation across processes)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS job_locks (
            name TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            job TEXT NOT NULL,
            acquired_at INTEGER NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_fees_student ON student_fees(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grants_student_year ON grant_recipients(student_id, school_year, status)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Record an event, logging instead of failing the caller
///
/// Audit-trail writes never abort a ledger job.
pub fn record_event(conn: &Connection, event: Event) {
    if let Err(e) = insert_event(conn, &event) {
        tracing::warn!(
            event_type = %event.event_type,
            entity_id = %event.entity_id,
            error = %e,
            "failed to write audit event"
        );
    }
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}

#[cfg(test)]
pub(crate) fn count_events(conn: &Connection, event_type: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM events WHERE event_type = ?1",
        [event_type],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// SHA-256 over the ordered ledger contents
///
/// Amounts are rendered to cents so float noise below a cent does not
/// change the digest. `id` and `updated_at` are excluded.
pub fn ledger_fingerprint(conn: &Connection) -> Result<String> {
    let mut stmt = conn.prepare(
        "SELECT student_id, school_year, registration_fee, tuition_fee, misc_fee,
                books_fee, other_fees, total_amount, total_paid, balance, grant_discount
         FROM student_fees
         ORDER BY student_id, school_year",
    )?;

    let mut hasher = Sha256::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let student_id: i64 = row.get(0)?;
        let school_year: String = row.get(1)?;
        hasher.update(format!("{}|{}", student_id, school_year));
        for idx in 2..=10 {
            let amount: f64 = row.get(idx)?;
            hasher.update(format!("|{:.2}", amount));
        }
        hasher.update("\n");
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('students', 'enrollment_clearances', 'fee_items',
                              'student_fees', 'grant_recipients', 'job_locks', 'events')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 7);
    }

    #[test]
    fn test_event_log() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let event = Event::new(
            "fee_record_created",
            "student",
            "42",
            serde_json::json!({"school_year": "2024-2025"}),
            "test_actor",
        );

        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "student", "42").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "fee_record_created");
        assert_eq!(events[0].actor, "test_actor");
        assert_eq!(events[0].data["school_year"], "2024-2025");
        assert_eq!(count_events(&conn, "fee_record_created").unwrap(), 1);
    }

    #[test]
    fn test_fingerprint_of_empty_ledger_is_stable() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let first = ledger_fingerprint(&conn).unwrap();
        let second = ledger_fingerprint(&conn).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 64, "SHA-256 hash should be 64 hex characters");
    }

    #[test]
    fn test_fingerprint_changes_with_ledger() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn.execute("INSERT INTO students (id, name) VALUES (1, 'Ana')", [])
            .unwrap();

        let before = ledger_fingerprint(&conn).unwrap();
        conn.execute(
            "INSERT INTO student_fees (student_id, school_year) VALUES (1, '2024-2025')",
            [],
        )
        .unwrap();
        let after = ledger_fingerprint(&conn).unwrap();

        assert_ne!(before, after);
    }
}
