// 🧩 Fee Record Backfill
//
// Every registrar-cleared student without a ledger row gets one zero-valued
// StudentFee for their school year. Rows are created one at a time so a
// failing student never blocks the rest of the batch.

use crate::config::LedgerConfig;
use crate::db::{record_event, Event};
use crate::entities::student::{self, StudentFilter};
use crate::entities::student_fee;
use crate::errors::{Result, RowFailure};
use crate::lock::LedgerLock;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

pub const JOB_NAME: &str = "backfill";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackfillOutcome {
    /// No cleared student was missing a ledger row
    NothingToDo,
    Completed(BackfillReport),
}

impl BackfillOutcome {
    pub fn created_count(&self) -> usize {
        match self {
            BackfillOutcome::NothingToDo => 0,
            BackfillOutcome::Completed(report) => report.created.len(),
        }
    }

    pub fn summary(&self) -> String {
        match self {
            BackfillOutcome::NothingToDo => {
                "No cleared students without fee records found".to_string()
            }
            BackfillOutcome::Completed(report) => report.summary(),
        }
    }

    pub fn has_failures(&self) -> bool {
        matches!(self, BackfillOutcome::Completed(report) if report.has_failures())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub run_id: String,
    pub candidates: usize,
    /// (student_id, school_year) rows created by this run
    pub created: Vec<(i64, String)>,
    /// Another writer created the row between selection and insert
    pub already_present: usize,
    /// Students with no school year; nothing can be keyed for them
    pub missing_school_year: Vec<i64>,
    pub failures: Vec<RowFailure>,
}

impl BackfillReport {
    pub fn summary(&self) -> String {
        format!(
            "Created {} fee records from {} candidates ({} already present, {} missing school year, {} failed)",
            self.created.len(),
            self.candidates,
            self.already_present,
            self.missing_school_year.len(),
            self.failures.len()
        )
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Create missing ledger rows for registrar-cleared students
pub fn run_backfill(conn: &Connection, config: &LedgerConfig) -> Result<BackfillOutcome> {
    let lock = LedgerLock::acquire(conn, JOB_NAME, config.lock_stale_after_secs)?;

    let candidates = student::find_students(conn, &StudentFilter::cleared_without_fee_record())?;
    if candidates.is_empty() {
        tracing::info!("backfill: nothing to do");
        return Ok(BackfillOutcome::NothingToDo);
    }

    tracing::info!(candidates = candidates.len(), "backfill: starting");

    let mut report = BackfillReport {
        run_id: lock.run_id().to_string(),
        candidates: candidates.len(),
        created: Vec::new(),
        already_present: 0,
        missing_school_year: Vec::new(),
        failures: Vec::new(),
    };

    for candidate in &candidates {
        let Some(year) = candidate.school_year() else {
            tracing::warn!(
                student_id = candidate.id,
                "backfill: student has no school year, skipped"
            );
            report.missing_school_year.push(candidate.id);
            continue;
        };

        match student_fee::create_if_absent(conn, candidate.id, year) {
            Ok(true) => {
                tracing::debug!(student_id = candidate.id, school_year = year, "fee record created");
                record_event(
                    conn,
                    Event::new(
                        "fee_record_created",
                        "student",
                        &candidate.id.to_string(),
                        serde_json::json!({
                            "school_year": year,
                            "run_id": report.run_id,
                        }),
                        &config.actor,
                    ),
                );
                report.created.push((candidate.id, year.to_string()));
            }
            Ok(false) => {
                report.already_present += 1;
            }
            Err(e) => {
                tracing::warn!(
                    student_id = candidate.id,
                    school_year = year,
                    error = %e,
                    "backfill: failed to create fee record"
                );
                report.failures.push(RowFailure {
                    student_id: candidate.id,
                    school_year: Some(year.to_string()),
                    error: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        created = report.created.len(),
        already_present = report.already_present,
        missing_school_year = report.missing_school_year.len(),
        failed = report.failures.len(),
        "backfill: finished"
    );

    Ok(BackfillOutcome::Completed(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ledger_fingerprint, setup_database};
    use crate::entities::student::{set_clearance, upsert_student, EnrollmentClearance, Student};

    fn seed(conn: &Connection, id: i64, year: Option<&str>, cleared: bool) {
        upsert_student(conn, &Student::new(id, &format!("Student {}", id), year)).unwrap();
        set_clearance(
            conn,
            &EnrollmentClearance {
                student_id: id,
                registrar_clearance: cleared,
                accounting_clearance: false,
            },
        )
        .unwrap();
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_creates_zero_valued_row() {
        let conn = setup();
        seed(&conn, 1, Some("2024-2025"), true);

        let outcome = run_backfill(&conn, &LedgerConfig::default()).unwrap();

        assert_eq!(outcome.created_count(), 1);
        let fee = student_fee::get_student_fee(&conn, 1, "2024-2025")
            .unwrap()
            .unwrap();
        assert_eq!(fee.total_amount, 0.0);
        assert_eq!(fee.total_paid, 0.0);
        assert_eq!(fee.grant_discount, 0.0);
        assert_eq!(fee.balance, 0.0);
        assert_eq!(fee.charges(), [0.0; 5]);
    }

    #[test]
    fn test_nothing_to_do_is_distinct() {
        let conn = setup();
        seed(&conn, 1, Some("2024-2025"), false);

        let outcome = run_backfill(&conn, &LedgerConfig::default()).unwrap();
        assert_eq!(outcome, BackfillOutcome::NothingToDo);
        assert!(!outcome.has_failures());
    }

    #[test]
    fn test_missing_school_year_is_reported() {
        let conn = setup();
        seed(&conn, 1, None, true);
        seed(&conn, 2, Some(""), true);
        seed(&conn, 3, Some("2024-2025"), true);

        let outcome = run_backfill(&conn, &LedgerConfig::default()).unwrap();

        let BackfillOutcome::Completed(report) = outcome else {
            panic!("expected a completed backfill");
        };
        assert_eq!(report.candidates, 3);
        assert_eq!(report.created, vec![(3, "2024-2025".to_string())]);
        assert_eq!(report.missing_school_year, vec![1, 2]);
        assert_eq!(student_fee::count_student_fees(&conn).unwrap(), 1);
    }

    #[test]
    fn test_running_twice_is_idempotent() {
        let conn = setup();
        seed(&conn, 1, Some("2024-2025"), true);
        seed(&conn, 2, Some("2024-2025"), true);

        run_backfill(&conn, &LedgerConfig::default()).unwrap();
        let after_first = ledger_fingerprint(&conn).unwrap();

        let second = run_backfill(&conn, &LedgerConfig::default()).unwrap();
        let after_second = ledger_fingerprint(&conn).unwrap();

        assert_eq!(second, BackfillOutcome::NothingToDo);
        assert_eq!(after_first, after_second);
        assert_eq!(student_fee::count_student_fees(&conn).unwrap(), 2);
    }

    #[test]
    fn test_one_failing_student_does_not_abort_batch() {
        let conn = setup();
        seed(&conn, 1, Some("2024-2025"), true);
        seed(&conn, 2, Some("2024-2025"), true);
        seed(&conn, 3, Some("2024-2025"), true);
        conn.execute_batch(
            "CREATE TRIGGER block_student_two BEFORE INSERT ON student_fees
             WHEN NEW.student_id = 2
             BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
        )
        .unwrap();

        let outcome = run_backfill(&conn, &LedgerConfig::default()).unwrap();
        assert!(outcome.has_failures());

        let BackfillOutcome::Completed(report) = outcome else {
            panic!("expected a completed backfill");
        };
        assert_eq!(report.created.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].student_id, 2);
        assert!(report.has_failures());
    }

    #[test]
    fn test_row_created_concurrently_counts_as_already_present() {
        let conn = setup();
        seed(&conn, 1, Some("2024-2025"), true);
        // Another writer lands the same row just before our insert
        conn.execute_batch(
            "CREATE TRIGGER concurrent_writer BEFORE INSERT ON student_fees
             WHEN NOT EXISTS (
                 SELECT 1 FROM student_fees
                 WHERE student_id = NEW.student_id AND school_year = NEW.school_year
             )
             BEGIN
                 INSERT INTO student_fees (student_id, school_year)
                 VALUES (NEW.student_id, NEW.school_year);
             END;",
        )
        .unwrap();

        let outcome = run_backfill(&conn, &LedgerConfig::default()).unwrap();

        let BackfillOutcome::Completed(report) = outcome else {
            panic!("expected a completed backfill");
        };
        assert!(report.created.is_empty());
        assert_eq!(report.already_present, 1);
        assert!(report.failures.is_empty());
        assert_eq!(student_fee::count_student_fees(&conn).unwrap(), 1);
    }

    #[test]
    fn test_held_lock_blocks_run() {
        let conn = setup();
        seed(&conn, 1, Some("2024-2025"), true);

        let _held = LedgerLock::acquire(&conn, "recalculate", 3600).unwrap();
        let result = run_backfill(&conn, &LedgerConfig::default());

        assert!(matches!(
            result,
            Err(crate::errors::LedgerError::JobInProgress { .. })
        ));
        assert_eq!(student_fee::count_student_fees(&conn).unwrap(), 0);
    }
}
