// 🎁 Grant Discount Sync
//
// For every (student, school year) with active grants:
//   grant_discount = SUM(active discount_amount)
//   balance        = total_amount - total_paid - grant_discount
//
// Pairs with no ledger row are skipped (backfill/recalculation create rows).
// Rows are updated one at a time; a failing row is reported, not fatal.

use crate::config::LedgerConfig;
use crate::db::{record_event, Event};
use crate::entities::grant;
use crate::entities::student_fee;
use crate::errors::{Result, RowFailure};
use crate::lock::LedgerLock;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

pub const JOB_NAME: &str = "sync-grants";

/// Discounts this close are treated as unchanged
const DISCOUNT_EPSILON: f64 = 0.005;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantUpdate {
    pub student_id: i64,
    pub school_year: String,
    pub previous_discount: f64,
    pub grant_discount: f64,
    pub balance: f64,
}

impl GrantUpdate {
    pub fn changed(&self) -> bool {
        (self.previous_discount - self.grant_discount).abs() >= DISCOUNT_EPSILON
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantSyncReport {
    pub run_id: String,
    /// Distinct (student, year) pairs with active grants
    pub pairs: usize,
    pub updated: Vec<GrantUpdate>,
    /// Pairs with active grants but no ledger row yet
    pub missing_fee_rows: Vec<(i64, String)>,
    /// Rows whose discount was reset because no active grant backs it
    pub cleared_stale: Vec<GrantUpdate>,
    pub failures: Vec<RowFailure>,
}

impl GrantSyncReport {
    pub fn changed_count(&self) -> usize {
        self.updated.iter().filter(|u| u.changed()).count() + self.cleared_stale.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "Synced {} of {} grant pairs ({} changed, {} without fee record, {} stale cleared, {} failed)",
            self.updated.len(),
            self.pairs,
            self.changed_count(),
            self.missing_fee_rows.len(),
            self.cleared_stale.len(),
            self.failures.len()
        )
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Push active grant totals into the ledger
pub fn run_grant_sync(conn: &Connection, config: &LedgerConfig) -> Result<GrantSyncReport> {
    let lock = LedgerLock::acquire(conn, JOB_NAME, config.lock_stale_after_secs)?;

    let totals = grant::active_grant_totals(conn)?;
    tracing::info!(pairs = totals.len(), "grant sync: starting");

    let mut report = GrantSyncReport {
        run_id: lock.run_id().to_string(),
        pairs: totals.len(),
        updated: Vec::new(),
        missing_fee_rows: Vec::new(),
        cleared_stale: Vec::new(),
        failures: Vec::new(),
    };

    for total in &totals {
        match apply_discount(conn, total.student_id, &total.school_year, total.total_discount) {
            Ok(Some(update)) => {
                if update.changed() {
                    record_discount_event(conn, config, &report.run_id, &update);
                }
                tracing::debug!(
                    student_id = update.student_id,
                    school_year = %update.school_year,
                    grant_discount = update.grant_discount,
                    "grant discount synced"
                );
                report.updated.push(update);
            }
            Ok(None) => {
                report
                    .missing_fee_rows
                    .push((total.student_id, total.school_year.clone()));
            }
            Err(e) => {
                tracing::warn!(
                    student_id = total.student_id,
                    school_year = %total.school_year,
                    error = %e,
                    "grant sync: failed to update fee record"
                );
                report.failures.push(RowFailure {
                    student_id: total.student_id,
                    school_year: Some(total.school_year.clone()),
                    error: e.to_string(),
                });
            }
        }
    }

    if config.clear_stale_discounts {
        clear_stale_discounts(conn, config, &mut report)?;
    }

    tracing::info!(
        updated = report.updated.len(),
        changed = report.changed_count(),
        missing = report.missing_fee_rows.len(),
        failed = report.failures.len(),
        "grant sync: finished"
    );

    Ok(report)
}

fn apply_discount(
    conn: &Connection,
    student_id: i64,
    school_year: &str,
    discount: f64,
) -> Result<Option<GrantUpdate>> {
    let Some(before) = student_fee::get_student_fee(conn, student_id, school_year)? else {
        return Ok(None);
    };

    if !student_fee::set_grant_discount(conn, student_id, school_year, discount)? {
        // Row vanished between read and write
        return Ok(None);
    }

    Ok(Some(GrantUpdate {
        student_id,
        school_year: school_year.to_string(),
        previous_discount: before.grant_discount,
        grant_discount: discount,
        balance: before.total_amount - before.total_paid - discount,
    }))
}

/// Reset discounts that no active grant backs anymore
fn clear_stale_discounts(
    conn: &Connection,
    config: &LedgerConfig,
    report: &mut GrantSyncReport,
) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT f.student_id, f.school_year
         FROM student_fees f
         WHERE f.grant_discount <> 0
           AND NOT EXISTS (
               SELECT 1 FROM grant_recipients g
               WHERE g.student_id = f.student_id
                 AND g.school_year = f.school_year
                 AND g.status = 'active'
           )
         ORDER BY f.student_id, f.school_year",
    )?;
    let stale: Vec<(i64, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (student_id, school_year) in stale {
        match apply_discount(conn, student_id, &school_year, 0.0) {
            Ok(Some(update)) => {
                record_discount_event(conn, config, &report.run_id, &update);
                report.cleared_stale.push(update);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(student_id, school_year = %school_year, error = %e, "grant sync: failed to clear stale discount");
                report.failures.push(RowFailure {
                    student_id,
                    school_year: Some(school_year),
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(())
}

fn record_discount_event(conn: &Connection, config: &LedgerConfig, run_id: &str, update: &GrantUpdate) {
    record_event(
        conn,
        Event::new(
            "grant_discount_synced",
            "student",
            &update.student_id.to_string(),
            serde_json::json!({
                "school_year": update.school_year,
                "previous_discount": update.previous_discount,
                "grant_discount": update.grant_discount,
                "balance": update.balance,
                "run_id": run_id,
            }),
            &config.actor,
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_events, ledger_fingerprint, setup_database};
    use crate::entities::fee_item::FeeCategory;
    use crate::entities::grant::{upsert_grant_recipient, GrantRecipient, GrantStatus};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn.execute(
            "INSERT INTO students (id, name, school_year) VALUES
                (1, 'Ana', '2024-2025'), (2, 'Ben', '2024-2025'), (3, 'Cy', '2024-2025')",
            [],
        )
        .unwrap();
        conn
    }

    fn grant(id: i64, student_id: i64, status: GrantStatus, amount: f64) -> GrantRecipient {
        GrantRecipient {
            id,
            student_id,
            school_year: "2024-2025".to_string(),
            status,
            discount_amount: amount,
        }
    }

    fn charge(conn: &Connection, student_id: i64, amount: f64) {
        student_fee::add_charge(conn, student_id, "2024-2025", FeeCategory::Tuition, amount).unwrap();
    }

    #[test]
    fn test_single_grant_scenario() {
        let conn = setup();
        charge(&conn, 1, 5000.0);
        upsert_grant_recipient(&conn, &grant(1, 1, GrantStatus::Active, 1000.0)).unwrap();

        let report = run_grant_sync(&conn, &LedgerConfig::default()).unwrap();

        assert_eq!(report.updated.len(), 1);
        assert_eq!(report.updated[0].grant_discount, 1000.0);
        let fee = student_fee::get_student_fee(&conn, 1, "2024-2025")
            .unwrap()
            .unwrap();
        assert_eq!(fee.grant_discount, 1000.0);
        assert_eq!(fee.balance, 4000.0);
    }

    #[test]
    fn test_grants_are_summed_not_last_write() {
        let conn = setup();
        charge(&conn, 1, 5000.0);
        upsert_grant_recipient(&conn, &grant(1, 1, GrantStatus::Active, 1000.0)).unwrap();
        upsert_grant_recipient(&conn, &grant(2, 1, GrantStatus::Active, 500.0)).unwrap();
        upsert_grant_recipient(&conn, &grant(3, 1, GrantStatus::Inactive, 2000.0)).unwrap();

        run_grant_sync(&conn, &LedgerConfig::default()).unwrap();

        let fee = student_fee::get_student_fee(&conn, 1, "2024-2025")
            .unwrap()
            .unwrap();
        assert_eq!(fee.grant_discount, 1500.0);
        assert_eq!(fee.balance, 3500.0);
    }

    #[test]
    fn test_missing_fee_row_is_skipped() {
        let conn = setup();
        upsert_grant_recipient(&conn, &grant(1, 2, GrantStatus::Active, 1000.0)).unwrap();

        let report = run_grant_sync(&conn, &LedgerConfig::default()).unwrap();

        assert!(report.updated.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(report.missing_fee_rows, vec![(2, "2024-2025".to_string())]);
        assert_eq!(student_fee::count_student_fees(&conn).unwrap(), 0);
    }

    #[test]
    fn test_second_run_changes_nothing() {
        let conn = setup();
        charge(&conn, 1, 5000.0);
        charge(&conn, 2, 3000.0);
        student_fee::record_payment(&conn, 2, "2024-2025", 500.0).unwrap();
        upsert_grant_recipient(&conn, &grant(1, 1, GrantStatus::Active, 1000.0)).unwrap();
        upsert_grant_recipient(&conn, &grant(2, 2, GrantStatus::Active, 250.0)).unwrap();

        let first = run_grant_sync(&conn, &LedgerConfig::default()).unwrap();
        let after_first = ledger_fingerprint(&conn).unwrap();
        let second = run_grant_sync(&conn, &LedgerConfig::default()).unwrap();
        let after_second = ledger_fingerprint(&conn).unwrap();

        assert_eq!(first.changed_count(), 2);
        assert_eq!(second.changed_count(), 0);
        assert_eq!(after_first, after_second);
        assert_eq!(count_events(&conn, "grant_discount_synced").unwrap(), 2);
    }

    #[test]
    fn test_failing_row_does_not_abort_sync() {
        let conn = setup();
        charge(&conn, 1, 5000.0);
        charge(&conn, 2, 5000.0);
        charge(&conn, 3, 5000.0);
        for id in 1..=3 {
            upsert_grant_recipient(&conn, &grant(id, id, GrantStatus::Active, 100.0)).unwrap();
        }
        conn.execute_batch(
            "CREATE TRIGGER block_discount BEFORE UPDATE OF grant_discount ON student_fees
             WHEN NEW.student_id = 2 BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
        )
        .unwrap();

        let report = run_grant_sync(&conn, &LedgerConfig::default()).unwrap();

        assert_eq!(report.updated.len(), 2);
        assert!(report.has_failures());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].student_id, 2);
    }

    #[test]
    fn test_stale_discounts_cleared_when_enabled() {
        let conn = setup();
        charge(&conn, 1, 5000.0);
        upsert_grant_recipient(&conn, &grant(1, 1, GrantStatus::Active, 1000.0)).unwrap();
        run_grant_sync(&conn, &LedgerConfig::default()).unwrap();

        upsert_grant_recipient(&conn, &grant(1, 1, GrantStatus::Revoked, 1000.0)).unwrap();

        // Default: stale discount stays
        run_grant_sync(&conn, &LedgerConfig::default()).unwrap();
        let fee = student_fee::get_student_fee(&conn, 1, "2024-2025")
            .unwrap()
            .unwrap();
        assert_eq!(fee.grant_discount, 1000.0);

        let config = LedgerConfig {
            clear_stale_discounts: true,
            ..LedgerConfig::default()
        };
        let report = run_grant_sync(&conn, &config).unwrap();

        assert_eq!(report.cleared_stale.len(), 1);
        let fee = student_fee::get_student_fee(&conn, 1, "2024-2025")
            .unwrap()
            .unwrap();
        assert_eq!(fee.grant_discount, 0.0);
        assert_eq!(fee.balance, 5000.0);
    }
}
