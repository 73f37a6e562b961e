// 🔁 Fee Recalculation - rebuild the ledger from active fee items
//
// The whole pass runs inside one SQLite transaction: readers see either the
// old ledger or the new one, never the empty window in between. Each fee
// item applies inside its own savepoint so a failing item can be undone on
// its own.
//
// Two strategies:
//   rebuild     - delete every row, replay items (payments/discounts reset)
//   diff-upsert - compute target charges, upsert them (payments/discounts kept)

use crate::config::{FailurePolicy, LedgerConfig, RecalcStrategy};
use crate::db::{ledger_fingerprint, record_event, Event};
use crate::entities::fee_item::{self, FeeCategory, FeeItem};
use crate::entities::student_fee;
use crate::errors::{LedgerError, Result};
use crate::lock::LedgerLock;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const JOB_NAME: &str = "recalculate";

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeItemApplication {
    pub fee_item_id: i64,
    pub name: String,
    pub category: FeeCategory,
    pub amount: f64,
    pub applied_count: usize,
    pub subtotal: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeItemFailure {
    pub fee_item_id: i64,
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalculationReport {
    pub run_id: String,
    pub strategy: RecalcStrategy,
    /// Rows deleted up front (rebuild only)
    pub cleared_rows: usize,
    /// Rows whose charges were zeroed because no item targets them (diff-upsert only)
    pub zeroed_rows: usize,
    pub applications: Vec<FeeItemApplication>,
    pub failures: Vec<FeeItemFailure>,
    pub grand_total: f64,
    pub rows_rebalanced: usize,
    pub fingerprint: String,
}

impl RecalculationReport {
    /// True when every active item applied
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Applied {} fee items ({} failed), grand total {:.2}, {} ledger rows",
            self.applications.len(),
            self.failures.len(),
            self.grand_total,
            self.rows_rebalanced
        )
    }
}

// ============================================================================
// RECALCULATION
// ============================================================================

/// Rebuild the student fee ledger from the active fee items
pub fn run_recalculation(conn: &Connection, config: &LedgerConfig) -> Result<RecalculationReport> {
    let lock = LedgerLock::acquire(conn, JOB_NAME, config.lock_stale_after_secs)?;
    let mut tx = conn.unchecked_transaction()?;

    let items = fee_item::get_active_fee_items(&tx)?;
    tracing::info!(
        strategy = ?config.recalc_strategy,
        active_items = items.len(),
        "recalculation: starting"
    );

    let mut report = RecalculationReport {
        run_id: lock.run_id().to_string(),
        strategy: config.recalc_strategy,
        cleared_rows: 0,
        zeroed_rows: 0,
        applications: Vec::new(),
        failures: Vec::new(),
        grand_total: 0.0,
        rows_rebalanced: 0,
        fingerprint: String::new(),
    };

    match config.recalc_strategy {
        RecalcStrategy::Rebuild => rebuild(&mut tx, &items, config, &mut report)?,
        RecalcStrategy::DiffUpsert => diff_upsert(&mut tx, &items, config, &mut report)?,
    }

    report.rows_rebalanced = student_fee::recompute_balances(&tx)?;
    report.fingerprint = ledger_fingerprint(&tx)?;

    record_event(
        &tx,
        Event::new(
            "ledger_recalculated",
            "ledger",
            &report.run_id,
            serde_json::json!({
                "strategy": report.strategy,
                "items_applied": report.applications.len(),
                "items_failed": report.failures.len(),
                "grand_total": report.grand_total,
                "fingerprint": report.fingerprint,
            }),
            &config.actor,
        ),
    );

    tx.commit()?;

    tracing::info!(
        applied = report.applications.len(),
        failed = report.failures.len(),
        grand_total = report.grand_total,
        rows = report.rows_rebalanced,
        "recalculation: finished"
    );

    Ok(report)
}

/// Delete everything, then replay each item in its own savepoint
fn rebuild(
    tx: &mut rusqlite::Transaction<'_>,
    items: &[FeeItem],
    config: &LedgerConfig,
    report: &mut RecalculationReport,
) -> Result<()> {
    report.cleared_rows = student_fee::delete_all_student_fees(tx)
        .map_err(|e| LedgerError::ClearFailed(Box::new(e)))?;
    tracing::info!(cleared = report.cleared_rows, "recalculation: ledger cleared");

    for item in items {
        let savepoint = tx.savepoint()?;
        match item.apply_to_students(&savepoint) {
            Ok(applied_count) => {
                savepoint.commit()?;
                push_application(report, item, applied_count);
            }
            Err(e) => {
                // Dropping the savepoint rolls back this item's partial writes.
                drop(savepoint);
                handle_item_failure(report, item, e, config.fee_item_failure_policy)?;
            }
        }
    }

    Ok(())
}

/// Compute target charges in memory, then write only the differences
fn diff_upsert(
    tx: &mut rusqlite::Transaction<'_>,
    items: &[FeeItem],
    config: &LedgerConfig,
    report: &mut RecalculationReport,
) -> Result<()> {
    let mut targets: BTreeMap<(i64, String), [f64; 5]> = BTreeMap::new();

    for item in items {
        match item.eligible_students(tx) {
            Ok(students) => {
                let mut applied_count = 0;
                for student in &students {
                    let Some(year) = student.school_year() else {
                        continue;
                    };
                    let charges = targets
                        .entry((student.id, year.to_string()))
                        .or_insert([0.0; 5]);
                    charges[item.category.index()] += item.amount;
                    applied_count += 1;
                }
                push_application(report, item, applied_count);
            }
            Err(e) => handle_item_failure(report, item, e, config.fee_item_failure_policy)?,
        }
    }

    let savepoint = tx.savepoint()?;

    for existing in student_fee::get_all_student_fees(&savepoint)? {
        let key = (existing.student_id, existing.school_year.clone());
        if !targets.contains_key(&key) && existing.total_amount != 0.0 {
            student_fee::set_charges(&savepoint, key.0, &key.1, &[0.0; 5])?;
            report.zeroed_rows += 1;
        }
    }

    for ((student_id, school_year), charges) in &targets {
        let current = student_fee::get_student_fee(&savepoint, *student_id, school_year)?;
        if current.map(|fee| fee.charges()) != Some(*charges) {
            student_fee::set_charges(&savepoint, *student_id, school_year, charges)?;
        }
    }

    savepoint.commit()?;
    Ok(())
}

fn push_application(report: &mut RecalculationReport, item: &FeeItem, applied_count: usize) {
    let subtotal = item.amount * applied_count as f64;
    report.grand_total += subtotal;
    tracing::info!(
        fee_item_id = item.id,
        name = %item.name,
        applied_count,
        running_total = report.grand_total,
        "recalculation: fee item applied"
    );
    report.applications.push(FeeItemApplication {
        fee_item_id: item.id,
        name: item.name.clone(),
        category: item.category,
        amount: item.amount,
        applied_count,
        subtotal,
    });
}

fn handle_item_failure(
    report: &mut RecalculationReport,
    item: &FeeItem,
    error: LedgerError,
    policy: FailurePolicy,
) -> Result<()> {
    tracing::warn!(
        fee_item_id = item.id,
        name = %item.name,
        error = %error,
        "recalculation: fee item failed"
    );
    match policy {
        FailurePolicy::FailFast => Err(LedgerError::FeeItemFailed {
            fee_item_id: item.id,
            name: item.name.clone(),
            source: Box::new(error),
        }),
        FailurePolicy::SkipAndReport => {
            report.failures.push(FeeItemFailure {
                fee_item_id: item.id,
                name: item.name.clone(),
                error: error.to_string(),
            });
            Ok(())
        }
    }
}
