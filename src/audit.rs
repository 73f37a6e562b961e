// ⚖️ Ledger Audit - Validate every fee row balances
//
// Following the formula:
//   total_amount - total_paid - grant_discount = balance
//
// Read-only. Run after any job (or any time) to prove the ledger is sound.

use crate::entities::student_fee::{self, StudentFee};
use crate::errors::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

// ============================================================================
// DISCREPANCIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiscrepancyCategory {
    /// balance != total_amount - total_paid - grant_discount
    BalanceMismatch,
    /// total_amount != sum of the category columns
    TotalMismatch,
    /// A monetary field other than balance is below zero
    NegativeAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discrepancy {
    pub student_id: i64,
    pub school_year: String,
    pub category: DiscrepancyCategory,
    pub expected: f64,
    pub actual: f64,
    pub description: String,
}

// ============================================================================
// AUDIT REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub rows_checked: usize,
    pub total_billed: f64,
    pub total_paid: f64,
    pub total_discounts: f64,
    pub total_outstanding: f64,
    pub discrepancies: Vec<Discrepancy>,
    pub audited_at: chrono::DateTime<chrono::Utc>,
}

impl AuditReport {
    pub fn is_balanced(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Audited {} ledger rows: billed {:.2}, paid {:.2}, discounts {:.2}, outstanding {:.2}, {} discrepancies",
            self.rows_checked,
            self.total_billed,
            self.total_paid,
            self.total_discounts,
            self.total_outstanding,
            self.discrepancies.len()
        )
    }
}

// ============================================================================
// AUDIT ENGINE
// ============================================================================

pub struct AuditEngine {
    /// Tolerance for floating-point comparisons (default: half a cent)
    pub tolerance: f64,
}

impl AuditEngine {
    pub fn new() -> Self {
        AuditEngine { tolerance: 0.005 }
    }

    pub fn audit(&self, fees: &[StudentFee]) -> AuditReport {
        let mut discrepancies = Vec::new();

        for fee in fees {
            self.check_row(fee, &mut discrepancies);
        }

        AuditReport {
            rows_checked: fees.len(),
            total_billed: fees.iter().map(|f| f.total_amount).sum(),
            total_paid: fees.iter().map(|f| f.total_paid).sum(),
            total_discounts: fees.iter().map(|f| f.grant_discount).sum(),
            total_outstanding: fees.iter().map(|f| f.balance).sum(),
            discrepancies,
            audited_at: chrono::Utc::now(),
        }
    }

    fn check_row(&self, fee: &StudentFee, out: &mut Vec<Discrepancy>) {
        let expected = fee.expected_balance();
        if (expected - fee.balance).abs() > self.tolerance {
            out.push(Discrepancy {
                student_id: fee.student_id,
                school_year: fee.school_year.clone(),
                category: DiscrepancyCategory::BalanceMismatch,
                expected,
                actual: fee.balance,
                description: format!(
                    "Balance mismatch: expected {:.2}, found {:.2}",
                    expected, fee.balance
                ),
            });
        }

        let charges: f64 = fee.charges().iter().sum();
        if (charges - fee.total_amount).abs() > self.tolerance {
            out.push(Discrepancy {
                student_id: fee.student_id,
                school_year: fee.school_year.clone(),
                category: DiscrepancyCategory::TotalMismatch,
                expected: charges,
                actual: fee.total_amount,
                description: format!(
                    "Total mismatch: categories sum to {:.2}, total_amount is {:.2}",
                    charges, fee.total_amount
                ),
            });
        }

        let named = [
            ("registration_fee", fee.registration_fee),
            ("tuition_fee", fee.tuition_fee),
            ("misc_fee", fee.misc_fee),
            ("books_fee", fee.books_fee),
            ("other_fees", fee.other_fees),
            ("total_paid", fee.total_paid),
            ("grant_discount", fee.grant_discount),
        ];
        for (field, value) in named {
            if value < -self.tolerance {
                out.push(Discrepancy {
                    student_id: fee.student_id,
                    school_year: fee.school_year.clone(),
                    category: DiscrepancyCategory::NegativeAmount,
                    expected: 0.0,
                    actual: value,
                    description: format!("{} is negative ({:.2})", field, value),
                });
            }
        }
    }
}

impl Default for AuditEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Audit the whole ledger with the default tolerance
pub fn audit_ledger(conn: &Connection) -> Result<AuditReport> {
    let fees = student_fee::get_all_student_fees(conn)?;
    let report = AuditEngine::new().audit(&fees);
    if report.is_balanced() {
        tracing::info!(rows = report.rows_checked, "audit: ledger balanced");
    } else {
        tracing::warn!(
            rows = report.rows_checked,
            discrepancies = report.discrepancies.len(),
            "audit: ledger has discrepancies"
        );
    }
    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================
