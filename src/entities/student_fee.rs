// 🧾 Student Fee - the ledger row
//
// One row per (student, school year). Every write in this module leaves
// balance = total_amount - total_paid - grant_discount.

use crate::entities::fee_item::FeeCategory;
use crate::errors::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

const SELECT_COLUMNS: &str = "SELECT id, student_id, school_year, registration_fee, tuition_fee,
        misc_fee, books_fee, other_fees, total_amount, total_paid, balance, grant_discount
     FROM student_fees";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentFee {
    pub id: i64,
    pub student_id: i64,
    pub school_year: String,
    pub registration_fee: f64,
    pub tuition_fee: f64,
    pub misc_fee: f64,
    pub books_fee: f64,
    pub other_fees: f64,
    pub total_amount: f64,
    pub total_paid: f64,
    pub balance: f64,
    pub grant_discount: f64,
}

impl StudentFee {
    /// What `balance` must equal
    pub fn expected_balance(&self) -> f64 {
        self.total_amount - self.total_paid - self.grant_discount
    }

    /// Category columns in `FeeCategory::index()` order
    pub fn charges(&self) -> [f64; 5] {
        [
            self.registration_fee,
            self.tuition_fee,
            self.misc_fee,
            self.books_fee,
            self.other_fees,
        ]
    }

    pub fn charge(&self, category: FeeCategory) -> f64 {
        self.charges()[category.index()]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(StudentFee {
            id: row.get(0)?,
            student_id: row.get(1)?,
            school_year: row.get(2)?,
            registration_fee: row.get(3)?,
            tuition_fee: row.get(4)?,
            misc_fee: row.get(5)?,
            books_fee: row.get(6)?,
            other_fees: row.get(7)?,
            total_amount: row.get(8)?,
            total_paid: row.get(9)?,
            balance: row.get(10)?,
            grant_discount: row.get(11)?,
        })
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ============================================================================
// WRITES
// ============================================================================

/// Insert a zero-valued row unless one already exists
///
/// Returns `true` when this call created the row. A concurrent or repeated
/// attempt hits the unique (student_id, school_year) key and is a no-op.
pub fn create_if_absent(conn: &Connection, student_id: i64, school_year: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO student_fees (student_id, school_year, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(student_id, school_year) DO NOTHING",
        params![student_id, school_year, now()],
    )?;
    Ok(inserted == 1)
}

/// Add `amount` to one category column and to the total, creating the row if needed
pub fn add_charge(
    conn: &Connection,
    student_id: i64,
    school_year: &str,
    category: FeeCategory,
    amount: f64,
) -> Result<()> {
    // SET expressions read the pre-update row, so balance uses the old total.
    let column = category.column();
    let sql = format!(
        "INSERT INTO student_fees (student_id, school_year, {col}, total_amount, balance, updated_at)
         VALUES (?1, ?2, ?3, ?3, ?3, ?4)
         ON CONFLICT(student_id, school_year) DO UPDATE SET
            {col} = {col} + excluded.{col},
            total_amount = total_amount + excluded.total_amount,
            balance = total_amount + excluded.total_amount - total_paid - grant_discount,
            updated_at = excluded.updated_at",
        col = column
    );
    conn.execute(&sql, params![student_id, school_year, amount, now()])?;
    Ok(())
}

/// Replace all charges on a row (creating it if needed), keeping payments and discounts
pub fn set_charges(
    conn: &Connection,
    student_id: i64,
    school_year: &str,
    charges: &[f64; 5],
) -> Result<()> {
    let total: f64 = charges.iter().sum();
    conn.execute(
        "INSERT INTO student_fees (student_id, school_year, registration_fee, tuition_fee,
                misc_fee, books_fee, other_fees, total_amount, balance, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9)
         ON CONFLICT(student_id, school_year) DO UPDATE SET
            registration_fee = excluded.registration_fee,
            tuition_fee = excluded.tuition_fee,
            misc_fee = excluded.misc_fee,
            books_fee = excluded.books_fee,
            other_fees = excluded.other_fees,
            total_amount = excluded.total_amount,
            balance = excluded.total_amount - total_paid - grant_discount,
            updated_at = excluded.updated_at",
        params![
            student_id,
            school_year,
            charges[0],
            charges[1],
            charges[2],
            charges[3],
            charges[4],
            total,
            now(),
        ],
    )?;
    Ok(())
}

/// Set the grant discount on an existing row and rebalance it
///
/// Returns `false` when there is no row for (student, year).
pub fn set_grant_discount(
    conn: &Connection,
    student_id: i64,
    school_year: &str,
    discount: f64,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE student_fees
         SET grant_discount = ?3,
             balance = total_amount - total_paid - ?3,
             updated_at = ?4
         WHERE student_id = ?1 AND school_year = ?2",
        params![student_id, school_year, discount, now()],
    )?;
    Ok(updated > 0)
}

/// Add a payment to an existing row and rebalance it
#[cfg(test)]
pub(crate) fn record_payment(
    conn: &Connection,
    student_id: i64,
    school_year: &str,
    amount: f64,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE student_fees
         SET total_paid = total_paid + ?3,
             balance = total_amount - (total_paid + ?3) - grant_discount,
             updated_at = ?4
         WHERE student_id = ?1 AND school_year = ?2",
        params![student_id, school_year, amount, now()],
    )?;
    Ok(updated > 0)
}

/// Recompute `balance` on every row; returns rows touched
pub fn recompute_balances(conn: &Connection) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE student_fees SET balance = total_amount - total_paid - grant_discount",
        [],
    )?;
    Ok(updated)
}

/// Hard delete of the whole ledger; returns rows removed
pub fn delete_all_student_fees(conn: &Connection) -> Result<usize> {
    let deleted = conn.execute("DELETE FROM student_fees", [])?;
    Ok(deleted)
}

// ============================================================================
// READS
// ============================================================================

pub fn get_student_fee(
    conn: &Connection,
    student_id: i64,
    school_year: &str,
) -> Result<Option<StudentFee>> {
    let sql = format!("{} WHERE student_id = ?1 AND school_year = ?2", SELECT_COLUMNS);
    let fee = conn
        .query_row(&sql, params![student_id, school_year], StudentFee::from_row)
        .optional()?;
    Ok(fee)
}

pub fn get_fees_for_student(conn: &Connection, student_id: i64) -> Result<Vec<StudentFee>> {
    let sql = format!("{} WHERE student_id = ?1 ORDER BY school_year", SELECT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let fees = stmt
        .query_map([student_id], StudentFee::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(fees)
}

pub fn get_all_student_fees(conn: &Connection) -> Result<Vec<StudentFee>> {
    let sql = format!("{} ORDER BY student_id, school_year", SELECT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let fees = stmt
        .query_map([], StudentFee::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(fees)
}

pub fn count_student_fees(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM student_fees", [], |row| row.get(0))?;
    Ok(count)
}
