// 🏷️ Fee Items - charge rules as data
//
// A fee item names an amount, the ledger column it lands in, and the
// student population it applies to. Applying an item is additive: it never
// reads what other items contributed.

use crate::entities::student::{self, EnrollmentStatus, Student, StudentFilter};
use crate::entities::{non_blank, student_fee, text_enum};
use crate::errors::{LedgerError, Result};
use rusqlite::types::{FromSql, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, Row, ToSql};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// FEE CATEGORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeeCategory {
    Registration,
    Tuition,
    Misc,
    Books,
    Other,
}

impl FeeCategory {
    pub const ALL: [FeeCategory; 5] = [
        FeeCategory::Registration,
        FeeCategory::Tuition,
        FeeCategory::Misc,
        FeeCategory::Books,
        FeeCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeeCategory::Registration => "registration",
            FeeCategory::Tuition => "tuition",
            FeeCategory::Misc => "misc",
            FeeCategory::Books => "books",
            FeeCategory::Other => "other",
        }
    }

    /// `student_fees` column this category accumulates into
    pub fn column(&self) -> &'static str {
        match self {
            FeeCategory::Registration => "registration_fee",
            FeeCategory::Tuition => "tuition_fee",
            FeeCategory::Misc => "misc_fee",
            FeeCategory::Books => "books_fee",
            FeeCategory::Other => "other_fees",
        }
    }

    /// Position in `StudentFee::charges()`
    pub fn index(&self) -> usize {
        match self {
            FeeCategory::Registration => 0,
            FeeCategory::Tuition => 1,
            FeeCategory::Misc => 2,
            FeeCategory::Books => 3,
            FeeCategory::Other => 4,
        }
    }
}

impl fmt::Display for FeeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeeCategory {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        let normalized = normalized
            .strip_suffix("_fees")
            .or_else(|| normalized.strip_suffix("_fee"))
            .unwrap_or(&normalized);
        match normalized {
            "registration" => Ok(FeeCategory::Registration),
            "tuition" => Ok(FeeCategory::Tuition),
            "misc" | "miscellaneous" => Ok(FeeCategory::Misc),
            "books" => Ok(FeeCategory::Books),
            "other" => Ok(FeeCategory::Other),
            _ => Err(LedgerError::InvalidValue {
                field: "category",
                value: s.to_string(),
            }),
        }
    }
}

impl ToSql for FeeCategory {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for FeeCategory {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        text_enum(value)
    }
}

// ============================================================================
// FEE ITEM
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeItem {
    pub id: i64,
    pub name: String,
    pub category: FeeCategory,
    pub amount: f64,
    pub is_active: bool,
    /// Restrict to one school year (None = any year)
    pub school_year: Option<String>,
    /// Restrict to one grade level (None = all levels)
    pub grade_level: Option<String>,
}

impl FeeItem {
    pub fn new(id: i64, name: &str, category: FeeCategory, amount: f64) -> Self {
        FeeItem {
            id,
            name: name.to_string(),
            category,
            amount,
            is_active: true,
            school_year: None,
            grade_level: None,
        }
    }

    /// Population this item charges
    ///
    /// Registrar-cleared, billable, with a school year, and inside the
    /// item's own year / grade scope when set.
    pub fn eligibility(&self) -> StudentFilter {
        StudentFilter {
            registrar_cleared: Some(true),
            school_year: non_blank(self.school_year.as_deref()).map(str::to_string),
            grade_level: non_blank(self.grade_level.as_deref()).map(str::to_string),
            statuses: Some(EnrollmentStatus::billable()),
            require_school_year: true,
            without_fee_record: false,
        }
    }

    pub fn eligible_students(&self, conn: &Connection) -> Result<Vec<Student>> {
        student::find_students(conn, &self.eligibility())
    }

    /// Charge every eligible student, creating ledger rows as needed
    ///
    /// Returns how many students were charged. Stops at the first failing
    /// row; callers wrap this in a savepoint to undo a partial apply.
    pub fn apply_to_students(&self, conn: &Connection) -> Result<usize> {
        let students = self.eligible_students(conn)?;
        let mut applied = 0;

        for student in &students {
            // eligibility() guarantees a school year
            let Some(year) = student.school_year() else {
                continue;
            };
            student_fee::add_charge(conn, student.id, year, self.category, self.amount)?;
            applied += 1;
        }

        tracing::debug!(
            fee_item_id = self.id,
            name = %self.name,
            applied,
            "fee item applied"
        );

        Ok(applied)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(FeeItem {
            id: row.get(0)?,
            name: row.get(1)?,
            category: row.get(2)?,
            amount: row.get(3)?,
            is_active: row.get(4)?,
            school_year: row.get(5)?,
            grade_level: row.get(6)?,
        })
    }
}

// ============================================================================
// REPOSITORY
// ============================================================================

pub fn upsert_fee_item(conn: &Connection, item: &FeeItem) -> Result<()> {
    conn.execute(
        "INSERT INTO fee_items (id, name, category, amount, is_active, school_year, grade_level)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            category = excluded.category,
            amount = excluded.amount,
            is_active = excluded.is_active,
            school_year = excluded.school_year,
            grade_level = excluded.grade_level",
        params![
            item.id,
            item.name,
            item.category,
            item.amount,
            item.is_active,
            item.school_year,
            item.grade_level,
        ],
    )?;
    Ok(())
}

/// Active items in application order (id ascending)
pub fn get_active_fee_items(conn: &Connection) -> Result<Vec<FeeItem>> {
    query_fee_items(conn, "WHERE is_active = 1")
}

pub fn get_all_fee_items(conn: &Connection) -> Result<Vec<FeeItem>> {
    query_fee_items(conn, "")
}

fn query_fee_items(conn: &Connection, where_clause: &str) -> Result<Vec<FeeItem>> {
    let sql = format!(
        "SELECT id, name, category, amount, is_active, school_year, grade_level
         FROM fee_items {} ORDER BY id",
        where_clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map([], FeeItem::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(items)
}
