// 🎁 Grant Recipients - awarded discounts
//
// Written by scholarship administration (or CSV import); the ledger jobs
// only read them. Only `active` grants count toward a discount.

use crate::entities::text_enum;
use crate::errors::{LedgerError, Result};
use rusqlite::types::{FromSql, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, Row, ToSql};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GrantStatus {
    Active,
    Inactive,
    Revoked,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Active => "active",
            GrantStatus::Inactive => "inactive",
            GrantStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(GrantStatus::Active),
            "inactive" => Ok(GrantStatus::Inactive),
            "revoked" => Ok(GrantStatus::Revoked),
            _ => Err(LedgerError::InvalidValue {
                field: "status",
                value: s.to_string(),
            }),
        }
    }
}

impl ToSql for GrantStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for GrantStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        text_enum(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantRecipient {
    pub id: i64,
    pub student_id: i64,
    pub school_year: String,
    pub status: GrantStatus,
    pub discount_amount: f64,
}

impl GrantRecipient {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(GrantRecipient {
            id: row.get(0)?,
            student_id: row.get(1)?,
            school_year: row.get(2)?,
            status: row.get(3)?,
            discount_amount: row.get(4)?,
        })
    }
}

/// Sum of active discounts for one (student, school year)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantTotal {
    pub student_id: i64,
    pub school_year: String,
    pub total_discount: f64,
    pub grant_count: i64,
}

pub fn upsert_grant_recipient(conn: &Connection, grant: &GrantRecipient) -> Result<()> {
    conn.execute(
        "INSERT INTO grant_recipients (id, student_id, school_year, status, discount_amount)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            student_id = excluded.student_id,
            school_year = excluded.school_year,
            status = excluded.status,
            discount_amount = excluded.discount_amount",
        params![
            grant.id,
            grant.student_id,
            grant.school_year,
            grant.status,
            grant.discount_amount,
        ],
    )?;
    Ok(())
}

/// One total per distinct (student, year) among active grants
pub fn active_grant_totals(conn: &Connection) -> Result<Vec<GrantTotal>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, school_year, SUM(discount_amount), COUNT(*)
         FROM grant_recipients
         WHERE status = 'active'
         GROUP BY student_id, school_year
         ORDER BY student_id, school_year",
    )?;
    let totals = stmt
        .query_map([], |row| {
            Ok(GrantTotal {
                student_id: row.get(0)?,
                school_year: row.get(1)?,
                total_discount: row.get(2)?,
                grant_count: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(totals)
}

pub fn get_grants_for_student(conn: &Connection, student_id: i64) -> Result<Vec<GrantRecipient>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, school_year, status, discount_amount
         FROM grant_recipients WHERE student_id = ?1 ORDER BY id",
    )?;
    let grants = stmt
        .query_map([student_id], GrantRecipient::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(grants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn grant(id: i64, student_id: i64, year: &str, status: GrantStatus, amount: f64) -> GrantRecipient {
        GrantRecipient {
            id,
            student_id,
            school_year: year.to_string(),
            status,
            discount_amount: amount,
        }
    }

    #[test]
    fn test_totals_sum_only_active_grants() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn.execute(
            "INSERT INTO students (id, name) VALUES (1, 'Ana'), (2, 'Ben')",
            [],
        )
        .unwrap();

        upsert_grant_recipient(&conn, &grant(1, 1, "2024-2025", GrantStatus::Active, 1000.0))
            .unwrap();
        upsert_grant_recipient(&conn, &grant(2, 1, "2024-2025", GrantStatus::Active, 500.0))
            .unwrap();
        upsert_grant_recipient(&conn, &grant(3, 1, "2024-2025", GrantStatus::Revoked, 9000.0))
            .unwrap();
        upsert_grant_recipient(&conn, &grant(4, 2, "2024-2025", GrantStatus::Inactive, 700.0))
            .unwrap();

        let totals = active_grant_totals(&conn).unwrap();

        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].student_id, 1);
        assert_eq!(totals[0].total_discount, 1500.0);
        assert_eq!(totals[0].grant_count, 2);
        assert_eq!(get_grants_for_student(&conn, 1).unwrap().len(), 3);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("ACTIVE".parse::<GrantStatus>().unwrap(), GrantStatus::Active);
        assert!("pending".parse::<GrantStatus>().is_err());
    }
}
