// 🎓 Student Entity - identity + enrollment attributes
//
// Enrollment status drives fee eligibility; the registrar clearance gates
// whether a ledger row should exist at all.

use crate::entities::{non_blank, text_enum};
use crate::errors::{LedgerError, Result};
use rusqlite::types::{FromSql, FromSqlResult, ToSqlOutput, Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ENROLLMENT STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnrollmentStatus {
    NotEnrolled,
    PendingRegistrar,
    PendingAccounting,
    Enrolled,
    Graduated,
    Dropped,
}

impl EnrollmentStatus {
    pub const ALL: [EnrollmentStatus; 6] = [
        EnrollmentStatus::NotEnrolled,
        EnrollmentStatus::PendingRegistrar,
        EnrollmentStatus::PendingAccounting,
        EnrollmentStatus::Enrolled,
        EnrollmentStatus::Graduated,
        EnrollmentStatus::Dropped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::NotEnrolled => "not-enrolled",
            EnrollmentStatus::PendingRegistrar => "pending-registrar",
            EnrollmentStatus::PendingAccounting => "pending-accounting",
            EnrollmentStatus::Enrolled => "enrolled",
            EnrollmentStatus::Graduated => "graduated",
            EnrollmentStatus::Dropped => "dropped",
        }
    }

    /// Students in these states can be charged by fee items
    pub fn is_billable(&self) -> bool {
        matches!(
            self,
            EnrollmentStatus::PendingRegistrar
                | EnrollmentStatus::PendingAccounting
                | EnrollmentStatus::Enrolled
        )
    }

    pub fn billable() -> Vec<EnrollmentStatus> {
        Self::ALL.into_iter().filter(|s| s.is_billable()).collect()
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| LedgerError::InvalidValue {
                field: "enrollment_status",
                value: s.to_string(),
            })
    }
}

impl ToSql for EnrollmentStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for EnrollmentStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        text_enum(value)
    }
}

// ============================================================================
// STUDENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub grade_level: Option<String>,
    pub school_year: Option<String>,
    pub enrollment_status: EnrollmentStatus,
}

impl Student {
    pub fn new(id: i64, name: &str, school_year: Option<&str>) -> Self {
        Student {
            id,
            name: name.to_string(),
            grade_level: None,
            school_year: school_year.map(str::to_string),
            enrollment_status: EnrollmentStatus::Enrolled,
        }
    }

    /// School year, if present and non-blank
    pub fn school_year(&self) -> Option<&str> {
        non_blank(self.school_year.as_deref())
    }

    pub fn grade_level(&self) -> Option<&str> {
        non_blank(self.grade_level.as_deref())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Student {
            id: row.get(0)?,
            name: row.get(1)?,
            grade_level: row.get(2)?,
            school_year: row.get(3)?,
            enrollment_status: row.get(4)?,
        })
    }
}

/// Registrar / accounting sign-off for a student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentClearance {
    pub student_id: i64,
    pub registrar_clearance: bool,
    pub accounting_clearance: bool,
}

// ============================================================================
// STUDENT FILTER (explicit query predicate)
// ============================================================================

/// Predicate for `find_students`. `None` fields do not constrain the query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentFilter {
    pub registrar_cleared: Option<bool>,
    pub school_year: Option<String>,
    pub grade_level: Option<String>,
    pub statuses: Option<Vec<EnrollmentStatus>>,
    /// Only students with a non-blank school year
    pub require_school_year: bool,
    /// Only students with no fee row in any school year
    pub without_fee_record: bool,
}

impl StudentFilter {
    /// Backfill candidates: cleared by the registrar, no ledger row yet
    pub fn cleared_without_fee_record() -> Self {
        StudentFilter {
            registrar_cleared: Some(true),
            without_fee_record: true,
            ..Default::default()
        }
    }

    fn to_sql(&self) -> (String, Vec<Value>) {
        let mut sql = String::from(
            "SELECT s.id, s.name, s.grade_level, s.school_year, s.enrollment_status
             FROM students s
             LEFT JOIN enrollment_clearances c ON c.student_id = s.id
             WHERE 1 = 1",
        );
        let mut values: Vec<Value> = Vec::new();

        if let Some(cleared) = self.registrar_cleared {
            if cleared {
                sql.push_str(" AND c.registrar_clearance = 1");
            } else {
                sql.push_str(" AND COALESCE(c.registrar_clearance, 0) = 0");
            }
        }
        if self.require_school_year {
            sql.push_str(" AND TRIM(COALESCE(s.school_year, '')) <> ''");
        }
        if let Some(year) = &self.school_year {
            values.push(Value::Text(year.clone()));
            sql.push_str(&format!(" AND TRIM(s.school_year) = ?{}", values.len()));
        }
        if let Some(grade) = &self.grade_level {
            values.push(Value::Text(grade.clone()));
            sql.push_str(&format!(" AND TRIM(s.grade_level) = ?{}", values.len()));
        }
        if let Some(statuses) = &self.statuses {
            if statuses.is_empty() {
                sql.push_str(" AND 0 = 1");
            } else {
                let placeholders: Vec<String> = statuses
                    .iter()
                    .map(|status| {
                        values.push(Value::Text(status.as_str().to_string()));
                        format!("?{}", values.len())
                    })
                    .collect();
                sql.push_str(&format!(
                    " AND s.enrollment_status IN ({})",
                    placeholders.join(", ")
                ));
            }
        }
        if self.without_fee_record {
            sql.push_str(
                " AND NOT EXISTS (SELECT 1 FROM student_fees f WHERE f.student_id = s.id)",
            );
        }

        sql.push_str(" ORDER BY s.id");
        (sql, values)
    }
}

// ============================================================================
// REPOSITORY
// ============================================================================

pub fn upsert_student(conn: &Connection, student: &Student) -> Result<()> {
    conn.execute(
        "INSERT INTO students (id, name, grade_level, school_year, enrollment_status)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            grade_level = excluded.grade_level,
            school_year = excluded.school_year,
            enrollment_status = excluded.enrollment_status",
        params![
            student.id,
            student.name,
            student.grade_level,
            student.school_year,
            student.enrollment_status,
        ],
    )?;
    Ok(())
}

pub fn set_clearance(conn: &Connection, clearance: &EnrollmentClearance) -> Result<()> {
    conn.execute(
        "INSERT INTO enrollment_clearances
            (student_id, registrar_clearance, accounting_clearance, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(student_id) DO UPDATE SET
            registrar_clearance = excluded.registrar_clearance,
            accounting_clearance = excluded.accounting_clearance,
            updated_at = excluded.updated_at",
        params![
            clearance.student_id,
            clearance.registrar_clearance,
            clearance.accounting_clearance,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_clearance(conn: &Connection, student_id: i64) -> Result<Option<EnrollmentClearance>> {
    let clearance = conn
        .query_row(
            "SELECT student_id, registrar_clearance, accounting_clearance
             FROM enrollment_clearances WHERE student_id = ?1",
            [student_id],
            |row| {
                Ok(EnrollmentClearance {
                    student_id: row.get(0)?,
                    registrar_clearance: row.get(1)?,
                    accounting_clearance: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(clearance)
}

pub fn get_student(conn: &Connection, id: i64) -> Result<Option<Student>> {
    let student = conn
        .query_row(
            "SELECT id, name, grade_level, school_year, enrollment_status
             FROM students WHERE id = ?1",
            [id],
            Student::from_row,
        )
        .optional()?;
    Ok(student)
}

/// Students matching `filter`, ordered by id
pub fn find_students(conn: &Connection, filter: &StudentFilter) -> Result<Vec<Student>> {
    let (sql, values) = filter.to_sql();
    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map(params_from_iter(values.iter()), Student::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(students)
}

pub fn get_all_students(conn: &Connection) -> Result<Vec<Student>> {
    find_students(conn, &StudentFilter::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn seed(conn: &Connection, id: i64, year: Option<&str>, cleared: bool) -> Student {
        let student = Student::new(id, &format!("Student {}", id), year);
        upsert_student(conn, &student).unwrap();
        set_clearance(
            conn,
            &EnrollmentClearance {
                student_id: id,
                registrar_clearance: cleared,
                accounting_clearance: false,
            },
        )
        .unwrap();
        student
    }

    /// In-memory twin of the SQL predicate
    fn matches(
        filter: &StudentFilter,
        student: &Student,
        clearance: Option<&EnrollmentClearance>,
    ) -> bool {
        if let Some(cleared) = filter.registrar_cleared {
            let actual = clearance.map(|c| c.registrar_clearance).unwrap_or(false);
            if actual != cleared {
                return false;
            }
        }
        if filter.require_school_year && student.school_year().is_none() {
            return false;
        }
        if let Some(year) = &filter.school_year {
            if student.school_year() != Some(year.as_str()) {
                return false;
            }
        }
        if let Some(grade) = &filter.grade_level {
            if student.grade_level() != Some(grade.as_str()) {
                return false;
            }
        }
        if let Some(statuses) = &filter.statuses {
            if !statuses.contains(&student.enrollment_status) {
                return false;
            }
        }
        true
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            "pending-accounting".parse::<EnrollmentStatus>().unwrap(),
            EnrollmentStatus::PendingAccounting
        );
        assert_eq!(
            "NOT_ENROLLED".parse::<EnrollmentStatus>().unwrap(),
            EnrollmentStatus::NotEnrolled
        );
        assert!("expelled".parse::<EnrollmentStatus>().is_err());
    }

    #[test]
    fn test_billable_statuses() {
        assert!(EnrollmentStatus::Enrolled.is_billable());
        assert!(!EnrollmentStatus::Dropped.is_billable());
        assert!(!EnrollmentStatus::Graduated.is_billable());
        assert_eq!(EnrollmentStatus::billable().len(), 3);
    }

    #[test]
    fn test_blank_school_year_is_absent() {
        let student = Student::new(1, "Ana", Some("   "));
        assert_eq!(student.school_year(), None);
    }

    #[test]
    fn test_roundtrip_through_sqlite() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut student = seed(&conn, 7, Some("2024-2025"), true);
        student.grade_level = Some("Grade 7".to_string());
        student.enrollment_status = EnrollmentStatus::PendingAccounting;
        upsert_student(&conn, &student).unwrap();

        let loaded = get_student(&conn, 7).unwrap().unwrap();
        assert_eq!(loaded, student);
        assert!(get_clearance(&conn, 7).unwrap().unwrap().registrar_clearance);
        assert!(get_student(&conn, 8).unwrap().is_none());
    }

    #[test]
    fn test_cleared_without_fee_record_filter() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        seed(&conn, 1, Some("2024-2025"), true);
        seed(&conn, 2, Some("2024-2025"), false);
        seed(&conn, 3, None, true);
        seed(&conn, 4, Some("2024-2025"), true);
        conn.execute(
            "INSERT INTO student_fees (student_id, school_year) VALUES (4, '2024-2025')",
            [],
        )
        .unwrap();

        let ids: Vec<i64> = find_students(&conn, &StudentFilter::cleared_without_fee_record())
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();

        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_sql_and_memory_predicates_agree() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut graduate = seed(&conn, 1, Some("2024-2025"), true);
        graduate.enrollment_status = EnrollmentStatus::Graduated;
        upsert_student(&conn, &graduate).unwrap();
        let mut senior = seed(&conn, 2, Some("2024-2025"), true);
        senior.grade_level = Some("Grade 12".to_string());
        upsert_student(&conn, &senior).unwrap();
        seed(&conn, 3, Some("2023-2024"), true);
        seed(&conn, 4, Some("2024-2025"), false);

        let filter = StudentFilter {
            registrar_cleared: Some(true),
            school_year: Some("2024-2025".to_string()),
            statuses: Some(EnrollmentStatus::billable()),
            require_school_year: true,
            ..Default::default()
        };

        let from_sql: Vec<i64> = find_students(&conn, &filter)
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();

        let from_memory: Vec<i64> = get_all_students(&conn)
            .unwrap()
            .into_iter()
            .filter(|s| {
                let clearance = get_clearance(&conn, s.id).unwrap();
                matches(&filter, s, clearance.as_ref())
            })
            .map(|s| s.id)
            .collect();

        assert_eq!(from_sql, vec![2]);
        assert_eq!(from_sql, from_memory);
    }
}
