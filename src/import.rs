// 📂 CSV Import - students, fee items, grant recipients
//
// Each file is loaded inside one transaction and rows are upserted by id,
// so re-importing the same file is harmless. A bad row aborts the file.

use crate::entities::fee_item::{upsert_fee_item, FeeCategory, FeeItem};
use crate::entities::grant::{upsert_grant_recipient, GrantRecipient, GrantStatus};
use crate::entities::student::{
    set_clearance, upsert_student, EnrollmentClearance, EnrollmentStatus, Student,
};
use crate::errors::{LedgerError, Result};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Students,
    FeeItems,
    Grants,
}

impl FromStr for ImportKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "students" => Ok(ImportKind::Students),
            "fee-items" | "fee_items" | "fees" => Ok(ImportKind::FeeItems),
            "grants" | "grant-recipients" => Ok(ImportKind::Grants),
            _ => Err(LedgerError::InvalidValue {
                field: "import kind",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// CSV RECORDS
// ============================================================================

#[derive(Debug, Deserialize)]
struct StudentRecord {
    id: i64,
    name: String,
    grade_level: Option<String>,
    school_year: Option<String>,
    enrollment_status: EnrollmentStatus,
    #[serde(default)]
    registrar_clearance: bool,
    #[serde(default)]
    accounting_clearance: bool,
}

#[derive(Debug, Deserialize)]
struct FeeItemRecord {
    id: i64,
    name: String,
    category: String,
    amount: f64,
    #[serde(default = "default_true")]
    is_active: bool,
    school_year: Option<String>,
    grade_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GrantRecord {
    id: i64,
    student_id: i64,
    school_year: String,
    status: GrantStatus,
    discount_amount: f64,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// LOADERS
// ============================================================================

pub fn import_path(conn: &Connection, kind: ImportKind, path: &Path) -> Result<usize> {
    let file = std::fs::File::open(path)?;
    let count = import_reader(conn, kind, file)?;
    tracing::info!(kind = ?kind, path = %path.display(), rows = count, "csv import finished");
    Ok(count)
}

pub fn import_reader<R: Read>(conn: &Connection, kind: ImportKind, reader: R) -> Result<usize> {
    match kind {
        ImportKind::Students => import_students(conn, reader),
        ImportKind::FeeItems => import_fee_items(conn, reader),
        ImportKind::Grants => import_grants(conn, reader),
    }
}

/// Feed each record to `apply`, tagging any row failure with its CSV line
fn for_each_record<R, T, F>(reader: R, mut apply: F) -> Result<usize>
where
    R: Read,
    T: DeserializeOwned,
    F: FnMut(T) -> Result<()>,
{
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();
    let mut raw = csv::StringRecord::new();
    let mut count = 0;

    while rdr.read_record(&mut raw)? {
        let line = raw.position().map(|p| p.line()).unwrap_or_default();
        let record: T = raw.deserialize(Some(&headers))?;
        apply(record).map_err(|e| LedgerError::ImportRow {
            line,
            source: Box::new(e),
        })?;
        count += 1;
    }

    Ok(count)
}

pub fn import_students<R: Read>(conn: &Connection, reader: R) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;

    let count = for_each_record(reader, |record: StudentRecord| {
        upsert_student(
            &tx,
            &Student {
                id: record.id,
                name: record.name,
                grade_level: record.grade_level,
                school_year: record.school_year,
                enrollment_status: record.enrollment_status,
            },
        )?;
        set_clearance(
            &tx,
            &EnrollmentClearance {
                student_id: record.id,
                registrar_clearance: record.registrar_clearance,
                accounting_clearance: record.accounting_clearance,
            },
        )
    })?;

    tx.commit()?;
    Ok(count)
}

pub fn import_fee_items<R: Read>(conn: &Connection, reader: R) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;

    let count = for_each_record(reader, |record: FeeItemRecord| {
        if record.amount < 0.0 {
            return Err(LedgerError::InvalidValue {
                field: "amount",
                value: record.amount.to_string(),
            });
        }
        upsert_fee_item(
            &tx,
            &FeeItem {
                id: record.id,
                name: record.name,
                category: record.category.parse::<FeeCategory>()?,
                amount: record.amount,
                is_active: record.is_active,
                school_year: record.school_year,
                grade_level: record.grade_level,
            },
        )
    })?;

    tx.commit()?;
    Ok(count)
}

pub fn import_grants<R: Read>(conn: &Connection, reader: R) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;

    let count = for_each_record(reader, |record: GrantRecord| {
        upsert_grant_recipient(
            &tx,
            &GrantRecipient {
                id: record.id,
                student_id: record.student_id,
                school_year: record.school_year,
                status: record.status,
                discount_amount: record.discount_amount,
            },
        )
    })?;

    tx.commit()?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::{fee_item, grant, student};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    const STUDENTS: &str = "\
id,name,grade_level,school_year,enrollment_status,registrar_clearance,accounting_clearance
1,Ana Reyes,Grade 7,2024-2025,enrolled,true,false
2,Ben Cruz,,,pending-registrar,false,false
";

    #[test]
    fn test_import_students_with_clearance() {
        let conn = setup();

        let count = import_students(&conn, STUDENTS.as_bytes()).unwrap();

        assert_eq!(count, 2);
        let ana = student::get_student(&conn, 1).unwrap().unwrap();
        assert_eq!(ana.grade_level.as_deref(), Some("Grade 7"));
        assert!(student::get_clearance(&conn, 1).unwrap().unwrap().registrar_clearance);

        let ben = student::get_student(&conn, 2).unwrap().unwrap();
        assert_eq!(ben.school_year(), None);
        assert_eq!(ben.enrollment_status, EnrollmentStatus::PendingRegistrar);
    }

    #[test]
    fn test_reimport_is_harmless() {
        let conn = setup();
        import_students(&conn, STUDENTS.as_bytes()).unwrap();
        import_students(&conn, STUDENTS.as_bytes()).unwrap();
        assert_eq!(student::get_all_students(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_import_fee_items() {
        let conn = setup();
        let csv = "\
id,name,category,amount,is_active,school_year,grade_level
1,Tuition,tuition,5000,true,,
2,Lab Fee,misc_fee,300,false,2024-2025,Grade 7
";
        assert_eq!(import_fee_items(&conn, csv.as_bytes()).unwrap(), 2);

        let items = fee_item::get_all_fee_items(&conn).unwrap();
        assert_eq!(items[0].category, FeeCategory::Tuition);
        assert_eq!(items[0].school_year, None);
        assert_eq!(items[1].category, FeeCategory::Misc);
        assert!(!items[1].is_active);
        assert_eq!(fee_item::get_active_fee_items(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_bad_row_rolls_back_file() {
        let conn = setup();
        let csv = "\
id,name,category,amount,is_active,school_year,grade_level
1,Tuition,tuition,5000,true,,
2,Parking,parking,100,true,,
";
        let err = import_fee_items(&conn, csv.as_bytes()).unwrap_err();

        assert!(matches!(err, LedgerError::ImportRow { line: 3, .. }), "{}", err);
        assert!(err.to_string().starts_with("CSV line 3:"));
        assert!(fee_item::get_all_fee_items(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_negative_amount_reports_its_line() {
        let conn = setup();
        let csv = "\
id,name,category,amount,is_active,school_year,grade_level
1,Tuition,tuition,5000,true,,
2,Books,books,800,true,,
3,Refund,other,-50,true,,
";
        let err = import_fee_items(&conn, csv.as_bytes()).unwrap_err();

        match err {
            LedgerError::ImportRow { line, source } => {
                assert_eq!(line, 4);
                assert!(matches!(*source, LedgerError::InvalidValue { field: "amount", .. }));
            }
            other => panic!("expected a row error, got {:?}", other),
        }
        assert!(fee_item::get_all_fee_items(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_import_grants() {
        let conn = setup();
        import_students(&conn, STUDENTS.as_bytes()).unwrap();
        let csv = "\
id,student_id,school_year,status,discount_amount
1,1,2024-2025,active,1000
2,1,2024-2025,revoked,400
";
        assert_eq!(import_grants(&conn, csv.as_bytes()).unwrap(), 2);
        assert_eq!(grant::active_grant_totals(&conn).unwrap()[0].total_discount, 1000.0);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("fee-items".parse::<ImportKind>().unwrap(), ImportKind::FeeItems);
        assert_eq!("Grants".parse::<ImportKind>().unwrap(), ImportKind::Grants);
        assert!("payments".parse::<ImportKind>().is_err());
    }
}
