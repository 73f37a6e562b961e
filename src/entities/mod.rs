// Entity Models + repository queries
//
// Each entity module owns its row type and the explicit query functions
// that read and write it. Filters are passed in as values - there is no
// hidden query state.

pub mod student;
pub mod fee_item;
pub mod student_fee;
pub mod grant;

pub use student::{EnrollmentClearance, EnrollmentStatus, Student, StudentFilter};
pub use fee_item::{FeeCategory, FeeItem};
pub use student_fee::StudentFee;
pub use grant::{GrantRecipient, GrantStatus, GrantTotal};

use rusqlite::types::{FromSqlError, FromSqlResult, ValueRef};
use std::str::FromStr;

/// Shared FromSql body for the text-backed enums
pub(crate) fn text_enum<T: FromStr>(value: ValueRef<'_>) -> FromSqlResult<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text = value.as_str()?;
    text.parse::<T>().map_err(|e| FromSqlError::Other(Box::new(e)))
}

/// Treat blank strings as absent
pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
