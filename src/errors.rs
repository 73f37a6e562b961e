// ⚠️ Error taxonomy for ledger jobs
//
// Expected absences (no fee row for a grant) and missing school years are
// NOT errors - they are counted in the job reports. Everything here is a
// real failure of a row, a step, or a whole run.

use thiserror::Error;

/// Error type that captures ledger storage and job failures.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Another ledger job holds the mutation lock; nothing was changed.
    #[error("Ledger job already in progress: {job} (started {started_at})")]
    JobInProgress { job: String, started_at: String },

    /// Clearing the ledger failed; recalculation aborted before any rebuild.
    #[error("Failed to clear student fee ledger: {0}")]
    ClearFailed(#[source] Box<LedgerError>),

    /// A fee item failed to apply while the run was configured to fail fast.
    #[error("Fee item {fee_item_id} ({name}) failed to apply: {source}")]
    FeeItemFailed {
        fee_item_id: i64,
        name: String,
        #[source]
        source: Box<LedgerError>,
    },

    /// A CSV row was rejected; the whole file was rolled back.
    #[error("CSV line {line}: {source}")]
    ImportRow {
        line: u64,
        #[source]
        source: Box<LedgerError>,
    },

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// A single row that failed inside a partial-failure tolerant job
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RowFailure {
    pub student_id: i64,
    pub school_year: Option<String>,
    pub error: String,
}
