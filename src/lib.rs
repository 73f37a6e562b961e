// SchoolHub Fee Ledger - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod audit;
pub mod backfill;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod grant_sync;
pub mod import;
pub mod lock;
pub mod portal;
pub mod recalculation;

// Re-export commonly used types
pub use audit::{audit_ledger, AuditEngine, AuditReport, Discrepancy, DiscrepancyCategory};
pub use backfill::{run_backfill, BackfillOutcome, BackfillReport};
pub use config::{FailurePolicy, LedgerConfig, RecalcStrategy};
pub use db::{
    get_events_for_entity, insert_event, ledger_fingerprint, open_database, setup_database, Event,
};
pub use entities::{
    EnrollmentClearance, EnrollmentStatus, FeeCategory, FeeItem, GrantRecipient, GrantStatus,
    GrantTotal, Student, StudentFee, StudentFilter,
};
pub use errors::{LedgerError, Result, RowFailure};
pub use grant_sync::{run_grant_sync, GrantSyncReport, GrantUpdate};
pub use import::{import_path, import_reader, ImportKind};
pub use lock::LedgerLock;
pub use portal::{all_portals, portal_for, NavItem, PortalConfig, Role};
pub use recalculation::{
    run_recalculation, FeeItemApplication, FeeItemFailure, RecalculationReport,
};

use std::sync::Once;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static INIT_TRACING: Once = Once::new();

/// Initializes the global tracing subscriber (RUST_LOG overrides the default level).
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("schoolhub_fees=info"));

        // Another subscriber may already be installed (tests, embedding apps).
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    });
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_tracing_is_repeatable() {
        super::init_tracing();
        super::init_tracing();
    }
}
