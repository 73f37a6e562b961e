// ⚙️ Ledger configuration
//
// Loaded from a JSON file (SCHOOLHUB_CONFIG, or ./schoolhub.json when it
// exists) with SCHOOLHUB_DB overriding the database path. Every field has a
// default so an empty `{}` file is valid.

use crate::errors::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "SCHOOLHUB_CONFIG";
pub const DATABASE_ENV: &str = "SCHOOLHUB_DB";
pub const DEFAULT_CONFIG_FILE: &str = "schoolhub.json";

/// How recalculation rebuilds the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecalcStrategy {
    /// Delete every fee row, then replay active fee items (inside one transaction).
    Rebuild,
    /// Compute target charges, then upsert them, preserving payments and discounts.
    DiffUpsert,
}

/// What recalculation does when a single fee item fails to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Roll back the whole run on the first failing item.
    FailFast,
    /// Roll back only the failing item, collect its error, keep going.
    SkipAndReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub database_path: PathBuf,
    pub recalc_strategy: RecalcStrategy,
    pub fee_item_failure_policy: FailurePolicy,
    /// Reset discounts on rows whose student no longer has active grants.
    pub clear_stale_discounts: bool,
    /// A ledger lock older than this is considered abandoned and reclaimed.
    pub lock_stale_after_secs: i64,
    /// Recorded as the actor on audit-trail events.
    pub actor: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            database_path: PathBuf::from("schoolhub.db"),
            recalc_strategy: RecalcStrategy::Rebuild,
            fee_item_failure_policy: FailurePolicy::SkipAndReport,
            clear_stale_discounts: false,
            lock_stale_after_secs: 3600,
            actor: "schoolhub-fees".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load config from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            LedgerError::Config(format!("failed to read {:?}: {}", path.as_ref(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: LedgerConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve config from the environment: explicit file, default file, or defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            Err(_) => LedgerConfig::default(),
        };

        if let Ok(db) = std::env::var(DATABASE_ENV) {
            if !db.trim().is_empty() {
                config.database_path = PathBuf::from(db);
            }
        }

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.lock_stale_after_secs <= 0 {
            return Err(LedgerError::Config(format!(
                "lock_stale_after_secs must be positive, got {}",
                self.lock_stale_after_secs
            )));
        }
        if self.actor.trim().is_empty() {
            return Err(LedgerError::Config("actor must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = LedgerConfig::from_json("{}").unwrap();

        assert_eq!(config.recalc_strategy, RecalcStrategy::Rebuild);
        assert_eq!(config.fee_item_failure_policy, FailurePolicy::SkipAndReport);
        assert!(!config.clear_stale_discounts);
        assert_eq!(config.lock_stale_after_secs, 3600);
    }

    #[test]
    fn test_kebab_case_enums() {
        let config = LedgerConfig::from_json(
            r#"{"recalc_strategy": "diff-upsert", "fee_item_failure_policy": "fail-fast"}"#,
        )
        .unwrap();

        assert_eq!(config.recalc_strategy, RecalcStrategy::DiffUpsert);
        assert_eq!(config.fee_item_failure_policy, FailurePolicy::FailFast);
    }

    #[test]
    fn test_rejects_non_positive_lock_window() {
        let err = LedgerConfig::from_json(r#"{"lock_stale_after_secs": 0}"#).unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schoolhub.json");
        fs::write(&path, r#"{"database_path": "fees.db", "actor": "bursar"}"#).unwrap();

        let config = LedgerConfig::from_file(&path).unwrap();
        assert_eq!(config.database_path, PathBuf::from("fees.db"));
        assert_eq!(config.actor, "bursar");
    }
}
