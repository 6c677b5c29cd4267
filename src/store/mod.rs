pub mod fs;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::{AppSettings, StoreKind};

pub use fs::FsStore;
pub use sqlite::SqliteStore;

// ============================================================================
// Data model
// ============================================================================

/// One persisted measurement. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Datapoint {
    pub suite_id: String,
    pub test_id: String,
    pub datapoint_id: String,
    pub captured_at: DateTime<Utc>,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct DatapointWithNeighbors {
    pub datapoint: Datapoint,
    pub previous_id: Option<String>,
    pub next_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Backend contract
// ============================================================================

/// Append-only datapoint storage, grouped by (suite, test).
///
/// Within a group identifiers are totally ordered and that order matches
/// capture time. Both backends honour the same contract.
pub trait ResultStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Append a result and return its new datapoint id.
    fn save(&self, suite_id: &str, test_id: &str, payload: &Value) -> StoreResult<String>;

    /// A datapoint plus the ids of its neighbours in capture order.
    fn get_datapoint(
        &self,
        suite_id: &str,
        test_id: &str,
        datapoint_id: &str,
    ) -> StoreResult<Option<DatapointWithNeighbors>>;

    fn list_suites(&self) -> StoreResult<BTreeSet<String>>;

    /// Tests with at least one stored datapoint.
    fn list_tests_in_suite(&self, suite_id: &str) -> StoreResult<BTreeSet<String>>;

    /// All datapoints of a test, oldest first.
    fn list_datapoints(&self, suite_id: &str, test_id: &str) -> StoreResult<Vec<Datapoint>>;
}

pub type SharedStore = Arc<dyn ResultStore>;

/// Open the backend selected on the command line.
pub fn open_store(settings: &AppSettings) -> StoreResult<SharedStore> {
    let store: SharedStore = match settings.store {
        StoreKind::Sqlite => Arc::new(SqliteStore::new(&settings.db_path)?),
        StoreKind::Filesystem => Arc::new(FsStore::new(&settings.results_dir)?),
    };
    Ok(store)
}
