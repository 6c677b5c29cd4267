use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{Datapoint, DatapointWithNeighbors, ResultStore, StoreError, StoreResult};

/// Relational backend. Datapoint ids are the autoincrement surrogate key, so
/// id order and capture order agree as long as appends go through the
/// connection mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(db_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS datapoints (
                datapoint_id INTEGER PRIMARY KEY AUTOINCREMENT,
                suite_id TEXT NOT NULL,
                test_id TEXT NOT NULL,
                captured_at TEXT NOT NULL,
                test_results TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_dp_suite_test ON datapoints(suite_id, test_id, datapoint_id);
            CREATE INDEX IF NOT EXISTS idx_dp_captured ON datapoints(captured_at);
        ",
        )?;
        Ok(())
    }
}

fn row_to_datapoint(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_datapoint(raw: (i64, String, String, String, String)) -> StoreResult<Datapoint> {
    let (id, suite_id, test_id, captured_at, test_results) = raw;
    let captured_at = DateTime::parse_from_rfc3339(&captured_at)
        .map_err(|e| StoreError::Corrupt(format!("datapoint {} captured_at: {}", id, e)))?
        .with_timezone(&Utc);
    Ok(Datapoint {
        suite_id,
        test_id,
        datapoint_id: id.to_string(),
        captured_at,
        payload: serde_json::from_str(&test_results)?,
    })
}

impl ResultStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn save(&self, suite_id: &str, test_id: &str, payload: &Value) -> StoreResult<String> {
        let json = serde_json::to_string(payload)?;
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        conn.execute(
            "INSERT INTO datapoints (suite_id, test_id, captured_at, test_results)
             VALUES (?1, ?2, ?3, ?4)",
            params![suite_id, test_id, now, json],
        )?;
        Ok(conn.last_insert_rowid().to_string())
    }

    fn get_datapoint(
        &self,
        suite_id: &str,
        test_id: &str,
        datapoint_id: &str,
    ) -> StoreResult<Option<DatapointWithNeighbors>> {
        let Ok(id) = datapoint_id.parse::<i64>() else {
            return Ok(None);
        };
        let conn = self.conn()?;

        let raw = conn
            .query_row(
                "SELECT datapoint_id, suite_id, test_id, captured_at, test_results
                 FROM datapoints WHERE suite_id=?1 AND test_id=?2 AND datapoint_id=?3",
                params![suite_id, test_id, id],
                row_to_datapoint,
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let previous_id: Option<i64> = conn.query_row(
            "SELECT MAX(datapoint_id) FROM datapoints
             WHERE suite_id=?1 AND test_id=?2 AND datapoint_id < ?3",
            params![suite_id, test_id, id],
            |row| row.get(0),
        )?;
        let next_id: Option<i64> = conn.query_row(
            "SELECT MIN(datapoint_id) FROM datapoints
             WHERE suite_id=?1 AND test_id=?2 AND datapoint_id > ?3",
            params![suite_id, test_id, id],
            |row| row.get(0),
        )?;

        Ok(Some(DatapointWithNeighbors {
            datapoint: into_datapoint(raw)?,
            previous_id: previous_id.map(|id| id.to_string()),
            next_id: next_id.map(|id| id.to_string()),
        }))
    }

    fn list_suites(&self) -> StoreResult<BTreeSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT suite_id FROM datapoints")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<BTreeSet<String>, _>>()
            .map_err(Into::into)
    }

    fn list_tests_in_suite(&self, suite_id: &str) -> StoreResult<BTreeSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT test_id FROM datapoints WHERE suite_id=?1")?;
        let rows = stmt.query_map(params![suite_id], |row| row.get(0))?;
        rows.collect::<Result<BTreeSet<String>, _>>()
            .map_err(Into::into)
    }

    fn list_datapoints(&self, suite_id: &str, test_id: &str) -> StoreResult<Vec<Datapoint>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT datapoint_id, suite_id, test_id, captured_at, test_results
             FROM datapoints WHERE suite_id=?1 AND test_id=?2
             ORDER BY captured_at ASC, datapoint_id ASC",
        )?;
        let rows = stmt.query_map(params![suite_id, test_id], row_to_datapoint)?;
        let raw = rows.collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(into_datapoint).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_are_increasing_per_save() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.save("s", "t", &json!({"n": 1})).unwrap();
        let b = store.save("s", "t", &json!({"n": 2})).unwrap();
        assert!(a.parse::<i64>().unwrap() < b.parse::<i64>().unwrap());
    }

    #[test]
    fn test_non_numeric_id_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save("s", "t", &json!({})).unwrap();
        assert!(store.get_datapoint("s", "t", "abc").unwrap().is_none());
    }

    #[test]
    fn test_neighbors_stay_within_group() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store.save("s", "t", &json!({})).unwrap();
        store.save("s", "other", &json!({})).unwrap();
        let last = store.save("s", "t", &json!({})).unwrap();

        let found = store.get_datapoint("s", "t", &last).unwrap().unwrap();
        assert_eq!(found.previous_id.as_deref(), Some(first.as_str()));
        assert!(found.next_id.is_none());
    }
}
