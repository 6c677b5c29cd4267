//! Directory-per-datapoint backend:
//! `<root>/<suiteId>/<testId>/<YYYY-MM-DD-HH-mm-ss>/results.json`.
//!
//! A second save inside the same UTC second claims `<stamp>-001`, `-002`, …
//! through an atomic `create_dir`, so names never collide and their
//! lexicographic order is capture order.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use super::{Datapoint, DatapointWithNeighbors, ResultStore, StoreError, StoreResult};

const RESULTS_FILE: &str = "results.json";
const DIR_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";
const STAMP_LEN: usize = 19;
const MAX_SAME_SECOND_SAVES: u32 = 1000;

pub struct FsStore {
    root: PathBuf,
    save_lock: Mutex<()>,
}

impl FsStore {
    pub fn new(root: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            save_lock: Mutex::new(()),
        })
    }

    fn test_dir(&self, suite_id: &str, test_id: &str) -> StoreResult<PathBuf> {
        check_component(suite_id)?;
        check_component(test_id)?;
        Ok(self.root.join(suite_id).join(test_id))
    }

    /// Claim a fresh datapoint directory under `test_dir`.
    fn claim_dir(test_dir: &Path, now: DateTime<Utc>) -> StoreResult<String> {
        let stamp = now.format(DIR_FORMAT).to_string();
        for n in 0..MAX_SAME_SECOND_SAVES {
            let name = if n == 0 {
                stamp.clone()
            } else {
                format!("{}-{:03}", stamp, n)
            };
            match std::fs::create_dir(test_dir.join(&name)) {
                Ok(()) => return Ok(name),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Corrupt(format!(
            "too many datapoints in {} for second {}",
            test_dir.display(),
            stamp
        )))
    }

    /// Datapoint directory names of a test, oldest first. Directories without
    /// a results file are not datapoints.
    fn datapoint_ids(test_dir: &Path) -> StoreResult<Vec<String>> {
        let mut ids: Vec<String> = read_dir_names(test_dir)?
            .into_iter()
            .filter(|name| parse_captured_at(name).is_some())
            .filter(|name| test_dir.join(name).join(RESULTS_FILE).is_file())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn read_datapoint(
        &self,
        suite_id: &str,
        test_id: &str,
        test_dir: &Path,
        datapoint_id: &str,
    ) -> StoreResult<Option<Datapoint>> {
        let Some(captured_at) = parse_captured_at(datapoint_id) else {
            return Ok(None);
        };
        let path = test_dir.join(datapoint_id).join(RESULTS_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            // Directory claimed but the results file is not written yet.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Datapoint {
            suite_id: suite_id.to_string(),
            test_id: test_id.to_string(),
            datapoint_id: datapoint_id.to_string(),
            captured_at,
            payload: serde_json::from_str(&content)?,
        }))
    }
}

/// Reject anything that could escape the results root.
fn check_component(id: &str) -> StoreResult<()> {
    if id.is_empty()
        || id.starts_with('.')
        || id.contains('/')
        || id.contains('\\')
        || id.contains('\0')
    {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

fn parse_captured_at(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.get(..STAMP_LEN)?;
    let rest = &name[STAMP_LEN..];
    let suffix_ok = rest.is_empty()
        || (rest.len() > 1 && rest.starts_with('-') && rest[1..].bytes().all(|b| b.is_ascii_digit()));
    if !suffix_ok {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, DIR_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Visible subdirectory names; a missing directory reads as empty.
fn read_dir_names(dir: &Path) -> StoreResult<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

impl ResultStore for FsStore {
    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    fn save(&self, suite_id: &str, test_id: &str, payload: &Value) -> StoreResult<String> {
        let test_dir = self.test_dir(suite_id, test_id)?;
        let json = serde_json::to_vec_pretty(payload)?;

        let _guard = self.save_lock.lock().map_err(|_| StoreError::Poisoned)?;
        std::fs::create_dir_all(&test_dir)?;
        let datapoint_id = Self::claim_dir(&test_dir, Utc::now())?;
        let claimed = test_dir.join(&datapoint_id);
        if let Err(e) = std::fs::write(claimed.join(RESULTS_FILE), json) {
            if let Err(cleanup) = std::fs::remove_dir_all(&claimed) {
                warn!("Failed to remove {}: {}", claimed.display(), cleanup);
            }
            return Err(e.into());
        }
        debug!("Wrote {}/{}/{}", suite_id, test_id, datapoint_id);
        Ok(datapoint_id)
    }

    fn get_datapoint(
        &self,
        suite_id: &str,
        test_id: &str,
        datapoint_id: &str,
    ) -> StoreResult<Option<DatapointWithNeighbors>> {
        let Ok(test_dir) = self.test_dir(suite_id, test_id) else {
            return Ok(None);
        };
        let ids = Self::datapoint_ids(&test_dir)?;
        let Some(index) = ids.iter().position(|id| id == datapoint_id) else {
            return Ok(None);
        };
        let Some(datapoint) = self.read_datapoint(suite_id, test_id, &test_dir, datapoint_id)? else {
            return Ok(None);
        };

        Ok(Some(DatapointWithNeighbors {
            datapoint,
            previous_id: index.checked_sub(1).map(|i| ids[i].clone()),
            next_id: ids.get(index + 1).cloned(),
        }))
    }

    fn list_suites(&self) -> StoreResult<BTreeSet<String>> {
        Ok(read_dir_names(&self.root)?.into_iter().collect())
    }

    fn list_tests_in_suite(&self, suite_id: &str) -> StoreResult<BTreeSet<String>> {
        if check_component(suite_id).is_err() {
            return Ok(BTreeSet::new());
        }
        let suite_dir = self.root.join(suite_id);
        let mut tests = BTreeSet::new();
        for test_id in read_dir_names(&suite_dir)? {
            if !Self::datapoint_ids(&suite_dir.join(&test_id))?.is_empty() {
                tests.insert(test_id);
            }
        }
        Ok(tests)
    }

    fn list_datapoints(&self, suite_id: &str, test_id: &str) -> StoreResult<Vec<Datapoint>> {
        let Ok(test_dir) = self.test_dir(suite_id, test_id) else {
            return Ok(Vec::new());
        };
        let mut datapoints = Vec::new();
        for id in Self::datapoint_ids(&test_dir)? {
            match self.read_datapoint(suite_id, test_id, &test_dir, &id) {
                Ok(Some(dp)) => datapoints.push(dp),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable datapoint {}/{}/{}: {}", suite_id, test_id, id, e),
            }
        }
        Ok(datapoints)
    }
}
