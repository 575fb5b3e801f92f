//! Primary cache store: the full task snapshot plus the freshness marker
//!
//! One JSON array file holds every task pulled from the remote API, and a
//! plain-text file holds the Unix timestamp of the last successful refresh.
//! `replace_all` is the only mutator; reads never touch the network. All
//! derived caches are rebuilt from this store.

use crate::planfix::Task;
use crate::Result;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// File name of the primary task snapshot
pub const TASKS_CACHE_FILE: &str = "tasks_cache.json";
/// File name of the freshness marker
pub const LAST_UPDATE_FILE: &str = "last_update.txt";

/// File-backed store for the primary task snapshot
#[derive(Debug, Clone)]
pub struct PrimaryStore {
    dir: PathBuf,
}

impl PrimaryStore {
    /// Create a store rooted at `dir`, creating the directory if missing
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .map_err(|e| crate::PlanchatError::file_system(dir.clone(), e))?;
            info!("Created cache directory: {}", dir.display());
        }
        Ok(Self { dir })
    }

    /// The cache directory this store writes into
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn tasks_path(&self) -> PathBuf {
        self.dir.join(TASKS_CACHE_FILE)
    }

    fn marker_path(&self) -> PathBuf {
        self.dir.join(LAST_UPDATE_FILE)
    }

    /// Read the full task snapshot. An absent or corrupt file degrades to an
    /// empty list with a warning; it never fails the caller.
    pub fn read_all(&self) -> Vec<Task> {
        let path = self.tasks_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Tasks cache not readable ({}): {}", path.display(), e);
                return Vec::new();
            }
        };
        match serde_json::from_str(&content) {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("Tasks cache corrupt ({}): {}", path.display(), e);
                Vec::new()
            }
        }
    }

    /// Atomically replace the full snapshot and record the refresh time
    pub fn replace_all(&self, tasks: &[Task]) -> Result<()> {
        write_json_atomic(&self.tasks_path(), tasks)?;
        self.touch_marker()?;
        info!("Primary store replaced with {} tasks", tasks.len());
        Ok(())
    }

    /// Rewrite the freshness marker with the current time
    pub fn touch_marker(&self) -> Result<()> {
        let now = unix_now();
        fs::write(self.marker_path(), format!("{}", now))
            .map_err(|e| crate::PlanchatError::file_system(self.marker_path(), e))?;
        Ok(())
    }

    /// Minutes since the last successful refresh, or `None` if the store has
    /// never been populated (or the marker is unreadable)
    pub fn age_minutes(&self) -> Option<f64> {
        let raw = fs::read_to_string(self.marker_path()).ok()?;
        let last_update: f64 = raw.trim().parse().ok()?;
        Some((unix_now() - last_update) / 60.0)
    }

    /// Whether the store is fresh enough to serve without a refresh
    pub fn is_valid(&self, max_age_minutes: u64) -> bool {
        match self.age_minutes() {
            Some(age) => age < max_age_minutes as f64,
            None => false,
        }
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Serialize `value` to a temp file in the target directory, then rename it
/// over the destination so readers never observe a partial write.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, content).map_err(|e| crate::PlanchatError::file_system(tmp.clone(), e))?;
    fs::rename(&tmp, path).map_err(|e| crate::PlanchatError::file_system(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_tasks() -> Vec<Task> {
        serde_json::from_value(json!([
            {
                "id": 1,
                "name": "Ship invoices",
                "status": {"id": 2, "name": "Active"},
                "endDateTime": {"date": "2024-05-01"}
            },
            {
                "id": 2,
                "name": "Архив",
                "status": {"id": 3, "name": "Завершена"},
                "customMeta": {"nested": true}
            }
        ]))
        .unwrap()
    }

    #[test]
    fn read_all_on_empty_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = PrimaryStore::new(dir.path()).unwrap();
        assert!(store.read_all().is_empty());
        assert_eq!(store.age_minutes(), None);
        assert!(!store.is_valid(60));
    }

    #[test]
    fn replace_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = PrimaryStore::new(dir.path()).unwrap();
        let tasks = sample_tasks();

        store.replace_all(&tasks).unwrap();
        assert_eq!(store.read_all(), tasks);
    }

    #[test]
    fn replace_all_marks_store_fresh() {
        let dir = TempDir::new().unwrap();
        let store = PrimaryStore::new(dir.path()).unwrap();

        store.replace_all(&sample_tasks()).unwrap();
        assert!(store.is_valid(60));
        let age = store.age_minutes().unwrap();
        assert!(age >= 0.0 && age < 1.0, "age was {}", age);
    }

    #[test]
    fn store_goes_stale_after_max_age() {
        let dir = TempDir::new().unwrap();
        let store = PrimaryStore::new(dir.path()).unwrap();
        store.replace_all(&sample_tasks()).unwrap();

        // Rewind the marker 61 minutes
        let rewound = super::unix_now() - 61.0 * 60.0;
        fs::write(dir.path().join(LAST_UPDATE_FILE), format!("{}", rewound)).unwrap();

        assert!(!store.is_valid(60));
        assert!(store.is_valid(120));
        assert!(store.age_minutes().unwrap() > 60.0);
    }

    #[test]
    fn corrupt_snapshot_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        let store = PrimaryStore::new(dir.path()).unwrap();
        fs::write(dir.path().join(TASKS_CACHE_FILE), "{not json").unwrap();
        assert!(store.read_all().is_empty());
    }

    #[test]
    fn corrupt_marker_reads_as_never_refreshed() {
        let dir = TempDir::new().unwrap();
        let store = PrimaryStore::new(dir.path()).unwrap();
        fs::write(dir.path().join(LAST_UPDATE_FILE), "not-a-float").unwrap();
        assert_eq!(store.age_minutes(), None);
        assert!(!store.is_valid(60));
    }
}
