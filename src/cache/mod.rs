//! File-backed Planfix data cache
//!
//! The cache has two layers. The primary store ([`store::PrimaryStore`]) is
//! the full task snapshot pulled from the remote API. On top of it sit six
//! derived views ([`derived`]), each persisted to its own JSON file in the
//! same directory and each independently regenerable: a missing or corrupt
//! view file is treated the same as "not yet generated" and rebuilt from the
//! primary store on the next read.
//!
//! [`CacheService`] ties the layers together. It is an explicitly
//! constructed value with the cache directory as configuration; tests give
//! every service its own temp directory.

use crate::planfix::{today_iso, week_end_iso, Task};
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

pub mod derived;
pub mod store;

pub use derived::{CacheStats, ProjectAggregate, UserAggregate};
pub use store::PrimaryStore;

/// Derived view file names, all in the cache directory
pub const ACTIVE_TASKS_CACHE: &str = "active_tasks.json";
pub const COMPLETED_TASKS_CACHE: &str = "completed_tasks.json";
pub const OVERDUE_TASKS_CACHE: &str = "overdue_tasks.json";
pub const PROJECTS_CACHE: &str = "projects.json";
pub const USERS_CACHE: &str = "users.json";
pub const STATS_CACHE: &str = "stats.json";

/// One single-flight guard per derived view, held across regenerate+persist
#[derive(Debug, Default)]
struct ViewGuards {
    active: Mutex<()>,
    completed: Mutex<()>,
    overdue: Mutex<()>,
    projects: Mutex<()>,
    users: Mutex<()>,
    stats: Mutex<()>,
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Service for the Planfix data cache and its derived views
#[derive(Debug)]
pub struct CacheService {
    store: PrimaryStore,
    guards: ViewGuards,
}

impl CacheService {
    /// Create a cache service rooted at `dir`
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        Ok(Self {
            store: PrimaryStore::new(dir)?,
            guards: ViewGuards::default(),
        })
    }

    /// The underlying primary store
    pub fn store(&self) -> &PrimaryStore {
        &self.store
    }

    /// All tasks from the primary store (empty on absent/corrupt snapshot)
    pub fn get_all_tasks(&self) -> Vec<Task> {
        self.store.read_all()
    }

    /// Whether the primary store is younger than `max_age_minutes`
    pub fn is_cache_valid(&self, max_age_minutes: u64) -> bool {
        self.store.is_valid(max_age_minutes)
    }

    /// Minutes since the last refresh, or `None` if never populated
    pub fn cache_age_minutes(&self) -> Option<f64> {
        self.store.age_minutes()
    }

    /// Active (not completed) tasks, cache-aside
    pub fn get_active_tasks(&self) -> Vec<Task> {
        if let Some(view) = self.read_view(ACTIVE_TASKS_CACHE) {
            return view;
        }
        let _flight = lock(&self.guards.active);
        if let Some(view) = self.read_view(ACTIVE_TASKS_CACHE) {
            return view;
        }
        self.build_active(&self.store.read_all())
    }

    /// Completed tasks, cache-aside
    pub fn get_completed_tasks(&self) -> Vec<Task> {
        if let Some(view) = self.read_view(COMPLETED_TASKS_CACHE) {
            return view;
        }
        let _flight = lock(&self.guards.completed);
        if let Some(view) = self.read_view(COMPLETED_TASKS_CACHE) {
            return view;
        }
        self.build_completed(&self.store.read_all())
    }

    /// Overdue tasks, cache-aside. Regeneration reads the active view, so a
    /// cold cache generates active tasks first.
    pub fn get_overdue_tasks(&self) -> Vec<Task> {
        if let Some(view) = self.read_view(OVERDUE_TASKS_CACHE) {
            return view;
        }
        let active = self.get_active_tasks();
        let _flight = lock(&self.guards.overdue);
        if let Some(view) = self.read_view(OVERDUE_TASKS_CACHE) {
            return view;
        }
        self.build_overdue(&active)
    }

    /// Per-project aggregates, cache-aside
    pub fn get_projects(&self) -> Vec<ProjectAggregate> {
        if let Some(view) = self.read_view(PROJECTS_CACHE) {
            return view;
        }
        let _flight = lock(&self.guards.projects);
        if let Some(view) = self.read_view(PROJECTS_CACHE) {
            return view;
        }
        self.build_projects(&self.store.read_all())
    }

    /// Per-user aggregates, cache-aside
    pub fn get_users(&self) -> Vec<UserAggregate> {
        if let Some(view) = self.read_view(USERS_CACHE) {
            return view;
        }
        let _flight = lock(&self.guards.users);
        if let Some(view) = self.read_view(USERS_CACHE) {
            return view;
        }
        self.build_users(&self.store.read_all())
    }

    /// Stats summary, cache-aside. Regeneration pulls in every other view.
    pub fn get_stats(&self) -> CacheStats {
        if let Some(view) = self.read_view(STATS_CACHE) {
            return view;
        }
        let all = self.store.read_all();
        let active = self.get_active_tasks();
        let completed = self.get_completed_tasks().len();
        let overdue = self.get_overdue_tasks().len();
        let projects = self.get_projects().len();

        let _flight = lock(&self.guards.stats);
        if let Some(view) = self.read_view(STATS_CACHE) {
            return view;
        }
        self.build_stats(&all, &active, completed, overdue, projects)
    }

    /// Regenerate every derived view wholesale from the primary store.
    ///
    /// There is no partial invalidation: all six views are recomputed in
    /// full. With an unchanged primary store the five list views come out
    /// byte-identical; stats embeds its generation timestamp.
    pub fn refresh_all_caches(&self) {
        info!("Refreshing all derived caches");
        let all = self.store.read_all();

        let active = {
            let _flight = lock(&self.guards.active);
            self.build_active(&all)
        };
        let completed = {
            let _flight = lock(&self.guards.completed);
            self.build_completed(&all)
        };
        let overdue = {
            let _flight = lock(&self.guards.overdue);
            self.build_overdue(&active)
        };
        let projects = {
            let _flight = lock(&self.guards.projects);
            self.build_projects(&all)
        };
        {
            let _flight = lock(&self.guards.users);
            self.build_users(&all);
        }
        {
            let _flight = lock(&self.guards.stats);
            self.build_stats(&all, &active, completed.len(), overdue.len(), projects.len());
        }
        info!("All derived caches refreshed");
    }

    /// Look up a task by id in the primary store. Cache side only; the
    /// remote fallback lives in the service layer.
    pub fn task_by_id(&self, task_id: i64) -> Option<Task> {
        self.store.read_all().into_iter().find(|t| t.id == task_id)
    }

    /// Case-insensitive substring search over task name, description,
    /// status name, and project name. Searches active tasks only unless
    /// `include_completed`.
    pub fn search_tasks(&self, query: &str, include_completed: bool) -> Vec<Task> {
        let query = query.to_lowercase();
        let pool = if include_completed {
            self.store.read_all()
        } else {
            self.get_active_tasks()
        };

        pool.into_iter()
            .filter(|task| {
                let name_hit = task
                    .name
                    .as_deref()
                    .is_some_and(|n| n.to_lowercase().contains(&query));
                let description_hit = task
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&query));
                let status_hit = task
                    .status
                    .as_ref()
                    .and_then(|s| s.name.as_deref())
                    .is_some_and(|n| n.to_lowercase().contains(&query));
                let project_hit = task
                    .project
                    .as_ref()
                    .and_then(|p| p.name.as_deref())
                    .is_some_and(|n| n.to_lowercase().contains(&query));
                name_hit || description_hit || status_hit || project_hit
            })
            .collect()
    }

    /// Substring search over project aggregate names
    pub fn search_projects(&self, query: &str) -> Vec<ProjectAggregate> {
        let query = query.to_lowercase();
        self.get_projects()
            .into_iter()
            .filter(|p| p.name.to_lowercase().contains(&query))
            .collect()
    }

    /// Substring search over user aggregate names and emails
    pub fn search_users(&self, query: &str) -> Vec<UserAggregate> {
        let query = query.to_lowercase();
        self.get_users()
            .into_iter()
            .filter(|u| {
                u.name.to_lowercase().contains(&query)
                    || u.email.to_lowercase().contains(&query)
            })
            .collect()
    }

    // Builders: compute a view from its inputs and persist it. A persist
    // failure is logged and the in-memory value still returned; a cache
    // write must never fail a read.

    fn build_active(&self, all: &[Task]) -> Vec<Task> {
        let view = derived::active_tasks(all);
        self.persist_view(ACTIVE_TASKS_CACHE, &view);
        debug!("Generated active tasks cache with {} tasks", view.len());
        view
    }

    fn build_completed(&self, all: &[Task]) -> Vec<Task> {
        let view = derived::completed_tasks(all);
        self.persist_view(COMPLETED_TASKS_CACHE, &view);
        debug!("Generated completed tasks cache with {} tasks", view.len());
        view
    }

    fn build_overdue(&self, active: &[Task]) -> Vec<Task> {
        let view = derived::overdue_tasks(active, &today_iso());
        self.persist_view(OVERDUE_TASKS_CACHE, &view);
        debug!("Generated overdue tasks cache with {} tasks", view.len());
        view
    }

    fn build_projects(&self, all: &[Task]) -> Vec<ProjectAggregate> {
        let view = derived::project_aggregates(all, &today_iso());
        self.persist_view(PROJECTS_CACHE, &view);
        debug!("Generated projects cache with {} projects", view.len());
        view
    }

    fn build_users(&self, all: &[Task]) -> Vec<UserAggregate> {
        let view = derived::user_aggregates(all, &today_iso());
        self.persist_view(USERS_CACHE, &view);
        debug!("Generated users cache with {} users", view.len());
        view
    }

    fn build_stats(
        &self,
        all: &[Task],
        active: &[Task],
        completed: usize,
        overdue: usize,
        projects: usize,
    ) -> CacheStats {
        let view = derived::build_stats(
            all,
            active,
            completed,
            overdue,
            projects,
            &week_end_iso(),
            self.store.age_minutes().unwrap_or(0.0),
        );
        self.persist_view(STATS_CACHE, &view);
        debug!("Generated stats cache");
        view
    }

    /// Read a persisted view if it exists and parses cleanly; anything else
    /// is treated as "not yet generated".
    fn read_view<T: DeserializeOwned>(&self, file: &str) -> Option<T> {
        let path = self.store.dir().join(file);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(view) => Some(view),
            Err(e) => {
                warn!("Derived cache {} corrupt, regenerating: {}", file, e);
                None
            }
        }
    }

    fn persist_view<T: Serialize>(&self, file: &str, value: &T) {
        let path = self.store.dir().join(file);
        if let Err(e) = store::write_json_atomic(&path, value) {
            warn!("Failed to persist derived cache {}: {}", file, e);
        }
    }

    /// Absolute path of a cache file (used for diagnostics)
    pub fn view_path(&self, file: &str) -> PathBuf {
        self.store.dir().join(file)
    }
}

/// Whether a derived cache file exists on disk
pub fn view_file_exists(dir: &Path, file: &str) -> bool {
    dir.join(file).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn seeded_service(tasks: serde_json::Value) -> (TempDir, CacheService) {
        let dir = TempDir::new().unwrap();
        let service = CacheService::new(dir.path()).unwrap();
        let tasks: Vec<Task> = serde_json::from_value(tasks).unwrap();
        service.store().replace_all(&tasks).unwrap();
        (dir, service)
    }

    fn yesterday() -> String {
        (chrono::Local::now().date_naive() - chrono::Days::new(1)).to_string()
    }

    fn reference_snapshot() -> serde_json::Value {
        json!([
            {"id": 1, "status": {"id": 3, "name": "Whatever"}},
            {"id": 2, "status": {"id": 7, "name": "Завершено"}},
            {
                "id": 3,
                "name": "Late task",
                "status": {"id": 2, "name": "Active"},
                "endDateTime": {"date": yesterday()}
            }
        ])
    }

    #[test]
    fn reference_scenario_counts() {
        let (_dir, service) = seeded_service(reference_snapshot());
        let stats = service.get_stats();
        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.completed_tasks, 2);
        assert_eq!(stats.active_tasks, 1);
        assert_eq!(stats.overdue_tasks, 1);
        assert_eq!(stats.completion_rate, 66.67);
    }

    #[test]
    fn views_are_lazily_generated_and_persisted() {
        let (dir, service) = seeded_service(reference_snapshot());
        assert!(!view_file_exists(dir.path(), ACTIVE_TASKS_CACHE));

        let active = service.get_active_tasks();
        assert_eq!(active.len(), 1);
        assert!(view_file_exists(dir.path(), ACTIVE_TASKS_CACHE));

        // Overdue generation pulls the active view in
        let overdue = service.get_overdue_tasks();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, 3);
        assert!(view_file_exists(dir.path(), OVERDUE_TASKS_CACHE));
    }

    #[test]
    fn corrupt_view_file_triggers_regeneration() {
        let (dir, service) = seeded_service(reference_snapshot());
        std::fs::write(dir.path().join(ACTIVE_TASKS_CACHE), "[{broken").unwrap();
        let active = service.get_active_tasks();
        assert_eq!(active.len(), 1);
    }

    #[test]
    fn stale_view_survives_until_explicit_refresh() {
        // A derived file left over from an older snapshot is served as-is;
        // refresh_all_caches replaces it wholesale.
        let (dir, service) = seeded_service(reference_snapshot());
        service.refresh_all_caches();

        let smaller: Vec<Task> =
            serde_json::from_value(json!([{"id": 9, "status": {"id": 2}}])).unwrap();
        service.store().replace_all(&smaller).unwrap();

        assert_eq!(service.get_active_tasks().len(), 1); // old view still on disk
        assert_eq!(
            service.get_active_tasks()[0].id,
            3,
            "pre-refresh view comes from the old snapshot"
        );

        service.refresh_all_caches();
        let active = service.get_active_tasks();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, 9);
        let _ = dir;
    }

    #[test]
    fn refresh_all_is_idempotent_for_list_views() {
        let (dir, service) = seeded_service(reference_snapshot());

        service.refresh_all_caches();
        let read = |file: &str| std::fs::read(dir.path().join(file)).unwrap();
        let first: Vec<Vec<u8>> = [
            ACTIVE_TASKS_CACHE,
            COMPLETED_TASKS_CACHE,
            OVERDUE_TASKS_CACHE,
            PROJECTS_CACHE,
            USERS_CACHE,
        ]
        .iter()
        .map(|f| read(f))
        .collect();

        service.refresh_all_caches();
        let second: Vec<Vec<u8>> = [
            ACTIVE_TASKS_CACHE,
            COMPLETED_TASKS_CACHE,
            OVERDUE_TASKS_CACHE,
            PROJECTS_CACHE,
            USERS_CACHE,
        ]
        .iter()
        .map(|f| read(f))
        .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn task_lookup_scans_primary_store() {
        let (_dir, service) = seeded_service(reference_snapshot());
        assert!(service.task_by_id(3).is_some());
        assert!(service.task_by_id(999).is_none());
    }

    #[test]
    fn search_tasks_matches_all_text_fields() {
        let (_dir, service) = seeded_service(json!([
            {
                "id": 1,
                "name": "Deploy billing service",
                "status": {"id": 2, "name": "Active"},
                "project": {"id": 100, "name": "Infrastructure"}
            },
            {
                "id": 2,
                "name": "Old cleanup",
                "description": "remove billing leftovers",
                "status": {"id": 3, "name": "Completed"}
            }
        ]));

        // Active pool only by default
        let hits = service.search_tasks("billing", false);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);

        // Completed included on request; description matches too
        let hits = service.search_tasks("billing", true);
        assert_eq!(hits.len(), 2);

        // Project name is searchable
        let hits = service.search_tasks("infra", false);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn search_projects_and_users_by_name() {
        let (_dir, service) = seeded_service(json!([
            {
                "id": 1,
                "status": {"id": 2},
                "project": {"id": 100, "name": "Billing"},
                "assignees": [{"id": 10, "name": "Anna", "email": "anna@corp.io"}]
            }
        ]));

        assert_eq!(service.search_projects("bill").len(), 1);
        assert!(service.search_projects("nothing").is_empty());
        assert_eq!(service.search_users("anna").len(), 1);
        assert_eq!(service.search_users("corp.io").len(), 1);
    }
}
