//! Planfix data service
//!
//! Composes the API client and the cache into the surface the rest of the
//! application talks to: freshness-gated refresh, forced refresh for the
//! periodic job, task lookup with a remote fallback, and search
//! passthroughs. This is the one layer allowed to degrade a failed fetch to
//! cached data; the adapter below it reports failures as errors.

use crate::cache::{CacheService, CacheStats, ProjectAggregate, UserAggregate};
use crate::planfix::api::{PlanfixClient, ProjectRecord};
use crate::planfix::{ProjectRef, Task};
use crate::Result;
use futures::future;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, warn};

/// Default staleness threshold for the primary store
pub const DEFAULT_MAX_AGE_MINUTES: u64 = 60;

/// Outcome of a forced refresh, for the periodic job's logging surface
#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub tasks_loaded: usize,
    pub projects_fixed: usize,
    pub duration_seconds: f64,
    pub stats: CacheStats,
}

/// High-level service over the Planfix client and cache
#[derive(Debug)]
pub struct PlanfixService {
    client: PlanfixClient,
    cache: CacheService,
}

impl PlanfixService {
    pub fn new(client: PlanfixClient, cache: CacheService) -> Self {
        Self { client, cache }
    }

    /// The underlying cache service
    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    /// Whether the primary store is younger than `max_age_minutes`
    pub fn is_cache_valid(&self, max_age_minutes: u64) -> bool {
        self.cache.is_cache_valid(max_age_minutes)
    }

    /// Minutes since the last successful refresh
    pub fn cache_age_minutes(&self) -> Option<f64> {
        self.cache.cache_age_minutes()
    }

    /// Return all tasks, refreshing the primary store first when it is
    /// stale or `force` is set. A failed refresh never invalidates the
    /// existing store: the error is logged and the stale snapshot served.
    pub async fn ensure_fresh(&self, force: bool, max_age_minutes: u64) -> Vec<Task> {
        if !force && self.cache.is_cache_valid(max_age_minutes) {
            return self.cache.get_all_tasks();
        }

        match self.refresh_pipeline().await {
            Ok(tasks) => tasks,
            Err(e) => {
                let age = self
                    .cache
                    .cache_age_minutes()
                    .map(|a| format!("{:.1} min old", a))
                    .unwrap_or_else(|| "never populated".to_string());
                warn!("Planfix refresh failed, serving cached data ({}): {}", age, e);
                self.cache.get_all_tasks()
            }
        }
    }

    /// Run the full refresh pipeline unconditionally and report a summary.
    /// Unlike [`ensure_fresh`](Self::ensure_fresh) this propagates fetch
    /// errors to the caller.
    pub async fn force_refresh(&self) -> Result<RefreshSummary> {
        let started = Instant::now();
        let (tasks, projects_fixed) = self.refresh_inner().await?;
        let stats = self.cache.get_stats();
        let summary = RefreshSummary {
            tasks_loaded: tasks.len(),
            projects_fixed,
            duration_seconds: started.elapsed().as_secs_f64(),
            stats,
        };
        info!(
            "Cache refresh completed in {:.2}s: {} tasks, {} project names fixed",
            summary.duration_seconds, summary.tasks_loaded, summary.projects_fixed
        );
        Ok(summary)
    }

    async fn refresh_pipeline(&self) -> Result<Vec<Task>> {
        let (tasks, _) = self.refresh_inner().await?;
        Ok(tasks)
    }

    async fn refresh_inner(&self) -> Result<(Vec<Task>, usize)> {
        info!("Refreshing Planfix task cache");
        let (mut tasks, projects) =
            future::try_join(self.fetch_all_tasks(), self.client.list_projects()).await?;
        info!(
            "Loaded {} tasks and {} projects from Planfix",
            tasks.len(),
            projects.len()
        );
        let fixed = backfill_project_names(&mut tasks, &projects);
        if fixed > 0 {
            info!("Backfilled {} project names on tasks", fixed);
        }

        self.cache.store().replace_all(&tasks)?;
        self.cache.refresh_all_caches();
        Ok((tasks, fixed))
    }

    /// Paginate the task listing until a page comes back empty or shorter
    /// than the page size
    async fn fetch_all_tasks(&self) -> Result<Vec<Task>> {
        let mut all_tasks = Vec::new();
        let mut page = 0;

        loop {
            let result = self.client.list_tasks_page(page).await?;
            if result.tasks.is_empty() {
                break;
            }
            let page_len = result.tasks.len();
            all_tasks.extend(result.tasks);
            if page_len < self.client.page_size() as usize {
                break;
            }
            page += 1;
        }

        Ok(all_tasks)
    }

    /// Look up a task by id: the cached snapshot first, then one direct
    /// remote fetch before reporting not-found
    pub async fn get_task_by_id(&self, task_id: i64) -> Option<Task> {
        if let Some(task) = self.cache.task_by_id(task_id) {
            return Some(task);
        }

        info!("Task {} not in cache, fetching from Planfix", task_id);
        match self.client.task_detail(task_id).await {
            Ok(Some(task)) => Some(task),
            Ok(None) => {
                warn!("Planfix returned no record for task {}", task_id);
                None
            }
            Err(e) => {
                warn!("Failed to fetch task {} from Planfix: {}", task_id, e);
                None
            }
        }
    }

    // Cache passthroughs used by the enrichment layer and the CLI

    pub fn get_stats(&self) -> CacheStats {
        self.cache.get_stats()
    }

    pub fn get_active_tasks(&self) -> Vec<Task> {
        self.cache.get_active_tasks()
    }

    pub fn get_overdue_tasks(&self) -> Vec<Task> {
        self.cache.get_overdue_tasks()
    }

    pub fn get_projects(&self) -> Vec<ProjectAggregate> {
        self.cache.get_projects()
    }

    pub fn get_users(&self) -> Vec<UserAggregate> {
        self.cache.get_users()
    }

    pub fn search_tasks(&self, query: &str, include_completed: bool) -> Vec<Task> {
        self.cache.search_tasks(query, include_completed)
    }

    pub fn search_projects(&self, query: &str) -> Vec<ProjectAggregate> {
        self.cache.search_projects(query)
    }

    pub fn search_users(&self, query: &str) -> Vec<UserAggregate> {
        self.cache.search_users(query)
    }
}

fn needs_name_fix(project: &ProjectRef) -> bool {
    match (project.name.as_deref(), project.id) {
        (None, _) => true,
        (Some(name), _) if name.is_empty() => true,
        (Some(name), Some(id)) => {
            name == format!("Project {}", id) || name == format!("Проект {}", id)
        }
        (Some(_), None) => false,
    }
}

/// Replace missing or placeholder project names on tasks with the real
/// names from the project listing; tasks whose project is unknown to the
/// listing get a deterministic placeholder. Returns how many names were
/// taken from the listing.
fn backfill_project_names(tasks: &mut [Task], projects: &[ProjectRecord]) -> usize {
    let name_by_id: HashMap<i64, &str> = projects
        .iter()
        .filter_map(|p| match (p.id, p.name.as_deref()) {
            (Some(id), Some(name)) if !name.is_empty() => Some((id, name)),
            _ => None,
        })
        .collect();

    let mut fixed = 0;
    for task in tasks.iter_mut() {
        let Some(project) = task.project.as_mut() else {
            continue;
        };
        if !needs_name_fix(project) {
            continue;
        }
        if let Some(id) = project.id {
            if let Some(name) = name_by_id.get(&id) {
                project.name = Some(name.to_string());
                fixed += 1;
            } else {
                project.name = Some(format!("Project {}", id));
            }
        }
    }
    fixed
}
