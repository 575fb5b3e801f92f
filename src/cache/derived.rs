//! Derived view computation
//!
//! Pure functions that turn the primary task snapshot into the precomputed
//! views: active/completed/overdue task lists, per-project and per-user
//! aggregates, and the stats summary. Everything here goes through the
//! shared completion predicate and date resolution on [`Task`]; no view
//! re-implements either rule.
//!
//! Aggregation maps are insertion-ordered (`IndexMap`) and id sets are
//! `BTreeSet`, so regenerating from an unchanged snapshot reproduces the
//! persisted files byte for byte.

use crate::planfix::Task;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Per-project counters accumulated over the full task snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectAggregate {
    pub id: i64,
    pub name: String,
    pub task_count: u64,
    pub active_tasks: u64,
    pub completed_tasks: u64,
    pub overdue_tasks: u64,
}

/// Per-user counters accumulated over the full task snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAggregate {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub assigned_tasks: u64,
    pub assigned_active: u64,
    pub assigned_completed: u64,
    pub assigned_overdue: u64,
    pub created_tasks: u64,
    /// Ids of projects this user touched as assignee or creator
    pub projects: BTreeSet<String>,
}

/// Snapshot-level statistics summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_tasks: u64,
    pub active_tasks: u64,
    pub completed_tasks: u64,
    pub overdue_tasks: u64,
    pub tasks_due_this_week: u64,
    /// Percentage of completed tasks, rounded to two decimals
    pub completion_rate: f64,
    pub total_projects: u64,
    pub avg_tasks_per_project: f64,
    /// Histogram of tasks per status display name
    pub status_counts: IndexMap<String, u64>,
    pub cache_updated_at: String,
    pub cache_age_minutes: f64,
}

/// Tasks that are not completed
pub fn active_tasks(all: &[Task]) -> Vec<Task> {
    all.iter().filter(|t| !t.is_completed()).cloned().collect()
}

/// Tasks that are completed
pub fn completed_tasks(all: &[Task]) -> Vec<Task> {
    all.iter().filter(|t| t.is_completed()).cloned().collect()
}

/// Active tasks whose resolvable end date sorts before `today`
pub fn overdue_tasks(active: &[Task], today: &str) -> Vec<Task> {
    active
        .iter()
        .filter(|t| t.is_overdue(today))
        .cloned()
        .collect()
}

/// Active tasks whose resolvable end date sorts at or before `week_end`
pub fn tasks_due_by(active: &[Task], week_end: &str) -> Vec<Task> {
    active
        .iter()
        .filter(|t| t.is_due_by(week_end))
        .cloned()
        .collect()
}

fn project_placeholder(id: i64) -> String {
    format!("Project {}", id)
}

fn user_placeholder(id: i64) -> String {
    format!("User {}", id)
}

fn is_project_placeholder(name: &str, id: i64) -> bool {
    name.is_empty() || name == project_placeholder(id) || name == format!("Проект {}", id)
}

/// Build per-project aggregates in one pass over all tasks. Tasks without a
/// project reference (or without a project id) contribute nothing. A
/// placeholder name recorded on first sight is overwritten by a later record
/// that carries a real name.
pub fn project_aggregates(all: &[Task], today: &str) -> Vec<ProjectAggregate> {
    let mut map: IndexMap<String, ProjectAggregate> = IndexMap::new();

    for task in all {
        let Some(project) = &task.project else {
            continue;
        };
        let Some(id) = project.id else {
            continue;
        };

        let entry = map
            .entry(id.to_string())
            .or_insert_with(|| ProjectAggregate {
                id,
                name: project
                    .name
                    .clone()
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| project_placeholder(id)),
                task_count: 0,
                active_tasks: 0,
                completed_tasks: 0,
                overdue_tasks: 0,
            });

        if is_project_placeholder(&entry.name, id) {
            if let Some(name) = project.name.as_deref().filter(|n| !n.is_empty()) {
                entry.name = name.to_string();
            }
        }

        entry.task_count += 1;
        if task.is_completed() {
            entry.completed_tasks += 1;
        } else {
            entry.active_tasks += 1;
            if task.is_overdue(today) {
                entry.overdue_tasks += 1;
            }
        }
    }

    map.into_values().collect()
}

/// Build per-user aggregates in one pass over all tasks. Assignees and the
/// task creator ("assigner") both count; persons without an id contribute
/// nothing. Name and email follow the same backfill policy as projects.
pub fn user_aggregates(all: &[Task], today: &str) -> Vec<UserAggregate> {
    let mut map: IndexMap<String, UserAggregate> = IndexMap::new();

    for task in all {
        let completed = task.is_completed();
        let overdue = task.is_overdue(today);
        let project_key = task
            .project
            .as_ref()
            .and_then(|p| p.id)
            .map(|id| id.to_string());

        for assignee in task.assignee_list() {
            let Some(id) = assignee.id else {
                continue;
            };
            let entry = map
                .entry(id.to_string())
                .or_insert_with(|| blank_user(id, assignee.name.as_deref(), assignee.email.as_deref()));
            backfill_user(entry, assignee.name.as_deref(), assignee.email.as_deref());

            entry.assigned_tasks += 1;
            if completed {
                entry.assigned_completed += 1;
            } else {
                entry.assigned_active += 1;
                if overdue {
                    entry.assigned_overdue += 1;
                }
            }
            if let Some(key) = &project_key {
                entry.projects.insert(key.clone());
            }
        }

        if let Some(assigner) = &task.assigner {
            if let Some(id) = assigner.id {
                let entry = map
                    .entry(id.to_string())
                    .or_insert_with(|| blank_user(id, assigner.name.as_deref(), assigner.email.as_deref()));
                backfill_user(entry, assigner.name.as_deref(), assigner.email.as_deref());

                entry.created_tasks += 1;
                if let Some(key) = &project_key {
                    entry.projects.insert(key.clone());
                }
            }
        }
    }

    map.into_values().collect()
}

fn blank_user(id: i64, name: Option<&str>, email: Option<&str>) -> UserAggregate {
    UserAggregate {
        id,
        name: name
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| user_placeholder(id)),
        email: email.unwrap_or_default().to_string(),
        assigned_tasks: 0,
        assigned_active: 0,
        assigned_completed: 0,
        assigned_overdue: 0,
        created_tasks: 0,
        projects: BTreeSet::new(),
    }
}

fn backfill_user(entry: &mut UserAggregate, name: Option<&str>, email: Option<&str>) {
    if entry.name.is_empty() || entry.name == user_placeholder(entry.id) {
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            entry.name = name.to_string();
        }
    }
    if entry.email.is_empty() {
        if let Some(email) = email.filter(|e| !e.is_empty()) {
            entry.email = email.to_string();
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Build the stats summary from the already computed views.
///
/// `cache_age_minutes` is the primary store age at generation time; the
/// generation timestamp makes stats the one view that is not byte-stable
/// across regenerations.
pub fn build_stats(
    all: &[Task],
    active: &[Task],
    completed_count: usize,
    overdue_count: usize,
    total_projects: usize,
    week_end: &str,
    cache_age_minutes: f64,
) -> CacheStats {
    let due_this_week = tasks_due_by(active, week_end).len();

    let mut status_counts: IndexMap<String, u64> = IndexMap::new();
    for task in all {
        *status_counts.entry(task.status_label()).or_insert(0) += 1;
    }

    let completion_rate = if all.is_empty() {
        0.0
    } else {
        round2(completed_count as f64 / all.len() as f64 * 100.0)
    };
    let avg_tasks_per_project = if total_projects == 0 {
        0.0
    } else {
        round2(all.len() as f64 / total_projects as f64)
    };

    CacheStats {
        total_tasks: all.len() as u64,
        active_tasks: active.len() as u64,
        completed_tasks: completed_count as u64,
        overdue_tasks: overdue_count as u64,
        tasks_due_this_week: due_this_week as u64,
        completion_rate,
        total_projects: total_projects as u64,
        avg_tasks_per_project,
        status_counts,
        cache_updated_at: chrono::Local::now().to_rfc3339(),
        cache_age_minutes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tasks(value: serde_json::Value) -> Vec<Task> {
        serde_json::from_value(value).unwrap()
    }

    const TODAY: &str = "2024-06-15";
    const WEEK_END: &str = "2024-06-22";

    fn mixed_snapshot() -> Vec<Task> {
        tasks(json!([
            {
                "id": 1,
                "name": "Fix billing export",
                "status": {"id": 2, "name": "Active"},
                "project": {"id": 100, "name": "Billing"},
                "assignees": [{"id": 10, "name": "Anna", "email": "anna@example.com"}],
                "assigner": {"id": 20, "name": "Boris"},
                "endDateTime": {"date": "2024-06-10"}
            },
            {
                "id": 2,
                "name": "Write onboarding docs",
                "status": {"id": 3, "name": "Завершена"},
                "project": {"id": 100},
                "assignees": {"users": [{"id": 10, "name": "Anna"}]}
            },
            {
                "id": 3,
                "name": "Plan Q3 roadmap",
                "status": {"id": 2, "name": "Active"},
                "project": {"id": 200, "name": "Ops"},
                "assignees": [{"id": 11, "name": "Chen"}],
                "endDateTime": {"dateTo": "2024-06-20"}
            },
            {
                "id": 4,
                "name": "No project, no people",
                "status": {"id": 2, "name": "Active"}
            }
        ]))
    }

    #[test]
    fn active_and_completed_partition_the_snapshot() {
        let all = mixed_snapshot();
        let active = active_tasks(&all);
        let completed = completed_tasks(&all);
        assert_eq!(active.len() + completed.len(), all.len());
        assert_eq!(completed.len(), 1);
        assert!(active.iter().all(|t| !t.is_completed()));
    }

    #[test]
    fn overdue_only_counts_past_due_active_tasks() {
        let all = mixed_snapshot();
        let active = active_tasks(&all);
        let overdue = overdue_tasks(&active, TODAY);
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, 1);
    }

    #[test]
    fn due_this_week_includes_overdue_and_upcoming() {
        let all = mixed_snapshot();
        let active = active_tasks(&all);
        let due = tasks_due_by(&active, WEEK_END);
        // Task 1 (already overdue) and task 3 (due inside the window)
        assert_eq!(due.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn project_aggregates_hold_counter_invariants() {
        let all = mixed_snapshot();
        let projects = project_aggregates(&all, TODAY);
        assert_eq!(projects.len(), 2);

        for project in &projects {
            assert_eq!(
                project.task_count,
                project.active_tasks + project.completed_tasks,
                "project {}",
                project.id
            );
            assert!(project.overdue_tasks <= project.active_tasks);
        }

        let billing = projects.iter().find(|p| p.id == 100).unwrap();
        assert_eq!(billing.task_count, 2);
        assert_eq!(billing.active_tasks, 1);
        assert_eq!(billing.completed_tasks, 1);
        assert_eq!(billing.overdue_tasks, 1);
    }

    #[test]
    fn project_name_backfilled_from_fuller_record() {
        let all = tasks(json!([
            {"id": 1, "status": {"id": 2}, "project": {"id": 100}},
            {"id": 2, "status": {"id": 2}, "project": {"id": 100, "name": "Billing"}}
        ]));
        let projects = project_aggregates(&all, TODAY);
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "Billing");
    }

    #[test]
    fn user_aggregates_hold_counter_invariants() {
        let all = mixed_snapshot();
        let users = user_aggregates(&all, TODAY);

        for user in &users {
            assert_eq!(
                user.assigned_tasks,
                user.assigned_active + user.assigned_completed,
                "user {}",
                user.id
            );
            assert!(user.assigned_overdue <= user.assigned_active);
        }

        let anna = users.iter().find(|u| u.id == 10).unwrap();
        assert_eq!(anna.assigned_tasks, 2);
        assert_eq!(anna.assigned_active, 1);
        assert_eq!(anna.assigned_completed, 1);
        assert_eq!(anna.assigned_overdue, 1);
        assert_eq!(anna.email, "anna@example.com");
        assert_eq!(
            anna.projects.iter().collect::<Vec<_>>(),
            vec![&"100".to_string()]
        );

        let boris = users.iter().find(|u| u.id == 20).unwrap();
        assert_eq!(boris.created_tasks, 1);
        assert_eq!(boris.assigned_tasks, 0);
        assert!(boris.projects.contains("100"));
    }

    #[test]
    fn creator_only_user_gets_created_counter() {
        let all = tasks(json!([
            {"id": 1, "status": {"id": 2}, "assigner": {"id": 30, "name": "Dana"}},
            {"id": 2, "status": {"id": 2}, "assigner": {"id": 30}}
        ]));
        let users = user_aggregates(&all, TODAY);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].created_tasks, 2);
        assert_eq!(users[0].name, "Dana");
    }

    #[test]
    fn stats_match_reference_scenario() {
        // One task completed via the sentinel id, one via a Russian status
        // name, one active and overdue since yesterday.
        let all = tasks(json!([
            {"id": 1, "status": {"id": 3, "name": "Anything"}},
            {"id": 2, "status": {"id": 7, "name": "Завершено"}},
            {
                "id": 3,
                "status": {"id": 2, "name": "Active"},
                "endDateTime": {"date": "2024-06-14"}
            }
        ]));
        let active = active_tasks(&all);
        let completed = completed_tasks(&all);
        let overdue = overdue_tasks(&active, TODAY);
        let projects = project_aggregates(&all, TODAY);

        let stats = build_stats(
            &all,
            &active,
            completed.len(),
            overdue.len(),
            projects.len(),
            WEEK_END,
            0.0,
        );

        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.completed_tasks, 2);
        assert_eq!(stats.active_tasks, 1);
        assert_eq!(stats.overdue_tasks, 1);
        assert_eq!(stats.completion_rate, 66.67);
        assert_eq!(stats.total_projects, 0);
        assert_eq!(stats.avg_tasks_per_project, 0.0);
    }

    #[test]
    fn status_histogram_uses_display_labels() {
        let all = tasks(json!([
            {"id": 1, "status": {"id": 2, "name": "Active"}},
            {"id": 2, "status": {"id": 2, "name": "Active"}},
            {"id": 3, "status": {"id": 9}},
            {"id": 4}
        ]));
        let stats = build_stats(&all, &active_tasks(&all), 0, 0, 0, WEEK_END, 0.0);
        assert_eq!(stats.status_counts.get("Active"), Some(&2));
        assert_eq!(stats.status_counts.get("Status ID 9"), Some(&1));
        assert_eq!(stats.status_counts.get("Unknown"), Some(&1));
    }

    #[test]
    fn empty_snapshot_yields_zeroed_stats() {
        let stats = build_stats(&[], &[], 0, 0, 0, WEEK_END, 0.0);
        assert_eq!(stats.total_tasks, 0);
        assert_eq!(stats.completion_rate, 0.0);
        assert_eq!(stats.avg_tasks_per_project, 0.0);
    }
}
