//! Planfix task data model
//!
//! Task records arrive from the remote API in several inconsistent shapes:
//! dates may be nested objects or bare strings, assignees may be a list or a
//! `{users: [...]}` wrapper, and completion is encoded both as a sentinel
//! status id and as a status name in more than one language. This module
//! models those shapes explicitly and hosts the single copy of each
//! normalization rule (date resolution, completion predicate) that the rest
//! of the crate must go through.

use serde::{Deserialize, Serialize};

pub mod api;
pub mod service;

pub use api::{PlanfixClient, ProjectRecord, TasksPage};
pub use service::{PlanfixService, RefreshSummary};

/// Status id Planfix uses for completed tasks, regardless of status name
pub const COMPLETED_STATUS_ID: i64 = 3;

/// Substrings that mark a status name as "completed" (lowercase)
const COMPLETED_NAME_MARKERS: &[&str] = &["completed", "завершен", "выполнен"];

/// A task record as returned by the Planfix API.
///
/// Unknown fields are preserved in `extra` so the primary store round-trips
/// records it does not model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignees: Option<AssigneeField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigner: Option<Person>,
    #[serde(
        rename = "startDateTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub start_date_time: Option<DateField>,
    #[serde(
        rename = "endDateTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub end_date_time: Option<DateField>,
    #[serde(rename = "dateBegin", default, skip_serializing_if = "Option::is_none")]
    pub date_begin: Option<String>,
    #[serde(rename = "dateEnd", default, skip_serializing_if = "Option::is_none")]
    pub date_end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Task status reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Project reference embedded in a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A person reference (assignee or assigner)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Assignees appear either as a bare list or wrapped in `{"users": [...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssigneeField {
    List(Vec<Person>),
    Group(AssigneeGroup),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssigneeGroup {
    #[serde(default)]
    pub users: Vec<Person>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A start/end date in one of the remote encodings: a nested parts object
/// (`{date}`, `{dateTo}`, `{dateFrom}`) or a bare ISO string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateField {
    Parts(DateParts),
    Plain(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateParts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "dateTo", default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<String>,
    #[serde(rename = "dateFrom", default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    /// Whether this task is completed. Pure function of `status`: true when
    /// the status id equals the completion sentinel or the lowercased status
    /// name contains one of the known completion markers.
    pub fn is_completed(&self) -> bool {
        let Some(status) = &self.status else {
            return false;
        };
        if status.id == Some(COMPLETED_STATUS_ID) {
            return true;
        }
        match &status.name {
            Some(name) => {
                let lower = name.to_lowercase();
                COMPLETED_NAME_MARKERS.iter().any(|m| lower.contains(m))
            }
            None => false,
        }
    }

    /// Resolve the end date, trying the remote encodings in a fixed order:
    /// nested `date`, nested `dateTo`, `endDateTime` as a bare string, then
    /// the alternate `dateEnd` field. Returns `None` when no encoding
    /// matches; comparisons on the result are day-granularity string
    /// comparisons on the `YYYY-MM-DD` prefix, never parsed dates.
    pub fn end_date(&self) -> Option<&str> {
        if let Some(DateField::Parts(parts)) = &self.end_date_time {
            if let Some(date) = parts.date.as_deref() {
                return Some(date);
            }
            if let Some(date) = parts.date_to.as_deref() {
                return Some(date);
            }
        }
        if let Some(DateField::Plain(date)) = &self.end_date_time {
            return Some(date);
        }
        self.date_end.as_deref()
    }

    /// Resolve the start date; same order as [`Task::end_date`] with the
    /// start-side key names (`dateFrom` / `dateBegin`).
    pub fn start_date(&self) -> Option<&str> {
        if let Some(DateField::Parts(parts)) = &self.start_date_time {
            if let Some(date) = parts.date.as_deref() {
                return Some(date);
            }
            if let Some(date) = parts.date_from.as_deref() {
                return Some(date);
            }
        }
        if let Some(DateField::Plain(date)) = &self.start_date_time {
            return Some(date);
        }
        self.date_begin.as_deref()
    }

    /// Whether this task is overdue relative to `today` (ISO date string):
    /// not completed, has a resolvable end date, and that date sorts before
    /// today.
    pub fn is_overdue(&self, today: &str) -> bool {
        !self.is_completed() && matches!(self.end_date(), Some(end) if end < today)
    }

    /// Whether this task is due on or before `week_end` (ISO date string,
    /// today + 7 days): not completed, has a resolvable end date, and that
    /// date sorts at or before the window end.
    pub fn is_due_by(&self, week_end: &str) -> bool {
        !self.is_completed() && matches!(self.end_date(), Some(end) if end <= week_end)
    }

    /// The assignee list, regardless of which wire shape it arrived in
    pub fn assignee_list(&self) -> &[Person] {
        match &self.assignees {
            Some(AssigneeField::List(list)) => list,
            Some(AssigneeField::Group(group)) => &group.users,
            None => &[],
        }
    }

    /// Display name for the status, used for the stats histogram
    pub fn status_label(&self) -> String {
        match &self.status {
            Some(status) => match (&status.name, status.id) {
                (Some(name), _) => name.clone(),
                (None, Some(id)) => format!("Status ID {}", id),
                (None, None) => "Unknown".to_string(),
            },
            None => "Unknown".to_string(),
        }
    }
}

/// Today's date as an ISO `YYYY-MM-DD` string (local time)
pub fn today_iso() -> String {
    chrono::Local::now().date_naive().to_string()
}

/// The end of the "due this week" window: today + 7 days, ISO string
pub fn week_end_iso() -> String {
    (chrono::Local::now().date_naive() + chrono::Days::new(7)).to_string()
}
