//! Planfix REST API client
//!
//! Thin adapter over the remote task service: a paginated task listing, a
//! project listing, and a single-task detail fetch. Transport and decode
//! failures surface as errors here; deciding whether to degrade to cached
//! data is the service layer's job, so "empty" and "failed" stay
//! distinguishable at this boundary.

use crate::planfix::Task;
use crate::utils::errors::PlanchatError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Records per page; the remote API caps pages at this size
pub const PAGE_SIZE: u32 = 100;

/// Field projection requested for task listings
const TASK_FIELDS: &str =
    "id,name,status,project,startDateTime,endDateTime,description,assignees,assigner";

/// Field projection requested for project listings
const PROJECT_FIELDS: &str = "id,name,status,startDateTime,endDateTime,description";

/// A project record from the project-listing endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One page of the task listing
#[derive(Debug, Clone, Default)]
pub struct TasksPage {
    pub tasks: Vec<Task>,
    pub total_count: u64,
}

/// HTTP client for the Planfix REST API
#[derive(Debug, Clone)]
pub struct PlanfixClient {
    client: Client,
    base_url: String,
    api_token: String,
    page_size: u32,
}

impl PlanfixClient {
    /// Create a client for `https://{account}.planfix.com/rest`
    pub fn new(account: &str, api_token: String, timeout: Duration) -> Self {
        Self::with_base_url(
            format!("https://{}.planfix.com/rest", account),
            api_token,
            timeout,
        )
    }

    /// Create a client against an explicit base URL (used by tests)
    pub fn with_base_url(base_url: String, api_token: String, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
            api_token,
            page_size: PAGE_SIZE,
        }
    }

    /// List all projects (single page; the account-level project count fits
    /// one page in practice)
    pub async fn list_projects(&self) -> Result<Vec<ProjectRecord>, PlanchatError> {
        let body = json!({
            "offset": 0,
            "pageSize": self.page_size,
            "filters": [
                {"type": 5001, "operator": "equal", "value": ""}
            ],
            "fields": PROJECT_FIELDS,
        });

        let response = self.post("project/list", &body).await?;
        let projects = extract_list(&response, "projects")?;
        debug!("Planfix returned {} projects", projects.len());
        Ok(projects)
    }

    /// Fetch one page of the task listing. Pagination is offset-based with
    /// a fixed page size; a page shorter than the page size is the last one.
    pub async fn list_tasks_page(&self, page: u32) -> Result<TasksPage, PlanchatError> {
        let body = json!({
            "offset": page * self.page_size,
            "pageSize": self.page_size,
            "fields": TASK_FIELDS,
        });

        let response = self.post("task/list", &body).await?;
        let tasks: Vec<Task> = extract_list(&response, "tasks")?;
        let total_count = response.get("count").and_then(|c| c.as_u64()).unwrap_or(0);
        debug!("Planfix page {} returned {} tasks", page, tasks.len());

        Ok(TasksPage { tasks, total_count })
    }

    /// Fetch a single task's detail record, or `None` when the remote side
    /// has no task payload for the id
    pub async fn task_detail(&self, task_id: i64) -> Result<Option<Task>, PlanchatError> {
        let url = format!("{}/task/{}", self.base_url, task_id);
        debug!("Planfix request: GET {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(status, &body));
        }

        let value: serde_json::Value = response.json().await?;
        // The detail endpoint wraps the record under "task"; tolerate a bare
        // record too.
        let record = value.get("task").cloned().unwrap_or(value);
        if record.is_null() || !record.is_object() || record.get("id").is_none() {
            return Ok(None);
        }
        let task: Task = serde_json::from_value(record)?;
        Ok(Some(task))
    }

    /// The page size this client paginates with
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    async fn post(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, PlanchatError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!("Planfix request: POST {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(status, &body));
        }

        Ok(response.json().await?)
    }
}

/// Pull a record list out of a Planfix response envelope. Responses carry
/// the list under the entity key (`tasks`, `projects`) or, on some accounts,
/// under `data`; a missing key means an empty page.
fn extract_list<T: serde::de::DeserializeOwned>(
    response: &serde_json::Value,
    key: &str,
) -> Result<Vec<T>, PlanchatError> {
    let list = response
        .get(key)
        .filter(|v| v.is_array())
        .or_else(|| response.get("data").filter(|v| v.is_array()));
    match list {
        Some(value) => Ok(serde_json::from_value(value.clone())?),
        None => Ok(Vec::new()),
    }
}

fn map_status_error(status: u16, body: &str) -> PlanchatError {
    match status {
        401 | 403 => PlanchatError::authentication(format!(
            "Planfix rejected the API token (HTTP {})",
            status
        )),
        404 => PlanchatError::not_found(format!("Planfix endpoint (HTTP 404): {}", body)),
        _ => PlanchatError::planfix(format!("HTTP {}: {}", status, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_list_accepts_entity_and_data_envelopes() {
        let under_entity = json!({"tasks": [{"id": 1}], "count": 1});
        let tasks: Vec<Task> = extract_list(&under_entity, "tasks").unwrap();
        assert_eq!(tasks.len(), 1);

        let under_data = json!({"data": [{"id": 2}]});
        let tasks: Vec<Task> = extract_list(&under_data, "tasks").unwrap();
        assert_eq!(tasks[0].id, 2);

        let missing = json!({"result": "success"});
        let tasks: Vec<Task> = extract_list(&missing, "tasks").unwrap();
        assert!(tasks.is_empty());
    }

    #[test]
    fn status_errors_map_by_class() {
        assert!(matches!(
            map_status_error(401, ""),
            PlanchatError::Authentication { .. }
        ));
        assert!(matches!(
            map_status_error(404, "gone"),
            PlanchatError::NotFound { .. }
        ));
        assert!(matches!(
            map_status_error(500, "boom"),
            PlanchatError::Planfix { .. }
        ));
    }
}
