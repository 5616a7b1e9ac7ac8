use std::collections::HashMap;

use serde_json::{Value, json};
use tokio::sync::Mutex;

use lattice_core::error::Error;
use lattice_core::records::{ProjectInfo, class, fallback, table};

use crate::session::{SHORT_CALL_TIMEOUT, Session};
use crate::store::Store;

/// Session-owned project resolution cache. Populated on first lookup and
/// kept for the process lifetime — projects are rarely renamed and this
/// bridge is short-lived per invocation, so there is no invalidation.
#[derive(Default)]
pub struct ProjectCache {
    entries: Mutex<HashMap<String, ProjectInfo>>,
}

impl ProjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a project by name, id, or identifier — first match wins;
    /// identifiers are unique by platform convention so there is no
    /// tie-break. A miss lists the available project names.
    pub async fn resolve(
        &self,
        session: &Session,
        store: &Store,
        project_ref: &str,
    ) -> Result<ProjectInfo, Error> {
        if let Some(info) = self.entries.lock().await.get(project_ref) {
            return Ok(info.clone());
        }

        let projects = session
            .find_all(class::PROJECT, json!({}), json!({}), SHORT_CALL_TIMEOUT)
            .await?;

        let matched = projects.iter().find(|p| {
            [p.get("name"), p.get("_id"), p.get("identifier")]
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .any(|candidate| candidate == project_ref)
        });
        let Some(project) = matched else {
            let mut names: Vec<&str> = projects
                .iter()
                .filter_map(|p| p.get("name").and_then(Value::as_str))
                .collect();
            names.sort_unstable();
            return Err(Error::NotFound(format!(
                "project '{project_ref}' not found; available: {}",
                names.join(", ")
            )));
        };

        let info = self.augment(store, project).await?;
        tracing::debug!(project = %info.name, space = %info.id, "project resolved");
        self.entries
            .lock()
            .await
            .insert(project_ref.to_string(), info.clone());
        Ok(info)
    }

    /// Fills workspace id and default task kind from one sample child
    /// record of the project's space — the realtime project record does not
    /// carry either. Falls back to the platform default kind when the space
    /// is empty.
    async fn augment(&self, store: &Store, project: &Value) -> Result<ProjectInfo, Error> {
        let id = string_field(project, "_id");
        let mut info = ProjectInfo {
            name: string_field(project, "name"),
            identifier: string_field(project, "identifier"),
            workspace_id: None,
            default_kind: fallback::TASK_KIND.to_string(),
            default_status: project
                .get("defaultIssueStatus")
                .and_then(Value::as_str)
                .map(str::to_string),
            id,
        };

        let sample = match store.sample_in_space(table::TASK, &info.id).await? {
            Some(row) => Some(row),
            None => store.sample_in_space(table::DOCUMENT, &info.id).await?,
        };
        if let Some(row) = sample {
            info.workspace_id = Some(row.workspace_id);
            if let Some(kind) = row.data.get("kind").and_then(Value::as_str) {
                info.default_kind = kind.to_string();
            }
        }

        if info.default_status.is_none() {
            info.default_status = store
                .first_status_in_space(&info.id)
                .await?
                .map(|row| row.id);
        }

        Ok(info)
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
