use serde_json::{Value, json};

use lattice_core::digest::integrity_hash;
use lattice_core::error::Error;
use lattice_core::identity::IdentityTables;
use lattice_core::markup;
use lattice_core::records::{
    IssueData, ProjectInfo, Setting, class, fallback, generate_id, issue_identifier, issue_rank,
    next_sequence, now_millis, table,
};

use crate::project::ProjectCache;
use crate::session::Session;
use crate::store::{NewRecord, RecordRow, Store};

/// The bridge's write side. Every mutation replays, by hand, the write
/// sequence the platform's own server performs: primary record, then
/// transaction-log record, then activity record, each stamped with the
/// derived integrity hash.
///
/// The writes of one logical operation are issued sequentially with no
/// wrapping transaction, matching the platform's observed behavior: a crash
/// mid-sequence leaves the log rows that were already committed in place.
/// Correctness of the sequence computation additionally assumes this bridge
/// is the only active writer for the project while an operation runs.
pub struct Bridge {
    pub session: Session,
    pub store: Store,
    pub projects: ProjectCache,
    pub identities: IdentityTables,
}

#[derive(Debug, Clone, Default)]
pub struct CreateIssueSpec {
    pub project: String,
    pub title: String,
    pub description: Option<String>,
    pub assignee: Option<String>,
    pub author: Option<String>,
    pub priority: Option<i64>,
    pub label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedIssue {
    pub id: String,
    pub sequence: i64,
    pub identifier: String,
}

#[derive(Debug, Clone, Default)]
pub struct IssuePatch {
    pub title: Option<String>,
    /// Plain text; uploaded through the markup path before merging.
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<i64>,
    pub estimation: Option<f64>,
    pub spent_time: Option<f64>,
    pub remaining_time: Option<f64>,
    /// Human name, resolved against the assignee table before merging.
    pub assignee: Setting<String>,
}

#[derive(Debug, Clone)]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub created_on: i64,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct IssueSummary {
    pub identifier: String,
    pub title: String,
    pub status: String,
    pub priority: i64,
    pub assignee: Option<String>,
    pub created_on: i64,
}

#[derive(Debug, Clone, Default)]
pub struct CreateDocumentSpec {
    pub project: String,
    pub title: String,
    pub content: String,
    pub author: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedDocument {
    pub id: String,
    pub content_ref: String,
}

impl Bridge {
    /// Identity stamped on `createdBy`/`modifiedBy`: an explicit author name
    /// through the creator table, else the session's own identity, else the
    /// config-user fallback.
    fn actor(&self, author: Option<&str>) -> String {
        author
            .and_then(|name| self.identities.resolve_creator(name))
            .or_else(|| self.session.social_id())
            .unwrap_or(fallback::IDENTITY)
            .to_string()
    }

    async fn resolve_project(&self, project_ref: &str) -> Result<ProjectInfo, Error> {
        self.projects
            .resolve(&self.session, &self.store, project_ref)
            .await
    }

    /// Workspace scoping for a write into `space`. The project record does
    /// not carry it, so probe siblings: any task in the space, any document
    /// in the space, then any task anywhere.
    async fn resolve_workspace(
        &self,
        project: &ProjectInfo,
        space: &str,
    ) -> Result<String, Error> {
        if let Some(workspace_id) = &project.workspace_id {
            return Ok(workspace_id.clone());
        }
        if let Some(row) = self.store.sample_in_space(table::TASK, space).await? {
            return Ok(row.workspace_id);
        }
        if let Some(row) = self.store.sample_in_space(table::DOCUMENT, space).await? {
            return Ok(row.workspace_id);
        }
        if let Some(row) = self.store.any_task().await? {
            return Ok(row.workspace_id);
        }
        Err(Error::Configuration(format!(
            "no record in or near space '{space}' reveals a workspace id"
        )))
    }

    pub async fn create_issue(&self, spec: CreateIssueSpec) -> Result<CreatedIssue, Error> {
        let project = self.resolve_project(&spec.project).await?;
        let space = project.id.clone();
        let workspace_id = self.resolve_workspace(&project, &space).await?;

        // Read-then-compute: the max over sibling identifiers is only stable
        // while no concurrent creator runs in the same project.
        let siblings = self.store.sibling_identifiers(&space).await?;
        let sequence = next_sequence(siblings.iter().map(String::as_str));
        let identifier = issue_identifier(&project.identifier, sequence);

        let issue_id = generate_id();
        let actor = self.actor(spec.author.as_deref());
        let assignee = spec
            .assignee
            .as_deref()
            .and_then(|name| match self.identities.resolve_assignee(name) {
                Some(id) => Some(id.to_string()),
                None => {
                    tracing::warn!(name, "assignee not in identity table, leaving unassigned");
                    None
                }
            });

        let description = match spec.description.as_deref().filter(|d| !d.is_empty()) {
            Some(text) => self
                .upload_description(&workspace_id, &issue_id, class::ISSUE, text)
                .await,
            None => String::new(),
        };

        let data = new_issue_data(
            &project,
            &identifier,
            sequence,
            &spec.title,
            &description,
            spec.priority.unwrap_or(0),
            assignee,
            spec.label.is_some(),
        );
        let payload = serde_json::to_value(&data)
            .map_err(|e| Error::Configuration(format!("issue payload serialization: {e}")))?;

        let timestamp = now_millis();
        self.store
            .insert(
                table::TASK,
                &NewRecord {
                    workspace_id: &workspace_id,
                    id: &issue_id,
                    class: class::ISSUE,
                    space: &space,
                    modified_by: &actor,
                    created_by: &actor,
                    timestamp,
                    attached_to: None,
                    integrity_hash: &integrity_hash(&payload, &issue_id, timestamp),
                    data: payload.clone(),
                },
            )
            .await?;
        self.append_tx(
            &workspace_id,
            &space,
            &actor,
            class::TX_CREATE_DOC,
            &issue_id,
            class::ISSUE,
            Some(payload),
        )
        .await?;
        self.append_activity(
            &workspace_id,
            &space,
            &actor,
            class::DOC_UPDATE_MESSAGE,
            &issue_id,
            json!({"objectClass": class::ISSUE, "action": "create"}),
        )
        .await?;

        if let Some(label) = &spec.label {
            // After the three primary inserts; the payload already counts it.
            self.attach_label_record(&workspace_id, &space, &actor, &issue_id, label)
                .await?;
        }

        tracing::info!(%identifier, "issue created");
        Ok(CreatedIssue {
            id: issue_id,
            sequence,
            identifier,
        })
    }

    pub async fn update_issue(&self, identifier: &str, patch: IssuePatch) -> Result<(), Error> {
        let row = self.issue_by_identifier(identifier).await?;
        let mut data = row.issue_data()?;

        let assignee = match &patch.assignee {
            Setting::Unset => Setting::Unset,
            Setting::Clear => Setting::Clear,
            Setting::Set(name) => match self.identities.resolve_assignee(name) {
                Some(id) => Setting::Set(id.to_string()),
                None => {
                    return Err(Error::NotFound(format!(
                        "assignee '{name}' is not in the identity table"
                    )));
                }
            },
        };

        let description = match patch.description.as_deref() {
            Some(text) => {
                let uploaded = self
                    .session
                    .upload_markup(&row.workspace_id, &row.id, class::ISSUE, &markup::encode(text))
                    .await;
                match uploaded {
                    Ok(reference) => Some(reference),
                    Err(e) => {
                        // Do not clobber the stored description on a failed
                        // upload; the rest of the patch still applies.
                        tracing::warn!(error = %e, "description upload failed, field unchanged");
                        None
                    }
                }
            }
            None => None,
        };

        apply_issue_patch(&mut data, &patch, assignee, description);

        let payload = serde_json::to_value(&data)
            .map_err(|e| Error::Configuration(format!("issue payload serialization: {e}")))?;
        let timestamp = now_millis();
        let actor = self.actor(None);
        self.store
            .update_record_data(
                table::TASK,
                &row.id,
                &payload,
                &integrity_hash(&payload, &row.id, timestamp),
                &actor,
                timestamp,
            )
            .await?;
        // Full merged payload as the snapshot, not a diff.
        self.append_tx(
            &row.workspace_id,
            &row.space,
            &actor,
            class::TX_UPDATE_DOC,
            &row.id,
            class::ISSUE,
            Some(payload),
        )
        .await?;

        tracing::info!(%identifier, "issue updated");
        Ok(())
    }

    /// Log entries are written before the hard delete so the audit trail is
    /// complete even when the delete step itself fails partway.
    pub async fn delete_issue(&self, identifier: &str) -> Result<(), Error> {
        let row = self.issue_by_identifier(identifier).await?;
        let actor = self.actor(None);

        self.append_tx(
            &row.workspace_id,
            &row.space,
            &actor,
            class::TX_REMOVE_DOC,
            &row.id,
            class::ISSUE,
            None,
        )
        .await?;
        self.append_activity(
            &row.workspace_id,
            &row.space,
            &actor,
            class::DOC_REMOVE_MESSAGE,
            &row.id,
            json!({"objectClass": class::ISSUE, "action": "remove"}),
        )
        .await?;
        self.store.delete_record(table::TASK, &row.id).await?;

        tracing::info!(%identifier, "issue deleted");
        Ok(())
    }

    pub async fn add_comment(
        &self,
        identifier: &str,
        text: &str,
        author: Option<&str>,
    ) -> Result<String, Error> {
        let row = self.issue_by_identifier(identifier).await?;
        let actor = self.actor(author);

        let comment_id = self
            .append_activity(
                &row.workspace_id,
                &row.space,
                &actor,
                class::CHAT_MESSAGE,
                &row.id,
                json!({"message": markup::encode(text)}),
            )
            .await?;
        self.bump_counter(&row, 1).await?;

        Ok(comment_id)
    }

    /// ChatMessage rows merged with legacy reference rows, oldest first.
    /// Only ChatMessage bodies are markup — the legacy class stores plain
    /// text already.
    pub async fn list_comments(&self, identifier: &str) -> Result<Vec<Comment>, Error> {
        let row = self.issue_by_identifier(identifier).await?;
        let rows = self
            .store
            .activity_for(&row.id, &[class::CHAT_MESSAGE, class::ACTIVITY_REFERENCE])
            .await?;

        Ok(rows
            .into_iter()
            .map(|entry| {
                let raw = entry
                    .data
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let text = if entry.class == class::CHAT_MESSAGE {
                    markup::decode(raw)
                } else {
                    raw.to_string()
                };
                Comment {
                    id: entry.id,
                    author: entry.created_by,
                    created_on: entry.created_on,
                    text,
                }
            })
            .collect())
    }

    pub async fn delete_comment(&self, comment_id: &str) -> Result<(), Error> {
        let entry = self
            .store
            .activity_by_id(comment_id)
            .await?
            .filter(|row| row.class == class::CHAT_MESSAGE)
            .ok_or_else(|| Error::NotFound(format!("comment '{comment_id}' not found")))?;

        self.store.delete_record(table::ACTIVITY, &entry.id).await?;

        if let Some(issue_id) = entry.attached_to {
            if let Some(issue) = self.store.task_by_id(&issue_id).await? {
                self.bump_counter(&issue, -1).await?;
            }
        }
        Ok(())
    }

    pub async fn create_document(
        &self,
        spec: CreateDocumentSpec,
    ) -> Result<CreatedDocument, Error> {
        let project = self.resolve_project(&spec.project).await?;
        let space = project.id.clone();
        let workspace_id = self.resolve_workspace(&project, &space).await?;
        let actor = self.actor(spec.author.as_deref());

        let document_id = generate_id();
        let content_ref = generate_id();
        let timestamp = now_millis();

        // Content row first so the primary never references a missing blob.
        let content_data = json!({"content": markup::encode(&spec.content)});
        self.store
            .insert(
                table::DOCUMENT_CONTENT,
                &NewRecord {
                    workspace_id: &workspace_id,
                    id: &content_ref,
                    class: class::DOCUMENT_CONTENT,
                    space: &space,
                    modified_by: &actor,
                    created_by: &actor,
                    timestamp,
                    attached_to: Some(&document_id),
                    integrity_hash: &integrity_hash(&content_data, &content_ref, timestamp),
                    data: content_data,
                },
            )
            .await?;

        let document_data = json!({
            "title": spec.title,
            "content": content_ref,
            "parent": Value::Null,
            "comments": 0,
            "rank": issue_rank(1),
        });
        self.store
            .insert(
                table::DOCUMENT,
                &NewRecord {
                    workspace_id: &workspace_id,
                    id: &document_id,
                    class: class::DOCUMENT,
                    space: &space,
                    modified_by: &actor,
                    created_by: &actor,
                    timestamp,
                    attached_to: None,
                    integrity_hash: &integrity_hash(&document_data, &document_id, timestamp),
                    data: document_data.clone(),
                },
            )
            .await?;
        self.append_tx(
            &workspace_id,
            &space,
            &actor,
            class::TX_CREATE_DOC,
            &document_id,
            class::DOCUMENT,
            Some(document_data),
        )
        .await?;
        self.append_activity(
            &workspace_id,
            &space,
            &actor,
            class::DOC_UPDATE_MESSAGE,
            &document_id,
            json!({"objectClass": class::DOCUMENT, "action": "create"}),
        )
        .await?;

        tracing::info!(title = %spec.title, "document created");
        Ok(CreatedDocument {
            id: document_id,
            content_ref,
        })
    }

    /// Creates a workspace-level label element. Labels live outside project
    /// spaces; the project reference only scopes the workspace.
    pub async fn create_label(
        &self,
        project_ref: &str,
        title: &str,
        color: i64,
    ) -> Result<String, Error> {
        let project = self.resolve_project(project_ref).await?;
        let workspace_id = self.resolve_workspace(&project, &project.id).await?;
        let actor = self.actor(None);

        if let Some(existing) = self.store.find_tag_element(&workspace_id, title).await? {
            return Ok(existing.id);
        }

        let (label_id, data) = self
            .insert_tag_element(&workspace_id, &actor, title, color)
            .await?;
        self.append_tx(
            &workspace_id,
            fallback::TAG_SPACE,
            &actor,
            class::TX_CREATE_DOC,
            &label_id,
            class::TAG_ELEMENT,
            Some(data),
        )
        .await?;

        tracing::info!(%title, "label created");
        Ok(label_id)
    }

    pub async fn attach_label(&self, identifier: &str, label: &str) -> Result<(), Error> {
        let row = self.issue_by_identifier(identifier).await?;
        let actor = self.actor(None);
        self.attach_label_record(&row.workspace_id, &row.space, &actor, &row.id, label)
            .await?;
        self.bump_label_counter(&row).await?;
        Ok(())
    }

    pub async fn list_projects(&self) -> Result<Vec<Value>, Error> {
        let projects = self
            .session
            .find_all(
                class::PROJECT,
                json!({}),
                json!({}),
                crate::session::DEFAULT_CALL_TIMEOUT,
            )
            .await?;
        Ok(projects
            .into_iter()
            .map(|p| {
                json!({
                    "id": p.get("_id").cloned().unwrap_or(Value::Null),
                    "name": p.get("name").cloned().unwrap_or(Value::Null),
                    "identifier": p.get("identifier").cloned().unwrap_or(Value::Null),
                })
            })
            .collect())
    }

    pub async fn list_issues(
        &self,
        project_ref: &str,
        limit: i64,
    ) -> Result<Vec<IssueSummary>, Error> {
        let project = self.resolve_project(project_ref).await?;
        let rows = self.store.issues_in_space(&project.id, limit).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let data = row.issue_data().ok()?;
                Some(IssueSummary {
                    identifier: data.identifier,
                    title: data.title,
                    status: data.status,
                    priority: data.priority,
                    assignee: data.assignee,
                    created_on: row.created_on,
                })
            })
            .collect())
    }

    async fn issue_by_identifier(&self, identifier: &str) -> Result<RecordRow, Error> {
        self.store
            .find_issue_by_identifier(identifier)
            .await?
            .ok_or_else(|| Error::NotFound(format!("issue '{identifier}' not found")))
    }

    async fn upload_description(
        &self,
        workspace_id: &str,
        object_id: &str,
        object_class: &str,
        text: &str,
    ) -> String {
        match self
            .session
            .upload_markup(workspace_id, object_id, object_class, &markup::encode(text))
            .await
        {
            Ok(reference) => reference,
            Err(e) => {
                // A lost description is preferable to a failed create.
                tracing::warn!(error = %e, "description upload failed, storing empty");
                String::new()
            }
        }
    }

    async fn append_tx(
        &self,
        workspace_id: &str,
        object_space: &str,
        actor: &str,
        tx_class: &str,
        object_id: &str,
        object_class: &str,
        attributes: Option<Value>,
    ) -> Result<(), Error> {
        let tx_id = generate_id();
        let timestamp = now_millis();
        let mut data = json!({"objectClass": object_class});
        if let Some(attributes) = attributes {
            data["attributes"] = attributes;
        }
        self.store
            .insert_tx(
                &NewRecord {
                    workspace_id,
                    id: &tx_id,
                    class: tx_class,
                    space: object_space,
                    modified_by: actor,
                    created_by: actor,
                    timestamp,
                    attached_to: None,
                    integrity_hash: &integrity_hash(&data, &tx_id, timestamp),
                    data,
                },
                object_id,
                object_space,
            )
            .await
    }

    async fn append_activity(
        &self,
        workspace_id: &str,
        space: &str,
        actor: &str,
        activity_class: &str,
        attached_to: &str,
        data: Value,
    ) -> Result<String, Error> {
        let activity_id = generate_id();
        let timestamp = now_millis();
        self.store
            .insert(
                table::ACTIVITY,
                &NewRecord {
                    workspace_id,
                    id: &activity_id,
                    class: activity_class,
                    space,
                    modified_by: actor,
                    created_by: actor,
                    timestamp,
                    attached_to: Some(attached_to),
                    integrity_hash: &integrity_hash(&data, &activity_id, timestamp),
                    data,
                },
            )
            .await?;
        Ok(activity_id)
    }

    /// Find-or-create the tag element, then link it to the issue.
    async fn attach_label_record(
        &self,
        workspace_id: &str,
        space: &str,
        actor: &str,
        issue_id: &str,
        label: &str,
    ) -> Result<(), Error> {
        let element_id = match self.store.find_tag_element(workspace_id, label).await? {
            Some(element) => element.id,
            None => {
                self.insert_tag_element(workspace_id, actor, label, 0)
                    .await?
                    .0
            }
        };

        let reference_id = generate_id();
        let timestamp = now_millis();
        let data = json!({"title": label, "tag": element_id});
        self.store
            .insert(
                table::TAGS,
                &NewRecord {
                    workspace_id,
                    id: &reference_id,
                    class: class::TAG_REFERENCE,
                    space,
                    modified_by: actor,
                    created_by: actor,
                    timestamp,
                    attached_to: Some(issue_id),
                    integrity_hash: &integrity_hash(&data, &reference_id, timestamp),
                    data,
                },
            )
            .await
    }

    async fn insert_tag_element(
        &self,
        workspace_id: &str,
        actor: &str,
        title: &str,
        color: i64,
    ) -> Result<(String, Value), Error> {
        let label_id = generate_id();
        let timestamp = now_millis();
        let data = json!({
            "title": title,
            "color": color,
            "category": "tags:category:Other",
            "targetClass": class::ISSUE,
        });
        self.store
            .insert(
                table::TAGS,
                &NewRecord {
                    workspace_id,
                    id: &label_id,
                    class: class::TAG_ELEMENT,
                    space: fallback::TAG_SPACE,
                    modified_by: actor,
                    created_by: actor,
                    timestamp,
                    attached_to: None,
                    integrity_hash: &integrity_hash(&data, &label_id, timestamp),
                    data: data.clone(),
                },
            )
            .await?;
        Ok((label_id, data))
    }

    /// Comment-counter read-modify-write with hash recompute. Floor of zero:
    /// co-writers may have reset the counter underneath us.
    async fn bump_counter(&self, issue: &RecordRow, delta: i64) -> Result<(), Error> {
        let mut data = issue.issue_data()?;
        data.comments = (data.comments + delta).max(0);
        self.rewrite_issue(issue, &data).await
    }

    async fn bump_label_counter(&self, issue: &RecordRow) -> Result<(), Error> {
        let mut data = issue.issue_data()?;
        data.labels += 1;
        self.rewrite_issue(issue, &data).await
    }

    async fn rewrite_issue(&self, issue: &RecordRow, data: &IssueData) -> Result<(), Error> {
        let payload = serde_json::to_value(data)
            .map_err(|e| Error::Configuration(format!("issue payload serialization: {e}")))?;
        let timestamp = now_millis();
        self.store
            .update_record_data(
                table::TASK,
                &issue.id,
                &payload,
                &integrity_hash(&payload, &issue.id, timestamp),
                &self.actor(None),
                timestamp,
            )
            .await
    }
}

/// Fresh issue payload for a create. Time-tracking and counters start at
/// zero; the label counter is pre-counted when a label attach will follow.
#[allow(clippy::too_many_arguments)]
fn new_issue_data(
    project: &ProjectInfo,
    identifier: &str,
    sequence: i64,
    title: &str,
    description: &str,
    priority: i64,
    assignee: Option<String>,
    with_label: bool,
) -> IssueData {
    IssueData {
        title: title.to_string(),
        description: description.to_string(),
        identifier: identifier.to_string(),
        number: sequence,
        priority,
        status: project.default_status.clone().unwrap_or_default(),
        kind: project.default_kind.clone(),
        assignee,
        estimation: 0.0,
        remaining_time: 0.0,
        reported_time: 0.0,
        comments: 0,
        labels: if with_label { 1 } else { 0 },
        sub_issues: 0,
        due_date: None,
        parents: Vec::new(),
        rank: issue_rank(sequence),
        extra: Default::default(),
    }
}

/// Merge rules for a partial update, applied to a copy of the stored
/// payload. Explicit `remaining_time` always wins over recomputation.
fn apply_issue_patch(
    data: &mut IssueData,
    patch: &IssuePatch,
    assignee: Setting<String>,
    description: Option<String>,
) {
    if let Some(title) = &patch.title {
        data.title = title.clone();
    }
    if let Some(reference) = description {
        data.description = reference;
    }
    if let Some(status) = &patch.status {
        data.status = status.clone();
    }
    if let Some(priority) = patch.priority {
        data.priority = priority;
    }
    match assignee {
        Setting::Unset => {}
        Setting::Clear => data.assignee = None,
        Setting::Set(id) => data.assignee = Some(id),
    }

    if let Some(estimation) = patch.estimation {
        data.estimation = estimation;
    }
    if let Some(spent) = patch.spent_time {
        data.reported_time = spent;
    }
    match patch.remaining_time {
        Some(remaining) => data.remaining_time = remaining,
        None if patch.spent_time.is_some() => {
            data.remaining_time = (data.estimation - data.reported_time).max(0.0);
        }
        None if patch.estimation.is_some() => {
            data.remaining_time = data.estimation - data.reported_time;
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(estimation: f64, reported: f64, remaining: f64) -> IssueData {
        IssueData {
            estimation,
            reported_time: reported,
            remaining_time: remaining,
            ..Default::default()
        }
    }

    #[test]
    fn estimation_recomputes_remaining_against_current_spent() {
        let mut data = issue(0.0, 4.0, 0.0);
        let patch = IssuePatch {
            estimation: Some(10.0),
            ..Default::default()
        };
        apply_issue_patch(&mut data, &patch, Setting::Unset, None);
        assert_eq!(data.estimation, 10.0);
        assert_eq!(data.remaining_time, 6.0);
    }

    #[test]
    fn explicit_remaining_wins_over_recomputation() {
        let mut data = issue(10.0, 0.0, 10.0);
        let patch = IssuePatch {
            spent_time: Some(4.0),
            remaining_time: Some(2.0),
            ..Default::default()
        };
        apply_issue_patch(&mut data, &patch, Setting::Unset, None);
        assert_eq!(data.reported_time, 4.0);
        assert_eq!(data.remaining_time, 2.0);
    }

    #[test]
    fn spent_time_recomputation_floors_at_zero() {
        let mut data = issue(3.0, 0.0, 3.0);
        let patch = IssuePatch {
            spent_time: Some(5.0),
            ..Default::default()
        };
        apply_issue_patch(&mut data, &patch, Setting::Unset, None);
        assert_eq!(data.remaining_time, 0.0);
    }

    #[test]
    fn assignee_setting_distinguishes_clear_from_unset() {
        let mut data = IssueData {
            assignee: Some("identity:ada".into()),
            ..Default::default()
        };
        apply_issue_patch(&mut data, &IssuePatch::default(), Setting::Unset, None);
        assert_eq!(data.assignee.as_deref(), Some("identity:ada"));

        apply_issue_patch(&mut data, &IssuePatch::default(), Setting::Clear, None);
        assert_eq!(data.assignee, None);

        apply_issue_patch(
            &mut data,
            &IssuePatch::default(),
            Setting::Set("identity:grace".into()),
            None,
        );
        assert_eq!(data.assignee.as_deref(), Some("identity:grace"));
    }

    #[test]
    fn untouched_fields_survive_a_partial_patch() {
        let mut data = IssueData {
            title: "keep".into(),
            status: "status:open".into(),
            priority: 2,
            ..Default::default()
        };
        let patch = IssuePatch {
            status: Some("status:done".into()),
            ..Default::default()
        };
        apply_issue_patch(&mut data, &patch, Setting::Unset, None);
        assert_eq!(data.title, "keep");
        assert_eq!(data.status, "status:done");
        assert_eq!(data.priority, 2);
    }

    #[test]
    fn fresh_issue_payload_zeroes_counters_and_ranks_by_sequence() {
        let project = ProjectInfo {
            id: "space-1".into(),
            name: "Web".into(),
            identifier: "WEB".into(),
            workspace_id: Some("ws-1".into()),
            default_kind: "tracker:taskTypes:Issue".into(),
            default_status: Some("status:backlog".into()),
        };
        let data = new_issue_data(&project, "WEB-8", 8, "t", "", 3, None, true);
        assert_eq!(data.number, 8);
        assert_eq!(data.rank, "0|i000008:");
        assert_eq!(data.status, "status:backlog");
        assert_eq!(data.comments, 0);
        assert_eq!(data.labels, 1);
        assert_eq!(data.estimation, 0.0);
    }
}
