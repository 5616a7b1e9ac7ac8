use std::path::PathBuf;

use clap::Subcommand;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

pub mod pipeline;
pub mod project;
pub mod session;
pub mod store;

use lattice_core::error::Error;
use lattice_core::identity::IdentityTables;
use lattice_core::records::{Priority, Setting};

use pipeline::{Bridge, CreateDocumentSpec, CreateIssueSpec, IssuePatch};
use project::ProjectCache;
use session::{Session, SessionConfig};
use store::Store;

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "lattice-mcp";

#[derive(Debug, Clone)]
pub struct McpRuntimeConfig {
    /// Platform base URL, e.g. `https://app.lattice.example`.
    pub base_url: String,
    pub email: String,
    pub password: String,
    pub workspace: String,
    /// Connection string for the platform's backing store.
    pub database_url: String,
    /// Optional JSON file with the creator/assignee identity tables.
    pub identity_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the Lattice MCP server over stdio
    Serve,
    /// Open a session, list projects, and report readiness as JSON
    Check,
}

pub async fn run(config: McpRuntimeConfig, command: McpCommands) -> i32 {
    match command {
        McpCommands::Serve => {
            let server = match McpServer::connect(config).await {
                Ok(server) => server,
                Err(err) => {
                    report_fatal("mcp_startup_error", &err);
                    return 1;
                }
            };
            match server.serve_stdio().await {
                Ok(()) => 0,
                Err(err) => {
                    let payload = json!({
                        "error": "mcp_server_error",
                        "message": err,
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    1
                }
            }
        }
        McpCommands::Check => match run_check(config).await {
            Ok(report) => {
                println!("{}", to_pretty_json(&report));
                0
            }
            Err(err) => {
                report_fatal("check_failed", &err);
                2
            }
        },
    }
}

fn report_fatal(code: &str, err: &Error) {
    let mut payload = json!({
        "error": code,
        "cause": err.code(),
        "message": err.to_string(),
    });
    if let Some(raw) = err.payload() {
        payload["details"] = raw.clone();
    }
    eprintln!("{}", to_pretty_json(&payload));
}

async fn run_check(config: McpRuntimeConfig) -> Result<Value, Error> {
    let server = McpServer::connect(config).await?;
    let projects = server.bridge.list_projects().await?;
    Ok(json!({
        "status": "ready",
        "server": MCP_SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "session_identity": server.bridge.session.social_id(),
        "projects": projects,
    }))
}

struct McpServer {
    bridge: Bridge,
}

impl McpServer {
    async fn connect(config: McpRuntimeConfig) -> Result<Self, Error> {
        let identities = match &config.identity_file {
            Some(path) => IdentityTables::load(path)?,
            None => IdentityTables::default(),
        };
        let store = Store::connect(&config.database_url).await?;
        let session = Session::open(SessionConfig {
            base_url: config.base_url,
            email: config.email,
            password: config.password,
            workspace: config.workspace,
        })
        .await?;

        Ok(Self {
            bridge: Bridge {
                session,
                store,
                projects: ProjectCache::new(),
                identities,
            },
        })
    }

    async fn serve_stdio(&self) -> Result<(), String> {
        let stdin = tokio::io::stdin();
        let mut reader = BufReader::new(stdin);
        let mut stdout = tokio::io::stdout();

        loop {
            let incoming = read_framed_json(&mut reader)
                .await
                .map_err(|e| format!("Failed to read MCP message: {e}"))?;
            let Some(incoming) = incoming else {
                break;
            };

            let responses = self.handle_incoming_message(incoming).await;
            for response in responses {
                write_framed_json(&mut stdout, &response)
                    .await
                    .map_err(|e| format!("Failed to write MCP response: {e}"))?;
            }
        }

        Ok(())
    }

    async fn handle_incoming_message(&self, incoming: Value) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                if let Some(response) = self.handle_single_message(item.clone()).await {
                    responses.push(response);
                }
            }
            return responses;
        }

        if let Some(response) = self.handle_single_message(incoming).await {
            responses.push(response);
        }
        responses
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // Most likely a client response; this server issues no outbound
            // requests.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        if let Some(id) = obj.get("id").cloned() {
            let result = self.handle_request(method, params).await;
            Some(match result {
                Ok(payload) => success_response(id, payload),
                Err(err) => error_response(id, err),
            })
        } else {
            // Notifications need no action; unknown ones are ignored.
            None
        }
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(tools_list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            "resources/list" => Ok(json!({ "resources": [] })),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "listChanged": false },
                "prompts": { "listChanged": false }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": "Issue-tracker tools for the Lattice workspace platform. \
                Resolve projects by name or identifier with lattice_project_list first when unsure. \
                Issue identifiers look like PROJ-42. Writes go straight to the platform store; \
                there is no undo, so prefer listing before deleting."
        })
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        match self.execute_tool(name, &args).await {
            Ok(envelope) => Ok(build_tool_call_response(envelope, false)),
            Err(err) => Ok(build_tool_call_response(
                json!({
                    "status": "error",
                    "tool": name,
                    "error": err.to_value(),
                }),
                true,
            )),
        }
    }

    async fn execute_tool(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        match tool_name {
            "lattice_project_list" => self.tool_project_list(args).await,
            "lattice_issue_create" => self.tool_issue_create(args).await,
            "lattice_issue_update" => self.tool_issue_update(args).await,
            "lattice_issue_delete" => self.tool_issue_delete(args).await,
            "lattice_issue_list" => self.tool_issue_list(args).await,
            "lattice_comment_add" => self.tool_comment_add(args).await,
            "lattice_comment_list" => self.tool_comment_list(args).await,
            "lattice_comment_delete" => self.tool_comment_delete(args).await,
            "lattice_document_create" => self.tool_document_create(args).await,
            "lattice_label_create" => self.tool_label_create(args).await,
            "lattice_label_attach" => self.tool_label_attach(args).await,
            _ => Err(ToolError::new(
                "unknown_tool",
                format!("Unknown tool '{tool_name}'"),
            )),
        }
    }

    async fn tool_project_list(&self, _args: &Map<String, Value>) -> Result<Value, ToolError> {
        let projects = self.bridge.list_projects().await.map_err(tool_error)?;
        Ok(json!({ "status": "ok", "projects": projects }))
    }

    async fn tool_issue_create(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let spec = CreateIssueSpec {
            project: required_str(args, "project")?.to_string(),
            title: required_str(args, "title")?.to_string(),
            description: optional_str(args, "description")?.map(str::to_string),
            assignee: optional_str(args, "assignee")?.map(str::to_string),
            author: optional_str(args, "author")?.map(str::to_string),
            priority: priority_arg(args)?,
            label: optional_str(args, "label")?.map(str::to_string),
        };
        let created = self.bridge.create_issue(spec).await.map_err(tool_error)?;
        Ok(json!({
            "status": "ok",
            "issue": {
                "id": created.id,
                "identifier": created.identifier,
                "sequence": created.sequence,
            }
        }))
    }

    async fn tool_issue_update(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let identifier = required_str(args, "identifier")?;
        let patch = IssuePatch {
            title: optional_str(args, "title")?.map(str::to_string),
            description: optional_str(args, "description")?.map(str::to_string),
            status: optional_str(args, "status")?.map(str::to_string),
            priority: priority_arg(args)?,
            estimation: optional_f64(args, "estimation")?,
            spent_time: optional_f64(args, "spent_time")?,
            remaining_time: optional_f64(args, "remaining_time")?,
            assignee: assignee_arg(args)?,
        };
        self.bridge
            .update_issue(identifier, patch)
            .await
            .map_err(tool_error)?;
        Ok(json!({ "status": "ok", "identifier": identifier }))
    }

    async fn tool_issue_delete(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let identifier = required_str(args, "identifier")?;
        self.bridge
            .delete_issue(identifier)
            .await
            .map_err(tool_error)?;
        Ok(json!({ "status": "ok", "identifier": identifier }))
    }

    async fn tool_issue_list(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let project = required_str(args, "project")?;
        let limit = optional_i64(args, "limit")?.unwrap_or(50).clamp(1, 200);
        let issues = self
            .bridge
            .list_issues(project, limit)
            .await
            .map_err(tool_error)?;
        let issues: Vec<Value> = issues
            .into_iter()
            .map(|i| {
                json!({
                    "identifier": i.identifier,
                    "title": i.title,
                    "status": i.status,
                    "priority": i.priority,
                    "assignee": i.assignee,
                    "created_on": i.created_on,
                })
            })
            .collect();
        Ok(json!({ "status": "ok", "issues": issues }))
    }

    async fn tool_comment_add(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let identifier = required_str(args, "identifier")?;
        let text = required_str(args, "text")?;
        let author = optional_str(args, "author")?;
        let comment_id = self
            .bridge
            .add_comment(identifier, text, author)
            .await
            .map_err(tool_error)?;
        Ok(json!({ "status": "ok", "comment_id": comment_id }))
    }

    async fn tool_comment_list(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let identifier = required_str(args, "identifier")?;
        let comments = self
            .bridge
            .list_comments(identifier)
            .await
            .map_err(tool_error)?;
        let comments: Vec<Value> = comments
            .into_iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "author": c.author,
                    "created_on": c.created_on,
                    "text": c.text,
                })
            })
            .collect();
        Ok(json!({ "status": "ok", "comments": comments }))
    }

    async fn tool_comment_delete(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let comment_id = required_str(args, "id")?;
        self.bridge
            .delete_comment(comment_id)
            .await
            .map_err(tool_error)?;
        Ok(json!({ "status": "ok", "id": comment_id }))
    }

    async fn tool_document_create(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let spec = CreateDocumentSpec {
            project: required_str(args, "project")?.to_string(),
            title: required_str(args, "title")?.to_string(),
            content: required_str(args, "content")?.to_string(),
            author: optional_str(args, "author")?.map(str::to_string),
        };
        let created = self
            .bridge
            .create_document(spec)
            .await
            .map_err(tool_error)?;
        Ok(json!({
            "status": "ok",
            "document": { "id": created.id, "content_ref": created.content_ref }
        }))
    }

    async fn tool_label_create(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let project = required_str(args, "project")?;
        let title = required_str(args, "title")?;
        let color = optional_i64(args, "color")?.unwrap_or(0);
        let label_id = self
            .bridge
            .create_label(project, title, color)
            .await
            .map_err(tool_error)?;
        Ok(json!({ "status": "ok", "label_id": label_id }))
    }

    async fn tool_label_attach(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let identifier = required_str(args, "identifier")?;
        let label = required_str(args, "label")?;
        self.bridge
            .attach_label(identifier, label)
            .await
            .map_err(tool_error)?;
        Ok(json!({ "status": "ok", "identifier": identifier, "label": label }))
    }
}

/// Required string argument, with a structured validation error on miss.
fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| {
        ToolError::new(
            "validation_failed",
            format!("'{key}' is required and must be a string"),
        )
        .with_field(key)
    })
}

fn optional_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(
            ToolError::new("validation_failed", format!("'{key}' must be a string"))
                .with_field(key),
        ),
    }
}

fn optional_f64(args: &Map<String, Value>, key: &str) -> Result<Option<f64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| {
            ToolError::new("validation_failed", format!("'{key}' must be a number")).with_field(key)
        }),
    }
}

fn optional_i64(args: &Map<String, Value>, key: &str) -> Result<Option<i64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or_else(|| {
            ToolError::new("validation_failed", format!("'{key}' must be an integer"))
                .with_field(key)
        }),
    }
}

/// Priority argument: a name from the platform's priority vocabulary,
/// mapped to its numeric encoding.
fn priority_arg(args: &Map<String, Value>) -> Result<Option<i64>, ToolError> {
    let Some(name) = optional_str(args, "priority")? else {
        return Ok(None);
    };
    match Priority::from_name(name) {
        Some(priority) => Ok(Some(priority.number())),
        None => Err(
            ToolError::new("validation_failed", format!("unknown priority '{name}'"))
                .with_field("priority")
                .with_docs_hint("Use one of: urgent, high, medium, low, none."),
        ),
    }
}

/// Assignee patch argument: absent means untouched, explicit null clears
/// the assignee, a string sets it.
fn assignee_arg(args: &Map<String, Value>) -> Result<Setting<String>, ToolError> {
    match args.get("assignee") {
        None => Ok(Setting::Unset),
        Some(Value::Null) => Ok(Setting::Clear),
        Some(Value::String(name)) => Ok(Setting::Set(name.clone())),
        Some(_) => Err(
            ToolError::new("validation_failed", "'assignee' must be a string or null")
                .with_field("assignee"),
        ),
    }
}

fn tool_error(err: Error) -> ToolError {
    let mut tool_err = ToolError::new(err.code(), err.to_string());
    tool_err = match &err {
        Error::Auth(_) => tool_err
            .with_docs_hint("Check LATTICE_EMAIL, LATTICE_PASSWORD, and LATTICE_WORKSPACE."),
        Error::Transport(_) => tool_err.with_docs_hint(
            "The realtime socket is closed; restart the server to reopen the session.",
        ),
        Error::Timeout { .. } => tool_err.with_docs_hint(
            "The platform did not answer in time. The operation may not have been applied; verify before retrying.",
        ),
        Error::Configuration(_) => tool_err.with_docs_hint(
            "Workspace scoping could not be derived; the workspace may have no records yet.",
        ),
        Error::Store(_) => {
            tool_err.with_docs_hint("Check DATABASE_URL points at the platform's backing store.")
        }
        Error::NotFound(_) | Error::Api(_) => tool_err,
    };
    if let Some(payload) = err.payload() {
        tool_err = tool_err.with_details(payload.clone());
    }
    tool_err
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl RpcError {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone)]
struct ToolError {
    code: String,
    message: String,
    field: Option<String>,
    docs_hint: Option<String>,
    details: Option<Value>,
}

impl ToolError {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
            docs_hint: None,
            details: None,
        }
    }

    fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    fn with_docs_hint(mut self, docs_hint: impl Into<String>) -> Self {
        self.docs_hint = Some(docs_hint.into());
        self
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn to_value(&self) -> Value {
        let mut payload = json!({
            "error": self.code,
            "message": self.message
        });
        if let Some(field) = &self.field {
            payload["field"] = Value::String(field.clone());
        }
        if let Some(docs_hint) = &self.docs_hint {
            payload["docs_hint"] = Value::String(docs_hint.clone());
        }
        if let Some(details) = &self.details {
            payload["details"] = details.clone();
        }
        payload
    }
}

#[derive(Debug)]
struct ToolDefinition {
    name: &'static str,
    description: &'static str,
    input_schema: Value,
}

fn tools_list_payload() -> Value {
    let tools: Vec<Value> = tool_definitions()
        .into_iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "inputSchema": tool.input_schema,
            })
        })
        .collect();
    json!({ "tools": tools })
}

fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "lattice_project_list",
            description: "List the workspace's projects with their names and identifiers.",
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "lattice_issue_create",
            description: "Create an issue in a project. Returns the new identifier (e.g. PROJ-42).",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "project": { "type": "string", "description": "Project name, id, or identifier" },
                    "title": { "type": "string" },
                    "description": { "type": "string", "description": "Plain text; '-' lines become bullets" },
                    "assignee": { "type": "string", "description": "Human name resolved via the identity table" },
                    "author": { "type": "string", "description": "Human name stamped as the creator" },
                    "priority": { "type": "string", "enum": ["urgent", "high", "medium", "low", "none"] },
                    "label": { "type": "string", "description": "Label title to attach after creation" }
                },
                "required": ["project", "title"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "lattice_issue_update",
            description: "Patch an issue by identifier. Only supplied fields change; assignee null unassigns.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "identifier": { "type": "string", "description": "Issue key like PROJ-42" },
                    "title": { "type": "string" },
                    "description": { "type": "string" },
                    "status": { "type": "string" },
                    "priority": { "type": "string", "enum": ["urgent", "high", "medium", "low", "none"] },
                    "estimation": { "type": "number", "description": "Hours; recomputes remaining_time unless it is supplied" },
                    "spent_time": { "type": "number", "description": "Hours; recomputes remaining_time unless it is supplied" },
                    "remaining_time": { "type": "number" },
                    "assignee": { "type": ["string", "null"], "description": "Name to assign, or null to clear" }
                },
                "required": ["identifier"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "lattice_issue_delete",
            description: "Hard-delete an issue by identifier. Its transaction and activity history is retained.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "identifier": { "type": "string" }
                },
                "required": ["identifier"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "lattice_issue_list",
            description: "List a project's issues, newest first.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "project": { "type": "string" },
                    "limit": { "type": "integer", "default": 50, "minimum": 1, "maximum": 200 }
                },
                "required": ["project"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "lattice_comment_add",
            description: "Add a comment to an issue.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "identifier": { "type": "string" },
                    "text": { "type": "string" },
                    "author": { "type": "string" }
                },
                "required": ["identifier", "text"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "lattice_comment_list",
            description: "List an issue's comments, oldest first.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "identifier": { "type": "string" }
                },
                "required": ["identifier"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "lattice_comment_delete",
            description: "Delete a comment by its id.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string" }
                },
                "required": ["id"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "lattice_document_create",
            description: "Create a document with plain-text content in a project.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "project": { "type": "string" },
                    "title": { "type": "string" },
                    "content": { "type": "string" },
                    "author": { "type": "string" }
                },
                "required": ["project", "title", "content"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "lattice_label_create",
            description: "Create a workspace label (no-op if a label with that title exists).",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "project": { "type": "string", "description": "Any project; scopes the workspace" },
                    "title": { "type": "string" },
                    "color": { "type": "integer", "default": 0 }
                },
                "required": ["project", "title"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "lattice_label_attach",
            description: "Attach an existing or new label to an issue.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "identifier": { "type": "string" },
                    "label": { "type": "string" }
                },
                "required": ["identifier", "label"],
                "additionalProperties": false
            }),
        },
    ]
}

fn build_tool_call_response(envelope: Value, is_error: bool) -> Value {
    let text = to_pretty_json(&envelope);
    if is_error {
        json!({
            "isError": true,
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    } else {
        json!({
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    });
    if let Some(data) = error.data {
        payload["error"]["data"] = data;
    }
    payload
}

async fn read_framed_json<R>(reader: &mut BufReader<R>) -> Result<Option<Value>, std::io::Error>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            if content_length.is_none() {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Unexpected EOF while reading MCP headers",
            ));
        }

        if line == "\r\n" {
            break;
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.to_ascii_lowercase().starts_with("content-length:") {
            let raw_len = line
                .split_once(':')
                .map(|(_, right)| right.trim())
                .unwrap_or_default();
            let parsed = raw_len.parse::<usize>().map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "Invalid Content-Length header",
                )
            })?;
            content_length = Some(parsed);
        }
    }

    let content_length = content_length.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Missing Content-Length header",
        )
    })?;
    let mut payload = vec![0_u8; content_length];
    reader.read_exact(&mut payload).await?;

    let json: Value = serde_json::from_slice(&payload).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Invalid JSON payload: {e}"),
        )
    })?;
    Ok(Some(json))
}

async fn write_framed_json<W>(writer: &mut W, value: &Value) -> Result<(), std::io::Error>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    let header = format!(
        "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
        body.len()
    );
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn framed_json_round_trips_through_a_buffer() {
        let value = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});
        let mut written: Vec<u8> = Vec::new();
        write_framed_json(&mut written, &value)
            .await
            .expect("write should succeed");

        let mut reader = BufReader::new(written.as_slice());
        let read = read_framed_json(&mut reader)
            .await
            .expect("read should succeed")
            .expect("one frame was written");
        assert_eq!(read, value);

        // The stream is exhausted cleanly afterwards.
        assert!(
            read_framed_json(&mut reader)
                .await
                .expect("clean EOF")
                .is_none()
        );
    }

    #[tokio::test]
    async fn framed_reader_rejects_missing_content_length() {
        let mut reader = BufReader::new(&b"Content-Type: application/json\r\n\r\n{}"[..]);
        let err = read_framed_json(&mut reader)
            .await
            .expect_err("headers without a length are invalid");
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn tool_names_are_unique_and_schemas_are_objects() {
        let tools = tool_definitions();
        let names: HashSet<&str> = tools.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), tools.len());
        for tool in &tools {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        }
    }

    #[test]
    fn priority_argument_maps_names_and_rejects_unknowns() {
        let mut args = Map::new();
        args.insert("priority".into(), json!("high"));
        assert_eq!(priority_arg(&args).expect("known name"), Some(2));

        args.insert("priority".into(), json!("blocker"));
        let err = priority_arg(&args).expect_err("unknown name");
        assert_eq!(err.code, "validation_failed");

        assert_eq!(priority_arg(&Map::new()).expect("absent"), None);
    }

    #[test]
    fn assignee_argument_distinguishes_absent_null_and_set() {
        assert_eq!(assignee_arg(&Map::new()).expect("absent"), Setting::Unset);

        let mut args = Map::new();
        args.insert("assignee".into(), Value::Null);
        assert_eq!(assignee_arg(&args).expect("null"), Setting::Clear);

        args.insert("assignee".into(), json!("Grace Hopper"));
        assert_eq!(
            assignee_arg(&args).expect("string"),
            Setting::Set("Grace Hopper".to_string())
        );

        args.insert("assignee".into(), json!(42));
        assert!(assignee_arg(&args).is_err());
    }

    #[test]
    fn bridge_errors_become_structured_tool_errors() {
        let err = tool_error(Error::NotFound("issue 'X-1' not found".into()));
        let value = err.to_value();
        assert_eq!(value["error"], "not_found");
        assert_eq!(value["message"], "issue 'X-1' not found");

        let err = tool_error(Error::Api(json!({"code": "denied"})));
        let value = err.to_value();
        assert_eq!(value["error"], "platform_error");
        assert_eq!(value["details"]["code"], "denied");
    }

    #[test]
    fn error_responses_carry_jsonrpc_codes() {
        let response = error_response(json!(7), RpcError::method_not_found("bogus"));
        assert_eq!(response["id"], 7);
        assert_eq!(response["error"]["code"], -32601);

        let response = error_response(Value::Null, RpcError::invalid_request("broken"));
        assert_eq!(response["error"]["code"], -32600);
    }

    #[test]
    fn tool_call_failures_are_flagged_as_errors() {
        let envelope = json!({"status": "error"});
        let response = build_tool_call_response(envelope.clone(), true);
        assert_eq!(response["isError"], true);
        assert_eq!(response["structuredContent"], envelope);

        let response = build_tool_call_response(json!({"status": "ok"}), false);
        assert!(response.get("isError").is_none());
    }
}
