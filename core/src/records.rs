use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Record classes understood by the platform. These are the platform's own
/// vocabulary — free-form strings, not an enum, because the platform owns
/// the namespace and adds classes without us.
pub mod class {
    pub const ISSUE: &str = "tracker:class:Issue";
    pub const PROJECT: &str = "tracker:class:Project";

    pub const TX_CREATE_DOC: &str = "core:class:TxCreateDoc";
    pub const TX_UPDATE_DOC: &str = "core:class:TxUpdateDoc";
    pub const TX_REMOVE_DOC: &str = "core:class:TxRemoveDoc";

    pub const DOC_UPDATE_MESSAGE: &str = "activity:class:DocUpdateMessage";
    pub const DOC_REMOVE_MESSAGE: &str = "activity:class:DocRemoveMessage";
    pub const CHAT_MESSAGE: &str = "chunter:class:ChatMessage";
    /// Legacy comment rows written by older platform versions; merged into
    /// comment listings but never written by this bridge.
    pub const ACTIVITY_REFERENCE: &str = "activity:class:ActivityReference";

    pub const DOCUMENT: &str = "document:class:Document";
    pub const DOCUMENT_CONTENT: &str = "document:class:DocumentContent";

    pub const TAG_ELEMENT: &str = "tags:class:TagElement";
    pub const TAG_REFERENCE: &str = "tags:class:TagReference";
}

/// Backing-store tables this bridge co-writes.
pub mod table {
    pub const TASK: &str = "task";
    pub const TX: &str = "tx";
    pub const ACTIVITY: &str = "activity";
    pub const DOCUMENT: &str = "document";
    pub const DOCUMENT_CONTENT: &str = "documents";
    pub const TAGS: &str = "tags";
    pub const STATUS: &str = "status";
}

/// Platform defaults used when resolution comes up empty.
pub mod fallback {
    /// Task kind assumed when no sibling record reveals the project's kind.
    pub const TASK_KIND: &str = "tracker:taskTypes:Issue";
    /// Identity stamped on writes when the handshake never reported one.
    pub const IDENTITY: &str = "core:account:ConfigUser";
    /// Workspace-level space that tag elements live in.
    pub const TAG_SPACE: &str = "tags:space:Tags";
}

/// Issue priority, mapped to the platform's numeric encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    NoPriority,
    Urgent,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "urgent" => Some(Priority::Urgent),
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            "none" | "nopriority" | "no-priority" => Some(Priority::NoPriority),
            _ => None,
        }
    }

    pub fn number(self) -> i64 {
        match self {
            Priority::NoPriority => 0,
            Priority::Urgent => 1,
            Priority::High => 2,
            Priority::Medium => 3,
            Priority::Low => 4,
        }
    }
}

/// The `data` payload of an issue's primary record. Unknown fields written
/// by other co-writers are preserved through read-modify-write via `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IssueData {
    pub title: String,
    /// Content reference produced by the rich-text ingestion path, or the
    /// empty string when the issue has no description.
    pub description: String,
    pub identifier: String,
    pub number: i64,
    pub priority: i64,
    pub status: String,
    pub kind: String,
    pub assignee: Option<String>,
    pub estimation: f64,
    pub remaining_time: f64,
    pub reported_time: f64,
    pub comments: i64,
    pub labels: i64,
    pub sub_issues: i64,
    pub due_date: Option<i64>,
    pub parents: Vec<String>,
    pub rank: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for IssueData {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            identifier: String::new(),
            number: 0,
            priority: 0,
            status: String::new(),
            kind: String::new(),
            assignee: None,
            estimation: 0.0,
            remaining_time: 0.0,
            reported_time: 0.0,
            comments: 0,
            labels: 0,
            sub_issues: 0,
            due_date: None,
            parents: Vec::new(),
            rank: String::new(),
            extra: Map::new(),
        }
    }
}

/// A resolved project. Projects are read through the socket and never
/// created by this bridge.
#[derive(Debug, Clone, Default)]
pub struct ProjectInfo {
    pub id: String,
    pub name: String,
    pub identifier: String,
    pub workspace_id: Option<String>,
    pub default_kind: String,
    pub default_status: Option<String>,
}

/// Tagged assignee patch value. Distinguishes "field not supplied" from
/// "field explicitly cleared" — overloading null for both is ambiguous.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Setting<T> {
    #[default]
    Unset,
    Clear,
    Set(T),
}

pub fn generate_id() -> String {
    Uuid::now_v7().to_string()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Human-facing issue key, `<projectIdentifier>-<sequence>`.
pub fn issue_identifier(project_identifier: &str, sequence: i64) -> String {
    format!("{project_identifier}-{sequence}")
}

/// Trailing integer of an issue identifier, e.g. `"PROJ-42"` -> `42`.
/// Returns None for identifiers with no parseable trailing number.
pub fn trailing_sequence(identifier: &str) -> Option<i64> {
    identifier.rsplit_once('-')?.1.parse().ok()
}

/// Next per-project sequence: max over sibling identifiers plus one,
/// starting at 1 when the project has no issues yet.
pub fn next_sequence<'a>(sibling_identifiers: impl Iterator<Item = &'a str>) -> i64 {
    sibling_identifiers
        .filter_map(trailing_sequence)
        .max()
        .unwrap_or(0)
        + 1
}

/// Sortable rank key placing a new issue after its siblings.
pub fn issue_rank(sequence: i64) -> String {
    format!("0|i{sequence:06x}:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn priority_maps_names_to_platform_numbers() {
        assert_eq!(Priority::from_name("urgent").map(Priority::number), Some(1));
        assert_eq!(Priority::from_name("High").map(Priority::number), Some(2));
        assert_eq!(Priority::from_name("medium").map(Priority::number), Some(3));
        assert_eq!(Priority::from_name("low").map(Priority::number), Some(4));
        assert_eq!(Priority::from_name("none").map(Priority::number), Some(0));
        assert!(Priority::from_name("blocker").is_none());
    }

    #[test]
    fn trailing_sequence_parses_issue_identifiers() {
        assert_eq!(trailing_sequence("PROJ-42"), Some(42));
        assert_eq!(trailing_sequence("A-B-7"), Some(7));
        assert_eq!(trailing_sequence("PROJ-"), None);
        assert_eq!(trailing_sequence("PROJ"), None);
        assert_eq!(trailing_sequence("PROJ-x1"), None);
    }

    #[test]
    fn next_sequence_starts_at_one_and_tracks_the_max() {
        assert_eq!(next_sequence([].into_iter()), 1);
        assert_eq!(next_sequence(["PROJ-3", "PROJ-7"].into_iter()), 8);
        // Insertion order of siblings must not matter.
        assert_eq!(next_sequence(["PROJ-7", "PROJ-3"].into_iter()), 8);
        // Unparseable identifiers are skipped, not treated as zero.
        assert_eq!(next_sequence(["PROJ-broken", "PROJ-2"].into_iter()), 3);
    }

    #[test]
    fn rank_is_fixed_width_hex_of_the_sequence() {
        assert_eq!(issue_rank(1), "0|i000001:");
        assert_eq!(issue_rank(255), "0|i0000ff:");
    }

    #[test]
    fn issue_data_round_trips_preserving_unknown_fields() {
        let raw = json!({
            "title": "Fix login",
            "identifier": "PROJ-1",
            "number": 1,
            "remainingTime": 4.0,
            "platformInternal": {"shard": 3}
        });
        let data: IssueData = serde_json::from_value(raw).expect("payload should deserialize");
        assert_eq!(data.title, "Fix login");
        assert_eq!(data.remaining_time, 4.0);

        let back = serde_json::to_value(&data).expect("payload should serialize");
        assert_eq!(back["platformInternal"]["shard"], 3);
        assert_eq!(back["remainingTime"], 4.0);
    }
}
