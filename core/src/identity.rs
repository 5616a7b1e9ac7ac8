use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::Error;

/// Static lookup tables mapping free-text human names to platform identity
/// ids. Two tables: one for creator identities stamped on `createdBy`, one
/// for assignees. Loaded once per process from a JSON file:
///
/// ```json
/// {
///   "creators": { "Ada Lovelace": "identity:ada" },
///   "assignees": { "Ada Lovelace": "identity:ada" }
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct IdentityTables {
    #[serde(default)]
    creators: HashMap<String, String>,
    #[serde(default)]
    assignees: HashMap<String, String>,
}

impl IdentityTables {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read identity file {}: {e}", path.display()))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, Error> {
        serde_json::from_str(raw)
            .map_err(|e| Error::Configuration(format!("invalid identity file: {e}")))
    }

    pub fn resolve_creator(&self, name: &str) -> Option<&str> {
        lookup(&self.creators, name)
    }

    pub fn resolve_assignee(&self, name: &str) -> Option<&str> {
        lookup(&self.assignees, name)
    }
}

/// Tries the literal name first, then each canonical variant of a
/// first/last name pair: reversed and comma-joined in both orders.
fn lookup<'a>(table: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    if let Some(id) = table.get(name.trim()) {
        return Some(id);
    }
    for variant in name_variants(name) {
        if let Some(id) = table.get(&variant) {
            return Some(id);
        }
    }
    None
}

fn name_variants(name: &str) -> Vec<String> {
    let words: Vec<&str> = name
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|w| !w.is_empty())
        .collect();
    let [first, last] = words[..] else {
        return Vec::new();
    };
    vec![
        format!("{first} {last}"),
        format!("{last} {first}"),
        format!("{last}, {first}"),
        format!("{first}, {last}"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> IdentityTables {
        IdentityTables::parse(
            r#"{
                "creators": { "Lovelace, Ada": "identity:ada" },
                "assignees": { "Grace Hopper": "identity:grace" }
            }"#,
        )
        .expect("fixture tables should parse")
    }

    #[test]
    fn literal_names_resolve_directly() {
        let t = tables();
        assert_eq!(t.resolve_assignee("Grace Hopper"), Some("identity:grace"));
        assert_eq!(t.resolve_creator("Lovelace, Ada"), Some("identity:ada"));
    }

    #[test]
    fn reversed_and_comma_variants_resolve() {
        let t = tables();
        assert_eq!(t.resolve_assignee("Hopper Grace"), Some("identity:grace"));
        assert_eq!(t.resolve_assignee("Hopper, Grace"), Some("identity:grace"));
        assert_eq!(t.resolve_creator("Ada Lovelace"), Some("identity:ada"));
        assert_eq!(t.resolve_creator("Lovelace Ada"), Some("identity:ada"));
    }

    #[test]
    fn unknown_and_many_word_names_miss() {
        let t = tables();
        assert_eq!(t.resolve_assignee("Margaret Heafield Hamilton"), None);
        assert_eq!(t.resolve_assignee("Nobody"), None);
    }

    #[test]
    fn malformed_identity_file_is_a_configuration_error() {
        let err = IdentityTables::parse("{not json").expect_err("parse should fail");
        assert_eq!(err.code(), "configuration_error");
    }
}
