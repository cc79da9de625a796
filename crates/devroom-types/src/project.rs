use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::file_tree::FileTree;

/// Length of a project identifier in hex characters (12 bytes).
const PROJECT_ID_LEN: usize = 24;

/// Returned when a string is not a well-formed [`ProjectId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid project id: {0:?}")]
pub struct InvalidProjectId(pub String);

/// A project identifier: 24 lowercase or uppercase hex digits.
///
/// The id doubles as the room id for realtime traffic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    pub fn parse(raw: &str) -> Result<Self, InvalidProjectId> {
        let trimmed = raw.trim();
        if trimmed.len() == PROJECT_ID_LEN && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(trimmed.to_ascii_lowercase()))
        } else {
            Err(InvalidProjectId(raw.to_owned()))
        }
    }

    /// Mint a fresh random id.
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self(hex[..PROJECT_ID_LEN].to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProjectId {
    type Err = InvalidProjectId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ProjectId {
    type Error = InvalidProjectId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ProjectId> for String {
    fn from(id: ProjectId) -> Self {
        id.0
    }
}

/// The persisted project record as seen by the realtime core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "_id")]
    pub id: ProjectId,
    pub name: String,
    /// User ids allowed to collaborate on the project.
    #[serde(rename = "users", default)]
    pub members: BTreeSet<String>,
    #[serde(rename = "fileTree", default)]
    pub file_tree: FileTree,
}

impl Project {
    pub fn new(id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            members: BTreeSet::new(),
            file_tree: FileTree::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_object_id_shaped_strings() {
        let id = ProjectId::parse("64B7F0C2A1E4D5F6A7B8C9D0").unwrap();
        assert_eq!(id.as_str(), "64b7f0c2a1e4d5f6a7b8c9d0");
    }

    #[test]
    fn rejects_malformed_ids() {
        for raw in ["", "abc", "64b7f0c2a1e4d5f6a7b8c9dz", "64b7f0c2a1e4d5f6a7b8c9d0ff"] {
            assert!(ProjectId::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn generated_ids_parse() {
        let id = ProjectId::generate();
        assert_eq!(ProjectId::parse(id.as_str()).unwrap(), id);
    }

    #[test]
    fn deserialization_validates() {
        let bad: Result<ProjectId, _> = serde_json::from_str("\"not-an-id\"");
        assert!(bad.is_err());
    }
}
