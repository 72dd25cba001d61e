//! Cell identity and the small enums shared across the graph, kernel, and protocol layers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, opaque cell identifier. Assigned by the coordinator, never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(pub String);

impl CellId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CellId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CellId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The two cell languages this core understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    Sql,
}

/// Cell execution status, mirrored by the coordinator and surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    #[default]
    Idle,
    Running,
    Success,
    Error,
    Blocked,
}
