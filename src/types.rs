//! Identifiers, property values, and the crate-wide error type.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DedupeError>;

/// Stable identifier of a vertex in the graph store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexId(pub u64);

/// Stable identifier of an edge in the graph store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub u64);

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scalar property value stored on a vertex.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
}

impl PropValue {
    /// Returns the string payload, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the integer payload, accepting numeric strings.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(value) => Some(*value),
            PropValue::Str(value) => value.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Bool(value) => write!(f, "{value}"),
            PropValue::Int(value) => write!(f, "{value}"),
            PropValue::Float(value) => write!(f, "{value}"),
            PropValue::Str(value) => f.write_str(value),
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

/// Errors raised by the dedupe engine and its collaborators.
#[derive(Debug, Error)]
pub enum DedupeError {
    /// Invalid run configuration; fatal before any scan starts.
    #[error("configuration error: {0}")]
    Config(String),
    /// Configuration file could not be loaded.
    #[error(transparent)]
    ConfigFile(#[from] ConfigError),
    /// Entity type missing from the schema catalog.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),
    /// Operator id rejected by the run guard.
    #[error("invalid operator id '{0}': must be a named operator, not an admin alias")]
    InvalidOperator(String),
    /// Property filter string could not be parsed.
    #[error("invalid property filter: {0}")]
    InvalidFilter(String),
    /// Generic graph store failure.
    #[error("graph store error: {0}")]
    Store(String),
    /// Vertex was expected but not present.
    #[error("vertex {0} not found")]
    MissingVertex(VertexId),
    /// A non-keeper could not be deleted; the type's transaction is rolled back.
    #[error("failed to delete vertex {vertex} of type {entity_type} (group {members:?}): {source}")]
    Deletion {
        /// Entity type being repaired.
        entity_type: String,
        /// Vertex whose deletion failed.
        vertex: VertexId,
        /// Members of the dupe group the vertex belonged to.
        members: Vec<VertexId>,
        /// Underlying store error.
        source: Box<DedupeError>,
    },
    /// SQLite backend error.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON encoding error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DedupeError {
    /// Whether the error is a configuration problem detected before scanning.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            DedupeError::Config(_)
                | DedupeError::ConfigFile(_)
                | DedupeError::UnknownEntityType(_)
                | DedupeError::InvalidOperator(_)
                | DedupeError::InvalidFilter(_)
        )
    }
}
