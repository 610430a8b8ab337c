#![forbid(unsafe_code)]

//! Capability surface the dedupe engine requires from a graph store.
//!
//! The engine never creates vertices. It reads them through a [`GraphTx`],
//! deletes non-keepers inside one transaction per entity type, and asks a
//! [`Reindexer`] to rebuild the identifying index afterwards.

mod memory;
mod sqlite;

/// In-process graph used by tests and embedding callers.
pub use memory::{MemoryGraph, MemoryTx};

/// SQLite-backed graph used by the CLI.
pub use sqlite::{SqliteGraph, SqliteTx};

use serde::Serialize;
use tracing::debug;

use crate::model::{Dir, Neighbor, Vertex};
use crate::types::{PropValue, Result, VertexId};

/// Exact-match property constraint applied by [`GraphTx::find_vertices`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PropertyFilter {
    /// Property name.
    pub name: String,
    /// Required value.
    pub value: PropValue,
}

impl PropertyFilter {
    /// Creates a filter.
    pub fn new(name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Whether `vertex` satisfies this filter.
    pub fn matches(&self, vertex: &Vertex) -> bool {
        vertex.get(&self.name) == Some(&self.value)
    }
}

/// One transaction against the graph store.
///
/// Dropping a transaction without calling [`GraphTx::commit`] discards its
/// staged mutations.
pub trait GraphTx {
    /// Ids of vertices of `entity_type` matching every filter, ascending.
    fn find_vertices(&self, entity_type: &str, filters: &[PropertyFilter]) -> Result<Vec<VertexId>>;

    /// Reads one vertex; `Ok(None)` when it no longer exists.
    fn load_vertex(&self, id: VertexId) -> Result<Option<Vertex>>;

    /// Adjacent vertices across edges in `dir`.
    fn neighbors(&self, id: VertexId, dir: Dir) -> Result<Vec<Neighbor>>;

    /// Lookup through the canonical-URI uniqueness index.
    fn vertices_by_uri(&self, uri: &str) -> Result<Vec<VertexId>>;

    /// Stages removal of a vertex and its incident edges.
    fn remove_vertex(&mut self, id: VertexId) -> Result<()>;

    /// Applies staged mutations.
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discards staged mutations.
    fn rollback(self: Box<Self>) -> Result<()>;
}

/// Factory for independent transactions.
pub trait GraphStore: Send + Sync {
    /// Opens a new transaction.
    fn begin(&self) -> Result<Box<dyn GraphTx + '_>>;
}

/// Post-deletion index maintenance hook.
pub trait Reindexer: Send + Sync {
    /// Rebuilds `index_name`. Callers log failures and do not retry.
    fn reindex(&self, index_name: &str) -> Result<()>;
}

/// Reindexer that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopReindexer;

impl Reindexer for NoopReindexer {
    fn reindex(&self, index_name: &str) -> Result<()> {
        debug!(index_name, "dedupe.reindex.noop");
        Ok(())
    }
}
