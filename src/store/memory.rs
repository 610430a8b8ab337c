use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::config::DEFAULT_CANONICAL_URI_PROPERTY;
use crate::model::{Containment, Dir, EdgeRecord, Neighbor, Vertex};
use crate::store::{GraphStore, GraphTx, PropertyFilter, Reindexer};
use crate::types::{DedupeError, EdgeId, PropValue, Result, VertexId};

/// Graph held entirely in memory.
///
/// The canonical-URI index keeps the first vertex indexed under a URI and
/// ignores later ones, which is the shape duplicates take in a store whose
/// uniqueness index lost a write race. Transactions read committed state
/// plus their own staged removals.
pub struct MemoryGraph {
    uri_property: String,
    state: RwLock<GraphState>,
    reindexed: Mutex<Vec<String>>,
}

#[derive(Default)]
struct GraphState {
    vertices: BTreeMap<VertexId, Vertex>,
    edges: BTreeMap<EdgeId, EdgeRecord>,
    uri_index: HashMap<String, VertexId>,
    next_vertex: u64,
    next_edge: u64,
}

impl GraphState {
    fn index_uri(&mut self, id: VertexId, uri_property: &str) {
        let uri = self.vertices.get(&id).and_then(|v| v.get_str(uri_property));
        if let Some(uri) = uri.filter(|uri| !uri.is_empty()) {
            let uri = uri.to_string();
            self.uri_index.entry(uri).or_insert(id);
        }
    }

    fn remove_vertex(&mut self, id: VertexId) {
        self.vertices.remove(&id);
        self.edges
            .retain(|_, edge| edge.out_vertex != id && edge.in_vertex != id);
        self.uri_index.retain(|_, indexed| *indexed != id);
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new(DEFAULT_CANONICAL_URI_PROPERTY)
    }
}

impl MemoryGraph {
    /// Creates an empty graph indexing `uri_property` for uniqueness.
    pub fn new(uri_property: impl Into<String>) -> Self {
        Self {
            uri_property: uri_property.into(),
            state: RwLock::new(GraphState::default()),
            reindexed: Mutex::new(Vec::new()),
        }
    }

    /// Inserts a vertex and returns its id.
    pub fn add_vertex<I, K, V>(&self, entity_type: &str, props: I) -> VertexId
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropValue>,
    {
        let mut state = self.state.write();
        state.next_vertex += 1;
        let id = VertexId(state.next_vertex);
        let mut vertex = Vertex::new(id, entity_type);
        for (name, value) in props {
            vertex.properties.insert(name.into(), value.into());
        }
        state.vertices.insert(id, vertex);
        state.index_uri(id, &self.uri_property);
        id
    }

    /// Inserts an edge between two existing vertices.
    pub fn add_edge(
        &self,
        out_vertex: VertexId,
        in_vertex: VertexId,
        label: &str,
        containment: Containment,
    ) -> Result<EdgeId> {
        let mut state = self.state.write();
        for endpoint in [out_vertex, in_vertex] {
            if !state.vertices.contains_key(&endpoint) {
                return Err(DedupeError::MissingVertex(endpoint));
            }
        }
        state.next_edge += 1;
        let id = EdgeId(state.next_edge);
        state.edges.insert(
            id,
            EdgeRecord {
                id,
                out_vertex,
                in_vertex,
                label: label.to_string(),
                containment,
            },
        );
        Ok(id)
    }

    /// Overwrites one property outside any transaction.
    pub fn set_property(&self, id: VertexId, name: &str, value: impl Into<PropValue>) -> Result<()> {
        let mut state = self.state.write();
        let vertex = state
            .vertices
            .get_mut(&id)
            .ok_or(DedupeError::MissingVertex(id))?;
        vertex.properties.insert(name.to_string(), value.into());
        if name == self.uri_property {
            state.uri_index.retain(|_, indexed| *indexed != id);
            state.index_uri(id, &self.uri_property);
        }
        Ok(())
    }

    /// Whether a committed vertex with `id` exists.
    pub fn contains(&self, id: VertexId) -> bool {
        self.state.read().vertices.contains_key(&id)
    }

    /// Number of committed vertices.
    pub fn vertex_count(&self) -> usize {
        self.state.read().vertices.len()
    }

    /// Index names passed to [`Reindexer::reindex`], in call order.
    pub fn reindex_requests(&self) -> Vec<String> {
        self.reindexed.lock().clone()
    }
}

impl GraphStore for MemoryGraph {
    fn begin(&self) -> Result<Box<dyn GraphTx + '_>> {
        Ok(Box::new(MemoryTx {
            graph: self,
            removed: BTreeSet::new(),
        }))
    }
}

impl Reindexer for MemoryGraph {
    fn reindex(&self, index_name: &str) -> Result<()> {
        self.reindexed.lock().push(index_name.to_string());
        Ok(())
    }
}

/// Transaction over a [`MemoryGraph`].
pub struct MemoryTx<'a> {
    graph: &'a MemoryGraph,
    removed: BTreeSet<VertexId>,
}

impl MemoryTx<'_> {
    fn visible(&self, state: &GraphState, id: VertexId) -> bool {
        !self.removed.contains(&id) && state.vertices.contains_key(&id)
    }
}

impl GraphTx for MemoryTx<'_> {
    fn find_vertices(&self, entity_type: &str, filters: &[PropertyFilter]) -> Result<Vec<VertexId>> {
        let state = self.graph.state.read();
        Ok(state
            .vertices
            .values()
            .filter(|v| v.entity_type == entity_type && !self.removed.contains(&v.id))
            .filter(|v| filters.iter().all(|filter| filter.matches(v)))
            .map(|v| v.id)
            .collect())
    }

    fn load_vertex(&self, id: VertexId) -> Result<Option<Vertex>> {
        if self.removed.contains(&id) {
            return Ok(None);
        }
        Ok(self.graph.state.read().vertices.get(&id).cloned())
    }

    fn neighbors(&self, id: VertexId, dir: Dir) -> Result<Vec<Neighbor>> {
        let state = self.graph.state.read();
        if !self.visible(&state, id) {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for edge in state.edges.values() {
            let touches = (dir.includes_out() && edge.out_vertex == id)
                || (dir.includes_in() && edge.in_vertex == id);
            if !touches {
                continue;
            }
            let other = edge.other_end(id);
            if !self.visible(&state, other) {
                continue;
            }
            let entity_type = state.vertices[&other].entity_type.clone();
            out.push(Neighbor {
                vertex: other,
                entity_type,
                edge: edge.clone(),
            });
        }
        Ok(out)
    }

    fn vertices_by_uri(&self, uri: &str) -> Result<Vec<VertexId>> {
        let state = self.graph.state.read();
        Ok(state
            .uri_index
            .get(uri)
            .copied()
            .filter(|id| self.visible(&state, *id))
            .into_iter()
            .collect())
    }

    fn remove_vertex(&mut self, id: VertexId) -> Result<()> {
        let exists = self.visible(&self.graph.state.read(), id);
        if !exists {
            return Err(DedupeError::MissingVertex(id));
        }
        self.removed.insert(id);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.graph.state.write();
        for id in &self.removed {
            state.remove_vertex(*id);
        }
        trace!(removed = self.removed.len(), "memory_graph.commit");
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        trace!(discarded = self.removed.len(), "memory_graph.rollback");
        Ok(())
    }
}
