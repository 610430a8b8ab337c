//! Vertex and edge records as seen by the dedupe engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{EdgeId, PropValue, VertexId};

/// Named scalar properties of a vertex.
pub type PropertyMap = BTreeMap<String, PropValue>;

/// Edge traversal direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dir {
    /// Edges leaving the vertex.
    Out,
    /// Edges arriving at the vertex.
    In,
    /// Both directions.
    Both,
}

impl Dir {
    /// Whether outgoing edges are included.
    pub fn includes_out(self) -> bool {
        matches!(self, Dir::Out | Dir::Both)
    }

    /// Whether incoming edges are included.
    pub fn includes_in(self) -> bool {
        matches!(self, Dir::In | Dir::Both)
    }
}

/// Ownership marker carried by an edge.
///
/// `Out` means the edge's out-vertex contains its in-vertex, `In` the reverse.
/// `None` marks a peer ("cousin") edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Containment {
    /// Peer edge without ownership.
    #[default]
    None,
    /// Out-vertex is the parent.
    Out,
    /// In-vertex is the parent.
    In,
    /// Either endpoint contains the other.
    Both,
}

impl Containment {
    /// Stable lowercase name used by persistent stores.
    pub fn as_str(self) -> &'static str {
        match self {
            Containment::None => "none",
            Containment::Out => "out",
            Containment::In => "in",
            Containment::Both => "both",
        }
    }

    /// Parses the name produced by [`Containment::as_str`].
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "none" => Some(Containment::None),
            "out" => Some(Containment::Out),
            "in" => Some(Containment::In),
            "both" => Some(Containment::Both),
            _ => None,
        }
    }
}

/// A vertex snapshot read from the store.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Vertex {
    /// Store identifier.
    pub id: VertexId,
    /// Entity-type tag.
    pub entity_type: String,
    /// Property bag.
    pub properties: PropertyMap,
}

impl Vertex {
    /// Creates a vertex with no properties.
    pub fn new(id: VertexId, entity_type: impl Into<String>) -> Self {
        Self {
            id,
            entity_type: entity_type.into(),
            properties: PropertyMap::new(),
        }
    }

    /// Adds a property, builder style.
    pub fn with_prop(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Optional lookup of a property.
    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.properties.get(name)
    }

    /// String property, `None` when absent or not a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(PropValue::as_str)
    }

    /// Integer property, `None` when absent or not numeric.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(PropValue::as_int)
    }
}

/// A directed, labelled edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EdgeRecord {
    /// Store identifier.
    pub id: EdgeId,
    /// Tail vertex.
    pub out_vertex: VertexId,
    /// Head vertex.
    pub in_vertex: VertexId,
    /// Edge label.
    pub label: String,
    /// Ownership marker.
    pub containment: Containment,
}

impl EdgeRecord {
    /// Returns the endpoint opposite to `from`.
    pub fn other_end(&self, from: VertexId) -> VertexId {
        if self.out_vertex == from {
            self.in_vertex
        } else {
            self.out_vertex
        }
    }

    /// Whether this edge marks the other endpoint as the parent of `child`.
    pub fn parent_edge_of(&self, child: VertexId) -> bool {
        if self.out_vertex == self.in_vertex {
            return false;
        }
        let out_contains_in = matches!(self.containment, Containment::Out | Containment::Both);
        let in_contains_out = matches!(self.containment, Containment::In | Containment::Both);
        (self.in_vertex == child && out_contains_in) || (self.out_vertex == child && in_contains_out)
    }
}

/// A vertex adjacent to a traversal origin, together with the connecting edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Neighbor {
    /// The adjacent vertex.
    pub vertex: VertexId,
    /// Entity type of the adjacent vertex.
    pub entity_type: String,
    /// The connecting edge.
    pub edge: EdgeRecord,
}
