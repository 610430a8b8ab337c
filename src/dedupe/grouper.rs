use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::dedupe::signature::{key_filters, KeySignature};
use crate::model::{Dir, Vertex};
use crate::schema::EntityTypeDescriptor;
use crate::store::GraphTx;
use crate::types::{Result, VertexId};

/// Two or more vertices that should be one logical entity.
///
/// Members are kept sorted and unique so that equal groups from different
/// passes compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DupeGroup {
    members: Vec<VertexId>,
}

impl DupeGroup {
    /// Builds a group; `None` when fewer than two distinct members remain.
    pub fn new(members: impl IntoIterator<Item = VertexId>) -> Option<Self> {
        let members: Vec<VertexId> = members
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        (members.len() > 1).then_some(DupeGroup { members })
    }

    /// Member ids, ascending.
    pub fn members(&self) -> &[VertexId] {
        &self.members
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false; a group has at least two members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether `id` is a member.
    pub fn contains(&self, id: VertexId) -> bool {
        self.members.binary_search(&id).is_ok()
    }
}

/// Output of candidate grouping.
#[derive(Clone, Debug, Default)]
pub struct Grouping {
    /// Candidate groups in signature order.
    pub groups: Vec<DupeGroup>,
    /// Vertices skipped because they could not be read.
    pub unreadable: Vec<VertexId>,
}

/// Result of bulk vertex loading.
#[derive(Clone, Debug, Default)]
pub struct LoadedVertices {
    /// Vertices read successfully.
    pub vertices: Vec<Vertex>,
    /// Vertices whose read failed.
    pub unreadable: Vec<VertexId>,
}

/// Reads `ids`, logging and skipping any vertex whose read fails.
///
/// Vertices that disappeared since they were listed are dropped silently.
pub fn load_vertices(tx: &dyn GraphTx, ids: &[VertexId]) -> LoadedVertices {
    let mut loaded = LoadedVertices::default();
    for id in ids {
        match tx.load_vertex(*id) {
            Ok(Some(vertex)) => loaded.vertices.push(vertex),
            Ok(None) => debug!(vertex = %id, "dedupe.group.vertex_vanished"),
            Err(err) => {
                warn!(vertex = %id, %err, "dedupe.group.vertex_unreadable");
                loaded.unreadable.push(*id);
            }
        }
    }
    loaded
}

/// Parent bucket used to split dependent-type signature groups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParentKey {
    /// Exactly one parent connected through a containment edge.
    Parent(VertexId),
    /// No parent, or more than one.
    Unresolved,
}

/// Finds the single vertex owning `id` through a containment edge.
pub fn connected_parent(tx: &dyn GraphTx, id: VertexId) -> Result<ParentKey> {
    let parents: BTreeSet<VertexId> = tx
        .neighbors(id, Dir::Both)?
        .into_iter()
        .filter(|n| n.edge.parent_edge_of(id))
        .map(|n| n.vertex)
        .collect();
    let mut iter = parents.iter();
    match (iter.next(), iter.next()) {
        (Some(parent), None) => Ok(ParentKey::Parent(*parent)),
        (None, _) => Ok(ParentKey::Unresolved),
        (Some(_), Some(_)) => {
            debug!(vertex = %id, parents = parents.len(), "dedupe.group.multiple_parents");
            Ok(ParentKey::Unresolved)
        }
    }
}

/// Partitions `vertices` (all of `descriptor`'s type) into candidate groups.
pub fn group_candidates(
    tx: &dyn GraphTx,
    vertices: &[Vertex],
    descriptor: &EntityTypeDescriptor,
) -> Result<Grouping> {
    let keys = &descriptor.key_properties;
    let mut buckets: BTreeMap<KeySignature, Vec<&Vertex>> = BTreeMap::new();
    for vertex in vertices {
        if vertex.entity_type != descriptor.name {
            continue;
        }
        buckets
            .entry(KeySignature::build(vertex, keys))
            .or_default()
            .push(vertex);
    }

    let mut grouping = Grouping::default();
    if !descriptor.is_dependent() {
        grouping.groups = buckets
            .into_values()
            .filter_map(|bucket| DupeGroup::new(bucket.iter().map(|v| v.id)))
            .collect();
        return Ok(grouping);
    }

    // The re-query keeps only vertices whose stored signature equals the
    // bucket's, so a vertex is placed in at most one group per pass.
    for (signature, bucket) in buckets {
        if bucket.len() < 2 {
            continue;
        }
        let filters = key_filters(bucket[0], keys);
        let ids = tx.find_vertices(&descriptor.name, &filters)?;
        let loaded = load_vertices(tx, &ids);
        grouping.unreadable.extend(loaded.unreadable);

        let mut by_parent: BTreeMap<ParentKey, Vec<VertexId>> = BTreeMap::new();
        for candidate in loaded.vertices {
            if KeySignature::build(&candidate, keys) != signature {
                continue;
            }
            match connected_parent(tx, candidate.id) {
                Ok(parent) => by_parent.entry(parent).or_default().push(candidate.id),
                Err(err) => {
                    warn!(vertex = %candidate.id, %err, "dedupe.group.parent_unreadable");
                    grouping.unreadable.push(candidate.id);
                }
            }
        }
        grouping
            .groups
            .extend(by_parent.into_values().filter_map(DupeGroup::new));
    }
    Ok(grouping)
}
