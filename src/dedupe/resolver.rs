use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Conventions;
use crate::dedupe::grouper::DupeGroup;
use crate::dedupe::signature::KeySignature;
use crate::model::{Dir, Neighbor, Vertex};
use crate::schema::EntityTypeDescriptor;
use crate::store::GraphTx;
use crate::types::{PropValue, VertexId};

/// Decision for one dupe group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The group resolves to this surviving vertex.
    Keep {
        /// Id of the survivor.
        keeper: VertexId,
    },
    /// The group cannot be resolved automatically.
    Undetermined {
        /// Why the tie-break gave up.
        reason: UndeterminedReason,
    },
}

/// Why a group was left for manual resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UndeterminedReason {
    /// A member could not be read.
    UnreadableMember {
        /// The unreadable vertex.
        vertex: VertexId,
    },
    /// Members carry different entity-type tags.
    MixedEntityTypes,
    /// At least one member has no canonical URI.
    MissingCanonicalUri,
    /// Members disagree on the canonical URI.
    DivergentCanonicalUri,
    /// Members disagree on a key property.
    KeyMismatch,
    /// The pairwise comparison could not pick a favorite.
    NoPairwiseDecision {
        /// Running favorite at the point of failure.
        favorite: VertexId,
        /// Member it was compared against.
        challenger: VertexId,
    },
    /// The pairwise winner failed its canonical-URI lookup.
    UriSelfCheckFailed {
        /// The pairwise winner.
        vertex: VertexId,
    },
}

impl fmt::Display for UndeterminedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UndeterminedReason::UnreadableMember { vertex } => {
                write!(f, "member {vertex} could not be read")
            }
            UndeterminedReason::MixedEntityTypes => f.write_str("members have different entity types"),
            UndeterminedReason::MissingCanonicalUri => f.write_str("a member has no canonical uri"),
            UndeterminedReason::DivergentCanonicalUri => {
                f.write_str("members have different canonical uris")
            }
            UndeterminedReason::KeyMismatch => f.write_str("members disagree on key properties"),
            UndeterminedReason::NoPairwiseDecision {
                favorite,
                challenger,
            } => write!(f, "no tie-break between {favorite} and {challenger}"),
            UndeterminedReason::UriSelfCheckFailed { vertex } => {
                write!(f, "canonical uri lookup of {vertex} does not return it uniquely")
            }
        }
    }
}

/// Operator-facing view of one group member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemberSnapshot {
    /// Vertex id.
    pub id: VertexId,
    /// Display-name property value.
    pub display_name: Option<String>,
    /// Key signature at scan time.
    pub key_signature: Option<String>,
    /// Canonical URI at scan time.
    pub canonical_uri: Option<String>,
    /// Number of distinct neighbors.
    pub neighbor_count: usize,
}

/// A dupe group together with its outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DupeResolution {
    /// The group.
    pub group: DupeGroup,
    /// Keeper or undetermined.
    #[serde(flatten)]
    pub outcome: Outcome,
    /// Member details for reporting.
    pub members: Vec<MemberSnapshot>,
}

impl DupeResolution {
    /// The keeper, if one was chosen.
    pub fn keeper(&self) -> Option<VertexId> {
        match self.outcome {
            Outcome::Keep { keeper } => Some(keeper),
            Outcome::Undetermined { .. } => None,
        }
    }

    /// Whether `other` carries the same members and the same keeper.
    pub fn same_decision(&self, other: &DupeResolution) -> bool {
        self.group == other.group && self.keeper().is_some() && self.keeper() == other.keeper()
    }
}

struct Candidate {
    vertex: Vertex,
    neighbors: Vec<Neighbor>,
    neighbor_ids: BTreeSet<VertexId>,
}

impl Candidate {
    fn id(&self) -> VertexId {
        self.vertex.id
    }

    fn has_neighbor_type(&self, entity_type: &str) -> bool {
        self.neighbors.iter().any(|n| n.entity_type == entity_type)
    }

    fn parents(&self, descriptor: &EntityTypeDescriptor) -> BTreeSet<VertexId> {
        self.neighbors
            .iter()
            .filter(|n| descriptor.is_parent_type(&n.entity_type))
            .map(|n| n.vertex)
            .collect()
    }
}

/// Running state of the pairwise fold.
enum Pick<'c> {
    Keep(&'c Candidate),
    NoDecision,
}

/// Picks the survivor of a dupe group, or declares it undetermined.
pub struct Resolver<'a> {
    tx: &'a dyn GraphTx,
    descriptor: &'a EntityTypeDescriptor,
    conventions: &'a Conventions,
    special_tenant_rule: bool,
}

impl<'a> Resolver<'a> {
    /// Creates a resolver reading through `tx`.
    pub fn new(
        tx: &'a dyn GraphTx,
        descriptor: &'a EntityTypeDescriptor,
        conventions: &'a Conventions,
        special_tenant_rule: bool,
    ) -> Self {
        Self {
            tx,
            descriptor,
            conventions,
            special_tenant_rule,
        }
    }

    /// Resolves one group.
    pub fn resolve(&self, group: &DupeGroup) -> DupeResolution {
        let mut candidates = Vec::with_capacity(group.len());
        let mut unreadable = None;
        for id in group.members() {
            match self.load(*id) {
                Some(candidate) => candidates.push(candidate),
                None => {
                    unreadable.get_or_insert(*id);
                }
            }
        }
        let members = group
            .members()
            .iter()
            .map(|id| self.snapshot(*id, candidates.iter().find(|c| c.id() == *id)))
            .collect();
        let outcome = match unreadable {
            Some(vertex) => Outcome::Undetermined {
                reason: UndeterminedReason::UnreadableMember { vertex },
            },
            None => self.decide(&candidates),
        };
        if let Outcome::Undetermined { reason } = &outcome {
            debug!(
                entity_type = %self.descriptor.name,
                members = ?group.members(),
                %reason,
                "dedupe.resolve.undetermined"
            );
        }
        DupeResolution {
            group: group.clone(),
            outcome,
            members,
        }
    }

    fn decide(&self, candidates: &[Candidate]) -> Outcome {
        let undetermined = |reason| Outcome::Undetermined { reason };
        let Some((first, rest)) = candidates.split_first() else {
            return undetermined(UndeterminedReason::KeyMismatch);
        };

        if rest
            .iter()
            .any(|c| c.vertex.entity_type != first.vertex.entity_type)
        {
            return undetermined(UndeterminedReason::MixedEntityTypes);
        }

        let uri_of = |c: &Candidate| {
            c.vertex
                .get_str(&self.conventions.canonical_uri_property)
                .filter(|uri| !uri.is_empty())
                .map(str::to_string)
        };
        let Some(uri) = uri_of(first) else {
            return undetermined(UndeterminedReason::MissingCanonicalUri);
        };
        for c in rest {
            match uri_of(c) {
                None => return undetermined(UndeterminedReason::MissingCanonicalUri),
                Some(other) if other != uri => {
                    return undetermined(UndeterminedReason::DivergentCanonicalUri)
                }
                Some(_) => {}
            }
        }

        let first_keys = self.key_values(&first.vertex);
        if rest.iter().any(|c| self.key_values(&c.vertex) != first_keys) {
            return undetermined(UndeterminedReason::KeyMismatch);
        }

        let mut last_pair = (first.id(), first.id());
        let winner = rest.iter().try_fold(first, |favorite, challenger| {
            last_pair = (favorite.id(), challenger.id());
            match self.pick_one_of_two(favorite, challenger) {
                Pick::Keep(chosen) => Some(chosen),
                Pick::NoDecision => None,
            }
        });
        let Some(winner) = winner else {
            let (favorite, challenger) = last_pair;
            return undetermined(UndeterminedReason::NoPairwiseDecision {
                favorite,
                challenger,
            });
        };

        if !self.uri_self_consistent(winner) {
            return undetermined(UndeterminedReason::UriSelfCheckFailed {
                vertex: winner.id(),
            });
        }
        Outcome::Keep {
            keeper: winner.id(),
        }
    }

    fn pick_one_of_two<'c>(&self, a: &'c Candidate, b: &'c Candidate) -> Pick<'c> {
        if a.vertex.entity_type != b.vertex.entity_type {
            return Pick::NoDecision;
        }
        for key in &self.descriptor.key_properties {
            match (a.vertex.get(key), b.vertex.get(key)) {
                (Some(left), Some(right)) if left == right => {}
                _ => return Pick::NoDecision,
            }
        }

        if self.descriptor.is_dependent() {
            let a_parents = a.parents(self.descriptor);
            let b_parents = b.parents(self.descriptor);
            if a_parents.len() != 1 || a_parents != b_parents {
                return Pick::NoDecision;
            }
        }

        let (a_set, b_set) = (&a.neighbor_ids, &b.neighbor_ids);
        if a_set.len() == b_set.len() {
            if a_set == b_set {
                if self.uri_self_consistent(a) {
                    return Pick::Keep(a);
                }
                if self.uri_self_consistent(b) {
                    return Pick::Keep(b);
                }
                return Pick::NoDecision;
            }
            return self.special_tenant_pick(a, b).unwrap_or(Pick::NoDecision);
        }

        if a_set.is_superset(b_set) {
            Pick::Keep(a)
        } else if b_set.is_superset(a_set) {
            Pick::Keep(b)
        } else {
            Pick::NoDecision
        }
    }

    fn special_tenant_pick<'c>(&self, a: &'c Candidate, b: &'c Candidate) -> Option<Pick<'c>> {
        let rule = &self.conventions.tenant_rule;
        if !self.special_tenant_rule
            || a.vertex.entity_type != rule.tenant_type
            || a.neighbor_ids.len() != 2
            || b.neighbor_ids.len() != 2
        {
            return None;
        }
        if a.has_neighbor_type(&rule.leaf_type) && b.has_neighbor_type(&rule.aggregate_type) {
            return Some(Pick::Keep(b));
        }
        if b.has_neighbor_type(&rule.leaf_type) && a.has_neighbor_type(&rule.aggregate_type) {
            return Some(Pick::Keep(a));
        }
        None
    }

    fn uri_self_consistent(&self, candidate: &Candidate) -> bool {
        let Some(uri) = candidate
            .vertex
            .get_str(&self.conventions.canonical_uri_property)
            .filter(|uri| !uri.is_empty())
        else {
            return false;
        };
        match self.tx.vertices_by_uri(uri) {
            Ok(hits) => hits.as_slice() == [candidate.id()],
            Err(err) => {
                warn!(vertex = %candidate.id(), %err, "dedupe.resolve.uri_lookup_failed");
                false
            }
        }
    }

    fn key_values<'v>(&self, vertex: &'v Vertex) -> Vec<Option<&'v PropValue>> {
        self.descriptor
            .key_properties
            .iter()
            .map(|key| vertex.get(key))
            .collect()
    }

    fn load(&self, id: VertexId) -> Option<Candidate> {
        let vertex = match self.tx.load_vertex(id) {
            Ok(Some(vertex)) => vertex,
            Ok(None) => return None,
            Err(err) => {
                warn!(vertex = %id, %err, "dedupe.resolve.vertex_unreadable");
                return None;
            }
        };
        let neighbors = match self.tx.neighbors(id, Dir::Both) {
            Ok(neighbors) => neighbors,
            Err(err) => {
                warn!(vertex = %id, %err, "dedupe.resolve.neighbors_unreadable");
                return None;
            }
        };
        let neighbor_ids = neighbors.iter().map(|n| n.vertex).collect();
        Some(Candidate {
            vertex,
            neighbors,
            neighbor_ids,
        })
    }

    fn snapshot(&self, id: VertexId, candidate: Option<&Candidate>) -> MemberSnapshot {
        let Some(candidate) = candidate else {
            return MemberSnapshot {
                id,
                display_name: None,
                key_signature: None,
                canonical_uri: None,
                neighbor_count: 0,
            };
        };
        let vertex = &candidate.vertex;
        MemberSnapshot {
            id,
            display_name: self
                .descriptor
                .display_name_property
                .as_deref()
                .and_then(|name| vertex.get(name))
                .map(ToString::to_string),
            key_signature: Some(
                KeySignature::build(vertex, &self.descriptor.key_properties).to_string(),
            ),
            canonical_uri: vertex
                .get_str(&self.conventions.canonical_uri_property)
                .map(str::to_string),
            neighbor_count: candidate.neighbor_ids.len(),
        }
    }
}
