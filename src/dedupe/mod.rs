#![forbid(unsafe_code)]

//! Duplicate detection and reconciliation.
//!
//! A run scans each requested entity type twice, separated by a sleep, and
//! only deletes duplicates whose grouping and keeper were reproduced by both
//! passes. Anything the tie-break cannot decide is reported, never deleted.

mod delete;
mod grouper;
mod reconcile;
mod report;
mod resolver;
mod scan;
mod scheduler;
mod signature;

/// Canonical grouping key derived from a type's ordered key properties.
pub use signature::{key_filters, KeySignature, KEY_SEPARATOR};

/// Partitioning of candidate vertices into dupe groups.
///
/// Parent-dependent types are re-queried by key and split by their single
/// containment parent.
pub use grouper::{connected_parent, group_candidates, load_vertices, DupeGroup, Grouping, LoadedVertices, ParentKey};

/// Conservative keeper selection for one dupe group.
pub use resolver::{DupeResolution, MemberSnapshot, Outcome, Resolver, UndeterminedReason};

/// One read-only pass over an entity type.
pub use scan::{ScanParams, ScanResult, Scanner};

/// Two-pass confirmation and the safety cap.
pub use reconcile::{confirm, reconcile, ConfirmedGroup, PlanDecision, ReconcileOptions, Reconciliation, ReconciliationPlan};

/// Transactional removal of non-keepers followed by a reindex request.
pub use delete::{DeletionExecutor, DeletionReport};

/// Bounded worker pool running one task per entity type.
pub use scheduler::{RunOptions, Scheduler};

/// Per-type and run-level reports.
pub use report::{RunSummary, TypeCounts, TypeReport, TypeStatus, UndeterminedGroup};
