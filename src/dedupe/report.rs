use serde::Serialize;

use crate::dedupe::delete::DeletionReport;
use crate::dedupe::reconcile::{ConfirmedGroup, PlanDecision, Reconciliation};
use crate::dedupe::resolver::{MemberSnapshot, Outcome, UndeterminedReason};

/// How processing of one entity type ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum TypeStatus {
    /// Both passes ran; the plan was applied or reported.
    Completed,
    /// More confirmed groups than the cap; nothing was deleted.
    CapExceeded,
    /// Scanning or deletion failed; the graph is unchanged for this type.
    Failed(String),
}

/// Counters for one type, or totals across a run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TypeCounts {
    /// Vertices matching type and filters in pass 2.
    pub vertices_matched: usize,
    /// Vertices excluded by the time window in pass 2.
    pub vertices_outside_window: usize,
    /// Vertices skipped as unreadable in either pass.
    pub vertices_unreadable: usize,
    /// Dupe groups found by pass 1.
    pub groups_pass1: usize,
    /// Dupe groups found by pass 2.
    pub groups_pass2: usize,
    /// Groups reproduced by both passes.
    pub confirmed: usize,
    /// Vertices removed.
    pub deleted: usize,
    /// Groups left for manual resolution in pass 2.
    pub undetermined: usize,
}

impl TypeCounts {
    fn add(&mut self, other: &TypeCounts) {
        self.vertices_matched += other.vertices_matched;
        self.vertices_outside_window += other.vertices_outside_window;
        self.vertices_unreadable += other.vertices_unreadable;
        self.groups_pass1 += other.groups_pass1;
        self.groups_pass2 += other.groups_pass2;
        self.confirmed += other.confirmed;
        self.deleted += other.deleted;
        self.undetermined += other.undetermined;
    }
}

/// A group the operator has to resolve by hand.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UndeterminedGroup {
    /// Why no keeper was chosen.
    pub reason: UndeterminedReason,
    /// Member details.
    pub members: Vec<MemberSnapshot>,
}

/// Result of processing one entity type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TypeReport {
    /// Entity type.
    pub entity_type: String,
    /// Final status.
    #[serde(flatten)]
    pub status: TypeStatus,
    /// Counters.
    pub counts: TypeCounts,
    /// Confirmed groups (applied when auto-fix is on).
    pub plan: Vec<ConfirmedGroup>,
    /// Undetermined groups from the second pass.
    pub undetermined: Vec<UndeterminedGroup>,
    /// Whether the reindex request succeeded, when one was made.
    pub reindexed: Option<bool>,
}

impl TypeReport {
    /// Report for a type whose scan never finished.
    pub fn failed(entity_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            status: TypeStatus::Failed(message.into()),
            counts: TypeCounts::default(),
            plan: Vec::new(),
            undetermined: Vec::new(),
            reindexed: None,
        }
    }

    /// Builds the report from both passes; `deletion` is `None` on dry runs.
    pub fn from_reconciliation(reconciliation: &Reconciliation, deletion: Option<&DeletionReport>) -> Self {
        let Reconciliation {
            pass1,
            pass2,
            decision,
        } = reconciliation;

        let undetermined: Vec<UndeterminedGroup> = pass2
            .resolutions
            .iter()
            .filter_map(|resolution| match &resolution.outcome {
                Outcome::Undetermined { reason } => Some(UndeterminedGroup {
                    reason: reason.clone(),
                    members: resolution.members.clone(),
                }),
                Outcome::Keep { .. } => None,
            })
            .collect();

        let mut unreadable: Vec<_> = pass1.unreadable.iter().chain(&pass2.unreadable).collect();
        unreadable.sort_unstable();
        unreadable.dedup();

        let (status, plan, confirmed) = match decision {
            PlanDecision::Ready { plan } => (TypeStatus::Completed, plan.groups.clone(), plan.groups.len()),
            PlanDecision::CapExceeded { confirmed, .. } => (TypeStatus::CapExceeded, Vec::new(), *confirmed),
        };

        Self {
            entity_type: pass2.entity_type.clone(),
            status,
            counts: TypeCounts {
                vertices_matched: pass2.vertices_matched,
                vertices_outside_window: pass2.vertices_outside_window,
                vertices_unreadable: unreadable.len(),
                groups_pass1: pass1.resolutions.len(),
                groups_pass2: pass2.resolutions.len(),
                confirmed,
                deleted: deletion.map_or(0, |d| d.deleted.len()),
                undetermined: undetermined.len(),
            },
            plan,
            undetermined,
            reindexed: deletion.and_then(|d| d.reindexed),
        }
    }

    /// Marks a completed scan whose deletion failed.
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        self.status = TypeStatus::Failed(message.into());
        self.counts.deleted = 0;
        self.reindexed = None;
        self
    }
}

/// Aggregate of one run across all requested types.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    /// Operator who started the run.
    pub operator: String,
    /// Whether deletions were applied.
    pub auto_fix: bool,
    /// Per-type reports, in request order.
    pub types: Vec<TypeReport>,
    /// Sums over `types`.
    pub totals: TypeCounts,
    /// Types that ended in [`TypeStatus::Failed`].
    pub failed_types: usize,
}

impl RunSummary {
    /// Aggregates `types`.
    pub fn new(operator: impl Into<String>, auto_fix: bool, types: Vec<TypeReport>) -> Self {
        let mut totals = TypeCounts::default();
        for report in &types {
            totals.add(&report.counts);
        }
        let failed_types = types
            .iter()
            .filter(|r| matches!(r.status, TypeStatus::Failed(_)))
            .count();
        Self {
            operator: operator.into(),
            auto_fix,
            types,
            totals,
            failed_types,
        }
    }

    /// Whether any type failed.
    pub fn has_failures(&self) -> bool {
        self.failed_types > 0
    }
}
