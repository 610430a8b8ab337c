use std::thread;
use std::time::Duration;

use rustc_hash::FxHashSet;
use serde::Serialize;
use tracing::{info, warn};

use crate::dedupe::resolver::DupeResolution;
use crate::dedupe::scan::{ScanParams, ScanResult, Scanner};
use crate::types::{Result, VertexId};

/// A group reproduced identically by both passes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConfirmedGroup {
    /// All members, ascending, keeper included.
    pub members: Vec<VertexId>,
    /// Survivor.
    pub keeper: VertexId,
}

impl ConfirmedGroup {
    /// Members to delete.
    pub fn doomed(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.members.iter().copied().filter(move |id| *id != self.keeper)
    }
}

/// The only input the deletion executor accepts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    /// Groups to fix.
    pub groups: Vec<ConfirmedGroup>,
}

impl ReconciliationPlan {
    /// Whether there is nothing to delete.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Vertices the plan would remove.
    pub fn doomed_count(&self) -> usize {
        self.groups.iter().map(|g| g.doomed().count()).sum()
    }
}

/// Result of intersecting two passes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PlanDecision {
    /// Plan within the safety cap.
    Ready {
        /// Confirmed groups.
        plan: ReconciliationPlan,
    },
    /// Too many confirmed groups; nothing may be deleted.
    CapExceeded {
        /// Confirmed groups found.
        confirmed: usize,
        /// Configured cap.
        max_records_to_fix: usize,
    },
}

/// Intersects pass 1 with pass 2 and applies the safety cap.
///
/// A pass-2 resolution is confirmed only when pass 1 holds a resolution with
/// the same members and the same keeper. Undetermined resolutions never
/// confirm.
pub fn confirm(pass1: &[DupeResolution], pass2: &[DupeResolution], max_records_to_fix: usize) -> PlanDecision {
    let first: FxHashSet<(&[VertexId], VertexId)> = pass1
        .iter()
        .filter_map(|r| r.keeper().map(|keeper| (r.group.members(), keeper)))
        .collect();

    let mut seen = FxHashSet::default();
    let groups: Vec<ConfirmedGroup> = pass2
        .iter()
        .filter_map(|r| r.keeper().map(|keeper| (r.group.members(), keeper)))
        .filter(|entry| first.contains(entry) && seen.insert(*entry))
        .map(|(members, keeper)| ConfirmedGroup {
            members: members.to_vec(),
            keeper,
        })
        .collect();

    if groups.len() > max_records_to_fix {
        return PlanDecision::CapExceeded {
            confirmed: groups.len(),
            max_records_to_fix,
        };
    }
    PlanDecision::Ready {
        plan: ReconciliationPlan { groups },
    }
}

/// Throttles of the two-pass protocol.
#[derive(Clone, Debug)]
pub struct ReconcileOptions {
    /// Delay between pass 1 and pass 2.
    pub sleep_between_passes: Duration,
    /// Safety cap on confirmed groups.
    pub max_records_to_fix: usize,
}

/// Both passes plus the decision drawn from them.
#[derive(Clone, Debug, Serialize)]
pub struct Reconciliation {
    /// First pass.
    pub pass1: ScanResult,
    /// Second pass, taken after the sleep.
    pub pass2: ScanResult,
    /// Plan or cap overflow.
    pub decision: PlanDecision,
}

/// Runs pass 1, sleeps, runs pass 2 in a fresh transaction, then confirms.
pub fn reconcile(scanner: &Scanner<'_>, params: &ScanParams, options: &ReconcileOptions) -> Result<Reconciliation> {
    let entity_type = &scanner.descriptor().name;
    let pass1 = scanner.scan(params)?;
    if !options.sleep_between_passes.is_zero() {
        info!(
            entity_type = %entity_type,
            sleep_secs = options.sleep_between_passes.as_secs(),
            "dedupe.reconcile.sleeping"
        );
        thread::sleep(options.sleep_between_passes);
    }
    let pass2 = scanner.scan(params)?;

    let decision = confirm(&pass1.resolutions, &pass2.resolutions, options.max_records_to_fix);
    match &decision {
        PlanDecision::CapExceeded {
            confirmed,
            max_records_to_fix,
        } => warn!(
            entity_type = %entity_type,
            confirmed,
            max_records_to_fix,
            "dedupe.reconcile.cap_exceeded"
        ),
        PlanDecision::Ready { plan } => info!(
            entity_type = %entity_type,
            pass1_groups = pass1.resolutions.len(),
            pass2_groups = pass2.resolutions.len(),
            confirmed = plan.groups.len(),
            "dedupe.reconcile.confirmed"
        ),
    }
    Ok(Reconciliation {
        pass1,
        pass2,
        decision,
    })
}
