use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::dedupe::reconcile::ReconciliationPlan;
use crate::store::{GraphStore, GraphTx, Reindexer};
use crate::types::{DedupeError, Result, VertexId};

/// Outcome of applying one plan.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    /// Vertices removed, in deletion order.
    pub deleted: Vec<VertexId>,
    /// Whether the reindex request succeeded; `None` when none was made.
    pub reindexed: Option<bool>,
}

/// Applies confirmed plans inside one write transaction per entity type.
pub struct DeletionExecutor<'a> {
    store: &'a dyn GraphStore,
    reindexer: &'a dyn Reindexer,
}

impl<'a> DeletionExecutor<'a> {
    /// Creates an executor.
    pub fn new(store: &'a dyn GraphStore, reindexer: &'a dyn Reindexer) -> Self {
        Self { store, reindexer }
    }

    /// Deletes every non-keeper of every group, then commits once.
    ///
    /// Any failed removal rolls back the whole transaction and is returned as
    /// [`DedupeError::Deletion`]. An empty plan opens no transaction and
    /// triggers no reindex.
    pub fn apply(&self, entity_type: &str, plan: &ReconciliationPlan, index_name: &str) -> Result<DeletionReport> {
        if plan.is_empty() {
            debug!(entity_type, "dedupe.delete.empty_plan");
            return Ok(DeletionReport::default());
        }

        let mut tx = self.store.begin()?;
        let deleted = match remove_all(tx.as_mut(), entity_type, plan) {
            Ok(deleted) => deleted,
            Err(err) => {
                error!(entity_type, %err, "dedupe.delete.rolled_back");
                if let Err(rollback_err) = tx.rollback() {
                    warn!(entity_type, err = %rollback_err, "dedupe.delete.rollback_failed");
                }
                return Err(err);
            }
        };
        tx.commit()?;
        info!(
            entity_type,
            groups = plan.groups.len(),
            deleted = deleted.len(),
            "dedupe.delete.committed"
        );

        let reindexed = match self.reindexer.reindex(index_name) {
            Ok(()) => true,
            Err(err) => {
                warn!(entity_type, index_name, %err, "dedupe.reindex.failed");
                false
            }
        };
        Ok(DeletionReport {
            deleted,
            reindexed: Some(reindexed),
        })
    }
}

fn remove_all(tx: &mut dyn GraphTx, entity_type: &str, plan: &ReconciliationPlan) -> Result<Vec<VertexId>> {
    let mut deleted = Vec::with_capacity(plan.doomed_count());
    for group in &plan.groups {
        for vertex in group.doomed() {
            tx.remove_vertex(vertex).map_err(|source| DedupeError::Deletion {
                entity_type: entity_type.to_string(),
                vertex,
                members: group.members.clone(),
                source: Box::new(source),
            })?;
            deleted.push(vertex);
        }
    }
    Ok(deleted)
}
