use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::info;

use crate::config::Conventions;
use crate::dedupe::grouper::{group_candidates, load_vertices};
use crate::dedupe::resolver::{DupeResolution, Resolver};
use crate::model::Vertex;
use crate::schema::EntityTypeDescriptor;
use crate::store::{GraphStore, GraphTx, PropertyFilter};
use crate::types::{Result, VertexId};

/// Inputs of one scan pass.
#[derive(Clone, Debug, Default)]
pub struct ScanParams {
    /// Only vertices created within this window of "now" are candidates.
    pub time_window: Option<Duration>,
    /// Extra equality constraints on the candidate set.
    pub filters: Vec<PropertyFilter>,
    /// Enables the special-tenant tie-break override.
    pub special_tenant_rule: bool,
}

/// Everything one scan pass found for one entity type.
#[derive(Clone, Debug, Serialize)]
pub struct ScanResult {
    /// Entity type scanned.
    pub entity_type: String,
    /// Vertices matching type and property filters.
    pub vertices_matched: usize,
    /// Vertices dropped by the time window.
    pub vertices_outside_window: usize,
    /// Vertices skipped because a read failed.
    pub unreadable: Vec<VertexId>,
    /// One entry per dupe group, in grouping order.
    pub resolutions: Vec<DupeResolution>,
}

impl ScanResult {
    /// Groups with a keeper.
    pub fn resolved(&self) -> impl Iterator<Item = &DupeResolution> {
        self.resolutions.iter().filter(|r| r.keeper().is_some())
    }

    /// Groups left for manual resolution.
    pub fn undetermined(&self) -> impl Iterator<Item = &DupeResolution> {
        self.resolutions.iter().filter(|r| r.keeper().is_none())
    }
}

/// Runs candidate selection, grouping and tie-breaking for one type.
pub struct Scanner<'a> {
    store: &'a dyn GraphStore,
    descriptor: &'a EntityTypeDescriptor,
    conventions: &'a Conventions,
}

impl<'a> Scanner<'a> {
    /// Creates a scanner for `descriptor`'s type.
    pub fn new(
        store: &'a dyn GraphStore,
        descriptor: &'a EntityTypeDescriptor,
        conventions: &'a Conventions,
    ) -> Self {
        Self {
            store,
            descriptor,
            conventions,
        }
    }

    /// Entity type this scanner covers.
    pub fn descriptor(&self) -> &EntityTypeDescriptor {
        self.descriptor
    }

    /// Scans in a fresh read transaction, rolled back afterwards.
    pub fn scan(&self, params: &ScanParams) -> Result<ScanResult> {
        self.scan_at(params, OffsetDateTime::now_utc())
    }

    /// Same as [`Scanner::scan`] with an explicit clock reading.
    pub fn scan_at(&self, params: &ScanParams, now: OffsetDateTime) -> Result<ScanResult> {
        let tx = self.store.begin()?;
        let result = self.scan_in(tx.as_ref(), params, now);
        tx.rollback()?;
        result
    }

    fn scan_in(&self, tx: &dyn GraphTx, params: &ScanParams, now: OffsetDateTime) -> Result<ScanResult> {
        let entity_type = &self.descriptor.name;
        let ids = tx.find_vertices(entity_type, &params.filters)?;
        let loaded = load_vertices(tx, &ids);
        let vertices_matched = ids.len();

        let cutoff = params.time_window.map(|window| epoch_millis(now) - window_millis(window));
        let (in_window, outside): (Vec<Vertex>, Vec<Vertex>) = loaded
            .vertices
            .into_iter()
            .partition(|v| self.within_window(v, cutoff));

        let grouping = group_candidates(tx, &in_window, self.descriptor)?;
        let resolver = Resolver::new(tx, self.descriptor, self.conventions, params.special_tenant_rule);
        let resolutions: Vec<DupeResolution> = grouping
            .groups
            .iter()
            .map(|group| resolver.resolve(group))
            .collect();

        let mut unreadable = loaded.unreadable;
        unreadable.extend(grouping.unreadable);
        unreadable.sort_unstable();
        unreadable.dedup();

        let result = ScanResult {
            entity_type: entity_type.clone(),
            vertices_matched,
            vertices_outside_window: outside.len(),
            unreadable,
            resolutions,
        };
        info!(
            entity_type = %entity_type,
            matched = result.vertices_matched,
            outside_window = result.vertices_outside_window,
            unreadable = result.unreadable.len(),
            groups = result.resolutions.len(),
            undetermined = result.undetermined().count(),
            "dedupe.scan.completed"
        );
        Ok(result)
    }

    fn within_window(&self, vertex: &Vertex, cutoff: Option<i64>) -> bool {
        let Some(cutoff) = cutoff else {
            return true;
        };
        match vertex.get_int(&self.conventions.created_ts_property) {
            Some(created) => created >= cutoff,
            None => true,
        }
    }
}

fn epoch_millis(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

fn window_millis(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX)
}
