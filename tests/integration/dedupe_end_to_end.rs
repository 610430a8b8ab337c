#![allow(missing_docs)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use graph_dedupe::{
    config::{Conventions, OperatorPolicy, DEFAULT_CANONICAL_URI_PROPERTY as URI},
    dedupe::{
        reconcile, PlanDecision, ReconcileOptions, RunOptions, RunSummary, ScanParams, Scanner,
        Scheduler, TypeStatus, UndeterminedReason,
    },
    model::{Containment, Dir, Neighbor, Vertex},
    schema::EntityTypeDescriptor,
    store::{GraphStore, GraphTx, MemoryGraph, PropertyFilter},
    types::{DedupeError, PropValue, Result, VertexId},
};

fn pserver_type() -> EntityTypeDescriptor {
    EntityTypeDescriptor::new("pserver", ["hostname"]).display_name("hostname")
}

fn tenant_type() -> EntityTypeDescriptor {
    EntityTypeDescriptor::new("tenant", ["tenant-id"]).dependent_on(["cloud-region"])
}

fn pserver(graph: &MemoryGraph, host: &str, uri: &str) -> VertexId {
    graph.add_vertex(
        "pserver",
        [
            ("hostname", PropValue::from(host)),
            (URI, PropValue::from(uri)),
        ],
    )
}

fn run_options(descriptors: Vec<EntityTypeDescriptor>) -> RunOptions {
    RunOptions {
        descriptors,
        auto_fix: true,
        max_records_to_fix: 25,
        sleep_between_passes: Duration::ZERO,
        scan: ScanParams::default(),
        concurrency: 5,
        operator: OperatorPolicy::default()
            .parse("jsmith01")
            .expect("valid operator"),
    }
}

fn run(store: &dyn GraphStore, graph: &MemoryGraph, options: &RunOptions) -> RunSummary {
    let conventions = Conventions::default();
    Scheduler::new(store, graph, &conventions)
        .run(options)
        .expect("run completes")
}

#[test]
fn identical_duplicates_keep_one_and_delete_the_other() {
    let graph = MemoryGraph::default();
    let a = pserver(&graph, "X", "/pservers/X");
    let b = pserver(&graph, "X", "/pservers/X");
    for n in 0..3 {
        let complex = graph.add_vertex("complex", [("physical-location-id", format!("c{n}"))]);
        graph.add_edge(a, complex, "locatedIn", Containment::None).unwrap();
        graph.add_edge(b, complex, "locatedIn", Containment::None).unwrap();
    }

    let summary = run(&graph, &graph, &run_options(vec![pserver_type()]));
    let report = &summary.types[0];
    assert_eq!(report.status, TypeStatus::Completed);
    assert_eq!(report.counts.groups_pass1, 1);
    assert_eq!(report.counts.groups_pass2, 1);
    assert_eq!(report.plan.len(), 1);
    let keeper = report.plan[0].keeper;
    assert!(keeper == a || keeper == b);
    let removed = if keeper == a { b } else { a };
    assert!(graph.contains(keeper));
    assert!(!graph.contains(removed));
    assert_eq!(report.counts.deleted, 1);
    assert_eq!(graph.reindex_requests(), vec!["pserver-id".to_string()]);

    let tx = graph.begin().unwrap();
    assert_eq!(tx.vertices_by_uri("/pservers/X").unwrap(), vec![keeper]);
}

#[test]
fn divergent_uris_are_reported_not_deleted() {
    let graph = MemoryGraph::default();
    let a = pserver(&graph, "X", "/pservers/X");
    let b = pserver(&graph, "X", "/pservers/X-2");

    let summary = run(&graph, &graph, &run_options(vec![pserver_type()]));
    let report = &summary.types[0];
    assert!(report.plan.is_empty());
    assert_eq!(report.counts.deleted, 0);
    assert_eq!(report.undetermined.len(), 1);
    let group = &report.undetermined[0];
    assert_eq!(group.reason, UndeterminedReason::DivergentCanonicalUri);
    let ids: Vec<VertexId> = group.members.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![a, b]);
    assert_eq!(group.members[0].display_name.as_deref(), Some("X"));
    assert!(graph.contains(a));
    assert!(graph.contains(b));
    assert!(graph.reindex_requests().is_empty());
}

#[test]
fn dependent_duplicates_under_different_parents_are_not_grouped() {
    let graph = MemoryGraph::default();
    let east = graph.add_vertex("cloud-region", [("cloud-region-id", "east")]);
    let west = graph.add_vertex("cloud-region", [("cloud-region-id", "west")]);
    for region in [east, west] {
        let tenant = graph.add_vertex(
            "tenant",
            [
                ("tenant-id", PropValue::from("t1")),
                (URI, PropValue::from(format!("/regions/{region}/tenants/t1"))),
            ],
        );
        graph.add_edge(region, tenant, "has", Containment::Out).unwrap();
    }

    let summary = run(&graph, &graph, &run_options(vec![tenant_type()]));
    let report = &summary.types[0];
    assert_eq!(report.counts.groups_pass1, 0);
    assert_eq!(report.counts.groups_pass2, 0);
    assert!(report.undetermined.is_empty());
    assert_eq!(graph.vertex_count(), 4);
}

/// Delegates to a [`MemoryGraph`] but fails reading or removing one vertex.
struct FailingStore {
    inner: MemoryGraph,
    fail_load: Option<VertexId>,
    fail_remove: Option<VertexId>,
}

impl FailingStore {
    fn failing_removal(inner: MemoryGraph, id: VertexId) -> Self {
        Self {
            inner,
            fail_load: None,
            fail_remove: Some(id),
        }
    }

    fn failing_load(inner: MemoryGraph, id: VertexId) -> Self {
        Self {
            inner,
            fail_load: Some(id),
            fail_remove: None,
        }
    }
}

struct FailingTx<'a> {
    inner: Box<dyn GraphTx + 'a>,
    fail_load: Option<VertexId>,
    fail_remove: Option<VertexId>,
}

impl GraphStore for FailingStore {
    fn begin(&self) -> Result<Box<dyn GraphTx + '_>> {
        Ok(Box::new(FailingTx {
            inner: self.inner.begin()?,
            fail_load: self.fail_load,
            fail_remove: self.fail_remove,
        }))
    }
}

impl GraphTx for FailingTx<'_> {
    fn find_vertices(&self, entity_type: &str, filters: &[PropertyFilter]) -> Result<Vec<VertexId>> {
        self.inner.find_vertices(entity_type, filters)
    }

    fn load_vertex(&self, id: VertexId) -> Result<Option<Vertex>> {
        if self.fail_load == Some(id) {
            return Err(DedupeError::Store(format!("injected failure reading {id}")));
        }
        self.inner.load_vertex(id)
    }

    fn neighbors(&self, id: VertexId, dir: Dir) -> Result<Vec<Neighbor>> {
        self.inner.neighbors(id, dir)
    }

    fn vertices_by_uri(&self, uri: &str) -> Result<Vec<VertexId>> {
        self.inner.vertices_by_uri(uri)
    }

    fn remove_vertex(&mut self, id: VertexId) -> Result<()> {
        if self.fail_remove == Some(id) {
            return Err(DedupeError::Store(format!("injected failure removing {id}")));
        }
        self.inner.remove_vertex(id)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback()
    }
}

#[test]
fn failed_deletion_rolls_back_the_whole_type() {
    let graph = MemoryGraph::default();
    let members: Vec<VertexId> = (0..4).map(|_| pserver(&graph, "X", "/pservers/X")).collect();
    let other = pserver(&graph, "Y", "/pservers/Y");
    let other_dupe = pserver(&graph, "Y", "/pservers/Y");
    let store = FailingStore::failing_removal(graph, members[2]);

    let summary = run(&store, &store.inner, &run_options(vec![pserver_type()]));
    let report = &summary.types[0];
    assert!(matches!(report.status, TypeStatus::Failed(ref message) if message.contains("injected")));
    assert_eq!(report.counts.deleted, 0);
    assert!(summary.has_failures());
    for id in members.iter().chain([&other, &other_dupe]) {
        assert!(store.inner.contains(*id), "vertex {id} must survive the rollback");
    }
    assert!(store.inner.reindex_requests().is_empty());
}

#[test]
fn failure_in_one_type_leaves_siblings_running() {
    let graph = MemoryGraph::default();
    let broken: Vec<VertexId> = (0..2).map(|_| pserver(&graph, "X", "/pservers/X")).collect();
    for _ in 0..2 {
        graph.add_vertex(
            "complex",
            [
                ("physical-location-id", PropValue::from("c1")),
                (URI, PropValue::from("/complexes/c1")),
            ],
        );
    }
    let store = FailingStore::failing_removal(graph, broken[1]);
    let complex = EntityTypeDescriptor::new("complex", ["physical-location-id"]);

    let summary = run(&store, &store.inner, &run_options(vec![pserver_type(), complex]));
    assert!(matches!(summary.types[0].status, TypeStatus::Failed(_)));
    assert_eq!(summary.types[1].status, TypeStatus::Completed);
    assert_eq!(summary.types[1].counts.deleted, 1);
    assert_eq!(summary.failed_types, 1);
    assert_eq!(summary.totals.deleted, 1);
}

#[test]
fn unreadable_vertex_is_skipped_and_grouping_continues() {
    let graph = MemoryGraph::default();
    let a = pserver(&graph, "X", "/pservers/X");
    let b = pserver(&graph, "X", "/pservers/X");
    let broken = pserver(&graph, "Y", "/pservers/Y");
    let _unique = pserver(&graph, "Z", "/pservers/Z");
    let store = FailingStore::failing_load(graph, broken);
    let conventions = Conventions::default();
    let descriptor = pserver_type();

    let result = Scanner::new(&store, &descriptor, &conventions)
        .scan(&ScanParams::default())
        .expect("scan survives an unreadable vertex");
    assert_eq!(result.unreadable, vec![broken]);
    assert_eq!(result.resolutions.len(), 1);
    assert_eq!(result.resolutions[0].group.members(), &[a, b]);
    assert_eq!(result.resolutions[0].keeper(), Some(a));
}

#[test]
fn exceeding_the_cap_deletes_nothing() {
    let graph = MemoryGraph::default();
    for host in ["a", "b", "c"] {
        pserver(&graph, host, &format!("/pservers/{host}"));
        pserver(&graph, host, &format!("/pservers/{host}"));
    }
    let mut options = run_options(vec![pserver_type()]);
    options.max_records_to_fix = 2;

    let summary = run(&graph, &graph, &options);
    let report = &summary.types[0];
    assert_eq!(report.status, TypeStatus::CapExceeded);
    assert_eq!(report.counts.confirmed, 3);
    assert_eq!(report.counts.deleted, 0);
    assert!(!summary.has_failures());
    assert_eq!(graph.vertex_count(), 6);
}

/// Changes the graph when the second scan opens its transaction.
struct DriftingStore {
    inner: MemoryGraph,
    begins: AtomicUsize,
    drifted: VertexId,
}

impl GraphStore for DriftingStore {
    fn begin(&self) -> Result<Box<dyn GraphTx + '_>> {
        if self.begins.fetch_add(1, Ordering::SeqCst) == 1 {
            let peer = self.inner.add_vertex("complex", [("physical-location-id", "late")]);
            self.inner
                .add_edge(self.drifted, peer, "locatedIn", Containment::None)?;
        }
        self.inner.begin()
    }
}

#[test]
fn keeper_change_between_passes_is_not_confirmed() {
    let graph = MemoryGraph::default();
    let a = pserver(&graph, "X", "/pservers/X");
    let b = pserver(&graph, "X", "/pservers/X");
    let shared = graph.add_vertex("complex", [("physical-location-id", "c1")]);
    graph.add_edge(a, shared, "locatedIn", Containment::None).unwrap();
    graph.add_edge(b, shared, "locatedIn", Containment::None).unwrap();
    let store = DriftingStore {
        inner: graph,
        begins: AtomicUsize::new(0),
        drifted: b,
    };
    let conventions = Conventions::default();
    let descriptor = pserver_type();
    let scanner = Scanner::new(&store, &descriptor, &conventions);
    let options = ReconcileOptions {
        sleep_between_passes: Duration::ZERO,
        max_records_to_fix: 25,
    };

    let reconciliation = reconcile(&scanner, &ScanParams::default(), &options).unwrap();
    assert_eq!(reconciliation.pass1.resolutions[0].keeper(), Some(a));
    assert_eq!(reconciliation.pass2.resolutions[0].keeper(), None);
    match reconciliation.decision {
        PlanDecision::Ready { plan } => assert!(plan.is_empty()),
        other => panic!("unexpected decision {other:?}"),
    }
}

#[test]
fn dry_run_reports_the_plan_and_keeps_the_graph() {
    let graph = MemoryGraph::default();
    let a = pserver(&graph, "X", "/pservers/X");
    let b = pserver(&graph, "X", "/pservers/X");
    let mut options = run_options(vec![pserver_type()]);
    options.auto_fix = false;

    let summary = run(&graph, &graph, &options);
    let report = &summary.types[0];
    assert_eq!(report.plan.len(), 1);
    assert_eq!(report.plan[0].keeper, a);
    assert_eq!(report.plan[0].doomed().collect::<Vec<_>>(), vec![b]);
    assert!(graph.contains(b));
    assert_eq!(report.reindexed, None);
}
