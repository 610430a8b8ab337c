#![allow(missing_docs)]

use std::path::PathBuf;
use std::time::Duration;

use graph_dedupe::{
    config::{Conventions, OperatorPolicy, DEFAULT_CANONICAL_URI_PROPERTY as URI},
    dedupe::{RunOptions, ScanParams, Scheduler, TypeStatus},
    model::{Containment, Dir, PropertyMap},
    schema::EntityTypeDescriptor,
    store::{GraphStore, PropertyFilter, SqliteGraph},
    types::{DedupeError, PropValue, VertexId},
};
use tempfile::TempDir;

fn setup_graph(name: &str) -> (TempDir, PathBuf, SqliteGraph) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(format!("{name}.db"));
    let graph = SqliteGraph::open(&path, URI).expect("open graph");
    (dir, path, graph)
}

fn props(entries: &[(&str, PropValue)]) -> PropertyMap {
    entries
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

fn pserver(graph: &SqliteGraph, host: &str, site: &str) -> VertexId {
    graph
        .add_vertex(
            "pserver",
            &props(&[
                ("hostname", PropValue::from(host)),
                ("site", PropValue::from(site)),
                (URI, PropValue::from(format!("/pservers/{host}"))),
            ]),
        )
        .expect("add pserver")
}

#[test]
fn find_vertices_applies_json_filters() {
    let (_dir, _path, graph) = setup_graph("filters");
    let a = pserver(&graph, "h1", "east");
    let _b = pserver(&graph, "h2", "west");
    let c = pserver(&graph, "h3", "east");

    let tx = graph.begin().unwrap();
    assert_eq!(
        tx.find_vertices("pserver", &[PropertyFilter::new("site", "east")])
            .unwrap(),
        vec![a, c]
    );
    assert_eq!(tx.find_vertices("pserver", &[]).unwrap().len(), 3);
    assert!(tx.find_vertices("vserver", &[]).unwrap().is_empty());
    let err = tx
        .find_vertices("pserver", &[PropertyFilter::new("bad\"name", "x")])
        .unwrap_err();
    assert!(matches!(err, DedupeError::InvalidFilter(_)));
}

#[test]
fn uri_index_keeps_first_writer() {
    let (_dir, _path, graph) = setup_graph("uri");
    let first = pserver(&graph, "h1", "east");
    let _second = pserver(&graph, "h1", "east");

    let tx = graph.begin().unwrap();
    assert_eq!(tx.vertices_by_uri("/pservers/h1").unwrap(), vec![first]);
    assert!(tx.vertices_by_uri("/pservers/none").unwrap().is_empty());
}

#[test]
fn removal_is_invisible_until_commit_and_undone_by_rollback() {
    let (_dir, path, graph) = setup_graph("tx");
    let a = pserver(&graph, "h1", "east");
    let b = pserver(&graph, "h2", "east");
    graph.add_edge(a, b, "peer", Containment::None).unwrap();

    let mut tx = graph.begin().unwrap();
    tx.remove_vertex(b).unwrap();
    assert!(tx.load_vertex(b).unwrap().is_none());
    assert!(tx.neighbors(a, Dir::Both).unwrap().is_empty());
    tx.rollback().unwrap();
    assert!(graph.contains(b).unwrap());

    let mut tx = graph.begin().unwrap();
    tx.remove_vertex(b).unwrap();
    drop(tx);
    assert!(graph.contains(b).unwrap());

    let mut tx = graph.begin().unwrap();
    tx.remove_vertex(b).unwrap();
    tx.commit().unwrap();
    let reopened = SqliteGraph::open(&path, URI).unwrap();
    assert!(!reopened.contains(b).unwrap());
    assert_eq!(reopened.vertex_count().unwrap(), 1);
    let tx = reopened.begin().unwrap();
    assert!(tx.neighbors(a, Dir::Both).unwrap().is_empty());
}

#[test]
fn removing_missing_vertex_fails() {
    let (_dir, _path, graph) = setup_graph("missing");
    let mut tx = graph.begin().unwrap();
    assert!(matches!(
        tx.remove_vertex(VertexId(42)),
        Err(DedupeError::MissingVertex(VertexId(42)))
    ));
}

#[test]
fn neighbors_report_containment_and_types() {
    let (_dir, _path, graph) = setup_graph("neighbors");
    let region = graph
        .add_vertex(
            "cloud-region",
            &props(&[("cloud-region-id", PropValue::from("r1"))]),
        )
        .unwrap();
    let tenant = graph
        .add_vertex("tenant", &props(&[("tenant-id", PropValue::from("t1"))]))
        .unwrap();
    graph.add_edge(region, tenant, "has", Containment::Out).unwrap();

    let tx = graph.begin().unwrap();
    let neighbors = tx.neighbors(tenant, Dir::Both).unwrap();
    assert_eq!(neighbors.len(), 1);
    assert_eq!(neighbors[0].vertex, region);
    assert_eq!(neighbors[0].entity_type, "cloud-region");
    assert!(neighbors[0].edge.parent_edge_of(tenant));
    assert!(tx.neighbors(tenant, Dir::Out).unwrap().is_empty());
}

#[test]
fn scheduler_repairs_a_sqlite_graph() {
    let (_dir, _path, graph) = setup_graph("repair");
    let keeper = pserver(&graph, "h1", "east");
    let dupe = pserver(&graph, "h1", "east");
    let unique = pserver(&graph, "h2", "east");

    let options = RunOptions {
        descriptors: vec![EntityTypeDescriptor::new("pserver", ["hostname"])],
        auto_fix: true,
        max_records_to_fix: 25,
        sleep_between_passes: Duration::ZERO,
        scan: ScanParams::default(),
        concurrency: 2,
        operator: OperatorPolicy::default().parse("jsmith01").unwrap(),
    };
    let conventions = Conventions::default();
    let summary = Scheduler::new(&graph, &graph, &conventions)
        .run(&options)
        .unwrap();

    assert_eq!(summary.types[0].status, TypeStatus::Completed);
    assert_eq!(summary.types[0].reindexed, Some(true));
    assert!(graph.contains(keeper).unwrap());
    assert!(!graph.contains(dupe).unwrap());
    assert!(graph.contains(unique).unwrap());
}
