#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use graph_dedupe::{
    config::DEFAULT_CANONICAL_URI_PROPERTY as URI,
    model::PropertyMap,
    store::SqliteGraph,
    types::{PropValue, VertexId},
};
use serde_json::Value;
use tempfile::TempDir;

const CONFIG: &str = r#"
[settings]
sleep_minutes = 0
max_records_to_fix = 10

[types.pserver]
keys = ["hostname"]
display_name = "hostname"

[types.tenant]
keys = ["tenant-id"]
dependent_on = ["cloud-region"]

[types.complex]
keys = ["physical-location-id"]
eligible = false
"#;

struct Fixture {
    _dir: TempDir,
    db_path: PathBuf,
    config_path: PathBuf,
    keeper: VertexId,
    dupe: VertexId,
}

fn setup(name: &str) -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let db_path = dir.path().join(format!("{name}.db"));
    let config_path = dir.path().join("config.toml");
    fs::write(&config_path, CONFIG).expect("write config");

    let graph = SqliteGraph::open(&db_path, URI).expect("open graph");
    let keeper = add_pserver(&graph, "h1");
    let dupe = add_pserver(&graph, "h1");
    add_pserver(&graph, "h2");
    Fixture {
        _dir: dir,
        db_path,
        config_path,
        keeper,
        dupe,
    }
}

fn add_pserver(graph: &SqliteGraph, host: &str) -> VertexId {
    let props: PropertyMap = [
        ("hostname".to_string(), PropValue::from(host)),
        (URI.to_string(), PropValue::from(format!("/pservers/{host}"))),
    ]
    .into_iter()
    .collect();
    graph.add_vertex("pserver", &props).expect("add pserver")
}

fn contains(db_path: &Path, id: VertexId) -> bool {
    SqliteGraph::open(db_path, URI)
        .and_then(|graph| graph.contains(id))
        .expect("query graph")
}

fn json_stdout(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("valid json")
}

#[test]
fn dry_run_reports_plan_without_deleting() {
    let fx = setup("dry_run");
    let output = cargo_bin_cmd!("graph-dedupe")
        .arg("--config")
        .arg(&fx.config_path)
        .args(["--format", "json", "--log-level", "warn", "run"])
        .arg(&fx.db_path)
        .args(["--operator", "jsmith01", "--type", "pserver"])
        .assert()
        .success()
        .get_output()
        .clone();
    let json = json_stdout(&output);
    assert_eq!(json["auto_fix"], false);
    assert_eq!(json["operator"], "jsmith01");
    let report = &json["types"][0];
    assert_eq!(report["entity_type"], "pserver");
    assert_eq!(report["status"], "completed");
    assert_eq!(report["plan"][0]["keeper"], fx.keeper.0);
    assert_eq!(report["counts"]["deleted"], 0);
    assert!(report["reindexed"].is_null());
    assert!(contains(&fx.db_path, fx.dupe));
}

#[test]
fn auto_fix_deletes_confirmed_duplicates() {
    let fx = setup("auto_fix");
    let output = cargo_bin_cmd!("graph-dedupe")
        .arg("--config")
        .arg(&fx.config_path)
        .args(["--format", "json", "run"])
        .arg(&fx.db_path)
        .args(["--operator", "jsmith01", "--all", "--auto-fix"])
        .assert()
        .success()
        .get_output()
        .clone();
    let json = json_stdout(&output);
    let names: Vec<&str> = json["types"]
        .as_array()
        .expect("types array")
        .iter()
        .filter_map(|report| report["entity_type"].as_str())
        .collect();
    assert_eq!(names, vec!["pserver", "tenant"]);
    assert_eq!(json["totals"]["deleted"], 1);
    assert_eq!(json["types"][0]["reindexed"], true);
    assert!(contains(&fx.db_path, fx.keeper));
    assert!(!contains(&fx.db_path, fx.dupe));
}

#[test]
fn text_output_lists_totals() {
    let fx = setup("text");
    let output = cargo_bin_cmd!("graph-dedupe")
        .arg("--config")
        .arg(&fx.config_path)
        .args(["--color", "never", "--quiet", "run"])
        .arg(&fx.db_path)
        .args(["--operator", "jsmith01", "--type", "pserver,complex"])
        .assert()
        .success()
        .get_output()
        .clone();
    let stdout = String::from_utf8(output.stdout).expect("utf8");
    assert!(stdout.contains("Totals"));
    assert!(stdout.contains("Would delete"));
    assert!(stdout.contains("complex"));
}

#[test]
fn reserved_operator_is_rejected_before_scanning() {
    let fx = setup("operator");
    let output = cargo_bin_cmd!("graph-dedupe")
        .arg("--config")
        .arg(&fx.config_path)
        .arg("run")
        .arg(&fx.db_path)
        .args(["--operator", "admin", "--all", "--auto-fix"])
        .assert()
        .code(1)
        .get_output()
        .clone();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid operator"));
    assert!(contains(&fx.db_path, fx.dupe));
}

#[test]
fn configuration_errors_exit_with_one() {
    let fx = setup("config_errors");
    let cases: [&[&str]; 3] = [
        &["--operator", "jsmith01", "--type", "vserver"],
        &["--operator", "jsmith01", "--all", "--filter", "hostname"],
        &["--operator", "jsmith01", "--all", "--concurrency", "0"],
    ];
    for args in cases {
        cargo_bin_cmd!("graph-dedupe")
            .arg("--config")
            .arg(&fx.config_path)
            .arg("run")
            .arg(&fx.db_path)
            .args(args)
            .assert()
            .code(1);
    }
}

#[test]
fn missing_database_is_an_error() {
    let fx = setup("missing_db");
    cargo_bin_cmd!("graph-dedupe")
        .arg("--config")
        .arg(&fx.config_path)
        .arg("run")
        .arg(fx.db_path.with_file_name("absent.db"))
        .args(["--operator", "jsmith01", "--all"])
        .assert()
        .code(1);
}

#[test]
fn types_lists_the_catalog() {
    let fx = setup("types");
    let output = cargo_bin_cmd!("graph-dedupe")
        .arg("--config")
        .arg(&fx.config_path)
        .args(["--format", "json", "types"])
        .assert()
        .success()
        .get_output()
        .clone();
    let json = json_stdout(&output);
    let entries = json.as_array().expect("array");
    assert_eq!(entries.len(), 3);
    let tenant = entries
        .iter()
        .find(|entry| entry["name"] == "tenant")
        .expect("tenant listed");
    assert_eq!(tenant["dependent_on"][0], "cloud-region");
    assert_eq!(tenant["index_name"], "tenant-id");
    let complex = entries
        .iter()
        .find(|entry| entry["name"] == "complex")
        .expect("complex listed");
    assert_eq!(complex["eligible"], false);
}
