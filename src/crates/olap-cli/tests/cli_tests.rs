//! Integration tests for olap-cli
//!
//! These tests run the built-in programs over fixtures loaded from disk.

use olap_cli::{run_program, GraphFixture, ProgramKind};
use olap_engine::ExecutorConfig;
use std::collections::HashSet;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const FIXTURE: &str = r#"{
  "vertices": [
    { "id": 1 },
    { "id": 2 },
    { "id": 3 },
    { "id": 4, "deleted": true },
    { "id": 5, "hidden": true },
    { "id": 50, "partitions": 2 }
  ],
  "edges": [
    { "from": 1, "to": 2 },
    { "from": 1, "to": 3 },
    { "from": 2, "to": 3 },
    { "from": 1, "to": 4 },
    { "from": 1, "to": 50 },
    { "from": 2, "to": 50 },
    { "from": 3, "to": 50 },
    { "from": 3, "to": 5, "label": 1 }
  ]
}"#;

fn config() -> ExecutorConfig {
    ExecutorConfig::default()
        .with_parallelism(2)
        .with_poll_interval(Duration::from_millis(1))
        .with_timeout(Duration::from_secs(5))
}

fn load_fixture(dir: &TempDir) -> GraphFixture {
    let path = dir.path().join("graph.json");
    fs::write(&path, FIXTURE).expect("Failed to write fixture");
    GraphFixture::load(&path).expect("Failed to load fixture")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_degree_program() {
    let dir = TempDir::new().unwrap();
    let graph = load_fixture(&dir).build().unwrap();

    let report = run_program(&graph, ProgramKind::Degree, 0, config()).await.unwrap();

    assert_eq!(report.states.get(&1), Some(&Some(4)));
    assert_eq!(report.states.get(&2), Some(&Some(3)));
    assert_eq!(report.states.get(&3), Some(&Some(3)));
    assert_eq!(report.states.get(&50), Some(&Some(3)));
    assert!(!report.states.contains_key(&4));
    assert!(!report.states.contains_key(&5));
    assert_eq!(report.stats.deleted_skipped, 1);
    assert!(report.stats.partitioned_seen);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_neighbor_sum_program() {
    let dir = TempDir::new().unwrap();
    let graph = load_fixture(&dir).build().unwrap();

    let report = run_program(&graph, ProgramKind::NeighborSum, 0, config())
        .await
        .unwrap();

    assert_eq!(report.states.get(&1), Some(&Some(2 + 3 + 4 + 50)));
    assert_eq!(report.states.get(&50), Some(&Some(1 + 2 + 3)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_label_selects_edges() {
    let dir = TempDir::new().unwrap();
    let graph = load_fixture(&dir).build().unwrap();

    let report = run_program(&graph, ProgramKind::Degree, 1, config()).await.unwrap();

    // only 3 has a label-1 edge; its endpoint 5 is hidden
    assert_eq!(report.states.get(&3), Some(&Some(1)));
    assert_eq!(report.states.get(&1), Some(&Some(0)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_generated_fixture_runs() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("generated.json");
    let fixture = GraphFixture::generate(50, 2, 1);
    fs::write(&path, fixture.to_json().unwrap()).unwrap();

    let graph = GraphFixture::load(&path).unwrap().build().unwrap();
    let report = run_program(&graph, ProgramKind::Degree, 0, config()).await.unwrap();

    assert_eq!(report.stats.vertices_dispatched, 50);
    // repeated edges collapse into one column; each edge counts at both endpoints
    let unique: HashSet<(u64, u64)> = fixture.edges.iter().map(|e| (e.from, e.to)).collect();
    let total: u64 = report.states.values().map(|s| s.unwrap_or_default()).sum();
    assert_eq!(total, 2 * unique.len() as u64);
}

#[test]
fn test_report_serializes() {
    let report = olap_cli::JobReport {
        program: ProgramKind::NeighborSum,
        stats: Default::default(),
        states: [(1, Some(3)), (2, None)].into_iter().collect(),
    };
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["program"], "neighbor-sum");
    assert_eq!(json["states"]["1"], 3);
    assert!(json["states"]["2"].is_null());
    assert_eq!(json["stats"]["vertices_dispatched"], 0);
}

#[test]
fn test_config_file_validation() {
    let dir = TempDir::new().unwrap();
    let good = dir.path().join("good.toml");
    let bad = dir.path().join("bad.toml");
    fs::write(&good, "parallelism = 2\nstream_failure = \"truncate\"\n").unwrap();
    fs::write(&bad, "queue_capacity = 0\n").unwrap();

    assert_eq!(ExecutorConfig::from_file(&good).unwrap().parallelism, 2);
    assert!(ExecutorConfig::from_file(&bad).is_err());
}
