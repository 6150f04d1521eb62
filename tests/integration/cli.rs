use predicates::prelude::*;
use rill_graph::test_utils::ProjectFixture;

use crate::common::TestProject;

#[test]
fn test_parse_lists_resources() {
    let project = TestProject::from_fixture(&ProjectFixture::dashboard()).unwrap();
    project
        .cli()
        .arg("parse")
        .arg(project.root())
        .assert()
        .success()
        .stdout(predicate::str::contains("model orders"))
        .stdout(predicate::str::contains("refs:  model/raw_orders"))
        .stdout(predicate::str::contains("5 resource(s), 0 error(s)"));
}

#[test]
fn test_parse_json_output() {
    let project = TestProject::from_fixture(&ProjectFixture::colliding()).unwrap();
    let output = project
        .cli()
        .args(["parse", "--format", "json"])
        .arg(project.root())
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["olap_connector"], "duckdb");
    assert_eq!(report["resources"].as_array().unwrap().len(), 1);
    let errors = report["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0]["path"], "/models/m1.sql");
    assert_eq!(errors[0]["kind"], "collision");
    assert_eq!(errors[0]["external"], true);
}

#[test]
fn test_parse_strict_fails_on_errors() {
    let project = TestProject::from_fixture(&ProjectFixture::colliding()).unwrap();
    project
        .cli()
        .args(["parse", "--strict"])
        .arg(project.root())
        .assert()
        .failure()
        .stdout(predicate::str::contains("name collision"))
        .stderr(predicate::str::contains("2 parse error(s)"));
}

#[test]
fn test_parse_environment_flag() {
    let project = TestProject::new().unwrap();
    project
        .write("rill.yaml", "environment_overrides:\n  prod:\n    olap_connector: clickhouse\n")
        .unwrap();
    project.write("models/m1.sql", "SELECT 1").unwrap();

    project
        .cli()
        .args(["parse", "--format", "json", "--environment", "prod"])
        .arg(project.root())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"olap_connector\": \"clickhouse\""));
}

#[test]
fn test_parse_missing_directory() {
    let project = TestProject::new().unwrap();
    project
        .cli()
        .arg("parse")
        .arg(project.root().join("nope"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_graph_orders_dependencies_first() {
    let project = TestProject::new().unwrap();
    project.write("rill.yaml", "").unwrap();
    project.write("models/c.sql", "SELECT * FROM b").unwrap();
    project.write("models/b.sql", "SELECT * FROM a").unwrap();
    project.write("models/a.sql", "SELECT 1").unwrap();

    let output = project
        .cli()
        .args(["graph", "--format", "json"])
        .arg(project.root())
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let order: Vec<&str> = report["order"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["name"].as_str().unwrap())
        .collect();
    assert_eq!(order, vec!["a", "b", "c"]);
    assert!(report["cycles"].as_array().unwrap().is_empty());
}

#[test]
fn test_graph_reports_cycles() {
    let project = TestProject::new().unwrap();
    project.write("rill.yaml", "").unwrap();
    project.write("models/a.sql", "SELECT * FROM b").unwrap();
    project.write("models/b.sql", "SELECT * FROM a").unwrap();

    project
        .cli()
        .arg("graph")
        .arg(project.root())
        .assert()
        .success()
        .stdout(predicate::str::contains("cycle: model/a -> model/b"));
}
