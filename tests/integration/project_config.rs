use rill_graph::compiler::{Compiler, CompilerOptions};
use rill_graph::core::ErrorKind;
use rill_graph::kinds::{ModelSpec, ResourceSpec};
use rill_graph::repo::Repo;
use rill_graph::test_utils::model;
use serde_yaml::Value;

use crate::common::{compile, compile_with, errors};

fn model_spec<'a>(compiler: &'a Compiler, name: &str) -> &'a ModelSpec {
    match &compiler.resource(&model(name)).unwrap().spec {
        ResourceSpec::Model(spec) => spec,
        other => panic!("expected a model, got {other:?}"),
    }
}

#[test]
fn test_missing_then_added_project_config() {
    let (repo, mut compiler) = compile(&[("models/m1.sql", "SELECT 1")]);
    assert_eq!(
        errors(&compiler),
        vec![("/rill.yaml".to_string(), "rill.yaml not found".to_string())]
    );

    repo.put("/models/m1.sql", "SELECT 2").unwrap();
    let diff = compiler.reparse(&["/models/m1.sql"]).unwrap();
    assert!(diff.skipped);
    assert!(!diff.reloaded);

    repo.put("/rill.yaml", "display_name: Hello").unwrap();
    let diff = compiler.reparse(&["/rill.yaml"]).unwrap();
    assert!(diff.reloaded);
    assert!(diff.added.is_empty() && diff.modified.is_empty() && diff.deleted.is_empty());
    assert!(compiler.errors().is_empty());
    assert_eq!(compiler.project_config().unwrap().display_name, "Hello");
    assert_eq!(
        model_spec(&compiler, "m1").input_properties.get("sql"),
        Some(&Value::from("SELECT 2"))
    );
}

#[test]
fn test_invalid_project_config_blocks_reparse() {
    let (repo, mut compiler) = compile(&[("rill.yaml", ""), ("models/m1.sql", "SELECT 1")]);

    repo.put("/rill.yaml", "olap_connector: [").unwrap();
    let diff = compiler.reparse(&["rill.yaml"]).unwrap();
    assert!(diff.reloaded);
    assert!(compiler.project_config().is_none());
    let err = &compiler.errors()[0];
    assert_eq!(err.path, "/rill.yaml");
    assert_eq!(err.kind, ErrorKind::Configuration);

    repo.put("/models/m2.sql", "SELECT 2").unwrap();
    assert!(compiler.reparse(&["/models/m2.sql"]).unwrap().skipped);
}

#[test]
fn test_yml_project_config_is_accepted() {
    let (_, compiler) = compile(&[("rill.yml", "olap_connector: clickhouse"), ("models/m1.sql", "SELECT 1")]);
    assert!(compiler.errors().is_empty());
    assert_eq!(compiler.olap_connector(), "clickhouse");
    assert_eq!(model_spec(&compiler, "m1").output_connector, "clickhouse");
}

#[test]
fn test_configuration_layers() {
    let files = [
        ("rill.yaml", "models:\n  materialize: true\n"),
        ("models/plain.sql", "SELECT 1"),
        ("models/annotated.sql", "-- @materialize: false\nSELECT 1"),
        (
            "models/overridden.yaml",
            "type: model\nsql: SELECT 1\nmaterialize: false\nprod:\n  materialize: true\n",
        ),
    ];
    let materialize = |compiler: &Compiler, name: &str| {
        model_spec(compiler, name)
            .output_properties
            .get("materialize")
            .cloned()
    };

    let (_, dev) = compile(&files);
    assert_eq!(materialize(&dev, "plain"), Some(Value::Bool(true)));
    assert_eq!(materialize(&dev, "annotated"), Some(Value::Bool(false)));
    assert_eq!(materialize(&dev, "overridden"), Some(Value::Bool(false)));

    let prod_options = CompilerOptions {
        environment: "prod".to_string(),
        ..Default::default()
    };
    let (_, prod) = compile_with(&files, prod_options);
    assert_eq!(materialize(&prod, "overridden"), Some(Value::Bool(true)));
}

#[test]
fn test_project_environment_override() {
    let files = [
        ("rill.yaml", "olap_connector: duckdb\nenvironment_overrides:\n  prod:\n    olap_connector: clickhouse\n"),
        ("models/m1.sql", "SELECT 1"),
    ];
    let (_, dev) = compile(&files);
    assert_eq!(dev.olap_connector(), "duckdb");

    let options = CompilerOptions {
        environment: "prod".to_string(),
        ..Default::default()
    };
    let (_, prod) = compile_with(&files, options);
    assert_eq!(prod.olap_connector(), "clickhouse");
    assert_eq!(model_spec(&prod, "m1").output_connector, "clickhouse");
}

#[test]
fn test_ignore_paths() {
    let (_, compiler) = compile(&[
        ("rill.yaml", "ignore_paths:\n  - /scratch\n"),
        ("models/m1.sql", "SELECT 1"),
        ("scratch/broken.sql", "SELECT * FROM ("),
    ]);
    assert_eq!(compiler.resources().len(), 1);
    assert!(compiler.errors().is_empty());
}

#[test]
fn test_project_connector_driver_enables_sql_inference() {
    let files = [
        ("rill.yaml", "connectors:\n  - name: lake\n    type: duckdb\n"),
        ("models/m0.sql", "SELECT 1"),
        ("models/m1.sql", "-- @connector: lake\nSELECT * FROM m0"),
    ];
    let (_, compiler) = compile(&files);
    assert_eq!(compiler.resource(&model("m1")).unwrap().refs, vec![model("m0")]);
}
