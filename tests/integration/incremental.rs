use rill_graph::compiler::{Compiler, Diff};
use rill_graph::core::{ResourceKind, ResourceName};
use rill_graph::kinds::ResourceSpec;
use rill_graph::repo::Repo;
use rill_graph::test_utils::{ProjectFixture, model};
use tokio_util::sync::CancellationToken;

use crate::common::{compile, errors, names, visible};

#[test]
fn test_ref_resolves_when_target_appears() {
    let (repo, mut compiler) = compile(&[("rill.yaml", ""), ("models/foo.sql", "SELECT * FROM bar")]);
    assert!(compiler.resource(&model("foo")).unwrap().refs.is_empty());

    repo.put("/models/bar.sql", "SELECT 1").unwrap();
    let diff = compiler.reparse(&["/models/bar.sql"]).unwrap();
    assert_eq!(names(&diff.added), vec!["model/bar"]);
    assert_eq!(names(&diff.modified), vec!["model/foo"]);
    assert!(diff.deleted.is_empty());
    assert_eq!(compiler.resource(&model("foo")).unwrap().refs, vec![model("bar")]);

    repo.delete("/models/bar.sql").unwrap();
    let diff = compiler.reparse(&["/models/bar.sql"]).unwrap();
    assert_eq!(names(&diff.deleted), vec!["model/bar"]);
    assert_eq!(names(&diff.modified), vec!["model/foo"]);
    assert!(compiler.resource(&model("foo")).unwrap().refs.is_empty());
}

#[test]
fn test_template_ref_resolves_when_target_appears() {
    let (repo, mut compiler) = compile(&[
        ("rill.yaml", ""),
        ("models/foo.sql", r#"SELECT * FROM {{ ref "bar" }} WHERE id = {{ .env.partner_id }}"#),
        ("models/baz.sql", r#"SELECT * FROM {{ ref "source" "bar" }}"#),
    ]);
    assert!(compiler.errors().is_empty());
    assert_eq!(visible(&compiler), vec!["model/baz", "model/foo"]);
    assert!(compiler.resource(&model("foo")).unwrap().refs.is_empty());
    assert_eq!(compiler.resource(&model("baz")).unwrap().refs, vec![model("bar")]);

    repo.put("/models/bar.sql", "SELECT 1 AS id").unwrap();
    let diff = compiler.reparse(&["/models/bar.sql"]).unwrap();
    assert_eq!(names(&diff.added), vec!["model/bar"]);
    assert_eq!(names(&diff.modified), vec!["model/foo"]);
    assert_eq!(compiler.resource(&model("foo")).unwrap().refs, vec![model("bar")]);
}

#[test]
fn test_unchanged_dependents_are_not_reported() {
    let (repo, mut compiler) = compile(&[
        ("rill.yaml", ""),
        ("models/m1.sql", "SELECT 1"),
        ("models/m2.sql", "SELECT * FROM m1"),
    ]);
    repo.put("/models/m1.sql", "SELECT 2").unwrap();
    let diff = compiler.reparse(&["/models/m1.sql"]).unwrap();
    assert_eq!(names(&diff.modified), vec!["model/m1"]);
    assert_eq!(compiler.resource(&model("m2")).unwrap().refs, vec![model("m1")]);
}

#[test]
fn test_reparse_without_changes_is_empty() {
    let (_, mut compiler) = compile(&[
        ("rill.yaml", ""),
        ("models/m1.sql", "SELECT 1"),
        ("models/m2.sql", "SELECT * FROM m1"),
    ]);
    let before = compiler.resources().clone();

    let diff = compiler.reparse(&["/models/m1.sql", "/models/m2.sql"]).unwrap();
    assert!(diff.is_empty());
    assert_eq!(compiler.resources(), &before);

    let diff = compiler.reparse(&["/data/unrelated.csv", "/README.md"]).unwrap();
    assert_eq!(diff, Diff::default());
}

#[test]
fn test_full_parse_is_deterministic() {
    let fixture = ProjectFixture::dashboard();
    let first = Compiler::parse(fixture.memory_repo(), Default::default()).unwrap();
    let second = Compiler::parse(fixture.memory_repo(), Default::default()).unwrap();
    assert_eq!(first.resources(), second.resources());
    assert_eq!(first.errors(), second.errors());
}

#[test]
fn test_incremental_matches_full_parse() {
    let (repo, mut compiler) = compile(&[("rill.yaml", ""), ("models/a.sql", "SELECT * FROM b")]);
    repo.put("/models/b.sql", "SELECT * FROM c").unwrap();
    compiler.reparse(&["/models/b.sql"]).unwrap();
    repo.put("/models/c.sql", "SELECT 1").unwrap();
    compiler.reparse(&["/models/c.sql"]).unwrap();

    let fresh = Compiler::parse(repo.clone(), Default::default()).unwrap();
    assert_eq!(compiler.resources(), fresh.resources());
    assert_eq!(compiler.resource(&model("b")).unwrap().refs, vec![model("c")]);
}

#[test]
fn test_diff_buckets_are_sorted() {
    let (repo, mut compiler) = compile(&[
        ("rill.yaml", ""),
        ("models/d.sql", "SELECT 1"),
        ("models/e.sql", "SELECT 1"),
    ]);
    repo.put("/models/z.sql", "SELECT 1").unwrap();
    repo.put("/models/a.sql", "SELECT 1").unwrap();
    repo.put("/models/c.sql", "SELECT 1").unwrap();
    repo.delete("/models/e.sql").unwrap();
    repo.delete("/models/d.sql").unwrap();

    let diff = compiler
        .reparse(&["/models/z.sql", "/models/e.sql", "/models/a.sql", "/models/d.sql", "/models/c.sql"])
        .unwrap();
    assert_eq!(names(&diff.added), vec!["model/a", "model/c", "model/z"]);
    assert_eq!(names(&diff.deleted), vec!["model/d", "model/e"]);
}

#[test]
fn test_local_data_file_change_modifies_model() {
    let (repo, mut compiler) = compile(&[
        ("rill.yaml", ""),
        ("models/orders.yaml", "type: model\nconnector: local_file\npath: data/orders.csv\n"),
        ("data/orders.csv", "id,amount\n1,10\n"),
    ]);
    let hash = |c: &Compiler| match &c.resource(&model("orders")).unwrap().spec {
        ResourceSpec::Model(spec) => spec.input_properties.get("local_files_hash").cloned(),
        other => panic!("expected a model, got {other:?}"),
    };
    let before = hash(&compiler);
    assert!(before.is_some());

    repo.put("/data/orders.csv", "id,amount\n1,10\n2,20\n").unwrap();
    let diff = compiler.reparse(&["/data/orders.csv"]).unwrap();
    assert_eq!(names(&diff.modified), vec!["model/orders"]);
    assert_ne!(hash(&compiler), before);
}

#[test]
fn test_broken_file_recovers() {
    let (repo, mut compiler) = compile(&[
        ("rill.yaml", ""),
        ("themes/brand.yaml", "type: theme\ncolors:\n  primary: red\n"),
    ]);
    repo.put("/themes/brand.yaml", "type: theme\ncolors:\n  primary: [").unwrap();
    let diff = compiler.reparse(&["/themes/brand.yaml"]).unwrap();
    assert_eq!(names(&diff.deleted), vec!["theme/brand"]);
    assert_eq!(errors(&compiler).len(), 1);
    assert_eq!(errors(&compiler)[0].0, "/themes/brand.yaml");
    assert!(compiler.errors()[0].location.is_some());

    repo.put("/themes/brand.yaml", "type: theme\ncolors:\n  primary: blue\n").unwrap();
    let diff = compiler.reparse(&["/themes/brand.yaml"]).unwrap();
    assert_eq!(names(&diff.added), vec!["theme/brand"]);
    assert!(compiler.errors().is_empty());
}

#[test]
fn test_explore_follows_metrics_view() {
    let (repo, mut compiler) = compile(&[
        ("rill.yaml", ""),
        ("models/orders.sql", "SELECT 1 AS amount"),
        (
            "metrics/orders.yaml",
            "version: 1\ntype: metrics_view\nmodel: orders\nmeasures:\n  - expression: SUM(amount)\n",
        ),
        ("explores/orders.yaml", "type: explore\nmetrics_view: orders\n"),
    ]);
    let explore = ResourceName::new(ResourceKind::Explore, "orders");
    let metrics_view = ResourceName::new(ResourceKind::MetricsView, "orders");
    assert_eq!(compiler.resource(&explore).unwrap().refs, vec![metrics_view.clone()]);
    assert_eq!(compiler.resource(&metrics_view).unwrap().refs, vec![model("orders")]);

    repo.delete("/metrics/orders.yaml").unwrap();
    let diff = compiler.reparse(&["/metrics/orders.yaml"]).unwrap();
    assert_eq!(names(&diff.deleted), vec!["metrics_view/orders"]);
    // The explore still names the view; the ref is kept even while it is missing
    assert_eq!(compiler.resource(&explore).unwrap().refs, vec![metrics_view]);
    assert_eq!(
        visible(&compiler),
        vec!["explore/orders", "model/orders"]
    );
}

#[test]
fn test_cancelled_parse_and_reparse() {
    let fixture = ProjectFixture::dashboard();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = Compiler::parse_with_cancel(fixture.memory_repo(), Default::default(), &cancel)
        .unwrap_err();
    assert!(matches!(err, rill_graph::core::CompilerError::Cancelled));

    let repo = fixture.memory_repo();
    let mut compiler = Compiler::parse(repo.clone(), Default::default()).unwrap();
    let before = compiler.resources().clone();
    repo.delete("/models/orders.sql").unwrap();
    assert!(compiler.reparse_with_cancel(&["/models/orders.sql"], &cancel).is_err());
    assert_eq!(compiler.resources(), &before);
}
