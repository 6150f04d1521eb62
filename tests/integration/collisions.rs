use rill_graph::compiler::Compiler;
use rill_graph::core::{ErrorKind, ResourceKind, ResourceName};
use rill_graph::kinds::ResourceSpec;
use rill_graph::repo::Repo;
use rill_graph::test_utils::{ProjectFixture, model};

use crate::common::{compile, errors, names};

fn collision_paths(compiler: &Compiler) -> Vec<(String, bool)> {
    compiler
        .errors()
        .iter()
        .filter(|e| e.kind == ErrorKind::Collision)
        .map(|e| (e.path.clone(), e.external))
        .collect()
}

#[test]
fn test_collision_reports_every_claimant() {
    let fixture = ProjectFixture::colliding();
    let compiler = Compiler::parse(fixture.memory_repo(), Default::default()).unwrap();

    let m1 = compiler.resource(&model("m1")).unwrap();
    assert_eq!(m1.paths, vec!["/models/m1.sql"]);
    assert_eq!(
        collision_paths(&compiler),
        vec![
            ("/models/m1.sql".to_string(), true),
            ("/sources/m1.yaml".to_string(), false),
        ]
    );
    assert!(compiler.errors().iter().all(|e| e.message == "name collision"));
}

#[test]
fn test_collision_outcome_ignores_arrival_order() {
    // Built in one pass
    let (_, together) = compile(&[
        ("rill.yaml", ""),
        ("models/m1.sql", "SELECT 1"),
        ("models/nested/m1.sql", "SELECT 2"),
    ]);

    // Built one file at a time, in both orders
    for (first, second) in [
        ("/models/m1.sql", "/models/nested/m1.sql"),
        ("/models/nested/m1.sql", "/models/m1.sql"),
    ] {
        let (repo, mut compiler) = compile(&[("rill.yaml", "")]);
        let contents = |p: &str| if p == "/models/m1.sql" { "SELECT 1" } else { "SELECT 2" };
        repo.put(first, contents(first)).unwrap();
        compiler.reparse(&[first]).unwrap();
        repo.put(second, contents(second)).unwrap();
        compiler.reparse(&[second]).unwrap();

        assert_eq!(compiler.resources(), together.resources());
        assert_eq!(compiler.errors(), together.errors());
    }
}

#[test]
fn test_shadowed_resource_recovers() {
    let (repo, mut compiler) = compile(&[
        ("rill.yaml", ""),
        ("models/m1.sql", "SELECT 1"),
        ("sources/m1.yaml", "type: model\nconnector: s3\npath: s3://bucket/m1.csv\n"),
    ]);
    assert_eq!(collision_paths(&compiler).len(), 2);

    repo.delete("/models/m1.sql").unwrap();
    let diff = compiler.reparse(&["/models/m1.sql"]).unwrap();
    assert_eq!(names(&diff.modified), vec!["model/m1"]);
    assert!(diff.added.is_empty() && diff.deleted.is_empty());
    assert!(compiler.errors().is_empty());

    let m1 = compiler.resource(&model("m1")).unwrap();
    assert_eq!(m1.paths, vec!["/sources/m1.yaml"]);
    let ResourceSpec::Model(spec) = &m1.spec else {
        panic!("expected a model");
    };
    assert_eq!(spec.input_connector, "s3");
}

#[test]
fn test_names_collide_case_insensitively() {
    let (repo, mut compiler) = compile(&[
        ("rill.yaml", ""),
        ("themes/Brand.yaml", "type: theme\n"),
        ("themes/other/brand.yaml", "type: theme\n"),
    ]);
    assert_eq!(compiler.resources().len(), 1);
    assert_eq!(collision_paths(&compiler).len(), 2);

    repo.delete("/themes/Brand.yaml").unwrap();
    let diff = compiler.reparse(&["/themes/Brand.yaml"]).unwrap();
    assert_eq!(diff.deleted.len() + diff.modified.len() + diff.added.len(), 1);
    let brand = compiler
        .resource(&ResourceName::new(ResourceKind::Theme, "brand"))
        .unwrap();
    assert_eq!(brand.paths, vec!["/themes/other/brand.yaml"]);
    assert!(compiler.errors().is_empty());
}

#[test]
fn test_declared_explore_shadows_implicit_one() {
    let metrics = "type: metrics_view\nmodel: orders\nmeasures:\n  - name: total\n    expression: COUNT(*)\n";
    let (repo, mut compiler) = compile(&[
        ("rill.yaml", ""),
        ("models/orders.sql", "SELECT 1"),
        ("metrics/orders.yaml", metrics),
    ]);
    let explore = ResourceName::new(ResourceKind::Explore, "orders");
    assert_eq!(compiler.resource(&explore).unwrap().paths, vec!["/metrics/orders.yaml"]);

    repo.put("/explores/orders.yaml", "type: explore\nmetrics_view: orders\ntheme: brand\n")
        .unwrap();
    let diff = compiler.reparse(&["/explores/orders.yaml"]).unwrap();
    assert_eq!(names(&diff.modified), vec!["explore/orders"]);
    assert!(diff.added.is_empty());
    assert!(errors(&compiler).is_empty());
    assert_eq!(compiler.resource(&explore).unwrap().paths, vec!["/explores/orders.yaml"]);

    repo.delete("/explores/orders.yaml").unwrap();
    let diff = compiler.reparse(&["/explores/orders.yaml"]).unwrap();
    assert_eq!(names(&diff.modified), vec!["explore/orders"]);
    assert_eq!(compiler.resource(&explore).unwrap().paths, vec!["/metrics/orders.yaml"]);
}

#[test]
fn test_same_name_different_kinds_coexist() {
    let (_, compiler) = compile(&[
        ("rill.yaml", ""),
        ("models/orders.sql", "SELECT 1"),
        ("themes/orders.yaml", "type: theme\n"),
    ]);
    assert_eq!(compiler.resources().len(), 2);
    assert!(compiler.errors().is_empty());
}
