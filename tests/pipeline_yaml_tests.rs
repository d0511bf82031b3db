//! YAML pipelines parsed, lowered and run.

mod test_data_gen;

use epochflow_core::config::EngineConfig;
use epochflow_exec::TreeState;
use epochflow_planner::{build_tree, parse_yaml_pipeline, resolve_config, PlanError, Step};
use test_data_gen::{drain_flags, drain_i64, flags_of, small_config};

fn run(yaml: &str) -> epochflow_core::manifest::RunManifest {
    let parsed = parse_yaml_pipeline(yaml).unwrap();
    let config = resolve_config(&parsed, small_config()).unwrap();
    let mut tree = build_tree(&parsed, config).unwrap();
    tree.run_to_end().unwrap()
}

#[test]
fn range_filter_repeat_runs_to_end() {
    let manifest = run(r#"
steps:
  - op: range
    rows: 10
    rows_per_buffer: 5
  - op: filter
    expr: "id < 5"
    workers: 2
  - op: repeat
    count: 2
    forward_epoch_markers: true
"#);
    assert_eq!(manifest.buffers, 4);
    assert_eq!(manifest.rows, 10);
    assert_eq!(manifest.epochs, 2);
}

#[test]
fn pipeline_config_sets_buffer_size() {
    let manifest = run(r#"
config:
  rows_per_buffer: 2
  seed: 99
steps:
  - op: range
    rows: 5
"#);
    assert_eq!(manifest.buffers, 3);
    assert_eq!(manifest.rows, 5);
    assert_eq!(manifest.epochs, 1);
    assert_eq!(manifest.seed, Some(99));
}

#[test]
fn values_are_renamed_in_order() {
    let parsed = parse_yaml_pipeline(
        r#"
steps:
  - op: values
    column: x
    values: [3, 1, 2, 8, 5]
    rows_per_buffer: 2
  - op: rename
    expr: "x AS y"
    workers: 3
"#,
    )
    .unwrap();
    assert!(matches!(parsed.source(), Some(Step::Values { .. })));

    let mut tree = build_tree(&parsed, small_config()).unwrap();
    assert_eq!(tree.state(), TreeState::Init);
    tree.prepare().unwrap();
    tree.launch().unwrap();
    assert_eq!(
        drain_i64(&mut tree, "y"),
        vec![Some(3), Some(1), Some(2), Some(8), Some(5), None]
    );
}

#[test]
fn lowered_repeat_keeps_the_epoch_protocol() {
    let parsed = parse_yaml_pipeline(
        r#"
steps:
  - op: values
    column: id
    values: [1, 2]
    rows_per_buffer: 1
  - op: repeat
    count: 3
    forward_epoch_markers: true
"#,
    )
    .unwrap();
    let mut tree = build_tree(&parsed, EngineConfig::default()).unwrap();
    tree.prepare().unwrap();
    tree.launch().unwrap();
    assert_eq!(drain_flags(&mut tree), flags_of("DDEDDEDDES"));
}

#[test]
fn nested_repeats_from_yaml() {
    let manifest = run(r#"
steps:
  - op: range
    rows: 3
    rows_per_buffer: 3
  - op: repeat
    count: 2
  - op: rename
    expr: "id AS key"
    workers: 2
  - op: repeat
    count: 2
"#);
    assert_eq!(manifest.buffers, 4);
    assert_eq!(manifest.rows, 12);
    assert_eq!(manifest.epochs, 1);
}

#[test]
fn planning_errors_are_classified() {
    let unknown = parse_yaml_pipeline("steps:\n  - op: sort\n    by: id\n");
    assert!(matches!(unknown, Err(PlanError::Yaml(_))));

    let two_sources = parse_yaml_pipeline(
        "steps:\n  - op: range\n    rows: 2\n  - op: range\n    rows: 2\n",
    );
    assert!(matches!(two_sources, Err(PlanError::Invalid(_))));

    let no_source = parse_yaml_pipeline("steps:\n  - op: rename\n    expr: \"a AS b\"\n");
    assert!(matches!(no_source, Err(PlanError::Invalid(_))));

    let zero = parse_yaml_pipeline("steps:\n  - op: range\n    rows: 2\n  - op: repeat\n    count: 0\n")
        .unwrap();
    match build_tree(&zero, EngineConfig::default()) {
        Err(PlanError::Exec(err)) => assert!(err.is_config(), "{err}"),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("count 0 accepted"),
    }

    let bad_rename = parse_yaml_pipeline(
        "steps:\n  - op: range\n    rows: 2\n  - op: repeat\n    count: 2\n  - op: rename\n    expr: \"id key\"\n",
    )
    .unwrap();
    assert!(matches!(
        build_tree(&bad_rename, EngineConfig::default()),
        Err(PlanError::Kernel { step: 2, .. })
    ));

    let bad_config = parse_yaml_pipeline(
        "config:\n  num_parallel_workers: 0\nsteps:\n  - op: range\n    rows: 2\n",
    )
    .unwrap();
    assert!(matches!(
        resolve_config(&bad_config, EngineConfig::default()),
        Err(PlanError::Core(_))
    ));
}
