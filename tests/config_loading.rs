// tests/config_loading.rs

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use nightdag::config::{load_and_validate, load_from_path};
use nightdag::engine::WorkflowDefinition;
use nightdag::errors::NightdagError;
use nightdag::types::{CheckpointMode, RetryStrategyKind};
use nightdag_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn full_workflow_file_applies_defaults() {
    let file = write_config(
        r#"
[config]
max_parallel = 2
checkpoint = "memory"
shutdown_grace = "5s"

[retry]
strategy = "exponential"
delay = "1s"
max_delay = "1m"
multiplier = 3.0

[default]
fatal = false
timeout = "10m"

[task.collect]
cmd = "python collect.py"
fatal = true
env = { STAGE = "collect" }

[task.train]
cmd = "python train.py"
after = ["collect"]
max_attempts = 5
timeout = "2h"
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.config.max_parallel, 2);
    assert_eq!(cfg.config.checkpoint, CheckpointMode::Memory);
    assert_eq!(cfg.config.shutdown_grace.as_duration(), Duration::from_secs(5));
    assert_eq!(cfg.retry.strategy, RetryStrategyKind::Exponential);

    let specs = cfg.task_specs();
    let collect = specs.iter().find(|s| s.id == "collect").unwrap();
    assert!(collect.fatal);
    assert_eq!(collect.max_attempts, 3);
    assert_eq!(collect.timeout, Duration::from_secs(600));

    let train = specs.iter().find(|s| s.id == "train").unwrap();
    assert!(!train.fatal);
    assert_eq!(train.max_attempts, 5);
    assert_eq!(train.timeout, Duration::from_secs(7200));
    assert!(train.depends_on.contains("collect"));

    assert_eq!(
        cfg.task["collect"].env.get("STAGE").map(String::as_str),
        Some("collect")
    );
}

#[test]
fn definition_from_config_has_one_shell_executor_per_task() {
    let cfg = ConfigFileBuilder::new()
        .with_task("collect", TaskConfigBuilder::new("true").build())
        .with_task("train", TaskConfigBuilder::new("true").after("collect").build())
        .build();

    let definition = WorkflowDefinition::from_config(&cfg, Path::new("."));
    let ids: Vec<&str> = definition.specs().iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["collect", "train"]);
    assert!(definition.specs()[1].depends_on.contains("collect"));
    assert!(definition.executor("collect").is_some());
    assert!(definition.executor("train").is_some());
    assert!(definition.executor("publish").is_none());
}

#[test]
fn dag_cycle_returns_structured_error() {
    let file = write_config(
        r#"
[task.A]
cmd = "echo A"
after = ["B"]

[task.B]
cmd = "echo B"
after = ["A"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(NightdagError::DagCycle(msg)) => {
            assert!(msg.contains("cycle detected"));
            assert!(msg.contains('A') || msg.contains('B'));
        }
        Err(e) => panic!("Expected DagCycle error, got: {e:?}"),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn unknown_dependency_is_reported_by_name() {
    let file = write_config(
        r#"
[task.A]
cmd = "echo A"
after = ["NonExistent"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(NightdagError::UnknownDependency { task, dependency }) => {
            assert_eq!(task, "A");
            assert_eq!(dependency, "NonExistent");
        }
        other => panic!("Expected UnknownDependency, got: {other:?}"),
    }
}

#[test]
fn bad_duration_is_a_toml_error() {
    let file = write_config(
        r#"
[task.A]
cmd = "echo A"
timeout = "soon"
"#,
    );

    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, NightdagError::TomlError(_)), "{err:?}");
    assert!(err.is_configuration());
}

#[test]
fn raw_load_does_not_validate() {
    let file = write_config(
        r#"
[task.A]
cmd = "echo A"
after = ["A"]
"#,
    );
    assert!(load_from_path(file.path()).is_ok());
    assert!(load_and_validate(file.path()).is_err());
}

#[test]
fn semantic_checks_reject_bad_values() {
    let zero_parallel = ConfigFileBuilder::new()
        .max_parallel(0)
        .with_task("a", TaskConfigBuilder::new("true").build())
        .try_build();
    assert!(matches!(zero_parallel, Err(NightdagError::ConfigError(_))));

    let zero_attempts = ConfigFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new("true").max_attempts(0).build())
        .try_build();
    assert!(matches!(zero_attempts, Err(NightdagError::ConfigError(_))));

    let empty_cmd = ConfigFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new("  ").build())
        .try_build();
    assert!(matches!(empty_cmd, Err(NightdagError::ConfigError(_))));

    let no_tasks = ConfigFileBuilder::new().try_build();
    assert!(matches!(no_tasks, Err(NightdagError::ConfigError(_))));

    let defaults = ConfigFileBuilder::new()
        .default_fatal(false)
        .default_max_attempts(1)
        .with_task("a", TaskConfigBuilder::new("true").build())
        .with_task("b", TaskConfigBuilder::new("true").fatal(true).max_attempts(4).build())
        .build();
    let specs = defaults.task_specs();
    assert!(!specs[0].fatal);
    assert_eq!(specs[0].max_attempts, 1);
    assert!(specs[1].fatal);
    assert_eq!(specs[1].max_attempts, 4);

    let ok = ConfigFileBuilder::new()
        .retry(RetryStrategyKind::None, Duration::ZERO)
        .with_task("a", TaskConfigBuilder::new("true").build())
        .with_task("b", TaskConfigBuilder::new("true").after("a").fatal(false).build())
        .build();
    assert_eq!(ok.task.len(), 2);
}
