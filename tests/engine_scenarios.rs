// tests/engine_scenarios.rs

mod common;

use std::time::Duration;

use nightdag::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use nightdag::dag::{FailureKind, TaskSpec, TaskStatus, WorkflowState};
use nightdag::engine::WorkflowDefinition;
use nightdag::errors::NightdagError;
use nightdag::metrics;
use nightdag_test_utils::{
    init_tracing, test_engine, with_timeout, Probe, RecordingMetrics, ScriptedExecutor,
};

use common::diamond;

#[tokio::test]
async fn fatal_task_exhausting_attempts_fails_run_and_skips_downstream() {
    init_tracing();
    let probe = Probe::new();
    let def = diamond(&probe, ScriptedExecutor::failing(&probe), true);

    let mut engine = test_engine(MemoryCheckpointStore::new(), 4);
    let report = with_timeout(engine.run(def)).await.unwrap();

    assert_eq!(report.workflow_state, WorkflowState::Failed);
    assert_eq!(report.task("A").unwrap().status, TaskStatus::Succeeded);
    assert_eq!(report.task("B").unwrap().status, TaskStatus::Succeeded);
    let c = report.task("C").unwrap();
    assert_eq!(c.status, TaskStatus::Failed);
    assert_eq!(c.attempts, 3);
    assert_eq!(c.last_error.as_ref().unwrap().kind, FailureKind::Execution);
    assert_eq!(report.task("D").unwrap().status, TaskStatus::Skipped);

    assert_eq!(report.fatal_cause.as_deref(), Some("C"));
    assert_eq!(report.skipped(), vec!["D"]);
    assert_eq!(probe.invocations("C"), 3);
    assert_eq!(probe.invocations("D"), 0);
}

#[tokio::test]
async fn non_fatal_failure_completes_but_still_skips_dependents() {
    init_tracing();
    let probe = Probe::new();
    let def = diamond(&probe, ScriptedExecutor::failing(&probe), false);

    let mut engine = test_engine(MemoryCheckpointStore::new(), 4);
    let report = with_timeout(engine.run(def)).await.unwrap();

    assert_eq!(report.workflow_state, WorkflowState::Completed);
    assert_eq!(report.task("C").unwrap().status, TaskStatus::Failed);
    assert_eq!(report.task("C").unwrap().attempts, 3);
    assert_eq!(report.task("D").unwrap().status, TaskStatus::Skipped);
    assert!(report.fatal_cause.is_none());

    let non_fatal: Vec<&str> = report
        .non_fatal_failures()
        .iter()
        .map(|t| t.task_id.as_str())
        .collect();
    assert_eq!(non_fatal, vec!["C"]);
}

#[tokio::test]
async fn flaky_task_recovers_within_budget() {
    init_tracing();
    let probe = Probe::new();
    let def = diamond(&probe, ScriptedExecutor::fail_times(&probe, 2), true);

    let mut engine = test_engine(MemoryCheckpointStore::new(), 4);
    let report = with_timeout(engine.run(def)).await.unwrap();

    assert!(report.is_completed());
    assert_eq!(report.count(TaskStatus::Succeeded), 4);
    assert_eq!(report.task("C").unwrap().attempts, 3);
    assert!(report.task("C").unwrap().last_error.is_none());
}

#[tokio::test]
async fn concurrency_limit_is_never_exceeded() {
    init_tracing();
    let probe = Probe::new();
    let work = Duration::from_millis(80);
    let def = WorkflowDefinition::builder()
        .task(TaskSpec::new("x"), ScriptedExecutor::ok(&probe).with_work(work).shared())
        .task(TaskSpec::new("y"), ScriptedExecutor::ok(&probe).with_work(work).shared())
        .task(TaskSpec::new("z"), ScriptedExecutor::ok(&probe).with_work(work).shared())
        .build();

    let mut engine = test_engine(MemoryCheckpointStore::new(), 2);
    let report = with_timeout(engine.run(def)).await.unwrap();

    assert!(report.is_completed());
    assert_eq!(probe.max_concurrent(), 2);
}

#[tokio::test]
async fn persisted_attempts_match_executor_invocations() {
    init_tracing();
    let probe = Probe::new();
    let def = WorkflowDefinition::builder()
        .task(TaskSpec::new("ok"), ScriptedExecutor::ok(&probe).shared())
        .task(
            TaskSpec::new("flaky").fatal(false).max_attempts(4),
            ScriptedExecutor::fail_times(&probe, 3).shared(),
        )
        .task(
            TaskSpec::new("broken").fatal(false).max_attempts(2),
            ScriptedExecutor::failing(&probe).shared(),
        )
        .build();

    let store = MemoryCheckpointStore::new();
    let mut engine = test_engine(store.clone(), 3);
    let report = with_timeout(engine.run(def)).await.unwrap();

    let persisted = store.load(&report.run_id).unwrap().unwrap();
    for (task, max) in [("ok", 3), ("flaky", 4), ("broken", 2)] {
        let attempts = persisted.task_states[task].attempt;
        assert_eq!(attempts, probe.invocations(task), "task {task}");
        assert!(attempts <= max, "task {task}");
    }
    assert_eq!(persisted.workflow_state, WorkflowState::Completed);
}

#[tokio::test]
async fn timeout_is_a_retryable_failure_tagged_distinctly() {
    init_tracing();
    let probe = Probe::new();
    let def = WorkflowDefinition::builder()
        .task(
            TaskSpec::new("slow")
                .fatal(false)
                .max_attempts(2)
                .timeout(Duration::from_millis(50)),
            ScriptedExecutor::ok(&probe)
                .with_work(Duration::from_secs(30))
                .shared(),
        )
        .build();

    let mut engine = test_engine(MemoryCheckpointStore::new(), 1);
    let report = with_timeout(engine.run(def)).await.unwrap();

    let slow = report.task("slow").unwrap();
    assert_eq!(slow.status, TaskStatus::Failed);
    assert_eq!(slow.attempts, 2);
    assert_eq!(slow.last_error.as_ref().unwrap().kind, FailureKind::Timeout);
    assert_eq!(probe.invocations("slow"), 2);
    assert_eq!(probe.running(), 0, "timed-out bodies must be dropped");
}

#[tokio::test]
async fn metrics_are_reported_per_task_and_for_the_run() {
    init_tracing();
    let probe = Probe::new();
    let sink = RecordingMetrics::new();
    let def = diamond(&probe, ScriptedExecutor::failing(&probe), true);

    let mut engine = test_engine(MemoryCheckpointStore::new(), 4)
        .with_metrics(std::sync::Arc::new(sink.clone()));
    let report = with_timeout(engine.run(def)).await.unwrap();

    let outcomes = sink.named(metrics::TASK_OUTCOME);
    let mut tasks: Vec<&str> = outcomes.iter().filter_map(|r| r.tag("task")).collect();
    tasks.sort();
    assert_eq!(tasks, vec!["A", "B", "C", "D"]);

    let c_attempts = sink
        .named(metrics::TASK_ATTEMPTS)
        .into_iter()
        .find(|r| r.tag("task") == Some("C"))
        .unwrap();
    assert_eq!(c_attempts.value, 3.0);

    let rate = sink.named(metrics::RUN_SUCCESS_RATE);
    assert_eq!(rate.len(), 1);
    assert_eq!(rate[0].value, 0.5);
    assert_eq!(rate[0].tag("run_id"), Some(report.run_id.as_str()));

    let skipped = sink
        .named(metrics::RUN_TASKS)
        .into_iter()
        .find(|r| r.tag("status") == Some("Skipped"))
        .unwrap();
    assert_eq!(skipped.value, 1.0);
}

#[tokio::test]
async fn cycle_is_rejected_at_initialize() {
    init_tracing();
    let probe = Probe::new();
    let def = WorkflowDefinition::builder()
        .task(TaskSpec::new("a").after("b"), ScriptedExecutor::ok(&probe).shared())
        .task(TaskSpec::new("b").after("a"), ScriptedExecutor::ok(&probe).shared())
        .build();

    let store = MemoryCheckpointStore::new();
    let mut engine = test_engine(store.clone(), 2);
    let err = engine.initialize(def).unwrap_err();

    assert!(matches!(err, NightdagError::DagCycle(_)), "{err:?}");
    assert!(err.is_configuration());
    assert_eq!(engine.state(), WorkflowState::Created);
    assert!(store.latest_run_id().unwrap().is_none(), "nothing persisted");
    assert_eq!(probe.events().len(), 0);
}

#[tokio::test]
async fn definition_errors_are_configuration_errors() {
    init_tracing();
    let probe = Probe::new();

    let duplicate = WorkflowDefinition::builder()
        .task(TaskSpec::new("a"), ScriptedExecutor::ok(&probe).shared())
        .task(TaskSpec::new("a"), ScriptedExecutor::ok(&probe).shared())
        .build();
    let unknown = WorkflowDefinition::builder()
        .task(TaskSpec::new("a").after("ghost"), ScriptedExecutor::ok(&probe).shared())
        .build();
    let no_executor = WorkflowDefinition::builder().spec(TaskSpec::new("a")).build();

    for (def, what) in [
        (duplicate, "duplicate"),
        (unknown, "unknown"),
        (no_executor, "missing executor"),
    ] {
        let mut engine = test_engine(MemoryCheckpointStore::new(), 1);
        let err = engine.initialize(def).unwrap_err();
        assert!(err.is_configuration(), "{what}: {err:?}");
    }
}

#[tokio::test]
async fn lifecycle_order_is_enforced() {
    init_tracing();
    let probe = Probe::new();
    let mut engine = test_engine(MemoryCheckpointStore::new(), 1);

    let err = engine.start().await.unwrap_err();
    assert!(matches!(
        err,
        NightdagError::InvalidTransition {
            from: WorkflowState::Created,
            to: WorkflowState::Running
        }
    ));

    let def = WorkflowDefinition::builder()
        .task(TaskSpec::new("a"), ScriptedExecutor::ok(&probe).shared())
        .build();
    engine.initialize(def.clone()).unwrap();
    assert_eq!(engine.state(), WorkflowState::Ready);
    assert!(engine.initialize(def).is_err());

    let report = engine.start().await.unwrap();
    assert!(report.is_completed());
    assert_eq!(engine.state(), WorkflowState::Completed);
}

#[tokio::test]
async fn shutdown_before_start_is_terminal() {
    init_tracing();
    let probe = Probe::new();
    let store = MemoryCheckpointStore::new();
    let mut engine = test_engine(store.clone(), 1);
    engine
        .initialize(
            WorkflowDefinition::builder()
                .task(TaskSpec::new("a"), ScriptedExecutor::ok(&probe).shared())
                .build(),
        )
        .unwrap();
    let run_id = engine.run_id().unwrap().to_string();

    engine.shutdown().unwrap();

    assert_eq!(engine.state(), WorkflowState::Shutdown);
    let persisted = store.load(&run_id).unwrap().unwrap();
    assert_eq!(persisted.workflow_state, WorkflowState::Shutdown);
    assert!(engine.start().await.is_err());
    assert_eq!(probe.invocations("a"), 0);
}
