#![allow(dead_code)]

use nightdag::dag::TaskSpec;
use nightdag::engine::WorkflowDefinition;
use nightdag_test_utils::{Probe, ScriptedExecutor};

/// `A -> C`, `B -> C`, `C -> D`; `c` decides how C behaves.
pub fn diamond(probe: &Probe, c: ScriptedExecutor, c_fatal: bool) -> WorkflowDefinition {
    WorkflowDefinition::builder()
        .task(TaskSpec::new("A"), ScriptedExecutor::ok(probe).shared())
        .task(TaskSpec::new("B"), ScriptedExecutor::ok(probe).shared())
        .task(
            TaskSpec::new("C").after("A").after("B").fatal(c_fatal),
            c.shared(),
        )
        .task(TaskSpec::new("D").after("C"), ScriptedExecutor::ok(probe).shared())
        .build()
}
