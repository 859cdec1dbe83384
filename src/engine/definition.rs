// src/engine/definition.rs

//! Declarative workflow definition consumed by `initialize()`.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::ConfigFile;
use crate::dag::{TaskId, TaskSpec};
use crate::exec::{ShellCommandExecutor, TaskExecutor};

/// Task specs plus the executor for each task id.
///
/// Nothing is validated here; duplicate ids, unknown dependencies, cycles and
/// missing executors are rejected when the engine initializes.
#[derive(Clone, Default)]
pub struct WorkflowDefinition {
    specs: Vec<TaskSpec>,
    executors: HashMap<TaskId, Arc<dyn TaskExecutor>>,
}

impl fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut with_exec: Vec<&String> = self.executors.keys().collect();
        with_exec.sort();
        f.debug_struct("WorkflowDefinition")
            .field("specs", &self.specs)
            .field("executors", &with_exec)
            .finish()
    }
}

impl WorkflowDefinition {
    pub fn builder() -> WorkflowDefinitionBuilder {
        WorkflowDefinitionBuilder::default()
    }

    /// One shell-command executor per `[task.<id>]` entry.
    ///
    /// Commands run with `base_dir` (normally the config file's directory) as
    /// their working directory.
    pub fn from_config(cfg: &ConfigFile, base_dir: &Path) -> Self {
        let mut builder = Self::builder();
        for (id, task) in &cfg.task {
            let exec = ShellCommandExecutor::new(task.cmd.clone())
                .with_env(task.env.clone())
                .with_cwd(base_dir);
            builder = builder.task(task.to_spec(id, &cfg.default), Arc::new(exec));
        }
        builder.build()
    }

    pub fn specs(&self) -> &[TaskSpec] {
        &self.specs
    }

    pub fn executor(&self, id: &str) -> Option<&Arc<dyn TaskExecutor>> {
        self.executors.get(id)
    }

    pub(crate) fn into_parts(self) -> (Vec<TaskSpec>, HashMap<TaskId, Arc<dyn TaskExecutor>>) {
        (self.specs, self.executors)
    }
}

#[derive(Default)]
pub struct WorkflowDefinitionBuilder {
    def: WorkflowDefinition,
}

impl WorkflowDefinitionBuilder {
    /// Add a task together with its executor.
    pub fn task(mut self, spec: TaskSpec, executor: Arc<dyn TaskExecutor>) -> Self {
        self.def.executors.insert(spec.id.clone(), executor);
        self.def.specs.push(spec);
        self
    }

    /// Add a task whose executor is registered separately (or not at all).
    pub fn spec(mut self, spec: TaskSpec) -> Self {
        self.def.specs.push(spec);
        self
    }

    pub fn executor(mut self, id: impl Into<TaskId>, executor: Arc<dyn TaskExecutor>) -> Self {
        self.def.executors.insert(id.into(), executor);
        self
    }

    pub fn build(self) -> WorkflowDefinition {
        self.def
    }
}
