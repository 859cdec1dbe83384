// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::dag::{TaskStatus, WorkflowState};

#[derive(Error, Debug)]
pub enum NightdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("No executor registered for task '{0}'")]
    MissingExecutor(String),

    #[error("Checkpoint error: {0}")]
    Persistence(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Invalid workflow transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: WorkflowState,
        to: WorkflowState,
    },

    #[error("Invalid transition for task '{task}': {from} -> {to}")]
    InvalidTaskTransition {
        task: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl NightdagError {
    /// Whether this error belongs to the definition-time configuration family.
    ///
    /// These are raised by `initialize()` and never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            NightdagError::ConfigError(_)
                | NightdagError::DagCycle(_)
                | NightdagError::DuplicateTask(_)
                | NightdagError::UnknownDependency { .. }
                | NightdagError::MissingExecutor(_)
                | NightdagError::TomlError(_)
        )
    }

    /// Whether this error came from the checkpoint store.
    pub fn is_persistence(&self) -> bool {
        matches!(self, NightdagError::Persistence(_))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, NightdagError>;
