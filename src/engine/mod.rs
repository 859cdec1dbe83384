// src/engine/mod.rs

//! Orchestration engine for nightdag.
//!
//! This module ties together:
//! - the DAG and its dependency resolver
//! - the retry policy
//! - the worker pool running task attempts
//! - the checkpoint store
//! - the main event loop that reacts to:
//!   - attempt results from workers
//!   - pause / unpause / shutdown requests from an [`EngineHandle`]
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::time::Duration;

use crate::config::ConfigSection;
use crate::exec::AttemptReport;

pub mod core;
pub mod definition;
pub mod handle;
pub mod report;
pub mod runtime;

pub use core::{CoreCommand, CoreEngine, CoreStep};
pub use definition::{WorkflowDefinition, WorkflowDefinitionBuilder};
pub use handle::EngineHandle;
pub use report::{RunReport, TaskReport};
pub use runtime::WorkflowEngine;

/// Engine-wide knobs shared by the core and the async shell.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Maximum number of attempts in flight at once (>= 1).
    pub max_parallel: usize,
    /// How long a shutdown waits for in-flight workers before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl From<&ConfigSection> for EngineOptions {
    fn from(section: &ConfigSection) -> Self {
        Self {
            max_parallel: section.max_parallel,
            shutdown_grace: section.shutdown_grace.as_duration(),
        }
    }
}

/// Events flowing into the engine loop from workers and control handles.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A worker finished one attempt (successfully or not).
    AttemptFinished(AttemptReport),
    /// Stop dispatching new attempts; in-flight ones keep running.
    PauseRequested,
    UnpauseRequested,
    /// Cancel in-flight attempts and end the run in `Shutdown`.
    ShutdownRequested,
}
