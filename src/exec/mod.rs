// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`task`] defines the one-method [`TaskExecutor`] capability that task
//!   bodies implement, plus the per-attempt [`TaskContext`] and [`TaskError`].
//! - [`runner`] runs a single attempt under its deadline.
//! - [`command`] is the production executor that runs a shell command with
//!   `tokio::process::Command`.
//! - [`pool`] owns the worker slots: it spawns one Tokio task per dispatched
//!   attempt and reports results back to the engine over a channel, never
//!   touching run state itself.

pub mod command;
pub mod pool;
pub mod runner;
pub mod task;

pub use command::ShellCommandExecutor;
pub use pool::{AttemptReport, ScheduledAttempt, WorkerPool};
pub use runner::run_attempt;
pub use task::{task_fn, TaskContext, TaskError, TaskExecutor, TaskFuture};
