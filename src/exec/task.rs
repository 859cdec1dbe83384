// src/exec/task.rs

//! The task body capability.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::dag::{FailureKind, RunId, TaskFailure, TaskId};
use crate::types::format_duration;

/// Why a single attempt did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("{0}")]
    Execution(String),

    #[error("timed out after {}", fmt_timeout(.0))]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

fn fmt_timeout(d: &Duration) -> String {
    format_duration(*d)
}

impl TaskError {
    /// Convenience for task bodies: wrap any displayable error.
    pub fn execution(err: impl Display) -> Self {
        TaskError::Execution(err.to_string())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            TaskError::Execution(_) => FailureKind::Execution,
            TaskError::Timeout(_) => FailureKind::Timeout,
            TaskError::Cancelled => FailureKind::Cancelled,
        }
    }
}

impl From<&TaskError> for TaskFailure {
    fn from(err: &TaskError) -> Self {
        TaskFailure {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// What a task body gets to know about the attempt it is running.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub run_id: RunId,
    pub task_id: TaskId,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Fires when the workflow is being stopped. Bodies should wind down
    /// promptly; if they do not, they are abandoned after the grace period.
    pub cancel: CancellationToken,
}

pub type TaskFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'a>>;

/// A side-effecting unit of work, supplied per task id by the caller.
///
/// The engine never looks inside; it only awaits the returned future under
/// the task's deadline.
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, ctx: TaskContext) -> TaskFuture<'_>;
}

/// Adapter turning an async closure into a [`TaskExecutor`].
pub struct FnExecutor<F>(F);

impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn execute(&self, ctx: TaskContext) -> TaskFuture<'_> {
        Box::pin((self.0)(ctx))
    }
}

/// Wrap an async closure as a shareable executor.
///
/// ```ignore
/// let exec = task_fn(|ctx| async move {
///     tracing::info!(task = %ctx.task_id, "collecting");
///     Ok(())
/// });
/// ```
pub fn task_fn<F, Fut>(f: F) -> Arc<dyn TaskExecutor>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    Arc::new(FnExecutor(f))
}
