// src/exec/runner.rs

//! Single-attempt runner.

use std::time::Duration;

use tracing::{debug, warn};

use crate::exec::task::{TaskContext, TaskError, TaskExecutor};

/// Run one attempt of a task body under `timeout`.
///
/// The runner knows nothing about dependencies or retries. When the deadline
/// passes, the body's future is dropped (which for process-backed executors
/// kills the child) and the attempt fails with [`TaskError::Timeout`].
///
/// Cancellation is cooperative: the body sees `ctx.cancel` and is expected to
/// return [`TaskError::Cancelled`]; the worker pool abandons bodies that do
/// not honour it once the shutdown grace period is over.
pub async fn run_attempt(
    executor: &dyn TaskExecutor,
    ctx: TaskContext,
    timeout: Duration,
) -> Result<(), TaskError> {
    if ctx.cancel.is_cancelled() {
        return Err(TaskError::Cancelled);
    }

    let task = ctx.task_id.clone();
    let attempt = ctx.attempt;

    match tokio::time::timeout(timeout, executor.execute(ctx)).await {
        Ok(result) => {
            debug!(task = %task, attempt, ok = result.is_ok(), "attempt body returned");
            result
        }
        Err(_elapsed) => {
            warn!(
                task = %task,
                attempt,
                timeout_ms = timeout.as_millis() as u64,
                "attempt exceeded its deadline; abandoning body"
            );
            Err(TaskError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::task_fn;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> TaskContext {
        TaskContext {
            run_id: "run".to_string(),
            task_id: "A".to_string(),
            attempt: 1,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn success_and_failure_pass_through() {
        let ok = task_fn(|_| async { Ok::<(), TaskError>(()) });
        assert_eq!(run_attempt(ok.as_ref(), ctx(), Duration::from_secs(1)).await, Ok(()));

        let bad = task_fn(|_| async { Err::<(), _>(TaskError::execution("bad input")) });
        assert_eq!(
            run_attempt(bad.as_ref(), ctx(), Duration::from_secs(1)).await,
            Err(TaskError::Execution("bad input".to_string()))
        );
    }

    #[tokio::test]
    async fn slow_body_times_out() {
        let slow = task_fn(|_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<(), TaskError>(())
        });
        let res = run_attempt(slow.as_ref(), ctx(), Duration::from_millis(50)).await;
        assert_eq!(res, Err(TaskError::Timeout(Duration::from_millis(50))));
        assert_eq!(res.unwrap_err().to_string(), "timed out after 50ms");
    }

    #[tokio::test]
    async fn already_cancelled_never_invokes_body() {
        let invoked = Arc::new(AtomicBool::new(false));
        let flag = invoked.clone();
        let body = task_fn(move |_| {
            flag.store(true, Ordering::SeqCst);
            async { Ok::<(), TaskError>(()) }
        });
        let c = ctx();
        c.cancel.cancel();
        assert_eq!(
            run_attempt(body.as_ref(), c, Duration::from_secs(1)).await,
            Err(TaskError::Cancelled)
        );
        assert!(!invoked.load(Ordering::SeqCst));
    }
}
