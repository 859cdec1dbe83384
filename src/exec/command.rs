// src/exec/command.rs

//! Shell command task executor.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::exec::task::{TaskContext, TaskError, TaskExecutor, TaskFuture};

/// Runs a shell command per attempt.
///
/// - Exit status 0 is success; anything else is an execution failure.
/// - On workflow cancellation the child process is killed.
/// - The child is also killed if the attempt future is dropped (timeout).
#[derive(Debug, Clone)]
pub struct ShellCommandExecutor {
    cmd: String,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
}

impl ShellCommandExecutor {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    async fn run(&self, ctx: TaskContext) -> Result<(), TaskError> {
        match self.run_inner(&ctx).await {
            Ok(outcome) => outcome,
            Err(err) => Err(TaskError::Execution(format!("{err:#}"))),
        }
    }

    async fn run_inner(&self, ctx: &TaskContext) -> anyhow::Result<Result<(), TaskError>> {
        info!(
            task = %ctx.task_id,
            run_id = %ctx.run_id,
            attempt = ctx.attempt,
            cmd = %self.cmd,
            "starting task process"
        );

        // Build a shell command appropriate for the platform.
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };

        cmd.envs(&self.env)
            .env("NIGHTDAG_RUN_ID", &ctx.run_id)
            .env("NIGHTDAG_TASK_ID", &ctx.task_id)
            .env("NIGHTDAG_ATTEMPT", ctx.attempt.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for task '{}'", ctx.task_id))?;

        // Always consume output so pipe buffers don't fill.
        if let Some(stdout) = child.stdout.take() {
            let task = ctx.task_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(task = %task, "stdout: {}", line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let task = ctx.task_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(task = %task, "stderr: {}", line);
                }
            });
        }

        tokio::select! {
            status_res = child.wait() => {
                let status = status_res.with_context(|| {
                    format!("waiting for process of task '{}'", ctx.task_id)
                })?;

                let code = status.code().unwrap_or(-1);
                info!(
                    task = %ctx.task_id,
                    attempt = ctx.attempt,
                    exit_code = code,
                    success = status.success(),
                    "task process exited"
                );

                if status.success() {
                    Ok(Ok(()))
                } else {
                    Ok(Err(TaskError::Execution(format!(
                        "command exited with code {code}"
                    ))))
                }
            }

            _ = ctx.cancel.cancelled() => {
                info!(
                    task = %ctx.task_id,
                    attempt = ctx.attempt,
                    "cancellation requested; killing task process"
                );
                if let Err(e) = child.kill().await {
                    warn!(
                        task = %ctx.task_id,
                        error = %e,
                        "failed to kill child process on cancellation"
                    );
                }
                Ok(Err(TaskError::Cancelled))
            }
        }
    }
}

impl TaskExecutor for ShellCommandExecutor {
    fn execute(&self, ctx: TaskContext) -> TaskFuture<'_> {
        Box::pin(self.run(ctx))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx(task: &str) -> TaskContext {
        TaskContext {
            run_id: "run-1".to_string(),
            task_id: task.to_string(),
            attempt: 2,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let exec = ShellCommandExecutor::new("true");
        assert_eq!(exec.execute(ctx("A")).await, Ok(()));
    }

    #[tokio::test]
    async fn non_zero_exit_is_execution_error() {
        let exec = ShellCommandExecutor::new("exit 3");
        assert_eq!(
            exec.execute(ctx("A")).await,
            Err(TaskError::Execution("command exited with code 3".to_string()))
        );
    }

    #[tokio::test]
    async fn exports_attempt_identity_and_env() {
        let mut env = BTreeMap::new();
        env.insert("STAGE".to_string(), "collect".to_string());
        let exec = ShellCommandExecutor::new(
            r#"test "$NIGHTDAG_TASK_ID" = "A" && test "$NIGHTDAG_ATTEMPT" = "2" && test "$STAGE" = "collect""#,
        )
        .with_env(env);
        assert_eq!(exec.execute(ctx("A")).await, Ok(()));
    }

    #[tokio::test]
    async fn cancellation_kills_process() {
        let exec = ShellCommandExecutor::new("sleep 30");
        let c = ctx("A");
        let token = c.cancel.clone();
        let handle = tokio::spawn(async move { exec.execute(c).await });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        token.cancel();
        let res = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("cancelled command should stop promptly")
            .unwrap();
        assert_eq!(res, Err(TaskError::Cancelled));
    }
}
