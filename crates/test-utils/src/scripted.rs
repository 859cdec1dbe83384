use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nightdag::exec::{TaskContext, TaskError, TaskExecutor, TaskFuture};

/// What a [`Probe`] saw, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    Started { task: String, attempt: u32 },
    Succeeded { task: String },
    Failed { task: String },
}

#[derive(Debug, Default)]
struct ProbeInner {
    running: AtomicUsize,
    max_running: AtomicUsize,
    events: Mutex<Vec<ProbeEvent>>,
}

/// Shared instrumentation for every [`ScriptedExecutor`] in one test.
///
/// Counts invocations per task, tracks the highest number of bodies running
/// at the same time, and keeps the start/finish order.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    inner: Arc<ProbeInner>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProbeEvent> {
        self.inner.events.lock().unwrap().clone()
    }

    /// Number of times the body of `task` was entered.
    pub fn invocations(&self, task: &str) -> u32 {
        self.events()
            .iter()
            .filter(|e| matches!(e, ProbeEvent::Started { task: t, .. } if t == task))
            .count() as u32
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_running.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn record(&self, event: ProbeEvent) {
        self.inner.events.lock().unwrap().push(event);
    }

    fn enter(&self, task: &str, attempt: u32) -> RunningGuard {
        self.record(ProbeEvent::Started {
            task: task.to_string(),
            attempt,
        });
        let now = self.inner.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_running.fetch_max(now, Ordering::SeqCst);
        RunningGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Decrements the running count even when the body is dropped mid-flight
/// (timeout, abort).
struct RunningGuard {
    inner: Arc<ProbeInner>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.inner.running.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    /// Fail the first `n` invocations, then succeed.
    FailTimes(u32),
    AlwaysFail,
    /// Never return and ignore cancellation.
    Hang,
}

/// A task body whose outcome is decided up front.
#[derive(Debug, Clone)]
pub struct ScriptedExecutor {
    probe: Probe,
    behaviour: Behaviour,
    work: Duration,
}

impl ScriptedExecutor {
    pub fn ok(probe: &Probe) -> Self {
        Self::fail_times(probe, 0)
    }

    pub fn fail_times(probe: &Probe, n: u32) -> Self {
        Self {
            probe: probe.clone(),
            behaviour: Behaviour::FailTimes(n),
            work: Duration::ZERO,
        }
    }

    pub fn failing(probe: &Probe) -> Self {
        Self {
            probe: probe.clone(),
            behaviour: Behaviour::AlwaysFail,
            work: Duration::ZERO,
        }
    }

    pub fn hanging(probe: &Probe) -> Self {
        Self {
            probe: probe.clone(),
            behaviour: Behaviour::Hang,
            work: Duration::ZERO,
        }
    }

    /// Simulated work before the outcome; cancellation cuts it short.
    pub fn with_work(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    pub fn shared(self) -> Arc<dyn TaskExecutor> {
        Arc::new(self)
    }

    async fn run(&self, ctx: TaskContext) -> Result<(), TaskError> {
        let _guard = self.probe.enter(&ctx.task_id, ctx.attempt);

        if let Behaviour::Hang = self.behaviour {
            std::future::pending::<()>().await;
        }

        if !self.work.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.work) => {}
                _ = ctx.cancel.cancelled() => return Err(TaskError::Cancelled),
            }
        }

        let fail = match self.behaviour {
            Behaviour::FailTimes(n) => ctx.attempt <= n,
            Behaviour::AlwaysFail | Behaviour::Hang => true,
        };

        if fail {
            self.probe.record(ProbeEvent::Failed {
                task: ctx.task_id.clone(),
            });
            Err(TaskError::execution(format!(
                "scripted failure of '{}' on attempt {}",
                ctx.task_id, ctx.attempt
            )))
        } else {
            self.probe.record(ProbeEvent::Succeeded {
                task: ctx.task_id.clone(),
            });
            Ok(())
        }
    }
}

impl TaskExecutor for ScriptedExecutor {
    fn execute(&self, ctx: TaskContext) -> TaskFuture<'_> {
        Box::pin(self.run(ctx))
    }
}
