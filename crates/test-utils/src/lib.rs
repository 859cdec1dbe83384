pub mod builders;
pub mod metrics;
pub mod scripted;

use std::sync::{Arc, Once};
use std::time::Duration;

use nightdag::checkpoint::CheckpointStore;
use nightdag::engine::{EngineOptions, WorkflowEngine};
use nightdag::retry::FixedDelay;
use tracing_subscriber::{fmt, EnvFilter};

pub use metrics::{MetricRecord, RecordingMetrics};
pub use scripted::{Probe, ProbeEvent, ScriptedExecutor};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Engine with retries that do not wait, and a short shutdown grace period.
pub fn test_engine(store: impl CheckpointStore + 'static, max_parallel: usize) -> WorkflowEngine {
    WorkflowEngine::new(
        store,
        EngineOptions {
            max_parallel,
            shutdown_grace: Duration::from_millis(200),
        },
    )
    .with_retry_policy(Arc::new(FixedDelay::new(Duration::ZERO)))
}

/// Run a future with a 10-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(10), f)
        .await
        .expect("Test timed out after 10 seconds")
}
