// src/lib.rs

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use crate::cli::{CliArgs, Command, RunArgs, StatusArgs, LATEST_RUN};
use crate::config::{default_config_path, load_and_validate, ConfigFile};
use crate::dag::{DagGraph, WorkflowState};
use crate::engine::{EngineOptions, RunReport, WorkflowDefinition, WorkflowEngine};
use crate::metrics::TracingMetricsSink;
use crate::types::{format_duration, CheckpointMode};

/// High-level entry point used by `main.rs`.
///
/// Returns the terminal workflow state when tasks were executed, `None` for
/// `status` and `run --dry-run`.
pub async fn run(args: CliArgs) -> Result<Option<WorkflowState>> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading workflow file {config_path:?}"))?;
    let base_dir = config_root_dir(&config_path);

    match args.command {
        Command::Run(run_args) => run_workflow(&cfg, &base_dir, run_args).await,
        Command::Status(status_args) => {
            show_status(&cfg, &base_dir, status_args)?;
            Ok(None)
        }
    }
}

/// This wires together:
/// - the checkpoint store selected by `[config].checkpoint`
/// - the retry policy from `[retry]`
/// - one shell executor per task
/// - Ctrl-C handling
async fn run_workflow(
    cfg: &ConfigFile,
    base_dir: &Path,
    args: RunArgs,
) -> Result<Option<WorkflowState>> {
    if args.dry_run {
        let graph = DagGraph::build(cfg.task_specs())?;
        print!("{}", render_plan(cfg, &graph));
        debug!("dry-run complete (no execution)");
        return Ok(None);
    }

    let store = open_store(cfg, base_dir)?;
    let resume_id = match args.resume.as_deref() {
        None => None,
        Some(LATEST_RUN) => Some(
            store
                .latest_run_id()?
                .context("no earlier run to resume")?,
        ),
        Some(id) => Some(id.to_string()),
    };

    let mut engine = WorkflowEngine::with_boxed_store(store, EngineOptions::from(&cfg.config))
        .with_retry_policy(Arc::from(retry::from_config(&cfg.retry)))
        .with_metrics(Arc::new(TracingMetricsSink));

    // Ctrl-C → graceful shutdown.
    {
        let handle = engine.handle();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; shutting down");
            handle.shutdown().await;
        });
    }

    let definition = WorkflowDefinition::from_config(cfg, base_dir);
    let report = match resume_id {
        Some(id) => {
            info!(run_id = %id, "resuming run");
            engine.resume(definition, &id).await?
        }
        None => engine.run(definition).await?,
    };

    print!("{report}");
    Ok(Some(report.workflow_state))
}

fn show_status(cfg: &ConfigFile, base_dir: &Path, args: StatusArgs) -> Result<()> {
    if cfg.config.checkpoint == CheckpointMode::Memory {
        bail!("`status` needs `checkpoint = \"file\"`; in-memory runs are not kept");
    }
    let store = FileCheckpointStore::open(state_dir(cfg, base_dir))?;

    let run_id = match args.run_id {
        Some(id) => id,
        None => store.latest_run_id()?.context("no runs recorded yet")?,
    };
    let record = store
        .load(&run_id)?
        .with_context(|| format!("run '{run_id}' not found"))?;

    let graph = DagGraph::build(cfg.task_specs()).ok();
    print!("{}", RunReport::from_record(&record, graph.as_ref()));
    Ok(())
}

fn open_store(cfg: &ConfigFile, base_dir: &Path) -> Result<Box<dyn CheckpointStore>> {
    Ok(match cfg.config.checkpoint {
        CheckpointMode::File => Box::new(FileCheckpointStore::open(state_dir(cfg, base_dir))?),
        CheckpointMode::Memory => {
            warn!("checkpoint = \"memory\": this run cannot be resumed after the process exits");
            Box::new(MemoryCheckpointStore::new())
        }
    })
}

fn state_dir(cfg: &ConfigFile, base_dir: &Path) -> PathBuf {
    if cfg.config.state_dir.is_absolute() {
        cfg.config.state_dir.clone()
    } else {
        base_dir.join(&cfg.config.state_dir)
    }
}

/// Directory that relative paths in the workflow file are resolved against.
///
/// - If the config path has a non-empty parent (e.g. "etc/Nightdag.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Nightdag.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Execution plan: tasks grouped into layers that may run concurrently.
pub fn render_plan(cfg: &ConfigFile, graph: &DagGraph) -> String {
    let mut out = String::new();
    out.push_str("nightdag dry-run\n");
    out.push_str(&format!(
        "  max_parallel = {}, retry = {:?}, checkpoint = {:?}\n\n",
        cfg.config.max_parallel, cfg.retry.strategy, cfg.config.checkpoint
    ));

    for (n, layer) in graph.execution_layers().iter().enumerate() {
        out.push_str(&format!("layer {n}:\n"));
        for id in layer {
            let Some(spec) = graph.spec(id) else {
                continue;
            };
            out.push_str(&format!("  - {id}\n"));
            if let Some(task) = cfg.task.get(id) {
                out.push_str(&format!("      cmd: {}\n", task.cmd));
            }
            if !spec.depends_on.is_empty() {
                let deps: Vec<&str> = spec.depends_on.iter().map(|s| s.as_str()).collect();
                out.push_str(&format!("      after: {}\n", deps.join(", ")));
            }
            out.push_str(&format!(
                "      fatal: {}, max_attempts: {}, timeout: {}\n",
                spec.fatal,
                spec.max_attempts,
                format_duration(spec.timeout)
            ));
        }
    }

    out
}
