// src/main.rs

use nightdag::dag::WorkflowState;
use nightdag::{cli, logging, run};

#[tokio::main]
async fn main() {
    let code = match run_main().await {
        Ok(state) => exit_code(state),
        Err(err) => {
            eprintln!("nightdag error: {err:?}");
            1
        }
    };
    std::process::exit(code);
}

async fn run_main() -> anyhow::Result<Option<WorkflowState>> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}

/// `None` is a command that does not execute the workflow.
fn exit_code(state: Option<WorkflowState>) -> i32 {
    match state {
        None | Some(WorkflowState::Completed) => 0,
        Some(WorkflowState::Shutdown) => 130,
        Some(_) => 1,
    }
}
