// src/engine/handle.rs

use tokio::sync::mpsc;
use tracing::debug;

use crate::engine::RuntimeEvent;

/// Clonable control handle for a [`WorkflowEngine`](crate::engine::WorkflowEngine).
///
/// Requests are queued on the engine's event channel and applied by the
/// engine loop in arrival order. Each method returns `false` if the engine
/// has already gone away.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<RuntimeEvent>,
}

impl EngineHandle {
    pub(crate) fn new(tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self { tx }
    }

    pub async fn pause(&self) -> bool {
        self.send(RuntimeEvent::PauseRequested).await
    }

    pub async fn unpause(&self) -> bool {
        self.send(RuntimeEvent::UnpauseRequested).await
    }

    pub async fn shutdown(&self) -> bool {
        self.send(RuntimeEvent::ShutdownRequested).await
    }

    async fn send(&self, event: RuntimeEvent) -> bool {
        match self.tx.send(event).await {
            Ok(()) => true,
            Err(e) => {
                debug!(event = ?e.0, "engine gone; control request dropped");
                false
            }
        }
    }
}
