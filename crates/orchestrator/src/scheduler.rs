use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::executor::BuildExecutor;

/// Hands queued builds to something that will run them.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn enqueue(&self, build_id: Uuid) -> Result<()>;
}

/// Runs the build before `enqueue` returns.
#[derive(Clone)]
pub struct InlineScheduler {
    executor: BuildExecutor,
}

impl InlineScheduler {
    pub fn new(executor: BuildExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Scheduler for InlineScheduler {
    async fn enqueue(&self, build_id: Uuid) -> Result<()> {
        self.executor.invoke(build_id).await.map(|_| ())
    }
}

/// Background queue: `enqueue` returns at once and every build runs on its
/// own task. The executor's project locks keep builds of one project in
/// sequence.
pub struct BuildQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<Uuid>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl BuildQueue {
    /// Start the dispatcher. Must be called inside a tokio runtime.
    pub fn start(executor: BuildExecutor) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(executor, receiver));

        Self {
            sender: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Stop accepting builds and wait for the ones already queued or running.
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();

        if let Some(dispatcher) = self.dispatcher.lock().await.take() {
            if let Err(e) = dispatcher.await {
                error!(error = %e, "Build dispatcher panicked");
            }
        }
        info!("Build queue stopped");
    }
}

#[async_trait]
impl Scheduler for BuildQueue {
    async fn enqueue(&self, build_id: Uuid) -> Result<()> {
        let sender = self.sender.lock().await;
        let sender = sender.as_ref().ok_or(OrchestratorError::QueueClosed)?;

        sender
            .send(build_id)
            .map_err(|_| OrchestratorError::QueueClosed)?;
        debug!(build_id = %build_id, "Build enqueued");
        Ok(())
    }
}

async fn dispatch(executor: BuildExecutor, mut receiver: mpsc::UnboundedReceiver<Uuid>) {
    let mut running = JoinSet::new();

    while let Some(build_id) = receiver.recv().await {
        let executor = executor.clone();
        running.spawn(async move {
            if let Err(e) = executor.invoke(build_id).await {
                error!(build_id = %build_id, error = %e, "Build failed to run");
            }
        });

        while running.try_join_next().is_some() {}
    }

    debug!(in_flight = running.len(), "Queue closed, waiting for running builds");
    while let Some(result) = running.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Build task panicked");
        }
    }
}
