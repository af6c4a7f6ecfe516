//! Wiring of collector, dispatcher and the queues between them.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use spotgrid_core::ControllerConfig;

use crate::collector::Collector;
use crate::dispatcher::Dispatcher;
use crate::manager::PoolManager;
use crate::task_store::TaskStore;

/// A running control loop.
pub struct FleetController {
    store: TaskStore,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl FleetController {
    /// Start the dispatcher and collector for `manager`.
    pub fn start(manager: Arc<dyn PoolManager>, config: &ControllerConfig) -> Self {
        let store = TaskStore::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (task_tx, task_rx) = mpsc::channel(config.queue_size.max(1));
        let (result_tx, result_rx) = mpsc::channel(config.queue_size.max(1));

        let mut handles = Dispatcher::new(manager.clone(), config.workers).start(
            task_rx,
            result_tx,
            shutdown_rx.clone(),
        );
        handles.extend(
            Collector::new(
                manager,
                store.clone(),
                config.check_interval(),
                config.reevaluate_interval(),
            )
            .start(task_tx, result_rx, shutdown_rx),
        );

        info!(region = %config.region, workers = config.workers, "fleet controller started");
        Self {
            store,
            shutdown_tx,
            handles,
        }
    }

    /// The dedup map shared by both polling loops.
    pub fn task_store(&self) -> &TaskStore {
        &self.store
    }

    /// Signal every loop to stop and wait for them. Executors still in the
    /// middle of a task are abandoned where they are.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            handle.abort();
            let _ = handle.await;
        }
        info!("fleet controller stopped");
    }
}
