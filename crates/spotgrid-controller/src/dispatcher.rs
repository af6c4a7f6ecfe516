//! Dispatcher and worker pool.
//!
//! Each worker owns a private one-slot inbox. When idle it advertises the
//! inbox's sender on the shared available-workers queue; the dispatcher
//! pairs the next queued task with the next advertised worker. A worker
//! advertises again only after finishing, so at most `workers` executors
//! run at once no matter how many tasks are queued.
//!
//! Every task a worker receives is pushed to the results queue when it
//! finishes, whether the executor succeeded or not.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use spotgrid_core::VmPoolTask;

use crate::manager::PoolManager;

type Inbox = mpsc::Sender<VmPoolTask>;

pub struct Dispatcher {
    manager: Arc<dyn PoolManager>,
    workers: usize,
}

impl Dispatcher {
    pub fn new(manager: Arc<dyn PoolManager>, workers: usize) -> Self {
        Self {
            manager,
            workers: workers.max(1),
        }
    }

    /// Spawn the worker pool and the dispatch loop.
    pub fn start(
        self,
        tasks: mpsc::Receiver<VmPoolTask>,
        results: mpsc::Sender<VmPoolTask>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let (available_tx, available_rx) = mpsc::channel::<Inbox>(self.workers);
        let mut handles = Vec::with_capacity(self.workers + 1);

        for id in 0..self.workers {
            handles.push(tokio::spawn(run_worker(
                id,
                self.manager.clone(),
                available_tx.clone(),
                results.clone(),
                shutdown.clone(),
            )));
        }
        drop(available_tx);

        handles.push(tokio::spawn(run_dispatch_loop(
            tasks,
            available_rx,
            results,
            shutdown,
        )));
        info!(workers = self.workers, "dispatcher started");
        handles
    }
}

async fn run_dispatch_loop(
    mut tasks: mpsc::Receiver<VmPoolTask>,
    mut available: mpsc::Receiver<Inbox>,
    results: mpsc::Sender<VmPoolTask>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let task = tokio::select! {
            task = tasks.recv() => match task {
                Some(task) => task,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let worker = tokio::select! {
            worker = available.recv() => worker,
            _ = shutdown.changed() => break,
        };
        let Some(worker) = worker else {
            warn!(group = %task.group_name, "no workers left, dropping task");
            let _ = results.send(task).await;
            break;
        };

        debug!(group = %task.group_name, task_id = %task.task_id, "dispatching task");
        if let Err(mpsc::error::SendError(task)) = worker.send(task).await {
            warn!(group = %task.group_name, "worker went away, returning task");
            let _ = results.send(task).await;
        }
    }
    debug!("dispatch loop stopped");
}

async fn run_worker(
    id: usize,
    manager: Arc<dyn PoolManager>,
    available: mpsc::Sender<Inbox>,
    results: mpsc::Sender<VmPoolTask>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (inbox_tx, mut inbox) = mpsc::channel::<VmPoolTask>(1);

    loop {
        if available.send(inbox_tx.clone()).await.is_err() {
            break;
        }

        let task = tokio::select! {
            task = inbox.recv() => match task {
                Some(task) => task,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        info!(
            worker = id,
            group = %task.group_name,
            task_id = %task.task_id,
            action = %task.action,
            "processing task"
        );
        match manager.update_pool(&task).await {
            Ok(()) => info!(
                worker = id,
                group = %task.group_name,
                task_id = %task.task_id,
                action = %task.action,
                "task completed"
            ),
            Err(e) => error!(
                worker = id,
                group = %task.group_name,
                task_id = %task.task_id,
                action = %task.action,
                error = %e,
                "task failed"
            ),
        }

        if results.send(task).await.is_err() {
            break;
        }
    }
    debug!(worker = id, "worker stopped");
}
