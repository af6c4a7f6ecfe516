//! Collector: the two polling loops and the results consumer.
//!
//! ```text
//!   check loop ──────┐                          ┌── results consumer
//!   (classify)       ├─ try_acquire ─► tasks ─►  │   release(group)
//!   reevaluate loop ─┘                 queue     │        ▲
//!   (rebalance)                                  └── results queue
//! ```
//!
//! Passes run on their own timers and never hold the task store lock
//! across a cloud call. A failed pass is logged and produces no tasks;
//! the next tick starts from scratch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use spotgrid_core::VmPoolTask;

use crate::error::ControllerResult;
use crate::manager::PoolManager;
use crate::task_store::TaskStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Check,
    Reevaluate,
}

impl Pass {
    fn as_str(self) -> &'static str {
        match self {
            Pass::Check => "check",
            Pass::Reevaluate => "reevaluate",
        }
    }
}

pub struct Collector {
    manager: Arc<dyn PoolManager>,
    store: TaskStore,
    check_interval: Duration,
    reevaluate_interval: Duration,
}

impl Collector {
    pub fn new(
        manager: Arc<dyn PoolManager>,
        store: TaskStore,
        check_interval: Duration,
        reevaluate_interval: Duration,
    ) -> Self {
        Self {
            manager,
            store,
            check_interval,
            reevaluate_interval,
        }
    }

    /// Spawn both polling loops and the results consumer.
    ///
    /// Every loop exits when `shutdown` flips. The consumer also exits once
    /// every results sender is gone.
    pub fn start(
        self,
        tasks: mpsc::Sender<VmPoolTask>,
        results: mpsc::Receiver<VmPoolTask>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let check = tokio::spawn(run_pass_loop(
            Pass::Check,
            self.check_interval,
            self.manager.clone(),
            self.store.clone(),
            tasks.clone(),
            shutdown.clone(),
        ));
        let reevaluate = tokio::spawn(run_pass_loop(
            Pass::Reevaluate,
            self.reevaluate_interval,
            self.manager.clone(),
            self.store.clone(),
            tasks,
            shutdown.clone(),
        ));
        let consumer = tokio::spawn(consume_results(self.store, results, shutdown));

        info!(
            check_interval = ?self.check_interval,
            reevaluate_interval = ?self.reevaluate_interval,
            "collector started"
        );
        vec![check, reevaluate, consumer]
    }
}

async fn run_pass_loop(
    pass: Pass,
    period: Duration,
    manager: Arc<dyn PoolManager>,
    store: TaskStore,
    tasks: mpsc::Sender<VmPoolTask>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let found: ControllerResult<Vec<VmPoolTask>> = match pass {
                    Pass::Check => manager.check_pools().await,
                    Pass::Reevaluate => manager.reevaluate_pools().await,
                };
                match found {
                    Ok(found) => {
                        if !enqueue(&store, &tasks, found).await {
                            debug!(pass = pass.as_str(), "task queue closed");
                            break;
                        }
                    }
                    Err(e) => error!(pass = pass.as_str(), error = %e, "pass failed, skipping tick"),
                }
            }
            _ = shutdown.changed() => {
                debug!(pass = pass.as_str(), "polling loop shutting down");
                break;
            }
        }
    }
}

/// Queue every task whose group is not already in progress. Returns
/// `false` once the queue is closed.
async fn enqueue(store: &TaskStore, queue: &mpsc::Sender<VmPoolTask>, found: Vec<VmPoolTask>) -> bool {
    for task in found {
        if !store.try_acquire(&task.group_name) {
            info!(
                group = %task.group_name,
                task_id = %task.task_id,
                action = %task.action,
                "group already in progress, skipping task"
            );
            continue;
        }
        let group = task.group_name.clone();
        if queue.send(task).await.is_err() {
            store.release(&group);
            return false;
        }
    }
    true
}

async fn consume_results(
    store: TaskStore,
    mut results: mpsc::Receiver<VmPoolTask>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            done = results.recv() => match done {
                Some(task) => {
                    store.release(&task.group_name);
                    debug!(group = %task.group_name, task_id = %task.task_id, "task finished, group released");
                }
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    debug!("results consumer stopped");
}
