//! spotgrid-controller — the fleet lifecycle control loop.
//!
//! ```text
//!  ┌──────────────── Collector ────────────────┐
//!  │ check loop ──► classify ──┐                │
//!  │                           ├─► TaskStore ───┼──► task queue ──► Dispatcher
//!  │ reevaluate ─► snapshot ───┘  try_acquire   │                      │
//!  │ loop          vs recommend                 │            available-worker queue
//!  │                                            │                      │
//!  │ results consumer ◄── release ◄─────────────┼─── results ◄── Worker × N
//!  └────────────────────────────────────────────┘                      │
//!                                                     PoolManager::update_pool
//!                                          initialize │ upscale │ downscale │ rebalance
//!                                                     └─► launch-configuration rotation
//! ```
//!
//! The [`TaskStore`] is the only shared mutable state: a group is in
//! progress from the moment one of the loops queues a task for it until a
//! worker reports that task back, success or failure.

pub mod actions;
pub mod classifier;
pub mod collector;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod snapshot;
pub mod task_store;

pub use actions::choose_rotation_type;
pub use classifier::{classify, is_managed, is_stable};
pub use collector::Collector;
pub use controller::FleetController;
pub use dispatcher::Dispatcher;
pub use error::{ControllerError, ControllerResult};
pub use manager::{AsgManager, PoolManager};
pub use task_store::TaskStore;
