//! spotgrid-core — shared types for the spot fleet controller.
//!
//! - [`config`] parses `spotgrid.toml` into a typed [`FleetConfig`].
//! - [`types`] holds the cloud-side model (groups, launch configurations,
//!   spot requests), recommender output and controller tasks.
//! - [`naming`] encodes the launch-configuration naming convention, the
//!   only persisted controller state.

pub mod config;
pub mod duration;
pub mod naming;
pub mod types;

pub use config::{
    ActionsConfig, CloudBackend, CloudConfig, ConfigError, ControllerConfig, FleetConfig, ManagedTag,
    ProvisionerConfig, RecommenderBackend, RecommenderConfig,
};
pub use duration::parse_duration;
pub use types::*;
