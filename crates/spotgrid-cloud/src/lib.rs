//! spotgrid-cloud — the cloud gateway seam.
//!
//! The controller never talks to a provider SDK directly. Every describe
//! and mutate call goes through [`CloudGateway`], which a provider backend
//! implements. Calls may fail transiently; callers retry only through
//! their own poll loops or the next collector tick.
//!
//! [`SimulatedCloud`] is an in-memory backend with eventually-consistent
//! spot fulfilment, used by tests and by the daemon's `simulated` backend.

pub mod error;
pub mod gateway;
pub mod simulated;

pub use error::{CloudError, CloudResult};
pub use gateway::CloudGateway;
pub use simulated::{FleetSeed, SimulatedCloud};
