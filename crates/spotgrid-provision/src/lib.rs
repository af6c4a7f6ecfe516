//! spotgrid-provision — turning a target count into running spot capacity.
//!
//! # Components
//!
//! - **`selector`**: pure planning: pick a diversified set of instance
//!   types per zone and apportion the target across zones, subnets and types
//! - **`provisioner`**: issue one spot request per plan cell, then poll
//!   until every request has an instance and every instance is running
//!
//! ```text
//!   target ──► apportion over zones ──► apportion over subnets
//!                    │                          │
//!              select_types(zone)        apportion over types
//!                    └──────────► ProvisionPlan ◄┘
//!                                      │
//!                         SpotProvisioner::request_and_wait
//!                                      │
//!                               Vec<InstanceId>
//! ```

pub mod error;
pub mod provisioner;
pub mod selector;

pub use error::{ProvisionError, ProvisionResult};
pub use provisioner::{SpotProvisioner, spot_bid};
pub use selector::{PlanCell, ProvisionPlan, apportion, build_plan, select_types, type_count};
