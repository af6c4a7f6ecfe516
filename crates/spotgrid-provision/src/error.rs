//! Provisioning error types.

use thiserror::Error;

use spotgrid_cloud::CloudError;

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("no zone has both a subnet and a recommended instance type")]
    NoEligibleZones,

    #[error("instance {id} entered {state} before running")]
    InstanceLost { id: String, state: String },
}
