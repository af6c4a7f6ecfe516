//! Controller error types.

use thiserror::Error;

use spotgrid_cloud::CloudError;
use spotgrid_provision::ProvisionError;
use spotgrid_recommender::RecommendError;

pub type ControllerResult<T> = Result<T, ControllerError>;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Recommend(#[from] RecommendError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// The group vanished between classification and execution.
    #[error("group {0} no longer exists")]
    GroupDeleted(String),

    #[error("launch configuration {0} not found")]
    LaunchConfigurationMissing(String),

    #[error("group {0} has no subnets")]
    NoSubnets(String),

    #[error("no instance type recommended for group {group} in {zone}")]
    NoCandidates { group: String, zone: String },
}
