//! Error types for cloud gateway calls.

use thiserror::Error;

/// Result type alias for cloud gateway calls.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors a cloud gateway call can return.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("auto-scaling group not found: {0}")]
    GroupNotFound(String),

    #[error("launch configuration not found: {0}")]
    LaunchConfigurationNotFound(String),

    #[error("launch configuration already exists: {0}")]
    LaunchConfigurationExists(String),

    #[error("launch configuration still in use: {0}")]
    LaunchConfigurationInUse(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("spot request not found: {0}")]
    SpotRequestNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("cloud request failed: {0}")]
    Request(String),

    #[error("failed to load fleet seed: {0}")]
    Seed(String),
}
