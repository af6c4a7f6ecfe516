//! Recommender error types.

use std::time::Duration;

use thiserror::Error;

pub type RecommendResult<T> = Result<T, RecommendError>;

#[derive(Debug, Error)]
pub enum RecommendError {
    #[error("invalid recommender url {0}")]
    InvalidUrl(String),

    #[error("recommender request failed: {0}")]
    Request(String),

    #[error("recommender returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("recommender timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to decode recommendations: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to load recommendation table: {0}")]
    Table(String),
}
