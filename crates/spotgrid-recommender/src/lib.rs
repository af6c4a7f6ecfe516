//! spotgrid-recommender — instance-type recommendations.
//!
//! The controller asks a [`Recommender`] which spot instance types to run
//! for a baseline type in a set of availability zones. Two backends:
//!
//! - [`HttpRecommender`] queries a recommendation service over HTTP/1.1
//! - [`StaticRecommender`] serves a fixed table loaded from TOML
//!
//! Both return [`Recommendations`](spotgrid_core::Recommendations): zone
//! to candidate list, in whatever order the backend produced. Callers sort
//! by cost score themselves.

pub mod client;
pub mod error;
pub mod table;

use async_trait::async_trait;

use spotgrid_core::Recommendations;

pub use client::HttpRecommender;
pub use error::{RecommendError, RecommendResult};
pub use table::StaticRecommender;

/// Source of cost-ranked instance-type candidates per availability zone.
#[async_trait]
pub trait Recommender: Send + Sync {
    /// Candidates for `base_instance_type` in each of `zones`.
    ///
    /// Zones the backend knows nothing about are omitted from the result
    /// rather than reported as errors.
    async fn recommend(
        &self,
        region: &str,
        zones: &[String],
        base_instance_type: &str,
    ) -> RecommendResult<Recommendations>;
}
