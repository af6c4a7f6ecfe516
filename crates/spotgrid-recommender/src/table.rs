//! Static recommendation table.
//!
//! ```toml
//! [[recommendations.eu-west-1a]]
//! instanceTypeName = "m5.xlarge"
//! currentPrice = "0.0612"
//! onDemandPrice = "0.214"
//! suggestedBidPrice = "0.214"
//! costScore = 0.9
//! stabilityScore = 0.6
//! ```
//!
//! The table is keyed by zone only; the same candidates are served for
//! every region and baseline type. Other top-level tables in the file are
//! ignored, so it can share a file with a simulated fleet seed.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use spotgrid_core::Recommendations;

use crate::Recommender;
use crate::error::{RecommendError, RecommendResult};

#[derive(Debug, Default, Deserialize)]
struct TableFile {
    #[serde(default)]
    recommendations: Recommendations,
}

/// Recommender that serves a fixed zone → candidates table.
#[derive(Debug, Clone, Default)]
pub struct StaticRecommender {
    table: Recommendations,
}

impl StaticRecommender {
    pub fn new(table: Recommendations) -> Self {
        Self { table }
    }

    pub fn from_file(path: &Path) -> RecommendResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RecommendError::Table(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> RecommendResult<Self> {
        let file: TableFile =
            toml::from_str(content).map_err(|e| RecommendError::Table(e.to_string()))?;
        Ok(Self::new(file.recommendations))
    }
}

#[async_trait]
impl Recommender for StaticRecommender {
    async fn recommend(
        &self,
        region: &str,
        zones: &[String],
        base_instance_type: &str,
    ) -> RecommendResult<Recommendations> {
        let out: Recommendations = zones
            .iter()
            .filter_map(|zone| self.table.get(zone).map(|c| (zone.clone(), c.clone())))
            .collect();
        debug!(
            region,
            base_instance_type,
            requested = zones.len(),
            served = out.len(),
            "static recommendations"
        );
        Ok(out)
    }
}
