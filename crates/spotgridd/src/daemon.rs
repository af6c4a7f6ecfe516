//! Daemon wiring: config, backends, controller lifecycle.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::info;

use spotgrid_cloud::{CloudGateway, FleetSeed, SimulatedCloud};
use spotgrid_controller::{AsgManager, FleetController};
use spotgrid_core::{CloudBackend, FleetConfig, RecommenderBackend};
use spotgrid_recommender::{HttpRecommender, Recommender, StaticRecommender};

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub check_interval: Option<String>,
    pub workers: Option<usize>,
}

pub fn load_config(path: &Path, overrides: Overrides) -> anyhow::Result<FleetConfig> {
    let mut config = FleetConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    if let Some(interval) = overrides.check_interval {
        config.controller.check_interval = interval;
    }
    if let Some(workers) = overrides.workers {
        config.controller.workers = workers;
    }
    config.validate()?;
    Ok(config)
}

/// Resolve a path from the config file relative to the file's directory.
fn relative_to(config_path: &Path, path: &Path) -> std::path::PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    config_path
        .parent()
        .map(|dir| dir.join(path))
        .unwrap_or_else(|| path.to_path_buf())
}

pub fn build_cloud(config: &FleetConfig, config_path: &Path) -> anyhow::Result<Arc<dyn CloudGateway>> {
    match config.cloud.backend {
        CloudBackend::Simulated => {
            let cloud = match &config.cloud.fleet {
                Some(fleet) => {
                    let path = relative_to(config_path, fleet);
                    let seed = FleetSeed::from_file(&path)
                        .with_context(|| format!("loading fleet seed {}", path.display()))?;
                    info!(path = %path.display(), groups = seed.groups.len(), "simulated fleet seeded");
                    SimulatedCloud::from_seed(seed)
                }
                None => SimulatedCloud::new(),
            };
            Ok(Arc::new(cloud))
        }
    }
}

pub fn build_recommender(
    config: &FleetConfig,
    config_path: &Path,
) -> anyhow::Result<Arc<dyn Recommender>> {
    let rec = &config.recommender;
    match rec.backend {
        RecommenderBackend::Http => {
            let Some(url) = &rec.url else {
                bail!("recommender.url is required for the http backend");
            };
            info!(%url, "using http recommender");
            Ok(Arc::new(HttpRecommender::new(url, rec.timeout())?))
        }
        RecommenderBackend::Static => {
            let Some(table) = &rec.table else {
                bail!("recommender.table is required for the static backend");
            };
            let path = relative_to(config_path, table);
            info!(path = %path.display(), "using static recommender");
            Ok(Arc::new(StaticRecommender::from_file(&path)?))
        }
    }
}

pub async fn run(config_path: &Path, overrides: Overrides) -> anyhow::Result<()> {
    let config = load_config(config_path, overrides)?;
    info!(region = %config.controller.region, "spotgrid daemon starting");

    let gateway = build_cloud(&config, config_path)?;
    let recommender = build_recommender(&config, config_path)?;
    let manager = Arc::new(AsgManager::new(gateway, recommender, &config));

    let controller = FleetController::start(manager, &config.controller);

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("shutdown signal received");

    controller.shutdown().await;
    info!("spotgrid daemon stopped");
    Ok(())
}
