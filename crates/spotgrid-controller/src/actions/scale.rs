//! Upscale and downscale observers.
//!
//! A group whose launch configuration already requests spot capacity
//! scales through the provider on its own; these executors only wait a
//! fixed number of poll intervals and log.

use tracing::info;

use spotgrid_core::ManagedGroup;

use crate::error::ControllerResult;
use crate::manager::AsgManager;

impl AsgManager {
    pub(crate) async fn upscale(&self, group: &ManagedGroup) -> ControllerResult<()> {
        info!(group = %group.name, "group is upscaling");
        self.observe(group, self.actions.upscale_wait_iterations).await;
        Ok(())
    }

    pub(crate) async fn downscale(&self, group: &ManagedGroup) -> ControllerResult<()> {
        info!(group = %group.name, "group is downscaling");
        self.observe(group, self.actions.downscale_wait_iterations).await;
        Ok(())
    }

    async fn observe(&self, group: &ManagedGroup, iterations: u32) {
        for iteration in 0..iterations {
            info!(group = %group.name, iteration, "updating group");
            tokio::time::sleep(self.poll_interval()).await;
        }
    }
}
