//! Orphaned launch-configuration cleanup.
//!
//! Controller-created configurations (`-ht-orig`, `-ht-1`, `-ht-2`) whose
//! owner group is no longer managed are deleted, unless a group still
//! launches from them. Failures are logged; they never fail the pass.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use spotgrid_core::{ManagedGroup, naming};

use crate::manager::AsgManager;

impl AsgManager {
    pub(crate) async fn cleanup_launch_configurations(
        &self,
        managed: &HashSet<String>,
        groups: &[ManagedGroup],
    ) {
        let configurations = match self.gateway.list_launch_configurations().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "cannot list launch configurations, skipping cleanup");
                return;
            }
        };
        debug!(count = configurations.len(), "launch configurations found");

        let referenced: HashSet<&str> = groups
            .iter()
            .map(|g| g.launch_configuration.as_str())
            .collect();

        for lc in configurations {
            let Some(owner) = naming::owner(&lc.name) else {
                continue;
            };
            if managed.contains(owner) || referenced.contains(lc.name.as_str()) {
                continue;
            }
            match self.gateway.delete_launch_configuration(&lc.name).await {
                Ok(()) => info!(launch_configuration = %lc.name, owner, "deleted orphaned launch configuration"),
                Err(e) => warn!(launch_configuration = %lc.name, error = %e, "cannot delete launch configuration"),
            }
        }
    }
}
