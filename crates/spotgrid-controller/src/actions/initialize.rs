//! Initialize: replace a freshly sized group's capacity with spot capacity.

use tracing::{info, warn};

use spotgrid_core::{GroupUpdate, LaunchTemplate, ManagedGroup};
use spotgrid_provision::{ProvisionError, ProvisionPlan, build_plan};

use crate::error::{ControllerError, ControllerResult};
use crate::manager::AsgManager;

impl AsgManager {
    /// Plan `desired` spot instances across the group's zones, zero the
    /// group so its own scaling stops launching instances, provision and
    /// attach the plan, then restore the original min size.
    ///
    /// Every read happens before the group is zeroed. A failure after
    /// zeroing puts desired and min back to their original values, so the
    /// next check pass classifies the group as initializing again.
    pub(crate) async fn initialize(&self, group: &ManagedGroup) -> ControllerResult<()> {
        let desired = group.desired_capacity;
        let original_min = group.min_size;
        info!(group = %group.name, desired, "initializing group");

        let launch_config = self.launch_configuration(&group.launch_configuration).await?;
        let base = self.base_instance_type(group).await?;

        let subnets = self.subnets_by_zone(group).await?;
        let zones: Vec<String> = subnets.keys().cloned().collect();
        let recommendations = self
            .recommender
            .recommend(&self.region, &zones, &base)
            .await?;

        let plan = build_plan(desired, &subnets, &recommendations).map_err(|e| match e {
            ProvisionError::NoEligibleZones => ControllerError::NoCandidates {
                group: group.name.clone(),
                zone: zones.join(","),
            },
            other => other.into(),
        })?;

        self.gateway
            .update_group(&GroupUpdate::new(&group.name).desired_capacity(0).min_size(0))
            .await?;
        info!(group = %group.name, "group scaled to zero");

        if let Err(e) = self
            .fill_with_spot(group, &plan, &launch_config.template(), original_min)
            .await
        {
            warn!(group = %group.name, error = %e, "initialize failed, restoring capacity");
            let restore = GroupUpdate::new(&group.name)
                .min_size(original_min)
                .desired_capacity(desired);
            if let Err(restore_err) = self.gateway.update_group(&restore).await {
                warn!(group = %group.name, error = %restore_err, "failed to restore group capacity");
            }
            return Err(e);
        }

        self.wait_until_settled(&group.name).await?;
        info!(group = %group.name, "group initialized");
        Ok(())
    }

    async fn fill_with_spot(
        &self,
        group: &ManagedGroup,
        plan: &ProvisionPlan,
        template: &LaunchTemplate,
        original_min: u32,
    ) -> ControllerResult<()> {
        let instance_ids = self.provisioner.request_and_wait(plan, template).await?;
        info!(group = %group.name, instances = instance_ids.len(), "spot instances running");

        if !instance_ids.is_empty() {
            self.gateway
                .attach_instances(&group.name, &instance_ids)
                .await?;
        }
        self.gateway
            .update_group(&GroupUpdate::new(&group.name).min_size(original_min))
            .await?;
        Ok(())
    }
}
