//! Rebalance: replace spot instances whose type is no longer recommended.
//!
//! Only the instances of an unmatched signature are touched. Replacements
//! are provisioned first; the old instances are then detached (lowering
//! desired capacity) before they are terminated, so the group never
//! launches its own replacements for them.

use std::collections::BTreeMap;

use tracing::info;

use spotgrid_core::{GroupUpdate, InstanceTypeState, LaunchTemplate, ManagedGroup, Recommendations};
use spotgrid_provision::build_plan;

use crate::error::{ControllerError, ControllerResult};
use crate::manager::AsgManager;
use crate::snapshot::{instance_type_state, unmatched_spot_signatures};

impl AsgManager {
    pub(crate) async fn rebalance(&self, group: &ManagedGroup) -> ControllerResult<()> {
        let snapshot =
            instance_type_state(self.gateway.as_ref(), &group.name, &group.instance_ids()).await?;
        let base = self.base_instance_type(group).await?;
        let recommendations = self
            .recommender
            .recommend(&self.region, &group.availability_zones, &base)
            .await?;

        let unmatched = unmatched_spot_signatures(&snapshot, &recommendations);
        if unmatched.is_empty() {
            info!(group = %group.name, "nothing to rebalance");
            return Ok(());
        }

        let template = self
            .launch_configuration(&group.launch_configuration)
            .await?
            .template();
        let subnets = self.subnets_by_zone(group).await?;

        for signature in unmatched {
            let Some(instance_ids) = snapshot.get(&signature) else {
                continue;
            };
            self.replace_signature(
                group,
                &signature,
                instance_ids,
                &subnets,
                &recommendations,
                &template,
            )
            .await?;
        }
        Ok(())
    }

    async fn replace_signature(
        &self,
        group: &ManagedGroup,
        signature: &InstanceTypeState,
        instance_ids: &[String],
        subnets: &BTreeMap<String, Vec<String>>,
        recommendations: &Recommendations,
        template: &LaunchTemplate,
    ) -> ControllerResult<()> {
        let zone = &signature.availability_zone;
        let count = instance_ids.len() as u32;
        info!(
            group = %group.name,
            %signature,
            instances = count,
            "rebalancing instances"
        );

        let zone_subnets = subnets
            .get(zone)
            .cloned()
            .ok_or_else(|| ControllerError::NoSubnets(group.name.clone()))?;
        let candidates = recommendations
            .get(zone)
            .filter(|c| !c.is_empty())
            .cloned()
            .ok_or_else(|| ControllerError::NoCandidates {
                group: group.name.clone(),
                zone: zone.clone(),
            })?;

        let plan = build_plan(
            count,
            &BTreeMap::from([(zone.clone(), zone_subnets)]),
            &BTreeMap::from([(zone.clone(), candidates)]),
        )?;
        let replacements = self.provisioner.request_and_wait(&plan, template).await?;

        let current = self.describe_group(&group.name).await?;
        let original_min = current.min_size;
        self.gateway
            .update_group(
                &GroupUpdate::new(&group.name).min_size(original_min.saturating_sub(count)),
            )
            .await?;

        let old: Vec<String> = instance_ids.to_vec();
        self.gateway
            .detach_instances(&group.name, &old, true)
            .await?;
        self.gateway.terminate_instances(&old).await?;
        info!(group = %group.name, instances = ?old, "detached and terminated instances");

        self.gateway
            .attach_instances(&group.name, &replacements)
            .await?;
        self.gateway
            .update_group(&GroupUpdate::new(&group.name).min_size(original_min))
            .await?;

        self.wait_until_settled(&group.name).await?;
        info!(group = %group.name, replacements = ?replacements, "signature rebalanced");
        Ok(())
    }
}
