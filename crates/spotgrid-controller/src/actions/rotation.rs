//! Launch-configuration rotation.
//!
//! After every action the group is pointed at a configuration that
//! requests the currently best spot type. The first rotation preserves the
//! group's pristine configuration as `<group>-ht-orig`; rotations then
//! alternate between `<group>-ht-1` and `<group>-ht-2` so the previous
//! slot can be deleted once the group has moved off it.

use std::collections::HashSet;

use tracing::{debug, info};

use spotgrid_core::{GroupUpdate, InstanceTypeInfo, Recommendations, naming, sort_by_cost_score};
use spotgrid_provision::spot_bid;

use crate::error::{ControllerError, ControllerResult};
use crate::manager::AsgManager;

/// Pick the type a rotation should switch to.
///
/// Types recommended in every zone with a spot price below on-demand win,
/// best cost score first as ranked in the first zone. Otherwise the best
/// type of the first zone (in `zones` order) that has any candidates.
pub fn choose_rotation_type(
    zones: &[String],
    recommendations: &Recommendations,
) -> Option<InstanceTypeInfo> {
    let lists: Vec<&Vec<InstanceTypeInfo>> = zones
        .iter()
        .filter_map(|z| recommendations.get(z))
        .collect();
    let first = lists.iter().find(|l| !l.is_empty())?;

    let everywhere = lists.len() == zones.len();
    let mut common: Vec<InstanceTypeInfo> = if everywhere {
        let per_zone: Vec<HashSet<&str>> = lists
            .iter()
            .map(|l| {
                l.iter()
                    .filter(|c| c.spot_below_on_demand())
                    .map(|c| c.instance_type_name.as_str())
                    .collect()
            })
            .collect();
        first
            .iter()
            .filter(|c| {
                per_zone
                    .iter()
                    .all(|names| names.contains(c.instance_type_name.as_str()))
            })
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    if common.is_empty() {
        common = first.to_vec();
    }
    sort_by_cost_score(&mut common);
    common.into_iter().next()
}

impl AsgManager {
    /// Point the group at a rotation slot for the best current candidate.
    ///
    /// The slot's bid is [`spot_bid`], the suggested bid capped at the
    /// on-demand price, the same bid the provisioner places.
    pub(crate) async fn rotate_launch_configuration(&self, group_name: &str) -> ControllerResult<()> {
        let group = self.describe_group(group_name).await?;
        let current = self.launch_configuration(&group.launch_configuration).await?;

        let original_name = naming::original(group_name);
        let base = match self
            .gateway
            .describe_launch_configuration(&original_name)
            .await?
        {
            Some(original) => original.instance_type,
            None => {
                let original =
                    current.derive(&original_name, &current.instance_type, current.spot_price.clone());
                self.gateway.create_launch_configuration(&original).await?;
                info!(group = %group_name, launch_configuration = %original_name, "preserved original launch configuration");
                original.instance_type
            }
        };

        let recommendations = self
            .recommender
            .recommend(&self.region, &group.availability_zones, &base)
            .await?;
        let chosen = choose_rotation_type(&group.availability_zones, &recommendations).ok_or_else(
            || ControllerError::NoCandidates {
                group: group_name.to_string(),
                zone: group.availability_zones.join(","),
            },
        )?;
        let bid = spot_bid(&chosen);

        if naming::is_rotation_slot(group_name, &current.name)
            && current.instance_type == chosen.instance_type_name
            && current.spot_price.as_deref() == Some(bid.as_str())
        {
            debug!(
                group = %group_name,
                launch_configuration = %current.name,
                "launch configuration already current"
            );
            return Ok(());
        }

        let next_name = naming::next_slot(group_name, &current.name);
        if self
            .gateway
            .describe_launch_configuration(&next_name)
            .await?
            .is_some()
        {
            debug!(group = %group_name, launch_configuration = %next_name, "deleting stale rotation slot");
            self.gateway.delete_launch_configuration(&next_name).await?;
        }

        let next = current.derive(&next_name, &chosen.instance_type_name, Some(bid));
        self.gateway.create_launch_configuration(&next).await?;
        self.gateway
            .update_group(&GroupUpdate::new(group_name).launch_configuration(&next_name))
            .await?;
        info!(
            group = %group_name,
            launch_configuration = %next_name,
            instance_type = %chosen.instance_type_name,
            "rotated launch configuration"
        );

        if naming::is_rotation_slot(group_name, &current.name) {
            self.gateway
                .delete_launch_configuration(&current.name)
                .await?;
            debug!(group = %group_name, launch_configuration = %current.name, "deleted previous rotation slot");
        }
        Ok(())
    }
}
