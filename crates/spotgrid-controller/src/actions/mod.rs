//! Action executors.
//!
//! Each executor is a method on [`AsgManager`]; [`PoolManager::update_pool`]
//! picks one by task action and always follows it with a launch
//! configuration rotation.
//!
//! [`PoolManager::update_pool`]: crate::manager::PoolManager::update_pool

mod cleanup;
mod initialize;
mod rebalance;
mod rotation;
mod scale;

pub use rotation::choose_rotation_type;

use std::collections::BTreeMap;

use tracing::debug;

use spotgrid_core::{ManagedGroup, Zone};

use crate::error::{ControllerError, ControllerResult};
use crate::manager::AsgManager;

impl AsgManager {
    /// The group's subnets grouped by availability zone, in the order the
    /// group lists them.
    pub(crate) async fn subnets_by_zone(
        &self,
        group: &ManagedGroup,
    ) -> ControllerResult<BTreeMap<Zone, Vec<String>>> {
        if group.subnet_ids.is_empty() {
            return Err(ControllerError::NoSubnets(group.name.clone()));
        }
        let subnets = self.gateway.describe_subnets(&group.subnet_ids).await?;

        let mut by_zone: BTreeMap<Zone, Vec<String>> = BTreeMap::new();
        for subnet in subnets {
            by_zone
                .entry(subnet.availability_zone)
                .or_default()
                .push(subnet.id);
        }
        Ok(by_zone)
    }

    /// Poll the group until none of its members is pending.
    pub(crate) async fn wait_until_settled(&self, group: &str) -> ControllerResult<()> {
        loop {
            let current = self.describe_group(group).await?;
            let pending = current.pending_count();
            if pending == 0 {
                return Ok(());
            }
            debug!(%group, pending, "waiting for pending instances");
            tokio::time::sleep(self.poll_interval()).await;
        }
    }
}
