//! Pool manager: the cloud-facing half of the controller.
//!
//! [`PoolManager`] is what the collector and workers see: two passes that
//! turn live cloud state into tasks, and one entry point that executes a
//! task. [`AsgManager`] implements it over a [`CloudGateway`] and a
//! [`Recommender`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use spotgrid_cloud::CloudGateway;
use spotgrid_core::{
    ActionsConfig, FleetConfig, LaunchConfiguration, ManagedGroup, ManagedTag, PoolAction,
    VmPoolTask, naming,
};
use spotgrid_provision::SpotProvisioner;
use spotgrid_recommender::Recommender;

use crate::classifier::{classify, is_managed, is_stable};
use crate::error::{ControllerError, ControllerResult};
use crate::snapshot::{instance_type_state, unmatched_spot_signatures};

/// Observes and mutates managed groups.
#[async_trait]
pub trait PoolManager: Send + Sync {
    /// Fast pass: classify every managed group.
    async fn check_pools(&self) -> ControllerResult<Vec<VmPoolTask>>;

    /// Slow pass: flag stable groups running unrecommended spot types.
    async fn reevaluate_pools(&self) -> ControllerResult<Vec<VmPoolTask>>;

    /// Execute one task, then rotate the group's launch configuration.
    async fn update_pool(&self, task: &VmPoolTask) -> ControllerResult<()>;
}

pub struct AsgManager {
    pub(crate) gateway: Arc<dyn CloudGateway>,
    pub(crate) recommender: Arc<dyn Recommender>,
    pub(crate) provisioner: SpotProvisioner,
    pub(crate) region: String,
    pub(crate) managed_tag: ManagedTag,
    pub(crate) actions: ActionsConfig,
    pub(crate) cleanup_launch_configurations: bool,
}

impl AsgManager {
    pub fn new(
        gateway: Arc<dyn CloudGateway>,
        recommender: Arc<dyn Recommender>,
        config: &FleetConfig,
    ) -> Self {
        Self {
            provisioner: SpotProvisioner::new(gateway.clone(), config.provisioner.poll_interval()),
            gateway,
            recommender,
            region: config.controller.region.clone(),
            managed_tag: config.controller.managed_tag.clone(),
            actions: config.actions.clone(),
            cleanup_launch_configurations: config.controller.cleanup_launch_configurations,
        }
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.actions.poll_interval()
    }

    pub(crate) async fn describe_group(&self, name: &str) -> ControllerResult<ManagedGroup> {
        self.gateway
            .describe_group(name)
            .await?
            .ok_or_else(|| ControllerError::GroupDeleted(name.to_string()))
    }

    pub(crate) async fn launch_configuration(
        &self,
        name: &str,
    ) -> ControllerResult<LaunchConfiguration> {
        self.gateway
            .describe_launch_configuration(name)
            .await?
            .ok_or_else(|| ControllerError::LaunchConfigurationMissing(name.to_string()))
    }

    /// The group's baseline instance type: the preserved original
    /// configuration's if it exists, else the current configuration's.
    pub(crate) async fn base_instance_type(&self, group: &ManagedGroup) -> ControllerResult<String> {
        let original = naming::original(&group.name);
        if let Some(lc) = self.gateway.describe_launch_configuration(&original).await? {
            return Ok(lc.instance_type);
        }
        Ok(self
            .launch_configuration(&group.launch_configuration)
            .await?
            .instance_type)
    }

    /// Whether a stable group runs a spot type the recommender no longer
    /// lists for its zone.
    async fn needs_rebalancing(&self, group: &ManagedGroup) -> ControllerResult<bool> {
        let snapshot =
            instance_type_state(self.gateway.as_ref(), &group.name, &group.instance_ids()).await?;
        let base = self.base_instance_type(group).await?;
        let recommendations = self
            .recommender
            .recommend(&self.region, &group.availability_zones, &base)
            .await?;

        let unmatched = unmatched_spot_signatures(&snapshot, &recommendations);
        for sig in &unmatched {
            info!(group = %group.name, signature = %sig, "instance type is not recommended");
        }
        Ok(!unmatched.is_empty())
    }

    fn new_task(group: &str, action: PoolAction) -> VmPoolTask {
        let task = VmPoolTask::new(Uuid::new_v4().to_string(), group, action);
        info!(group, task_id = %task.task_id, %action, "created task");
        task
    }
}

#[async_trait]
impl PoolManager for AsgManager {
    async fn check_pools(&self) -> ControllerResult<Vec<VmPoolTask>> {
        let groups = self.gateway.describe_groups().await?;
        debug!(groups = groups.len(), "describing groups");

        let tasks = groups
            .iter()
            .filter(|g| is_managed(g, &self.managed_tag))
            .filter_map(|g| {
                debug!(
                    group = %g.name,
                    desired = g.desired_capacity,
                    members = g.instances.len(),
                    pending = g.pending_count(),
                    terminating = g.terminating_count(),
                    "classifying group"
                );
                classify(g).map(|action| Self::new_task(&g.name, action))
            })
            .collect();
        Ok(tasks)
    }

    async fn reevaluate_pools(&self) -> ControllerResult<Vec<VmPoolTask>> {
        let groups = self.gateway.describe_groups().await?;
        let mut managed = HashSet::new();
        let mut tasks = Vec::new();

        for group in groups.iter().filter(|g| is_managed(g, &self.managed_tag)) {
            managed.insert(group.name.clone());
            if !is_stable(group) || group.instances.is_empty() {
                continue;
            }
            match self.needs_rebalancing(group).await {
                Ok(true) => tasks.push(Self::new_task(&group.name, PoolAction::Rebalancing)),
                Ok(false) => debug!(group = %group.name, "group matches recommendations"),
                Err(e) => warn!(group = %group.name, error = %e, "reevaluation failed, skipping group"),
            }
        }

        if self.cleanup_launch_configurations {
            self.cleanup_launch_configurations(&managed, &groups).await;
        }
        Ok(tasks)
    }

    async fn update_pool(&self, task: &VmPoolTask) -> ControllerResult<()> {
        let group = self.describe_group(&task.group_name).await?;
        info!(
            group = %group.name,
            task_id = %task.task_id,
            action = %task.action,
            "updating pool"
        );

        match task.action {
            PoolAction::Initializing => self.initialize(&group).await?,
            PoolAction::Upscaling => self.upscale(&group).await?,
            PoolAction::Downscaling => self.downscale(&group).await?,
            PoolAction::Rebalancing => self.rebalance(&group).await?,
        }

        self.rotate_launch_configuration(&group.name).await
    }
}
