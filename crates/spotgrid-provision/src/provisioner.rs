//! Spot request-and-wait.
//!
//! Issues every spot request of a [`ProvisionPlan`], then polls on a fixed
//! interval, first until each request resolves to an instance and then
//! until each instance is running. There is no deadline; callers needing
//! one wrap the future. Any cloud error aborts the run. Requests already
//! issued are left as they are.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use spotgrid_cloud::CloudGateway;
use spotgrid_core::{InstanceId, InstanceState, InstanceTypeInfo, LaunchTemplate, SpotRequestSpec};

use crate::error::{ProvisionError, ProvisionResult};
use crate::selector::ProvisionPlan;

/// The bid placed for a candidate: its suggested bid, capped at the
/// on-demand price. Falls back to the on-demand price when either value
/// does not parse.
pub fn spot_bid(info: &InstanceTypeInfo) -> String {
    match (
        info.suggested_bid_price.parse::<f64>(),
        info.on_demand_price.parse::<f64>(),
    ) {
        (Ok(suggested), Ok(on_demand)) if suggested <= on_demand => {
            info.suggested_bid_price.clone()
        }
        _ => info.on_demand_price.clone(),
    }
}

pub struct SpotProvisioner {
    gateway: Arc<dyn CloudGateway>,
    poll_interval: Duration,
}

impl SpotProvisioner {
    pub fn new(gateway: Arc<dyn CloudGateway>, poll_interval: Duration) -> Self {
        Self {
            gateway,
            poll_interval,
        }
    }

    /// Request the plan's capacity and wait until all of it is running.
    ///
    /// Returns the ids of the new instances, one per requested instance.
    pub async fn request_and_wait(
        &self,
        plan: &ProvisionPlan,
        template: &LaunchTemplate,
    ) -> ProvisionResult<Vec<InstanceId>> {
        if plan.is_empty() {
            return Ok(Vec::new());
        }

        let request_ids = self.request(plan, template).await?;
        let instance_ids = self.wait_for_fulfilment(&request_ids).await?;
        self.wait_for_running(&instance_ids).await?;
        Ok(instance_ids)
    }

    async fn request(
        &self,
        plan: &ProvisionPlan,
        template: &LaunchTemplate,
    ) -> ProvisionResult<Vec<String>> {
        let mut request_ids = Vec::with_capacity(plan.total() as usize);
        for cell in &plan.cells {
            let spec = SpotRequestSpec {
                instance_count: cell.count,
                instance_type: cell.instance_type.instance_type_name.clone(),
                subnet_id: cell.subnet_id.clone(),
                spot_price: spot_bid(&cell.instance_type),
                template: template.clone(),
            };
            let ids = self.gateway.request_spot_instances(&spec).await?;
            info!(
                zone = %cell.zone,
                subnet = %cell.subnet_id,
                instance_type = %spec.instance_type,
                count = cell.count,
                bid = %spec.spot_price,
                "requested spot instances"
            );
            request_ids.extend(ids);
        }
        Ok(request_ids)
    }

    async fn wait_for_fulfilment(&self, request_ids: &[String]) -> ProvisionResult<Vec<InstanceId>> {
        loop {
            let requests = self.gateway.describe_spot_requests(request_ids).await?;
            let instance_ids: Vec<InstanceId> = requests
                .iter()
                .filter_map(|r| r.instance_id.clone())
                .filter(|id| !id.is_empty())
                .collect();

            if instance_ids.len() == request_ids.len() {
                debug!(instances = instance_ids.len(), "spot requests fulfilled");
                return Ok(instance_ids);
            }
            debug!(
                fulfilled = instance_ids.len(),
                total = request_ids.len(),
                "waiting for spot fulfilment"
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn wait_for_running(&self, instance_ids: &[InstanceId]) -> ProvisionResult<()> {
        loop {
            let statuses = self.gateway.describe_instance_status(instance_ids).await?;

            if let Some(lost) = statuses.iter().find(|s| {
                matches!(
                    s.state,
                    InstanceState::ShuttingDown | InstanceState::Terminated
                )
            }) {
                return Err(ProvisionError::InstanceLost {
                    id: lost.id.clone(),
                    state: format!("{:?}", lost.state),
                });
            }

            let running = statuses
                .iter()
                .filter(|s| s.state == InstanceState::Running)
                .count();
            info!(running, total = instance_ids.len(), "waiting for instances");

            if running == instance_ids.len() {
                return Ok(());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spotgrid_cloud::SimulatedCloud;
    use spotgrid_core::{LaunchConfiguration, Subnet};

    use crate::selector::PlanCell;

    fn info(name: &str, suggested: &str, on_demand: &str) -> InstanceTypeInfo {
        InstanceTypeInfo {
            instance_type_name: name.to_string(),
            current_price: "0.05".to_string(),
            on_demand_price: on_demand.to_string(),
            suggested_bid_price: suggested.to_string(),
            cost_score: 1.0,
            stability_score: 1.0,
        }
    }

    fn template() -> LaunchTemplate {
        LaunchConfiguration {
            name: "lc".to_string(),
            instance_type: "m4.xlarge".to_string(),
            spot_price: None,
            image_id: "ami-1".to_string(),
            security_groups: vec!["sg-1".to_string()],
            iam_instance_profile: None,
            key_name: None,
            user_data: None,
            ebs_optimized: false,
            associate_public_ip_address: None,
        }
        .template()
    }

    fn cloud() -> SimulatedCloud {
        let cloud = SimulatedCloud::new()
            .with_fulfilment_polls(2)
            .with_boot_polls(3);
        for (id, zone) in [("s-a", "a"), ("s-b", "b")] {
            cloud.add_subnet(Subnet {
                id: id.to_string(),
                availability_zone: zone.to_string(),
            });
        }
        cloud
    }

    fn plan() -> ProvisionPlan {
        ProvisionPlan {
            cells: vec![
                PlanCell {
                    zone: "a".to_string(),
                    subnet_id: "s-a".to_string(),
                    instance_type: info("m5.large", "0.1", "0.2"),
                    count: 2,
                },
                PlanCell {
                    zone: "b".to_string(),
                    subnet_id: "s-b".to_string(),
                    instance_type: info("c5.large", "0.1", "0.2"),
                    count: 1,
                },
            ],
        }
    }

    #[test]
    fn bid_is_capped_at_on_demand() {
        assert_eq!(spot_bid(&info("t", "0.1", "0.2")), "0.1");
        assert_eq!(spot_bid(&info("t", "0.3", "0.2")), "0.2");
        assert_eq!(spot_bid(&info("t", "", "0.2")), "0.2");
    }

    #[tokio::test(start_paused = true)]
    async fn waits_until_all_instances_run() {
        let cloud = cloud();
        let provisioner = SpotProvisioner::new(Arc::new(cloud.clone()), Duration::from_secs(1));

        let ids = provisioner.request_and_wait(&plan(), &template()).await.unwrap();

        assert_eq!(ids.len(), 3);
        for id in &ids {
            assert_eq!(cloud.instance(id).unwrap().state, InstanceState::Running);
        }
        let zones: Vec<_> = ids
            .iter()
            .map(|id| cloud.instance(id).unwrap().availability_zone)
            .collect();
        assert_eq!(zones.iter().filter(|z| *z == "a").count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_plan_makes_no_calls() {
        let cloud = cloud();
        let provisioner = SpotProvisioner::new(Arc::new(cloud.clone()), Duration::from_secs(1));
        let ids = provisioner
            .request_and_wait(&ProvisionPlan::default(), &template())
            .await
            .unwrap();
        assert!(ids.is_empty());
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cloud_error_aborts_without_cancelling() {
        let cloud = cloud();
        cloud.fail_next("describe_spot_requests");
        let provisioner = SpotProvisioner::new(Arc::new(cloud.clone()), Duration::from_secs(1));

        let err = provisioner
            .request_and_wait(&plan(), &template())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Cloud(_)));
        assert_eq!(cloud.spot_request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn request_error_stops_before_later_cells() {
        let cloud = cloud();
        let mut plan = plan();
        plan.cells[1].subnet_id = "s-missing".to_string();
        let provisioner = SpotProvisioner::new(Arc::new(cloud.clone()), Duration::from_secs(1));

        let err = provisioner.request_and_wait(&plan, &template()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Cloud(_)));
        assert_eq!(cloud.spot_request_count(), 2);
    }
}
