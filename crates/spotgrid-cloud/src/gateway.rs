//! The cloud gateway trait.

use async_trait::async_trait;

use spotgrid_core::{
    GroupUpdate, InstanceDescription, InstanceStatus, LaunchConfiguration, ManagedGroup,
    SpotInstanceRequest, SpotRequestSpec, Subnet,
};

use crate::error::CloudResult;

/// Describe and mutate operations on groups, launch configurations,
/// subnets, spot requests and instances.
///
/// Implementations handle pagination internally and surface every failure
/// as a [`CloudError`](crate::CloudError). They must not retry in-line.
#[async_trait]
pub trait CloudGateway: Send + Sync {
    /// Describe every auto-scaling group in the region.
    async fn describe_groups(&self) -> CloudResult<Vec<ManagedGroup>>;

    /// Describe one group. `Ok(None)` means the group no longer exists.
    async fn describe_group(&self, name: &str) -> CloudResult<Option<ManagedGroup>>;

    async fn update_group(&self, update: &GroupUpdate) -> CloudResult<()>;

    /// Describe one launch configuration. `Ok(None)` if absent.
    async fn describe_launch_configuration(
        &self,
        name: &str,
    ) -> CloudResult<Option<LaunchConfiguration>>;

    async fn list_launch_configurations(&self) -> CloudResult<Vec<LaunchConfiguration>>;

    async fn create_launch_configuration(&self, config: &LaunchConfiguration) -> CloudResult<()>;

    async fn delete_launch_configuration(&self, name: &str) -> CloudResult<()>;

    async fn describe_subnets(&self, ids: &[String]) -> CloudResult<Vec<Subnet>>;

    /// Issue spot requests for `spec.instance_count` instances and return
    /// the request ids.
    async fn request_spot_instances(&self, spec: &SpotRequestSpec) -> CloudResult<Vec<String>>;

    async fn describe_spot_requests(&self, ids: &[String])
    -> CloudResult<Vec<SpotInstanceRequest>>;

    async fn describe_instances(&self, ids: &[String]) -> CloudResult<Vec<InstanceDescription>>;

    async fn describe_instance_status(&self, ids: &[String]) -> CloudResult<Vec<InstanceStatus>>;

    /// Attach running instances to a group, raising its desired capacity.
    async fn attach_instances(&self, group: &str, ids: &[String]) -> CloudResult<()>;

    /// Detach member instances from a group, optionally lowering its
    /// desired capacity by the number detached.
    async fn detach_instances(
        &self,
        group: &str,
        ids: &[String],
        decrement_desired: bool,
    ) -> CloudResult<()>;

    async fn terminate_instances(&self, ids: &[String]) -> CloudResult<()>;
}
