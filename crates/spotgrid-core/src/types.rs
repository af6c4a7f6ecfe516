//! Domain types shared by the spotgrid crates.
//!
//! The cloud-side types mirror what the cloud gateway returns. None of
//! them are owned by the controller: every pass re-reads them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of an auto-scaling group.
pub type GroupName = String;

/// Cloud instance identifier.
pub type InstanceId = String;

/// Availability zone name, e.g. `eu-west-1a`.
pub type Zone = String;

// ── Groups ────────────────────────────────────────────────────────

/// Snapshot of an auto-scaling group as described by the cloud.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagedGroup {
    pub name: GroupName,
    pub desired_capacity: u32,
    pub min_size: u32,
    pub max_size: u32,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Name of the launch configuration new instances are launched from.
    pub launch_configuration: String,
    #[serde(default)]
    pub instances: Vec<GroupInstance>,
    #[serde(default)]
    pub availability_zones: Vec<Zone>,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
}

/// A member instance of a group with its group lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupInstance {
    pub id: InstanceId,
    pub lifecycle_state: LifecycleState,
}

/// Group-level lifecycle of a member instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    InService,
    Terminating,
    Detaching,
    Standby,
}

impl ManagedGroup {
    /// Whether the group carries the tag `key=value`.
    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags.get(key).is_some_and(|v| v == value)
    }

    pub fn pending_count(&self) -> usize {
        self.count_in(LifecycleState::Pending)
    }

    pub fn terminating_count(&self) -> usize {
        self.count_in(LifecycleState::Terminating)
    }

    fn count_in(&self, state: LifecycleState) -> usize {
        self.instances
            .iter()
            .filter(|i| i.lifecycle_state == state)
            .count()
    }

    /// Ids of every member instance.
    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.instances.iter().map(|i| i.id.clone()).collect()
    }
}

/// Partial update of a group; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupUpdate {
    pub name: GroupName,
    pub desired_capacity: Option<u32>,
    pub min_size: Option<u32>,
    pub launch_configuration: Option<String>,
}

impl GroupUpdate {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn desired_capacity(mut self, desired: u32) -> Self {
        self.desired_capacity = Some(desired);
        self
    }

    pub fn min_size(mut self, min: u32) -> Self {
        self.min_size = Some(min);
        self
    }

    pub fn launch_configuration(mut self, name: &str) -> Self {
        self.launch_configuration = Some(name.to_string());
        self
    }
}

// ── Launch configurations ─────────────────────────────────────────

/// An immutable launch template attached to a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchConfiguration {
    pub name: String,
    pub instance_type: String,
    /// Maximum spot bid. `None` launches on-demand capacity.
    #[serde(default)]
    pub spot_price: Option<String>,
    pub image_id: String,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub iam_instance_profile: Option<String>,
    #[serde(default)]
    pub key_name: Option<String>,
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default)]
    pub ebs_optimized: bool,
    #[serde(default)]
    pub associate_public_ip_address: Option<bool>,
}

impl LaunchConfiguration {
    /// Copy this configuration under a new name with a different
    /// instance type and bid. Every other attribute is kept.
    pub fn derive(&self, name: &str, instance_type: &str, spot_price: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            instance_type: instance_type.to_string(),
            spot_price,
            ..self.clone()
        }
    }

    /// The attributes a spot request copies from this configuration.
    pub fn template(&self) -> LaunchTemplate {
        LaunchTemplate {
            image_id: self.image_id.clone(),
            security_groups: self.security_groups.clone(),
            iam_instance_profile: self.iam_instance_profile.clone(),
            key_name: self.key_name.clone(),
            user_data: self.user_data.clone(),
            ebs_optimized: self.ebs_optimized,
            associate_public_ip_address: self.associate_public_ip_address,
        }
    }
}

/// Launch attributes shared by every spot request of one provisioning run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchTemplate {
    pub image_id: String,
    pub security_groups: Vec<String>,
    pub iam_instance_profile: Option<String>,
    pub key_name: Option<String>,
    pub user_data: Option<String>,
    pub ebs_optimized: bool,
    pub associate_public_ip_address: Option<bool>,
}

// ── Network ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subnet {
    pub id: String,
    pub availability_zone: Zone,
}

// ── Instances and spot requests ───────────────────────────────────

/// Parameters of one spot capacity request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotRequestSpec {
    pub instance_count: u32,
    pub instance_type: String,
    pub subnet_id: String,
    pub spot_price: String,
    pub template: LaunchTemplate,
}

/// A spot request as described by the cloud.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpotInstanceRequest {
    pub id: String,
    pub instance_type: String,
    pub spot_price: String,
    /// Zone the instance was launched in, once fulfilled.
    pub launched_availability_zone: Option<Zone>,
    /// Set once the request has been fulfilled.
    pub instance_id: Option<InstanceId>,
}

/// A machine as described by the compute API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceDescription {
    pub id: InstanceId,
    pub instance_type: String,
    pub availability_zone: Zone,
    /// Present for spot-backed instances.
    pub spot_request_id: Option<String>,
    pub state: InstanceState,
}

/// Machine-level state, independent of group membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceStatus {
    pub id: InstanceId,
    pub state: InstanceState,
}

// ── Recommendations ───────────────────────────────────────────────

/// One recommended instance type for an availability zone.
///
/// Prices are kept as the decimal strings the recommender returns so bids
/// are passed through verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTypeInfo {
    pub instance_type_name: String,
    pub current_price: String,
    pub on_demand_price: String,
    pub suggested_bid_price: String,
    pub cost_score: f32,
    pub stability_score: f32,
}

impl InstanceTypeInfo {
    /// Whether the current spot price is strictly below on-demand.
    ///
    /// Unparseable prices never qualify.
    pub fn spot_below_on_demand(&self) -> bool {
        match (
            self.current_price.parse::<f64>(),
            self.on_demand_price.parse::<f64>(),
        ) {
            (Ok(spot), Ok(on_demand)) => spot < on_demand,
            _ => false,
        }
    }
}

/// Zone → candidate instance types.
pub type Recommendations = BTreeMap<Zone, Vec<InstanceTypeInfo>>;

/// Sort candidates best cost score first.
pub fn sort_by_cost_score(candidates: &mut [InstanceTypeInfo]) {
    candidates.sort_by(|a, b| b.cost_score.total_cmp(&a.cost_score));
}

// ── Snapshots ─────────────────────────────────────────────────────

/// Signature of a set of running instances: type, zone and bid.
///
/// `spot_bid_price == None` marks on-demand instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstanceTypeState {
    pub instance_type: String,
    pub availability_zone: Zone,
    pub spot_bid_price: Option<String>,
}

impl InstanceTypeState {
    pub fn is_spot(&self) -> bool {
        self.spot_bid_price.is_some()
    }
}

impl fmt::Display for InstanceTypeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.spot_bid_price {
            Some(bid) => write!(f, "{}@{} (spot {bid})", self.instance_type, self.availability_zone),
            None => write!(f, "{}@{} (on-demand)", self.instance_type, self.availability_zone),
        }
    }
}

/// Instance signature → ids of the instances running with it.
pub type FleetSnapshot = BTreeMap<InstanceTypeState, Vec<InstanceId>>;

// ── Tasks ─────────────────────────────────────────────────────────

/// What a worker should do with a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolAction {
    Initializing,
    Upscaling,
    Downscaling,
    Rebalancing,
}

impl PoolAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolAction::Initializing => "initializing",
            PoolAction::Upscaling => "upscaling",
            PoolAction::Downscaling => "downscaling",
            PoolAction::Rebalancing => "rebalancing",
        }
    }
}

impl fmt::Display for PoolAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work for one group. Immutable once created.
///
/// `task_id` only correlates log lines; deduplication is keyed by group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmPoolTask {
    pub task_id: String,
    pub group_name: GroupName,
    pub action: PoolAction,
}

impl VmPoolTask {
    pub fn new(task_id: impl Into<String>, group_name: &str, action: PoolAction) -> Self {
        Self {
            task_id: task_id.into(),
            group_name: group_name.to_string(),
            action,
        }
    }
}
