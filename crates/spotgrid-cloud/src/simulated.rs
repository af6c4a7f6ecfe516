//! SimulatedCloud: an in-memory cloud gateway.
//!
//! Models the parts of the provider the controller depends on:
//!
//! - spot requests are fulfilled only after `fulfilment_polls` describe
//!   calls have observed them open
//! - new instances stay `pending` for `boot_polls` status calls
//! - lowering a group's desired capacity scales it in immediately
//! - detaching with decrement may not push desired below the group's min
//!
//! Every mutating call is appended to a call log so tests can assert on
//! ordering, and single calls can be made to fail with [`SimulatedCloud::fail_next`].

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use spotgrid_core::{
    GroupInstance, GroupUpdate, InstanceDescription, InstanceState, InstanceStatus,
    LaunchConfiguration, LifecycleState, ManagedGroup, SpotInstanceRequest, SpotRequestSpec,
    Subnet,
};

use crate::error::{CloudError, CloudResult};
use crate::gateway::CloudGateway;

/// Initial contents of a simulated fleet, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetSeed {
    pub groups: Vec<ManagedGroup>,
    pub launch_configurations: Vec<LaunchConfiguration>,
    pub subnets: Vec<Subnet>,
    pub instances: Vec<InstanceDescription>,
    pub spot_requests: Vec<SpotInstanceRequest>,
}

impl FleetSeed {
    pub fn from_file(path: &Path) -> CloudResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CloudError::Seed(format!("{}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| CloudError::Seed(e.to_string()))
    }
}

struct SimInstance {
    description: InstanceDescription,
    boot_polls_left: u32,
}

struct SimSpotRequest {
    request: SpotInstanceRequest,
    zone: String,
    polls_left: u32,
}

#[derive(Default)]
struct FleetState {
    groups: BTreeMap<String, ManagedGroup>,
    launch_configurations: BTreeMap<String, LaunchConfiguration>,
    subnets: BTreeMap<String, Subnet>,
    instances: BTreeMap<String, SimInstance>,
    spot_requests: BTreeMap<String, SimSpotRequest>,
    next_id: u64,
    fulfilment_polls: u32,
    boot_polls: u32,
    fail_next: HashSet<&'static str>,
    calls: Vec<String>,
}

impl FleetState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:08x}", self.next_id)
    }

    /// Record a call and consume an injected failure for `op`, if any.
    fn enter(&mut self, op: &'static str, detail: String) -> CloudResult<()> {
        if self.fail_next.remove(op) {
            debug!(op, "injected failure");
            return Err(CloudError::Request(format!("{op}: injected failure")));
        }
        if detail.is_empty() {
            self.calls.push(op.to_string());
        } else {
            self.calls.push(format!("{op} {detail}"));
        }
        Ok(())
    }

    fn group_mut(&mut self, name: &str) -> CloudResult<&mut ManagedGroup> {
        self.groups
            .get_mut(name)
            .ok_or_else(|| CloudError::GroupNotFound(name.to_string()))
    }

    fn terminate(&mut self, id: &str) {
        if let Some(inst) = self.instances.get_mut(id) {
            inst.description.state = InstanceState::Terminated;
        }
        for group in self.groups.values_mut() {
            group.instances.retain(|m| m.id != id);
        }
    }

    /// Scale a group in to its desired capacity, newest members first.
    fn scale_in(&mut self, name: &str) {
        let Some(group) = self.groups.get_mut(name) else {
            return;
        };
        let desired = group.desired_capacity as usize;
        if group.instances.len() <= desired {
            return;
        }
        let removed: Vec<String> = group
            .instances
            .drain(desired..)
            .map(|m| m.id)
            .collect();
        for id in removed {
            debug!(group = name, instance = %id, "scale-in terminated instance");
            self.terminate(&id);
        }
    }
}

/// In-memory [`CloudGateway`]. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SimulatedCloud {
    state: Arc<Mutex<FleetState>>,
}

impl Default for SimulatedCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCloud {
    /// An empty fleet. Spot requests need one open poll before they are
    /// fulfilled; instances need one status poll before they run.
    pub fn new() -> Self {
        let state = FleetState {
            fulfilment_polls: 1,
            boot_polls: 1,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn from_seed(seed: FleetSeed) -> Self {
        let cloud = Self::new();
        for lc in seed.launch_configurations {
            cloud.add_launch_configuration(lc);
        }
        for subnet in seed.subnets {
            cloud.add_subnet(subnet);
        }
        for inst in seed.instances {
            cloud.add_instance(inst);
        }
        {
            let mut state = cloud.lock();
            for req in seed.spot_requests {
                let zone = req.launched_availability_zone.clone().unwrap_or_default();
                state.spot_requests.insert(
                    req.id.clone(),
                    SimSpotRequest {
                        request: req,
                        zone,
                        polls_left: 0,
                    },
                );
            }
        }
        for group in seed.groups {
            cloud.add_group(group);
        }
        cloud
    }

    pub fn with_fulfilment_polls(self, polls: u32) -> Self {
        self.lock().fulfilment_polls = polls;
        self
    }

    pub fn with_boot_polls(self, polls: u32) -> Self {
        self.lock().boot_polls = polls;
        self
    }

    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Seeding ────────────────────────────────────────────────────

    pub fn add_group(&self, group: ManagedGroup) {
        self.lock().groups.insert(group.name.clone(), group);
    }

    pub fn add_launch_configuration(&self, config: LaunchConfiguration) {
        self.lock()
            .launch_configurations
            .insert(config.name.clone(), config);
    }

    pub fn add_subnet(&self, subnet: Subnet) {
        self.lock().subnets.insert(subnet.id.clone(), subnet);
    }

    pub fn add_instance(&self, description: InstanceDescription) {
        self.lock().instances.insert(
            description.id.clone(),
            SimInstance {
                description,
                boot_polls_left: 0,
            },
        );
    }

    /// Seed a running, fulfilled spot instance as an in-service member of
    /// `group`. Returns the new instance id.
    pub fn add_spot_member(&self, group: &str, instance_type: &str, zone: &str, bid: &str) -> String {
        let mut state = self.lock();
        let instance_id = state.next_id("i");
        let request_id = state.next_id("sir");
        state.spot_requests.insert(
            request_id.clone(),
            SimSpotRequest {
                request: SpotInstanceRequest {
                    id: request_id.clone(),
                    instance_type: instance_type.to_string(),
                    spot_price: bid.to_string(),
                    launched_availability_zone: Some(zone.to_string()),
                    instance_id: Some(instance_id.clone()),
                },
                zone: zone.to_string(),
                polls_left: 0,
            },
        );
        state.instances.insert(
            instance_id.clone(),
            SimInstance {
                description: InstanceDescription {
                    id: instance_id.clone(),
                    instance_type: instance_type.to_string(),
                    availability_zone: zone.to_string(),
                    spot_request_id: Some(request_id),
                    state: InstanceState::Running,
                },
                boot_polls_left: 0,
            },
        );
        if let Some(g) = state.groups.get_mut(group) {
            g.instances.push(GroupInstance {
                id: instance_id.clone(),
                lifecycle_state: LifecycleState::InService,
            });
        }
        instance_id
    }

    /// Seed a running on-demand instance as an in-service member of `group`.
    pub fn add_on_demand_member(&self, group: &str, instance_type: &str, zone: &str) -> String {
        let mut state = self.lock();
        let instance_id = state.next_id("i");
        state.instances.insert(
            instance_id.clone(),
            SimInstance {
                description: InstanceDescription {
                    id: instance_id.clone(),
                    instance_type: instance_type.to_string(),
                    availability_zone: zone.to_string(),
                    spot_request_id: None,
                    state: InstanceState::Running,
                },
                boot_polls_left: 0,
            },
        );
        if let Some(g) = state.groups.get_mut(group) {
            g.instances.push(GroupInstance {
                id: instance_id.clone(),
                lifecycle_state: LifecycleState::InService,
            });
        }
        instance_id
    }

    /// Make the next call to `op` (a gateway method name) fail.
    pub fn fail_next(&self, op: &'static str) {
        self.lock().fail_next.insert(op);
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn group(&self, name: &str) -> Option<ManagedGroup> {
        self.lock().groups.get(name).cloned()
    }

    pub fn launch_configuration(&self, name: &str) -> Option<LaunchConfiguration> {
        self.lock().launch_configurations.get(name).cloned()
    }

    pub fn launch_configuration_names(&self) -> Vec<String> {
        self.lock().launch_configurations.keys().cloned().collect()
    }

    pub fn instance(&self, id: &str) -> Option<InstanceDescription> {
        self.lock()
            .instances
            .get(id)
            .map(|i| i.description.clone())
    }

    pub fn spot_request_count(&self) -> usize {
        self.lock().spot_requests.len()
    }

    /// Mutating calls made so far, as `"<op> <detail>"` strings.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Index of the first logged call starting with `op`.
    pub fn call_position(&self, op: &str) -> Option<usize> {
        self.lock().calls.iter().position(|c| c.starts_with(op))
    }
}

#[async_trait]
impl CloudGateway for SimulatedCloud {
    async fn describe_groups(&self) -> CloudResult<Vec<ManagedGroup>> {
        let mut state = self.lock();
        if state.fail_next.remove("describe_groups") {
            return Err(CloudError::Request("describe_groups: injected failure".to_string()));
        }
        Ok(state.groups.values().cloned().collect())
    }

    async fn describe_group(&self, name: &str) -> CloudResult<Option<ManagedGroup>> {
        let mut state = self.lock();
        if state.fail_next.remove("describe_group") {
            return Err(CloudError::Request("describe_group: injected failure".to_string()));
        }
        Ok(state.groups.get(name).cloned())
    }

    async fn update_group(&self, update: &GroupUpdate) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("update_group", format!("{update:?}"))?;

        if let Some(lc) = &update.launch_configuration
            && !state.launch_configurations.contains_key(lc)
        {
            return Err(CloudError::LaunchConfigurationNotFound(lc.clone()));
        }

        let group = state.group_mut(&update.name)?;
        let min = update.min_size.unwrap_or(group.min_size);
        let desired = update.desired_capacity.unwrap_or(group.desired_capacity);
        if desired < min || desired > group.max_size {
            return Err(CloudError::InvalidRequest(format!(
                "desired capacity {desired} outside [{min}, {}]",
                group.max_size
            )));
        }
        group.min_size = min;
        group.desired_capacity = desired;
        if let Some(lc) = &update.launch_configuration {
            group.launch_configuration = lc.clone();
        }
        state.scale_in(&update.name);
        Ok(())
    }

    async fn describe_launch_configuration(
        &self,
        name: &str,
    ) -> CloudResult<Option<LaunchConfiguration>> {
        let mut state = self.lock();
        if state.fail_next.remove("describe_launch_configuration") {
            return Err(CloudError::Request(
                "describe_launch_configuration: injected failure".to_string(),
            ));
        }
        Ok(state.launch_configurations.get(name).cloned())
    }

    async fn list_launch_configurations(&self) -> CloudResult<Vec<LaunchConfiguration>> {
        let mut state = self.lock();
        if state.fail_next.remove("list_launch_configurations") {
            return Err(CloudError::Request(
                "list_launch_configurations: injected failure".to_string(),
            ));
        }
        Ok(state.launch_configurations.values().cloned().collect())
    }

    async fn create_launch_configuration(&self, config: &LaunchConfiguration) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("create_launch_configuration", config.name.clone())?;
        if state.launch_configurations.contains_key(&config.name) {
            return Err(CloudError::LaunchConfigurationExists(config.name.clone()));
        }
        state
            .launch_configurations
            .insert(config.name.clone(), config.clone());
        Ok(())
    }

    async fn delete_launch_configuration(&self, name: &str) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("delete_launch_configuration", name.to_string())?;
        if !state.launch_configurations.contains_key(name) {
            return Err(CloudError::LaunchConfigurationNotFound(name.to_string()));
        }
        if state
            .groups
            .values()
            .any(|g| g.launch_configuration == name)
        {
            return Err(CloudError::LaunchConfigurationInUse(name.to_string()));
        }
        state.launch_configurations.remove(name);
        Ok(())
    }

    async fn describe_subnets(&self, ids: &[String]) -> CloudResult<Vec<Subnet>> {
        let mut state = self.lock();
        if state.fail_next.remove("describe_subnets") {
            return Err(CloudError::Request("describe_subnets: injected failure".to_string()));
        }
        ids.iter()
            .map(|id| {
                state
                    .subnets
                    .get(id)
                    .cloned()
                    .ok_or_else(|| CloudError::InvalidRequest(format!("unknown subnet {id}")))
            })
            .collect()
    }

    async fn request_spot_instances(&self, spec: &SpotRequestSpec) -> CloudResult<Vec<String>> {
        let mut state = self.lock();
        state.enter(
            "request_spot_instances",
            format!("{}x{} {}", spec.instance_count, spec.instance_type, spec.subnet_id),
        )?;
        if spec.instance_count == 0 {
            return Err(CloudError::InvalidRequest("instance count is zero".to_string()));
        }
        let zone = state
            .subnets
            .get(&spec.subnet_id)
            .map(|s| s.availability_zone.clone())
            .ok_or_else(|| CloudError::InvalidRequest(format!("unknown subnet {}", spec.subnet_id)))?;

        let polls_left = state.fulfilment_polls;
        let mut ids = Vec::with_capacity(spec.instance_count as usize);
        for _ in 0..spec.instance_count {
            let id = state.next_id("sir");
            state.spot_requests.insert(
                id.clone(),
                SimSpotRequest {
                    request: SpotInstanceRequest {
                        id: id.clone(),
                        instance_type: spec.instance_type.clone(),
                        spot_price: spec.spot_price.clone(),
                        launched_availability_zone: None,
                        instance_id: None,
                    },
                    zone: zone.clone(),
                    polls_left,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn describe_spot_requests(
        &self,
        ids: &[String],
    ) -> CloudResult<Vec<SpotInstanceRequest>> {
        let mut state = self.lock();
        if state.fail_next.remove("describe_spot_requests") {
            return Err(CloudError::Request(
                "describe_spot_requests: injected failure".to_string(),
            ));
        }
        let boot_polls = state.boot_polls;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let fulfil = {
                let req = state
                    .spot_requests
                    .get_mut(id)
                    .ok_or_else(|| CloudError::SpotRequestNotFound(id.clone()))?;
                if req.request.instance_id.is_some() {
                    false
                } else if req.polls_left == 0 {
                    true
                } else {
                    req.polls_left -= 1;
                    false
                }
            };

            if fulfil {
                let instance_id = state.next_id("i");
                let Some(req) = state.spot_requests.get_mut(id) else {
                    return Err(CloudError::SpotRequestNotFound(id.clone()));
                };
                req.request.instance_id = Some(instance_id.clone());
                req.request.launched_availability_zone = Some(req.zone.clone());
                let description = InstanceDescription {
                    id: instance_id.clone(),
                    instance_type: req.request.instance_type.clone(),
                    availability_zone: req.zone.clone(),
                    spot_request_id: Some(id.clone()),
                    state: InstanceState::Pending,
                };
                state.instances.insert(
                    instance_id,
                    SimInstance {
                        description,
                        boot_polls_left: boot_polls,
                    },
                );
            }

            if let Some(req) = state.spot_requests.get(id) {
                out.push(req.request.clone());
            }
        }
        Ok(out)
    }

    async fn describe_instances(&self, ids: &[String]) -> CloudResult<Vec<InstanceDescription>> {
        let mut state = self.lock();
        if state.fail_next.remove("describe_instances") {
            return Err(CloudError::Request("describe_instances: injected failure".to_string()));
        }
        ids.iter()
            .map(|id| {
                state
                    .instances
                    .get(id)
                    .map(|i| i.description.clone())
                    .ok_or_else(|| CloudError::InstanceNotFound(id.clone()))
            })
            .collect()
    }

    async fn describe_instance_status(&self, ids: &[String]) -> CloudResult<Vec<InstanceStatus>> {
        let mut state = self.lock();
        if state.fail_next.remove("describe_instance_status") {
            return Err(CloudError::Request(
                "describe_instance_status: injected failure".to_string(),
            ));
        }
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let inst = state
                .instances
                .get_mut(id)
                .ok_or_else(|| CloudError::InstanceNotFound(id.clone()))?;
            if inst.description.state == InstanceState::Pending {
                if inst.boot_polls_left == 0 {
                    inst.description.state = InstanceState::Running;
                } else {
                    inst.boot_polls_left -= 1;
                }
            }
            out.push(InstanceStatus {
                id: id.clone(),
                state: inst.description.state,
            });
        }
        Ok(out)
    }

    async fn attach_instances(&self, group: &str, ids: &[String]) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("attach_instances", format!("{group} {}", ids.join(",")))?;
        for id in ids {
            match state.instances.get(id) {
                Some(i) if i.description.state == InstanceState::Running => {}
                Some(_) => {
                    return Err(CloudError::InvalidRequest(format!("instance {id} is not running")));
                }
                None => return Err(CloudError::InstanceNotFound(id.clone())),
            }
        }
        let g = state.group_mut(group)?;
        let desired = g.desired_capacity + ids.len() as u32;
        if desired > g.max_size {
            return Err(CloudError::InvalidRequest(format!(
                "attaching {} instances exceeds max size {}",
                ids.len(),
                g.max_size
            )));
        }
        g.desired_capacity = desired;
        g.instances.extend(ids.iter().map(|id| GroupInstance {
            id: id.clone(),
            lifecycle_state: LifecycleState::InService,
        }));
        Ok(())
    }

    async fn detach_instances(
        &self,
        group: &str,
        ids: &[String],
        decrement_desired: bool,
    ) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("detach_instances", format!("{group} {}", ids.join(",")))?;
        let g = state.group_mut(group)?;
        if let Some(missing) = ids
            .iter()
            .find(|id| !g.instances.iter().any(|m| &m.id == *id))
        {
            return Err(CloudError::InvalidRequest(format!(
                "instance {missing} is not a member of {group}"
            )));
        }
        if decrement_desired {
            let desired = g.desired_capacity.saturating_sub(ids.len() as u32);
            if desired < g.min_size {
                return Err(CloudError::InvalidRequest(format!(
                    "desired capacity {desired} would drop below min size {}",
                    g.min_size
                )));
            }
            g.desired_capacity = desired;
        }
        g.instances.retain(|m| !ids.contains(&m.id));
        Ok(())
    }

    async fn terminate_instances(&self, ids: &[String]) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("terminate_instances", ids.join(","))?;
        if let Some(missing) = ids.iter().find(|id| !state.instances.contains_key(*id)) {
            return Err(CloudError::InstanceNotFound(missing.clone()));
        }
        for id in ids {
            state.terminate(id);
        }
        Ok(())
    }
}
