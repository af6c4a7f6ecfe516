//! End-to-end controller scenarios against the simulated cloud.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use spotgrid_cloud::{CloudGateway, SimulatedCloud};
use spotgrid_controller::{
    AsgManager, ControllerError, ControllerResult, FleetController, PoolManager,
};
use spotgrid_core::{
    FleetConfig, GroupInstance, InstanceState, InstanceTypeInfo, LaunchConfiguration,
    LifecycleState, ManagedGroup, PoolAction, Subnet, VmPoolTask,
};
use spotgrid_recommender::StaticRecommender;

// ── Fixtures ──────────────────────────────────────────────────────

fn config() -> FleetConfig {
    let mut config = FleetConfig::default();
    config.controller.check_interval = "1s".to_string();
    config.controller.reevaluate_interval = "60s".to_string();
    config.actions.upscale_wait_iterations = 2;
    config.actions.downscale_wait_iterations = 2;
    config
}

fn launch_config(name: &str, instance_type: &str) -> LaunchConfiguration {
    LaunchConfiguration {
        name: name.to_string(),
        instance_type: instance_type.to_string(),
        spot_price: None,
        image_id: "ami-0abc".to_string(),
        security_groups: vec!["sg-web".to_string()],
        iam_instance_profile: Some("web".to_string()),
        key_name: Some("ops".to_string()),
        user_data: None,
        ebs_optimized: true,
        associate_public_ip_address: Some(false),
    }
}

fn group(name: &str, desired: u32, min: u32, zones: &[&str], subnets: &[&str]) -> ManagedGroup {
    ManagedGroup {
        name: name.to_string(),
        desired_capacity: desired,
        min_size: min,
        max_size: 10,
        tags: HashMap::from([("SpotGrid".to_string(), "true".to_string())]),
        launch_configuration: format!("{name}-lc"),
        instances: vec![],
        availability_zones: zones.iter().map(|z| z.to_string()).collect(),
        subnet_ids: subnets.iter().map(|s| s.to_string()).collect(),
    }
}

fn candidate(name: &str, score: f32) -> InstanceTypeInfo {
    InstanceTypeInfo {
        instance_type_name: name.to_string(),
        current_price: "0.06".to_string(),
        on_demand_price: "0.214".to_string(),
        suggested_bid_price: "0.214".to_string(),
        cost_score: score,
        stability_score: 0.5,
    }
}

fn recommender(zones: &[&str], types: &[(&str, f32)]) -> Arc<StaticRecommender> {
    let table = zones
        .iter()
        .map(|z| {
            (
                z.to_string(),
                types.iter().map(|(t, s)| candidate(t, *s)).collect(),
            )
        })
        .collect::<BTreeMap<_, _>>();
    Arc::new(StaticRecommender::new(table))
}

fn cloud() -> SimulatedCloud {
    let cloud = SimulatedCloud::new();
    for (id, zone) in [("s-a", "a"), ("s-b", "b")] {
        cloud.add_subnet(Subnet {
            id: id.to_string(),
            availability_zone: zone.to_string(),
        });
    }
    cloud
}

fn manager(cloud: &SimulatedCloud, rec: Arc<StaticRecommender>) -> AsgManager {
    AsgManager::new(Arc::new(cloud.clone()), rec, &config())
}

fn members(cloud: &SimulatedCloud, group: &str) -> Vec<String> {
    let mut ids = cloud.group(group).unwrap().instance_ids();
    ids.sort();
    ids
}

fn count_calls(cloud: &SimulatedCloud, op: &str) -> usize {
    cloud.calls().iter().filter(|c| c.starts_with(op)).count()
}

// ── Scenarios ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn empty_group_initializes_then_settles_as_stable() {
    let cloud = cloud();
    cloud.add_launch_configuration(launch_config("g1-lc", "m4.xlarge"));
    cloud.add_group(group("g1", 3, 1, &["a", "b"], &["s-a", "s-b"]));
    let manager = manager(
        &cloud,
        recommender(&["a", "b"], &[("m5.xlarge", 0.9), ("c5.xlarge", 0.7)]),
    );

    let tasks = manager.check_pools().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].action, PoolAction::Initializing);
    assert_eq!(tasks[0].group_name, "g1");

    manager.update_pool(&tasks[0]).await.unwrap();

    let g1 = cloud.group("g1").unwrap();
    assert_eq!(g1.desired_capacity, 3);
    assert_eq!(g1.min_size, 1);
    assert_eq!(g1.instances.len(), 3);
    assert!(
        g1.instances
            .iter()
            .all(|m| m.lifecycle_state == LifecycleState::InService)
    );
    for id in g1.instance_ids() {
        let inst = cloud.instance(&id).unwrap();
        assert_eq!(inst.state, InstanceState::Running);
        assert!(inst.spot_request_id.is_some());
    }

    // rotation moved the group onto the first slot and kept a backup
    assert_eq!(g1.launch_configuration, "g1-ht-1");
    let slot = cloud.launch_configuration("g1-ht-1").unwrap();
    assert_eq!(slot.instance_type, "m5.xlarge");
    assert_eq!(slot.spot_price.as_deref(), Some("0.214"));
    assert_eq!(slot.image_id, "ami-0abc");
    assert_eq!(
        cloud.launch_configuration("g1-ht-orig").unwrap().instance_type,
        "m4.xlarge"
    );

    assert!(manager.check_pools().await.unwrap().is_empty());
    assert!(manager.reevaluate_pools().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn initialize_read_failure_leaves_group_untouched() {
    let cloud = cloud();
    cloud.add_launch_configuration(launch_config("g7-lc", "m4.xlarge"));
    cloud.add_group(group("g7", 3, 1, &["a", "b"], &["s-a", "s-b"]));
    let manager = manager(&cloud, recommender(&["a", "b"], &[("m5.xlarge", 0.9)]));

    cloud.fail_next("describe_subnets");
    let task = VmPoolTask::new("t", "g7", PoolAction::Initializing);
    let err = manager.update_pool(&task).await.unwrap_err();
    assert!(matches!(err, ControllerError::Cloud(_)));

    let g7 = cloud.group("g7").unwrap();
    assert_eq!(g7.desired_capacity, 3);
    assert_eq!(g7.min_size, 1);
    assert_eq!(count_calls(&cloud, "update_group"), 0);

    let tasks = manager.check_pools().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].action, PoolAction::Initializing);

    manager.update_pool(&tasks[0]).await.unwrap();
    assert_eq!(cloud.group("g7").unwrap().instances.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn initialize_provision_failure_restores_capacity() {
    let cloud = cloud();
    cloud.add_launch_configuration(launch_config("g8-lc", "m4.xlarge"));
    cloud.add_group(group("g8", 3, 1, &["a", "b"], &["s-a", "s-b"]));
    let manager = manager(&cloud, recommender(&["a", "b"], &[("m5.xlarge", 0.9)]));

    cloud.fail_next("describe_spot_requests");
    let task = VmPoolTask::new("t", "g8", PoolAction::Initializing);
    let err = manager.update_pool(&task).await.unwrap_err();
    assert!(matches!(err, ControllerError::Provision(_)));

    let g8 = cloud.group("g8").unwrap();
    assert_eq!(g8.desired_capacity, 3);
    assert_eq!(g8.min_size, 1);
    assert!(g8.instances.is_empty());

    let tasks = manager.check_pools().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].action, PoolAction::Initializing);

    manager.update_pool(&tasks[0]).await.unwrap();
    let g8 = cloud.group("g8").unwrap();
    assert_eq!(g8.instances.len(), 3);
    assert_eq!(g8.desired_capacity, 3);
    assert_eq!(g8.min_size, 1);
}

#[tokio::test(start_paused = true)]
async fn rebalance_replaces_only_the_flagged_signature() {
    let cloud = cloud();
    cloud.add_launch_configuration(launch_config("g2-lc", "m4.large"));
    cloud.add_group(group("g2", 5, 2, &["a"], &["s-a"]));
    let stale_1 = cloud.add_spot_member("g2", "m4.large", "a", "0.1");
    let stale_2 = cloud.add_spot_member("g2", "m4.large", "a", "0.1");
    let keep_1 = cloud.add_spot_member("g2", "m5.xlarge", "a", "0.214");
    let keep_2 = cloud.add_spot_member("g2", "m5.xlarge", "a", "0.214");
    let on_demand = cloud.add_on_demand_member("g2", "m4.large", "a");

    let manager = manager(
        &cloud,
        recommender(&["a"], &[("m5.xlarge", 0.9), ("c5.xlarge", 0.7)]),
    );

    assert!(manager.check_pools().await.unwrap().is_empty());
    let tasks = manager.reevaluate_pools().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].action, PoolAction::Rebalancing);

    manager.update_pool(&tasks[0]).await.unwrap();

    let after = members(&cloud, "g2");
    assert_eq!(after.len(), 5);
    for id in [&keep_1, &keep_2, &on_demand] {
        assert!(after.contains(id), "{id} should stay in the group");
        assert_eq!(cloud.instance(id).unwrap().state, InstanceState::Running);
    }
    for id in [&stale_1, &stale_2] {
        assert!(!after.contains(id), "{id} should be replaced");
        assert_eq!(cloud.instance(id).unwrap().state, InstanceState::Terminated);
    }

    let g2 = cloud.group("g2").unwrap();
    assert_eq!(g2.desired_capacity, 5);
    assert_eq!(g2.min_size, 2);

    let detach = cloud.call_position("detach_instances").unwrap();
    let terminate = cloud.call_position("terminate_instances").unwrap();
    let attach = cloud.call_position("attach_instances").unwrap();
    assert!(detach < terminate);
    assert!(terminate < attach);

    // replacements match the recommendation, so nothing is flagged any more
    assert!(manager.reevaluate_pools().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rotation_alternates_slots_and_keeps_the_original() {
    let cloud = cloud();
    cloud.add_launch_configuration(launch_config("g3-lc", "m4.xlarge"));
    cloud.add_group(group("g3", 0, 0, &["a", "b"], &["s-a", "s-b"]));

    let prefers_m5 = manager(&cloud, recommender(&["a", "b"], &[("m5.xlarge", 0.9)]));
    let prefers_c5 = manager(&cloud, recommender(&["a", "b"], &[("c5.xlarge", 0.9)]));
    let task = VmPoolTask::new("t", "g3", PoolAction::Upscaling);

    prefers_m5.update_pool(&task).await.unwrap();
    assert_eq!(cloud.group("g3").unwrap().launch_configuration, "g3-ht-1");

    prefers_c5.update_pool(&task).await.unwrap();
    assert_eq!(cloud.group("g3").unwrap().launch_configuration, "g3-ht-2");
    assert!(cloud.launch_configuration("g3-ht-1").is_none());
    assert_eq!(
        cloud.launch_configuration("g3-ht-2").unwrap().instance_type,
        "c5.xlarge"
    );

    prefers_m5.update_pool(&task).await.unwrap();
    assert_eq!(cloud.group("g3").unwrap().launch_configuration, "g3-ht-1");
    assert!(cloud.launch_configuration("g3-ht-2").is_none());

    let orig = cloud.launch_configuration("g3-ht-orig").unwrap();
    assert_eq!(orig.instance_type, "m4.xlarge");
    assert_eq!(count_calls(&cloud, "delete_launch_configuration g3-ht-orig"), 0);

    // same recommendation again: nothing to rotate
    let creates = count_calls(&cloud, "create_launch_configuration");
    prefers_m5.update_pool(&task).await.unwrap();
    assert_eq!(count_calls(&cloud, "create_launch_configuration"), creates);
    assert_eq!(cloud.group("g3").unwrap().launch_configuration, "g3-ht-1");
}

#[tokio::test(start_paused = true)]
async fn rotation_caps_the_bid_at_on_demand() {
    let cloud = cloud();
    cloud.add_launch_configuration(launch_config("g9-lc", "m4.xlarge"));
    cloud.add_group(group("g9", 0, 0, &["a"], &["s-a"]));
    let mut pricey = candidate("m5.xlarge", 0.9);
    pricey.suggested_bid_price = "0.5".to_string();
    let rec = Arc::new(StaticRecommender::new(BTreeMap::from([(
        "a".to_string(),
        vec![pricey],
    )])));
    let manager = manager(&cloud, rec);

    manager
        .update_pool(&VmPoolTask::new("t", "g9", PoolAction::Upscaling))
        .await
        .unwrap();

    let slot = cloud.launch_configuration("g9-ht-1").unwrap();
    assert_eq!(slot.spot_price.as_deref(), Some("0.214"));
}

#[tokio::test(start_paused = true)]
async fn stale_target_slot_is_replaced() {
    let cloud = cloud();
    cloud.add_launch_configuration(launch_config("g5-lc", "m4.xlarge"));
    cloud.add_launch_configuration(launch_config("g5-ht-1", "t2.micro"));
    cloud.add_group(group("g5", 0, 0, &["a"], &["s-a"]));
    let manager = manager(&cloud, recommender(&["a"], &[("m5.xlarge", 0.9)]));

    manager
        .update_pool(&VmPoolTask::new("t", "g5", PoolAction::Downscaling))
        .await
        .unwrap();

    assert_eq!(cloud.group("g5").unwrap().launch_configuration, "g5-ht-1");
    assert_eq!(
        cloud.launch_configuration("g5-ht-1").unwrap().instance_type,
        "m5.xlarge"
    );
}

#[tokio::test(start_paused = true)]
async fn deleted_group_is_reported() {
    let cloud = cloud();
    let manager = manager(&cloud, recommender(&["a"], &[("m5.xlarge", 0.9)]));

    let err = manager
        .update_pool(&VmPoolTask::new("t", "vanished", PoolAction::Upscaling))
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::GroupDeleted(name) if name == "vanished"));
}

#[tokio::test(start_paused = true)]
async fn unmanaged_groups_are_ignored() {
    let cloud = cloud();
    let mut unmanaged = group("plain", 2, 0, &["a"], &["s-a"]);
    unmanaged.tags.clear();
    cloud.add_group(unmanaged);
    let manager = manager(&cloud, recommender(&["a"], &[("m5.xlarge", 0.9)]));

    assert!(manager.check_pools().await.unwrap().is_empty());
    assert!(manager.reevaluate_pools().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn reevaluation_skips_failing_groups() {
    let cloud = cloud();
    // no launch configuration: the baseline type cannot be resolved
    cloud.add_group(group("broken", 1, 0, &["a"], &["s-a"]));
    cloud.add_spot_member("broken", "m4.large", "a", "0.1");

    cloud.add_launch_configuration(launch_config("ok-lc", "m4.large"));
    cloud.add_group(group("ok", 1, 0, &["a"], &["s-a"]));
    cloud.add_spot_member("ok", "m4.large", "a", "0.1");

    let manager = manager(&cloud, recommender(&["a"], &[("m5.xlarge", 0.9)]));
    let tasks = manager.reevaluate_pools().await.unwrap();

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].group_name, "ok");
}

#[tokio::test(start_paused = true)]
async fn orphaned_launch_configurations_are_cleaned_up() {
    let cloud = cloud();
    cloud.add_launch_configuration(launch_config("live-lc", "m4.large"));
    cloud.add_launch_configuration(launch_config("live-ht-orig", "m4.large"));
    cloud.add_group(group("live", 0, 0, &["a"], &["s-a"]));

    // no longer managed but still launching from its slot
    cloud.add_launch_configuration(launch_config("old-ht-orig", "m4.large"));
    cloud.add_launch_configuration(launch_config("old-ht-1", "m5.large"));
    let mut old = group("old", 0, 0, &["a"], &["s-a"]);
    old.tags.clear();
    old.launch_configuration = "old-ht-1".to_string();
    cloud.add_group(old);

    // owner is gone entirely
    cloud.add_launch_configuration(launch_config("gone-ht-2", "m5.large"));

    let manager = manager(&cloud, recommender(&["a"], &[("m5.xlarge", 0.9)]));
    manager.reevaluate_pools().await.unwrap();

    let names = cloud.launch_configuration_names();
    assert!(names.contains(&"live-lc".to_string()));
    assert!(names.contains(&"live-ht-orig".to_string()));
    assert!(names.contains(&"old-ht-1".to_string()));
    assert!(!names.contains(&"old-ht-orig".to_string()));
    assert!(!names.contains(&"gone-ht-2".to_string()));
}

// ── Control loop ──────────────────────────────────────────────────

/// Delegates to an inner manager and records update_pool outcomes.
struct Recording<M> {
    inner: M,
    updates: AtomicUsize,
    failures: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl<M> Recording<M> {
    fn new(inner: M) -> Self {
        Self {
            inner,
            updates: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<M: PoolManager> PoolManager for Recording<M> {
    async fn check_pools(&self) -> ControllerResult<Vec<VmPoolTask>> {
        self.inner.check_pools().await
    }

    async fn reevaluate_pools(&self) -> ControllerResult<Vec<VmPoolTask>> {
        self.inner.reevaluate_pools().await
    }

    async fn update_pool(&self, task: &VmPoolTask) -> ControllerResult<()> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.updates.fetch_add(1, Ordering::SeqCst);
        let result = self.inner.update_pool(task).await;
        if result.is_err() {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[tokio::test(start_paused = true)]
async fn failed_tasks_release_the_group_for_the_next_tick() {
    let cloud = cloud();
    // upscaling group whose launch configuration is missing: every
    // rotation fails, the group state never changes
    let mut g = group("g4", 2, 0, &["a"], &["s-a"]);
    g.instances = vec![
        GroupInstance {
            id: "i-running".to_string(),
            lifecycle_state: LifecycleState::InService,
        },
        GroupInstance {
            id: "i-booting".to_string(),
            lifecycle_state: LifecycleState::Pending,
        },
    ];
    cloud.add_group(g);

    let recording = Arc::new(Recording::new(manager(
        &cloud,
        recommender(&["a"], &[("m5.xlarge", 0.9)]),
    )));
    let mut controller_config = config().controller;
    controller_config.workers = 3;
    let controller = FleetController::start(recording.clone(), &controller_config);

    tokio::time::sleep(Duration::from_secs(12)).await;
    controller.shutdown().await;

    let updates = recording.updates.load(Ordering::SeqCst);
    assert!(updates >= 2, "group was retried {updates} times");
    assert_eq!(recording.failures.load(Ordering::SeqCst), updates);
    // the group is never worked on by two workers at once
    assert_eq!(recording.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn control_loop_initializes_a_new_group() {
    let cloud = cloud();
    cloud.add_launch_configuration(launch_config("g6-lc", "m4.xlarge"));
    cloud.add_group(group("g6", 2, 0, &["a", "b"], &["s-a", "s-b"]));

    let gateway: Arc<dyn CloudGateway> = Arc::new(cloud.clone());
    let manager = Arc::new(AsgManager::new(
        gateway,
        recommender(&["a", "b"], &[("m5.xlarge", 0.9)]),
        &config(),
    ));
    let controller = FleetController::start(manager, &config().controller);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(controller.task_store().in_progress_count(), 0);
    controller.shutdown().await;

    let g6 = cloud.group("g6").unwrap();
    assert_eq!(g6.instances.len(), 2);
    assert_eq!(g6.launch_configuration, "g6-ht-1");
    assert_eq!(count_calls(&cloud, "attach_instances"), 1);
}
