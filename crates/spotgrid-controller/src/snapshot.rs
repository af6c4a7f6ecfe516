//! Instance-type snapshots of a group.
//!
//! A snapshot maps each `(type, zone, bid)` signature to the instances
//! running with it. Spot instances take their type, zone and bid from the
//! spot request that launched them, or the instance's own zone when the
//! request reports none. On-demand instances have no bid.

use std::collections::HashMap;

use tracing::debug;

use spotgrid_cloud::CloudGateway;
use spotgrid_core::{FleetSnapshot, InstanceId, InstanceTypeState, Recommendations, Zone};

use crate::error::ControllerResult;

/// Build the current snapshot for `instance_ids` of `group`.
///
/// One describe for the instances, one for the spot requests behind them.
pub async fn instance_type_state(
    gateway: &dyn CloudGateway,
    group: &str,
    instance_ids: &[InstanceId],
) -> ControllerResult<FleetSnapshot> {
    let mut snapshot = FleetSnapshot::new();
    if instance_ids.is_empty() {
        return Ok(snapshot);
    }

    let instances = gateway.describe_instances(instance_ids).await?;

    // spot request id → (instance id, instance zone)
    let mut spot_backed: HashMap<String, (InstanceId, Zone)> = HashMap::new();
    for inst in instances {
        match inst.spot_request_id {
            Some(request_id) => {
                spot_backed.insert(request_id, (inst.id, inst.availability_zone));
            }
            None => {
                let key = InstanceTypeState {
                    instance_type: inst.instance_type,
                    availability_zone: inst.availability_zone,
                    spot_bid_price: None,
                };
                snapshot.entry(key).or_default().push(inst.id);
            }
        }
    }

    if !spot_backed.is_empty() {
        let request_ids: Vec<String> = spot_backed.keys().cloned().collect();
        for req in gateway.describe_spot_requests(&request_ids).await? {
            let Some((instance_id, instance_zone)) = spot_backed.get(&req.id) else {
                continue;
            };
            let key = InstanceTypeState {
                instance_type: req.instance_type,
                availability_zone: req
                    .launched_availability_zone
                    .filter(|z| !z.is_empty())
                    .unwrap_or_else(|| instance_zone.clone()),
                spot_bid_price: Some(req.spot_price),
            };
            snapshot.entry(key).or_default().push(instance_id.clone());
        }
    }

    for ids in snapshot.values_mut() {
        ids.sort();
    }
    debug!(
        %group,
        signatures = snapshot.len(),
        instances = instance_ids.len(),
        "instance type state"
    );
    Ok(snapshot)
}

/// Spot signatures whose type is not among the recommendations for their
/// zone. On-demand signatures are never reported.
pub fn unmatched_spot_signatures(
    snapshot: &FleetSnapshot,
    recommendations: &Recommendations,
) -> Vec<InstanceTypeState> {
    snapshot
        .keys()
        .filter(|sig| sig.is_spot())
        .filter(|sig| {
            !recommendations
                .get(&sig.availability_zone)
                .is_some_and(|candidates| {
                    candidates
                        .iter()
                        .any(|c| c.instance_type_name == sig.instance_type)
                })
        })
        .cloned()
        .collect()
}
