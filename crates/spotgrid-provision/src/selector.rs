//! Instance-type selection and capacity apportionment.
//!
//! Everything here is pure: no cloud calls, no clocks.

use std::collections::BTreeMap;

use tracing::debug;

use spotgrid_core::{InstanceTypeInfo, Recommendations, Zone, sort_by_cost_score};

use crate::error::{ProvisionError, ProvisionResult};

/// How many distinct instance types to spread `target` instances over,
/// given `available` candidates.
///
/// | target   | types |
/// |----------|-------|
/// | < 2      | 1     |
/// | 2..9     | 2     |
/// | 9..20    | 3     |
/// | ≥ 20     | 4     |
///
/// A step never asks for more types than there are candidates.
pub fn type_count(available: usize, target: u32) -> usize {
    let wanted = if target < 2 || available < 2 {
        1
    } else if target < 9 || available < 3 {
        2
    } else if target < 20 || available < 4 {
        3
    } else {
        4
    };
    wanted.min(available)
}

/// The best-cost `type_count` candidates for `target` instances.
pub fn select_types(candidates: &[InstanceTypeInfo], target: u32) -> Vec<InstanceTypeInfo> {
    let mut sorted = candidates.to_vec();
    sort_by_cost_score(&mut sorted);
    sorted.truncate(type_count(candidates.len(), target));
    sorted
}

/// Split `total` into `parts` shares by integer division, adding the
/// remainder to the first share. The shares always sum to `total`.
pub fn apportion(total: u32, parts: usize) -> Vec<u32> {
    if parts == 0 {
        return Vec::new();
    }
    let n = parts as u32;
    let mut shares = vec![total / n; parts];
    shares[0] += total % n;
    shares
}

/// One spot request: `count` instances of one type in one subnet.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanCell {
    pub zone: Zone,
    pub subnet_id: String,
    pub instance_type: InstanceTypeInfo,
    pub count: u32,
}

/// The full set of spot requests for one provisioning run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionPlan {
    pub cells: Vec<PlanCell>,
}

impl ProvisionPlan {
    /// Number of instances the plan requests.
    pub fn total(&self) -> u32 {
        self.cells.iter().map(|c| c.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Apportion `target` instances over zone → subnet → selected type.
///
/// Zones without subnets or without recommended candidates are left out
/// before apportioning, so no capacity is assigned to them. Cells with a
/// zero share are dropped.
pub fn build_plan(
    target: u32,
    subnets_by_zone: &BTreeMap<Zone, Vec<String>>,
    recommendations: &Recommendations,
) -> ProvisionResult<ProvisionPlan> {
    if target == 0 {
        return Ok(ProvisionPlan::default());
    }

    let eligible: Vec<(&Zone, &Vec<String>, &Vec<InstanceTypeInfo>)> = subnets_by_zone
        .iter()
        .filter(|(_, subnets)| !subnets.is_empty())
        .filter_map(|(zone, subnets)| {
            recommendations
                .get(zone)
                .filter(|c| !c.is_empty())
                .map(|candidates| (zone, subnets, candidates))
        })
        .collect();

    if eligible.is_empty() {
        return Err(ProvisionError::NoEligibleZones);
    }

    let mut plan = ProvisionPlan::default();
    let zone_shares = apportion(target, eligible.len());

    for ((zone, subnets, candidates), zone_count) in eligible.into_iter().zip(zone_shares) {
        if zone_count == 0 {
            continue;
        }
        let types = select_types(candidates, zone_count);
        debug!(
            %zone,
            count = zone_count,
            types = ?types.iter().map(|t| t.instance_type_name.as_str()).collect::<Vec<_>>(),
            "selected instance types"
        );

        for (subnet_id, subnet_count) in subnets.iter().zip(apportion(zone_count, subnets.len())) {
            for (info, count) in types.iter().zip(apportion(subnet_count, types.len())) {
                if count == 0 {
                    continue;
                }
                plan.cells.push(PlanCell {
                    zone: zone.clone(),
                    subnet_id: subnet_id.clone(),
                    instance_type: info.clone(),
                    count,
                });
            }
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, score: f32) -> InstanceTypeInfo {
        InstanceTypeInfo {
            instance_type_name: name.to_string(),
            current_price: "0.05".to_string(),
            on_demand_price: "0.2".to_string(),
            suggested_bid_price: "0.2".to_string(),
            cost_score: score,
            stability_score: 0.5,
        }
    }

    fn five() -> Vec<InstanceTypeInfo> {
        vec![
            candidate("t1", 0.1),
            candidate("t2", 0.9),
            candidate("t3", 0.5),
            candidate("t4", 0.7),
            candidate("t5", 0.3),
        ]
    }

    #[test]
    fn threshold_table() {
        assert_eq!(select_types(&five(), 1).len(), 1);
        assert_eq!(select_types(&five(), 5).len(), 2);
        assert_eq!(select_types(&five(), 15).len(), 3);
        assert_eq!(select_types(&five(), 25).len(), 4);
        assert_eq!(select_types(&five()[..1], 100).len(), 1);
    }

    #[test]
    fn threshold_boundaries() {
        assert_eq!(type_count(10, 0), 1);
        assert_eq!(type_count(10, 2), 2);
        assert_eq!(type_count(10, 8), 2);
        assert_eq!(type_count(10, 9), 3);
        assert_eq!(type_count(10, 19), 3);
        assert_eq!(type_count(10, 20), 4);
    }

    #[test]
    fn few_candidates_cap_the_step() {
        assert_eq!(type_count(2, 50), 2);
        assert_eq!(type_count(3, 50), 3);
        assert_eq!(type_count(0, 50), 0);
    }

    #[test]
    fn selection_takes_best_cost_first() {
        let picked = select_types(&five(), 15);
        let names: Vec<_> = picked.iter().map(|t| t.instance_type_name.as_str()).collect();
        assert_eq!(names, ["t2", "t4", "t3"]);
    }

    #[test]
    fn apportion_puts_remainder_first() {
        assert_eq!(apportion(7, 3), vec![3, 2, 2]);
        assert_eq!(apportion(2, 3), vec![2, 0, 0]);
        assert_eq!(apportion(0, 2), vec![0, 0]);
        assert!(apportion(5, 0).is_empty());
    }

    #[test]
    fn apportion_is_exact() {
        for total in 0..64 {
            for parts in 1..9 {
                let shares = apportion(total, parts);
                assert_eq!(shares.len(), parts);
                assert_eq!(shares.iter().sum::<u32>(), total, "total={total} parts={parts}");
            }
        }
    }

    fn zones(spec: &[(&str, &[&str])]) -> BTreeMap<Zone, Vec<String>> {
        spec.iter()
            .map(|(z, subnets)| (z.to_string(), subnets.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn plan_spreads_over_zones_subnets_and_types() {
        let subnets = zones(&[("a", &["s-a1", "s-a2"]), ("b", &["s-b1"])]);
        let recs: Recommendations = [("a".to_string(), five()), ("b".to_string(), five())]
            .into_iter()
            .collect();

        let plan = build_plan(11, &subnets, &recs).unwrap();
        assert_eq!(plan.total(), 11);
        // zone a gets 6, split 3/3 over its subnets, 2 types each
        let a: u32 = plan.cells.iter().filter(|c| c.zone == "a").map(|c| c.count).sum();
        assert_eq!(a, 6);
        assert!(plan.cells.iter().all(|c| c.count > 0));
        assert!(
            plan.cells
                .iter()
                .filter(|c| c.zone == "a")
                .all(|c| ["t2", "t4"].contains(&c.instance_type.instance_type_name.as_str()))
        );
    }

    #[test]
    fn plan_skips_zones_without_candidates_or_subnets() {
        let subnets = zones(&[("a", &["s-a1"]), ("b", &[]), ("c", &["s-c1"])]);
        let recs: Recommendations = [("a".to_string(), five()), ("b".to_string(), five())]
            .into_iter()
            .collect();

        let plan = build_plan(4, &subnets, &recs).unwrap();
        assert_eq!(plan.total(), 4);
        assert!(plan.cells.iter().all(|c| c.zone == "a"));
    }

    #[test]
    fn plan_without_eligible_zones_fails() {
        let subnets = zones(&[("a", &["s-a1"])]);
        let recs = Recommendations::new();
        assert!(matches!(
            build_plan(3, &subnets, &recs),
            Err(ProvisionError::NoEligibleZones)
        ));
    }

    #[test]
    fn zero_target_is_an_empty_plan() {
        let plan = build_plan(0, &BTreeMap::new(), &Recommendations::new()).unwrap();
        assert!(plan.is_empty());
    }
}
