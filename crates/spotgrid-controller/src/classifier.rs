//! Group classification.
//!
//! A pure function of a group snapshot's tags, desired capacity and member
//! lifecycle states. Rules are checked in priority order and the first
//! match wins, so a group with both pending and terminating members never
//! classifies as downscaling.

use spotgrid_core::{ManagedGroup, ManagedTag, PoolAction};

/// Whether the group carries the managed-fleet tag.
pub fn is_managed(group: &ManagedGroup, tag: &ManagedTag) -> bool {
    group.has_tag(&tag.key, &tag.value)
}

/// The action the fast loop should take for `group`, if any.
///
/// `None` means the group is stable or has nothing to do; stable groups
/// are left to the reevaluation pass.
pub fn classify(group: &ManagedGroup) -> Option<PoolAction> {
    let members = group.instances.len();
    let pending = group.pending_count();
    let terminating = group.terminating_count();
    let desired = group.desired_capacity;

    if desired != 0 && (members == 0 || pending == members) {
        return Some(PoolAction::Initializing);
    }
    if desired != 0 && pending > 0 && terminating == 0 {
        return Some(PoolAction::Upscaling);
    }
    if terminating > 0 && pending == 0 {
        return Some(PoolAction::Downscaling);
    }
    None
}

/// No member is pending or terminating.
pub fn is_stable(group: &ManagedGroup) -> bool {
    group.pending_count() == 0 && group.terminating_count() == 0
}
