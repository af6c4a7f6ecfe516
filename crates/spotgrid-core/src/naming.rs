//! Launch-configuration naming convention.
//!
//! All controller state that outlives a process is encoded in launch
//! configuration names:
//!
//! ```text
//! <group>-ht-orig   pristine copy of the group's first configuration
//! <group>-ht-1      rotation slot 1
//! <group>-ht-2      rotation slot 2
//! ```
//!
//! Rotation alternates between the two slots so the previous slot can be
//! deleted once the group points at the new one. The `-ht-orig` copy is
//! never a rotation target and never deleted while its group is managed.

const ORIGINAL_SUFFIX: &str = "-ht-orig";
const SLOT_1_SUFFIX: &str = "-ht-1";
const SLOT_2_SUFFIX: &str = "-ht-2";

/// Name of the preserved baseline configuration for `group`.
pub fn original(group: &str) -> String {
    format!("{group}{ORIGINAL_SUFFIX}")
}

/// Name of rotation slot 1 for `group`.
pub fn slot_1(group: &str) -> String {
    format!("{group}{SLOT_1_SUFFIX}")
}

/// Name of rotation slot 2 for `group`.
pub fn slot_2(group: &str) -> String {
    format!("{group}{SLOT_2_SUFFIX}")
}

/// Whether `name` is one of `group`'s two rotation slots.
pub fn is_rotation_slot(group: &str, name: &str) -> bool {
    name == slot_1(group) || name == slot_2(group)
}

/// The slot the next rotation writes to, given the group's current
/// configuration name. Anything other than slot 1 rotates into slot 1.
pub fn next_slot(group: &str, current: &str) -> String {
    if current == slot_1(group) {
        slot_2(group)
    } else {
        slot_1(group)
    }
}

/// The group a controller-created configuration belongs to, if `name`
/// follows the convention.
pub fn owner(name: &str) -> Option<&str> {
    [ORIGINAL_SUFFIX, SLOT_1_SUFFIX, SLOT_2_SUFFIX]
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .filter(|group| !group.is_empty())
}
