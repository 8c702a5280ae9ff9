//! Config diff engine.
//!
//! [`diff`] compares an observed configuration against a target configuration
//! and returns the change-set needed to move the former toward the latter.
//! Each field is compared explicitly because fields differ in how they merge:
//!
//! - scalars are copied when the target sets them and they differ
//! - allocations merge the target's set sub-fields over the observed ones
//! - CPU affinity compares as a set, extra config upserts by key
//! - composite structs are submitted whole when any set sub-field differs
//! - NPIV identities follow the requested remove/generate/set operation
//!
//! A field the target leaves unset never clears an observed value. Device
//! operations are not produced here; see [`crate::devices`].

use std::collections::BTreeSet;

use crate::model::vmconfig::{
    ChangeSet, ConfigInfo, ConfigSpec, ConsolePreferences, Flags, GuestMonitoringMode, NpivWwnOp,
    ResourceAllocation,
};

/// Compute the change-set that moves `observed` to `desired`.
pub fn diff(observed: &ConfigInfo, desired: &ConfigSpec) -> ChangeSet {
    let hw = &observed.hardware;
    let mut out = ChangeSet {
        annotation: changed_str(&desired.annotation, observed.annotation.as_ref()),
        managed_by: changed(&desired.managed_by, observed.managed_by.as_ref()),

        num_cpus: changed(&desired.num_cpus, Some(&hw.num_cpu)),
        num_cores_per_socket: changed(&desired.num_cores_per_socket, hw.num_cores_per_socket.as_ref()),
        memory_mb: changed(&desired.memory_mb, Some(&hw.memory_mb)),
        virtual_ich7m_present: changed(&desired.virtual_ich7m_present, hw.virtual_ich7m_present.as_ref()),
        virtual_smc_present: changed(&desired.virtual_smc_present, hw.virtual_smc_present.as_ref()),
        motherboard_layout: changed_str(&desired.motherboard_layout, hw.motherboard_layout.as_ref()),
        simultaneous_threads: changed(&desired.simultaneous_threads, hw.simultaneous_threads.as_ref()),

        cpu_allocation: allocation_change(
            observed.cpu_allocation.as_ref(),
            desired.cpu_allocation.as_ref(),
        ),
        memory_allocation: allocation_change(
            observed.memory_allocation.as_ref(),
            desired.memory_allocation.as_ref(),
        ),
        cpu_affinity: affinity_change(observed.cpu_affinity.as_ref(), desired.cpu_affinity.as_ref()),
        latency_sensitivity: changed(&desired.latency_sensitivity, observed.latency_sensitivity.as_ref()),

        cpu_hot_add_enabled: changed(&desired.cpu_hot_add_enabled, observed.cpu_hot_add_enabled.as_ref()),
        cpu_hot_remove_enabled: changed(
            &desired.cpu_hot_remove_enabled,
            observed.cpu_hot_remove_enabled.as_ref(),
        ),
        vpmc_enabled: changed(&desired.vpmc_enabled, observed.vpmc_enabled.as_ref()),
        memory_hot_add_enabled: changed(
            &desired.memory_hot_add_enabled,
            observed.memory_hot_add_enabled.as_ref(),
        ),
        fixed_passthru_hot_plug_enabled: changed(
            &desired.fixed_passthru_hot_plug_enabled,
            observed.fixed_passthru_hot_plug_enabled.as_ref(),
        ),
        nested_hv_enabled: changed(&desired.nested_hv_enabled, observed.nested_hv_enabled.as_ref()),
        sev_enabled: changed(&desired.sev_enabled, observed.sev_enabled.as_ref()),
        vmx_stats_collection_enabled: changed(
            &desired.vmx_stats_collection_enabled,
            observed.vmx_stats_collection_enabled.as_ref(),
        ),
        change_tracking_enabled: changed(
            &desired.change_tracking_enabled,
            observed.change_tracking_enabled.as_ref(),
        ),
        migrate_encryption: changed(&desired.migrate_encryption, observed.migrate_encryption.as_ref()),
        memory_reservation_locked_to_max: locked_to_max_change(observed, desired),

        console_preferences: composite_change(
            observed.console_preferences.as_ref(),
            desired.console_preferences.as_ref(),
        ),
        flags: composite_change(observed.flags.as_ref(), desired.flags.as_ref()),
        guest_monitoring_mode: composite_change(
            observed.guest_monitoring_mode.as_ref(),
            desired.guest_monitoring_mode.as_ref(),
        ),

        npiv_temporary_disabled: changed(
            &desired.npiv_temporary_disabled,
            observed.npiv_temporary_disabled.as_ref(),
        ),
        npiv_on_non_rdm_disks: changed(
            &desired.npiv_on_non_rdm_disks,
            observed.npiv_on_non_rdm_disks.as_ref(),
        ),
        ..Default::default()
    };

    out.extra_config = desired
        .extra_config
        .iter()
        .filter(|ov| match observed.extra_config_value(&ov.key) {
            Some(value) => value != ov.value,
            // Deleting a key that is not there is a no-op.
            None => !ov.value.is_empty(),
        })
        .cloned()
        .collect();

    npiv_change(observed, desired, &mut out);

    out
}

fn changed<T: PartialEq + Clone>(desired: &Option<T>, observed: Option<&T>) -> Option<T> {
    match desired {
        Some(d) if Some(d) != observed => Some(d.clone()),
        _ => None,
    }
}

/// Like [`changed`], but an empty string counts as unset.
fn changed_str(desired: &Option<String>, observed: Option<&String>) -> Option<String> {
    match desired {
        Some(d) if d.is_empty() => None,
        _ => changed(desired, observed),
    }
}

fn allocation_change(
    observed: Option<&ResourceAllocation>,
    desired: Option<&ResourceAllocation>,
) -> Option<ResourceAllocation> {
    let desired = desired?;
    let base = observed.cloned().unwrap_or_default();
    let merged = base.merged_with(desired);
    (merged != base).then_some(merged)
}

fn affinity_change(observed: Option<&Vec<i32>>, desired: Option<&Vec<i32>>) -> Option<Vec<i32>> {
    let desired = desired?;
    let want: BTreeSet<i32> = desired.iter().copied().collect();
    let have: BTreeSet<i32> = observed.into_iter().flatten().copied().collect();
    (want != have).then(|| desired.clone())
}

/// The reservation cannot be unlocked while PCI passthrough devices are
/// attached or being added. Such a request is dropped.
fn locked_to_max_change(observed: &ConfigInfo, desired: &ConfigSpec) -> Option<bool> {
    let want = desired.memory_reservation_locked_to_max?;
    if !want && (desired.adds_pci_passthrough() || observed.has_pci_passthrough()) {
        return None;
    }
    changed(
        &Some(want),
        observed.memory_reservation_locked_to_max.as_ref(),
    )
}

fn npiv_change(observed: &ConfigInfo, desired: &ConfigSpec, out: &mut ChangeSet) {
    let nodes = &observed.npiv_node_world_wide_name;
    let ports = &observed.npiv_port_world_wide_name;

    match desired.npiv_work_wwn_op {
        Some(NpivWwnOp::Remove) => {
            if !nodes.is_empty() || !ports.is_empty() {
                out.npiv_work_wwn_op = Some(NpivWwnOp::Remove);
            }
        }
        Some(NpivWwnOp::Generate) => {
            let want_nodes = desired.npiv_desired_node_wwns.unwrap_or(0).max(0) as usize;
            let want_ports = desired.npiv_desired_port_wwns.unwrap_or(0).max(0) as usize;
            if want_nodes > nodes.len() || want_ports > ports.len() {
                out.npiv_work_wwn_op = Some(NpivWwnOp::Generate);
                out.npiv_desired_node_wwns = desired.npiv_desired_node_wwns;
                out.npiv_desired_port_wwns = desired.npiv_desired_port_wwns;
            }
        }
        Some(NpivWwnOp::Set) => {
            if desired.npiv_node_world_wide_name != *nodes
                || desired.npiv_port_world_wide_name != *ports
            {
                out.npiv_work_wwn_op = Some(NpivWwnOp::Set);
                out.npiv_node_world_wide_name = desired.npiv_node_world_wide_name.clone();
                out.npiv_port_world_wide_name = desired.npiv_port_world_wide_name.clone();
            }
        }
        None => {}
    }
}

/// Structs the backend only accepts whole.
trait Composite: Clone + Default {
    /// True if any sub-field set in `self` differs from `observed`.
    fn differs_from(&self, observed: &Self) -> bool;
}

fn set_and_differs<T: PartialEq>(desired: &Option<T>, observed: &Option<T>) -> bool {
    desired.is_some() && desired != observed
}

impl Composite for ConsolePreferences {
    fn differs_from(&self, observed: &Self) -> bool {
        set_and_differs(&self.power_on_when_opened, &observed.power_on_when_opened)
            || set_and_differs(
                &self.enter_full_screen_on_power_on,
                &observed.enter_full_screen_on_power_on,
            )
            || set_and_differs(
                &self.close_on_power_off_or_suspend,
                &observed.close_on_power_off_or_suspend,
            )
    }
}

impl Composite for Flags {
    fn differs_from(&self, observed: &Self) -> bool {
        set_and_differs(&self.cbrc_cache_enabled, &observed.cbrc_cache_enabled)
            || set_and_differs(&self.disable_acceleration, &observed.disable_acceleration)
            || set_and_differs(&self.disk_uuid_enabled, &observed.disk_uuid_enabled)
            || set_and_differs(&self.enable_logging, &observed.enable_logging)
            || set_and_differs(&self.use_toe, &observed.use_toe)
            || set_and_differs(&self.vvtd_enabled, &observed.vvtd_enabled)
            || set_and_differs(&self.vbs_enabled, &observed.vbs_enabled)
            || set_and_differs(&self.monitor_type, &observed.monitor_type)
            || set_and_differs(&self.virtual_mmu_usage, &observed.virtual_mmu_usage)
            || set_and_differs(&self.virtual_exec_usage, &observed.virtual_exec_usage)
    }
}

impl Composite for GuestMonitoringMode {
    fn differs_from(&self, observed: &Self) -> bool {
        set_and_differs(&self.gmm_file, &observed.gmm_file)
            || set_and_differs(&self.gmm_appliance, &observed.gmm_appliance)
    }
}

fn composite_change<T: Composite>(observed: Option<&T>, desired: Option<&T>) -> Option<T> {
    let desired = desired?;
    let absent = T::default();
    let observed = observed.unwrap_or(&absent);
    desired.differs_from(observed).then(|| desired.clone())
}
