//! Machine configuration shapes exchanged with the backend.
//!
//! [`ConfigSpec`] is both the synthesized target configuration and the
//! change-set submitted in a reconfigure call. [`ConfigInfo`] is the observed
//! configuration read back from the backend.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::device::{Device, DeviceOperation};

/// Desired machine configuration, or a patch against an observed one.
pub type TargetConfiguration = ConfigSpec;

/// Overrides plus device operations submitted in one reconfigure call.
pub type ChangeSet = ConfigSpec;

/// Observed machine configuration.
pub type ObservedConfiguration = ConfigInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Firmware {
    Bios,
    Efi,
}

impl Firmware {
    pub fn as_str(&self) -> &'static str {
        match self {
            Firmware::Bios => "bios",
            Firmware::Efi => "efi",
        }
    }
}

impl std::str::FromStr for Firmware {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bios" => Ok(Firmware::Bios),
            "efi" => Ok(Firmware::Efi),
            _ => Err(format!("unknown firmware: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SharesLevel {
    Low,
    Normal,
    High,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharesInfo {
    pub level: SharesLevel,
    pub shares: i32,
}

/// CPU (MHz) or memory (MiB) allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceAllocation {
    pub reservation: Option<i64>,
    pub limit: Option<i64>,
    pub shares: Option<SharesInfo>,
}

impl ResourceAllocation {
    /// Overlay the non-zero sub-fields of `desired` onto `self`.
    ///
    /// A zero share count with a non-custom level names only the level; the
    /// backend derives the count, so an observed value at that level is kept.
    pub fn merged_with(&self, desired: &ResourceAllocation) -> ResourceAllocation {
        let non_zero = |v: Option<i64>| v.filter(|v| *v != 0);
        let shares = match desired.shares {
            Some(want) if want.shares == 0 => match self.shares {
                Some(have) if want.level == SharesLevel::Custom || have.level == want.level => {
                    Some(have)
                }
                None if want.level == SharesLevel::Custom => None,
                _ => Some(want),
            },
            Some(want) => Some(want),
            None => self.shares,
        };
        ResourceAllocation {
            reservation: non_zero(desired.reservation).or(self.reservation),
            limit: non_zero(desired.limit).or(self.limit),
            shares,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedBy {
    pub extension_key: String,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LatencySensitivityLevel {
    Low,
    Normal,
    Medium,
    High,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySensitivity {
    pub level: LatencySensitivityLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MigrateEncryption {
    Disabled,
    Opportunistic,
    Required,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionValue {
    pub key: String,
    pub value: String,
}

impl OptionValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConsolePreferences {
    pub power_on_when_opened: Option<bool>,
    pub enter_full_screen_on_power_on: Option<bool>,
    pub close_on_power_off_or_suspend: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Flags {
    pub cbrc_cache_enabled: Option<bool>,
    pub disable_acceleration: Option<bool>,
    pub disk_uuid_enabled: Option<bool>,
    pub enable_logging: Option<bool>,
    pub use_toe: Option<bool>,
    pub vvtd_enabled: Option<bool>,
    pub vbs_enabled: Option<bool>,
    pub monitor_type: Option<String>,
    pub virtual_mmu_usage: Option<String>,
    pub virtual_exec_usage: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GuestMonitoringMode {
    pub gmm_file: Option<String>,
    pub gmm_appliance: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NpivWwnOp {
    Generate,
    Set,
    Remove,
}

/// Target configuration or change-set.
///
/// `None` (or an empty list) means "not specified": the field is left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigSpec {
    pub name: Option<String>,
    pub annotation: Option<String>,
    pub managed_by: Option<ManagedBy>,
    /// Hardware version string, e.g. `vmx-19`.
    pub version: Option<String>,
    pub firmware: Option<Firmware>,

    pub num_cpus: Option<i32>,
    pub num_cores_per_socket: Option<i32>,
    pub memory_mb: Option<i64>,
    pub virtual_ich7m_present: Option<bool>,
    pub virtual_smc_present: Option<bool>,
    pub motherboard_layout: Option<String>,
    pub simultaneous_threads: Option<i32>,

    pub cpu_allocation: Option<ResourceAllocation>,
    pub memory_allocation: Option<ResourceAllocation>,
    pub cpu_affinity: Option<Vec<i32>>,
    pub latency_sensitivity: Option<LatencySensitivity>,

    pub cpu_hot_add_enabled: Option<bool>,
    pub cpu_hot_remove_enabled: Option<bool>,
    pub vpmc_enabled: Option<bool>,
    pub memory_hot_add_enabled: Option<bool>,
    pub fixed_passthru_hot_plug_enabled: Option<bool>,
    pub nested_hv_enabled: Option<bool>,
    pub sev_enabled: Option<bool>,
    pub vmx_stats_collection_enabled: Option<bool>,
    pub memory_reservation_locked_to_max: Option<bool>,
    pub change_tracking_enabled: Option<bool>,
    pub migrate_encryption: Option<MigrateEncryption>,

    pub extra_config: Vec<OptionValue>,
    pub console_preferences: Option<ConsolePreferences>,
    pub flags: Option<Flags>,
    pub guest_monitoring_mode: Option<GuestMonitoringMode>,

    pub npiv_temporary_disabled: Option<bool>,
    pub npiv_on_non_rdm_disks: Option<bool>,
    pub npiv_work_wwn_op: Option<NpivWwnOp>,
    pub npiv_desired_node_wwns: Option<i16>,
    pub npiv_desired_port_wwns: Option<i16>,
    pub npiv_node_world_wide_name: Vec<i64>,
    pub npiv_port_world_wide_name: Vec<i64>,

    pub device_changes: Vec<DeviceOperation>,
}

impl ConfigSpec {
    /// An empty change-set needs no backend call.
    pub fn is_empty(&self) -> bool {
        *self == ConfigSpec::default()
    }

    /// True if any device operation adds a PCI passthrough device.
    pub fn adds_pci_passthrough(&self) -> bool {
        self.device_changes.iter().any(|op| op.adds_pci_passthrough())
    }

    pub fn extra_config_value(&self, key: &str) -> Option<&str> {
        self.extra_config
            .iter()
            .find(|ov| ov.key == key)
            .map(|ov| ov.value.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VirtualHardware {
    pub num_cpu: i32,
    pub num_cores_per_socket: Option<i32>,
    pub memory_mb: i64,
    pub virtual_ich7m_present: Option<bool>,
    pub virtual_smc_present: Option<bool>,
    pub motherboard_layout: Option<String>,
    pub simultaneous_threads: Option<i32>,
    pub devices: Vec<Device>,
}

/// Observed machine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigInfo {
    pub name: String,
    pub annotation: Option<String>,
    pub managed_by: Option<ManagedBy>,
    pub version: String,
    pub firmware: Option<Firmware>,
    pub uuid: String,
    pub instance_uuid: String,
    pub hardware: VirtualHardware,

    pub cpu_allocation: Option<ResourceAllocation>,
    pub memory_allocation: Option<ResourceAllocation>,
    pub cpu_affinity: Option<Vec<i32>>,
    pub latency_sensitivity: Option<LatencySensitivity>,

    pub cpu_hot_add_enabled: Option<bool>,
    pub cpu_hot_remove_enabled: Option<bool>,
    pub vpmc_enabled: Option<bool>,
    pub memory_hot_add_enabled: Option<bool>,
    pub fixed_passthru_hot_plug_enabled: Option<bool>,
    pub nested_hv_enabled: Option<bool>,
    pub sev_enabled: Option<bool>,
    pub vmx_stats_collection_enabled: Option<bool>,
    pub memory_reservation_locked_to_max: Option<bool>,
    pub change_tracking_enabled: Option<bool>,
    pub migrate_encryption: Option<MigrateEncryption>,

    pub extra_config: Vec<OptionValue>,
    pub console_preferences: Option<ConsolePreferences>,
    pub flags: Option<Flags>,
    pub guest_monitoring_mode: Option<GuestMonitoringMode>,

    pub npiv_temporary_disabled: Option<bool>,
    pub npiv_on_non_rdm_disks: Option<bool>,
    pub npiv_node_world_wide_name: Vec<i64>,
    pub npiv_port_world_wide_name: Vec<i64>,
}

fn set<T: Clone>(target: &mut T, value: &Option<T>) {
    if let Some(v) = value {
        *target = v.clone();
    }
}

fn set_opt<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        *target = value.clone();
    }
}

impl ConfigInfo {
    pub fn extra_config_value(&self, key: &str) -> Option<&str> {
        self.extra_config
            .iter()
            .find(|ov| ov.key == key)
            .map(|ov| ov.value.as_str())
    }

    pub fn has_pci_passthrough(&self) -> bool {
        self.hardware.devices.iter().any(Device::is_pci_passthrough)
    }

    /// Apply a change-set the way the backend does.
    ///
    /// Added devices get fresh positive keys, and placeholder references
    /// between devices of the same batch are rewritten to those keys.
    pub fn apply(&mut self, changes: &ChangeSet) {
        set(&mut self.name, &changes.name);
        set_opt(&mut self.annotation, &changes.annotation);
        set_opt(&mut self.managed_by, &changes.managed_by);
        set(&mut self.version, &changes.version);
        set_opt(&mut self.firmware, &changes.firmware);

        set(&mut self.hardware.num_cpu, &changes.num_cpus);
        set_opt(&mut self.hardware.num_cores_per_socket, &changes.num_cores_per_socket);
        set(&mut self.hardware.memory_mb, &changes.memory_mb);
        set_opt(&mut self.hardware.virtual_ich7m_present, &changes.virtual_ich7m_present);
        set_opt(&mut self.hardware.virtual_smc_present, &changes.virtual_smc_present);
        set_opt(&mut self.hardware.motherboard_layout, &changes.motherboard_layout);
        set_opt(&mut self.hardware.simultaneous_threads, &changes.simultaneous_threads);

        set_opt(&mut self.cpu_allocation, &changes.cpu_allocation);
        set_opt(&mut self.memory_allocation, &changes.memory_allocation);
        set_opt(&mut self.cpu_affinity, &changes.cpu_affinity);
        set_opt(&mut self.latency_sensitivity, &changes.latency_sensitivity);

        set_opt(&mut self.cpu_hot_add_enabled, &changes.cpu_hot_add_enabled);
        set_opt(&mut self.cpu_hot_remove_enabled, &changes.cpu_hot_remove_enabled);
        set_opt(&mut self.vpmc_enabled, &changes.vpmc_enabled);
        set_opt(&mut self.memory_hot_add_enabled, &changes.memory_hot_add_enabled);
        set_opt(
            &mut self.fixed_passthru_hot_plug_enabled,
            &changes.fixed_passthru_hot_plug_enabled,
        );
        set_opt(&mut self.nested_hv_enabled, &changes.nested_hv_enabled);
        set_opt(&mut self.sev_enabled, &changes.sev_enabled);
        set_opt(
            &mut self.vmx_stats_collection_enabled,
            &changes.vmx_stats_collection_enabled,
        );
        set_opt(
            &mut self.memory_reservation_locked_to_max,
            &changes.memory_reservation_locked_to_max,
        );
        set_opt(&mut self.change_tracking_enabled, &changes.change_tracking_enabled);
        set_opt(&mut self.migrate_encryption, &changes.migrate_encryption);

        for ov in &changes.extra_config {
            let pos = self.extra_config.iter().position(|e| e.key == ov.key);
            match (pos, ov.value.is_empty()) {
                // An empty value deletes the key.
                (Some(i), true) => {
                    self.extra_config.remove(i);
                }
                (Some(i), false) => self.extra_config[i].value = ov.value.clone(),
                (None, true) => {}
                (None, false) => self.extra_config.push(ov.clone()),
            }
        }

        set_opt(&mut self.console_preferences, &changes.console_preferences);
        set_opt(&mut self.flags, &changes.flags);
        set_opt(&mut self.guest_monitoring_mode, &changes.guest_monitoring_mode);

        set_opt(&mut self.npiv_temporary_disabled, &changes.npiv_temporary_disabled);
        set_opt(&mut self.npiv_on_non_rdm_disks, &changes.npiv_on_non_rdm_disks);
        match changes.npiv_work_wwn_op {
            Some(NpivWwnOp::Remove) => {
                self.npiv_node_world_wide_name.clear();
                self.npiv_port_world_wide_name.clear();
            }
            Some(NpivWwnOp::Generate) => {
                let nodes = changes.npiv_desired_node_wwns.unwrap_or(0).max(0) as usize;
                let ports = changes.npiv_desired_port_wwns.unwrap_or(0).max(0) as usize;
                generate_wwns(&mut self.npiv_node_world_wide_name, nodes, 0x2000);
                generate_wwns(&mut self.npiv_port_world_wide_name, ports, 0x2100);
            }
            Some(NpivWwnOp::Set) => {
                self.npiv_node_world_wide_name = changes.npiv_node_world_wide_name.clone();
                self.npiv_port_world_wide_name = changes.npiv_port_world_wide_name.clone();
            }
            None => {}
        }

        self.apply_device_changes(&changes.device_changes);
    }

    fn apply_device_changes(&mut self, ops: &[DeviceOperation]) {
        let devices = &mut self.hardware.devices;
        let mut next_key = devices.iter().map(Device::key).max().unwrap_or(0).max(999) + 1;
        let mut assigned: HashMap<i32, i32> = HashMap::new();

        for op in ops.iter().filter(|op| op.is_add()) {
            let placeholder = op.device().key();
            if placeholder < 0 {
                assigned.insert(placeholder, next_key);
                next_key += 1;
            }
        }

        for op in ops {
            match op {
                DeviceOperation::Add { device, .. } => {
                    let mut device = device.clone();
                    let base = device.base_mut();
                    if let Some(&key) = assigned.get(&base.key) {
                        base.key = key;
                    }
                    if let Some(parent) = base.controller_key {
                        if let Some(&key) = assigned.get(&parent) {
                            base.controller_key = Some(key);
                        }
                    }
                    devices.push(device);
                }
                DeviceOperation::Edit { device } => {
                    if let Some(existing) = devices.iter_mut().find(|d| d.key() == device.key()) {
                        *existing = device.clone();
                    }
                }
                DeviceOperation::Remove { device } => {
                    devices.retain(|d| d.key() != device.key());
                }
            }
        }
    }
}

fn generate_wwns(wwns: &mut Vec<i64>, count: usize, prefix: i64) {
    while wwns.len() < count {
        let next = (prefix << 48) | wwns.len() as i64;
        wwns.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::device::{Connectable, Controller, ControllerKind, DeviceBase, VirtualCdrom};

    #[test]
    fn test_firmware_roundtrip() {
        for fw in [Firmware::Bios, Firmware::Efi] {
            assert_eq!(fw.as_str().parse::<Firmware>().unwrap(), fw);
        }
        assert_eq!("EFI".parse::<Firmware>().unwrap(), Firmware::Efi);
        assert!("uefi".parse::<Firmware>().is_err());
    }

    #[test]
    fn test_allocation_merge() {
        let observed = ResourceAllocation {
            reservation: Some(100),
            limit: Some(200),
            shares: None,
        };
        let desired = ResourceAllocation {
            reservation: Some(150),
            limit: None,
            shares: Some(SharesInfo {
                level: SharesLevel::Normal,
                shares: 1000,
            }),
        };
        let merged = observed.merged_with(&desired);
        assert_eq!(merged.reservation, Some(150));
        assert_eq!(merged.limit, Some(200));
        assert_eq!(merged.shares.map(|s| s.level), Some(SharesLevel::Normal));
    }

    #[test]
    fn test_is_empty() {
        assert!(ConfigSpec::default().is_empty());
        let spec = ConfigSpec {
            num_cpus: Some(2),
            ..Default::default()
        };
        assert!(!spec.is_empty());
    }

    #[test]
    fn test_apply_extra_config_upsert_and_delete() {
        let mut info = ConfigInfo {
            extra_config: vec![OptionValue::new("a", "1"), OptionValue::new("b", "2")],
            ..Default::default()
        };
        info.apply(&ConfigSpec {
            extra_config: vec![
                OptionValue::new("a", "10"),
                OptionValue::new("b", ""),
                OptionValue::new("c", "3"),
            ],
            ..Default::default()
        });
        assert_eq!(info.extra_config_value("a"), Some("10"));
        assert_eq!(info.extra_config_value("b"), None);
        assert_eq!(info.extra_config_value("c"), Some("3"));
    }

    #[test]
    fn test_apply_resolves_placeholder_keys() {
        let mut info = ConfigInfo::default();
        let ahci = Device::Controller(Controller {
            base: DeviceBase {
                key: -1,
                ..Default::default()
            },
            kind: ControllerKind::Ahci,
            bus_number: 0,
            capacity: None,
        });
        let cdrom = Device::Cdrom(VirtualCdrom {
            base: DeviceBase {
                key: -2,
                controller_key: Some(-1),
                unit_number: Some(0),
                connectable: Some(Connectable::default()),
            },
            backing: None,
        });
        info.apply(&ConfigSpec {
            device_changes: vec![DeviceOperation::add(ahci), DeviceOperation::add(cdrom)],
            ..Default::default()
        });

        let devices = &info.hardware.devices;
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(|d| d.key() > 0));
        assert_eq!(devices[1].base().controller_key, Some(devices[0].key()));
    }

    #[test]
    fn test_apply_npiv_generate_extends_to_count() {
        let mut info = ConfigInfo {
            npiv_node_world_wide_name: vec![1],
            ..Default::default()
        };
        info.apply(&ConfigSpec {
            npiv_work_wwn_op: Some(NpivWwnOp::Generate),
            npiv_desired_node_wwns: Some(2),
            npiv_desired_port_wwns: Some(3),
            ..Default::default()
        });
        assert_eq!(info.npiv_node_world_wide_name.len(), 2);
        assert_eq!(info.npiv_node_world_wide_name[0], 1);
        assert_eq!(info.npiv_port_world_wide_name.len(), 3);
    }
}
