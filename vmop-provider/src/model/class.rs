//! VirtualMachineClass: the hardware template a VM is sized from.

use serde::{Deserialize, Serialize};

use super::vmconfig::ConfigSpec;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VgpuDevice {
    pub profile_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicDirectPathIoDevice {
    pub vendor_id: i32,
    pub device_id: i32,
    pub custom_label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassDevices {
    pub vgpu_devices: Vec<VgpuDevice>,
    pub dynamic_direct_path_io_devices: Vec<DynamicDirectPathIoDevice>,
}

impl ClassDevices {
    pub fn has_pci_passthrough(&self) -> bool {
        !self.vgpu_devices.is_empty() || !self.dynamic_direct_path_io_devices.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceStorage {
    pub storage_class: String,
    pub volume_sizes_bytes: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassHardware {
    pub cpus: i32,
    pub memory_mb: i64,
    pub devices: ClassDevices,
    pub instance_storage: InstanceStorage,
}

/// CPU in MHz, memory in MiB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceQuantities {
    pub cpu_mhz: Option<i64>,
    pub memory_mb: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassResources {
    pub requests: ResourceQuantities,
    pub limits: ResourceQuantities,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassSpec {
    pub hardware: ClassHardware,
    pub resources: ClassResources,
    /// Optional backend configuration template merged under the synthesized fields.
    pub config_spec: Option<ConfigSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualMachineClass {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub generation: i64,
    pub ready: bool,
    pub spec: ClassSpec,
}

/// Identity recorded when a VM is reconfigured against a class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassIdentity {
    pub name: String,
    pub uid: String,
    pub generation: i64,
}

impl VirtualMachineClass {
    pub fn identity(&self) -> ClassIdentity {
        ClassIdentity {
            name: self.name.clone(),
            uid: self.uid.clone(),
            generation: self.generation,
        }
    }
}
