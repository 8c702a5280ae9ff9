//! The declarative VirtualMachine object.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::status::VirtualMachineStatus;

/// Annotation overriding the firmware reported by the image.
pub const FIRMWARE_OVERRIDE_ANNOTATION: &str = "vmoperator.vmware.com/firmware";
/// Annotation overriding the 64-bit MMIO size for PCI passthrough.
pub const PCI_PASSTHRU_MMIO_ANNOTATION: &str = "vmoperator.vmware.com/pci-passthru-mmio-size";
/// Class identity the VM was last reconfigured against.
pub const LAST_RESIZED_ANNOTATION: &str = "vmoperator.vmware.com/last-resized-vm-class";
/// Presence forces a resize even when the class has not changed.
pub const SAME_CLASS_RESIZE_ANNOTATION: &str = "vmoperator.vmware.com/same-vm-class-resize";
/// Set once the instance storage claims are bound.
pub const INSTANCE_STORAGE_BOUND_ANNOTATION: &str = "vmoperator.vmware.com/instance-storage-pvcs-bound";
/// Host selected by placement.
pub const SELECTED_HOST_ANNOTATION: &str = "vmoperator.vmware.com/instance-storage-selected-node";
/// Zone label written after placement.
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub generation: i64,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    #[serde(rename = "PoweredOn")]
    On,
    #[serde(rename = "PoweredOff")]
    Off,
    #[serde(rename = "Suspended")]
    Suspended,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::On => "PoweredOn",
            PowerState::Off => "PoweredOff",
            PowerState::Suspended => "Suspended",
        }
    }
}

/// Reference to an image. A missing kind means "namespace, then cluster".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageRef {
    pub kind: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkRef {
    pub kind: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceSpec {
    pub name: String,
    pub network: Option<NetworkRef>,
    pub addresses: Vec<String>,
    pub dhcp4: bool,
    pub dhcp6: bool,
    pub gateway4: Option<String>,
    pub gateway6: Option<String>,
    pub mtu: Option<i64>,
    pub nameservers: Vec<String>,
    pub search_domains: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSpec {
    pub disabled: bool,
    pub interfaces: Vec<InterfaceSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceVolumeClaim {
    pub storage_class: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimVolumeSource {
    pub claim_name: String,
    pub read_only: bool,
    pub instance_volume: Option<InstanceVolumeClaim>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeSpec {
    pub name: String,
    pub claim: Option<ClaimVolumeSource>,
}

impl VolumeSpec {
    pub fn instance_volume(&self) -> Option<&InstanceVolumeClaim> {
        self.claim.as_ref().and_then(|c| c.instance_volume.as_ref())
    }
}

/// A removable-media drive backed by an ISO image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdromSpec {
    pub name: String,
    pub image: ImageRef,
    pub connected: Option<bool>,
    pub allow_guest_control: Option<bool>,
}

impl CdromSpec {
    pub fn connected(&self) -> bool {
        self.connected.unwrap_or(true)
    }

    pub fn allow_guest_control(&self) -> bool {
        self.allow_guest_control.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VAppProperty {
    pub key: String,
    pub value: Option<String>,
    pub from: Option<SecretKeyRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VAppSpec {
    /// Secret whose data is used verbatim as vApp properties.
    pub raw_properties: Option<String>,
    pub properties: Vec<VAppProperty>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapSpec {
    /// Secret holding a raw cloud-init config.
    pub cloud_init_secret: Option<String>,
    /// Secret holding a raw sysprep answer file.
    pub sysprep_secret: Option<String>,
    pub vapp: Option<VAppSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualMachineSpec {
    pub class_name: String,
    pub image: Option<ImageRef>,
    pub storage_class: String,
    pub power_state: Option<PowerState>,
    pub min_hardware_version: i32,
    pub network: NetworkSpec,
    pub volumes: Vec<VolumeSpec>,
    pub cdrom: Vec<CdromSpec>,
    pub bootstrap: BootstrapSpec,
    pub resource_policy_name: Option<String>,
    pub change_block_tracking: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualMachine {
    pub metadata: ObjectMeta,
    pub spec: VirtualMachineSpec,
    pub status: VirtualMachineStatus,
}

impl VirtualMachine {
    /// `namespace/name`, used in log lines and error messages.
    pub fn key(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    pub fn has_claim_volumes(&self) -> bool {
        self.spec.volumes.iter().any(|v| v.claim.is_some())
    }

    pub fn has_instance_volumes(&self) -> bool {
        self.spec.volumes.iter().any(|v| v.instance_volume().is_some())
    }
}
