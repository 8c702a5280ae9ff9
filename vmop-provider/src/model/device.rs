//! Virtual devices and device operations.

use serde::{Deserialize, Serialize};

/// Fields shared by every virtual device.
///
/// Keys assigned by the backend are positive. Devices staged in a change-set
/// carry negative placeholder keys until the backend assigns real ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceBase {
    pub key: i32,
    pub controller_key: Option<i32>,
    pub unit_number: Option<i32>,
    pub connectable: Option<Connectable>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connectable {
    pub start_connected: bool,
    pub connected: bool,
    pub allow_guest_control: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskBacking {
    pub file_name: String,
    pub thin_provisioned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDisk {
    pub base: DeviceBase,
    pub capacity_bytes: i64,
    pub backing: DiskBacking,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EthernetCardType {
    #[default]
    Vmxnet3,
    E1000,
    E1000e,
}

/// Network a NIC attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NetworkBacking {
    Network {
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    DistributedPortGroup {
        switch_uuid: String,
        portgroup_key: String,
    },
    #[serde(rename_all = "camelCase")]
    Opaque {
        network_id: String,
        network_type: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthernetCard {
    pub base: DeviceBase,
    pub card_type: EthernetCardType,
    pub mac_address: Option<String>,
    pub external_id: Option<String>,
    pub backing: Option<NetworkBacking>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdromBacking {
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualCdrom {
    pub base: DeviceBase,
    pub backing: Option<CdromBacking>,
}

impl VirtualCdrom {
    /// Backing file the CD-ROM maps to, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.backing.as_ref().map(|b| b.file_name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PciBacking {
    Vgpu {
        profile: String,
    },
    #[serde(rename_all = "camelCase")]
    DynamicDirectPath {
        vendor_id: i32,
        device_id: i32,
        custom_label: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PciPassthrough {
    pub base: DeviceBase,
    pub backing: PciBacking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControllerKind {
    Ide,
    Sata,
    Ahci,
    Pci,
}

impl ControllerKind {
    /// Number of device units one controller of this kind can hold.
    pub fn default_capacity(self) -> u32 {
        match self {
            ControllerKind::Ide => 2,
            ControllerKind::Sata | ControllerKind::Ahci => 30,
            ControllerKind::Pci => 32,
        }
    }

    /// AHCI controllers are SATA controllers.
    pub fn is_sata(self) -> bool {
        matches!(self, ControllerKind::Sata | ControllerKind::Ahci)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerKind::Ide => "ide",
            ControllerKind::Sata => "sata",
            ControllerKind::Ahci => "ahci",
            ControllerKind::Pci => "pci",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Controller {
    pub base: DeviceBase,
    pub kind: ControllerKind,
    pub bus_number: i32,
    /// Capacity reported by the backend, when it differs from the kind default.
    #[serde(default)]
    pub capacity: Option<u32>,
}

impl Controller {
    pub fn capacity(&self) -> u32 {
        self.capacity.unwrap_or_else(|| self.kind.default_capacity())
    }
}

/// A virtual device attached (or to be attached) to a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Device {
    Disk(VirtualDisk),
    NetworkInterface(EthernetCard),
    Cdrom(VirtualCdrom),
    PciPassthrough(PciPassthrough),
    Controller(Controller),
}

impl Device {
    pub fn base(&self) -> &DeviceBase {
        match self {
            Device::Disk(d) => &d.base,
            Device::NetworkInterface(d) => &d.base,
            Device::Cdrom(d) => &d.base,
            Device::PciPassthrough(d) => &d.base,
            Device::Controller(d) => &d.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut DeviceBase {
        match self {
            Device::Disk(d) => &mut d.base,
            Device::NetworkInterface(d) => &mut d.base,
            Device::Cdrom(d) => &mut d.base,
            Device::PciPassthrough(d) => &mut d.base,
            Device::Controller(d) => &mut d.base,
        }
    }

    pub fn key(&self) -> i32 {
        self.base().key
    }

    pub fn as_cdrom(&self) -> Option<&VirtualCdrom> {
        match self {
            Device::Cdrom(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_controller(&self) -> Option<&Controller> {
        match self {
            Device::Controller(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_ethernet_card(&self) -> Option<&EthernetCard> {
        match self {
            Device::NetworkInterface(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_pci_passthrough(&self) -> bool {
        matches!(self, Device::PciPassthrough(_))
    }
}

/// A single entry of a change-set's device list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum DeviceOperation {
    #[serde(rename_all = "camelCase")]
    Add {
        device: Device,
        /// Ask the backend to create the backing file.
        #[serde(default)]
        create_file: bool,
        #[serde(default)]
        profile_id: Option<String>,
    },
    Edit {
        device: Device,
    },
    Remove {
        device: Device,
    },
}

impl DeviceOperation {
    pub fn add(device: Device) -> Self {
        DeviceOperation::Add {
            device,
            create_file: false,
            profile_id: None,
        }
    }

    pub fn device(&self) -> &Device {
        match self {
            DeviceOperation::Add { device, .. }
            | DeviceOperation::Edit { device }
            | DeviceOperation::Remove { device } => device,
        }
    }

    pub fn is_add(&self) -> bool {
        matches!(self, DeviceOperation::Add { .. })
    }

    /// True if this operation adds a PCI passthrough device.
    pub fn adds_pci_passthrough(&self) -> bool {
        matches!(self, DeviceOperation::Add { device, .. } if device.is_pci_passthrough())
    }
}
