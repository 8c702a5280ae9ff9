//! Data model: declarative objects and backend configuration shapes.

pub mod class;
pub mod device;
pub mod image;
pub mod policy;
pub mod properties;
pub mod status;
pub mod vm;
pub mod vmconfig;

pub use class::{ClassIdentity, VirtualMachineClass};
pub use device::{
    CdromBacking, Connectable, Controller, ControllerKind, Device, DeviceBase, DeviceOperation,
    EthernetCard, EthernetCardType, NetworkBacking, PciBacking, PciPassthrough, VirtualCdrom,
    VirtualDisk,
};
pub use image::{Image, ImageScope, MediaKind};
pub use policy::ResourcePolicy;
pub use properties::{BackendPowerState, VmProperties};
pub use status::VirtualMachineStatus;
pub use vm::{ImageRef, PowerState, VirtualMachine};
pub use vmconfig::{
    ChangeSet, ConfigInfo, ConfigSpec, Firmware, ObservedConfiguration, OptionValue,
    TargetConfiguration,
};
