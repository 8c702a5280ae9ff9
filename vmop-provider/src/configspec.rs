//! Target configuration synthesis.
//!
//! Builds the configuration a VM is created with from its class, image and
//! instance-level settings, and derives the placement-flavored copy sent to
//! the placement service.

use std::collections::BTreeMap;

use crate::clients::InterfaceResult;
use crate::devices::KeyAllocator;
use crate::model::class::{ClassResources, VirtualMachineClass};
use crate::model::device::DiskBacking;
use crate::model::vm::{FIRMWARE_OVERRIDE_ANNOTATION, PCI_PASSTHRU_MMIO_ANNOTATION};
use crate::model::vmconfig::{ManagedBy, ResourceAllocation, SharesInfo, SharesLevel};
use crate::model::{
    ConfigSpec, Device, DeviceBase, DeviceOperation, EthernetCard, EthernetCardType, Firmware,
    Image, OptionValue, PciBacking, PciPassthrough, VirtualDisk, VirtualMachine,
};

pub const DEFAULT_ANNOTATION: &str = "Virtual Machine managed by the VM Operator";
pub const MANAGED_BY_TYPE: &str = "VirtualMachine";

/// Lowest hardware version supporting PCI passthrough devices.
pub const MIN_HW_VERSION_PCI_PASSTHROUGH: i32 = 17;
/// Lowest hardware version supporting persistent volume claims.
pub const MIN_HW_VERSION_PERSISTENT_CLAIMS: i32 = 15;

pub const POWER_OFF_ON_EVACUATION_KEY: &str = "maintenance.vm.evacuation.poweroff";
pub const PCI_MMIO_ENABLED_KEY: &str = "pciPassthru.use64bitMMIO";
pub const PCI_MMIO_SIZE_KEY: &str = "pciPassthru.64bitMMIOSizeGB";
pub const EXTRA_CONFIG_TRUE: &str = "TRUE";

/// Capacity of the stand-in disk added to placement requests.
pub const PLACEMENT_DISK_CAPACITY_BYTES: i64 = 1024 * 1024;

/// `vmx-19` -> `Some(19)`.
pub fn parse_hardware_version(version: &str) -> Option<i32> {
    version.strip_prefix("vmx-")?.parse().ok()
}

pub fn format_hardware_version(version: i32) -> String {
    format!("vmx-{}", version)
}

/// Pick the hardware version to create with.
///
/// With an explicit template version, only a higher VM minimum changes it.
/// Otherwise the version is the highest of the VM minimum and the device
/// floors (PCI passthrough first, then persistent claims), each raised to
/// the image's version. `None` leaves the choice to the backend.
pub fn negotiate_hardware_version(
    template_version: Option<i32>,
    vm_min: i32,
    image_version: Option<i32>,
    has_pci_passthrough: bool,
    has_claims: bool,
) -> Option<i32> {
    if let Some(version) = template_version.filter(|v| *v != 0) {
        return (vm_min > version).then_some(vm_min);
    }

    let image = image_version.unwrap_or(0);
    let device_min = if has_pci_passthrough {
        image.max(MIN_HW_VERSION_PCI_PASSTHROUGH)
    } else if has_claims {
        image.max(MIN_HW_VERSION_PERSISTENT_CLAIMS)
    } else {
        0
    };

    Some(vm_min.max(device_min)).filter(|v| *v > 0)
}

/// Allocation for one class request/limit pair. `None` when the class
/// declares neither, leaving any template allocation in place.
fn allocation_from_class(reservation: Option<i64>, limit: Option<i64>) -> Option<ResourceAllocation> {
    let reservation = reservation.filter(|v| *v != 0);
    let limit = limit.filter(|v| *v != 0);
    if reservation.is_none() && limit.is_none() {
        return None;
    }
    Some(ResourceAllocation {
        reservation,
        limit,
        shares: Some(SharesInfo {
            level: SharesLevel::Normal,
            shares: 0,
        }),
    })
}

fn apply_class_resources(spec: &mut ConfigSpec, resources: &ClassResources) {
    if let Some(cpu) = allocation_from_class(resources.requests.cpu_mhz, resources.limits.cpu_mhz) {
        spec.cpu_allocation = Some(cpu);
    }
    if let Some(memory) =
        allocation_from_class(resources.requests.memory_mb, resources.limits.memory_mb)
    {
        spec.memory_allocation = Some(memory);
    }
}

fn class_device_changes(class: &VirtualMachineClass, keys: &mut KeyAllocator) -> Vec<DeviceOperation> {
    let devices = &class.spec.hardware.devices;
    let vgpus = devices.vgpu_devices.iter().map(|d| PciBacking::Vgpu {
        profile: d.profile_name.clone(),
    });
    let direct_path = devices
        .dynamic_direct_path_io_devices
        .iter()
        .map(|d| PciBacking::DynamicDirectPath {
            vendor_id: d.vendor_id,
            device_id: d.device_id,
            custom_label: d.custom_label.clone(),
        });

    vgpus
        .chain(direct_path)
        .map(|backing| {
            DeviceOperation::add(Device::PciPassthrough(PciPassthrough {
                base: DeviceBase {
                    key: keys.next_key(),
                    ..Default::default()
                },
                backing,
            }))
        })
        .collect()
}

/// Apply settings the VM declares directly, independent of its class.
pub fn apply_vm_overrides(spec: &mut ConfigSpec, vm: &VirtualMachine) {
    if let Some(cbt) = vm.spec.change_block_tracking {
        spec.change_tracking_enabled = Some(cbt);
    }
}

/// Build the configuration a VM is created with.
///
/// The class's embedded template, if any, is the starting point and its
/// device list wins over the class device declarations. `image` is absent
/// when building a resize target for an existing VM.
pub fn create_config_spec(
    vm: &VirtualMachine,
    class: &VirtualMachineClass,
    image: Option<&Image>,
    managed_by_key: &str,
) -> ConfigSpec {
    let template = class.spec.config_spec.as_ref();
    let mut spec = template.cloned().unwrap_or_default();

    spec.name = Some(vm.metadata.name.clone());
    if spec.annotation.as_deref().unwrap_or_default().is_empty() {
        spec.annotation = Some(DEFAULT_ANNOTATION.to_string());
    }

    let hw = &class.spec.hardware;
    if hw.cpus > 0 {
        spec.num_cpus = Some(hw.cpus);
    }
    if hw.memory_mb > 0 {
        spec.memory_mb = Some(hw.memory_mb);
    }

    spec.managed_by = Some(ManagedBy {
        extension_key: managed_by_key.to_string(),
        type_: MANAGED_BY_TYPE.to_string(),
    });

    let firmware_override = vm
        .annotation(FIRMWARE_OVERRIDE_ANNOTATION)
        .and_then(|fw| fw.parse::<Firmware>().ok());
    if let Some(fw) = firmware_override.or_else(|| image.and_then(|i| i.firmware)) {
        spec.firmware = Some(fw);
    }

    apply_class_resources(&mut spec, &class.spec.resources);

    apply_vm_overrides(&mut spec, vm);

    if template.is_none() {
        let mut keys = KeyAllocator::new(&spec.device_changes);
        let devices = class_device_changes(class, &mut keys);
        spec.device_changes.extend(devices);
    }

    let template_version = spec.version.as_deref().and_then(parse_hardware_version);
    let negotiated = negotiate_hardware_version(
        template_version,
        vm.spec.min_hardware_version,
        image.and_then(|i| i.hardware_version),
        spec.adds_pci_passthrough(),
        vm.has_claim_volumes(),
    );
    if let Some(version) = negotiated {
        spec.version = Some(format_hardware_version(version));
    }

    spec
}

/// Append `values` whose keys are not yet present.
pub fn append_new_extra_config(extra_config: &mut Vec<OptionValue>, values: Vec<OptionValue>) {
    for ov in values {
        if !extra_config.iter().any(|e| e.key == ov.key) {
            extra_config.push(ov);
        }
    }
}

/// Add the extra config keys derived from devices, annotations and the
/// provider-wide defaults. Keys already set are never overridden.
pub fn synthesize_extra_config(
    spec: &mut ConfigSpec,
    vm: &VirtualMachine,
    global: &BTreeMap<String, String>,
    mmio_size_gb: u64,
) {
    let has_pci = spec.adds_pci_passthrough();
    let mut values = Vec::new();

    if has_pci || vm.has_instance_volumes() {
        values.push(OptionValue::new(POWER_OFF_ON_EVACUATION_KEY, EXTRA_CONFIG_TRUE));
    }
    if has_pci {
        let size = vm
            .annotation(PCI_PASSTHRU_MMIO_ANNOTATION)
            .map(str::to_string)
            .unwrap_or_else(|| mmio_size_gb.to_string());
        values.push(OptionValue::new(PCI_MMIO_ENABLED_KEY, EXTRA_CONFIG_TRUE));
        values.push(OptionValue::new(PCI_MMIO_SIZE_KEY, size));
    }
    values.extend(global.iter().map(|(k, v)| OptionValue::new(k, v)));

    append_new_extra_config(&mut spec.extra_config, values);
}

/// Attach resolved network results to the ethernet cards, in order.
///
/// Cards without a result lose their backing. Results without a card get a
/// new vmxnet3 card.
pub fn apply_network_results(spec: &mut ConfigSpec, results: &[InterfaceResult]) {
    let mut keys = KeyAllocator::new(&spec.device_changes);
    let mut results = results.iter();

    for op in spec.device_changes.iter_mut() {
        if let DeviceOperation::Add {
            device: Device::NetworkInterface(card),
            ..
        } = op
        {
            match results.next() {
                Some(result) => {
                    card.backing = result.backing.clone();
                    card.external_id = result.external_id.clone();
                    if result.mac_address.is_some() {
                        card.mac_address = result.mac_address.clone();
                    }
                }
                None => card.backing = None,
            }
        }
    }

    for result in results {
        spec.device_changes.push(DeviceOperation::add(Device::NetworkInterface(
            EthernetCard {
                base: DeviceBase {
                    key: keys.next_key(),
                    ..Default::default()
                },
                card_type: EthernetCardType::Vmxnet3,
                mac_address: result.mac_address.clone(),
                external_id: result.external_id.clone(),
                backing: result.backing.clone(),
            },
        )));
    }
}

fn placement_disk(key: i32, capacity_bytes: i64, profile_id: Option<&str>) -> DeviceOperation {
    DeviceOperation::Add {
        device: Device::Disk(VirtualDisk {
            base: DeviceBase {
                key,
                ..Default::default()
            },
            capacity_bytes,
            backing: DiskBacking {
                file_name: String::new(),
                thin_provisioned: true,
            },
        }),
        create_file: true,
        profile_id: profile_id.map(str::to_string),
    }
}

/// Copy of `spec` suitable for the placement service.
///
/// NICs without a resolved backing are dropped. A small stand-in disk is
/// added because placement needs at least one disk, plus one disk per
/// instance storage volume so hosts without local storage are excluded.
pub fn placement_config_spec(
    spec: &ConfigSpec,
    vm: &VirtualMachine,
    storage_profile_id: Option<&str>,
    profiles: &BTreeMap<String, String>,
) -> ConfigSpec {
    let mut out = spec.clone();
    out.device_changes.retain(|op| match op.device() {
        Device::NetworkInterface(card) => card.backing.is_some(),
        _ => true,
    });

    let mut keys = KeyAllocator::new(&out.device_changes);
    let key = keys.next_key();
    out.device_changes.push(placement_disk(
        key,
        PLACEMENT_DISK_CAPACITY_BYTES,
        storage_profile_id,
    ));

    for volume in vm.spec.volumes.iter().filter_map(|v| v.instance_volume()) {
        let key = keys.next_key();
        let profile = profiles.get(&volume.storage_class).map(String::as_str);
        out.device_changes
            .push(placement_disk(key, volume.size_bytes, profile));
    }

    out
}
