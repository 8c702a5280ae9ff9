//! CD-ROM attachment.
//!
//! Desired CD-ROM declarations are matched against attached CD-ROMs by
//! backing file. Unmatched declarations are attached to the first controller
//! with room, in the order IDE, SATA, new AHCI on an existing PCI controller,
//! new PCI plus AHCI. Attached CD-ROMs nobody declares are removed.

use std::collections::HashSet;

use tracing::debug;

use super::slots::{KeyAllocator, SlotInventory};
use crate::clients::ImageCatalog;
use crate::error::{ProviderError, Result, ResultExt};
use crate::model::vm::CdromSpec;
use crate::model::{
    CdromBacking, Connectable, Controller, ControllerKind, Device, DeviceBase, DeviceOperation,
    ImageRef, ImageScope, MediaKind, VirtualCdrom,
};

/// A CD-ROM declaration with its backing file resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCdrom {
    pub name: String,
    pub image_name: String,
    pub file_name: String,
    pub connectable: Connectable,
}

impl ResolvedCdrom {
    pub fn new(spec: &CdromSpec, file_name: impl Into<String>) -> Self {
        Self {
            name: spec.name.clone(),
            image_name: spec.image.name.clone(),
            file_name: file_name.into(),
            connectable: Connectable {
                start_connected: spec.connected(),
                connected: spec.connected(),
                allow_guest_control: spec.allow_guest_control(),
            },
        }
    }
}

/// Resolve the backing file of an ISO image reference.
///
/// The image must be ISO media published from the catalog. Its catalog item
/// is synchronized before the storage locator is returned.
pub async fn resolve_iso_backing(
    catalog: &dyn ImageCatalog,
    namespace: &str,
    image: &ImageRef,
) -> Result<String> {
    let scope = match image.kind.as_deref() {
        Some(kind) => kind.parse::<ImageScope>().map_err(ProviderError::Validation)?,
        None => ImageScope::Namespace,
    };

    let found = catalog
        .resolve_image(namespace, scope, &image.name)
        .await
        .context(format!("get {} {}", scope.as_str(), image.name))?
        .ok_or_else(|| ProviderError::not_found(scope.as_str(), image.name.as_str()))?;

    let provider = found.provider.as_ref().ok_or_else(|| {
        ProviderError::Validation(format!("provider ref is nil for {}", scope.as_str()))
    })?;

    if found.media_kind != MediaKind::Iso {
        return Err(ProviderError::Validation(format!(
            "expected ISO type image, got {}",
            found.media_kind.as_str()
        )));
    }

    let locator = catalog
        .sync_item(&provider.item_id)
        .await
        .context(format!("error syncing library item {}", provider.item_id))?;
    if locator.is_empty() {
        return Err(ProviderError::Validation(format!(
            "no storage URI found for library item {}",
            provider.item_id
        )));
    }

    debug!("Resolved image {} to {}", image.name, locator);
    Ok(locator)
}

/// Resolve every declaration. Stops at the first failure.
pub async fn resolve_cdroms(
    catalog: &dyn ImageCatalog,
    namespace: &str,
    specs: &[CdromSpec],
) -> Result<Vec<ResolvedCdrom>> {
    let mut resolved = Vec::with_capacity(specs.len());
    for spec in specs {
        let file_name = resolve_iso_backing(catalog, namespace, &spec.image).await?;
        resolved.push(ResolvedCdrom::new(spec, file_name));
    }
    Ok(resolved)
}

/// Resolve declarations and plan the device operations to reach them.
pub async fn allocate_cdrom_changes(
    catalog: &dyn ImageCatalog,
    namespace: &str,
    desired: &[CdromSpec],
    devices: &[Device],
    staged: &[DeviceOperation],
) -> Result<Vec<DeviceOperation>> {
    let resolved = resolve_cdroms(catalog, namespace, desired).await?;
    plan_cdrom_changes(&resolved, devices, staged)
}

/// Resolve declarations and plan connection-state edits only.
///
/// Used while the machine is powered on, when CD-ROMs cannot be added or
/// removed.
pub async fn cdrom_connection_changes(
    catalog: &dyn ImageCatalog,
    namespace: &str,
    desired: &[CdromSpec],
    devices: &[Device],
) -> Result<Vec<DeviceOperation>> {
    let resolved = resolve_cdroms(catalog, namespace, desired).await?;
    plan_cdrom_connection_edits(&resolved, devices)
}

/// Plan Add, Edit and Remove operations for CD-ROMs.
///
/// `staged` holds operations already in the change-set; controllers added
/// there are reused and their placeholder keys are not handed out again.
pub fn plan_cdrom_changes(
    desired: &[ResolvedCdrom],
    devices: &[Device],
    staged: &[DeviceOperation],
) -> Result<Vec<DeviceOperation>> {
    check_unique_backings(desired)?;

    let attached: Vec<&VirtualCdrom> = devices.iter().filter_map(Device::as_cdrom).collect();
    let mut inventory = SlotInventory::new(devices, staged);
    let mut keys = KeyAllocator::new(staged);
    let mut matched = HashSet::new();
    let mut ops = Vec::new();

    for want in desired {
        match find_attached(&attached, want)? {
            Some(cdrom) => {
                matched.insert(cdrom.base.key);
                ops.extend(connection_edit(cdrom, want));
            }
            None => ops.extend(add_cdrom(want, &mut inventory, &mut keys)?),
        }
    }

    for cdrom in attached {
        if !matched.contains(&cdrom.base.key) {
            debug!("Removing CD-ROM {} ({:?})", cdrom.base.key, cdrom.file_name());
            ops.push(DeviceOperation::Remove {
                device: Device::Cdrom(cdrom.clone()),
            });
        }
    }

    Ok(ops)
}

/// Plan connection-state edits for attached CD-ROMs.
pub fn plan_cdrom_connection_edits(
    desired: &[ResolvedCdrom],
    devices: &[Device],
) -> Result<Vec<DeviceOperation>> {
    let attached: Vec<&VirtualCdrom> = devices.iter().filter_map(Device::as_cdrom).collect();
    let mut ops = Vec::new();

    for want in desired {
        let cdrom = find_attached(&attached, want)?.ok_or_else(|| {
            ProviderError::Validation(format!(
                "no CD-ROM is found for image ref {}",
                want.image_name
            ))
        })?;
        ops.extend(connection_edit(cdrom, want));
    }

    Ok(ops)
}

fn check_unique_backings(desired: &[ResolvedCdrom]) -> Result<()> {
    let mut seen = HashSet::new();
    for want in desired {
        if !seen.insert(want.file_name.as_str()) {
            return Err(ProviderError::Validation(format!(
                "found multiple CD-ROMs with same backing file name {}",
                want.file_name
            )));
        }
    }
    Ok(())
}

fn find_attached<'a>(
    attached: &[&'a VirtualCdrom],
    want: &ResolvedCdrom,
) -> Result<Option<&'a VirtualCdrom>> {
    let mut found = attached
        .iter()
        .filter(|c| c.file_name() == Some(want.file_name.as_str()));

    match (found.next(), found.next()) {
        (None, _) => Ok(None),
        (Some(cdrom), None) => Ok(Some(*cdrom)),
        (Some(_), Some(_)) => Err(ProviderError::Ambiguous(format!(
            "found multiple CD-ROMs with same backing file name {}",
            want.file_name
        ))),
    }
}

fn connection_edit(cdrom: &VirtualCdrom, want: &ResolvedCdrom) -> Option<DeviceOperation> {
    if cdrom.base.connectable == Some(want.connectable) {
        return None;
    }
    let mut edited = cdrom.clone();
    edited.base.connectable = Some(want.connectable);
    Some(DeviceOperation::Edit {
        device: Device::Cdrom(edited),
    })
}

fn new_controller(key: i32, parent: Option<i32>, kind: ControllerKind, bus_number: i32) -> Controller {
    Controller {
        base: DeviceBase {
            key,
            controller_key: parent,
            ..Default::default()
        },
        kind,
        bus_number,
        capacity: None,
    }
}

fn add_cdrom(
    want: &ResolvedCdrom,
    inventory: &mut SlotInventory,
    keys: &mut KeyAllocator,
) -> Result<Vec<DeviceOperation>> {
    let mut ops = Vec::new();

    let free = inventory
        .free_controller(|k| k == ControllerKind::Ide)
        .or_else(|| inventory.free_controller(ControllerKind::is_sata));

    let controller_key = match free {
        Some(key) => key,
        None => {
            let pci_key = match inventory.first_of_kind(ControllerKind::Pci) {
                Some(key) => key,
                None => {
                    let pci = new_controller(keys.next_key(), None, ControllerKind::Pci, 0);
                    inventory.insert(&pci);
                    let key = pci.base.key;
                    ops.push(DeviceOperation::add(Device::Controller(pci)));
                    key
                }
            };

            let bus = inventory.next_sata_bus().ok_or_else(|| {
                ProviderError::Validation("no free SATA bus for a new AHCI controller".into())
            })?;
            let ahci = new_controller(keys.next_key(), Some(pci_key), ControllerKind::Ahci, bus);
            inventory.insert(&ahci);
            let key = ahci.base.key;
            ops.push(DeviceOperation::add(Device::Controller(ahci)));
            key
        }
    };

    let unit = inventory.claim(controller_key).ok_or_else(|| {
        ProviderError::Validation(format!("controller {} has no free unit", controller_key))
    })?;

    debug!(
        "Adding CD-ROM {} on controller {} unit {}",
        want.name, controller_key, unit
    );
    ops.push(DeviceOperation::add(Device::Cdrom(VirtualCdrom {
        base: DeviceBase {
            key: keys.next_key(),
            controller_key: Some(controller_key),
            unit_number: Some(unit),
            connectable: Some(want.connectable),
        },
        backing: Some(CdromBacking {
            file_name: want.file_name.clone(),
        }),
    })));

    Ok(ops)
}
