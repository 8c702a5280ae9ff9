//! Controller slot inventory and placeholder keys.

use std::collections::BTreeSet;

use crate::model::{Controller, ControllerKind, Device, DeviceOperation};

/// Most SATA (and AHCI) controllers one machine can have.
pub const MAX_SATA_CONTROLLERS: i32 = 4;

/// Hands out negative placeholder keys for devices added in one change-set.
#[derive(Debug)]
pub struct KeyAllocator {
    next: i32,
}

impl KeyAllocator {
    /// Start below every placeholder already used by `staged`.
    pub fn new(staged: &[DeviceOperation]) -> Self {
        let lowest = staged
            .iter()
            .map(|op| op.device().key())
            .filter(|k| *k < 0)
            .min()
            .unwrap_or(0);
        Self { next: lowest - 1 }
    }

    pub fn next_key(&mut self) -> i32 {
        let key = self.next;
        self.next -= 1;
        key
    }
}

/// A controller and the unit numbers taken on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSlot {
    pub key: i32,
    pub kind: ControllerKind,
    pub bus_number: i32,
    pub occupied: BTreeSet<i32>,
    pub capacity: u32,
}

impl ControllerSlot {
    fn from_controller(controller: &Controller) -> Self {
        Self {
            key: controller.base.key,
            kind: controller.kind,
            bus_number: controller.bus_number,
            occupied: BTreeSet::new(),
            capacity: controller.capacity(),
        }
    }

    pub fn has_free_unit(&self) -> bool {
        (self.occupied.len() as u32) < self.capacity
    }

    /// Lowest unit number not taken.
    pub fn lowest_free_unit(&self) -> Option<i32> {
        (0..self.capacity as i32).find(|unit| !self.occupied.contains(unit))
    }
}

/// Controllers of one machine, including controllers staged for add.
#[derive(Debug, Default)]
pub struct SlotInventory {
    slots: Vec<ControllerSlot>,
}

impl SlotInventory {
    /// Build from observed devices plus the operations already staged.
    pub fn new(devices: &[Device], staged: &[DeviceOperation]) -> Self {
        let removed: BTreeSet<i32> = staged
            .iter()
            .filter(|op| matches!(op, DeviceOperation::Remove { .. }))
            .map(|op| op.device().key())
            .collect();

        let present: Vec<&Device> = devices
            .iter()
            .filter(|d| !removed.contains(&d.key()))
            .chain(
                staged
                    .iter()
                    .filter(|op| op.is_add())
                    .map(DeviceOperation::device),
            )
            .collect();

        let mut inventory = SlotInventory {
            slots: present
                .iter()
                .filter_map(|d| d.as_controller())
                .map(ControllerSlot::from_controller)
                .collect(),
        };

        for device in &present {
            let base = device.base();
            if let (Some(controller), Some(unit)) = (base.controller_key, base.unit_number) {
                inventory.mark(controller, unit);
            }
        }
        inventory
    }

    fn mark(&mut self, controller_key: i32, unit: i32) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.key == controller_key) {
            slot.occupied.insert(unit);
        }
    }

    pub fn slots(&self) -> &[ControllerSlot] {
        &self.slots
    }

    /// First controller matching `pred` with room for another device.
    pub fn free_controller(&self, pred: impl Fn(ControllerKind) -> bool) -> Option<i32> {
        self.slots
            .iter()
            .find(|s| pred(s.kind) && s.has_free_unit())
            .map(|s| s.key)
    }

    pub fn first_of_kind(&self, kind: ControllerKind) -> Option<i32> {
        self.slots.iter().find(|s| s.kind == kind).map(|s| s.key)
    }

    /// Lowest bus number no SATA-class controller uses yet.
    pub fn next_sata_bus(&self) -> Option<i32> {
        (0..MAX_SATA_CONTROLLERS).find(|bus| {
            !self
                .slots
                .iter()
                .any(|s| s.kind.is_sata() && s.bus_number == *bus)
        })
    }

    /// Track a controller staged in the current change-set.
    pub fn insert(&mut self, controller: &Controller) {
        self.slots.push(ControllerSlot::from_controller(controller));
    }

    /// Take the lowest free unit on a controller.
    pub fn claim(&mut self, controller_key: i32) -> Option<i32> {
        let slot = self.slots.iter_mut().find(|s| s.key == controller_key)?;
        let unit = slot.lowest_free_unit()?;
        slot.occupied.insert(unit);
        Some(unit)
    }
}
