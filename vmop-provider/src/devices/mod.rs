//! Virtual device attachment.

pub mod cdrom;
pub mod slots;

pub use cdrom::{
    ResolvedCdrom, allocate_cdrom_changes, cdrom_connection_changes, plan_cdrom_changes,
    plan_cdrom_connection_edits, resolve_cdroms,
};
pub use slots::{ControllerSlot, KeyAllocator, SlotInventory};
