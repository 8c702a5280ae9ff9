//! Update path for VMs that already have a backend instance.

use tracing::{debug, info, warn};

use crate::clients::{Clients, PropertyMask};
use crate::config::ProviderConfig;
use crate::configspec::{apply_vm_overrides, create_config_spec};
use crate::devices::{allocate_cdrom_changes, cdrom_connection_changes};
use crate::diff::diff;
use crate::error::{ProviderError, Result, ResultExt};
use crate::model::class::ClassIdentity;
use crate::model::vm::{LAST_RESIZED_ANNOTATION, SAME_CLASS_RESIZE_ANNOTATION};
use crate::model::{
    ChangeSet, ConfigInfo, ConfigSpec, PowerState, VirtualMachine, VirtualMachineClass, VmProperties,
};
use crate::status::{convert_power_state, project};

/// Whether a powered-off VM should be reconfigured against `class`.
///
/// A VM with no recorded class identity resizes only when asked to. A
/// different class name always resizes. The same class resizes when its
/// uid or generation moved and the same-class annotation is present.
pub fn resize_needed(vm: &VirtualMachine, class: &VirtualMachineClass) -> bool {
    let same_class_requested = vm.annotation(SAME_CLASS_RESIZE_ANNOTATION).is_some();

    let last = vm
        .annotation(LAST_RESIZED_ANNOTATION)
        .and_then(|raw| serde_json::from_str::<ClassIdentity>(raw).ok())
        .filter(|identity| !identity.name.is_empty());
    let Some(last) = last else {
        return same_class_requested;
    };

    if last.name != vm.spec.class_name {
        return true;
    }
    if last.uid == class.uid && last.generation == class.generation {
        return false;
    }
    same_class_requested
}

/// One pass over a live instance.
///
/// Properties are fetched lazily and dropped after every backend mutation so
/// the status projection always sees the freshest state.
pub struct UpdateSession<'a> {
    clients: &'a Clients,
    config: &'a ProviderConfig,
    instance_id: &'a str,
    props: Option<VmProperties>,
}

impl<'a> UpdateSession<'a> {
    pub fn new(clients: &'a Clients, config: &'a ProviderConfig, instance_id: &'a str) -> Self {
        Self {
            clients,
            config,
            instance_id,
            props: None,
        }
    }

    async fn properties(&mut self) -> Result<&VmProperties> {
        if self.props.is_none() {
            let props = self
                .clients
                .backend
                .get_properties(self.instance_id, PropertyMask::ALL)
                .await
                .context(format!("get properties of VM {}", self.instance_id))?;
            self.props = Some(props);
        }
        self.props
            .as_ref()
            .ok_or_else(|| ProviderError::NotReady(format!("no properties for VM {}", self.instance_id)))
    }

    fn invalidate(&mut self) {
        self.props = None;
    }

    async fn change_power_state(&mut self, vm: &VirtualMachine, state: PowerState) -> Result<()> {
        info!("Changing power state of VM {} to {}", vm.key(), state.as_str());
        self.clients
            .backend
            .change_power_state(self.instance_id, state)
            .await
            .context(format!("change power state of VM {} to {}", vm.key(), state.as_str()))?;
        self.invalidate();
        Ok(())
    }

    /// Drive power state and configuration toward the declaration.
    pub async fn update(&mut self, vm: &mut VirtualMachine) -> Result<()> {
        let mut current = convert_power_state(self.properties().await?.power_state());
        let desired = vm.spec.power_state;

        let power_down = match desired {
            Some(PowerState::Off) => current != Some(PowerState::Off),
            Some(PowerState::Suspended) => current == Some(PowerState::On),
            _ => false,
        };
        if let (true, Some(state)) = (power_down, desired) {
            self.change_power_state(vm, state).await?;
            current = desired;
        }

        match current {
            Some(PowerState::Off) => self.reconfigure_powered_off(vm).await?,
            Some(PowerState::On) => self.reconfigure_powered_on(vm).await?,
            _ => debug!("VM {} is suspended, skipping reconfigure", vm.key()),
        }

        if desired == Some(PowerState::On) && current != Some(PowerState::On) {
            self.change_power_state(vm, PowerState::On).await?;
        }
        Ok(())
    }

    async fn observed_config(&mut self) -> Result<ConfigInfo> {
        let instance_id = self.instance_id;
        self.properties()
            .await?
            .config
            .clone()
            .ok_or_else(|| ProviderError::NotReady(format!("config of VM {} is not available", instance_id)))
    }

    async fn reconfigure(&mut self, vm: &VirtualMachine, changes: &ChangeSet) -> Result<()> {
        info!("Reconfiguring VM {}", vm.key());
        debug!("Change-set for VM {}: {:?}", vm.key(), changes);
        self.clients
            .backend
            .reconfigure(self.instance_id, changes)
            .await
            .context(format!("reconfigure VM {}", vm.key()))?;
        self.invalidate();
        Ok(())
    }

    /// The class to resize against, if a resize was requested and is due.
    ///
    /// A class that no longer exists skips the resize.
    async fn resize_class(&self, vm: &VirtualMachine) -> Result<Option<VirtualMachineClass>> {
        if vm.spec.class_name.is_empty()
            || (vm.annotation(LAST_RESIZED_ANNOTATION).is_none()
                && vm.annotation(SAME_CLASS_RESIZE_ANNOTATION).is_none())
        {
            return Ok(None);
        }

        let ns = &vm.metadata.namespace;
        let name = &vm.spec.class_name;
        let class = self
            .clients
            .store
            .get_class(ns, name)
            .await
            .context(format!("get VirtualMachineClass {}/{}", ns, name))?;
        match class {
            Some(class) if resize_needed(vm, &class) => Ok(Some(class)),
            Some(_) => Ok(None),
            None => {
                debug!(
                    "VirtualMachineClass {}/{} not found, skipping resize of VM {}",
                    ns,
                    name,
                    vm.key()
                );
                Ok(None)
            }
        }
    }

    async fn reconfigure_powered_off(&mut self, vm: &mut VirtualMachine) -> Result<()> {
        let observed = self.observed_config().await?;
        let class = self.resize_class(vm).await?;

        let mut target = match class.as_ref() {
            Some(class) => {
                debug!("Resizing VM {} to class {}", vm.key(), class.name);
                create_config_spec(vm, class, None, &self.config.managed_by_extension_key)
            }
            None => ConfigSpec::default(),
        };
        apply_vm_overrides(&mut target, vm);
        let mut changes = diff(&observed, &target);

        let cdroms = allocate_cdrom_changes(
            &*self.clients.catalog,
            &vm.metadata.namespace,
            &vm.spec.cdrom,
            &observed.hardware.devices,
            &changes.device_changes,
        )
        .await?;
        changes.device_changes.extend(cdroms);

        if !changes.is_empty() {
            self.reconfigure(vm, &changes).await?;
        }

        if let Some(class) = class {
            match serde_json::to_string(&class.identity()) {
                Ok(raw) => {
                    vm.metadata
                        .annotations
                        .insert(LAST_RESIZED_ANNOTATION.to_string(), raw);
                }
                Err(e) => warn!("Failed to encode class identity for VM {}: {}", vm.key(), e),
            }
        }
        Ok(())
    }

    async fn reconfigure_powered_on(&mut self, vm: &VirtualMachine) -> Result<()> {
        let observed = self.observed_config().await?;
        let edits = cdrom_connection_changes(
            &*self.clients.catalog,
            &vm.metadata.namespace,
            &vm.spec.cdrom,
            &observed.hardware.devices,
        )
        .await?;

        if edits.is_empty() {
            return Ok(());
        }
        let changes = ChangeSet {
            device_changes: edits,
            ..Default::default()
        };
        self.reconfigure(vm, &changes).await
    }

    /// Refresh properties if needed and project them onto the status.
    pub async fn project_status(&mut self, vm: &mut VirtualMachine) -> Result<()> {
        let instance_id = self.instance_id;
        let props = self.properties().await?;
        project(vm, instance_id, props);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(name: &str, uid: &str, generation: i64) -> VirtualMachineClass {
        VirtualMachineClass {
            name: name.into(),
            uid: uid.into(),
            generation,
            ..Default::default()
        }
    }

    fn vm_with_last_resized(class_name: &str, last: Option<&VirtualMachineClass>) -> VirtualMachine {
        let mut vm = VirtualMachine::default();
        vm.spec.class_name = class_name.into();
        if let Some(last) = last {
            vm.metadata.annotations.insert(
                LAST_RESIZED_ANNOTATION.into(),
                serde_json::to_string(&last.identity()).unwrap(),
            );
        }
        vm
    }

    #[test]
    fn test_resize_needed_without_annotation() {
        let small = class("small", "uid-1", 1);
        let mut vm = vm_with_last_resized("small", None);
        assert!(!resize_needed(&vm, &small));

        vm.metadata
            .annotations
            .insert(SAME_CLASS_RESIZE_ANNOTATION.into(), String::new());
        assert!(resize_needed(&vm, &small));
    }

    #[test]
    fn test_resize_needed_on_class_change() {
        let small = class("small", "uid-1", 1);
        let large = class("large", "uid-2", 1);
        let vm = vm_with_last_resized("large", Some(&small));
        assert!(resize_needed(&vm, &large));
    }

    #[test]
    fn test_resize_needed_same_class() {
        let small = class("small", "uid-1", 1);
        let vm = vm_with_last_resized("small", Some(&small));
        assert!(!resize_needed(&vm, &small));

        let bumped = class("small", "uid-1", 2);
        assert!(!resize_needed(&vm, &bumped));

        let mut vm = vm;
        vm.metadata
            .annotations
            .insert(SAME_CLASS_RESIZE_ANNOTATION.into(), String::new());
        assert!(resize_needed(&vm, &bumped));
        assert!(!resize_needed(&vm, &small));
    }

    #[test]
    fn test_resize_needed_ignores_garbage_annotation() {
        let small = class("small", "uid-1", 1);
        let mut vm = vm_with_last_resized("small", None);
        vm.metadata
            .annotations
            .insert(LAST_RESIZED_ANNOTATION.into(), "not json".into());
        assert!(!resize_needed(&vm, &small));
    }
}
