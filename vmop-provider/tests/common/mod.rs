//! Shared test utilities for vmop-provider integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use vmop_provider::clients::{
    Backend, Clients, CreateRequest, ImageCatalog, InterfaceResult, NamespacePlacement,
    NetworkResolver, ObjectStore, PlacementResult, PlacementService, PropertyMask, SecretStore,
};
use vmop_provider::error::{ClientError, ClientResult};
use vmop_provider::model::image::ProviderRef;
use vmop_provider::model::properties::Summary;
use vmop_provider::model::vm::{CdromSpec, InterfaceSpec};
use vmop_provider::model::{
    BackendPowerState, ChangeSet, ConfigInfo, ConfigSpec, Image, ImageRef, ImageScope, MediaKind,
    NetworkBacking, PowerState, ResourcePolicy, VirtualMachine, VirtualMachineClass, VmProperties,
};
use vmop_provider::{ProviderConfig, VirtualMachineReconciler};

pub const NAMESPACE: &str = "ns";
pub const STORAGE_CLASS: &str = "wcp-storage";

/// Install a test subscriber once. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vmop_provider=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A backend instance held by the fake.
#[derive(Debug, Clone)]
pub struct FakeInstance {
    pub name: String,
    pub props: VmProperties,
}

/// Everything the fake collaborators know and every call they received.
#[derive(Debug, Default)]
pub struct FakeState {
    pub classes: BTreeMap<String, VirtualMachineClass>,
    pub policies: BTreeMap<String, ResourcePolicy>,
    pub profiles: BTreeMap<String, String>,
    pub namespace_placement: Option<NamespacePlacement>,
    pub secrets: BTreeMap<String, BTreeMap<String, String>>,
    pub config_maps: BTreeMap<String, BTreeMap<String, String>>,
    pub images: Vec<Image>,
    pub locators: BTreeMap<String, String>,
    pub network_error: Option<ClientError>,
    pub placement: PlacementResult,
    pub cluster_modules_ready: bool,

    pub instances: BTreeMap<String, FakeInstance>,
    pub next_id: u32,

    pub placement_requests: Vec<ConfigSpec>,
    pub creates: Vec<CreateRequest>,
    pub reconfigures: Vec<(String, ChangeSet)>,
    pub power_calls: Vec<(String, PowerState)>,
    pub deletes: Vec<String>,
}

/// Parks the next backend create until released.
#[derive(Debug, Default)]
pub struct CreateHold {
    /// Signalled once the create call has started.
    pub entered: Notify,
    /// Lets the parked create finish.
    pub release: Notify,
}

/// In-memory implementation of every collaborator trait.
#[derive(Debug, Default)]
pub struct Fake {
    state: Mutex<FakeState>,
    create_hold: Mutex<Option<Arc<CreateHold>>>,
}

impl Fake {
    /// A fake with the `small` class, the `ubuntu` OVF image, one storage
    /// class and namespace placement defaults.
    pub fn new() -> Arc<Self> {
        let fake = Arc::new(Fake::default());
        {
            let mut state = fake.state();
            state
                .classes
                .insert("small".to_string(), class("small", 2, 4096));
            state.images.push(ovf_image("ubuntu"));
            state
                .profiles
                .insert(STORAGE_CLASS.to_string(), "profile-1".to_string());
            state.namespace_placement = Some(NamespacePlacement {
                folder_id: "folder-ns".to_string(),
                pool_id: "pool-ns".to_string(),
            });
            state.cluster_modules_ready = true;
        }
        fake
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn clients(self: &Arc<Self>) -> Clients {
        Clients {
            store: self.clone(),
            secrets: self.clone(),
            catalog: self.clone(),
            network: self.clone(),
            placement: self.clone(),
            backend: self.clone(),
        }
    }

    pub fn reconciler(self: &Arc<Self>, config: ProviderConfig) -> VirtualMachineReconciler {
        VirtualMachineReconciler::new(self.clients(), config)
    }

    /// Observed configuration of the only instance.
    pub fn only_instance(&self) -> (String, FakeInstance) {
        let state = self.state();
        assert_eq!(state.instances.len(), 1, "expected exactly one instance");
        let (id, instance) = state.instances.iter().next().unwrap();
        (id.clone(), instance.clone())
    }

    /// Make the next create block until `release` is notified.
    pub fn hold_next_create(&self) -> Arc<CreateHold> {
        let hold = Arc::new(CreateHold::default());
        *self.create_hold.lock().unwrap() = Some(hold.clone());
        hold
    }

    pub fn set_power_state(&self, id: &str, state: BackendPowerState) {
        let mut s = self.state();
        let instance = s.instances.get_mut(id).unwrap();
        instance.props.summary.power_state = Some(state);
    }
}

#[async_trait]
impl ObjectStore for Fake {
    async fn get_class(
        &self,
        _namespace: &str,
        name: &str,
    ) -> ClientResult<Option<VirtualMachineClass>> {
        Ok(self.state().classes.get(name).cloned())
    }

    async fn get_resource_policy(
        &self,
        _namespace: &str,
        name: &str,
    ) -> ClientResult<Option<ResourcePolicy>> {
        Ok(self.state().policies.get(name).cloned())
    }

    async fn get_storage_profile_id(
        &self,
        _namespace: &str,
        storage_class: &str,
    ) -> ClientResult<Option<String>> {
        Ok(self.state().profiles.get(storage_class).cloned())
    }

    async fn get_namespace_placement(
        &self,
        _namespace: &str,
        _zone: Option<&str>,
    ) -> ClientResult<Option<NamespacePlacement>> {
        Ok(self.state().namespace_placement.clone())
    }
}

#[async_trait]
impl SecretStore for Fake {
    async fn get_secret(
        &self,
        _namespace: &str,
        name: &str,
    ) -> ClientResult<Option<BTreeMap<String, String>>> {
        Ok(self.state().secrets.get(name).cloned())
    }

    async fn get_config_map(
        &self,
        _namespace: &str,
        name: &str,
    ) -> ClientResult<Option<BTreeMap<String, String>>> {
        Ok(self.state().config_maps.get(name).cloned())
    }
}

#[async_trait]
impl ImageCatalog for Fake {
    async fn resolve_image(
        &self,
        _namespace: &str,
        scope: ImageScope,
        name: &str,
    ) -> ClientResult<Option<Image>> {
        Ok(self
            .state()
            .images
            .iter()
            .find(|i| i.scope == scope && i.name == name)
            .cloned())
    }

    async fn sync_item(&self, item_id: &str) -> ClientResult<String> {
        self.state()
            .locators
            .get(item_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(item_id.to_string()))
    }
}

#[async_trait]
impl NetworkResolver for Fake {
    async fn resolve(
        &self,
        _vm: &VirtualMachine,
        interfaces: &[InterfaceSpec],
    ) -> ClientResult<Vec<InterfaceResult>> {
        if let Some(err) = self.state().network_error.clone() {
            return Err(err);
        }
        Ok(interfaces
            .iter()
            .enumerate()
            .map(|(idx, iface)| InterfaceResult {
                name: iface.name.clone(),
                mac_address: Some(format!("00:50:56:00:00:{:02x}", idx + 1)),
                backing: Some(NetworkBacking::Network {
                    name: iface
                        .network
                        .as_ref()
                        .map(|n| n.name.clone())
                        .unwrap_or_else(|| "default".to_string()),
                }),
                dhcp4: true,
                ..Default::default()
            })
            .collect())
    }
}

#[async_trait]
impl PlacementService for Fake {
    async fn place(
        &self,
        _vm: &VirtualMachine,
        config_spec: &ConfigSpec,
        _pool_hint: Option<&str>,
    ) -> ClientResult<PlacementResult> {
        let mut state = self.state();
        state.placement_requests.push(config_spec.clone());
        Ok(state.placement.clone())
    }
}

#[async_trait]
impl Backend for Fake {
    async fn find_instance(&self, vm: &VirtualMachine) -> ClientResult<Option<String>> {
        let state = self.state();
        if let Some(id) = vm.status.unique_id.as_ref() {
            if state.instances.contains_key(id) {
                return Ok(Some(id.clone()));
            }
        }
        Ok(state
            .instances
            .iter()
            .find(|(_, i)| i.name == vm.metadata.name)
            .map(|(id, _)| id.clone()))
    }

    async fn create(&self, req: &CreateRequest) -> ClientResult<String> {
        let hold = self.create_hold.lock().unwrap().take();
        if let Some(hold) = hold {
            hold.entered.notify_one();
            hold.release.notified().await;
        }

        let mut state = self.state();
        state.next_id += 1;
        let id = format!("vm-{}", state.next_id);

        let mut config = ConfigInfo {
            version: "vmx-19".to_string(),
            uuid: format!("bios-{}", id),
            instance_uuid: format!("instance-{}", id),
            ..Default::default()
        };
        config.apply(&req.config_spec);

        state.instances.insert(
            id.clone(),
            FakeInstance {
                name: req.name.clone(),
                props: VmProperties {
                    config: Some(config),
                    summary: Summary {
                        power_state: Some(BackendPowerState::PoweredOff),
                        host_name: req.host_id.clone(),
                        ..Default::default()
                    },
                    guest: None,
                },
            },
        );
        state.creates.push(req.clone());
        Ok(id)
    }

    async fn reconfigure(&self, instance_id: &str, changes: &ChangeSet) -> ClientResult<()> {
        let mut state = self.state();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| ClientError::NotFound(instance_id.to_string()))?;
        if let Some(config) = instance.props.config.as_mut() {
            config.apply(changes);
        }
        state
            .reconfigures
            .push((instance_id.to_string(), changes.clone()));
        Ok(())
    }

    async fn change_power_state(&self, instance_id: &str, power: PowerState) -> ClientResult<()> {
        let mut state = self.state();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| ClientError::NotFound(instance_id.to_string()))?;
        instance.props.summary.power_state = Some(match power {
            PowerState::On => BackendPowerState::PoweredOn,
            PowerState::Off => BackendPowerState::PoweredOff,
            PowerState::Suspended => BackendPowerState::Suspended,
        });
        state.power_calls.push((instance_id.to_string(), power));
        Ok(())
    }

    async fn get_properties(
        &self,
        instance_id: &str,
        _mask: PropertyMask,
    ) -> ClientResult<VmProperties> {
        self.state()
            .instances
            .get(instance_id)
            .map(|i| i.props.clone())
            .ok_or_else(|| ClientError::NotFound(instance_id.to_string()))
    }

    async fn delete(&self, instance_id: &str) -> ClientResult<()> {
        let mut state = self.state();
        state
            .instances
            .remove(instance_id)
            .ok_or_else(|| ClientError::NotFound(instance_id.to_string()))?;
        state.deletes.push(instance_id.to_string());
        Ok(())
    }

    async fn find_child_pool(
        &self,
        parent_pool_id: &str,
        name: &str,
    ) -> ClientResult<Option<String>> {
        Ok(Some(format!("{}/{}", parent_pool_id, name)))
    }

    async fn find_child_folder(
        &self,
        parent_folder_id: &str,
        name: &str,
    ) -> ClientResult<Option<String>> {
        Ok(Some(format!("{}/{}", parent_folder_id, name)))
    }

    async fn cluster_modules_exist(
        &self,
        _pool_id: &str,
        _modules: &[String],
    ) -> ClientResult<bool> {
        Ok(self.state().cluster_modules_ready)
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn class(name: &str, cpus: i32, memory_mb: i64) -> VirtualMachineClass {
    let mut class = VirtualMachineClass {
        name: name.to_string(),
        namespace: NAMESPACE.to_string(),
        uid: format!("uid-{}", name),
        generation: 1,
        ready: true,
        ..Default::default()
    };
    class.spec.hardware.cpus = cpus;
    class.spec.hardware.memory_mb = memory_mb;
    class
}

pub fn ovf_image(name: &str) -> Image {
    Image {
        name: name.to_string(),
        scope: ImageScope::Namespace,
        media_kind: MediaKind::Ovf,
        provider: Some(ProviderRef {
            kind: "ContentLibraryItem".to_string(),
            item_id: format!("item-{}", name),
        }),
        firmware: None,
        hardware_version: None,
        ready: true,
    }
}

/// An ISO image whose catalog item syncs to `[ds] <name>.iso`.
pub fn add_iso_image(fake: &Fake, name: &str) -> String {
    let mut image = ovf_image(name);
    image.media_kind = MediaKind::Iso;
    let item_id = image
        .provider
        .as_ref()
        .map(|p| p.item_id.clone())
        .unwrap_or_default();
    let locator = format!("[ds] {}.iso", name);

    let mut state = fake.state();
    state.images.push(image);
    state.locators.insert(item_id, locator.clone());
    locator
}

pub fn vm(name: &str) -> VirtualMachine {
    let mut vm = VirtualMachine::default();
    vm.metadata.name = name.to_string();
    vm.metadata.namespace = NAMESPACE.to_string();
    vm.metadata.uid = format!("uid-{}", name);
    vm.spec.class_name = "small".to_string();
    vm.spec.image = Some(ImageRef {
        kind: None,
        name: "ubuntu".to_string(),
    });
    vm.spec.storage_class = STORAGE_CLASS.to_string();
    vm.spec.power_state = Some(PowerState::On);
    vm
}

pub fn cdrom(name: &str, image: &str) -> CdromSpec {
    CdromSpec {
        name: name.to_string(),
        image: ImageRef {
            kind: Some("VirtualMachineImage".to_string()),
            name: image.to_string(),
        },
        connected: None,
        allow_guest_control: None,
    }
}
