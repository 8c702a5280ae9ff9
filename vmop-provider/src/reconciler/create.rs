//! VM creation.
//!
//! Stages run strictly in order and the first failure aborts the attempt:
//! prerequisites, networking, configuration synthesis, placement,
//! folder/pool resolution, readiness, the create gate and finally the
//! backend create call. Prerequisite checks are independent and their
//! failures are reported together.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clients::store::get_data;
use crate::clients::{Clients, CreateRequest, InterfaceResult, PlacementResult};
use crate::conditions::{ConditionType, mark_false, mark_true, remove_condition};
use crate::config::ProviderConfig;
use crate::configspec::{
    apply_network_results, create_config_spec, placement_config_spec, synthesize_extra_config,
};
use crate::devices::allocate_cdrom_changes;
use crate::error::{ProviderError, Result, ResultExt};
use crate::gate::CreateGate;
use crate::model::vm::{
    ClaimVolumeSource, INSTANCE_STORAGE_BOUND_ANNOTATION, InstanceVolumeClaim, InterfaceSpec,
    LAST_RESIZED_ANNOTATION, SELECTED_HOST_ANNOTATION, VolumeSpec, ZONE_LABEL,
};
use crate::model::{
    ConfigSpec, Image, ImageScope, MediaKind, OptionValue, ResourcePolicy, VirtualMachine,
    VirtualMachineClass,
};

/// Cloud-init user data is handed to the guest through this extra-config key.
pub const CLOUD_INIT_USERDATA_KEY: &str = "guestinfo.userdata";
const CLOUD_INIT_SECRET_KEY: &str = "user-data";

/// Interface resolved when networking is enabled but none is declared.
pub const DEFAULT_INTERFACE_NAME: &str = "eth0";

/// Result of one create attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The instance was created with this unique id.
    Created(String),
    /// Too many creates in flight; nothing was done.
    Deferred,
}

/// Bootstrap data fetched from Secrets or ConfigMaps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapData {
    pub cloud_init: Option<BTreeMap<String, String>>,
    pub sysprep: Option<BTreeMap<String, String>>,
    /// vApp property values, by property key.
    pub vapp: BTreeMap<String, String>,
}

/// Everything one create attempt needs. Built per attempt and discarded.
#[derive(Debug, Clone)]
pub struct CreateContext {
    pub class: VirtualMachineClass,
    pub image: Image,
    pub policy: Option<ResourcePolicy>,
    pub bootstrap: BootstrapData,
    /// Storage class name to storage profile id.
    pub storage_profiles: BTreeMap<String, String>,
    pub interfaces: Vec<InterfaceResult>,
}

/// Runs the create stages for one VM.
pub struct Orchestrator<'a> {
    clients: &'a Clients,
    config: &'a ProviderConfig,
    gate: &'a CreateGate,
}

/// Condition reason for a failed prerequisite.
fn condition_reason(err: &ProviderError) -> &'static str {
    match err {
        ProviderError::NotFound { .. } => "NotFound",
        ProviderError::NotReady(_) => "NotReady",
        ProviderError::Validation(_) | ProviderError::Ambiguous(_) => "Invalid",
        ProviderError::Context { source, .. } => condition_reason(source),
        ProviderError::Remote { .. } | ProviderError::Prerequisites(_) => "GetError",
    }
}

/// Record a prerequisite's condition and keep its error for aggregation.
fn record<T>(
    vm: &mut VirtualMachine,
    type_: ConditionType,
    result: Result<T>,
    errs: &mut Vec<ProviderError>,
) -> Option<T> {
    match result {
        Ok(value) => {
            mark_true(&mut vm.status.conditions, type_);
            Some(value)
        }
        Err(e) => {
            mark_false(
                &mut vm.status.conditions,
                type_,
                condition_reason(&e),
                e.to_string(),
            );
            errs.push(e);
            None
        }
    }
}

impl<'a> Orchestrator<'a> {
    pub fn new(clients: &'a Clients, config: &'a ProviderConfig, gate: &'a CreateGate) -> Self {
        Self {
            clients,
            config,
            gate,
        }
    }

    /// Run every stage and create the instance.
    pub async fn create(&self, vm: &mut VirtualMachine) -> Result<CreateOutcome> {
        info!("Creating VM {}", vm.key());

        let mut ctx = self.prerequisites(vm).await?;
        self.add_instance_storage(vm, &mut ctx).await?;
        ctx.interfaces = self.resolve_networking(vm).await?;

        let config_spec = self.synthesize(vm, &ctx).await?;
        let placement = self.place(vm, &ctx, &config_spec).await?;
        let (folder_id, pool_id) = self.resolve_folder_and_pool(vm, &ctx, &placement).await?;
        self.check_readiness(vm, &ctx, &pool_id).await?;

        let Some(_permit) = self.gate.try_enter() else {
            info!(
                "Deferring create of VM {}: {} creates in flight",
                vm.key(),
                self.gate.in_flight()
            );
            return Ok(CreateOutcome::Deferred);
        };

        let req = CreateRequest {
            name: vm.metadata.name.clone(),
            config_spec,
            folder_id,
            pool_id,
            host_id: placement.host_id.clone(),
        };

        let instance_id = match self.clients.backend.create(&req).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to create VM {}: {}", vm.key(), e);
                mark_false(
                    &mut vm.status.conditions,
                    ConditionType::Created,
                    "Error",
                    e.to_string(),
                );
                return Err(ProviderError::remote("create VM", e));
            }
        };

        info!("Created VM {} as {}", vm.key(), instance_id);
        mark_true(&mut vm.status.conditions, ConditionType::Created);
        vm.status.unique_id = Some(instance_id.clone());
        match serde_json::to_string(&ctx.class.identity()) {
            Ok(identity) => {
                vm.metadata
                    .annotations
                    .insert(LAST_RESIZED_ANNOTATION.to_string(), identity);
            }
            Err(e) => warn!("Failed to encode class identity for VM {}: {}", vm.key(), e),
        }

        Ok(CreateOutcome::Created(instance_id))
    }

    // ========================================================================
    // Prerequisites
    // ========================================================================

    /// Look up everything the VM refers to. Every lookup runs; failures are
    /// aggregated so all unmet prerequisites are reported at once.
    pub async fn prerequisites(&self, vm: &mut VirtualMachine) -> Result<CreateContext> {
        let (class, image, policy, bootstrap, storage) = {
            let vm = &*vm;
            tokio::join!(
                self.get_class(vm),
                self.get_image(vm),
                self.get_resource_policy(vm),
                self.get_bootstrap_data(vm),
                self.get_storage_profiles(vm),
            )
        };

        let mut errs = Vec::new();
        let class = record(vm, ConditionType::ClassReady, class, &mut errs);
        let image = record(vm, ConditionType::ImageReady, image, &mut errs);
        let policy = record(vm, ConditionType::ResourcePolicyReady, policy, &mut errs);
        let bootstrap = record(vm, ConditionType::BootstrapReady, bootstrap, &mut errs);
        let storage = record(vm, ConditionType::StorageReady, storage, &mut errs);

        if let Some(err) = ProviderError::aggregate(errs) {
            debug!("Prerequisites of VM {} not met: {}", vm.key(), err);
            return Err(err);
        }

        match (class, image, policy, bootstrap, storage) {
            (Some(class), Some(image), Some(policy), Some(bootstrap), Some(storage_profiles)) => {
                Ok(CreateContext {
                    class,
                    image,
                    policy,
                    bootstrap,
                    storage_profiles,
                    interfaces: Vec::new(),
                })
            }
            _ => Err(ProviderError::NotReady(format!(
                "prerequisites of VM {} are incomplete",
                vm.key()
            ))),
        }
    }

    async fn get_class(&self, vm: &VirtualMachine) -> Result<VirtualMachineClass> {
        let ns = &vm.metadata.namespace;
        let name = &vm.spec.class_name;
        let class = self
            .clients
            .store
            .get_class(ns, name)
            .await
            .context(format!("get VirtualMachineClass {}/{}", ns, name))?
            .ok_or_else(|| ProviderError::not_found("VirtualMachineClass", format!("{}/{}", ns, name)))?;

        if !class.ready {
            return Err(ProviderError::NotReady(format!(
                "VirtualMachineClass {} is not ready",
                name
            )));
        }
        Ok(class)
    }

    async fn get_image(&self, vm: &VirtualMachine) -> Result<Image> {
        let ns = &vm.metadata.namespace;
        let image_ref = vm
            .spec
            .image
            .as_ref()
            .ok_or_else(|| ProviderError::Validation("spec.image is required".to_string()))?;

        let scopes = match image_ref.kind.as_deref() {
            Some(kind) => vec![kind.parse::<ImageScope>().map_err(ProviderError::Validation)?],
            None => vec![ImageScope::Namespace, ImageScope::Cluster],
        };

        let mut found = None;
        for scope in &scopes {
            found = self
                .clients
                .catalog
                .resolve_image(ns, *scope, &image_ref.name)
                .await
                .context(format!("get {} {}", scope.as_str(), image_ref.name))?;
            if found.is_some() {
                break;
            }
        }
        let image = found
            .ok_or_else(|| ProviderError::not_found(scopes[0].as_str(), image_ref.name.as_str()))?;

        if !image.ready {
            return Err(ProviderError::NotReady(format!(
                "{} {} is not ready",
                image.scope.as_str(),
                image.name
            )));
        }
        if image.media_kind == MediaKind::Iso && vm.spec.cdrom.is_empty() {
            return Err(ProviderError::Validation(format!(
                "ISO type image {} requires a CD-ROM",
                image.name
            )));
        }
        Ok(image)
    }

    async fn get_resource_policy(&self, vm: &VirtualMachine) -> Result<Option<ResourcePolicy>> {
        let Some(name) = vm.spec.resource_policy_name.as_deref() else {
            return Ok(None);
        };
        let ns = &vm.metadata.namespace;
        let policy = self
            .clients
            .store
            .get_resource_policy(ns, name)
            .await
            .context(format!("get VirtualMachineSetResourcePolicy {}/{}", ns, name))?
            .ok_or_else(|| {
                ProviderError::not_found(
                    "VirtualMachineSetResourcePolicy",
                    format!("{}/{}", ns, name),
                )
            })?;

        if policy.deleting {
            return Err(ProviderError::NotReady(format!(
                "VirtualMachineSetResourcePolicy {} is being deleted",
                name
            )));
        }
        Ok(Some(policy))
    }

    async fn get_bootstrap_data(&self, vm: &VirtualMachine) -> Result<BootstrapData> {
        let ns = &vm.metadata.namespace;
        let secrets = &*self.clients.secrets;
        let spec = &vm.spec.bootstrap;
        let mut data = BootstrapData::default();

        if let Some(name) = spec.cloud_init_secret.as_deref() {
            data.cloud_init = Some(get_data(secrets, ns, name).await?);
        }
        if let Some(name) = spec.sysprep_secret.as_deref() {
            data.sysprep = Some(get_data(secrets, ns, name).await?);
        }

        if let Some(vapp) = spec.vapp.as_ref() {
            if let Some(name) = vapp.raw_properties.as_deref() {
                data.vapp.extend(get_data(secrets, ns, name).await?);
            }
            for prop in &vapp.properties {
                if let Some(value) = prop.value.as_ref() {
                    data.vapp.insert(prop.key.clone(), value.clone());
                }
                if let Some(from) = prop.from.as_ref() {
                    let secret = get_data(secrets, ns, &from.name).await?;
                    let value = secret.get(&from.key).ok_or_else(|| {
                        ProviderError::not_found("Secret key", format!("{}/{}", from.name, from.key))
                    })?;
                    data.vapp.insert(prop.key.clone(), value.clone());
                }
            }
        }

        Ok(data)
    }

    async fn get_storage_profiles(&self, vm: &VirtualMachine) -> Result<BTreeMap<String, String>> {
        if self.config.storage_class_required && vm.spec.storage_class.is_empty() {
            return Err(ProviderError::Validation(
                "storage class is required but not specified".to_string(),
            ));
        }

        let classes = std::iter::once(vm.spec.storage_class.as_str())
            .chain(
                vm.spec
                    .volumes
                    .iter()
                    .filter_map(|v| v.instance_volume())
                    .map(|v| v.storage_class.as_str()),
            )
            .filter(|sc| !sc.is_empty());

        let mut profiles = BTreeMap::new();
        for storage_class in classes {
            if profiles.contains_key(storage_class) {
                continue;
            }
            let profile = self.storage_profile(&vm.metadata.namespace, storage_class).await?;
            profiles.insert(storage_class.to_string(), profile);
        }
        Ok(profiles)
    }

    async fn storage_profile(&self, namespace: &str, storage_class: &str) -> Result<String> {
        self.clients
            .store
            .get_storage_profile_id(namespace, storage_class)
            .await
            .context(format!("get StorageClass {}", storage_class))?
            .ok_or_else(|| ProviderError::not_found("StorageClass", storage_class))
    }

    /// Add the class's instance storage to the VM, once.
    async fn add_instance_storage(
        &self,
        vm: &mut VirtualMachine,
        ctx: &mut CreateContext,
    ) -> Result<()> {
        let storage = &ctx.class.spec.hardware.instance_storage;
        if !self.config.instance_storage_enabled
            || storage.volume_sizes_bytes.is_empty()
            || vm.has_instance_volumes()
        {
            return Ok(());
        }

        if !ctx.storage_profiles.contains_key(&storage.storage_class) {
            let profile = self
                .storage_profile(&vm.metadata.namespace, &storage.storage_class)
                .await?;
            ctx.storage_profiles
                .insert(storage.storage_class.clone(), profile);
        }

        for size in &storage.volume_sizes_bytes {
            let name = format!("instance-pvc-{}", Uuid::new_v4());
            vm.spec.volumes.push(VolumeSpec {
                name: name.clone(),
                claim: Some(ClaimVolumeSource {
                    claim_name: name,
                    read_only: false,
                    instance_volume: Some(InstanceVolumeClaim {
                        storage_class: storage.storage_class.clone(),
                        size_bytes: *size,
                    }),
                }),
            });
        }
        debug!(
            "Added {} instance storage volumes to VM {}",
            storage.volume_sizes_bytes.len(),
            vm.key()
        );
        Ok(())
    }

    // ========================================================================
    // Networking
    // ========================================================================

    async fn resolve_networking(&self, vm: &mut VirtualMachine) -> Result<Vec<InterfaceResult>> {
        if vm.spec.network.disabled {
            remove_condition(&mut vm.status.conditions, ConditionType::NetworkReady);
            return Ok(Vec::new());
        }

        let interfaces = if vm.spec.network.interfaces.is_empty() {
            vec![InterfaceSpec {
                name: DEFAULT_INTERFACE_NAME.to_string(),
                ..Default::default()
            }]
        } else {
            vm.spec.network.interfaces.clone()
        };

        match self.clients.network.resolve(vm, &interfaces).await {
            Ok(results) => {
                mark_true(&mut vm.status.conditions, ConditionType::NetworkReady);
                Ok(results)
            }
            Err(e) => {
                mark_false(
                    &mut vm.status.conditions,
                    ConditionType::NetworkReady,
                    "NotReady",
                    e.to_string(),
                );
                Err(ProviderError::remote("resolve network interfaces", e))
            }
        }
    }

    // ========================================================================
    // Synthesis
    // ========================================================================

    /// Build the configuration the instance is created with.
    pub async fn synthesize(&self, vm: &VirtualMachine, ctx: &CreateContext) -> Result<ConfigSpec> {
        let mut spec = create_config_spec(
            vm,
            &ctx.class,
            Some(&ctx.image),
            &self.config.managed_by_extension_key,
        );
        apply_network_results(&mut spec, &ctx.interfaces);

        if let Some(user_data) = ctx
            .bootstrap
            .cloud_init
            .as_ref()
            .and_then(|data| data.get(CLOUD_INIT_SECRET_KEY))
        {
            spec.extra_config
                .push(OptionValue::new(CLOUD_INIT_USERDATA_KEY, user_data.as_str()));
        }
        synthesize_extra_config(
            &mut spec,
            vm,
            &self.config.global_extra_config,
            self.config.pci_passthru_mmio_size_gb,
        );

        let cdroms = allocate_cdrom_changes(
            &*self.clients.catalog,
            &vm.metadata.namespace,
            &vm.spec.cdrom,
            &[],
            &spec.device_changes,
        )
        .await?;
        spec.device_changes.extend(cdroms);

        Ok(spec)
    }

    // ========================================================================
    // Placement
    // ========================================================================

    async fn place(
        &self,
        vm: &mut VirtualMachine,
        ctx: &CreateContext,
        config_spec: &ConfigSpec,
    ) -> Result<PlacementResult> {
        let profile = ctx
            .storage_profiles
            .get(&vm.spec.storage_class)
            .map(String::as_str);
        let placement_spec = placement_config_spec(config_spec, vm, profile, &ctx.storage_profiles);
        let pool_hint = ctx.policy.as_ref().and_then(|p| p.resource_pool.as_deref());

        let result = match self
            .clients
            .placement
            .place(vm, &placement_spec, pool_hint)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                mark_false(
                    &mut vm.status.conditions,
                    ConditionType::PlacementReady,
                    "NotReady",
                    e.to_string(),
                );
                return Err(ProviderError::remote("place VM", e));
            }
        };

        if vm.has_instance_volumes() && result.host_id.is_none() {
            let err = ProviderError::Validation(
                "placement did not select a host for instance storage".to_string(),
            );
            mark_false(
                &mut vm.status.conditions,
                ConditionType::PlacementReady,
                "Invalid",
                err.to_string(),
            );
            return Err(err);
        }

        if let Some(zone) = result.zone_name.as_ref() {
            vm.metadata
                .labels
                .insert(ZONE_LABEL.to_string(), zone.clone());
        }
        if let Some(host) = result.host_id.as_ref() {
            vm.metadata
                .annotations
                .insert(SELECTED_HOST_ANNOTATION.to_string(), host.clone());
        }
        mark_true(&mut vm.status.conditions, ConditionType::PlacementReady);

        debug!(
            "Placed VM {} in pool {:?} host {:?} zone {:?}",
            vm.key(),
            result.pool_id,
            result.host_id,
            result.zone_name
        );
        Ok(result)
    }

    async fn resolve_folder_and_pool(
        &self,
        vm: &VirtualMachine,
        ctx: &CreateContext,
        placement: &PlacementResult,
    ) -> Result<(String, String)> {
        let ns = &vm.metadata.namespace;
        let zone = vm.metadata.labels.get(ZONE_LABEL).map(String::as_str);
        let defaults = self
            .clients
            .store
            .get_namespace_placement(ns, zone)
            .await
            .context(format!("get folder and resource pool of namespace {}", ns))?
            .ok_or_else(|| ProviderError::not_found("NamespacePlacement", ns.as_str()))?;

        let backend = &*self.clients.backend;
        let policy = ctx.policy.as_ref();

        let pool_id = match (placement.pool_id.as_ref(), policy.and_then(|p| p.resource_pool.as_deref())) {
            (Some(pool), _) => pool.clone(),
            (None, Some(child)) => backend
                .find_child_pool(&defaults.pool_id, child)
                .await
                .context(format!("find resource pool {}", child))?
                .ok_or_else(|| ProviderError::not_found("ResourcePool", child))?,
            (None, None) => defaults.pool_id.clone(),
        };

        let folder_id = match policy.and_then(|p| p.folder.as_deref()) {
            Some(child) => backend
                .find_child_folder(&defaults.folder_id, child)
                .await
                .context(format!("find folder {}", child))?
                .ok_or_else(|| ProviderError::not_found("Folder", child))?,
            None => defaults.folder_id.clone(),
        };

        Ok((folder_id, pool_id))
    }

    // ========================================================================
    // Readiness
    // ========================================================================

    async fn check_readiness(
        &self,
        vm: &VirtualMachine,
        ctx: &CreateContext,
        pool_id: &str,
    ) -> Result<()> {
        if let Some(policy) = ctx.policy.as_ref().filter(|p| !p.cluster_modules.is_empty()) {
            let exist = self
                .clients
                .backend
                .cluster_modules_exist(pool_id, &policy.cluster_modules)
                .await
                .context("check cluster modules")?;
            if !exist {
                return Err(ProviderError::NotReady(
                    "VirtualMachineSetResourcePolicy cluster module is not ready".to_string(),
                ));
            }
        }

        if vm.has_instance_volumes() && vm.annotation(INSTANCE_STORAGE_BOUND_ANNOTATION).is_none() {
            return Err(ProviderError::NotReady(
                "instance storage PVCs are not bound yet".to_string(),
            ));
        }
        Ok(())
    }
}
