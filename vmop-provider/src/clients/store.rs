//! Declarative object store and secret store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ClientResult, ProviderError, Result, ResultExt};
use crate::model::{ResourcePolicy, VirtualMachineClass};

/// Folder and resource pool a namespace's VMs are created in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePlacement {
    pub folder_id: String,
    pub pool_id: String,
}

/// Read access to the declarative objects a VM refers to.
///
/// Absent objects are `Ok(None)`, not errors.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get a VirtualMachineClass by name.
    async fn get_class(&self, namespace: &str, name: &str)
    -> ClientResult<Option<VirtualMachineClass>>;

    /// Get a resource policy by name.
    async fn get_resource_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClientResult<Option<ResourcePolicy>>;

    /// Storage profile id behind a storage class.
    async fn get_storage_profile_id(
        &self,
        namespace: &str,
        storage_class: &str,
    ) -> ClientResult<Option<String>>;

    /// Default folder and pool for a namespace, per zone.
    async fn get_namespace_placement(
        &self,
        namespace: &str,
        zone: Option<&str>,
    ) -> ClientResult<Option<NamespacePlacement>>;
}

/// Key/value data stores (Secrets and ConfigMaps).
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClientResult<Option<BTreeMap<String, String>>>;

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClientResult<Option<BTreeMap<String, String>>>;
}

/// Read bootstrap data by name.
///
/// Looks for a Secret first and falls back to a ConfigMap of the same name,
/// which older VMs used for the same data.
pub async fn get_data(
    store: &dyn SecretStore,
    namespace: &str,
    name: &str,
) -> Result<BTreeMap<String, String>> {
    if let Some(data) = store
        .get_secret(namespace, name)
        .await
        .context(format!("get secret {}/{}", namespace, name))?
    {
        return Ok(data);
    }

    debug!("Secret {}/{} not found, trying ConfigMap", namespace, name);
    store
        .get_config_map(namespace, name)
        .await
        .context(format!("get config map {}/{}", namespace, name))?
        .ok_or_else(|| ProviderError::not_found("Secret", format!("{}/{}", namespace, name)))
}
