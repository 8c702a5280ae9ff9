//! Backend procedural API.

use async_trait::async_trait;

use crate::error::ClientResult;
use crate::model::{ChangeSet, ConfigSpec, PowerState, VirtualMachine, VmProperties};

/// Which property groups to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyMask {
    pub config: bool,
    pub summary: bool,
    pub guest: bool,
}

impl PropertyMask {
    pub const ALL: PropertyMask = PropertyMask {
        config: true,
        summary: true,
        guest: true,
    };

    pub const SUMMARY: PropertyMask = PropertyMask {
        config: false,
        summary: true,
        guest: false,
    };
}

/// Request to create a VM instance.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub name: String,
    pub config_spec: ConfigSpec,
    pub folder_id: String,
    pub pool_id: String,
    pub host_id: Option<String>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Find the instance backing a VM, by recorded unique id or by name.
    async fn find_instance(&self, vm: &VirtualMachine) -> ClientResult<Option<String>>;

    /// Create an instance. Returns its unique id.
    async fn create(&self, req: &CreateRequest) -> ClientResult<String>;

    /// Apply a change-set in a single atomic call.
    async fn reconfigure(&self, instance_id: &str, changes: &ChangeSet) -> ClientResult<()>;

    async fn change_power_state(&self, instance_id: &str, state: PowerState) -> ClientResult<()>;

    async fn get_properties(
        &self,
        instance_id: &str,
        mask: PropertyMask,
    ) -> ClientResult<VmProperties>;

    async fn delete(&self, instance_id: &str) -> ClientResult<()>;

    /// Child resource pool of `parent_pool_id` named `name`.
    async fn find_child_pool(&self, parent_pool_id: &str, name: &str)
    -> ClientResult<Option<String>>;

    /// Child folder of `parent_folder_id` named `name`.
    async fn find_child_folder(
        &self,
        parent_folder_id: &str,
        name: &str,
    ) -> ClientResult<Option<String>>;

    /// Whether all named cluster modules exist in the cluster owning `pool_id`.
    async fn cluster_modules_exist(&self, pool_id: &str, modules: &[String])
    -> ClientResult<bool>;
}
