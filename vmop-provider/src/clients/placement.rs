//! Placement service.

use async_trait::async_trait;

use crate::error::ClientResult;
use crate::model::{ConfigSpec, VirtualMachine};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementResult {
    pub pool_id: Option<String>,
    pub host_id: Option<String>,
    pub zone_name: Option<String>,
    pub instance_storage: bool,
}

#[async_trait]
pub trait PlacementService: Send + Sync {
    /// Select a pool (and optionally host and zone) for a new VM.
    ///
    /// `pool_hint` names a child resource pool the VM must land in.
    async fn place(
        &self,
        vm: &VirtualMachine,
        config_spec: &ConfigSpec,
        pool_hint: Option<&str>,
    ) -> ClientResult<PlacementResult>;
}
