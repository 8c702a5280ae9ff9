//! Network resolution service.

use std::net::IpAddr;

use async_trait::async_trait;
use ipnet::IpNet;

use crate::error::ClientResult;
use crate::model::NetworkBacking;
use crate::model::vm::{InterfaceSpec, VirtualMachine};

/// A static address assigned to an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpConfig {
    pub address: IpNet,
    pub gateway: Option<IpAddr>,
}

/// Backend-attachable result for one declared interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceResult {
    pub name: String,
    pub mac_address: Option<String>,
    pub external_id: Option<String>,
    pub backing: Option<NetworkBacking>,
    pub ip_configs: Vec<IpConfig>,
    pub dhcp4: bool,
    pub dhcp6: bool,
}

#[async_trait]
pub trait NetworkResolver: Send + Sync {
    /// Resolve interfaces in declaration order. One result per interface.
    async fn resolve(
        &self,
        vm: &VirtualMachine,
        interfaces: &[InterfaceSpec],
    ) -> ClientResult<Vec<InterfaceResult>>;
}
