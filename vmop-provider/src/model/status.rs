//! VirtualMachine status shape.

use serde::{Deserialize, Serialize};

use super::vm::PowerState;
use crate::conditions::Condition;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalObjectRef {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsStatus {
    pub host_name: Option<String>,
    pub domain_name: Option<String>,
    pub nameservers: Vec<String>,
    pub search_domains: Vec<String>,
    pub dhcp: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpAddressStatus {
    /// Address in CIDR notation.
    pub address: String,
    pub origin: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceStatus {
    pub name: String,
    pub device_key: i32,
    pub mac_address: Option<String>,
    pub ip_addresses: Vec<IpAddressStatus>,
    pub dns: Option<DnsStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpRouteStatus {
    pub network_address: String,
    pub gateway_address: Option<String>,
    pub gateway_device: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkStatus {
    pub primary_ip4: Option<String>,
    pub primary_ip6: Option<String>,
    pub interfaces: Vec<InterfaceStatus>,
    pub ip_routes: Vec<IpRouteStatus>,
    pub dns: Option<DnsStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualMachineStatus {
    pub power_state: Option<PowerState>,
    pub unique_id: Option<String>,
    pub bios_uuid: Option<String>,
    pub instance_uuid: Option<String>,
    pub hardware_version: i32,
    pub host: Option<String>,
    pub zone: Option<String>,
    pub class: Option<LocalObjectRef>,
    pub image: Option<LocalObjectRef>,
    pub network: Option<NetworkStatus>,
    pub change_block_tracking: Option<bool>,
    pub conditions: Vec<Condition>,
}
