//! Runtime properties read from the backend.

use serde::{Deserialize, Serialize};

use super::vmconfig::ConfigInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendPowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Summary {
    pub power_state: Option<BackendPowerState>,
    pub host_name: Option<String>,
    pub uuid: Option<String>,
    pub instance_uuid: Option<String>,
    pub hw_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolsRunningStatus {
    GuestToolsNotRunning,
    GuestToolsRunning,
    GuestToolsExecutingScripts,
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CustomizationStatus {
    Idle,
    Pending,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustomizationInfo {
    pub status: Option<CustomizationStatus>,
    pub error_msg: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GuestDnsConfig {
    pub host_name: Option<String>,
    pub domain_name: Option<String>,
    pub nameservers: Vec<String>,
    pub search_domains: Vec<String>,
    pub dhcp: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GuestIpAddress {
    pub ip_address: String,
    pub prefix_length: u8,
    pub origin: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GuestNicInfo {
    /// Key of the NIC device this entry reports on. Negative for pseudo-devices.
    pub device_config_id: i32,
    pub mac_address: Option<String>,
    pub ip_addresses: Vec<GuestIpAddress>,
    pub dns: Option<GuestDnsConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GuestIpRoute {
    pub network: String,
    pub prefix_length: u8,
    pub gateway_address: Option<String>,
    pub gateway_device: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GuestStackInfo {
    pub dns: Option<GuestDnsConfig>,
    pub routes: Vec<GuestIpRoute>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GuestInfo {
    pub ip_address: Option<String>,
    pub tools_running_status: Option<ToolsRunningStatus>,
    pub customization: Option<CustomizationInfo>,
    pub nics: Vec<GuestNicInfo>,
    pub ip_stack: Vec<GuestStackInfo>,
}

/// Observed configuration plus runtime state of one backend instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VmProperties {
    pub config: Option<ConfigInfo>,
    pub summary: Summary,
    pub guest: Option<GuestInfo>,
}

impl VmProperties {
    pub fn power_state(&self) -> Option<BackendPowerState> {
        self.summary.power_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecognized_statuses_deserialize() {
        let summary: Summary = serde_json::from_str(r#"{"powerState": "shuttingDown"}"#).unwrap();
        assert_eq!(summary.power_state, Some(BackendPowerState::Unrecognized));

        let guest: GuestInfo =
            serde_json::from_str(r#"{"toolsRunningStatus": "guestToolsRunning"}"#).unwrap();
        assert_eq!(
            guest.tools_running_status,
            Some(ToolsRunningStatus::GuestToolsRunning)
        );
    }
}
