//! Projects backend runtime properties onto the VirtualMachine status.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;

use crate::conditions::{
    Condition, ConditionStatus, ConditionType, mark_false, mark_true, mark_unknown,
    upsert_condition,
};
use crate::configspec::parse_hardware_version;
use crate::model::ImageScope;
use crate::model::properties::{
    CustomizationStatus, GuestDnsConfig, GuestInfo, GuestIpRoute, GuestNicInfo, ToolsRunningStatus,
};
use crate::model::status::{
    DnsStatus, InterfaceStatus, IpAddressStatus, IpRouteStatus, LocalObjectRef, NetworkStatus,
};
use crate::model::vm::ZONE_LABEL;
use crate::model::{BackendPowerState, ConfigInfo, PowerState, VirtualMachine, VmProperties};

/// Extra-config key the guest writes its bootstrap result to.
pub const BOOTSTRAP_CONDITION_KEY: &str = "guestinfo.vmservice.bootstrap.condition";

const CUSTOMIZATION_FAILED_MESSAGE: &str = "Guest customization failed due to an unknown error";

pub fn convert_power_state(state: Option<BackendPowerState>) -> Option<PowerState> {
    match state? {
        BackendPowerState::PoweredOn => Some(PowerState::On),
        BackendPowerState::PoweredOff => Some(PowerState::Off),
        BackendPowerState::Suspended => Some(PowerState::Suspended),
        BackendPowerState::Unrecognized => None,
    }
}

/// Update `vm.status` from the properties of backend instance `instance_id`.
pub fn project(vm: &mut VirtualMachine, instance_id: &str, props: &VmProperties) {
    let config = props.config.as_ref();
    let summary = &props.summary;
    let status = &mut vm.status;

    status.power_state = convert_power_state(props.power_state());
    status.unique_id = Some(instance_id.to_string());
    status.bios_uuid = summary
        .uuid
        .clone()
        .or_else(|| config.map(|c| c.uuid.clone()).filter(|u| !u.is_empty()));
    status.instance_uuid = summary
        .instance_uuid
        .clone()
        .or_else(|| config.map(|c| c.instance_uuid.clone()).filter(|u| !u.is_empty()));
    status.hardware_version = summary
        .hw_version
        .as_deref()
        .or(config.map(|c| c.version.as_str()))
        .and_then(parse_hardware_version)
        .unwrap_or(0);
    if summary.host_name.is_some() {
        status.host = summary.host_name.clone();
    }
    status.zone = vm.metadata.labels.get(ZONE_LABEL).cloned();
    status.change_block_tracking = config.and_then(|c| c.change_tracking_enabled);

    status.class = Some(LocalObjectRef {
        kind: "VirtualMachineClass".to_string(),
        name: vm.spec.class_name.clone(),
    });
    status.image = vm.spec.image.as_ref().map(|image| LocalObjectRef {
        kind: image
            .kind
            .clone()
            .unwrap_or_else(|| ImageScope::Namespace.as_str().to_string()),
        name: image.name.clone(),
    });

    let interface_names: Vec<&str> = vm
        .spec
        .network
        .interfaces
        .iter()
        .map(|i| i.name.as_str())
        .collect();
    status.network = props
        .guest
        .as_ref()
        .map(|guest| network_status(guest, &interface_names));

    let conditions = &mut status.conditions;
    tools_condition(conditions, props.guest.as_ref());
    customization_condition(conditions, props.guest.as_ref());
    bootstrap_condition(conditions, config);
    mark_true(conditions, ConditionType::Created);
}

// ============================================================================
// Network
// ============================================================================

fn dns_status(dns: &GuestDnsConfig) -> DnsStatus {
    DnsStatus {
        host_name: dns.host_name.clone(),
        domain_name: dns.domain_name.clone(),
        nameservers: dns.nameservers.clone(),
        search_domains: dns.search_domains.clone(),
        dhcp: dns.dhcp,
    }
}

fn interface_status(name: &str, nic: &GuestNicInfo) -> InterfaceStatus {
    InterfaceStatus {
        name: name.to_string(),
        device_key: nic.device_config_id,
        mac_address: nic.mac_address.clone(),
        ip_addresses: nic
            .ip_addresses
            .iter()
            .map(|ip| IpAddressStatus {
                address: format!("{}/{}", ip.ip_address, ip.prefix_length),
                origin: ip.origin.clone(),
                state: ip.state.clone(),
            })
            .collect(),
        dns: nic.dns.as_ref().map(dns_status),
    }
}

fn network_status(guest: &GuestInfo, interface_names: &[&str]) -> NetworkStatus {
    let mut status = NetworkStatus::default();

    match guest.ip_address.as_deref().map(str::parse::<IpAddr>) {
        Some(Ok(IpAddr::V4(ip))) => status.primary_ip4 = Some(ip.to_string()),
        Some(Ok(IpAddr::V6(ip))) => status.primary_ip6 = Some(ip.to_string()),
        _ => {}
    }

    // Device keys are assigned in declaration order, so sorting by them
    // recovers which declared interface a NIC belongs to.
    let mut nics: Vec<&GuestNicInfo> = guest
        .nics
        .iter()
        .filter(|nic| nic.device_config_id >= 0)
        .collect();
    nics.sort_by_key(|nic| nic.device_config_id);

    status.interfaces = nics
        .iter()
        .enumerate()
        .map(|(idx, nic)| interface_status(interface_names.get(idx).copied().unwrap_or(""), nic))
        .collect();

    if let Some(stack) = guest.ip_stack.first() {
        status.dns = stack.dns.as_ref().map(dns_status);
        status.ip_routes = filter_routes(&stack.routes);
    }
    status
}

fn is_noise_v4(net: &Ipv4Addr, prefix: u8) -> bool {
    let [a, b, c, _] = net.octets();
    net.is_link_local() || (a == 224 && b == 0 && c == 0) || prefix == 32
}

fn is_noise_v6(net: &Ipv6Addr) -> bool {
    (net.segments()[0] & 0xffc0) == 0xfe80 || net.is_multicast()
}

/// Drop routes that carry no information for users: link-local and
/// multicast networks, IPv4 host routes and anything malformed.
pub fn filter_routes(routes: &[GuestIpRoute]) -> Vec<IpRouteStatus> {
    routes
        .iter()
        .filter_map(|route| {
            let net: IpNet = format!("{}/{}", route.network, route.prefix_length)
                .parse()
                .ok()?;
            let noise = match net {
                IpNet::V4(v4) => is_noise_v4(&v4.addr(), v4.prefix_len()),
                IpNet::V6(v6) => is_noise_v6(&v6.addr()),
            };
            if noise {
                return None;
            }
            Some(IpRouteStatus {
                network_address: net.to_string(),
                gateway_address: route.gateway_address.clone().filter(|g| !g.is_empty()),
                gateway_device: route.gateway_device.clone().filter(|d| !d.is_empty()),
            })
        })
        .collect()
}

// ============================================================================
// Conditions
// ============================================================================

fn tools_condition(conditions: &mut Vec<Condition>, guest: Option<&GuestInfo>) {
    let Some(running) = guest.and_then(|g| g.tools_running_status) else {
        mark_unknown(conditions, ConditionType::ToolsRunning, "NoGuestInfo", "");
        return;
    };

    match running {
        ToolsRunningStatus::GuestToolsNotRunning => mark_false(
            conditions,
            ConditionType::ToolsRunning,
            "VirtualMachineToolsNotRunning",
            "VMware Tools is not running",
        ),
        ToolsRunningStatus::GuestToolsRunning | ToolsRunningStatus::GuestToolsExecutingScripts => {
            mark_true(conditions, ConditionType::ToolsRunning)
        }
        ToolsRunningStatus::Unrecognized => mark_unknown(
            conditions,
            ConditionType::ToolsRunning,
            "Unknown",
            "Unexpected VMware Tools running status",
        ),
    }
}

fn customization_condition(
    conditions: &mut Vec<Condition>,
    guest: Option<&GuestInfo>,
) {
    let Some(info) = guest.and_then(|g| g.customization.as_ref()) else {
        mark_unknown(conditions, ConditionType::GuestCustomization, "NoGuestInfo", "");
        return;
    };
    let error_msg = info.error_msg.as_deref().filter(|m| !m.is_empty());

    let ty = ConditionType::GuestCustomization;
    match info.status {
        None | Some(CustomizationStatus::Idle) | Some(CustomizationStatus::Succeeded) => {
            mark_true(conditions, ty)
        }
        Some(CustomizationStatus::Pending) => {
            mark_false(conditions, ty, "GuestCustomizationPending", "")
        }
        Some(CustomizationStatus::Running) => {
            mark_false(conditions, ty, "GuestCustomizationRunning", "")
        }
        Some(CustomizationStatus::Failed) => mark_false(
            conditions,
            ty,
            "GuestCustomizationFailed",
            error_msg.unwrap_or(CUSTOMIZATION_FAILED_MESSAGE),
        ),
        Some(CustomizationStatus::Unrecognized) => mark_false(
            conditions,
            ty,
            "Unknown",
            error_msg.unwrap_or("Unexpected guest customization status"),
        ),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Parse `status[,reason[,message]]`. The message may itself contain commas.
pub fn parse_bootstrap_condition(value: &str) -> (ConditionStatus, String, String) {
    let mut parts = value.splitn(3, ',');
    let status = parts.next().unwrap_or_default().trim();
    let reason = parts.next().unwrap_or_default().trim().to_string();
    let message = parts.next().unwrap_or_default().trim().to_string();

    match parse_bool(status) {
        Some(true) => (ConditionStatus::True, reason, message),
        Some(false) => (ConditionStatus::False, reason, message),
        None => (ConditionStatus::Unknown, reason, message),
    }
}

fn bootstrap_condition(
    conditions: &mut Vec<Condition>,
    config: Option<&ConfigInfo>,
) {
    let ty = ConditionType::GuestBootstrap;
    let Some(config) = config else {
        mark_unknown(conditions, ty, "NoConfigInfo", "");
        return;
    };
    if config.extra_config.is_empty() {
        mark_unknown(conditions, ty, "NoExtraConfig", "");
        return;
    }
    let Some(value) = config.extra_config_value(BOOTSTRAP_CONDITION_KEY) else {
        mark_unknown(conditions, ty, "NoBootstrapStatus", "");
        return;
    };

    let (status, reason, message) = parse_bootstrap_condition(value);
    let reason = match (status, reason.is_empty()) {
        (_, false) => reason,
        (ConditionStatus::True, true) => "True".to_string(),
        (ConditionStatus::False, true) => "BootstrapFailed".to_string(),
        (ConditionStatus::Unknown, true) => "UnrecognizedStatus".to_string(),
    };
    upsert_condition(conditions, ty, status, reason, message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::get_condition;
    use crate::model::properties::{CustomizationInfo, GuestIpAddress, GuestStackInfo, Summary};
    use crate::model::vm::InterfaceSpec;
    use crate::model::{ImageRef, OptionValue};

    fn route(network: &str, prefix: u8) -> GuestIpRoute {
        GuestIpRoute {
            network: network.into(),
            prefix_length: prefix,
            gateway_address: Some("10.0.0.1".into()),
            gateway_device: Some("0".into()),
        }
    }

    fn nic(key: i32, mac: &str, ip: &str) -> GuestNicInfo {
        GuestNicInfo {
            device_config_id: key,
            mac_address: Some(mac.into()),
            ip_addresses: vec![GuestIpAddress {
                ip_address: ip.into(),
                prefix_length: 24,
                origin: Some("dhcp".into()),
                state: Some("preferred".into()),
            }],
            dns: None,
        }
    }

    fn vm() -> VirtualMachine {
        let mut vm = VirtualMachine::default();
        vm.metadata.name = "web-0".into();
        vm.metadata.namespace = "ns".into();
        vm.spec.class_name = "small".into();
        vm.spec.image = Some(ImageRef {
            kind: None,
            name: "ubuntu".into(),
        });
        vm.spec.network.interfaces = vec![
            InterfaceSpec {
                name: "eth0".into(),
                ..Default::default()
            },
            InterfaceSpec {
                name: "eth1".into(),
                ..Default::default()
            },
        ];
        vm
    }

    fn props() -> VmProperties {
        VmProperties {
            config: Some(ConfigInfo {
                version: "vmx-15".into(),
                change_tracking_enabled: Some(true),
                extra_config: vec![OptionValue::new("guestinfo.other", "x")],
                ..Default::default()
            }),
            summary: Summary {
                power_state: Some(BackendPowerState::PoweredOn),
                host_name: Some("esx-01".into()),
                uuid: Some("bios-uuid".into()),
                instance_uuid: Some("instance-uuid".into()),
                hw_version: Some("vmx-19".into()),
            },
            guest: Some(GuestInfo {
                ip_address: Some("10.0.0.5".into()),
                tools_running_status: Some(ToolsRunningStatus::GuestToolsRunning),
                customization: None,
                nics: vec![
                    nic(4001, "00:50:56:00:00:02", "10.0.1.5"),
                    nic(-1, "00:00:00:00:00:00", "127.0.0.1"),
                    nic(4000, "00:50:56:00:00:01", "10.0.0.5"),
                ],
                ip_stack: vec![GuestStackInfo {
                    dns: Some(GuestDnsConfig {
                        nameservers: vec!["10.0.0.2".into()],
                        ..Default::default()
                    }),
                    routes: vec![route("10.0.0.0", 24), route("169.254.0.0", 16)],
                }],
            }),
        }
    }

    #[test]
    fn test_power_state_mapping() {
        assert_eq!(
            convert_power_state(Some(BackendPowerState::PoweredOff)),
            Some(PowerState::Off)
        );
        assert_eq!(
            convert_power_state(Some(BackendPowerState::Suspended)),
            Some(PowerState::Suspended)
        );
        assert_eq!(convert_power_state(Some(BackendPowerState::Unrecognized)), None);
        assert_eq!(convert_power_state(None), None);
    }

    #[test]
    fn test_project_identity() {
        let mut vm = vm();
        vm.metadata.labels.insert(ZONE_LABEL.into(), "zone-a".into());
        project(&mut vm, "vm-42", &props());

        let status = &vm.status;
        assert_eq!(status.power_state, Some(PowerState::On));
        assert_eq!(status.unique_id.as_deref(), Some("vm-42"));
        assert_eq!(status.bios_uuid.as_deref(), Some("bios-uuid"));
        assert_eq!(status.instance_uuid.as_deref(), Some("instance-uuid"));
        assert_eq!(status.hardware_version, 19);
        assert_eq!(status.host.as_deref(), Some("esx-01"));
        assert_eq!(status.zone.as_deref(), Some("zone-a"));
        assert_eq!(status.change_block_tracking, Some(true));
        assert_eq!(status.image.as_ref().map(|i| i.kind.as_str()), Some("VirtualMachineImage"));
        assert!(crate::conditions::is_true(&status.conditions, ConditionType::Created));
    }

    #[test]
    fn test_project_interfaces_sorted_and_named() {
        let mut vm = vm();
        project(&mut vm, "vm-42", &props());

        let network = vm.status.network.unwrap();
        assert_eq!(network.primary_ip4.as_deref(), Some("10.0.0.5"));
        assert_eq!(network.primary_ip6, None);
        assert_eq!(network.interfaces.len(), 2);
        assert_eq!(network.interfaces[0].name, "eth0");
        assert_eq!(network.interfaces[0].device_key, 4000);
        assert_eq!(network.interfaces[0].ip_addresses[0].address, "10.0.0.5/24");
        assert_eq!(network.interfaces[1].name, "eth1");
        assert_eq!(network.interfaces[1].device_key, 4001);
        assert_eq!(network.ip_routes.len(), 1);
        assert_eq!(network.dns.unwrap().nameservers, vec!["10.0.0.2".to_string()]);
    }

    #[test]
    fn test_filter_routes() {
        let routes = vec![
            route("10.0.0.0", 24),
            route("169.254.0.0", 16),
            route("224.0.0.0", 24),
            route("10.0.0.7", 32),
            route("fe80::", 64),
            route("ff02::", 16),
            route("2001:db8::", 32),
            route("not-an-ip", 24),
            route("10.1.0.0", 40),
        ];
        let kept: Vec<String> = filter_routes(&routes)
            .into_iter()
            .map(|r| r.network_address)
            .collect();
        assert_eq!(kept, vec!["10.0.0.0/24".to_string(), "2001:db8::/32".to_string()]);
    }

    #[test]
    fn test_tools_condition() {
        let mut conditions = Vec::new();
        tools_condition(&mut conditions, None);
        let c = get_condition(&conditions, ConditionType::ToolsRunning).unwrap();
        assert_eq!(c.status, ConditionStatus::Unknown);
        assert_eq!(c.reason, "NoGuestInfo");

        let guest = GuestInfo {
            tools_running_status: Some(ToolsRunningStatus::GuestToolsNotRunning),
            ..Default::default()
        };
        tools_condition(&mut conditions, Some(&guest));
        let c = get_condition(&conditions, ConditionType::ToolsRunning).unwrap();
        assert_eq!(c.status, ConditionStatus::False);

        let guest = GuestInfo {
            tools_running_status: Some(ToolsRunningStatus::GuestToolsExecutingScripts),
            ..Default::default()
        };
        tools_condition(&mut conditions, Some(&guest));
        assert!(crate::conditions::is_true(&conditions, ConditionType::ToolsRunning));
    }

    #[test]
    fn test_customization_condition() {
        let mut conditions = Vec::new();
        let mut guest = GuestInfo {
            customization: Some(CustomizationInfo {
                status: Some(CustomizationStatus::Failed),
                error_msg: Some("bad sysprep".into()),
            }),
            ..Default::default()
        };
        customization_condition(&mut conditions, Some(&guest));
        let c = get_condition(&conditions, ConditionType::GuestCustomization).unwrap();
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.message, "bad sysprep");

        guest.customization = Some(CustomizationInfo::default());
        customization_condition(&mut conditions, Some(&guest));
        assert!(crate::conditions::is_true(&conditions, ConditionType::GuestCustomization));

        guest.customization = Some(CustomizationInfo {
            status: Some(CustomizationStatus::Unrecognized),
            error_msg: None,
        });
        customization_condition(&mut conditions, Some(&guest));
        let c = get_condition(&conditions, ConditionType::GuestCustomization).unwrap();
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.reason, "Unknown");

        guest.customization = Some(CustomizationInfo {
            status: Some(CustomizationStatus::Failed),
            error_msg: Some(String::new()),
        });
        customization_condition(&mut conditions, Some(&guest));
        let c = get_condition(&conditions, ConditionType::GuestCustomization).unwrap();
        assert_eq!(c.reason, "GuestCustomizationFailed");
        assert_eq!(c.message, CUSTOMIZATION_FAILED_MESSAGE);

        customization_condition(&mut conditions, None);
        let c = get_condition(&conditions, ConditionType::GuestCustomization).unwrap();
        assert_eq!(c.status, ConditionStatus::Unknown);
        assert_eq!(c.reason, "NoGuestInfo");

        guest.customization = None;
        customization_condition(&mut conditions, Some(&guest));
        let c = get_condition(&conditions, ConditionType::GuestCustomization).unwrap();
        assert_eq!(c.status, ConditionStatus::Unknown);
    }

    #[test]
    fn test_parse_bootstrap_condition() {
        assert_eq!(
            parse_bootstrap_condition("true"),
            (ConditionStatus::True, String::new(), String::new())
        );
        assert_eq!(
            parse_bootstrap_condition("false,CloudInitFailed,step a, step b"),
            (
                ConditionStatus::False,
                "CloudInitFailed".to_string(),
                "step a, step b".to_string()
            )
        );
        assert_eq!(parse_bootstrap_condition("maybe").0, ConditionStatus::Unknown);
    }

    #[test]
    fn test_bootstrap_condition_reasons() {
        let mut conditions = Vec::new();
        bootstrap_condition(&mut conditions, None);
        assert_eq!(
            get_condition(&conditions, ConditionType::GuestBootstrap).unwrap().reason,
            "NoConfigInfo"
        );

        let mut config = ConfigInfo::default();
        bootstrap_condition(&mut conditions, Some(&config));
        assert_eq!(
            get_condition(&conditions, ConditionType::GuestBootstrap).unwrap().reason,
            "NoExtraConfig"
        );

        config.extra_config.push(OptionValue::new("guestinfo.other", "x"));
        bootstrap_condition(&mut conditions, Some(&config));
        assert_eq!(
            get_condition(&conditions, ConditionType::GuestBootstrap).unwrap().reason,
            "NoBootstrapStatus"
        );

        config
            .extra_config
            .push(OptionValue::new(BOOTSTRAP_CONDITION_KEY, "false"));
        bootstrap_condition(&mut conditions, Some(&config));
        let c = get_condition(&conditions, ConditionType::GuestBootstrap).unwrap();
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.reason, "BootstrapFailed");
    }
}
