//! Local host and interface facts; no network I/O

use crate::error::{AppError, Result};
use crate::models::{InterfaceInfo, NetworkInfo, ProbePayload};
use crate::orchestrator::{Probe, ProbeContext};
use crate::types::ProbeKind;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};

pub const WIRELESS: &str = "Wi-Fi";
pub const WIRED: &str = "Ethernet";
pub const UNKNOWN: &str = "Unknown";

/// Name-pattern guess at the connection type
///
/// Interface naming is platform and locale dependent (macOS calls Wi-Fi
/// `en0`, for one), so this is a heuristic and reports what the names say.
pub fn classify_connection<'a, I>(names: I) -> &'static str
where
    I: IntoIterator<Item = &'a str>,
{
    let names: Vec<String> = names.into_iter().map(|n| n.to_ascii_lowercase()).collect();
    let wireless = |n: &str| {
        n.starts_with("wl") || n.starts_with("wifi") || n.contains("wi-fi") || n.contains("wireless") || n.contains("airport")
    };
    let wired = |n: &str| {
        n.starts_with("eth") || n.starts_with("en") || n.starts_with("em") || n.contains("ethernet")
    };

    if names.iter().any(|n| wireless(n)) {
        WIRELESS
    } else if names.iter().any(|n| wired(n)) {
        WIRED
    } else {
        UNKNOWN
    }
}

fn is_usable(interface: &InterfaceInfo) -> bool {
    interface.is_up && !interface.is_loopback && !interface.ips.is_empty()
}

/// Primary IPv4 address: first usable interface with one, in enumeration order
pub fn primary_ipv4(interfaces: &[InterfaceInfo]) -> Option<(Ipv4Addr, &InterfaceInfo)> {
    interfaces.iter().filter(|i| is_usable(i)).find_map(|interface| {
        interface.ips.iter().find_map(|ip| match ip {
            IpAddr::V4(v4) if !v4.is_link_local() => Some((*v4, interface)),
            _ => None,
        })
    })
}

/// Assemble the report from raw interface data
pub fn summarize(hostname: String, interfaces: Vec<InterfaceInfo>) -> NetworkInfo {
    let primary = primary_ipv4(&interfaces);
    let local_ip = primary.map(|(ip, _)| IpAddr::V4(ip)).or_else(|| {
        interfaces
            .iter()
            .filter(|i| is_usable(i))
            .find_map(|i| i.ips.first().copied())
    });
    let mac_address = primary
        .and_then(|(_, interface)| interface.mac_address.clone())
        .or_else(|| {
            interfaces
                .iter()
                .filter(|i| !i.is_loopback)
                .find_map(|i| i.mac_address.clone())
        });

    let connection_type = classify_connection(
        interfaces
            .iter()
            .filter(|i| is_usable(i))
            .map(|i| i.name.as_str()),
    )
    .to_string();
    let link_speed_mbps = interfaces
        .iter()
        .map(|i| i.speed_mbps)
        .find(|speed| *speed > 0)
        .unwrap_or(0);

    NetworkInfo {
        hostname,
        local_ip,
        mac_address,
        interfaces,
        connection_type,
        link_speed_mbps,
    }
}

/// Link speed reported by the OS in Mbit/s, 0 when unknown
fn link_speed(name: &str) -> u64 {
    if cfg!(target_os = "linux") {
        std::fs::read_to_string(format!("/sys/class/net/{}/speed", name))
            .ok()
            .and_then(|text| text.trim().parse::<i64>().ok())
            .filter(|speed| *speed > 0)
            .map(|speed| speed as u64)
            .unwrap_or(0)
    } else {
        0
    }
}

/// Enumerate interfaces through pnet
pub fn interfaces() -> Vec<InterfaceInfo> {
    pnet::datalink::interfaces()
        .into_iter()
        .map(|iface| {
            let mac_address = iface
                .mac
                .filter(|mac| !mac.is_zero())
                .map(|mac| mac.to_string());
            InterfaceInfo {
                speed_mbps: link_speed(&iface.name),
                is_up: iface.is_up(),
                is_loopback: iface.is_loopback(),
                ips: iface.ips.iter().map(|network| network.ip()).collect(),
                mac_address,
                name: iface.name,
            }
        })
        .collect()
}

pub fn hostname() -> Result<String> {
    sys_info::hostname().map_err(|e| AppError::io(format!("Cannot read hostname: {}", e)))
}

/// Gather the report; only OS API errors fail it
pub fn collect() -> Result<NetworkInfo> {
    let hostname = hostname()?;
    Ok(summarize(hostname, interfaces()))
}

pub struct NetworkInfoProbe;

impl NetworkInfoProbe {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NetworkInfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for NetworkInfoProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::NetworkInfo
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<ProbePayload> {
        ctx.checkpoint()?;
        let info = tokio::task::spawn_blocking(collect)
            .await
            .map_err(|e| AppError::internal(format!("Interface enumeration aborted: {}", e)))??;
        Ok(ProbePayload::NetworkInfo(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProbeInput;

    fn iface(name: &str, ip: &str, up: bool, loopback: bool, speed: u64) -> InterfaceInfo {
        InterfaceInfo {
            name: name.to_string(),
            ips: vec![ip.parse().unwrap()],
            mac_address: if loopback { None } else { Some(format!("02:00:00:00:00:{:02x}", speed % 256)) },
            is_up: up,
            is_loopback: loopback,
            speed_mbps: speed,
        }
    }

    #[test]
    fn test_classify_prefers_wireless() {
        assert_eq!(classify_connection(["eth0", "wlan0"]), WIRELESS);
        assert_eq!(classify_connection(["Wi-Fi"]), WIRELESS);
        assert_eq!(classify_connection(["enp3s0"]), WIRED);
        assert_eq!(classify_connection(["Ethernet 2"]), WIRED);
        assert_eq!(classify_connection(["tun0", "docker0"]), UNKNOWN);
        assert_eq!(classify_connection(Vec::<&str>::new()), UNKNOWN);
    }

    #[test]
    fn test_summarize_picks_primary_interface() {
        let info = summarize(
            "host".to_string(),
            vec![
                iface("lo", "127.0.0.1", true, true, 0),
                iface("docker0", "172.17.0.1", false, false, 0),
                iface("eth0", "192.168.1.20", true, false, 1000),
                iface("wlan0", "192.168.1.21", true, false, 300),
            ],
        );
        assert_eq!(info.local_ip, Some("192.168.1.20".parse().unwrap()));
        assert_eq!(info.mac_address.as_deref(), Some("02:00:00:00:00:e8"));
        assert_eq!(info.connection_type, WIRELESS);
        assert_eq!(info.link_speed_mbps, 1000);
        assert_eq!(info.interfaces.len(), 4);
    }

    #[test]
    fn test_summarize_without_usable_interfaces() {
        let info = summarize("host".to_string(), vec![iface("lo", "127.0.0.1", true, true, 0)]);
        assert_eq!(info.local_ip, None);
        assert_eq!(info.connection_type, UNKNOWN);
        assert_eq!(info.link_speed_mbps, 0);
    }

    #[test]
    fn test_link_speed_uses_enumeration_order() {
        let info = summarize(
            "host".to_string(),
            vec![
                iface("eth1", "10.0.0.2", true, false, 0),
                iface("eth2", "10.0.0.3", true, false, 100),
                iface("eth3", "10.0.0.4", true, false, 10000),
            ],
        );
        assert_eq!(info.link_speed_mbps, 100);
    }

    #[tokio::test]
    async fn test_probe_reports_hostname() {
        let ctx = ProbeContext::new(ProbeKind::NetworkInfo, ProbeInput::None);
        match NetworkInfoProbe::new().run(&ctx).await.unwrap() {
            ProbePayload::NetworkInfo(info) => assert!(!info.hostname.is_empty()),
            other => panic!("unexpected payload: {:?}", other),
        }
    }
}
