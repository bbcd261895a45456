//! LAN device enumeration
//!
//! The active strategy sweeps `prefix.1`..`prefix.254` with short TCP
//! connects (a refused connect still proves the host is up, and every
//! attempt makes the OS resolve the neighbour's MAC), then merges the ARP
//! table, reverse DNS names and OUI vendors. The simulated strategy returns
//! four fixed records and exists for tests and offline demos.

use crate::dns::DnsBackend;
use crate::error::{AppError, ErrorContext, Result};
use crate::models::{DeviceRecord, DeviceReport, ProbePayload};
use crate::netinfo;
use crate::orchestrator::{Probe, ProbeContext};
use crate::portscan::{ConnectOutcome, TcpConnector, TokioConnector};
use crate::types::{DiscoveryStrategy, ProbeInput, ProbeKind};
use async_trait::async_trait;
use futures::StreamExt;
use mac_oui::Oui;
use regex::Regex;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, OnceLock};

const SWEEP_CONCURRENCY: usize = 64;
const NAME_CONCURRENCY: usize = 16;
const SWEEP_PORT: u16 = 443;

/// One complete neighbour entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: String,
}

/// Neighbour table of the host
#[async_trait]
pub trait ArpSource: Send + Sync {
    async fn entries(&self) -> Result<Vec<ArpEntry>>;
}

/// `/proc/net/arp` on Linux, `arp -a` elsewhere
pub struct SystemArpTable;

#[async_trait]
impl ArpSource for SystemArpTable {
    async fn entries(&self) -> Result<Vec<ArpEntry>> {
        if cfg!(target_os = "linux") {
            if let Ok(text) = tokio::fs::read_to_string("/proc/net/arp").await {
                return Ok(parse_proc_arp(&text));
            }
        }
        let output = tokio::process::Command::new("arp")
            .arg("-a")
            .output()
            .await
            .context("Cannot run arp")?;
        Ok(parse_arp_a(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Lowercase, colon separated, zero padded; `None` for malformed, zero or broadcast addresses
pub fn normalize_mac(raw: &str) -> Option<String> {
    let parts: Vec<&str> = raw.trim().split([':', '-']).collect();
    if parts.len() != 6 {
        return None;
    }
    let mut bytes = [0u8; 6];
    for (slot, part) in bytes.iter_mut().zip(&parts) {
        if part.is_empty() || part.len() > 2 {
            return None;
        }
        *slot = u8::from_str_radix(part, 16).ok()?;
    }
    if bytes.iter().all(|b| *b == 0) || bytes.iter().all(|b| *b == 0xff) {
        return None;
    }
    Some(
        bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

/// Parse the Linux `/proc/net/arp` table, skipping incomplete entries
pub fn parse_proc_arp(text: &str) -> Vec<ArpEntry> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < 4 || columns[2] == "0x0" {
                return None;
            }
            Some(ArpEntry {
                ip: columns[0].parse().ok()?,
                mac: normalize_mac(columns[3])?,
            })
        })
        .collect()
}

fn unix_arp_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((\d{1,3}(?:\.\d{1,3}){3})\) at ([0-9A-Fa-f]{1,2}(?::[0-9A-Fa-f]{1,2}){5})").ok())
        .as_ref()
}

fn windows_arp_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d{1,3}(?:\.\d{1,3}){3})\s+([0-9A-Fa-f]{2}(?:-[0-9A-Fa-f]{2}){5})\s").ok())
        .as_ref()
}

/// Parse `arp -a` output in the BSD/macOS and Windows layouts
pub fn parse_arp_a(text: &str) -> Vec<ArpEntry> {
    let patterns: Vec<&Regex> = [unix_arp_regex(), windows_arp_regex()].into_iter().flatten().collect();
    text.lines()
        .filter_map(|line| {
            let captures = patterns.iter().find_map(|re| re.captures(line))?;
            Some(ArpEntry {
                ip: captures[1].parse().ok()?,
                mac: normalize_mac(&captures[2])?,
            })
        })
        .collect()
}

fn oui_db() -> Option<&'static Oui> {
    static OUI_DB: OnceLock<Option<Oui>> = OnceLock::new();
    OUI_DB.get_or_init(|| Oui::default().ok()).as_ref()
}

/// Vendor registered for the MAC's OUI prefix
pub fn lookup_vendor(mac: &str) -> Option<String> {
    match oui_db()?.lookup_by_mac(mac) {
        Ok(Some(entry)) => Some(entry.company_name.clone()),
        _ => None,
    }
}

/// First three octets of a /24, from `a.b.c`, `a.b.c.` or `a.b.c.0/24`
pub fn parse_prefix(prefix: &str) -> Result<[u8; 3]> {
    let invalid = || AppError::validation(format!("Invalid subnet prefix '{}'", prefix));
    let mut text = prefix.trim();
    text = text.strip_suffix("/24").unwrap_or(text);
    text = text.strip_suffix('.').unwrap_or(text);
    let mut octets: Vec<&str> = text.split('.').collect();
    if octets.len() == 4 && octets[3] == "0" {
        octets.pop();
    }
    if octets.len() != 3 {
        return Err(invalid());
    }
    let mut out = [0u8; 3];
    for (slot, octet) in out.iter_mut().zip(octets) {
        *slot = octet.parse().map_err(|_| invalid())?;
    }
    Ok(out)
}

fn prefix_string(octets: [u8; 3]) -> String {
    format!("{}.{}.{}", octets[0], octets[1], octets[2])
}

fn in_prefix(ip: Ipv4Addr, octets: [u8; 3]) -> bool {
    ip.octets()[..3] == octets
}

/// Strategy for turning a subnet prefix into device records
#[async_trait]
pub trait DeviceEnumerator: Send + Sync {
    fn strategy(&self) -> DiscoveryStrategy;

    async fn enumerate(&self, ctx: &ProbeContext, subnet_prefix: &str) -> Result<Vec<DeviceRecord>>;
}

/// Four fixed records on the given prefix
pub struct SimulatedEnumerator;

#[async_trait]
impl DeviceEnumerator for SimulatedEnumerator {
    fn strategy(&self) -> DiscoveryStrategy {
        DiscoveryStrategy::Simulated
    }

    async fn enumerate(&self, _ctx: &ProbeContext, subnet_prefix: &str) -> Result<Vec<DeviceRecord>> {
        let octets = parse_prefix(subnet_prefix)?;
        let fixed = [
            (1, "00:11:22:33:44:55", "router", "Cisco Systems"),
            (100, "aa:bb:cc:dd:ee:ff", "my-pc", "Apple"),
            (101, "11:22:33:44:55:66", "phone", "Samsung"),
            (102, "22:33:44:55:66:77", "tablet", "Apple"),
        ];
        Ok(fixed
            .iter()
            .map(|(host, mac, name, vendor)| DeviceRecord {
                ip: IpAddr::V4(Ipv4Addr::new(octets[0], octets[1], octets[2], *host)),
                mac_address: Some(mac.to_string()),
                hostname: Some(name.to_string()),
                vendor: Some(vendor.to_string()),
            })
            .collect())
    }
}

/// Real sweep plus ARP, reverse DNS and OUI enrichment
pub struct ActiveScanEnumerator {
    connector: Arc<dyn TcpConnector>,
    arp: Arc<dyn ArpSource>,
    dns: Arc<dyn DnsBackend>,
    include_local_host: bool,
}

impl ActiveScanEnumerator {
    pub fn new(dns: Arc<dyn DnsBackend>) -> Self {
        Self {
            connector: Arc::new(TokioConnector),
            arp: Arc::new(SystemArpTable),
            dns,
            include_local_host: true,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn TcpConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_arp_source(mut self, arp: Arc<dyn ArpSource>) -> Self {
        self.arp = arp;
        self
    }

    pub fn include_local_host(mut self, include: bool) -> Self {
        self.include_local_host = include;
        self
    }

    async fn sweep(&self, ctx: &ProbeContext, octets: [u8; 3]) -> Vec<Ipv4Addr> {
        let connector = &self.connector;
        let timeout = ctx.policy.discovery_connect;
        futures::stream::iter(1..=254u8)
            .map(|host| async move {
                let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], host);
                match connector.connect(IpAddr::V4(ip), SWEEP_PORT, timeout).await {
                    ConnectOutcome::Connected | ConnectOutcome::Refused => Some(ip),
                    ConnectOutcome::TimedOut | ConnectOutcome::Unreachable => None,
                }
            })
            .buffer_unordered(SWEEP_CONCURRENCY)
            .filter_map(|ip| async move { ip })
            .collect()
            .await
    }

    async fn enrich(&self, mut device: DeviceRecord) -> DeviceRecord {
        device.hostname = self.dns.reverse(device.ip).await.ok().flatten();
        device.vendor = device.mac_address.as_deref().and_then(lookup_vendor);
        device
    }
}

#[async_trait]
impl DeviceEnumerator for ActiveScanEnumerator {
    fn strategy(&self) -> DiscoveryStrategy {
        DiscoveryStrategy::Active
    }

    async fn enumerate(&self, ctx: &ProbeContext, subnet_prefix: &str) -> Result<Vec<DeviceRecord>> {
        let octets = parse_prefix(subnet_prefix)?;
        ctx.checkpoint()?;

        ctx.progress("sweeping subnet");
        let alive = ctx.guarded(async { Ok(self.sweep(ctx, octets).await) }).await?;

        ctx.progress("reading neighbour table");
        let arp = match self.arp.entries().await {
            Ok(entries) => entries,
            Err(error) => {
                ctx.logger
                    .warn(&format!("Neighbour table unavailable: {}", error))
                    .correlation_id(&ctx.correlation_id)
                    .log()
                    .await;
                Vec::new()
            }
        };

        // keyed by last octet so records come out in address order
        let mut found: BTreeMap<u8, DeviceRecord> = BTreeMap::new();
        let blank = |ip: Ipv4Addr| DeviceRecord {
            ip: IpAddr::V4(ip),
            mac_address: None,
            hostname: None,
            vendor: None,
        };
        for ip in alive {
            found.entry(ip.octets()[3]).or_insert_with(|| blank(ip));
        }
        for entry in arp.into_iter().filter(|e| in_prefix(e.ip, octets)) {
            found.entry(entry.ip.octets()[3]).or_insert_with(|| blank(entry.ip)).mac_address = Some(entry.mac);
        }
        if self.include_local_host {
            let interfaces = netinfo::interfaces();
            if let Some((ip, interface)) = netinfo::primary_ipv4(&interfaces) {
                if in_prefix(ip, octets) {
                    let record = found.entry(ip.octets()[3]).or_insert_with(|| blank(ip));
                    if record.mac_address.is_none() {
                        record.mac_address = interface.mac_address.as_deref().and_then(normalize_mac);
                    }
                }
            }
        }
        ctx.checkpoint()?;

        ctx.progress("resolving names");
        // the vendor table is parsed on first use
        let _ = tokio::task::spawn_blocking(|| oui_db().is_some()).await;
        let devices = ctx
            .guarded(async {
                Ok(futures::stream::iter(found.into_values())
                    .map(|device| self.enrich(device))
                    .buffered(NAME_CONCURRENCY)
                    .collect::<Vec<_>>()
                    .await)
            })
            .await?;

        Ok(devices)
    }
}

pub struct DeviceDiscoveryProbe {
    enumerator: Arc<dyn DeviceEnumerator>,
}

impl DeviceDiscoveryProbe {
    pub fn new(enumerator: Arc<dyn DeviceEnumerator>) -> Self {
        Self { enumerator }
    }

    pub fn from_strategy(strategy: DiscoveryStrategy, dns: Arc<dyn DnsBackend>) -> Self {
        match strategy {
            DiscoveryStrategy::Active => Self::new(Arc::new(ActiveScanEnumerator::new(dns))),
            DiscoveryStrategy::Simulated => Self::new(Arc::new(SimulatedEnumerator)),
        }
    }

    fn local_prefix() -> Result<String> {
        let interfaces = netinfo::interfaces();
        let (ip, _) = netinfo::primary_ipv4(&interfaces)
            .ok_or_else(|| AppError::unavailable("No IPv4 interface to derive the subnet from"))?;
        let o = ip.octets();
        Ok(prefix_string([o[0], o[1], o[2]]))
    }
}

#[async_trait]
impl Probe for DeviceDiscoveryProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Devices
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<ProbePayload> {
        let subnet_prefix = match &ctx.input {
            ProbeInput::Target(prefix) => prefix_string(parse_prefix(prefix)?),
            ProbeInput::Ip(IpAddr::V4(ip)) => {
                let o = ip.octets();
                prefix_string([o[0], o[1], o[2]])
            }
            ProbeInput::None => Self::local_prefix()?,
            other => return Err(AppError::validation(format!("Device discovery needs an IPv4 subnet, got {:?}", other))),
        };

        let devices = self.enumerator.enumerate(ctx, &subnet_prefix).await?;
        Ok(ProbePayload::Devices(DeviceReport {
            subnet_prefix,
            strategy: self.enumerator.strategy(),
            devices,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordType;
    use proptest::prelude::*;
    use std::time::Duration;

    struct FakeConnector {
        alive: Vec<u8>,
    }

    #[async_trait]
    impl TcpConnector for FakeConnector {
        async fn connect(&self, host: IpAddr, _port: u16, _timeout: Duration) -> ConnectOutcome {
            match host {
                IpAddr::V4(ip) if self.alive.contains(&ip.octets()[3]) => ConnectOutcome::Refused,
                _ => ConnectOutcome::TimedOut,
            }
        }
    }

    struct FakeArp(Vec<ArpEntry>);

    #[async_trait]
    impl ArpSource for FakeArp {
        async fn entries(&self) -> Result<Vec<ArpEntry>> {
            Ok(self.0.clone())
        }
    }

    struct FakeDns;

    #[async_trait]
    impl DnsBackend for FakeDns {
        async fn resolve(&self, _domain: &str, _record_type: RecordType) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn reverse(&self, ip: IpAddr) -> Result<Option<String>> {
            Ok(match ip.to_string().as_str() {
                "192.0.2.1" => Some("gateway.lan".to_string()),
                _ => None,
            })
        }

        fn nameservers(&self) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn test_normalize_mac_forms() {
        assert_eq!(normalize_mac("AA-BB-CC-DD-EE-FF").as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(normalize_mac("0:1b:2:c:d:e").as_deref(), Some("00:1b:02:0c:0d:0e"));
        assert_eq!(normalize_mac("00:00:00:00:00:00"), None);
        assert_eq!(normalize_mac("ff:ff:ff:ff:ff:ff"), None);
        assert_eq!(normalize_mac("(incomplete)"), None);
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee"), None);
    }

    #[test]
    fn test_parse_proc_arp() {
        let table = "IP address       HW type     Flags       HW address            Mask     Device\n\
                     192.168.1.1      0x1         0x2         a4:91:b1:00:00:01     *        eth0\n\
                     192.168.1.50     0x1         0x0         00:00:00:00:00:00     *        eth0\n\
                     192.168.1.77     0x1         0x2         3c:22:fb:00:00:02     *        eth0\n";
        let entries = parse_proc_arp(table);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].ip, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(entries[1].mac, "3c:22:fb:00:00:02");
    }

    #[test]
    fn test_parse_arp_a_layouts() {
        let bsd = "? (192.168.1.1) at a4:91:b1:0:0:1 on en0 ifscope [ethernet]\n\
                   ? (192.168.1.9) at (incomplete) on en0 ifscope [ethernet]\n";
        let entries = parse_arp_a(bsd);
        assert_eq!(entries, vec![ArpEntry { ip: Ipv4Addr::new(192, 168, 1, 1), mac: "a4:91:b1:00:00:01".to_string() }]);

        let windows = "Interface: 192.168.1.20 --- 0x3\n  Internet Address      Physical Address      Type\n  192.168.1.1           a4-91-b1-00-00-01     dynamic\n  192.168.1.255         ff-ff-ff-ff-ff-ff     static\n";
        let entries = parse_arp_a(windows);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mac, "a4:91:b1:00:00:01");
    }

    #[test]
    fn test_parse_prefix_forms() {
        assert_eq!(parse_prefix("192.168.1").unwrap(), [192, 168, 1]);
        assert_eq!(parse_prefix("192.168.1.").unwrap(), [192, 168, 1]);
        assert_eq!(parse_prefix("10.0.7.0/24").unwrap(), [10, 0, 7]);
        assert_eq!(parse_prefix("10.0.0").unwrap(), [10, 0, 0]);
        assert!(parse_prefix("192.168").is_err());
        assert!(parse_prefix("192.168.300").is_err());
    }

    #[tokio::test]
    async fn test_simulated_records_follow_prefix() {
        let probe = DeviceDiscoveryProbe::new(Arc::new(SimulatedEnumerator));
        let ctx = ProbeContext::new(ProbeKind::Devices, ProbeInput::Target("10.1.2".to_string()));
        match probe.run(&ctx).await.unwrap() {
            ProbePayload::Devices(report) => {
                assert_eq!(report.strategy, DiscoveryStrategy::Simulated);
                assert_eq!(report.devices.len(), 4);
                assert_eq!(report.devices[0].ip, "10.1.2.1".parse::<IpAddr>().unwrap());
                assert_eq!(report.devices[0].vendor.as_deref(), Some("Cisco Systems"));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_active_scan_merges_sweep_and_arp() {
        let enumerator = ActiveScanEnumerator::new(Arc::new(FakeDns))
            .with_connector(Arc::new(FakeConnector { alive: vec![1, 20] }))
            .with_arp_source(Arc::new(FakeArp(vec![
                ArpEntry { ip: Ipv4Addr::new(192, 0, 2, 1), mac: "00:11:22:33:44:55".to_string() },
                ArpEntry { ip: Ipv4Addr::new(192, 0, 2, 9), mac: "00:11:22:33:44:66".to_string() },
                ArpEntry { ip: Ipv4Addr::new(198, 51, 100, 3), mac: "00:11:22:33:44:77".to_string() },
            ])))
            .include_local_host(false);
        let probe = DeviceDiscoveryProbe::new(Arc::new(enumerator));
        let ctx = ProbeContext::new(ProbeKind::Devices, ProbeInput::Target("192.0.2".to_string()));

        match probe.run(&ctx).await.unwrap() {
            ProbePayload::Devices(report) => {
                let ips: Vec<String> = report.devices.iter().map(|d| d.ip.to_string()).collect();
                assert_eq!(ips, vec!["192.0.2.1", "192.0.2.9", "192.0.2.20"]);
                assert_eq!(report.devices[0].hostname.as_deref(), Some("gateway.lan"));
                assert_eq!(report.devices[0].mac_address.as_deref(), Some("00:11:22:33:44:55"));
                assert!(report.devices[2].mac_address.is_none());
                assert_eq!(report.strategy, DiscoveryStrategy::Active);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_prefix_is_rejected() {
        let probe = DeviceDiscoveryProbe::new(Arc::new(SimulatedEnumerator));
        let ctx = ProbeContext::new(ProbeKind::Devices, ProbeInput::Target("nonsense".to_string()));
        assert!(probe.run(&ctx).await.is_err());
    }

    proptest! {
        #[test]
        fn prop_normalize_mac_is_idempotent(bytes in proptest::array::uniform6(1u8..=254)) {
            let raw = bytes.iter().map(|b| format!("{:X}", b)).collect::<Vec<_>>().join("-");
            let normalized = normalize_mac(&raw).unwrap();
            prop_assert_eq!(normalize_mac(&normalized), Some(normalized.clone()));
            prop_assert_eq!(normalized.len(), 17);
        }

        #[test]
        fn prop_proc_arp_line_roundtrip(last in 1u8..=254, bytes in proptest::array::uniform6(1u8..=254)) {
            let mac = bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(":");
            let table = format!("header\n10.0.0.{} 0x1 0x2 {} * eth0\n", last, mac);
            let entries = parse_proc_arp(&table);
            prop_assert_eq!(entries.len(), 1);
            prop_assert_eq!(&entries[0].mac, &mac);
        }
    }
}
