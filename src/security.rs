//! Read-only security summary over a store snapshot

use crate::models::{PortStatus, ProbePayload};
use crate::store::StoreSnapshot;
use crate::types::ProbeKind;
use serde::Serialize;

/// Services that should not be reachable on a workstation
pub const RISKY_PORTS: [u16; 4] = [21, 23, 3306, 3389];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecuritySummary {
    pub connection_type: Option<String>,
    pub local_ip: Option<String>,
    pub mac_address: Option<String>,
    pub dns_servers: Vec<String>,
    /// `None` until a port scan has succeeded
    pub scanned_target: Option<String>,
    pub open_ports: Vec<PortStatus>,
    pub risky_ports: Vec<PortStatus>,
    /// `None` until a leak test has succeeded
    pub dns_consistent: Option<bool>,
    pub findings: Vec<String>,
}

impl SecuritySummary {
    pub fn from_snapshot(snapshot: &StoreSnapshot) -> Self {
        let payload = |kind| {
            snapshot
                .get(kind)
                .filter(|result| result.is_success())
                .and_then(|result| result.payload.as_ref())
        };

        let mut summary = SecuritySummary {
            connection_type: None,
            local_ip: None,
            mac_address: None,
            dns_servers: Vec::new(),
            scanned_target: None,
            open_ports: Vec::new(),
            risky_ports: Vec::new(),
            dns_consistent: None,
            findings: Vec::new(),
        };

        if let Some(ProbePayload::NetworkInfo(info)) = payload(ProbeKind::NetworkInfo) {
            summary.connection_type = Some(info.connection_type.clone());
            summary.local_ip = info.local_ip.map(|ip| ip.to_string());
            summary.mac_address = info.mac_address.clone();
        }
        if let Some(ProbePayload::DnsInfo(info)) = payload(ProbeKind::DnsInfo) {
            summary.dns_servers = info.nameservers.clone();
        }
        if let Some(ProbePayload::PortScan(report)) = payload(ProbeKind::PortScan) {
            summary.scanned_target = Some(report.target.clone());
            summary.open_ports = report.open_ports().cloned().collect();
            summary.risky_ports = report
                .open_ports()
                .filter(|p| RISKY_PORTS.contains(&p.port))
                .cloned()
                .collect();
        }
        if let Some(ProbePayload::DnsLeak(report)) = payload(ProbeKind::DnsLeak) {
            summary.dns_consistent = Some(report.consistent);
        }

        summary.findings = summary.derive_findings();
        summary
    }

    fn derive_findings(&self) -> Vec<String> {
        let mut findings = Vec::new();
        for port in &self.risky_ports {
            findings.push(format!("Port {} ({}) is open; close it unless the service is required", port.port, port.service));
        }
        if self.dns_consistent == Some(false) {
            findings.push("Echo endpoints reported different addresses; DNS or traffic may be leaking".to_string());
        }
        if self.scanned_target.is_none() {
            findings.push("No port scan results yet".to_string());
        }
        if self.dns_consistent.is_none() {
            findings.push("No DNS leak test results yet".to_string());
        }
        if findings.is_empty() {
            findings.push("No critical issues detected".to_string());
        }
        findings
    }

    pub fn is_clean(&self) -> bool {
        self.risky_ports.is_empty() && self.dns_consistent != Some(false)
    }
}
