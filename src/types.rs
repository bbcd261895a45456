//! Type definitions shared by probes, the store and the orchestrator

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

// Re-export commonly used types
pub use crate::error::{AppError, Result};

/// Every diagnostic the toolkit can run; also the ResultStore key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProbeKind {
    NetworkInfo,
    PublicIp,
    DnsInfo,
    DnsLookup,
    DnsLeak,
    PortScan,
    SpeedTest,
    Geolocation,
    IpLookup,
    Devices,
    Ping,
}

impl ProbeKind {
    /// All probe kinds in display order
    pub const ALL: [ProbeKind; 11] = [
        ProbeKind::NetworkInfo,
        ProbeKind::PublicIp,
        ProbeKind::DnsInfo,
        ProbeKind::DnsLookup,
        ProbeKind::DnsLeak,
        ProbeKind::PortScan,
        ProbeKind::SpeedTest,
        ProbeKind::Geolocation,
        ProbeKind::IpLookup,
        ProbeKind::Devices,
        ProbeKind::Ping,
    ];

    /// Probes launched by a full scan
    pub const FULL_SCAN: [ProbeKind; 6] = [
        ProbeKind::NetworkInfo,
        ProbeKind::PublicIp,
        ProbeKind::DnsInfo,
        ProbeKind::SpeedTest,
        ProbeKind::Devices,
        ProbeKind::Geolocation,
    ];

    /// Stable machine-readable name
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::NetworkInfo => "network_info",
            ProbeKind::PublicIp => "public_ip",
            ProbeKind::DnsInfo => "dns_info",
            ProbeKind::DnsLookup => "dns_lookup",
            ProbeKind::DnsLeak => "dns_leak",
            ProbeKind::PortScan => "port_scan",
            ProbeKind::SpeedTest => "speed_test",
            ProbeKind::Geolocation => "geolocation",
            ProbeKind::IpLookup => "ip_lookup",
            ProbeKind::Devices => "devices",
            ProbeKind::Ping => "ping",
        }
    }

    /// Human-readable label for reports
    pub fn label(&self) -> &'static str {
        match self {
            ProbeKind::NetworkInfo => "Local network",
            ProbeKind::PublicIp => "Public IP",
            ProbeKind::DnsInfo => "DNS servers",
            ProbeKind::DnsLookup => "DNS lookup",
            ProbeKind::DnsLeak => "DNS leak test",
            ProbeKind::PortScan => "Port scan",
            ProbeKind::SpeedTest => "Speed test",
            ProbeKind::Geolocation => "Geolocation",
            ProbeKind::IpLookup => "IP lookup",
            ProbeKind::Devices => "LAN devices",
            ProbeKind::Ping => "Ping",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        ProbeKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| AppError::validation(format!("Unknown probe kind: {}", s)))
    }
}

/// Lifecycle of a stored probe result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl ProbeStatus {
    /// Whether this status ends a probe invocation
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProbeStatus::Success | ProbeStatus::Failed)
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProbeStatus::Pending => "pending",
            ProbeStatus::Running => "running",
            ProbeStatus::Success => "success",
            ProbeStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// DNS record types supported by lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    A,
    AAAA,
    MX,
    NS,
    TXT,
    CNAME,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
            RecordType::MX => "MX",
            RecordType::NS => "NS",
            RecordType::TXT => "TXT",
            RecordType::CNAME => "CNAME",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::AAAA),
            "MX" => Ok(RecordType::MX),
            "NS" => Ok(RecordType::NS),
            "TXT" => Ok(RecordType::TXT),
            "CNAME" => Ok(RecordType::CNAME),
            _ => Err(AppError::validation(format!(
                "Unsupported record type '{}' (expected A, AAAA, MX, NS, TXT or CNAME)",
                s
            ))),
        }
    }
}

/// Input handed to a probe invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProbeInput {
    /// Use configured defaults
    None,
    /// Host name or address to probe (port scan, ping)
    Target(String),
    /// Domain lookup request
    Domain { domain: String, record_type: RecordType },
    /// IP address to locate or look up
    Ip(IpAddr),
}

/// State machine of one full scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    Idle,
    Running { scan_id: String },
    AllDone,
    PartialFailure { failed: Vec<ProbeKind> },
}

impl ScanState {
    pub fn is_running(&self) -> bool {
        matches!(self, ScanState::Running { .. })
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanState::Idle => f.write_str("idle"),
            ScanState::Running { scan_id } => write!(f, "running ({})", scan_id),
            ScanState::AllDone => f.write_str("all done"),
            ScanState::PartialFailure { failed } => {
                let names: Vec<&str> = failed.iter().map(|k| k.as_str()).collect();
                write!(f, "partial failure ({})", names.join(", "))
            }
        }
    }
}

/// Device discovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryStrategy {
    /// Sweep the local /24 and read the ARP table
    Active,
    /// Fixed records, for tests and offline demos
    Simulated,
}

impl fmt::Display for DiscoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryStrategy::Active => f.write_str("active"),
            DiscoveryStrategy::Simulated => f.write_str("simulated"),
        }
    }
}

impl FromStr for DiscoveryStrategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" | "activescan" | "active_scan" => Ok(DiscoveryStrategy::Active),
            "simulated" | "simulate" => Ok(DiscoveryStrategy::Simulated),
            _ => Err(AppError::config(format!(
                "Invalid discovery strategy '{}' (expected 'active' or 'simulated')",
                s
            ))),
        }
    }
}

/// The single source of I/O timeouts for every probe
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutPolicy {
    /// Per-call HTTP JSON timeout
    pub http: Duration,
    /// Leak-test echo call timeout
    pub echo: Duration,
    /// TCP connect timeout for port scans
    pub connect: Duration,
    /// DNS resolution timeout
    pub dns: Duration,
    /// Whole system ping invocation
    pub ping: Duration,
    /// Connect timeout per host during the LAN sweep
    pub discovery_connect: Duration,
    /// Each speed-test transfer phase
    pub transfer: Duration,
    /// Post-success delay of the public IP chain
    pub api_delay: Duration,
    /// Number of public IP providers
    pub ip_provider_count: u32,
    /// Retry attempts for retried calls
    pub retry_attempts: u32,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        use crate::defaults::*;
        Self {
            http: DEFAULT_HTTP_TIMEOUT,
            echo: DEFAULT_ECHO_TIMEOUT,
            connect: DEFAULT_CONNECT_TIMEOUT,
            dns: DEFAULT_DNS_TIMEOUT,
            ping: Duration::from_secs(15),
            discovery_connect: DEFAULT_DISCOVERY_CONNECT_TIMEOUT,
            transfer: Duration::from_secs(15),
            api_delay: DEFAULT_API_DELAY,
            ip_provider_count: DEFAULT_IP_PROVIDERS.len() as u32,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }
}

impl TimeoutPolicy {
    /// Upper bound on the total time one retried call may take
    fn retried(&self, per_call: Duration) -> Duration {
        let attempts = self.retry_attempts.max(1);
        per_call * attempts + Duration::from_secs(2) * (attempts - 1)
    }

    /// Overall deadline after which the orchestrator aborts a probe
    pub fn deadline_for(&self, kind: ProbeKind) -> Duration {
        let slack = Duration::from_secs(5);
        match kind {
            ProbeKind::NetworkInfo => Duration::from_secs(10),
            ProbeKind::PublicIp => {
                self.http * self.ip_provider_count.max(1) + self.api_delay + slack
            }
            ProbeKind::DnsInfo => self.retried(self.dns) * 2 + slack,
            ProbeKind::DnsLookup => self.retried(self.dns) + slack,
            ProbeKind::DnsLeak => self.retried(self.echo) + slack,
            ProbeKind::PortScan => {
                self.connect * crate::defaults::DEFAULT_SCAN_PORTS.len() as u32 + slack
            }
            ProbeKind::SpeedTest => self.retried(self.http) + self.transfer * 2 + Duration::from_secs(30),
            ProbeKind::Geolocation => self.retried(self.http) + slack,
            ProbeKind::IpLookup => self.retried(self.http) + slack,
            ProbeKind::Devices => Duration::from_secs(90),
            ProbeKind::Ping => self.ping + slack,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_kind_round_trip_names() {
        for kind in ProbeKind::ALL {
            assert_eq!(kind.as_str().parse::<ProbeKind>().unwrap(), kind);
        }
        assert_eq!("dns-leak".parse::<ProbeKind>().unwrap(), ProbeKind::DnsLeak);
        assert!("bogus".parse::<ProbeKind>().is_err());
    }

    #[test]
    fn test_full_scan_excludes_manual_probes() {
        assert!(!ProbeKind::FULL_SCAN.contains(&ProbeKind::PortScan));
        assert!(!ProbeKind::FULL_SCAN.contains(&ProbeKind::DnsLookup));
        assert!(ProbeKind::FULL_SCAN.contains(&ProbeKind::Geolocation));
    }

    #[test]
    fn test_record_type_parsing() {
        assert_eq!("aaaa".parse::<RecordType>().unwrap(), RecordType::AAAA);
        assert_eq!(" MX ".parse::<RecordType>().unwrap(), RecordType::MX);
        assert!("SRV".parse::<RecordType>().is_err());
    }

    #[test]
    fn test_discovery_strategy_parsing() {
        assert_eq!("ACTIVE".parse::<DiscoveryStrategy>().unwrap(), DiscoveryStrategy::Active);
        assert_eq!("simulated".parse::<DiscoveryStrategy>().unwrap(), DiscoveryStrategy::Simulated);
        assert!("passive".parse::<DiscoveryStrategy>().is_err());
    }

    #[test]
    fn test_status_terminality() {
        assert!(ProbeStatus::Success.is_terminal());
        assert!(ProbeStatus::Failed.is_terminal());
        assert!(!ProbeStatus::Running.is_terminal());
        assert!(!ProbeStatus::Pending.is_terminal());
    }

    #[test]
    fn test_deadlines_cover_io_budgets() {
        let policy = TimeoutPolicy::default();
        assert!(policy.deadline_for(ProbeKind::PortScan) > Duration::from_secs(11));
        assert!(policy.deadline_for(ProbeKind::PublicIp) > policy.http * 3);
        assert!(policy.deadline_for(ProbeKind::DnsLookup) > policy.dns);
    }

    #[test]
    fn test_scan_state_display() {
        let state = ScanState::PartialFailure { failed: vec![ProbeKind::SpeedTest] };
        assert_eq!(state.to_string(), "partial failure (speed_test)");
        assert!(ScanState::Running { scan_id: "x".into() }.is_running());
    }
}
