//! Probe results and the typed payload of every probe kind

use crate::error::{AppError, ErrorClass, Result};
use crate::types::{DiscoveryStrategy, ProbeKind, ProbeStatus, RecordType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

/// Structured failure stored with a `Failed` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeError {
    pub class: ErrorClass,
    pub message: String,
}

impl From<&AppError> for ProbeError {
    fn from(error: &AppError) -> Self {
        Self {
            class: error.class(),
            message: error.to_string(),
        }
    }
}

/// Latest outcome of one probe kind
///
/// A stored result is always replaced as a whole. `payload` is only set on
/// `Success`, `error` only on `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub kind: ProbeKind,
    pub status: ProbeStatus,
    pub timestamp: DateTime<Utc>,
    pub payload: Option<ProbePayload>,
    pub error: Option<ProbeError>,
    /// Store version assigned when the result was written
    #[serde(default)]
    pub version: u64,
}

impl ProbeResult {
    fn bare(kind: ProbeKind, status: ProbeStatus) -> Self {
        Self {
            kind,
            status,
            timestamp: Utc::now(),
            payload: None,
            error: None,
            version: 0,
        }
    }

    pub fn pending(kind: ProbeKind) -> Self {
        Self::bare(kind, ProbeStatus::Pending)
    }

    pub fn running(kind: ProbeKind) -> Self {
        Self::bare(kind, ProbeStatus::Running)
    }

    /// Successful result; the payload determines the kind
    pub fn success(payload: ProbePayload) -> Self {
        Self {
            payload: Some(payload.clone()),
            ..Self::bare(payload.kind(), ProbeStatus::Success)
        }
    }

    pub fn failed(kind: ProbeKind, error: &AppError) -> Self {
        Self {
            error: Some(ProbeError::from(error)),
            ..Self::bare(kind, ProbeStatus::Failed)
        }
    }

    pub fn failed_with<S: Into<String>>(kind: ProbeKind, class: ErrorClass, message: S) -> Self {
        Self {
            error: Some(ProbeError {
                class,
                message: message.into(),
            }),
            ..Self::bare(kind, ProbeStatus::Failed)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ProbeStatus::Success
    }

    /// Check the payload/status pairing
    pub fn validate(&self) -> Result<()> {
        if let Some(payload) = &self.payload {
            if payload.kind() != self.kind {
                return Err(AppError::validation(format!(
                    "Payload of kind {} stored under {}",
                    payload.kind(),
                    self.kind
                )));
            }
        }
        match self.status {
            ProbeStatus::Success if self.payload.is_none() => Err(AppError::validation(format!(
                "Successful {} result without payload",
                self.kind
            ))),
            ProbeStatus::Failed if self.error.is_none() => Err(AppError::validation(format!(
                "Failed {} result without error",
                self.kind
            ))),
            ProbeStatus::Pending | ProbeStatus::Running if self.payload.is_some() => {
                Err(AppError::validation(format!(
                    "{} result is {} but carries a payload",
                    self.kind, self.status
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Typed payload, one variant per probe kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProbePayload {
    NetworkInfo(NetworkInfo),
    PublicIp(PublicIpInfo),
    DnsInfo(DnsInfo),
    DnsLookup(DnsRecordSet),
    DnsLeak(DnsLeakReport),
    PortScan(PortScanReport),
    SpeedTest(SpeedTestReport),
    Geolocation(GeolocationReport),
    IpLookup(IpLookupReport),
    Devices(DeviceReport),
    Ping(PingReport),
}

impl ProbePayload {
    pub fn kind(&self) -> ProbeKind {
        match self {
            ProbePayload::NetworkInfo(_) => ProbeKind::NetworkInfo,
            ProbePayload::PublicIp(_) => ProbeKind::PublicIp,
            ProbePayload::DnsInfo(_) => ProbeKind::DnsInfo,
            ProbePayload::DnsLookup(_) => ProbeKind::DnsLookup,
            ProbePayload::DnsLeak(_) => ProbeKind::DnsLeak,
            ProbePayload::PortScan(_) => ProbeKind::PortScan,
            ProbePayload::SpeedTest(_) => ProbeKind::SpeedTest,
            ProbePayload::Geolocation(_) => ProbeKind::Geolocation,
            ProbePayload::IpLookup(_) => ProbeKind::IpLookup,
            ProbePayload::Devices(_) => ProbeKind::Devices,
            ProbePayload::Ping(_) => ProbeKind::Ping,
        }
    }
}

/// One local network interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub ips: Vec<IpAddr>,
    pub mac_address: Option<String>,
    pub is_up: bool,
    pub is_loopback: bool,
    /// Link speed in Mbit/s, 0 when unknown
    pub speed_mbps: u64,
}

/// Local host and interface facts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub hostname: String,
    pub local_ip: Option<IpAddr>,
    pub mac_address: Option<String>,
    pub interfaces: Vec<InterfaceInfo>,
    /// Name-pattern heuristic: "Wi-Fi", "Ethernet" or "Unknown"
    pub connection_type: String,
    /// First nonzero interface speed in enumeration order, else 0
    pub link_speed_mbps: u64,
}

/// Provider response schema for IP information
///
/// Every field is optional; providers differ in which ones they send.
/// Unknown fields are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpInfo {
    #[serde(default, alias = "query")]
    pub ip: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub country_name: Option<String>,
    #[serde(default)]
    pub cc: Option<String>,
    /// `"lat,lon"`
    #[serde(default)]
    pub loc: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub postal: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl IpInfo {
    /// Country as a display name when the provider sends one
    pub fn country_display(&self) -> Option<&str> {
        self.country_name
            .as_deref()
            .or(self.country.as_deref())
            .or(self.cc.as_deref())
    }

    /// Coordinates from `loc`, falling back to numeric latitude/longitude
    pub fn coordinates(&self) -> Result<(f64, f64)> {
        if let Some(loc) = &self.loc {
            return parse_loc(loc);
        }
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => check_coordinates(lat, lon),
            _ => Err(AppError::parse("Provider response has no coordinates")),
        }
    }
}

/// Parse a `"lat,lon"` pair into validated coordinates
pub fn parse_loc(loc: &str) -> Result<(f64, f64)> {
    let mut parts = loc.split(',');
    let (lat, lon) = match (parts.next(), parts.next(), parts.next()) {
        (Some(lat), Some(lon), None) => (lat.trim(), lon.trim()),
        _ => return Err(AppError::parse(format!("Invalid loc value '{}'", loc))),
    };
    let lat: f64 = lat
        .parse()
        .map_err(|_| AppError::parse(format!("Invalid latitude in loc '{}'", loc)))?;
    let lon: f64 = lon
        .parse()
        .map_err(|_| AppError::parse(format!("Invalid longitude in loc '{}'", loc)))?;
    check_coordinates(lat, lon)
}

fn check_coordinates(lat: f64, lon: f64) -> Result<(f64, f64)> {
    if !lat.is_finite() || !lon.is_finite() || !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(AppError::parse(format!("Coordinates out of range: {},{}", lat, lon)));
    }
    Ok((lat, lon))
}

/// Public IP answer from the first successful provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicIpInfo {
    pub provider: String,
    pub info: IpInfo,
}

impl PublicIpInfo {
    pub fn ip_addr(&self) -> Option<IpAddr> {
        self.info.ip.as_deref().and_then(|ip| ip.trim().parse().ok())
    }
}

/// Host resolver configuration plus one resolution of the test domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsInfo {
    pub nameservers: Vec<String>,
    pub test_domain: String,
    pub a_record: Option<String>,
}

/// Answer to one DNS lookup, in resolver order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsRecordSet {
    pub domain: String,
    pub record_type: RecordType,
    pub values: Vec<String>,
}

/// Answer of one echo endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoOutcome {
    pub endpoint: String,
    pub ip: Option<String>,
    pub error: Option<ProbeError>,
}

/// Every echo endpoint's answer, in configured order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsLeakReport {
    pub outcomes: Vec<EchoOutcome>,
    pub distinct_ips: Vec<String>,
    /// All answering endpoints reported the same IP
    pub consistent: bool,
}

impl DnsLeakReport {
    pub fn from_outcomes(outcomes: Vec<EchoOutcome>) -> Self {
        let mut distinct_ips: Vec<String> = Vec::new();
        for ip in outcomes.iter().filter_map(|o| o.ip.as_ref()) {
            if !distinct_ips.contains(ip) {
                distinct_ips.push(ip.clone());
            }
        }
        let consistent = distinct_ips.len() <= 1;
        Self {
            outcomes,
            distinct_ips,
            consistent,
        }
    }
}

/// Connect result for one port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortStatus {
    pub port: u16,
    pub open: bool,
    pub service: String,
}

/// Port statuses in the fixed scan order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortScanReport {
    pub target: String,
    pub ports: Vec<PortStatus>,
}

impl PortScanReport {
    pub fn open_ports(&self) -> impl Iterator<Item = &PortStatus> {
        self.ports.iter().filter(|p| p.open)
    }
}

/// Speed-test server metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestServer {
    pub name: String,
    pub country: String,
    #[serde(default)]
    pub sponsor: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestReport {
    pub server: SpeedTestServer,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
}

/// Located IP with provider metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub ip: IpAddr,
    pub latitude: f64,
    pub longitude: f64,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeolocationReport {
    pub location: LocationRecord,
    /// Map page written for this location, when rendering succeeded
    pub map_artifact: Option<PathBuf>,
}

/// Answer of one IP lookup provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupOutcome {
    pub provider: String,
    pub info: Option<IpInfo>,
    pub error: Option<ProbeError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpLookupReport {
    pub ip: IpAddr,
    pub outcomes: Vec<LookupOutcome>,
}

/// One responding LAN host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub ip: IpAddr,
    pub mac_address: Option<String>,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
}

/// LAN hosts in discovery order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub subnet_prefix: String,
    pub strategy: DiscoveryStrategy,
    pub devices: Vec<DeviceRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingReport {
    pub target: String,
    pub transmitted: u32,
    pub received: u32,
    pub packet_loss_percent: f64,
    pub avg_rtt_ms: Option<f64>,
    pub success: bool,
    pub output: String,
}
