//! Data models for configuration and probe results

pub mod config;
pub mod probe;

// Re-export main model types
pub use config::Config;
pub use probe::{
    parse_loc, DeviceRecord, DeviceReport, DnsInfo, DnsLeakReport, DnsRecordSet, EchoOutcome,
    GeolocationReport, InterfaceInfo, IpInfo, IpLookupReport, LocationRecord, LookupOutcome,
    NetworkInfo, PingReport, PortScanReport, PortStatus, ProbeError, ProbePayload, ProbeResult,
    PublicIpInfo, SpeedTestReport, SpeedTestServer,
};
