//! Network Master
//!
//! Concurrent network diagnostics: public IP, local interfaces, DNS records,
//! DNS leak comparison, throughput, LAN devices, geolocation and open ports.
//! Every probe writes into one shared, versioned [`store::ResultStore`] and is
//! scheduled by the [`orchestrator::ProbeOrchestrator`].

pub mod app;
pub mod cli;
pub mod client;
pub mod config;
pub mod discovery;
pub mod dns;
pub mod error;
pub mod geo;
pub mod logging;
pub mod models;
pub mod netinfo;
pub mod orchestrator;
pub mod output;
pub mod ping;
pub mod portscan;
pub mod providers;
pub mod security;
pub mod speedtest;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use error::{AppError, ErrorClass, Result};
pub use models::{Config, ProbePayload, ProbeResult};
pub use orchestrator::{Probe, ProbeContext, ProbeEvent, ProbeOrchestrator};
pub use providers::{FallbackProviderChain, ProviderEndpoint};
pub use store::{ResultStore, StoreSnapshot};
pub use types::{ProbeInput, ProbeKind, ProbeStatus, RecordType, ScanState, TimeoutPolicy};

/// Application version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Version line with build metadata, shown by `--version`
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_COMMIT"),
    ", built ",
    env!("BUILD_TIME"),
    ", ",
    env!("TARGET_TRIPLE"),
    ")"
);

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    pub const DEFAULT_IP_PROVIDERS: &[&str] = &[
        "https://ipinfo.io/json",
        "https://ipapi.co/json/",
        "https://api.myip.com",
    ];
    pub const DEFAULT_API_DELAY: Duration = Duration::from_millis(1500);
    pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_ECHO_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);
    pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_DISCOVERY_CONNECT_TIMEOUT: Duration = Duration::from_millis(300);
    pub const DEFAULT_LEAK_ENDPOINTS: &[&str] = &[
        "https://api.ipify.org",
        "https://icanhazip.com",
        "https://ident.me",
        "https://ifconfig.me",
    ];
    pub const DEFAULT_GEO_PROVIDER_URL: &str = "https://ipinfo.io";
    pub const DEFAULT_LOOKUP_PROVIDERS: &[&str] = &[
        "https://ipinfo.io/{ip}/json",
        "https://ipapi.co/{ip}/json/",
    ];
    pub const DEFAULT_SPEEDTEST_SERVERS_URL: &str =
        "https://www.speedtest.net/api/js/servers?engine=js&limit=10";
    pub const DEFAULT_DNS_TEST_DOMAIN: &str = "google.com";
    pub const DEFAULT_SCAN_TARGET: &str = "127.0.0.1";
    pub const DEFAULT_SCAN_PORTS: &[u16] = &[21, 22, 23, 25, 53, 80, 110, 143, 443, 3306, 3389];
    pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
    pub const DEFAULT_PING_COUNT: u32 = 4;
    pub const DEFAULT_ENABLE_COLOR: bool = true;
    pub const MAP_FILE_NAME: &str = "temp_map.html";
}
