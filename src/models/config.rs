//! Configuration data model and validation

use crate::defaults;
use crate::error::{AppError, RetryPolicy, Result};
use crate::providers::ProviderEndpoint;
use crate::types::{DiscoveryStrategy, TimeoutPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Ranked public IP providers
    #[serde(default = "default_ip_providers")]
    pub ip_providers: Vec<String>,

    /// Delay held after a successful provider call
    #[serde(default = "default_api_delay_ms")]
    pub api_delay_ms: u64,

    /// Per-call HTTP JSON timeout
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_seconds: u64,

    /// Leak-test echo call timeout
    #[serde(default = "default_echo_timeout_secs")]
    pub echo_timeout_seconds: u64,

    /// TCP connect timeout for port scans
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// DNS resolution timeout
    #[serde(default = "default_dns_timeout_secs")]
    pub dns_timeout_seconds: u64,

    /// Echo endpoints queried by the leak test
    #[serde(default = "default_leak_endpoints")]
    pub leak_endpoints: Vec<String>,

    /// Geolocation provider base URL (`{base}/{ip}/json`)
    #[serde(default = "default_geo_provider_url")]
    pub geo_provider_url: String,

    /// IP lookup URL templates containing `{ip}`
    #[serde(default = "default_lookup_providers")]
    pub lookup_providers: Vec<String>,

    /// Speed-test server list URL
    #[serde(default = "default_speedtest_servers_url")]
    pub speedtest_servers_url: String,

    /// Domain resolved by the DNS info probe
    #[serde(default = "default_dns_test_domain")]
    pub dns_test_domain: String,

    /// Default port scan and ping target
    #[serde(default = "default_scan_target")]
    pub scan_target: String,

    /// Device discovery strategy
    #[serde(default = "default_discovery_strategy")]
    pub discovery_strategy: DiscoveryStrategy,

    /// Directory receiving the scratch map page
    #[serde(default)]
    pub map_output_dir: Option<PathBuf>,

    /// Attempts for retried calls
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Enable colored terminal output
    #[serde(default = "default_enable_color")]
    pub enable_color: bool,

    /// Enable verbose output
    #[serde(default)]
    pub verbose: bool,

    /// Enable debug output
    #[serde(default)]
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ip_providers: default_ip_providers(),
            api_delay_ms: default_api_delay_ms(),
            http_timeout_seconds: default_http_timeout_secs(),
            echo_timeout_seconds: default_echo_timeout_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            dns_timeout_seconds: default_dns_timeout_secs(),
            leak_endpoints: default_leak_endpoints(),
            geo_provider_url: default_geo_provider_url(),
            lookup_providers: default_lookup_providers(),
            speedtest_servers_url: default_speedtest_servers_url(),
            dns_test_domain: default_dns_test_domain(),
            scan_target: default_scan_target(),
            discovery_strategy: default_discovery_strategy(),
            map_output_dir: None,
            retry_attempts: default_retry_attempts(),
            enable_color: default_enable_color(),
            verbose: false,
            debug: false,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the uniform timeout policy
    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            http: Duration::from_secs(self.http_timeout_seconds),
            echo: Duration::from_secs(self.echo_timeout_seconds),
            connect: Duration::from_millis(self.connect_timeout_ms),
            dns: Duration::from_secs(self.dns_timeout_seconds),
            api_delay: Duration::from_millis(self.api_delay_ms),
            ip_provider_count: self.ip_providers.len() as u32,
            retry_attempts: self.retry_attempts,
            ..TimeoutPolicy::default()
        }
    }

    /// Retry policy for transient failures
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_attempts(self.retry_attempts)
    }

    /// Ranked endpoints for the public IP chain, in configured order
    pub fn ip_provider_endpoints(&self) -> Vec<ProviderEndpoint> {
        let per_call_timeout = Duration::from_secs(self.http_timeout_seconds);
        let post_success_delay = Duration::from_millis(self.api_delay_ms);
        self.ip_providers
            .iter()
            .enumerate()
            .map(|(priority, url)| {
                ProviderEndpoint::new(url.clone(), priority as u32)
                    .with_timeout(per_call_timeout)
                    .with_post_success_delay(post_success_delay)
            })
            .collect()
    }

    /// Where the geolocation map page is written
    pub fn map_path(&self) -> PathBuf {
        self.map_output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(defaults::MAP_FILE_NAME)
    }

    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Result<()> {
        validate_url_list("IP provider", &self.ip_providers)?;
        validate_url_list("Leak endpoint", &self.leak_endpoints)?;

        if self.lookup_providers.is_empty() {
            return Err(AppError::config("At least one IP lookup provider is required"));
        }
        for template in &self.lookup_providers {
            if !template.contains("{ip}") {
                return Err(AppError::config(format!(
                    "IP lookup provider '{}' must contain an {{ip}} placeholder",
                    template
                )));
            }
            let sample = template.replace("{ip}", "192.0.2.1");
            url::Url::parse(&sample).map_err(|e| {
                AppError::config(format!("Invalid IP lookup provider '{}': {}", template, e))
            })?;
        }

        validate_url("Geolocation provider", &self.geo_provider_url)?;
        validate_url("Speed-test server list", &self.speedtest_servers_url)?;

        if self.dns_test_domain.trim().is_empty() {
            return Err(AppError::config("DNS test domain cannot be empty"));
        }
        if self.scan_target.trim().is_empty() {
            return Err(AppError::config("Scan target cannot be empty"));
        }

        validate_seconds("HTTP timeout", self.http_timeout_seconds)?;
        validate_seconds("Echo timeout", self.echo_timeout_seconds)?;
        validate_seconds("DNS timeout", self.dns_timeout_seconds)?;

        if self.connect_timeout_ms == 0 {
            return Err(AppError::config("Connect timeout must be greater than 0"));
        }
        if self.connect_timeout_ms > 300_000 {
            return Err(AppError::config("Connect timeout cannot exceed 300 seconds"));
        }
        if self.api_delay_ms > 60_000 {
            return Err(AppError::config("API delay cannot exceed 60 seconds"));
        }

        if self.retry_attempts == 0 {
            return Err(AppError::config("Retry attempts must be greater than 0"));
        }
        if self.retry_attempts > 10 {
            return Err(AppError::config("Retry attempts cannot exceed 10"));
        }

        Ok(())
    }

    /// Merge environment variables into this configuration
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("IP_PROVIDERS") {
            self.ip_providers = split_list(&value);
        }

        if let Ok(value) = std::env::var("API_DELAY_MS") {
            self.api_delay_ms = parse_env("API_DELAY_MS", &value)?;
        }

        if let Ok(value) = std::env::var("HTTP_TIMEOUT_SECONDS") {
            self.http_timeout_seconds = parse_env("HTTP_TIMEOUT_SECONDS", &value)?;
        }

        if let Ok(value) = std::env::var("ECHO_TIMEOUT_SECONDS") {
            self.echo_timeout_seconds = parse_env("ECHO_TIMEOUT_SECONDS", &value)?;
        }

        if let Ok(value) = std::env::var("CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = parse_env("CONNECT_TIMEOUT_MS", &value)?;
        }

        if let Ok(value) = std::env::var("DNS_TIMEOUT_SECONDS") {
            self.dns_timeout_seconds = parse_env("DNS_TIMEOUT_SECONDS", &value)?;
        }

        if let Ok(value) = std::env::var("LEAK_ENDPOINTS") {
            self.leak_endpoints = split_list(&value);
        }

        if let Ok(value) = std::env::var("GEO_PROVIDER_URL") {
            self.geo_provider_url = value.trim().trim_end_matches('/').to_string();
        }

        if let Ok(value) = std::env::var("LOOKUP_PROVIDERS") {
            self.lookup_providers = split_list(&value);
        }

        if let Ok(value) = std::env::var("SPEEDTEST_SERVERS_URL") {
            self.speedtest_servers_url = value.trim().to_string();
        }

        if let Ok(value) = std::env::var("DNS_TEST_DOMAIN") {
            self.dns_test_domain = value.trim().to_string();
        }

        if let Ok(value) = std::env::var("SCAN_TARGET") {
            self.scan_target = value.trim().to_string();
        }

        if let Ok(value) = std::env::var("DISCOVERY_STRATEGY") {
            self.discovery_strategy = value.parse()?;
        }

        if let Ok(value) = std::env::var("MAP_OUTPUT_DIR") {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                self.map_output_dir = Some(PathBuf::from(trimmed));
            }
        }

        if let Ok(value) = std::env::var("RETRY_ATTEMPTS") {
            self.retry_attempts = parse_env("RETRY_ATTEMPTS", &value)?;
        }

        if let Ok(value) = std::env::var("ENABLE_COLOR") {
            self.enable_color = parse_env("ENABLE_COLOR", &value)?;
        }

        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", key, value, e)))
}

fn validate_url(label: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::config(format!("{} URL cannot be empty", label)));
    }
    let parsed = url::Url::parse(value)
        .map_err(|e| AppError::config(format!("Invalid {} URL '{}': {}", label, value, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(AppError::config(format!(
            "{} URL must use http or https, got '{}': {}",
            label, other, value
        ))),
    }
}

fn validate_url_list(label: &str, values: &[String]) -> Result<()> {
    if values.is_empty() {
        return Err(AppError::config(format!("At least one {} is required", label.to_lowercase())));
    }
    for value in values {
        validate_url(label, value)?;
    }
    Ok(())
}

fn validate_seconds(label: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(AppError::config(format!("{} must be greater than 0", label)));
    }
    if value > 300 {
        return Err(AppError::config(format!("{} cannot exceed 300 seconds", label)));
    }
    Ok(())
}

// Default value functions for serde
fn default_ip_providers() -> Vec<String> {
    defaults::DEFAULT_IP_PROVIDERS.iter().map(|s| s.to_string()).collect()
}

fn default_api_delay_ms() -> u64 {
    defaults::DEFAULT_API_DELAY.as_millis() as u64
}

fn default_http_timeout_secs() -> u64 {
    defaults::DEFAULT_HTTP_TIMEOUT.as_secs()
}

fn default_echo_timeout_secs() -> u64 {
    defaults::DEFAULT_ECHO_TIMEOUT.as_secs()
}

fn default_connect_timeout_ms() -> u64 {
    defaults::DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}

fn default_dns_timeout_secs() -> u64 {
    defaults::DEFAULT_DNS_TIMEOUT.as_secs()
}

fn default_leak_endpoints() -> Vec<String> {
    defaults::DEFAULT_LEAK_ENDPOINTS.iter().map(|s| s.to_string()).collect()
}

fn default_geo_provider_url() -> String {
    defaults::DEFAULT_GEO_PROVIDER_URL.to_string()
}

fn default_lookup_providers() -> Vec<String> {
    defaults::DEFAULT_LOOKUP_PROVIDERS.iter().map(|s| s.to_string()).collect()
}

fn default_speedtest_servers_url() -> String {
    defaults::DEFAULT_SPEEDTEST_SERVERS_URL.to_string()
}

fn default_dns_test_domain() -> String {
    defaults::DEFAULT_DNS_TEST_DOMAIN.to_string()
}

fn default_scan_target() -> String {
    defaults::DEFAULT_SCAN_TARGET.to_string()
}

fn default_discovery_strategy() -> DiscoveryStrategy {
    DiscoveryStrategy::Active
}

fn default_retry_attempts() -> u32 {
    defaults::DEFAULT_RETRY_ATTEMPTS
}

fn default_enable_color() -> bool {
    defaults::DEFAULT_ENABLE_COLOR
}
