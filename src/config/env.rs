//! Environment variable handling and .env file management

use crate::error::{AppError, Result};
use crate::types::DiscoveryStrategy;
use std::path::Path;

/// Environment variable configuration manager
pub struct EnvManager;

impl EnvManager {
    /// Load .env file if it exists
    pub fn load_env_file(debug: bool) -> Result<()> {
        if Path::new(".env").exists() {
            dotenv::from_filename(".env")
                .map_err(|e| AppError::config(format!("Failed to load .env file: {}", e)))?;

            if debug {
                eprintln!("Loaded configuration from .env file");
            }
        } else if debug {
            eprintln!("No .env file found, using defaults and CLI arguments");
        }

        Ok(())
    }

    /// Create example .env file content
    pub fn create_example_env_content() -> String {
        r#"# Network Master Configuration
#
# Values set here are used as defaults and can be overridden by real
# environment variables and then by command-line arguments.

# Ranked public IP providers, tried in order (comma-separated)
# IP_PROVIDERS=https://ipinfo.io/json,https://ipapi.co/json/,https://api.myip.com

# Delay held after a successful provider call, in milliseconds
# API_DELAY_MS=1500

# Per-call HTTP JSON timeout in seconds
# HTTP_TIMEOUT_SECONDS=10

# Leak-test echo call timeout in seconds
# ECHO_TIMEOUT_SECONDS=5

# TCP connect timeout for port scans, in milliseconds
# CONNECT_TIMEOUT_MS=1000

# DNS resolution timeout in seconds
# DNS_TIMEOUT_SECONDS=5

# Echo endpoints compared by the DNS leak test (comma-separated)
# LEAK_ENDPOINTS=https://api.ipify.org,https://icanhazip.com,https://ident.me,https://ifconfig.me

# Geolocation provider base URL, queried as {base}/{ip}/json
# GEO_PROVIDER_URL=https://ipinfo.io

# IP lookup URL templates, each with an {ip} placeholder (comma-separated)
# LOOKUP_PROVIDERS=https://ipinfo.io/{ip}/json,https://ipapi.co/{ip}/json/

# Speed-test server list
# SPEEDTEST_SERVERS_URL=https://www.speedtest.net/api/js/servers?engine=js&limit=10

# Domain resolved by the DNS info probe
# DNS_TEST_DOMAIN=google.com

# Default port scan and ping target
# SCAN_TARGET=127.0.0.1

# Device discovery strategy: active or simulated
# DISCOVERY_STRATEGY=active

# Directory receiving the geolocation map page
# MAP_OUTPUT_DIR=/tmp

# Attempts for retried calls (DNS, geolocation, leak test, server list)
# RETRY_ATTEMPTS=3

# Enable colored output (true/false)
# ENABLE_COLOR=true

# Example configurations for different scenarios:
#
# Offline demo without touching the LAN:
# DISCOVERY_STRATEGY=simulated
#
# Slow or lossy links:
# HTTP_TIMEOUT_SECONDS=20
# CONNECT_TIMEOUT_MS=3000
# RETRY_ATTEMPTS=5
"#
        .to_string()
    }

    /// Save example .env file to disk
    pub fn save_example_env_file(path: &Path) -> Result<()> {
        let content = Self::create_example_env_content();
        std::fs::write(path, content)
            .map_err(|e| AppError::config(format!("Failed to write example .env file: {}", e)))?;

        Ok(())
    }

    /// Validate environment variable format before parsing
    pub fn validate_env_var(key: &str, value: &str) -> Result<()> {
        match key {
            "IP_PROVIDERS" | "LEAK_ENDPOINTS" => {
                for url in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    validate_http_url(key, url)?;
                }
            }
            "LOOKUP_PROVIDERS" => {
                for template in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    if !template.contains("{ip}") {
                        return Err(AppError::config(format!(
                            "LOOKUP_PROVIDERS entry '{}' is missing the {{ip}} placeholder",
                            template
                        )));
                    }
                    validate_http_url(key, &template.replace("{ip}", "192.0.2.1"))?;
                }
            }
            "GEO_PROVIDER_URL" | "SPEEDTEST_SERVERS_URL" => {
                validate_http_url(key, value.trim())?;
            }
            "HTTP_TIMEOUT_SECONDS" | "ECHO_TIMEOUT_SECONDS" | "DNS_TIMEOUT_SECONDS" => {
                let seconds = parse_number(key, value)?;
                if seconds == 0 || seconds > 300 {
                    return Err(AppError::config(format!("{} must be between 1 and 300, got: {}", key, seconds)));
                }
            }
            "CONNECT_TIMEOUT_MS" => {
                let millis = parse_number(key, value)?;
                if millis == 0 || millis > 300_000 {
                    return Err(AppError::config(format!(
                        "CONNECT_TIMEOUT_MS must be between 1 and 300000, got: {}",
                        millis
                    )));
                }
            }
            "API_DELAY_MS" => {
                let millis = parse_number(key, value)?;
                if millis > 60_000 {
                    return Err(AppError::config(format!("API_DELAY_MS cannot exceed 60000, got: {}", millis)));
                }
            }
            "RETRY_ATTEMPTS" => {
                let attempts = parse_number(key, value)?;
                if attempts == 0 || attempts > 10 {
                    return Err(AppError::config(format!("RETRY_ATTEMPTS must be between 1 and 10, got: {}", attempts)));
                }
            }
            "DNS_TEST_DOMAIN" | "SCAN_TARGET" => {
                if value.trim().is_empty() {
                    return Err(AppError::config(format!("{} cannot be empty", key)));
                }
            }
            "DISCOVERY_STRATEGY" => {
                value.parse::<DiscoveryStrategy>()?;
            }
            "ENABLE_COLOR" => {
                value
                    .trim()
                    .parse::<bool>()
                    .map_err(|e| AppError::config(format!("Invalid ENABLE_COLOR value '{}': {}", value, e)))?;
            }
            _ => {
                // MAP_OUTPUT_DIR and unknown keys take any value
            }
        }

        Ok(())
    }

    /// Get list of all supported environment variables with descriptions
    pub fn get_supported_env_vars() -> Vec<(&'static str, &'static str, &'static str)> {
        vec![
            ("IP_PROVIDERS", "Ranked public IP providers (comma-separated)", "https://ipinfo.io/json,https://api.myip.com"),
            ("API_DELAY_MS", "Delay after a successful provider call (ms)", "1500"),
            ("HTTP_TIMEOUT_SECONDS", "Per-call HTTP timeout (1-300)", "10"),
            ("ECHO_TIMEOUT_SECONDS", "Leak-test echo timeout (1-300)", "5"),
            ("CONNECT_TIMEOUT_MS", "TCP connect timeout (ms)", "1000"),
            ("DNS_TIMEOUT_SECONDS", "DNS resolution timeout (1-300)", "5"),
            ("LEAK_ENDPOINTS", "Echo endpoints for the leak test", "https://api.ipify.org,https://ident.me"),
            ("GEO_PROVIDER_URL", "Geolocation provider base URL", "https://ipinfo.io"),
            ("LOOKUP_PROVIDERS", "IP lookup URL templates with {ip}", "https://ipinfo.io/{ip}/json"),
            ("SPEEDTEST_SERVERS_URL", "Speed-test server list URL", "https://www.speedtest.net/api/js/servers?engine=js"),
            ("DNS_TEST_DOMAIN", "Domain resolved by the DNS info probe", "google.com"),
            ("SCAN_TARGET", "Default port scan and ping target", "127.0.0.1"),
            ("DISCOVERY_STRATEGY", "Device discovery strategy", "active"),
            ("MAP_OUTPUT_DIR", "Directory for the map page", "/tmp"),
            ("RETRY_ATTEMPTS", "Attempts for retried calls (1-10)", "3"),
            ("ENABLE_COLOR", "Enable colored output", "true"),
        ]
    }

    /// Display environment variable help
    pub fn display_env_help() -> String {
        let mut help = String::new();
        help.push_str("Supported Environment Variables:\n\n");

        for (var, description, example) in Self::get_supported_env_vars() {
            help.push_str(&format!("  {:<22} {}\n", var, description));
            help.push_str(&format!("  {:<22} Example: {}\n\n", "", example));
        }

        help.push_str("Configuration Priority (highest to lowest):\n");
        help.push_str("  1. Command-line arguments\n");
        help.push_str("  2. Environment variables\n");
        help.push_str("  3. .env file values\n");
        help.push_str("  4. Default values\n");

        help
    }

    /// Validate all currently set environment variables
    pub fn validate_current_env() -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        for (var_name, _, _) in Self::get_supported_env_vars() {
            if let Ok(value) = std::env::var(var_name) {
                if let Err(e) = Self::validate_env_var(var_name, &value) {
                    warnings.push(format!("Warning: {}", e));
                }
            }
        }

        Ok(warnings)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", key, value, e)))
}

fn validate_http_url(key: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| AppError::config(format!("Invalid {} entry '{}': {}", key, value, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(AppError::config(format!(
            "{} entry '{}' must use http or https, not {}",
            key, value, scheme
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_env_manager_create_example_content() {
        let content = EnvManager::create_example_env_content();

        for (name, _, _) in EnvManager::get_supported_env_vars() {
            assert!(content.contains(&format!("{}=", name)), "missing {}", name);
        }
    }

    #[test]
    fn test_env_manager_save_example_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let result = EnvManager::save_example_env_file(temp_file.path());

        assert!(result.is_ok());

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert!(content.contains("Network Master Configuration"));
    }

    #[test]
    fn test_env_manager_validate_env_var() {
        assert!(EnvManager::validate_env_var("IP_PROVIDERS", "https://ipinfo.io/json, https://api.myip.com").is_ok());
        assert!(EnvManager::validate_env_var("LOOKUP_PROVIDERS", "https://ipinfo.io/{ip}/json").is_ok());
        assert!(EnvManager::validate_env_var("HTTP_TIMEOUT_SECONDS", "10").is_ok());
        assert!(EnvManager::validate_env_var("CONNECT_TIMEOUT_MS", "250").is_ok());
        assert!(EnvManager::validate_env_var("API_DELAY_MS", "0").is_ok());
        assert!(EnvManager::validate_env_var("DISCOVERY_STRATEGY", "simulated").is_ok());
        assert!(EnvManager::validate_env_var("ENABLE_COLOR", "false").is_ok());
        assert!(EnvManager::validate_env_var("MAP_OUTPUT_DIR", "anything").is_ok());

        assert!(EnvManager::validate_env_var("IP_PROVIDERS", "not-a-url").is_err());
        assert!(EnvManager::validate_env_var("LEAK_ENDPOINTS", "ftp://example.com").is_err());
        assert!(EnvManager::validate_env_var("LOOKUP_PROVIDERS", "https://ipinfo.io/json").is_err());
        assert!(EnvManager::validate_env_var("HTTP_TIMEOUT_SECONDS", "0").is_err());
        assert!(EnvManager::validate_env_var("DNS_TIMEOUT_SECONDS", "301").is_err());
        assert!(EnvManager::validate_env_var("RETRY_ATTEMPTS", "0").is_err());
        assert!(EnvManager::validate_env_var("DISCOVERY_STRATEGY", "passive").is_err());
        assert!(EnvManager::validate_env_var("SCAN_TARGET", "  ").is_err());
        assert!(EnvManager::validate_env_var("ENABLE_COLOR", "maybe").is_err());
    }

    #[test]
    fn test_get_supported_env_vars() {
        let vars = EnvManager::get_supported_env_vars();

        assert_eq!(vars.len(), 16);
        assert!(vars.iter().any(|(name, _, _)| *name == "IP_PROVIDERS"));
        assert!(vars.iter().any(|(name, _, _)| *name == "DISCOVERY_STRATEGY"));
        assert!(vars.iter().any(|(name, _, _)| *name == "ENABLE_COLOR"));
    }

    #[test]
    fn test_display_env_help() {
        let help = EnvManager::display_env_help();

        assert!(help.contains("Supported Environment Variables:"));
        assert!(help.contains("LEAK_ENDPOINTS"));
        assert!(help.contains("Configuration Priority"));
        assert!(help.contains("Command-line arguments"));
    }
}
