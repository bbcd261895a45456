//! Configuration parsing from CLI arguments and environment variables

use crate::{cli::Cli, config::env::EnvManager, error::Result, models::Config};

/// Configuration parser that combines CLI arguments with environment variables
pub struct ConfigParser {
    cli: Cli,
}

impl ConfigParser {
    /// Create a new configuration parser with CLI arguments
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Parse and build the complete configuration
    pub fn parse(&self) -> Result<Config> {
        let mut config = Config::default();

        self.load_env_file()?;

        config.merge_from_env()?;

        self.apply_cli_overrides(&mut config)?;

        config.validate()?;

        Ok(config)
    }

    fn load_env_file(&self) -> Result<()> {
        EnvManager::load_env_file(self.cli.debug)
    }

    /// Apply CLI argument overrides to configuration
    fn apply_cli_overrides(&self, config: &mut Config) -> Result<()> {
        if let Some(timeout) = self.cli.timeout {
            config.http_timeout_seconds = timeout;
        }

        if let Some(ref strategy) = self.cli.strategy {
            config.discovery_strategy = strategy.parse()?;
        }

        if let Some(ref dir) = self.cli.map_dir {
            config.map_output_dir = Some(dir.clone());
        }

        if self.cli.no_color || self.cli.json {
            config.enable_color = false;
        }

        // CLI-only flags
        config.verbose = self.cli.verbose;
        config.debug = self.cli.debug;

        if config.debug {
            eprintln!("Applied CLI overrides to configuration");
            eprintln!(
                "Final config: http_timeout={}s, strategy={}, enable_color={}",
                config.http_timeout_seconds, config.discovery_strategy, config.enable_color
            );
        }

        Ok(())
    }
}

/// Convenience function to load complete configuration from CLI arguments
pub fn load_config(cli: Cli) -> Result<Config> {
    ConfigParser::new(cli).parse()
}

/// Display configuration summary for debug purposes
pub fn display_config_summary(config: &Config) -> String {
    let mut summary = Vec::new();

    summary.push(format!("IP Providers: {}", config.ip_providers.join(", ")));
    summary.push(format!("Leak Endpoints: {}", config.leak_endpoints.len()));
    summary.push(format!("Lookup Providers: {}", config.lookup_providers.len()));
    summary.push(format!("Geolocation: {}", config.geo_provider_url));
    summary.push(format!("Speed-test Servers: {}", config.speedtest_servers_url));
    summary.push(format!("DNS Test Domain: {}", config.dns_test_domain));
    summary.push(format!("Scan Target: {}", config.scan_target));
    summary.push(format!("Discovery: {}", config.discovery_strategy));
    summary.push(format!(
        "Timeouts: http={}s echo={}s connect={}ms dns={}s",
        config.http_timeout_seconds, config.echo_timeout_seconds, config.connect_timeout_ms, config.dns_timeout_seconds
    ));
    summary.push(format!("API Delay: {}ms", config.api_delay_ms));
    summary.push(format!("Retry Attempts: {}", config.retry_attempts));
    summary.push(format!("Map Page: {}", config.map_path().display()));
    summary.push(format!("Color Output: {}", config.enable_color));
    summary.push(format!("Verbose: {}", config.verbose));
    summary.push(format!("Debug: {}", config.debug));

    summary.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DiscoveryStrategy;
    use clap::Parser;
    use std::env;
    use std::sync::Mutex;

    // Environment and the working-directory .env are process-global
    static MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "IP_PROVIDERS",
        "HTTP_TIMEOUT_SECONDS",
        "DISCOVERY_STRATEGY",
        "SCAN_TARGET",
        "RETRY_ATTEMPTS",
        "ENABLE_COLOR",
    ];

    fn with_clean_env<F: FnOnce()>(backup_name: &str, test: F) {
        let _guard = MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for var in VARS {
            env::remove_var(var);
        }

        let env_file_exists = std::path::Path::new(".env").exists();
        if env_file_exists {
            let _ = std::fs::rename(".env", backup_name);
        }

        test();

        for var in VARS {
            env::remove_var(var);
        }
        if env_file_exists {
            let _ = std::fs::rename(backup_name, ".env");
        }
    }

    #[test]
    fn test_config_parser_defaults() {
        let config = Config::default();

        assert_eq!(config.http_timeout_seconds, crate::defaults::DEFAULT_HTTP_TIMEOUT.as_secs());
        assert_eq!(config.enable_color, crate::defaults::DEFAULT_ENABLE_COLOR);
        assert_eq!(config.scan_target, crate::defaults::DEFAULT_SCAN_TARGET);
        assert!(!config.verbose);
        assert!(!config.debug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_overrides() {
        with_clean_env(".env.test_backup_cli_overrides", || {
            let cli = Cli::parse_from([
                "netmaster",
                "--timeout",
                "5",
                "--no-color",
                "--verbose",
                "--strategy",
                "simulated",
                "--map-dir",
                "/tmp",
                "devices",
            ]);
            let config = ConfigParser::new(cli).parse().unwrap();

            assert_eq!(config.http_timeout_seconds, 5);
            assert!(!config.enable_color);
            assert!(config.verbose);
            assert_eq!(config.discovery_strategy, DiscoveryStrategy::Simulated);
            assert_eq!(config.map_path(), std::path::PathBuf::from("/tmp").join("temp_map.html"));
        });
    }

    #[test]
    fn test_env_vars_are_merged() {
        with_clean_env(".env.test_backup_env_merge", || {
            env::set_var("SCAN_TARGET", "192.0.2.10");
            env::set_var("RETRY_ATTEMPTS", "5");
            env::set_var("IP_PROVIDERS", "https://one.example/json, https://two.example/json");

            let config = load_config(Cli::parse_from(["netmaster", "ports"])).unwrap();

            assert_eq!(config.scan_target, "192.0.2.10");
            assert_eq!(config.retry_attempts, 5);
            assert_eq!(config.ip_providers.len(), 2);
            assert_eq!(config.ip_providers[1], "https://two.example/json");
        });
    }

    #[test]
    fn test_cli_overrides_env_vars() {
        with_clean_env(".env.test_backup_cli_overrides_env_vars", || {
            env::set_var("HTTP_TIMEOUT_SECONDS", "8");
            env::set_var("DISCOVERY_STRATEGY", "active");

            let cli = Cli::parse_from(["netmaster", "--timeout", "12", "--strategy", "simulated", "scan"]);
            let config = ConfigParser::new(cli).parse().unwrap();

            assert_eq!(config.http_timeout_seconds, 12);
            assert_eq!(config.discovery_strategy, DiscoveryStrategy::Simulated);
        });
    }

    #[test]
    fn test_invalid_env_value_fails_parse() {
        with_clean_env(".env.test_backup_invalid_env", || {
            env::set_var("RETRY_ATTEMPTS", "0");
            assert!(load_config(Cli::parse_from(["netmaster", "ip"])).is_err());

            env::set_var("RETRY_ATTEMPTS", "three");
            assert!(load_config(Cli::parse_from(["netmaster", "ip"])).is_err());
        });
    }

    #[test]
    fn test_unknown_strategy_flag_is_rejected() {
        with_clean_env(".env.test_backup_strategy", || {
            let cli = Cli::parse_from(["netmaster", "--strategy", "passive", "devices"]);
            assert!(ConfigParser::new(cli).parse().is_err());
        });
    }

    #[test]
    fn test_json_disables_color() {
        with_clean_env(".env.test_backup_json", || {
            let config = load_config(Cli::parse_from(["netmaster", "--json", "local"])).unwrap();
            assert!(!config.enable_color);
        });
    }

    #[test]
    fn test_config_summary() {
        let summary = display_config_summary(&Config::default());

        assert!(summary.contains("IP Providers:"));
        assert!(summary.contains("Scan Target: 127.0.0.1"));
        assert!(summary.contains("Discovery: active"));
        assert!(summary.contains("temp_map.html"));
    }
}
