//! Command-line interface

use crate::types::{ProbeInput, ProbeKind, RecordType};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

/// Network Master - concurrent network diagnostics from one command
#[derive(Parser, Debug, Clone)]
#[command(name = "netmaster")]
#[command(version = crate::LONG_VERSION, about, long_about = None)]
pub struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Enable verbose output
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Print results as JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Per-call HTTP timeout in seconds
    #[arg(short, long, global = true, value_parser = parse_duration)]
    pub timeout: Option<u64>,

    /// Device discovery strategy (active or simulated)
    #[arg(long, global = true, value_name = "STRATEGY")]
    pub strategy: Option<String>,

    /// Directory receiving the geolocation map page
    #[arg(long, global = true, value_name = "DIR")]
    pub map_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run the full scan: local info, public IP, DNS, speed, devices, location
    Scan,
    /// Public IP through the ranked provider chain
    Ip,
    /// Local hostname, interfaces and connection type
    Local,
    /// Host name servers plus a test resolution
    DnsInfo,
    /// Resolve a domain
    Lookup {
        domain: String,
        /// Record type: A, AAAA, MX, NS, TXT or CNAME
        #[arg(short = 'r', long = "type", default_value = "A", value_parser = parse_record_type)]
        record_type: RecordType,
    },
    /// Compare the public IP seen by several echo endpoints
    Leak,
    /// Probe the common service ports of a host
    Ports { target: Option<String> },
    /// Measure download and upload throughput
    Speed,
    /// Locate an IP address and write a map page
    Locate { ip: IpAddr },
    /// Query every IP lookup provider for an address
    IpLookup { ip: IpAddr },
    /// Discover LAN devices, optionally in a given /24 prefix such as 192.168.1
    Devices { prefix: Option<String> },
    /// Run the system ping against a host
    Ping { target: String },
    /// Summarize the security-relevant findings of earlier probes
    Security,
}

/// What a command asks the orchestrator to do
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    FullScan,
    /// Run the port scan and leak test, then summarize
    Security,
    /// One probe; `None` derives the input from configuration
    Probe { kind: ProbeKind, input: Option<ProbeInput> },
}

impl Commands {
    pub fn action(&self) -> Action {
        let probe = |kind, input| Action::Probe { kind, input };
        match self {
            Commands::Scan => Action::FullScan,
            Commands::Security => Action::Security,
            Commands::Ip => probe(ProbeKind::PublicIp, None),
            Commands::Local => probe(ProbeKind::NetworkInfo, None),
            Commands::DnsInfo => probe(ProbeKind::DnsInfo, None),
            Commands::Lookup { domain, record_type } => probe(
                ProbeKind::DnsLookup,
                Some(ProbeInput::Domain {
                    domain: domain.clone(),
                    record_type: *record_type,
                }),
            ),
            Commands::Leak => probe(ProbeKind::DnsLeak, None),
            Commands::Ports { target } => probe(ProbeKind::PortScan, target.clone().map(ProbeInput::Target)),
            Commands::Speed => probe(ProbeKind::SpeedTest, None),
            Commands::Locate { ip } => probe(ProbeKind::Geolocation, Some(ProbeInput::Ip(*ip))),
            Commands::IpLookup { ip } => probe(ProbeKind::IpLookup, Some(ProbeInput::Ip(*ip))),
            Commands::Devices { prefix } => probe(ProbeKind::Devices, prefix.clone().map(ProbeInput::Target)),
            Commands::Ping { target } => probe(ProbeKind::Ping, Some(ProbeInput::Target(target.clone()))),
        }
    }
}

impl Cli {
    /// Check if colors should be enabled
    pub fn use_colors(&self) -> bool {
        !self.no_color && !self.json && supports_color()
    }
}

/// Parse duration from seconds string
fn parse_duration(s: &str) -> Result<u64, String> {
    if s.starts_with('+') || s.starts_with("0x") || s.starts_with("0X") {
        return Err(format!("Invalid duration: {}", s));
    }

    s.parse::<u64>()
        .map_err(|_| format!("Invalid duration: {}", s))
        .and_then(|secs| {
            if secs == 0 {
                Err("Duration must be greater than 0".to_string())
            } else if secs > 300 {
                Err("Duration cannot exceed 300 seconds".to_string())
            } else {
                Ok(secs)
            }
        })
}

fn parse_record_type(s: &str) -> Result<RecordType, String> {
    s.parse().map_err(|e: crate::error::AppError| e.to_string())
}

/// Check if the terminal supports color output
fn supports_color() -> bool {
    if let Ok(term) = std::env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }

    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    if std::env::var("FORCE_COLOR").is_ok() {
        return true;
    }

    #[cfg(target_os = "windows")]
    {
        if std::env::var("ANSICON").is_ok() || std::env::var("ConEmuANSI").is_ok() {
            return true;
        }
    }

    #[cfg(unix)]
    {
        true
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing_basic() {
        let cli = Cli::parse_from(["netmaster", "scan"]);
        assert_eq!(cli.command, Commands::Scan);
        assert!(!cli.verbose);
        assert!(!cli.debug);
        assert!(!cli.json);
        assert_eq!(cli.timeout, None);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["netmaster", "ip", "--json", "--no-color", "--verbose", "--timeout", "20"]);
        assert!(cli.json);
        assert!(cli.no_color);
        assert!(cli.verbose);
        assert_eq!(cli.timeout, Some(20));
        assert!(!cli.use_colors());
    }

    #[test]
    fn test_lookup_record_type() {
        let cli = Cli::parse_from(["netmaster", "lookup", "example.com", "--type", "mx"]);
        assert_eq!(
            cli.command.action(),
            Action::Probe {
                kind: ProbeKind::DnsLookup,
                input: Some(ProbeInput::Domain {
                    domain: "example.com".to_string(),
                    record_type: RecordType::MX,
                }),
            }
        );

        let default_type = Cli::parse_from(["netmaster", "lookup", "example.com"]);
        assert!(matches!(
            default_type.command,
            Commands::Lookup { record_type: RecordType::A, .. }
        ));

        assert!(Cli::try_parse_from(["netmaster", "lookup", "example.com", "--type", "SRV"]).is_err());
    }

    #[test]
    fn test_optional_targets_fall_back_to_configuration() {
        let ports = Cli::parse_from(["netmaster", "ports"]);
        assert_eq!(ports.command.action(), Action::Probe { kind: ProbeKind::PortScan, input: None });

        let ports = Cli::parse_from(["netmaster", "ports", "10.0.0.1"]);
        assert_eq!(
            ports.command.action(),
            Action::Probe {
                kind: ProbeKind::PortScan,
                input: Some(ProbeInput::Target("10.0.0.1".to_string())),
            }
        );

        let devices = Cli::parse_from(["netmaster", "devices", "192.168.7"]);
        assert_eq!(
            devices.command.action(),
            Action::Probe {
                kind: ProbeKind::Devices,
                input: Some(ProbeInput::Target("192.168.7".to_string())),
            }
        );
    }

    #[test]
    fn test_ip_arguments_are_parsed() {
        let cli = Cli::parse_from(["netmaster", "locate", "8.8.8.8"]);
        assert_eq!(
            cli.command.action(),
            Action::Probe {
                kind: ProbeKind::Geolocation,
                input: Some(ProbeInput::Ip("8.8.8.8".parse().unwrap())),
            }
        );
        assert!(Cli::try_parse_from(["netmaster", "ip-lookup", "not-an-ip"]).is_err());
    }

    #[test]
    fn test_scan_and_security_actions() {
        assert_eq!(Cli::parse_from(["netmaster", "scan"]).command.action(), Action::FullScan);
        assert_eq!(Cli::parse_from(["netmaster", "security"]).command.action(), Action::Security);
        assert_eq!(
            Cli::parse_from(["netmaster", "dns-info"]).command.action(),
            Action::Probe { kind: ProbeKind::DnsInfo, input: None }
        );
    }

    #[test]
    fn test_duration_parsing() {
        assert_eq!(parse_duration("5"), Ok(5));
        assert_eq!(parse_duration("300"), Ok(300));
        assert!(parse_duration("0").is_err());
        assert!(parse_duration("301").is_err());
        assert!(parse_duration("+5").is_err());
        assert!(parse_duration("0x10").is_err());
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["netmaster"]).is_err());
        assert!(Cli::try_parse_from(["netmaster", "ping"]).is_err());
    }
}
