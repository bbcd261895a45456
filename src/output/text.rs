//! Terminal formatter with optional ANSI colors

use super::OutputFormatter;
use crate::{
    error::{AppError, Result},
    models::{
        DeviceReport, DnsLeakReport, GeolocationReport, IpInfo, IpLookupReport, NetworkInfo, PingReport,
        PortScanReport, ProbePayload, ProbeResult, PublicIpInfo, SpeedTestReport,
    },
    orchestrator::{ProbeEvent, ScanReport},
    security::SecuritySummary,
    types::{ProbeStatus, ScanState},
};
use colored::*;
use std::fmt::Write as _;

/// Color scheme configuration
#[derive(Debug, Clone)]
pub struct ColorScheme {
    pub header: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    pub info: Color,
    pub muted: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            header: Color::Blue,
            success: Color::Green,
            warning: Color::Yellow,
            error: Color::Red,
            info: Color::Cyan,
            muted: Color::BrightBlack,
        }
    }
}

/// Human-readable report lines, colored when enabled
pub struct TextFormatter {
    enable_color: bool,
    verbose: bool,
    color_scheme: ColorScheme,
}

fn fmt_err(e: std::fmt::Error) -> AppError {
    AppError::internal(format!("Failed to format output: {}", e))
}

fn or_dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("-")
}

impl TextFormatter {
    pub fn new(enable_color: bool, verbose: bool) -> Self {
        Self {
            enable_color,
            verbose,
            color_scheme: ColorScheme::default(),
        }
    }

    pub fn with_color_scheme(mut self, color_scheme: ColorScheme) -> Self {
        self.color_scheme = color_scheme;
        self
    }

    fn colorize(&self, text: &str, color: Color) -> ColoredString {
        if self.enable_color {
            text.color(color)
        } else {
            text.normal()
        }
    }

    fn bold(&self, text: &str) -> ColoredString {
        if self.enable_color {
            text.bold()
        } else {
            text.normal()
        }
    }

    fn section_header(&self, title: &str) -> String {
        if self.enable_color {
            title.bold().color(self.color_scheme.header).to_string()
        } else {
            format!("== {} ==", title)
        }
    }

    fn status_mark(&self, status: ProbeStatus) -> ColoredString {
        match status {
            ProbeStatus::Success => self.colorize("✓", self.color_scheme.success),
            ProbeStatus::Failed => self.colorize("✗", self.color_scheme.error),
            ProbeStatus::Running => self.colorize("…", self.color_scheme.info),
            ProbeStatus::Pending => self.colorize("·", self.color_scheme.muted),
        }
    }

    fn network_info(&self, out: &mut String, info: &NetworkInfo) -> std::fmt::Result {
        writeln!(out, "  Hostname:     {}", info.hostname)?;
        writeln!(
            out,
            "  Local IP:     {}",
            info.local_ip.map(|ip| ip.to_string()).unwrap_or_else(|| "-".to_string())
        )?;
        writeln!(out, "  MAC address:  {}", or_dash(info.mac_address.as_deref()))?;
        writeln!(out, "  Connection:   {}", info.connection_type)?;
        if info.link_speed_mbps > 0 {
            writeln!(out, "  Link speed:   {} Mbit/s", info.link_speed_mbps)?;
        } else {
            writeln!(out, "  Link speed:   unknown")?;
        }
        if self.verbose {
            for interface in &info.interfaces {
                let ips: Vec<String> = interface.ips.iter().map(|ip| ip.to_string()).collect();
                writeln!(
                    out,
                    "    {:<12} {:<5} {}",
                    interface.name,
                    if interface.is_up { "up" } else { "down" },
                    self.colorize(&ips.join(", "), self.color_scheme.muted)
                )?;
            }
        }
        Ok(())
    }

    fn ip_info(&self, out: &mut String, info: &IpInfo) -> std::fmt::Result {
        let place: Vec<&str> = [info.city.as_deref(), info.region.as_deref(), info.country_display()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect();
        if !place.is_empty() {
            writeln!(out, "  Location:     {}", place.join(", "))?;
        }
        if let Some(org) = info.org.as_deref() {
            writeln!(out, "  Organization: {}", org)?;
        }
        if let Some(timezone) = info.timezone.as_deref() {
            writeln!(out, "  Timezone:     {}", timezone)?;
        }
        Ok(())
    }

    fn public_ip(&self, out: &mut String, public: &PublicIpInfo) -> std::fmt::Result {
        writeln!(
            out,
            "  IP address:   {}",
            self.bold(or_dash(public.info.ip.as_deref()))
        )?;
        self.ip_info(out, &public.info)?;
        writeln!(out, "  Provider:     {}", self.colorize(&public.provider, self.color_scheme.muted))
    }

    fn dns_leak(&self, out: &mut String, report: &DnsLeakReport) -> std::fmt::Result {
        for outcome in &report.outcomes {
            match (&outcome.ip, &outcome.error) {
                (Some(ip), _) => writeln!(out, "  {:<32} {}", outcome.endpoint, ip)?,
                (None, Some(error)) => writeln!(
                    out,
                    "  {:<32} {}",
                    outcome.endpoint,
                    self.colorize(&error.message, self.color_scheme.error)
                )?,
                (None, None) => writeln!(out, "  {:<32} -", outcome.endpoint)?,
            }
        }
        if report.consistent {
            writeln!(out, "  {}", self.colorize("All endpoints agree", self.color_scheme.success))
        } else {
            writeln!(
                out,
                "  {} {}",
                self.colorize("Endpoints disagree:", self.color_scheme.warning),
                report.distinct_ips.join(", ")
            )
        }
    }

    fn port_scan(&self, out: &mut String, report: &PortScanReport) -> std::fmt::Result {
        writeln!(out, "  Target: {}", report.target)?;
        for port in &report.ports {
            let state = if port.open {
                self.colorize("open", self.color_scheme.warning)
            } else {
                self.colorize("closed", self.color_scheme.muted)
            };
            writeln!(out, "  {:>5}  {:<12} {}", port.port, port.service, state)?;
        }
        Ok(())
    }

    fn speed_test(&self, out: &mut String, report: &SpeedTestReport) -> std::fmt::Result {
        let server = &report.server;
        writeln!(out, "  Server:       {} ({})", server.name, server.country)?;
        if !server.sponsor.is_empty() {
            writeln!(out, "  Sponsor:      {}", server.sponsor)?;
        }
        if let Some(distance) = server.distance_km {
            writeln!(out, "  Distance:     {:.0} km", distance)?;
        }
        writeln!(out, "  Latency:      {:.1} ms", report.ping_ms)?;
        writeln!(out, "  Download:     {}", self.bold(&format!("{:.2} Mbit/s", report.download_mbps)))?;
        writeln!(out, "  Upload:       {}", self.bold(&format!("{:.2} Mbit/s", report.upload_mbps)))
    }

    fn geolocation(&self, out: &mut String, report: &GeolocationReport) -> std::fmt::Result {
        let location = &report.location;
        writeln!(out, "  IP address:   {}", location.ip)?;
        writeln!(out, "  Coordinates:  {:.4}, {:.4}", location.latitude, location.longitude)?;
        for key in ["city", "region", "country", "org", "timezone"] {
            if let Some(value) = location.metadata.get(key).and_then(|v| v.as_str()) {
                writeln!(out, "  {:<13} {}", format!("{}:", key), value)?;
            }
        }
        match &report.map_artifact {
            Some(path) => writeln!(out, "  Map page:     {}", path.display()),
            None => writeln!(out, "  Map page:     not written"),
        }
    }

    fn ip_lookup(&self, out: &mut String, report: &IpLookupReport) -> std::fmt::Result {
        writeln!(out, "  IP address:   {}", report.ip)?;
        for outcome in &report.outcomes {
            writeln!(out, "  {}", self.colorize(&outcome.provider, self.color_scheme.info))?;
            match (&outcome.info, &outcome.error) {
                (Some(info), _) => self.ip_info(out, info)?,
                (None, Some(error)) => {
                    writeln!(out, "    {}", self.colorize(&error.message, self.color_scheme.error))?
                }
                (None, None) => writeln!(out, "    no data")?,
            }
        }
        Ok(())
    }

    fn devices(&self, out: &mut String, report: &DeviceReport) -> std::fmt::Result {
        writeln!(
            out,
            "  Subnet {}.0/24 ({}), {} device(s)",
            report.subnet_prefix,
            report.strategy,
            report.devices.len()
        )?;
        for device in &report.devices {
            writeln!(
                out,
                "  {:<16} {:<18} {:<28} {}",
                device.ip,
                or_dash(device.mac_address.as_deref()),
                or_dash(device.hostname.as_deref()),
                self.colorize(or_dash(device.vendor.as_deref()), self.color_scheme.muted)
            )?;
        }
        Ok(())
    }

    fn ping(&self, out: &mut String, report: &PingReport) -> std::fmt::Result {
        writeln!(out, "  Target:       {}", report.target)?;
        writeln!(
            out,
            "  Packets:      {} sent, {} received, {:.1}% loss",
            report.transmitted, report.received, report.packet_loss_percent
        )?;
        match report.avg_rtt_ms {
            Some(rtt) => writeln!(out, "  Average RTT:  {:.2} ms", rtt)?,
            None => writeln!(out, "  Average RTT:  -")?,
        }
        if !report.success {
            writeln!(out, "  {}", self.colorize("Host did not answer", self.color_scheme.warning))?;
        }
        if self.verbose && !report.output.is_empty() {
            writeln!(out, "{}", self.colorize(report.output.trim_end(), self.color_scheme.muted))?;
        }
        Ok(())
    }

    fn payload(&self, out: &mut String, payload: &ProbePayload) -> std::fmt::Result {
        match payload {
            ProbePayload::NetworkInfo(info) => self.network_info(out, info),
            ProbePayload::PublicIp(public) => self.public_ip(out, public),
            ProbePayload::DnsInfo(info) => {
                writeln!(out, "  Name servers: {}", info.nameservers.join(", "))?;
                writeln!(out, "  {} -> {}", info.test_domain, or_dash(info.a_record.as_deref()))
            }
            ProbePayload::DnsLookup(records) => {
                writeln!(out, "  {} {}", records.domain, records.record_type)?;
                for value in &records.values {
                    writeln!(out, "    {}", value)?;
                }
                Ok(())
            }
            ProbePayload::DnsLeak(report) => self.dns_leak(out, report),
            ProbePayload::PortScan(report) => self.port_scan(out, report),
            ProbePayload::SpeedTest(report) => self.speed_test(out, report),
            ProbePayload::Geolocation(report) => self.geolocation(out, report),
            ProbePayload::IpLookup(report) => self.ip_lookup(out, report),
            ProbePayload::Devices(report) => self.devices(out, report),
            ProbePayload::Ping(report) => self.ping(out, report),
        }
    }

    fn write_result(&self, out: &mut String, result: &ProbeResult) -> std::fmt::Result {
        writeln!(
            out,
            "{} {}",
            self.status_mark(result.status),
            self.section_header(result.kind.label())
        )?;
        match (&result.payload, &result.error) {
            (Some(payload), _) => self.payload(out, payload),
            (None, Some(error)) => writeln!(
                out,
                "  {} {}",
                self.colorize(&format!("[{:?}]", error.class), self.color_scheme.error),
                error.message
            ),
            (None, None) => writeln!(out, "  {}", self.colorize(&result.status.to_string(), self.color_scheme.muted)),
        }
    }
}

impl OutputFormatter for TextFormatter {
    fn format_result(&self, result: &ProbeResult) -> Result<String> {
        let mut output = String::new();
        self.write_result(&mut output, result).map_err(fmt_err)?;
        Ok(output)
    }

    fn format_scan_report(&self, report: &ScanReport) -> Result<String> {
        let mut output = String::new();
        for result in &report.results {
            self.write_result(&mut output, result).map_err(fmt_err)?;
            output.push('\n');
        }
        let state = match &report.state {
            ScanState::AllDone => self.colorize("all probes succeeded", self.color_scheme.success),
            other => self.colorize(&other.to_string(), self.color_scheme.warning),
        };
        writeln!(output, "Scan {}: {}", report.scan_id, state).map_err(fmt_err)?;
        Ok(output)
    }

    fn format_security(&self, summary: &SecuritySummary) -> Result<String> {
        let mut out = String::new();
        let write = |out: &mut String| -> std::fmt::Result {
            writeln!(out, "{}", self.section_header("Security summary"))?;
            writeln!(out, "  Connection:   {}", or_dash(summary.connection_type.as_deref()))?;
            writeln!(out, "  Local IP:     {}", or_dash(summary.local_ip.as_deref()))?;
            writeln!(out, "  MAC address:  {}", or_dash(summary.mac_address.as_deref()))?;
            if !summary.dns_servers.is_empty() {
                writeln!(out, "  DNS servers:  {}", summary.dns_servers.join(", "))?;
            }
            if let Some(target) = &summary.scanned_target {
                let open: Vec<String> = summary.open_ports.iter().map(|p| p.port.to_string()).collect();
                writeln!(
                    out,
                    "  Open ports on {}: {}",
                    target,
                    if open.is_empty() { "none".to_string() } else { open.join(", ") }
                )?;
            }
            let heading = if summary.is_clean() {
                self.colorize("Findings", self.color_scheme.success)
            } else {
                self.colorize("Findings", self.color_scheme.warning)
            };
            writeln!(out, "  {}", heading)?;
            for finding in &summary.findings {
                writeln!(out, "    - {}", finding)?;
            }
            Ok(())
        };
        write(&mut out).map_err(fmt_err)?;
        Ok(out)
    }

    fn format_event(&self, event: &ProbeEvent) -> Option<String> {
        let line = match event {
            ProbeEvent::ScanStarted { scan_id } => {
                format!("{} {}", self.bold("Scan started"), self.colorize(scan_id, self.color_scheme.muted))
            }
            ProbeEvent::ProbeStarted { kind } => {
                format!("{} {}...", self.colorize("→", self.color_scheme.info), kind.label())
            }
            ProbeEvent::ProbeProgress { kind, phase } => {
                format!("  {}: {}", kind.label(), self.colorize(phase, self.color_scheme.muted))
            }
            ProbeEvent::ProbeFinished { kind, status, .. } => {
                format!("{} {} {}", self.status_mark(*status), kind.label(), status)
            }
            ProbeEvent::ScanFinished { state, .. } => format!("{} {}", self.bold("Scan finished:"), state),
        };
        Some(line)
    }
}
