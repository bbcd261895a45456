//! Sequential TCP connect scan over a fixed port list

use crate::error::{AppError, DnsFailure, Result};
use crate::models::{PortScanReport, PortStatus, ProbePayload};
use crate::orchestrator::{Probe, ProbeContext};
use crate::types::{ProbeInput, ProbeKind};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Result of one connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectOutcome {
    Connected,
    Refused,
    TimedOut,
    Unreachable,
}

impl ConnectOutcome {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectOutcome::Connected)
    }
}

impl fmt::Display for ConnectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectOutcome::Connected => "connected",
            ConnectOutcome::Refused => "refused",
            ConnectOutcome::TimedOut => "timed out",
            ConnectOutcome::Unreachable => "unreachable",
        };
        write!(f, "{}", text)
    }
}

#[async_trait]
pub trait TcpConnector: Send + Sync {
    async fn connect(&self, host: IpAddr, port: u16, timeout: Duration) -> ConnectOutcome;
}

/// Plain tokio TCP connects
pub struct TokioConnector;

#[async_trait]
impl TcpConnector for TokioConnector {
    async fn connect(&self, host: IpAddr, port: u16, timeout: Duration) -> ConnectOutcome {
        match tokio::time::timeout(timeout, TcpStream::connect(SocketAddr::new(host, port))).await {
            Ok(Ok(_stream)) => ConnectOutcome::Connected,
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => ConnectOutcome::Refused,
            Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => ConnectOutcome::TimedOut,
            Ok(Err(_)) => ConnectOutcome::Unreachable,
            Err(_) => ConnectOutcome::TimedOut,
        }
    }
}

/// Well-known service behind a scanned port
pub fn service_name(port: u16) -> &'static str {
    match port {
        21 => "FTP",
        22 => "SSH",
        23 => "Telnet",
        25 => "SMTP",
        53 => "DNS",
        80 => "HTTP",
        110 => "POP3",
        143 => "IMAP",
        443 => "HTTPS",
        3306 => "MySQL",
        3389 => "RDP",
        _ => "Unknown",
    }
}

/// Resolve a scan target to one address
///
/// IP literals are returned as is. Names go through the system resolver
/// and must answer within `timeout`.
pub async fn resolve_target(target: &str, timeout: Duration) -> Result<IpAddr> {
    let target = target.trim();
    if target.is_empty() {
        return Err(AppError::validation("Scan target is empty"));
    }
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::time::timeout(timeout, tokio::net::lookup_host((target, 0)))
        .await
        .map_err(|_| {
            AppError::dns(
                DnsFailure::Timeout,
                format!("{} did not resolve within {}ms", target, timeout.as_millis()),
            )
        })?
        .map_err(|e| AppError::dns(DnsFailure::NotFound, format!("Cannot resolve {}: {}", target, e)))?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| AppError::dns(DnsFailure::NotFound, format!("{} has no addresses", target)))
}

pub struct PortScanProbe {
    connector: Arc<dyn TcpConnector>,
    ports: Vec<u16>,
}

impl PortScanProbe {
    /// Scanner over the default port list
    pub fn new(connector: Arc<dyn TcpConnector>) -> Self {
        Self::with_ports(connector, crate::defaults::DEFAULT_SCAN_PORTS.to_vec())
    }

    pub fn with_ports(connector: Arc<dyn TcpConnector>, ports: Vec<u16>) -> Self {
        Self { connector, ports }
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Connect to each port in list order, one socket at a time
    pub async fn scan(&self, ctx: &ProbeContext, target: &str) -> Result<PortScanReport> {
        let host = resolve_target(target, ctx.policy.dns).await?;
        let mut ports = Vec::with_capacity(self.ports.len());

        for &port in &self.ports {
            ctx.checkpoint()?;
            let outcome = self.connector.connect(host, port, ctx.policy.connect).await;
            ctx.logger
                .debug(&format!("{}:{} {}", host, port, outcome))
                .correlation_id(&ctx.correlation_id)
                .field("port", port)
                .log()
                .await;
            ports.push(PortStatus {
                port,
                open: outcome.is_open(),
                service: service_name(port).to_string(),
            });
        }

        Ok(PortScanReport {
            target: target.to_string(),
            ports,
        })
    }
}

#[async_trait]
impl Probe for PortScanProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::PortScan
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<ProbePayload> {
        let target = match &ctx.input {
            ProbeInput::Target(target) => target.clone(),
            ProbeInput::Ip(ip) => ip.to_string(),
            other => return Err(AppError::validation(format!("Port scan needs a target, got {:?}", other))),
        };
        ctx.progress("scanning ports");
        Ok(ProbePayload::PortScan(self.scan(ctx, &target).await?))
    }
}
