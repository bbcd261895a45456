//! System `ping` wrapper

use crate::error::{AppError, ErrorContext, Result};
use crate::models::{PingReport, ProbePayload};
use crate::orchestrator::{Probe, ProbeContext};
use crate::types::{ProbeInput, ProbeKind};
use async_trait::async_trait;
use regex::Regex;
use std::process::Stdio;
use std::sync::OnceLock;

/// Arguments for `count` echoes, `-n` on Windows and `-c` elsewhere
pub fn ping_args(target: &str, count: u32) -> Vec<String> {
    let flag = if cfg!(windows) { "-n" } else { "-c" };
    vec![flag.to_string(), count.to_string(), target.to_string()]
}

/// Hostnames and IP literals only; nothing that `ping` could read as an option
pub fn validate_target(target: &str) -> Result<()> {
    let valid = !target.is_empty()
        && !target.starts_with('-')
        && target.len() <= 253
        && target
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '-' | '_' | '%'));
    if valid {
        Ok(())
    } else {
        Err(AppError::validation(format!("Invalid ping target '{}'", target)))
    }
}

struct PingPatterns {
    unix_counts: Regex,
    unix_rtt: Regex,
    windows_counts: Regex,
    windows_rtt: Regex,
}

fn patterns() -> Option<&'static PingPatterns> {
    static PATTERNS: OnceLock<Option<PingPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(PingPatterns {
                unix_counts: Regex::new(r"(\d+) packets transmitted, (\d+) (?:packets )?received").ok()?,
                unix_rtt: Regex::new(r"= [\d.]+/([\d.]+)/").ok()?,
                windows_counts: Regex::new(r"Sent = (\d+), Received = (\d+)").ok()?,
                windows_rtt: Regex::new(r"Average = (\d+)ms").ok()?,
            })
        })
        .as_ref()
}

/// Summary figures from either the Unix or the Windows `ping` layout
pub fn parse_ping_output(target: &str, output: &str) -> PingReport {
    let mut transmitted = 0;
    let mut received = 0;
    let mut avg_rtt_ms = None;

    if let Some(p) = patterns() {
        let counts = p.unix_counts.captures(output).or_else(|| p.windows_counts.captures(output));
        if let Some(c) = counts {
            transmitted = c[1].parse().unwrap_or(0);
            received = c[2].parse().unwrap_or(0);
        }
        let rtt = p.unix_rtt.captures(output).or_else(|| p.windows_rtt.captures(output));
        avg_rtt_ms = rtt.and_then(|c| c[1].parse::<f64>().ok());
    }

    let packet_loss_percent = if transmitted == 0 {
        100.0
    } else {
        f64::from(transmitted - received.min(transmitted)) * 100.0 / f64::from(transmitted)
    };

    PingReport {
        target: target.to_string(),
        transmitted,
        received,
        packet_loss_percent,
        avg_rtt_ms,
        success: received > 0,
        output: output.to_string(),
    }
}

pub struct PingProbe {
    count: u32,
}

impl PingProbe {
    pub fn new() -> Self {
        Self {
            count: crate::defaults::DEFAULT_PING_COUNT,
        }
    }

    pub fn with_count(count: u32) -> Self {
        Self { count: count.max(1) }
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for PingProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Ping
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<ProbePayload> {
        let target = match &ctx.input {
            ProbeInput::Target(target) => target.trim().to_string(),
            ProbeInput::Ip(ip) => ip.to_string(),
            other => return Err(AppError::validation(format!("Ping needs a target, got {:?}", other))),
        };
        validate_target(&target)?;
        ctx.checkpoint()?;

        let mut command = tokio::process::Command::new("ping");
        command
            .args(ping_args(&target, self.count))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        let child = command.output();

        let output = ctx
            .guarded(async {
                match tokio::time::timeout(ctx.policy.ping, child).await {
                    Ok(result) => result.context("Cannot run ping"),
                    Err(_) => Err(AppError::timeout(format!(
                        "ping {} did not finish within {}s",
                        target,
                        ctx.policy.ping.as_secs()
                    ))),
                }
            })
            .await?;

        // an unreachable host is a result, not a probe failure
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.stderr.is_empty() {
            text.push_str(&String::from_utf8_lossy(&output.stderr));
        }
        Ok(ProbePayload::Ping(parse_ping_output(&target, &text)))
    }
}
