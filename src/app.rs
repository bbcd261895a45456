//! Main application orchestration and execution

use crate::{
    cli::{Action, Cli},
    config::{display_config_summary, load_config},
    error::Result,
    logging::{LogFormat, LoggerFactory},
    models::ProbeResult,
    orchestrator::{ProbeEvent, ProbeOrchestrator},
    output::{OutputFormatter, OutputFormatterFactory},
    security::SecuritySummary,
    store::ResultStore,
    types::{ProbeKind, ProbeStatus, ScanState},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Exit code when the command ran but at least one probe failed
pub const EXIT_PROBE_FAILED: i32 = 4;

/// Probes run before the security summary is derived
const SECURITY_PROBES: [ProbeKind; 4] = [
    ProbeKind::NetworkInfo,
    ProbeKind::DnsInfo,
    ProbeKind::PortScan,
    ProbeKind::DnsLeak,
];

/// Main application struct that coordinates all components
pub struct App {
    cli: Cli,
}

impl App {
    /// Create a new application instance with CLI configuration
    pub fn new(cli: Cli) -> Result<Self> {
        Ok(Self { cli })
    }

    /// Run the command and return the process exit code
    pub async fn run(self) -> Result<i32> {
        let config = load_config(self.cli.clone())?;
        if config.debug {
            eprintln!("{} v{}", crate::PKG_NAME, crate::VERSION);
            eprintln!("{}", display_config_summary(&config));
        }

        let mut factory = LoggerFactory::new(config.clone());
        if self.cli.json && !config.debug {
            // keep stderr terse when stdout carries JSON
            factory = factory.with_format(LogFormat::Compact);
        }
        let logger = factory.create_logger("APP").await;
        crate::log_debug!(logger, "Session {} started", factory.session_id());

        let formatter: Arc<dyn OutputFormatter> =
            Arc::from(OutputFormatterFactory::create_formatter(self.cli.json, config.enable_color, config.verbose));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(print_events(events_rx, formatter.clone()));

        let orchestrator = ProbeOrchestrator::from_config(
            config.clone(),
            ResultStore::new(),
            factory.create_logger("ORCHESTRATOR").await,
            Some(events_tx),
        )?;

        let cancel = CancellationToken::new();
        let interrupt = {
            let orchestrator = orchestrator.clone();
            let cancel = cancel.clone();
            let logger = logger.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    crate::log_warn!(logger, "Interrupted, cancelling running probes");
                    cancel.cancel();
                    orchestrator.cancel_scan();
                }
            })
        };

        let action = self.cli.command.action();
        crate::log_info!(logger, "Running {:?}", action);
        let action_name = action.clone();
        let outcome = execute(&orchestrator, action, cancel, formatter.as_ref()).await;

        interrupt.abort();
        let _ = interrupt.await;
        // Dropping the last sender ends the printer
        drop(orchestrator);
        let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

        let (output, succeeded) = match outcome {
            Ok(done) => done,
            Err(error) => {
                crate::log_error!(logger, "{:?} could not run: {}", action_name, error);
                return Err(error);
            }
        };
        if !succeeded {
            crate::log_warn!(logger, "{:?} finished with failed probes", action_name);
        }
        println!("{}", output.trim_end());
        Ok(if succeeded { 0 } else { EXIT_PROBE_FAILED })
    }
}

async fn execute(
    orchestrator: &ProbeOrchestrator,
    action: Action,
    cancel: CancellationToken,
    formatter: &dyn OutputFormatter,
) -> Result<(String, bool)> {
    match action {
        Action::FullScan => {
            let report = orchestrator.run_full_scan().await?;
            let succeeded = report.state == ScanState::AllDone;
            Ok((formatter.format_scan_report(&report)?, succeeded))
        }
        Action::Security => {
            let runs = SECURITY_PROBES
                .iter()
                .map(|kind| orchestrator.run_probe_with_token(*kind, cancel.child_token()));
            let results = futures::future::join_all(runs).await;
            let summary = SecuritySummary::from_snapshot(&orchestrator.store().snapshot().await);
            let succeeded = results.iter().all(ProbeResult::is_success);
            Ok((formatter.format_security(&summary)?, succeeded))
        }
        Action::Probe { kind, input } => {
            let result = match input {
                Some(input) => orchestrator.run_request_with_token(kind, input, cancel).await,
                None => orchestrator.run_probe_with_token(kind, cancel).await,
            };
            // Print what the store holds, not the returned copy
            let stored = orchestrator.store().get(kind).await.unwrap_or(result);
            let succeeded = stored.status == ProbeStatus::Success;
            Ok((formatter.format_result(&stored)?, succeeded))
        }
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<ProbeEvent>, formatter: Arc<dyn OutputFormatter>) {
    while let Some(event) = events.recv().await {
        if let Some(line) = formatter.format_event(&event) {
            eprintln!("{}", line);
        }
    }
}
