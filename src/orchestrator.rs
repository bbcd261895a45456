//! Probe scheduling, isolation and the full-scan state machine
//!
//! Every probe invocation runs as its own task, writes a `Running` entry
//! into the [`ResultStore`], and ends with exactly one terminal entry
//! (`Success` or a classified `Failed`). Panics, deadline expiry and
//! cancellation are all turned into `Failed` results here, so nothing
//! escapes past this module.
//!
//! A full scan runs network info, DNS info, the speed test and device
//! discovery concurrently. Public IP and then geolocation run in their own
//! task, since geolocation needs the resolved address.

use crate::client::{HttpFetcher, NetworkClient};
use crate::discovery::DeviceDiscoveryProbe;
use crate::dns::{DnsInfoProbe, DnsLeakProbe, DnsLookupProbe, TrustDnsBackend};
use crate::error::{retry_with_backoff, AppError, Result, RetryPolicy};
use crate::geo::{GeolocationProbe, IpLookupProbe, LeafletMapRenderer};
use crate::logging::{Logger, ProbeLogger};
use crate::models::{Config, ProbePayload, ProbeResult};
use crate::netinfo::NetworkInfoProbe;
use crate::ping::PingProbe;
use crate::portscan::{PortScanProbe, TokioConnector};
use crate::providers::{FallbackProviderChain, PublicIpProbe};
use crate::speedtest::{HttpSpeedTestService, SpeedTestProbe};
use crate::store::ResultStore;
use crate::types::{ProbeInput, ProbeKind, ProbeStatus, RecordType, ScanState, TimeoutPolicy};
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One self-contained diagnostic operation
#[async_trait]
pub trait Probe: Send + Sync {
    fn kind(&self) -> ProbeKind;

    async fn run(&self, ctx: &ProbeContext) -> Result<ProbePayload>;
}

/// Notifications for the presentation layer; the store stays the source of truth
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ProbeEvent {
    ScanStarted { scan_id: String },
    ProbeStarted { kind: ProbeKind },
    ProbeProgress { kind: ProbeKind, phase: String },
    ProbeFinished { kind: ProbeKind, status: ProbeStatus, version: u64 },
    ScanFinished { scan_id: String, state: ScanState },
}

/// Everything a probe invocation may use
#[derive(Clone)]
pub struct ProbeContext {
    pub kind: ProbeKind,
    pub input: ProbeInput,
    pub cancel: CancellationToken,
    pub policy: TimeoutPolicy,
    pub retry: RetryPolicy,
    pub logger: Logger,
    pub correlation_id: String,
    events: Option<UnboundedSender<ProbeEvent>>,
}

impl ProbeContext {
    /// Standalone context with default policies
    pub fn new(kind: ProbeKind, input: ProbeInput) -> Self {
        Self {
            kind,
            input,
            cancel: CancellationToken::new(),
            policy: TimeoutPolicy::default(),
            retry: RetryPolicy::default(),
            logger: Logger::with_config(kind.as_str().to_uppercase(), &Config::default()),
            correlation_id: Uuid::new_v4().to_string(),
            events: None,
        }
    }

    pub fn with_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fail fast once the invocation has been cancelled
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(AppError::cancelled(format!("{} cancelled", self.kind)))
        } else {
            Ok(())
        }
    }

    /// Report a named phase to event consumers
    pub fn progress(&self, phase: &str) {
        if let Some(events) = &self.events {
            let _ = events.send(ProbeEvent::ProbeProgress {
                kind: self.kind,
                phase: phase.to_string(),
            });
        }
    }

    /// Run `operation` under the retry policy and this invocation's token
    pub async fn retry<T, F, Fut>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_with_backoff(&self.retry, &self.cancel, &self.logger, operation_name, operation).await
    }

    /// Race `future` against cancellation
    pub async fn guarded<T, Fut>(&self, future: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(AppError::cancelled(format!("{} cancelled", self.kind))),
            result = future => result,
        }
    }
}

/// Outcome of one full scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_id: String,
    pub state: ScanState,
    pub results: Vec<ProbeResult>,
}

struct OrchestratorInner {
    store: ResultStore,
    probes: HashMap<ProbeKind, Arc<dyn Probe>>,
    config: Config,
    policy: TimeoutPolicy,
    retry: RetryPolicy,
    logger: ProbeLogger,
    events: Option<UnboundedSender<ProbeEvent>>,
    scan_state: Mutex<ScanState>,
    scan_token: Mutex<Option<CancellationToken>>,
}

/// Schedules probes and owns the single-flight guard for full scans
#[derive(Clone)]
pub struct ProbeOrchestrator {
    inner: Arc<OrchestratorInner>,
}

/// Builder for [`ProbeOrchestrator`]
pub struct OrchestratorBuilder {
    config: Config,
    store: ResultStore,
    probes: HashMap<ProbeKind, Arc<dyn Probe>>,
    logger: Logger,
    events: Option<UnboundedSender<ProbeEvent>>,
}

impl OrchestratorBuilder {
    pub fn store(mut self, store: ResultStore) -> Self {
        self.store = store;
        self
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn events(mut self, sender: UnboundedSender<ProbeEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Register or replace the probe for its kind
    pub fn probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probes.insert(probe.kind(), probe);
        self
    }

    pub fn build(self) -> ProbeOrchestrator {
        ProbeOrchestrator {
            inner: Arc::new(OrchestratorInner {
                store: self.store,
                probes: self.probes,
                policy: self.config.timeout_policy(),
                retry: self.config.retry_policy(),
                config: self.config,
                logger: ProbeLogger::new(self.logger.named("ORCH")),
                events: self.events,
                scan_state: Mutex::new(ScanState::Idle),
                scan_token: Mutex::new(None),
            }),
        }
    }
}

impl ProbeOrchestrator {
    /// Empty orchestrator; probes are registered on the builder
    pub fn builder(config: Config) -> OrchestratorBuilder {
        let logger = Logger::with_config("ORCH".to_string(), &config);
        OrchestratorBuilder {
            config,
            store: ResultStore::new(),
            probes: HashMap::new(),
            logger,
            events: None,
        }
    }

    /// Orchestrator with every real probe wired from configuration
    pub fn from_config(
        config: Config,
        store: ResultStore,
        logger: Logger,
        events: Option<UnboundedSender<ProbeEvent>>,
    ) -> Result<Self> {
        let policy = config.timeout_policy();
        let client = NetworkClient::new()?.with_logger(ProbeLogger::new(logger.named("HTTP")));
        let fetcher: Arc<dyn HttpFetcher> = Arc::new(client.clone());
        let dns_backend = Arc::new(TrustDnsBackend::from_system(policy.dns));

        let chain = FallbackProviderChain::new(config.ip_provider_endpoints(), fetcher.clone(), logger.named("CHAIN"));

        let mut builder = Self::builder(config.clone())
            .store(store)
            .logger(logger)
            .probe(Arc::new(NetworkInfoProbe::new()))
            .probe(Arc::new(PublicIpProbe::new(chain)))
            .probe(Arc::new(DnsInfoProbe::new(dns_backend.clone(), config.dns_test_domain.clone())))
            .probe(Arc::new(DnsLookupProbe::new(dns_backend.clone())))
            .probe(Arc::new(DnsLeakProbe::new(fetcher.clone(), config.leak_endpoints.clone())))
            .probe(Arc::new(PortScanProbe::new(Arc::new(TokioConnector))))
            .probe(Arc::new(SpeedTestProbe::new(Arc::new(HttpSpeedTestService::new(
                client,
                config.speedtest_servers_url.clone(),
            )))))
            .probe(Arc::new(GeolocationProbe::new(
                fetcher.clone(),
                config.geo_provider_url.clone(),
                Arc::new(LeafletMapRenderer::new(config.map_path())),
            )))
            .probe(Arc::new(IpLookupProbe::new(fetcher, config.lookup_providers.clone())))
            .probe(Arc::new(DeviceDiscoveryProbe::from_strategy(
                config.discovery_strategy,
                dns_backend,
            )))
            .probe(Arc::new(PingProbe::new()));

        if let Some(sender) = events {
            builder = builder.events(sender);
        }

        Ok(builder.build())
    }

    pub fn store(&self) -> &ResultStore {
        &self.inner.store
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn scan_state(&self) -> ScanState {
        match self.inner.scan_state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Cancel the running full scan, if any
    pub fn cancel_scan(&self) -> bool {
        let token = match self.inner.scan_token.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run one probe with inputs derived from configuration and the store
    pub async fn run_probe(&self, kind: ProbeKind) -> ProbeResult {
        self.run_probe_with_token(kind, CancellationToken::new()).await
    }

    /// [`run_probe`](Self::run_probe) that the caller can cancel through `cancel`
    pub async fn run_probe_with_token(&self, kind: ProbeKind, cancel: CancellationToken) -> ProbeResult {
        match self.default_input(kind).await {
            Ok(input) => self.execute(kind, input, cancel).await,
            Err(error) => self.record_failure(kind, &error).await,
        }
    }

    /// Run one probe with an explicit input
    pub async fn run_request(&self, kind: ProbeKind, input: ProbeInput) -> ProbeResult {
        self.run_request_with_token(kind, input, CancellationToken::new()).await
    }

    /// Run one probe that the caller can cancel through `cancel`
    pub async fn run_request_with_token(
        &self,
        kind: ProbeKind,
        input: ProbeInput,
        cancel: CancellationToken,
    ) -> ProbeResult {
        self.execute(kind, input, cancel).await
    }

    /// Run the full scan; rejected while another one is running
    ///
    /// The scan itself runs in a spawned task. Dropping the returned future
    /// cancels it, and the task still records a terminal entry for every
    /// kind before it releases the single-flight guard.
    pub async fn run_full_scan(&self) -> Result<ScanReport> {
        let scan_id = Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        {
            let mut state = self
                .inner
                .scan_state
                .lock()
                .map_err(|_| AppError::internal("scan state lock poisoned"))?;
            if state.is_running() {
                return Err(AppError::ScanInProgress);
            }
            *state = ScanState::Running { scan_id: scan_id.clone() };
        }
        let guard = ScanGuard::new(self.inner.clone(), token.clone());

        let scan = tokio::spawn(self.clone().scan_task(scan_id, token.clone(), guard));
        let cancel_on_drop = token.drop_guard();
        let joined = scan.await;
        cancel_on_drop.disarm();

        joined.map_err(|join_error| AppError::internal(format!("Full scan task failed: {}", join_error)))
    }

    async fn scan_task(self, scan_id: String, token: CancellationToken, mut guard: ScanGuard) -> ScanReport {
        self.emit(ProbeEvent::ScanStarted { scan_id: scan_id.clone() });
        self.inner
            .logger
            .logger()
            .info("Full scan started")
            .correlation_id(&scan_id)
            .log()
            .await;

        let mut tasks: JoinSet<Vec<ProbeResult>> = JoinSet::new();
        for kind in [
            ProbeKind::NetworkInfo,
            ProbeKind::DnsInfo,
            ProbeKind::SpeedTest,
            ProbeKind::Devices,
        ] {
            let this = self.clone();
            let child = token.child_token();
            tasks.spawn(async move { vec![this.execute(kind, ProbeInput::None, child).await] });
        }

        {
            let this = self.clone();
            let child = token.child_token();
            tasks.spawn(async move {
                let public_ip = this.execute(ProbeKind::PublicIp, ProbeInput::None, child.child_token()).await;
                let geolocation = match public_ip_of(&public_ip) {
                    Some(ip) => this.execute(ProbeKind::Geolocation, ProbeInput::Ip(ip), child).await,
                    None => {
                        let error = AppError::unavailable("public IP unavailable");
                        this.record_failure(ProbeKind::Geolocation, &error).await
                    }
                };
                vec![public_ip, geolocation]
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(batch) => results.extend(batch),
                Err(join_error) => {
                    // probe panics are caught inside execute; this is the task itself
                    crate::log_error!(self.inner.logger.logger(), "Scan task aborted: {}", join_error);
                }
            }
        }

        // kinds whose task died never wrote a terminal entry
        for kind in ProbeKind::FULL_SCAN {
            if !results.iter().any(|r| r.kind == kind) {
                let error = AppError::internal(format!("{} task ended without a result", kind));
                results.push(self.record_failure(kind, &error).await);
            }
        }

        let state = scan_state_of(&results);
        guard.finish(state.clone());

        self.emit(ProbeEvent::ScanFinished {
            scan_id: scan_id.clone(),
            state: state.clone(),
        });
        self.inner
            .logger
            .logger()
            .info(&format!("Full scan finished: {}", state))
            .correlation_id(&scan_id)
            .log()
            .await;

        results.sort_by_key(|r| r.kind);
        ScanReport { scan_id, state, results }
    }

    /// Fail every full-scan kind that has no terminal entry and derive the scan state from the store
    async fn fail_unfinished(&self) -> ScanState {
        let mut results = Vec::new();
        for kind in ProbeKind::FULL_SCAN {
            match self.inner.store.get(kind).await {
                Some(result) if result.status.is_terminal() => results.push(result),
                _ => {
                    let error = AppError::cancelled(format!("{} cancelled with its scan", kind));
                    results.push(self.store_terminal(kind, ProbeResult::failed(kind, &error)).await);
                }
            }
        }
        scan_state_of(&results)
    }

    async fn default_input(&self, kind: ProbeKind) -> Result<ProbeInput> {
        let config = &self.inner.config;
        match kind {
            ProbeKind::PortScan | ProbeKind::Ping => Ok(ProbeInput::Target(config.scan_target.clone())),
            ProbeKind::DnsLookup => Ok(ProbeInput::Domain {
                domain: config.dns_test_domain.clone(),
                record_type: RecordType::A,
            }),
            ProbeKind::Geolocation | ProbeKind::IpLookup => {
                let stored = self.inner.store.get(ProbeKind::PublicIp).await;
                stored
                    .as_ref()
                    .and_then(public_ip_of)
                    .map(ProbeInput::Ip)
                    .ok_or_else(|| AppError::unavailable("public IP unavailable"))
            }
            _ => Ok(ProbeInput::None),
        }
    }

    async fn execute(&self, kind: ProbeKind, input: ProbeInput, cancel: CancellationToken) -> ProbeResult {
        let Some(probe) = self.inner.probes.get(&kind).cloned() else {
            let error = AppError::internal(format!("No probe registered for {}", kind));
            return self.record_failure(kind, &error).await;
        };

        let correlation_id = Uuid::new_v4().to_string();
        if let Err(error) = self.inner.store.set(kind, ProbeResult::running(kind)).await {
            return self.record_failure(kind, &error).await;
        }
        self.emit(ProbeEvent::ProbeStarted { kind });
        self.inner.logger.probe_started(kind, &correlation_id).await;

        let ctx = ProbeContext {
            kind,
            input,
            cancel: cancel.child_token(),
            policy: self.inner.policy.clone(),
            retry: self.inner.retry.clone(),
            logger: self.inner.logger.logger().named(&kind.as_str().to_uppercase()),
            correlation_id: correlation_id.clone(),
            events: self.inner.events.clone(),
        };

        let deadline = self.inner.policy.deadline_for(kind);
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(AppError::cancelled(format!("{} cancelled", kind))),
            finished = tokio::time::timeout(deadline, AssertUnwindSafe(probe.run(&ctx)).catch_unwind()) => {
                match finished {
                    Err(_) => Err(AppError::timeout(format!(
                        "{} exceeded its {}s deadline",
                        kind,
                        deadline.as_secs()
                    ))),
                    Ok(Err(panic)) => Err(AppError::internal(format!(
                        "{} probe panicked: {}",
                        kind,
                        panic_message(panic.as_ref())
                    ))),
                    Ok(Ok(result)) => result,
                }
            }
        };
        // stop anything the probe left behind
        ctx.cancel.cancel();

        let outcome = outcome.and_then(|payload| {
            if payload.kind() == kind {
                Ok(payload)
            } else {
                Err(AppError::internal(format!(
                    "{} probe returned a {} payload",
                    kind,
                    payload.kind()
                )))
            }
        });
        let (result, error) = match outcome {
            Ok(payload) => (ProbeResult::success(payload), None),
            Err(error) => (ProbeResult::failed(kind, &error), Some(error)),
        };

        self.inner
            .logger
            .probe_finished(kind, result.status, started.elapsed(), error.as_ref(), &correlation_id)
            .await;

        self.store_terminal(kind, result).await
    }

    async fn record_failure(&self, kind: ProbeKind, error: &AppError) -> ProbeResult {
        self.inner
            .logger
            .logger()
            .warn(&format!("{} not run: {}", kind, error))
            .field("probe", kind)
            .error_info(error)
            .log()
            .await;
        self.store_terminal(kind, ProbeResult::failed(kind, error)).await
    }

    async fn store_terminal(&self, kind: ProbeKind, mut result: ProbeResult) -> ProbeResult {
        match self.inner.store.set(kind, result.clone()).await {
            Ok(version) => result.version = version,
            Err(error) => {
                self.inner
                    .logger
                    .logger()
                    .error(&format!("Could not store {} result: {}", kind, error))
                    .log()
                    .await;
                result = ProbeResult::failed(kind, &error);
                if let Ok(version) = self.inner.store.set(kind, result.clone()).await {
                    result.version = version;
                }
            }
        }
        self.emit(ProbeEvent::ProbeFinished {
            kind,
            status: result.status,
            version: result.version,
        });
        result
    }

    fn emit(&self, event: ProbeEvent) {
        if let Some(events) = &self.inner.events {
            // a closed receiver only means nobody is listening
            let _ = events.send(event);
        }
    }
}

/// Owns the single-flight slot for the lifetime of one scan task
///
/// If the task dies before `finish`, unfinished kinds are failed and the
/// state is derived from the store before the slot is released.
struct ScanGuard {
    inner: Arc<OrchestratorInner>,
    token: CancellationToken,
    finished: bool,
}

impl ScanGuard {
    fn new(inner: Arc<OrchestratorInner>, token: CancellationToken) -> Self {
        if let Ok(mut slot) = inner.scan_token.lock() {
            *slot = Some(token.clone());
        }
        Self {
            inner,
            token,
            finished: false,
        }
    }

    fn finish(&mut self, state: ScanState) {
        release_scan(&self.inner, state);
        self.finished = true;
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.token.cancel();
        let orchestrator = ProbeOrchestrator {
            inner: self.inner.clone(),
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let state = orchestrator.fail_unfinished().await;
                    release_scan(&orchestrator.inner, state);
                });
            }
            // no runtime left to write with
            Err(_) => release_scan(
                &self.inner,
                ScanState::PartialFailure {
                    failed: ProbeKind::FULL_SCAN.to_vec(),
                },
            ),
        }
    }
}

fn release_scan(inner: &OrchestratorInner, state: ScanState) {
    if let Ok(mut slot) = inner.scan_token.lock() {
        *slot = None;
    }
    match inner.scan_state.lock() {
        Ok(mut current) => *current = state,
        Err(poisoned) => *poisoned.into_inner() = state,
    }
}

fn scan_state_of(results: &[ProbeResult]) -> ScanState {
    let mut failed: Vec<ProbeKind> = results
        .iter()
        .filter(|r| r.status != ProbeStatus::Success)
        .map(|r| r.kind)
        .collect();
    failed.sort();
    failed.dedup();
    if failed.is_empty() {
        ScanState::AllDone
    } else {
        ScanState::PartialFailure { failed }
    }
}

fn public_ip_of(result: &ProbeResult) -> Option<std::net::IpAddr> {
    match &result.payload {
        Some(ProbePayload::PublicIp(info)) if result.is_success() => info.ip_addr(),
        _ => None,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
