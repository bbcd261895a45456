//! Throughput and latency against the best-ranked speed-test server
//!
//! Server selection follows the provider's own ranking: the first
//! candidates of the server list are pinged and the lowest latency wins.
//! Download and upload are both measured against that server.

use crate::client::{HttpFetcher, HttpRequest, HttpUtils, NetworkClient};
use crate::error::{AppError, ErrorContext, Result};
use crate::models::{ProbePayload, SpeedTestReport, SpeedTestServer};
use crate::orchestrator::{Probe, ProbeContext};
use crate::types::ProbeKind;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Candidates from the top of the server list that get pinged
const SELECTION_CANDIDATES: usize = 5;
const LATENCY_SAMPLES: usize = 3;
/// Square image sizes fetched as `random{N}x{N}.jpg`
const DOWNLOAD_SIZES: [u32; 4] = [350, 500, 750, 1000];
const UPLOAD_SIZES: [usize; 3] = [256 * 1024, 512 * 1024, 1024 * 1024];

/// Server picked for a run, with its measured round-trip latency
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedServer {
    pub server: SpeedTestServer,
    pub latency_ms: f64,
}

#[async_trait]
pub trait SpeedTestService: Send + Sync {
    async fn select_best_server(&self, ctx: &ProbeContext) -> Result<SelectedServer>;

    /// Download throughput in Mbit/s
    async fn measure_download(&self, ctx: &ProbeContext, server: &SelectedServer) -> Result<f64>;

    /// Upload throughput in Mbit/s
    async fn measure_upload(&self, ctx: &ProbeContext, server: &SelectedServer) -> Result<f64>;

    /// Latency of the server chosen by the last successful selection
    fn last_latency(&self) -> Option<f64>;
}

/// Bits per second over one million
pub fn mbps(bytes: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0) / 1_000_000.0 / seconds
}

/// Entry of the speedtest.net server list
#[derive(Debug, Clone, Deserialize)]
struct ServerEntry {
    url: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    sponsor: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    distance: Option<serde_json::Value>,
}

impl From<ServerEntry> for SpeedTestServer {
    fn from(entry: ServerEntry) -> Self {
        let distance_km = match entry.distance {
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        Self {
            name: entry.name,
            country: entry.country,
            sponsor: entry.sponsor,
            host: entry.host,
            url: entry.url,
            distance_km,
        }
    }
}

/// speedtest.net-compatible servers over HTTP
pub struct HttpSpeedTestService {
    client: NetworkClient,
    servers_url: String,
    last_latency: Mutex<Option<f64>>,
}

impl HttpSpeedTestService {
    pub fn new(client: NetworkClient, servers_url: String) -> Self {
        Self {
            client,
            servers_url,
            last_latency: Mutex::new(None),
        }
    }

    fn remember_latency(&self, latency_ms: Option<f64>) {
        if let Ok(mut slot) = self.last_latency.lock() {
            *slot = latency_ms;
        }
    }

    async fn server_list(&self, ctx: &ProbeContext) -> Result<Vec<SpeedTestServer>> {
        let client = &self.client;
        let url = self.servers_url.as_str();
        let timeout = ctx.policy.http;
        let body = ctx
            .retry("speed test server list", || client.get_json(url, timeout))
            .await?;
        let entries: Vec<ServerEntry> = serde_json::from_value(body)
            .context("Unexpected server list shape")?;
        Ok(entries.into_iter().map(SpeedTestServer::from).collect())
    }

    /// Mean round trip of `latency.txt`, `None` when every sample failed
    async fn latency(&self, ctx: &ProbeContext, server: &SpeedTestServer) -> Option<f64> {
        let url = HttpUtils::sibling_url(&server.url, "latency.txt").ok()?;
        let mut samples = Vec::with_capacity(LATENCY_SAMPLES);
        for _ in 0..LATENCY_SAMPLES {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let request = HttpRequest::get(url.as_str()).with_timeout(ctx.policy.http);
            if let Ok(response) = self.client.execute(request).await {
                if response.is_success() {
                    samples.push(response.elapsed.as_secs_f64() * 1000.0);
                }
            }
        }
        if samples.is_empty() {
            None
        } else {
            Some(samples.iter().sum::<f64>() / samples.len() as f64)
        }
    }

    async fn download_one(&self, url: &str, counter: &AtomicU64) -> Result<()> {
        let response = self.client.inner().get(url).send().await?.error_for_status()?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            counter.fetch_add(chunk?.len() as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn upload_one(&self, url: &str, size: usize, timeout: Duration, counter: &AtomicU64) -> Result<()> {
        let mut body = b"content1=".to_vec();
        body.resize(size, b'0');
        let request = HttpRequest::post(url, body)
            .with_timeout(timeout)
            .with_header("Content-Type", "application/x-www-form-urlencoded");
        self.client.execute(request).await?.error_for_status()?;
        counter.fetch_add(size as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Drive concurrent transfers for at most `window` and turn the byte count into Mbit/s
async fn timed_transfer<F>(ctx: &ProbeContext, window: Duration, counter: &AtomicU64, transfers: F) -> Result<f64>
where
    F: std::future::Future<Output = Vec<Result<()>>>,
{
    let start = Instant::now();
    let outcomes = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(AppError::cancelled("speed test transfer")),
        outcomes = tokio::time::timeout(window, transfers) => outcomes.ok(),
    };
    let elapsed = start.elapsed();
    let bytes = counter.load(Ordering::Relaxed);

    if bytes == 0 {
        let first_error = outcomes.and_then(|results| results.into_iter().find_map(|r| r.err()));
        return Err(first_error.unwrap_or_else(|| {
            AppError::timeout(format!("No data transferred within {}s", window.as_secs()))
        }));
    }
    Ok(mbps(bytes, elapsed))
}

#[async_trait]
impl SpeedTestService for HttpSpeedTestService {
    async fn select_best_server(&self, ctx: &ProbeContext) -> Result<SelectedServer> {
        self.remember_latency(None);
        let servers = self.server_list(ctx).await?;
        if servers.is_empty() {
            return Err(AppError::unavailable("Speed test server list is empty"));
        }
        ctx.checkpoint()?;

        let candidates: Vec<SpeedTestServer> = servers.into_iter().take(SELECTION_CANDIDATES).collect();
        let latencies = futures::future::join_all(candidates.iter().map(|server| self.latency(ctx, server))).await;
        ctx.checkpoint()?;

        let attempted = candidates.len();
        let selected = candidates
            .into_iter()
            .zip(latencies)
            .filter_map(|(server, latency)| latency.map(|latency_ms| SelectedServer { server, latency_ms }))
            .min_by(|a, b| a.latency_ms.total_cmp(&b.latency_ms))
            .ok_or(AppError::ProvidersExhausted { attempted })?;
        self.remember_latency(Some(selected.latency_ms));
        Ok(selected)
    }

    async fn measure_download(&self, ctx: &ProbeContext, server: &SelectedServer) -> Result<f64> {
        let urls = DOWNLOAD_SIZES
            .iter()
            .map(|size| HttpUtils::sibling_url(&server.server.url, &format!("random{0}x{0}.jpg", size)))
            .collect::<Result<Vec<_>>>()?;

        let counter = AtomicU64::new(0);
        let transfers = futures::future::join_all(urls.iter().map(|url| self.download_one(url, &counter)));
        timed_transfer(ctx, ctx.policy.transfer, &counter, transfers).await
    }

    async fn measure_upload(&self, ctx: &ProbeContext, server: &SelectedServer) -> Result<f64> {
        let url = server.server.url.as_str();
        let counter = AtomicU64::new(0);
        let timeout = ctx.policy.transfer;
        let transfers = futures::future::join_all(
            UPLOAD_SIZES
                .iter()
                .map(|&size| self.upload_one(url, size, timeout, &counter)),
        );
        timed_transfer(ctx, timeout, &counter, transfers).await
    }

    fn last_latency(&self) -> Option<f64> {
        self.last_latency.lock().ok().and_then(|slot| *slot)
    }
}

pub struct SpeedTestProbe {
    service: Arc<dyn SpeedTestService>,
}

impl SpeedTestProbe {
    pub fn new(service: Arc<dyn SpeedTestService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Probe for SpeedTestProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::SpeedTest
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<ProbePayload> {
        ctx.checkpoint()?;
        ctx.progress("selecting server");
        let selected = self.service.select_best_server(ctx).await?;
        ctx.logger
            .info(&format!(
                "Selected {} ({}) at {:.1}ms",
                selected.server.name, selected.server.sponsor, selected.latency_ms
            ))
            .correlation_id(&ctx.correlation_id)
            .field("host", &selected.server.host)
            .log()
            .await;

        ctx.checkpoint()?;
        ctx.progress("testing download");
        let download_mbps = self.service.measure_download(ctx, &selected).await?;

        ctx.checkpoint()?;
        ctx.progress("testing upload");
        let upload_mbps = self.service.measure_upload(ctx, &selected).await?;

        ctx.progress("done");
        Ok(ProbePayload::SpeedTest(SpeedTestReport {
            server: selected.server,
            download_mbps,
            upload_mbps,
            ping_ms: self.service.last_latency().unwrap_or(selected.latency_ms),
        }))
    }
}
