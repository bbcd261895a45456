//! Ranked HTTP JSON providers with first-success fallback
//!
//! Endpoints are tried strictly in priority order. A transport error, a
//! non-2xx status or an unparsable body moves on to the next endpoint; the
//! first success ends the chain after its post-success delay. Calls on one
//! chain are serialized, so two successful calls are always at least one
//! post-success delay apart.

use crate::client::HttpFetcher;
use crate::error::{AppError, ErrorContext, Result};
use crate::logging::Logger;
use crate::models::{IpInfo, ProbePayload, PublicIpInfo};
use crate::orchestrator::{Probe, ProbeContext};
use crate::types::ProbeKind;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One redundant data source
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEndpoint {
    pub name: String,
    pub url: String,
    /// Lower is tried first
    pub priority: u32,
    pub per_call_timeout: Duration,
    pub post_success_delay: Duration,
}

impl ProviderEndpoint {
    /// Endpoint named after its host, with default timeout and delay
    pub fn new<S: Into<String>>(url: S, priority: u32) -> Self {
        let url = url.into();
        let name = url::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
            .unwrap_or_else(|| url.clone());
        Self {
            name,
            url,
            priority,
            per_call_timeout: crate::defaults::DEFAULT_HTTP_TIMEOUT,
            post_success_delay: crate::defaults::DEFAULT_API_DELAY,
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = timeout;
        self
    }

    pub fn with_post_success_delay(mut self, delay: Duration) -> Self {
        self.post_success_delay = delay;
        self
    }
}

/// First successful provider answer
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub provider: String,
    pub url: String,
    pub body: serde_json::Value,
}

pub struct FallbackProviderChain {
    endpoints: Vec<ProviderEndpoint>,
    fetcher: Arc<dyn HttpFetcher>,
    gate: Mutex<()>,
    logger: Logger,
}

impl FallbackProviderChain {
    pub fn new(mut endpoints: Vec<ProviderEndpoint>, fetcher: Arc<dyn HttpFetcher>, logger: Logger) -> Self {
        // stable sort keeps configured order between equal priorities
        endpoints.sort_by_key(|e| e.priority);
        Self {
            endpoints,
            fetcher,
            gate: Mutex::new(()),
            logger,
        }
    }

    pub fn endpoints(&self) -> &[ProviderEndpoint] {
        &self.endpoints
    }

    /// Return the first successful JSON body, or `ProvidersExhausted`
    pub async fn fetch(&self, cancel: &CancellationToken) -> Result<ProviderResponse> {
        let (endpoint, body) = self.fetch_with(cancel, Ok).await?;
        Ok(ProviderResponse {
            provider: endpoint.name.clone(),
            url: endpoint.url.clone(),
            body,
        })
    }

    /// Like [`fetch`](Self::fetch), decoding the body into `T`; a body that
    /// does not decode counts as unparsable and moves on to the next endpoint
    pub async fn fetch_as<T: DeserializeOwned>(&self, cancel: &CancellationToken) -> Result<(String, T)> {
        let (endpoint, value) = self
            .fetch_with(cancel, |body| {
                serde_json::from_value::<T>(body).context("Unexpected response shape")
            })
            .await?;
        Ok((endpoint.name.clone(), value))
    }

    async fn fetch_with<T, D>(&self, cancel: &CancellationToken, decode: D) -> Result<(&ProviderEndpoint, T)>
    where
        D: Fn(serde_json::Value) -> Result<T>,
    {
        let _gate = self.gate.lock().await;

        for endpoint in &self.endpoints {
            if cancel.is_cancelled() {
                return Err(AppError::cancelled("provider chain"));
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::cancelled("provider chain")),
                outcome = self.fetcher.get_json(&endpoint.url, endpoint.per_call_timeout) => outcome,
            };

            match outcome.and_then(&decode) {
                Ok(value) => {
                    self.logger
                        .debug(&format!("Provider {} answered", endpoint.name))
                        .field("provider", &endpoint.name)
                        .field("priority", endpoint.priority)
                        .log()
                        .await;

                    if !endpoint.post_success_delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = tokio::time::sleep(endpoint.post_success_delay) => {}
                        }
                    }

                    return Ok((endpoint, value));
                }
                Err(error) => {
                    self.logger
                        .info(&format!("Provider {} failed, trying next: {}", endpoint.name, error))
                        .field("provider", &endpoint.name)
                        .error_info(&error)
                        .log()
                        .await;
                }
            }
        }

        crate::log_warn!(self.logger, "All {} providers failed", self.endpoints.len());
        Err(AppError::ProvidersExhausted {
            attempted: self.endpoints.len(),
        })
    }
}

/// Public IP through the fallback chain
pub struct PublicIpProbe {
    chain: FallbackProviderChain,
}

impl PublicIpProbe {
    pub fn new(chain: FallbackProviderChain) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl Probe for PublicIpProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::PublicIp
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<ProbePayload> {
        ctx.checkpoint()?;
        let (provider, info): (String, IpInfo) = self.chain.fetch_as(&ctx.cancel).await?;
        let public = PublicIpInfo { provider, info };
        if public.ip_addr().is_none() {
            return Err(AppError::parse(format!(
                "Provider {} returned no usable IP address",
                public.provider
            )));
        }
        Ok(ProbePayload::PublicIp(public))
    }
}
