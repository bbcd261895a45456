//! DNS resolution, host resolver facts and the DNS leak test

use crate::client::HttpFetcher;
use crate::error::{AppError, DnsFailure, Result};
use crate::models::{DnsInfo, DnsLeakReport, DnsRecordSet, EchoOutcome, ProbeError, ProbePayload};
use crate::orchestrator::{Probe, ProbeContext};
use crate::types::{ProbeInput, ProbeKind, RecordType};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::proto::error::ProtoErrorKind;
use trust_dns_resolver::proto::op::ResponseCode;
use trust_dns_resolver::proto::rr::RecordType as WireRecordType;
use trust_dns_resolver::{system_conf, TokioAsyncResolver};

/// Resolver seam so probes can run against fakes
#[async_trait]
pub trait DnsBackend: Send + Sync {
    /// Record values in resolver order; fails with a classified `AppError::Dns`
    async fn resolve(&self, domain: &str, record_type: RecordType) -> Result<Vec<String>>;

    /// PTR name for `ip`, `None` when there is none
    async fn reverse(&self, ip: IpAddr) -> Result<Option<String>>;

    /// Name servers the backend queries
    fn nameservers(&self) -> Vec<String>;
}

/// Map a resolver error onto the three failure kinds probes report
pub fn classify_resolve_error(error: &ResolveError) -> DnsFailure {
    match error.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => classify_response_code(*response_code),
        ResolveErrorKind::Timeout => DnsFailure::Timeout,
        ResolveErrorKind::Proto(proto) if matches!(proto.kind(), ProtoErrorKind::Timeout) => DnsFailure::Timeout,
        _ => DnsFailure::ServerFailure,
    }
}

/// NXDOMAIN and empty answers are "not found"; every other code is a server failure
pub fn classify_response_code(code: ResponseCode) -> DnsFailure {
    match code {
        ResponseCode::NXDomain | ResponseCode::NoError => DnsFailure::NotFound,
        _ => DnsFailure::ServerFailure,
    }
}

fn wire_type(record_type: RecordType) -> WireRecordType {
    match record_type {
        RecordType::A => WireRecordType::A,
        RecordType::AAAA => WireRecordType::AAAA,
        RecordType::MX => WireRecordType::MX,
        RecordType::NS => WireRecordType::NS,
        RecordType::TXT => WireRecordType::TXT,
        RecordType::CNAME => WireRecordType::CNAME,
    }
}

/// Reject names the resolver could never look up
pub fn validate_domain(domain: &str) -> Result<()> {
    let trimmed = domain.trim_end_matches('.');
    if trimmed.is_empty() || trimmed.len() > 253 {
        return Err(AppError::validation(format!("Invalid domain name '{}'", domain)));
    }
    for label in trimmed.split('.') {
        let valid = !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            && !label.starts_with('-')
            && !label.ends_with('-');
        if !valid {
            return Err(AppError::validation(format!("Invalid domain name '{}'", domain)));
        }
    }
    Ok(())
}

/// trust-dns resolver using the host's configuration
pub struct TrustDnsBackend {
    resolver: TokioAsyncResolver,
    nameservers: Vec<String>,
}

impl TrustDnsBackend {
    /// Resolver from the system configuration with a single attempt per query
    ///
    /// Falls back to the library's default upstreams when the host
    /// configuration cannot be read.
    pub fn from_system(timeout: Duration) -> Self {
        let (config, opts) = system_conf::read_system_conf()
            .unwrap_or_else(|_| (ResolverConfig::default(), ResolverOpts::default()));
        Self::with_config(config, opts, timeout)
    }

    pub fn with_config(config: ResolverConfig, mut opts: ResolverOpts, timeout: Duration) -> Self {
        opts.timeout = timeout;
        opts.attempts = 1;

        let mut nameservers: Vec<String> = Vec::new();
        for server in config.name_servers() {
            let ip = server.socket_addr.ip().to_string();
            // UDP and TCP entries share an address
            if !nameservers.contains(&ip) {
                nameservers.push(ip);
            }
        }

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
            nameservers,
        }
    }
}

#[async_trait]
impl DnsBackend for TrustDnsBackend {
    async fn resolve(&self, domain: &str, record_type: RecordType) -> Result<Vec<String>> {
        let wanted = wire_type(record_type);
        let lookup = self.resolver.lookup(domain, wanted).await?;
        let values: Vec<String> = lookup
            .record_iter()
            .filter(|record| record.record_type() == wanted)
            .filter_map(|record| record.data().map(|data| data.to_string()))
            .collect();

        if values.is_empty() {
            return Err(AppError::dns(
                DnsFailure::NotFound,
                format!("No {} records for {}", record_type, domain),
            ));
        }
        Ok(values)
    }

    async fn reverse(&self, ip: IpAddr) -> Result<Option<String>> {
        match self.resolver.reverse_lookup(ip).await {
            Ok(names) => Ok(names
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_string())),
            Err(error) => match classify_resolve_error(&error) {
                DnsFailure::NotFound => Ok(None),
                _ => Err(AppError::from(error)),
            },
        }
    }

    fn nameservers(&self) -> Vec<String> {
        self.nameservers.clone()
    }
}

/// `lookup(domain, type)`
pub struct DnsLookupProbe {
    backend: Arc<dyn DnsBackend>,
}

impl DnsLookupProbe {
    pub fn new(backend: Arc<dyn DnsBackend>) -> Self {
        Self { backend }
    }

    pub async fn lookup(&self, ctx: &ProbeContext, domain: &str, record_type: RecordType) -> Result<DnsRecordSet> {
        validate_domain(domain)?;
        ctx.checkpoint()?;
        let backend = &self.backend;
        let values = ctx
            .retry("dns lookup", || backend.resolve(domain, record_type))
            .await?;
        Ok(DnsRecordSet {
            domain: domain.to_string(),
            record_type,
            values,
        })
    }
}

#[async_trait]
impl Probe for DnsLookupProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::DnsLookup
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<ProbePayload> {
        let (domain, record_type) = match &ctx.input {
            ProbeInput::Domain { domain, record_type } => (domain.clone(), *record_type),
            ProbeInput::Target(domain) => (domain.clone(), RecordType::A),
            other => return Err(AppError::validation(format!("DNS lookup needs a domain, got {:?}", other))),
        };
        let records = self.lookup(ctx, &domain, record_type).await?;
        Ok(ProbePayload::DnsLookup(records))
    }
}

/// Host name servers plus the first A record of the test domain
pub struct DnsInfoProbe {
    backend: Arc<dyn DnsBackend>,
    test_domain: String,
}

impl DnsInfoProbe {
    pub fn new(backend: Arc<dyn DnsBackend>, test_domain: String) -> Self {
        Self { backend, test_domain }
    }
}

#[async_trait]
impl Probe for DnsInfoProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::DnsInfo
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<ProbePayload> {
        let test_domain = match &ctx.input {
            ProbeInput::Domain { domain, .. } | ProbeInput::Target(domain) => domain.clone(),
            _ => self.test_domain.clone(),
        };
        validate_domain(&test_domain)?;
        ctx.checkpoint()?;

        let backend = &self.backend;
        let domain = test_domain.as_str();
        let records = ctx
            .retry("dns info", || backend.resolve(domain, RecordType::A))
            .await?;

        Ok(ProbePayload::DnsInfo(DnsInfo {
            nameservers: self.backend.nameservers(),
            test_domain,
            a_record: records.into_iter().next(),
        }))
    }
}

/// Ask every echo endpoint which address it sees
///
/// Endpoints are queried concurrently and independently; comparing the
/// answers is left to consumers through [`DnsLeakReport::consistent`].
pub struct DnsLeakProbe {
    fetcher: Arc<dyn HttpFetcher>,
    endpoints: Vec<String>,
}

impl DnsLeakProbe {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, endpoints: Vec<String>) -> Self {
        Self { fetcher, endpoints }
    }

    async fn query(&self, ctx: &ProbeContext, endpoint: &str) -> EchoOutcome {
        let fetcher = &self.fetcher;
        let timeout = ctx.policy.echo;
        let answer = ctx
            .retry("dns leak echo", || async move {
                let body = fetcher.get_text(endpoint, timeout).await?;
                body.parse::<IpAddr>()
                    .map(|ip| ip.to_string())
                    .map_err(|_| AppError::parse(format!("{} answered '{}', not an IP address", endpoint, body)))
            })
            .await;

        match answer {
            Ok(ip) => EchoOutcome {
                endpoint: endpoint.to_string(),
                ip: Some(ip),
                error: None,
            },
            Err(error) => EchoOutcome {
                endpoint: endpoint.to_string(),
                ip: None,
                error: Some(ProbeError::from(&error)),
            },
        }
    }
}

#[async_trait]
impl Probe for DnsLeakProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::DnsLeak
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<ProbePayload> {
        if self.endpoints.is_empty() {
            return Err(AppError::validation("No DNS leak endpoints configured"));
        }
        ctx.checkpoint()?;
        ctx.progress("querying echo endpoints");

        let outcomes = futures::future::join_all(self.endpoints.iter().map(|endpoint| self.query(ctx, endpoint))).await;
        ctx.checkpoint()?;

        if outcomes.iter().all(|o| o.ip.is_none()) {
            return Err(AppError::ProvidersExhausted {
                attempted: outcomes.len(),
            });
        }

        let report = DnsLeakReport::from_outcomes(outcomes);
        if !report.consistent {
            ctx.logger
                .warn(&format!("Echo endpoints disagree: {}", report.distinct_ips.join(", ")))
                .correlation_id(&ctx.correlation_id)
                .log()
                .await;
        }
        Ok(ProbePayload::DnsLeak(report))
    }
}
