//! Fallback provider chain against mock HTTP servers
//!
//! Uses the real reqwest-backed client so status handling, timeouts and
//! JSON decoding are exercised end to end.

use network_master::{
    client::{HttpFetcher, NetworkClient},
    error::AppError,
    logging::Logger,
    models::{IpInfo, ProbePayload},
    orchestrator::ProbeOrchestrator,
    providers::{FallbackProviderChain, ProviderEndpoint, PublicIpProbe},
    types::{ProbeKind, ProbeStatus},
    Config, ErrorClass,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> Arc<dyn HttpFetcher> {
    Arc::new(NetworkClient::new().unwrap())
}

fn endpoint(server: &MockServer, route: &str, priority: u32) -> ProviderEndpoint {
    ProviderEndpoint::new(format!("{}{}", server.uri(), route), priority)
        .with_name(route.trim_start_matches('/'))
        .with_timeout(Duration::from_millis(300))
        .with_post_success_delay(Duration::ZERO)
}

fn chain(endpoints: Vec<ProviderEndpoint>) -> FallbackProviderChain {
    FallbackProviderChain::new(endpoints, fetcher(), Logger::new("TEST".to_string()))
}

#[tokio::test]
async fn test_skips_failing_providers_in_priority_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/garbage"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ip": "203.0.113.7",
            "city": "Lisbon",
            "loc": "38.7167,-9.1333"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/unused"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ip": "198.51.100.1" })))
        .expect(0)
        .mount(&server)
        .await;

    let chain = chain(vec![
        endpoint(&server, "/unused", 9),
        endpoint(&server, "/good", 2),
        endpoint(&server, "/broken", 0),
        endpoint(&server, "/garbage", 1),
    ]);

    let (provider, info): (String, IpInfo) = chain.fetch_as(&CancellationToken::new()).await.unwrap();
    assert_eq!(provider, "good");
    assert_eq!(info.ip.as_deref(), Some("203.0.113.7"));
    assert_eq!(info.city.as_deref(), Some("Lisbon"));
}

#[tokio::test]
async fn test_slow_provider_counts_as_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "ip": "198.51.100.9" }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ip": "198.51.100.10" })))
        .mount(&server)
        .await;

    let chain = chain(vec![endpoint(&server, "/slow", 0), endpoint(&server, "/fast", 1)]);

    let started = Instant::now();
    let response = chain.fetch(&CancellationToken::new()).await.unwrap();
    assert_eq!(response.provider, "fast");
    assert_eq!(response.body["ip"], "198.51.100.10");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_all_providers_failing_is_exhaustion() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let chain = chain(vec![endpoint(&server, "/a", 0), endpoint(&server, "/b", 1)]);
    let error = chain.fetch(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(error, AppError::ProvidersExhausted { attempted: 2 }));
    assert_eq!(error.class(), ErrorClass::Unavailable);
}

#[tokio::test]
async fn test_public_ip_probe_stores_provider_answer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ip": "192.0.2.44",
            "country": "PT",
            "org": "AS64500 Example"
        })))
        .mount(&server)
        .await;

    let config = Config::default();
    let orchestrator = ProbeOrchestrator::builder(config)
        .probe(Arc::new(PublicIpProbe::new(chain(vec![endpoint(&server, "/json", 0)]))))
        .build();

    let result = orchestrator.run_probe(ProbeKind::PublicIp).await;
    assert_eq!(result.status, ProbeStatus::Success);

    let stored = orchestrator.store().get(ProbeKind::PublicIp).await.unwrap();
    assert_eq!(stored, result);
    match stored.payload {
        Some(ProbePayload::PublicIp(public)) => {
            assert_eq!(public.provider, "json");
            assert_eq!(public.ip_addr(), Some("192.0.2.44".parse().unwrap()));
            assert_eq!(public.info.org.as_deref(), Some("AS64500 Example"));
        }
        other => panic!("unexpected payload: {:?}", other),
    }
}
