//! Full-scan behavior with injected probes
//!
//! Real probes touch the network; these fakes only sleep and answer, so the
//! tests pin down isolation, ordering and single-flight semantics.

use async_trait::async_trait;
use network_master::{
    error::{AppError, Result},
    models::{
        DeviceReport, DnsInfo, GeolocationReport, IpInfo, LocationRecord, NetworkInfo, ProbePayload, PublicIpInfo,
    },
    orchestrator::{Probe, ProbeContext, ProbeEvent, ProbeOrchestrator},
    types::{DiscoveryStrategy, ProbeInput, ProbeKind, ProbeStatus, ScanState},
    Config, ErrorClass,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const PUBLIC_IP: &str = "203.0.113.50";

fn payload_for(kind: ProbeKind, input: &ProbeInput) -> Result<ProbePayload> {
    let payload = match kind {
        ProbeKind::NetworkInfo => ProbePayload::NetworkInfo(NetworkInfo {
            hostname: "test-host".to_string(),
            local_ip: Some("192.168.1.20".parse().unwrap()),
            mac_address: None,
            interfaces: Vec::new(),
            connection_type: "Ethernet".to_string(),
            link_speed_mbps: 1000,
        }),
        ProbeKind::DnsInfo => ProbePayload::DnsInfo(DnsInfo {
            nameservers: vec!["192.168.1.1".to_string()],
            test_domain: "example.com".to_string(),
            a_record: Some("93.184.215.14".to_string()),
        }),
        ProbeKind::Devices => ProbePayload::Devices(DeviceReport {
            subnet_prefix: "192.168.1".to_string(),
            strategy: DiscoveryStrategy::Simulated,
            devices: Vec::new(),
        }),
        ProbeKind::PublicIp => ProbePayload::PublicIp(PublicIpInfo {
            provider: "fake".to_string(),
            info: IpInfo {
                ip: Some(PUBLIC_IP.to_string()),
                ..IpInfo::default()
            },
        }),
        ProbeKind::Geolocation => {
            let ip = match input {
                ProbeInput::Ip(ip) => *ip,
                other => return Err(AppError::validation(format!("unexpected input {:?}", other))),
            };
            ProbePayload::Geolocation(GeolocationReport {
                location: LocationRecord {
                    ip,
                    latitude: 38.7,
                    longitude: -9.1,
                    metadata: BTreeMap::new(),
                },
                map_artifact: None,
            })
        }
        other => return Err(AppError::internal(format!("no fake payload for {}", other))),
    };
    Ok(payload)
}

/// Sleeps, records the call, then answers or fails as scripted
struct FakeProbe {
    kind: ProbeKind,
    delay: Duration,
    failure: Option<AppError>,
    seen: Arc<Mutex<Vec<(ProbeKind, ProbeInput)>>>,
}

#[async_trait]
impl Probe for FakeProbe {
    fn kind(&self) -> ProbeKind {
        self.kind
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<ProbePayload> {
        self.seen.lock().unwrap().push((self.kind, ctx.input.clone()));
        ctx.guarded(async {
            tokio::time::sleep(self.delay).await;
            Ok(())
        })
        .await?;
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => payload_for(self.kind, &ctx.input),
        }
    }
}

struct Harness {
    orchestrator: ProbeOrchestrator,
    seen: Arc<Mutex<Vec<(ProbeKind, ProbeInput)>>>,
    events: mpsc::UnboundedReceiver<ProbeEvent>,
}

fn harness(delays: &[(ProbeKind, u64)], failures: Vec<(ProbeKind, AppError)>) -> Harness {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::unbounded_channel();
    let mut builder = ProbeOrchestrator::builder(Config::default()).events(tx);
    for kind in ProbeKind::FULL_SCAN {
        let delay = delays
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, ms)| Duration::from_millis(*ms))
            .unwrap_or(Duration::from_millis(10));
        let failure = failures.iter().find(|(k, _)| *k == kind).map(|(_, e)| e.clone());
        builder = builder.probe(Arc::new(FakeProbe {
            kind,
            delay,
            failure,
            seen: seen.clone(),
        }));
    }
    Harness {
        orchestrator: builder.build(),
        seen,
        events: rx,
    }
}

fn drain(events: &mut mpsc::UnboundedReceiver<ProbeEvent>) -> Vec<ProbeEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn test_all_probes_succeed() {
    let Harness { orchestrator, .. } = harness(&[], Vec::new());

    let report = orchestrator.run_full_scan().await.unwrap();

    assert_eq!(report.state, ScanState::AllDone);
    assert_eq!(report.results.len(), ProbeKind::FULL_SCAN.len());
    assert!(report.results.iter().all(|r| r.status == ProbeStatus::Success));
    assert_eq!(orchestrator.scan_state(), ScanState::AllDone);

    let snapshot = orchestrator.store().snapshot().await;
    for kind in ProbeKind::FULL_SCAN {
        assert_eq!(snapshot.get(kind).unwrap().status, ProbeStatus::Success);
    }
}

#[tokio::test]
async fn test_speed_test_failure_is_isolated() {
    let Harness { orchestrator, .. } = harness(
        &[(ProbeKind::SpeedTest, 50)],
        vec![(ProbeKind::SpeedTest, AppError::timeout("server list did not answer"))],
    );

    let report = orchestrator.run_full_scan().await.unwrap();

    assert_eq!(
        report.state,
        ScanState::PartialFailure {
            failed: vec![ProbeKind::SpeedTest]
        }
    );
    let speed = orchestrator.store().get(ProbeKind::SpeedTest).await.unwrap();
    assert_eq!(speed.status, ProbeStatus::Failed);
    assert_eq!(speed.error.unwrap().class, ErrorClass::Timeout);

    for kind in [ProbeKind::NetworkInfo, ProbeKind::DnsInfo, ProbeKind::Devices, ProbeKind::Geolocation] {
        let result = orchestrator.store().get(kind).await.unwrap();
        assert_eq!(result.status, ProbeStatus::Success, "{} should not be affected", kind);
    }
}

#[tokio::test]
async fn test_geolocation_waits_for_public_ip() {
    let Harness {
        orchestrator,
        seen,
        mut events,
    } = harness(&[(ProbeKind::PublicIp, 80)], Vec::new());

    orchestrator.run_full_scan().await.unwrap();

    let geo_input = seen
        .lock()
        .unwrap()
        .iter()
        .find(|(kind, _)| *kind == ProbeKind::Geolocation)
        .map(|(_, input)| input.clone());
    assert_eq!(geo_input, Some(ProbeInput::Ip(PUBLIC_IP.parse().unwrap())));

    let events = drain(&mut events);
    let ip_done = events
        .iter()
        .position(|e| matches!(e, ProbeEvent::ProbeFinished { kind: ProbeKind::PublicIp, .. }))
        .unwrap();
    let geo_started = events
        .iter()
        .position(|e| matches!(e, ProbeEvent::ProbeStarted { kind: ProbeKind::Geolocation }))
        .unwrap();
    assert!(ip_done < geo_started);

    assert!(matches!(events.first(), Some(ProbeEvent::ScanStarted { .. })));
    assert!(matches!(events.last(), Some(ProbeEvent::ScanFinished { state: ScanState::AllDone, .. })));
}

#[tokio::test]
async fn test_geolocation_is_unavailable_without_public_ip() {
    let Harness { orchestrator, seen, .. } = harness(
        &[],
        vec![(ProbeKind::PublicIp, AppError::ProvidersExhausted { attempted: 3 })],
    );

    let report = orchestrator.run_full_scan().await.unwrap();

    assert_eq!(
        report.state,
        ScanState::PartialFailure {
            failed: vec![ProbeKind::PublicIp, ProbeKind::Geolocation]
        }
    );
    let geo = orchestrator.store().get(ProbeKind::Geolocation).await.unwrap();
    let error = geo.error.unwrap();
    assert_eq!(error.class, ErrorClass::Unavailable);
    assert!(error.message.contains("public IP unavailable"));
    assert!(!seen.lock().unwrap().iter().any(|(kind, _)| *kind == ProbeKind::Geolocation));
}

#[tokio::test]
async fn test_second_scan_is_rejected_while_running() {
    let Harness { orchestrator, .. } = harness(&[(ProbeKind::Devices, 300)], Vec::new());

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_full_scan().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(orchestrator.scan_state().is_running());

    let second = orchestrator.run_full_scan().await;
    assert!(matches!(second, Err(AppError::ScanInProgress)));

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.state, ScanState::AllDone);

    // finished scans release the guard
    let third = orchestrator.run_full_scan().await.unwrap();
    assert_eq!(third.state, ScanState::AllDone);
    assert_ne!(third.scan_id, report.scan_id);
}

#[tokio::test]
async fn test_cancel_scan_fails_unfinished_probes() {
    let Harness { orchestrator, .. } = harness(&[(ProbeKind::SpeedTest, 5_000), (ProbeKind::Devices, 5_000)], Vec::new());

    let scan = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_full_scan().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(orchestrator.cancel_scan());

    let report = tokio::time::timeout(Duration::from_secs(2), scan).await.unwrap().unwrap().unwrap();
    assert_eq!(
        report.state,
        ScanState::PartialFailure {
            failed: vec![ProbeKind::SpeedTest, ProbeKind::Devices]
        }
    );
    let speed = orchestrator.store().get(ProbeKind::SpeedTest).await.unwrap();
    assert_eq!(speed.error.unwrap().class, ErrorClass::Cancelled);
    assert!(!orchestrator.cancel_scan());
}

#[tokio::test]
async fn test_dropped_scan_still_records_terminal_entries() {
    let Harness { orchestrator, .. } = harness(&[(ProbeKind::SpeedTest, 5_000)], Vec::new());

    let abandoned = tokio::time::timeout(Duration::from_millis(200), orchestrator.run_full_scan()).await;
    assert!(abandoned.is_err());

    // the scan task winds down on its own once the caller is gone
    let mut state = orchestrator.scan_state();
    for _ in 0..100 {
        if !state.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        state = orchestrator.scan_state();
    }
    assert_eq!(
        state,
        ScanState::PartialFailure {
            failed: vec![ProbeKind::SpeedTest]
        }
    );

    let snapshot = orchestrator.store().snapshot().await;
    for kind in ProbeKind::FULL_SCAN {
        let result = snapshot.get(kind).unwrap();
        assert!(result.status.is_terminal(), "{} left as {}", kind, result.status);
    }
    let speed = snapshot.get(ProbeKind::SpeedTest).unwrap();
    assert_eq!(speed.error.as_ref().unwrap().class, ErrorClass::Cancelled);
    assert_eq!(snapshot.get(ProbeKind::NetworkInfo).unwrap().status, ProbeStatus::Success);
    assert!(!orchestrator.cancel_scan());
}

#[tokio::test]
async fn test_store_versions_increase_across_scan() {
    let Harness { orchestrator, .. } = harness(&[], Vec::new());
    let before = orchestrator.store().version().await;

    let report = orchestrator.run_full_scan().await.unwrap();

    let mut versions: Vec<u64> = report.results.iter().map(|r| r.version).collect();
    versions.sort();
    versions.dedup();
    assert_eq!(versions.len(), report.results.len());
    assert!(versions.iter().all(|v| *v > before));
    assert_eq!(orchestrator.store().version().await, *versions.last().unwrap());
}
