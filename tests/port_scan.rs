//! Port scan through the orchestrator against real loopback sockets

use network_master::{
    models::ProbePayload,
    orchestrator::ProbeOrchestrator,
    portscan::{PortScanProbe, TokioConnector},
    security::SecuritySummary,
    types::{ProbeInput, ProbeKind, ProbeStatus},
    Config, ErrorClass,
};
use std::sync::Arc;
use tokio::net::TcpListener;

/// A port that was just free: bind, read the number, release it
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_scan_reports_open_and_closed_ports_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open = listener.local_addr().unwrap().port();
    let closed = closed_port().await;

    let orchestrator = ProbeOrchestrator::builder(Config::default())
        .probe(Arc::new(PortScanProbe::with_ports(Arc::new(TokioConnector), vec![closed, open])))
        .build();

    let result = orchestrator
        .run_request(ProbeKind::PortScan, ProbeInput::Target("127.0.0.1".to_string()))
        .await;
    assert_eq!(result.status, ProbeStatus::Success);

    let report = match result.payload {
        Some(ProbePayload::PortScan(report)) => report,
        other => panic!("unexpected payload: {:?}", other),
    };
    assert_eq!(report.target, "127.0.0.1");
    assert_eq!(report.ports.iter().map(|p| p.port).collect::<Vec<_>>(), vec![closed, open]);
    assert!(!report.ports[0].open);
    assert!(report.ports[1].open);

    let summary = SecuritySummary::from_snapshot(&orchestrator.store().snapshot().await);
    assert_eq!(summary.scanned_target.as_deref(), Some("127.0.0.1"));
    assert_eq!(summary.open_ports.len(), 1);
    assert!(summary.risky_ports.is_empty());
    drop(listener);
}

#[tokio::test]
async fn test_default_target_comes_from_configuration() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open = listener.local_addr().unwrap().port();

    let config = Config {
        scan_target: "127.0.0.1".to_string(),
        ..Config::default()
    };
    let orchestrator = ProbeOrchestrator::builder(config)
        .probe(Arc::new(PortScanProbe::with_ports(Arc::new(TokioConnector), vec![open])))
        .build();

    let result = orchestrator.run_probe(ProbeKind::PortScan).await;
    match result.payload {
        Some(ProbePayload::PortScan(report)) => {
            assert_eq!(report.target, "127.0.0.1");
            assert!(report.ports[0].open);
        }
        other => panic!("unexpected payload: {:?}", other),
    }
}

#[tokio::test]
async fn test_unresolvable_target_fails_without_payload() {
    let orchestrator = ProbeOrchestrator::builder(Config::default())
        .probe(Arc::new(PortScanProbe::new(Arc::new(TokioConnector))))
        .build();

    let result = orchestrator
        .run_request(ProbeKind::PortScan, ProbeInput::Target("   ".to_string()))
        .await;

    assert_eq!(result.status, ProbeStatus::Failed);
    assert!(result.payload.is_none());
    assert_eq!(result.error.unwrap().class, ErrorClass::InvalidInput);
}
