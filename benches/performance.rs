//! Benchmarks for the shared result store and report rendering
//!
//! The store sits on the hot path of every probe, so contention on `set`
//! and the cost of a full snapshot are what matter here.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use network_master::{
    models::{PortScanReport, PortStatus, ProbePayload, ProbeResult},
    output::{OutputFormatter, OutputFormatterFactory},
    ping::parse_ping_output,
    security::SecuritySummary,
    types::ProbeKind,
    ResultStore,
};
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn sample_result(port_count: u16) -> ProbeResult {
    ProbeResult::success(ProbePayload::PortScan(PortScanReport {
        target: "127.0.0.1".to_string(),
        ports: (0..port_count)
            .map(|i| PortStatus {
                port: 1000 + i,
                open: i % 3 == 0,
                service: "Unknown".to_string(),
            })
            .collect(),
    }))
}

const PING_OUTPUT: &str = "PING 1.1.1.1 (1.1.1.1) 56(84) bytes of data.
64 bytes from 1.1.1.1: icmp_seq=1 ttl=57 time=11.2 ms
64 bytes from 1.1.1.1: icmp_seq=2 ttl=57 time=10.9 ms
64 bytes from 1.1.1.1: icmp_seq=3 ttl=57 time=11.4 ms
64 bytes from 1.1.1.1: icmp_seq=4 ttl=57 time=11.0 ms

--- 1.1.1.1 ping statistics ---
4 packets transmitted, 4 received, 0% packet loss, time 3004ms
rtt min/avg/max/mdev = 10.900/11.125/11.400/0.192 ms";

fn bench_store(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("store");

    group.bench_function("set", |b| {
        let store = ResultStore::new();
        let result = sample_result(11);
        b.iter(|| {
            rt.block_on(async {
                black_box(store.set(ProbeKind::PortScan, result.clone()).await.unwrap());
            })
        })
    });

    for writers in [2usize, 8, 32] {
        group.bench_with_input(BenchmarkId::new("concurrent_set", writers), &writers, |b, &writers| {
            let store = Arc::new(ResultStore::new());
            let result = sample_result(11);
            b.iter(|| {
                rt.block_on(async {
                    let tasks: Vec<_> = (0..writers)
                        .map(|_| {
                            let store = store.clone();
                            let result = result.clone();
                            tokio::spawn(async move { store.set(ProbeKind::PortScan, result).await })
                        })
                        .collect();
                    for task in tasks {
                        black_box(task.await.unwrap().unwrap());
                    }
                })
            })
        });
    }

    group.bench_function("snapshot", |b| {
        let store = ResultStore::new();
        rt.block_on(async {
            for kind in ProbeKind::ALL {
                store.set(kind, ProbeResult::running(kind)).await.unwrap();
            }
            store.set(ProbeKind::PortScan, sample_result(64)).await.unwrap();
        });
        b.iter(|| rt.block_on(async { black_box(store.snapshot().await) }))
    });

    group.finish();
}

fn bench_reporting(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = ResultStore::new();
    rt.block_on(async {
        store.set(ProbeKind::PortScan, sample_result(64)).await.unwrap();
    });
    let snapshot = rt.block_on(store.snapshot());
    let result = sample_result(64);

    c.bench_function("security_summary", |b| {
        b.iter(|| black_box(SecuritySummary::from_snapshot(black_box(&snapshot))))
    });

    let text = OutputFormatterFactory::create_formatter(false, false, true);
    let json = OutputFormatterFactory::create_formatter(true, false, false);
    c.bench_function("format_text", |b| b.iter(|| black_box(text.format_result(&result).unwrap())));
    c.bench_function("format_json", |b| b.iter(|| black_box(json.format_result(&result).unwrap())));

    c.bench_function("parse_ping_output", |b| {
        b.iter(|| black_box(parse_ping_output("1.1.1.1", black_box(PING_OUTPUT))))
    });
}

criterion_group!(benches, bench_store, bench_reporting);
criterion_main!(benches);
