//! 이상 탐지 벤치마크
//!
//! 윈도우 크기와 위치 다양성에 따른 판정 비용, 윈도우 페이로드 해시 비용을 측정합니다.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use scanguard_core::types::{FraudIncident, ScanEvent};
use scanguard_verifier::detector::AnomalyDetector;
use scanguard_verifier::ledger::LedgerPayload;

fn create_window(count: usize, locations: usize) -> Vec<ScanEvent> {
    let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    (0..count)
        .map(|i| {
            ScanEvent::new(
                base + TimeDelta::seconds(i as i64),
                format!("location-{}", i % locations.max(1)),
                None,
            )
        })
        .collect()
}

fn bench_evaluate_window_size(c: &mut Criterion) {
    let detector = AnomalyDetector::default();
    let mut group = c.benchmark_group("evaluate_window_size");

    for size in [0usize, 11, 100, 1_000, 10_000] {
        let window = create_window(size, 50);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &window, |b, window| {
            b.iter(|| detector.evaluate(black_box(window)))
        });
    }

    group.finish();
}

fn bench_evaluate_location_diversity(c: &mut Criterion) {
    let detector = AnomalyDetector::default();
    let mut group = c.benchmark_group("evaluate_location_diversity");

    // 같은 스캔 수, 고유 위치 수만 변화
    for locations in [1usize, 10, 100, 1_000] {
        let window = create_window(1_000, locations);
        group.bench_with_input(
            BenchmarkId::from_parameter(locations),
            &window,
            |b, window| b.iter(|| detector.evaluate(black_box(window))),
        );
    }

    group.finish();
}

fn bench_is_flagged(c: &mut Criterion) {
    let detector = AnomalyDetector::default();
    c.bench_function("is_flagged", |b| {
        b.iter(|| detector.is_flagged(black_box(11), black_box(10)))
    });
}

fn bench_payload_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_content_hash");

    for locations in [10usize, 100, 1_000] {
        let distinct: BTreeSet<String> = (0..locations).map(|i| format!("location-{i}")).collect();
        let incident = FraudIncident::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            locations + 1,
            distinct,
        );
        let payload = LedgerPayload::from_incident("P-BENCH", &incident);
        group.bench_with_input(
            BenchmarkId::from_parameter(locations),
            &payload,
            |b, payload| b.iter(|| payload.content_hash().unwrap()),
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_evaluate_window_size,
    bench_evaluate_location_diversity,
    bench_is_flagged,
    bench_payload_hash
);
criterion_main!(benches);
