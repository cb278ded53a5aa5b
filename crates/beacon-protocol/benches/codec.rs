//! Envelope codec benchmarks.

use beacon_protocol::codec;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    let small = json!(1);
    group.bench_function("scalar", |b| {
        b.iter(|| codec::encode(black_box("ping"), black_box(&small)))
    });

    let trigger = json!({
        "id": "5b1f3c52-9f0e-4a53-8a44-0d7c3b1f2a10",
        "name": "airhorn",
        "duration": 3.5,
        "active": true,
        "item": {"type": "audio", "url": "/uploads/audios/airhorn.mp3"}
    });
    group.bench_function("trigger", |b| {
        b.iter(|| codec::encode(black_box("TriggerEvents:ID"), black_box(&trigger)))
    });

    let large = json!({ "blob": "x".repeat(64 * 1024) });
    group.throughput(Throughput::Bytes(64 * 1024));
    group.bench_function("64KB", |b| {
        b.iter(|| codec::encode(black_box("blob"), black_box(&large)))
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let small = codec::encode("ping", &1).unwrap();
    group.bench_function("scalar", |b| b.iter(|| codec::decode(black_box(&small))));

    let large = codec::encode("blob", &json!({ "blob": "x".repeat(64 * 1024) })).unwrap();
    group.throughput(Throughput::Bytes(large.len() as u64));
    group.bench_function("64KB", |b| b.iter(|| codec::decode(black_box(&large))));

    let malformed = "{\"event\": \"ping\", \"data\": ";
    group.bench_function("malformed", |b| {
        b.iter(|| codec::decode(black_box(malformed)))
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
