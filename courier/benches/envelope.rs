//! Benchmarks for the wire envelope codec.
//!
//! The payload is encoded twice (once as the `data` string, once as the
//! outer object), so cost grows with payload size on both sides.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::{json, Value};

use courier::envelope::Envelope;

fn small_payload() -> Value {
    json!({ "to": "a@example.com" })
}

fn medium_payload() -> Value {
    json!({
        "to": "a@example.com",
        "subject": "Monthly report",
        "tags": ["billing", "monthly", "eu-west-1"],
        "headers": (0..20).map(|i| (format!("x-header-{i}"), format!("value-{i}"))).collect::<std::collections::HashMap<_, _>>(),
    })
}

fn large_payload() -> Value {
    json!({
        "report": "quarterly",
        "rows": (0..500).map(|i| json!({ "id": i, "amount": i * 17, "note": "n".repeat(32) })).collect::<Vec<_>>(),
    })
}

fn bench_to_wire(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_to_wire");

    for (name, payload) in [
        ("small", small_payload()),
        ("medium", medium_payload()),
        ("large", large_payload()),
    ] {
        let envelope = Envelope::wrap(payload);
        let wire = envelope.to_wire().expect("encode");
        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_function(name, |b| {
            b.iter(|| black_box(&envelope).to_wire().expect("encode"))
        });
    }

    group.finish();
}

fn bench_from_wire(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_from_wire");

    for (name, payload) in [
        ("small", small_payload()),
        ("medium", medium_payload()),
        ("large", large_payload()),
    ] {
        let wire = Envelope::wrap(payload).to_wire().expect("encode");
        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_function(name, |b| {
            b.iter(|| Envelope::from_wire(black_box(&wire)).expect("decode"))
        });
    }

    group.finish();
}

fn bench_wrap(c: &mut Criterion) {
    let payload = medium_payload();
    c.bench_function("envelope_wrap_medium", |b| {
        b.iter(|| Envelope::wrap(black_box(payload.clone())))
    });
}

criterion_group!(benches, bench_to_wire, bench_from_wire, bench_wrap);
criterion_main!(benches);
