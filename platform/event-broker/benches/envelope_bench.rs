use criterion::{black_box, criterion_group, criterion_main, Criterion};
use event_broker::EventEnvelope;
use std::collections::HashMap;

fn sample() -> EventEnvelope<Vec<u8>> {
    EventEnvelope::new(
        "com.example.user.event",
        "user-service",
        "application/avro",
        vec![0u8; 64],
    )
}

fn bench_header_projection(c: &mut Criterion) {
    let envelope = sample();
    c.bench_function("to_wire_headers", |b| {
        b.iter(|| black_box(&envelope).to_wire_headers())
    });

    let headers: HashMap<String, String> = envelope.to_wire_headers();
    c.bench_function("from_wire_headers", |b| {
        b.iter(|| EventEnvelope::from_wire_headers(black_box(&headers), vec![0u8; 64]))
    });
}

fn bench_validation(c: &mut Criterion) {
    let envelope = sample();
    c.bench_function("validate", |b| b.iter(|| black_box(&envelope).validate()));
}

criterion_group!(benches, bench_header_projection, bench_validation);
criterion_main!(benches);
