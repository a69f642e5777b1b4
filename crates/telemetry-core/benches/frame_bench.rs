//! Criterion benchmarks for the serial hot path: line splitting and reading
//! validation.
//!
//! A device streaming at a few hundred samples per second must never make the
//! gateway fall behind the port, so both steps are measured in isolation and
//! together.
//!
//! Run with:
//! ```bash
//! cargo bench --package telemetry-core --bench frame_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use telemetry_core::{HubEvent, LineFramer, SensorReading};

// ── Fixtures ──────────────────────────────────────────────────────────────────

const MINIMAL: &str = r#"{"paramId":1,"value":85}"#;
const WITH_EXTRAS: &str =
    r#"{"paramId":3,"value":21.5,"tiangId":5,"status":"warning","unit":"C","seq":918273}"#;
const STRUCTURED: &str =
    r#"{"paramId":"gps/fix","value":{"lat":-6.2088,"lng":106.8456,"sats":9},"tiangId":2}"#;

fn stream_of(line: &str, count: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity((line.len() + 1) * count);
    for _ in 0..count {
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
    }
    bytes
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

/// Splitting a 64-line burst, delivered in one read and in 32-byte reads.
fn bench_framer(c: &mut Criterion) {
    let burst = stream_of(WITH_EXTRAS, 64);
    let mut group = c.benchmark_group("line_framer");

    group.bench_function("single_read", |b| {
        b.iter(|| {
            let mut framer = LineFramer::default();
            framer.push(black_box(&burst)).len()
        })
    });

    group.bench_function("chunked_32", |b| {
        b.iter(|| {
            let mut framer = LineFramer::default();
            let mut frames = 0;
            for chunk in burst.chunks(32) {
                frames += framer.push(black_box(chunk)).len();
            }
            frames
        })
    });

    group.finish();
}

/// Validating a single line against the reading schema.
fn bench_parse(c: &mut Criterion) {
    let lines: &[(&str, &str)] = &[
        ("minimal", MINIMAL),
        ("with_extras", WITH_EXTRAS),
        ("structured", STRUCTURED),
    ];

    let mut group = c.benchmark_group("sensor_reading_parse");
    for (name, line) in lines {
        group.bench_with_input(BenchmarkId::new("line", name), line, |b, line| {
            b.iter(|| SensorReading::from_json(black_box(line)).is_ok())
        });
    }
    group.finish();
}

/// Bytes in, push-channel envelope out: the per-sample work the gateway does.
fn bench_line_to_envelope(c: &mut Criterion) {
    let line = stream_of(WITH_EXTRAS, 1);

    c.bench_function("line_to_sensor_data_envelope", |b| {
        b.iter(|| {
            let mut framer = LineFramer::default();
            let mut out = Vec::new();
            for text in framer.push(black_box(&line)).into_iter().flatten() {
                if let Ok(reading) = SensorReading::from_json(&text) {
                    if let Ok(json) = serde_json::to_string(&HubEvent::SensorData(reading)) {
                        out.push(json);
                    }
                }
            }
            out
        })
    });
}

criterion_group!(benches, bench_framer, bench_parse, bench_line_to_envelope);
criterion_main!(benches);
