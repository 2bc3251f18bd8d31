//! Benchmarks for data processing operations
//!
//! Run with: cargo bench

use bulkio_rs::local::LocalTransport;
use bulkio_rs::output::Fragments;
use bulkio_rs::sri;
use bulkio_rs::types::{InFloatPort, OutFloatPort};
use bulkio_rs::{PrecisionTime, Wait};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const PAYLOAD_BYTES: usize = 1_887_436;

fn bench_packet_ingestion(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_ingestion");

    for size in [64usize, 1024, 16_384].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("push_pop", size), size, |b, &size| {
            let port = InFloatPort::new("bench_in");
            port.push_sri(sri::create("s"));
            let data = vec![0.5f32; size];
            let time = PrecisionTime::new(1000.0, 0.0);
            b.iter(|| {
                port.push_packet(black_box(data.clone()), time, false, "s");
                black_box(port.next_packet(Wait::NonBlocking));
            });
        });
    }

    group.finish();
}

fn bench_stream_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_reads");

    // Packets of 1000 read back in blocks that rarely line up with them
    for read_size in [256usize, 1000, 4096].iter() {
        group.throughput(Throughput::Elements(*read_size as u64));
        group.bench_with_input(
            BenchmarkId::new("read_count", read_size),
            read_size,
            |b, &read_size| {
                let port = InFloatPort::new("bench_in");
                port.set_max_queue_depth(-1);
                port.push_sri(sri::create("s"));
                let stream = port.get_stream("s").unwrap();
                let time = PrecisionTime::new(1000.0, 0.0);
                b.iter(|| {
                    while stream.samples_available() < read_size {
                        port.push_packet(vec![1.0f32; 1000], time, false, "s");
                    }
                    black_box(stream.try_read_count(read_size));
                });
            },
        );
    }

    group.finish();
}

fn bench_chunking(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunking");

    for size in [100_000usize, 1_000_000, 4_000_000].iter() {
        let data = vec![0.25f32; *size];
        let stream_sri = sri::create("big");
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("fragments", size), &data, |b, data| {
            b.iter(|| {
                let count = Fragments::new(
                    black_box(data),
                    PrecisionTime::new(1000.0, 0.0),
                    true,
                    &stream_sri,
                    PAYLOAD_BYTES,
                )
                .count();
                black_box(count);
            });
        });
    }

    group.finish();
}

fn bench_local_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_fanout");

    for connections in [1usize, 4].iter() {
        group.bench_with_input(
            BenchmarkId::new("connections", connections),
            connections,
            |b, &connections| {
                let output = OutFloatPort::new("bench_out");
                let inputs: Vec<InFloatPort> = (0..connections)
                    .map(|n| InFloatPort::new(format!("bench_in_{}", n)))
                    .collect();
                for (n, input) in inputs.iter().enumerate() {
                    output
                        .connect_port(Box::new(LocalTransport::new(input.clone())), &format!("c{}", n))
                        .unwrap();
                }
                let stream = output.create_stream("s");
                let data = vec![0.0f32; 4096];
                b.iter(|| {
                    stream.write(black_box(data.clone()), PrecisionTime::new(1000.0, 0.0));
                    for input in &inputs {
                        black_box(input.next_packet(Wait::NonBlocking));
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_packet_ingestion,
    bench_stream_reads,
    bench_chunking,
    bench_local_fanout
);
criterion_main!(benches);
