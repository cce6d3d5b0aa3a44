//! Throughput benchmarks for ssed.
//!
//! These benchmarks measure how fast messages fan out to subscribers.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ssed_bench::{broker_with_readers, payload, registry, runtime, PAYLOAD_SIZES};
use ssed_core::{Message, SlowSubscriberPolicy};

/// Benchmark registry fan-out with every queue kept empty.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for size in [10, 100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (mut registry, mut channels) = registry(size, 1);
            let message = Message::new(payload(64));

            b.iter(|| {
                let fanout = registry.broadcast(black_box(&message), SlowSubscriberPolicy::Drop);
                for channel in &mut channels {
                    let _ = channel.try_recv();
                }
                fanout
            });
        });
    }

    group.finish();
}

/// Benchmark fan-out to subscribers that never read.
fn bench_fanout_full(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout_full");

    for size in [100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (mut registry, _channels) = registry(size, 1);
            let message = Message::new(payload(64));
            registry.broadcast(&message, SlowSubscriberPolicy::Drop);

            b.iter(|| registry.broadcast(black_box(&message), SlowSubscriberPolicy::Drop));
        });
    }

    group.finish();
}

/// Benchmark publishing through the broker loop.
fn bench_broker_publish(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("broker_publish");

    for subscribers in [1, 100].iter() {
        for size in PAYLOAD_SIZES {
            let (broker, _readers) = rt.block_on(async { broker_with_readers(*subscribers) });
            let message = Message::new(payload(size));

            group.throughput(Throughput::Bytes(size as u64));
            group.bench_function(format!("{subscribers}_sub/{size}B"), |b| {
                b.to_async(&rt)
                    .iter(|| broker.publish(black_box(message.clone())));
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_fanout, bench_fanout_full, bench_broker_publish);
criterion_main!(benches);
