//! Latency benchmarks for ssed.
//!
//! These benchmarks focus on measuring end-to-end latency.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ssed_bench::{payload, runtime};
use ssed_core::{Broker, BrokerConfig, Message};
use ssed_protocol::{codec, Frame};
use std::time::Instant;

/// Benchmark publish until the subscriber holds the message.
fn bench_publish_latency(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("publish_latency");

    group.bench_function("single_subscriber", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let broker = Broker::spawn(BrokerConfig::default());
                let mut channel = broker.register();

                let start = Instant::now();
                for _ in 0..iters {
                    broker.publish(payload(64)).await.unwrap();
                    black_box(channel.recv().await);
                }
                start.elapsed()
            })
        });
    });

    group.bench_function("ten_subscribers", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let broker = Broker::spawn(BrokerConfig::default());
                let mut channels: Vec<_> = (0..10).map(|_| broker.register()).collect();

                let start = Instant::now();
                for _ in 0..iters {
                    broker.publish(payload(64)).await.unwrap();
                    for channel in &mut channels {
                        black_box(channel.recv().await);
                    }
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

/// Benchmark the path a delivered message takes to the wire.
fn bench_message_to_event(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_to_event");
    let message = Message::new(payload(256));

    group.bench_function("256B", |b| {
        b.iter(|| {
            let frame = Frame::Data(black_box(&message).payload().clone());
            codec::encode(&frame).unwrap()
        });
    });

    group.finish();
}

/// Benchmark message creation latency.
fn bench_message_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_creation");

    group.bench_function("from_line", |b| {
        b.iter(|| Message::new(black_box("a line read from standard input")))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_publish_latency,
    bench_message_to_event,
    bench_message_creation,
);
criterion_main!(benches);
