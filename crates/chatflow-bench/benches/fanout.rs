//! Fan-out benchmarks for the ChatFlow hub.
//!
//! Every chat message, presence change and typing change is pushed to all
//! identified connections; these measure that cost as the room grows.

use chatflow_bench::{conn, drain, populated_hub};
use chatflow_protocol::Content;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::{Duration, Instant};

/// Broadcast one chat message to a room of `size`.
fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");

    for size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (hub, mut rxs) = populated_hub(size);
            let sender = conn(0);

            b.iter_custom(|iters| {
                let mut elapsed = Duration::ZERO;
                for _ in 0..iters {
                    let start = Instant::now();
                    let _ = hub.send_message(
                        black_box(&sender),
                        Content::Text {
                            body: "x".repeat(64),
                        },
                        None,
                    );
                    elapsed += start.elapsed();
                    for rx in &mut rxs {
                        drain(rx);
                    }
                }
                elapsed
            });
        });
    }

    group.finish();
}

/// Private messages touch two queues regardless of room size.
fn bench_private(c: &mut Criterion) {
    let mut group = c.benchmark_group("private");

    for size in [10, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (hub, mut rxs) = populated_hub(size);
            let sender = conn(0);
            let recipient = conn(1);

            b.iter_custom(|iters| {
                let mut elapsed = Duration::ZERO;
                for _ in 0..iters {
                    let start = Instant::now();
                    let _ = hub.send_message(
                        &sender,
                        Content::Text { body: "psst".into() },
                        Some(black_box(recipient.clone())),
                    );
                    elapsed += start.elapsed();
                    drain(&mut rxs[0]);
                    drain(&mut rxs[1]);
                }
                elapsed
            });
        });
    }

    group.finish();
}

/// Typing start/stop, each re-broadcast per recipient.
fn bench_typing(c: &mut Criterion) {
    let mut group = c.benchmark_group("typing");

    for size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (hub, mut rxs) = populated_hub(size);
            let typist = conn(0);
            let mut is_typing = false;

            b.iter_custom(|iters| {
                let mut elapsed = Duration::ZERO;
                for _ in 0..iters {
                    is_typing = !is_typing;
                    let start = Instant::now();
                    let _ = hub.set_typing(&typist, black_box(is_typing));
                    elapsed += start.elapsed();
                    for rx in &mut rxs {
                        drain(rx);
                    }
                }
                elapsed
            });
        });
    }

    group.finish();
}

/// A join followed by a leave in a room of `size`.
fn bench_presence_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("presence_churn");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (hub, mut rxs) = populated_hub(size);
            let guest = conn(size);

            b.iter_custom(|iters| {
                let mut elapsed = Duration::ZERO;
                for _ in 0..iters {
                    let start = Instant::now();
                    if let Ok(_rx) = hub.connect(&guest) {
                        let _ = hub.identify(&guest, "guest");
                        hub.disconnect(&guest);
                    }
                    elapsed += start.elapsed();
                    for rx in &mut rxs {
                        drain(rx);
                    }
                }
                elapsed
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_broadcast,
    bench_private,
    bench_typing,
    bench_presence_churn,
);
criterion_main!(benches);
