//! Criterion micro-benchmarks for batch queue ingress, seal, and drain.

use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tandem_bench::{Bump, Counter};
use tandem_core::{BoxedPacket, TickId};
use tandem_engine::BatchQueue;

fn drain_all(queue: &BatchQueue<Counter>, counter: &mut Counter) {
    while let Some(mut batch) = queue.drain_next() {
        while let Some(packet) = batch.pop_front() {
            let _ = packet.apply(counter);
        }
        batch.mark_drained();
    }
}

fn bench_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_enqueue");
    for n in [64u64, 1024] {
        group.throughput(Throughput::Elements(n));
        group.bench_function(format!("{n}_packets"), |b| {
            b.iter_batched(
                BatchQueue::<Counter>::new,
                |queue| {
                    for i in 0..n {
                        queue.enqueue(Box::new(Bump(i))).unwrap();
                    }
                    black_box(queue.open_len())
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_seal_drain_cycle(c: &mut Criterion) {
    let queue = BatchQueue::<Counter>::new();
    let mut counter = Counter::default();
    let mut tick = 0u64;
    c.bench_function("queue_seal_drain_256", |b| {
        b.iter(|| {
            for i in 0..256 {
                let packet: BoxedPacket<Counter> = Box::new(Bump(i));
                queue.enqueue(packet).unwrap();
            }
            tick += 1;
            queue.seal_batch(TickId(tick)).unwrap();
            drain_all(&queue, &mut counter);
            black_box(counter.total)
        });
    });
}

fn bench_contended_enqueue(c: &mut Criterion) {
    c.bench_function("queue_enqueue_4_writers_4096", |b| {
        b.iter(|| {
            let queue = Arc::new(BatchQueue::<Counter>::new());
            let writers: Vec<_> = (0..4)
                .map(|_| {
                    let queue = Arc::clone(&queue);
                    thread::spawn(move || {
                        for i in 0..1024 {
                            queue.enqueue(Box::new(Bump(i))).unwrap();
                        }
                    })
                })
                .collect();
            for w in writers {
                w.join().unwrap();
            }
            let receipt = queue.seal_batch(TickId(1)).unwrap();
            black_box(receipt.packets)
        });
    });
}

criterion_group!(
    benches,
    bench_enqueue,
    bench_seal_drain_cycle,
    bench_contended_enqueue
);
criterion_main!(benches);
