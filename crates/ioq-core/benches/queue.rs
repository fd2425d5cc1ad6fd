//! Queue push/pop benchmarks using criterion.
//!
//! Compares the intrusive queue in each usage mode against
//! `crossbeam_queue::SegQueue` for an uncontended push-then-pop batch.
//!
//! Run with: cargo bench -p ioq-core --bench queue

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use crossbeam_queue::SegQueue;
use ioq_core::{impl_linked, Mpmc, Mpsc, Queue, QueueHook, Spmc, Spsc, Usage};

struct Item {
    hook: QueueHook,
    value: u64,
}

impl_linked!(Item, hook);

fn push_pop<U: Usage>(queue: &Queue<&'static Item, U>, items: &'static [Item]) -> u64 {
    let mut sum = 0;
    for item in items {
        queue.push(item);
    }
    // SAFETY: the benchmark is the only consumer.
    while let Some(item) = unsafe { queue.try_pop_unchecked() } {
        sum += item.value;
    }
    sum
}

fn bench_intrusive(c: &mut Criterion) {
    let mut group = c.benchmark_group("intrusive");
    for batch in [64usize, 1024] {
        let items: &'static [Item] = Box::leak(
            (0..batch as u64)
                .map(|value| Item { hook: QueueHook::new(), value })
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        );

        let spsc: Queue<&Item, Spsc> = Queue::new();
        group.bench_with_input(BenchmarkId::new("spsc", batch), &batch, |b, _| {
            b.iter(|| black_box(push_pop(&spsc, items)))
        });

        let spmc: Queue<&Item, Spmc> = Queue::new();
        group.bench_with_input(BenchmarkId::new("spmc", batch), &batch, |b, _| {
            b.iter(|| black_box(push_pop(&spmc, items)))
        });

        let mpsc: Queue<&Item, Mpsc> = Queue::new();
        group.bench_with_input(BenchmarkId::new("mpsc", batch), &batch, |b, _| {
            b.iter(|| black_box(push_pop(&mpsc, items)))
        });

        let mpmc: Queue<&Item, Mpmc> = Queue::new();
        group.bench_with_input(BenchmarkId::new("mpmc", batch), &batch, |b, _| {
            b.iter(|| black_box(push_pop(&mpmc, items)))
        });
    }
    group.finish();
}

fn bench_segqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("segqueue");
    for batch in [64u64, 1024] {
        let queue = SegQueue::new();
        group.bench_with_input(BenchmarkId::new("mpmc", batch), &batch, |b, &batch| {
            b.iter(|| {
                for value in 0..batch {
                    queue.push(value);
                }
                let mut sum = 0;
                while let Some(value) = queue.pop() {
                    sum += value;
                }
                black_box(sum)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_intrusive, bench_segqueue);
criterion_main!(benches);
