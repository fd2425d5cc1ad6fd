//! Queue Benchmark
//!
//! Producers push `--count` preallocated items into one queue while
//! consumers pop them until each sees a stop item. Every run builds a
//! fresh queue; min/max/median wall time over `--run` runs is reported.
//!
//! Usage:
//!     cargo build --release -p queue-bench
//!     ./target/release/queue-bench --type=mpmc --producers=4 --consumers=4
//!
//! Single-producer and single-consumer modes refuse more than one thread
//! on the restricted side.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Result};
use clap::{Parser, ValueEnum};
use ioq_core::{adaptive_spin, impl_linked, Mpmc, Mpsc, Queue, QueueHook, Spmc, Spsc, Usage};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum QueueType {
    Mpmc,
    Mpsc,
    Spmc,
    Spsc,
}

#[derive(Debug, Parser)]
#[command(name = "queue-bench", about = "Intrusive queue throughput", args_override_self = true)]
struct Args {
    /// Number of items to push per run
    #[arg(long, default_value_t = 10_000_000)]
    count: usize,

    /// Number of producer threads
    #[arg(long, default_value_t = 1)]
    producers: usize,

    /// Number of consumer threads
    #[arg(long, default_value_t = 1)]
    consumers: usize,

    /// Queue usage mode
    #[arg(long = "type", value_enum, default_value_t = QueueType::Mpmc)]
    queue_type: QueueType,

    /// Number of runs
    #[arg(long, default_value_t = 10)]
    run: usize,
}

impl Args {
    fn validate<U: Usage>(&self) -> Result<()> {
        ensure!(self.run > 0, "--run must be at least 1");
        ensure!(self.producers > 0, "--producers must be at least 1");
        ensure!(self.consumers > 0, "--consumers must be at least 1");
        if !U::MULTI_PRODUCER && self.producers != 1 {
            bail!("{} queue takes exactly one producer, got {}", U::NAME, self.producers);
        }
        if !U::MULTI_CONSUMER && self.consumers != 1 {
            bail!("{} queue takes exactly one consumer, got {}", U::NAME, self.consumers);
        }
        Ok(())
    }
}

struct Item {
    hook: QueueHook,
    value: u64,
    stop: bool,
}

impl_linked!(Item, hook);

impl Item {
    fn new(value: u64, stop: bool) -> Self {
        Self { hook: QueueHook::new(), value, stop }
    }
}

/// One run; returns elapsed time and the sum of popped values.
fn single_run<U: Usage>(args: &Args) -> (Duration, u64) {
    let items: Vec<Item> = (0..args.count as u64).map(|v| Item::new(v, false)).collect();
    let stops: Vec<Item> = (0..args.consumers).map(|_| Item::new(0, true)).collect();
    let queue: Queue<&Item, U> = Queue::new();
    let next = AtomicUsize::new(0);

    let start = Instant::now();
    let sum = thread::scope(|s| {
        let consumers: Vec<_> = (0..args.consumers)
            .map(|_| {
                s.spawn(|| {
                    let mut sum = 0u64;
                    let mut retry = 0;
                    loop {
                        // SAFETY: validate() allows a single consumer for
                        // single-consumer modes.
                        match unsafe { queue.try_pop_unchecked() } {
                            Some(item) if item.stop => return sum,
                            Some(item) => {
                                sum = sum.wrapping_add(item.value);
                                retry = 0;
                            }
                            None => {
                                adaptive_spin::<100>(retry);
                                retry += 1;
                            }
                        }
                    }
                })
            })
            .collect();

        let producers: Vec<_> = (0..args.producers)
            .map(|_| {
                s.spawn(|| loop {
                    let x = next.fetch_add(1, Ordering::Relaxed);
                    match items.get(x) {
                        Some(item) => queue.push(item),
                        None => return,
                    }
                })
            })
            .collect();
        for producer in producers {
            let _ = producer.join();
        }

        for stop in &stops {
            queue.push(stop);
        }
        consumers
            .into_iter()
            .filter_map(|c| c.join().ok())
            .fold(0u64, u64::wrapping_add)
    });
    (start.elapsed(), sum)
}

fn bench<U: Usage>(args: &Args) -> Result<()> {
    args.validate::<U>()?;
    tracing::info!(
        queue = U::NAME,
        count = args.count,
        producers = args.producers,
        consumers = args.consumers,
        runs = args.run,
        "starting"
    );

    let n = args.count as u64;
    let expected = if n == 0 { 0 } else { (n - 1).wrapping_mul(n) / 2 };
    let mut times = Vec::with_capacity(args.run);
    for run in 0..args.run {
        let (elapsed, sum) = single_run::<U>(args);
        ensure!(sum == expected, "run {run}: checksum {sum}, expected {expected}");
        let rate = args.count as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        tracing::debug!(run, ms = elapsed.as_millis() as u64, items_per_sec = rate as u64, "run done");
        times.push(elapsed);
    }

    times.sort();
    println!(
        "min {}ms, max {}ms, median {}ms",
        times[0].as_millis(),
        times[times.len() - 1].as_millis(),
        times[times.len() / 2].as_millis(),
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.queue_type {
        QueueType::Mpmc => bench::<Mpmc>(&args),
        QueueType::Mpsc => bench::<Mpsc>(&args),
        QueueType::Spmc => bench::<Spmc>(&args),
        QueueType::Spsc => bench::<Spsc>(&args),
    }
}
