//! Performance benchmarks for tag-tally
//!
//! Run with: cargo bench
//!
//! These benchmarks measure:
//! - Increment throughput of each buffer strategy
//! - Flush cost against an in-memory store
//! - Concurrent ingestion with flushes running alongside

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tokio::runtime::Runtime;

use tag_tally::buffer::{AggregationBuffer, BufferKind, DeepCopyBuffer, NaiveBuffer, SwapBuffer};
use tag_tally::{MemoryStore, Metrics, ShardedCounter};

const KINDS: [BufferKind; 3] = [BufferKind::Naive, BufferKind::DeepCopy, BufferKind::Swap];

fn create_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn buffer(kind: BufferKind, store: Arc<MemoryStore>) -> Arc<dyn AggregationBuffer> {
    let metrics = Arc::new(Metrics::new());
    match kind {
        BufferKind::Naive => Arc::new(NaiveBuffer::new(store, metrics)),
        BufferKind::DeepCopy => Arc::new(DeepCopyBuffer::new(store, metrics)),
        BufferKind::Swap => Arc::new(SwapBuffer::new(store, metrics)),
    }
}

fn tags(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("tag{}", i)).collect()
}

/// Single caller incrementing a small key set
fn bench_increment(c: &mut Criterion) {
    let rt = create_runtime();
    let mut group = c.benchmark_group("increment");
    let keys = tags(64);
    group.throughput(Throughput::Elements(keys.len() as u64));

    for kind in KINDS {
        let buffer = buffer(kind, Arc::new(MemoryStore::new()));
        group.bench_function(BenchmarkId::from_parameter(kind), |b| {
            b.iter(|| {
                rt.block_on(async {
                    for key in &keys {
                        buffer.increment(black_box(key), 1).await;
                    }
                })
            });
        });
    }

    group.finish();
}

/// Flush N distinct keys into a fresh memory store
fn bench_flush(c: &mut Criterion) {
    let rt = create_runtime();
    let mut group = c.benchmark_group("flush");

    for size in [100usize, 1_000, 10_000] {
        let keys = tags(size);
        group.throughput(Throughput::Elements(size as u64));

        for kind in KINDS {
            group.bench_with_input(BenchmarkId::new(kind.to_string(), size), &keys, |b, keys| {
                b.iter(|| {
                    rt.block_on(async {
                        let buffer = buffer(kind, Arc::new(MemoryStore::new()));
                        for key in keys {
                            buffer.increment(key, 1).await;
                        }
                        black_box(buffer.flush().await);
                    })
                });
            });
        }
    }

    group.finish();
}

/// Eight producers with a flush every 1000 increments
fn bench_concurrent_ingest(c: &mut Criterion) {
    let rt = create_runtime();
    let mut group = c.benchmark_group("concurrent_ingest");
    let producers = 8usize;
    let per_producer = 2_000usize;
    group.throughput(Throughput::Elements((producers * per_producer) as u64));
    group.sample_size(20);

    for kind in KINDS {
        group.bench_function(BenchmarkId::from_parameter(kind), |b| {
            b.iter(|| {
                rt.block_on(async {
                    let buffer = buffer(kind, Arc::new(MemoryStore::new()));
                    let mut tasks = Vec::new();
                    for p in 0..producers {
                        let buffer = Arc::clone(&buffer);
                        tasks.push(tokio::spawn(async move {
                            for i in 0..per_producer {
                                let key = format!("tag{}", (p * 31 + i) % 200);
                                buffer.increment(&key, 1).await;
                                if i % 1_000 == 999 {
                                    buffer.flush().await;
                                }
                            }
                        }));
                    }
                    for task in tasks {
                        task.await.unwrap();
                    }
                    black_box(buffer.flush().await);
                })
            });
        });
    }

    group.finish();
}

/// Sharded vs. single atomic counter under thread contention
fn bench_sharded_counter(c: &mut Criterion) {
    let mut group = c.benchmark_group("sharded_counter");
    let threads = 8;
    let per_thread = 10_000u64;
    group.throughput(Throughput::Elements(threads as u64 * per_thread));

    group.bench_function("sharded", |b| {
        b.iter(|| {
            let counter = Arc::new(ShardedCounter::new());
            std::thread::scope(|s| {
                for _ in 0..threads {
                    let counter = Arc::clone(&counter);
                    s.spawn(move || {
                        for _ in 0..per_thread {
                            counter.increment();
                        }
                    });
                }
            });
            black_box(counter.sum())
        });
    });

    group.bench_function("single_atomic", |b| {
        use std::sync::atomic::{AtomicU64, Ordering};
        b.iter(|| {
            let counter = Arc::new(AtomicU64::new(0));
            std::thread::scope(|s| {
                for _ in 0..threads {
                    let counter = Arc::clone(&counter);
                    s.spawn(move || {
                        for _ in 0..per_thread {
                            counter.fetch_add(1, Ordering::Relaxed);
                        }
                    });
                }
            });
            black_box(counter.load(Ordering::Relaxed))
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_increment,
    bench_flush,
    bench_concurrent_ingest,
    bench_sharded_counter
);
criterion_main!(benches);
