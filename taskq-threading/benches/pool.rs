use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use taskq_threading::{WorkerPool, WorkerPoolBuilder};

fn create_pool(threads: usize) -> (WorkerPool<usize>, flume::Receiver<()>) {
    let (done_tx, done_rx) = flume::unbounded();
    let counter = Arc::new(AtomicUsize::new(0));

    let pool = WorkerPoolBuilder::new()
        .num_threads(threads)
        .build(move |value: usize| {
            // Simulate some work.
            std::thread::sleep(Duration::from_micros(50));
            counter.fetch_add(value, Ordering::SeqCst);
            let _ = done_tx.send(());
        })
        .unwrap();

    (pool, done_rx)
}

fn run_benchmark(pool: &WorkerPool<usize>, done_rx: &flume::Receiver<()>, count: usize) {
    for value in 0..count {
        pool.dispatch(value).unwrap();
    }

    // Wait for all items to complete.
    for _ in 0..count {
        done_rx.recv().unwrap();
    }
}

fn bench_pool_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_scaling");
    group.sampling_mode(criterion::SamplingMode::Flat);
    group.measurement_time(Duration::from_secs(10));

    // Test with different numbers of threads
    for threads in [1, 2, 4, 8].iter() {
        let (pool, done_rx) = create_pool(*threads);

        // Test with different item counts
        for items in [100, 1000].iter() {
            group.bench_with_input(
                BenchmarkId::new(format!("threads_{threads}"), items),
                items,
                |b, &items| {
                    b.iter(|| run_benchmark(&pool, &done_rx, items));
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_pool_scaling);
criterion_main!(benches);
