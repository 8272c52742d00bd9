use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use fmupool::scripted::{ScriptedEngine, scripted_spec};
use fmupool::{FmuPool, ModelHandle, PoolConfig, ProcessLauncher};
use serde_json::json;

fn config(workers: usize) -> PoolConfig {
    PoolConfig::default()
        .with_name("bench")
        .with_max_workers(workers)
        .with_available_parallelism(64)
}

/// In-process pool: measures scheduling, mailbox and collection overhead.
fn bench_thread_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("thread_pool_batch");

    for workers in [1usize, 2, 4, 8] {
        let jobs = 64u64;
        group.throughput(Throughput::Elements(jobs));
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, &workers| {
            let engine = Arc::new(ScriptedEngine::new());
            let pool = FmuPool::in_process(ModelHandle::new(json!(null)), engine, config(workers))
                .unwrap();

            b.iter(|| {
                let specs = (0..jobs).map(scripted_spec).collect();
                black_box(pool.run(specs).unwrap());
            });
        });
    }

    group.finish();
}

/// One OS process per job: measures spawn and protocol cost.
fn bench_process_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_pool_batch");
    group.sample_size(10);

    for workers in [2usize, 4] {
        let jobs = 16u64;
        group.throughput(Throughput::Elements(jobs));
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, &workers| {
            let launcher = ProcessLauncher::new(env!("CARGO_BIN_EXE_fmupool-scripted-worker"))
                .env("RUST_LOG", "off");
            let pool = FmuPool::new(
                ModelHandle::new(json!(null)),
                Arc::new(ScriptedEngine::new()),
                launcher,
                config(workers),
            )
            .unwrap();

            b.iter(|| {
                let specs = (0..jobs).map(scripted_spec).collect();
                black_box(pool.run(specs).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_thread_pool, bench_process_pool);
criterion_main!(benches);
