//! Interpreter benchmarks using criterion.
//!
//! Benchmarks for effect construction, sequential interpretation,
//! failure handling, and fork/join throughput.
//!
//! Run with: cargo bench --bench interpreter_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ichor::{Effect, Runtime};

/// Benchmark building effect descriptions without evaluating them.
fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("construction");

    group.bench_function("succeed", |b| {
        b.iter(|| black_box(Effect::<i64, String>::succeed(black_box(42))));
    });

    group.bench_function("map_chain_100", |b| {
        b.iter(|| {
            let mut program = Effect::<i64, String>::succeed(0);
            for _ in 0..100 {
                program = program.map(|n| n + 1);
            }
            black_box(program)
        });
    });

    group.finish();
}

/// Benchmark sequential interpretation at varying chain depths.
fn bench_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential");
    let rt = Runtime::new();

    for depth in [10u64, 100, 1000] {
        let mut program = Effect::<u64, String>::succeed(0);
        for _ in 0..depth {
            program = program.map(|n| n + 1);
        }
        group.throughput(Throughput::Elements(depth));
        group.bench_with_input(BenchmarkId::new("map_chain", depth), &program, |b, program| {
            b.iter(|| black_box(rt.run_sync(program)));
        });
    }

    group.finish();
}

/// Benchmark the recovery path.
fn bench_failure_handling(c: &mut Criterion) {
    let mut group = c.benchmark_group("failure");
    let rt = Runtime::new();

    let program = Effect::<i64, String>::fail("expected".into())
        .catch_all(|_| Effect::succeed(0));
    group.bench_function("fail_catch_all", |b| {
        b.iter(|| black_box(rt.run_sync(&program)));
    });

    let sandboxed = Effect::<i64, String>::fail("expected".into()).sandbox().either();
    group.bench_function("sandbox_either", |b| {
        b.iter(|| black_box(rt.run_sync(&sandboxed)));
    });

    group.finish();
}

/// Benchmark fork/join round trips.
fn bench_fork_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("fork_join");
    let rt = Runtime::new();

    let single = Effect::<i64, String>::succeed(1)
        .fork()
        .flat_map(|fiber| fiber.join());
    group.bench_function("single", |b| {
        b.iter(|| black_box(rt.run_sync(&single)));
    });

    // fan out a small batch and join it back sequentially
    let mut batch = Effect::<i64, String>::succeed(0);
    for _ in 0..16 {
        batch = batch.flat_map(|acc| {
            Effect::<i64, String>::succeed(1)
                .fork()
                .flat_map(|fiber| fiber.join())
                .map(move |n| acc + n)
        });
    }
    group.throughput(Throughput::Elements(16));
    group.bench_function("fan_out_16", |b| {
        b.iter(|| black_box(rt.run_sync(&batch)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_construction,
    bench_sequential,
    bench_failure_handling,
    bench_fork_join
);
criterion_main!(benches);
