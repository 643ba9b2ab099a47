// Criterion benchmarks for offload-metrics
//
// Run benchmarks with:
//   cargo bench -p offload-metrics

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use offload_metrics::{FunctionMetricsRegistry, LatencyHistogram};

fn bench_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("record");

    let registry = FunctionMetricsRegistry::new();
    group.bench_function("single_function", |b| {
        b.iter(|| registry.record(black_box("double"), black_box(250), black_box(true)));
    });

    let functions = ["fib", "sort", "hash", "resize", "parse"];
    group.bench_function("five_functions", |b| {
        b.iter(|| {
            for name in &functions {
                registry.record(black_box(name), black_box(1_200), black_box(true));
            }
        });
    });

    group.finish();
}

fn bench_histogram(c: &mut Criterion) {
    let mut group = c.benchmark_group("histogram");

    for samples in [100u64, 10_000] {
        let histogram = LatencyHistogram::new();
        for i in 0..samples {
            histogram.record(i * 7 % 50_000);
        }
        group.bench_with_input(BenchmarkId::new("summary", samples), &histogram, |b, h| {
            b.iter(|| h.summary());
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let registry = FunctionMetricsRegistry::new();
    for i in 0..100u64 {
        registry.record(&format!("fn_{}", i % 10), i * 13, i % 3 != 0);
    }

    c.bench_function("snapshot_10_functions", |b| b.iter(|| registry.snapshot()));
}

criterion_group!(benches, bench_record, bench_histogram, bench_snapshot);
criterion_main!(benches);
