//! Equality and diff benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mirrorsync_bench::{edited, flat_document, nested_document};
use mirrorsync_value::{deep_equal, diff, Patch};

/// Benchmark structural equality of identical documents.
fn bench_deep_equal(c: &mut Criterion) {
    let mut group = c.benchmark_group("deep_equal");

    for fields in [8, 64, 512].iter() {
        group.throughput(Throughput::Elements(*fields as u64));
        group.bench_with_input(BenchmarkId::new("flat", fields), fields, |b, &fields| {
            let a = flat_document(fields);
            let other = a.clone();
            b.iter(|| black_box(deep_equal(black_box(&a), black_box(&other))));
        });
    }

    for depth in [2, 4, 6].iter() {
        group.bench_with_input(BenchmarkId::new("nested", depth), depth, |b, &depth| {
            let a = nested_document(depth, 4);
            let other = a.clone();
            b.iter(|| black_box(deep_equal(black_box(&a), black_box(&other))));
        });
    }

    group.finish();
}

/// Benchmark diffing documents with a few changed fields.
fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");

    for fields in [8, 64, 512].iter() {
        group.throughput(Throughput::Elements(*fields as u64));
        group.bench_with_input(BenchmarkId::new("flat_one_change", fields), fields, |b, &fields| {
            let old = flat_document(fields);
            let new = edited(&old, 1);
            b.iter(|| black_box(diff(black_box(&old), black_box(&new))));
        });
    }

    group.bench_function("nested_unchanged", |b| {
        let old = nested_document(4, 4);
        let new = old.clone();
        b.iter(|| black_box(diff(black_box(&old), black_box(&new))));
    });

    group.finish();
}

/// Benchmark applying a diff back onto the old document.
fn bench_apply(c: &mut Criterion) {
    c.bench_function("apply_patch", |b| {
        let old = flat_document(64);
        let patch: Patch = diff(&old, &edited(&old, 16));
        b.iter(|| {
            let mut target = old.clone();
            patch.apply_to(black_box(&mut target));
            black_box(target);
        });
    });
}

criterion_group!(benches, bench_deep_equal, bench_diff, bench_apply);

criterion_main!(benches);
