//! Mirror round-trip benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mirrorsync_bench::flat_document;
use mirrorsync_engine::{MirrorOptions, SyncRegistry};
use mirrorsync_store::{MemoryStore, Reference};
use mirrorsync_value::Value;
use std::sync::Arc;

/// Benchmark a local edit: diff, write, and the skipped echo.
fn bench_local_edit(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_edit");

    for (name, diff_only) in [("full", false), ("diff", true)] {
        group.bench_function(name, |b| {
            let store = Arc::new(MemoryStore::new());
            store.set("docs/a", flat_document(64)).unwrap();
            let registry = SyncRegistry::new(store.clone());
            let reference = Reference::doc("docs/a").unwrap();
            let mirror = registry.get_or_create(
                &reference,
                Some(MirrorOptions::new().with_ignore_unchanged_fields(diff_only)),
            );
            let entity = mirror.as_entity().unwrap().clone();

            let mut n = 0i64;
            b.iter(|| {
                n += 1;
                entity.edit(|value| {
                    if let Some(fields) = value.as_map_mut() {
                        fields.insert("field_0".to_string(), Value::Integer(black_box(n)));
                    }
                });
            });
        });
    }

    group.finish();
}

/// Benchmark remote updates fanned out to a query mirror.
fn bench_query_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_remote_update");

    for members in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(members), members, |b, &members| {
            let store = Arc::new(MemoryStore::new());
            for i in 0..members {
                store.set(&format!("docs/{i:05}"), flat_document(8)).unwrap();
            }
            let registry = SyncRegistry::new(store.clone());
            let reference = Reference::collection("docs").unwrap();
            registry.get_or_create(&reference, None);

            let mut n = 0i64;
            b.iter(|| {
                n += 1;
                let mut doc = flat_document(8);
                if let Some(fields) = doc.as_map_mut() {
                    fields.insert("field_0".to_string(), Value::Integer(n));
                }
                store.set("docs/00000", black_box(doc)).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_local_edit, bench_query_fanout);

criterion_main!(benches);
