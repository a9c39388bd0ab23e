//! Persistent structure benchmarks.

use cellstore_core::{PersistentArray, PersistentLabeledMap, PersistentMap};
use cellstore_storage::CellOptions;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use tempfile::TempDir;

fn fast() -> CellOptions {
    CellOptions::new().sync_on_write(false)
}

/// Benchmark filling an array from the back and from the front.
///
/// Front inserts pay for reindexing; the gap to back inserts should stay
/// a small constant factor.
fn bench_array_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_fill");
    group.sample_size(10);

    for count in [50u32, 200].iter() {
        group.bench_with_input(BenchmarkId::new("push", count), count, |b, &count| {
            b.iter_batched(
                || TempDir::new().unwrap(),
                |dir| {
                    let mut array = PersistentArray::open(dir.path().join("a"), fast()).unwrap();
                    for i in 0..count {
                        array.push(black_box(i)).unwrap();
                    }
                },
                BatchSize::PerIteration,
            );
        });
        group.bench_with_input(BenchmarkId::new("push_front", count), count, |b, &count| {
            b.iter_batched(
                || TempDir::new().unwrap(),
                |dir| {
                    let mut array = PersistentArray::open(dir.path().join("a"), fast()).unwrap();
                    for i in 0..count {
                        array.push_front(black_box(i)).unwrap();
                    }
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

/// Benchmark a deque workload: push at the back, pop at the front.
fn bench_array_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_queue");
    group.sample_size(20);

    for (label, options) in [("exclusive", fast()), ("shared", CellOptions::shared().sync_on_write(false))] {
        group.bench_function(label, |b| {
            let dir = TempDir::new().unwrap();
            let mut array = PersistentArray::open(dir.path().join("q"), options.clone()).unwrap();
            for i in 0..16u64 {
                array.push(i).unwrap();
            }
            b.iter(|| {
                let head = array.pop_front().unwrap();
                array.push(black_box(head.unwrap_or_default())).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark map inserts, which rewrite the definitions each time.
fn bench_map_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_put");
    group.sample_size(10);

    for count in [50u32, 200].iter() {
        group.bench_with_input(BenchmarkId::new("map", count), count, |b, &count| {
            b.iter_batched(
                || TempDir::new().unwrap(),
                |dir| {
                    let mut map = PersistentMap::open(dir.path().join("m"), fast()).unwrap();
                    for i in 0..count {
                        map.put(format!("key{i}"), black_box(&i)).unwrap();
                    }
                },
                BatchSize::PerIteration,
            );
        });
        group.bench_with_input(BenchmarkId::new("labeled_extend", count), count, |b, &count| {
            b.iter_batched(
                || TempDir::new().unwrap(),
                |dir| {
                    let mut map = PersistentLabeledMap::open(dir.path().join("l"), fast()).unwrap();
                    map.extend((0..count).map(|i| (format!("key{i}"), i))).unwrap();
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

/// Benchmark lookups on a populated map.
fn bench_map_get(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let mut map = PersistentMap::open(dir.path().join("m"), fast()).unwrap();
    for i in 0..100u32 {
        map.put(i, &format!("value{i}")).unwrap();
    }

    c.bench_function("map_get", |b| {
        b.iter(|| black_box(map.get(black_box(&42)).unwrap()));
    });
}

criterion_group!(benches, bench_array_fill, bench_array_queue, bench_map_put, bench_map_get);
criterion_main!(benches);
