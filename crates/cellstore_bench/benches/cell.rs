//! Cell benchmarks.

use cellstore_codec::{CborCodec, Codec, RawCodec};
use cellstore_storage::{Cell, CellOptions};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tempfile::TempDir;

/// Create deterministic data of given size.
fn sample_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

/// Benchmark whole-file writes with and without `sync_all`.
fn bench_cell_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("cell_write");
    group.sample_size(30);

    for (label, sync) in [("sync", true), ("nosync", false)] {
        for size in [64, 4096].iter() {
            group.throughput(Throughput::Bytes(*size as u64));
            group.bench_with_input(BenchmarkId::new(label, size), size, |b, &size| {
                let temp_dir = TempDir::new().unwrap();
                let options = CellOptions::new().sync_on_write(sync);
                let cell = Cell::open(
                    temp_dir.path().join("cell"),
                    options,
                    Some(Vec::<u8>::new()),
                    Arc::new(RawCodec),
                )
                .unwrap();
                let data = sample_data(size);

                b.iter(|| cell.write(black_box(&data)).unwrap());
            });
        }
    }

    group.finish();
}

/// Benchmark reads served from the cache versus from disk.
fn bench_cell_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("cell_read");

    for (label, caching) in [("cached", true), ("uncached", false)] {
        group.bench_function(label, |b| {
            let temp_dir = TempDir::new().unwrap();
            let cell = Cell::open(
                temp_dir.path().join("cell"),
                CellOptions::new().caching(caching),
                Some((0..64).collect::<Vec<u32>>()),
                Arc::new(CborCodec),
            )
            .unwrap();

            b.iter(|| black_box(cell.value().unwrap()));
        });
    }

    group.finish();
}

/// Benchmark the default CBOR codec on its own.
fn bench_cbor_codec(c: &mut Criterion) {
    let value: Vec<(String, u64)> = (0..32).map(|i| (format!("key{i}"), i)).collect();
    let bytes = CborCodec.encode(&value).unwrap();

    c.bench_function("cbor_encode", |b| {
        b.iter(|| black_box(CborCodec.encode(black_box(&value)).unwrap()));
    });
    c.bench_function("cbor_decode", |b| {
        b.iter(|| {
            let decoded: Vec<(String, u64)> = CborCodec.decode(black_box(&bytes)).unwrap();
            black_box(decoded)
        });
    });
}

criterion_group!(benches, bench_cell_write, bench_cell_read, bench_cbor_codec);
criterion_main!(benches);
