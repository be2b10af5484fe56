// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Core tree operation benchmarks across the three storage modes.
//!
//! Measures performance of:
//! - put() - sequential insert including splits and space management
//! - get() - point lookup on a populated tree
//! - range drain - iterator throughput across leaf boundaries
//!
//! ## Performance Targets
//! - put: < 10us per record in RAM (all modes)
//! - get: < 2us per lookup on 10k records
//! - range drain: > 1M records/s

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use reedtree::storage::{MemStorage, StorageDriver};
use reedtree::tree::{compare_u32_le, BPlusTree, StorageMode, TreeConfig};

const PAGE: usize = 512;

fn config(mode: StorageMode) -> TreeConfig {
    TreeConfig {
        page_size: PAGE,
        key_size: 4,
        data_size: 12,
        frame_count: 3,
        erase_block_pages: 8,
        mode,
        mapping_bytes: 256,
        compare: compare_u32_le,
    }
}

fn make_tree(mode: StorageMode, capacity: u32) -> BPlusTree {
    let driver: Box<dyn StorageDriver> = match mode {
        StorageMode::UpdateInPlace => Box::new(MemStorage::new(capacity, PAGE)),
        _ => Box::new(MemStorage::strict(capacity, PAGE)),
    };
    BPlusTree::create(driver, config(mode)).unwrap()
}

fn data(i: u32) -> [u8; 12] {
    let mut d = [0u8; 12];
    for chunk in d.chunks_mut(4) {
        chunk.copy_from_slice(&i.to_le_bytes());
    }
    d
}

const MODES: [(&str, StorageMode); 3] = [
    ("in_place", StorageMode::UpdateInPlace),
    ("cow", StorageMode::CopyOnWrite),
    ("overwrite", StorageMode::InPageOverwrite),
];

/// Benchmark sequential put().
fn bench_put_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_sequential");

    for (name, mode) in MODES {
        for count in [1_000u32, 10_000] {
            group.throughput(Throughput::Elements(count as u64));
            group.bench_with_input(
                BenchmarkId::new(name, count),
                &count,
                |b, &count| {
                    b.iter_batched(
                        || make_tree(mode, 16 * 1024),
                        |mut tree| {
                            for i in 0..count {
                                tree.put(&i.to_le_bytes(), &data(i)).unwrap();
                            }
                            tree
                        },
                        criterion::BatchSize::LargeInput,
                    );
                },
            );
        }
    }

    group.finish();
}

/// Benchmark point get() on a populated tree.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    for (name, mode) in MODES {
        let mut tree = make_tree(mode, 16 * 1024);
        for i in 0..10_000u32 {
            tree.put(&i.to_le_bytes(), &data(i)).unwrap();
        }

        group.throughput(Throughput::Elements(1));
        group.bench_function(BenchmarkId::new(name, 10_000), |b| {
            let mut out = [0u8; 12];
            let mut i = 0u32;
            b.iter(|| {
                // Stride through the key space to defeat frame luck.
                i = (i + 7919) % 10_000;
                black_box(tree.get(&i.to_le_bytes(), &mut out).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark draining a range across many leaves.
fn bench_range_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_drain");
    group.sample_size(20); // Whole-tree scans are expensive per iteration.

    for (name, mode) in MODES {
        let mut tree = make_tree(mode, 16 * 1024);
        for i in 0..10_000u32 {
            tree.put(&i.to_le_bytes(), &data(i)).unwrap();
        }

        group.throughput(Throughput::Elements(10_000));
        group.bench_function(BenchmarkId::new(name, 10_000), |b| {
            b.iter(|| {
                let mut it = tree.range_scan(None, None).unwrap();
                let mut key = [0u8; 4];
                let mut out = [0u8; 12];
                let mut n = 0u32;
                while tree.next_record(&mut it, &mut key, &mut out).unwrap() {
                    n += 1;
                }
                assert_eq!(n, 10_000);
                black_box(n)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_put_sequential, bench_get, bench_range_drain);
criterion_main!(benches);
