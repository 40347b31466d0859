use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use std::sync::Arc;

use marlindb::common::types::Rid;
use marlindb::index::btree::BTreeIndex;
use marlindb::storage::buffer::BufferPoolManager;
use marlindb::storage::disk::DiskManager;

// Create temporary db for benchmarking
fn create_bench_environment(buffer_pool_size: usize) -> Arc<BufferPoolManager> {
    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap().to_string();
    let disk_manager = Arc::new(DiskManager::new(path).unwrap());
    let buffer_pool = Arc::new(BufferPoolManager::new(buffer_pool_size, 2, disk_manager));

    // Keep the temp file alive
    std::mem::forget(temp_file);

    buffer_pool
}

fn btree_benchmark(c: &mut Criterion) {
    let buffer_pool_size = 1000;

    let mut group = c.benchmark_group("BTreeIndex");

    for size in [100, 500, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("insert", size), size, |b, &size| {
            let buffer_pool = create_bench_environment(buffer_pool_size);
            let btree = BTreeIndex::<i32>::new("bench_idx", buffer_pool, 64, 64).unwrap();

            let mut rng = rand::thread_rng();
            let keys: Vec<i32> = (0..size).map(|_| rng.r#gen::<i32>()).collect();
            let mut idx = 0;

            b.iter(|| {
                if idx >= keys.len() {
                    idx = 0;
                }
                let key = keys[idx];
                let _ = btree.insert(key, Rid::new(0, idx as u32)).unwrap();
                idx += 1;
            });
        });

        group.bench_with_input(BenchmarkId::new("point_query", size), size, |b, &size| {
            let buffer_pool = create_bench_environment(buffer_pool_size);
            let btree = BTreeIndex::<i32>::new("bench_idx", buffer_pool, 64, 64).unwrap();

            for key in 0..size {
                btree.insert(key, Rid::new(0, key as u32)).unwrap();
            }

            let mut rng = rand::thread_rng();
            b.iter(|| {
                let key = rng.gen_range(0..size);
                let found = btree.get_value(&key).unwrap();
                assert!(found.is_some());
            });
        });

        group.bench_with_input(BenchmarkId::new("full_scan", size), size, |b, &size| {
            let buffer_pool = create_bench_environment(buffer_pool_size);
            let btree = BTreeIndex::<i32>::new("bench_idx", buffer_pool, 64, 64).unwrap();

            for key in 0..size {
                btree.insert(key, Rid::new(0, key as u32)).unwrap();
            }

            b.iter(|| {
                let count = btree.iter().unwrap().count();
                assert_eq!(count, size as usize);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, btree_benchmark);
criterion_main!(benches);
