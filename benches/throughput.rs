//! Throughput Benchmark for jcache
//!
//! Measures the storage backends under various workloads.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use jcache::storage::{DurableStorage, MemoryStorage, ShardedStorage, Storage};
use std::sync::Arc;
use std::time::Duration;

fn backends() -> Vec<(&'static str, Arc<dyn Storage>)> {
    let memory: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let sharded: Arc<dyn Storage> = Arc::new(ShardedStorage::new(16).unwrap());
    vec![("memory", memory), ("sharded_16", sharded)]
}

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    for (name, storage) in backends() {
        group.bench_function(format!("{}_small", name), |b| {
            let mut i = 0u64;
            b.iter(|| {
                let _ = storage.set(&format!("key:{}", i), "small_value", 0);
                i += 1;
            });
        });

        let value = "x".repeat(1024); // 1KB value
        group.bench_function(format!("{}_1kb", name), |b| {
            let mut i = 0u64;
            b.iter(|| {
                let _ = storage.set(&format!("medium:{}", i), &value, 0);
                i += 1;
            });
        });
    }

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    for (name, storage) in backends() {
        for i in 0..100_000 {
            storage
                .set(&format!("key:{}", i), &format!("value:{}", i), 0)
                .unwrap();
        }

        group.bench_function(format!("{}_existing", name), |b| {
            let mut i = 0u64;
            b.iter(|| {
                black_box(storage.get(&format!("key:{}", i % 100_000)).ok());
                i += 1;
            });
        });

        group.bench_function(format!("{}_missing", name), |b| {
            let mut i = 0u64;
            b.iter(|| {
                black_box(storage.get(&format!("missing:{}", i)).ok());
                i += 1;
            });
        });
    }

    group.finish();
}

/// Benchmark mixed workload (80% reads, 20% writes)
fn bench_mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed");
    group.throughput(Throughput::Elements(1));

    for (name, storage) in backends() {
        for i in 0..10_000 {
            storage.set(&format!("key:{}", i), "value", 0).unwrap();
        }

        group.bench_function(format!("{}_80_read_20_write", name), |b| {
            let mut i = 0u64;
            b.iter(|| {
                if i % 5 == 0 {
                    let _ = storage.update(&format!("key:{}", i % 10_000), "updated");
                } else {
                    black_box(storage.get(&format!("key:{}", i % 10_000)).ok());
                }
                i += 1;
            });
        });
    }

    group.finish();
}

/// Benchmark hash and list operations
fn bench_collections(c: &mut Criterion) {
    let storage = MemoryStorage::new();
    storage.hash_create("hash", 0).unwrap();
    storage.list_create("list", 0).unwrap();

    let mut group = c.benchmark_group("collections");
    group.throughput(Throughput::Elements(1));

    group.bench_function("hash_set", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let _ = storage.hash_set("hash", &format!("field{}", i % 1000), "value");
            i += 1;
        });
    });

    group.bench_function("list_push_pop", |b| {
        b.iter(|| {
            let _ = storage.list_right_push("list", "value");
            black_box(storage.list_left_pop("list").ok());
        });
    });

    group.finish();
}

/// Benchmark concurrent writers
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    let makers: [(&str, fn() -> Arc<dyn Storage>); 2] = [
        ("memory", || Arc::new(MemoryStorage::new())),
        ("sharded_16", || Arc::new(ShardedStorage::new(16).unwrap())),
    ];

    for (name, make) in makers {
        group.bench_function(format!("{}_4_threads", name), |b| {
            b.iter(|| {
                let storage = make();
                let handles: Vec<_> = (0..4)
                    .map(|t| {
                        let storage = Arc::clone(&storage);
                        thread::spawn(move || {
                            for i in 0..10_000 {
                                let key = format!("key:{}:{}", t, i);
                                let _ = storage.set(&key, "value", 0);
                                let _ = storage.get(&key);
                            }
                        })
                    })
                    .collect();

                for handle in handles {
                    handle.join().unwrap();
                }

                black_box(storage.keys().map(|k| k.len()).ok());
            });
        });
    }

    group.finish();
}

/// Benchmark the redb-backed store
fn bench_durable(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let _guard = runtime.enter();
    let dir = tempfile::tempdir().unwrap();
    let storage =
        DurableStorage::open(dir.path().join("bench.redb"), Duration::from_secs(3600)).unwrap();

    for i in 0..1_000 {
        storage.set(&format!("key:{}", i), "value", 0).unwrap();
    }

    let mut group = c.benchmark_group("durable");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(storage.get(&format!("key:{}", i % 1_000)).ok());
            i += 1;
        });
    });

    group.bench_function("update", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let _ = storage.update(&format!("key:{}", i % 1_000), "updated");
            i += 1;
        });
    });

    group.finish();
    runtime.block_on(storage.close());
}

/// Benchmark KEYS
fn bench_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("keys");

    for (name, storage) in backends() {
        for i in 0..1_000 {
            storage.set(&format!("user:{}", i), "user_data", 0).unwrap();
            storage.set(&format!("session:{}", i), "session_data", 0).unwrap();
            storage.set(&format!("cache:{}", i), "cache_data", 0).unwrap();
        }

        group.bench_function(format!("{}_keys_all", name), |b| {
            b.iter(|| {
                black_box(storage.keys().ok());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_mixed,
    bench_collections,
    bench_concurrent,
    bench_durable,
    bench_keys,
);

criterion_main!(benches);
