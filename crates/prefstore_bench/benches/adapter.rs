//! Adapter benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use prefstore_bench::{keys, simple_map};
use prefstore_core::{EngineOptions, KvStorage, LogStoreMount, StorageConfig};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

fn in_memory(rt: &Runtime) -> Arc<KvStorage> {
    let config = StorageConfig::new(EngineOptions::LogStore(LogStoreMount::InMemory));
    Arc::new(rt.block_on(KvStorage::open(config)).unwrap())
}

fn bench_set_get(c: &mut Criterion) {
    let rt = runtime();
    let storage = in_memory(&rt);
    let mut group = c.benchmark_group("adapter");

    group.bench_function("set_map", |b| {
        b.to_async(&rt).iter(|| {
            let storage = Arc::clone(&storage);
            async move { black_box(storage.set("prefs", simple_map()).await.unwrap()) }
        });
    });

    rt.block_on(storage.set("prefs", simple_map())).unwrap();
    group.bench_function("get_map", |b| {
        b.to_async(&rt).iter(|| {
            let storage = Arc::clone(&storage);
            async move { black_box(storage.get("prefs").await.unwrap()) }
        });
    });

    group.finish();
}

fn bench_enumerate(c: &mut Criterion) {
    let rt = runtime();
    let storage = in_memory(&rt);
    rt.block_on(async {
        for key in keys(1_000) {
            storage.set(&key, 1i64).await.unwrap();
        }
    });

    let mut group = c.benchmark_group("adapter_enumerate_1000");
    group.bench_function("keys", |b| {
        b.to_async(&rt).iter(|| {
            let storage = Arc::clone(&storage);
            async move { black_box(storage.keys().await.unwrap()) }
        });
    });
    group.bench_function("iterate", |b| {
        b.to_async(&rt).iter(|| {
            let storage = Arc::clone(&storage);
            async move {
                let mut total = 0i64;
                storage
                    .iterate(|value, _, _| {
                        total += value.as_integer().unwrap_or(0);
                        Ok::<_, std::convert::Infallible>(())
                    })
                    .await
                    .unwrap();
                black_box(total)
            }
        });
    });
    group.bench_function("key_at_middle", |b| {
        b.to_async(&rt).iter(|| {
            let storage = Arc::clone(&storage);
            async move { black_box(storage.key_at(500).await.unwrap()) }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_set_get, bench_enumerate);
criterion_main!(benches);
