use adaptive_cache::{AdaptiveCache, CacheOptions, PolicyKind};
use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("adaptive_cache");

    for policy in [PolicyKind::Lru, PolicyKind::Lfu, PolicyKind::Fifo] {
        let cache = AdaptiveCache::new(CacheOptions {
            shard_count: 16,
            initial_capacity: 100_000,
            enable_adaptive_sizing: false,
            policy,
            ..CacheOptions::default()
        });

        let keys: Vec<Bytes> = (0..10_000)
            .map(|i| Bytes::from(format!("key-{:08}", i)))
            .collect();
        let value = Bytes::from_static(&[0u8; 64]);

        for key in &keys {
            cache.put(key.clone(), value.clone());
        }

        group.bench_function(format!("get_hit/{}", policy.name()), |b| {
            let mut i = 0usize;
            b.iter(|| {
                let key = &keys[i % keys.len()];
                i = i.wrapping_add(1);
                std::hint::black_box(cache.get(key));
            });
        });

        group.bench_function(format!("put_overwrite/{}", policy.name()), |b| {
            let mut i = 0usize;
            b.iter(|| {
                let key = keys[i % keys.len()].clone();
                i = i.wrapping_add(1);
                cache.put(key, value.clone());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cache);
criterion_main!(benches);
