use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use kvikk::cache::ModuleCache;

fn benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");

    for &entries in [16usize, 256].iter() {
        let cache = ModuleCache::new(1 << 20);
        for i in 0..entries {
            cache.insert(format!("mod{i}"), i, 1, None).unwrap();
        }
        // "mod0" sits at the tail, so this is the full linear scan.
        group.bench_with_input(
            BenchmarkId::new("lookup_hit", entries),
            &entries,
            |b, _| b.iter(|| cache.lookup("mod0")),
        );
        group.bench_with_input(
            BenchmarkId::new("lookup_miss", entries),
            &entries,
            |b, _| b.iter(|| cache.lookup("absent")),
        );
    }

    group.bench_function("insert_evict_churn", |b| {
        let cache = ModuleCache::new(64);
        let mut i = 0u64;
        b.iter(|| {
            let _ = cache.insert(format!("m{i}"), i, 1, None);
            i += 1;
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
