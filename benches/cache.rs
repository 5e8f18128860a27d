//! Cache benchmarks: content hashing, table probes, and the resolve path.

use basalt::gpu::{Extent2d, Format, TextureDesc, TextureUsage};
use basalt::graph::ObjectCache;
use basalt::hash::content_hash;
use basalt::table::HashTable;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::convert::Infallible;

fn texture_desc(width: u32) -> TextureDesc {
    TextureDesc {
        format: Format::Rgba8Unorm,
        extent: Extent2d { width, height: 1080 },
        usage: TextureUsage {
            color_attachment: true,
            sampled: true,
            ..Default::default()
        },
        samples: 1,
    }
}

fn bench_content_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("content_hash");
    let desc = texture_desc(1920);

    group.throughput(Throughput::Elements(1));
    group.bench_function("texture_desc", |b| {
        b.iter(|| content_hash(std::hint::black_box(&desc)));
    });

    group.finish();
}

fn bench_table_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_lookup");

    for entries in [16u64, 256, 4096] {
        let mut table = HashTable::new();
        for i in 0..entries {
            table.insert(content_hash(&i), i, i);
        }
        let probe = entries / 2;
        let hash = content_hash(&probe);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(entries), &entries, |b, _| {
            b.iter(|| table.get(hash, &probe));
        });
    }

    group.finish();
}

fn bench_cache_resolve_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_resolve_hit");

    for entries in [8u32, 64, 512] {
        let mut cache: ObjectCache<TextureDesc, u64> = ObjectCache::new();
        for i in 0..entries {
            cache
                .resolve(&texture_desc(i + 1), 0, || Ok::<_, Infallible>(i as u64))
                .unwrap();
        }
        let key = texture_desc(entries / 2 + 1);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(entries), &entries, |b, _| {
            let mut frame = 1u64;
            b.iter(|| {
                frame += 1;
                cache
                    .resolve(&key, frame, || Ok::<_, Infallible>(0))
                    .unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_content_hash,
    bench_table_lookup,
    bench_cache_resolve_hit
);
criterion_main!(benches);
