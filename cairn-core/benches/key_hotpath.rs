use cairn_core::NamespacedKey;
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn bench_key_encode(c: &mut Criterion) {
    let plain = NamespacedKey::new("shop", "products", "sku:000123");
    let dashed = NamespacedKey::new("shop-eu", "price-lists", "2024-01-01%draft");

    c.bench_function("key/encode_plain", |b| {
        b.iter(|| black_box(black_box(&plain).encode()));
    });

    c.bench_function("key/encode_escaped", |b| {
        b.iter(|| black_box(black_box(&dashed).encode()));
    });
}

fn bench_key_decode(c: &mut Criterion) {
    let encoded = NamespacedKey::new("shop-eu", "price-lists", "2024-01-01%draft").encode();

    c.bench_function("key/decode_escaped", |b| {
        b.iter(|| black_box(NamespacedKey::decode(black_box(&encoded))));
    });
}

fn bench_group_membership(c: &mut Criterion) {
    let keys: Vec<String> = (0..1_000)
        .map(|i| NamespacedKey::new("shop", format!("g{}", i % 10), i.to_string()).encode())
        .collect();
    let prefix = NamespacedKey::group_prefix("shop", "g3");

    c.bench_function("key/group_scan_1000", |b| {
        b.iter(|| {
            let hits = keys.iter().filter(|k| k.starts_with(&prefix)).count();
            black_box(hits);
        });
    });
}

criterion_group!(benches, bench_key_encode, bench_key_decode, bench_group_membership);
criterion_main!(benches);
