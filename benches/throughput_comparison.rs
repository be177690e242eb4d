use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dashmap::DashSet;
use openhashset_rs::ConcurrentOpenHashSet;
use rand::prelude::*;
use std::collections::HashSet;

fn generate_test_data(size: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..size).map(|_| rng.gen()).collect()
}

fn benchmark_add(c: &mut Criterion) {
    let test_data = generate_test_data(10000);

    c.bench_function("openhashset_add", |b| {
        b.iter(|| {
            let set = ConcurrentOpenHashSet::new();
            for v in &test_data {
                black_box(set.add(*v));
            }
        })
    });

    c.bench_function("hashset_insert", |b| {
        b.iter(|| {
            let mut set = HashSet::new();
            for v in &test_data {
                black_box(set.insert(*v));
            }
        })
    });

    c.bench_function("dashset_insert", |b| {
        b.iter(|| {
            let set = DashSet::new();
            for v in &test_data {
                black_box(set.insert(*v));
            }
        })
    });
}

fn benchmark_contains(c: &mut Criterion) {
    let test_data = generate_test_data(10000);

    let openhashset = ConcurrentOpenHashSet::new();
    let mut hashset = HashSet::new();
    let dashset = DashSet::new();
    for v in &test_data {
        openhashset.add(*v);
        hashset.insert(*v);
        dashset.insert(*v);
    }

    c.bench_function("openhashset_contains", |b| {
        b.iter(|| {
            for v in &test_data {
                black_box(openhashset.contains(v));
            }
        })
    });

    c.bench_function("hashset_contains", |b| {
        b.iter(|| {
            for v in &test_data {
                black_box(hashset.contains(v));
            }
        })
    });

    c.bench_function("dashset_contains", |b| {
        b.iter(|| {
            for v in &test_data {
                black_box(dashset.contains(v));
            }
        })
    });
}

fn benchmark_churn(c: &mut Criterion) {
    let test_data = generate_test_data(10000);

    c.bench_function("openhashset_add_remove", |b| {
        let set = ConcurrentOpenHashSet::new();
        b.iter(|| {
            for v in &test_data {
                set.add(*v);
            }
            for v in &test_data {
                black_box(set.remove(v));
            }
        })
    });

    c.bench_function("dashset_insert_remove", |b| {
        let set = DashSet::new();
        b.iter(|| {
            for v in &test_data {
                set.insert(*v);
            }
            for v in &test_data {
                black_box(set.remove(v));
            }
        })
    });
}

criterion_group!(benches, benchmark_add, benchmark_contains, benchmark_churn);
criterion_main!(benches);
