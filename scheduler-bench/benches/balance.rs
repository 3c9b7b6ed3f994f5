//! Benchmarks for the balance-vector accounting path: the part of a
//! pass every account pays on every call to `run_once`, independent of
//! how many tasks or workers are involved.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use scheduler_core::Balance;

fn bench_apply_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("balance_apply_pass");

    for levels in [1usize, 3, 8] {
        group.bench_with_input(BenchmarkId::new("levels", levels), &levels, |b, &levels| {
            let charge_rate = vec![1.0; levels];
            let charges = vec![0.5; levels];
            b.iter(|| {
                let mut balance = Balance::zero(levels);
                for _ in 0..100 {
                    balance.apply_pass(&charge_rate, 1.0, &charges, 100.0);
                }
                black_box(balance)
            });
        });
    }

    group.finish();
}

fn bench_priority_class(c: &mut Criterion) {
    let balance = Balance::from_vec(vec![5.0, 3.0, 0.0, 0.0]);
    c.bench_function("balance_priority_class", |b| {
        b.iter(|| black_box(balance.priority_class()));
    });
}

criterion_group!(benches, bench_apply_pass, bench_priority_class);
criterion_main!(benches);
