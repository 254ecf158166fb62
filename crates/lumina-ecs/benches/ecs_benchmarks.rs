//! Registry throughput: bulk insert, two-component iteration and duplication.
//!
//! Run with: `cargo bench --bench ecs_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lumina_ecs::prelude::*;

#[derive(Debug, Clone)]
struct Position([f32; 3]);
impl Component for Position {}

#[derive(Debug, Clone)]
struct Velocity([f32; 3]);
impl Component for Velocity {}

fn populated(n: u32) -> Registry {
    let mut registry = Registry::new();
    for i in 0..n {
        let e = registry.create();
        registry
            .insert(e, Position([i as f32, 0.0, 0.0]))
            .expect("fresh entity");
        if i % 2 == 0 {
            registry
                .insert(e, Velocity([1.0, 0.0, 0.0]))
                .expect("fresh entity");
        }
    }
    registry
}

fn bench_insert_10k(c: &mut Criterion) {
    c.bench_function("registry_insert_10k", |b| {
        b.iter(|| black_box(populated(10_000).len()));
    });
}

fn bench_integrate_10k(c: &mut Criterion) {
    let mut registry = populated(10_000);
    c.bench_function("registry_integrate_5k_of_10k", |b| {
        b.iter(|| {
            for e in registry.entities_with::<(Position, Velocity)>() {
                let v = registry.get::<Velocity>(e).map(|v| v.0).unwrap_or_default();
                if let Some(p) = registry.get_mut::<Position>(e) {
                    p.0[0] += v[0] * 0.016;
                }
            }
        });
    });
}

fn bench_duplicate_10k(c: &mut Criterion) {
    let registry = populated(10_000);
    c.bench_function("registry_duplicate_10k", |b| {
        b.iter(|| black_box(registry.duplicate().0.len()));
    });
}

criterion_group!(benches, bench_insert_10k, bench_integrate_10k, bench_duplicate_10k);
criterion_main!(benches);
