//! Frame dispatch and character pass throughput.
//!
//! - `frame_dispatch/N`: one world frame with N native systems spread over
//!   the running stages, each touching every transform.
//! - `character_pass/N`: one physics frame with N characters on a floor,
//!   swept on the worker pool.
//!
//! Run with: `cargo bench --bench frame_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lumina_engine::prelude::*;

const H: f64 = 1.0 / 60.0;

struct Nudge {
    name: String,
    stage: UpdateStage,
}

impl EntitySystem for Nudge {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_list(&self) -> UpdatePriorityList {
        UpdatePriorityList::new().with(self.stage)
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) {
        let step = Vec3::X * ctx.delta_time() as f32;
        if let Some(transforms) = ctx.registry_mut().storage_mut::<Transform>() {
            for t in transforms.values_mut() {
                t.location += step;
            }
        }
    }
}

fn quiet_engine() -> Engine {
    Engine::builder()
        .worker_threads(4)
        .build()
        .expect("engine should build")
}

// ---------------------------------------------------------------------------
// Benchmark 1: frame dispatch
// ---------------------------------------------------------------------------

fn bench_frame_dispatch(c: &mut Criterion) {
    let engine = quiet_engine();
    let mut group = c.benchmark_group("frame_dispatch");
    for systems in [8usize, 64, 256] {
        let mut world = engine.create_world("bench");
        for i in 0..systems {
            let stage = UpdateStage::RUNNING[i % UpdateStage::RUNNING.len()];
            world.register_system(Nudge {
                name: format!("nudge_{i}"),
                stage,
            });
        }
        for i in 0..1_000 {
            world.construct_entity("", Transform::from_location(Vec3::new(i as f32, 0.0, 0.0)));
        }
        world.initialize();

        group.bench_with_input(BenchmarkId::from_parameter(systems), &systems, |b, _| {
            b.iter(|| {
                world.update(black_box(H)).expect("initialized world");
            });
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark 2: character pass
// ---------------------------------------------------------------------------

fn bench_character_pass(c: &mut Criterion) {
    let engine = quiet_engine();
    let mut group = c.benchmark_group("character_pass");
    for count in [16usize, 128] {
        let mut world = engine.create_world("crowd");
        let floor = world.construct_entity("floor", Transform::from_location(Vec3::new(0.0, -0.5, 0.0)));
        let registry = world.registry_mut();
        registry
            .insert(floor, RigidBody { body_type: BodyType::Static, ..RigidBody::default() })
            .expect("floor is live");
        registry
            .insert(floor, BoxCollider { half_extent: Vec3::new(500.0, 0.5, 500.0), offset: Vec3::ZERO })
            .expect("floor is live");

        let crowd: Vec<Entity> = (0..count)
            .map(|i| {
                let location = Vec3::new((i % 16) as f32 * 4.0, 3.0, (i / 16) as f32 * 4.0);
                let e = world.construct_entity("", Transform::from_location(location));
                let registry = world.registry_mut();
                registry.insert(e, CharacterPhysics::default()).expect("live");
                registry.insert(e, CharacterMovement::default()).expect("live");
                registry.insert(e, CharacterController::default()).expect("live");
                e
            })
            .collect();
        world.initialize();
        world.begin_play();

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                for &e in &crowd {
                    if let Some(controller) = world.registry_mut().get_mut::<CharacterController>(e) {
                        controller.add_movement_input(Vec3::Y);
                    }
                }
                world.update(black_box(H)).expect("initialized world");
                black_box(world.diagnostics().physics.characters);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_frame_dispatch, bench_character_pass);
criterion_main!(benches);
