use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use impulse3d::*;

fn build_system(max_bodies: usize) -> PhysicsSystem {
    let layers = Arc::new(SingleBroadPhaseLayer);
    PhysicsSystem::new(PhysicsSystemSettings::new(
        max_bodies,
        layers.clone(),
        layers.clone(),
        layers,
    ))
}

fn scene_with_boxes(count: usize) -> PhysicsSystem {
    let mut system = build_system(count + 8);
    let ground = BodyCreationSettings::new(
        Shape::cuboid(Vec3::new(100.0, 1.0, 100.0)),
        Vec3::new(0.0, -1.0, 0.0),
        Quat::IDENTITY,
        MotionType::Static,
        ObjectLayer(0),
    );
    {
        let mut bodies = system.body_interface();
        let id = bodies.create_body(&ground).unwrap();
        bodies.add_body(id);

        let side = (count as f32).cbrt().ceil() as usize;
        let mut created = 0;
        'outer: for y in 0..side {
            for x in 0..side {
                for z in 0..side {
                    if created == count {
                        break 'outer;
                    }
                    let settings = BodyCreationSettings::new(
                        Shape::cuboid(Vec3::splat(0.5)),
                        Vec3::new(x as f32 * 1.1, 0.5 + y as f32 * 1.1, z as f32 * 1.1),
                        Quat::IDENTITY,
                        MotionType::Dynamic,
                        ObjectLayer(0),
                    );
                    let id = bodies.create_body(&settings).unwrap();
                    bodies.add_body(id);
                    created += 1;
                }
            }
        }
    }
    system
}

fn bench_step_256_boxes(c: &mut Criterion) {
    c.bench_function("step_256_boxes", |b| {
        let mut system = scene_with_boxes(256);
        // Warm up so the contact cache is populated.
        for _ in 0..10 {
            system.update(1.0 / 60.0, 1, 1);
        }
        b.iter(|| {
            system.update(black_box(1.0 / 60.0), 1, 1);
        })
    });
}

fn bench_ray_casts(c: &mut Criterion) {
    c.bench_function("ray_cast_1024_bodies", |b| {
        let mut system = scene_with_boxes(1024);
        system.update(1.0 / 60.0, 1, 1);
        b.iter(|| {
            let hit = system.narrow_phase_query().cast_ray(
                black_box(Vec3::new(-50.0, 1.0, 3.0)),
                Vec3::X,
                200.0,
                ObjectLayer(0),
            );
            black_box(hit)
        })
    });
}

fn bench_broadphase_rebuild(c: &mut Criterion) {
    c.bench_function("optimize_broadphase_1024_bodies", |b| {
        let mut system = scene_with_boxes(1024);
        b.iter(|| {
            system.optimize_broad_phase();
        })
    });
}

criterion_group!(benches, bench_step_256_boxes, bench_ray_casts, bench_broadphase_rebuild);
criterion_main!(benches);
