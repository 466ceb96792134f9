use std::sync::Arc;

use impulse3d::*;

fn test_system(max_bodies: usize) -> PhysicsSystem {
    let layers = Arc::new(SingleBroadPhaseLayer);
    PhysicsSystem::new(PhysicsSystemSettings::new(
        max_bodies,
        layers.clone(),
        layers.clone(),
        layers,
    ))
}

fn add_sphere(system: &mut PhysicsSystem, position: Vec3, radius: f32) -> BodyId {
    let settings = BodyCreationSettings::new(
        Shape::sphere(radius),
        position,
        Quat::IDENTITY,
        MotionType::Static,
        ObjectLayer(0),
    );
    let mut bodies = system.body_interface();
    let id = bodies.create_body(&settings).expect("sphere");
    bodies.add_body(id);
    id
}

#[test]
fn ray_cast_returns_the_closest_body() {
    let mut system = test_system(16);
    let near = add_sphere(&mut system, Vec3::new(5.0, 0.0, 0.0), 1.0);
    let _far = add_sphere(&mut system, Vec3::new(12.0, 0.0, 0.0), 1.0);
    add_sphere(&mut system, Vec3::new(0.0, 8.0, 0.0), 1.0);

    let hit = system
        .narrow_phase_query()
        .cast_ray(Vec3::ZERO, Vec3::X, 100.0, ObjectLayer(0))
        .expect("ray should hit");
    assert_eq!(hit.body_id, near);
    assert!((hit.fraction - 4.0).abs() < 1.0e-3, "fraction {}", hit.fraction);
    assert!(hit.normal.x < -0.99);
}

#[test]
fn ray_cast_all_visits_every_body_on_the_line() {
    let mut system = test_system(16);
    add_sphere(&mut system, Vec3::new(5.0, 0.0, 0.0), 1.0);
    add_sphere(&mut system, Vec3::new(12.0, 0.0, 0.0), 1.0);
    add_sphere(&mut system, Vec3::new(0.0, 8.0, 0.0), 1.0);

    let mut collector = AllHitsCollector::default();
    system
        .narrow_phase_query()
        .cast_ray_all(Vec3::ZERO, Vec3::X, 100.0, ObjectLayer(0), &mut collector);
    assert_eq!(collector.hits.len(), 2);
}

#[test]
fn collide_point_finds_the_containing_body() {
    let mut system = test_system(16);
    let sphere = add_sphere(&mut system, Vec3::new(3.0, 0.0, 0.0), 1.0);

    let mut inside = AllHitsCollector::default();
    system
        .narrow_phase_query()
        .collide_point(Vec3::new(3.2, 0.0, 0.0), ObjectLayer(0), &mut inside);
    assert_eq!(inside.hits, vec![sphere]);

    let mut outside = AllHitsCollector::default();
    system
        .narrow_phase_query()
        .collide_point(Vec3::new(5.0, 0.0, 0.0), ObjectLayer(0), &mut outside);
    assert!(outside.hits.is_empty());
}

#[test]
fn cast_shape_reports_the_first_obstacle() {
    let mut system = test_system(16);
    let wall = add_sphere(&mut system, Vec3::new(6.0, 0.0, 0.0), 1.0);

    let probe = Shape::Sphere { radius: 0.5 };
    let mut collector = AllHitsCollector::default();
    system.narrow_phase_query().cast_shape(
        &probe,
        Vec3::ZERO,
        Quat::IDENTITY,
        Vec3::new(10.0, 0.0, 0.0),
        ObjectLayer(0),
        &mut collector,
    );

    assert_eq!(collector.hits.len(), 1);
    let hit = &collector.hits[0];
    assert_eq!(hit.body_id, wall);
    // Surfaces meet when the centers are 1.5 apart: 4.5 / 10 of the sweep.
    assert!((hit.fraction - 0.45).abs() < 0.01, "fraction {}", hit.fraction);
}

#[test]
fn collide_shape_reports_overlap_manifolds() {
    let mut system = test_system(16);
    let target = add_sphere(&mut system, Vec3::new(1.0, 0.0, 0.0), 1.0);

    let probe = Shape::Sphere { radius: 0.5 };
    let mut collector = AllHitsCollector::default();
    let settings = *system.physics_settings();
    system.narrow_phase_query().collide_shape(
        &probe,
        Vec3::ZERO,
        Quat::IDENTITY,
        &settings,
        ObjectLayer(0),
        &mut collector,
    );

    assert_eq!(collector.hits.len(), 1);
    assert_eq!(collector.hits[0].body_id, target);
    let manifold = &collector.hits[0].manifold;
    assert!(manifold.points[0].penetration > 0.0);
    assert!(manifold.normal.x > 0.99);
}

#[test]
fn any_hit_collector_stops_early() {
    let mut system = test_system(16);
    add_sphere(&mut system, Vec3::new(5.0, 0.0, 0.0), 1.0);
    add_sphere(&mut system, Vec3::new(12.0, 0.0, 0.0), 1.0);

    let mut collector = AnyHitCollector::default();
    system
        .narrow_phase_query()
        .cast_ray_all(Vec3::ZERO, Vec3::X, 100.0, ObjectLayer(0), &mut collector);
    assert!(collector.hit.is_some());
}

#[test]
fn queries_respect_the_object_layer_filter() {
    // Two-layer setup where layer 3 ignores layer 4.
    struct SplitLayers;
    impl BroadPhaseLayerInterface for SplitLayers {
        fn num_broad_phase_layers(&self) -> u32 {
            1
        }
        fn broad_phase_layer(&self, _: ObjectLayer) -> BroadPhaseLayer {
            BroadPhaseLayer(0)
        }
    }
    impl ObjectVsBroadPhaseLayerFilter for SplitLayers {
        fn should_collide(&self, _: ObjectLayer, _: BroadPhaseLayer) -> bool {
            true
        }
    }
    impl ObjectLayerPairFilter for SplitLayers {
        fn should_collide(&self, a: ObjectLayer, b: ObjectLayer) -> bool {
            !(a == ObjectLayer(3) && b == ObjectLayer(4) || a == ObjectLayer(4) && b == ObjectLayer(3))
        }
    }

    let layers = Arc::new(SplitLayers);
    let mut system = PhysicsSystem::new(PhysicsSystemSettings::new(
        16,
        layers.clone(),
        layers.clone(),
        layers,
    ));

    let settings = BodyCreationSettings::new(
        Shape::sphere(1.0),
        Vec3::new(5.0, 0.0, 0.0),
        Quat::IDENTITY,
        MotionType::Static,
        ObjectLayer(4),
    );
    {
        let mut bodies = system.body_interface();
        let id = bodies.create_body(&settings).expect("sphere");
        bodies.add_body(id);
    }

    // Layer 3 cannot see layer 4; layer 0 can.
    assert!(system
        .narrow_phase_query()
        .cast_ray(Vec3::ZERO, Vec3::X, 100.0, ObjectLayer(3))
        .is_none());
    assert!(system
        .narrow_phase_query()
        .cast_ray(Vec3::ZERO, Vec3::X, 100.0, ObjectLayer(0))
        .is_some());
}
