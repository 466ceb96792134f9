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

fn add_ground(system: &mut PhysicsSystem) -> BodyId {
    let settings = BodyCreationSettings::new(
        Shape::cuboid(Vec3::new(50.0, 1.0, 50.0)),
        Vec3::new(0.0, -1.0, 0.0),
        Quat::IDENTITY,
        MotionType::Static,
        ObjectLayer(0),
    );
    let mut bodies = system.body_interface();
    let id = bodies.create_body(&settings).expect("ground");
    bodies.add_body(id);
    id
}

#[test]
fn stack_of_ten_boxes_settles_and_sleeps() {
    let mut system = test_system(64);
    add_ground(&mut system);

    let mut stack = Vec::new();
    for level in 0..10 {
        let settings = BodyCreationSettings::new(
            Shape::cuboid(Vec3::splat(0.5)),
            Vec3::new(0.0, 0.5 + level as f32, 0.0),
            Quat::IDENTITY,
            MotionType::Dynamic,
            ObjectLayer(0),
        )
        .with_friction(0.5)
        .with_mass(1.0);
        let mut bodies = system.body_interface();
        let id = bodies.create_body(&settings).expect("box");
        bodies.add_body(id);
        stack.push(id);
    }

    for _ in 0..60 {
        system.update(1.0 / 60.0, 1, 1);
    }

    let bodies = system.body_interface();
    for (level, id) in stack.iter().enumerate() {
        let position = bodies.position(*id).expect("body still exists");
        assert!(
            position.x.abs() < 0.01 && position.z.abs() < 0.01,
            "box {} drifted to {:?}",
            level,
            position
        );
        assert!(
            (position.y - (0.5 + level as f32)).abs() < 0.05,
            "box {} sank to y = {}",
            level,
            position.y
        );
        assert!(!bodies.is_active(*id), "box {} should be asleep after settling", level);
    }
}

#[test]
fn single_box_rests_on_the_ground_without_sinking() {
    let mut system = test_system(8);
    add_ground(&mut system);

    let settings = BodyCreationSettings::new(
        Shape::cuboid(Vec3::splat(0.5)),
        Vec3::new(0.0, 0.5, 0.0),
        Quat::IDENTITY,
        MotionType::Dynamic,
        ObjectLayer(0),
    );
    let id = {
        let mut bodies = system.body_interface();
        let id = bodies.create_body(&settings).expect("box");
        bodies.add_body(id);
        id
    };

    for _ in 0..120 {
        system.update(1.0 / 60.0, 1, 1);
    }

    let y = system.body_interface().position(id).unwrap().y;
    assert!((y - 0.5).abs() < 0.03, "box ended at y = {y}");
}

#[test]
fn falling_box_lands_on_the_ground() {
    let mut system = test_system(8);
    add_ground(&mut system);

    let settings = BodyCreationSettings::new(
        Shape::cuboid(Vec3::splat(0.5)),
        Vec3::new(0.0, 3.0, 0.0),
        Quat::IDENTITY,
        MotionType::Dynamic,
        ObjectLayer(0),
    );
    let id = {
        let mut bodies = system.body_interface();
        let id = bodies.create_body(&settings).expect("box");
        bodies.add_body(id);
        id
    };

    for _ in 0..240 {
        system.update(1.0 / 60.0, 1, 1);
    }

    let y = system.body_interface().position(id).unwrap().y;
    assert!((y - 0.5).abs() < 0.05, "box should rest on the ground, y = {y}");
}

#[test]
fn body_ids_stay_stable_across_updates() {
    let mut system = test_system(8);
    let ground = add_ground(&mut system);

    let settings = BodyCreationSettings::new(
        Shape::sphere(0.5),
        Vec3::new(0.0, 5.0, 0.0),
        Quat::IDENTITY,
        MotionType::Dynamic,
        ObjectLayer(0),
    );
    let id = {
        let mut bodies = system.body_interface();
        let id = bodies.create_body(&settings).expect("sphere");
        bodies.add_body(id);
        id
    };

    for _ in 0..120 {
        system.update(1.0 / 60.0, 1, 1);
    }

    // Activation/deactivation cycles must not invalidate handles.
    assert!(system.body_interface().position(id).is_some());
    assert!(system.body_interface().position(ground).is_some());
}
