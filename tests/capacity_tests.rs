use std::sync::Arc;

use impulse3d::*;

fn system_with_pair_budget(max_bodies: usize, max_pairs: usize, max_contacts: usize) -> PhysicsSystem {
    let layers = Arc::new(SingleBroadPhaseLayer);
    let mut settings = PhysicsSystemSettings::new(max_bodies, layers.clone(), layers.clone(), layers);
    settings.max_body_pairs = max_pairs;
    settings.max_contact_constraints = max_contacts;
    PhysicsSystem::new(settings)
}

fn add_sphere(system: &mut PhysicsSystem, position: Vec3) -> BodyId {
    let settings = BodyCreationSettings::new(
        Shape::sphere(0.6),
        position,
        Quat::IDENTITY,
        MotionType::Dynamic,
        ObjectLayer(0),
    );
    let mut bodies = system.body_interface();
    let id = bodies.create_body(&settings).expect("sphere");
    bodies.add_body(id);
    id
}

#[test]
fn body_capacity_overflow_reports_none() {
    let mut system = system_with_pair_budget(3, 64, 64);
    let settings = BodyCreationSettings::new(
        Shape::sphere(0.5),
        Vec3::ZERO,
        Quat::IDENTITY,
        MotionType::Dynamic,
        ObjectLayer(0),
    );
    let mut bodies = system.body_interface();
    assert!(bodies.create_body(&settings).is_some());
    assert!(bodies.create_body(&settings).is_some());
    assert!(bodies.create_body(&settings).is_some());
    assert!(bodies.create_body(&settings).is_none(), "capacity overflow must degrade, not grow");
}

#[test]
fn pair_overflow_completes_the_step_and_keeps_existing_pairs() {
    // A tight pair budget with a dense cluster: far more touching pairs than
    // the cache can hold.
    let mut system = system_with_pair_budget(256, 8, 8);
    system.set_gravity(Vec3::ZERO);

    let mut ids = Vec::new();
    for x in 0..10 {
        for z in 0..10 {
            // A 10x10 grid of slightly overlapping spheres.
            ids.push(add_sphere(
                &mut system,
                Vec3::new(x as f32, 0.0, z as f32),
            ));
        }
    }

    // The step must complete without panicking and without corrupting state.
    for _ in 0..5 {
        system.update(1.0 / 60.0, 1, 1);
    }

    let bodies = system.body_interface();
    for id in &ids {
        assert!(bodies.position(*id).is_some(), "bodies survive a pair overflow");
    }
}

#[test]
fn destroyed_body_ids_compare_stale() {
    let mut system = system_with_pair_budget(8, 64, 64);
    let first = add_sphere(&mut system, Vec3::ZERO);
    {
        let mut bodies = system.body_interface();
        bodies.remove_body(first);
        bodies.destroy_body(first);
    }

    // The slot only recycles after a step boundary.
    system.update(1.0 / 60.0, 1, 1);
    let second = add_sphere(&mut system, Vec3::ZERO);

    assert_ne!(first, second);
    assert!(system.body_interface().position(first).is_none());
    assert!(system.body_interface().position(second).is_some());
}
