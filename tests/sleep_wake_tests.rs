use std::sync::{Arc, Mutex};

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

fn add_ground(system: &mut PhysicsSystem) {
    let settings = BodyCreationSettings::new(
        Shape::cuboid(Vec3::new(20.0, 1.0, 20.0)),
        Vec3::new(0.0, -1.0, 0.0),
        Quat::IDENTITY,
        MotionType::Static,
        ObjectLayer(0),
    );
    let mut bodies = system.body_interface();
    let id = bodies.create_body(&settings).expect("ground");
    bodies.add_body(id);
}

fn add_sphere(system: &mut PhysicsSystem, position: Vec3) -> BodyId {
    let settings = BodyCreationSettings::new(
        Shape::sphere(0.5),
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

#[derive(Default)]
struct ActivationRecorder {
    events: Mutex<Vec<(BodyId, bool)>>,
}

impl BodyActivationListener for ActivationRecorder {
    fn on_body_activated(&self, body: BodyId, _: u64) {
        self.events.lock().unwrap().push((body, true));
    }

    fn on_body_deactivated(&self, body: BodyId, _: u64) {
        self.events.lock().unwrap().push((body, false));
    }
}

#[test]
fn resting_sphere_falls_asleep_and_wakes_on_impact() {
    let mut system = test_system(8);
    add_ground(&mut system);
    let recorder = Arc::new(ActivationRecorder::default());
    system.set_body_activation_listener(recorder.clone());

    let resting = add_sphere(&mut system, Vec3::new(0.0, 0.5, 0.0));

    // Two seconds at rest put the sphere to sleep.
    for _ in 0..120 {
        system.update(1.0 / 60.0, 1, 1);
    }
    assert!(
        !system.body_interface().is_active(resting),
        "sphere should sleep after resting for two seconds"
    );

    // Drop a second sphere on top of it.
    let dropped = add_sphere(&mut system, Vec3::new(0.0, 3.0, 0.0));

    let mut woke_at_step = None;
    for step in 0..240 {
        system.update(1.0 / 60.0, 1, 1);
        if system.body_interface().is_active(resting) {
            woke_at_step = Some(step);
            break;
        }
    }
    let woke_at_step = woke_at_step.expect("the impact must wake the sleeping sphere");

    // The wake-up happens in the step where the contact is created: at that
    // moment the dropped sphere is within the speculative contact margin.
    let dropped_position = system.body_interface().position(dropped).unwrap();
    let gap = dropped_position.y - 1.5;
    assert!(
        gap < 0.1,
        "woke too early (step {woke_at_step}), dropped sphere still {gap} m away"
    );

    let events = recorder.events.lock().unwrap();
    assert!(events.contains(&(resting, false)), "deactivation must be reported");
    assert!(
        events.iter().filter(|(id, active)| *id == resting && *active).count() >= 2,
        "reactivation must be reported"
    );
}

#[test]
fn sleeping_islands_go_down_together() {
    let mut system = test_system(8);
    add_ground(&mut system);

    // Two spheres stacked: they share an island and must sleep as one.
    let bottom = add_sphere(&mut system, Vec3::new(0.0, 0.5, 0.0));
    let top = add_sphere(&mut system, Vec3::new(0.0, 1.5, 0.0));

    for _ in 0..300 {
        system.update(1.0 / 60.0, 1, 1);
    }

    let bodies = system.body_interface();
    assert_eq!(
        bodies.is_active(bottom),
        bodies.is_active(top),
        "bodies of one island must sleep atomically"
    );
    assert!(!bodies.is_active(bottom), "the stack should be asleep by now");
}

#[test]
fn bodies_that_disallow_sleeping_stay_awake() {
    let mut system = test_system(8);
    add_ground(&mut system);

    let settings = BodyCreationSettings::new(
        Shape::sphere(0.5),
        Vec3::new(0.0, 0.5, 0.0),
        Quat::IDENTITY,
        MotionType::Dynamic,
        ObjectLayer(0),
    )
    .with_allow_sleeping(false);
    let id = {
        let mut bodies = system.body_interface();
        let id = bodies.create_body(&settings).expect("sphere");
        bodies.add_body(id);
        id
    };

    for _ in 0..240 {
        system.update(1.0 / 60.0, 1, 1);
    }
    assert!(system.body_interface().is_active(id));
}
