use std::sync::Arc;
use std::sync::Mutex;

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

#[derive(Default)]
struct ContactRecorder {
    points: Mutex<Vec<Vec3>>,
}

impl ContactListener for ContactRecorder {
    fn on_contact_added(&self, _: BodyId, _: BodyId, manifold: &Manifold, _: &mut ContactSettings) {
        let mut points = self.points.lock().unwrap();
        points.extend(manifold.points.iter().map(|p| p.on_b));
    }
}

#[test]
fn fast_ball_stops_at_the_wall_instead_of_tunneling() {
    let mut system = test_system(8);
    system.set_gravity(Vec3::ZERO);
    let recorder = Arc::new(ContactRecorder::default());
    system.set_contact_listener(recorder.clone());

    // Wall occupying x in [1.0, 1.2].
    let wall_settings = BodyCreationSettings::new(
        Shape::cuboid(Vec3::new(0.1, 10.0, 10.0)),
        Vec3::new(1.1, 0.0, 0.0),
        Quat::IDENTITY,
        MotionType::Static,
        ObjectLayer(0),
    );
    // Ball flying at 100 m/s: 1.67 m in one step, far past the wall.
    let ball_settings = BodyCreationSettings::new(
        Shape::sphere(0.1),
        Vec3::ZERO,
        Quat::IDENTITY,
        MotionType::Dynamic,
        ObjectLayer(0),
    )
    .with_motion_quality(MotionQuality::LinearCast)
    .with_velocity(Vec3::new(100.0, 0.0, 0.0), Vec3::ZERO)
    .with_damping(0.0, 0.0);

    let ball = {
        let mut bodies = system.body_interface();
        let wall = bodies.create_body(&wall_settings).expect("wall");
        let ball = bodies.create_body(&ball_settings).expect("ball");
        bodies.add_body(wall);
        bodies.add_body(ball);
        ball
    };

    system.update(1.0 / 60.0, 1, 1);

    let position = system.body_interface().position(ball).unwrap();
    let slop = system.physics_settings().penetration_slop;
    let expected = 1.0 - 0.1 - slop;
    assert!(
        (position.x - expected).abs() < 0.1,
        "ball center at x = {} (expected near {expected})",
        position.x
    );
    assert!(position.x < 1.0, "ball tunneled into the wall");

    let points = recorder.points.lock().unwrap();
    assert!(!points.is_empty(), "CCD must report the wall contact");
    assert!(
        points.iter().any(|p| (p.x - 1.0).abs() < 0.05),
        "contact point should lie on the wall face, got {points:?}"
    );
}

#[test]
fn slow_linear_cast_body_matches_discrete_integration() {
    // No obstacles: a linear-cast body below the cast threshold must follow
    // plain symplectic Euler exactly.
    let mut run = |quality: MotionQuality| -> Vec3 {
        let mut system = test_system(4);
        let settings = BodyCreationSettings::new(
            Shape::sphere(0.5),
            Vec3::new(0.0, 10.0, 0.0),
            Quat::IDENTITY,
            MotionType::Dynamic,
            ObjectLayer(0),
        )
        .with_motion_quality(quality)
        .with_velocity(Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO)
        .with_damping(0.0, 0.0);
        let id = {
            let mut bodies = system.body_interface();
            let id = bodies.create_body(&settings).expect("body");
            bodies.add_body(id);
            id
        };
        for _ in 0..30 {
            system.update(1.0 / 60.0, 1, 1);
        }
        system.body_interface().position(id).unwrap()
    };

    let discrete = run(MotionQuality::Discrete);
    let linear_cast = run(MotionQuality::LinearCast);
    assert!(
        (discrete - linear_cast).length() < 1.0e-5,
        "paths diverged: {discrete:?} vs {linear_cast:?}"
    );
}

#[test]
fn fast_dynamic_pair_is_resolved_once() {
    let mut system = test_system(8);
    system.set_gravity(Vec3::ZERO);

    // Two linear-cast balls on a collision course.
    let make = |x: f32, vx: f32| {
        BodyCreationSettings::new(
            Shape::sphere(0.1),
            Vec3::new(x, 0.0, 0.0),
            Quat::IDENTITY,
            MotionType::Dynamic,
            ObjectLayer(0),
        )
        .with_motion_quality(MotionQuality::LinearCast)
        .with_velocity(Vec3::new(vx, 0.0, 0.0), Vec3::ZERO)
        .with_damping(0.0, 0.0)
    };
    let (left, right) = {
        let mut bodies = system.body_interface();
        let left = bodies.create_body(&make(-1.0, 50.0)).expect("left");
        let right = bodies.create_body(&make(1.0, -50.0)).expect("right");
        bodies.add_body(left);
        bodies.add_body(right);
        (left, right)
    };

    for _ in 0..3 {
        system.update(1.0 / 60.0, 1, 1);
    }

    let bodies = system.body_interface();
    let left_position = bodies.position(left).unwrap();
    let right_position = bodies.position(right).unwrap();
    // They meet near the middle and must not pass through each other.
    assert!(
        left_position.x <= right_position.x,
        "balls swapped places: {left_position:?} vs {right_position:?}"
    );
    assert!(left_position.x.abs() < 0.6 && right_position.x.abs() < 0.6);

    // Momentum is conserved in the head-on exchange.
    let total = bodies.linear_velocity(left).unwrap() + bodies.linear_velocity(right).unwrap();
    assert!(total.length() < 1.0e-2, "net momentum appeared: {total:?}");
}
