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

fn add_static_anchor(system: &mut PhysicsSystem, position: Vec3) -> BodyId {
    let settings = BodyCreationSettings::new(
        Shape::sphere(0.05),
        position,
        Quat::IDENTITY,
        MotionType::Static,
        ObjectLayer(1),
    );
    let mut bodies = system.body_interface();
    let id = bodies.create_body(&settings).expect("anchor");
    bodies.add_body(id);
    id
}

fn add_box(system: &mut PhysicsSystem, position: Vec3) -> BodyId {
    let settings = BodyCreationSettings::new(
        Shape::cuboid(Vec3::splat(0.25)),
        position,
        Quat::IDENTITY,
        MotionType::Dynamic,
        ObjectLayer(2),
    );
    let mut bodies = system.body_interface();
    let id = bodies.create_body(&settings).expect("box");
    bodies.add_body(id);
    id
}

#[test]
fn distance_joint_acts_like_a_rope() {
    let mut system = test_system(8);
    let anchor = add_static_anchor(&mut system, Vec3::new(0.0, 5.0, 0.0));
    let weight = add_box(&mut system, Vec3::new(0.0, 3.5, 0.0));
    system.add_constraint(Constraint::distance(anchor, weight, Vec3::ZERO, Vec3::ZERO, 0.0, 2.0));

    for _ in 0..300 {
        system.update(1.0 / 60.0, 1, 1);
    }

    let position = system.body_interface().position(weight).unwrap();
    let stretch = (Vec3::new(0.0, 5.0, 0.0) - position).length();
    assert!(stretch <= 2.1, "rope stretched to {stretch}");
    // The weight hangs below the anchor at full extension.
    assert!(position.y < 3.2, "weight did not hang, y = {}", position.y);
}

#[test]
fn fixed_joint_welds_two_boxes() {
    let mut system = test_system(8);
    system.set_gravity(Vec3::ZERO);
    let left = add_box(&mut system, Vec3::new(0.0, 1.0, 0.0));
    let right = add_box(&mut system, Vec3::new(1.0, 1.0, 0.0));
    system.add_constraint(Constraint::fixed(
        left,
        right,
        Vec3::new(0.5, 0.0, 0.0),
        Vec3::new(-0.5, 0.0, 0.0),
        Quat::IDENTITY,
    ));

    // Kick one box off-center; the assembly translates and spins as a unit.
    system.body_interface().add_impulse(left, Vec3::new(0.0, 2.0, 0.0));
    for _ in 0..120 {
        system.update(1.0 / 60.0, 1, 1);
    }

    let bodies = system.body_interface();
    let offset = bodies.position(right).unwrap() - bodies.position(left).unwrap();
    assert!((offset.length() - 1.0).abs() < 0.05, "weld stretched: offset {offset:?}");
    // The offset stays glued to the left box's frame while the pair spins.
    let expected = bodies.rotation(left).unwrap() * Vec3::X;
    assert!(
        (offset.normalize() - expected).length() < 0.1,
        "weld twisted: offset {offset:?} vs frame {expected:?}"
    );
    let relative_spin = bodies.angular_velocity(right).unwrap() - bodies.angular_velocity(left).unwrap();
    assert!(relative_spin.length() < 0.05, "bodies spin apart: {relative_spin:?}");
}

#[test]
fn hinge_keeps_a_door_swinging_in_its_plane() {
    let mut system = test_system(8);
    let frame = add_static_anchor(&mut system, Vec3::new(0.0, 2.0, 0.0));
    let door = add_box(&mut system, Vec3::new(0.5, 2.0, 0.0));
    // Hinge about the world Y axis through the frame.
    system.add_constraint(Constraint::hinge(
        frame,
        door,
        Vec3::ZERO,
        Vec3::new(-0.5, 0.0, 0.0),
        Vec3::Y,
        Vec3::Y,
    ));

    system.body_interface().add_impulse(door, Vec3::new(0.0, 0.0, 1.5));
    for _ in 0..240 {
        system.update(1.0 / 60.0, 1, 1);
        let position = system.read_body(door).unwrap().position;
        // The door stays at hinge height and on the hinge circle.
        assert!((position.y - 2.0).abs() < 0.05, "door left the hinge plane: {position:?}");
        let radial = Vec3::new(position.x, 0.0, position.z).length();
        assert!((radial - 0.5).abs() < 0.05, "door left the hinge circle: {position:?}");
    }
}

#[test]
fn slider_constrains_motion_to_one_axis() {
    let mut system = test_system(8);
    system.set_gravity(Vec3::ZERO);
    let rail = add_static_anchor(&mut system, Vec3::new(0.0, 1.0, 0.0));
    let carriage = add_box(&mut system, Vec3::new(0.5, 1.0, 0.0));
    system.add_constraint(Constraint::slider(
        rail,
        carriage,
        Vec3::ZERO,
        Vec3::ZERO,
        Vec3::X,
        Quat::IDENTITY,
    ));

    system.body_interface().add_impulse(carriage, Vec3::new(1.0, 1.0, 1.0));
    for _ in 0..120 {
        system.update(1.0 / 60.0, 1, 1);
    }

    let position = system.body_interface().position(carriage).unwrap();
    assert!((position.y - 1.0).abs() < 0.02, "carriage moved off-axis: {position:?}");
    assert!(position.z.abs() < 0.02, "carriage moved off-axis: {position:?}");
    assert!(position.x > 0.5, "carriage should slide along x: {position:?}");
}

#[test]
fn hinge_motor_spins_the_wheel_up() {
    let mut system = test_system(8);
    system.set_gravity(Vec3::ZERO);
    let axle = add_static_anchor(&mut system, Vec3::new(0.0, 1.0, 0.0));
    let wheel = add_box(&mut system, Vec3::new(0.0, 1.0, 0.0) + Vec3::new(0.0, 0.0, 0.0));

    let mut hinge = Constraint::hinge(axle, wheel, Vec3::ZERO, Vec3::ZERO, Vec3::Z, Vec3::Z);
    if let Constraint::Hinge { motor, .. } = &mut hinge {
        *motor = Some(MotorSettings {
            target_velocity: 5.0,
            max_impulse_per_second: 50.0,
        });
    }
    system.add_constraint(hinge);

    for _ in 0..120 {
        system.update(1.0 / 60.0, 1, 1);
    }

    let spin = system.body_interface().angular_velocity(wheel).unwrap();
    assert!(
        (spin.z - 5.0).abs() < 0.2,
        "motor failed to reach its target velocity: {spin:?}"
    );
}

#[test]
fn removed_constraints_stop_acting() {
    let mut system = test_system(8);
    let anchor = add_static_anchor(&mut system, Vec3::new(0.0, 5.0, 0.0));
    let weight = add_box(&mut system, Vec3::new(0.0, 4.0, 0.0));
    let handle = system.add_constraint(Constraint::point(anchor, weight, Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0)));

    for _ in 0..60 {
        system.update(1.0 / 60.0, 1, 1);
    }
    let held_y = system.body_interface().position(weight).unwrap().y;
    assert!(held_y > 3.5, "joint should hold the weight, y = {held_y}");

    assert!(system.remove_constraint(handle).is_some());
    system.body_interface().activate_body(weight);
    for _ in 0..120 {
        system.update(1.0 / 60.0, 1, 1);
    }
    let fallen_y = system.body_interface().position(weight).unwrap().y;
    assert!(fallen_y < 0.0, "weight should fall once the joint is gone, y = {fallen_y}");
}
