use std::sync::Arc;

use impulse3d::*;

fn main() {
    let layers = Arc::new(SingleBroadPhaseLayer);
    let mut system = PhysicsSystem::new(PhysicsSystemSettings::new(
        64,
        layers.clone(),
        layers.clone(),
        layers,
    ));

    let ground = BodyCreationSettings::new(
        Shape::cuboid(Vec3::new(20.0, 1.0, 20.0)),
        Vec3::new(0.0, -1.0, 0.0),
        Quat::IDENTITY,
        MotionType::Static,
        ObjectLayer(0),
    );
    let ball = BodyCreationSettings::new(
        Shape::sphere(0.5),
        Vec3::new(0.0, 5.0, 0.0),
        Quat::IDENTITY,
        MotionType::Dynamic,
        ObjectLayer(0),
    )
    .with_restitution(0.6);

    let ball_id = {
        let mut bodies = system.body_interface();
        let ground_id = bodies.create_body(&ground).unwrap();
        bodies.add_body(ground_id);
        let ball_id = bodies.create_body(&ball).unwrap();
        bodies.add_body(ball_id);
        ball_id
    };

    for step in 0..300 {
        system.update(1.0 / 60.0, 1, 1);
        if step % 30 == 0 {
            let position = system.body_interface().position(ball_id).unwrap();
            println!("t = {:.2}s  ball at {:?}", step as f32 / 60.0, position);
        }
    }
}
