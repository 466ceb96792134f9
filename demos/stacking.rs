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

    {
        let mut bodies = system.body_interface();
        let ground = bodies
            .create_body(&BodyCreationSettings::new(
                Shape::cuboid(Vec3::new(20.0, 1.0, 20.0)),
                Vec3::new(0.0, -1.0, 0.0),
                Quat::IDENTITY,
                MotionType::Static,
                ObjectLayer(0),
            ))
            .unwrap();
        bodies.add_body(ground);

        for level in 0..5 {
            let settings = BodyCreationSettings::new(
                Shape::cuboid(Vec3::splat(0.5)),
                Vec3::new(0.0, 0.5 + level as f32, 0.0),
                Quat::IDENTITY,
                MotionType::Dynamic,
                ObjectLayer(0),
            )
            .with_friction(0.5);
            let id = bodies.create_body(&settings).unwrap();
            bodies.add_body(id);
        }
    }

    for _ in 0..120 {
        system.update(1.0 / 60.0, 1, 1);
    }

    println!(
        "Simulated a stack of boxes for 2 seconds: {} active of {} bodies",
        system.num_active_bodies(),
        system.num_bodies()
    );
}
