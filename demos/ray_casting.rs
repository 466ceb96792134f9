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
        for x in 0..8 {
            let settings = BodyCreationSettings::new(
                Shape::sphere(0.4),
                Vec3::new(2.0 + x as f32 * 2.0, 0.0, 0.0),
                Quat::IDENTITY,
                MotionType::Static,
                ObjectLayer(0),
            );
            let id = bodies.create_body(&settings).unwrap();
            bodies.add_body(id);
        }
    }

    match system
        .narrow_phase_query()
        .cast_ray(Vec3::ZERO, Vec3::X, 100.0, ObjectLayer(0))
    {
        Some(hit) => println!(
            "closest hit: {:?} at {:?} (normal {:?})",
            hit.body_id, hit.point, hit.normal
        ),
        None => println!("no hit"),
    }

    let mut all = AllHitsCollector::default();
    system
        .narrow_phase_query()
        .cast_ray_all(Vec3::ZERO, Vec3::X, 100.0, ObjectLayer(0), &mut all);
    println!("{} spheres on the ray", all.hits.len());
}
