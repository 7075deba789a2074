use std::sync::Arc;

use collision_kernel::*;

fn main() {
    let mut world = PhysicsWorld::new(1.0 / 60.0, CollisionConfig::default());
    world.set_parallel_enabled(true);
    world.set_gravity(Vec3::new(0.0, -9.8, 0.0));

    let ground = world.add_body(RigidBody::new(RigidBodyConstructionInfo::new(
        0.0,
        Arc::new(ConvexShape::cuboid(Vec3::new(10.0, 0.5, 10.0)).into()),
        Transform::IDENTITY,
    )));
    let ball = world.add_body(RigidBody::new(RigidBodyConstructionInfo::new(
        1.0,
        Arc::new(ConvexShape::sphere(0.5).into()),
        Transform::from_position(Vec3::new(0.0, 5.0, 0.0)),
    )));

    for _ in 0..60 {
        world.step();
        for manifold in world.manifolds() {
            for point in manifold.points() {
                println!(
                    "step {}: bodies {}/{} touching, distance {:.4}, normal {:?}",
                    world.steps(),
                    manifold.body0,
                    manifold.body1,
                    point.distance,
                    point.normal_world
                );
            }
        }
    }

    if let Some(body) = world.body(ball) {
        println!(
            "ball after one second: position {:?}, velocity {:?}",
            body.world_transform().position,
            body.velocity.linear
        );
    }
    if let Some(body) = world.body(ground) {
        println!("ground stays at {:?}", body.world_transform().position);
    }
}
