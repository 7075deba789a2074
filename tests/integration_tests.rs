use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use collision_kernel::utils::math::calculate_velocity;
use collision_kernel::*;

const DT: f32 = 1.0 / 60.0;

fn body(mass: f32, shape: ConvexShape, position: Vec3) -> RigidBody {
    RigidBody::new(RigidBodyConstructionInfo::new(
        mass,
        Arc::new(shape.into()),
        Transform::from_position(position),
    ))
}

#[test]
fn sphere_falls_onto_box_and_reports_single_contact() {
    let mut world = PhysicsWorld::new(DT, CollisionConfig::default());
    world.set_gravity(Vec3::new(0.0, -9.8, 0.0));
    let ground = world.add_body(body(
        0.0,
        ConvexShape::cuboid(Vec3::new(10.0, 0.5, 10.0)),
        Vec3::ZERO,
    ));
    let ball = world.add_body(body(1.0, ConvexShape::sphere(0.5), Vec3::new(0.0, 5.0, 0.0)));

    let mut first_contact = None;
    for step in 0..60 {
        world.step();
        if first_contact.is_none() && !world.pair_cache().is_empty() {
            first_contact = Some((step, world.manifolds()));
        }
    }

    let velocity = world.body(ball).expect("ball exists").velocity.linear;
    assert_abs_diff_eq!(velocity.x, 0.0, epsilon = 1e-4);
    assert_abs_diff_eq!(velocity.y, -9.8, epsilon = 1e-3);
    assert_abs_diff_eq!(velocity.z, 0.0, epsilon = 1e-4);

    let ground_body = world.body(ground).expect("ground exists");
    assert_eq!(ground_body.world_transform().position, Vec3::ZERO);

    let (step, manifolds) = first_contact.expect("ball AABB reaches the box");
    assert!(step > 0, "no overlap before falling");
    assert_eq!(manifolds.len(), 1);
    let manifold = &manifolds[0];
    assert_eq!((manifold.body0, manifold.body1), (ground, ball));
    assert_eq!(manifold.num_contacts(), 1);
    let point = &manifold.points()[0];
    assert!(point.normal_world.y > 0.99, "normal {:?}", point.normal_world);
    assert!(point.distance <= 0.0);
}

#[test]
fn static_body_ignores_gravity_and_damping() {
    let mut ground = body(0.0, ConvexShape::cuboid(Vec3::ONE), Vec3::new(1.0, 2.0, 3.0));
    ground.set_damping(0.5, 0.5);
    let transform = *ground.world_transform();
    let velocity = ground.velocity;

    for _ in 0..10 {
        ground.apply_gravity();
        ground.integrate_velocities(DT);
        ground.apply_damping(DT);
    }

    assert_eq!(*ground.world_transform(), transform);
    assert_eq!(ground.velocity, velocity);
    assert_eq!(ground.inverse_mass(), 0.0);
}

#[test]
fn angular_velocity_is_clamped_per_step() {
    let mut spinner = body(1.0, ConvexShape::cuboid(Vec3::splat(0.25)), Vec3::ZERO);
    spinner.apply_torque(Vec3::new(1.0e6, -3.0e5, 2.0e6));
    spinner.integrate_velocities(DT);
    assert!(spinner.velocity.angular.length() * DT <= FRAC_PI_2 + 1e-4);

    spinner.apply_torque(Vec3::new(0.0, 1.0e9, 0.0));
    spinner.integrate_velocities(DT);
    assert!(spinner.velocity.angular.length() * DT <= FRAC_PI_2 + 1e-4);
}

#[test]
fn committed_transform_reproduces_integrated_velocity() {
    let mut ball = body(1.0, ConvexShape::sphere(0.5), Vec3::new(0.0, 3.0, 0.0));
    ball.set_linear_velocity(Vec3::new(1.5, -2.0, 0.25));
    ball.set_angular_velocity(Vec3::new(0.0, 2.0, 0.5));

    let predicted = ball.predict_integrated_transform(DT);
    ball.set_center_of_mass_transform(predicted);

    let (linear, angular) = calculate_velocity(
        ball.interpolation_world_transform(),
        ball.world_transform(),
        DT,
    );
    assert!(linear.abs_diff_eq(ball.velocity.linear, 1e-3), "linear {linear:?}");
    assert!(angular.abs_diff_eq(ball.velocity.angular, 1e-2), "angular {angular:?}");
}

#[test]
fn kinematic_body_velocity_follows_keyframes() {
    let mut platform = body(0.0, ConvexShape::cuboid(Vec3::ONE), Vec3::ZERO);
    platform.collision.flags.is_kinematic = true;
    platform.set_center_of_mass_transform(Transform::from_position(Vec3::new(0.1, 0.0, 0.0)));

    let integrator = Integrator::default();
    let mut bodies = vec![platform];
    integrator.step(&mut bodies, 0.1);

    assert!(bodies[0].velocity.linear.abs_diff_eq(Vec3::X, 1e-4));
    assert_eq!(bodies[0].world_transform().position, Vec3::new(0.1, 0.0, 0.0));
}

#[test]
fn sphere_on_mesh_ground_uses_concave_dispatch() {
    let mesh = TriangleMesh::builder(
        vec![
            Vec3::new(-5.0, 0.0, -5.0),
            Vec3::new(5.0, 0.0, -5.0),
            Vec3::new(5.0, 0.0, 5.0),
            Vec3::new(-5.0, 0.0, 5.0),
        ],
        vec![[0, 2, 1], [0, 3, 2]],
    )
    .build();
    let ground = RigidBody::new(RigidBodyConstructionInfo::new(
        0.0,
        Arc::new(CollisionShape::Concave(Arc::new(mesh))),
        Transform::IDENTITY,
    ));

    let mut world = PhysicsWorld::default();
    let ground = world.add_body(ground);
    let ball = world.add_body(body(1.0, ConvexShape::sphere(0.5), Vec3::new(1.0, 0.6, -2.0)));

    let mut contact = None;
    for _ in 0..30 {
        world.step();
        if let Some(manifold) = world.manifolds().into_iter().next() {
            contact = Some(manifold);
            break;
        }
    }

    let manifold = contact.expect("ball reaches the mesh");
    assert_eq!((manifold.body0, manifold.body1), (ground, ball));
    let point = &manifold.points()[0];
    assert!(point.normal_world.y > 0.99, "normal {:?}", point.normal_world);
    assert!(point.index0 >= 0);
    assert_eq!(point.index1, -1);
}
