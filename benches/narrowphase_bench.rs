use std::hint::black_box;
use std::sync::Arc;

use collision_kernel::{core::mesh::TriangleMesh, *};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

const DT: f32 = 1.0 / 60.0;

fn bench_gjk(c: &mut Criterion) {
    let mut group = c.benchmark_group("gjk_closest_points");
    let shapes = [
        ("sphere", ConvexShape::sphere(0.5)),
        ("box", ConvexShape::cuboid(Vec3::splat(0.5))),
        ("capsule", ConvexShape::capsule(0.3, 0.6)),
        ("cylinder", ConvexShape::cylinder(Vec3::new(0.5, 0.7, 0.5))),
    ];
    for (name, shape) in &shapes {
        let separated = ClosestPointInput::new(
            Transform::IDENTITY,
            Transform::from_position(Vec3::new(1.7, 0.3, 0.1)),
        );
        let touching = ClosestPointInput::new(
            Transform::IDENTITY,
            Transform::from_position(Vec3::new(0.6, 0.3, 0.1)),
        );
        group.bench_with_input(BenchmarkId::new("separated", name), shape, |b, shape| {
            let mut detector = GjkPairDetector::default();
            b.iter(|| detector.get_closest_points(black_box(&separated), shape, shape))
        });
        group.bench_with_input(BenchmarkId::new("penetrating", name), shape, |b, shape| {
            let mut detector = GjkPairDetector::default();
            b.iter(|| detector.get_closest_points(black_box(&touching), shape, shape))
        });
    }
    group.finish();
}

fn bench_penetration(c: &mut Criterion) {
    let mut group = c.benchmark_group("penetration_depth");
    let a = ConvexShape::cuboid(Vec3::splat(1.0));
    let input = ClosestPointInput::new(
        Transform::IDENTITY,
        Transform::from_position(Vec3::new(0.2, 1.4, -0.1)),
    );
    for strategy in [PenetrationStrategy::Epa, PenetrationStrategy::Sampled] {
        let config = CollisionConfig::default().with_penetration(strategy);
        group.bench_function(format!("{strategy:?}"), |b| {
            let mut detector = GjkPairDetector::from_config(&config);
            b.iter(|| detector.get_closest_points(black_box(&input), &a, &a))
        });
    }
    group.finish();
}

fn sphere_field(count: usize, parallel: bool) -> PhysicsWorld {
    let config = CollisionConfig::default().with_parallel_dispatch(parallel);
    let mut world = PhysicsWorld::new(DT, config);
    world.add_body(RigidBody::new(RigidBodyConstructionInfo::new(
        0.0,
        Arc::new(ConvexShape::cuboid(Vec3::new(100.0, 0.5, 100.0)).into()),
        Transform::IDENTITY,
    )));
    let side = (count as f32).sqrt().ceil() as usize;
    for i in 0..count {
        let position = Vec3::new((i % side) as f32 * 1.5, 1.0, (i / side) as f32 * 1.5);
        world.add_body(RigidBody::new(RigidBodyConstructionInfo::new(
            1.0,
            Arc::new(ConvexShape::sphere(0.5).into()),
            Transform::from_position(position),
        )));
    }
    world
}

fn bench_world_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_step");
    for &count in &[64usize, 256] {
        group.bench_with_input(BenchmarkId::new("sequential", count), &count, |b, &count| {
            let mut world = sphere_field(count, false);
            b.iter(|| world.step())
        });
        group.bench_with_input(BenchmarkId::new("parallel", count), &count, |b, &count| {
            let mut world = sphere_field(count, true);
            b.iter(|| world.step())
        });
    }
    group.finish();
}

fn generate_grid_mesh(resolution: usize) -> TriangleMesh {
    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    for y in 0..=resolution {
        for x in 0..=resolution {
            vertices.push(Vec3::new(x as f32, 0.0, y as f32));
        }
    }
    let width = resolution + 1;
    for y in 0..resolution {
        for x in 0..resolution {
            let i = y * width + x;
            let a = i as u32;
            let b = (i + 1) as u32;
            let c = (i + width) as u32;
            let d = (i + width + 1) as u32;
            indices.push([a, c, b]);
            indices.push([b, c, d]);
        }
    }
    TriangleMesh::builder(vertices, indices).recenter().build()
}

fn bench_mesh_contact(c: &mut Criterion) {
    let mut group = c.benchmark_group("convex_concave");
    for &resolution in &[8usize, 32] {
        let mesh = generate_grid_mesh(resolution);
        let ground = CollisionObject::new(
            Arc::new(CollisionShape::Concave(Arc::new(mesh))),
            Transform::IDENTITY,
        );
        let ball = CollisionObject::new(
            Arc::new(ConvexShape::sphere(1.0).into()),
            Transform::from_position(Vec3::new(0.25, 0.95, 0.25)),
        );
        let mut objects = vec![ground, ball];

        group.bench_with_input(
            BenchmarkId::new("sphere_on_grid", resolution),
            &resolution,
            |b, _| {
                let mut cache = OverlappingPairCache::new();
                for (index, object) in objects.iter().enumerate() {
                    cache.create_proxy(index, 1, u16::MAX, object.aabb());
                }
                cache.update_overlapping_pairs();
                let mut dispatcher = CollisionDispatcher::default();
                b.iter(|| {
                    let info = dispatcher.dispatch_info(DT, DispatchFunc::Discrete);
                    dispatcher.dispatch_all_collision_pairs(&mut cache, &mut objects, &info);
                })
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_gjk,
    bench_penetration,
    bench_world_step,
    bench_mesh_contact
);
criterion_main!(benches);
