use glam::Vec3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use render_kernel::gpu::{BlendMode, Capabilities, Handle, MeshId, TextureId};
use render_kernel::renderer::SceneBatcher;
use render_kernel::scene::{
    Camera, DirectionalLight, Instance, LightId, Material, ProjectiveLight, Scene, ShadowConfig,
    SphericalLight, Transform,
};
use render_kernel::settings::{RenderPath, TranslucentOrder};

fn random_material(rng: &mut SmallRng) -> Material {
    let mut material = Material::rgb(rng.gen(), rng.gen(), rng.gen());
    if rng.gen_bool(0.3) {
        material = material.with_albedo_texture(TextureId::new(rng.gen_range(1..4)));
    }
    if rng.gen_bool(0.2) {
        material = material.with_normal_texture(TextureId::new(10));
    }
    if rng.gen_bool(0.2) {
        material = material.with_alpha_depth(0.5);
    }
    match rng.gen_range(0..6) {
        0 => material.unlit(),
        1 => material.translucent(BlendMode::Alpha),
        _ => material,
    }
}

fn random_scene(rng: &mut SmallRng) -> Scene {
    let mut scene = Scene::new(Camera::default());
    for id in 0..rng.gen_range(0..4) {
        match rng.gen_range(0..3) {
            0 => {
                scene.add_light(DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE, 1.0));
            }
            1 => {
                scene.add_light(SphericalLight::new(Vec3::Y * 3.0, Vec3::ONE, 1.0, 10.0));
            }
            _ => {
                let mut light =
                    ProjectiveLight::new(LightId(id), Vec3::new(0.0, 5.0, 5.0), Vec3::ZERO);
                if rng.gen_bool(0.7) {
                    light = light.with_shadow(ShadowConfig::Basic {
                        size_exponent: 8,
                        depth_bias: 0.002,
                    });
                }
                scene.add_light(light);
            }
        }
    }
    for _ in 0..rng.gen_range(0..40) {
        let position = Vec3::new(
            rng.gen_range(-10.0..10.0),
            rng.gen_range(-10.0..10.0),
            rng.gen_range(-10.0..10.0),
        );
        let mut instance = Instance::new(Handle::new(rng.gen_range(1..6)), random_material(rng))
            .with_transform(Transform::from_translation(position));
        if rng.gen_bool(0.2) {
            instance = instance.without_shadows();
        }
        scene.add_instance(instance);
    }
    scene
}

#[test]
fn every_instance_lands_in_the_passes_it_needs() {
    let mut rng = SmallRng::seed_from_u64(7);
    let batcher = SceneBatcher::default();
    let capabilities = Capabilities::default();

    for _ in 0..200 {
        let scene = random_scene(&mut rng);
        let batches = batcher.classify(
            &scene,
            &capabilities,
            RenderPath::Forward,
            TranslucentOrder::Submission,
        );

        let mut depth: Vec<usize> = batches.depth.values().flatten().copied().collect();
        depth.sort_unstable();
        let opaque: Vec<usize> = (0..scene.instances.len())
            .filter(|&i| !scene.instances[i].material.is_translucent())
            .collect();
        assert_eq!(depth, opaque, "each opaque instance is depth-drawn once");

        let translucent: Vec<usize> = (0..scene.instances.len())
            .filter(|&i| scene.instances[i].material.is_translucent())
            .collect();
        assert_eq!(batches.translucents, translucent);

        let mut unlit: Vec<usize> = batches.unlit.values().flatten().copied().collect();
        unlit.sort_unstable();
        let expected_unlit: Vec<usize> = opaque
            .iter()
            .copied()
            .filter(|&i| scene.instances[i].material.is_unlit())
            .collect();
        assert_eq!(unlit, expected_unlit);

        let lit: Vec<usize> = opaque
            .iter()
            .copied()
            .filter(|&i| !scene.instances[i].material.is_unlit())
            .collect();
        assert_eq!(batches.lit.len(), scene.lights.len());
        for light_batches in &batches.lit {
            let mut members: Vec<usize> =
                light_batches.batches.values().flatten().copied().collect();
            members.sort_unstable();
            assert_eq!(members, lit, "lit instances are drawn once per light");
            for label in light_batches.batches.keys() {
                assert_eq!(label.light, light_batches.label);
            }
        }

        let casters: Vec<usize> = opaque
            .iter()
            .copied()
            .filter(|&i| scene.instances[i].casts_shadows)
            .collect();
        let shadowed = scene.lights.iter().filter(|l| l.shadow().is_some()).count();
        assert_eq!(batches.shadows.len(), shadowed);
        for shadow in &batches.shadows {
            assert!(scene.lights[shadow.light].shadow().is_some());
            let mut members: Vec<usize> = shadow.batches.values().flatten().copied().collect();
            members.sort_unstable();
            assert_eq!(members, casters);
        }

        // Within a batch, instances keep scene order.
        for indices in batches.depth.values() {
            assert!(indices.windows(2).all(|w| w[0] < w[1]));
        }
    }
}

#[test]
fn deferred_batches_lit_instances_once_by_surface() {
    let mut rng = SmallRng::seed_from_u64(21);
    let batcher = SceneBatcher::default();
    let capabilities = Capabilities::default();

    for _ in 0..100 {
        let scene = random_scene(&mut rng);
        let batches = batcher.classify(
            &scene,
            &capabilities,
            RenderPath::Deferred,
            TranslucentOrder::Submission,
        );

        let mut geometry: Vec<usize> = batches.geometry.values().flatten().copied().collect();
        geometry.sort_unstable();
        let lit: Vec<usize> = (0..scene.instances.len())
            .filter(|&i| {
                let material = &scene.instances[i].material;
                !material.is_translucent() && !material.is_unlit()
            })
            .collect();
        assert_eq!(geometry, lit);

        assert_eq!(batches.lit.len(), scene.lights.len());
        assert_eq!(batches.lit_batch_count(), 0, "lights shade the g-buffer");
    }
}

#[test]
fn classification_is_deterministic() {
    let mut rng = SmallRng::seed_from_u64(99);
    let batcher = SceneBatcher::default();
    let capabilities = Capabilities::default();

    for _ in 0..50 {
        let scene = random_scene(&mut rng);
        for order in [TranslucentOrder::Submission, TranslucentOrder::BackToFront] {
            for path in [RenderPath::Forward, RenderPath::Deferred] {
                let first = batcher.classify(&scene, &capabilities, path, order);
                let second = batcher.classify(&scene, &capabilities, path, order);
                assert_eq!(first, second);
            }
        }
    }
}

#[test]
fn back_to_front_orders_by_view_depth() {
    let mut rng = SmallRng::seed_from_u64(3);
    let camera = Camera::looking_at(Vec3::new(0.0, 0.0, 20.0), Vec3::ZERO);
    let mut scene = Scene::new(camera);
    let glass = Material::white().translucent(BlendMode::Alpha);
    for _ in 0..30 {
        let z = rng.gen_range(-15.0..15.0);
        scene.add_instance(
            Instance::new(MeshId::new(1), glass)
                .with_transform(Transform::from_translation(Vec3::new(0.0, 0.0, z))),
        );
    }

    let batches = SceneBatcher::default().classify(
        &scene,
        &Capabilities::default(),
        RenderPath::Forward,
        TranslucentOrder::BackToFront,
    );
    let distances: Vec<f32> = batches
        .translucents
        .iter()
        .map(|&i| scene.camera.eye.distance(scene.instances[i].transform.translation))
        .collect();
    assert!(
        distances.windows(2).all(|w| w[0] >= w[1]),
        "farthest first: {distances:?}"
    );
}
