use glam::Vec3;

use render_kernel::gpu::{
    Area, BlendMode, Capabilities, CapabilityFlags, FilterMode, Framebuffer,
    FramebufferDescription, Geometry, GpuBackend, GpuCommand, MeshData, MeshId, RecordingBackend,
    StencilMode, TextureDescription, TextureFormat, TextureId, TextureKind,
};
use render_kernel::renderer::{
    BlurParameters, DepthLabel, FogParameters, FramePhase, PostprocessStep, ProgramKey, Renderer,
    ShadingLabel,
};
use render_kernel::scene::{
    Camera, DirectionalLight, Instance, LightId, Material, ProjectiveLight, Scene, ShadowConfig,
    Transform,
};
use render_kernel::settings::{RenderPath, RenderSettings, TranslucentOrder};
use render_kernel::RenderError;

fn renderer_with(capabilities: Capabilities, settings: RenderSettings) -> Renderer<RecordingBackend> {
    Renderer::new(RecordingBackend::new(capabilities), settings)
}

fn output(renderer: &mut Renderer<RecordingBackend>) -> Framebuffer {
    renderer
        .backend_mut()
        .create_framebuffer(
            &FramebufferDescription::color(Area::new(320, 240), TextureFormat::Rgba8, FilterMode::Linear)
                .with_depth(TextureFormat::Depth32F),
        )
        .expect("output framebuffer")
}

fn mesh(renderer: &mut Renderer<RecordingBackend>) -> MeshId {
    renderer
        .backend_mut()
        .create_mesh(&MeshData::quad())
        .expect("mesh")
}

fn texture(renderer: &mut Renderer<RecordingBackend>) -> TextureId {
    renderer
        .backend_mut()
        .create_texture(&TextureDescription {
            area: Area::square(64),
            format: TextureFormat::Rgba8,
            kind: TextureKind::D2,
            filter: FilterMode::Linear,
        })
        .expect("texture")
}

fn at(x: f32, z: f32) -> Transform {
    Transform::from_translation(Vec3::new(x, 0.0, z))
}

fn sun() -> DirectionalLight {
    DirectionalLight::new(Vec3::new(-0.3, -1.0, -0.2), Vec3::ONE, 1.0)
}

fn spot(shadow: ShadowConfig) -> ProjectiveLight {
    ProjectiveLight::new(LightId(7), Vec3::new(0.0, 5.0, 5.0), Vec3::ZERO).with_shadow(shadow)
}

fn basic_shadow() -> ShadowConfig {
    ShadowConfig::Basic {
        size_exponent: 9,
        depth_bias: 0.005,
    }
}

fn variance_shadow() -> ShadowConfig {
    ShadowConfig::Variance {
        size_exponent: 8,
        minimum_variance: 1e-4,
        light_bleed_reduction: 0.2,
        blur: BlurParameters::default(),
    }
}

fn draws_in<'a>(backend: &'a RecordingBackend, label: &str) -> Vec<&'a GpuCommand> {
    backend
        .draws_by_pass()
        .into_iter()
        .filter(|(pass, _)| *pass == label)
        .flat_map(|(_, draws)| draws)
        .collect()
}

/// Fails if any draw samples a texture attached to the pass it was drawn in.
fn assert_no_sampled_attachments(backend: &RecordingBackend) {
    let mut open = None;
    for command in backend.commands() {
        match command {
            GpuCommand::BeginPass { label, target, .. } => open = Some((label, target)),
            GpuCommand::EndPass => open = None,
            GpuCommand::Draw { samplers, .. } => {
                let (label, target) = open.expect("draws happen inside a pass");
                for binding in samplers {
                    assert!(
                        !target.attaches(binding.texture),
                        "pass {label} samples its own attachment {:?}",
                        binding.texture
                    );
                }
            }
            _ => {}
        }
    }
}

#[test]
fn directional_light_with_shared_material_is_one_batch_without_shadows() {
    let mut renderer = renderer_with(Capabilities::default(), RenderSettings::default());
    let target = output(&mut renderer);
    let quad = mesh(&mut renderer);
    let material = Material::rgb(0.8, 0.2, 0.2);
    let scene = Scene::new(Camera::default())
        .with_light(sun())
        .with_instance(Instance::new(quad, material).with_transform(at(-1.0, 0.0)))
        .with_instance(Instance::new(quad, material).with_transform(at(1.0, 0.0)));

    let stats = renderer.render_frame(&scene, &target).expect("frame renders");

    assert_eq!(stats.shadow_maps_rendered, 0);
    assert_eq!(
        renderer.backend().pass_labels(),
        vec!["depth.prepass", "forward.color"],
        "no shadow passes for a directional light"
    );
    assert_eq!(draws_in(renderer.backend(), "forward.color").len(), 2);
    // One batch each for depth and lit.
    assert_eq!(stats.batches, 2);
    assert_eq!(
        stats.phases,
        vec![
            FramePhase::ShadowInitialize,
            FramePhase::ShadowRender,
            FramePhase::DepthOrGeometry,
            FramePhase::LightOrColor,
            FramePhase::Translucent,
        ]
    );
}

#[test]
fn shadow_pass_runs_before_the_light_pass_and_feeds_it() {
    let mut renderer = renderer_with(Capabilities::default(), RenderSettings::default());
    let target = output(&mut renderer);
    let quad = mesh(&mut renderer);
    let scene = Scene::new(Camera::default())
        .with_light(spot(basic_shadow()))
        .with_instance(Instance::new(quad, Material::white()));

    let stats = renderer.render_frame(&scene, &target).expect("frame renders");
    assert_eq!(stats.shadow_maps_rendered, 1);
    assert_eq!(stats.draws_in("shadow.render"), 1);

    let backend = renderer.backend();
    let labels = backend.pass_labels();
    let shadow = labels.iter().position(|l| *l == "shadow.render").expect("shadow pass");
    let color = labels.iter().position(|l| *l == "forward.color").expect("color pass");
    assert!(shadow < color, "shadow map must be rendered before it is sampled");

    let shadow_depth = backend
        .commands()
        .iter()
        .find_map(|command| match command {
            GpuCommand::BeginPass { label, target, .. } if label == "shadow.render" => {
                target.depth_stencil
            }
            _ => None,
        })
        .expect("shadow map depth");
    let lit = draws_in(backend, "forward.color");
    match lit.as_slice() {
        [GpuCommand::Draw { samplers, .. }] => {
            assert_eq!(samplers[0].texture, shadow_depth);
            assert_eq!(samplers[0].unit.0, 0);
        }
        other => panic!("expected one lit draw, got {other:?}"),
    }
}

#[test]
fn shadow_maps_are_all_initialized_before_any_is_rendered() {
    let mut renderer = renderer_with(Capabilities::default(), RenderSettings::default());
    let target = output(&mut renderer);
    let quad = mesh(&mut renderer);
    let second = ProjectiveLight::new(LightId(8), Vec3::new(3.0, 5.0, 0.0), Vec3::ZERO)
        .with_shadow(basic_shadow());
    let scene = Scene::new(Camera::default())
        .with_light(spot(basic_shadow()))
        .with_light(second)
        .with_instance(Instance::new(quad, Material::white()));

    renderer.render_frame(&scene, &target).expect("frame renders");
    let labels = renderer.backend().pass_labels();
    assert_eq!(
        &labels[..4],
        &[
            "shadow.initialize",
            "shadow.initialize",
            "shadow.render",
            "shadow.render"
        ]
    );
}

#[test]
fn variance_shadow_maps_are_blurred_before_lighting() {
    let mut renderer = renderer_with(Capabilities::default(), RenderSettings::default());
    let target = output(&mut renderer);
    let quad = mesh(&mut renderer);
    let scene = Scene::new(Camera::default())
        .with_light(spot(variance_shadow()))
        .with_instance(Instance::new(quad, Material::white()));

    renderer.render_frame(&scene, &target).expect("frame renders");
    assert_eq!(
        renderer.backend().pass_labels(),
        vec![
            "shadow.initialize",
            "shadow.render",
            "postprocess.blur.horizontal",
            "postprocess.blur.vertical",
            "depth.prepass",
            "forward.color",
        ]
    );
    // The map is blurred in place through a scratch framebuffer.
    assert_no_sampled_attachments(renderer.backend());
    let horizontal = renderer
        .backend()
        .commands()
        .iter()
        .find_map(|command| match command {
            GpuCommand::BeginPass { label, target, .. } if label == "postprocess.blur.horizontal" => {
                Some(target.clone())
            }
            _ => None,
        })
        .expect("horizontal blur pass");
    match draws_in(renderer.backend(), "postprocess.blur.horizontal").as_slice() {
        [GpuCommand::Draw { samplers, .. }] => {
            assert!(!horizontal.attaches(samplers[0].texture));
        }
        other => panic!("expected one blur draw, got {other:?}"),
    }
}

#[test]
fn variance_shadows_without_float_targets_are_unsupported() {
    let capabilities = Capabilities::new(
        CapabilityFlags::all() - CapabilityFlags::FLOAT_COLOR_TARGETS,
        16,
    );
    let mut renderer = renderer_with(capabilities, RenderSettings::default());
    let target = output(&mut renderer);
    let quad = mesh(&mut renderer);
    let scene = Scene::new(Camera::default())
        .with_light(spot(variance_shadow()))
        .with_instance(Instance::new(quad, Material::white()));

    let err = renderer.render_frame(&scene, &target).unwrap_err();
    assert!(
        matches!(
            err,
            RenderError::CapabilityUnsupported {
                feature: "variance shadow maps",
                ..
            }
        ),
        "unexpected error {err:?}"
    );
    assert!(err.is_fatal());
    assert!(!renderer.backend().in_pass());

    // The renderer is still usable for a scene it can draw.
    let plain = Scene::new(Camera::default()).with_instance(Instance::new(quad, Material::white()));
    renderer.render_frame(&plain, &target).expect("next frame renders");
}

#[test]
fn deferred_geometry_writes_stencil_and_lights_test_it() {
    let settings = RenderSettings {
        path: RenderPath::Deferred,
        ..RenderSettings::default()
    };
    let mut renderer = renderer_with(Capabilities::default(), settings);
    let target = output(&mut renderer);
    let quad = mesh(&mut renderer);
    let scene = Scene::new(Camera::default())
        .with_light(sun())
        .with_light(spot(basic_shadow()))
        .with_instance(Instance::new(quad, Material::white()))
        .with_instance(Instance::new(quad, Material::white().unlit()).with_transform(at(2.0, 0.0)));

    renderer.render_frame(&scene, &target).expect("frame renders");
    let backend = renderer.backend();
    assert_eq!(
        backend.pass_labels(),
        vec![
            "shadow.initialize",
            "shadow.render",
            "deferred.geometry",
            "deferred.light"
        ]
    );

    let geometry = draws_in(backend, "deferred.geometry");
    assert_eq!(geometry.len(), 1, "only lit instances fill the g-buffer");
    for draw in geometry {
        let GpuCommand::Draw { state, .. } = draw else {
            unreachable!()
        };
        assert_eq!(state.stencil, StencilMode::Write { reference: 1 });
    }

    let light = draws_in(backend, "deferred.light");
    let full_screen: Vec<_> = light
        .iter()
        .filter_map(|draw| match draw {
            GpuCommand::Draw {
                geometry: Geometry::FullscreenTriangle,
                state,
                samplers,
                ..
            } => Some((state, samplers)),
            _ => None,
        })
        .collect();
    assert_eq!(full_screen.len(), 2, "one full-screen draw per light");
    for (state, _) in &full_screen {
        assert_eq!(state.stencil, StencilMode::Equal { reference: 1 });
    }
    assert_eq!(full_screen[0].0.blend, BlendMode::Replace);
    assert_eq!(full_screen[1].0.blend, BlendMode::Additive);
    // Three attribute buffers, plus the shadow map for the projective light.
    assert_eq!(full_screen[0].1.len(), 3);
    assert_eq!(full_screen[1].1.len(), 4);
    assert_eq!(light.len(), 3, "the unlit instance is drawn after the lights");

    // The light pass keeps the g-buffer depth-stencil attached for the
    // stencil test, so it must only sample the attribute colors.
    let light_target = backend
        .commands()
        .iter()
        .find_map(|command| match command {
            GpuCommand::BeginPass { label, target, .. } if label == "deferred.light" => {
                Some(target.clone())
            }
            _ => None,
        })
        .expect("light pass");
    let gbuffer_depth = light_target.depth_stencil.expect("stencil attachment");
    for (_, samplers) in &full_screen {
        assert!(samplers.iter().all(|binding| binding.texture != gbuffer_depth));
    }
    assert_no_sampled_attachments(backend);
}

#[test]
fn deferred_without_stencil_is_unsupported() {
    let settings = RenderSettings {
        path: RenderPath::Deferred,
        ..RenderSettings::default()
    };
    let capabilities = Capabilities::new(CapabilityFlags::all() - CapabilityFlags::STENCIL, 16);
    let mut renderer = renderer_with(capabilities, settings);
    let target = output(&mut renderer);

    let err = renderer
        .render_frame(&Scene::default(), &target)
        .unwrap_err();
    assert!(matches!(
        err,
        RenderError::CapabilityUnsupported {
            feature: "deferred shading",
            ..
        }
    ));
    assert!(renderer.backend().pass_labels().is_empty());
}

#[test]
fn program_failure_aborts_the_frame_and_closes_the_pass() {
    let mut renderer = renderer_with(Capabilities::default(), RenderSettings::default());
    let target = output(&mut renderer);
    let quad = mesh(&mut renderer);
    let failing = ProgramKey::from(ShadingLabel::Depth(DepthLabel::Constant)).name();
    renderer.backend_mut().fail_program(failing);
    let scene = Scene::new(Camera::default())
        .with_light(sun())
        .with_instance(Instance::new(quad, Material::white()));

    let err = renderer.render_frame(&scene, &target).unwrap_err();
    assert!(matches!(err, RenderError::ResourceLoad { .. }), "{err:?}");
    assert!(!err.is_fatal());
    assert!(!renderer.backend().in_pass());
    assert!(
        !renderer.backend().pass_labels().contains(&"forward.color"),
        "passes after the failure are not started"
    );
    assert_eq!(
        renderer.backend().commands().last(),
        Some(&GpuCommand::Discard),
        "the partial frame is dropped, not flushed"
    );
    assert!(!renderer.backend().commands().contains(&GpuCommand::Flush));

    renderer.backend_mut().clear_failures();
    renderer.backend_mut().clear_commands();
    renderer.render_frame(&scene, &target).expect("next frame renders");
    let commands = renderer.backend().commands();
    assert_eq!(commands.last(), Some(&GpuCommand::Flush));
    assert!(!commands.contains(&GpuCommand::Discard));
}

#[test]
fn matrices_are_shared_between_passes_and_reset_per_frame() {
    let mut renderer = renderer_with(Capabilities::default(), RenderSettings::default());
    let target = output(&mut renderer);
    let quad = mesh(&mut renderer);
    let scene = Scene::new(Camera::default())
        .with_light(sun())
        .with_instance(Instance::new(quad, Material::white()).with_transform(at(-1.0, 0.0)))
        .with_instance(Instance::new(quad, Material::white()).with_transform(at(1.0, 0.0)));

    renderer.render_frame(&scene, &target).expect("first frame");
    // view inverse, then model, model-view and normal matrix per instance,
    // although each instance is drawn in two passes.
    assert_eq!(renderer.matrices().computations(), 7);

    renderer.render_frame(&scene, &target).expect("second frame");
    assert_eq!(renderer.matrices().computations(), 14);
}

#[test]
fn light_units_precede_material_units() {
    let mut renderer = renderer_with(Capabilities::default(), RenderSettings::default());
    let target = output(&mut renderer);
    let quad = mesh(&mut renderer);
    let albedo = texture(&mut renderer);
    let normal = texture(&mut renderer);
    let material = Material::white()
        .with_albedo_texture(albedo)
        .with_normal_texture(normal);
    let scene = Scene::new(Camera::default())
        .with_light(spot(basic_shadow()))
        .with_instance(Instance::new(quad, material));

    let stats = renderer.render_frame(&scene, &target).expect("frame renders");
    assert_eq!(stats.texture_units_high_water, 3);
    match draws_in(renderer.backend(), "forward.color").as_slice() {
        [GpuCommand::Draw { samplers, .. }] => {
            let textures: Vec<_> = samplers.iter().map(|s| s.texture).collect();
            assert_eq!(&textures[1..], &[albedo, normal]);
            let units: Vec<_> = samplers.iter().map(|s| s.unit.0).collect();
            assert_eq!(units, vec![0, 1, 2]);
        }
        other => panic!("expected one lit draw, got {other:?}"),
    }
}

#[test]
fn too_few_texture_units_is_reported() {
    let settings = RenderSettings {
        max_texture_units: Some(2),
        ..RenderSettings::default()
    };
    let mut renderer = renderer_with(Capabilities::default(), settings);
    let target = output(&mut renderer);
    let quad = mesh(&mut renderer);
    let material = Material::white()
        .with_albedo_texture(texture(&mut renderer))
        .with_normal_texture(texture(&mut renderer));
    let scene = Scene::new(Camera::default())
        .with_light(spot(basic_shadow()))
        .with_instance(Instance::new(quad, material));

    let err = renderer.render_frame(&scene, &target).unwrap_err();
    assert!(
        matches!(
            err,
            RenderError::InsufficientUnits {
                requested: 3,
                available: 2
            }
        ),
        "{err:?}"
    );
}

#[test]
fn translucents_are_drawn_back_to_front_after_opaque_content() {
    let settings = RenderSettings {
        translucent_order: TranslucentOrder::BackToFront,
        ..RenderSettings::default()
    };
    let mut renderer = renderer_with(Capabilities::default(), settings);
    let target = output(&mut renderer);
    let near = mesh(&mut renderer);
    let far = mesh(&mut renderer);
    let glass = Material::new([0.5, 0.7, 1.0, 0.4]).translucent(BlendMode::Alpha);
    let scene = Scene::new(Camera::default())
        .with_light(sun())
        .with_instance(Instance::new(near, glass).with_transform(at(0.0, 1.0)))
        .with_instance(Instance::new(far, glass).with_transform(at(0.0, -5.0)));

    let stats = renderer.render_frame(&scene, &target).expect("frame renders");
    assert_eq!(stats.translucents, 2);

    let backend = renderer.backend();
    assert_eq!(backend.pass_labels().last(), Some(&"translucent"));
    let order: Vec<_> = draws_in(backend, "translucent")
        .into_iter()
        .filter_map(|draw| match draw {
            GpuCommand::Draw {
                geometry: Geometry::Mesh(mesh),
                state,
                ..
            } => Some((*mesh, state.blend, state.depth.write)),
            _ => None,
        })
        .collect();
    assert_eq!(
        order,
        vec![(far, BlendMode::Alpha, false), (near, BlendMode::Alpha, false)]
    );
}

#[test]
fn postprocess_chain_reuses_scratch_framebuffers_across_frames() {
    let settings = RenderSettings {
        postprocess: vec![
            PostprocessStep::Blur(BlurParameters {
                radius: 2,
                scale: 0.5,
                passes: 2,
            }),
            PostprocessStep::Fog(FogParameters::default()),
        ],
        ..RenderSettings::default()
    };
    let mut renderer = renderer_with(Capabilities::default(), settings);
    let target = output(&mut renderer);
    let quad = mesh(&mut renderer);
    let scene = Scene::new(Camera::default())
        .with_light(sun())
        .with_instance(Instance::new(quad, Material::white()));

    let first = renderer.render_frame(&scene, &target).expect("first frame");
    assert_eq!(first.phases.last(), Some(&FramePhase::Postprocess));
    assert_eq!(first.blits, 1, "fog output is copied back with a blit");
    let created = renderer.backend().framebuffer_creations();

    let second = renderer.render_frame(&scene, &target).expect("second frame");
    assert_eq!(renderer.backend().framebuffer_creations(), created);
    assert_eq!(second.framebuffers.misses, first.framebuffers.misses);

    let labels = renderer.backend().pass_labels();
    assert!(labels.contains(&"postprocess.blur.horizontal"));
    assert!(labels.contains(&"postprocess.fog"));
    // Blur and fog both write back into the frame they read.
    assert_no_sampled_attachments(renderer.backend());
}

#[test]
fn copies_fall_back_to_a_program_without_blits() {
    let settings = RenderSettings {
        postprocess: vec![PostprocessStep::Fog(FogParameters::default())],
        ..RenderSettings::default()
    };
    let capabilities = Capabilities::new(
        CapabilityFlags::all() - CapabilityFlags::REGION_BLIT - CapabilityFlags::SCALED_BLIT,
        16,
    );
    let mut renderer = renderer_with(capabilities, settings);
    let target = output(&mut renderer);

    let stats = renderer
        .render_frame(&Scene::default(), &target)
        .expect("frame renders");
    assert_eq!(stats.blits, 0);
    let labels = renderer.backend().pass_labels();
    assert_eq!(
        &labels[labels.len() - 2..],
        &["postprocess.fog", "postprocess.copy"]
    );

    // In-place fog renders into scratch, then copies back.
    let output_color = target.color_texture(0).expect("output color");
    let fog_target = renderer
        .backend()
        .commands()
        .iter()
        .find_map(|command| match command {
            GpuCommand::BeginPass { label, target, .. } if label == "postprocess.fog" => {
                Some(target.clone())
            }
            _ => None,
        })
        .expect("fog pass");
    assert!(!fog_target.attaches(output_color));
    match draws_in(renderer.backend(), "postprocess.fog").as_slice() {
        [GpuCommand::Draw { samplers, .. }] => {
            assert_eq!(samplers[0].texture, output_color);
        }
        other => panic!("expected one fog draw, got {other:?}"),
    }
    assert_no_sampled_attachments(renderer.backend());
}

#[test]
fn unused_shadow_maps_are_released_after_the_retention_window() {
    let mut renderer = renderer_with(Capabilities::default(), RenderSettings::default());
    let target = output(&mut renderer);
    let quad = mesh(&mut renderer);
    let lit = Scene::new(Camera::default())
        .with_light(spot(basic_shadow()))
        .with_instance(Instance::new(quad, Material::white()));
    let dark = Scene::new(Camera::default()).with_instance(Instance::new(quad, Material::white()));

    renderer.render_frame(&lit, &target).expect("lit frame");
    let second = renderer.render_frame(&lit, &target).expect("lit frame again");
    assert_eq!(second.shadow_maps.misses, 1, "the shadow map is cached");

    let mut evicted = 0;
    for _ in 0..6 {
        evicted += renderer
            .render_frame(&dark, &target)
            .expect("dark frame")
            .shadow_maps_evicted;
    }
    assert_eq!(evicted, 1);
}

#[test]
fn shutdown_releases_every_cached_resource() {
    let settings = RenderSettings {
        postprocess: vec![PostprocessStep::Blur(BlurParameters::default())],
        ..RenderSettings::default()
    };
    let mut renderer = renderer_with(Capabilities::default(), settings);
    let target = output(&mut renderer);
    let quad = mesh(&mut renderer);
    let scene = Scene::new(Camera::default())
        .with_light(spot(variance_shadow()))
        .with_instance(Instance::new(quad, Material::white()));
    renderer.render_frame(&scene, &target).expect("frame renders");
    assert!(renderer.backend().live_programs() > 0);

    renderer.shutdown().expect("nothing is lent out");
    let backend = renderer.backend_mut();
    assert_eq!(backend.live_programs(), 0);
    assert_eq!(backend.live_framebuffers(), 1, "only the caller's output is left");
    backend.delete_framebuffer(&target).expect("output is still live");
    backend.delete_mesh(quad).expect("mesh is still live");
    assert_eq!(backend.live_textures(), 0);
}
