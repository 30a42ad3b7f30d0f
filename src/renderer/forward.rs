//! Forward shading of opaque instances: one draw per instance per light,
//! additively accumulated over the depth pre-pass.

use std::collections::BTreeMap;

use glam::Mat4;

use crate::error::RenderResult;
use crate::gpu::{BlendMode, ClearValues, DepthMode, DrawCall, DrawState, Geometry, PassTarget};
use crate::renderer::batch::FrameBatches;
use crate::renderer::label::{LabelDecider, LightLabel, LitLabel, ShadingLabel};
use crate::renderer::matrices::MatricesObserver;
use crate::renderer::render_context::{
    apply_light, bind_light, bind_material, dark_light, eye_to_light_clip, surface_uniforms,
    RenderContext,
};
use crate::renderer::shadows::ShadowMaps;
use crate::renderer::texture_units::{TextureUnitAllocator, TextureUnitContext};
use crate::scene::{Light, Scene};

#[allow(clippy::too_many_arguments)]
pub fn render_forward(
    ctx: &mut RenderContext<'_>,
    units: &mut TextureUnitAllocator,
    labels: &dyn LabelDecider,
    observer: &MatricesObserver<'_>,
    scene: &Scene,
    batches: &FrameBatches,
    shadow_maps: &ShadowMaps,
    target: &PassTarget,
    clear_color: [f32; 4],
) -> RenderResult<()> {
    ctx.pass("forward.color", target, ClearValues::color(clear_color), |ctx| {
        if batches.lit.is_empty() {
            // Without lights, lit surfaces still show their emission.
            let mut unlit_batches: BTreeMap<LitLabel, Vec<usize>> = BTreeMap::new();
            for indices in batches.geometry.values() {
                for &index in indices {
                    let label = LitLabel {
                        surface: labels.surface(&scene.instances[index].material),
                        light: LightLabel::Directional,
                    };
                    unlit_batches.entry(label).or_default().push(index);
                }
            }
            let light = dark_light();
            let mut light_units = units.root();
            draw_lit(
                ctx,
                &mut light_units,
                observer,
                scene,
                &unlit_batches,
                &light,
                Mat4::IDENTITY,
                true,
            )?;
        }

        for (position, light_batches) in batches.lit.iter().enumerate() {
            let light = &scene.lights[light_batches.light];
            let light_clip = eye_to_light_clip(observer, light_batches.light, light);
            let mut light_units = units.root();
            bind_light(
                &mut light_units,
                shadow_maps,
                light_batches.light,
                light_batches.label,
            )?;
            draw_lit(
                ctx,
                &mut light_units,
                observer,
                scene,
                &light_batches.batches,
                light,
                light_clip,
                position == 0,
            )?;
        }

        for (label, indices) in &batches.unlit {
            let program = ctx.program(ShadingLabel::Unlit(*label))?;
            for &index in indices {
                let instance = &scene.instances[index];
                let scope = observer.instance(index, instance);
                let uniforms = surface_uniforms(&scope, &instance.material);
                let mut unit_scope = units.root();
                bind_material(&mut unit_scope, &instance.material, label.maps)?;
                let samplers = unit_scope.bindings();
                ctx.draw(&DrawCall {
                    program,
                    geometry: Geometry::Mesh(instance.mesh),
                    state: DrawState::OPAQUE
                        .with_depth(DepthMode::EQUAL)
                        .with_cull(instance.effective_culling()),
                    samplers: &samplers,
                    uniforms: &uniforms,
                    viewport: None,
                })?;
            }
        }
        Ok(())
    })
}

#[allow(clippy::too_many_arguments)]
fn draw_lit(
    ctx: &mut RenderContext<'_>,
    light_units: &mut TextureUnitContext<'_>,
    observer: &MatricesObserver<'_>,
    scene: &Scene,
    batches: &BTreeMap<LitLabel, Vec<usize>>,
    light: &Light,
    light_clip: Mat4,
    first: bool,
) -> RenderResult<()> {
    let state = if first {
        DrawState::OPAQUE.with_depth(DepthMode::EQUAL)
    } else {
        DrawState::OPAQUE
            .with_depth(DepthMode::EQUAL)
            .with_blend(BlendMode::Additive)
    };
    for (label, indices) in batches {
        let program = ctx.program(ShadingLabel::Lit(*label))?;
        for &index in indices {
            let instance = &scene.instances[index];
            let scope = observer.instance(index, instance);
            let mut uniforms = surface_uniforms(&scope, &instance.material);
            apply_light(&mut uniforms, light, observer.view(), first);
            uniforms.set_eye_to_light_clip(light_clip);

            let mut material_units = light_units.child();
            bind_material(&mut material_units, &instance.material, label.surface.maps)?;
            let samplers = material_units.bindings();
            ctx.draw(&DrawCall {
                program,
                geometry: Geometry::Mesh(instance.mesh),
                state: state.with_cull(instance.effective_culling()),
                samplers: &samplers,
                uniforms: &uniforms,
                viewport: None,
            })?;
        }
    }
    Ok(())
}
