//! Deferred path: an attribute pass fills the g-buffer and marks covered
//! pixels in the stencil buffer, then one full-screen pass per light shades
//! only the marked pixels.

use crate::error::{RenderError, RenderResult};
use crate::gpu::{
    Area, BlendMode, CapabilityFlags, Capabilities, ClearValues, DrawCall, DrawState, DrawUniforms,
    FilterMode, Framebuffer, FramebufferDescription, Geometry, PassTarget, StencilMode, TextureFormat,
    TextureId,
};
use crate::renderer::batch::FrameBatches;
use crate::renderer::label::{LightLabel, ShadingLabel};
use crate::renderer::matrices::MatricesObserver;
use crate::renderer::render_context::{
    apply_light, bind_light, bind_material, dark_light, eye_to_light_clip, surface_uniforms,
    RenderContext,
};
use crate::renderer::shadows::ShadowMaps;
use crate::renderer::texture_units::TextureUnitAllocator;
use crate::scene::{Light, Scene};

/// Stencil value written wherever the attribute pass drew.
pub const COVERED: u8 = 1;

/// Attribute buffers of the deferred path:
///
/// 0. albedo in rgb, emission level in a
/// 1. eye-space normal in xyz, eye depth in w
/// 2. specular color in rgb, exponent / 255 in a
///
/// plus a depth-stencil attachment for the coverage mask.
pub fn gbuffer_description(area: Area) -> FramebufferDescription {
    FramebufferDescription::new(area)
        .with_color(TextureFormat::Rgba8, FilterMode::Nearest)
        .with_color(TextureFormat::Rgba16F, FilterMode::Nearest)
        .with_color(TextureFormat::Rgba8, FilterMode::Nearest)
        .with_depth(TextureFormat::Depth24Stencil8)
}

pub fn check_capabilities(capabilities: &Capabilities) -> RenderResult<()> {
    capabilities.require(
        CapabilityFlags::STENCIL,
        "deferred shading",
        "the light pass is masked with a stencil buffer",
    )?;
    capabilities.require(
        CapabilityFlags::HALF_FLOAT_COLOR_TARGETS,
        "deferred shading",
        "normals and eye depth are stored in a half-float target",
    )
}

pub fn render_geometry(
    ctx: &mut RenderContext<'_>,
    units: &mut TextureUnitAllocator,
    observer: &MatricesObserver<'_>,
    scene: &Scene,
    batches: &FrameBatches,
    gbuffer: &Framebuffer,
) -> RenderResult<()> {
    let state = DrawState::OPAQUE.with_stencil(StencilMode::Write { reference: COVERED });
    ctx.pass(
        "deferred.geometry",
        &gbuffer.target(),
        ClearValues::all([0.0; 4]),
        |ctx| {
            for (label, indices) in &batches.geometry {
                let program = ctx.program(ShadingLabel::Geometry(*label))?;
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
                        state: state.with_cull(instance.effective_culling()),
                        samplers: &samplers,
                        uniforms: &uniforms,
                        viewport: None,
                    })?;
                }
            }
            Ok(())
        },
    )
}

fn gbuffer_texture(gbuffer: &Framebuffer, index: usize) -> RenderResult<TextureId> {
    gbuffer.color_texture(index).ok_or_else(|| {
        RenderError::load(
            format!("g-buffer attachment {}", index),
            "framebuffer does not match the g-buffer layout",
        )
    })
}

/// Shades `output` from the g-buffer, then draws unlit opaque instances
/// against the g-buffer depth.
#[allow(clippy::too_many_arguments)]
pub fn render_lights(
    ctx: &mut RenderContext<'_>,
    units: &mut TextureUnitAllocator,
    observer: &MatricesObserver<'_>,
    scene: &Scene,
    batches: &FrameBatches,
    shadow_maps: &ShadowMaps,
    gbuffer: &Framebuffer,
    output: TextureId,
    clear_color: [f32; 4],
) -> RenderResult<()> {
    let attributes = [
        gbuffer_texture(gbuffer, 0)?,
        gbuffer_texture(gbuffer, 1)?,
        gbuffer_texture(gbuffer, 2)?,
    ];
    let area = gbuffer.area();
    let target = PassTarget {
        area,
        color: vec![output],
        depth_stencil: gbuffer.depth_stencil,
    };
    let inverse_projection = observer.projection().inverse();

    ctx.pass("deferred.light", &target, ClearValues::color(clear_color), |ctx| {
        let dark = dark_light();
        let lights: Vec<(usize, &Light, LightLabel)> = if batches.lit.is_empty() {
            // Emission is added by the first light; a dark one stands in.
            vec![(usize::MAX, &dark, LightLabel::Directional)]
        } else {
            batches
                .lit
                .iter()
                .map(|lit| (lit.light, &scene.lights[lit.light], lit.label))
                .collect()
        };

        for (position, (index, light, label)) in lights.into_iter().enumerate() {
            let first = position == 0;
            let program = ctx.program(ShadingLabel::DeferredLight(label))?;
            let mut unit_scope = units.root();
            for texture in attributes {
                unit_scope.bind_texture_2d(texture)?;
            }
            bind_light(&mut unit_scope, shadow_maps, index, label)?;
            let samplers = unit_scope.bindings();

            let mut uniforms = DrawUniforms::new();
            uniforms.set_model_view(inverse_projection);
            uniforms.set_projection(observer.projection());
            uniforms.set_view_inverse(observer.view_inverse());
            uniforms.set_screen(area.width, area.height);
            apply_light(&mut uniforms, light, observer.view(), first);
            uniforms.set_eye_to_light_clip(eye_to_light_clip(observer, index, light));

            let blend = if first {
                BlendMode::Replace
            } else {
                BlendMode::Additive
            };
            ctx.draw(&DrawCall {
                program,
                geometry: Geometry::FullscreenTriangle,
                state: DrawState::SCREEN
                    .with_blend(blend)
                    .with_stencil(StencilMode::Equal { reference: COVERED }),
                samplers: &samplers,
                uniforms: &uniforms,
                viewport: None,
            })?;
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
                    state: DrawState::OPAQUE.with_cull(instance.effective_culling()),
                    samplers: &samplers,
                    uniforms: &uniforms,
                    viewport: None,
                })?;
            }
        }
        Ok(())
    })
}
