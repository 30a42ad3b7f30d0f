use crate::error::RenderResult;
use crate::gpu::{BlendMode, ClearValues, DepthMode, DrawCall, DrawState, Geometry, PassTarget};
use crate::renderer::batch::FrameBatches;
use crate::renderer::label::{LabelDecider, LitLabel, ShadingLabel};
use crate::renderer::matrices::MatricesObserver;
use crate::renderer::render_context::{
    apply_light, bind_light, bind_material, eye_to_light_clip, surface_uniforms, RenderContext,
};
use crate::renderer::shadows::ShadowMaps;
use crate::renderer::texture_units::TextureUnitAllocator;
use crate::scene::Scene;

/// Draws translucent instances in batch order over the finished opaque image.
///
/// Each lit instance is drawn once per light: the first draw composites with
/// the material's blend mode and later ones add their light on top. Depth is
/// tested against the opaque depth but never written.
#[allow(clippy::too_many_arguments)]
pub fn render_translucent(
    ctx: &mut RenderContext<'_>,
    units: &mut TextureUnitAllocator,
    labels: &dyn LabelDecider,
    observer: &MatricesObserver<'_>,
    scene: &Scene,
    batches: &FrameBatches,
    shadow_maps: &ShadowMaps,
    target: &PassTarget,
) -> RenderResult<()> {
    if batches.translucents.is_empty() {
        return Ok(());
    }
    ctx.pass("translucent", target, ClearValues::LOAD, |ctx| {
        for &index in &batches.translucents {
            let instance = &scene.instances[index];
            let material = &instance.material;
            let surface = labels.surface(material);
            let scope = observer.instance(index, instance);
            let base = DrawState::OPAQUE
                .with_depth(DepthMode::TEST)
                .with_cull(instance.effective_culling());

            if material.is_unlit() || batches.lit.is_empty() {
                let program = ctx.program(ShadingLabel::Unlit(surface))?;
                let uniforms = surface_uniforms(&scope, material);
                let mut unit_scope = units.root();
                bind_material(&mut unit_scope, material, surface.maps)?;
                let samplers = unit_scope.bindings();
                ctx.draw(&DrawCall {
                    program,
                    geometry: Geometry::Mesh(instance.mesh),
                    state: base.with_blend(material.blend),
                    samplers: &samplers,
                    uniforms: &uniforms,
                    viewport: None,
                })?;
                continue;
            }

            for (position, light_batches) in batches.lit.iter().enumerate() {
                let first = position == 0;
                let light = &scene.lights[light_batches.light];
                let label = LitLabel {
                    surface,
                    light: light_batches.label,
                };
                let program = ctx.program(ShadingLabel::Lit(label))?;

                let mut uniforms = surface_uniforms(&scope, material);
                apply_light(&mut uniforms, light, observer.view(), first);
                uniforms.set_eye_to_light_clip(eye_to_light_clip(
                    observer,
                    light_batches.light,
                    light,
                ));

                let mut light_units = units.root();
                bind_light(
                    &mut light_units,
                    shadow_maps,
                    light_batches.light,
                    light_batches.label,
                )?;
                let mut material_units = light_units.child();
                bind_material(&mut material_units, material, surface.maps)?;
                let samplers = material_units.bindings();
                let blend = if first {
                    material.blend
                } else {
                    BlendMode::Additive
                };
                ctx.draw(&DrawCall {
                    program,
                    geometry: Geometry::Mesh(instance.mesh),
                    state: base.with_blend(blend),
                    samplers: &samplers,
                    uniforms: &uniforms,
                    viewport: None,
                })?;
            }
        }
        Ok(())
    })
}
