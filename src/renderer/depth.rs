use crate::error::RenderResult;
use crate::gpu::{ClearValues, DrawCall, DrawState, Geometry, PassTarget};
use crate::renderer::batch::FrameBatches;
use crate::renderer::label::{DepthLabel, ShadingLabel};
use crate::renderer::matrices::MatricesObserver;
use crate::renderer::render_context::{surface_uniforms, RenderContext};
use crate::renderer::texture_units::TextureUnitAllocator;
use crate::scene::Scene;

/// Forward depth pre-pass over every opaque instance, so the color pass can
/// shade with an equal-depth test.
pub fn render_depth_prepass(
    ctx: &mut RenderContext<'_>,
    units: &mut TextureUnitAllocator,
    observer: &MatricesObserver<'_>,
    scene: &Scene,
    batches: &FrameBatches,
    target: &PassTarget,
) -> RenderResult<()> {
    let depth_only = PassTarget {
        area: target.area,
        color: Vec::new(),
        depth_stencil: target.depth_stencil,
    };
    ctx.pass("depth.prepass", &depth_only, ClearValues::depth(1.0), |ctx| {
        for (label, indices) in &batches.depth {
            let program = ctx.program(ShadingLabel::Depth(*label))?;
            for &index in indices {
                let instance = &scene.instances[index];
                let scope = observer.instance(index, instance);
                let uniforms = surface_uniforms(&scope, &instance.material);

                let mut unit_scope = units.root();
                if *label == DepthLabel::Mapped {
                    if let Some(albedo) = instance.material.albedo_texture {
                        unit_scope.bind_texture_2d(albedo)?;
                    }
                }
                let samplers = unit_scope.bindings();
                ctx.draw(&DrawCall {
                    program,
                    geometry: Geometry::Mesh(instance.mesh),
                    state: DrawState::DEPTH_ONLY.with_cull(instance.effective_culling()),
                    samplers: &samplers,
                    uniforms: &uniforms,
                    viewport: None,
                })?;
            }
        }
        Ok(())
    })
}
