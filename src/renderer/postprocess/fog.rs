use crate::error::RenderResult;
use crate::gpu::{DrawUniforms, Framebuffer, FramebufferDescription};
use crate::renderer::postprocess::{
    first_color, screen_pass, FogParameters, RegionCopier, SceneDepth,
};
use crate::renderer::programs::FilterProgram;
use crate::renderer::render_context::RenderContext;
use crate::renderer::texture_units::TextureUnitAllocator;

/// Blends linear distance fog over the scene using its depth buffer.
#[derive(Debug, Clone, Copy)]
pub struct FogFilter {
    params: FogParameters,
}

impl FogFilter {
    pub fn new(params: FogParameters) -> Self {
        Self {
            params: params.validated(),
        }
    }

    pub fn evaluate(
        &self,
        ctx: &mut RenderContext<'_>,
        units: &mut TextureUnitAllocator,
        input: &Framebuffer,
        output: &Framebuffer,
        depth: SceneDepth,
    ) -> RenderResult<()> {
        if input.id != output.id {
            return self.composite(ctx, units, input, output, depth);
        }
        let (_, attachment) = first_color(output)?;
        let description =
            FramebufferDescription::color(output.area(), attachment.format, attachment.filter);
        let temporary = ctx.borrow_framebuffer(&description)?;
        self.composite(ctx, units, input, &temporary, depth)?;
        RegionCopier::default().copy_all(ctx, units, &temporary, output)
    }

    fn composite(
        &self,
        ctx: &mut RenderContext<'_>,
        units: &mut TextureUnitAllocator,
        input: &Framebuffer,
        target: &Framebuffer,
        depth: SceneDepth,
    ) -> RenderResult<()> {
        let (color, _) = first_color(input)?;
        let area = input.area();
        let [r, g, b] = self.params.color;
        let mut uniforms = DrawUniforms::new();
        uniforms.set_model_view(depth.inverse_projection);
        uniforms.set_screen(area.width, area.height);
        uniforms.params = [self.params.near, self.params.far, 0.0, 0.0];
        uniforms.fog_color = [r, g, b, self.params.density];
        screen_pass(
            ctx,
            units,
            "postprocess.fog",
            FilterProgram::Fog,
            &[color, depth.texture],
            target,
            None,
            &uniforms,
        )
    }
}
