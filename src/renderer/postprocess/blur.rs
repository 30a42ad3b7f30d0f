use crate::error::RenderResult;
use crate::gpu::{DrawUniforms, FilterMode, Framebuffer, FramebufferDescription};
use crate::renderer::postprocess::{first_color, screen_pass, BlurParameters, RegionCopier};
use crate::renderer::programs::FilterProgram;
use crate::renderer::render_context::RenderContext;
use crate::renderer::targets::FramebufferReceipt;
use crate::renderer::texture_units::TextureUnitAllocator;

/// Separable box blur, optionally at reduced resolution.
///
/// Each pass blurs horizontally into a scratch buffer and vertically out of
/// it. The last vertical pass writes `output`, so `input` and `output` may
/// be the same framebuffer.
#[derive(Debug, Clone, Copy)]
pub struct BoxBlur {
    params: BlurParameters,
}

impl BoxBlur {
    pub fn new(params: BlurParameters) -> Self {
        Self {
            params: params.validated(),
        }
    }

    pub fn parameters(&self) -> BlurParameters {
        self.params
    }

    pub fn evaluate(
        &self,
        ctx: &mut RenderContext<'_>,
        units: &mut TextureUnitAllocator,
        input: &Framebuffer,
        output: &Framebuffer,
    ) -> RenderResult<()> {
        let params = self.params;
        if params.radius == 0 || params.passes == 0 {
            return RegionCopier::default().copy_all(ctx, units, input, output);
        }

        let (_, attachment) = first_color(input)?;
        let description = FramebufferDescription::color(
            input.area().scaled(params.scale),
            attachment.format,
            FilterMode::Linear,
        );
        let horizontal = ctx.borrow_framebuffer(&description)?;
        let mut intermediate: Option<FramebufferReceipt> = None;
        let mut source = input.clone();

        for pass in 0..params.passes {
            self.run(ctx, units, FilterProgram::BlurHorizontal, &source, &horizontal)?;
            if pass + 1 == params.passes {
                self.run(ctx, units, FilterProgram::BlurVertical, &horizontal, output)?;
            } else {
                let target = match intermediate.take() {
                    Some(receipt) => receipt,
                    None => ctx.borrow_framebuffer(&description)?,
                };
                self.run(ctx, units, FilterProgram::BlurVertical, &horizontal, &target)?;
                source = (*target).clone();
                intermediate = Some(target);
            }
        }
        Ok(())
    }

    fn run(
        &self,
        ctx: &mut RenderContext<'_>,
        units: &mut TextureUnitAllocator,
        program: FilterProgram,
        source: &Framebuffer,
        target: &Framebuffer,
    ) -> RenderResult<()> {
        let (texture, _) = first_color(source)?;
        let area = source.area();
        let mut uniforms = DrawUniforms::new();
        uniforms.set_screen(area.width, area.height);
        uniforms.params = [self.params.radius as f32, 0.0, 0.0, 0.0];
        let label = match program {
            FilterProgram::BlurHorizontal => "postprocess.blur.horizontal",
            _ => "postprocess.blur.vertical",
        };
        screen_pass(ctx, units, label, program, &[texture], target, None, &uniforms)
    }
}
