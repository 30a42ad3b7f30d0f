use log::debug;

use crate::error::RenderResult;
use crate::gpu::{
    BlitRegion, CapabilityFlags, DrawUniforms, FilterMode, Framebuffer, FramebufferDescription,
    Region,
};
use crate::renderer::postprocess::{first_color, screen_pass};
use crate::renderer::programs::FilterProgram;
use crate::renderer::render_context::RenderContext;
use crate::renderer::texture_units::TextureUnitAllocator;

/// Copies a region of one framebuffer's first color attachment into a region
/// of another, resizing as needed.
///
/// Uses the backend's blit when it can do the copy, otherwise draws the copy
/// program restricted to the target region.
#[derive(Debug, Clone, Copy)]
pub struct RegionCopier {
    pub filter: FilterMode,
}

impl Default for RegionCopier {
    fn default() -> Self {
        Self {
            filter: FilterMode::Linear,
        }
    }
}

impl RegionCopier {
    pub fn new(filter: FilterMode) -> Self {
        Self { filter }
    }

    /// Copies all of `source` over all of `target`.
    pub fn copy_all(
        &self,
        ctx: &mut RenderContext<'_>,
        units: &mut TextureUnitAllocator,
        source: &Framebuffer,
        target: &Framebuffer,
    ) -> RenderResult<()> {
        self.copy(
            ctx,
            units,
            source,
            source.area().region(),
            target,
            target.area().region(),
        )
    }

    pub fn copy(
        &self,
        ctx: &mut RenderContext<'_>,
        units: &mut TextureUnitAllocator,
        source: &Framebuffer,
        source_region: Region,
        target: &Framebuffer,
        target_region: Region,
    ) -> RenderResult<()> {
        if source.id != target.id {
            return self.copy_distinct(ctx, units, source, source_region, target, target_region);
        }
        if source_region == target_region {
            return Ok(());
        }
        // A texture cannot be read and written by the same copy.
        let (_, attachment) = first_color(source)?;
        let description =
            FramebufferDescription::color(source_region.area(), attachment.format, self.filter);
        let temporary = ctx.borrow_framebuffer(&description)?;
        let whole = temporary.area().region();
        self.copy_distinct(ctx, units, source, source_region, &temporary, whole)?;
        self.copy_distinct(ctx, units, &temporary, whole, target, target_region)
    }

    fn copy_distinct(
        &self,
        ctx: &mut RenderContext<'_>,
        units: &mut TextureUnitAllocator,
        source: &Framebuffer,
        source_region: Region,
        target: &Framebuffer,
        target_region: Region,
    ) -> RenderResult<()> {
        let capabilities = ctx.capabilities();
        let same_size = source_region.area() == target_region.area();
        let can_blit = (same_size && capabilities.supports(CapabilityFlags::REGION_BLIT))
            || capabilities.supports(CapabilityFlags::SCALED_BLIT);
        let (_, source_attachment) = first_color(source)?;
        let (_, target_attachment) = first_color(target)?;

        if can_blit && source_attachment.format == target_attachment.format {
            debug!(
                "Blitting {:?} of framebuffer {} into {:?} of framebuffer {}",
                source_region,
                source.id.raw(),
                target_region,
                target.id.raw()
            );
            ctx.backend.blit(&BlitRegion {
                source: source.id,
                source_region,
                target: target.id,
                target_region,
                attachment: 0,
                filter: self.filter,
            })?;
            ctx.stats.blits += 1;
            return Ok(());
        }

        let (texture, _) = first_color(source)?;
        let area = source.area();
        let mut uniforms = DrawUniforms::new();
        uniforms.set_screen(area.width, area.height);
        let (w, h) = (area.width.max(1) as f32, area.height.max(1) as f32);
        uniforms.params = [
            source_region.x as f32 / w,
            source_region.y as f32 / h,
            source_region.width as f32 / w,
            source_region.height as f32 / h,
        ];
        screen_pass(
            ctx,
            units,
            "postprocess.copy",
            FilterProgram::Copy,
            &[texture],
            target,
            Some(target_region),
            &uniforms,
        )
    }
}
