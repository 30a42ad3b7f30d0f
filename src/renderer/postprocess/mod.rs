//! Screen-space operators run after the scene is shaded.
//!
//! Every operator reads one framebuffer and writes another and accepts the
//! same framebuffer for both: intermediate results go through scratch
//! framebuffers borrowed from the framebuffer cache, whose receipts are
//! returned on every exit path.

mod blur;
mod copier;
mod fog;

pub use blur::BoxBlur;
pub use copier::RegionCopier;
pub use fog::FogFilter;

use glam::Mat4;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};
use crate::gpu::{
    ClearValues, ColorAttachment, DrawCall, DrawState, DrawUniforms, Framebuffer, Geometry,
    PassTarget, Region, TextureId,
};
use crate::renderer::programs::FilterProgram;
use crate::renderer::render_context::RenderContext;
use crate::renderer::texture_units::TextureUnitAllocator;

const MAX_BLUR_RADIUS: u32 = 16;
const MAX_BLUR_PASSES: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlurParameters {
    /// Half-width of the box in texels of the blurred image.
    #[serde(default = "BlurParameters::default_radius")]
    pub radius: u32,
    /// Resolution of the blurred image relative to its source.
    #[serde(default = "BlurParameters::default_scale")]
    pub scale: f32,
    #[serde(default = "BlurParameters::default_passes")]
    pub passes: u32,
}

impl Default for BlurParameters {
    fn default() -> Self {
        Self {
            radius: Self::default_radius(),
            scale: Self::default_scale(),
            passes: Self::default_passes(),
        }
    }
}

impl BlurParameters {
    pub fn validated(mut self) -> Self {
        if self.radius > MAX_BLUR_RADIUS {
            warn!("Blur radius {} clamped to {}", self.radius, MAX_BLUR_RADIUS);
            self.radius = MAX_BLUR_RADIUS;
        }
        if !self.scale.is_finite() || self.scale <= 0.0 || self.scale > 1.0 {
            warn!("Blur scale must be in (0, 1]. Using default value.");
            self.scale = Self::default_scale();
        }
        if self.passes > MAX_BLUR_PASSES {
            warn!("Blur passes {} clamped to {}", self.passes, MAX_BLUR_PASSES);
            self.passes = MAX_BLUR_PASSES;
        }
        self
    }

    const fn default_radius() -> u32 {
        2
    }

    const fn default_scale() -> f32 {
        1.0
    }

    const fn default_passes() -> u32 {
        1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FogParameters {
    #[serde(default = "FogParameters::default_color")]
    pub color: [f32; 3],
    /// Eye distance where fog starts.
    #[serde(default = "FogParameters::default_near")]
    pub near: f32,
    /// Eye distance of full fog.
    #[serde(default = "FogParameters::default_far")]
    pub far: f32,
    /// Opacity of full fog.
    #[serde(default = "FogParameters::default_density")]
    pub density: f32,
}

impl Default for FogParameters {
    fn default() -> Self {
        Self {
            color: Self::default_color(),
            near: Self::default_near(),
            far: Self::default_far(),
            density: Self::default_density(),
        }
    }
}

impl FogParameters {
    pub fn validated(mut self) -> Self {
        if !self.near.is_finite() || !self.far.is_finite() || self.far <= self.near {
            warn!("Fog range must satisfy near < far. Using default range.");
            self.near = Self::default_near();
            self.far = Self::default_far();
        }
        if !self.density.is_finite() {
            self.density = Self::default_density();
        }
        self.density = self.density.clamp(0.0, 1.0);
        self
    }

    const fn default_color() -> [f32; 3] {
        [0.6, 0.65, 0.7]
    }

    const fn default_near() -> f32 {
        10.0
    }

    const fn default_far() -> f32 {
        60.0
    }

    const fn default_density() -> f32 {
        1.0
    }
}

/// One configured step of the post-processing chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostprocessStep {
    Blur(BlurParameters),
    Fog(FogParameters),
}

impl PostprocessStep {
    pub fn validated(self) -> Self {
        match self {
            Self::Blur(params) => Self::Blur(params.validated()),
            Self::Fog(params) => Self::Fog(params.validated()),
        }
    }
}

/// What the chain needs from the finished scene besides its color.
#[derive(Debug, Clone, Copy)]
pub struct SceneDepth {
    pub texture: TextureId,
    pub inverse_projection: Mat4,
}

/// Applies `steps` in order to `output`, in place.
pub fn run_chain(
    ctx: &mut RenderContext<'_>,
    units: &mut TextureUnitAllocator,
    steps: &[PostprocessStep],
    output: &Framebuffer,
    depth: Option<SceneDepth>,
) -> RenderResult<()> {
    for step in steps {
        match step {
            PostprocessStep::Blur(params) => {
                BoxBlur::new(*params).evaluate(ctx, units, output, output)?;
            }
            PostprocessStep::Fog(params) => {
                let depth = depth.ok_or_else(|| {
                    RenderError::unsupported("fog", "the frame has no depth buffer to read")
                })?;
                FogFilter::new(*params).evaluate(ctx, units, output, output, depth)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn first_color(framebuffer: &Framebuffer) -> RenderResult<(TextureId, ColorAttachment)> {
    match (framebuffer.color_texture(0), framebuffer.description.color.first()) {
        (Some(texture), Some(attachment)) => Ok((texture, *attachment)),
        _ => Err(RenderError::load(
            format!("framebuffer {}", framebuffer.id.raw()),
            "post-processing needs a color attachment",
        )),
    }
}

/// Draws `program` over `viewport` of `target`'s first color attachment,
/// sampling `sources` in order.
pub(crate) fn screen_pass(
    ctx: &mut RenderContext<'_>,
    units: &mut TextureUnitAllocator,
    label: &str,
    program: FilterProgram,
    sources: &[TextureId],
    target: &Framebuffer,
    viewport: Option<Region>,
    uniforms: &DrawUniforms,
) -> RenderResult<()> {
    let program = ctx.program(program)?;
    let (color, _) = first_color(target)?;
    let mut scope = units.root();
    for source in sources {
        scope.bind_texture_2d(*source)?;
    }
    let samplers = scope.bindings();
    let pass_target = PassTarget {
        area: target.area(),
        color: vec![color],
        depth_stencil: None,
    };
    ctx.pass(label, &pass_target, ClearValues::LOAD, |ctx| {
        ctx.draw(&DrawCall {
            program,
            geometry: Geometry::FullscreenTriangle,
            state: DrawState::SCREEN,
            samplers: &samplers,
            uniforms,
            viewport,
        })
    })
}
