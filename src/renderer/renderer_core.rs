// renderer/renderer_core.rs

use log::{debug, info, warn};

use crate::cache::CacheStats;
use crate::error::{RenderError, RenderResult};
use crate::gpu::{
    Framebuffer, FramebufferDescription, GpuBackend, PassTarget, TextureFormat, TextureId,
};
use crate::renderer::batch::{FrameBatches, SceneBatcher};
use crate::renderer::deferred;
use crate::renderer::depth::render_depth_prepass;
use crate::renderer::forward::render_forward;
use crate::renderer::label::LabelDecider;
use crate::renderer::matrices::{Matrices, MatricesObserver};
use crate::renderer::postprocess::{run_chain, SceneDepth};
use crate::renderer::programs::{MemoryShaderLibrary, ProgramCache, ProgramLoader, ShaderLibrary};
use crate::renderer::render_context::RenderContext;
use crate::renderer::shadows::{render_shadows, ShadowMaps};
use crate::renderer::targets::{
    FramebufferCache, FramebufferLoader, FramebufferReceipt, ShadowMapCache, ShadowMapLoader,
};
use crate::renderer::texture_units::TextureUnitAllocator;
use crate::renderer::translucent::render_translucent;
use crate::scene::Scene;
use crate::settings::{RenderPath, RenderSettings};

/// Stages of a frame, in the only order they may be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FramePhase {
    ShadowInitialize,
    ShadowRender,
    DepthOrGeometry,
    LightOrColor,
    Translucent,
    Postprocess,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassStats {
    pub label: String,
    pub draws: usize,
}

/// What one call to [`Renderer::render_frame`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RendererStats {
    pub frame: u64,
    /// Phases in the order they were entered.
    pub phases: Vec<FramePhase>,
    pub passes: Vec<PassStats>,
    pub draw_calls: usize,
    pub blits: usize,
    pub batches: usize,
    pub translucents: usize,
    pub shadow_maps_rendered: usize,
    pub shadow_maps_evicted: usize,
    pub texture_units_high_water: u32,
    pub programs: CacheStats,
    pub framebuffers: CacheStats,
    pub shadow_maps: CacheStats,
}

impl RendererStats {
    pub fn new(frame: u64) -> Self {
        Self {
            frame,
            ..Self::default()
        }
    }

    pub fn begin_pass(&mut self, label: &str) {
        self.passes.push(PassStats {
            label: label.to_string(),
            draws: 0,
        });
    }

    pub fn record_draw(&mut self) {
        self.draw_calls += 1;
        if let Some(pass) = self.passes.last_mut() {
            pass.draws += 1;
        }
    }

    /// Draws recorded across every pass with `label`.
    pub fn draws_in(&self, label: &str) -> usize {
        self.passes
            .iter()
            .filter(|pass| pass.label == label)
            .map(|pass| pass.draws)
            .sum()
    }
}

/// Owns the caches and per-frame scratch state, and renders scenes into
/// caller-supplied framebuffers.
pub struct Renderer<B: GpuBackend + 'static> {
    backend: B,
    settings: RenderSettings,
    programs: ProgramCache,
    framebuffers: FramebufferCache,
    shadow_maps: ShadowMapCache,
    units: TextureUnitAllocator,
    matrices: Matrices,
    batcher: SceneBatcher,
    frame: u64,
}

impl<B: GpuBackend + 'static> Renderer<B> {
    pub fn new(backend: B, settings: RenderSettings) -> Self {
        Self::with_shader_library(backend, settings, Box::new(MemoryShaderLibrary::builtin()))
    }

    pub fn with_shader_library(
        backend: B,
        settings: RenderSettings,
        library: Box<dyn ShaderLibrary>,
    ) -> Self {
        let settings = settings.validate();
        let capabilities = backend.capabilities();
        info!(
            "Creating {:?} renderer ({} texture units, capabilities {:?})",
            settings.path, capabilities.texture_units, capabilities.flags
        );
        Self {
            programs: ProgramCache::new(ProgramLoader::new(library), settings.program_cache_bytes),
            framebuffers: FramebufferCache::new(
                FramebufferLoader,
                settings.framebuffer_cache_bytes,
            ),
            shadow_maps: ShadowMapCache::new(
                ShadowMapLoader,
                settings.shadow_cache_bytes,
                settings.shadow_retain_periods,
            ),
            units: TextureUnitAllocator::new(
                capabilities.texture_units,
                settings.max_texture_units,
            ),
            matrices: Matrices::new(),
            batcher: SceneBatcher::default(),
            frame: 0,
            backend,
            settings,
        }
    }

    /// Replaces the label decision table used to batch instances.
    pub fn with_labels(mut self, labels: Box<dyn LabelDecider>) -> Self {
        self.batcher = SceneBatcher::new(labels);
        self
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn matrices(&self) -> &Matrices {
        &self.matrices
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Renders `scene` into `output`, whose first color attachment receives
    /// the image. An error aborts the rest of the frame; caches stay
    /// consistent and the next frame may be attempted.
    pub fn render_frame(
        &mut self,
        scene: &Scene,
        output: &Framebuffer,
    ) -> RenderResult<RendererStats> {
        self.frame += 1;
        let mut stats = RendererStats::new(self.frame);
        let capabilities = self.backend.capabilities();
        if self.settings.path == RenderPath::Deferred {
            deferred::check_capabilities(&capabilities)?;
        }
        let color = output.color_texture(0).ok_or_else(|| {
            RenderError::load(
                format!("output framebuffer {}", output.id.raw()),
                "the output has no color attachment",
            )
        })?;

        let batches =
            self.batcher.classify(
                scene,
                &capabilities,
                self.settings.path,
                self.settings.translucent_order,
            );
        stats.batches = batches.batch_count();
        stats.translucents = batches.translucents.len();

        let area = output.area();
        let aspect = area.width.max(1) as f32 / area.height.max(1) as f32;
        let view = scene.camera.view();
        let projection = scene.camera.proj(aspect);

        let Self {
            backend,
            settings,
            programs,
            framebuffers,
            shadow_maps,
            units,
            matrices,
            batcher,
            ..
        } = self;

        stats.shadow_maps_evicted = shadow_maps.period_start(&mut *backend);
        let result = {
            let observer =
                matrices.observer(view, projection, scene.instances.len(), scene.lights.len());
            let mut ctx = RenderContext::new(backend, programs, framebuffers, &mut stats);
            let frame = FrameInputs {
                settings,
                labels: batcher.labels(),
                observer: &observer,
                scene,
                batches: &batches,
                output,
                color,
            };
            frame.run(&mut ctx, units, shadow_maps)
        };
        shadow_maps.period_end();
        if let Err(err) = result.and_then(|()| self.framebuffers.check_returned()) {
            warn!("Frame {} aborted: {}", stats.frame, err);
            self.backend.discard();
            return Err(err);
        }
        self.backend.flush()?;

        stats.texture_units_high_water = self.units.high_water();
        stats.programs = self.programs.stats();
        stats.framebuffers = self.framebuffers.stats();
        stats.shadow_maps = self.shadow_maps.stats();
        debug!(
            "Frame {}: {} passes, {} draws, {} batches",
            stats.frame,
            stats.passes.len(),
            stats.draw_calls,
            stats.batches
        );
        Ok(stats)
    }

    /// Closes every cached GPU resource. Fails if a scratch framebuffer is
    /// still lent out.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        info!("Shutting down renderer after {} frames", self.frame);
        let backend: &mut (dyn GpuBackend + 'static) = &mut self.backend;
        self.programs.clear(backend);
        self.shadow_maps.clear(backend);
        let result = self.framebuffers.clear(backend);
        if let Err(err) = &result {
            warn!("Renderer shutdown incomplete: {}", err);
        }
        result
    }
}

/// Per-frame inputs shared by every stage.
struct FrameInputs<'f> {
    settings: &'f RenderSettings,
    labels: &'f dyn LabelDecider,
    observer: &'f MatricesObserver<'f>,
    scene: &'f Scene,
    batches: &'f FrameBatches,
    output: &'f Framebuffer,
    color: TextureId,
}

impl FrameInputs<'_> {
    fn run(
        &self,
        ctx: &mut RenderContext<'_>,
        units: &mut TextureUnitAllocator,
        shadow_cache: &mut ShadowMapCache,
    ) -> RenderResult<()> {
        let shadow_maps = render_shadows(
            ctx,
            units,
            shadow_cache,
            self.labels,
            self.observer,
            self.scene,
            self.batches,
        )?;

        // Scratch targets stay borrowed until post-processing is done.
        let (depth_receipt, target) = match self.settings.path {
            RenderPath::Forward => self.forward(ctx, units, &shadow_maps)?,
            RenderPath::Deferred => self.deferred(ctx, units, &shadow_maps)?,
        };

        ctx.enter(FramePhase::Translucent)?;
        render_translucent(
            ctx,
            units,
            self.labels,
            self.observer,
            self.scene,
            self.batches,
            &shadow_maps,
            &target,
        )?;

        if !self.settings.postprocess.is_empty() {
            ctx.enter(FramePhase::Postprocess)?;
            let depth = target.depth_stencil.map(|texture| SceneDepth {
                texture,
                inverse_projection: self.observer.projection().inverse(),
            });
            run_chain(ctx, units, &self.settings.postprocess, self.output, depth)?;
        }
        drop(depth_receipt);
        Ok(())
    }

    fn forward(
        &self,
        ctx: &mut RenderContext<'_>,
        units: &mut TextureUnitAllocator,
        shadow_maps: &ShadowMaps,
    ) -> RenderResult<(Option<FramebufferReceipt>, PassTarget)> {
        let area = self.output.area();
        let (receipt, depth) = match self.output.depth_stencil {
            Some(depth) => (None, depth),
            None => {
                let description =
                    FramebufferDescription::new(area).with_depth(TextureFormat::Depth32F);
                let receipt = ctx.borrow_framebuffer(&description)?;
                let depth = receipt.depth_stencil.ok_or_else(|| {
                    RenderError::load("scratch depth buffer", "framebuffer has no depth")
                })?;
                (Some(receipt), depth)
            }
        };
        let target = PassTarget {
            area,
            color: vec![self.color],
            depth_stencil: Some(depth),
        };

        ctx.enter(FramePhase::DepthOrGeometry)?;
        render_depth_prepass(
            ctx,
            units,
            self.observer,
            self.scene,
            self.batches,
            &target,
        )?;

        ctx.enter(FramePhase::LightOrColor)?;
        render_forward(
            ctx,
            units,
            self.labels,
            self.observer,
            self.scene,
            self.batches,
            shadow_maps,
            &target,
            self.settings.clear_color,
        )?;
        Ok((receipt, target))
    }

    fn deferred(
        &self,
        ctx: &mut RenderContext<'_>,
        units: &mut TextureUnitAllocator,
        shadow_maps: &ShadowMaps,
    ) -> RenderResult<(Option<FramebufferReceipt>, PassTarget)> {
        let area = self.output.area();
        let gbuffer = ctx.borrow_framebuffer(&deferred::gbuffer_description(area))?;

        ctx.enter(FramePhase::DepthOrGeometry)?;
        deferred::render_geometry(
            ctx,
            units,
            self.observer,
            self.scene,
            self.batches,
            &gbuffer,
        )?;

        ctx.enter(FramePhase::LightOrColor)?;
        deferred::render_lights(
            ctx,
            units,
            self.observer,
            self.scene,
            self.batches,
            shadow_maps,
            &gbuffer,
            self.color,
            self.settings.clear_color,
        )?;

        let target = PassTarget {
            area,
            color: vec![self.color],
            depth_stencil: gbuffer.depth_stencil,
        };
        Ok((Some(gbuffer), target))
    }
}
