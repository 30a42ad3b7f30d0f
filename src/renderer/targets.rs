//! Cache loaders for render targets: pooled scratch framebuffers and
//! per-light shadow maps.

use log::info;

use crate::cache::{BorrowCache, CacheLoader, PeriodicCache, Receipt};
use crate::error::{RenderError, RenderResult};
use crate::gpu::{
    Area, CapabilityFlags, FilterMode, Framebuffer, FramebufferDescription, GpuBackend, TextureFormat,
    TextureId,
};
use crate::renderer::label::ShadowKind;
use crate::scene::LightId;

#[derive(Debug, Default)]
pub struct FramebufferLoader;

impl CacheLoader for FramebufferLoader {
    type Key = FramebufferDescription;
    type Value = Framebuffer;
    type Context = dyn GpuBackend;

    fn load(
        &mut self,
        backend: &mut Self::Context,
        description: &FramebufferDescription,
    ) -> RenderResult<Framebuffer> {
        let capabilities = backend.capabilities();
        let formats = description.color.iter().map(|attachment| attachment.format);
        for format in formats.chain(description.depth_stencil) {
            if !capabilities.can_render_to(format) {
                return Err(RenderError::unsupported(
                    "framebuffer format",
                    format!("{:?} is not renderable on this backend", format),
                ));
            }
        }
        let framebuffer = backend.create_framebuffer(description)?;
        info!(
            "Allocated {}x{} scratch framebuffer with {} color attachments",
            description.area.width,
            description.area.height,
            description.color.len()
        );
        Ok(framebuffer)
    }

    fn close(
        &mut self,
        backend: &mut Self::Context,
        _description: &FramebufferDescription,
        framebuffer: Framebuffer,
    ) -> RenderResult<()> {
        backend.delete_framebuffer(&framebuffer)
    }

    fn size_of(&self, description: &FramebufferDescription, _framebuffer: &Framebuffer) -> u64 {
        description.size_bytes()
    }
}

pub type FramebufferCache = BorrowCache<FramebufferLoader>;
pub type FramebufferReceipt = Receipt<FramebufferDescription, Framebuffer>;

/// Cache key of one light's shadow map. A light that changes its shadow
/// configuration gets a new map; the old one ages out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShadowMapDescription {
    pub light: LightId,
    pub size_exponent: u8,
    pub kind: ShadowKind,
}

impl ShadowMapDescription {
    pub fn size(&self) -> u32 {
        1 << u32::from(self.size_exponent).min(15)
    }

    pub fn framebuffer(&self) -> FramebufferDescription {
        let area = Area::square(self.size());
        let base = FramebufferDescription::new(area);
        match self.kind {
            ShadowKind::Basic => base.with_depth(TextureFormat::Depth32F),
            ShadowKind::BasicPacked => base
                .with_color(TextureFormat::Rgba8, FilterMode::Nearest)
                .with_depth(TextureFormat::Depth32F),
            ShadowKind::Variance => base
                .with_color(TextureFormat::Rg32F, FilterMode::Linear)
                .with_depth(TextureFormat::Depth32F),
        }
    }

    fn required_capability(&self) -> (CapabilityFlags, &'static str) {
        match self.kind {
            ShadowKind::Basic => (CapabilityFlags::DEPTH_TEXTURES, "basic shadow maps"),
            ShadowKind::BasicPacked => (CapabilityFlags::empty(), "packed shadow maps"),
            ShadowKind::Variance => (CapabilityFlags::FLOAT_COLOR_TARGETS, "variance shadow maps"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowMap {
    pub description: ShadowMapDescription,
    pub framebuffer: Framebuffer,
}

impl ShadowMap {
    /// Texture sampled by lighting programs.
    pub fn texture(&self) -> RenderResult<TextureId> {
        let texture = match self.description.kind {
            ShadowKind::Basic => self.framebuffer.depth_stencil,
            ShadowKind::BasicPacked | ShadowKind::Variance => self.framebuffer.color_texture(0),
        };
        texture.ok_or_else(|| {
            RenderError::load(
                format!("shadow map for light {}", self.description.light.0),
                "framebuffer is missing its sampled attachment",
            )
        })
    }
}

#[derive(Debug, Default)]
pub struct ShadowMapLoader;

impl CacheLoader for ShadowMapLoader {
    type Key = ShadowMapDescription;
    type Value = ShadowMap;
    type Context = dyn GpuBackend;

    fn load(
        &mut self,
        backend: &mut Self::Context,
        description: &ShadowMapDescription,
    ) -> RenderResult<ShadowMap> {
        let (flag, feature) = description.required_capability();
        backend.capabilities().require(
            flag,
            feature,
            "the backend cannot render to the required shadow map format",
        )?;
        let framebuffer = backend.create_framebuffer(&description.framebuffer())?;
        info!(
            "Allocated {}x{} {} shadow map for light {}",
            description.size(),
            description.size(),
            description.kind,
            description.light.0
        );
        Ok(ShadowMap {
            description: *description,
            framebuffer,
        })
    }

    fn close(
        &mut self,
        backend: &mut Self::Context,
        _description: &ShadowMapDescription,
        map: ShadowMap,
    ) -> RenderResult<()> {
        backend.delete_framebuffer(&map.framebuffer)
    }

    fn size_of(&self, description: &ShadowMapDescription, _map: &ShadowMap) -> u64 {
        description.framebuffer().size_bytes()
    }
}

pub type ShadowMapCache = PeriodicCache<ShadowMapLoader>;
