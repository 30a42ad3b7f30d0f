// src/renderer/render_context.rs

use glam::{Mat4, Vec3};

use crate::error::{RenderError, RenderResult};
use crate::gpu::{
    Capabilities, ClearValues, DrawCall, DrawUniforms, FramebufferDescription, GpuBackend,
    PassTarget, ProgramId,
};
use crate::renderer::label::LightLabel;
use crate::renderer::matrices::{MatricesInstance, MatricesObserver};
use crate::renderer::programs::{ProgramCache, ProgramKey};
use crate::renderer::renderer_core::{FramePhase, RendererStats};
use crate::renderer::shadows::ShadowMaps;
use crate::renderer::targets::{FramebufferCache, FramebufferReceipt};
use crate::renderer::texture_units::TextureUnitContext;
use crate::scene::{Light, Material, MaterialMaps};

/// Context handed to every pass of a frame.
///
/// This bundles the backend with the caches a pass may touch and records
/// draw counts per pass. The texture-unit allocator is passed alongside
/// rather than inside, because unit scopes stay open across draws.
pub struct RenderContext<'a> {
    pub backend: &'a mut (dyn GpuBackend + 'static),
    pub programs: &'a mut ProgramCache,
    pub framebuffers: &'a mut FramebufferCache,
    pub stats: &'a mut RendererStats,
}

impl<'a> RenderContext<'a> {
    pub fn new(
        backend: &'a mut (dyn GpuBackend + 'static),
        programs: &'a mut ProgramCache,
        framebuffers: &'a mut FramebufferCache,
        stats: &'a mut RendererStats,
    ) -> Self {
        Self {
            backend,
            programs,
            framebuffers,
            stats,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    /// Bound program for `key`, compiled on first use.
    pub fn program(&mut self, key: impl Into<ProgramKey>) -> RenderResult<ProgramId> {
        let key = key.into();
        self.programs.get(&mut *self.backend, &key).copied()
    }

    pub fn borrow_framebuffer(
        &mut self,
        description: &FramebufferDescription,
    ) -> RenderResult<FramebufferReceipt> {
        self.framebuffers.borrow(&mut *self.backend, description)
    }

    /// Records entry into `phase`. Phases only move forward within a frame.
    pub fn enter(&mut self, phase: FramePhase) -> RenderResult<()> {
        if let Some(last) = self.stats.phases.last() {
            if *last > phase {
                return Err(RenderError::load(
                    format!("frame phase {:?}", phase),
                    format!("entered after {:?}", last),
                ));
            }
            if *last == phase {
                return Ok(());
            }
        }
        log::debug!("Entering {:?}", phase);
        self.stats.phases.push(phase);
        Ok(())
    }

    /// Runs `body` inside a pass on `target`, ending the pass even when the
    /// body fails.
    pub fn pass<F>(
        &mut self,
        label: &str,
        target: &PassTarget,
        clear: ClearValues,
        body: F,
    ) -> RenderResult<()>
    where
        F: FnOnce(&mut Self) -> RenderResult<()>,
    {
        self.backend.begin_pass(label, target, clear)?;
        self.stats.begin_pass(label);
        let result = body(self);
        let ended = self.backend.end_pass();
        result.and(ended)
    }

    pub fn draw(&mut self, call: &DrawCall<'_>) -> RenderResult<()> {
        self.backend.draw(call)?;
        self.stats.record_draw();
        Ok(())
    }
}

/// Binds the material maps selected by `maps`, in program slot order.
pub fn bind_material(
    units: &mut TextureUnitContext<'_>,
    material: &Material,
    maps: MaterialMaps,
) -> RenderResult<()> {
    for (map, texture) in [
        (MaterialMaps::ALBEDO, material.albedo_texture),
        (MaterialMaps::NORMAL, material.normal_texture),
        (MaterialMaps::SPECULAR, material.specular_texture),
        (MaterialMaps::EMISSION, material.emission_texture),
    ] {
        if maps.contains(map) {
            let texture = texture.ok_or_else(|| missing_map(map))?;
            units.bind_texture_2d(texture)?;
        }
    }
    if maps.contains(MaterialMaps::ENVIRONMENT) {
        let texture = material
            .environment_texture
            .ok_or_else(|| missing_map(MaterialMaps::ENVIRONMENT))?;
        units.bind_texture_cube(texture)?;
    }
    Ok(())
}

fn missing_map(map: MaterialMaps) -> RenderError {
    RenderError::load(
        format!("material map {:?}", map),
        "label selects a map the material does not have",
    )
}

/// Binds the textures sampled for the light at `index`. Light textures are
/// bound before surface maps.
pub fn bind_light(
    units: &mut TextureUnitContext<'_>,
    shadow_maps: &ShadowMaps,
    index: usize,
    label: LightLabel,
) -> RenderResult<()> {
    if label.shadow().is_some() {
        units.bind_texture_2d(shadow_maps.texture(index)?)?;
    }
    Ok(())
}

/// Eye space to the clip space of the light at `index`; identity for lights
/// without a frustum.
pub fn eye_to_light_clip(observer: &MatricesObserver<'_>, index: usize, light: &Light) -> Mat4 {
    match light.as_projective() {
        Some(projective) => observer.projective_light(index, projective).eye_to_light_clip(),
        None => Mat4::IDENTITY,
    }
}

/// Uniforms for drawing one instance from the observer's point of view.
pub fn surface_uniforms(scope: &MatricesInstance<'_>, material: &Material) -> DrawUniforms {
    let mut uniforms = DrawUniforms::new();
    uniforms.set_model_view(scope.model_view());
    uniforms.set_projection(scope.projection());
    uniforms.set_view_inverse(scope.view_inverse());
    uniforms.set_normal(scope.normal());
    uniforms.set_uv(scope.uv());
    uniforms.base_color = material.base_color;
    uniforms.material = material.parameters();
    uniforms
}

/// Fills the light fields; only the first light of a surface adds emission
/// and reflections.
pub fn apply_light(uniforms: &mut DrawUniforms, light: &Light, view: Mat4, first: bool) {
    let (position, direction) = light.eye_space(view);
    uniforms.set_light(light.color(), light.intensity(), position, direction);
    if let Some(config) = light.shadow() {
        let [bias, minimum_variance, bleed] = config.parameters();
        uniforms.shadow = [bias, minimum_variance, bleed, 0.0];
    }
    if first {
        uniforms.params[0] = 1.0;
    } else {
        uniforms.material[2] = 0.0;
        uniforms.params[0] = 0.0;
    }
}

/// Light colour scaled to nothing, for drawing lit surfaces when a scene
/// has no lights.
pub fn dark_light() -> Light {
    Light::from(crate::scene::DirectionalLight::new(
        Vec3::NEG_Z,
        Vec3::ZERO,
        0.0,
    ))
}
