//! Shadow pass: every shadow map is cleared before any of them is rendered,
//! and variance maps are blurred before lighting samples them.

use std::collections::BTreeMap;

use log::debug;

use crate::error::{RenderError, RenderResult};
use crate::gpu::{Capabilities, ClearValues, DrawCall, DrawState, Geometry, TextureId};
use crate::renderer::batch::FrameBatches;
use crate::renderer::label::{DepthLabel, LabelDecider, ShadingLabel, ShadowKind};
use crate::renderer::matrices::MatricesObserver;
use crate::renderer::postprocess::BoxBlur;
use crate::renderer::render_context::{surface_uniforms, RenderContext};
use crate::renderer::renderer_core::FramePhase;
use crate::renderer::targets::{ShadowMap, ShadowMapCache, ShadowMapDescription};
use crate::renderer::texture_units::TextureUnitAllocator;
use crate::scene::{Light, Scene, ShadowConfig};

/// Shadow maps rendered this frame, keyed by index into `Scene::lights`.
#[derive(Debug, Clone, Default)]
pub struct ShadowMaps {
    maps: BTreeMap<usize, ShadowMap>,
}

impl ShadowMaps {
    pub fn get(&self, light: usize) -> Option<&ShadowMap> {
        self.maps.get(&light)
    }

    /// Texture lighting programs sample for `light`.
    pub fn texture(&self, light: usize) -> RenderResult<TextureId> {
        self.maps
            .get(&light)
            .ok_or_else(|| {
                RenderError::load(
                    format!("shadow map for light {}", light),
                    "no shadow map was rendered for this light",
                )
            })?
            .texture()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

pub fn shadow_map_description(
    light: &Light,
    labels: &dyn LabelDecider,
    capabilities: &Capabilities,
) -> Option<ShadowMapDescription> {
    let projective = light.as_projective()?;
    let config = projective.shadow.as_ref()?;
    let kind = labels.light(light, capabilities).shadow()?;
    Some(ShadowMapDescription {
        light: projective.id,
        size_exponent: config.size_exponent(),
        kind,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn render_shadows(
    ctx: &mut RenderContext<'_>,
    units: &mut TextureUnitAllocator,
    cache: &mut ShadowMapCache,
    labels: &dyn LabelDecider,
    observer: &MatricesObserver<'_>,
    scene: &Scene,
    batches: &FrameBatches,
) -> RenderResult<ShadowMaps> {
    let capabilities = ctx.capabilities();
    let mut maps = ShadowMaps::default();

    ctx.enter(FramePhase::ShadowInitialize)?;
    for shadow in &batches.shadows {
        let light = &scene.lights[shadow.light];
        let Some(description) = shadow_map_description(light, labels, &capabilities) else {
            continue;
        };
        let map = cache.get(&mut *ctx.backend, &description)?.clone();
        ctx.pass(
            "shadow.initialize",
            &map.framebuffer.target(),
            ClearValues::all([1.0; 4]),
            |_| Ok(()),
        )?;
        maps.maps.insert(shadow.light, map);
    }

    ctx.enter(FramePhase::ShadowRender)?;
    for shadow in &batches.shadows {
        let Some(map) = maps.get(shadow.light) else {
            continue;
        };
        let Some(projective) = scene.lights[shadow.light].as_projective() else {
            continue;
        };
        let light_scope = observer.projective_light(shadow.light, projective);
        let state = match map.description.kind {
            ShadowKind::Basic => DrawState::DEPTH_ONLY,
            ShadowKind::BasicPacked | ShadowKind::Variance => DrawState::OPAQUE,
        };

        ctx.pass(
            "shadow.render",
            &map.framebuffer.target(),
            ClearValues::LOAD,
            |ctx| {
                for (label, indices) in &shadow.batches {
                    let program = ctx.program(ShadingLabel::Shadow(*label))?;
                    for &index in indices {
                        let instance = &scene.instances[index];
                        let scope = observer.instance(index, instance);
                        let mut uniforms = surface_uniforms(&scope, &instance.material);
                        uniforms.set_model_view(light_scope.instance_model_view(&scope));
                        uniforms.set_projection(light_scope.projection());

                        let mut unit_scope = units.root();
                        if label.depth == DepthLabel::Mapped {
                            if let Some(albedo) = instance.material.albedo_texture {
                                unit_scope.bind_texture_2d(albedo)?;
                            }
                        }
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
        )?;
        ctx.stats.shadow_maps_rendered += 1;

        if let Some(ShadowConfig::Variance { blur, .. }) = projective.shadow {
            debug!("Blurring variance shadow map of light {}", projective.id.0);
            BoxBlur::new(blur).evaluate(ctx, units, &map.framebuffer, &map.framebuffer)?;
        }
    }

    Ok(maps)
}
