//! Groups scene instances into per-label batches once per frame.
//!
//! Batches hold indices into `Scene::instances` and are keyed by `BTreeMap`s,
//! so two classifications of the same scene produce identical batches in
//! identical order.

use std::collections::BTreeMap;

use crate::gpu::Capabilities;
use crate::renderer::label::{
    DepthLabel, LabelDecider, LightLabel, LitLabel, ShadowLabel, StandardLabels, SurfaceLabel,
};
use crate::scene::Scene;
use crate::settings::{RenderPath, TranslucentOrder};

/// Shadow-caster batches of one shadow-casting light.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowBatches {
    /// Index into `Scene::lights`.
    pub light: usize,
    pub batches: BTreeMap<ShadowLabel, Vec<usize>>,
}

/// Lit opaque batches for one light. The batch map stays empty on the
/// deferred path, which lights the g-buffer instead of each instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightBatches {
    pub light: usize,
    pub label: LightLabel,
    pub batches: BTreeMap<LitLabel, Vec<usize>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameBatches {
    /// Every opaque instance, for the depth pre-pass.
    pub depth: BTreeMap<DepthLabel, Vec<usize>>,
    pub shadows: Vec<ShadowBatches>,
    pub lit: Vec<LightBatches>,
    pub unlit: BTreeMap<SurfaceLabel, Vec<usize>>,
    /// Lit opaque instances for the deferred attribute pass, or for the
    /// forward emission-only pass when the scene has no lights.
    pub geometry: BTreeMap<SurfaceLabel, Vec<usize>>,
    /// Translucent instances in drawing order.
    pub translucents: Vec<usize>,
}

impl FrameBatches {
    pub fn shadow_batch_count(&self) -> usize {
        self.shadows.iter().map(|s| s.batches.len()).sum()
    }

    pub fn lit_batch_count(&self) -> usize {
        self.lit.iter().map(|l| l.batches.len()).sum()
    }

    /// Number of distinct batches the frame's passes draw; each costs one
    /// program bind.
    pub fn batch_count(&self) -> usize {
        self.depth.len()
            + self.shadow_batch_count()
            + self.lit_batch_count()
            + self.unlit.len()
            + self.geometry.len()
    }

    /// Indices of every shadow-casting light, in scene order.
    pub fn shadow_lights(&self) -> impl Iterator<Item = usize> + '_ {
        self.shadows.iter().map(|s| s.light)
    }
}

pub struct SceneBatcher {
    labels: Box<dyn LabelDecider>,
}

impl Default for SceneBatcher {
    fn default() -> Self {
        Self::new(Box::new(StandardLabels))
    }
}

impl SceneBatcher {
    pub fn new(labels: Box<dyn LabelDecider>) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &dyn LabelDecider {
        self.labels.as_ref()
    }

    pub fn classify(
        &self,
        scene: &Scene,
        capabilities: &Capabilities,
        path: RenderPath,
        order: TranslucentOrder,
    ) -> FrameBatches {
        let labels = self.labels.as_ref();
        let mut batches = FrameBatches::default();
        let per_light = path == RenderPath::Forward;
        let by_surface = path == RenderPath::Deferred || scene.lights.is_empty();

        let mut shadows: Vec<ShadowBatches> = scene
            .lights
            .iter()
            .enumerate()
            .filter(|(_, light)| light.shadow().is_some())
            .map(|(light, _)| ShadowBatches {
                light,
                batches: BTreeMap::new(),
            })
            .collect();

        let mut lit: Vec<LightBatches> = scene
            .lights
            .iter()
            .enumerate()
            .map(|(index, light)| LightBatches {
                light: index,
                label: labels.light(light, capabilities),
                batches: BTreeMap::new(),
            })
            .collect();

        for (index, instance) in scene.instances.iter().enumerate() {
            let material = &instance.material;
            if material.is_translucent() {
                batches.translucents.push(index);
                continue;
            }

            batches
                .depth
                .entry(labels.depth(material))
                .or_default()
                .push(index);

            if instance.casts_shadows {
                for shadow in &mut shadows {
                    if let Some(config) = scene.lights[shadow.light].shadow() {
                        shadow
                            .batches
                            .entry(labels.shadow(material, config, capabilities))
                            .or_default()
                            .push(index);
                    }
                }
            }

            if material.is_unlit() {
                batches
                    .unlit
                    .entry(labels.surface(material))
                    .or_default()
                    .push(index);
                continue;
            }

            if by_surface {
                batches
                    .geometry
                    .entry(labels.geometry(material))
                    .or_default()
                    .push(index);
            }
            if !per_light {
                continue;
            }
            for light_batches in &mut lit {
                let label = LitLabel {
                    surface: labels.surface(material),
                    light: light_batches.label,
                };
                light_batches.batches.entry(label).or_default().push(index);
            }
        }

        if order == TranslucentOrder::BackToFront {
            let view = scene.camera.view();
            // Right-handed view space looks down -z: farthest has the lowest z.
            batches.translucents.sort_by(|&a, &b| {
                let za = view
                    .transform_point3(scene.instances[a].transform.translation)
                    .z;
                let zb = view
                    .transform_point3(scene.instances[b].transform.translation)
                    .z;
                za.total_cmp(&zb)
            });
        }

        batches.shadows = shadows;
        batches.lit = lit;
        log::debug!(
            "Classified {} instances into {} batches ({} translucent)",
            scene.instances.len(),
            batches.batch_count(),
            batches.translucents.len()
        );
        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{BlendMode, MeshId, TextureId};
    use crate::scene::{
        Camera, DirectionalLight, Instance, LightId, Material, ProjectiveLight, ShadowConfig,
        Transform,
    };
    use glam::Vec3;

    fn basic_shadow() -> ShadowConfig {
        ShadowConfig::Basic {
            size_exponent: 8,
            depth_bias: 0.002,
        }
    }

    fn classify(scene: &Scene) -> FrameBatches {
        SceneBatcher::default().classify(
            scene,
            &Capabilities::default(),
            RenderPath::Forward,
            TranslucentOrder::Submission,
        )
    }

    #[test]
    fn directional_light_with_two_shared_instances() {
        let scene = Scene::default()
            .with_light(DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE, 1.0))
            .with_instance(Instance::new(MeshId::new(1), Material::white()))
            .with_instance(Instance::new(MeshId::new(2), Material::white()));
        let batches = classify(&scene);

        assert_eq!(batches.lit.len(), 1);
        let lit: Vec<_> = batches.lit[0].batches.values().collect();
        assert_eq!(lit, vec![&vec![0, 1]]);
        assert_eq!(batches.shadow_batch_count(), 0);
        assert!(batches.shadows.is_empty());
    }

    #[test]
    fn projective_shadow_caster_gets_one_shadow_batch() {
        let light = ProjectiveLight::new(LightId(7), Vec3::new(0.0, 5.0, 5.0), Vec3::ZERO)
            .with_shadow(basic_shadow());
        let scene = Scene::default()
            .with_light(light)
            .with_instance(Instance::new(MeshId::new(1), Material::white()));
        let batches = classify(&scene);

        assert_eq!(batches.shadows.len(), 1);
        assert_eq!(batches.shadow_batch_count(), 1);
        let members: Vec<_> = batches.shadows[0].batches.values().flatten().collect();
        assert_eq!(members, vec![&0]);
    }

    #[test]
    fn non_casters_and_translucents_skip_shadow_batches() {
        let light = ProjectiveLight::new(LightId(1), Vec3::new(0.0, 5.0, 5.0), Vec3::ZERO)
            .with_shadow(basic_shadow());
        let scene = Scene::default()
            .with_light(light)
            .with_instance(Instance::new(MeshId::new(1), Material::white()).without_shadows())
            .with_instance(Instance::new(
                MeshId::new(2),
                Material::white().translucent(BlendMode::Alpha),
            ));
        let batches = classify(&scene);
        assert_eq!(batches.shadow_batch_count(), 0);
        assert_eq!(batches.translucents, vec![1]);
        assert_eq!(batches.depth.values().flatten().count(), 1);
    }

    #[test]
    fn unlit_instances_bypass_light_batches() {
        let scene = Scene::default()
            .with_light(DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE, 1.0))
            .with_instance(Instance::new(MeshId::new(1), Material::white().unlit()));
        let batches = classify(&scene);
        assert_eq!(batches.lit_batch_count(), 0);
        assert_eq!(batches.unlit.values().flatten().count(), 1);
        assert!(batches.geometry.is_empty());
        assert_eq!(batches.depth.values().flatten().count(), 1);
    }

    #[test]
    fn each_path_builds_only_the_batches_it_draws() {
        let scene = Scene::default()
            .with_light(DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE, 1.0))
            .with_instance(Instance::new(MeshId::new(1), Material::white()));

        let forward = classify(&scene);
        assert!(forward.geometry.is_empty());
        assert_eq!(forward.lit_batch_count(), 1);
        assert_eq!(forward.batch_count(), 2);

        let deferred = SceneBatcher::default().classify(
            &scene,
            &Capabilities::default(),
            RenderPath::Deferred,
            TranslucentOrder::Submission,
        );
        assert_eq!(deferred.lit.len(), 1);
        assert_eq!(deferred.lit[0].label, LightLabel::Directional);
        assert_eq!(deferred.lit_batch_count(), 0);
        assert_eq!(deferred.geometry.values().flatten().count(), 1);
        assert_eq!(deferred.batch_count(), 2);
    }

    #[test]
    fn unlit_scene_draws_lit_surfaces_by_surface_on_the_forward_path() {
        let scene = Scene::default().with_instance(Instance::new(MeshId::new(1), Material::white()));
        let batches = classify(&scene);
        assert!(batches.lit.is_empty());
        assert_eq!(batches.geometry.values().flatten().count(), 1);
    }

    #[test]
    fn different_maps_split_batches() {
        let textured = Material::white().with_albedo_texture(TextureId::new(3));
        let scene = Scene::default()
            .with_light(DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE, 1.0))
            .with_instance(Instance::new(MeshId::new(1), Material::white()))
            .with_instance(Instance::new(MeshId::new(1), textured))
            .with_instance(Instance::new(MeshId::new(1), Material::rgb(1.0, 0.0, 0.0)));
        let batches = classify(&scene);
        let lit = &batches.lit[0].batches;
        assert_eq!(lit.len(), 2);
        assert!(lit.values().any(|members| members == &vec![0, 2]));
        // Depth only cares about alpha handling.
        assert_eq!(batches.depth.len(), 1);
    }

    #[test]
    fn back_to_front_orders_by_view_depth() {
        let camera = Camera::looking_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
        let glass = Material::white().translucent(BlendMode::Alpha);
        let at = |z: f32| {
            Instance::new(MeshId::new(1), glass)
                .with_transform(Transform::from_translation(Vec3::new(0.0, 0.0, z)))
        };
        let scene = Scene::new(camera)
            .with_instance(at(5.0))
            .with_instance(at(-5.0))
            .with_instance(at(0.0));

        let submission = classify(&scene);
        assert_eq!(submission.translucents, vec![0, 1, 2]);

        let sorted = SceneBatcher::default().classify(
            &scene,
            &Capabilities::default(),
            RenderPath::Forward,
            TranslucentOrder::BackToFront,
        );
        assert_eq!(sorted.translucents, vec![1, 2, 0]);
    }
}
