//! Per-frame transform derivation.
//!
//! [`Matrices::observer`] opens a scope for one camera. Inside it, instance
//! and projective-light scopes compute their matrices on first request and
//! reuse them for the rest of the observer scope, so the depth, shadow and
//! color passes share one model-view per instance. Ending the observer scope
//! forgets everything.

use std::cell::{Cell, OnceCell};

use glam::{Mat3, Mat4};

use crate::scene::{Instance, ProjectiveLight};

#[derive(Debug, Default)]
struct InstanceSlot {
    model: OnceCell<Mat4>,
    model_view: OnceCell<Mat4>,
    normal: OnceCell<Mat3>,
}

#[derive(Debug, Default)]
struct LightSlot {
    view: OnceCell<Mat4>,
    projection: OnceCell<Mat4>,
    eye_to_light_clip: OnceCell<Mat4>,
}

/// Owner of the memo slots, reused frame after frame.
#[derive(Debug, Default)]
pub struct Matrices {
    instances: Vec<InstanceSlot>,
    lights: Vec<LightSlot>,
    computations: Cell<u64>,
}

impl Matrices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Matrix products and inversions performed since construction.
    pub fn computations(&self) -> u64 {
        self.computations.get()
    }

    pub fn observer(
        &mut self,
        view: Mat4,
        projection: Mat4,
        instance_count: usize,
        light_count: usize,
    ) -> MatricesObserver<'_> {
        self.instances.resize_with(instance_count, InstanceSlot::default);
        self.lights.resize_with(light_count, LightSlot::default);
        MatricesObserver {
            view,
            projection,
            view_inverse: OnceCell::new(),
            matrices: self,
        }
    }
}

fn memo<T: Copy>(cell: &OnceCell<T>, counter: &Cell<u64>, compute: impl FnOnce() -> T) -> T {
    *cell.get_or_init(|| {
        counter.set(counter.get() + 1);
        compute()
    })
}

/// Camera scope. Dropping it invalidates every matrix derived inside it.
#[derive(Debug)]
pub struct MatricesObserver<'m> {
    view: Mat4,
    projection: Mat4,
    view_inverse: OnceCell<Mat4>,
    matrices: &'m mut Matrices,
}

impl<'m> MatricesObserver<'m> {
    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view_inverse(&self) -> Mat4 {
        memo(&self.view_inverse, &self.matrices.computations, || {
            self.view.inverse()
        })
    }

    /// Scope for the instance at `index` in the scene's instance list.
    /// Indices past the count given to [`Matrices::observer`] get a private,
    /// unshared scope.
    pub fn instance<'o>(&'o self, index: usize, instance: &'o Instance) -> MatricesInstance<'o> {
        let slot = match self.matrices.instances.get(index) {
            Some(slot) => SlotRef::Shared(slot),
            None => SlotRef::Owned(Box::default()),
        };
        MatricesInstance {
            observer: self,
            instance,
            slot,
        }
    }

    /// Scope for the projective light at `index` in the scene's light list.
    pub fn projective_light<'o>(
        &'o self,
        index: usize,
        light: &'o ProjectiveLight,
    ) -> MatricesProjectiveLight<'o> {
        let slot = match self.matrices.lights.get(index) {
            Some(slot) => SlotRef::Shared(slot),
            None => SlotRef::Owned(Box::default()),
        };
        MatricesProjectiveLight {
            observer: self,
            light,
            slot,
        }
    }

    fn counter(&self) -> &Cell<u64> {
        &self.matrices.computations
    }
}

impl Drop for MatricesObserver<'_> {
    fn drop(&mut self) {
        for slot in &mut self.matrices.instances {
            *slot = InstanceSlot::default();
        }
        for slot in &mut self.matrices.lights {
            *slot = LightSlot::default();
        }
    }
}

#[derive(Debug)]
enum SlotRef<'o, T> {
    Shared(&'o T),
    Owned(Box<T>),
}

impl<T> SlotRef<'_, T> {
    fn get(&self) -> &T {
        match self {
            Self::Shared(slot) => slot,
            Self::Owned(slot) => slot,
        }
    }
}

#[derive(Debug)]
pub struct MatricesInstance<'o> {
    observer: &'o MatricesObserver<'o>,
    instance: &'o Instance,
    slot: SlotRef<'o, InstanceSlot>,
}

impl MatricesInstance<'_> {
    pub fn model(&self) -> Mat4 {
        memo(&self.slot.get().model, self.observer.counter(), || {
            self.instance.transform.matrix()
        })
    }

    pub fn model_view(&self) -> Mat4 {
        let model = self.model();
        memo(&self.slot.get().model_view, self.observer.counter(), || {
            self.observer.view * model
        })
    }

    /// Inverse transpose of the model-view rotation and scale.
    pub fn normal(&self) -> Mat3 {
        let model_view = self.model_view();
        memo(&self.slot.get().normal, self.observer.counter(), || {
            Mat3::from_mat4(model_view).inverse().transpose()
        })
    }

    pub fn uv(&self) -> Mat3 {
        self.instance.uv
    }

    pub fn projection(&self) -> Mat4 {
        self.observer.projection
    }

    pub fn view_inverse(&self) -> Mat4 {
        self.observer.view_inverse()
    }
}

#[derive(Debug)]
pub struct MatricesProjectiveLight<'o> {
    observer: &'o MatricesObserver<'o>,
    light: &'o ProjectiveLight,
    slot: SlotRef<'o, LightSlot>,
}

impl MatricesProjectiveLight<'_> {
    pub fn view(&self) -> Mat4 {
        memo(&self.slot.get().view, self.observer.counter(), || {
            self.light.view()
        })
    }

    pub fn projection(&self) -> Mat4 {
        memo(&self.slot.get().projection, self.observer.counter(), || {
            self.light.projection()
        })
    }

    /// Takes eye-space positions of the observer into the light's clip space.
    pub fn eye_to_light_clip(&self) -> Mat4 {
        let view = self.view();
        let projection = self.projection();
        let view_inverse = self.observer.view_inverse();
        memo(
            &self.slot.get().eye_to_light_clip,
            self.observer.counter(),
            || projection * view * view_inverse,
        )
    }

    /// Model-view of `instance` as seen from the light.
    pub fn instance_model_view(&self, instance: &MatricesInstance<'_>) -> Mat4 {
        self.view() * instance.model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::MeshId;
    use crate::scene::{LightId, Material, Transform};
    use glam::{Vec3, Vec4};

    fn instance_at(x: f32) -> Instance {
        Instance::new(MeshId::new(0), Material::white())
            .with_transform(Transform::from_translation(Vec3::new(x, 0.0, 0.0)))
    }

    #[test]
    fn model_view_is_computed_once_per_observer() {
        let mut matrices = Matrices::new();
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let instance = instance_at(2.0);
        {
            let observer = matrices.observer(view, Mat4::IDENTITY, 1, 0);
            let first = observer.instance(0, &instance).model_view();
            let after_first = observer.matrices.computations.get();
            let second = observer.instance(0, &instance).model_view();
            assert_eq!(first, second);
            assert_eq!(observer.matrices.computations.get(), after_first);
        }
        // model + model_view
        assert_eq!(matrices.computations(), 2);
    }

    #[test]
    fn ending_the_observer_invalidates_instances() {
        let mut matrices = Matrices::new();
        let instance = instance_at(1.0);
        let first_view = Mat4::IDENTITY;
        let second_view = Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0));
        let a = {
            let observer = matrices.observer(first_view, Mat4::IDENTITY, 1, 0);
            let a = observer.instance(0, &instance).model_view();
            a
        };
        let b = {
            let observer = matrices.observer(second_view, Mat4::IDENTITY, 1, 0);
            let b = observer.instance(0, &instance).model_view();
            b
        };
        assert_ne!(a, b);
        assert!(b.abs_diff_eq(second_view * instance.transform.matrix(), 1e-6));
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let mut matrices = Matrices::new();
        let instance = Instance::new(MeshId::new(0), Material::white()).with_transform(
            Transform::from_trs(Vec3::ZERO, glam::Quat::IDENTITY, Vec3::new(2.0, 1.0, 1.0)),
        );
        let observer = matrices.observer(Mat4::IDENTITY, Mat4::IDENTITY, 1, 0);
        let normal = observer.instance(0, &instance).normal();
        assert!((normal.x_axis.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_instances_still_compute() {
        let mut matrices = Matrices::new();
        let instance = instance_at(3.0);
        let observer = matrices.observer(Mat4::IDENTITY, Mat4::IDENTITY, 0, 0);
        let scope = observer.instance(7, &instance);
        assert_eq!(scope.model_view(), scope.model_view());
        assert!(scope.model().abs_diff_eq(instance.transform.matrix(), 1e-6));
    }

    #[test]
    fn eye_to_light_clip_matches_world_path() {
        let mut matrices = Matrices::new();
        let view = Mat4::look_at_rh(Vec3::new(3.0, 2.0, 6.0), Vec3::ZERO, Vec3::Y);
        let light = ProjectiveLight::new(LightId(1), Vec3::new(0.0, 5.0, 5.0), Vec3::ZERO);
        let observer = matrices.observer(view, Mat4::IDENTITY, 0, 1);
        let scope = observer.projective_light(0, &light);

        let world = Vec4::new(0.5, 0.0, -0.5, 1.0);
        let via_eye = scope.eye_to_light_clip() * (view * world);
        let direct = light.projection() * light.view() * world;
        assert!(via_eye.abs_diff_eq(direct, 1e-4));

        let computed = observer.matrices.computations.get();
        let _ = scope.eye_to_light_clip();
        assert_eq!(observer.matrices.computations.get(), computed);
    }
}
