//! The frame pipeline: batching, per-frame scopes, caches and the passes
//! that turn a [`Scene`](crate::scene::Scene) into an image.

pub mod batch;
pub mod deferred;
pub mod depth;
pub mod forward;
pub mod label;
pub mod matrices;
pub mod postprocess;
pub mod programs;
pub mod render_context;
pub mod renderer_core;
pub mod shadows;
pub mod targets;
pub mod texture_units;
pub mod translucent;

pub use batch::{FrameBatches, LightBatches, SceneBatcher, ShadowBatches};
pub use label::{
    DepthLabel, LabelDecider, LightLabel, LitLabel, ShadingLabel, ShadowKind, ShadowLabel,
    StandardLabels, SurfaceKind, SurfaceLabel,
};
pub use matrices::{Matrices, MatricesInstance, MatricesObserver, MatricesProjectiveLight};
pub use postprocess::{
    BlurParameters, BoxBlur, FogFilter, FogParameters, PostprocessStep, RegionCopier,
};
pub use programs::{
    DirectoryShaderLibrary, FilterProgram, MemoryShaderLibrary, ProgramCache, ProgramKey,
    ShaderLibrary,
};
pub use render_context::RenderContext;
pub use renderer_core::{FramePhase, PassStats, Renderer, RendererStats};
pub use shadows::ShadowMaps;
pub use targets::{
    FramebufferCache, FramebufferReceipt, ShadowMap, ShadowMapCache, ShadowMapDescription,
};
pub use texture_units::{TextureUnitAllocator, TextureUnitContext};
