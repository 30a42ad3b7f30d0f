//! A frame-pipeline kernel for real-time rendering.
//!
//! Scenes are classified into label batches, shadow maps are rendered for
//! shadow-casting lights, opaque content is shaded along the forward or
//! deferred path, translucents are composited on top and an optional chain
//! of screen-space filters finishes the frame. GPU objects live in caches
//! owned by the [`Renderer`](renderer::Renderer); the graphics API sits
//! behind [`GpuBackend`](gpu::GpuBackend).

pub mod cache;
pub mod error;
pub mod gpu;
pub mod renderer;
pub mod scene;
pub mod settings;

pub use error::{RenderError, RenderResult};
pub use renderer::{Renderer, RendererStats};
pub use settings::RenderSettings;

/// Installs `env_logger` with `info` as the default level. Safe to call more
/// than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}
