//! Error taxonomy for the frame pipeline.
//!
//! Backend failures are wrapped into one of these variants at the point where
//! they cross into the kernel. A frame-level error aborts the rest of that
//! frame; the caller decides whether to try again on the next one.

use thiserror::Error;

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Error, Debug)]
pub enum RenderError {
    /// A feature the current configuration needs is absent on the backend.
    #[error("capability unsupported: {feature} ({reason})")]
    CapabilityUnsupported { feature: &'static str, reason: String },

    /// A program, framebuffer or texture could not be constructed.
    #[error("failed to load {resource}: {reason}")]
    ResourceLoad { resource: String, reason: String },

    /// A single cache entry is larger than the whole cache, or nothing is
    /// evictable to make room for it.
    #[error("cache capacity exceeded: entry of {requested} bytes, capacity {capacity} bytes")]
    Capacity { requested: u64, capacity: u64 },

    #[error("insufficient texture units: unit {requested} requested, {available} available")]
    InsufficientUnits { requested: u32, available: u32 },

    /// The borrow/lend discipline was violated.
    #[error("borrow/lend discipline violated: {outstanding} receipt(s) outstanding")]
    ReceiptLeak { outstanding: usize },

    #[error("invalid settings: {0}")]
    Settings(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    pub fn unsupported(feature: &'static str, reason: impl Into<String>) -> Self {
        Self::CapabilityUnsupported {
            feature,
            reason: reason.into(),
        }
    }

    pub fn load(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceLoad {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error indicates a misconfiguration that will fail again on
    /// every subsequent frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CapabilityUnsupported { .. }
                | Self::Capacity { .. }
                | Self::InsufficientUnits { .. }
                | Self::ReceiptLeak { .. }
                | Self::Settings(_)
        )
    }
}
