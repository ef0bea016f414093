//! Rendering core
//!
//! GPU frame lifecycle, per-entity buffer caching, deferred deletion, and
//! multi-window surface management. The scene model, layout, and UI layers
//! are external collaborators consumed through the narrow interfaces in
//! [`api`] and [`entity`].

use thiserror::Error;

pub mod api;
pub mod cache;
pub mod debounce;
pub mod deletion;
pub mod entity;
pub mod frame;
pub mod renderer;
pub mod vulkan;

#[cfg(test)]
pub mod testing;

pub use api::{
    BufferHandle, BufferUsage, Color, FrameStatus, PipelineHandle, PrimitiveKind, RenderBackend,
    SeriesPushConstants, TextureHandle, Theme, Viewport,
};
pub use cache::{DecorCache, DecorKind, EntityCache, UploadOutcome};
pub use debounce::ResizeDebounce;
pub use deletion::{DeletionRing, MAX_FRAMES_IN_FLIGHT};
pub use entity::{Drawable, EntityId, SurfaceId};
pub use frame::{BeginFrame, EndFrame};
pub use renderer::{AxesDecorations, DrawItem, FrameReport, PlotRenderer};

use vulkan::{VulkanError, WindowError};

/// Rendering errors, split along the taxonomy the frame loop depends on:
/// transient swapchain conditions never take this form (they are absorbed
/// into frame status), device loss is terminal, and stale-handle variants
/// mark contract violations that the ownership discipline makes avoidable.
#[derive(Error, Debug)]
pub enum RenderError {
    /// The device reported a fatal error. Sticky; all further frame
    /// operations short-circuit.
    #[error("GPU device lost")]
    DeviceLost,

    /// Lookup with an entity id whose registration was removed.
    #[error("stale entity id")]
    StaleEntity,

    /// Operation against a buffer that has already been destroyed. Never
    /// occurs when destruction is routed through the deletion ring.
    #[error("stale buffer handle {0:?}")]
    StaleBuffer(BufferHandle),

    /// No pipeline was built for this primitive kind.
    #[error("no pipeline for primitive kind {0:?}")]
    MissingPipeline(PrimitiveKind),

    /// Upload would write past the buffer's allocated capacity.
    #[error("upload out of bounds: offset {offset} + {len} bytes exceeds capacity {capacity}")]
    UploadOutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    /// Error from the Vulkan layer.
    #[error(transparent)]
    Vulkan(#[from] VulkanError),

    /// Error from the windowing layer.
    #[error(transparent)]
    Window(#[from] WindowError),
}

/// Result type for rendering operations.
pub type RenderResult<T> = Result<T, RenderError>;
