//! Drawable entity interface consumed from the scene-model collaborator
//!
//! The scene model (figures, axes, series data, styling) lives outside this
//! crate; rendering only needs dirty tracking, visibility, and typed data
//! access.

use slotmap::new_key_type;

use crate::render::api::PrimitiveKind;

new_key_type! {
    /// Generation-checked id for a registered drawable entity. A stale id
    /// fails cache lookups visibly instead of silently aliasing a reused
    /// slot.
    pub struct EntityId;
}

new_key_type! {
    /// Generation-checked id for a window surface.
    pub struct SurfaceId;
}

/// A drawable scene entity, as seen by the rendering core.
///
/// Position data is `[x, y]` pairs in data space; the projection supplied
/// per draw maps data space to clip space.
pub trait Drawable {
    /// The primitive kind assigned at creation. Must not change over the
    /// entity's lifetime.
    fn kind(&self) -> PrimitiveKind;

    /// CPU-side data has changed since the last upload.
    fn is_dirty(&self) -> bool;

    /// Called by the cache after a successful upload.
    fn clear_dirty(&mut self);

    /// Invisible entities are skipped before any GPU work.
    fn visible(&self) -> bool {
        true
    }

    /// Vertex positions in data space.
    fn positions(&self) -> &[[f32; 2]];

    /// Optional index data (line series with gaps, filled regions).
    fn indices(&self) -> Option<&[u32]> {
        None
    }

    /// Number of drawable elements. A zero-element entity is a no-op for
    /// upload and draw, not an error.
    fn element_count(&self) -> usize {
        self.positions().len()
    }

    /// Theme palette slot used to color this entity.
    fn palette_index(&self) -> usize {
        0
    }

    /// Point size in pixels, used by scatter pipelines.
    fn point_size(&self) -> f32 {
        4.0
    }
}
