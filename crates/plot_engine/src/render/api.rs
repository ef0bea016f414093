//! Backend abstraction consumed by the renderer, caches, and frame driver
//!
//! Mirrors the narrow interface the rest of the library is written against:
//! opaque resource handles, per-primitive pipelines, and the begin/end frame
//! protocol. The production implementation is `VulkanBackend`; tests use a
//! recording mock.

use bytemuck::{Pod, Zeroable};

use crate::render::RenderResult;

/// Opaque GPU buffer handle. Owned by whichever cache row created it;
/// never aliased across entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

impl BufferHandle {
    /// Raw id, for diagnostics only.
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Opaque texture handle. Textures are created once (e.g. a font atlas)
/// and destroyed only at shutdown, so they bypass the deletion ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Opaque pipeline handle, one per [`PrimitiveKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub(crate) u64);

/// Usage class a buffer is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
    Storage,
}

/// Closed set of drawable primitive kinds. Assigned once when an entity is
/// registered; the cache stores the tag and switches on it instead of
/// probing entity types per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// Connected polyline (a line series).
    Line,
    /// Independent points (a scatter series).
    Scatter,
    /// Line-list decorations: grid lines, axis border, tick marks.
    Grid,
}

impl PrimitiveKind {
    /// All kinds, in pipeline-table order.
    pub const ALL: [PrimitiveKind; 3] =
        [PrimitiveKind::Line, PrimitiveKind::Scatter, PrimitiveKind::Grid];
}

/// Outcome of a begin/end frame call on the backend.
///
/// Transient swapchain failures are reported as `OutOfDate` and absorbed by
/// the frame driver; `DeviceLost` is sticky and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Ready,
    OutOfDate,
    DeviceLost,
}

/// Viewport rectangle in framebuffer pixels, supplied by the layout
/// collaborator. This core consumes rectangles; it never computes layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }
}

/// Linear RGBA color.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::rgba(r, g, b, 1.0)
    }
}

/// Per-draw push-constant block: data-space to clip-space transform plus
/// series styling.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SeriesPushConstants {
    /// Column-major orthographic projection for the series' axis limits.
    pub mvp: [[f32; 4]; 4],
    pub color: [f32; 4],
    pub point_size: f32,
    pub _pad: [f32; 3],
}

/// Explicit theme object passed into every render call, so rendering is a
/// function of (entities, viewport, theme) rather than process-wide state.
#[derive(Debug, Clone)]
pub struct Theme {
    pub background: Color,
    pub grid: Color,
    pub axis_border: Color,
    pub palette: Vec<Color>,
}

impl Theme {
    /// Series color for a palette slot, wrapping past the palette end.
    /// An empty palette falls back to the axis border color rather than
    /// failing the draw.
    pub fn series_color(&self, index: usize) -> Color {
        match self.palette.as_slice() {
            [] => self.axis_border,
            palette => palette[index % palette.len()],
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            background: Color::rgb(0.10, 0.10, 0.12),
            grid: Color::rgba(0.5, 0.5, 0.5, 0.25),
            axis_border: Color::rgb(0.7, 0.7, 0.7),
            palette: vec![
                Color::rgb(0.12, 0.47, 0.71),
                Color::rgb(1.00, 0.50, 0.05),
                Color::rgb(0.17, 0.63, 0.17),
                Color::rgb(0.84, 0.15, 0.16),
                Color::rgb(0.58, 0.40, 0.74),
                Color::rgb(0.55, 0.34, 0.29),
            ],
        }
    }
}

/// Rendering backend contract.
///
/// Ownership rules:
/// - Buffer destruction for entity data must be routed through the deferred
///   deletion ring; callers never destroy a buffer a submitted command
///   buffer may still reference.
/// - All draw-scoped calls (`begin_render_pass` through `draw_instanced`)
///   target the backend's active surface; the window manager switches the
///   active surface before issuing them.
pub trait RenderBackend {
    /// Create (or fetch) the pipeline for a primitive kind. Idempotent per
    /// kind; fails only on unrecoverable device error.
    fn create_pipeline(&mut self, kind: PrimitiveKind) -> RenderResult<PipelineHandle>;

    fn create_buffer(&mut self, usage: BufferUsage, size: usize) -> RenderResult<BufferHandle>;

    /// Destroy a buffer immediately. Only the deletion ring (and shutdown
    /// paths that have idle-waited the device) may call this.
    fn destroy_buffer(&mut self, handle: BufferHandle);

    /// Upload bytes into a buffer. Contract: `offset + data.len()` must not
    /// exceed the buffer's capacity; violating it is a programmer error
    /// (asserted in debug builds), never a silent truncation.
    fn upload_buffer(&mut self, handle: BufferHandle, data: &[u8], offset: usize)
        -> RenderResult<()>;

    /// Byte capacity of a live buffer, `None` for a stale handle.
    fn buffer_capacity(&self, handle: BufferHandle) -> Option<usize>;

    fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8])
        -> RenderResult<TextureHandle>;

    fn destroy_texture(&mut self, handle: TextureHandle);

    /// Wait on the in-flight fence for the current frame slot and acquire
    /// the next swapchain image. The fence wait here is the synchronization
    /// point that makes deferred deletion safe.
    fn begin_frame(&mut self) -> FrameStatus;

    /// Submit the recorded command buffer and present. On out-of-date or
    /// suboptimal present the active surface is marked invalidated for
    /// recreation at the start of the next frame.
    fn end_frame(&mut self) -> FrameStatus;

    fn begin_render_pass(&mut self, clear: Color);
    fn end_render_pass(&mut self);

    fn bind_pipeline(&mut self, handle: PipelineHandle);
    fn bind_buffer(&mut self, handle: BufferHandle, binding: u32);
    /// Bind a u32 index buffer for a following [`draw_indexed`](Self::draw_indexed).
    fn bind_index_buffer(&mut self, handle: BufferHandle);
    fn bind_texture(&mut self, handle: TextureHandle, binding: u32);
    fn push_constants(&mut self, pc: &SeriesPushConstants);
    fn set_viewport(&mut self, viewport: Viewport);
    fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32);
    fn draw(&mut self, vertex_count: u32, first_vertex: u32);
    fn draw_indexed(&mut self, index_count: u32, first_index: u32);
    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32);

    /// Recreate the active surface's swapchain at the given size. Returns
    /// false if recreation failed (e.g. zero-sized framebuffer while
    /// minimized).
    fn recreate_swapchain(&mut self, width: u32, height: u32) -> bool;

    /// Current swapchain extent of the active surface.
    fn surface_extent(&self) -> (u32, u32);

    /// Actual framebuffer size of the active surface's window. Preferred
    /// over the last-remembered size when recovering from an acquire
    /// failure.
    fn framebuffer_extent(&self) -> (u32, u32);

    /// Offscreen path: copy the rendered color attachment into `out_rgba`.
    /// Returns false if the active surface has no offscreen target.
    fn readback_framebuffer(&mut self, out_rgba: &mut [u8], width: u32, height: u32) -> bool;

    /// Full device idle-wait. Used on recreation and shutdown, never in the
    /// steady-state frame loop.
    fn wait_idle(&mut self);

    /// Sticky fatal flag; once set, all frame operations short-circuit.
    fn is_device_lost(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_color_wraps_past_palette_end() {
        let theme = Theme::default();
        let len = theme.palette.len();
        assert_eq!(theme.series_color(len + 1), theme.palette[1]);
    }

    #[test]
    fn empty_palette_falls_back_to_border_color() {
        let theme = Theme {
            palette: Vec::new(),
            ..Theme::default()
        };
        assert_eq!(theme.series_color(0), theme.axis_border);
        assert_eq!(theme.series_color(7), theme.axis_border);
    }
}
