//! Recording mock backend for unit and scenario tests
//!
//! Implements [`RenderBackend`] over plain bookkeeping so the cache, ring,
//! frame driver, and renderer can be exercised without a GPU. Failure
//! injection covers the transient swapchain paths.

use std::collections::HashMap;

use slotmap::SlotMap;

use crate::render::api::{
    BufferHandle, BufferUsage, Color, FrameStatus, PipelineHandle, PrimitiveKind, RenderBackend,
    SeriesPushConstants, TextureHandle, Viewport,
};
use crate::render::entity::SurfaceId;
use crate::render::{RenderError, RenderResult};

struct MockBuffer {
    capacity: usize,
    usage: BufferUsage,
}

/// Scripted backend that records calls and supports failure injection.
pub struct MockBackend {
    buffers: HashMap<u64, MockBuffer>,
    next_buffer_id: u64,
    pipelines: HashMap<PrimitiveKind, PipelineHandle>,
    next_pipeline_id: u64,
    textures: Vec<TextureHandle>,
    next_texture_id: u64,

    extent: (u32, u32),
    framebuffer_extent: (u32, u32),
    device_lost: bool,
    surface_invalidated: bool,

    // Failure injection
    acquire_failures_remaining: u32,
    present_failure_pending: bool,
    recreation_fails: bool,

    // Call recording
    begin_frame_calls: usize,
    end_frame_calls: usize,
    upload_count: usize,
    draw_count: usize,
    indexed_draw_count: usize,
    render_pass_count: usize,
    recreations: Vec<(u32, u32)>,
    wait_idle_calls: usize,
    in_frame: bool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            next_buffer_id: 1,
            pipelines: HashMap::new(),
            next_pipeline_id: 1,
            textures: Vec::new(),
            next_texture_id: 1,
            extent: (800, 600),
            framebuffer_extent: (800, 600),
            device_lost: false,
            surface_invalidated: false,
            acquire_failures_remaining: 0,
            present_failure_pending: false,
            recreation_fails: false,
            begin_frame_calls: 0,
            end_frame_calls: 0,
            upload_count: 0,
            draw_count: 0,
            indexed_draw_count: 0,
            render_pass_count: 0,
            recreations: Vec::new(),
            wait_idle_calls: 0,
            in_frame: false,
        }
    }

    /// Two distinct, never-registered surface ids for cache-key tests.
    pub fn surface_id_pair() -> (SurfaceId, SurfaceId) {
        let mut arena: SlotMap<SurfaceId, ()> = SlotMap::with_key();
        (arena.insert(()), arena.insert(()))
    }

    /// Create a buffer without going through the trait (for ring tests).
    pub fn create_buffer_direct(&mut self, usage: BufferUsage, size: usize) -> BufferHandle {
        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, MockBuffer { capacity: size, usage });
        BufferHandle(id)
    }

    pub fn is_buffer_alive(&self, handle: BufferHandle) -> bool {
        self.buffers.contains_key(&handle.0)
    }

    /// Usage class the buffer was created with, `None` for a stale handle.
    pub fn buffer_usage(&self, handle: BufferHandle) -> Option<BufferUsage> {
        self.buffers.get(&handle.0).map(|b| b.usage)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn fail_next_acquires(&mut self, count: u32) {
        self.acquire_failures_remaining = count;
    }

    pub fn fail_next_present(&mut self) {
        self.present_failure_pending = true;
    }

    pub fn fail_recreation(&mut self, fail: bool) {
        self.recreation_fails = fail;
    }

    pub fn set_device_lost(&mut self) {
        self.device_lost = true;
    }

    pub fn set_framebuffer_extent(&mut self, width: u32, height: u32) {
        self.framebuffer_extent = (width, height);
    }

    pub fn upload_count(&self) -> usize {
        self.upload_count
    }

    pub fn draw_count(&self) -> usize {
        self.draw_count
    }

    pub fn indexed_draw_count(&self) -> usize {
        self.indexed_draw_count
    }

    pub fn render_pass_count(&self) -> usize {
        self.render_pass_count
    }

    pub fn begin_frame_calls(&self) -> usize {
        self.begin_frame_calls
    }

    pub fn end_frame_calls(&self) -> usize {
        self.end_frame_calls
    }

    pub fn recreation_count(&self) -> usize {
        self.recreations.len()
    }

    pub fn last_recreation_target(&self) -> Option<(u32, u32)> {
        self.recreations.last().copied()
    }

    pub fn wait_idle_calls(&self) -> usize {
        self.wait_idle_calls
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn surface_invalidated(&self) -> bool {
        self.surface_invalidated
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for MockBackend {
    fn create_pipeline(&mut self, kind: PrimitiveKind) -> RenderResult<PipelineHandle> {
        if let Some(&existing) = self.pipelines.get(&kind) {
            return Ok(existing);
        }
        let handle = PipelineHandle(self.next_pipeline_id);
        self.next_pipeline_id += 1;
        self.pipelines.insert(kind, handle);
        Ok(handle)
    }

    fn create_buffer(&mut self, usage: BufferUsage, size: usize) -> RenderResult<BufferHandle> {
        Ok(self.create_buffer_direct(usage, size))
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        assert!(
            self.buffers.remove(&handle.0).is_some(),
            "double destroy of {handle:?}"
        );
    }

    fn upload_buffer(
        &mut self,
        handle: BufferHandle,
        data: &[u8],
        offset: usize,
    ) -> RenderResult<()> {
        let buffer = self
            .buffers
            .get(&handle.0)
            .ok_or(RenderError::StaleBuffer(handle))?;
        assert!(
            offset + data.len() <= buffer.capacity,
            "upload past capacity: {} + {} > {}",
            offset,
            data.len(),
            buffer.capacity
        );
        self.upload_count += 1;
        Ok(())
    }

    fn buffer_capacity(&self, handle: BufferHandle) -> Option<usize> {
        self.buffers.get(&handle.0).map(|b| b.capacity)
    }

    fn create_texture(&mut self, _w: u32, _h: u32, _rgba: &[u8]) -> RenderResult<TextureHandle> {
        let handle = TextureHandle(self.next_texture_id);
        self.next_texture_id += 1;
        self.textures.push(handle);
        Ok(handle)
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        self.textures.retain(|&t| t != handle);
    }

    fn begin_frame(&mut self) -> FrameStatus {
        if self.device_lost {
            return FrameStatus::DeviceLost;
        }
        self.begin_frame_calls += 1;
        if self.acquire_failures_remaining > 0 {
            self.acquire_failures_remaining -= 1;
            return FrameStatus::OutOfDate;
        }
        self.surface_invalidated = false;
        self.in_frame = true;
        FrameStatus::Ready
    }

    fn end_frame(&mut self) -> FrameStatus {
        assert!(self.in_frame, "end_frame without begin_frame");
        self.in_frame = false;
        self.end_frame_calls += 1;
        if self.device_lost {
            return FrameStatus::DeviceLost;
        }
        if self.present_failure_pending {
            self.present_failure_pending = false;
            self.surface_invalidated = true;
            return FrameStatus::OutOfDate;
        }
        FrameStatus::Ready
    }

    fn begin_render_pass(&mut self, _clear: Color) {
        assert!(self.in_frame, "render pass outside a frame");
        self.render_pass_count += 1;
    }

    fn end_render_pass(&mut self) {}

    fn bind_pipeline(&mut self, _handle: PipelineHandle) {}

    fn bind_buffer(&mut self, handle: BufferHandle, _binding: u32) {
        assert!(self.is_buffer_alive(handle), "bind of destroyed {handle:?}");
        assert_eq!(
            self.buffer_usage(handle),
            Some(BufferUsage::Vertex),
            "vertex bind of non-vertex buffer {handle:?}"
        );
    }

    fn bind_index_buffer(&mut self, handle: BufferHandle) {
        assert!(self.is_buffer_alive(handle), "bind of destroyed {handle:?}");
        assert_eq!(
            self.buffer_usage(handle),
            Some(BufferUsage::Index),
            "index bind of non-index buffer {handle:?}"
        );
    }

    fn bind_texture(&mut self, _handle: TextureHandle, _binding: u32) {}

    fn push_constants(&mut self, _pc: &SeriesPushConstants) {}

    fn set_viewport(&mut self, _viewport: Viewport) {}

    fn set_scissor(&mut self, _x: i32, _y: i32, _width: u32, _height: u32) {}

    fn draw(&mut self, _vertex_count: u32, _first_vertex: u32) {
        self.draw_count += 1;
    }

    fn draw_indexed(&mut self, _index_count: u32, _first_index: u32) {
        self.draw_count += 1;
        self.indexed_draw_count += 1;
    }

    fn draw_instanced(&mut self, _vertex_count: u32, _instance_count: u32, _first_vertex: u32) {
        self.draw_count += 1;
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> bool {
        if self.recreation_fails {
            return false;
        }
        self.recreations.push((width, height));
        self.extent = (width, height);
        self.surface_invalidated = false;
        true
    }

    fn surface_extent(&self) -> (u32, u32) {
        self.extent
    }

    fn framebuffer_extent(&self) -> (u32, u32) {
        self.framebuffer_extent
    }

    fn readback_framebuffer(&mut self, out_rgba: &mut [u8], width: u32, height: u32) -> bool {
        let needed = (width * height * 4) as usize;
        if out_rgba.len() < needed {
            return false;
        }
        out_rgba[..needed].fill(0);
        true
    }

    fn wait_idle(&mut self) {
        self.wait_idle_calls += 1;
    }

    fn is_device_lost(&self) -> bool {
        self.device_lost
    }
}

/// Minimal in-memory series implementing [`Drawable`] for tests.
pub struct TestSeries {
    kind: PrimitiveKind,
    positions: Vec<[f32; 2]>,
    indices: Option<Vec<u32>>,
    dirty: bool,
    visible: bool,
    palette_index: usize,
}

impl TestSeries {
    pub fn line(points: usize) -> Self {
        Self::with_kind(PrimitiveKind::Line, points)
    }

    pub fn scatter(points: usize) -> Self {
        Self::with_kind(PrimitiveKind::Scatter, points)
    }

    fn with_kind(kind: PrimitiveKind, points: usize) -> Self {
        Self {
            kind,
            positions: Self::wave(points),
            indices: None,
            dirty: true,
            visible: true,
            palette_index: 0,
        }
    }

    fn wave(points: usize) -> Vec<[f32; 2]> {
        (0..points)
            .map(|i| {
                let x = i as f32;
                [x, (x * 0.1).sin()]
            })
            .collect()
    }

    /// Replace the data with a wave of `points` samples and mark dirty.
    pub fn set_point_count(&mut self, points: usize) {
        self.positions = Self::wave(points);
        self.dirty = true;
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn set_palette_index(&mut self, index: usize) {
        self.palette_index = index;
    }

    /// Attach index data (e.g. a gapped line) and mark dirty.
    pub fn set_indices(&mut self, indices: Vec<u32>) {
        self.indices = Some(indices);
        self.dirty = true;
    }
}

impl crate::render::entity::Drawable for TestSeries {
    fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn visible(&self) -> bool {
        self.visible
    }

    fn positions(&self) -> &[[f32; 2]] {
        &self.positions
    }

    fn indices(&self) -> Option<&[u32]> {
        self.indices.as_deref()
    }

    fn palette_index(&self) -> usize {
        self.palette_index
    }
}
