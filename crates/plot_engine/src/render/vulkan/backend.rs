//! Vulkan implementation of the rendering backend
//!
//! Owns the process-wide [`DeviceContext`], the per-primitive pipeline
//! table, all GPU buffers and textures, and the set of window surfaces.
//! Exactly one surface is active at a time; the window manager switches
//! the active surface before driving a frame, and every draw-scoped call
//! records into that surface's current command buffer.

use std::collections::HashMap;
use std::path::PathBuf;

use ash::vk;
use slotmap::SlotMap;

use crate::render::api::{
    BufferHandle, BufferUsage, Color, FrameStatus, PipelineHandle, PrimitiveKind, RenderBackend,
    SeriesPushConstants, TextureHandle, Viewport,
};
use crate::render::entity::SurfaceId;
use crate::render::{RenderError, RenderResult};

use super::buffer::GpuBuffer;
use super::context::{DeviceContext, VulkanError, VulkanInstance};
use super::pipeline::PipelineSet;
use super::surface::{AcquireResult, OffscreenTarget, WindowSurface};
use super::swapchain::PresentPreference;
use super::texture::Texture;
use super::window::{Platform, Window};

enum SurfaceTarget {
    Onscreen(WindowSurface),
    Offscreen(OffscreenTarget),
}

struct SurfaceSlot {
    target: SurfaceTarget,
    /// Actual window framebuffer size, pushed in by the window manager on
    /// resize events. For offscreen targets it equals the target extent.
    framebuffer_extent: (u32, u32),
}

/// Production rendering backend over ash.
pub struct VulkanBackend {
    context: DeviceContext,
    pipelines: PipelineSet,
    buffers: HashMap<u64, GpuBuffer>,
    textures: HashMap<u64, Texture>,
    next_buffer_id: u64,
    next_texture_id: u64,
    surfaces: SlotMap<SurfaceId, SurfaceSlot>,
    active: Option<SurfaceId>,
    preference: PresentPreference,
    /// Command buffer being recorded between begin_frame and end_frame.
    recording: Option<vk::CommandBuffer>,
    bound_layout: Option<vk::PipelineLayout>,
}

impl VulkanBackend {
    /// Create the backend against the first window. The window's surface
    /// doubles as the bootstrap surface for physical device selection and
    /// then becomes that window's presentation surface.
    pub fn new(
        platform: &Platform,
        first_window: &mut Window,
        shader_dir: PathBuf,
        preference: PresentPreference,
    ) -> RenderResult<(Self, SurfaceId)> {
        let extensions = platform.required_instance_extensions()?;
        let instance = VulkanInstance::new(&extensions, "plot_engine")?;
        let surface_loader =
            ash::extensions::khr::Surface::new(&instance.entry, &instance.instance);

        let raw_surface = first_window.create_vulkan_surface(instance.instance.handle())?;
        let context = DeviceContext::new(instance, surface_loader, raw_surface)?;
        let pipelines = PipelineSet::new(context.raw_device(), shader_dir);

        let mut backend = Self {
            context,
            pipelines,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            next_buffer_id: 1,
            next_texture_id: 1,
            surfaces: SlotMap::with_key(),
            active: None,
            preference,
            recording: None,
            bound_layout: None,
        };

        let (width, height) = first_window.get_framebuffer_size();
        let surface = WindowSurface::new(
            &backend.context,
            raw_surface,
            vk::Extent2D { width, height },
            preference,
        )?;
        let id = backend.surfaces.insert(SurfaceSlot {
            target: SurfaceTarget::Onscreen(surface),
            framebuffer_extent: (width, height),
        });
        backend.active = Some(id);
        log::info!("Vulkan backend initialized; first surface {}x{}", width, height);
        Ok((backend, id))
    }

    /// Register a presentation surface for an additional window.
    pub fn add_window_surface(&mut self, window: &mut Window) -> RenderResult<SurfaceId> {
        let raw_surface = window.create_vulkan_surface(self.context.instance().handle())?;
        let (width, height) = window.get_framebuffer_size();
        let surface = WindowSurface::new(
            &self.context,
            raw_surface,
            vk::Extent2D { width, height },
            self.preference,
        )?;
        Ok(self.surfaces.insert(SurfaceSlot {
            target: SurfaceTarget::Onscreen(surface),
            framebuffer_extent: (width, height),
        }))
    }

    /// Register a headless render target for image export.
    pub fn add_offscreen_surface(&mut self, width: u32, height: u32) -> RenderResult<SurfaceId> {
        let target = OffscreenTarget::new(&self.context, vk::Extent2D { width, height })?;
        Ok(self.surfaces.insert(SurfaceSlot {
            target: SurfaceTarget::Offscreen(target),
            framebuffer_extent: (width, height),
        }))
    }

    /// Destroy a surface. The device is idle-waited, so resources the
    /// surface's in-flight frames referenced are safe to release.
    pub fn remove_surface(&mut self, id: SurfaceId) {
        self.context.wait_idle();
        self.surfaces.remove(id);
        if self.active == Some(id) {
            self.active = None;
        }
    }

    /// Point all draw-scoped calls at this surface.
    pub fn set_active_surface(&mut self, id: SurfaceId) -> RenderResult<()> {
        if !self.surfaces.contains_key(id) {
            return Err(RenderError::Vulkan(VulkanError::NoActiveSurface));
        }
        self.active = Some(id);
        Ok(())
    }

    pub fn active_surface(&self) -> Option<SurfaceId> {
        self.active
    }

    /// Record the window's true framebuffer size for a surface. Resize
    /// recovery prefers this over the swapchain's last extent.
    pub fn note_framebuffer_extent(&mut self, id: SurfaceId, width: u32, height: u32) {
        if let Some(slot) = self.surfaces.get_mut(id) {
            slot.framebuffer_extent = (width, height);
        }
    }

    /// Flag a surface's swapchain stale so the next frame rebuilds it.
    pub fn invalidate_surface(&mut self, id: SurfaceId) {
        if let Some(slot) = self.surfaces.get_mut(id) {
            if let SurfaceTarget::Onscreen(surface) = &mut slot.target {
                surface.set_invalidated();
            }
        }
    }

    fn active_slot(&self) -> Option<&SurfaceSlot> {
        self.active.and_then(|id| self.surfaces.get(id))
    }

    fn active_slot_mut(&mut self) -> Option<&mut SurfaceSlot> {
        let id = self.active?;
        self.surfaces.get_mut(id)
    }

    fn kind_for(handle: PipelineHandle) -> Option<PrimitiveKind> {
        PrimitiveKind::ALL.get(handle.0 as usize).copied()
    }

    fn active_render_pass(&self) -> Option<vk::RenderPass> {
        self.active_slot().map(|slot| match &slot.target {
            SurfaceTarget::Onscreen(surface) => surface.render_pass(),
            SurfaceTarget::Offscreen(target) => target.render_pass(),
        })
    }

    fn begin_recording(&mut self, cmd: vk::CommandBuffer) -> FrameStatus {
        let device = self.context.raw_device();
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let result = unsafe { device.begin_command_buffer(cmd, &begin_info) };
        if let Err(e) = result {
            self.context.note_result(e);
            return if self.context.is_device_lost() {
                FrameStatus::DeviceLost
            } else {
                FrameStatus::OutOfDate
            };
        }
        self.recording = Some(cmd);
        FrameStatus::Ready
    }
}

impl RenderBackend for VulkanBackend {
    fn create_pipeline(&mut self, kind: PrimitiveKind) -> RenderResult<PipelineHandle> {
        let render_pass = self
            .active_render_pass()
            .ok_or(RenderError::Vulkan(VulkanError::NoActiveSurface))?;
        self.pipelines.ensure(kind, render_pass)?;
        let index = PrimitiveKind::ALL
            .iter()
            .position(|&k| k == kind)
            .ok_or(RenderError::MissingPipeline(kind))?;
        Ok(PipelineHandle(index as u64))
    }

    fn create_buffer(&mut self, usage: BufferUsage, size: usize) -> RenderResult<BufferHandle> {
        let buffer = GpuBuffer::new(&self.context, size as u64, usage)?;
        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        if self.buffers.remove(&handle.0).is_none() {
            log::warn!("destroy_buffer on stale handle {}", handle.0);
        }
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
        let capacity = buffer.capacity() as usize;
        debug_assert!(offset + data.len() <= capacity);
        if offset + data.len() > capacity {
            return Err(RenderError::UploadOutOfBounds {
                offset,
                len: data.len(),
                capacity,
            });
        }
        buffer.write(data, offset as u64)?;
        Ok(())
    }

    fn buffer_capacity(&self, handle: BufferHandle) -> Option<usize> {
        self.buffers.get(&handle.0).map(|b| b.capacity() as usize)
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> RenderResult<TextureHandle> {
        let texture = Texture::from_rgba(&mut self.context, width, height, rgba)?;
        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(id, texture);
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        if self.textures.remove(&handle.0).is_none() {
            log::warn!("destroy_texture on stale handle {}", handle.0);
        }
    }

    fn begin_frame(&mut self) -> FrameStatus {
        if self.context.is_device_lost() {
            return FrameStatus::DeviceLost;
        }
        let Some(id) = self.active else {
            return FrameStatus::OutOfDate;
        };

        // Present-time invalidation is honored here, at the frame boundary,
        // never mid-submission.
        let invalidated = match self.surfaces.get(id).map(|s| &s.target) {
            Some(SurfaceTarget::Onscreen(surface)) => surface.is_invalidated(),
            Some(SurfaceTarget::Offscreen(_)) => false,
            None => return FrameStatus::OutOfDate,
        };
        if invalidated {
            let (width, height) = self
                .surfaces
                .get(id)
                .map(|s| s.framebuffer_extent)
                .unwrap_or((0, 0));
            if !self.recreate_swapchain(width, height) {
                return FrameStatus::OutOfDate;
            }
        }

        let acquired = {
            let slot = match self.surfaces.get_mut(id) {
                Some(slot) => slot,
                None => return FrameStatus::OutOfDate,
            };
            match &mut slot.target {
                SurfaceTarget::Onscreen(surface) => match surface.acquire(&mut self.context) {
                    Ok(AcquireResult::Ready(_)) => Ok(surface.current_command_buffer()),
                    Ok(AcquireResult::OutOfDate) => Err(FrameStatus::OutOfDate),
                    Err(_) if self.context.is_device_lost() => Err(FrameStatus::DeviceLost),
                    Err(e) => {
                        log::error!("image acquisition failed: {e}");
                        Err(FrameStatus::OutOfDate)
                    }
                },
                SurfaceTarget::Offscreen(target) => Ok(target.command_buffer()),
            }
        };

        match acquired {
            Ok(cmd) => self.begin_recording(cmd),
            Err(status) => status,
        }
    }

    fn end_frame(&mut self) -> FrameStatus {
        let Some(cmd) = self.recording.take() else {
            return FrameStatus::OutOfDate;
        };
        self.bound_layout = None;

        let device = self.context.raw_device();
        let Some(id) = self.active else {
            return FrameStatus::OutOfDate;
        };

        // Offscreen targets copy the attachment out before ending the
        // command buffer.
        if let Some(SurfaceTarget::Offscreen(target)) = self.surfaces.get(id).map(|s| &s.target) {
            target.record_readback();
        }

        if let Err(e) = unsafe { device.end_command_buffer(cmd) } {
            self.context.note_result(e);
            return if self.context.is_device_lost() {
                FrameStatus::DeviceLost
            } else {
                FrameStatus::OutOfDate
            };
        }

        let slot = match self.surfaces.get_mut(id) {
            Some(slot) => slot,
            None => return FrameStatus::OutOfDate,
        };
        match &mut slot.target {
            SurfaceTarget::Onscreen(surface) => {
                match surface.submit_and_present(&mut self.context) {
                    Ok(true) => FrameStatus::Ready,
                    Ok(false) => FrameStatus::OutOfDate,
                    Err(_) if self.context.is_device_lost() => FrameStatus::DeviceLost,
                    Err(e) => {
                        log::error!("frame submission failed: {e}");
                        FrameStatus::OutOfDate
                    }
                }
            }
            SurfaceTarget::Offscreen(_) => {
                // Synchronous path: submit and wait so the readback buffer
                // is coherent when the caller reads it.
                let command_buffers = [cmd];
                let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
                let result = unsafe {
                    device.queue_submit(
                        self.context.graphics_queue(),
                        &[submit_info.build()],
                        vk::Fence::null(),
                    )
                };
                if let Err(e) = result {
                    self.context.note_result(e);
                    return if self.context.is_device_lost() {
                        FrameStatus::DeviceLost
                    } else {
                        FrameStatus::OutOfDate
                    };
                }
                if let Err(e) = unsafe { device.queue_wait_idle(self.context.graphics_queue()) } {
                    self.context.note_result(e);
                    return if self.context.is_device_lost() {
                        FrameStatus::DeviceLost
                    } else {
                        FrameStatus::OutOfDate
                    };
                }
                FrameStatus::Ready
            }
        }
    }

    fn begin_render_pass(&mut self, clear: Color) {
        let Some(cmd) = self.recording else { return };
        let Some(slot) = self.active_slot() else { return };

        let (render_pass, framebuffer, extent) = match &slot.target {
            SurfaceTarget::Onscreen(surface) => (
                surface.render_pass(),
                surface.current_framebuffer(),
                surface.extent(),
            ),
            SurfaceTarget::Offscreen(target) => {
                (target.render_pass(), target.framebuffer(), target.extent())
            }
        };

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [clear.r, clear.g, clear.b, clear.a],
            },
        }];
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.context.raw_device().cmd_begin_render_pass(
                cmd,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    fn end_render_pass(&mut self) {
        let Some(cmd) = self.recording else { return };
        unsafe {
            self.context.raw_device().cmd_end_render_pass(cmd);
        }
    }

    fn bind_pipeline(&mut self, handle: PipelineHandle) {
        let Some(cmd) = self.recording else { return };
        let Some(kind) = Self::kind_for(handle) else {
            log::warn!("bind_pipeline with unknown handle {}", handle.0);
            return;
        };
        let (Some(pipeline), Some(layout)) =
            (self.pipelines.get(kind), self.pipelines.layout(kind))
        else {
            log::warn!("bind_pipeline before pipeline creation for {kind:?}");
            return;
        };
        self.bound_layout = Some(layout);
        unsafe {
            self.context.raw_device().cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    fn bind_buffer(&mut self, handle: BufferHandle, binding: u32) {
        let Some(cmd) = self.recording else { return };
        let Some(buffer) = self.buffers.get(&handle.0) else {
            log::warn!("bind_buffer on stale handle {}", handle.0);
            return;
        };
        unsafe {
            self.context.raw_device().cmd_bind_vertex_buffers(
                cmd,
                binding,
                &[buffer.handle()],
                &[0],
            );
        }
    }

    fn bind_index_buffer(&mut self, handle: BufferHandle) {
        let Some(cmd) = self.recording else { return };
        let Some(buffer) = self.buffers.get(&handle.0) else {
            log::warn!("bind_index_buffer on stale handle {}", handle.0);
            return;
        };
        unsafe {
            self.context.raw_device().cmd_bind_index_buffer(
                cmd,
                buffer.handle(),
                0,
                vk::IndexType::UINT32,
            );
        }
    }

    fn bind_texture(&mut self, handle: TextureHandle, _binding: u32) {
        let Some(cmd) = self.recording else { return };
        let Some(texture) = self.textures.get(&handle.0) else {
            log::warn!("bind_texture on stale handle {}", handle.0);
            return;
        };
        let Some(layout) = self.bound_layout else { return };
        unsafe {
            self.context.raw_device().cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[texture.descriptor_set()],
                &[],
            );
        }
    }

    fn push_constants(&mut self, pc: &SeriesPushConstants) {
        let Some(cmd) = self.recording else { return };
        let Some(layout) = self.bound_layout else { return };
        unsafe {
            self.context.raw_device().cmd_push_constants(
                cmd,
                layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(pc),
            );
        }
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        let Some(cmd) = self.recording else { return };
        let vk_viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe {
            self.context
                .raw_device()
                .cmd_set_viewport(cmd, 0, &[vk_viewport]);
        }
    }

    fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) {
        let Some(cmd) = self.recording else { return };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x, y },
            extent: vk::Extent2D { width, height },
        };
        unsafe {
            self.context.raw_device().cmd_set_scissor(cmd, 0, &[scissor]);
        }
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) {
        let Some(cmd) = self.recording else { return };
        unsafe {
            self.context
                .raw_device()
                .cmd_draw(cmd, vertex_count, 1, first_vertex, 0);
        }
    }

    fn draw_indexed(&mut self, index_count: u32, first_index: u32) {
        let Some(cmd) = self.recording else { return };
        unsafe {
            self.context
                .raw_device()
                .cmd_draw_indexed(cmd, index_count, 1, first_index, 0, 0);
        }
    }

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32) {
        let Some(cmd) = self.recording else { return };
        unsafe {
            self.context
                .raw_device()
                .cmd_draw(cmd, vertex_count, instance_count, first_vertex, 0);
        }
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> bool {
        // Minimized windows report zero; nothing to swap until they return.
        if width == 0 || height == 0 {
            return false;
        }
        let Some(id) = self.active else { return false };

        // Split the borrow: the surface needs &mut self.context.
        let Some(slot) = self.surfaces.get_mut(id) else {
            return false;
        };
        match &mut slot.target {
            SurfaceTarget::Onscreen(surface) => {
                match surface.recreate_swapchain(&mut self.context, vk::Extent2D { width, height })
                {
                    Ok(()) => true,
                    Err(e) => {
                        log::error!("swapchain recreation failed: {e}");
                        false
                    }
                }
            }
            SurfaceTarget::Offscreen(_) => false,
        }
    }

    fn surface_extent(&self) -> (u32, u32) {
        match self.active_slot().map(|s| &s.target) {
            Some(SurfaceTarget::Onscreen(surface)) => {
                let extent = surface.extent();
                (extent.width, extent.height)
            }
            Some(SurfaceTarget::Offscreen(target)) => {
                let extent = target.extent();
                (extent.width, extent.height)
            }
            None => (0, 0),
        }
    }

    fn framebuffer_extent(&self) -> (u32, u32) {
        self.active_slot()
            .map(|s| s.framebuffer_extent)
            .unwrap_or((0, 0))
    }

    fn readback_framebuffer(&mut self, out_rgba: &mut [u8], width: u32, height: u32) -> bool {
        match self.active_slot().map(|s| &s.target) {
            Some(SurfaceTarget::Offscreen(target)) => {
                let extent = target.extent();
                if extent.width != width || extent.height != height {
                    log::warn!(
                        "readback size mismatch: target {}x{}, requested {}x{}",
                        extent.width,
                        extent.height,
                        width,
                        height
                    );
                    return false;
                }
                match target.read_pixels(out_rgba) {
                    Ok(()) => true,
                    Err(e) => {
                        log::error!("framebuffer readback failed: {e}");
                        false
                    }
                }
            }
            _ => false,
        }
    }

    fn wait_idle(&mut self) {
        self.context.wait_idle();
    }

    fn is_device_lost(&self) -> bool {
        self.context.is_device_lost()
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.context.wait_idle();
        // Surfaces, buffers, textures, and pipelines all hold device clones
        // and drop before the context's instance.
        self.surfaces.clear();
        self.buffers.clear();
        self.textures.clear();
        self.pipelines.clear();
    }
}
