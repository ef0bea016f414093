//! Per-window presentation state
//!
//! Each OS window owns one [`WindowSurface`]: the Vulkan surface, its
//! swapchain, framebuffers, one command buffer per swapchain image,
//! per-flight-frame sync objects, and an invalidation flag. All surfaces
//! share the process-wide [`DeviceContext`] through non-owning handles.
//!
//! [`OffscreenTarget`] is the headless counterpart used for image export:
//! a single color attachment rendered to without a swapchain, then read
//! back into host memory.

use ash::extensions::khr::Surface;
use ash::{vk, Device};

use super::buffer::find_memory_type;
use super::context::{DeviceContext, VulkanError, VulkanResult};
use super::swapchain::{PresentPreference, Swapchain};
use super::sync::FrameSync;

use crate::render::deletion::MAX_FRAMES_IN_FLIGHT;

/// Nanosecond timeout for in-flight fence waits. A frame taking longer
/// than this means the device is wedged, not slow.
const FENCE_TIMEOUT_NS: u64 = 1_000_000_000;

fn create_render_pass(
    device: &Device,
    format: vk::Format,
    final_layout: vk::ImageLayout,
) -> VulkanResult<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(final_layout)
        .build();

    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let color_refs = [color_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .build();

    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dependency_flags: vk::DependencyFlags::empty(),
    };

    let attachments = [color_attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];
    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe {
        device
            .create_render_pass(&render_pass_info, None)
            .map_err(VulkanError::Api)
    }
}

/// Result of acquiring the next swapchain image.
pub enum AcquireResult {
    /// Image index ready for recording.
    Ready(u32),
    /// Swapchain no longer matches the surface; recreate and retry.
    OutOfDate,
}

/// One OS window's Vulkan presentation state.
pub struct WindowSurface {
    device: Device,
    surface_loader: Surface,
    command_pool: vk::CommandPool,
    surface: vk::SurfaceKHR,
    render_pass: vk::RenderPass,
    swapchain: Option<Swapchain>,
    framebuffers: Vec<vk::Framebuffer>,
    /// One command buffer per swapchain image, indexed by acquired image.
    command_buffers: Vec<vk::CommandBuffer>,
    frame_sync: Vec<FrameSync>,
    /// Per-image record of the flight fence that last submitted against
    /// the image; waited before the image's command buffer is re-recorded.
    images_in_flight: Vec<vk::Fence>,
    preference: PresentPreference,
    flight_frame: usize,
    image_index: u32,
    /// Set when presentation failed; the swapchain must be rebuilt before
    /// the next frame begins.
    invalidated: bool,
}

impl WindowSurface {
    /// Take ownership of `surface` and build its swapchain state.
    pub fn new(
        context: &DeviceContext,
        surface: vk::SurfaceKHR,
        extent: vk::Extent2D,
        preference: PresentPreference,
    ) -> VulkanResult<Self> {
        let device = context.raw_device();

        let swapchain = Swapchain::new(context, surface, extent, preference, vk::SwapchainKHR::null())?;
        let render_pass = create_render_pass(
            &device,
            swapchain.format().format,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )?;
        let framebuffers = Self::create_framebuffers(&device, render_pass, &swapchain)?;

        let image_count = swapchain.image_count();
        let command_buffers =
            Self::allocate_command_buffers(&device, context.command_pool(), image_count)?;

        let mut frame_sync = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            frame_sync.push(FrameSync::new(device.clone())?);
        }

        Ok(Self {
            device,
            surface_loader: context.surface_loader.clone(),
            command_pool: context.command_pool(),
            surface,
            render_pass,
            swapchain: Some(swapchain),
            framebuffers,
            command_buffers,
            frame_sync,
            images_in_flight: vec![vk::Fence::null(); image_count],
            preference,
            flight_frame: 0,
            image_index: 0,
            invalidated: false,
        })
    }

    fn allocate_command_buffers(
        device: &Device,
        command_pool: vk::CommandPool,
        count: usize,
    ) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);
        unsafe {
            device
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)
        }
    }

    fn create_framebuffers(
        device: &Device,
        render_pass: vk::RenderPass,
        swapchain: &Swapchain,
    ) -> VulkanResult<Vec<vk::Framebuffer>> {
        let extent = swapchain.extent();
        swapchain
            .image_views()
            .iter()
            .map(|&view| {
                let attachments = [view];
                let framebuffer_info = vk::FramebufferCreateInfo::builder()
                    .render_pass(render_pass)
                    .attachments(&attachments)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1);

                unsafe {
                    device
                        .create_framebuffer(&framebuffer_info, None)
                        .map_err(VulkanError::Api)
                }
            })
            .collect()
    }

    /// Rebuild the swapchain and framebuffers for a new extent. Waits for
    /// the device to go idle first; in-flight frames still reference the
    /// old framebuffers.
    pub fn recreate_swapchain(
        &mut self,
        context: &mut DeviceContext,
        extent: vk::Extent2D,
    ) -> VulkanResult<()> {
        context.wait_idle();

        for framebuffer in self.framebuffers.drain(..) {
            unsafe {
                self.device.destroy_framebuffer(framebuffer, None);
            }
        }

        let old_handle = self
            .swapchain
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), Swapchain::handle);
        let new_swapchain =
            Swapchain::new(context, self.surface, extent, self.preference, old_handle)?;
        // Old swapchain drops after the new one is created from it.
        self.swapchain = Some(new_swapchain);

        let swapchain = self.swapchain.as_ref().ok_or(VulkanError::NoActiveSurface)?;
        self.framebuffers = Self::create_framebuffers(&self.device, self.render_pass, swapchain)?;

        // Image count can change across recreation; realloc the per-image
        // command buffers and forget stale fence associations (the idle
        // wait above retired them).
        let image_count = swapchain.image_count();
        if image_count != self.command_buffers.len() {
            unsafe {
                self.device
                    .free_command_buffers(self.command_pool, &self.command_buffers);
            }
            self.command_buffers =
                Self::allocate_command_buffers(&self.device, self.command_pool, image_count)?;
        }
        self.images_in_flight = vec![vk::Fence::null(); image_count];
        self.invalidated = false;

        log::debug!(
            "swapchain recreated at {}x{}",
            swapchain.extent().width,
            swapchain.extent().height
        );
        Ok(())
    }

    /// Wait for this flight frame's fence, then acquire the next image.
    pub fn acquire(&mut self, context: &mut DeviceContext) -> VulkanResult<AcquireResult> {
        let sync = &self.frame_sync[self.flight_frame];
        sync.in_flight.wait(FENCE_TIMEOUT_NS)?;

        let swapchain = self.swapchain.as_ref().ok_or(VulkanError::NoActiveSurface)?;
        let result = unsafe {
            context.swapchain_loader().acquire_next_image(
                swapchain.handle(),
                FENCE_TIMEOUT_NS,
                sync.image_available.handle(),
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    // Still presentable; treat as stale so the next frame
                    // rebuilds at the right size.
                    self.invalidated = true;
                }
                // The image's command buffer may still be consumed by an
                // earlier flight frame; wait that submission out before the
                // buffer is re-recorded.
                let image_fence = self.images_in_flight[index as usize];
                if image_fence != vk::Fence::null() && image_fence != sync.in_flight.handle() {
                    unsafe {
                        self.device
                            .wait_for_fences(&[image_fence], true, FENCE_TIMEOUT_NS)
                            .map_err(VulkanError::from_api)?;
                    }
                }
                self.images_in_flight[index as usize] = sync.in_flight.handle();
                self.image_index = index;
                sync.in_flight.reset()?;
                Ok(AcquireResult::Ready(index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireResult::OutOfDate),
            Err(e) => {
                context.note_result(e);
                Err(VulkanError::from_api(e))
            }
        }
    }

    /// Submit the recorded command buffer and present the acquired image.
    /// Returns false when presentation reported the swapchain stale; the
    /// surface is flagged invalidated and recreated at the next frame
    /// start rather than immediately.
    pub fn submit_and_present(&mut self, context: &mut DeviceContext) -> VulkanResult<bool> {
        let sync = &self.frame_sync[self.flight_frame];
        let swapchain = self.swapchain.as_ref().ok_or(VulkanError::NoActiveSurface)?;

        let wait_semaphores = [sync.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffers[self.image_index as usize]];
        let signal_semaphores = [sync.render_finished.handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let submit_result = unsafe {
            self.device.queue_submit(
                context.graphics_queue(),
                &[submit_info.build()],
                sync.in_flight.handle(),
            )
        };
        if let Err(e) = submit_result {
            context.note_result(e);
            return Err(VulkanError::from_api(e));
        }

        let swapchains = [swapchain.handle()];
        let image_indices = [self.image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let present_result = unsafe {
            context
                .swapchain_loader()
                .queue_present(context.present_queue(), &present_info)
        };

        self.flight_frame = (self.flight_frame + 1) % MAX_FRAMES_IN_FLIGHT;

        match present_result {
            Ok(false) => Ok(true),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.invalidated = true;
                Ok(false)
            }
            Err(e) => {
                context.note_result(e);
                Err(VulkanError::from_api(e))
            }
        }
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn current_framebuffer(&self) -> vk::Framebuffer {
        self.framebuffers[self.image_index as usize]
    }

    /// Command buffer for the acquired image.
    pub fn current_command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffers[self.image_index as usize]
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain
            .as_ref()
            .map_or(vk::Extent2D::default(), Swapchain::extent)
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    pub fn set_invalidated(&mut self) {
        self.invalidated = true;
    }
}

impl Drop for WindowSurface {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device
                .free_command_buffers(self.command_pool, &self.command_buffers);
            for &framebuffer in &self.framebuffers {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            // Framebuffers and sync objects are gone before the swapchain,
            // the swapchain before the surface.
            self.frame_sync.clear();
            self.swapchain = None;
            self.device.destroy_render_pass(self.render_pass, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

/// Headless render target for image export: one color attachment and a
/// host-visible readback buffer.
pub struct OffscreenTarget {
    device: Device,
    command_pool: vk::CommandPool,
    render_pass: vk::RenderPass,
    image: vk::Image,
    memory: vk::DeviceMemory,
    image_view: vk::ImageView,
    framebuffer: vk::Framebuffer,
    readback: vk::Buffer,
    readback_memory: vk::DeviceMemory,
    command_buffer: vk::CommandBuffer,
    extent: vk::Extent2D,
}

impl OffscreenTarget {
    pub const FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

    pub fn new(context: &DeviceContext, extent: vk::Extent2D) -> VulkanResult<Self> {
        let device = context.raw_device();
        let render_pass = create_render_pass(
            &device,
            Self::FORMAT,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        )?;

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(Self::FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);
        let image = unsafe {
            device
                .create_image(&image_info, None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type_index = find_memory_type(
            context.instance(),
            context.physical.device,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = unsafe {
            device
                .allocate_memory(&alloc_info, None)
                .map_err(VulkanError::Api)?
        };
        unsafe {
            device
                .bind_image_memory(image, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(Self::FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let image_view = unsafe {
            device
                .create_image_view(&view_info, None)
                .map_err(VulkanError::Api)?
        };

        let attachments = [image_view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let framebuffer = unsafe {
            device
                .create_framebuffer(&framebuffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let readback_size = u64::from(extent.width) * u64::from(extent.height) * 4;
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(readback_size)
            .usage(vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let readback = unsafe {
            device
                .create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };
        let readback_requirements = unsafe { device.get_buffer_memory_requirements(readback) };
        let readback_type = find_memory_type(
            context.instance(),
            context.physical.device,
            readback_requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let readback_alloc = vk::MemoryAllocateInfo::builder()
            .allocation_size(readback_requirements.size)
            .memory_type_index(readback_type);
        let readback_memory = unsafe {
            device
                .allocate_memory(&readback_alloc, None)
                .map_err(VulkanError::Api)?
        };
        unsafe {
            device
                .bind_buffer_memory(readback, readback_memory, 0)
                .map_err(VulkanError::Api)?;
        }

        let cmd_alloc = vk::CommandBufferAllocateInfo::builder()
            .command_pool(context.command_pool())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe {
            device
                .allocate_command_buffers(&cmd_alloc)
                .map_err(VulkanError::Api)?[0]
        };

        Ok(Self {
            device,
            command_pool: context.command_pool(),
            render_pass,
            image,
            memory,
            image_view,
            framebuffer,
            readback,
            readback_memory,
            command_buffer,
            extent,
        })
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Record the image-to-buffer copy at the end of the command buffer.
    /// The render pass leaves the attachment in TRANSFER_SRC_OPTIMAL.
    pub fn record_readback(&self) {
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            },
        };
        unsafe {
            self.device.cmd_copy_image_to_buffer(
                self.command_buffer,
                self.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                self.readback,
                &[region],
            );
        }
    }

    /// Copy the rendered pixels out of the readback buffer. The submit
    /// must have completed first.
    pub fn read_pixels(&self, out: &mut [u8]) -> VulkanResult<()> {
        let size = (u64::from(self.extent.width) * u64::from(self.extent.height) * 4) as usize;
        debug_assert!(out.len() >= size);
        unsafe {
            let mapped = self
                .device
                .map_memory(
                    self.readback_memory,
                    0,
                    size as vk::DeviceSize,
                    vk::MemoryMapFlags::empty(),
                )
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(mapped.cast::<u8>(), out.as_mut_ptr(), size);
            self.device.unmap_memory(self.readback_memory);
        }
        Ok(())
    }
}

impl Drop for OffscreenTarget {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device
                .free_command_buffers(self.command_pool, &[self.command_buffer]);
            self.device.destroy_buffer(self.readback, None);
            self.device.free_memory(self.readback_memory, None);
            self.device.destroy_framebuffer(self.framebuffer, None);
            self.device.destroy_image_view(self.image_view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
            self.device.destroy_render_pass(self.render_pass, None);
        }
    }
}
