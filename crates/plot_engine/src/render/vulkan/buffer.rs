//! GPU buffer management for series and decoration geometry
//!
//! Host-visible buffers with RAII cleanup. Buffers are allocated with
//! headroom by the entity cache, so writes land at an offset inside a
//! larger allocation and the capacity outlives the data it holds.

use std::mem;

use ash::{vk, Device, Instance};

use crate::render::api::BufferUsage;

use super::context::{DeviceContext, VulkanError, VulkanResult};

fn usage_flags(usage: BufferUsage) -> vk::BufferUsageFlags {
    match usage {
        BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
        BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        BufferUsage::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
    }
}

/// Buffer with bound host-visible memory
pub struct GpuBuffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    capacity: vk::DeviceSize,
}

impl GpuBuffer {
    /// Allocate a buffer of `capacity` bytes for the given usage.
    pub fn new(context: &DeviceContext, capacity: u64, usage: BufferUsage) -> VulkanResult<Self> {
        Self::with_flags(context, capacity, usage_flags(usage))
    }

    /// Staging buffer for copies into device-local images.
    pub(crate) fn staging(context: &DeviceContext, capacity: u64) -> VulkanResult<Self> {
        Self::with_flags(context, capacity, vk::BufferUsageFlags::TRANSFER_SRC)
    }

    fn with_flags(
        context: &DeviceContext,
        capacity: u64,
        flags: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        let device = context.raw_device();

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(capacity)
            .usage(flags)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device
                .create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory_type_index = find_memory_type(
            context.instance(),
            context.physical.device,
            mem_requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        let memory_type_index = match memory_type_index {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe {
            match device.allocate_memory(&alloc_info, None) {
                Ok(memory) => memory,
                Err(e) => {
                    device.destroy_buffer(buffer, None);
                    return Err(VulkanError::Api(e));
                }
            }
        };

        unsafe {
            device
                .bind_buffer_memory(buffer, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        Ok(Self {
            device,
            buffer,
            memory,
            capacity,
        })
    }

    /// Write `data` starting at `offset` bytes. The caller guarantees
    /// `offset + data.len() <= capacity`.
    pub fn write(&self, data: &[u8], offset: u64) -> VulkanResult<()> {
        debug_assert!(offset + data.len() as u64 <= self.capacity);
        unsafe {
            let mapped = self
                .device
                .map_memory(
                    self.memory,
                    offset,
                    data.len() as vk::DeviceSize,
                    vk::MemoryMapFlags::empty(),
                )
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.cast::<u8>(), data.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Write a typed slice at the start of the buffer.
    pub fn write_slice<T: bytemuck::Pod>(&self, data: &[T]) -> VulkanResult<()> {
        self.write(bytemuck::cast_slice(data), 0)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Size in bytes of `len` elements of `T`.
    pub fn byte_len<T>(len: usize) -> u64 {
        (len * mem::size_of::<T>()) as u64
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Find memory type with required properties
pub(crate) fn find_memory_type(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    let mem_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };

    for i in 0..mem_properties.memory_type_count {
        if (type_filter & (1 << i)) != 0
            && (mem_properties.memory_types[i as usize].property_flags & properties) == properties
        {
            return Ok(i);
        }
    }

    Err(VulkanError::NoSuitableMemoryType)
}
