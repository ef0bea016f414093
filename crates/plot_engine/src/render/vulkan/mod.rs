//! Vulkan backend
//!
//! Low-level ash-based implementation of the rendering backend: device
//! context, per-window surfaces and swapchains, pipelines, buffers, and
//! the frame submission path.

pub mod backend;
pub mod buffer;
pub mod context;
pub mod pipeline;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod window;

pub use backend::VulkanBackend;
pub use buffer::GpuBuffer;
pub use context::{DeviceContext, LogicalDevice, PhysicalDeviceInfo, VulkanError, VulkanInstance, VulkanResult};
pub use pipeline::{PipelineSet, ShaderModule};
pub use surface::{OffscreenTarget, WindowSurface};
pub use swapchain::{PresentPreference, Swapchain};
pub use sync::{Fence, FrameSync, Semaphore};
pub use texture::Texture;
pub use window::{Platform, Window, WindowError, WindowEvent};
