//! Shader loading and graphics pipeline creation
//!
//! One graphics pipeline per primitive kind, all sharing the same push
//! constant layout and dynamic viewport/scissor state. Pipelines are
//! built lazily from SPIR-V on first request and cached; asking again
//! for a kind that is already built returns the cached pipeline.

use std::collections::HashMap;
use std::ffi::CStr;
use std::fs::File;
use std::io::Read;
use std::mem;
use std::path::{Path, PathBuf};

use ash::{vk, Device};

use crate::render::api::{PrimitiveKind, SeriesPushConstants};

use super::context::{VulkanError, VulkanResult};

/// SPIR-V shader module wrapper with automatic resource management
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V bytecode
    pub fn from_bytes(device: &Device, bytes: &[u8]) -> VulkanResult<Self> {
        // SPIR-V is a u32 word stream; reject misaligned blobs.
        let (prefix, u32_slice, suffix) = unsafe { bytes.align_to::<u32>() };
        if !prefix.is_empty() || !suffix.is_empty() {
            return Err(VulkanError::InitializationFailed(
                "SPIR-V bytecode is not properly aligned".to_string(),
            ));
        }

        let create_info = vk::ShaderModuleCreateInfo::builder().code(u32_slice);

        let module = unsafe {
            device
                .create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device: device.clone(),
            module,
        })
    }

    /// Load shader from a SPIR-V file
    pub fn from_file<P: AsRef<Path>>(device: &Device, path: P) -> VulkanResult<Self> {
        let path_ref = path.as_ref();
        let mut file = File::open(path_ref).map_err(|e| {
            VulkanError::InitializationFailed(format!(
                "failed to open shader file {path_ref:?}: {e}"
            ))
        })?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(|e| {
            VulkanError::InitializationFailed(format!(
                "failed to read shader file {path_ref:?}: {e}"
            ))
        })?;

        Self::from_bytes(device, &bytes)
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    fn stage_info(
        &self,
        stage: vk::ShaderStageFlags,
        entry_point: &CStr,
    ) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(entry_point)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

fn topology_for(kind: PrimitiveKind) -> vk::PrimitiveTopology {
    match kind {
        PrimitiveKind::Line => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveKind::Scatter => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveKind::Grid => vk::PrimitiveTopology::LINE_LIST,
    }
}

fn shader_basename(kind: PrimitiveKind) -> &'static str {
    match kind {
        PrimitiveKind::Line => "line",
        PrimitiveKind::Scatter => "scatter",
        PrimitiveKind::Grid => "grid",
    }
}

/// Graphics pipeline wrapper with RAII cleanup
struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    fn new(
        device: &Device,
        render_pass: vk::RenderPass,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
        topology: vk::PrimitiveTopology,
    ) -> VulkanResult<Self> {
        let entry = CStr::from_bytes_with_nul(b"main\0")
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;

        let shader_stages = [
            vertex_shader.stage_info(vk::ShaderStageFlags::VERTEX, entry),
            fragment_shader.stage_info(vk::ShaderStageFlags::FRAGMENT, entry),
        ];

        // Positions only: vec2 at binding 0.
        let binding_descriptions = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: (2 * mem::size_of::<f32>()) as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attribute_descriptions = [vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: 0,
        }];
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(topology)
            .primitive_restart_enable(false);

        // Viewport and scissor are set per-draw from plot area rectangles.
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        // Standard alpha blending so translucent series compose over the
        // plot background.
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build();

        let color_blend_attachments = [color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let push_constant_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: mem::size_of::<SeriesPushConstants>() as u32,
        };

        let push_constant_ranges = [push_constant_range];
        let layout_info =
            vk::PipelineLayoutCreateInfo::builder().push_constant_ranges(&push_constant_ranges);
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, err)| VulkanError::Api(err))?
        };

        Ok(Self {
            device: device.clone(),
            pipeline: pipelines[0],
            layout,
        })
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Named pipeline table: one graphics pipeline per primitive kind.
pub struct PipelineSet {
    device: Device,
    shader_dir: PathBuf,
    pipelines: HashMap<PrimitiveKind, GraphicsPipeline>,
}

impl PipelineSet {
    pub fn new(device: Device, shader_dir: PathBuf) -> Self {
        Self {
            device,
            shader_dir,
            pipelines: HashMap::new(),
        }
    }

    /// Build the pipeline for `kind` against `render_pass`, or return the
    /// cached one. All surfaces share a compatible render pass format, so
    /// one pipeline serves every window.
    pub fn ensure(
        &mut self,
        kind: PrimitiveKind,
        render_pass: vk::RenderPass,
    ) -> VulkanResult<vk::Pipeline> {
        if let Some(existing) = self.pipelines.get(&kind) {
            return Ok(existing.pipeline);
        }

        let base = shader_basename(kind);
        let vertex_shader =
            ShaderModule::from_file(&self.device, self.shader_dir.join(format!("{base}.vert.spv")))?;
        let fragment_shader =
            ShaderModule::from_file(&self.device, self.shader_dir.join(format!("{base}.frag.spv")))?;

        let pipeline = GraphicsPipeline::new(
            &self.device,
            render_pass,
            &vertex_shader,
            &fragment_shader,
            topology_for(kind),
        )?;
        let handle = pipeline.pipeline;
        self.pipelines.insert(kind, pipeline);
        log::debug!("built {kind:?} pipeline from {:?}", self.shader_dir);
        Ok(handle)
    }

    pub fn get(&self, kind: PrimitiveKind) -> Option<vk::Pipeline> {
        self.pipelines.get(&kind).map(|p| p.pipeline)
    }

    /// Layout for push constants; identical across kinds.
    pub fn layout(&self, kind: PrimitiveKind) -> Option<vk::PipelineLayout> {
        self.pipelines.get(&kind).map(|p| p.layout)
    }

    pub fn clear(&mut self) {
        self.pipelines.clear();
    }
}
