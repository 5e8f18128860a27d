//! [`RenderBackend`] implementation over ash.
//!
//! Object bookkeeping follows the crate's own slot-pool pattern: every
//! handle index points into a [`SlotPool`] of native Vulkan objects, so a
//! stale or foreign handle trips the pool's liveness assertion rather than
//! reaching the driver.
//!
//! Attachments live in `vk::ImageLayout::GENERAL`, traded for not carrying a
//! layout-transition tracker in this layer. Rendering is headless: "images"
//! are indices in a fixed ring and present is an empty queue submission that
//! consumes the wait semaphores.

use super::context::VulkanContext;
use super::error::VulkanError;
use crate::gpu::traits::RenderBackend;
use crate::gpu::{
    AttachmentDesc, BindingSetLayout, BindingType, BufferDesc, BufferHandle, ClearValues,
    CommandBufferHandle, DescriptorPoolHandle, DescriptorSetHandle, Extent2d, FenceHandle,
    Format, FramebufferDesc, FramebufferHandle, LoadOp, MemoryHandle, MemoryRequirements,
    MemoryTypeInfo, PassDesc, PassHandle, PipelineDesc, PipelineHandle, ResolvedBinding,
    SamplerDesc, SamplerHandle, SemaphoreHandle, StoreOp, TextureDesc, TextureHandle, Topology,
};
use crate::ledger::{SlotId, SlotPool};
use ash::vk;
use smallvec::SmallVec;
use std::ptr::NonNull;

/// Presentable ring depth for headless operation.
const IMAGE_RING: u32 = 3;

struct VkTexture {
    image: vk::Image,
    /// Created once memory is bound; views require backed images.
    view: Option<vk::ImageView>,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
}

struct VkPass {
    pass: vk::RenderPass,
    color_count: u32,
    has_depth: bool,
}

struct VkPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    bindings: SmallVec<[BindingSetLayout; 4]>,
    /// GRAPHICS or COMPUTE, fixed at creation; binds reuse it.
    bind_point: vk::PipelineBindPoint,
}

struct VkSet {
    set: vk::DescriptorSet,
    /// Pool the set came from; resetting the pool retires the set.
    pool: SlotId,
    /// Layout of the owning pipeline's binding set, for descriptor types at
    /// update time.
    layout: BindingSetLayout,
}

/// Vulkan render backend.
pub struct VulkanBackend {
    context: VulkanContext,
    command_pool: vk::CommandPool,
    memory_types: Vec<MemoryTypeInfo>,

    textures: SlotPool<VkTexture>,
    buffers: SlotPool<vk::Buffer>,
    passes: SlotPool<VkPass>,
    framebuffers: SlotPool<vk::Framebuffer>,
    pipelines: SlotPool<VkPipeline>,
    samplers: SlotPool<vk::Sampler>,
    memories: SlotPool<vk::DeviceMemory>,
    fences: SlotPool<vk::Fence>,
    semaphores: SlotPool<vk::Semaphore>,
    cmds: SlotPool<vk::CommandBuffer>,
    pools: SlotPool<vk::DescriptorPool>,
    sets: SlotPool<VkSet>,

    next_image: u32,
}

fn vk_format(format: Format) -> vk::Format {
    match format {
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::R32Float => vk::Format::R32_SFLOAT,
        Format::Depth32Float => vk::Format::D32_SFLOAT,
        Format::Depth24Stencil8 => vk::Format::D24_UNORM_S8_UINT,
    }
}

fn vk_load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

fn vk_store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

fn vk_attachment(desc: &AttachmentDesc, samples: u32) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(vk_format(desc.format))
        .samples(vk_samples(samples))
        .load_op(vk_load_op(desc.load))
        .store_op(vk_store_op(desc.store))
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(if desc.load == LoadOp::Load {
            vk::ImageLayout::GENERAL
        } else {
            vk::ImageLayout::UNDEFINED
        })
        .final_layout(vk::ImageLayout::GENERAL)
}

fn vk_samples(samples: u32) -> vk::SampleCountFlags {
    match samples {
        1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        other => panic!("unsupported sample count {}", other),
    }
}

fn vk_descriptor_type(binding: BindingType) -> vk::DescriptorType {
    match binding {
        BindingType::SampledTexture => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        BindingType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        BindingType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
    }
}

impl VulkanBackend {
    /// Create a backend over a fresh [`VulkanContext`].
    pub fn new() -> Result<Self, VulkanError> {
        let context = VulkanContext::new()?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(context.graphics_queue_family);
        let command_pool = unsafe { context.device.create_command_pool(&pool_info, None)? };

        let memory_types = context.memory_properties.memory_types
            [..context.memory_properties.memory_type_count as usize]
            .iter()
            .map(|mt| MemoryTypeInfo {
                device_local: mt
                    .property_flags
                    .contains(vk::MemoryPropertyFlags::DEVICE_LOCAL),
                host_visible: mt.property_flags.contains(
                    vk::MemoryPropertyFlags::HOST_VISIBLE
                        | vk::MemoryPropertyFlags::HOST_COHERENT,
                ),
            })
            .collect();

        Ok(Self {
            context,
            command_pool,
            memory_types,
            textures: SlotPool::new(4096),
            buffers: SlotPool::new(4096),
            passes: SlotPool::new(1024),
            framebuffers: SlotPool::new(1024),
            pipelines: SlotPool::new(1024),
            samplers: SlotPool::new(1024),
            memories: SlotPool::new(1024),
            fences: SlotPool::new(1024),
            semaphores: SlotPool::new(1024),
            cmds: SlotPool::new(4096),
            pools: SlotPool::new(1024),
            sets: SlotPool::new(65536),
            next_image: 0,
        })
    }

    fn device(&self) -> &ash::Device {
        &self.context.device
    }

    fn texture(&self, handle: TextureHandle) -> &VkTexture {
        self.textures.get(SlotId(handle.index()))
    }

    fn view_of(&self, handle: TextureHandle) -> vk::ImageView {
        self.texture(handle)
            .view
            .expect("texture used before memory bind")
    }

    /// Drop the slot-pool entries of every set belonging to `pool`; the
    /// native sets were already invalidated by the pool operation.
    fn retire_sets_of(&mut self, pool: SlotId) {
        let retired: Vec<SlotId> = self
            .sets
            .live_ids()
            .into_iter()
            .filter(|id| self.sets.get(*id).pool == pool)
            .collect();
        for id in retired {
            self.sets.remove(id);
        }
    }

    /// Submit an empty batch to the graphics queue, used to consume or
    /// produce semaphores in headless acquire/present.
    fn empty_submit(&mut self, waits: &[SemaphoreHandle], signals: &[SemaphoreHandle]) {
        let wait_vk: SmallVec<[vk::Semaphore; 8]> = waits
            .iter()
            .map(|s| *self.semaphores.get(SlotId(s.index())))
            .collect();
        let signal_vk: SmallVec<[vk::Semaphore; 8]> = signals
            .iter()
            .map(|s| *self.semaphores.get(SlotId(s.index())))
            .collect();
        let stages: SmallVec<[vk::PipelineStageFlags; 8]> =
            waits.iter().map(|_| vk::PipelineStageFlags::ALL_COMMANDS).collect();
        let info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_vk)
            .wait_dst_stage_mask(&stages)
            .signal_semaphores(&signal_vk);
        unsafe {
            self.context
                .device
                .queue_submit(self.context.graphics_queue, &[info], vk::Fence::null())
                .expect("queue submit failed");
        }
    }
}

impl RenderBackend for VulkanBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> crate::error::Result<TextureHandle> {
        let format = vk_format(desc.format);
        let mut usage = vk::ImageUsageFlags::empty();
        if desc.usage.color_attachment {
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if desc.usage.depth_attachment {
            usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if desc.usage.sampled {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }
        if desc.usage.transfer_dst {
            usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }

        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk_samples(desc.samples))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe {
            self.device()
                .create_image(&info, None)
                .map_err(VulkanError::from)?
        };

        let aspect = if desc.format.is_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let id = self.textures.insert(VkTexture {
            image,
            view: None,
            format,
            aspect,
        });
        Ok(TextureHandle::new(0, id.0))
    }

    fn texture_requirements(&mut self, texture: TextureHandle) -> MemoryRequirements {
        let image = self.texture(texture).image;
        let req = unsafe { self.device().get_image_memory_requirements(image) };
        MemoryRequirements {
            size: req.size,
            alignment: req.alignment,
            type_bits: req.memory_type_bits,
        }
    }

    fn bind_texture_memory(
        &mut self,
        texture: TextureHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> crate::error::Result<()> {
        let vk_memory = *self.memories.get(SlotId(memory.index()));
        let entry = self.textures.get_mut(SlotId(texture.index()));
        unsafe {
            self.context
                .device
                .bind_image_memory(entry.image, vk_memory, offset)
                .map_err(VulkanError::from)?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(entry.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(entry.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: entry.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe {
            self.context
                .device
                .create_image_view(&view_info, None)
                .map_err(VulkanError::from)?
        };
        self.textures.get_mut(SlotId(texture.index())).view = Some(view);
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        let entry = self.textures.remove(SlotId(texture.index()));
        unsafe {
            if let Some(view) = entry.view {
                self.context.device.destroy_image_view(view, None);
            }
            self.context.device.destroy_image(entry.image, None);
        }
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> crate::error::Result<BufferHandle> {
        let mut usage = vk::BufferUsageFlags::empty();
        if desc.usage.vertex {
            usage |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if desc.usage.index {
            usage |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if desc.usage.uniform {
            usage |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if desc.usage.storage {
            usage |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if desc.usage.transfer_src {
            usage |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if desc.usage.transfer_dst {
            usage |= vk::BufferUsageFlags::TRANSFER_DST;
        }

        let info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe {
            self.device()
                .create_buffer(&info, None)
                .map_err(VulkanError::from)?
        };
        Ok(BufferHandle::new(0, self.buffers.insert(buffer).0))
    }

    fn buffer_requirements(&mut self, buffer: BufferHandle) -> MemoryRequirements {
        let buffer = *self.buffers.get(SlotId(buffer.index()));
        let req = unsafe { self.device().get_buffer_memory_requirements(buffer) };
        MemoryRequirements {
            size: req.size,
            alignment: req.alignment,
            type_bits: req.memory_type_bits,
        }
    }

    fn bind_buffer_memory(
        &mut self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> crate::error::Result<()> {
        let vk_buffer = *self.buffers.get(SlotId(buffer.index()));
        let vk_memory = *self.memories.get(SlotId(memory.index()));
        unsafe {
            self.context
                .device
                .bind_buffer_memory(vk_buffer, vk_memory, offset)
                .map_err(VulkanError::from)?;
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        let vk_buffer = self.buffers.remove(SlotId(buffer.index()));
        unsafe { self.context.device.destroy_buffer(vk_buffer, None) };
    }

    fn create_pass(&mut self, desc: &PassDesc) -> crate::error::Result<PassHandle> {
        let mut attachments: SmallVec<[vk::AttachmentDescription; 5]> = SmallVec::new();
        let mut color_refs: SmallVec<[vk::AttachmentReference; 4]> = SmallVec::new();
        for (index, color) in desc.color.iter().enumerate() {
            attachments.push(vk_attachment(color, desc.samples));
            color_refs.push(vk::AttachmentReference {
                attachment: index as u32,
                layout: vk::ImageLayout::GENERAL,
            });
        }
        let depth_ref = desc.depth.as_ref().map(|depth| {
            attachments.push(vk_attachment(depth, desc.samples));
            vk::AttachmentReference {
                attachment: (attachments.len() - 1) as u32,
                layout: vk::ImageLayout::GENERAL,
            }
        });

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = &depth_ref {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        let subpasses = [subpass];

        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses);
        let pass = unsafe {
            self.device()
                .create_render_pass(&info, None)
                .map_err(VulkanError::from)?
        };
        let id = self.passes.insert(VkPass {
            pass,
            color_count: desc.color.len() as u32,
            has_depth: desc.depth.is_some(),
        });
        Ok(PassHandle::new(0, id.0))
    }

    fn destroy_pass(&mut self, pass: PassHandle) {
        let entry = self.passes.remove(SlotId(pass.index()));
        unsafe { self.context.device.destroy_render_pass(entry.pass, None) };
    }

    fn create_framebuffer(
        &mut self,
        pass: PassHandle,
        desc: &FramebufferDesc,
    ) -> crate::error::Result<FramebufferHandle> {
        let render_pass = self.passes.get(SlotId(pass.index())).pass;
        let mut views: SmallVec<[vk::ImageView; 5]> = SmallVec::new();
        for texture in &desc.color {
            views.push(self.view_of(*texture));
        }
        if let Some(depth) = desc.depth {
            views.push(self.view_of(depth));
        }

        let info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&views)
            .width(desc.extent.width)
            .height(desc.extent.height)
            .layers(1);
        let framebuffer = unsafe {
            self.device()
                .create_framebuffer(&info, None)
                .map_err(VulkanError::from)?
        };
        Ok(FramebufferHandle::new(0, self.framebuffers.insert(framebuffer).0))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        let fb = self.framebuffers.remove(SlotId(framebuffer.index()));
        unsafe { self.context.device.destroy_framebuffer(fb, None) };
    }

    fn create_pipeline(
        &mut self,
        desc: &PipelineDesc,
        pass: Option<PassHandle>,
        shader_code: &[&[u32]],
    ) -> crate::error::Result<PipelineHandle> {
        let device = &self.context.device;

        let mut set_layouts = Vec::with_capacity(desc.binding_sets.len());
        for set in &desc.binding_sets {
            let bindings: Vec<vk::DescriptorSetLayoutBinding> = set
                .entries
                .iter()
                .enumerate()
                .map(|(index, entry)| {
                    vk::DescriptorSetLayoutBinding::default()
                        .binding(index as u32)
                        .descriptor_type(vk_descriptor_type(*entry))
                        .descriptor_count(1)
                        .stage_flags(vk::ShaderStageFlags::ALL)
                })
                .collect();
            let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            let layout = unsafe {
                device
                    .create_descriptor_set_layout(&info, None)
                    .map_err(VulkanError::from)?
            };
            set_layouts.push(layout);
        }

        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::from)?
        };

        let mut modules: SmallVec<[vk::ShaderModule; 2]> = SmallVec::new();
        for code in shader_code {
            let info = vk::ShaderModuleCreateInfo::default().code(code);
            modules.push(unsafe {
                device
                    .create_shader_module(&info, None)
                    .map_err(VulkanError::from)?
            });
        }

        let pipeline = match pass {
            None => {
                // Compute: the single module is the compute stage.
                let stage = vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::COMPUTE)
                    .module(modules[0])
                    .name(c"main");
                let info = vk::ComputePipelineCreateInfo::default()
                    .stage(stage)
                    .layout(layout);
                unsafe {
                    device
                        .create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
                        .map_err(|(_, e)| VulkanError::from(e))?[0]
                }
            }
            Some(pass) => {
                let pass_entry = self.passes.get(SlotId(pass.index()));

                let mut stages: SmallVec<[vk::PipelineShaderStageCreateInfo; 2]> =
                    SmallVec::new();
                stages.push(
                    vk::PipelineShaderStageCreateInfo::default()
                        .stage(vk::ShaderStageFlags::VERTEX)
                        .module(modules[0])
                        .name(c"main"),
                );
                if modules.len() > 1 {
                    stages.push(
                        vk::PipelineShaderStageCreateInfo::default()
                            .stage(vk::ShaderStageFlags::FRAGMENT)
                            .module(modules[1])
                            .name(c"main"),
                    );
                }

                let vertex_bindings = [vk::VertexInputBindingDescription {
                    binding: 0,
                    stride: desc.vertex_stride,
                    input_rate: vk::VertexInputRate::VERTEX,
                }];
                let mut vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
                if desc.vertex_stride > 0 {
                    vertex_input = vertex_input.vertex_binding_descriptions(&vertex_bindings);
                }

                let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
                    .topology(match desc.topology {
                        Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
                        Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
                        Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
                    });

                let viewport_state = vk::PipelineViewportStateCreateInfo::default()
                    .viewport_count(1)
                    .scissor_count(1);

                let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
                    .polygon_mode(vk::PolygonMode::FILL)
                    .cull_mode(vk::CullModeFlags::NONE)
                    .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
                    .line_width(1.0);

                let multisample = vk::PipelineMultisampleStateCreateInfo::default()
                    .rasterization_samples(vk::SampleCountFlags::TYPE_1);

                let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
                    .depth_test_enable(desc.depth_test)
                    .depth_write_enable(desc.depth_test)
                    .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

                let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = (0
                    ..pass_entry.color_count)
                    .map(|_| {
                        vk::PipelineColorBlendAttachmentState::default()
                            .color_write_mask(vk::ColorComponentFlags::RGBA)
                    })
                    .collect();
                let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
                    .attachments(&blend_attachments);

                let dynamic_states =
                    [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
                let dynamic =
                    vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

                let info = vk::GraphicsPipelineCreateInfo::default()
                    .stages(&stages)
                    .vertex_input_state(&vertex_input)
                    .input_assembly_state(&input_assembly)
                    .viewport_state(&viewport_state)
                    .rasterization_state(&rasterization)
                    .multisample_state(&multisample)
                    .depth_stencil_state(&depth_stencil)
                    .color_blend_state(&color_blend)
                    .dynamic_state(&dynamic)
                    .layout(layout)
                    .render_pass(pass_entry.pass)
                    .subpass(0);
                unsafe {
                    device
                        .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
                        .map_err(|(_, e)| VulkanError::from(e))?[0]
                }
            }
        };

        for module in modules {
            unsafe { device.destroy_shader_module(module, None) };
        }

        let id = self.pipelines.insert(VkPipeline {
            pipeline,
            layout,
            set_layouts,
            bindings: desc.binding_sets.clone(),
            bind_point: if pass.is_none() {
                vk::PipelineBindPoint::COMPUTE
            } else {
                vk::PipelineBindPoint::GRAPHICS
            },
        });
        Ok(PipelineHandle::new(0, id.0))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        let entry = self.pipelines.remove(SlotId(pipeline.index()));
        unsafe {
            self.context.device.destroy_pipeline(entry.pipeline, None);
            self.context.device.destroy_pipeline_layout(entry.layout, None);
            for layout in entry.set_layouts {
                self.context.device.destroy_descriptor_set_layout(layout, None);
            }
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> crate::error::Result<SamplerHandle> {
        let filter = |f: crate::gpu::Filter| match f {
            crate::gpu::Filter::Nearest => vk::Filter::NEAREST,
            crate::gpu::Filter::Linear => vk::Filter::LINEAR,
        };
        let address = match desc.address_mode {
            crate::gpu::AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
            crate::gpu::AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        };
        let info = vk::SamplerCreateInfo::default()
            .min_filter(filter(desc.min_filter))
            .mag_filter(filter(desc.mag_filter))
            .address_mode_u(address)
            .address_mode_v(address)
            .address_mode_w(address);
        let sampler = unsafe {
            self.device()
                .create_sampler(&info, None)
                .map_err(VulkanError::from)?
        };
        Ok(SamplerHandle::new(0, self.samplers.insert(sampler).0))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        let vk_sampler = self.samplers.remove(SlotId(sampler.index()));
        unsafe { self.context.device.destroy_sampler(vk_sampler, None) };
    }

    fn memory_types(&self) -> &[MemoryTypeInfo] {
        &self.memory_types
    }

    fn allocate_memory(&mut self, type_index: u32, size: u64) -> crate::error::Result<MemoryHandle> {
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(type_index);
        let memory = unsafe {
            self.device()
                .allocate_memory(&info, None)
                .map_err(VulkanError::from)?
        };
        Ok(MemoryHandle::new(0, self.memories.insert(memory).0))
    }

    fn free_memory(&mut self, memory: MemoryHandle) {
        let vk_memory = self.memories.remove(SlotId(memory.index()));
        unsafe { self.context.device.free_memory(vk_memory, None) };
    }

    fn map_memory(&mut self, memory: MemoryHandle) -> crate::error::Result<NonNull<u8>> {
        let vk_memory = *self.memories.get(SlotId(memory.index()));
        let ptr = unsafe {
            self.context
                .device
                .map_memory(vk_memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::from)?
        };
        NonNull::new(ptr as *mut u8)
            .ok_or_else(|| VulkanError::Other("map_memory returned null".into()).into())
    }

    fn create_fence(&mut self, signaled: bool) -> FenceHandle {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe {
            self.device()
                .create_fence(&info, None)
                .expect("fence creation failed")
        };
        FenceHandle::new(0, self.fences.insert(fence).0)
    }

    fn wait_fence(&mut self, fence: FenceHandle) {
        let vk_fence = *self.fences.get(SlotId(fence.index()));
        unsafe {
            self.context
                .device
                .wait_for_fences(&[vk_fence], true, u64::MAX)
                .expect("fence wait failed");
        }
    }

    fn fence_signaled(&mut self, fence: FenceHandle) -> bool {
        let vk_fence = *self.fences.get(SlotId(fence.index()));
        unsafe {
            self.context
                .device
                .get_fence_status(vk_fence)
                .expect("fence status query failed")
        }
    }

    fn reset_fence(&mut self, fence: FenceHandle) {
        let vk_fence = *self.fences.get(SlotId(fence.index()));
        unsafe {
            self.context
                .device
                .reset_fences(&[vk_fence])
                .expect("fence reset failed");
        }
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        let vk_fence = self.fences.remove(SlotId(fence.index()));
        unsafe { self.context.device.destroy_fence(vk_fence, None) };
    }

    fn create_semaphore(&mut self) -> SemaphoreHandle {
        let info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe {
            self.device()
                .create_semaphore(&info, None)
                .expect("semaphore creation failed")
        };
        SemaphoreHandle::new(0, self.semaphores.insert(semaphore).0)
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        let vk_semaphore = self.semaphores.remove(SlotId(semaphore.index()));
        unsafe { self.context.device.destroy_semaphore(vk_semaphore, None) };
    }

    fn create_command_buffer(&mut self) -> CommandBufferHandle {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe {
            self.device()
                .allocate_command_buffers(&info)
                .expect("command buffer allocation failed")[0]
        };
        CommandBufferHandle::new(0, self.cmds.insert(cmd).0)
    }

    fn destroy_command_buffer(&mut self, cmd: CommandBufferHandle) {
        let vk_cmd = self.cmds.remove(SlotId(cmd.index()));
        unsafe {
            self.context
                .device
                .free_command_buffers(self.command_pool, &[vk_cmd]);
        }
    }

    fn begin_commands(&mut self, cmd: CommandBufferHandle) {
        let vk_cmd = *self.cmds.get(SlotId(cmd.index()));
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.context
                .device
                .begin_command_buffer(vk_cmd, &info)
                .expect("command buffer begin failed");
        }
    }

    fn end_commands(&mut self, cmd: CommandBufferHandle) {
        let vk_cmd = *self.cmds.get(SlotId(cmd.index()));
        unsafe {
            self.context
                .device
                .end_command_buffer(vk_cmd)
                .expect("command buffer end failed");
        }
    }

    fn cmd_begin_pass(
        &mut self,
        cmd: CommandBufferHandle,
        pass: PassHandle,
        framebuffer: FramebufferHandle,
        extent: Extent2d,
        clears: ClearValues,
    ) {
        let vk_cmd = *self.cmds.get(SlotId(cmd.index()));
        let pass_entry = self.passes.get(SlotId(pass.index()));
        let vk_framebuffer = *self.framebuffers.get(SlotId(framebuffer.index()));

        let mut clear_values: SmallVec<[vk::ClearValue; 5]> = SmallVec::new();
        for _ in 0..pass_entry.color_count {
            clear_values.push(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clears.color,
                },
            });
        }
        if pass_entry.has_depth {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: clears.depth,
                    stencil: 0,
                },
            });
        }

        let area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: extent.width,
                height: extent.height,
            },
        };
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(pass_entry.pass)
            .framebuffer(vk_framebuffer)
            .render_area(area)
            .clear_values(&clear_values);
        unsafe {
            self.context
                .device
                .cmd_begin_render_pass(vk_cmd, &info, vk::SubpassContents::INLINE);
            self.context.device.cmd_set_viewport(
                vk_cmd,
                0,
                &[vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: extent.width as f32,
                    height: extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
            self.context.device.cmd_set_scissor(vk_cmd, 0, &[area]);
        }
    }

    fn cmd_end_pass(&mut self, cmd: CommandBufferHandle) {
        let vk_cmd = *self.cmds.get(SlotId(cmd.index()));
        unsafe { self.context.device.cmd_end_render_pass(vk_cmd) };
    }

    fn cmd_bind_pipeline(&mut self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        let vk_cmd = *self.cmds.get(SlotId(cmd.index()));
        let entry = self.pipelines.get(SlotId(pipeline.index()));
        unsafe {
            self.context
                .device
                .cmd_bind_pipeline(vk_cmd, entry.bind_point, entry.pipeline);
        }
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: CommandBufferHandle,
        pipeline: PipelineHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    ) {
        let vk_cmd = *self.cmds.get(SlotId(cmd.index()));
        let entry = self.pipelines.get(SlotId(pipeline.index()));
        let (layout, bind_point) = (entry.layout, entry.bind_point);
        let vk_set = self.sets.get(SlotId(set.index())).set;
        unsafe {
            self.context.device.cmd_bind_descriptor_sets(
                vk_cmd,
                bind_point,
                layout,
                set_index,
                &[vk_set],
                &[],
            );
        }
    }

    fn cmd_bind_vertex_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
    ) {
        let vk_cmd = *self.cmds.get(SlotId(cmd.index()));
        let vk_buffer = *self.buffers.get(SlotId(buffer.index()));
        unsafe {
            self.context
                .device
                .cmd_bind_vertex_buffers(vk_cmd, 0, &[vk_buffer], &[offset]);
        }
    }

    fn cmd_draw(&mut self, cmd: CommandBufferHandle, vertex_count: u32, instance_count: u32) {
        let vk_cmd = *self.cmds.get(SlotId(cmd.index()));
        unsafe {
            self.context
                .device
                .cmd_draw(vk_cmd, vertex_count, instance_count, 0, 0);
        }
    }

    fn cmd_dispatch(&mut self, cmd: CommandBufferHandle, x: u32, y: u32, z: u32) {
        let vk_cmd = *self.cmds.get(SlotId(cmd.index()));
        unsafe { self.context.device.cmd_dispatch(vk_cmd, x, y, z) };
    }

    fn cmd_copy_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) {
        let vk_cmd = *self.cmds.get(SlotId(cmd.index()));
        let vk_src = *self.buffers.get(SlotId(src.index()));
        let vk_dst = *self.buffers.get(SlotId(dst.index()));
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            self.context
                .device
                .cmd_copy_buffer(vk_cmd, vk_src, vk_dst, &[region]);
        }
    }

    fn submit(
        &mut self,
        cmd: CommandBufferHandle,
        waits: &[SemaphoreHandle],
        signals: &[SemaphoreHandle],
        fence: Option<FenceHandle>,
    ) {
        let vk_cmd = [*self.cmds.get(SlotId(cmd.index()))];
        let wait_vk: SmallVec<[vk::Semaphore; 8]> = waits
            .iter()
            .map(|s| *self.semaphores.get(SlotId(s.index())))
            .collect();
        let signal_vk: SmallVec<[vk::Semaphore; 8]> = signals
            .iter()
            .map(|s| *self.semaphores.get(SlotId(s.index())))
            .collect();
        let stages: SmallVec<[vk::PipelineStageFlags; 8]> =
            waits.iter().map(|_| vk::PipelineStageFlags::ALL_COMMANDS).collect();
        let vk_fence = fence.map_or(vk::Fence::null(), |f| *self.fences.get(SlotId(f.index())));

        let info = vk::SubmitInfo::default()
            .command_buffers(&vk_cmd)
            .wait_semaphores(&wait_vk)
            .wait_dst_stage_mask(&stages)
            .signal_semaphores(&signal_vk);
        unsafe {
            self.context
                .device
                .queue_submit(self.context.graphics_queue, &[info], vk_fence)
                .expect("queue submit failed");
        }
    }

    fn swapchain_image_count(&self) -> u32 {
        IMAGE_RING
    }

    fn acquire_image(&mut self, ready: SemaphoreHandle) -> crate::error::Result<u32> {
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % IMAGE_RING;
        // Headless: the image is ready immediately; signal through an empty
        // batch so downstream waits see a real semaphore operation.
        self.empty_submit(&[], &[ready]);
        Ok(image)
    }

    fn present(&mut self, _image: u32, waits: &[SemaphoreHandle]) -> crate::error::Result<()> {
        self.empty_submit(waits, &[]);
        Ok(())
    }

    fn create_descriptor_pool(
        &mut self,
        capacity: u32,
    ) -> crate::error::Result<DescriptorPoolHandle> {
        let sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: capacity,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: capacity,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: capacity,
            },
        ];
        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(capacity)
            .pool_sizes(&sizes);
        let pool = unsafe {
            self.device()
                .create_descriptor_pool(&info, None)
                .map_err(VulkanError::from)?
        };
        Ok(DescriptorPoolHandle::new(0, self.pools.insert(pool).0))
    }

    fn reset_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        let pool_id = SlotId(pool.index());
        let vk_pool = *self.pools.get(pool_id);
        unsafe {
            self.context
                .device
                .reset_descriptor_pool(vk_pool, vk::DescriptorPoolResetFlags::empty())
                .expect("descriptor pool reset failed");
        }
        self.retire_sets_of(pool_id);
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        let pool_id = SlotId(pool.index());
        let vk_pool = self.pools.remove(pool_id);
        unsafe { self.context.device.destroy_descriptor_pool(vk_pool, None) };
        self.retire_sets_of(pool_id);
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        pipeline: PipelineHandle,
        set_index: u32,
    ) -> Option<DescriptorSetHandle> {
        let vk_pool = *self.pools.get(SlotId(pool.index()));
        let entry = self.pipelines.get(SlotId(pipeline.index()));
        let layouts = [entry.set_layouts[set_index as usize]];
        let binding_layout = entry.bindings[set_index as usize].clone();

        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(vk_pool)
            .set_layouts(&layouts);
        let set = match unsafe { self.context.device.allocate_descriptor_sets(&info) } {
            Ok(sets) => sets[0],
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                return None
            }
            Err(e) => panic!("descriptor set allocation failed: {:?}", e),
        };
        let id = self.sets.insert(VkSet {
            set,
            pool: SlotId(pool.index()),
            layout: binding_layout,
        });
        Some(DescriptorSetHandle::new(0, id.0))
    }

    fn update_descriptor_set(&mut self, set: DescriptorSetHandle, bindings: &[ResolvedBinding]) {
        let entry = self.sets.get(SlotId(set.index()));
        let vk_set = entry.set;
        let layout = entry.layout.clone();

        let mut image_infos: SmallVec<[vk::DescriptorImageInfo; 8]> = SmallVec::new();
        let mut buffer_infos: SmallVec<[vk::DescriptorBufferInfo; 8]> = SmallVec::new();
        for binding in bindings {
            match binding {
                ResolvedBinding::Texture {
                    texture, sampler, ..
                } => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: *self.samplers.get(SlotId(sampler.index())),
                        image_view: self.view_of(*texture),
                        image_layout: vk::ImageLayout::GENERAL,
                    });
                }
                ResolvedBinding::Buffer {
                    buffer,
                    offset,
                    size,
                    ..
                } => {
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer: *self.buffers.get(SlotId(buffer.index())),
                        offset: *offset,
                        range: *size,
                    });
                }
            }
        }

        let mut writes: SmallVec<[vk::WriteDescriptorSet; 8]> = SmallVec::new();
        let mut image_cursor = 0;
        let mut buffer_cursor = 0;
        for binding in bindings {
            match binding {
                ResolvedBinding::Texture { binding, .. } => {
                    writes.push(
                        vk::WriteDescriptorSet::default()
                            .dst_set(vk_set)
                            .dst_binding(*binding)
                            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                            .image_info(&image_infos[image_cursor..image_cursor + 1]),
                    );
                    image_cursor += 1;
                }
                ResolvedBinding::Buffer { binding, .. } => {
                    let ty = vk_descriptor_type(layout.entries[*binding as usize]);
                    writes.push(
                        vk::WriteDescriptorSet::default()
                            .dst_set(vk_set)
                            .dst_binding(*binding)
                            .descriptor_type(ty)
                            .buffer_info(&buffer_infos[buffer_cursor..buffer_cursor + 1]),
                    );
                    buffer_cursor += 1;
                }
            }
        }

        unsafe { self.context.device.update_descriptor_sets(&writes, &[]) };
    }

    fn wait_idle(&mut self) {
        unsafe {
            self.context
                .device
                .device_wait_idle()
                .expect("device wait idle failed");
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.context.device.device_wait_idle();
            self.context
                .device
                .destroy_command_pool(self.command_pool, None);
        }
        self.context.destroy();
    }
}
