//! The render backend trait.
//!
//! One concrete backend implements this per graphics API (Vulkan behind the
//! `vulkan` feature; a recording [`mock`](crate::gpu::mock) for tests).
//! Backend selection is compile-time polymorphism: the renderer is generic
//! over `B: RenderBackend`, there is no runtime plugin loading and no global
//! interface table.
//!
//! Contract notes shared by all implementations:
//!
//! - handles are only valid on the backend that issued them;
//! - destroying an object that is still referenced by in-flight GPU work is
//!   the caller's bug — the frame manager's deferred-destruction lists exist
//!   to prevent exactly that;
//! - `wait_fence` blocks unboundedly; driver timeouts are the platform's
//!   concern.

use super::{
    BufferDesc, BufferHandle, ClearValues, CommandBufferHandle, DescriptorPoolHandle,
    DescriptorSetHandle, Extent2d, FenceHandle, FramebufferDesc, FramebufferHandle,
    MemoryHandle, MemoryRequirements, MemoryTypeInfo, PassDesc, PassHandle, PipelineDesc,
    PipelineHandle, ResolvedBinding, SamplerDesc, SamplerHandle, SemaphoreHandle, TextureDesc,
    TextureHandle,
};
use crate::error::Result;
use std::ptr::NonNull;

/// A graphics backend: object lifecycle, memory, synchronization, command
/// recording, and presentation.
pub trait RenderBackend {
    // --- resources ---

    /// Create a texture. Memory is bound separately.
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle>;
    /// Query a texture's memory requirements.
    fn texture_requirements(&mut self, texture: TextureHandle) -> MemoryRequirements;
    /// Bind device memory to a texture.
    fn bind_texture_memory(
        &mut self,
        texture: TextureHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> Result<()>;
    /// Destroy a texture.
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Create a buffer. Memory is bound separately.
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle>;
    /// Query a buffer's memory requirements.
    fn buffer_requirements(&mut self, buffer: BufferHandle) -> MemoryRequirements;
    /// Bind device memory to a buffer.
    fn bind_buffer_memory(
        &mut self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> Result<()>;
    /// Destroy a buffer.
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Create a render pass.
    fn create_pass(&mut self, desc: &PassDesc) -> Result<PassHandle>;
    /// Destroy a render pass.
    fn destroy_pass(&mut self, pass: PassHandle);

    /// Create a framebuffer over already-resolved attachments.
    fn create_framebuffer(
        &mut self,
        pass: PassHandle,
        desc: &FramebufferDesc,
    ) -> Result<FramebufferHandle>;
    /// Destroy a framebuffer.
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    /// Create a pipeline. `shader_code` carries the bytecode for the hashes
    /// named in the descriptor, in (shader, fragment_shader) order.
    fn create_pipeline(
        &mut self,
        desc: &PipelineDesc,
        pass: Option<PassHandle>,
        shader_code: &[&[u32]],
    ) -> Result<PipelineHandle>;
    /// Destroy a pipeline.
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    /// Create a sampler.
    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerHandle>;
    /// Destroy a sampler.
    fn destroy_sampler(&mut self, sampler: SamplerHandle);

    // --- memory ---

    /// Properties of each device memory type, index order.
    fn memory_types(&self) -> &[MemoryTypeInfo];
    /// Allocate one native chunk of device memory.
    fn allocate_memory(&mut self, type_index: u32, size: u64) -> Result<MemoryHandle>;
    /// Free a native chunk.
    fn free_memory(&mut self, memory: MemoryHandle);
    /// Persistently map a host-visible chunk.
    fn map_memory(&mut self, memory: MemoryHandle) -> Result<NonNull<u8>>;

    // --- synchronization ---

    /// Create a fence, optionally pre-signaled.
    fn create_fence(&mut self, signaled: bool) -> FenceHandle;
    /// Block until the fence signals. Unbounded.
    fn wait_fence(&mut self, fence: FenceHandle);
    /// Non-blocking signal check.
    fn fence_signaled(&mut self, fence: FenceHandle) -> bool;
    /// Return a fence to the unsignaled state.
    fn reset_fence(&mut self, fence: FenceHandle);
    /// Destroy a fence.
    fn destroy_fence(&mut self, fence: FenceHandle);

    /// Create a semaphore.
    fn create_semaphore(&mut self) -> SemaphoreHandle;
    /// Destroy a semaphore.
    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle);

    // --- commands ---

    /// Create a command buffer ready for recording.
    fn create_command_buffer(&mut self) -> CommandBufferHandle;
    /// Destroy a command buffer.
    fn destroy_command_buffer(&mut self, cmd: CommandBufferHandle);
    /// Begin recording.
    fn begin_commands(&mut self, cmd: CommandBufferHandle);
    /// End recording.
    fn end_commands(&mut self, cmd: CommandBufferHandle);

    /// Begin a render pass instance.
    fn cmd_begin_pass(
        &mut self,
        cmd: CommandBufferHandle,
        pass: PassHandle,
        framebuffer: FramebufferHandle,
        extent: Extent2d,
        clears: ClearValues,
    );
    /// End the current render pass instance.
    fn cmd_end_pass(&mut self, cmd: CommandBufferHandle);
    /// Bind a pipeline.
    fn cmd_bind_pipeline(&mut self, cmd: CommandBufferHandle, pipeline: PipelineHandle);
    /// Bind a descriptor set at a set index.
    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: CommandBufferHandle,
        pipeline: PipelineHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    );
    /// Bind a vertex buffer at binding 0.
    fn cmd_bind_vertex_buffer(&mut self, cmd: CommandBufferHandle, buffer: BufferHandle, offset: u64);
    /// Non-indexed draw.
    fn cmd_draw(&mut self, cmd: CommandBufferHandle, vertex_count: u32, instance_count: u32);
    /// Compute dispatch. Must be recorded outside a render pass.
    fn cmd_dispatch(&mut self, cmd: CommandBufferHandle, x: u32, y: u32, z: u32);
    /// Buffer-to-buffer copy.
    fn cmd_copy_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    );

    /// Submit one command buffer to the graphics queue.
    fn submit(
        &mut self,
        cmd: CommandBufferHandle,
        waits: &[SemaphoreHandle],
        signals: &[SemaphoreHandle],
        fence: Option<FenceHandle>,
    );

    // --- swap chain ---

    /// Number of presentable images.
    fn swapchain_image_count(&self) -> u32;
    /// Acquire the next presentable image, signaling `ready` when usable.
    fn acquire_image(&mut self, ready: SemaphoreHandle) -> Result<u32>;
    /// Present an acquired image after `waits` signal.
    fn present(&mut self, image: u32, waits: &[SemaphoreHandle]) -> Result<()>;

    // --- descriptors ---

    /// Create a descriptor pool holding `capacity` sets.
    fn create_descriptor_pool(&mut self, capacity: u32) -> Result<DescriptorPoolHandle>;
    /// Bulk-free every set allocated from a pool.
    fn reset_descriptor_pool(&mut self, pool: DescriptorPoolHandle);
    /// Destroy a descriptor pool.
    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle);
    /// Allocate one set of `pipeline`'s layout at `set_index` from `pool`.
    ///
    /// Returns `None` when the pool is exhausted — the one recoverable
    /// allocation failure in the system; the caller rotates to another pool.
    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        pipeline: PipelineHandle,
        set_index: u32,
    ) -> Option<DescriptorSetHandle>;
    /// Point a set's bindings at concrete resources.
    fn update_descriptor_set(&mut self, set: DescriptorSetHandle, bindings: &[ResolvedBinding]);

    /// Block until the device is idle. Teardown only.
    fn wait_idle(&mut self);
}
