//! Recording backend for tests.
//!
//! `MockBackend` implements [`RenderBackend`] without touching a GPU. It
//! tracks the liveness of every handle it issues (double-destroy and
//! use-after-destroy are assertion failures), records submissions, presents,
//! and per-command-buffer command streams for inspection, and models fences
//! as free-running timers: a fence attached to a submission signals
//! [`fence_delay`](MockBackend::fence_delay) ticks later, and `wait_fence`
//! fast-forwards the clock the way a real blocking wait rides out the GPU.
//!
//! Host-visible mock memory is real heap memory, so scratch-buffer writes
//! land somewhere inspectable.

use super::traits::RenderBackend;
use super::{
    BufferDesc, BufferHandle, ClearValues, CommandBufferHandle, DescriptorPoolHandle,
    DescriptorSetHandle, Extent2d, FenceHandle, FramebufferDesc, FramebufferHandle, HandleKind,
    MemoryHandle, MemoryRequirements, MemoryTypeInfo, PassDesc, PassHandle, PipelineDesc,
    PipelineHandle, ResolvedBinding, SamplerDesc, SamplerHandle, SemaphoreHandle, TextureDesc,
    TextureHandle,
};
use crate::error::Result;
use std::ptr::NonNull;

/// Observable backend events, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    /// `wait_fence` was called (and the clock free-ran to the signal).
    WaitFence(FenceHandle),
    /// A command buffer was destroyed.
    DestroyCommandBuffer(CommandBufferHandle),
    /// A descriptor pool was bulk-reset.
    ResetDescriptorPool(DescriptorPoolHandle),
    /// An image was acquired.
    AcquireImage(u32),
    /// An image was presented.
    Present(u32),
    /// A texture was destroyed.
    DestroyTexture(TextureHandle),
    /// A buffer was destroyed.
    DestroyBuffer(BufferHandle),
    /// A native memory chunk was freed.
    FreeMemory(MemoryHandle),
}

/// One recorded queue submission.
#[derive(Debug, Clone)]
pub struct SubmitRecord {
    /// The submitted command buffer.
    pub cmd: CommandBufferHandle,
    /// Semaphores waited on.
    pub waits: Vec<SemaphoreHandle>,
    /// Semaphores signaled.
    pub signals: Vec<SemaphoreHandle>,
    /// Completion fence, if any.
    pub fence: Option<FenceHandle>,
}

/// One recorded present.
#[derive(Debug, Clone)]
pub struct PresentRecord {
    /// Presented image index.
    pub image: u32,
    /// Semaphores waited on before presenting.
    pub waits: Vec<SemaphoreHandle>,
}

/// One command recorded into a mock command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// Pass begin.
    BeginPass(PassHandle, FramebufferHandle),
    /// Pass end.
    EndPass,
    /// Pipeline bind.
    BindPipeline(PipelineHandle),
    /// Descriptor set bind.
    BindDescriptorSet(PipelineHandle, u32, DescriptorSetHandle),
    /// Vertex buffer bind.
    BindVertexBuffer(BufferHandle, u64),
    /// Draw.
    Draw(u32, u32),
    /// Dispatch.
    Dispatch(u32, u32, u32),
    /// Buffer copy.
    CopyBuffer(BufferHandle, u64, BufferHandle, u64, u64),
}

#[derive(Debug, Default)]
struct Liveness {
    alive: Vec<bool>,
}

impl Liveness {
    fn create(&mut self) -> u32 {
        self.alive.push(true);
        (self.alive.len() - 1) as u32
    }

    fn assert_alive(&self, kind: HandleKind, index: u32) {
        assert!(
            self.alive.get(index as usize).copied() == Some(true),
            "{:?} handle {} is not alive",
            kind,
            index
        );
    }

    fn destroy(&mut self, kind: HandleKind, index: u32) {
        self.assert_alive(kind, index);
        self.alive[index as usize] = false;
    }

    fn live_count(&self) -> usize {
        self.alive.iter().filter(|a| **a).count()
    }
}

#[derive(Debug)]
struct MockMemory {
    alive: bool,
    size: u64,
    /// Real storage so host-visible mappings are writable.
    data: Box<[u8]>,
}

#[derive(Debug)]
struct MockFence {
    alive: bool,
    signaled: bool,
    /// Clock tick at which a pending submission signals this fence.
    signals_at: Option<u64>,
}

#[derive(Debug)]
struct MockPool {
    alive: bool,
    capacity: u32,
    allocated: u32,
}

#[derive(Debug, Default)]
struct MockCommandBuffer {
    alive: bool,
    recording: bool,
    in_pass: bool,
    commands: Vec<RecordedCommand>,
}

/// Test backend. See module docs.
pub struct MockBackend {
    /// Ticks between a fenced submission and its fence signaling.
    pub fence_delay: u64,
    time: u64,

    textures: Liveness,
    buffers: Liveness,
    passes: Liveness,
    framebuffers: Liveness,
    pipelines: Liveness,
    samplers: Liveness,
    semaphores: Liveness,
    sets: Liveness,

    memories: Vec<MockMemory>,
    fences: Vec<MockFence>,
    pools: Vec<MockPool>,
    cmds: Vec<MockCommandBuffer>,

    memory_types: Vec<MemoryTypeInfo>,
    /// Buffer sizes by handle index, for requirement queries.
    buffer_sizes: Vec<u64>,
    texture_sizes: Vec<u64>,

    swapchain_images: u32,
    next_image: u32,

    /// Every submission, in order.
    pub submits: Vec<SubmitRecord>,
    /// Every present, in order.
    pub presents: Vec<PresentRecord>,
    /// Ordered observable events.
    pub events: Vec<MockEvent>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a mock with 3 swap-chain images and a fence delay of 1 tick.
    pub fn new() -> Self {
        Self {
            fence_delay: 1,
            time: 0,
            textures: Liveness::default(),
            buffers: Liveness::default(),
            passes: Liveness::default(),
            framebuffers: Liveness::default(),
            pipelines: Liveness::default(),
            samplers: Liveness::default(),
            semaphores: Liveness::default(),
            sets: Liveness::default(),
            memories: Vec::new(),
            fences: Vec::new(),
            pools: Vec::new(),
            cmds: Vec::new(),
            memory_types: vec![
                MemoryTypeInfo {
                    device_local: true,
                    host_visible: false,
                },
                MemoryTypeInfo {
                    device_local: false,
                    host_visible: true,
                },
            ],
            buffer_sizes: Vec::new(),
            texture_sizes: Vec::new(),
            swapchain_images: 3,
            next_image: 0,
            submits: Vec::new(),
            presents: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Override the number of presentable images.
    pub fn with_swapchain_images(mut self, count: u32) -> Self {
        self.swapchain_images = count;
        self
    }

    /// Advance the mock clock, letting pending fences free-run to signaled.
    pub fn tick(&mut self) {
        self.time += 1;
        for fence in &mut self.fences {
            if let Some(at) = fence.signals_at {
                if self.time >= at {
                    fence.signaled = true;
                    fence.signals_at = None;
                }
            }
        }
    }

    /// Live objects of every kind, for leak assertions.
    pub fn live_objects(&self) -> usize {
        self.textures.live_count()
            + self.buffers.live_count()
            + self.passes.live_count()
            + self.framebuffers.live_count()
            + self.pipelines.live_count()
            + self.samplers.live_count()
            + self.memories.iter().filter(|m| m.alive).count()
    }

    /// Live texture count.
    pub fn live_textures(&self) -> usize {
        self.textures.live_count()
    }

    /// Live pass count.
    pub fn live_passes(&self) -> usize {
        self.passes.live_count()
    }

    /// Live native memory chunks.
    pub fn live_memory_chunks(&self) -> usize {
        self.memories.iter().filter(|m| m.alive).count()
    }

    /// Recorded commands of a command buffer (alive or destroyed).
    pub fn commands_of(&self, cmd: CommandBufferHandle) -> &[RecordedCommand] {
        &self.cmds[cmd.index() as usize].commands
    }

    /// Contents of a mapped host-visible chunk, for upload assertions.
    pub fn memory_bytes(&self, memory: MemoryHandle) -> &[u8] {
        let m = &self.memories[memory.index() as usize];
        assert!(m.alive, "memory {} is not alive", memory.index());
        &m.data
    }

    fn fence_mut(&mut self, fence: FenceHandle) -> &mut MockFence {
        let f = &mut self.fences[fence.index() as usize];
        assert!(f.alive, "fence {} is not alive", fence.index());
        f
    }

    fn record(&mut self, cmd: CommandBufferHandle, command: RecordedCommand) {
        let c = &mut self.cmds[cmd.index() as usize];
        assert!(c.alive && c.recording, "recording into a closed command buffer");
        c.commands.push(command);
    }
}

impl RenderBackend for MockBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        let index = self.textures.create();
        let size = desc.extent.width as u64 * desc.extent.height as u64 * 4;
        self.texture_sizes.push(size.max(1));
        Ok(TextureHandle::new(0, index))
    }

    fn texture_requirements(&mut self, texture: TextureHandle) -> MemoryRequirements {
        self.textures.assert_alive(HandleKind::Texture, texture.index());
        MemoryRequirements {
            size: self.texture_sizes[texture.index() as usize],
            alignment: 256,
            type_bits: 0b01,
        }
    }

    fn bind_texture_memory(
        &mut self,
        texture: TextureHandle,
        memory: MemoryHandle,
        _offset: u64,
    ) -> Result<()> {
        self.textures.assert_alive(HandleKind::Texture, texture.index());
        assert!(self.memories[memory.index() as usize].alive);
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.destroy(HandleKind::Texture, texture.index());
        self.events.push(MockEvent::DestroyTexture(texture));
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        let index = self.buffers.create();
        self.buffer_sizes.push(desc.size);
        Ok(BufferHandle::new(0, index))
    }

    fn buffer_requirements(&mut self, buffer: BufferHandle) -> MemoryRequirements {
        self.buffers.assert_alive(HandleKind::Buffer, buffer.index());
        MemoryRequirements {
            size: self.buffer_sizes[buffer.index() as usize],
            alignment: 64,
            type_bits: 0b11,
        }
    }

    fn bind_buffer_memory(
        &mut self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        _offset: u64,
    ) -> Result<()> {
        self.buffers.assert_alive(HandleKind::Buffer, buffer.index());
        assert!(self.memories[memory.index() as usize].alive);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.destroy(HandleKind::Buffer, buffer.index());
        self.events.push(MockEvent::DestroyBuffer(buffer));
    }

    fn create_pass(&mut self, _desc: &PassDesc) -> Result<PassHandle> {
        Ok(PassHandle::new(0, self.passes.create()))
    }

    fn destroy_pass(&mut self, pass: PassHandle) {
        self.passes.destroy(HandleKind::Pass, pass.index());
    }

    fn create_framebuffer(
        &mut self,
        pass: PassHandle,
        desc: &FramebufferDesc,
    ) -> Result<FramebufferHandle> {
        self.passes.assert_alive(HandleKind::Pass, pass.index());
        for texture in &desc.color {
            self.textures.assert_alive(HandleKind::Texture, texture.index());
        }
        if let Some(depth) = desc.depth {
            self.textures.assert_alive(HandleKind::Texture, depth.index());
        }
        Ok(FramebufferHandle::new(0, self.framebuffers.create()))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers
            .destroy(HandleKind::Framebuffer, framebuffer.index());
    }

    fn create_pipeline(
        &mut self,
        _desc: &PipelineDesc,
        pass: Option<PassHandle>,
        _shader_code: &[&[u32]],
    ) -> Result<PipelineHandle> {
        if let Some(pass) = pass {
            self.passes.assert_alive(HandleKind::Pass, pass.index());
        }
        Ok(PipelineHandle::new(0, self.pipelines.create()))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.destroy(HandleKind::Pipeline, pipeline.index());
    }

    fn create_sampler(&mut self, _desc: &SamplerDesc) -> Result<SamplerHandle> {
        Ok(SamplerHandle::new(0, self.samplers.create()))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.destroy(HandleKind::Sampler, sampler.index());
    }

    fn memory_types(&self) -> &[MemoryTypeInfo] {
        &self.memory_types
    }

    fn allocate_memory(&mut self, type_index: u32, size: u64) -> Result<MemoryHandle> {
        assert!((type_index as usize) < self.memory_types.len());
        self.memories.push(MockMemory {
            alive: true,
            size,
            data: vec![0u8; size as usize].into_boxed_slice(),
        });
        Ok(MemoryHandle::new(0, (self.memories.len() - 1) as u32))
    }

    fn free_memory(&mut self, memory: MemoryHandle) {
        let m = &mut self.memories[memory.index() as usize];
        assert!(m.alive, "double free of memory {}", memory.index());
        m.alive = false;
        self.events.push(MockEvent::FreeMemory(memory));
    }

    fn map_memory(&mut self, memory: MemoryHandle) -> Result<NonNull<u8>> {
        let m = &mut self.memories[memory.index() as usize];
        assert!(m.alive, "mapping freed memory {}", memory.index());
        debug_assert!(m.size as usize == m.data.len());
        Ok(NonNull::new(m.data.as_mut_ptr()).unwrap())
    }

    fn create_fence(&mut self, signaled: bool) -> FenceHandle {
        self.fences.push(MockFence {
            alive: true,
            signaled,
            signals_at: None,
        });
        FenceHandle::new(0, (self.fences.len() - 1) as u32)
    }

    fn wait_fence(&mut self, fence: FenceHandle) {
        let f = self.fence_mut(fence);
        if !f.signaled {
            let at = f
                .signals_at
                .expect("waiting on a fence no submission will ever signal");
            f.signaled = true;
            f.signals_at = None;
            // A blocking wait rides the clock forward to the signal.
            self.time = self.time.max(at);
        }
        self.events.push(MockEvent::WaitFence(fence));
    }

    fn fence_signaled(&mut self, fence: FenceHandle) -> bool {
        let now = self.time;
        let f = self.fence_mut(fence);
        if let Some(at) = f.signals_at {
            if now >= at {
                f.signaled = true;
                f.signals_at = None;
            }
        }
        f.signaled
    }

    fn reset_fence(&mut self, fence: FenceHandle) {
        let f = self.fence_mut(fence);
        f.signaled = false;
        f.signals_at = None;
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        let f = &mut self.fences[fence.index() as usize];
        assert!(f.alive, "double destroy of fence {}", fence.index());
        f.alive = false;
    }

    fn create_semaphore(&mut self) -> SemaphoreHandle {
        SemaphoreHandle::new(0, self.semaphores.create())
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        self.semaphores
            .destroy(HandleKind::Semaphore, semaphore.index());
    }

    fn create_command_buffer(&mut self) -> CommandBufferHandle {
        self.cmds.push(MockCommandBuffer {
            alive: true,
            ..Default::default()
        });
        CommandBufferHandle::new(0, (self.cmds.len() - 1) as u32)
    }

    fn destroy_command_buffer(&mut self, cmd: CommandBufferHandle) {
        let c = &mut self.cmds[cmd.index() as usize];
        assert!(c.alive, "double destroy of command buffer {}", cmd.index());
        c.alive = false;
        self.events.push(MockEvent::DestroyCommandBuffer(cmd));
    }

    fn begin_commands(&mut self, cmd: CommandBufferHandle) {
        let c = &mut self.cmds[cmd.index() as usize];
        assert!(c.alive && !c.recording);
        c.recording = true;
        c.commands.clear();
    }

    fn end_commands(&mut self, cmd: CommandBufferHandle) {
        let c = &mut self.cmds[cmd.index() as usize];
        assert!(c.recording, "end_commands outside recording");
        c.recording = false;
    }

    fn cmd_begin_pass(
        &mut self,
        cmd: CommandBufferHandle,
        pass: PassHandle,
        framebuffer: FramebufferHandle,
        _extent: Extent2d,
        _clears: ClearValues,
    ) {
        self.passes.assert_alive(HandleKind::Pass, pass.index());
        self.framebuffers
            .assert_alive(HandleKind::Framebuffer, framebuffer.index());
        let c = &mut self.cmds[cmd.index() as usize];
        assert!(!c.in_pass, "pass begun inside a pass");
        c.in_pass = true;
        self.record(cmd, RecordedCommand::BeginPass(pass, framebuffer));
    }

    fn cmd_end_pass(&mut self, cmd: CommandBufferHandle) {
        let c = &mut self.cmds[cmd.index() as usize];
        assert!(c.in_pass, "pass ended without a matching begin");
        c.in_pass = false;
        self.record(cmd, RecordedCommand::EndPass);
    }

    fn cmd_bind_pipeline(&mut self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        self.pipelines.assert_alive(HandleKind::Pipeline, pipeline.index());
        self.record(cmd, RecordedCommand::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: CommandBufferHandle,
        pipeline: PipelineHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    ) {
        self.sets.assert_alive(HandleKind::DescriptorSet, set.index());
        self.record(
            cmd,
            RecordedCommand::BindDescriptorSet(pipeline, set_index, set),
        );
    }

    fn cmd_bind_vertex_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
    ) {
        self.buffers.assert_alive(HandleKind::Buffer, buffer.index());
        self.record(cmd, RecordedCommand::BindVertexBuffer(buffer, offset));
    }

    fn cmd_draw(&mut self, cmd: CommandBufferHandle, vertex_count: u32, instance_count: u32) {
        assert!(
            self.cmds[cmd.index() as usize].in_pass,
            "draw outside a render pass"
        );
        self.record(cmd, RecordedCommand::Draw(vertex_count, instance_count));
    }

    fn cmd_dispatch(&mut self, cmd: CommandBufferHandle, x: u32, y: u32, z: u32) {
        assert!(
            !self.cmds[cmd.index() as usize].in_pass,
            "dispatch inside a render pass"
        );
        self.record(cmd, RecordedCommand::Dispatch(x, y, z));
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
        self.buffers.assert_alive(HandleKind::Buffer, src.index());
        self.buffers.assert_alive(HandleKind::Buffer, dst.index());
        self.record(
            cmd,
            RecordedCommand::CopyBuffer(src, src_offset, dst, dst_offset, size),
        );
    }

    fn submit(
        &mut self,
        cmd: CommandBufferHandle,
        waits: &[SemaphoreHandle],
        signals: &[SemaphoreHandle],
        fence: Option<FenceHandle>,
    ) {
        let c = &self.cmds[cmd.index() as usize];
        assert!(c.alive && !c.recording, "submitting an open command buffer");
        if let Some(fence) = fence {
            let delay = self.fence_delay;
            let now = self.time;
            let f = self.fence_mut(fence);
            assert!(!f.signaled, "submitting against a signaled fence");
            f.signals_at = Some(now + delay);
        }
        self.submits.push(SubmitRecord {
            cmd,
            waits: waits.to_vec(),
            signals: signals.to_vec(),
            fence,
        });
    }

    fn swapchain_image_count(&self) -> u32 {
        self.swapchain_images
    }

    fn acquire_image(&mut self, ready: SemaphoreHandle) -> Result<u32> {
        self.semaphores
            .assert_alive(HandleKind::Semaphore, ready.index());
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.swapchain_images;
        self.events.push(MockEvent::AcquireImage(image));
        Ok(image)
    }

    fn present(&mut self, image: u32, waits: &[SemaphoreHandle]) -> Result<()> {
        assert!(image < self.swapchain_images);
        self.presents.push(PresentRecord {
            image,
            waits: waits.to_vec(),
        });
        self.events.push(MockEvent::Present(image));
        Ok(())
    }

    fn create_descriptor_pool(&mut self, capacity: u32) -> Result<DescriptorPoolHandle> {
        self.pools.push(MockPool {
            alive: true,
            capacity,
            allocated: 0,
        });
        Ok(DescriptorPoolHandle::new(0, (self.pools.len() - 1) as u32))
    }

    fn reset_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        let p = &mut self.pools[pool.index() as usize];
        assert!(p.alive);
        p.allocated = 0;
        self.events.push(MockEvent::ResetDescriptorPool(pool));
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        let p = &mut self.pools[pool.index() as usize];
        assert!(p.alive, "double destroy of descriptor pool {}", pool.index());
        p.alive = false;
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        pipeline: PipelineHandle,
        _set_index: u32,
    ) -> Option<DescriptorSetHandle> {
        self.pipelines.assert_alive(HandleKind::Pipeline, pipeline.index());
        let p = &mut self.pools[pool.index() as usize];
        assert!(p.alive);
        if p.allocated >= p.capacity {
            return None;
        }
        p.allocated += 1;
        Some(DescriptorSetHandle::new(0, self.sets.create()))
    }

    fn update_descriptor_set(&mut self, set: DescriptorSetHandle, bindings: &[ResolvedBinding]) {
        self.sets.assert_alive(HandleKind::DescriptorSet, set.index());
        for binding in bindings {
            match binding {
                ResolvedBinding::Texture { texture, sampler, .. } => {
                    self.textures.assert_alive(HandleKind::Texture, texture.index());
                    self.samplers.assert_alive(HandleKind::Sampler, sampler.index());
                }
                ResolvedBinding::Buffer { buffer, .. } => {
                    self.buffers.assert_alive(HandleKind::Buffer, buffer.index());
                }
            }
        }
    }

    fn wait_idle(&mut self) {
        let pending: Vec<FenceHandle> = self
            .fences
            .iter()
            .enumerate()
            .filter(|(_, f)| f.alive && f.signals_at.is_some())
            .map(|(i, _)| FenceHandle::new(0, i as u32))
            .collect();
        for fence in pending {
            self.wait_fence(fence);
        }
    }
}
