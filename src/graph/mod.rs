//! The render graph: per-frame declarations resolved against content caches.
//!
//! Each frame runs three phases:
//!
//! 1. **Collect** — the application declares textures, buffers, samplers,
//!    pipelines, and passes by *content description*, receiving lightweight
//!    refs (indices into this frame's declaration lists). Nothing GPU-side
//!    exists yet; texture usage keeps accumulating as later declarations
//!    refine it.
//! 2. **Resolve** — at `end_frame`, every declaration is content-hashed and
//!    looked up in its kind's cache: hits are stamped with the current frame
//!    number, misses create the backing object through the suballocator or
//!    backend. Upstream identities flow downstream: a framebuffer hashes its
//!    pass's hash, a pipeline hashes the pass it renders into.
//! 3. **Submit** — one command buffer per pass. Pass N signals semaphore N;
//!    a pass waits the semaphores its dependency bitmask names; the present
//!    waits whatever no later pass consumed. Declaration order is submission
//!    order, which a dependency mask of earlier-only bits keeps topological.
//!
//! Eviction runs at `begin_frame`: entries unused for more than the
//! configured lifetime are destroyed and their memory returned. The config
//! validation guarantees the lifetime exceeds the in-flight depth, so an
//! evicted object can no longer be referenced by executing GPU work.

mod cache;

pub use cache::{CacheStats, ObjectCache};

use crate::config::{Config, MAX_PASSES};
use crate::error::{Error, Result};
use crate::frame::{DeferredDestroy, FrameManager};
use crate::gpu::{
    AttachmentDesc, BufferDesc, BufferHandle, ClearValues, CommandBufferHandle, Extent2d,
    FramebufferDesc, FramebufferHandle, LoadOp, PassDesc, PassHandle, PipelineDesc,
    PipelineHandle, RawHandle, RenderBackend, ResolvedBinding, SamplerDesc, SamplerHandle,
    SemaphoreHandle, StoreOp, TextureDesc, TextureHandle, TextureUsage,
};
use crate::hash::content_hash;
use crate::memory::{AllocRequest, DeviceAllocation, DeviceAllocator};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Ref to a texture declared this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRef(u32);

/// Ref to a buffer declared this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRef(u32);

/// Ref to a sampler declared this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerRef(u32);

/// Ref to a pipeline declared this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineRef(u32);

/// Ref to a pass declared this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassRef(u32);

/// Dependency bitmask over earlier passes, bit = pass declaration index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassDeps(pub u64);

impl PassDeps {
    /// No dependencies.
    pub fn none() -> Self {
        Self(0)
    }

    /// Depend on one earlier pass.
    pub fn on(pass: PassRef) -> Self {
        Self(1 << pass.0)
    }

    /// Add a dependency on another earlier pass.
    pub fn and(self, pass: PassRef) -> Self {
        Self(self.0 | (1 << pass.0))
    }
}

/// A staged region of the current frame's scratch buffer.
#[derive(Debug, Clone, Copy)]
pub struct ScratchSlice {
    /// The slot's scratch buffer.
    pub buffer: BufferHandle,
    /// Byte offset.
    pub offset: u64,
    /// Size in bytes.
    pub size: u64,
}

/// One attachment of a declared pass.
#[derive(Debug, Clone, Copy)]
pub struct PassAttachment {
    /// The texture rendered into.
    pub texture: TextureRef,
    /// Load behavior.
    pub load: LoadOp,
    /// Store behavior.
    pub store: StoreOp,
}

/// A pass declaration.
#[derive(Debug, Clone)]
pub struct PassDeclaration {
    /// Color attachments.
    pub color: SmallVec<[PassAttachment; 4]>,
    /// Optional depth attachment.
    pub depth: Option<PassAttachment>,
    /// Render area.
    pub extent: Extent2d,
    /// Clear values for `LoadOp::Clear` attachments.
    pub clears: ClearValues,
    /// Earlier passes that must complete first.
    pub depends: PassDeps,
}

/// A resource binding inside a declared pass, resolved at record time.
#[derive(Debug, Clone, Copy)]
pub enum Binding {
    /// Sampled texture.
    Texture {
        /// Binding index within the set.
        binding: u32,
        /// Declared texture.
        texture: TextureRef,
        /// Declared sampler.
        sampler: SamplerRef,
    },
    /// Uniform data staged in scratch this frame.
    Uniform {
        /// Binding index within the set.
        binding: u32,
        /// Staged region.
        slice: ScratchSlice,
    },
    /// Storage buffer.
    Storage {
        /// Binding index within the set.
        binding: u32,
        /// Declared buffer.
        buffer: BufferRef,
    },
}

enum PassCommand {
    BindPipeline(PipelineRef),
    BindSet {
        set_index: u32,
        bindings: SmallVec<[Binding; 8]>,
    },
    BindVertexBuffer(BufferRef, u64),
    Draw {
        vertices: u32,
        instances: u32,
    },
    Dispatch(u32, u32, u32),
}

struct TextureDecl {
    desc: TextureDesc,
    resolved: Option<TextureHandle>,
}

struct BufferDecl {
    desc: BufferDesc,
    resolved: Option<BufferHandle>,
}

struct SamplerDecl {
    desc: SamplerDesc,
    resolved: Option<SamplerHandle>,
}

struct PipelineDecl {
    desc: PipelineDesc,
    resolved: Option<PipelineHandle>,
}

struct PassDecl {
    declaration: PassDeclaration,
    commands: Vec<PassCommand>,
    /// Content hash of the resolved [`PassDesc`]; downstream identities
    /// (framebuffer, pipeline) fold it in.
    pass_hash: u64,
    resolved_pass: Option<PassHandle>,
    resolved_framebuffer: Option<FramebufferHandle>,
}

/// Cached backing objects, per kind.
struct TextureRes {
    handle: TextureHandle,
    memory: DeviceAllocation,
}

struct BufferRes {
    handle: BufferHandle,
    memory: DeviceAllocation,
}

/// The renderer: render-graph cache, frame ring, and suballocator over one
/// backend.
///
/// This is the explicit context object of the system — all state lives here
/// and is threaded by `&mut`, nothing is global.
pub struct Renderer<B: RenderBackend> {
    backend: B,
    config: Config,
    allocator: DeviceAllocator,
    frames: FrameManager,

    textures: ObjectCache<TextureDesc, TextureRes>,
    buffers: ObjectCache<BufferDesc, BufferRes>,
    samplers: ObjectCache<SamplerDesc, SamplerHandle>,
    passes: ObjectCache<PassDesc, PassHandle>,
    framebuffers: ObjectCache<FramebufferDesc, FramebufferHandle>,
    pipelines: ObjectCache<PipelineDesc, PipelineHandle>,

    /// Registered shader bytecode by content hash.
    shaders: HashMap<u64, Vec<u32>>,
    /// Suballocations of persistent (non-graph) resources.
    persistent: HashMap<RawHandle, DeviceAllocation>,

    /// Per-slot, per-pass signal semaphores, grown on demand.
    pass_semaphores: Vec<Vec<SemaphoreHandle>>,

    // Current frame's declarations.
    frame_active: bool,
    texture_decls: Vec<TextureDecl>,
    buffer_decls: Vec<BufferDecl>,
    sampler_decls: Vec<SamplerDecl>,
    pipeline_decls: Vec<PipelineDecl>,
    pass_decls: Vec<PassDecl>,
    uploads: Vec<(BufferRef, ScratchSlice)>,
}

impl<B: RenderBackend> Renderer<B> {
    /// Create a renderer over a backend.
    pub fn new(mut backend: B, config: Config) -> Result<Self> {
        config.validate()?;
        let mut allocator = DeviceAllocator::new(config.chunk_size);
        let frames = FrameManager::new(&mut backend, &mut allocator, &config)?;
        let pass_semaphores = (0..config.in_flight_depth).map(|_| Vec::new()).collect();
        Ok(Self {
            backend,
            config,
            allocator,
            frames,
            textures: ObjectCache::new(),
            buffers: ObjectCache::new(),
            samplers: ObjectCache::new(),
            passes: ObjectCache::new(),
            framebuffers: ObjectCache::new(),
            pipelines: ObjectCache::new(),
            shaders: HashMap::new(),
            persistent: HashMap::new(),
            pass_semaphores,
            frame_active: false,
            texture_decls: Vec::new(),
            buffer_decls: Vec::new(),
            sampler_decls: Vec::new(),
            pipeline_decls: Vec::new(),
            pass_decls: Vec::new(),
            uploads: Vec::new(),
        })
    }

    /// Register shader bytecode, returning its content hash for use in
    /// [`PipelineDesc::shader`].
    pub fn register_shader(&mut self, code: &[u32]) -> u64 {
        let hash = content_hash(&code);
        self.shaders.entry(hash).or_insert_with(|| code.to_vec());
        hash
    }

    /// Begin a frame: rotate the in-flight ring and run the eviction sweep.
    pub fn begin_frame(&mut self) -> Result<()> {
        assert!(!self.frame_active, "begin_frame inside an active frame");
        self.frames
            .advance_frame(&mut self.backend, &mut self.allocator)?;
        self.evict_unused();
        self.frame_active = true;
        self.texture_decls.clear();
        self.buffer_decls.clear();
        self.sampler_decls.clear();
        self.pipeline_decls.clear();
        self.pass_decls.clear();
        self.uploads.clear();
        Ok(())
    }

    // --- collect phase ---

    /// Declare a texture by content.
    pub fn declare_texture(&mut self, desc: TextureDesc) -> TextureRef {
        self.assert_collecting();
        self.texture_decls.push(TextureDecl {
            desc,
            resolved: None,
        });
        TextureRef(self.texture_decls.len() as u32 - 1)
    }

    /// Refine a declared texture's usage; the merged set is part of its
    /// content identity at resolve time.
    pub fn refine_texture_usage(&mut self, texture: TextureRef, usage: TextureUsage) {
        self.assert_collecting();
        self.texture_decls[texture.0 as usize].desc.usage.merge(usage);
    }

    /// Declare a buffer by content.
    pub fn declare_buffer(&mut self, desc: BufferDesc) -> BufferRef {
        self.assert_collecting();
        self.buffer_decls.push(BufferDecl {
            desc,
            resolved: None,
        });
        BufferRef(self.buffer_decls.len() as u32 - 1)
    }

    /// Declare a sampler by content.
    pub fn declare_sampler(&mut self, desc: SamplerDesc) -> SamplerRef {
        self.assert_collecting();
        self.sampler_decls.push(SamplerDecl {
            desc,
            resolved: None,
        });
        SamplerRef(self.sampler_decls.len() as u32 - 1)
    }

    /// Declare a pipeline by content. `desc.pass_hash` is filled in at
    /// resolve time from the pass the pipeline is first bound in.
    pub fn declare_pipeline(&mut self, desc: PipelineDesc) -> PipelineRef {
        self.assert_collecting();
        assert!(
            self.shaders.contains_key(&desc.shader),
            "pipeline references unregistered shader {:#x}",
            desc.shader
        );
        if let Some(fragment) = desc.fragment_shader {
            assert!(
                self.shaders.contains_key(&fragment),
                "pipeline references unregistered fragment shader {:#x}",
                fragment
            );
        }
        self.pipeline_decls.push(PipelineDecl {
            desc,
            resolved: None,
        });
        PipelineRef(self.pipeline_decls.len() as u32 - 1)
    }

    /// Declare a pass.
    ///
    /// A declaration with no color or depth attachments is compute-only:
    /// no pass or framebuffer object is created for it and its commands
    /// record outside any render pass.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_PASSES`] passes are declared this frame or
    /// if the dependency mask names this or a later pass; the graph shape is
    /// a compile-time-known contract, not runtime input.
    pub fn declare_pass(&mut self, declaration: PassDeclaration) -> PassRef {
        self.assert_collecting();
        let index = self.pass_decls.len();
        assert!(
            index < MAX_PASSES,
            "more than {} passes declared in one frame",
            MAX_PASSES
        );
        assert!(
            declaration.depends.0 >> index == 0,
            "pass {} depends on itself or a later pass (mask {:#x})",
            index,
            declaration.depends.0
        );

        for attachment in &declaration.color {
            self.texture_decls[attachment.texture.0 as usize]
                .desc
                .usage
                .merge(TextureUsage {
                    color_attachment: true,
                    ..Default::default()
                });
        }
        if let Some(depth) = &declaration.depth {
            self.texture_decls[depth.texture.0 as usize]
                .desc
                .usage
                .merge(TextureUsage {
                    depth_attachment: true,
                    ..Default::default()
                });
        }

        self.pass_decls.push(PassDecl {
            declaration,
            commands: Vec::new(),
            pass_hash: 0,
            resolved_pass: None,
            resolved_framebuffer: None,
        });
        PassRef(index as u32)
    }

    /// Stage transient data into the frame's scratch buffer.
    pub fn stage(&mut self, data: &[u8]) -> ScratchSlice {
        self.assert_collecting();
        let mut alloc = self.frames.alloc_scratch(data.len() as u64);
        alloc.write(data);
        ScratchSlice {
            buffer: alloc.buffer,
            offset: alloc.offset,
            size: alloc.size,
        }
    }

    /// Upload data into a declared buffer via scratch staging; the copy is
    /// recorded ahead of this frame's first pass.
    pub fn upload_buffer(&mut self, buffer: BufferRef, data: &[u8]) {
        let slice = self.stage(data);
        let decl = &mut self.buffer_decls[buffer.0 as usize];
        decl.desc.usage.transfer_dst = true;
        self.uploads.push((buffer, slice));
    }

    // --- command recording (into declared passes) ---

    /// Bind a pipeline for subsequent commands in `pass`.
    pub fn cmd_bind_pipeline(&mut self, pass: PassRef, pipeline: PipelineRef) {
        self.pass_mut(pass)
            .commands
            .push(PassCommand::BindPipeline(pipeline));
    }

    /// Bind a descriptor set's worth of resources.
    pub fn cmd_bind_set(&mut self, pass: PassRef, set_index: u32, bindings: &[Binding]) {
        for binding in bindings {
            if let Binding::Texture { texture, .. } = binding {
                self.texture_decls[texture.0 as usize].desc.usage.merge(TextureUsage {
                    sampled: true,
                    ..Default::default()
                });
            }
        }
        self.pass_mut(pass).commands.push(PassCommand::BindSet {
            set_index,
            bindings: bindings.iter().copied().collect(),
        });
    }

    /// Bind a vertex buffer.
    pub fn cmd_bind_vertex_buffer(&mut self, pass: PassRef, buffer: BufferRef, offset: u64) {
        self.pass_mut(pass)
            .commands
            .push(PassCommand::BindVertexBuffer(buffer, offset));
    }

    /// Record a draw.
    pub fn cmd_draw(&mut self, pass: PassRef, vertices: u32, instances: u32) {
        self.pass_mut(pass).commands.push(PassCommand::Draw {
            vertices,
            instances,
        });
    }

    /// Record a compute dispatch.
    pub fn cmd_dispatch(&mut self, pass: PassRef, x: u32, y: u32, z: u32) {
        self.pass_mut(pass)
            .commands
            .push(PassCommand::Dispatch(x, y, z));
    }

    // --- resolve + submit ---

    /// Resolve every declaration, record one command buffer per pass,
    /// submit in dependency order, and present.
    pub fn end_frame(&mut self) -> Result<()> {
        assert!(self.frame_active, "end_frame without begin_frame");
        let frame = self.frames.frame_number();

        self.resolve_textures(frame)?;
        self.resolve_buffers(frame)?;
        self.resolve_samplers(frame)?;
        self.resolve_passes(frame)?;
        self.resolve_pipelines(frame)?;

        self.record_and_submit()?;

        self.frame_active = false;
        Ok(())
    }

    fn resolve_textures(&mut self, frame: u64) -> Result<()> {
        let backend = &mut self.backend;
        let allocator = &mut self.allocator;
        for decl in &mut self.texture_decls {
            let desc = decl.desc;
            let res = self.textures.resolve(&desc, frame, || {
                let handle = backend.create_texture(&desc)?;
                let requirements = backend.texture_requirements(handle);
                let memory = allocator.allocate(
                    backend,
                    &AllocRequest {
                        size: requirements.size,
                        alignment: requirements.alignment,
                        type_bits: requirements.type_bits,
                        host_visible: false,
                    },
                )?;
                backend.bind_texture_memory(handle, memory.memory(), memory.offset())?;
                Ok::<_, Error>(TextureRes { handle, memory })
            })?;
            decl.resolved = Some(res.handle);
        }
        Ok(())
    }

    fn resolve_buffers(&mut self, frame: u64) -> Result<()> {
        let backend = &mut self.backend;
        let allocator = &mut self.allocator;
        for decl in &mut self.buffer_decls {
            let desc = decl.desc;
            let res = self.buffers.resolve(&desc, frame, || {
                let handle = backend.create_buffer(&desc)?;
                let requirements = backend.buffer_requirements(handle);
                let memory = allocator.allocate(
                    backend,
                    &AllocRequest {
                        size: requirements.size,
                        alignment: requirements.alignment,
                        type_bits: requirements.type_bits,
                        host_visible: desc.host_visible,
                    },
                )?;
                backend.bind_buffer_memory(handle, memory.memory(), memory.offset())?;
                Ok::<_, Error>(BufferRes { handle, memory })
            })?;
            decl.resolved = Some(res.handle);
        }
        Ok(())
    }

    fn resolve_samplers(&mut self, frame: u64) -> Result<()> {
        let backend = &mut self.backend;
        for decl in &mut self.sampler_decls {
            let desc = decl.desc;
            let handle = self
                .samplers
                .resolve(&desc, frame, || backend.create_sampler(&desc))?;
            decl.resolved = Some(*handle);
        }
        Ok(())
    }

    /// Resolve pass objects and their framebuffers. The framebuffer key
    /// folds in the pass's content hash and the concrete attachment handles.
    fn resolve_passes(&mut self, frame: u64) -> Result<()> {
        let backend = &mut self.backend;
        for decl in &mut self.pass_decls {
            // No attachments means compute-only: no pass or framebuffer
            // object backs the declaration.
            if decl.declaration.color.is_empty() && decl.declaration.depth.is_none() {
                continue;
            }
            let mut desc = PassDesc {
                color: SmallVec::new(),
                depth: None,
                samples: 1,
            };
            let mut color_handles: SmallVec<[TextureHandle; 4]> = SmallVec::new();
            for attachment in &decl.declaration.color {
                let texture = &self.texture_decls[attachment.texture.0 as usize];
                desc.color.push(AttachmentDesc {
                    format: texture.desc.format,
                    load: attachment.load,
                    store: attachment.store,
                });
                color_handles.push(texture.resolved.expect("texture resolved before passes"));
            }
            let mut depth_handle = None;
            if let Some(depth) = &decl.declaration.depth {
                let texture = &self.texture_decls[depth.texture.0 as usize];
                desc.depth = Some(AttachmentDesc {
                    format: texture.desc.format,
                    load: depth.load,
                    store: depth.store,
                });
                depth_handle = Some(texture.resolved.expect("texture resolved before passes"));
            }

            let pass_hash = content_hash(&desc);
            let pass_handle = *self
                .passes
                .resolve(&desc, frame, || backend.create_pass(&desc))?;
            decl.pass_hash = pass_hash;

            let framebuffer_desc = FramebufferDesc {
                pass_hash,
                color: color_handles,
                depth: depth_handle,
                extent: decl.declaration.extent,
            };
            let framebuffer = *self.framebuffers.resolve(&framebuffer_desc, frame, || {
                backend.create_framebuffer(pass_handle, &framebuffer_desc)
            })?;

            decl.resolved_pass = Some(pass_handle);
            decl.resolved_framebuffer = Some(framebuffer);
        }
        Ok(())
    }

    /// Resolve pipelines against the pass each is first bound in; the
    /// pass's content hash becomes part of the pipeline's identity.
    fn resolve_pipelines(&mut self, frame: u64) -> Result<()> {
        let mut targets: Vec<Option<(u64, Option<PassHandle>)>> =
            vec![None; self.pipeline_decls.len()];
        for decl in &self.pass_decls {
            for command in &decl.commands {
                if let PassCommand::BindPipeline(pipeline) = command {
                    targets[pipeline.0 as usize]
                        .get_or_insert((decl.pass_hash, decl.resolved_pass));
                }
            }
        }

        let backend = &mut self.backend;
        let shaders = &self.shaders;
        for (decl, target) in self.pipeline_decls.iter_mut().zip(&targets) {
            let mut desc = decl.desc.clone();
            desc.pass_hash = target.map_or(0, |(hash, _)| hash);
            let pass = target.and_then(|(_, handle)| handle);

            let handle = self.pipelines.resolve(&desc, frame, || {
                let mut code: SmallVec<[&[u32]; 2]> = SmallVec::new();
                code.push(shaders[&desc.shader].as_slice());
                if let Some(fragment) = desc.fragment_shader {
                    code.push(shaders[&fragment].as_slice());
                }
                backend.create_pipeline(&desc, pass, &code)
            })?;
            decl.resolved = Some(*handle);
        }
        Ok(())
    }

    fn record_and_submit(&mut self) -> Result<()> {
        let pass_count = self.pass_decls.len();
        let slot = self.frames.current_slot();

        // Per-pass signal semaphores for this slot, created on demand.
        while self.pass_semaphores[slot].len() < pass_count {
            self.pass_semaphores[slot].push(self.backend.create_semaphore());
        }

        // A frame with uploads but no passes still submits its copies in a
        // transfer-only command buffer, fenced like any other slot work.
        if pass_count == 0 && !self.uploads.is_empty() {
            let cmd = self.backend.create_command_buffer();
            self.backend.begin_commands(cmd);
            self.record_uploads(cmd);
            self.backend.end_commands(cmd);
            let fence = self.frames.fence();
            self.backend.reset_fence(fence);
            self.backend.submit(cmd, &[], &[], Some(fence));
            self.frames.note_submitted([cmd]);
        }

        let mut cmds: Vec<CommandBufferHandle> = Vec::with_capacity(pass_count);
        for index in 0..pass_count {
            let cmd = self.backend.create_command_buffer();
            self.backend.begin_commands(cmd);

            // Staged uploads ride ahead of the frame's first pass.
            if index == 0 {
                self.record_uploads(cmd);
            }

            self.record_pass(cmd, index)?;
            self.backend.end_commands(cmd);
            cmds.push(cmd);
        }

        // Submission: bit position == submission slot. Pass i waits the
        // signal semaphores of its dependency mask; the first pass also
        // consumes the image-available semaphore. The last submission
        // carries the slot's completion fence.
        let mut consumed: u64 = 0;
        for decl in &self.pass_decls {
            consumed |= decl.declaration.depends.0;
        }

        if !cmds.is_empty() {
            let fence = self.frames.fence();
            self.backend.reset_fence(fence);
            for (index, &cmd) in cmds.iter().enumerate() {
                let mut waits: SmallVec<[SemaphoreHandle; 8]> = SmallVec::new();
                if index == 0 {
                    waits.push(self.frames.image_available());
                }
                let depends = self.pass_decls[index].declaration.depends.0;
                for dep in 0..index {
                    if depends & (1 << dep) != 0 {
                        waits.push(self.pass_semaphores[slot][dep]);
                    }
                }
                let signals = [self.pass_semaphores[slot][index]];
                let fence = (index == cmds.len() - 1).then_some(fence);
                self.backend.submit(cmd, &waits, &signals, fence);
            }
            self.frames.note_submitted(cmds);
        }

        // Present waits every pass no later pass consumed, or the bare
        // image-available semaphore on an empty frame.
        let mut present_waits: SmallVec<[SemaphoreHandle; 8]> = SmallVec::new();
        if pass_count == 0 {
            present_waits.push(self.frames.image_available());
        } else {
            for index in 0..pass_count {
                if consumed & (1 << index) == 0 {
                    present_waits.push(self.pass_semaphores[slot][index]);
                }
            }
        }
        self.backend
            .present(self.frames.current_image(), &present_waits)
    }

    /// Record every staged upload copy into `cmd` and clear the queue.
    fn record_uploads(&mut self, cmd: CommandBufferHandle) {
        for (buffer, slice) in std::mem::take(&mut self.uploads) {
            let dst = self.buffer_decls[buffer.0 as usize]
                .resolved
                .expect("upload target resolved");
            self.backend
                .cmd_copy_buffer(cmd, slice.buffer, slice.offset, dst, 0, slice.size);
        }
    }

    fn record_pass(&mut self, cmd: CommandBufferHandle, index: usize) -> Result<()> {
        // Compute-only declarations have no pass object; their dispatches
        // record outside any render pass.
        let graphics = self.pass_decls[index].resolved_pass;
        if let Some(pass_handle) = graphics {
            let framebuffer = self.pass_decls[index]
                .resolved_framebuffer
                .expect("framebuffer resolved");
            let extent = self.pass_decls[index].declaration.extent;
            let clears = self.pass_decls[index].declaration.clears;
            self.backend
                .cmd_begin_pass(cmd, pass_handle, framebuffer, extent, clears);
        }

        let mut current_pipeline: Option<PipelineHandle> = None;
        let commands = std::mem::take(&mut self.pass_decls[index].commands);
        for command in &commands {
            match command {
                PassCommand::BindPipeline(pipeline) => {
                    let handle = self.pipeline_decls[pipeline.0 as usize]
                        .resolved
                        .expect("pipeline resolved");
                    current_pipeline = Some(handle);
                    self.backend.cmd_bind_pipeline(cmd, handle);
                }
                PassCommand::BindSet { set_index, bindings } => {
                    let pipeline =
                        current_pipeline.expect("bind_set recorded before any pipeline bind");
                    let set = self.frames.allocate_descriptor_set(
                        &mut self.backend,
                        pipeline,
                        *set_index,
                    )?;
                    let resolved: SmallVec<[ResolvedBinding; 8]> = bindings
                        .iter()
                        .map(|binding| self.resolve_binding(binding))
                        .collect();
                    self.backend.update_descriptor_set(set, &resolved);
                    self.backend
                        .cmd_bind_descriptor_set(cmd, pipeline, *set_index, set);
                }
                PassCommand::BindVertexBuffer(buffer, offset) => {
                    let handle = self.buffer_decls[buffer.0 as usize]
                        .resolved
                        .expect("buffer resolved");
                    self.backend.cmd_bind_vertex_buffer(cmd, handle, *offset);
                }
                PassCommand::Draw {
                    vertices,
                    instances,
                } => self.backend.cmd_draw(cmd, *vertices, *instances),
                PassCommand::Dispatch(x, y, z) => self.backend.cmd_dispatch(cmd, *x, *y, *z),
            }
        }
        self.pass_decls[index].commands = commands;

        if graphics.is_some() {
            self.backend.cmd_end_pass(cmd);
        }
        Ok(())
    }

    /// Redirect a collect-phase binding to the objects resolved this frame.
    fn resolve_binding(&self, binding: &Binding) -> ResolvedBinding {
        match *binding {
            Binding::Texture {
                binding,
                texture,
                sampler,
            } => ResolvedBinding::Texture {
                binding,
                texture: self.texture_decls[texture.0 as usize]
                    .resolved
                    .expect("texture resolved"),
                sampler: self.sampler_decls[sampler.0 as usize]
                    .resolved
                    .expect("sampler resolved"),
            },
            Binding::Uniform { binding, slice } => ResolvedBinding::Buffer {
                binding,
                buffer: slice.buffer,
                offset: slice.offset,
                size: slice.size,
            },
            Binding::Storage { binding, buffer } => {
                let decl = &self.buffer_decls[buffer.0 as usize];
                ResolvedBinding::Buffer {
                    binding,
                    buffer: decl.resolved.expect("buffer resolved"),
                    offset: 0,
                    size: decl.desc.size,
                }
            }
        }
    }

    /// Destroy and evict cache entries unused for more than the configured
    /// lifetime. Dependents go before dependencies: framebuffers before the
    /// textures and passes they reference.
    fn evict_unused(&mut self) {
        let frame = self.frames.frame_number();
        let lifetime = self.config.object_lifetime;
        let backend = &mut self.backend;
        let allocator = &mut self.allocator;

        self.framebuffers.evict(frame, lifetime, |_, handle| {
            backend.destroy_framebuffer(handle);
        });
        self.pipelines.evict(frame, lifetime, |_, handle| {
            backend.destroy_pipeline(handle);
        });
        self.passes.evict(frame, lifetime, |_, handle| {
            backend.destroy_pass(handle);
        });
        self.samplers.evict(frame, lifetime, |_, handle| {
            backend.destroy_sampler(handle);
        });
        self.textures.evict(frame, lifetime, |_, res| {
            backend.destroy_texture(res.handle);
            allocator.deallocate(backend, res.memory);
        });
        self.buffers.evict(frame, lifetime, |_, res| {
            backend.destroy_buffer(res.handle);
            allocator.deallocate(backend, res.memory);
        });

        let stats = self.stats();
        if stats.evictions > 0 {
            tracing::debug!(
                frame,
                evictions = stats.evictions,
                hits = stats.hits,
                misses = stats.misses,
                "cache eviction sweep"
            );
        }
    }

    // --- persistent resources ---

    /// Create a persistent buffer outside the graph's per-frame lifecycle.
    /// The caller destroys it explicitly with [`destroy_buffer`](Self::destroy_buffer).
    pub fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        let handle = self.backend.create_buffer(desc)?;
        let requirements = self.backend.buffer_requirements(handle);
        let memory = self.allocator.allocate(
            &mut self.backend,
            &AllocRequest {
                size: requirements.size,
                alignment: requirements.alignment,
                type_bits: requirements.type_bits,
                host_visible: desc.host_visible,
            },
        )?;
        self.backend
            .bind_buffer_memory(handle, memory.memory(), memory.offset())?;
        self.persistent.insert(handle.raw(), memory);
        Ok(handle)
    }

    /// Destroy a persistent buffer. Destruction is deferred until the
    /// current frame slot's GPU work completes.
    ///
    /// # Panics
    ///
    /// Panics if the handle was not created by [`create_buffer`](Self::create_buffer).
    pub fn destroy_buffer(&mut self, handle: BufferHandle) {
        let memory = self
            .persistent
            .remove(&handle.raw())
            .expect("destroy of a buffer this renderer does not own");
        self.frames
            .defer_destroy(DeferredDestroy::Buffer(handle, memory));
    }

    // --- accessors ---

    /// Aggregated cache statistics across all object kinds.
    pub fn stats(&self) -> CacheStats {
        let mut total = CacheStats::default();
        for stats in [
            self.textures.stats(),
            self.buffers.stats(),
            self.samplers.stats(),
            self.passes.stats(),
            self.framebuffers.stats(),
            self.pipelines.stats(),
        ] {
            total.hits += stats.hits;
            total.misses += stats.misses;
            total.evictions += stats.evictions;
        }
        total
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The underlying backend, mutably.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Current frame number.
    pub fn frame_number(&self) -> u64 {
        self.frames.frame_number()
    }

    /// Tear the renderer down: waits the device idle, destroys every cached
    /// and persistent object, and releases all device memory. Returns the
    /// backend.
    pub fn shutdown(mut self) -> B {
        self.backend.wait_idle();

        let backend = &mut self.backend;
        let allocator = &mut self.allocator;
        self.framebuffers.clear(|_, handle| backend.destroy_framebuffer(handle));
        self.pipelines.clear(|_, handle| backend.destroy_pipeline(handle));
        self.passes.clear(|_, handle| backend.destroy_pass(handle));
        self.samplers.clear(|_, handle| backend.destroy_sampler(handle));
        self.textures.clear(|_, res| {
            backend.destroy_texture(res.handle);
            allocator.deallocate(backend, res.memory);
        });
        self.buffers.clear(|_, res| {
            backend.destroy_buffer(res.handle);
            allocator.deallocate(backend, res.memory);
        });
        for (raw, memory) in self.persistent.drain() {
            backend.destroy_buffer(BufferHandle::from_raw(raw));
            allocator.deallocate(backend, memory);
        }
        for semaphores in &mut self.pass_semaphores {
            for semaphore in semaphores.drain(..) {
                backend.destroy_semaphore(semaphore);
            }
        }

        self.frames.destroy(&mut self.backend, &mut self.allocator);
        self.allocator.release_all(&mut self.backend);
        self.backend
    }

    fn assert_collecting(&self) {
        assert!(
            self.frame_active,
            "declaration outside begin_frame/end_frame"
        );
    }

    fn pass_mut(&mut self, pass: PassRef) -> &mut PassDecl {
        &mut self.pass_decls[pass.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::mock::{MockBackend, MockEvent, RecordedCommand};
    use crate::gpu::{BufferUsage, Format};

    fn renderer() -> Renderer<MockBackend> {
        Renderer::new(
            MockBackend::new(),
            Config {
                chunk_size: 1 << 20,
                scratch_size: 64 * 1024,
                ..Config::default()
            },
        )
        .unwrap()
    }

    fn color_target(width: u32) -> TextureDesc {
        TextureDesc {
            format: Format::Rgba8Unorm,
            extent: Extent2d { width, height: 64 },
            usage: TextureUsage::default(),
            samples: 1,
        }
    }

    fn single_pass(r: &mut Renderer<MockBackend>, width: u32, depends: PassDeps) -> PassRef {
        let target = r.declare_texture(color_target(width));
        r.declare_pass(PassDeclaration {
            color: smallvec::smallvec![PassAttachment {
                texture: target,
                load: LoadOp::Clear,
                store: StoreOp::Store,
            }],
            depth: None,
            extent: Extent2d { width, height: 64 },
            clears: ClearValues::default(),
            depends,
        })
    }

    #[test]
    fn test_identical_frames_hit_the_cache() {
        let mut r = renderer();
        for _ in 0..2 {
            r.begin_frame().unwrap();
            single_pass(&mut r, 64, PassDeps::none());
            r.end_frame().unwrap();
        }
        let stats = r.stats();
        // Texture, pass, framebuffer: created once, hit once each.
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.hits, 3);
        assert_eq!(r.backend().live_textures(), 1);
    }

    #[test]
    fn test_dependency_mask_selects_wait_semaphores() {
        let mut r = renderer();
        r.begin_frame().unwrap();
        let p0 = single_pass(&mut r, 32, PassDeps::none());
        let _p1 = single_pass(&mut r, 48, PassDeps::none());
        let _p2 = single_pass(&mut r, 64, PassDeps::on(p0));
        r.end_frame().unwrap();

        let submits = &r.backend().submits;
        assert_eq!(submits.len(), 3);
        // The dependent pass waits its dependency's semaphore and no other
        // pass's.
        assert!(submits[2].waits.contains(&submits[0].signals[0]));
        assert!(!submits[2].waits.contains(&submits[1].signals[0]));
        // Only the first submission consumes image-available; only the last
        // carries the slot fence.
        assert_eq!(submits[0].waits.len(), 1);
        assert!(submits[0].fence.is_none());
        assert!(submits[2].fence.is_some());

        // Present waits exactly the passes nothing downstream consumed.
        let present = &r.backend().presents[0];
        assert!(!present.waits.contains(&submits[0].signals[0]));
        assert!(present.waits.contains(&submits[1].signals[0]));
        assert!(present.waits.contains(&submits[2].signals[0]));
    }

    #[test]
    fn test_undeclared_objects_evicted_once_without_leak() {
        let mut r = renderer();
        r.begin_frame().unwrap();
        single_pass(&mut r, 64, PassDeps::none());
        r.end_frame().unwrap();
        assert_eq!(r.backend().live_textures(), 1);

        // Frames 2..=7; the sweep at frame 7 sees age 6 > lifetime 5.
        for _ in 0..6 {
            r.begin_frame().unwrap();
            r.end_frame().unwrap();
        }

        assert_eq!(r.backend().live_textures(), 0);
        let destroys = r
            .backend()
            .events
            .iter()
            .filter(|e| matches!(e, MockEvent::DestroyTexture(_)))
            .count();
        assert_eq!(destroys, 1);
        assert_eq!(r.stats().evictions, 3);
    }

    #[test]
    fn test_upload_rides_ahead_of_first_pass() {
        let mut r = renderer();
        r.begin_frame().unwrap();
        let pass = single_pass(&mut r, 64, PassDeps::none());
        let vbo = r.declare_buffer(BufferDesc {
            size: 256,
            usage: BufferUsage {
                vertex: true,
                ..Default::default()
            },
            host_visible: false,
        });
        r.upload_buffer(vbo, &[7u8; 64]);
        r.cmd_bind_vertex_buffer(pass, vbo, 0);
        r.cmd_draw(pass, 3, 1);
        r.end_frame().unwrap();

        let cmd = r.backend().submits[0].cmd;
        let commands = r.backend().commands_of(cmd);
        assert!(matches!(commands[0], RecordedCommand::CopyBuffer(..)));
        assert!(matches!(commands[1], RecordedCommand::BeginPass(..)));
        assert!(commands.contains(&RecordedCommand::Draw(3, 1)));
    }

    #[test]
    fn test_attachmentless_pass_dispatches_outside_render_pass() {
        let mut r = renderer();
        let shader = r.register_shader(&[0x0723_0203, 7, 7]);
        r.begin_frame().unwrap();
        let pass = r.declare_pass(PassDeclaration {
            color: SmallVec::new(),
            depth: None,
            extent: Extent2d {
                width: 1,
                height: 1,
            },
            clears: ClearValues::default(),
            depends: PassDeps::none(),
        });
        let pipeline = r.declare_pipeline(PipelineDesc {
            shader,
            fragment_shader: None,
            pass_hash: 0,
            topology: crate::gpu::Topology::TriangleList,
            depth_test: false,
            binding_sets: Default::default(),
            vertex_stride: 0,
        });
        r.cmd_bind_pipeline(pass, pipeline);
        r.cmd_dispatch(pass, 8, 8, 1);
        r.end_frame().unwrap();

        let cmd = r.backend().submits[0].cmd;
        let commands = r.backend().commands_of(cmd);
        assert!(!commands
            .iter()
            .any(|c| matches!(c, RecordedCommand::BeginPass(..))));
        assert!(commands.contains(&RecordedCommand::Dispatch(8, 8, 1)));
        // No pass or framebuffer object was created for the compute pass.
        assert_eq!(r.backend().live_passes(), 0);
    }

    #[test]
    fn test_persistent_destroy_is_deferred_to_slot_reuse() {
        let mut r = renderer();
        let buffer = r
            .create_buffer(&BufferDesc {
                size: 1024,
                usage: BufferUsage {
                    vertex: true,
                    transfer_dst: true,
                    ..Default::default()
                },
                host_visible: false,
            })
            .unwrap();

        r.begin_frame().unwrap();
        r.destroy_buffer(buffer);
        r.end_frame().unwrap();
        assert!(!r
            .backend()
            .events
            .contains(&MockEvent::DestroyBuffer(buffer)));

        // One more frame on the other slot, then the deferring slot's reuse
        // drains its destruction list.
        r.begin_frame().unwrap();
        r.end_frame().unwrap();
        r.begin_frame().unwrap();
        assert!(r
            .backend()
            .events
            .contains(&MockEvent::DestroyBuffer(buffer)));
        r.end_frame().unwrap();
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut r = renderer();
        r.begin_frame().unwrap();
        single_pass(&mut r, 64, PassDeps::none());
        r.end_frame().unwrap();
        let backend = r.shutdown();
        assert_eq!(backend.live_objects(), 0);
    }
}
