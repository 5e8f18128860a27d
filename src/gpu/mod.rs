//! GPU abstraction layer.
//!
//! This module defines the content-description types the render-graph cache
//! keys on, the opaque handle scheme, and the [`RenderBackend`] trait that a
//! concrete graphics API implements. The backend is a one-way translation
//! layer: it creates, destroys, and records, but owns no caching or lifetime
//! logic of its own.
//!
//! Every descriptor type derives `Hash`; a resource's identity *is* its
//! description (see [`crate::hash`]). Fields that do not affect GPU object
//! identity (clear colors, upload payloads) live in commands instead.

mod handle;
pub mod mock;
pub mod traits;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use handle::{
    BufferHandle, CommandBufferHandle, DescriptorPoolHandle, DescriptorSetHandle, FenceHandle,
    FramebufferHandle, HandleKind, MemoryHandle, PassHandle, PipelineHandle, RawHandle,
    SamplerHandle, SemaphoreHandle, TextureHandle,
};
pub use traits::RenderBackend;

use smallvec::SmallVec;

/// Texture and attachment pixel formats.
///
/// Deliberately small: the cache only needs formats to be part of object
/// identity, not to enumerate everything the device can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// 8-bit RGBA, unsigned normalized.
    Rgba8Unorm,
    /// 8-bit BGRA, unsigned normalized (common swap-chain format).
    Bgra8Unorm,
    /// 16-bit float RGBA.
    Rgba16Float,
    /// 32-bit float red channel.
    R32Float,
    /// 32-bit depth.
    Depth32Float,
    /// 24-bit depth with 8-bit stencil.
    Depth24Stencil8,
}

impl Format {
    /// Whether this is a depth or depth-stencil format.
    pub fn is_depth(self) -> bool {
        matches!(self, Format::Depth32Float | Format::Depth24Stencil8)
    }
}

/// 2D extent in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent2d {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// How a texture will be used.
///
/// Usage accumulates during the collect phase: a texture first declared as a
/// color attachment and later bound as a shader input ends up with both
/// flags, and the merged set is part of its content identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TextureUsage {
    /// Rendered to as a color attachment.
    pub color_attachment: bool,
    /// Rendered to as the depth attachment.
    pub depth_attachment: bool,
    /// Sampled from a shader.
    pub sampled: bool,
    /// Written by transfer (upload) commands.
    pub transfer_dst: bool,
}

impl TextureUsage {
    /// Merge another usage into this one.
    pub fn merge(&mut self, other: TextureUsage) {
        self.color_attachment |= other.color_attachment;
        self.depth_attachment |= other.depth_attachment;
        self.sampled |= other.sampled;
        self.transfer_dst |= other.transfer_dst;
    }
}

/// Content description of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    /// Pixel format.
    pub format: Format,
    /// Size in pixels.
    pub extent: Extent2d,
    /// Accumulated usage.
    pub usage: TextureUsage,
    /// MSAA sample count (1 = no multisampling).
    pub samples: u32,
}

/// How a buffer will be used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferUsage {
    /// Bound as a vertex buffer.
    pub vertex: bool,
    /// Bound as an index buffer.
    pub index: bool,
    /// Bound as a uniform buffer.
    pub uniform: bool,
    /// Bound as a storage buffer.
    pub storage: bool,
    /// Source of transfer commands (staging).
    pub transfer_src: bool,
    /// Destination of transfer commands.
    pub transfer_dst: bool,
}

/// Content description of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
    /// Whether the buffer must be CPU-mappable.
    pub host_visible: bool,
}

/// What happens to an attachment's contents at pass begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOp {
    /// Preserve previous contents.
    Load,
    /// Clear to a value supplied at record time.
    Clear,
    /// Contents undefined.
    DontCare,
}

/// What happens to an attachment's contents at pass end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// Write results out.
    Store,
    /// Results may be discarded.
    DontCare,
}

/// One attachment slot of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentDesc {
    /// Attachment format.
    pub format: Format,
    /// Load behavior.
    pub load: LoadOp,
    /// Store behavior.
    pub store: StoreOp,
}

/// Content description of a render pass (attachment shapes and ops, not the
/// attachments themselves; those belong to the framebuffer).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PassDesc {
    /// Color attachment slots.
    pub color: SmallVec<[AttachmentDesc; 4]>,
    /// Optional depth attachment slot.
    pub depth: Option<AttachmentDesc>,
    /// MSAA sample count.
    pub samples: u32,
}

/// Content description of a framebuffer: a pass identity plus the concrete
/// textures bound to its slots.
///
/// `pass_hash` is the content hash of the owning [`PassDesc`], so a
/// framebuffer's identity changes whenever its pass's does — the dependency
/// hashing the cache relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramebufferDesc {
    /// Content hash of the pass this framebuffer belongs to.
    pub pass_hash: u64,
    /// Bound color textures.
    pub color: SmallVec<[TextureHandle; 4]>,
    /// Bound depth texture.
    pub depth: Option<TextureHandle>,
    /// Framebuffer extent.
    pub extent: Extent2d,
}

/// One resource binding within a binding-set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    /// Sampled texture plus sampler.
    SampledTexture,
    /// Uniform buffer.
    UniformBuffer,
    /// Storage buffer.
    StorageBuffer,
}

/// Fixed layout of one descriptor/binding set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BindingSetLayout {
    /// Binding types in binding-index order.
    pub entries: SmallVec<[BindingType; 8]>,
}

/// Primitive topology for a graphics pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    /// Separate triangles.
    TriangleList,
    /// Triangle strip.
    TriangleStrip,
    /// Line list.
    LineList,
}

/// Content description of a pipeline.
///
/// Shaders are referenced by the content hash of their bytecode, registered
/// once with the renderer; `pass_hash` folds the target pass into pipeline
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineDesc {
    /// Bytecode hash of the vertex (or compute) shader.
    pub shader: u64,
    /// Bytecode hash of the fragment shader, if any.
    pub fragment_shader: Option<u64>,
    /// Content hash of the pass this pipeline renders into (0 for compute).
    pub pass_hash: u64,
    /// Primitive topology.
    pub topology: Topology,
    /// Depth testing enabled.
    pub depth_test: bool,
    /// Binding-set layouts, set-index order.
    pub binding_sets: SmallVec<[BindingSetLayout; 4]>,
    /// Bytes per vertex (0 for vertex-pulling or compute).
    pub vertex_stride: u32,
}

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    /// Nearest-neighbor.
    Nearest,
    /// Linear interpolation.
    Linear,
}

/// Texture addressing outside [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    /// Repeat the texture.
    Repeat,
    /// Clamp to the edge texel.
    ClampToEdge,
}

/// Content description of a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    /// Minification filter.
    pub min_filter: Filter,
    /// Magnification filter.
    pub mag_filter: Filter,
    /// Addressing mode (all axes).
    pub address_mode: AddressMode,
}

/// Memory requirements reported by the backend for a created resource.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRequirements {
    /// Required size in bytes.
    pub size: u64,
    /// Required offset alignment in bytes.
    pub alignment: u64,
    /// Bitmask of acceptable memory type indices.
    pub type_bits: u32,
}

/// Properties of one device memory type.
#[derive(Debug, Clone, Copy)]
pub struct MemoryTypeInfo {
    /// Fast device-local memory.
    pub device_local: bool,
    /// CPU-mappable memory.
    pub host_visible: bool,
}

/// A concrete resource bound into a descriptor set at record time.
#[derive(Debug, Clone, Copy)]
pub enum ResolvedBinding {
    /// A sampled texture with its sampler.
    Texture {
        /// Binding index within the set.
        binding: u32,
        /// The texture.
        texture: TextureHandle,
        /// The sampler.
        sampler: SamplerHandle,
    },
    /// A buffer range.
    Buffer {
        /// Binding index within the set.
        binding: u32,
        /// The buffer.
        buffer: BufferHandle,
        /// Byte offset into the buffer.
        offset: u64,
        /// Bound range size in bytes.
        size: u64,
    },
}

/// Clear values for a pass begin, given at record time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearValues {
    /// Color clear value, applied to attachments with [`LoadOp::Clear`].
    pub color: [f32; 4],
    /// Depth clear value.
    pub depth: f32,
}
