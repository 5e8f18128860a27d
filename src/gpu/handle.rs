//! Opaque handles for backend-owned objects.
//!
//! A handle packs a kind tag, a generation, and a pool index into one `u64`.
//! Kinds exist to catch the classic misuse of opaque-handle APIs, passing a
//! buffer where a texture is expected; unpacking with the wrong kind is an
//! assertion failure, not a silent reinterpretation. Generations let a
//! backend detect stale handles to recycled slots.

/// What kind of backend object a handle names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HandleKind {
    /// 2D texture / image.
    Texture = 1,
    /// Linear buffer.
    Buffer,
    /// Render pass.
    Pass,
    /// Framebuffer.
    Framebuffer,
    /// Graphics or compute pipeline.
    Pipeline,
    /// Texture sampler.
    Sampler,
    /// Native device memory allocation.
    Memory,
    /// CPU-waitable completion fence.
    Fence,
    /// GPU-GPU ordering semaphore.
    Semaphore,
    /// Command buffer.
    CommandBuffer,
    /// Descriptor pool.
    DescriptorPool,
    /// Descriptor set.
    DescriptorSet,
}

/// Type-erased handle: `kind:8 | generation:24 | index:32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(u64);

impl RawHandle {
    /// Pack a handle.
    pub fn new(kind: HandleKind, generation: u32, index: u32) -> Self {
        debug_assert!(generation < (1 << 24), "generation overflow");
        Self(((kind as u64) << 56) | ((generation as u64) << 32) | index as u64)
    }

    /// The kind tag.
    pub fn kind(self) -> HandleKind {
        match (self.0 >> 56) as u8 {
            1 => HandleKind::Texture,
            2 => HandleKind::Buffer,
            3 => HandleKind::Pass,
            4 => HandleKind::Framebuffer,
            5 => HandleKind::Pipeline,
            6 => HandleKind::Sampler,
            7 => HandleKind::Memory,
            8 => HandleKind::Fence,
            9 => HandleKind::Semaphore,
            10 => HandleKind::CommandBuffer,
            11 => HandleKind::DescriptorPool,
            12 => HandleKind::DescriptorSet,
            other => panic!("corrupt handle kind tag {}", other),
        }
    }

    /// Pool index.
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// Generation counter.
    pub fn generation(self) -> u32 {
        ((self.0 >> 32) & 0x00ff_ffff) as u32
    }

    /// Assert the kind tag and return the index.
    ///
    /// # Panics
    ///
    /// Panics if the handle is of a different kind.
    pub fn expect_kind(self, kind: HandleKind) -> u32 {
        assert!(
            self.kind() == kind,
            "handle kind mismatch: expected {:?}, got {:?}",
            kind,
            self.kind()
        );
        self.index()
    }
}

macro_rules! typed_handle {
    ($(#[$doc:meta])* $name:ident, $kind:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(RawHandle);

        impl $name {
            /// Wrap a raw handle.
            ///
            /// # Panics
            ///
            /// Panics if the raw handle carries a different kind tag.
            pub fn from_raw(raw: RawHandle) -> Self {
                raw.expect_kind(HandleKind::$kind);
                Self(raw)
            }

            /// Build a handle of this kind.
            pub fn new(generation: u32, index: u32) -> Self {
                Self(RawHandle::new(HandleKind::$kind, generation, index))
            }

            /// The underlying raw handle.
            pub fn raw(self) -> RawHandle {
                self.0
            }

            /// Pool index.
            pub fn index(self) -> u32 {
                self.0.index()
            }
        }
    };
}

typed_handle!(
    /// Handle to a backend texture.
    TextureHandle,
    Texture
);
typed_handle!(
    /// Handle to a backend buffer.
    BufferHandle,
    Buffer
);
typed_handle!(
    /// Handle to a render pass.
    PassHandle,
    Pass
);
typed_handle!(
    /// Handle to a framebuffer.
    FramebufferHandle,
    Framebuffer
);
typed_handle!(
    /// Handle to a pipeline.
    PipelineHandle,
    Pipeline
);
typed_handle!(
    /// Handle to a sampler.
    SamplerHandle,
    Sampler
);
typed_handle!(
    /// Handle to a native device memory allocation.
    MemoryHandle,
    Memory
);
typed_handle!(
    /// Handle to a fence.
    FenceHandle,
    Fence
);
typed_handle!(
    /// Handle to a semaphore.
    SemaphoreHandle,
    Semaphore
);
typed_handle!(
    /// Handle to a command buffer.
    CommandBufferHandle,
    CommandBuffer
);
typed_handle!(
    /// Handle to a descriptor pool.
    DescriptorPoolHandle,
    DescriptorPool
);
typed_handle!(
    /// Handle to a descriptor set.
    DescriptorSetHandle,
    DescriptorSet
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let raw = RawHandle::new(HandleKind::Texture, 3, 41);
        assert_eq!(raw.kind(), HandleKind::Texture);
        assert_eq!(raw.generation(), 3);
        assert_eq!(raw.index(), 41);
    }

    #[test]
    #[should_panic(expected = "kind mismatch")]
    fn test_wrong_kind_panics() {
        let raw = RawHandle::new(HandleKind::Buffer, 0, 7);
        TextureHandle::from_raw(raw);
    }
}
