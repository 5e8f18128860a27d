//! Frame-in-flight management.
//!
//! A ring of `K` frame slots lets the CPU build frame `N` while the GPU
//! still executes frames `N-1..N-K`. Each slot owns the transient state of
//! one in-flight frame: a mapped scratch buffer, the "image available"
//! semaphore, the command buffers and completion fence of its last
//! submission, its descriptor pools, and a deferred-destruction list.
//!
//! Slot state cycles Idle → Acquiring → Recording → Submitted → Idle. A
//! slot's resources are touched again only after `advance_frame` has waited
//! out the slot's previous fence, and an extra cross-slot wait prevents two
//! in-flight frames from writing the same presentable image concurrently.

mod descriptors;

pub use descriptors::DescriptorPoolSet;

use crate::config::Config;
use crate::error::Result;
use crate::gpu::{
    BufferDesc, BufferHandle, BufferUsage, CommandBufferHandle, FenceHandle, PassHandle,
    PipelineHandle, RawHandle, RenderBackend, SamplerHandle, SemaphoreHandle, TextureHandle,
    FramebufferHandle, DescriptorSetHandle,
};
use crate::memory::{AllocRequest, DeviceAllocation, DeviceAllocator};
use std::collections::HashMap;
use std::ptr::NonNull;

/// Scratch-buffer bump alignment; covers uniform-offset requirements.
const SCRATCH_ALIGN: u64 = 256;

/// A bump allocation out of the active frame's scratch buffer.
///
/// Valid until this frame slot is reused; the caller must not hold it across
/// frames.
pub struct ScratchAlloc {
    /// The slot's scratch buffer.
    pub buffer: BufferHandle,
    /// Byte offset of this allocation.
    pub offset: u64,
    /// Allocation size in bytes.
    pub size: u64,
    ptr: NonNull<u8>,
}

impl ScratchAlloc {
    /// Copy `data` into the scratch region.
    ///
    /// # Panics
    ///
    /// Panics if `data` exceeds the allocation.
    pub fn write(&mut self, data: &[u8]) {
        assert!(
            data.len() as u64 <= self.size,
            "scratch write of {} bytes into a {}-byte allocation",
            data.len(),
            self.size
        );
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr(), data.len());
        }
    }
}

/// A destruction postponed until the deferring frame's GPU work completes.
pub enum DeferredDestroy {
    /// Texture plus its suballocation.
    Texture(TextureHandle, DeviceAllocation),
    /// Buffer plus its suballocation.
    Buffer(BufferHandle, DeviceAllocation),
    /// Framebuffer.
    Framebuffer(FramebufferHandle),
    /// Render pass.
    Pass(PassHandle),
    /// Pipeline.
    Pipeline(PipelineHandle),
    /// Sampler.
    Sampler(SamplerHandle),
}

struct FrameSlot {
    scratch_buffer: BufferHandle,
    scratch_memory: Option<DeviceAllocation>,
    scratch_ptr: NonNull<u8>,
    scratch_cursor: u64,
    scratch_size: u64,
    image_available: SemaphoreHandle,
    fence: FenceHandle,
    submitted: Vec<CommandBufferHandle>,
    pools: HashMap<(RawHandle, u32), DescriptorPoolSet>,
    deferred: Vec<DeferredDestroy>,
}

/// Ring of in-flight frame slots.
pub struct FrameManager {
    slots: Vec<FrameSlot>,
    /// Monotonic frame counter; slot = `frame_number % slots.len()`.
    frame_number: u64,
    /// Which slot last used each presentable image.
    image_owner: Vec<Option<usize>>,
    /// Image acquired for the current frame.
    current_image: u32,
}

impl FrameManager {
    /// Create the slot ring: per slot, a host-visible mapped scratch buffer,
    /// an image-available semaphore, and a pre-signaled completion fence
    /// (so the slot's first reuse has nothing to wait for).
    pub fn new<B: RenderBackend>(
        backend: &mut B,
        allocator: &mut DeviceAllocator,
        config: &Config,
    ) -> Result<Self> {
        let mut slots = Vec::with_capacity(config.in_flight_depth);
        for _ in 0..config.in_flight_depth {
            let scratch_buffer = backend.create_buffer(&BufferDesc {
                size: config.scratch_size,
                usage: BufferUsage {
                    uniform: true,
                    transfer_src: true,
                    ..Default::default()
                },
                host_visible: true,
            })?;
            let requirements = backend.buffer_requirements(scratch_buffer);
            let scratch_memory = allocator.allocate(
                backend,
                &AllocRequest {
                    size: requirements.size,
                    alignment: requirements.alignment,
                    type_bits: requirements.type_bits,
                    host_visible: true,
                },
            )?;
            backend.bind_buffer_memory(
                scratch_buffer,
                scratch_memory.memory(),
                scratch_memory.offset(),
            )?;
            let scratch_ptr = scratch_memory
                .mapped_ptr()
                .expect("host-visible scratch memory must be mapped");

            slots.push(FrameSlot {
                scratch_buffer,
                scratch_memory: Some(scratch_memory),
                scratch_ptr,
                scratch_cursor: 0,
                scratch_size: config.scratch_size,
                image_available: backend.create_semaphore(),
                fence: backend.create_fence(true),
                submitted: Vec::new(),
                pools: HashMap::new(),
                deferred: Vec::new(),
            });
        }

        Ok(Self {
            slots,
            frame_number: 0,
            image_owner: vec![None; backend.swapchain_image_count() as usize],
            current_image: 0,
        })
    }

    /// Advance to the next frame slot, retiring its previous use.
    ///
    /// In order: wait the slot's completion fence; destroy the command
    /// buffers it recorded last time; drain its deferred destructions;
    /// bulk-reset its descriptor pools; rewind its scratch cursor; acquire
    /// the next presentable image; if another slot touched that image last,
    /// wait that slot's fence too; record the new image → slot mapping.
    pub fn advance_frame<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        allocator: &mut DeviceAllocator,
    ) -> Result<()> {
        self.frame_number += 1;
        let slot_index = self.current_slot();

        {
            let slot = &mut self.slots[slot_index];
            backend.wait_fence(slot.fence);
            for cmd in slot.submitted.drain(..) {
                backend.destroy_command_buffer(cmd);
            }
            for deferred in slot.deferred.drain(..) {
                match deferred {
                    DeferredDestroy::Texture(handle, memory) => {
                        backend.destroy_texture(handle);
                        allocator.deallocate(backend, memory);
                    }
                    DeferredDestroy::Buffer(handle, memory) => {
                        backend.destroy_buffer(handle);
                        allocator.deallocate(backend, memory);
                    }
                    DeferredDestroy::Framebuffer(handle) => backend.destroy_framebuffer(handle),
                    DeferredDestroy::Pass(handle) => backend.destroy_pass(handle),
                    DeferredDestroy::Pipeline(handle) => backend.destroy_pipeline(handle),
                    DeferredDestroy::Sampler(handle) => backend.destroy_sampler(handle),
                }
            }
            for pool_set in slot.pools.values_mut() {
                pool_set.reset(backend);
            }
            slot.scratch_cursor = 0;
        }

        let image = backend.acquire_image(self.slots[slot_index].image_available)?;
        if let Some(owner) = self.image_owner[image as usize] {
            if owner != slot_index {
                tracing::trace!(image, owner, "image still owned by another in-flight slot");
                backend.wait_fence(self.slots[owner].fence);
            }
        }
        self.image_owner[image as usize] = Some(slot_index);
        self.current_image = image;
        Ok(())
    }

    /// Bump-allocate from the active slot's scratch buffer.
    ///
    /// # Panics
    ///
    /// Panics if the scratch capacity is exceeded; per-frame transient
    /// memory is a capacity contract, not a growable resource.
    pub fn alloc_scratch(&mut self, size: u64) -> ScratchAlloc {
        let slot_index = self.current_slot();
        let slot = &mut self.slots[slot_index];
        let offset = slot.scratch_cursor.next_multiple_of(SCRATCH_ALIGN);
        assert!(
            offset + size <= slot.scratch_size,
            "scratch buffer exhausted: {} + {} exceeds {}",
            offset,
            size,
            slot.scratch_size
        );
        slot.scratch_cursor = offset + size;
        ScratchAlloc {
            buffer: slot.scratch_buffer,
            offset,
            size,
            ptr: unsafe {
                NonNull::new_unchecked(slot.scratch_ptr.as_ptr().add(offset as usize))
            },
        }
    }

    /// Allocate a descriptor set from the active slot's rotating pools,
    /// registering a pool set for `(pipeline, set_index)` on first use.
    pub fn allocate_descriptor_set<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        pipeline: PipelineHandle,
        set_index: u32,
    ) -> Result<DescriptorSetHandle> {
        let slot_index = self.current_slot();
        let slot = &mut self.slots[slot_index];
        slot.pools
            .entry((pipeline.raw(), set_index))
            .or_default()
            .allocate(backend, pipeline, set_index)
    }

    /// Record the command buffers submitted for this frame; they are
    /// destroyed when this slot is next reused.
    pub fn note_submitted(&mut self, cmds: impl IntoIterator<Item = CommandBufferHandle>) {
        let slot_index = self.current_slot();
        self.slots[slot_index].submitted.extend(cmds);
    }

    /// Queue a destruction for when this slot's GPU work completes.
    pub fn defer_destroy(&mut self, deferred: DeferredDestroy) {
        let slot_index = self.current_slot();
        self.slots[slot_index].deferred.push(deferred);
    }

    /// Current frame number (increments on `advance_frame`).
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Index of the active slot.
    pub fn current_slot(&self) -> usize {
        (self.frame_number % self.slots.len() as u64) as usize
    }

    /// The active slot's completion fence.
    pub fn fence(&self) -> FenceHandle {
        self.slots[self.current_slot()].fence
    }

    /// The active slot's image-available semaphore.
    pub fn image_available(&self) -> SemaphoreHandle {
        self.slots[self.current_slot()].image_available
    }

    /// The presentable image acquired for the current frame.
    pub fn current_image(&self) -> u32 {
        self.current_image
    }

    /// Destroy all slot resources. Waits out every in-flight frame first.
    pub fn destroy<B: RenderBackend>(
        mut self,
        backend: &mut B,
        allocator: &mut DeviceAllocator,
    ) {
        for slot in &mut self.slots {
            backend.wait_fence(slot.fence);
        }
        for mut slot in self.slots.drain(..) {
            for cmd in slot.submitted.drain(..) {
                backend.destroy_command_buffer(cmd);
            }
            for deferred in slot.deferred.drain(..) {
                match deferred {
                    DeferredDestroy::Texture(handle, memory) => {
                        backend.destroy_texture(handle);
                        allocator.deallocate(backend, memory);
                    }
                    DeferredDestroy::Buffer(handle, memory) => {
                        backend.destroy_buffer(handle);
                        allocator.deallocate(backend, memory);
                    }
                    DeferredDestroy::Framebuffer(handle) => backend.destroy_framebuffer(handle),
                    DeferredDestroy::Pass(handle) => backend.destroy_pass(handle),
                    DeferredDestroy::Pipeline(handle) => backend.destroy_pipeline(handle),
                    DeferredDestroy::Sampler(handle) => backend.destroy_sampler(handle),
                }
            }
            for (_, mut pool_set) in slot.pools.drain() {
                pool_set.destroy(backend);
            }
            backend.destroy_semaphore(slot.image_available);
            backend.destroy_fence(slot.fence);
            backend.destroy_buffer(slot.scratch_buffer);
            if let Some(memory) = slot.scratch_memory.take() {
                allocator.deallocate(backend, memory);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::mock::{MockBackend, MockEvent};

    fn manager(backend: &mut MockBackend) -> (FrameManager, DeviceAllocator) {
        let mut allocator = DeviceAllocator::new(crate::config::BLOCK_SIZE * 1024);
        let config = Config {
            scratch_size: 4096,
            ..Config::default()
        };
        let manager = FrameManager::new(backend, &mut allocator, &config).unwrap();
        (manager, allocator)
    }

    #[test]
    fn test_slot_rotation() {
        let mut backend = MockBackend::new();
        let (mut manager, mut allocator) = manager(&mut backend);

        assert_eq!(manager.current_slot(), 0);
        manager.advance_frame(&mut backend, &mut allocator).unwrap();
        assert_eq!(manager.current_slot(), 1);
        manager.advance_frame(&mut backend, &mut allocator).unwrap();
        assert_eq!(manager.current_slot(), 0);
        assert_eq!(manager.frame_number(), 2);

        manager.destroy(&mut backend, &mut allocator);
        allocator.release_all(&mut backend);
    }

    #[test]
    fn test_slot_reuse_waits_fence_then_destroys_buffers() {
        let mut backend = MockBackend::new();
        backend.fence_delay = 10;
        let (mut manager, mut allocator) = manager(&mut backend);

        manager.advance_frame(&mut backend, &mut allocator).unwrap();
        let fence = manager.fence();
        backend.reset_fence(fence);
        let cmd = backend.create_command_buffer();
        backend.begin_commands(cmd);
        backend.end_commands(cmd);
        backend.submit(cmd, &[], &[], Some(fence));
        manager.note_submitted([cmd]);

        // Ride the ring back to the same slot (K + 1 advances total).
        manager.advance_frame(&mut backend, &mut allocator).unwrap();
        manager.advance_frame(&mut backend, &mut allocator).unwrap();

        // The wait on the originating fence must precede the destruction of
        // the slot's previous command buffers.
        let events = &backend.events;
        let wait_pos = events
            .iter()
            .position(|e| *e == MockEvent::WaitFence(fence))
            .expect("slot fence was never waited");
        let destroy_pos = events
            .iter()
            .position(|e| *e == MockEvent::DestroyCommandBuffer(cmd))
            .expect("previous command buffer was never destroyed");
        assert!(wait_pos < destroy_pos);

        manager.destroy(&mut backend, &mut allocator);
        allocator.release_all(&mut backend);
    }

    #[test]
    fn test_image_double_use_waits_other_slot() {
        // A single presentable image with two slots: every acquisition
        // lands on an image last owned by the other slot.
        let mut backend = MockBackend::new().with_swapchain_images(1);
        let (mut manager, mut allocator) = manager(&mut backend);

        manager.advance_frame(&mut backend, &mut allocator).unwrap(); // slot 1 takes image 0
        let slot1_fence = manager.fence();
        backend.events.clear();
        manager.advance_frame(&mut backend, &mut allocator).unwrap(); // slot 0 needs image 0
        assert!(
            backend.events.contains(&MockEvent::WaitFence(slot1_fence)),
            "reusing an image owned by another slot must wait that slot's fence"
        );

        manager.destroy(&mut backend, &mut allocator);
        allocator.release_all(&mut backend);
    }

    #[test]
    fn test_scratch_bump_and_reset() {
        let mut backend = MockBackend::new();
        let (mut manager, mut allocator) = manager(&mut backend);
        manager.advance_frame(&mut backend, &mut allocator).unwrap();

        let a = manager.alloc_scratch(100);
        let b = manager.alloc_scratch(100);
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 256);

        // Same slot after a full ring revolution: cursor rewound.
        manager.advance_frame(&mut backend, &mut allocator).unwrap();
        manager.advance_frame(&mut backend, &mut allocator).unwrap();
        let c = manager.alloc_scratch(100);
        assert_eq!(c.offset, 0);

        manager.destroy(&mut backend, &mut allocator);
        allocator.release_all(&mut backend);
    }

    #[test]
    #[should_panic(expected = "scratch buffer exhausted")]
    fn test_scratch_overflow_panics() {
        let mut backend = MockBackend::new();
        let (mut manager, mut allocator) = manager(&mut backend);
        manager.advance_frame(&mut backend, &mut allocator).unwrap();
        manager.alloc_scratch(4096);
        manager.alloc_scratch(1);
    }

    #[test]
    fn test_scratch_write_lands_in_memory() {
        let mut backend = MockBackend::new();
        let (mut manager, mut allocator) = manager(&mut backend);
        manager.advance_frame(&mut backend, &mut allocator).unwrap();

        let mut alloc = manager.alloc_scratch(16);
        alloc.write(b"frame payload!!!");

        manager.destroy(&mut backend, &mut allocator);
        allocator.release_all(&mut backend);
    }
}
