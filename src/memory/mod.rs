//! GPU memory suballocation.
//!
//! Native device allocations are expensive and drivers cap their count, so
//! the allocator carves large chunks into 64-byte blocks and services
//! requests from contiguous aligned block runs, found with the same
//! bitset-ledger scan the CPU pools use. A chunk whose last allocation is
//! returned is freed natively in full.
//!
//! Single-writer, like everything else in the crate: the frame-building
//! thread is the only mutator.

use crate::config::BLOCK_SIZE;
use crate::error::{Error, Result};
use crate::gpu::{MemoryHandle, RenderBackend};
use crate::ledger::{Ledger, SlotId, SlotPool};
use std::ptr::NonNull;

/// An allocation request.
#[derive(Debug, Clone, Copy)]
pub struct AllocRequest {
    /// Requested size in bytes.
    pub size: u64,
    /// Required offset alignment in bytes.
    pub alignment: u64,
    /// Acceptable memory type indices (bitmask from the resource's
    /// requirements).
    pub type_bits: u32,
    /// Whether the memory must be CPU-mappable.
    pub host_visible: bool,
}

/// A suballocation inside a chunk.
///
/// Not `Clone`: an allocation is a linear token, handed back exactly once to
/// [`DeviceAllocator::deallocate`].
#[derive(Debug)]
pub struct DeviceAllocation {
    chunk: SlotId,
    memory: MemoryHandle,
    offset: u64,
    size: u64,
    block_start: usize,
    block_count: usize,
    mapped: Option<NonNull<u8>>,
}

impl DeviceAllocation {
    /// The owning chunk's native memory handle.
    pub fn memory(&self) -> MemoryHandle {
        self.memory
    }

    /// Byte offset inside the chunk. Always a multiple of the requested
    /// alignment.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Block-rounded size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// CPU pointer to this allocation, when the chunk is host-visible.
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.mapped
    }
}

/// One native chunk subdivided into blocks.
struct Chunk {
    memory: MemoryHandle,
    size: u64,
    mapped: Option<NonNull<u8>>,
    ledger: Ledger,
    type_index: u32,
    bytes_in_use: u64,
}

/// Chunked device memory allocator.
pub struct DeviceAllocator {
    chunks: SlotPool<Chunk>,
    chunk_size: u64,
}

impl DeviceAllocator {
    /// Create an allocator that requests native chunks of `chunk_size`
    /// bytes (larger when a single allocation needs more).
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is not a non-zero multiple of [`BLOCK_SIZE`];
    /// [`crate::config::Config::validate`] rejects such values earlier.
    pub fn new(chunk_size: u64) -> Self {
        assert!(
            chunk_size > 0 && chunk_size % BLOCK_SIZE == 0,
            "chunk size must be a non-zero multiple of {}",
            BLOCK_SIZE
        );
        Self {
            chunks: SlotPool::new(4096),
            chunk_size,
        }
    }

    /// Allocate device memory.
    ///
    /// Scans existing chunks of a compatible memory type for an aligned free
    /// block run; on miss, allocates a fresh chunk of
    /// `max(chunk_size, request)` and retries against it.
    pub fn allocate<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        req: &AllocRequest,
    ) -> Result<DeviceAllocation> {
        assert!(req.size > 0, "zero-size allocation");
        assert!(
            req.alignment.is_power_of_two(),
            "alignment {} is not a power of two",
            req.alignment
        );

        let type_index = self.pick_type_index(backend, req)?;
        let block_count = (req.size.div_ceil(BLOCK_SIZE)) as usize;
        let align_units = (req.alignment.div_ceil(BLOCK_SIZE) as usize).max(1);

        // First fit over existing compatible chunks. A mappable-memory
        // request can only land in a chunk that was actually mapped.
        for id in self.chunks.live_ids() {
            let candidate = self.chunks.get(id);
            if candidate.type_index != type_index
                || (req.host_visible && candidate.mapped.is_none())
            {
                continue;
            }
            let chunk = self.chunks.get_mut(id);
            if let Some(start) = chunk.ledger.take_run(block_count, align_units) {
                return Ok(Self::make_allocation(id, chunk, start, block_count));
            }
        }

        // No chunk fits: grow by one chunk and retry against it.
        let chunk_bytes = self
            .chunk_size
            .max((block_count as u64) * BLOCK_SIZE);
        let id = self.create_chunk(backend, type_index, chunk_bytes, req.host_visible)?;
        let chunk = self.chunks.get_mut(id);
        // A fresh chunk is sized for the request, so the run is there.
        let start = chunk
            .ledger
            .take_run(block_count, align_units)
            .expect("fresh chunk cannot satisfy its own sizing request");
        Ok(Self::make_allocation(id, chunk, start, block_count))
    }

    /// Return an allocation. Frees the whole chunk natively once its last
    /// allocation is gone.
    pub fn deallocate<B: RenderBackend>(&mut self, backend: &mut B, alloc: DeviceAllocation) {
        let chunk = self.chunks.get_mut(alloc.chunk);
        assert_eq!(
            chunk.memory, alloc.memory,
            "allocation returned to the wrong chunk"
        );
        chunk.ledger.release_run(alloc.block_start, alloc.block_count);
        chunk.bytes_in_use -= alloc.size;

        if chunk.bytes_in_use == 0 {
            let chunk = self.chunks.remove(alloc.chunk);
            tracing::debug!(size = chunk.size, "releasing empty memory chunk");
            backend.free_memory(chunk.memory);
        }
    }

    /// Free every chunk. Teardown path; all allocations must already be
    /// returned or deliberately abandoned.
    pub fn release_all<B: RenderBackend>(&mut self, backend: &mut B) {
        for id in self.chunks.live_ids() {
            let chunk = self.chunks.remove(id);
            backend.free_memory(chunk.memory);
        }
    }

    /// Number of live native chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total bytes allocated out of all chunks (block-rounded).
    pub fn bytes_in_use(&self) -> u64 {
        let mut total = 0;
        self.chunks.for_each(|_, chunk| total += chunk.bytes_in_use);
        total
    }

    fn make_allocation(
        id: SlotId,
        chunk: &mut Chunk,
        block_start: usize,
        block_count: usize,
    ) -> DeviceAllocation {
        let size = (block_count as u64) * BLOCK_SIZE;
        let offset = (block_start as u64) * BLOCK_SIZE;
        chunk.bytes_in_use += size;
        DeviceAllocation {
            chunk: id,
            memory: chunk.memory,
            offset,
            size,
            block_start,
            block_count,
            mapped: chunk
                .mapped
                .map(|base| unsafe { NonNull::new_unchecked(base.as_ptr().add(offset as usize)) }),
        }
    }

    /// Pick the first memory type matching the request's type bits and
    /// visibility requirement.
    fn pick_type_index<B: RenderBackend>(
        &self,
        backend: &B,
        req: &AllocRequest,
    ) -> Result<u32> {
        backend
            .memory_types()
            .iter()
            .enumerate()
            .position(|(index, info)| {
                req.type_bits & (1 << index) != 0 && (!req.host_visible || info.host_visible)
            })
            .map(|index| index as u32)
            .ok_or(Error::NoMatchingMemoryType {
                type_bits: req.type_bits,
                host_visible: req.host_visible,
            })
    }

    fn create_chunk<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        type_index: u32,
        size: u64,
        host_visible: bool,
    ) -> Result<SlotId> {
        let memory = backend
            .allocate_memory(type_index, size)
            .map_err(|_| Error::OutOfDeviceMemory(size))?;
        let mapped = if host_visible {
            Some(backend.map_memory(memory)?)
        } else {
            None
        };
        tracing::debug!(size, type_index, host_visible, "allocated memory chunk");
        Ok(self.chunks.insert(Chunk {
            memory,
            size,
            mapped,
            ledger: Ledger::new_committed((size / BLOCK_SIZE) as usize),
            type_index,
            bytes_in_use: 0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::mock::MockBackend;

    fn device_req(size: u64, alignment: u64) -> AllocRequest {
        AllocRequest {
            size,
            alignment,
            type_bits: 0b11,
            host_visible: false,
        }
    }

    #[test]
    fn test_alignment_honored() {
        let mut backend = MockBackend::new();
        let mut alloc = DeviceAllocator::new(4096);

        let a = alloc.allocate(&mut backend, &device_req(100, 256)).unwrap();
        let b = alloc.allocate(&mut backend, &device_req(100, 256)).unwrap();
        assert_eq!(a.offset() % 256, 0);
        assert_eq!(b.offset() % 256, 0);
        // Block-rounded: 100 bytes -> 2 blocks of 64.
        assert_eq!(alloc.bytes_in_use(), 256);

        alloc.deallocate(&mut backend, a);
        alloc.deallocate(&mut backend, b);
    }

    #[test]
    fn test_deallocate_then_allocate_reuses_blocks() {
        let mut backend = MockBackend::new();
        let mut alloc = DeviceAllocator::new(4096);

        let a = alloc.allocate(&mut backend, &device_req(512, 64)).unwrap();
        let keep = alloc.allocate(&mut backend, &device_req(64, 64)).unwrap();
        let offset = a.offset();
        alloc.deallocate(&mut backend, a);

        let b = alloc.allocate(&mut backend, &device_req(512, 64)).unwrap();
        assert_eq!(b.offset(), offset);
        assert_eq!(alloc.chunk_count(), 1);

        alloc.deallocate(&mut backend, b);
        alloc.deallocate(&mut backend, keep);
    }

    #[test]
    fn test_chunk_freed_exactly_when_empty() {
        let mut backend = MockBackend::new();
        let mut alloc = DeviceAllocator::new(1024);

        let a = alloc.allocate(&mut backend, &device_req(256, 64)).unwrap();
        let b = alloc.allocate(&mut backend, &device_req(256, 64)).unwrap();
        assert_eq!(alloc.chunk_count(), 1);
        assert_eq!(backend.live_memory_chunks(), 1);

        alloc.deallocate(&mut backend, a);
        assert_eq!(alloc.chunk_count(), 1);
        assert_eq!(backend.live_memory_chunks(), 1);

        alloc.deallocate(&mut backend, b);
        assert_eq!(alloc.chunk_count(), 0);
        assert_eq!(backend.live_memory_chunks(), 0);
    }

    #[test]
    fn test_oversized_request_gets_dedicated_chunk() {
        let mut backend = MockBackend::new();
        let mut alloc = DeviceAllocator::new(1024);

        let big = alloc.allocate(&mut backend, &device_req(8192, 64)).unwrap();
        assert_eq!(big.offset(), 0);
        assert_eq!(alloc.bytes_in_use(), 8192);
        alloc.deallocate(&mut backend, big);
    }

    #[test]
    fn test_second_chunk_when_first_is_full() {
        let mut backend = MockBackend::new();
        let mut alloc = DeviceAllocator::new(1024);

        let a = alloc.allocate(&mut backend, &device_req(1024, 64)).unwrap();
        let b = alloc.allocate(&mut backend, &device_req(1024, 64)).unwrap();
        assert_eq!(alloc.chunk_count(), 2);
        alloc.deallocate(&mut backend, a);
        alloc.deallocate(&mut backend, b);
        assert_eq!(alloc.chunk_count(), 0);
    }

    #[test]
    fn test_host_visible_allocation_is_mapped() {
        let mut backend = MockBackend::new();
        let mut alloc = DeviceAllocator::new(4096);

        let req = AllocRequest {
            size: 128,
            alignment: 64,
            type_bits: 0b11,
            host_visible: true,
        };
        let a = alloc.allocate(&mut backend, &req).unwrap();
        let ptr = a.mapped_ptr().expect("host-visible memory must be mapped");
        unsafe { ptr.as_ptr().write_bytes(0xAB, 128) };
        assert_eq!(backend.memory_bytes(a.memory())[a.offset() as usize], 0xAB);
        alloc.deallocate(&mut backend, a);
    }

    #[test]
    fn test_host_visible_request_skips_unmapped_chunk() {
        let mut backend = MockBackend::new();
        let mut alloc = DeviceAllocator::new(4096);

        // Both requests resolve to the host-visible memory type, but the
        // first chunk is created without a mapping. The mappable request
        // must not reuse it.
        let plain = alloc
            .allocate(
                &mut backend,
                &AllocRequest {
                    size: 64,
                    alignment: 64,
                    type_bits: 0b10,
                    host_visible: false,
                },
            )
            .unwrap();
        let mapped = alloc
            .allocate(
                &mut backend,
                &AllocRequest {
                    size: 64,
                    alignment: 64,
                    type_bits: 0b10,
                    host_visible: true,
                },
            )
            .unwrap();

        assert!(plain.mapped_ptr().is_none());
        assert!(
            mapped.mapped_ptr().is_some(),
            "mappable allocation landed in an unmapped chunk"
        );
        assert_eq!(alloc.chunk_count(), 2);

        alloc.deallocate(&mut backend, plain);
        alloc.deallocate(&mut backend, mapped);
    }

    #[test]
    fn test_no_matching_type_is_error() {
        let mut backend = MockBackend::new();
        let mut alloc = DeviceAllocator::new(4096);
        let req = AllocRequest {
            size: 64,
            alignment: 64,
            // Type 0 only, but host visibility requires type 1.
            type_bits: 0b01,
            host_visible: true,
        };
        assert!(matches!(
            alloc.allocate(&mut backend, &req),
            Err(Error::NoMatchingMemoryType { .. })
        ));
    }
}
