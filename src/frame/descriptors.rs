//! Descriptor pool rotation.
//!
//! One `DescriptorPoolSet` exists per (pipeline, binding-set index) per
//! frame slot. Pools hold a fixed number of sets; allocation walks the pools
//! in order, marking a pool exhausted on its first failed allocation and
//! appending a fresh pool once every existing one is exhausted. The whole
//! set is bulk-reset when its frame slot comes back around.

use crate::config::DESCRIPTOR_POOL_CAPACITY;
use crate::error::Result;
use crate::gpu::{DescriptorPoolHandle, DescriptorSetHandle, PipelineHandle, RenderBackend};

struct PoolEntry {
    handle: DescriptorPoolHandle,
    /// Skipped for the rest of the frame once an allocation fails.
    exhausted: bool,
}

/// Rotating pools for one binding set of one pipeline.
pub struct DescriptorPoolSet {
    pools: Vec<PoolEntry>,
    capacity: u32,
}

impl DescriptorPoolSet {
    /// Create an empty set; the first pool appears on first allocation.
    pub fn new() -> Self {
        Self {
            pools: Vec::new(),
            capacity: DESCRIPTOR_POOL_CAPACITY,
        }
    }

    /// Allocate one descriptor set.
    ///
    /// Pool exhaustion is the one recoverable allocation failure in the
    /// system: an exhausted pool is flagged and skipped, and a new pool is
    /// created when none remain.
    pub fn allocate<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        pipeline: PipelineHandle,
        set_index: u32,
    ) -> Result<DescriptorSetHandle> {
        for entry in &mut self.pools {
            if entry.exhausted {
                continue;
            }
            match backend.allocate_descriptor_set(entry.handle, pipeline, set_index) {
                Some(set) => return Ok(set),
                None => {
                    tracing::trace!(pool = entry.handle.index(), "descriptor pool exhausted");
                    entry.exhausted = true;
                }
            }
        }

        let handle = backend.create_descriptor_pool(self.capacity)?;
        let set = backend
            .allocate_descriptor_set(handle, pipeline, set_index)
            .expect("freshly created descriptor pool refused an allocation");
        self.pools.push(PoolEntry {
            handle,
            exhausted: false,
        });
        Ok(set)
    }

    /// Bulk-reset every pool and clear the exhausted flags. Called when the
    /// owning frame slot is reused.
    pub fn reset<B: RenderBackend>(&mut self, backend: &mut B) {
        for entry in &mut self.pools {
            backend.reset_descriptor_pool(entry.handle);
            entry.exhausted = false;
        }
    }

    /// Destroy every pool. Teardown only.
    pub fn destroy<B: RenderBackend>(&mut self, backend: &mut B) {
        for entry in self.pools.drain(..) {
            backend.destroy_descriptor_pool(entry.handle);
        }
    }

    /// Number of pools created so far.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }
}

impl Default for DescriptorPoolSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::mock::MockBackend;
    use crate::gpu::{PipelineDesc, Topology};

    fn pipeline(backend: &mut MockBackend) -> PipelineHandle {
        backend
            .create_pipeline(
                &PipelineDesc {
                    shader: 1,
                    fragment_shader: None,
                    pass_hash: 0,
                    topology: Topology::TriangleList,
                    depth_test: false,
                    binding_sets: Default::default(),
                    vertex_stride: 0,
                },
                None,
                &[],
            )
            .unwrap()
    }

    #[test]
    fn test_new_pool_appended_on_exhaustion() {
        let mut backend = MockBackend::new();
        let pipeline = pipeline(&mut backend);
        let mut set = DescriptorPoolSet::new();
        set.capacity = 2;

        for _ in 0..5 {
            set.allocate(&mut backend, pipeline, 0).unwrap();
        }
        // 2 + 2 + 1 allocations across three pools.
        assert_eq!(set.pool_count(), 3);
    }

    #[test]
    fn test_reset_makes_pools_reusable() {
        let mut backend = MockBackend::new();
        let pipeline = pipeline(&mut backend);
        let mut set = DescriptorPoolSet::new();
        set.capacity = 2;

        for _ in 0..4 {
            set.allocate(&mut backend, pipeline, 0).unwrap();
        }
        assert_eq!(set.pool_count(), 2);

        set.reset(&mut backend);
        for _ in 0..4 {
            set.allocate(&mut backend, pipeline, 0).unwrap();
        }
        // Reset pools absorbed the load; no new pool needed.
        assert_eq!(set.pool_count(), 2);
    }
}
