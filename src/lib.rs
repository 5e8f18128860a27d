//! # Basalt
//!
//! A GPU resource lifecycle manager and render-graph cache for a
//! Vulkan-style graphics backend.
//!
//! Basalt sits between an application's per-frame render declarations and a
//! graphics API: the application redeclares what it wants every frame by
//! *content*, and Basalt deduplicates against caches of live GPU objects,
//! suballocates device memory, rotates frames in flight, and evicts what
//! stopped being declared.
//!
//! ## Features
//!
//! - **Content-addressed caching**: textures, buffers, passes, framebuffers,
//!   pipelines, and samplers are keyed by the hash of their description
//! - **Dependency hashing**: a framebuffer's identity folds in its pass's
//!   hash; a pipeline's folds in the pass it renders into
//! - **Device memory suballocation**: block-granular first-fit inside large
//!   native chunks
//! - **Frames in flight**: a fence-guarded slot ring with per-frame scratch,
//!   descriptor-pool rotation, and deferred destruction
//! - **Compile-time backends**: the renderer is generic over
//!   [`RenderBackend`](gpu::RenderBackend); a recording mock ships for tests
//!   and an ash backend behind the `vulkan` feature
//!
//! ## Quick Start
//!
//! ```rust
//! use basalt::prelude::*;
//!
//! let mut renderer = Renderer::new(MockBackend::new(), Config::default())?;
//! renderer.begin_frame()?;
//! let target = renderer.declare_texture(TextureDesc {
//!     format: Format::Rgba8Unorm,
//!     extent: Extent2d { width: 640, height: 480 },
//!     usage: TextureUsage::default(),
//!     samples: 1,
//! });
//! renderer.declare_pass(PassDeclaration {
//!     color: smallvec::smallvec![PassAttachment {
//!         texture: target,
//!         load: LoadOp::Clear,
//!         store: StoreOp::Store,
//!     }],
//!     depth: None,
//!     extent: Extent2d { width: 640, height: 480 },
//!     clears: ClearValues::default(),
//!     depends: PassDeps::none(),
//! });
//! renderer.end_frame()?;
//! # Ok::<(), basalt::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod graph;
pub mod hash;
pub mod ledger;
pub mod memory;
pub mod table;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::gpu::mock::MockBackend;
    pub use crate::gpu::{
        BufferDesc, BufferUsage, ClearValues, Extent2d, Format, LoadOp, PipelineDesc,
        RenderBackend, SamplerDesc, StoreOp, TextureDesc, TextureUsage,
    };
    pub use crate::graph::{
        Binding, PassAttachment, PassDeclaration, PassDeps, Renderer,
    };
}

pub use error::{Error, Result};
