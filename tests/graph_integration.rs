//! Integration tests for the frame loop against the recording backend.
//!
//! These drive whole frames through the renderer — declarations, resolve,
//! submission, present — and assert on the backend's recorded submissions,
//! command streams, and object liveness.

use basalt::config::Config;
use basalt::gpu::mock::{MockBackend, MockEvent, RecordedCommand};
use basalt::gpu::{
    BindingSetLayout, BindingType, BufferDesc, BufferUsage, ClearValues, Extent2d, Filter,
    AddressMode, Format, LoadOp, PipelineDesc, SamplerDesc, StoreOp, TextureDesc, TextureUsage,
    Topology,
};
use basalt::graph::{Binding, PassAttachment, PassDeclaration, PassDeps, PassRef, Renderer};
use smallvec::smallvec;

fn renderer() -> Renderer<MockBackend> {
    Renderer::new(
        MockBackend::new(),
        Config {
            chunk_size: 4 << 20,
            scratch_size: 64 * 1024,
            ..Config::default()
        },
    )
    .unwrap()
}

fn target_desc(width: u32, height: u32) -> TextureDesc {
    TextureDesc {
        format: Format::Rgba8Unorm,
        extent: Extent2d { width, height },
        usage: TextureUsage::default(),
        samples: 1,
    }
}

fn declare_clear_pass(
    r: &mut Renderer<MockBackend>,
    width: u32,
    height: u32,
    depends: PassDeps,
) -> PassRef {
    let target = r.declare_texture(target_desc(width, height));
    r.declare_pass(PassDeclaration {
        color: smallvec![PassAttachment {
            texture: target,
            load: LoadOp::Clear,
            store: StoreOp::Store,
        }],
        depth: None,
        extent: Extent2d { width, height },
        clears: ClearValues::default(),
        depends,
    })
}

// ============================================================================
// Full Draw Path
// ============================================================================

/// A textured draw with a uniform block: pipeline, sampler, descriptor set,
/// and staged uniform data all resolve and land in the command stream.
#[test]
fn test_textured_draw_records_full_command_stream() {
    let mut r = renderer();
    let shader = r.register_shader(&[0x0723_0203, 1, 2, 3]);
    let fragment = r.register_shader(&[0x0723_0203, 9, 8, 7]);

    r.begin_frame().unwrap();

    let albedo = r.declare_texture(target_desc(256, 256));
    let pass = declare_clear_pass(&mut r, 640, 480, PassDeps::none());
    let sampler = r.declare_sampler(SamplerDesc {
        min_filter: Filter::Linear,
        mag_filter: Filter::Linear,
        address_mode: AddressMode::Repeat,
    });
    let pipeline = r.declare_pipeline(PipelineDesc {
        shader,
        fragment_shader: Some(fragment),
        pass_hash: 0,
        topology: Topology::TriangleList,
        depth_test: false,
        binding_sets: smallvec![BindingSetLayout {
            entries: smallvec![BindingType::SampledTexture, BindingType::UniformBuffer],
        }],
        vertex_stride: 0,
    });

    let uniforms = r.stage(&[0u8; 128]);
    r.cmd_bind_pipeline(pass, pipeline);
    r.cmd_bind_set(
        pass,
        0,
        &[
            Binding::Texture {
                binding: 0,
                texture: albedo,
                sampler,
            },
            Binding::Uniform {
                binding: 1,
                slice: uniforms,
            },
        ],
    );
    r.cmd_draw(pass, 3, 1);
    r.end_frame().unwrap();

    let cmd = r.backend().submits[0].cmd;
    let commands = r.backend().commands_of(cmd);
    assert!(matches!(commands[0], RecordedCommand::BeginPass(..)));
    assert!(matches!(commands[1], RecordedCommand::BindPipeline(_)));
    assert!(matches!(
        commands[2],
        RecordedCommand::BindDescriptorSet(_, 0, _)
    ));
    assert_eq!(commands[3], RecordedCommand::Draw(3, 1));
    assert_eq!(*commands.last().unwrap(), RecordedCommand::EndPass);

    // One present, waiting the pass's signal semaphore.
    let present = &r.backend().presents[0];
    assert_eq!(present.waits, r.backend().submits[0].signals);
}

// ============================================================================
// Steady-State Caching
// ============================================================================

/// A frame loop that redeclares the same content settles into pure cache
/// hits: after the first frame, no object is created or destroyed.
#[test]
fn test_steady_state_creates_nothing() {
    let mut r = renderer();
    let shader = r.register_shader(&[1, 2, 3]);

    let frame = |r: &mut Renderer<MockBackend>| {
        r.begin_frame().unwrap();
        let pass = declare_clear_pass(r, 640, 480, PassDeps::none());
        let pipeline = r.declare_pipeline(PipelineDesc {
            shader,
            fragment_shader: None,
            pass_hash: 0,
            topology: Topology::TriangleList,
            depth_test: false,
            binding_sets: smallvec![],
            vertex_stride: 16,
        });
        r.cmd_bind_pipeline(pass, pipeline);
        r.cmd_draw(pass, 3, 1);
        r.end_frame().unwrap();
    };

    frame(&mut r);
    let baseline_objects = r.backend().live_objects();
    let baseline_misses = r.stats().misses;

    for _ in 0..20 {
        frame(&mut r);
    }

    assert_eq!(r.backend().live_objects(), baseline_objects);
    assert_eq!(r.stats().misses, baseline_misses);
    assert_eq!(r.stats().evictions, 0);
}

/// Resizing the render target creates a new texture and framebuffer but
/// reuses the pass and pipeline, whose identities do not include extents.
#[test]
fn test_resize_replaces_texture_but_reuses_pass() {
    let mut r = renderer();

    r.begin_frame().unwrap();
    declare_clear_pass(&mut r, 640, 480, PassDeps::none());
    r.end_frame().unwrap();
    let before = r.stats();
    assert_eq!(before.misses, 3); // texture, pass, framebuffer

    r.begin_frame().unwrap();
    declare_clear_pass(&mut r, 800, 600, PassDeps::none());
    r.end_frame().unwrap();
    let after = r.stats();

    // New texture and framebuffer; the pass is the lone hit.
    assert_eq!(after.misses - before.misses, 2);
    assert_eq!(after.hits - before.hits, 1);
    assert_eq!(r.backend().live_textures(), 2);

    // Keep rendering at the new size until the old target ages out.
    for _ in 0..7 {
        r.begin_frame().unwrap();
        declare_clear_pass(&mut r, 800, 600, PassDeps::none());
        r.end_frame().unwrap();
    }
    assert_eq!(r.backend().live_textures(), 1);
    assert_eq!(r.stats().evictions, 2);
}

// ============================================================================
// Pass Dependencies
// ============================================================================

/// A three-pass chain: shadow → scene → post. Each submission waits exactly
/// its declared dependency, and only the tail reaches the present.
#[test]
fn test_pass_chain_orders_submissions() {
    let mut r = renderer();
    r.begin_frame().unwrap();
    let shadow = declare_clear_pass(&mut r, 1024, 1024, PassDeps::none());
    let scene = declare_clear_pass(&mut r, 640, 480, PassDeps::on(shadow));
    let _post = declare_clear_pass(&mut r, 640, 481, PassDeps::on(scene));
    r.end_frame().unwrap();

    let submits = &r.backend().submits;
    assert_eq!(submits.len(), 3);
    assert!(submits[1].waits.contains(&submits[0].signals[0]));
    assert!(submits[2].waits.contains(&submits[1].signals[0]));
    assert!(!submits[2].waits.contains(&submits[0].signals[0]));

    let present = &r.backend().presents[0];
    assert_eq!(present.waits, vec![submits[2].signals[0]]);
}

/// A dependency on two earlier passes waits both semaphores.
#[test]
fn test_fan_in_waits_both_dependencies() {
    let mut r = renderer();
    r.begin_frame().unwrap();
    let a = declare_clear_pass(&mut r, 64, 64, PassDeps::none());
    let b = declare_clear_pass(&mut r, 65, 65, PassDeps::none());
    let _join = declare_clear_pass(&mut r, 66, 66, PassDeps::on(a).and(b));
    r.end_frame().unwrap();

    let submits = &r.backend().submits;
    assert!(submits[2].waits.contains(&submits[0].signals[0]));
    assert!(submits[2].waits.contains(&submits[1].signals[0]));
}

// ============================================================================
// Lifecycle and Teardown
// ============================================================================

/// Churn through several distinct frame shapes, let eviction run, then shut
/// down: every backend object and memory chunk must be gone.
#[test]
fn test_churn_then_shutdown_leaks_nothing() {
    let mut r = renderer();
    for size in [64u32, 128, 256, 512, 64, 128] {
        r.begin_frame().unwrap();
        declare_clear_pass(&mut r, size, size, PassDeps::none());
        r.end_frame().unwrap();
    }
    for _ in 0..10 {
        r.begin_frame().unwrap();
        r.end_frame().unwrap();
    }

    let backend = r.shutdown();
    assert_eq!(backend.live_objects(), 0);
    assert_eq!(backend.live_memory_chunks(), 0);
}

/// An upload into a declared vertex buffer copies from scratch before the
/// pass begins and the staged bytes land in mapped scratch memory.
#[test]
fn test_upload_copies_from_scratch() {
    let mut r = renderer();
    r.begin_frame().unwrap();
    let pass = declare_clear_pass(&mut r, 64, 64, PassDeps::none());
    let vbo = r.declare_buffer(BufferDesc {
        size: 1024,
        usage: BufferUsage {
            vertex: true,
            ..Default::default()
        },
        host_visible: false,
    });
    let payload = [0xA5u8; 32];
    r.upload_buffer(vbo, &payload);
    r.cmd_bind_vertex_buffer(pass, vbo, 0);
    r.cmd_draw(pass, 6, 1);
    r.end_frame().unwrap();

    let cmd = r.backend().submits[0].cmd;
    let commands = r.backend().commands_of(cmd);
    let copy = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::CopyBuffer(..)))
        .expect("upload copy was recorded");
    let begin = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::BeginPass(..)))
        .unwrap();
    assert!(copy < begin);

    // The destination buffer got transfer_dst merged into its identity and
    // was never destroyed mid-frame.
    assert!(!r
        .backend()
        .events
        .iter()
        .any(|e| matches!(e, MockEvent::DestroyBuffer(_))));
}

/// A frame that declares no passes still submits its uploads: the copy
/// rides in a fenced transfer-only command buffer and the data arrives.
#[test]
fn test_upload_only_frame_still_submits_copy() {
    let mut r = renderer();
    r.begin_frame().unwrap();
    let vbo = r.declare_buffer(BufferDesc {
        size: 1024,
        usage: BufferUsage {
            vertex: true,
            ..Default::default()
        },
        host_visible: false,
    });
    r.upload_buffer(vbo, &[0x5Au8; 64]);
    r.end_frame().unwrap();

    let submits = &r.backend().submits;
    assert_eq!(submits.len(), 1);
    assert!(submits[0].fence.is_some(), "transfer submission is fenced");
    let commands = r.backend().commands_of(submits[0].cmd);
    assert!(matches!(commands[0], RecordedCommand::CopyBuffer(..)));

    // The present does not gate on the transfer; it waits image-available
    // as on any pass-less frame.
    let present = &r.backend().presents[0];
    assert_eq!(present.waits.len(), 1);

    // Subsequent frames advance cleanly past the fenced transfer.
    r.begin_frame().unwrap();
    r.end_frame().unwrap();
    r.begin_frame().unwrap();
    r.end_frame().unwrap();
    assert_eq!(r.backend().submits.len(), 1);
}
