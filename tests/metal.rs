#![cfg(feature = "metal")]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use gfx_exec::{
    metal::{
        self,
        native::{self as mtl, NativeObject as _},
        soft::{Call, SoftDevice, SoftDeviceConfig},
    },
    BindableResource, BlendAttachment, BlendState, BufferDescription, BufferRange, BufferUsage,
    Color, CommandError, CommandList as _, ComputePipelineDescription, DepthStencilState,
    Device as _, DeviceOptions, Extent3d, Fence, FramebufferAttachment, FramebufferDescription,
    GraphicsPipelineDescription, IndexFormat, Origin3d, OutputDescription, PixelFormat,
    PrimitiveTopology, RasterizerState, ResourceKind, ResourceLayoutDescription,
    ResourceLayoutElement, ResourceSetDescription, SamplerDescription, ShaderDescription,
    ShaderStages, SurfaceHandle, Swapchain as _, SwapchainDescription, TextureCopy,
    TextureDescription, TextureRegion, TextureUsage, VertexElement, VertexElementFormat,
    VertexLayout,
};
use proptest::prelude::*;

const MSL: &str = "\
vertex float4 vs_main() {}
fragment float4 fs_main() {}
kernel void cs_main() {}
";

fn open(config: SoftDeviceConfig) -> (Arc<SoftDevice>, metal::Device) {
    let _ = env_logger::builder().is_test(true).try_init();
    let soft = Arc::new(SoftDevice::new(config));
    let raw: Arc<dyn mtl::Device> = soft.clone();
    let device = metal::Device::new(raw, DeviceOptions::default()).unwrap();
    soft.take_calls();
    (soft, device)
}

fn shader(device: &metal::Device, stage: ShaderStages, entry_point: &str) -> metal::Shader {
    device
        .create_shader(&ShaderDescription {
            label: None,
            stage,
            source: MSL.into(),
            entry_point: entry_point.into(),
        })
        .unwrap()
}

fn buffer(device: &metal::Device, size: u64, usage: BufferUsage) -> metal::Buffer {
    device
        .create_buffer(&BufferDescription {
            label: None,
            size,
            usage,
            structure_byte_stride: 0,
        })
        .unwrap()
}

fn render_target(device: &metal::Device) -> Arc<metal::Texture> {
    Arc::new(
        device
            .create_texture(&TextureDescription::texture_2d(
                16,
                16,
                1,
                1,
                PixelFormat::Rgba8Unorm,
                TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED,
            ))
            .unwrap(),
    )
}

fn graphics_pipeline(
    device: &metal::Device,
    layouts: &[Arc<metal::ResourceLayout>],
) -> Arc<metal::Pipeline> {
    let vs = shader(device, ShaderStages::VERTEX, "vs_main");
    let fs = shader(device, ShaderStages::FRAGMENT, "fs_main");
    let vertex_layouts = [VertexLayout {
        stride: 16,
        instance_step_rate: 0,
        elements: vec![VertexElement {
            name: "Position".to_string(),
            format: VertexElementFormat::Float4,
            offset: 0,
        }],
    }];
    Arc::new(
        device
            .create_graphics_pipeline(&GraphicsPipelineDescription {
                label: Some("scene"),
                blend_state: BlendState {
                    blend_factor: Color::TRANSPARENT,
                    attachments: vec![BlendAttachment::OVERRIDE],
                    alpha_to_coverage: false,
                },
                depth_stencil_state: DepthStencilState::default(),
                rasterizer_state: RasterizerState::default(),
                topology: PrimitiveTopology::TriangleList,
                vertex_layouts: &vertex_layouts,
                vertex_shader: &vs,
                fragment_shader: Some(&fs),
                resource_layouts: layouts,
                outputs: OutputDescription {
                    color_formats: vec![PixelFormat::Rgba8Unorm],
                    depth_format: None,
                    sample_count: 1,
                },
            })
            .unwrap(),
    )
}

fn resource_layout(
    device: &metal::Device,
    elements: Vec<ResourceLayoutElement>,
) -> Arc<metal::ResourceLayout> {
    Arc::new(
        device
            .create_resource_layout(&ResourceLayoutDescription {
                label: None,
                elements: elements.into(),
            })
            .unwrap(),
    )
}

/// A textured draw with a dynamic uniform buffer, plus a compute pipeline
/// and a pair of buffers to copy between.
struct Scene {
    soft: Arc<SoftDevice>,
    device: metal::Device,
    pipeline: Arc<metal::Pipeline>,
    compute: Arc<metal::Pipeline>,
    set: Arc<metal::ResourceSet>,
    framebuffer: Arc<metal::Framebuffer>,
    vertices: metal::Buffer,
    indices: metal::Buffer,
    src: metal::Buffer,
    dst: metal::Buffer,
}

impl Scene {
    fn new(config: SoftDeviceConfig) -> Self {
        let (soft, device) = open(config);

        let layout = Arc::new(
            device
                .create_resource_layout(&ResourceLayoutDescription {
                    label: None,
                    elements: vec![
                        ResourceLayoutElement::new(
                            "Globals",
                            ResourceKind::UniformBuffer,
                            ShaderStages::VERTEX,
                        )
                        .dynamic(),
                        ResourceLayoutElement::new(
                            "Albedo",
                            ResourceKind::TextureReadOnly,
                            ShaderStages::FRAGMENT,
                        ),
                        ResourceLayoutElement::new(
                            "AlbedoSampler",
                            ResourceKind::Sampler,
                            ShaderStages::FRAGMENT,
                        ),
                    ]
                    .into(),
                })
                .unwrap(),
        );
        let uniforms = Arc::new(buffer(&device, 512, BufferUsage::UNIFORM));
        let albedo = Arc::new(
            device
                .create_texture(&TextureDescription::texture_2d(
                    4,
                    4,
                    1,
                    1,
                    PixelFormat::Rgba8Unorm,
                    TextureUsage::SAMPLED,
                ))
                .unwrap(),
        );
        let sampler = Arc::new(device.create_sampler(&SamplerDescription::default()).unwrap());
        let resources = [
            BindableResource::Buffer(BufferRange {
                buffer: uniforms,
                offset: 0,
                size: 256,
            }),
            BindableResource::Texture(albedo),
            BindableResource::Sampler(sampler),
        ];
        let set = Arc::new(
            device
                .create_resource_set(&ResourceSetDescription {
                    label: None,
                    layout: &layout,
                    resources: &resources,
                })
                .unwrap(),
        );

        let target = render_target(&device);
        let framebuffer = Arc::new(
            device
                .create_framebuffer(&FramebufferDescription {
                    label: None,
                    color_targets: &[FramebufferAttachment {
                        target: &target,
                        mip_level: 0,
                        array_layer: 0,
                    }],
                    depth_target: None,
                })
                .unwrap(),
        );

        let cs = shader(&device, ShaderStages::COMPUTE, "cs_main");
        let pipeline = graphics_pipeline(&device, &[Arc::clone(&layout)]);
        let compute = Arc::new(
            device
                .create_compute_pipeline(&ComputePipelineDescription {
                    label: None,
                    shader: &cs,
                    resource_layouts: &[],
                    thread_group_size: [8, 8, 1],
                })
                .unwrap(),
        );

        let vertices = buffer(&device, 64, BufferUsage::VERTEX);
        let indices = buffer(&device, 64, BufferUsage::INDEX);
        let src = buffer(&device, 64, BufferUsage::STAGING);
        let dst = buffer(&device, 64, BufferUsage::VERTEX);
        let pattern = (0..64).collect::<Vec<u8>>();
        device.update_buffer(&src, 0, &pattern).unwrap();

        soft.take_calls();
        Self {
            soft,
            device,
            pipeline,
            compute,
            set,
            framebuffer,
            vertices,
            indices,
            src,
            dst,
        }
    }

    fn list(&self) -> metal::CommandList {
        let mut list = self.device.create_command_list().unwrap();
        list.begin().unwrap();
        list
    }

    fn bind_draw_state(&self, list: &mut metal::CommandList, offset: u32) {
        list.set_pipeline(&self.pipeline).unwrap();
        list.set_graphics_resource_set(0, &self.set, &[offset]).unwrap();
        list.set_vertex_buffer(0, &self.vertices, 0).unwrap();
    }

    fn submit(&self, list: &mut metal::CommandList) {
        list.end().unwrap();
        self.device.submit_commands(list, None).unwrap();
        assert_eq!(self.soft.validation_errors(), Vec::<String>::new());
    }
}

fn count(calls: &[Call], predicate: impl Fn(&Call) -> bool) -> usize {
    calls.iter().filter(|call| predicate(call)).count()
}

fn render_passes(calls: &[Call]) -> Vec<mtl::RenderPassDescriptor> {
    calls
        .iter()
        .filter_map(|call| match *call {
            Call::NewRenderCommandEncoder(_, ref desc) => Some(desc.clone()),
            _ => None,
        })
        .collect()
}

/// Largest number of encoders open at once, and whether any command buffer
/// was committed with an encoder still open.
fn encoder_overlap(calls: &[Call]) -> (usize, bool) {
    let mut open = HashSet::new();
    let mut most = 0;
    let mut committed_open = false;
    for call in calls {
        match *call {
            Call::NewRenderCommandEncoder(encoder, _) => {
                open.insert(encoder.raw());
            }
            Call::NewBlitCommandEncoder(encoder) => {
                open.insert(encoder.raw());
            }
            Call::NewComputeCommandEncoder(encoder) => {
                open.insert(encoder.raw());
            }
            Call::EndEncoding(encoder) => {
                open.remove(&encoder);
            }
            Call::Commit(_) => committed_open |= !open.is_empty(),
            _ => {}
        }
        most = most.max(open.len());
    }
    (most, committed_open)
}

#[derive(Clone, Copy, Debug)]
enum Step {
    Draw,
    Copy,
    UnalignedCopy,
    Dispatch,
    Clear,
    Update(u8),
    DebugMarker,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Draw),
        Just(Step::Copy),
        Just(Step::UnalignedCopy),
        Just(Step::Dispatch),
        Just(Step::Clear),
        (1u8..=32).prop_map(Step::Update),
        Just(Step::DebugMarker),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn encoders_are_mutually_exclusive(steps in proptest::collection::vec(step(), 1..24)) {
        let scene = Scene::new(SoftDeviceConfig::default());
        let mut list = scene.list();
        list.set_framebuffer(&scene.framebuffer).unwrap();
        scene.bind_draw_state(&mut list, 0);
        list.set_pipeline(&scene.compute).unwrap();

        for step in steps {
            match step {
                Step::Draw => list.draw(3, 1, 0, 0).unwrap(),
                Step::Copy => list.copy_buffer(&scene.src, 0, &scene.dst, 8, 16).unwrap(),
                Step::UnalignedCopy => list.copy_buffer(&scene.src, 3, &scene.dst, 1, 7).unwrap(),
                Step::Dispatch => list.dispatch(2, 2, 1).unwrap(),
                Step::Clear => list.clear_color_target(0, Color::BLUE).unwrap(),
                Step::Update(len) => list
                    .update_buffer(&scene.dst, 0, &vec![len; len as usize])
                    .unwrap(),
                Step::DebugMarker => list.insert_debug_marker("step").unwrap(),
            }
            let (most, _) = encoder_overlap(&scene.soft.calls());
            prop_assert!(most <= 1, "{} encoders open after {:?}", most, step);
        }
        scene.submit(&mut list);

        let (most, committed_open) = encoder_overlap(&scene.soft.calls());
        prop_assert!(most <= 1);
        prop_assert!(!committed_open);
    }
}

#[derive(Clone, Copy, Debug)]
enum Upload {
    Write { len: usize, value: u8 },
    /// Completes one in-flight command buffer, not necessarily the oldest.
    Complete(prop::sample::Index),
    CompleteAll,
}

fn upload() -> impl Strategy<Value = Upload> {
    prop_oneof![
        6 => (1usize..=64, any::<u8>()).prop_map(|(len, value)| Upload::Write { len, value }),
        3 => any::<prop::sample::Index>().prop_map(Upload::Complete),
        1 => Just(Upload::CompleteAll),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn staging_buffers_wait_for_completion(uploads in proptest::collection::vec(upload(), 1..40)) {
        let (soft, device) = open(SoftDeviceConfig {
            auto_complete: false,
            ..SoftDeviceConfig::default()
        });
        let target = buffer(&device, 64, BufferUsage::UNIFORM);
        soft.take_calls();

        // staging buffer -> command buffer it was last written for
        let mut busy = HashMap::new();
        let mut expected = vec![0u8; 64];
        for upload in uploads {
            match upload {
                Upload::Write { len, value } => {
                    device.update_buffer(&target, 0, &vec![value; len]).unwrap();
                    expected[..len].iter_mut().for_each(|byte| *byte = value);

                    let mut command_buffer = None;
                    for call in soft.take_calls() {
                        match call {
                            Call::NewCommandBuffer { command_buffer: id, .. } => command_buffer = Some(id),
                            Call::WriteBuffer { buffer, .. } => {
                                prop_assert!(
                                    !busy.contains_key(&buffer),
                                    "{:?} was reused while {:?} was in flight",
                                    buffer,
                                    busy.get(&buffer)
                                );
                                busy.insert(buffer, command_buffer);
                            }
                            _ => {}
                        }
                    }
                }
                Upload::Complete(index) => {
                    let pending = soft.pending_command_buffers();
                    if pending.is_empty() {
                        continue;
                    }
                    let done = *index.get(&pending);
                    prop_assert!(soft.complete(done));
                    busy.retain(|_, command_buffer| *command_buffer != Some(done));
                }
                Upload::CompleteAll => {
                    soft.complete_pending();
                    busy.clear();
                    prop_assert_eq!(device.in_flight(), 0);
                }
            }
            prop_assert_eq!(device.in_flight(), soft.pending_count());
        }
        soft.complete_pending();
        prop_assert_eq!(soft.buffer_contents(target.raw_handle()).unwrap(), expected);
        prop_assert!(soft.validation_errors().is_empty());
    }
}

#[test]
fn completions_from_another_thread_recycle_staging() {
    let (soft, device) = open(SoftDeviceConfig {
        auto_complete: false,
        ..SoftDeviceConfig::default()
    });
    let target = buffer(&device, 64, BufferUsage::UNIFORM);
    let stop = Arc::new(AtomicBool::new(false));

    let completer = {
        let soft = Arc::clone(&soft);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut completed = 0;
            while !stop.load(Ordering::Acquire) {
                match soft.pending_command_buffers().last() {
                    // newest first, so completion order differs from submission
                    Some(&newest) => {
                        if soft.complete(newest) {
                            completed += 1;
                        }
                    }
                    None => thread::yield_now(),
                }
            }
            completed
        })
    };

    for value in 0..200u32 {
        device
            .update_buffer(&target, 0, &[value as u8; 64])
            .unwrap();
    }
    assert!(device.wait_for_idle(Duration::from_secs(10)));
    stop.store(true, Ordering::Release);
    let completed = completer.join().unwrap();

    assert_eq!(completed, 200);
    assert_eq!(device.in_flight(), 0);
    assert!(device.idle_staging_buffers() >= 1);
    assert_eq!(
        soft.buffer_contents(target.raw_handle()).unwrap(),
        vec![199u8; 64]
    );
    assert!(soft.validation_errors().is_empty());
}

#[test]
fn identical_binds_reach_the_native_tables_once() {
    let scene = Scene::new(SoftDeviceConfig::default());
    let mut list = scene.list();
    list.set_framebuffer(&scene.framebuffer).unwrap();
    scene.bind_draw_state(&mut list, 0);
    list.draw(3, 1, 0, 0).unwrap();
    scene.bind_draw_state(&mut list, 0);
    list.draw(3, 1, 0, 0).unwrap();
    scene.submit(&mut list);

    let calls = scene.soft.calls();
    assert_eq!(count(&calls, |call| matches!(call, Call::DrawPrimitives { .. })), 2);
    assert_eq!(count(&calls, |call| matches!(call, Call::SetRenderPipelineState(_))), 1);
    assert_eq!(count(&calls, |call| matches!(call, Call::SetCullMode(_))), 1);
    assert_eq!(count(&calls, |call| matches!(call, Call::SetTexture { .. })), 1);
    assert_eq!(count(&calls, |call| matches!(call, Call::SetSamplerState { .. })), 1);
    // the vertex buffer and the uniform buffer
    assert_eq!(count(&calls, |call| matches!(call, Call::SetBuffer { .. })), 2);
    assert_eq!(count(&calls, |call| matches!(call, Call::SetBufferOffset { .. })), 0);
}

#[test]
fn dynamic_offset_changes_only_move_the_offset() {
    let scene = Scene::new(SoftDeviceConfig::default());
    let mut list = scene.list();
    list.set_framebuffer(&scene.framebuffer).unwrap();
    scene.bind_draw_state(&mut list, 0);
    list.draw(3, 1, 0, 0).unwrap();
    scene.soft.take_calls();

    list.set_graphics_resource_set(0, &scene.set, &[256]).unwrap();
    list.draw(3, 1, 0, 0).unwrap();
    let calls = scene.soft.take_calls();
    assert_eq!(count(&calls, |call| matches!(call, Call::SetBuffer { .. })), 0);
    assert_eq!(count(&calls, |call| matches!(call, Call::SetTexture { .. })), 0);
    // the uniform buffer follows the vertex buffer in the vertex table
    assert!(calls.iter().any(|call| matches!(
        *call,
        Call::SetBufferOffset {
            target: mtl::BindTarget::Vertex(_),
            index: 1,
            offset: 256,
        }
    )));
    scene.submit(&mut list);
}

#[test]
fn reopened_passes_rebind_everything() {
    let scene = Scene::new(SoftDeviceConfig::default());
    let mut list = scene.list();
    list.set_framebuffer(&scene.framebuffer).unwrap();
    scene.bind_draw_state(&mut list, 0);
    list.draw(3, 1, 0, 0).unwrap();
    list.copy_buffer(&scene.src, 0, &scene.dst, 0, 16).unwrap();
    scene.soft.take_calls();

    list.draw(3, 1, 0, 0).unwrap();
    let calls = scene.soft.take_calls();
    assert_eq!(render_passes(&calls).len(), 1);
    assert_eq!(count(&calls, |call| matches!(call, Call::SetRenderPipelineState(_))), 1);
    assert_eq!(count(&calls, |call| matches!(call, Call::SetCullMode(_))), 1);
    assert_eq!(count(&calls, |call| matches!(call, Call::SetViewport(_))), 1);
    assert_eq!(count(&calls, |call| matches!(call, Call::SetTexture { .. })), 1);
    assert_eq!(count(&calls, |call| matches!(call, Call::SetSamplerState { .. })), 1);
    assert_eq!(count(&calls, |call| matches!(call, Call::SetBuffer { .. })), 2);
    scene.submit(&mut list);
}

#[test]
fn clears_are_consumed_by_the_first_pass() {
    let scene = Scene::new(SoftDeviceConfig::default());
    let mut list = scene.list();
    list.clear_color_target(0, Color::RED).unwrap();
    list.set_framebuffer(&scene.framebuffer).unwrap();
    scene.bind_draw_state(&mut list, 0);
    list.draw(3, 1, 0, 0).unwrap();
    list.copy_buffer(&scene.src, 0, &scene.dst, 0, 16).unwrap();
    list.draw(3, 1, 0, 0).unwrap();
    scene.submit(&mut list);

    let passes = render_passes(&scene.soft.calls());
    assert_eq!(passes.len(), 2);
    let first = &passes[0].color_attachments[0];
    assert_eq!(first.load_action, mtl::MTLLoadAction::Clear);
    assert_eq!(
        (first.clear_color.red, first.clear_color.green, first.clear_color.alpha),
        (1.0, 0.0, 1.0)
    );
    assert_eq!(passes[1].color_attachments[0].load_action, mtl::MTLLoadAction::Load);
}

#[test]
fn clears_apply_to_their_own_attachment() {
    let scene = Scene::new(SoftDeviceConfig::default());
    let targets = [render_target(&scene.device), render_target(&scene.device)];
    let framebuffer = Arc::new(
        scene
            .device
            .create_framebuffer(&FramebufferDescription {
                label: None,
                color_targets: &[
                    FramebufferAttachment {
                        target: &targets[0],
                        mip_level: 0,
                        array_layer: 0,
                    },
                    FramebufferAttachment {
                        target: &targets[1],
                        mip_level: 0,
                        array_layer: 0,
                    },
                ],
                depth_target: None,
            })
            .unwrap(),
    );

    let mut list = scene.list();
    list.set_framebuffer(&framebuffer).unwrap();
    list.clear_color_target(1, Color::BLUE).unwrap();
    assert!(matches!(
        list.clear_color_target(2, Color::BLUE),
        Err(CommandError::ColorTargetOutOfRange(2))
    ));
    assert!(matches!(
        list.clear_depth_stencil(1.0, 0),
        Err(CommandError::NoDepthTarget)
    ));
    scene.submit(&mut list);

    // ending the list runs the pending clears
    let passes = render_passes(&scene.soft.calls());
    assert_eq!(passes.len(), 1);
    let attachments = &passes[0].color_attachments;
    assert_eq!(attachments[0].load_action, mtl::MTLLoadAction::Load);
    assert_eq!(attachments[1].load_action, mtl::MTLLoadAction::Clear);
    assert_eq!(attachments[1].clear_color.blue, 1.0);
}

#[test]
fn unaligned_copies_go_through_the_copy_kernel() {
    let scene = Scene::new(SoftDeviceConfig::default());
    let mut list = scene.list();
    list.copy_buffer(&scene.src, 1, &scene.dst, 0, 8).unwrap();
    let calls = scene.soft.take_calls();
    assert_eq!(count(&calls, |call| matches!(call, Call::CopyFromBuffer { .. })), 0);
    assert_eq!(count(&calls, |call| matches!(call, Call::DispatchThreadGroups { .. })), 1);

    list.copy_buffer(&scene.src, 0, &scene.dst, 16, 8).unwrap();
    let calls = scene.soft.take_calls();
    assert_eq!(count(&calls, |call| matches!(call, Call::CopyFromBuffer { .. })), 1);
    assert_eq!(count(&calls, |call| matches!(call, Call::DispatchThreadGroups { .. })), 0);
    scene.submit(&mut list);

    let contents = scene.soft.buffer_contents(scene.dst.raw_handle()).unwrap();
    assert_eq!(&contents[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(&contents[16..24], &[0, 1, 2, 3, 4, 5, 6, 7]);
}

#[test]
fn user_compute_state_survives_the_copy_kernel() {
    let scene = Scene::new(SoftDeviceConfig::default());
    let mut list = scene.list();
    list.set_pipeline(&scene.compute).unwrap();
    list.dispatch(1, 1, 1).unwrap();
    list.copy_buffer(&scene.src, 3, &scene.dst, 0, 5).unwrap();
    scene.soft.take_calls();

    list.dispatch(4, 1, 1).unwrap();
    let calls = scene.soft.take_calls();
    assert_eq!(count(&calls, |call| matches!(call, Call::SetComputePipelineState(_))), 1);
    assert!(calls.iter().any(|call| matches!(
        *call,
        Call::DispatchThreadGroups {
            thread_groups: mtl::MTLSize { width: 4, height: 1, depth: 1 },
            threads_per_group: mtl::MTLSize { width: 8, height: 8, depth: 1 },
        }
    )));
    scene.submit(&mut list);
}

#[test]
fn draws_pick_the_narrowest_native_call() {
    let scene = Scene::new(SoftDeviceConfig::default());
    let mut list = scene.list();
    list.set_framebuffer(&scene.framebuffer).unwrap();
    scene.bind_draw_state(&mut list, 0);
    list.set_index_buffer(&scene.indices, IndexFormat::UInt16, 4).unwrap();
    scene.soft.take_calls();

    list.draw(3, 1, 0, 0).unwrap();
    list.draw(3, 2, 0, 0).unwrap();
    list.draw(3, 2, 0, 1).unwrap();
    list.draw_indexed(6, 1, 2, 0, 0).unwrap();
    list.draw_indexed(6, 3, 0, 0, 0).unwrap();
    list.draw_indexed(6, 1, 0, -2, 0).unwrap();
    let draws = scene
        .soft
        .take_calls()
        .into_iter()
        .filter(Call::is_draw)
        .collect::<Vec<_>>();
    assert_eq!(draws.len(), 6);
    assert!(matches!(draws[0], Call::DrawPrimitives { vertex_count: 3, .. }));
    assert!(matches!(draws[1], Call::DrawPrimitivesInstanced { instance_count: 2, .. }));
    assert!(matches!(
        draws[2],
        Call::DrawPrimitivesInstancedBaseInstance { base_instance: 1, .. }
    ));
    assert!(matches!(
        draws[3],
        Call::DrawIndexedPrimitives {
            index_count: 6,
            index_buffer_offset: 8,
            ..
        }
    ));
    assert!(matches!(
        draws[4],
        Call::DrawIndexedPrimitivesInstanced { instance_count: 3, .. }
    ));
    assert!(matches!(
        draws[5],
        Call::DrawIndexedPrimitivesInstancedBaseInstance { base_vertex: -2, .. }
    ));
    scene.submit(&mut list);
}

#[test]
fn base_instance_needs_device_support() {
    let scene = Scene::new(SoftDeviceConfig::apple1_gpu());
    let mut list = scene.list();
    list.set_framebuffer(&scene.framebuffer).unwrap();
    scene.bind_draw_state(&mut list, 0);
    list.set_index_buffer(&scene.indices, IndexFormat::UInt32, 0).unwrap();
    assert!(matches!(list.draw(3, 1, 0, 1), Err(CommandError::Unsupported(_))));
    assert!(matches!(
        list.draw_indexed(3, 1, 0, 1, 0),
        Err(CommandError::Unsupported(_))
    ));
    list.draw_indexed(3, 1, 0, 0, 0).unwrap();
    scene.submit(&mut list);
}

#[test]
fn recording_errors() {
    let scene = Scene::new(SoftDeviceConfig::default());
    let mut list = scene.device.create_command_list().unwrap();
    assert!(matches!(list.draw(3, 1, 0, 0), Err(CommandError::NotRecording)));
    assert!(matches!(
        scene.device.submit_commands(&mut list, None),
        Err(CommandError::NotEnded)
    ));

    list.begin().unwrap();
    list.set_framebuffer(&scene.framebuffer).unwrap();
    assert!(matches!(list.draw(3, 1, 0, 0), Err(CommandError::NoPipeline("graphics"))));
    assert!(matches!(list.dispatch(1, 1, 1), Err(CommandError::NoPipeline("compute"))));
    list.set_pipeline(&scene.pipeline).unwrap();
    assert!(matches!(list.draw(3, 1, 0, 0), Err(CommandError::MissingResourceSet(0))));
    assert!(matches!(
        list.set_graphics_resource_set(0, &scene.set, &[]),
        Err(CommandError::DynamicOffsetCount {
            expected: 1,
            actual: 0
        })
    ));
    assert!(matches!(
        list.set_graphics_resource_set(1, &scene.set, &[0]),
        Err(CommandError::SlotOutOfRange { slot: 1, .. })
    ));
    assert!(matches!(
        list.draw_indexed(3, 1, 0, 0, 0),
        Err(CommandError::NoIndexBuffer)
    ));
    assert!(matches!(
        list.set_vertex_buffer(0, &scene.indices, 0),
        Err(CommandError::MissingUsage(_))
    ));
    assert!(matches!(
        list.copy_buffer(&scene.src, 60, &scene.dst, 0, 8),
        Err(CommandError::InvalidCopy(_))
    ));
    assert!(matches!(list.pop_debug_group(), Err(CommandError::UnbalancedDebugGroup)));
    assert!(matches!(
        scene.device.submit_commands(&mut list, None),
        Err(CommandError::NotEnded)
    ));
    list.end().unwrap();
    assert!(matches!(list.draw(3, 1, 0, 0), Err(CommandError::NotRecording)));
    scene.device.submit_commands(&mut list, None).unwrap();
    assert!(scene.soft.validation_errors().is_empty());
}

#[test]
fn debug_groups_follow_the_open_encoder() {
    let scene = Scene::new(SoftDeviceConfig::default());
    let mut list = scene.list();
    list.copy_buffer(&scene.src, 0, &scene.dst, 0, 4).unwrap();
    list.push_debug_group("upload").unwrap();
    list.pop_debug_group().unwrap();
    scene.submit(&mut list);

    let calls = scene.soft.calls();
    let blit = calls
        .iter()
        .find_map(|call| match *call {
            Call::NewBlitCommandEncoder(encoder) => Some(encoder.raw()),
            _ => None,
        })
        .unwrap();
    assert!(calls
        .iter()
        .any(|call| *call == Call::PushDebugGroup(blit, "upload".to_string())));
    assert!(calls.iter().any(|call| *call == Call::PopDebugGroup(blit)));
}

#[test]
fn fences_signal_on_completion() {
    let scene = Scene::new(SoftDeviceConfig {
        auto_complete: false,
        ..SoftDeviceConfig::default()
    });
    let fence = Arc::new(Fence::new(false));
    let mut list = scene.list();
    list.copy_buffer(&scene.src, 0, &scene.dst, 0, 16).unwrap();
    list.end().unwrap();
    scene.device.submit_commands(&mut list, Some(&fence)).unwrap();

    assert!(!fence.signaled());
    assert_eq!(scene.device.in_flight(), 1);
    assert!(!scene.device.wait_for_idle(Duration::from_millis(1)));

    scene.soft.complete_pending();
    assert!(fence.signaled());
    assert!(fence.wait(Duration::from_millis(1)));
    assert_eq!(scene.device.in_flight(), 0);
    assert!(scene.device.wait_for_idle(Duration::from_millis(1)));
}

#[test]
fn staging_returns_to_the_pool_after_completion() {
    let (soft, device) = open(SoftDeviceConfig {
        auto_complete: false,
        ..SoftDeviceConfig::default()
    });
    let target = buffer(&device, 64, BufferUsage::UNIFORM);
    device.update_buffer(&target, 0, &[1; 16]).unwrap();
    device.update_buffer(&target, 16, &[2; 16]).unwrap();
    assert_eq!(device.idle_staging_buffers(), 0);
    assert_eq!(device.in_flight(), 2);

    soft.complete_pending();
    assert_eq!(device.idle_staging_buffers(), 2);
    let contents = soft.buffer_contents(target.raw_handle()).unwrap();
    assert_eq!(&contents[..16], &[1; 16]);
    assert_eq!(&contents[16..32], &[2; 16]);
}

fn round_trip(format: PixelFormat, width: u32, height: u32, mip_levels: u32, region: TextureRegion, data: &[u8]) {
    let (soft, device) = open(SoftDeviceConfig::default());
    let image = device
        .create_texture(&TextureDescription::texture_2d(
            width,
            height,
            mip_levels,
            1,
            format,
            TextureUsage::SAMPLED,
        ))
        .unwrap();
    let staging = device
        .create_texture(&TextureDescription::texture_2d(
            width,
            height,
            mip_levels,
            1,
            format,
            TextureUsage::STAGING,
        ))
        .unwrap();
    assert!(staging.is_staging());
    assert!(staging.raw_handle().is_none());

    device.update_texture(&image, &region, data).unwrap();
    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    list.copy_texture(
        &image,
        &staging,
        &TextureCopy::whole_level(image.description(), region.mip_level, region.array_layer),
    )
    .unwrap();
    list.end().unwrap();
    device.submit_commands(&mut list, None).unwrap();

    let mut read_back = vec![0; data.len()];
    device.read_texture(&staging, &region, &mut read_back).unwrap();
    assert_eq!(read_back, data);
    assert!(soft.validation_errors().is_empty());
}

#[test]
fn uncompressed_texture_round_trip() {
    let data = (0..16).collect::<Vec<u8>>();
    round_trip(
        PixelFormat::Rgba8Unorm,
        4,
        4,
        1,
        TextureRegion {
            origin: Origin3d { x: 1, y: 1, z: 0 },
            size: Extent3d::new(2, 2, 1),
            mip_level: 0,
            array_layer: 0,
        },
        &data,
    );
}

#[test]
fn compressed_texture_round_trip() {
    let data = (0..32).map(|i| i * 3).collect::<Vec<u8>>();
    round_trip(
        PixelFormat::Bc1RgbaUnorm,
        8,
        8,
        1,
        TextureRegion {
            origin: Origin3d::ZERO,
            size: Extent3d::new(8, 8, 1),
            mip_level: 0,
            array_layer: 0,
        },
        &data,
    );
}

#[test]
fn sub_block_mip_levels_copy_a_whole_block() {
    // the 2x2 level of a BC1 texture still holds one 8 byte block
    let data = [9, 8, 7, 6, 5, 4, 3, 2];
    round_trip(
        PixelFormat::Bc1RgbaUnorm,
        8,
        8,
        3,
        TextureRegion {
            origin: Origin3d::ZERO,
            size: Extent3d::new(4, 4, 1),
            mip_level: 2,
            array_layer: 0,
        },
        &data,
    );
}

#[test]
fn only_staging_textures_are_read_back() {
    let (_soft, device) = open(SoftDeviceConfig::default());
    let image = device
        .create_texture(&TextureDescription::texture_2d(
            4,
            4,
            1,
            1,
            PixelFormat::Rgba8Unorm,
            TextureUsage::SAMPLED,
        ))
        .unwrap();
    let region = TextureRegion {
        origin: Origin3d::ZERO,
        size: Extent3d::new(4, 4, 1),
        mip_level: 0,
        array_layer: 0,
    };
    let mut out = [0; 64];
    assert!(matches!(
        device.read_texture(&image, &region, &mut out),
        Err(gfx_exec::ResourceError::NotStaging("texture"))
    ));
}

#[test]
fn bc_formats_follow_the_gpu_family() {
    let (_soft, mac) = open(SoftDeviceConfig::default());
    let (_soft, apple) = open(SoftDeviceConfig::apple_gpu());
    let desc = TextureDescription::texture_2d(
        8,
        8,
        1,
        1,
        PixelFormat::Bc3Unorm,
        TextureUsage::SAMPLED,
    );
    assert!(mac.create_texture(&desc).is_ok());
    assert!(apple.create_texture(&desc).is_err());
    assert!(apple.format_support(PixelFormat::Etc2Rgb8Unorm).contains(gfx_exec::FormatSupport::SAMPLED));
}

#[test]
fn swapchain_frames_are_presented() {
    let (soft, device) = open(SoftDeviceConfig::default());
    let swapchain = device
        .create_swapchain(&SwapchainDescription {
            label: None,
            surface: SurfaceHandle(7),
            width: 32,
            height: 16,
            color_srgb: false,
            depth_format: None,
            vsync: true,
        })
        .unwrap();
    assert_eq!(swapchain.framebuffer().size(), (32, 16));

    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    list.set_framebuffer(swapchain.framebuffer()).unwrap();
    list.clear_color_target(0, Color::GREEN).unwrap();
    list.end().unwrap();
    device.submit_commands(&mut list, None).unwrap();
    device.present(&swapchain).unwrap();

    let calls = soft.calls();
    assert_eq!(count(&calls, |call| matches!(call, Call::NextDrawable(Some(_)))), 1);
    assert_eq!(count(&calls, |call| matches!(call, Call::PresentDrawable(..))), 1);
    assert!(soft.validation_errors().is_empty());

    swapchain.resize(64, 64);
    assert_eq!(swapchain.framebuffer().size(), (64, 64));
}

#[test]
fn sets_are_checked_against_the_pipeline_that_draws_with_them() {
    let scene = Scene::new(SoftDeviceConfig::default());
    let sampler_only = resource_layout(
        &scene.device,
        vec![ResourceLayoutElement::new(
            "AlbedoSampler",
            ResourceKind::Sampler,
            ShaderStages::FRAGMENT,
        )],
    );
    let incompatible = graphics_pipeline(&scene.device, &[sampler_only]);
    // same elements as the scene layout, created separately
    let lookalike = resource_layout(&scene.device, scene.set.layout().elements().to_vec());
    let compatible = graphics_pipeline(&scene.device, &[lookalike]);

    let mut list = scene.list();
    list.set_framebuffer(&scene.framebuffer).unwrap();
    scene.bind_draw_state(&mut list, 0);
    list.set_pipeline(&incompatible).unwrap();
    list.set_vertex_buffer(0, &scene.vertices, 0).unwrap();
    assert_eq!(
        list.draw(3, 1, 0, 0),
        Err(CommandError::IncompatibleResourceSet(0))
    );

    list.set_pipeline(&compatible).unwrap();
    list.set_vertex_buffer(0, &scene.vertices, 0).unwrap();
    list.draw(3, 1, 0, 0).unwrap();
    scene.submit(&mut list);

    let calls = scene.soft.calls();
    assert_eq!(count(&calls, |call| call.is_draw()), 1);
}

#[test]
fn clears_of_an_unrendered_frame_are_dropped() {
    let scene = Scene::new(SoftDeviceConfig::default());
    let swapchain = scene
        .device
        .create_swapchain(&SwapchainDescription {
            label: None,
            surface: SurfaceHandle(11),
            width: 16,
            height: 16,
            color_srgb: false,
            depth_format: None,
            vsync: true,
        })
        .unwrap();
    scene.soft.set_drawable_available(false);

    let mut list = scene.list();
    list.set_framebuffer(swapchain.framebuffer()).unwrap();
    list.clear_color_target(0, Color::RED).unwrap();
    list.set_framebuffer(&scene.framebuffer).unwrap();
    scene.bind_draw_state(&mut list, 0);
    list.draw(3, 1, 0, 0).unwrap();
    scene.submit(&mut list);

    let passes = render_passes(&scene.soft.calls());
    assert_eq!(passes.len(), 1);
    assert_ne!(
        passes[0].color_attachments[0].load_action,
        mtl::MTLLoadAction::Clear
    );
}

#[test]
fn draws_are_skipped_without_a_drawable() {
    let scene = Scene::new(SoftDeviceConfig::default());
    let swapchain = scene
        .device
        .create_swapchain(&SwapchainDescription {
            label: None,
            surface: SurfaceHandle(9),
            width: 16,
            height: 16,
            color_srgb: true,
            depth_format: None,
            vsync: true,
        })
        .unwrap();
    scene.soft.set_drawable_available(false);

    let mut list = scene.list();
    list.set_framebuffer(swapchain.framebuffer()).unwrap();
    scene.bind_draw_state(&mut list, 0);
    list.draw(3, 1, 0, 0).unwrap();
    scene.submit(&mut list);
    scene.device.present(&swapchain).unwrap();

    let calls = scene.soft.calls();
    assert_eq!(count(&calls, |call| call.is_draw()), 0);
    assert_eq!(count(&calls, |call| matches!(call, Call::PresentDrawable(..))), 0);
}
