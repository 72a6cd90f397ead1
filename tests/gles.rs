#![cfg(feature = "gles")]

use std::{sync::Arc, time::Duration};

use gfx_exec::{
    gles::{
        self,
        native::{self as gl},
        soft::{Call, SoftContext, SoftContextConfig},
    },
    BindableResource, BlendAttachment, BlendState, BufferDescription, BufferRange, BufferUsage,
    Color, CommandError, CommandList as _, ComputePipelineDescription, DepthStencilState,
    Device as _, DeviceOptions, Extent3d, FaceCullMode, Fence, FramebufferAttachment,
    FramebufferDescription, GraphicsPipelineDescription, IndexFormat, Origin3d,
    OutputDescription, PixelFormat, PrimitiveTopology, RasterizerState, ResourceError,
    ResourceKind, ResourceLayoutDescription, ResourceLayoutElement, ResourceSetDescription,
    SamplerDescription, ShaderDescription, ShaderError, ShaderStages, SurfaceHandle,
    Swapchain as _, SwapchainDescription, TextureCopy, TextureDescription, TextureRegion,
    TextureUsage, VertexElement, VertexElementFormat, VertexLayout,
};
use proptest::prelude::*;

const VERTEX_SOURCE: &str = "\
#version 330 core
layout(std140) uniform Globals { mat4 u_Transform; };
in vec4 a_Position;
void main() { gl_Position = u_Transform * a_Position; }
";

const FRAGMENT_SOURCE: &str = "\
#version 330 core
uniform sampler2D u_Albedo;
uniform sampler2D u_Normal;
out vec4 o_Color;
void main() { o_Color = texture(u_Albedo, vec2(0.5)) * texture(u_Normal, vec2(0.5)); }
";

const COMPUTE_SOURCE: &str = "\
#version 430
layout(local_size_x = 8) in;
layout(std430) buffer Particles { vec4 positions[]; };
void main() { positions[gl_GlobalInvocationID.x] += vec4(1.0); }
";

fn options() -> DeviceOptions {
    DeviceOptions {
        debug: true,
        ..DeviceOptions::default()
    }
}

fn open(config: SoftContextConfig) -> (Arc<SoftContext>, gles::Device) {
    let _ = env_logger::builder().is_test(true).try_init();
    let soft = Arc::new(SoftContext::new(config));
    let raw: Arc<dyn gl::Context> = soft.clone();
    let device = gles::Device::new(raw, options()).unwrap();
    soft.take_calls();
    (soft, device)
}

fn shader(device: &gles::Device, stage: ShaderStages, source: &str) -> gles::Shader {
    device
        .create_shader(&ShaderDescription {
            label: None,
            stage,
            source: source.to_string().into(),
            entry_point: "main".into(),
        })
        .unwrap()
}

fn buffer(device: &gles::Device, size: u64, usage: BufferUsage) -> gles::Buffer {
    device
        .create_buffer(&BufferDescription {
            label: None,
            size,
            usage,
            structure_byte_stride: 0,
        })
        .unwrap()
}

fn texture(device: &gles::Device, width: u32, height: u32, usage: TextureUsage) -> Arc<gles::Texture> {
    Arc::new(
        device
            .create_texture(&TextureDescription::texture_2d(
                width,
                height,
                1,
                1,
                PixelFormat::Rgba8Unorm,
                usage,
            ))
            .unwrap(),
    )
}

fn count(calls: &[Call], predicate: impl Fn(&Call) -> bool) -> usize {
    calls.iter().filter(|call| predicate(call)).count()
}

fn uniform_ranges(calls: &[Call]) -> Vec<(i32, i32)> {
    calls
        .iter()
        .filter_map(|call| match *call {
            Call::BindBufferRange {
                target: gl::UNIFORM_BUFFER,
                offset,
                size,
                ..
            } => Some((offset, size)),
            _ => None,
        })
        .collect()
}

/// Two textured resource sets sharing a normal map and a dynamic uniform
/// buffer, drawn into a pair of render targets.
struct Scene {
    soft: Arc<SoftContext>,
    device: gles::Device,
    layout: Arc<gles::ResourceLayout>,
    pipeline: Arc<gles::Pipeline>,
    set: Arc<gles::ResourceSet>,
    other_set: Arc<gles::ResourceSet>,
    albedo: Arc<gles::Texture>,
    samplers: [Arc<gles::Sampler>; 2],
    targets: [Arc<gles::Texture>; 2],
    framebuffer: Arc<gles::Framebuffer>,
    vertices: gles::Buffer,
    indices: gles::Buffer,
    vs: gles::Shader,
    fs: gles::Shader,
}

impl Scene {
    fn new(config: SoftContextConfig) -> Self {
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
                            "u_Albedo",
                            ResourceKind::TextureReadOnly,
                            ShaderStages::FRAGMENT,
                        ),
                        ResourceLayoutElement::new(
                            "s_Albedo",
                            ResourceKind::Sampler,
                            ShaderStages::FRAGMENT,
                        ),
                        ResourceLayoutElement::new(
                            "u_Normal",
                            ResourceKind::TextureReadOnly,
                            ShaderStages::FRAGMENT,
                        ),
                        ResourceLayoutElement::new(
                            "s_Normal",
                            ResourceKind::Sampler,
                            ShaderStages::FRAGMENT,
                        ),
                    ]
                    .into(),
                })
                .unwrap(),
        );
        let uniforms = Arc::new(buffer(&device, 512, BufferUsage::UNIFORM));
        let albedo = texture(&device, 4, 4, TextureUsage::SAMPLED);
        let other_albedo = texture(&device, 4, 4, TextureUsage::SAMPLED);
        let normal = texture(&device, 4, 4, TextureUsage::SAMPLED);
        let samplers = [
            Arc::new(device.create_sampler(&SamplerDescription::default()).unwrap()),
            Arc::new(device.create_sampler(&SamplerDescription::default()).unwrap()),
        ];
        let make_set = |albedo: &Arc<gles::Texture>| {
            let resources = [
                BindableResource::Buffer(BufferRange {
                    buffer: Arc::clone(&uniforms),
                    offset: 0,
                    size: 256,
                }),
                BindableResource::Texture(Arc::clone(albedo)),
                BindableResource::Sampler(Arc::clone(&samplers[0])),
                BindableResource::Texture(Arc::clone(&normal)),
                BindableResource::Sampler(Arc::clone(&samplers[1])),
            ];
            Arc::new(
                device
                    .create_resource_set(&ResourceSetDescription {
                        label: None,
                        layout: &layout,
                        resources: &resources,
                    })
                    .unwrap(),
            )
        };
        let set = make_set(&albedo);
        let other_set = make_set(&other_albedo);

        let usage = TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED;
        let targets = [texture(&device, 16, 16, usage), texture(&device, 16, 16, usage)];
        let framebuffer = Arc::new(
            device
                .create_framebuffer(&FramebufferDescription {
                    label: Some("scene"),
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

        let vs = shader(&device, ShaderStages::VERTEX, VERTEX_SOURCE);
        let fs = shader(&device, ShaderStages::FRAGMENT, FRAGMENT_SOURCE);
        let vertices = buffer(&device, 64, BufferUsage::VERTEX);
        let indices = buffer(&device, 64, BufferUsage::INDEX);

        let pipeline = graphics_pipeline(&device, &layout, &vs, &fs, RasterizerState::default());
        soft.take_calls();
        Self {
            soft,
            device,
            layout,
            pipeline,
            set,
            other_set,
            albedo,
            samplers,
            targets,
            framebuffer,
            vertices,
            indices,
            vs,
            fs,
        }
    }

    fn pipeline_with(&self, rasterizer_state: RasterizerState) -> Arc<gles::Pipeline> {
        graphics_pipeline(&self.device, &self.layout, &self.vs, &self.fs, rasterizer_state)
    }

    fn list(&self) -> gles::CommandList {
        let mut list = self.device.create_command_list().unwrap();
        list.begin().unwrap();
        list
    }

    fn bind_draw_state(&self, list: &mut gles::CommandList, offset: u32) {
        list.set_framebuffer(&self.framebuffer).unwrap();
        list.set_pipeline(&self.pipeline).unwrap();
        list.set_graphics_resource_set(0, &self.set, &[offset]).unwrap();
        list.set_vertex_buffer(0, &self.vertices, 0).unwrap();
    }

    fn submit(&self, list: &mut gles::CommandList) {
        list.end().unwrap();
        self.device.submit_commands(list, None).unwrap();
        assert_eq!(self.soft.validation_errors(), Vec::<String>::new());
    }

    fn target_image(&self, index: usize) -> Vec<u8> {
        let raw = self.targets[index].raw_handle().unwrap();
        self.soft.texture_image(raw, 0, 0).unwrap()
    }
}

fn graphics_pipeline(
    device: &gles::Device,
    layout: &Arc<gles::ResourceLayout>,
    vs: &gles::Shader,
    fs: &gles::Shader,
    rasterizer_state: RasterizerState,
) -> Arc<gles::Pipeline> {
    let layouts = [Arc::clone(layout)];
    let vertex_layouts = [VertexLayout {
        stride: 16,
        instance_step_rate: 0,
        elements: vec![VertexElement {
            name: "a_Position".to_string(),
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
                    attachments: vec![BlendAttachment::OVERRIDE, BlendAttachment::OVERRIDE],
                    alpha_to_coverage: false,
                },
                depth_stencil_state: DepthStencilState::default(),
                rasterizer_state,
                topology: PrimitiveTopology::TriangleList,
                vertex_layouts: &vertex_layouts,
                vertex_shader: vs,
                fragment_shader: Some(fs),
                resource_layouts: &layouts,
                outputs: OutputDescription {
                    color_formats: vec![PixelFormat::Rgba8Unorm, PixelFormat::Rgba8Unorm],
                    depth_format: None,
                    sample_count: 1,
                },
            })
            .unwrap(),
    )
}

#[derive(Clone, Copy, Debug)]
enum Step {
    Bind { other: bool, offset: u32 },
    Draw,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (any::<bool>(), prop::sample::select(vec![0u32, 256]))
            .prop_map(|(other, offset)| Step::Bind { other, offset }),
        Just(Step::Draw),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn redundant_binds_never_reach_the_context(steps in prop::collection::vec(step(), 1..24)) {
        let scene = Scene::new(SoftContextConfig::default());
        let mut list = scene.list();
        scene.bind_draw_state(&mut list, 0);

        let mut bound = (false, 0);
        let mut applied_albedo = None;
        let mut applied_offset = None;
        let (mut texture_binds, mut range_binds, mut draws) = (0, 0, 0);
        for step in steps {
            match step {
                Step::Bind { other, offset } => {
                    let set = if other { &scene.other_set } else { &scene.set };
                    list.set_graphics_resource_set(0, set, &[offset]).unwrap();
                    bound = (other, offset);
                }
                Step::Draw => {
                    list.draw(3, 1, 0, 0).unwrap();
                    draws += 1;
                    if applied_albedo != Some(bound.0) {
                        applied_albedo = Some(bound.0);
                        texture_binds += 1;
                    }
                    if applied_offset != Some(bound.1) {
                        applied_offset = Some(bound.1);
                        range_binds += 1;
                    }
                }
            }
        }
        scene.submit(&mut list);

        let calls = scene.soft.take_calls();
        // the shared normal map goes to its unit once
        let shared_binds = if draws > 0 { 1 } else { 0 };
        prop_assert_eq!(count(&calls, |call| matches!(call, Call::DrawArrays { .. })), draws);
        prop_assert_eq!(
            count(&calls, |call| matches!(call, Call::BindTexture { texture: Some(_), .. })),
            texture_binds + shared_binds
        );
        prop_assert_eq!(
            count(&calls, |call| matches!(call, Call::BindSampler { sampler: Some(_), .. })),
            2 * shared_binds
        );
        prop_assert_eq!(uniform_ranges(&calls).len(), range_binds);
    }
}

#[test]
fn identical_binds_reach_the_context_once() {
    let scene = Scene::new(SoftContextConfig::default());
    let mut list = scene.list();
    scene.bind_draw_state(&mut list, 0);
    list.draw(3, 1, 0, 0).unwrap();
    list.set_graphics_resource_set(0, &scene.set, &[0]).unwrap();
    list.set_vertex_buffer(0, &scene.vertices, 0).unwrap();
    list.draw(3, 1, 0, 0).unwrap();
    scene.submit(&mut list);

    let calls = scene.soft.take_calls();
    assert_eq!(count(&calls, |call| matches!(call, Call::DrawArrays { .. })), 2);
    assert_eq!(count(&calls, |call| matches!(call, Call::UseProgram(Some(_)))), 1);
    assert_eq!(
        count(&calls, |call| matches!(call, Call::BindTexture { texture: Some(_), .. })),
        2
    );
    assert_eq!(
        count(&calls, |call| matches!(call, Call::BindSampler { sampler: Some(_), .. })),
        2
    );
    assert_eq!(
        count(&calls, |call| matches!(call, Call::VertexAttribPointer { .. })),
        1
    );
    assert_eq!(uniform_ranges(&calls), [(0, 256)]);
}

#[test]
fn dynamic_offset_changes_only_move_the_buffer_range() {
    let scene = Scene::new(SoftContextConfig::default());
    let mut list = scene.list();
    scene.bind_draw_state(&mut list, 0);
    list.draw(3, 1, 0, 0).unwrap();
    list.set_graphics_resource_set(0, &scene.set, &[256]).unwrap();
    list.draw(3, 1, 0, 0).unwrap();
    scene.submit(&mut list);

    let calls = scene.soft.take_calls();
    assert_eq!(uniform_ranges(&calls), [(0, 256), (256, 256)]);
    assert_eq!(
        count(&calls, |call| matches!(call, Call::BindTexture { texture: Some(_), .. })),
        2
    );
    assert_eq!(
        count(&calls, |call| matches!(call, Call::BindSampler { sampler: Some(_), .. })),
        2
    );
}

#[test]
fn samplers_follow_their_texture_unit() {
    let scene = Scene::new(SoftContextConfig::default());
    let program = scene.pipeline.raw_program();
    assert_eq!(scene.soft.uniform_value(program, "u_Albedo"), Some(0));
    assert_eq!(scene.soft.uniform_value(program, "u_Normal"), Some(1));
    assert_eq!(scene.soft.uniform_value(program, "s_Albedo"), None);
    assert_eq!(scene.soft.block_binding(program, "Globals"), Some(0));

    let mut list = scene.list();
    scene.bind_draw_state(&mut list, 0);
    list.draw(3, 1, 0, 0).unwrap();
    scene.submit(&mut list);

    let calls = scene.soft.take_calls();
    let albedo_on_unit_0 = [
        Call::ActiveTexture(gl::TEXTURE0),
        Call::BindTexture {
            target: gl::TEXTURE_2D,
            texture: scene.albedo.raw_handle(),
        },
    ];
    assert!(calls.windows(2).any(|pair| *pair == albedo_on_unit_0[..]));
    assert!(calls.contains(&Call::BindSampler {
        unit: 0,
        sampler: Some(scene.samplers[0].raw_handle()),
    }));
    assert!(calls.contains(&Call::BindSampler {
        unit: 1,
        sampler: Some(scene.samplers[1].raw_handle()),
    }));
}

#[test]
fn pipeline_state_is_applied_on_change() {
    let scene = Scene::new(SoftContextConfig::default());
    let culled = Arc::clone(&scene.pipeline);
    let unculled = scene.pipeline_with(RasterizerState {
        cull_mode: FaceCullMode::None,
        ..RasterizerState::default()
    });
    scene.soft.take_calls();

    let mut list = scene.list();
    scene.bind_draw_state(&mut list, 0);
    list.draw(3, 1, 0, 0).unwrap();
    list.set_pipeline(&unculled).unwrap();
    list.draw(3, 1, 0, 0).unwrap();
    list.draw(3, 1, 0, 0).unwrap();
    list.set_pipeline(&culled).unwrap();
    list.draw(3, 1, 0, 0).unwrap();
    scene.submit(&mut list);

    let calls = scene.soft.take_calls();
    assert_eq!(count(&calls, |call| matches!(call, Call::DrawArrays { .. })), 4);
    assert_eq!(count(&calls, |call| matches!(call, Call::UseProgram(Some(_)))), 3);
    assert_eq!(count(&calls, |call| *call == Call::CullFace(gl::BACK)), 2);
    assert_eq!(count(&calls, |call| matches!(call, Call::FrontFace(_))), 1);
    // the first one comes from the state every submission starts from
    assert_eq!(count(&calls, |call| *call == Call::Disable(gl::CULL_FACE)), 2);
}

#[test]
fn draws_pick_the_narrowest_native_call() {
    let scene = Scene::new(SoftContextConfig::default());
    let mut list = scene.list();
    scene.bind_draw_state(&mut list, 0);
    list.set_index_buffer(&scene.indices, IndexFormat::UInt16, 8).unwrap();
    list.draw(3, 1, 0, 0).unwrap();
    list.draw(3, 4, 2, 0).unwrap();
    list.draw(3, 1, 0, 2).unwrap();
    list.draw_indexed(6, 1, 2, 0, 0).unwrap();
    list.draw_indexed(6, 2, 0, 0, 0).unwrap();
    list.draw_indexed(6, 1, 0, 5, 0).unwrap();
    list.draw_indexed(6, 3, 0, -2, 0).unwrap();
    list.draw_indexed(6, 1, 0, 0, 1).unwrap();
    scene.submit(&mut list);

    let calls = scene.soft.take_calls();
    let mode = gl::TRIANGLES;
    let element_type = gl::UNSIGNED_SHORT;
    let draws = calls.iter().filter(|call| call.is_draw()).cloned().collect::<Vec<_>>();
    assert_eq!(
        draws,
        [
            Call::DrawArrays {
                mode,
                first: 0,
                count: 3,
            },
            Call::DrawArraysInstanced {
                mode,
                first: 2,
                count: 3,
                instance_count: 4,
            },
            Call::DrawArraysInstancedBaseInstance {
                mode,
                first: 0,
                count: 3,
                instance_count: 1,
                base_instance: 2,
            },
            Call::DrawElements {
                mode,
                count: 6,
                element_type,
                offset: 12,
            },
            Call::DrawElementsInstanced {
                mode,
                count: 6,
                element_type,
                offset: 8,
                instance_count: 2,
            },
            Call::DrawElementsBaseVertex {
                mode,
                count: 6,
                element_type,
                offset: 8,
                base_vertex: 5,
            },
            Call::DrawElementsInstancedBaseVertex {
                mode,
                count: 6,
                element_type,
                offset: 8,
                instance_count: 3,
                base_vertex: -2,
            },
            Call::DrawElementsInstancedBaseVertexBaseInstance {
                mode,
                count: 6,
                element_type,
                offset: 8,
                instance_count: 1,
                base_vertex: 0,
                base_instance: 1,
            },
        ]
    );
    let index_binds = count(&calls, |call| {
        *call
            == Call::BindBuffer {
                target: gl::ELEMENT_ARRAY_BUFFER,
                buffer: Some(scene.indices.raw_handle()),
            }
    });
    assert_eq!(index_binds, 1);
}

#[test]
fn sets_are_checked_against_the_pipeline_that_draws_with_them() {
    let scene = Scene::new(SoftContextConfig::default());
    let sampler_only = Arc::new(
        scene
            .device
            .create_resource_layout(&ResourceLayoutDescription {
                label: None,
                elements: vec![ResourceLayoutElement::new(
                    "s_Albedo",
                    ResourceKind::Sampler,
                    ShaderStages::FRAGMENT,
                )]
                .into(),
            })
            .unwrap(),
    );
    let incompatible = graphics_pipeline(
        &scene.device,
        &sampler_only,
        &scene.vs,
        &scene.fs,
        RasterizerState::default(),
    );
    // same elements as the scene layout, created separately
    let lookalike = Arc::new(
        scene
            .device
            .create_resource_layout(&ResourceLayoutDescription {
                label: None,
                elements: scene.layout.elements().to_vec().into(),
            })
            .unwrap(),
    );
    let compatible = graphics_pipeline(
        &scene.device,
        &lookalike,
        &scene.vs,
        &scene.fs,
        RasterizerState::default(),
    );
    scene.soft.take_calls();

    let mut list = scene.list();
    scene.bind_draw_state(&mut list, 0);
    list.set_pipeline(&incompatible).unwrap();
    assert_eq!(
        list.draw(3, 1, 0, 0),
        Err(CommandError::IncompatibleResourceSet(0))
    );
    list.set_pipeline(&compatible).unwrap();
    list.draw(3, 1, 0, 0).unwrap();
    scene.submit(&mut list);

    let calls = scene.soft.calls();
    assert_eq!(count(&calls, |call| call.is_draw()), 1);
}

#[test]
fn clears_stay_with_the_framebuffer_they_were_recorded_for() {
    let scene = Scene::new(SoftContextConfig::default());
    let single = Arc::new(
        scene
            .device
            .create_framebuffer(&FramebufferDescription {
                label: None,
                color_targets: &[FramebufferAttachment {
                    target: &scene.targets[1],
                    mip_level: 0,
                    array_layer: 0,
                }],
                depth_target: None,
            })
            .unwrap(),
    );
    scene.soft.take_calls();

    let mut list = scene.list();
    list.set_framebuffer(&scene.framebuffer).unwrap();
    list.clear_color_target(0, Color::RED).unwrap();
    list.set_framebuffer(&single).unwrap();
    scene.submit(&mut list);

    let calls = scene.soft.take_calls();
    assert_eq!(count(&calls, |call| matches!(call, Call::ClearBuffer { .. })), 1);
    let cleared_at = calls
        .iter()
        .position(|call| matches!(call, Call::ClearBuffer { .. }))
        .unwrap();
    let second_bound_at = calls
        .iter()
        .position(|call| {
            *call
                == Call::BindFramebuffer {
                    target: gl::DRAW_FRAMEBUFFER,
                    framebuffer: single.raw_handle(),
                }
        })
        .unwrap();
    assert!(cleared_at < second_bound_at);
    assert_eq!(&scene.target_image(0)[..4], &[255, 0, 0, 255]);
    assert!(scene.target_image(1).iter().all(|&byte| byte == 0));
}

#[test]
fn clears_wait_for_a_framebuffer() {
    let scene = Scene::new(SoftContextConfig::default());
    let mut list = scene.list();
    list.clear_color_target(0, Color::RED).unwrap();
    // past the color targets of the framebuffer bound below
    list.clear_color_target(3, Color::BLUE).unwrap();
    list.set_framebuffer(&scene.framebuffer).unwrap();
    list.end().unwrap();
    assert!(scene.soft.calls().is_empty());
    scene.device.submit_commands(&mut list, None).unwrap();
    assert!(scene.soft.validation_errors().is_empty());

    let calls = scene.soft.take_calls();
    let clears = calls
        .iter()
        .filter(|call| matches!(call, Call::ClearBuffer { .. }))
        .cloned()
        .collect::<Vec<_>>();
    assert_eq!(
        clears,
        [Call::ClearBuffer {
            target: gl::COLOR,
            draw_buffer: 0,
            values: vec![1.0, 0.0, 0.0, 1.0],
        }]
    );
    let bound_at = calls
        .iter()
        .position(|call| {
            *call
                == Call::BindFramebuffer {
                    target: gl::DRAW_FRAMEBUFFER,
                    framebuffer: scene.framebuffer.raw_handle(),
                }
        })
        .unwrap();
    let cleared_at = calls
        .iter()
        .position(|call| matches!(call, Call::ClearBuffer { .. }))
        .unwrap();
    assert!(bound_at < cleared_at);

    assert!(scene.target_image(0).chunks(4).all(|texel| texel == [255, 0, 0, 255]));
    assert!(scene.target_image(1).iter().all(|&byte| byte == 0));
}

#[test]
fn clears_apply_to_their_own_attachment() {
    let scene = Scene::new(SoftContextConfig::default());
    let mut list = scene.list();
    list.set_framebuffer(&scene.framebuffer).unwrap();
    list.clear_color_target(1, Color::GREEN).unwrap();
    assert!(matches!(
        list.clear_color_target(2, Color::GREEN),
        Err(CommandError::ColorTargetOutOfRange(2))
    ));
    assert!(matches!(
        list.clear_depth_stencil(1.0, 0),
        Err(CommandError::NoDepthTarget)
    ));
    scene.submit(&mut list);

    let calls = scene.soft.take_calls();
    assert!(calls.contains(&Call::ColorMask {
        draw_buffer: Some(1),
        mask: [true; 4],
    }));
    assert!(scene.target_image(0).iter().all(|&byte| byte == 0));
    assert!(scene.target_image(1).chunks(4).all(|texel| texel == [0, 255, 0, 255]));
}

#[test]
fn buffer_updates_and_copies() {
    let (soft, device) = open(SoftContextConfig::default());
    let src = buffer(&device, 64, BufferUsage::DYNAMIC);
    let dst = buffer(&device, 64, BufferUsage::VERTEX);
    let staging = buffer(&device, 64, BufferUsage::STAGING);
    let pattern = (0..64).collect::<Vec<u8>>();
    device.update_buffer(&src, 0, &pattern).unwrap();

    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    list.copy_buffer(&src, 8, &dst, 16, 8).unwrap();
    list.update_buffer(&dst, 0, &[0xAA; 4]).unwrap();
    list.copy_buffer(&dst, 0, &staging, 0, 64).unwrap();
    assert!(matches!(
        list.copy_buffer(&src, 60, &dst, 0, 8),
        Err(CommandError::InvalidCopy(_))
    ));
    list.end().unwrap();
    device.submit_commands(&mut list, None).unwrap();
    assert!(soft.validation_errors().is_empty());

    let mut expected = vec![0; 64];
    expected[..4].copy_from_slice(&[0xAA; 4]);
    expected[16..24].copy_from_slice(&pattern[8..16]);
    assert_eq!(soft.buffer_contents(dst.raw_handle()).unwrap(), expected);

    let mut read_back = vec![0; 64];
    device.read_buffer(&staging, 0, &mut read_back).unwrap();
    assert_eq!(read_back, expected);
    assert!(matches!(
        device.read_buffer(&dst, 0, &mut read_back),
        Err(ResourceError::NotStaging("buffer"))
    ));
}

fn staging_pair(device: &gles::Device) -> (gles::Texture, gles::Texture) {
    let desc = |usage| TextureDescription::texture_2d(8, 8, 1, 1, PixelFormat::Rgba8Unorm, usage);
    let image = device.create_texture(&desc(TextureUsage::SAMPLED)).unwrap();
    let staging = device.create_texture(&desc(TextureUsage::STAGING)).unwrap();
    assert!(staging.is_staging());
    assert!(staging.raw_handle().is_none());
    assert!(staging.staging_buffer().is_some());
    (image, staging)
}

fn region() -> TextureRegion {
    TextureRegion {
        origin: Origin3d { x: 2, y: 3, z: 0 },
        size: Extent3d::new(3, 2, 1),
        mip_level: 0,
        array_layer: 0,
    }
}

#[test]
fn images_read_back_through_staging_textures() {
    let (soft, device) = open(SoftContextConfig::default());
    let (image, staging) = staging_pair(&device);
    let data = (1..=24).collect::<Vec<u8>>();
    device.update_texture(&image, &region(), &data).unwrap();

    let texels = soft.texture_image(image.raw_handle().unwrap(), 0, 0).unwrap();
    let first_row = (3 * 8 + 2) * 4;
    assert_eq!(texels[first_row..first_row + 12], data[..12]);

    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    list.copy_texture(&image, &staging, &TextureCopy::whole_level(image.description(), 0, 0))
        .unwrap();
    list.end().unwrap();
    device.submit_commands(&mut list, None).unwrap();
    assert!(soft.validation_errors().is_empty());

    let mut read_back = vec![0; data.len()];
    device.read_texture(&staging, &region(), &mut read_back).unwrap();
    assert_eq!(read_back, data);
}

#[test]
fn staging_textures_upload_into_images() {
    let (soft, device) = open(SoftContextConfig::default());
    let (image, staging) = staging_pair(&device);
    let data = (101..125).collect::<Vec<u8>>();
    device.update_texture(&staging, &region(), &data).unwrap();

    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    list.copy_texture(&staging, &image, &TextureCopy::whole_level(staging.description(), 0, 0))
        .unwrap();
    list.end().unwrap();
    device.submit_commands(&mut list, None).unwrap();
    assert!(soft.validation_errors().is_empty());

    let texels = soft.texture_image(image.raw_handle().unwrap(), 0, 0).unwrap();
    for row in 0..2 {
        let start = ((3 + row) * 8 + 2) * 4;
        assert_eq!(texels[start..start + 12], data[row * 12..row * 12 + 12]);
    }
    assert!(texels[..(3 * 8 + 2) * 4].iter().all(|&byte| byte == 0));
}

#[test]
fn only_staging_textures_are_read_back() {
    let (_soft, device) = open(SoftContextConfig::default());
    let (image, _staging) = staging_pair(&device);
    let mut data = vec![0; 24];
    assert!(matches!(
        device.read_texture(&image, &region(), &mut data),
        Err(ResourceError::NotStaging("texture"))
    ));
}

#[test]
fn compute_binds_storage_blocks() {
    let (soft, device) = open(SoftContextConfig::default());
    let layout = Arc::new(
        device
            .create_resource_layout(&ResourceLayoutDescription {
                label: None,
                elements: vec![ResourceLayoutElement::new(
                    "Particles",
                    ResourceKind::StructuredBufferReadWrite,
                    ShaderStages::COMPUTE,
                )]
                .into(),
            })
            .unwrap(),
    );
    let particles = Arc::new(
        device
            .create_buffer(&BufferDescription {
                label: Some("particles"),
                size: 64,
                usage: BufferUsage::STRUCTURED_READ_WRITE,
                structure_byte_stride: 16,
            })
            .unwrap(),
    );
    let resources = [BindableResource::Buffer(BufferRange {
        buffer: Arc::clone(&particles),
        offset: 0,
        size: 0,
    })];
    let set = Arc::new(
        device
            .create_resource_set(&ResourceSetDescription {
                label: None,
                layout: &layout,
                resources: &resources,
            })
            .unwrap(),
    );
    let cs = shader(&device, ShaderStages::COMPUTE, COMPUTE_SOURCE);
    let pipeline = Arc::new(
        device
            .create_compute_pipeline(&ComputePipelineDescription {
                label: None,
                shader: &cs,
                resource_layouts: &[Arc::clone(&layout)],
                thread_group_size: [8, 1, 1],
            })
            .unwrap(),
    );
    assert_eq!(soft.block_binding(pipeline.raw_program(), "Particles"), Some(0));
    soft.take_calls();

    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    list.set_pipeline(&pipeline).unwrap();
    assert!(matches!(list.dispatch(4, 1, 1), Err(CommandError::MissingResourceSet(0))));
    list.set_compute_resource_set(0, &set, &[]).unwrap();
    list.dispatch(4, 1, 1).unwrap();
    list.end().unwrap();
    device.submit_commands(&mut list, None).unwrap();
    assert!(soft.validation_errors().is_empty());

    let calls = soft.take_calls();
    // a zero size binds the rest of the buffer
    assert!(calls.contains(&Call::BindBufferRange {
        target: gl::SHADER_STORAGE_BUFFER,
        index: 0,
        buffer: Some(particles.raw_handle()),
        offset: 0,
        size: 64,
    }));
    let dispatched_at = calls
        .iter()
        .position(|call| *call == Call::DispatchCompute([4, 1, 1]))
        .unwrap();
    assert_eq!(calls[dispatched_at + 1], Call::MemoryBarrier(gl::ALL_BARRIER_BITS));
}

#[test]
fn gles30_falls_back_to_the_shared_state() {
    let scene = Scene::new(SoftContextConfig::gles30());
    assert!(matches!(
        scene.device.create_shader(&ShaderDescription {
            label: None,
            stage: ShaderStages::COMPUTE,
            source: COMPUTE_SOURCE.into(),
            entry_point: "main".into(),
        }),
        Err(ShaderError::Compilation(_))
    ));

    let mut list = scene.list();
    scene.bind_draw_state(&mut list, 0);
    list.set_index_buffer(&scene.indices, IndexFormat::UInt32, 0).unwrap();
    assert!(matches!(
        list.draw(3, 1, 0, 1),
        Err(CommandError::Unsupported("base instance"))
    ));
    assert!(matches!(
        list.draw_indexed(3, 1, 0, 1, 0),
        Err(CommandError::Unsupported("base vertex"))
    ));
    assert!(matches!(
        list.dispatch(1, 1, 1),
        Err(CommandError::Unsupported("compute dispatch"))
    ));
    list.push_debug_group("shadows").unwrap();
    list.draw_indexed(3, 1, 0, 0, 0).unwrap();
    list.pop_debug_group().unwrap();
    scene.submit(&mut list);

    let calls = scene.soft.take_calls();
    assert_eq!(count(&calls, |call| call.is_draw()), 1);
    assert!(calls.contains(&Call::ColorMask {
        draw_buffer: None,
        mask: [true; 4],
    }));
    assert!(!calls
        .iter()
        .any(|call| matches!(call, Call::ColorMask { draw_buffer: Some(_), .. })));
    assert!(!calls
        .iter()
        .any(|call| matches!(call, Call::PushDebugGroup(_) | Call::PopDebugGroup)));
}

#[test]
fn recording_errors() {
    let scene = Scene::new(SoftContextConfig::default());
    let mut list = scene.device.create_command_list().unwrap();
    assert!(matches!(list.draw(3, 1, 0, 0), Err(CommandError::NotRecording)));
    assert!(matches!(
        scene.device.submit_commands(&mut list, None),
        Err(CommandError::NotEnded)
    ));

    list.begin().unwrap();
    assert!(matches!(list.draw(3, 1, 0, 0), Err(CommandError::NoPipeline("graphics"))));
    list.set_pipeline(&scene.pipeline).unwrap();
    assert!(matches!(list.draw(3, 1, 0, 0), Err(CommandError::NoFramebuffer)));
    list.set_framebuffer(&scene.framebuffer).unwrap();
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
    assert!(matches!(list.pop_debug_group(), Err(CommandError::UnbalancedDebugGroup)));
    list.end().unwrap();
    assert!(matches!(list.draw(3, 1, 0, 0), Err(CommandError::NotRecording)));
    scene.device.submit_commands(&mut list, None).unwrap();
    assert!(matches!(
        scene.device.submit_commands(&mut list, None),
        Err(CommandError::NotEnded)
    ));
}

#[test]
fn debug_groups_reach_the_context_balanced() {
    let scene = Scene::new(SoftContextConfig::default());
    let mut list = scene.list();
    list.push_debug_group("shadows").unwrap();
    list.insert_debug_marker("cascade 0").unwrap();
    list.pop_debug_group().unwrap();
    list.push_debug_group("left open").unwrap();
    scene.submit(&mut list);

    let calls = scene.soft.take_calls();
    let pushed = calls
        .iter()
        .filter_map(|call| match *call {
            Call::PushDebugGroup(ref label) => Some(label.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(pushed, ["command list", "shadows", "left open"]);
    assert!(calls.contains(&Call::DebugMessageInsert("cascade 0".to_string())));
    assert_eq!(count(&calls, |call| *call == Call::PopDebugGroup), 3);
}

#[test]
fn fences_signal_once_the_commands_are_flushed() {
    let scene = Scene::new(SoftContextConfig::default());
    let fence = Arc::new(Fence::new(false));
    let mut list = scene.list();
    list.set_framebuffer(&scene.framebuffer).unwrap();
    list.clear_color_target(0, Color::BLACK).unwrap();
    list.end().unwrap();
    scene.device.submit_commands(&mut list, Some(&fence)).unwrap();

    assert!(fence.signaled());
    assert!(fence.wait(Duration::from_millis(1)));
    assert!(scene.soft.calls().contains(&Call::Flush));
    assert!(scene.device.wait_for_idle(Duration::from_millis(1)));
    assert!(scene.soft.calls().contains(&Call::Finish));
}

#[test]
fn swapchain_frames_are_presented() {
    let (soft, device) = open(SoftContextConfig::default());
    let swapchain = device
        .create_swapchain(&SwapchainDescription {
            label: None,
            surface: SurfaceHandle(3),
            width: 32,
            height: 16,
            color_srgb: true,
            depth_format: None,
            vsync: true,
        })
        .unwrap();
    assert_eq!(swapchain.framebuffer().size(), (32, 16));
    assert_eq!(soft.surface_size(), (32, 16));
    assert!(soft.calls().contains(&Call::SetSwapInterval(1)));

    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    list.set_framebuffer(swapchain.framebuffer()).unwrap();
    list.clear_color_target(0, Color::GREEN).unwrap();
    assert!(matches!(
        list.clear_color_target(1, Color::GREEN),
        Err(CommandError::ColorTargetOutOfRange(1))
    ));
    list.end().unwrap();
    device.submit_commands(&mut list, None).unwrap();
    device.present(&swapchain).unwrap();

    let calls = soft.take_calls();
    assert_eq!(count(&calls, |call| matches!(call, Call::ClearBuffer { .. })), 1);
    assert_eq!(count(&calls, |call| *call == Call::SwapBuffers), 1);
    assert!(soft.validation_errors().is_empty());

    swapchain.resize(64, 64);
    assert_eq!(swapchain.framebuffer().size(), (64, 64));
    assert_eq!(soft.surface_size(), (64, 64));
}
