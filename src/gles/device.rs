use std::{sync::Arc, time::Duration};

use arrayvec::ArrayVec;
use parking_lot::Mutex;

use super::{
    conv,
    native::{self, NativeObject as _},
    queue, AdapterContext, AdapterContextLock, DeviceShared, Limits, PrivateCapabilities,
};
use crate::{
    format, BufferUsage, CommandError, DeviceError, DeviceOptions, Dispose, DisposeFlag, Fence,
    FormatSupport, PipelineError, ResourceError, ShaderError, ShaderStages, TextureUsage,
    MAX_COLOR_TARGETS, MAX_RESOURCE_SETS, MAX_VERTEX_BUFFERS,
};

fn object_error(what: &'static str) -> impl Fn(String) -> DeviceError {
    move |message| {
        log::error!("Unable to create a {}: {}", what, message);
        DeviceError::OutOfMemory
    }
}

/// GL takes sizes and offsets as `GLsizeiptr`/`GLintptr`, which the context
/// surface narrows to `i32`.
fn check_size(size: crate::BufferAddress) -> Result<i32, ResourceError> {
    if size > i32::MAX as crate::BufferAddress {
        Err(ResourceError::InvalidDescription(format!(
            "{} bytes exceed the largest GL buffer",
            size
        )))
    } else {
        Ok(size as i32)
    }
}

impl DeviceShared {
    fn create_raw_buffer(
        &self,
        gl: &dyn native::Context,
        size: crate::BufferAddress,
        usage: u32,
    ) -> Result<native::BufferId, ResourceError> {
        // copies work in whole words on every backend
        let length = check_size(format::align_to(size.max(1), crate::COPY_BUFFER_ALIGNMENT))?;
        let raw = gl.create_buffer().map_err(object_error("buffer"))?;
        gl.bind_buffer(native::COPY_WRITE_BUFFER, Some(raw));
        gl.buffer_data_size(native::COPY_WRITE_BUFFER, length, usage);
        gl.bind_buffer(native::COPY_WRITE_BUFFER, None);
        Ok(raw)
    }

    fn link_program(
        &self,
        gl: &dyn native::Context,
        shaders: &[&super::Shader],
    ) -> Result<native::ProgramId, PipelineError> {
        let program = gl
            .create_program()
            .map_err(|message| PipelineError::Device(object_error("program")(message)))?;
        for shader in shaders {
            gl.attach_shader(program, shader.raw);
        }
        gl.link_program(program);
        for shader in shaders {
            gl.detach_shader(program, shader.raw);
        }
        if !gl.get_program_link_status(program) {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            return Err(PipelineError::Linkage(log));
        }
        let log = gl.get_program_info_log(program);
        if !log.is_empty() {
            log::warn!("Program link: {}", log);
        }
        Ok(program)
    }

    /// Points every named block and sampler of `program` at the units its
    /// resource sets will be bound to.
    fn bind_program_resources(
        &self,
        gl: &dyn native::Context,
        program: native::ProgramId,
        layouts: &[Arc<super::ResourceLayout>],
        base_indices: &[super::RegisterCounters],
    ) {
        gl.use_program(Some(program));
        for (layout, base) in layouts.iter().zip(base_indices) {
            for (element, binding) in layout.elements.iter().zip(layout.bindings.iter()) {
                let unit = base.get(binding.register) + binding.index;
                let name = element.name.as_str();
                match binding.register {
                    super::Register::UniformBuffer => match gl.get_uniform_block_index(program, name) {
                        Some(index) => gl.uniform_block_binding(program, index, unit),
                        None => log::warn!("Uniform block `{}` is not used by the program", name),
                    },
                    super::Register::StorageBuffer => {
                        match gl.get_shader_storage_block_index(program, name) {
                            Some(index) => gl.shader_storage_block_binding(program, index, unit),
                            None => log::warn!("Storage block `{}` is not used by the program", name),
                        }
                    }
                    super::Register::Texture | super::Register::Image => {
                        match gl.get_uniform_location(program, name) {
                            Some(location) => gl.uniform_1_i32(Some(location), unit as i32),
                            // samplers usually live in the uniform of their texture
                            None if element.kind == crate::ResourceKind::Sampler => {}
                            None => log::warn!("Uniform `{}` is not used by the program", name),
                        }
                    }
                }
            }
        }
        gl.use_program(None);
    }

    fn check_layouts(&self, layouts: &[Arc<super::ResourceLayout>]) -> Result<(), PipelineError> {
        if layouts.len() > MAX_RESOURCE_SETS {
            return Err(PipelineError::TooManyResourceLayouts(layouts.len()));
        }
        let total = layouts
            .iter()
            .fold(super::RegisterCounters::default(), |sum, layout| {
                sum + layout.counters
            });
        let limits = &self.limits;
        let checks = [
            (
                "uniform buffer bindings",
                total.uniform_buffers,
                limits.max_uniform_buffer_bindings,
            ),
            (
                "storage buffer bindings",
                total.storage_buffers,
                limits.max_storage_buffer_bindings,
            ),
            ("texture units", total.textures, limits.max_texture_units),
            ("image units", total.images, limits.max_image_units),
        ];
        for &(what, used, available) in checks.iter() {
            if used > available {
                return Err(PipelineError::Linkage(format!(
                    "resource layouts need {} {}, the device has {}",
                    used, what, available
                )));
            }
        }
        Ok(())
    }
}

fn map_stencil_side(
    behavior: &crate::StencilBehavior,
    state: &crate::DepthStencilState,
) -> super::StencilSide {
    super::StencilSide {
        function: conv::map_compare_func(behavior.comparison),
        reference: state.stencil_reference as i32,
        mask: state.stencil_read_mask as u32,
        fail: conv::map_stencil_op(behavior.fail),
        depth_fail: conv::map_stencil_op(behavior.depth_fail),
        pass: conv::map_stencil_op(behavior.pass),
    }
}

fn map_color_target(attachment: &crate::BlendAttachment) -> super::ColorTargetDesc {
    let blend = if attachment.blend_enabled {
        Some(super::BlendDesc {
            color: super::BlendComponent {
                src: conv::map_blend_factor(attachment.source_color_factor),
                dst: conv::map_blend_factor(attachment.destination_color_factor),
                equation: conv::map_blend_equation(attachment.color_function),
            },
            alpha: super::BlendComponent {
                src: conv::map_blend_factor(attachment.source_alpha_factor),
                dst: conv::map_blend_factor(attachment.destination_alpha_factor),
                equation: conv::map_blend_equation(attachment.alpha_function),
            },
        })
    } else {
        None
    };
    super::ColorTargetDesc {
        blend,
        write_mask: attachment.color_write_mask,
    }
}

#[derive(Debug)]
pub struct Device {
    shared: Arc<DeviceShared>,
}

impl Device {
    /// Opens the engine on a current GL context.
    pub fn new(context: Arc<dyn native::Context>, options: DeviceOptions) -> Result<Self, DeviceError> {
        profiling::scope!("Device::new");
        let context = Arc::new(AdapterContext::new(context));
        let gl = context.lock();
        let version = gl.version();
        if !(version.desktop_at_least(3, 3) || version.es_at_least(3, 0)) {
            log::error!("{} is not supported, OpenGL 3.3 or OpenGL ES 3.0 is needed", version);
            return Err(DeviceError::Lost);
        }
        let private_caps = PrivateCapabilities::new(&*gl);
        let limits = Limits::new(&*gl, private_caps);
        log::debug!(
            "GL device {:?} ({}): {:?} {:#?}",
            gl.renderer(),
            version,
            private_caps,
            limits
        );

        let vao = gl
            .create_vertex_array()
            .map_err(object_error("vertex array"))?;
        let copy_fbo = match gl.create_framebuffer() {
            Ok(fbo) => fbo,
            Err(message) => {
                gl.delete_vertex_array(vao);
                return Err(object_error("framebuffer")(message));
            }
        };
        let draw_fbo = match gl.create_framebuffer() {
            Ok(fbo) => fbo,
            Err(message) => {
                gl.delete_framebuffer(copy_fbo);
                gl.delete_vertex_array(vao);
                return Err(object_error("framebuffer")(message));
            }
        };
        gl.bind_vertex_array(Some(vao));
        if !version.is_embedded {
            // sRGB targets encode on write, as they do on GL ES
            gl.enable(native::FRAMEBUFFER_SRGB);
        }
        drop(gl);

        Ok(Self {
            shared: Arc::new(DeviceShared {
                context,
                private_caps,
                limits,
                options,
                vao,
                copy_fbo,
                draw_fbo,
            }),
        })
    }

    pub fn renderer(&self) -> String {
        self.shared.context.lock().renderer()
    }

    pub fn capabilities(&self) -> PrivateCapabilities {
        self.shared.private_caps
    }

    pub fn options(&self) -> &DeviceOptions {
        &self.shared.options
    }

    pub fn context(&self) -> &Arc<AdapterContext> {
        &self.shared.context
    }

    fn lock(&self) -> AdapterContextLock<'_> {
        self.shared.context.lock()
    }

    fn check_region(
        texture: &super::Texture,
        region: &crate::TextureRegion,
        data_len: usize,
    ) -> Result<(u32, u32), ResourceError> {
        if texture.is_disposed() {
            return Err(ResourceError::Disposed("texture"));
        }
        let (width, height) = format::validate_region(
            &texture.desc,
            &region.origin,
            region.mip_level,
            region.array_layer,
            &region.size,
        )
        .map_err(ResourceError::InvalidDescription)?;
        let needed = format::packed_size(texture.desc.format, width, height, region.size.depth);
        if (data_len as u64) < needed {
            return Err(ResourceError::InvalidDescription(format!(
                "region needs {} bytes of data, got {}",
                needed, data_len
            )));
        }
        Ok((width, height))
    }

    fn check_buffer_range(
        buffer: &super::Buffer,
        offset: crate::BufferAddress,
        len: usize,
    ) -> Result<(), ResourceError> {
        if buffer.is_disposed() {
            return Err(ResourceError::Disposed("buffer"));
        }
        if offset + len as u64 > buffer.size {
            return Err(ResourceError::InvalidDescription(format!(
                "range {}..{} is out of bounds of a {} byte buffer",
                offset,
                offset + len as u64,
                buffer.size
            )));
        }
        Ok(())
    }

    fn create_attachment(
        attachment: &crate::FramebufferAttachment<super::Api>,
        usage: TextureUsage,
    ) -> Result<super::Attachment, ResourceError> {
        let texture = attachment.target;
        if texture.is_disposed() {
            return Err(ResourceError::Disposed("texture"));
        }
        if !texture.desc.usage.contains(usage) {
            return Err(ResourceError::InvalidDescription(format!(
                "attachment texture lacks {:?} usage",
                usage
            )));
        }
        if attachment.mip_level >= texture.desc.mip_levels
            || attachment.array_layer >= texture.desc.layer_count()
        {
            return Err(ResourceError::InvalidDescription(format!(
                "attachment subresource {}/{} is out of range",
                attachment.mip_level, attachment.array_layer
            )));
        }
        texture.image()?;
        Ok(super::Attachment {
            texture: Arc::clone(texture),
            mip_level: attachment.mip_level,
            array_layer: attachment.array_layer,
        })
    }
}

impl crate::Device<super::Api> for Device {
    fn create_buffer(&self, desc: &crate::BufferDescription) -> Result<super::Buffer, ResourceError> {
        if desc.size == 0 {
            return Err(ResourceError::InvalidDescription(
                "buffer size must be non-zero".to_string(),
            ));
        }
        if desc.usage.intersects(
            BufferUsage::STRUCTURED_READ_ONLY | BufferUsage::STRUCTURED_READ_WRITE,
        ) && desc.structure_byte_stride == 0
        {
            return Err(ResourceError::InvalidDescription(
                "structured buffers need a non-zero structure stride".to_string(),
            ));
        }
        let usage_hint = if desc.usage.contains(BufferUsage::STAGING) {
            native::DYNAMIC_READ
        } else if desc.usage.contains(BufferUsage::DYNAMIC) {
            native::DYNAMIC_DRAW
        } else {
            native::STATIC_DRAW
        };
        let gl = self.lock();
        let raw = self.shared.create_raw_buffer(&*gl, desc.size, usage_hint)?;
        self.shared.set_label(&*gl, native::BUFFER, raw.raw(), desc.label);
        Ok(super::Buffer {
            raw,
            size: desc.size,
            usage: desc.usage,
            context: Arc::clone(&self.shared.context),
            disposed: DisposeFlag::default(),
        })
    }

    fn create_texture(&self, desc: &crate::TextureDescription) -> Result<super::Texture, ResourceError> {
        desc.validate()?;
        let support = conv::format_support(self.shared.private_caps, desc.format);
        let mut required = FormatSupport::required_for(desc.usage);
        if desc.is_staging() {
            required = FormatSupport::STAGING;
        }
        if !support.contains(required) {
            return Err(ResourceError::UnsupportedFormat {
                format: desc.format,
                usage: desc.usage,
            });
        }

        let gl = self.lock();
        if desc.is_staging() {
            let size = format::total_staging_size(desc);
            let raw = self.shared.create_raw_buffer(&*gl, size, native::DYNAMIC_READ)?;
            self.shared.set_label(&*gl, native::BUFFER, raw.raw(), desc.label);
            return Ok(super::Texture {
                raw: super::TextureStorage::Staging(raw),
                desc: desc.to_unlabeled(),
                context: Arc::clone(&self.shared.context),
                disposed: DisposeFlag::default(),
            });
        }

        let target = conv::map_texture_target(desc);
        if desc.sample_count > 1 && (target != native::TEXTURE_2D_MULTISAMPLE || desc.array_layers > 1) {
            return Err(ResourceError::InvalidDescription(
                "multisampled textures are plain 2D images".to_string(),
            ));
        }
        let internal = conv::describe_texture_format(desc.format).internal;
        let (width, height) = (desc.width as i32, desc.height as i32);
        let levels = desc.mip_levels as i32;

        let raw = gl.create_texture().map_err(object_error("texture"))?;
        gl.bind_texture(target, Some(raw));
        match target {
            native::TEXTURE_2D_MULTISAMPLE => gl.tex_storage_2d_multisample(
                target,
                desc.sample_count as i32,
                internal,
                width,
                height,
                true,
            ),
            native::TEXTURE_2D | native::TEXTURE_CUBE_MAP => {
                gl.tex_storage_2d(target, levels, internal, width, height)
            }
            native::TEXTURE_2D_ARRAY | native::TEXTURE_CUBE_MAP_ARRAY => {
                gl.tex_storage_3d(target, levels, internal, width, height, desc.layer_count() as i32)
            }
            _ => gl.tex_storage_3d(target, levels, internal, width, height, desc.depth as i32),
        }
        gl.bind_texture(target, None);
        self.shared.set_label(&*gl, native::TEXTURE, raw.raw(), desc.label);
        Ok(super::Texture {
            raw: super::TextureStorage::Image { raw, target },
            desc: desc.to_unlabeled(),
            context: Arc::clone(&self.shared.context),
            disposed: DisposeFlag::default(),
        })
    }

    fn create_sampler(&self, desc: &crate::SamplerDescription) -> Result<super::Sampler, DeviceError> {
        let caps = self.shared.private_caps;
        let gl = self.lock();
        let raw = gl.create_sampler().map_err(object_error("sampler"))?;

        let (min_filter, mag_filter) =
            conv::map_filter_modes(desc.min_filter, desc.mag_filter, desc.mipmap_filter);
        gl.sampler_parameter_i32(raw, native::TEXTURE_MIN_FILTER, min_filter as i32);
        gl.sampler_parameter_i32(raw, native::TEXTURE_MAG_FILTER, mag_filter as i32);

        let [s, t, r] = desc.address_modes;
        gl.sampler_parameter_i32(raw, native::TEXTURE_WRAP_S, conv::map_address_mode(s) as i32);
        gl.sampler_parameter_i32(raw, native::TEXTURE_WRAP_T, conv::map_address_mode(t) as i32);
        gl.sampler_parameter_i32(raw, native::TEXTURE_WRAP_R, conv::map_address_mode(r) as i32);
        if desc.address_modes.contains(&crate::SamplerAddressMode::Border) {
            gl.sampler_parameter_f32_slice(
                raw,
                native::TEXTURE_BORDER_COLOR,
                &conv::map_border_color(desc.border_color),
            );
        }

        gl.sampler_parameter_f32(raw, native::TEXTURE_MIN_LOD, desc.min_lod);
        gl.sampler_parameter_f32(raw, native::TEXTURE_MAX_LOD, desc.max_lod);
        if desc.lod_bias != 0 {
            if caps.contains(PrivateCapabilities::SAMPLER_LOD_BIAS) {
                gl.sampler_parameter_f32(raw, native::TEXTURE_LOD_BIAS, desc.lod_bias as f32);
            } else {
                log::warn!("Sampler LOD bias is not supported, ignoring {}", desc.lod_bias);
            }
        }
        if desc.max_anisotropy > 1 && caps.contains(PrivateCapabilities::ANISOTROPY) {
            gl.sampler_parameter_f32(
                raw,
                native::TEXTURE_MAX_ANISOTROPY_EXT,
                desc.max_anisotropy as f32,
            );
        }
        if let Some(kind) = desc.comparison {
            gl.sampler_parameter_i32(
                raw,
                native::TEXTURE_COMPARE_MODE,
                native::COMPARE_REF_TO_TEXTURE as i32,
            );
            gl.sampler_parameter_i32(
                raw,
                native::TEXTURE_COMPARE_FUNC,
                conv::map_compare_func(kind) as i32,
            );
        }
        self.shared.set_label(&*gl, native::SAMPLER, raw.raw(), desc.label);
        Ok(super::Sampler {
            raw,
            context: Arc::clone(&self.shared.context),
            disposed: DisposeFlag::default(),
        })
    }

    fn create_shader(&self, desc: &crate::ShaderDescription) -> Result<super::Shader, ShaderError> {
        profiling::scope!("create_shader");
        let shader_type = if desc.stage == ShaderStages::VERTEX {
            native::VERTEX_SHADER
        } else if desc.stage == ShaderStages::FRAGMENT {
            native::FRAGMENT_SHADER
        } else if desc.stage == ShaderStages::COMPUTE {
            if !self.shared.private_caps.contains(PrivateCapabilities::COMPUTE) {
                return Err(ShaderError::Compilation(
                    "compute shaders need OpenGL 4.3 or OpenGL ES 3.1".to_string(),
                ));
            }
            native::COMPUTE_SHADER
        } else {
            return Err(ShaderError::Compilation(format!(
                "a GLSL shader has exactly one stage, got {:?}",
                desc.stage
            )));
        };
        if desc.entry_point != "main" {
            log::warn!(
                "GLSL entry points are always `main`, ignoring `{}`",
                desc.entry_point
            );
        }

        let gl = self.lock();
        let raw = gl
            .create_shader(shader_type)
            .map_err(|message| ShaderError::Device(object_error("shader")(message)))?;
        gl.shader_source(raw, &desc.source);
        gl.compile_shader(raw);
        if !gl.get_shader_compile_status(raw) {
            let log = gl.get_shader_info_log(raw);
            gl.delete_shader(raw);
            return Err(ShaderError::Compilation(log));
        }
        let log = gl.get_shader_info_log(raw);
        if !log.is_empty() {
            log::warn!("Shader compilation: {}", log);
        }
        self.shared.set_label(&*gl, native::SHADER, raw.raw(), desc.label);
        Ok(super::Shader {
            raw,
            stage: desc.stage,
            context: Arc::clone(&self.shared.context),
            disposed: DisposeFlag::default(),
        })
    }

    fn create_resource_layout(
        &self,
        desc: &crate::ResourceLayoutDescription,
    ) -> Result<super::ResourceLayout, ResourceError> {
        if let Some(element) = desc.elements.iter().find(|element| element.stages.is_empty()) {
            return Err(ResourceError::InvalidDescription(format!(
                "element `{}` is not visible to any stage",
                element.name
            )));
        }
        if let Some(element) = desc
            .elements
            .iter()
            .find(|element| element.is_dynamic() && !element.kind.is_buffer())
        {
            return Err(ResourceError::InvalidDescription(format!(
                "element `{}` is dynamic but not a buffer",
                element.name
            )));
        }
        Ok(super::ResourceLayout::new(&desc.elements))
    }

    fn create_resource_set(
        &self,
        desc: &crate::ResourceSetDescription<super::Api>,
    ) -> Result<super::ResourceSet, ResourceError> {
        let elements = desc.layout.elements();
        if elements.len() != desc.resources.len() {
            return Err(ResourceError::ResourceCount {
                expected: elements.len(),
                actual: desc.resources.len(),
            });
        }
        for (index, (element, resource)) in elements.iter().zip(desc.resources).enumerate() {
            let matches = match *resource {
                crate::BindableResource::Buffer(ref range) => {
                    if range.buffer.is_disposed() {
                        return Err(ResourceError::Disposed("buffer"));
                    }
                    element.kind.is_buffer()
                }
                crate::BindableResource::Texture(ref texture) => {
                    if texture.is_disposed() {
                        return Err(ResourceError::Disposed("texture"));
                    }
                    element.kind.is_texture() && !texture.is_staging()
                }
                crate::BindableResource::Sampler(ref sampler) => {
                    if sampler.is_disposed() {
                        return Err(ResourceError::Disposed("sampler"));
                    }
                    element.kind == crate::ResourceKind::Sampler
                }
            };
            if !matches {
                return Err(ResourceError::KindMismatch {
                    index,
                    expected: element.kind,
                });
            }
        }
        Ok(super::ResourceSet {
            layout: Arc::clone(desc.layout),
            resources: desc.resources.to_vec(),
            disposed: DisposeFlag::default(),
        })
    }

    fn create_graphics_pipeline(
        &self,
        desc: &crate::GraphicsPipelineDescription<super::Api>,
    ) -> Result<super::Pipeline, PipelineError> {
        profiling::scope!("create_graphics_pipeline");
        self.shared.check_layouts(desc.resource_layouts)?;
        if desc.vertex_layouts.len() > MAX_VERTEX_BUFFERS {
            return Err(PipelineError::Linkage(format!(
                "{} vertex buffers exceed the limit of {}",
                desc.vertex_layouts.len(),
                MAX_VERTEX_BUFFERS
            )));
        }
        let color_count = desc.outputs.color_formats.len();
        let max_color_targets = MAX_COLOR_TARGETS.min(self.shared.limits.max_draw_buffers as usize);
        if color_count > max_color_targets {
            return Err(PipelineError::Linkage(format!(
                "{} color outputs exceed the limit of {}",
                color_count, max_color_targets
            )));
        }

        let vs = desc.vertex_shader;
        if vs.is_disposed() {
            return Err(PipelineError::Linkage("vertex shader has been disposed".to_string()));
        }
        if !vs.stage.contains(ShaderStages::VERTEX) {
            return Err(PipelineError::Linkage(format!(
                "vertex shader was created for {:?}",
                vs.stage
            )));
        }
        let mut shaders = ArrayVec::<&super::Shader, 2>::new();
        shaders.push(vs);
        if let Some(fs) = desc.fragment_shader {
            if fs.is_disposed() {
                return Err(PipelineError::Linkage(
                    "fragment shader has been disposed".to_string(),
                ));
            }
            if !fs.stage.contains(ShaderStages::FRAGMENT) {
                return Err(PipelineError::Linkage(format!(
                    "fragment shader was created for {:?}",
                    fs.stage
                )));
            }
            shaders.push(fs);
        }

        let caps = self.shared.private_caps;
        let base_indices = super::base_indices(desc.resource_layouts);
        let gl = self.lock();
        let program = self.shared.link_program(&*gl, &shaders)?;
        self.shared
            .bind_program_resources(&*gl, program, desc.resource_layouts, &base_indices);

        let mut attributes = Vec::new();
        let mut vertex_buffers = ArrayVec::new();
        for (buffer_index, layout) in desc.vertex_layouts.iter().enumerate() {
            for element in layout.elements.iter() {
                match gl.get_attrib_location(program, &element.name) {
                    Some(location) => attributes.push(super::AttributeDesc {
                        location,
                        buffer_index: buffer_index as u32,
                        offset: element.offset,
                        format: conv::describe_vertex_format(element.format),
                    }),
                    None => log::warn!(
                        "Vertex attribute `{}` is not used by the program",
                        element.name
                    ),
                }
            }
            vertex_buffers.push(super::VertexBufferDesc {
                stride: layout.stride,
                divisor: layout.instance_step_rate,
            });
        }

        let color_targets = (0..color_count)
            .map(|index| {
                let attachment = desc
                    .blend_state
                    .attachments
                    .get(index)
                    .unwrap_or(&crate::BlendAttachment::OVERRIDE);
                map_color_target(attachment)
            })
            .collect();
        let ds = &desc.depth_stencil_state;
        let depth = if ds.depth_test_enabled {
            Some(super::DepthState {
                function: conv::map_compare_func(ds.depth_comparison),
                write: ds.depth_write_enabled,
            })
        } else {
            None
        };
        let stencil = if ds.stencil_test_enabled {
            Some(super::StencilState {
                front: map_stencil_side(&ds.stencil_front, ds),
                back: map_stencil_side(&ds.stencil_back, ds),
                write_mask: ds.stencil_write_mask as u32,
            })
        } else {
            None
        };
        let rasterizer = &desc.rasterizer_state;
        let polygon_mode = if caps.contains(PrivateCapabilities::POLYGON_MODE) {
            Some(conv::map_polygon_mode(rasterizer.fill_mode))
        } else {
            if rasterizer.fill_mode != crate::PolygonFillMode::Solid {
                log::warn!("Wireframe rendering is not supported, filling instead");
            }
            None
        };
        let blend = desc.blend_state.blend_factor;
        let state = super::RenderPipelineState {
            primitive: conv::map_primitive_topology(desc.topology),
            vertex_buffers,
            attributes,
            color_targets,
            depth,
            stencil,
            front_face: conv::map_front_face(rasterizer.front_face),
            cull_face: conv::map_cull_face(rasterizer.cull_mode),
            polygon_mode,
            depth_clamp: !rasterizer.depth_clip_enabled
                && caps.contains(PrivateCapabilities::DEPTH_CLAMP),
            blend_color: [blend.r, blend.g, blend.b, blend.a],
            alpha_to_coverage: desc.blend_state.alpha_to_coverage,
            scissor_test_enabled: rasterizer.scissor_test_enabled,
        };
        self.shared.set_label(&*gl, native::PROGRAM, program.raw(), desc.label);
        log::debug!(
            "Created render pipeline {:?} with {} vertex buffers and {} resource sets",
            desc.label,
            desc.vertex_layouts.len(),
            desc.resource_layouts.len()
        );
        Ok(super::Pipeline {
            program,
            kind: super::PipelineKind::Render(state),
            resource_layouts: desc.resource_layouts.iter().cloned().collect(),
            base_indices,
            context: Arc::clone(&self.shared.context),
            disposed: DisposeFlag::default(),
        })
    }

    fn create_compute_pipeline(
        &self,
        desc: &crate::ComputePipelineDescription<super::Api>,
    ) -> Result<super::Pipeline, PipelineError> {
        profiling::scope!("create_compute_pipeline");
        self.shared.check_layouts(desc.resource_layouts)?;
        if desc.shader.is_disposed() {
            return Err(PipelineError::Linkage("compute shader has been disposed".to_string()));
        }
        if !desc.shader.stage.contains(ShaderStages::COMPUTE) {
            return Err(PipelineError::Linkage(format!(
                "compute shader was created for {:?}",
                desc.shader.stage
            )));
        }
        // the work group size is declared by the GLSL source itself
        log::trace!("Compute pipeline thread group size {:?}", desc.thread_group_size);

        let base_indices = super::base_indices(desc.resource_layouts);
        let gl = self.lock();
        let program = self.shared.link_program(&*gl, &[desc.shader])?;
        self.shared
            .bind_program_resources(&*gl, program, desc.resource_layouts, &base_indices);
        self.shared.set_label(&*gl, native::PROGRAM, program.raw(), desc.label);
        Ok(super::Pipeline {
            program,
            kind: super::PipelineKind::Compute,
            resource_layouts: desc.resource_layouts.iter().cloned().collect(),
            base_indices,
            context: Arc::clone(&self.shared.context),
            disposed: DisposeFlag::default(),
        })
    }

    fn create_framebuffer(
        &self,
        desc: &crate::FramebufferDescription<super::Api>,
    ) -> Result<super::Framebuffer, ResourceError> {
        let max_color_targets = MAX_COLOR_TARGETS.min(self.shared.limits.max_draw_buffers as usize);
        if desc.color_targets.len() > max_color_targets {
            return Err(ResourceError::InvalidDescription(format!(
                "{} color targets exceed the limit of {}",
                desc.color_targets.len(),
                max_color_targets
            )));
        }
        let mut color_targets = ArrayVec::<super::Attachment, MAX_COLOR_TARGETS>::new();
        for attachment in desc.color_targets {
            color_targets.push(Self::create_attachment(attachment, TextureUsage::RENDER_TARGET)?);
        }
        let depth_target = match desc.depth_target {
            Some(ref attachment) => Some(Self::create_attachment(
                attachment,
                TextureUsage::DEPTH_STENCIL,
            )?),
            None => None,
        };
        let size = match color_targets.first().or(depth_target.as_ref()) {
            Some(attachment) => {
                let (width, height, _) =
                    format::mip_dimensions(&attachment.texture.desc, attachment.mip_level);
                (width, height)
            }
            None => {
                return Err(ResourceError::InvalidDescription(
                    "framebuffer has no attachments".to_string(),
                ))
            }
        };

        let gl = self.lock();
        let raw = gl.create_framebuffer().map_err(object_error("framebuffer"))?;
        gl.bind_framebuffer(native::DRAW_FRAMEBUFFER, Some(raw));
        for (index, attachment) in color_targets.iter().enumerate() {
            let (texture, target) = attachment.texture.image()?;
            super::attach_texture(
                &*gl,
                native::DRAW_FRAMEBUFFER,
                native::COLOR_ATTACHMENT0 + index as u32,
                texture,
                target,
                attachment.mip_level,
                attachment.array_layer,
            );
        }
        if let Some(ref attachment) = depth_target {
            let (texture, target) = attachment.texture.image()?;
            super::attach_texture(
                &*gl,
                native::DRAW_FRAMEBUFFER,
                super::depth_attachment(attachment.texture.format()),
                texture,
                target,
                attachment.mip_level,
                attachment.array_layer,
            );
        }
        if color_targets.is_empty() {
            gl.draw_buffers(&[native::NONE]);
        } else {
            let draw_buffers = (0..color_targets.len() as u32)
                .map(|index| native::COLOR_ATTACHMENT0 + index)
                .collect::<ArrayVec<u32, MAX_COLOR_TARGETS>>();
            gl.draw_buffers(&draw_buffers);
        }
        let status = gl.check_framebuffer_status(native::DRAW_FRAMEBUFFER);
        gl.bind_framebuffer(native::DRAW_FRAMEBUFFER, None);
        if status != native::FRAMEBUFFER_COMPLETE {
            gl.delete_framebuffer(raw);
            return Err(ResourceError::InvalidDescription(format!(
                "framebuffer is incomplete, status {:#x}",
                status
            )));
        }
        if let Some(label) = desc.label {
            if self.shared.private_caps.contains(PrivateCapabilities::DEBUG_FNS) {
                gl.object_label(native::FRAMEBUFFER, raw.raw(), Some(label));
            }
        }
        Ok(super::Framebuffer {
            raw: Some(raw),
            color_targets,
            depth_target,
            surface: None,
            size,
            context: Arc::clone(&self.shared.context),
            disposed: DisposeFlag::default(),
        })
    }

    fn create_command_list(&self) -> Result<super::CommandList, DeviceError> {
        Ok(super::CommandList::new(Arc::clone(&self.shared)))
    }

    fn create_swapchain(
        &self,
        desc: &crate::SwapchainDescription,
    ) -> Result<super::Swapchain, ResourceError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(ResourceError::InvalidDescription(format!(
                "swapchain size must be non-zero, got {}x{}",
                desc.width, desc.height
            )));
        }
        if let Some(depth_format) = desc.depth_format {
            if !depth_format.is_depth_stencil() {
                return Err(ResourceError::UnsupportedFormat {
                    format: depth_format,
                    usage: TextureUsage::DEPTH_STENCIL,
                });
            }
        }
        let gl = self.lock();
        gl.set_swap_interval(if desc.vsync { 1 } else { 0 });
        gl.resize_surface(desc.width, desc.height);
        log::debug!(
            "Created a {}x{} swapchain on surface {:?}, the context decides its color encoding (sRGB requested: {})",
            desc.width,
            desc.height,
            desc.surface,
            desc.color_srgb
        );

        let surface = Arc::new(super::SurfaceState {
            size: Mutex::new((desc.width, desc.height)),
            depth_format: desc.depth_format,
        });
        let framebuffer = Arc::new(super::Framebuffer {
            raw: None,
            color_targets: ArrayVec::new(),
            depth_target: None,
            surface: Some(Arc::clone(&surface)),
            size: (desc.width, desc.height),
            context: Arc::clone(&self.shared.context),
            disposed: DisposeFlag::default(),
        });
        Ok(super::Swapchain {
            surface,
            framebuffer,
            context: Arc::clone(&self.shared.context),
        })
    }

    fn submit_commands(
        &self,
        list: &mut super::CommandList,
        fence: Option<&Arc<Fence>>,
    ) -> Result<(), CommandError> {
        profiling::scope!("submit_commands");
        let commands = list.take_for_submit()?;
        {
            let gl = self.lock();
            queue::execute(&self.shared, &*gl, &commands)?;
            gl.flush();
        }
        // GL orders all later work after these commands
        if let Some(fence) = fence {
            fence.set();
        }
        Ok(())
    }

    fn update_buffer(
        &self,
        buffer: &super::Buffer,
        offset: crate::BufferAddress,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        Self::check_buffer_range(buffer, offset, data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        let gl = self.lock();
        gl.bind_buffer(native::COPY_WRITE_BUFFER, Some(buffer.raw));
        gl.buffer_sub_data_u8_slice(native::COPY_WRITE_BUFFER, offset as i32, data);
        gl.bind_buffer(native::COPY_WRITE_BUFFER, None);
        Ok(())
    }

    fn update_texture(
        &self,
        texture: &super::Texture,
        region: &crate::TextureRegion,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        let (width, height) = Self::check_region(texture, region, data.len())?;
        let gl = self.lock();
        match texture.raw {
            super::TextureStorage::Staging(raw) => {
                gl.bind_buffer(native::COPY_WRITE_BUFFER, Some(raw));
                for row in format::region_rows(&texture.desc, region, width, height) {
                    let start = row.packed_offset as usize;
                    let end = start + row.size as usize;
                    gl.buffer_sub_data_u8_slice(
                        native::COPY_WRITE_BUFFER,
                        row.staging_offset as i32,
                        &data[start..end],
                    );
                }
                gl.bind_buffer(native::COPY_WRITE_BUFFER, None);
            }
            super::TextureStorage::Image { raw, target } => {
                let dst = super::command::Subresource {
                    raw,
                    target,
                    level: region.mip_level,
                    layer: region.array_layer,
                    origin: region.origin,
                };
                let size = crate::Extent3d::new(width, height, region.size.depth);
                let packed = format::packed_size(texture.format(), width, height, size.depth);
                queue::upload_texture(
                    &*gl,
                    &dst,
                    texture.format(),
                    size,
                    queue::TexelSource::Slice(&data[..packed as usize]),
                );
            }
        }
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: &super::Buffer,
        offset: crate::BufferAddress,
        data: &mut [u8],
    ) -> Result<(), ResourceError> {
        Self::check_buffer_range(buffer, offset, data.len())?;
        if !buffer.is_cpu_visible() {
            return Err(ResourceError::NotStaging("buffer"));
        }
        if data.is_empty() {
            return Ok(());
        }
        let gl = self.lock();
        gl.bind_buffer(native::COPY_READ_BUFFER, Some(buffer.raw));
        gl.get_buffer_sub_data(native::COPY_READ_BUFFER, offset as i32, data);
        gl.bind_buffer(native::COPY_READ_BUFFER, None);
        Ok(())
    }

    fn read_texture(
        &self,
        texture: &super::Texture,
        region: &crate::TextureRegion,
        data: &mut [u8],
    ) -> Result<(), ResourceError> {
        let raw = match texture.raw {
            super::TextureStorage::Staging(raw) => raw,
            super::TextureStorage::Image { .. } => return Err(ResourceError::NotStaging("texture")),
        };
        let (width, height) = Self::check_region(texture, region, data.len())?;
        let gl = self.lock();
        gl.bind_buffer(native::COPY_READ_BUFFER, Some(raw));
        for row in format::region_rows(&texture.desc, region, width, height) {
            let start = row.packed_offset as usize;
            let end = start + row.size as usize;
            gl.get_buffer_sub_data(
                native::COPY_READ_BUFFER,
                row.staging_offset as i32,
                &mut data[start..end],
            );
        }
        gl.bind_buffer(native::COPY_READ_BUFFER, None);
        Ok(())
    }

    fn present(&self, swapchain: &super::Swapchain) -> Result<(), DeviceError> {
        profiling::scope!("present");
        if swapchain.framebuffer.is_disposed() {
            log::trace!("Nothing to present, the swapchain framebuffer was disposed");
            return Ok(());
        }
        self.lock().swap_buffers();
        Ok(())
    }

    fn format_support(&self, format: crate::PixelFormat) -> FormatSupport {
        conv::format_support(self.shared.private_caps, format)
    }

    fn wait_for_idle(&self, _timeout: Duration) -> bool {
        // submission executes synchronously, finishing the context is enough
        self.lock().finish();
        true
    }
}
