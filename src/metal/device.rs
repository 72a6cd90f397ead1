use std::{sync::Arc, time::Duration};

use arrayvec::ArrayVec;

use super::{
    conv,
    native::{self, CommandBufferId, Retained},
    DeviceShared, PrivateCapabilities,
};
use crate::{
    format, track::SubmissionTracker, BufferUsage, CommandError, CommandList as _, DeviceError,
    DeviceOptions, Dispose, DisposeFlag, Fence, FormatSupport, PipelineError, ResourceError,
    ShaderError, ShaderStages, TextureUsage, MAX_COLOR_TARGETS, MAX_RESOURCE_SETS,
    MAX_VERTEX_BUFFERS,
};

/// Byte-granular buffer copy, used where the blit encoder requires 4-byte
/// alignment that the caller's offsets or size don't have.
const COPY_BYTES_SOURCE: &str = "\
#include <metal_stdlib>
using namespace metal;

struct CopyInfo {
    uint src_offset;
    uint dst_offset;
    uint size;
};

kernel void copy_bytes(
    device const uchar* src [[ buffer(0) ]],
    device uchar* dst [[ buffer(1) ]],
    constant CopyInfo& info [[ buffer(2) ]])
{
    for (uint i = 0; i < info.size; ++i) {
        dst[info.dst_offset + i] = src[info.src_offset + i];
    }
}
";

pub(super) const COPY_BYTES_ENTRY_POINT: &str = "copy_bytes";

impl DeviceShared {
    fn storage_mode(usage: BufferUsage) -> native::MTLStorageMode {
        if usage.intersects(BufferUsage::STAGING | BufferUsage::DYNAMIC) {
            native::MTLStorageMode::Shared
        } else {
            native::MTLStorageMode::Private
        }
    }

    fn create_raw_buffer(
        &self,
        size: crate::BufferAddress,
        storage_mode: native::MTLStorageMode,
    ) -> Result<native::BufferId, DeviceError> {
        // native copies work in whole words
        let length = format::align_to(size.max(1), crate::COPY_BUFFER_ALIGNMENT);
        self.raw.new_buffer(length, storage_mode).ok_or_else(|| {
            log::error!("Unable to allocate a buffer of {} bytes", length);
            DeviceError::OutOfMemory
        })
    }

    pub(super) fn create_buffer(
        &self,
        size: crate::BufferAddress,
        usage: BufferUsage,
    ) -> Result<super::Buffer, DeviceError> {
        let storage_mode = Self::storage_mode(usage);
        let raw = self.create_raw_buffer(size, storage_mode)?;
        Ok(super::Buffer {
            raw,
            size,
            usage,
            storage_mode,
            device: Arc::clone(&self.raw),
            disposed: DisposeFlag::default(),
        })
    }

    pub(super) fn create_texture(
        &self,
        desc: &crate::TextureDescription,
        allow_memoryless: bool,
    ) -> Result<super::Texture, ResourceError> {
        desc.validate()?;
        let support = conv::format_support(&self.private_caps, desc.format);
        let mut required = FormatSupport::required_for(desc.usage);
        if desc.is_staging() {
            // staging textures are linear memory, no other capability applies
            required = FormatSupport::STAGING;
        }
        if !support.contains(required) {
            return Err(ResourceError::UnsupportedFormat {
                format: desc.format,
                usage: desc.usage,
            });
        }

        if desc.is_staging() {
            let size = format::total_staging_size(desc);
            let raw = self.create_raw_buffer(size, native::MTLStorageMode::Shared)?;
            if let Some(label) = desc.label {
                self.raw.set_label(native::NativeObject::raw(raw), label);
            }
            return Ok(super::Texture {
                raw: super::TextureStorage::Staging(raw),
                desc: desc.to_unlabeled(),
                memoryless: false,
                device: Arc::clone(&self.raw),
                disposed: DisposeFlag::default(),
            });
        }

        let memoryless = allow_memoryless
            && self.private_caps.memoryless
            && self.options.prefer_memoryless_depth
            && desc.usage == TextureUsage::DEPTH_STENCIL;
        let storage_mode = if memoryless {
            native::MTLStorageMode::Memoryless
        } else {
            native::MTLStorageMode::Private
        };
        let texture_type = conv::map_texture_type(desc);
        let array_length = match texture_type {
            native::MTLTextureType::D3 => 1,
            _ => desc.array_layers as u64,
        };
        let descriptor = native::TextureDescriptor {
            texture_type,
            pixel_format: conv::map_pixel_format(desc.format),
            width: desc.width as u64,
            height: desc.height as u64,
            depth: desc.depth as u64,
            mipmap_level_count: desc.mip_levels as u64,
            array_length,
            sample_count: desc.sample_count.max(1) as u64,
            usage: conv::map_texture_usage(desc.usage),
            storage_mode,
        };
        let raw = self.raw.new_texture(&descriptor).ok_or_else(|| {
            log::error!("Unable to allocate texture {:?}", descriptor);
            ResourceError::Device(DeviceError::OutOfMemory)
        })?;
        if let Some(label) = desc.label {
            self.raw.set_label(native::NativeObject::raw(raw), label);
        }
        Ok(super::Texture {
            raw: super::TextureStorage::Image(raw),
            desc: desc.to_unlabeled(),
            memoryless,
            device: Arc::clone(&self.raw),
            disposed: DisposeFlag::default(),
        })
    }

    pub(super) fn acquire_staging(
        &self,
        size: crate::BufferAddress,
    ) -> Result<crate::track::StagingBuffer<super::Buffer>, DeviceError> {
        self.tracker
            .acquire(size, |size| self.create_buffer(size, BufferUsage::STAGING))
    }
}

#[derive(Debug)]
pub struct Device {
    shared: Arc<DeviceShared>,
}

impl Device {
    /// Opens the engine on a native device.
    pub fn new(raw: Arc<dyn native::Device>, options: DeviceOptions) -> Result<Self, DeviceError> {
        profiling::scope!("Device::new");
        let private_caps = PrivateCapabilities::new(&*raw);
        log::debug!("Metal device {:?}: {:#?}", raw.name(), private_caps);

        let library = raw
            .new_library_with_source(COPY_BYTES_SOURCE)
            .map_err(|message| {
                log::error!("Unable to compile the buffer copy kernel: {}", message);
                DeviceError::Lost
            })?;
        let library = Retained::new(&raw, library);
        let function = raw
            .get_function(library.id(), COPY_BYTES_ENTRY_POINT)
            .ok_or_else(|| {
                log::error!("Buffer copy kernel has no `{}`", COPY_BYTES_ENTRY_POINT);
                DeviceError::Lost
            })?;
        let function = Retained::new(&raw, function);
        let pipeline = raw
            .new_compute_pipeline_state(function.id())
            .map_err(|message| {
                log::error!("Unable to create the buffer copy pipeline: {}", message);
                DeviceError::Lost
            })?;
        let unaligned_copy_pipeline = Retained::new(&raw, pipeline);

        let tracker = Arc::new(SubmissionTracker::new(options.staging_pool_capacity));
        Ok(Self {
            shared: Arc::new(DeviceShared {
                raw,
                private_caps,
                options,
                tracker,
                unaligned_copy_pipeline,
            }),
        })
    }

    pub fn name(&self) -> String {
        self.shared.raw.name()
    }

    pub fn options(&self) -> &DeviceOptions {
        &self.shared.options
    }

    /// Number of command buffers that were committed and haven't completed.
    pub fn in_flight(&self) -> usize {
        self.shared.tracker.in_flight()
    }

    /// Number of idle buffers in the staging pool.
    pub fn idle_staging_buffers(&self) -> usize {
        self.shared.tracker.free_count()
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

    fn submit_internal(&self, list: &mut super::CommandList) -> Result<(), ResourceError> {
        list.end()?;
        crate::Device::submit_commands(self, list, None)?;
        Ok(())
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
        let buffer = self.shared.create_buffer(desc.size, desc.usage)?;
        if let Some(label) = desc.label {
            self.shared
                .raw
                .set_label(native::NativeObject::raw(buffer.raw), label);
        }
        Ok(buffer)
    }

    fn create_texture(
        &self,
        desc: &crate::TextureDescription,
    ) -> Result<super::Texture, ResourceError> {
        self.shared.create_texture(desc, false)
    }

    fn create_sampler(&self, desc: &crate::SamplerDescription) -> Result<super::Sampler, DeviceError> {
        let [s, t, r] = desc.address_modes;
        let descriptor = native::SamplerDescriptor {
            address_modes: [
                conv::map_address_mode(s),
                conv::map_address_mode(t),
                conv::map_address_mode(r),
            ],
            min_filter: conv::map_filter_mode(desc.min_filter),
            mag_filter: conv::map_filter_mode(desc.mag_filter),
            mip_filter: conv::map_mip_filter(desc.mipmap_filter),
            compare_function: desc.comparison.map(conv::map_compare_function),
            max_anisotropy: desc.max_anisotropy.max(1) as u64,
            lod_min_clamp: desc.min_lod,
            lod_max_clamp: desc.max_lod,
            border_color: conv::map_border_color(desc.border_color),
        };
        let raw = self
            .shared
            .raw
            .new_sampler(&descriptor)
            .ok_or(DeviceError::OutOfMemory)?;
        if let Some(label) = desc.label {
            self.shared.raw.set_label(native::NativeObject::raw(raw), label);
        }
        Ok(super::Sampler {
            raw,
            device: Arc::clone(&self.shared.raw),
            disposed: DisposeFlag::default(),
        })
    }

    fn create_shader(&self, desc: &crate::ShaderDescription) -> Result<super::Shader, ShaderError> {
        profiling::scope!("create_shader");
        let library = self
            .shared
            .raw
            .new_library_with_source(&desc.source)
            .map_err(ShaderError::Compilation)?;
        let library = Retained::new(&self.shared.raw, library);
        let function = self
            .shared
            .raw
            .get_function(library.id(), &desc.entry_point)
            .ok_or_else(|| {
                ShaderError::Compilation(format!(
                    "entry point `{}` is not defined",
                    desc.entry_point
                ))
            })?;
        if let Some(label) = desc.label {
            self.shared
                .raw
                .set_label(native::NativeObject::raw(function), label);
        }
        Ok(super::Shader {
            library: library.into_raw(),
            function,
            stage: desc.stage,
            device: Arc::clone(&self.shared.raw),
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
        if desc.resource_layouts.len() > MAX_RESOURCE_SETS {
            return Err(PipelineError::TooManyResourceLayouts(
                desc.resource_layouts.len(),
            ));
        }
        if desc.vertex_layouts.len() > MAX_VERTEX_BUFFERS {
            return Err(PipelineError::Linkage(format!(
                "{} vertex buffers exceed the limit of {}",
                desc.vertex_layouts.len(),
                MAX_VERTEX_BUFFERS
            )));
        }
        if desc.outputs.color_formats.len() > MAX_COLOR_TARGETS {
            return Err(PipelineError::Linkage(format!(
                "{} color outputs exceed the limit of {}",
                desc.outputs.color_formats.len(),
                MAX_COLOR_TARGETS
            )));
        }
        let vertex_buffer_count = desc.vertex_layouts.len() as u32;
        let set_buffers: u32 = desc
            .resource_layouts
            .iter()
            .map(|layout| layout.counters.vs.buffers)
            .sum();
        if vertex_buffer_count + set_buffers > self.shared.private_caps.max_buffers_per_stage {
            return Err(PipelineError::Linkage(format!(
                "vertex stage needs {} buffer slots, the device has {}",
                vertex_buffer_count + set_buffers,
                self.shared.private_caps.max_buffers_per_stage
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
        let fragment_function = match desc.fragment_shader {
            Some(fs) if fs.is_disposed() => {
                return Err(PipelineError::Linkage(
                    "fragment shader has been disposed".to_string(),
                ))
            }
            Some(fs) => Some(fs.function),
            None => None,
        };

        let mut vertex_attributes = Vec::new();
        let mut vertex_layouts = Vec::with_capacity(desc.vertex_layouts.len());
        for (buffer_index, layout) in desc.vertex_layouts.iter().enumerate() {
            for element in layout.elements.iter() {
                vertex_attributes.push(native::VertexAttributeDescriptor {
                    format: conv::map_vertex_format(element.format),
                    offset: element.offset as u64,
                    buffer_index: buffer_index as u64,
                });
            }
            vertex_layouts.push(native::VertexBufferLayoutDescriptor {
                stride: layout.stride as u64,
                step_function: if layout.instance_step_rate == 0 {
                    native::MTLVertexStepFunction::PerVertex
                } else {
                    native::MTLVertexStepFunction::PerInstance
                },
                step_rate: layout.instance_step_rate.max(1) as u64,
            });
        }

        let color_attachments = desc
            .outputs
            .color_formats
            .iter()
            .enumerate()
            .map(|(index, &format)| {
                let blend = desc
                    .blend_state
                    .attachments
                    .get(index)
                    .unwrap_or(&crate::BlendAttachment::OVERRIDE);
                conv::map_color_attachment(format, blend)
            })
            .collect();
        let (depth_format, stencil_format) = match desc.outputs.depth_format {
            Some(format) => {
                let raw = conv::map_pixel_format(format);
                let stencil = if format.has_stencil() {
                    raw
                } else {
                    native::MTLPixelFormat::Invalid
                };
                (raw, stencil)
            }
            None => (
                native::MTLPixelFormat::Invalid,
                native::MTLPixelFormat::Invalid,
            ),
        };

        let descriptor = native::RenderPipelineDescriptor {
            vertex_function: vs.function,
            fragment_function,
            vertex_attributes,
            vertex_layouts,
            color_attachments,
            depth_attachment_pixel_format: depth_format,
            stencil_attachment_pixel_format: stencil_format,
            sample_count: desc.outputs.sample_count.max(1) as u64,
            alpha_to_coverage_enabled: desc.blend_state.alpha_to_coverage,
        };
        let raw = self
            .shared
            .raw
            .new_render_pipeline_state(&descriptor)
            .map_err(PipelineError::Linkage)?;
        if let Some(label) = desc.label {
            self.shared.raw.set_label(native::NativeObject::raw(raw), label);
        }
        let depth_stencil = self
            .shared
            .raw
            .new_depth_stencil_state(&conv::map_depth_stencil(&desc.depth_stencil_state));

        let rasterizer = &desc.rasterizer_state;
        let blend = desc.blend_state.blend_factor;
        let state = super::RenderPipelineState {
            raw,
            primitive_type: conv::map_primitive_type(desc.topology),
            cull_mode: conv::map_cull_mode(rasterizer.cull_mode),
            winding: conv::map_winding(rasterizer.front_face),
            fill_mode: conv::map_fill_mode(rasterizer.fill_mode),
            depth_clip_mode: if self.shared.private_caps.depth_clip_mode {
                Some(conv::map_depth_clip_mode(rasterizer.depth_clip_enabled))
            } else {
                None
            },
            depth_stencil,
            stencil_reference: desc.depth_stencil_state.stencil_reference,
            blend_color: [blend.r, blend.g, blend.b, blend.a],
            scissor_test_enabled: rasterizer.scissor_test_enabled,
        };
        log::debug!(
            "Created render pipeline {:?} with {} vertex buffers and {} resource sets",
            desc.label,
            vertex_buffer_count,
            desc.resource_layouts.len()
        );
        Ok(super::Pipeline::new(
            super::PipelineKind::Render(state),
            desc.resource_layouts,
            vertex_buffer_count,
            &self.shared.raw,
        ))
    }

    fn create_compute_pipeline(
        &self,
        desc: &crate::ComputePipelineDescription<super::Api>,
    ) -> Result<super::Pipeline, PipelineError> {
        profiling::scope!("create_compute_pipeline");
        if desc.resource_layouts.len() > MAX_RESOURCE_SETS {
            return Err(PipelineError::TooManyResourceLayouts(
                desc.resource_layouts.len(),
            ));
        }
        if desc.shader.is_disposed() {
            return Err(PipelineError::Linkage("compute shader has been disposed".to_string()));
        }
        let raw = self
            .shared
            .raw
            .new_compute_pipeline_state(desc.shader.function)
            .map_err(|message| PipelineError::Compilation {
                stage: ShaderStages::COMPUTE,
                message,
            })?;
        if let Some(label) = desc.label {
            self.shared.raw.set_label(native::NativeObject::raw(raw), label);
        }
        let [x, y, z] = desc.thread_group_size;
        let state = super::ComputePipelineState {
            raw,
            threads_per_group: conv::map_size(x.max(1), y.max(1), z.max(1)),
        };
        Ok(super::Pipeline::new(
            super::PipelineKind::Compute(state),
            desc.resource_layouts,
            0,
            &self.shared.raw,
        ))
    }

    fn create_framebuffer(
        &self,
        desc: &crate::FramebufferDescription<super::Api>,
    ) -> Result<super::Framebuffer, ResourceError> {
        if desc.color_targets.len() > MAX_COLOR_TARGETS {
            return Err(ResourceError::InvalidDescription(format!(
                "{} color targets exceed the limit of {}",
                desc.color_targets.len(),
                MAX_COLOR_TARGETS
            )));
        }
        let check = |attachment: &crate::FramebufferAttachment<super::Api>,
                     usage: TextureUsage|
         -> Result<super::Attachment, ResourceError> {
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
            Ok(super::Attachment {
                texture: Arc::clone(texture),
                mip_level: attachment.mip_level,
                array_layer: attachment.array_layer,
            })
        };

        let mut color_targets = ArrayVec::new();
        for attachment in desc.color_targets {
            color_targets.push(check(attachment, TextureUsage::RENDER_TARGET)?);
        }
        let depth_target = match desc.depth_target {
            Some(ref attachment) => Some(check(attachment, TextureUsage::DEPTH_STENCIL)?),
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
        Ok(super::Framebuffer {
            color_targets,
            depth_target,
            surface: None,
            size,
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
        super::Swapchain::new(&self.shared, desc)
    }

    fn submit_commands(
        &self,
        list: &mut super::CommandList,
        fence: Option<&Arc<Fence>>,
    ) -> Result<(), CommandError> {
        profiling::scope!("submit_commands");
        let command_buffer = list.take_for_submit()?;
        let key: CommandBufferId = command_buffer.id();
        let tracker = Arc::clone(&self.shared.tracker);
        tracker.submit(key, fence.cloned());
        self.shared.raw.add_completed_handler(
            key,
            Box::new(move || {
                tracker.complete(key);
                drop(command_buffer);
            }),
        );
        self.shared.raw.commit(key);
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
        if buffer.is_cpu_visible() {
            self.shared.raw.write_buffer(buffer.raw, offset, data);
            return Ok(());
        }
        let mut list = super::CommandList::new(Arc::clone(&self.shared));
        list.begin()?;
        list.update_buffer(buffer, offset, data)?;
        self.submit_internal(&mut list)
    }

    fn update_texture(
        &self,
        texture: &super::Texture,
        region: &crate::TextureRegion,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        let (width, height) = Self::check_region(texture, region, data.len())?;
        match texture.raw {
            super::TextureStorage::Staging(raw) => {
                for row in format::region_rows(&texture.desc, region, width, height) {
                    let start = row.packed_offset as usize;
                    let end = start + row.size as usize;
                    self.shared
                        .raw
                        .write_buffer(raw, row.staging_offset, &data[start..end]);
                }
                Ok(())
            }
            super::TextureStorage::Image(_) => {
                let mut list = super::CommandList::new(Arc::clone(&self.shared));
                list.begin()?;
                list.upload_texture(texture, region, (width, height), data)?;
                self.submit_internal(&mut list)
            }
        }
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
        self.shared.raw.read_buffer(buffer.raw, offset, data);
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
            super::TextureStorage::Image(_) => return Err(ResourceError::NotStaging("texture")),
        };
        let (width, height) = Self::check_region(texture, region, data.len())?;
        for row in format::region_rows(&texture.desc, region, width, height) {
            let start = row.packed_offset as usize;
            let end = start + row.size as usize;
            self.shared
                .raw
                .read_buffer(raw, row.staging_offset, &mut data[start..end]);
        }
        Ok(())
    }

    fn present(&self, swapchain: &super::Swapchain) -> Result<(), DeviceError> {
        profiling::scope!("present");
        let drawable = match swapchain.state().take_drawable() {
            Some(drawable) => drawable,
            None => {
                log::trace!("Nothing to present, no drawable was acquired");
                return Ok(());
            }
        };
        let command_buffer = Retained::new(
            &self.shared.raw,
            self.shared
                .raw
                .new_command_buffer(self.shared.options.retain_command_buffer_references),
        );
        self.shared
            .raw
            .present_drawable(command_buffer.id(), drawable.id());
        self.shared.raw.commit(command_buffer.id());
        Ok(())
    }

    fn format_support(&self, format: crate::PixelFormat) -> FormatSupport {
        conv::format_support(&self.shared.private_caps, format)
    }

    fn wait_for_idle(&self, timeout: Duration) -> bool {
        self.shared.tracker.wait_idle(timeout)
    }
}
