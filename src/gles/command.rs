use std::{ops::Range, sync::Arc};

use smallvec::SmallVec;

use super::{
    native::{self, BufferId, TextureId},
    PrivateCapabilities, TextureStorage,
};
use crate::{
    format, BufferAddress, BufferUsage, Color, CommandError, Dispose, Extent3d, IndexFormat,
    Origin3d, PixelFormat, ScissorRect, TextureUsage, Viewport, MAX_COLOR_TARGETS,
    MAX_RESOURCE_SETS, MAX_VERTEX_BUFFERS, MAX_VIEWPORTS,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordingState {
    Initial,
    Recording,
    Ended,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(super) enum BindPoint {
    Graphics,
    Compute,
}

/// One image subresource as addressed by GL copy calls.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(super) struct Subresource {
    pub raw: TextureId,
    pub target: u32,
    pub level: u32,
    /// Array layer, counting cube faces for cube maps.
    pub layer: u32,
    pub origin: Origin3d,
}

impl Subresource {
    fn new(raw: TextureId, target: u32, level: u32, layer: u32, origin: Origin3d) -> Self {
        Self {
            raw,
            target,
            level,
            layer,
            origin,
        }
    }

    /// Third coordinate of slice `z` of the region.
    pub fn z(&self, slice: u32) -> u32 {
        if self.target == native::TEXTURE_3D {
            self.origin.z + slice
        } else {
            self.layer
        }
    }

    /// Target passed to 2D calls, which address cube faces directly.
    pub fn face_target(&self) -> u32 {
        if self.target == native::TEXTURE_CUBE_MAP {
            native::CUBEMAP_FACES[self.layer as usize]
        } else {
            self.target
        }
    }

    pub fn is_layered(&self) -> bool {
        super::conv::is_layered_target(self.target)
    }
}

#[derive(Debug)]
pub(super) enum Command {
    SetFramebuffer(Arc<super::Framebuffer>),
    SetPipeline(Arc<super::Pipeline>),
    SetViewport {
        index: u32,
        viewport: Viewport,
    },
    SetScissor {
        index: u32,
        rect: ScissorRect,
    },
    SetVertexBuffer {
        index: u32,
        buffer: BufferId,
        offset: BufferAddress,
    },
    SetIndexBuffer {
        buffer: BufferId,
        format: IndexFormat,
        offset: BufferAddress,
    },
    SetResourceSet {
        bind_point: BindPoint,
        slot: u32,
        set: Arc<super::ResourceSet>,
        dynamic_offsets: SmallVec<[u32; 4]>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        vertex_start: u32,
        instance_start: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        index_start: u32,
        vertex_offset: i32,
        instance_start: u32,
    },
    DrawIndirect {
        buffer: BufferId,
        offset: BufferAddress,
        indexed: bool,
    },
    Dispatch([u32; 3]),
    DispatchIndirect {
        buffer: BufferId,
        offset: BufferAddress,
    },
    CopyBufferToBuffer {
        src: BufferId,
        src_offset: BufferAddress,
        dst: BufferId,
        dst_offset: BufferAddress,
        size: BufferAddress,
    },
    UpdateBuffer {
        dst: BufferId,
        offset: BufferAddress,
        data: Range<u32>,
    },
    CopyBufferToTexture {
        src: BufferId,
        src_offset: BufferAddress,
        row_pitch: u32,
        depth_pitch: u32,
        dst: Subresource,
        format: PixelFormat,
        size: Extent3d,
    },
    CopyTextureToBuffer {
        src: Subresource,
        format: PixelFormat,
        size: Extent3d,
        dst: BufferId,
        dst_offset: BufferAddress,
        row_pitch: u32,
        depth_pitch: u32,
    },
    CopyTextureToTexture {
        src: Subresource,
        dst: Subresource,
        size: Extent3d,
    },
    ResolveTexture {
        src: Subresource,
        dst: Subresource,
        width: u32,
        height: u32,
    },
    GenerateMipmaps {
        texture: TextureId,
        target: u32,
    },
    ClearColor {
        index: u32,
        color: Color,
    },
    ClearDepthStencil {
        depth: f32,
        stencil: u8,
    },
    PushDebugGroup(Range<u32>),
    PopDebugGroup,
    InsertDebugMarker(Range<u32>),
}

/// Recorded work, handed to the queue on submission.
#[derive(Debug, Default)]
pub(super) struct CommandBuffer {
    pub commands: Vec<Command>,
    /// Update payloads and debug labels, addressed by byte ranges.
    pub data_bytes: Vec<u8>,
}

impl CommandBuffer {
    fn add_bytes(&mut self, bytes: &[u8]) -> Range<u32> {
        let start = self.data_bytes.len() as u32;
        self.data_bytes.extend_from_slice(bytes);
        start..self.data_bytes.len() as u32
    }

    fn add_marker(&mut self, marker: &str) -> Range<u32> {
        self.add_bytes(marker.as_bytes())
    }
}

/// What recording needs to know to validate the next call.
#[derive(Debug, Default)]
struct RecordState {
    framebuffer: Option<Arc<super::Framebuffer>>,
    graphics_pipeline: Option<Arc<super::Pipeline>>,
    compute_pipeline: Option<Arc<super::Pipeline>>,
    graphics_sets: [Option<Arc<super::ResourceLayout>>; MAX_RESOURCE_SETS],
    compute_sets: [Option<Arc<super::ResourceLayout>>; MAX_RESOURCE_SETS],
    index_format: Option<IndexFormat>,
    index_offset: BufferAddress,
    debug_group_depth: u32,
}

/// Records validated commands for execution on submission.
///
/// Nothing reaches the GL context while recording; the queue replays the
/// commands through its binding state machine.
#[derive(Debug)]
pub struct CommandList {
    shared: Arc<super::DeviceShared>,
    recording: RecordingState,
    cmd_buffer: CommandBuffer,
    state: RecordState,
}

fn check_buffer_range(
    what: &str,
    buffer: &super::Buffer,
    offset: BufferAddress,
    size: BufferAddress,
) -> Result<(), CommandError> {
    match offset.checked_add(size) {
        Some(end) if end <= buffer.size => Ok(()),
        _ => Err(CommandError::InvalidCopy(format!(
            "{} range {}+{} is out of bounds of a {} byte buffer",
            what, offset, size, buffer.size
        ))),
    }
}

impl CommandList {
    pub(super) fn new(shared: Arc<super::DeviceShared>) -> Self {
        Self {
            shared,
            recording: RecordingState::Initial,
            cmd_buffer: CommandBuffer::default(),
            state: RecordState::default(),
        }
    }

    fn check_recording(&self) -> Result<(), CommandError> {
        match self.recording {
            RecordingState::Recording => Ok(()),
            _ => Err(CommandError::NotRecording),
        }
    }

    fn check_caps(&self, caps: PrivateCapabilities, what: &'static str) -> Result<(), CommandError> {
        if self.shared.private_caps.contains(caps) {
            Ok(())
        } else {
            Err(CommandError::Unsupported(what))
        }
    }

    fn push(&mut self, command: Command) {
        self.cmd_buffer.commands.push(command);
    }

    /// Hands the recorded commands over for submission.
    pub(super) fn take_for_submit(&mut self) -> Result<CommandBuffer, CommandError> {
        if self.recording != RecordingState::Ended {
            return Err(CommandError::NotEnded);
        }
        self.recording = RecordingState::Initial;
        Ok(std::mem::take(&mut self.cmd_buffer))
    }

    fn check_sets_bound(&self, bind_point: BindPoint, pipeline: &super::Pipeline) -> Result<(), CommandError> {
        let sets = match bind_point {
            BindPoint::Graphics => &self.state.graphics_sets,
            BindPoint::Compute => &self.state.compute_sets,
        };
        // sets outlive pipeline changes
        for (slot, (bound, expected)) in sets
            .iter()
            .zip(pipeline.resource_layouts())
            .enumerate()
        {
            let layout = bound
                .as_ref()
                .ok_or(CommandError::MissingResourceSet(slot as u32))?;
            if !Arc::ptr_eq(layout, expected)
                && !crate::layouts_compatible(expected.elements(), layout.elements())
            {
                return Err(CommandError::IncompatibleResourceSet(slot as u32));
            }
        }
        Ok(())
    }

    fn pre_draw(&self) -> Result<(), CommandError> {
        self.check_recording()?;
        let pipeline = self
            .state
            .graphics_pipeline
            .as_ref()
            .ok_or(CommandError::NoPipeline("graphics"))?;
        if self.state.framebuffer.is_none() {
            return Err(CommandError::NoFramebuffer);
        }
        self.check_sets_bound(BindPoint::Graphics, pipeline)
    }

    fn pre_dispatch(&self) -> Result<(), CommandError> {
        self.check_recording()?;
        self.check_caps(PrivateCapabilities::COMPUTE, "compute dispatch")?;
        let pipeline = self
            .state
            .compute_pipeline
            .as_ref()
            .ok_or(CommandError::NoPipeline("compute"))?;
        self.check_sets_bound(BindPoint::Compute, pipeline)
    }

    fn check_indirect(&self, buffer: &super::Buffer) -> Result<BufferId, CommandError> {
        let raw = buffer.native()?;
        if !buffer.usage.contains(BufferUsage::INDIRECT) {
            return Err(CommandError::MissingUsage("indirect buffers need INDIRECT usage"));
        }
        Ok(raw)
    }

    fn copy_texture_layer(
        &mut self,
        src: &super::Texture,
        dst: &super::Texture,
        copy: &crate::TextureCopy,
        layer: u32,
    ) -> Result<(), CommandError> {
        let format = src.format();
        let src_layer = copy.src_base_array_layer + layer;
        let dst_layer = copy.dst_base_array_layer + layer;
        let depth = copy.size.depth;
        let (mip_width, mip_height, _) = format::mip_dimensions(&src.desc, copy.src_mip_level);
        let (width, height) =
            format::copy_extent(format, mip_width, mip_height, copy.size.width, copy.size.height);
        let size = Extent3d::new(width, height, depth);

        match (src.storage()?, dst.storage()?) {
            (TextureStorage::Staging(src_buffer), TextureStorage::Image { raw, target }) => {
                let layout = format::subresource_layout(&src.desc, copy.src_mip_level, src_layer);
                let (dst_width, dst_height, _) =
                    format::mip_dimensions(&dst.desc, copy.dst_mip_level);
                let (width, height) =
                    format::copy_extent(format, dst_width, dst_height, copy.size.width, copy.size.height);
                let src_offset = layout.offset
                    + format.texel_offset(
                        layout.row_pitch,
                        layout.depth_pitch,
                        copy.src_origin.x,
                        copy.src_origin.y,
                        copy.src_origin.z,
                    );
                self.push(Command::CopyBufferToTexture {
                    src: src_buffer,
                    src_offset,
                    row_pitch: layout.row_pitch,
                    depth_pitch: layout.depth_pitch,
                    dst: Subresource::new(raw, target, copy.dst_mip_level, dst_layer, copy.dst_origin),
                    format,
                    size: Extent3d::new(width, height, depth),
                });
            }
            (TextureStorage::Image { raw, target }, TextureStorage::Staging(dst_buffer)) => {
                if format.is_depth_stencil() {
                    return Err(CommandError::Unsupported("reading back depth-stencil textures"));
                }
                if format.is_compressed() {
                    self.check_caps(
                        PrivateCapabilities::GET_TEXTURE_SUB_IMAGE,
                        "reading back compressed textures",
                    )?;
                }
                let layout = format::subresource_layout(&dst.desc, copy.dst_mip_level, dst_layer);
                let dst_offset = layout.offset
                    + format.texel_offset(
                        layout.row_pitch,
                        layout.depth_pitch,
                        copy.dst_origin.x,
                        copy.dst_origin.y,
                        copy.dst_origin.z,
                    );
                self.push(Command::CopyTextureToBuffer {
                    src: Subresource::new(raw, target, copy.src_mip_level, src_layer, copy.src_origin),
                    format,
                    size,
                    dst: dst_buffer,
                    dst_offset,
                    row_pitch: layout.row_pitch,
                    depth_pitch: layout.depth_pitch,
                });
            }
            (TextureStorage::Staging(src_buffer), TextureStorage::Staging(dst_buffer)) => {
                let src_layout = format::subresource_layout(&src.desc, copy.src_mip_level, src_layer);
                let dst_layout = format::subresource_layout(&dst.desc, copy.dst_mip_level, dst_layer);
                let block = format.describe().block_dimension;
                let row_size = format.row_pitch(width) as BufferAddress;
                for z in 0..depth {
                    for row in 0..format.num_rows(height) {
                        let src_offset = src_layout.offset
                            + format.texel_offset(
                                src_layout.row_pitch,
                                src_layout.depth_pitch,
                                copy.src_origin.x,
                                copy.src_origin.y + row * block,
                                copy.src_origin.z + z,
                            );
                        let dst_offset = dst_layout.offset
                            + format.texel_offset(
                                dst_layout.row_pitch,
                                dst_layout.depth_pitch,
                                copy.dst_origin.x,
                                copy.dst_origin.y + row * block,
                                copy.dst_origin.z + z,
                            );
                        self.push(Command::CopyBufferToBuffer {
                            src: src_buffer,
                            src_offset,
                            dst: dst_buffer,
                            dst_offset,
                            size: row_size,
                        });
                    }
                }
            }
            (
                TextureStorage::Image {
                    raw: src_raw,
                    target: src_target,
                },
                TextureStorage::Image {
                    raw: dst_raw,
                    target: dst_target,
                },
            ) => {
                let src_sub =
                    Subresource::new(src_raw, src_target, copy.src_mip_level, src_layer, copy.src_origin);
                let dst_sub =
                    Subresource::new(dst_raw, dst_target, copy.dst_mip_level, dst_layer, copy.dst_origin);
                if !self.shared.private_caps.contains(PrivateCapabilities::COPY_IMAGE) {
                    // the fallback reads through a framebuffer into a 2D image
                    if format.is_compressed() || format.is_depth_stencil() {
                        return Err(CommandError::Unsupported(
                            "copying compressed or depth-stencil images without copy_image",
                        ));
                    }
                    if dst_sub.is_layered() || src.desc.sample_count > 1 {
                        return Err(CommandError::Unsupported(
                            "copying into layered or from multisampled images without copy_image",
                        ));
                    }
                }
                self.push(Command::CopyTextureToTexture {
                    src: src_sub,
                    dst: dst_sub,
                    size,
                });
            }
        }
        Ok(())
    }

    fn set_resource_set(
        &mut self,
        bind_point: BindPoint,
        slot: u32,
        set: &Arc<super::ResourceSet>,
        dynamic_offsets: &[u32],
    ) -> Result<(), CommandError> {
        self.check_recording()?;
        let pipeline = match bind_point {
            BindPoint::Graphics => self.state.graphics_pipeline.as_ref(),
            BindPoint::Compute => self.state.compute_pipeline.as_ref(),
        };
        let pipeline = pipeline.ok_or(CommandError::NoPipeline(match bind_point {
            BindPoint::Graphics => "graphics",
            BindPoint::Compute => "compute",
        }))?;
        let expected = pipeline
            .resource_layouts()
            .get(slot as usize)
            .ok_or(CommandError::SlotOutOfRange {
                what: "resource set",
                slot,
            })?;
        if set.is_disposed() {
            return Err(CommandError::Disposed("resource set"));
        }
        if !crate::layouts_compatible(expected.elements(), set.layout().elements()) {
            return Err(CommandError::IncompatibleResourceSet(slot));
        }
        if dynamic_offsets.len() != set.layout().dynamic_count() {
            return Err(CommandError::DynamicOffsetCount {
                expected: set.layout().dynamic_count(),
                actual: dynamic_offsets.len(),
            });
        }

        match bind_point {
            BindPoint::Graphics => {
                self.state.graphics_sets[slot as usize] = Some(Arc::clone(set.layout()))
            }
            BindPoint::Compute => {
                self.state.compute_sets[slot as usize] = Some(Arc::clone(set.layout()))
            }
        }
        self.push(Command::SetResourceSet {
            bind_point,
            slot,
            set: Arc::clone(set),
            dynamic_offsets: SmallVec::from_slice(dynamic_offsets),
        });
        Ok(())
    }
}

impl crate::CommandList<super::Api> for CommandList {
    fn begin(&mut self) -> Result<(), CommandError> {
        profiling::scope!("CommandList::begin");
        self.cmd_buffer = CommandBuffer::default();
        self.state = RecordState::default();
        self.recording = RecordingState::Recording;
        if self.shared.options.debug {
            let range = self.cmd_buffer.add_marker("command list");
            self.push(Command::PushDebugGroup(range));
            self.state.debug_group_depth += 1;
        }
        Ok(())
    }

    fn end(&mut self) -> Result<(), CommandError> {
        self.check_recording()?;
        if self.shared.options.debug {
            self.push(Command::PopDebugGroup);
            self.state.debug_group_depth -= 1;
        }
        if self.state.debug_group_depth != 0 {
            log::warn!(
                "Command list ended with {} debug groups still open",
                self.state.debug_group_depth
            );
        }
        log::trace!("Recorded {} GL commands", self.cmd_buffer.commands.len());
        self.recording = RecordingState::Ended;
        Ok(())
    }

    fn set_pipeline(&mut self, pipeline: &Arc<super::Pipeline>) -> Result<(), CommandError> {
        self.check_recording()?;
        if pipeline.is_disposed() {
            return Err(CommandError::Disposed("pipeline"));
        }
        if pipeline.is_compute() {
            self.state.compute_pipeline = Some(Arc::clone(pipeline));
        } else {
            self.state.graphics_pipeline = Some(Arc::clone(pipeline));
        }
        self.push(Command::SetPipeline(Arc::clone(pipeline)));
        Ok(())
    }

    fn set_framebuffer(&mut self, framebuffer: &Arc<super::Framebuffer>) -> Result<(), CommandError> {
        self.check_recording()?;
        if framebuffer.is_disposed() {
            return Err(CommandError::Disposed("framebuffer"));
        }
        self.state.framebuffer = Some(Arc::clone(framebuffer));
        self.push(Command::SetFramebuffer(Arc::clone(framebuffer)));
        Ok(())
    }

    fn set_viewport(&mut self, index: u32, viewport: &Viewport) -> Result<(), CommandError> {
        self.check_recording()?;
        if index as usize >= MAX_VIEWPORTS {
            return Err(CommandError::SlotOutOfRange {
                what: "viewport",
                slot: index,
            });
        }
        self.push(Command::SetViewport {
            index,
            viewport: *viewport,
        });
        Ok(())
    }

    fn set_scissor_rect(&mut self, index: u32, rect: &ScissorRect) -> Result<(), CommandError> {
        self.check_recording()?;
        if index as usize >= MAX_VIEWPORTS {
            return Err(CommandError::SlotOutOfRange {
                what: "scissor rect",
                slot: index,
            });
        }
        self.push(Command::SetScissor { index, rect: *rect });
        Ok(())
    }

    fn set_vertex_buffer(
        &mut self,
        index: u32,
        buffer: &super::Buffer,
        offset: BufferAddress,
    ) -> Result<(), CommandError> {
        self.check_recording()?;
        if index as usize >= MAX_VERTEX_BUFFERS {
            return Err(CommandError::SlotOutOfRange {
                what: "vertex buffer",
                slot: index,
            });
        }
        let raw = buffer.native()?;
        if !buffer.usage.contains(BufferUsage::VERTEX) {
            return Err(CommandError::MissingUsage("vertex buffers need VERTEX usage"));
        }
        self.push(Command::SetVertexBuffer {
            index,
            buffer: raw,
            offset,
        });
        Ok(())
    }

    fn set_index_buffer(
        &mut self,
        buffer: &super::Buffer,
        format: IndexFormat,
        offset: BufferAddress,
    ) -> Result<(), CommandError> {
        self.check_recording()?;
        let raw = buffer.native()?;
        if !buffer.usage.contains(BufferUsage::INDEX) {
            return Err(CommandError::MissingUsage("index buffers need INDEX usage"));
        }
        self.state.index_format = Some(format);
        self.state.index_offset = offset;
        self.push(Command::SetIndexBuffer {
            buffer: raw,
            format,
            offset,
        });
        Ok(())
    }

    fn set_graphics_resource_set(
        &mut self,
        slot: u32,
        set: &Arc<super::ResourceSet>,
        dynamic_offsets: &[u32],
    ) -> Result<(), CommandError> {
        self.set_resource_set(BindPoint::Graphics, slot, set, dynamic_offsets)
    }

    fn set_compute_resource_set(
        &mut self,
        slot: u32,
        set: &Arc<super::ResourceSet>,
        dynamic_offsets: &[u32],
    ) -> Result<(), CommandError> {
        self.set_resource_set(BindPoint::Compute, slot, set, dynamic_offsets)
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        vertex_start: u32,
        instance_start: u32,
    ) -> Result<(), CommandError> {
        if instance_start != 0 {
            self.check_caps(PrivateCapabilities::BASE_INSTANCE, "base instance")?;
        }
        self.pre_draw()?;
        self.push(Command::Draw {
            vertex_count,
            instance_count,
            vertex_start,
            instance_start,
        });
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        index_start: u32,
        vertex_offset: i32,
        instance_start: u32,
    ) -> Result<(), CommandError> {
        self.state.index_format.ok_or(CommandError::NoIndexBuffer)?;
        if vertex_offset != 0 {
            self.check_caps(PrivateCapabilities::BASE_VERTEX, "base vertex")?;
        }
        if instance_start != 0 {
            self.check_caps(PrivateCapabilities::BASE_INSTANCE, "base instance")?;
        }
        self.pre_draw()?;
        self.push(Command::DrawIndexed {
            index_count,
            instance_count,
            index_start,
            vertex_offset,
            instance_start,
        });
        Ok(())
    }

    fn draw_indirect(
        &mut self,
        buffer: &super::Buffer,
        offset: BufferAddress,
        draw_count: u32,
        stride: u32,
    ) -> Result<(), CommandError> {
        self.check_caps(PrivateCapabilities::INDIRECT_DRAW, "indirect draws")?;
        let raw = self.check_indirect(buffer)?;
        self.pre_draw()?;
        for draw in 0..draw_count as BufferAddress {
            self.push(Command::DrawIndirect {
                buffer: raw,
                offset: offset + draw * stride as BufferAddress,
                indexed: false,
            });
        }
        Ok(())
    }

    fn draw_indexed_indirect(
        &mut self,
        buffer: &super::Buffer,
        offset: BufferAddress,
        draw_count: u32,
        stride: u32,
    ) -> Result<(), CommandError> {
        self.state.index_format.ok_or(CommandError::NoIndexBuffer)?;
        self.check_caps(PrivateCapabilities::INDIRECT_DRAW, "indirect draws")?;
        // the indirect arguments address indices from the start of the buffer
        if self.state.index_offset != 0 {
            return Err(CommandError::Unsupported(
                "indexed indirect draws with an index buffer offset",
            ));
        }
        let raw = self.check_indirect(buffer)?;
        self.pre_draw()?;
        for draw in 0..draw_count as BufferAddress {
            self.push(Command::DrawIndirect {
                buffer: raw,
                offset: offset + draw * stride as BufferAddress,
                indexed: true,
            });
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    ) -> Result<(), CommandError> {
        self.pre_dispatch()?;
        self.push(Command::Dispatch([group_count_x, group_count_y, group_count_z]));
        Ok(())
    }

    fn dispatch_indirect(
        &mut self,
        buffer: &super::Buffer,
        offset: BufferAddress,
    ) -> Result<(), CommandError> {
        let raw = self.check_indirect(buffer)?;
        self.pre_dispatch()?;
        self.push(Command::DispatchIndirect { buffer: raw, offset });
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        src: &super::Buffer,
        src_offset: BufferAddress,
        dst: &super::Buffer,
        dst_offset: BufferAddress,
        size: BufferAddress,
    ) -> Result<(), CommandError> {
        self.check_recording()?;
        let src_raw = src.native()?;
        let dst_raw = dst.native()?;
        check_buffer_range("source", src, src_offset, size)?;
        check_buffer_range("destination", dst, dst_offset, size)?;
        if size == 0 {
            return Ok(());
        }
        self.push(Command::CopyBufferToBuffer {
            src: src_raw,
            src_offset,
            dst: dst_raw,
            dst_offset,
            size,
        });
        Ok(())
    }

    fn copy_texture(
        &mut self,
        src: &super::Texture,
        dst: &super::Texture,
        copy: &crate::TextureCopy,
    ) -> Result<(), CommandError> {
        self.check_recording()?;
        src.storage()?;
        dst.storage()?;
        if copy.layer_count == 0 {
            return Ok(());
        }
        if src.format().describe().block_size != dst.format().describe().block_size {
            return Err(CommandError::InvalidCopy(format!(
                "{:?} and {:?} are not copy compatible",
                src.format(),
                dst.format()
            )));
        }
        let last_layer = copy.layer_count - 1;
        format::validate_region(
            &src.desc,
            &copy.src_origin,
            copy.src_mip_level,
            copy.src_base_array_layer + last_layer,
            &copy.size,
        )
        .map_err(CommandError::InvalidCopy)?;
        format::validate_region(
            &dst.desc,
            &copy.dst_origin,
            copy.dst_mip_level,
            copy.dst_base_array_layer + last_layer,
            &copy.size,
        )
        .map_err(CommandError::InvalidCopy)?;

        for layer in 0..copy.layer_count {
            self.copy_texture_layer(src, dst, copy, layer)?;
        }
        Ok(())
    }

    fn update_buffer(
        &mut self,
        buffer: &super::Buffer,
        offset: BufferAddress,
        data: &[u8],
    ) -> Result<(), CommandError> {
        self.check_recording()?;
        let dst = buffer.native()?;
        check_buffer_range("update", buffer, offset, data.len() as BufferAddress)?;
        if data.is_empty() {
            return Ok(());
        }
        let data = self.cmd_buffer.add_bytes(data);
        self.push(Command::UpdateBuffer { dst, offset, data });
        Ok(())
    }

    fn resolve_texture(
        &mut self,
        src: &super::Texture,
        dst: &super::Texture,
    ) -> Result<(), CommandError> {
        self.check_recording()?;
        let (src_raw, src_target) = src.image()?;
        let (dst_raw, dst_target) = dst.image()?;
        if src.desc.sample_count <= 1 || dst.desc.sample_count > 1 {
            return Err(CommandError::InvalidCopy(
                "resolve goes from a multisampled texture to a single-sampled one".to_string(),
            ));
        }
        if src.format() != dst.format() {
            return Err(CommandError::InvalidCopy(format!(
                "can not resolve {:?} into {:?}",
                src.format(),
                dst.format()
            )));
        }
        if src.format().is_depth_stencil() {
            return Err(CommandError::Unsupported("resolving depth-stencil textures"));
        }
        let (width, height, _) = format::mip_dimensions(&dst.desc, 0);
        self.push(Command::ResolveTexture {
            src: Subresource::new(src_raw, src_target, 0, 0, Origin3d::ZERO),
            dst: Subresource::new(dst_raw, dst_target, 0, 0, Origin3d::ZERO),
            width,
            height,
        });
        Ok(())
    }

    fn generate_mipmaps(&mut self, texture: &super::Texture) -> Result<(), CommandError> {
        self.check_recording()?;
        let (raw, target) = texture.image()?;
        if !texture.desc.usage.contains(TextureUsage::GENERATE_MIPMAPS) {
            return Err(CommandError::MissingUsage(
                "mipmap generation needs GENERATE_MIPMAPS usage",
            ));
        }
        self.push(Command::GenerateMipmaps {
            texture: raw,
            target,
        });
        Ok(())
    }

    fn clear_color_target(&mut self, index: u32, color: Color) -> Result<(), CommandError> {
        self.check_recording()?;
        let limit = match self.state.framebuffer {
            Some(ref framebuffer) => framebuffer.color_target_count(),
            None => MAX_COLOR_TARGETS,
        };
        if index as usize >= limit {
            return Err(CommandError::ColorTargetOutOfRange(index));
        }
        self.push(Command::ClearColor { index, color });
        Ok(())
    }

    fn clear_depth_stencil(&mut self, depth: f32, stencil: u8) -> Result<(), CommandError> {
        self.check_recording()?;
        if let Some(ref framebuffer) = self.state.framebuffer {
            if !framebuffer.has_depth_target() {
                return Err(CommandError::NoDepthTarget);
            }
        }
        self.push(Command::ClearDepthStencil { depth, stencil });
        Ok(())
    }

    fn push_debug_group(&mut self, label: &str) -> Result<(), CommandError> {
        self.check_recording()?;
        let range = self.cmd_buffer.add_marker(label);
        self.push(Command::PushDebugGroup(range));
        self.state.debug_group_depth += 1;
        Ok(())
    }

    fn pop_debug_group(&mut self) -> Result<(), CommandError> {
        self.check_recording()?;
        // the group opened by `begin` in debug mode is not the caller's to close
        let floor = if self.shared.options.debug { 1 } else { 0 };
        if self.state.debug_group_depth <= floor {
            return Err(CommandError::UnbalancedDebugGroup);
        }
        self.push(Command::PopDebugGroup);
        self.state.debug_group_depth -= 1;
        Ok(())
    }

    fn insert_debug_marker(&mut self, label: &str) -> Result<(), CommandError> {
        self.check_recording()?;
        let range = self.cmd_buffer.add_marker(label);
        self.push(Command::InsertDebugMarker(range));
        Ok(())
    }
}
