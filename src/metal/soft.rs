//! Software implementation of the native Metal surface.
//!
//! Every call is recorded. Buffer and texture memory live on the heap, and
//! blits as well as the byte copy kernel are executed when a command buffer
//! is committed. Rasterization is not emulated: render passes and draws only
//! show up in the call log.

use std::{
    fmt,
    num::NonZeroU64,
    sync::atomic::{AtomicU64, Ordering},
};

use fxhash::FxHashMap;
use parking_lot::Mutex;

use super::native::{
    self as mtl, BindTarget, BlitEncoderId, BufferId, CommandBufferId, CompletedHandler,
    ComputeEncoderId, ComputePipelineId, DepthStencilId, DrawableId, FunctionId, LayerId,
    LibraryId, NativeObject as _, RawId, RenderEncoderId, RenderPipelineId, SamplerId, TextureId,
};

/// What the software device reports about itself.
#[derive(Clone, Debug)]
pub struct SoftDeviceConfig {
    pub name: String,
    pub families: Vec<mtl::MTLGPUFamily>,
    pub depth24_stencil8: bool,
    pub max_buffers_per_stage: u32,
    /// Run completion handlers as soon as a command buffer is committed.
    /// Otherwise they wait for [`SoftDevice::complete_pending`] or
    /// [`SoftDevice::complete`].
    pub auto_complete: bool,
}

impl Default for SoftDeviceConfig {
    fn default() -> Self {
        Self {
            name: "Soft Metal (Mac2)".to_string(),
            families: vec![mtl::MTLGPUFamily::Mac1, mtl::MTLGPUFamily::Mac2],
            depth24_stencil8: true,
            max_buffers_per_stage: 31,
            auto_complete: true,
        }
    }
}

impl SoftDeviceConfig {
    /// A tile-based mobile GPU: memoryless targets, no BC formats, a single
    /// viewport.
    pub fn apple_gpu() -> Self {
        Self {
            name: "Soft Metal (Apple4)".to_string(),
            families: vec![
                mtl::MTLGPUFamily::Apple1,
                mtl::MTLGPUFamily::Apple2,
                mtl::MTLGPUFamily::Apple3,
                mtl::MTLGPUFamily::Apple4,
            ],
            depth24_stencil8: false,
            ..Self::default()
        }
    }

    /// The oldest feature set: no base vertex or instance, no depth clip mode.
    pub fn apple1_gpu() -> Self {
        Self {
            name: "Soft Metal (Apple1)".to_string(),
            families: vec![mtl::MTLGPUFamily::Apple1],
            depth24_stencil8: false,
            ..Self::default()
        }
    }
}

/// A recorded native call.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    NewBuffer {
        buffer: BufferId,
        length: u64,
        storage_mode: mtl::MTLStorageMode,
    },
    WriteBuffer {
        buffer: BufferId,
        offset: u64,
        size: u64,
    },
    NewTexture(TextureId, mtl::TextureDescriptor),
    NewSampler(SamplerId),
    NewRenderPipelineState(RenderPipelineId),
    NewComputePipelineState(ComputePipelineId),
    NextDrawable(Option<DrawableId>),
    NewCommandBuffer {
        command_buffer: CommandBufferId,
        retain_references: bool,
    },
    Commit(CommandBufferId),
    PresentDrawable(CommandBufferId, DrawableId),
    NewRenderCommandEncoder(RenderEncoderId, mtl::RenderPassDescriptor),
    NewBlitCommandEncoder(BlitEncoderId),
    NewComputeCommandEncoder(ComputeEncoderId),
    EndEncoding(RawId),
    PushDebugGroup(RawId, String),
    PopDebugGroup(RawId),
    InsertDebugSignpost(RawId, String),
    SetBuffer {
        target: BindTarget,
        index: u64,
        buffer: BufferId,
        offset: u64,
    },
    SetBufferOffset {
        target: BindTarget,
        index: u64,
        offset: u64,
    },
    SetBytes {
        target: BindTarget,
        index: u64,
        data: Vec<u8>,
    },
    SetTexture {
        target: BindTarget,
        index: u64,
        texture: TextureId,
    },
    SetSamplerState {
        target: BindTarget,
        index: u64,
        sampler: SamplerId,
    },
    SetRenderPipelineState(RenderPipelineId),
    SetCullMode(mtl::MTLCullMode),
    SetFrontFacingWinding(mtl::MTLWinding),
    SetTriangleFillMode(mtl::MTLTriangleFillMode),
    SetBlendColor([f32; 4]),
    SetDepthStencilState(DepthStencilId),
    SetDepthClipMode(mtl::MTLDepthClipMode),
    SetStencilReferenceValue(u32),
    SetViewport(mtl::MTLViewport),
    SetViewports(Vec<mtl::MTLViewport>),
    SetScissorRect(mtl::MTLScissorRect),
    SetScissorRects(Vec<mtl::MTLScissorRect>),
    DrawPrimitives {
        vertex_start: u64,
        vertex_count: u64,
    },
    DrawPrimitivesInstanced {
        vertex_start: u64,
        vertex_count: u64,
        instance_count: u64,
    },
    DrawPrimitivesInstancedBaseInstance {
        vertex_start: u64,
        vertex_count: u64,
        instance_count: u64,
        base_instance: u64,
    },
    DrawIndexedPrimitives {
        index_count: u64,
        index_type: mtl::MTLIndexType,
        index_buffer_offset: u64,
    },
    DrawIndexedPrimitivesInstanced {
        index_count: u64,
        index_type: mtl::MTLIndexType,
        index_buffer_offset: u64,
        instance_count: u64,
    },
    DrawIndexedPrimitivesInstancedBaseInstance {
        index_count: u64,
        index_type: mtl::MTLIndexType,
        index_buffer_offset: u64,
        instance_count: u64,
        base_vertex: i64,
        base_instance: u64,
    },
    DrawPrimitivesIndirect {
        indirect_buffer: BufferId,
        indirect_buffer_offset: u64,
    },
    DrawIndexedPrimitivesIndirect {
        index_buffer_offset: u64,
        indirect_buffer: BufferId,
        indirect_buffer_offset: u64,
    },
    SetComputePipelineState(ComputePipelineId),
    DispatchThreadGroups {
        thread_groups: mtl::MTLSize,
        threads_per_group: mtl::MTLSize,
    },
    DispatchThreadGroupsIndirect {
        indirect_buffer: BufferId,
        indirect_buffer_offset: u64,
    },
    CopyFromBuffer {
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    },
    CopyFromBufferToTexture {
        src: BufferId,
        src_offset: u64,
        dst: TextureId,
        dst_slice: u64,
        dst_level: u64,
    },
    CopyFromTextureToBuffer {
        src: TextureId,
        src_slice: u64,
        src_level: u64,
        dst: BufferId,
        dst_offset: u64,
    },
    CopyFromTexture {
        src: TextureId,
        dst: TextureId,
    },
    GenerateMipmaps(TextureId),
}

impl Call {
    pub fn is_draw(&self) -> bool {
        match *self {
            Self::DrawPrimitives { .. }
            | Self::DrawPrimitivesInstanced { .. }
            | Self::DrawPrimitivesInstancedBaseInstance { .. }
            | Self::DrawIndexedPrimitives { .. }
            | Self::DrawIndexedPrimitivesInstanced { .. }
            | Self::DrawIndexedPrimitivesInstancedBaseInstance { .. }
            | Self::DrawPrimitivesIndirect { .. }
            | Self::DrawIndexedPrimitivesIndirect { .. } => true,
            _ => false,
        }
    }
}

/// A copy executed when its command buffer is committed.
#[derive(Clone, Copy, Debug)]
enum Op {
    CopyBuffer {
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    },
    BufferToTexture {
        src: BufferId,
        src_offset: u64,
        bytes_per_row: u64,
        bytes_per_image: u64,
        size: mtl::MTLSize,
        dst: TextureId,
        slice: u64,
        level: u64,
        origin: mtl::MTLOrigin,
    },
    TextureToBuffer {
        src: TextureId,
        slice: u64,
        level: u64,
        origin: mtl::MTLOrigin,
        size: mtl::MTLSize,
        dst: BufferId,
        dst_offset: u64,
        bytes_per_row: u64,
        bytes_per_image: u64,
    },
    CopyTexture {
        src: TextureId,
        src_slice: u64,
        src_level: u64,
        src_origin: mtl::MTLOrigin,
        size: mtl::MTLSize,
        dst: TextureId,
        dst_slice: u64,
        dst_level: u64,
        dst_origin: mtl::MTLOrigin,
    },
}

#[derive(Debug)]
struct SoftTexture {
    desc: mtl::TextureDescriptor,
    images: FxHashMap<(u64, u64), Vec<u8>>,
}

/// Placement of one `(slice, level)` image in memory.
#[derive(Clone, Copy, Debug)]
struct ImageLayout {
    block_dimension: u64,
    block_size: u64,
    row_pitch: u64,
    depth_pitch: u64,
    depth: u64,
}

impl ImageLayout {
    fn new(desc: &mtl::TextureDescriptor, level: u64) -> Self {
        let (block_dimension, block_size) = block_info(desc.pixel_format);
        let width = (desc.width >> level).max(1);
        let height = (desc.height >> level).max(1);
        let depth = match desc.texture_type {
            mtl::MTLTextureType::D3 => (desc.depth >> level).max(1),
            _ => 1,
        };
        let row_pitch = div_round_up(width, block_dimension) * block_size;
        Self {
            block_dimension,
            block_size,
            row_pitch,
            depth_pitch: row_pitch * div_round_up(height, block_dimension),
            depth,
        }
    }

    fn size(&self) -> u64 {
        self.depth_pitch * self.depth
    }

    fn row_bytes(&self, width: u64) -> u64 {
        div_round_up(width, self.block_dimension) * self.block_size
    }

    fn rows(&self, height: u64) -> u64 {
        div_round_up(height, self.block_dimension)
    }

    fn offset(&self, x: u64, y: u64, z: u64) -> u64 {
        z * self.depth_pitch
            + (y / self.block_dimension) * self.row_pitch
            + (x / self.block_dimension) * self.block_size
    }
}

fn div_round_up(value: u64, align: u64) -> u64 {
    (value + align - 1) / align
}

/// Block edge in texels and block size in bytes.
fn block_info(format: mtl::MTLPixelFormat) -> (u64, u64) {
    use mtl::MTLPixelFormat as Pf;
    match format {
        Pf::Invalid | Pf::R8Unorm | Pf::R8Snorm | Pf::R8Uint | Pf::R8Sint => (1, 1),
        Pf::R16Unorm | Pf::R16Uint | Pf::R16Float | Pf::RG8Unorm | Pf::Depth16Unorm => (1, 2),
        Pf::R32Uint
        | Pf::R32Sint
        | Pf::R32Float
        | Pf::RG16Float
        | Pf::RGBA8Unorm
        | Pf::RGBA8Unorm_sRGB
        | Pf::RGBA8Uint
        | Pf::BGRA8Unorm
        | Pf::BGRA8Unorm_sRGB
        | Pf::RGB10A2Unorm
        | Pf::RG11B10Float
        | Pf::Depth32Float
        | Pf::Depth24Unorm_Stencil8 => (1, 4),
        Pf::RG32Float | Pf::RGBA16Float | Pf::Depth32Float_Stencil8 => (1, 8),
        Pf::RGBA32Uint | Pf::RGBA32Float => (1, 16),
        Pf::BC1_RGBA | Pf::BC1_RGBA_sRGB | Pf::BC4_RUnorm | Pf::ETC2_RGB8 => (4, 8),
        Pf::BC2_RGBA
        | Pf::BC3_RGBA
        | Pf::BC5_RGUnorm
        | Pf::BC7_RGBAUnorm
        | Pf::BC7_RGBAUnorm_sRGB
        | Pf::EAC_RGBA8 => (4, 16),
    }
}

#[derive(Debug, Default)]
struct ComputeBindings {
    pipeline: Option<ComputePipelineId>,
    buffers: FxHashMap<u64, (BufferId, u64)>,
    bytes: FxHashMap<u64, Vec<u8>>,
}

#[derive(Debug)]
enum Object {
    Buffer(Vec<u8>),
    Texture(SoftTexture),
    Sampler,
    Library(String),
    Function(String),
    RenderPipeline,
    ComputePipeline(String),
    DepthStencil,
    CommandBuffer { committed: bool },
    Encoder {
        command_buffer: CommandBufferId,
        compute: Option<ComputeBindings>,
    },
    Drawable(TextureId),
}

#[derive(Default)]
struct State {
    objects: FxHashMap<RawId, Object>,
    labels: FxHashMap<RawId, String>,
    calls: Vec<Call>,
    ops: FxHashMap<CommandBufferId, Vec<Op>>,
    handlers: FxHashMap<CommandBufferId, Vec<CompletedHandler>>,
    /// Committed command buffers whose handlers haven't run.
    pending: Vec<CommandBufferId>,
    drawable_sizes: FxHashMap<LayerId, (u64, u64)>,
    drawable_unavailable: bool,
    invalid_releases: usize,
    validation_errors: Vec<String>,
    committed: usize,
}

impl State {
    fn buffer_mut(&mut self, id: BufferId) -> Option<&mut Vec<u8>> {
        match self.objects.get_mut(&id.raw()) {
            Some(Object::Buffer(data)) => Some(data),
            _ => None,
        }
    }

    fn texture_mut(&mut self, id: TextureId) -> Option<&mut SoftTexture> {
        match self.objects.get_mut(&id.raw()) {
            Some(Object::Texture(texture)) => Some(texture),
            _ => None,
        }
    }

    fn record_op(&mut self, encoder: RawId, op: Op) {
        match self.objects.get(&encoder) {
            Some(&Object::Encoder { command_buffer, .. }) => {
                self.ops.entry(command_buffer).or_default().push(op)
            }
            _ => self
                .validation_errors
                .push(format!("{:?} is not a live encoder", encoder)),
        }
    }

    fn compute_bindings(&mut self, encoder: ComputeEncoderId) -> Option<&mut ComputeBindings> {
        match self.objects.get_mut(&encoder.raw()) {
            Some(Object::Encoder { compute, .. }) => compute.as_mut(),
            _ => None,
        }
    }

    fn read_bytes(&mut self, buffer: BufferId, offset: u64, size: u64) -> Option<Vec<u8>> {
        let data = self.buffer_mut(buffer)?;
        let range = offset as usize..(offset + size) as usize;
        data.get(range).map(<[u8]>::to_vec)
    }

    fn write_bytes(&mut self, buffer: BufferId, offset: u64, bytes: &[u8]) -> bool {
        let data = match self.buffer_mut(buffer) {
            Some(data) => data,
            None => return false,
        };
        match data.get_mut(offset as usize..offset as usize + bytes.len()) {
            Some(dst) => {
                dst.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    fn image_mut(&mut self, texture: TextureId, slice: u64, level: u64) -> Option<(ImageLayout, &mut Vec<u8>)> {
        let texture = self.texture_mut(texture)?;
        if level >= texture.desc.mipmap_level_count {
            return None;
        }
        let layout = ImageLayout::new(&texture.desc, level);
        let image = texture
            .images
            .entry((slice, level))
            .or_insert_with(|| vec![0; layout.size() as usize]);
        Some((layout, image))
    }

    fn read_image_row(&mut self, texture: TextureId, slice: u64, level: u64, x: u64, y: u64, z: u64, width: u64) -> Option<Vec<u8>> {
        let (layout, image) = self.image_mut(texture, slice, level)?;
        let start = layout.offset(x, y, z) as usize;
        let size = layout.row_bytes(width) as usize;
        image.get(start..start + size).map(<[u8]>::to_vec)
    }

    fn write_image_row(&mut self, texture: TextureId, slice: u64, level: u64, x: u64, y: u64, z: u64, bytes: &[u8]) -> bool {
        let (layout, image) = match self.image_mut(texture, slice, level) {
            Some(image) => image,
            None => return false,
        };
        let start = layout.offset(x, y, z) as usize;
        match image.get_mut(start..start + bytes.len()) {
            Some(dst) => {
                dst.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    fn block_layout(&mut self, texture: TextureId, level: u64) -> Option<ImageLayout> {
        let texture = self.texture_mut(texture)?;
        Some(ImageLayout::new(&texture.desc, level))
    }

    fn execute(&mut self, op: Op) -> Result<(), String> {
        match op {
            Op::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let bytes = self
                    .read_bytes(src, src_offset, size)
                    .ok_or_else(|| format!("buffer copy reads outside of {:?}", src))?;
                if !self.write_bytes(dst, dst_offset, &bytes) {
                    return Err(format!("buffer copy writes outside of {:?}", dst));
                }
            }
            Op::BufferToTexture {
                src,
                src_offset,
                bytes_per_row,
                bytes_per_image,
                size,
                dst,
                slice,
                level,
                origin,
            } => {
                let layout = self
                    .block_layout(dst, level)
                    .ok_or_else(|| format!("{:?} is not a texture", dst))?;
                let row_size = layout.row_bytes(size.width);
                for z in 0..size.depth {
                    for row in 0..layout.rows(size.height) {
                        let offset = src_offset + z * bytes_per_image + row * bytes_per_row;
                        let bytes = self
                            .read_bytes(src, offset, row_size)
                            .ok_or_else(|| format!("texture upload reads outside of {:?}", src))?;
                        let y = origin.y + row * layout.block_dimension;
                        if !self.write_image_row(dst, slice, level, origin.x, y, origin.z + z, &bytes) {
                            return Err(format!(
                                "texture upload writes outside of {:?} slice {} level {}",
                                dst, slice, level
                            ));
                        }
                    }
                }
            }
            Op::TextureToBuffer {
                src,
                slice,
                level,
                origin,
                size,
                dst,
                dst_offset,
                bytes_per_row,
                bytes_per_image,
            } => {
                let layout = self
                    .block_layout(src, level)
                    .ok_or_else(|| format!("{:?} is not a texture", src))?;
                for z in 0..size.depth {
                    for row in 0..layout.rows(size.height) {
                        let y = origin.y + row * layout.block_dimension;
                        let bytes = self
                            .read_image_row(src, slice, level, origin.x, y, origin.z + z, size.width)
                            .ok_or_else(|| {
                                format!(
                                    "texture readback reads outside of {:?} slice {} level {}",
                                    src, slice, level
                                )
                            })?;
                        let offset = dst_offset + z * bytes_per_image + row * bytes_per_row;
                        if !self.write_bytes(dst, offset, &bytes) {
                            return Err(format!("texture readback writes outside of {:?}", dst));
                        }
                    }
                }
            }
            Op::CopyTexture {
                src,
                src_slice,
                src_level,
                src_origin,
                size,
                dst,
                dst_slice,
                dst_level,
                dst_origin,
            } => {
                let layout = self
                    .block_layout(src, src_level)
                    .ok_or_else(|| format!("{:?} is not a texture", src))?;
                for z in 0..size.depth {
                    for row in 0..layout.rows(size.height) {
                        let step = row * layout.block_dimension;
                        let bytes = self
                            .read_image_row(
                                src,
                                src_slice,
                                src_level,
                                src_origin.x,
                                src_origin.y + step,
                                src_origin.z + z,
                                size.width,
                            )
                            .ok_or_else(|| format!("texture copy reads outside of {:?}", src))?;
                        if !self.write_image_row(
                            dst,
                            dst_slice,
                            dst_level,
                            dst_origin.x,
                            dst_origin.y + step,
                            dst_origin.z + z,
                            &bytes,
                        ) {
                            return Err(format!("texture copy writes outside of {:?}", dst));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// A Metal device that runs on the CPU.
pub struct SoftDevice {
    config: SoftDeviceConfig,
    next_id: AtomicU64,
    state: Mutex<State>,
}

impl fmt::Debug for SoftDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftDevice")
            .field("name", &self.config.name)
            .finish()
    }
}

impl SoftDevice {
    pub fn new(config: SoftDeviceConfig) -> Self {
        Self {
            config,
            // stay clear of small surface handles picked by callers
            next_id: AtomicU64::new(0x1_0000),
            state: Mutex::new(State::default()),
        }
    }

    fn alloc(&self, object: Object) -> RawId {
        let value = self.next_id.fetch_add(1, Ordering::Relaxed);
        // the counter starts above zero
        let id = RawId(NonZeroU64::new(value).unwrap_or(NonZeroU64::MIN));
        self.state.lock().objects.insert(id, object);
        id
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Returns the recorded calls and starts a fresh log.
    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.state.lock().calls)
    }

    /// Contents of a buffer, if it is still alive.
    pub fn buffer_contents(&self, buffer: BufferId) -> Option<Vec<u8>> {
        match self.state.lock().objects.get(&buffer.raw()) {
            Some(Object::Buffer(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Contents of one image of a texture.
    pub fn texture_contents(&self, texture: TextureId, slice: u64, level: u64) -> Option<Vec<u8>> {
        self.state
            .lock()
            .image_mut(texture, slice, level)
            .map(|(_, image)| image.clone())
    }

    pub fn texture_descriptor(&self, texture: TextureId) -> Option<mtl::TextureDescriptor> {
        self.state
            .lock()
            .texture_mut(texture)
            .map(|texture| texture.desc.clone())
    }

    pub fn label(&self, object: RawId) -> Option<String> {
        self.state.lock().labels.get(&object).cloned()
    }

    /// Number of objects created and not released yet.
    pub fn live_objects(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Number of releases of objects that were not alive.
    pub fn invalid_releases(&self) -> usize {
        self.state.lock().invalid_releases
    }

    /// Misuse the native API would report: out of bounds copies, dead
    /// encoders and the like.
    pub fn validation_errors(&self) -> Vec<String> {
        self.state.lock().validation_errors.clone()
    }

    pub fn committed_count(&self) -> usize {
        self.state.lock().committed
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Makes the next drawables unavailable, as when a window is occluded.
    pub fn set_drawable_available(&self, available: bool) {
        self.state.lock().drawable_unavailable = !available;
    }

    /// Committed command buffers that have not completed, oldest first.
    pub fn pending_command_buffers(&self) -> Vec<CommandBufferId> {
        self.state.lock().pending.clone()
    }

    /// Runs the completion handlers of every committed command buffer.
    pub fn complete_pending(&self) {
        let handlers = {
            let mut state = self.state.lock();
            let pending = std::mem::take(&mut state.pending);
            pending
                .into_iter()
                .flat_map(|command_buffer| state.handlers.remove(&command_buffer).unwrap_or_default())
                .collect::<Vec<_>>()
        };
        // handlers release objects, which takes the lock again
        for handler in handlers {
            handler();
        }
    }

    /// Completes a single committed command buffer, in any order relative
    /// to the others. Returns false if it is not pending.
    pub fn complete(&self, command_buffer: CommandBufferId) -> bool {
        let handlers = {
            let mut state = self.state.lock();
            let index = match state.pending.iter().position(|&id| id == command_buffer) {
                Some(index) => index,
                None => return false,
            };
            state.pending.remove(index);
            state.handlers.remove(&command_buffer).unwrap_or_default()
        };
        for handler in handlers {
            handler();
        }
        true
    }

    fn validation_error(&self, message: String) {
        log::warn!("Soft Metal validation: {}", message);
        self.state.lock().validation_errors.push(message);
    }
}

impl mtl::Device for SoftDevice {
    fn name(&self) -> String {
        self.config.name.clone()
    }

    fn supports_family(&self, family: mtl::MTLGPUFamily) -> bool {
        self.config.families.contains(&family)
    }

    fn supports_depth24_stencil8(&self) -> bool {
        self.config.depth24_stencil8
    }

    fn max_buffers_per_stage(&self) -> u32 {
        self.config.max_buffers_per_stage
    }

    fn release(&self, object: RawId) {
        let removed = {
            let mut state = self.state.lock();
            state.labels.remove(&object);
            // copies of a command buffer that is never committed are dropped
            state.ops.remove(&CommandBufferId(object));
            let removed = state.objects.remove(&object);
            if removed.is_none() {
                state.invalid_releases += 1;
            }
            removed
        };
        match removed {
            None => log::error!("Soft Metal: released {:?} which is not alive", object),
            // a drawable owns its texture
            Some(Object::Drawable(texture)) => self.release(texture.raw()),
            Some(_) => {}
        }
    }

    fn set_label(&self, object: RawId, label: &str) {
        self.state.lock().labels.insert(object, label.to_string());
    }

    fn new_buffer(&self, length: u64, storage_mode: mtl::MTLStorageMode) -> Option<BufferId> {
        let buffer = BufferId(self.alloc(Object::Buffer(vec![0; length as usize])));
        self.record(Call::NewBuffer {
            buffer,
            length,
            storage_mode,
        });
        Some(buffer)
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) {
        let written = self.state.lock().write_bytes(buffer, offset, data);
        if !written {
            self.validation_error(format!("write of {} bytes outside of {:?}", data.len(), buffer));
        }
        self.record(Call::WriteBuffer {
            buffer,
            offset,
            size: data.len() as u64,
        });
    }

    fn read_buffer(&self, buffer: BufferId, offset: u64, data: &mut [u8]) {
        let bytes = self.state.lock().read_bytes(buffer, offset, data.len() as u64);
        match bytes {
            Some(bytes) => data.copy_from_slice(&bytes),
            None => self.validation_error(format!("read of {} bytes outside of {:?}", data.len(), buffer)),
        }
    }

    fn new_texture(&self, desc: &mtl::TextureDescriptor) -> Option<TextureId> {
        let texture = TextureId(self.alloc(Object::Texture(SoftTexture {
            desc: desc.clone(),
            images: FxHashMap::default(),
        })));
        self.record(Call::NewTexture(texture, desc.clone()));
        Some(texture)
    }

    fn new_sampler(&self, _desc: &mtl::SamplerDescriptor) -> Option<SamplerId> {
        let sampler = SamplerId(self.alloc(Object::Sampler));
        self.record(Call::NewSampler(sampler));
        Some(sampler)
    }

    fn new_library_with_source(&self, source: &str) -> Result<LibraryId, String> {
        if let Some(line) = source.lines().find(|line| line.trim_start().starts_with("#error")) {
            return Err(format!("program_source: error: {}", line.trim()));
        }
        Ok(LibraryId(self.alloc(Object::Library(source.to_string()))))
    }

    fn get_function(&self, library: LibraryId, name: &str) -> Option<FunctionId> {
        let found = match self.state.lock().objects.get(&library.raw()) {
            Some(Object::Library(source)) => source.contains(name),
            _ => false,
        };
        if found {
            Some(FunctionId(self.alloc(Object::Function(name.to_string()))))
        } else {
            None
        }
    }

    fn new_render_pipeline_state(
        &self,
        desc: &mtl::RenderPipelineDescriptor,
    ) -> Result<RenderPipelineId, String> {
        {
            let state = self.state.lock();
            let functions = std::iter::once(desc.vertex_function).chain(desc.fragment_function);
            for function in functions {
                match state.objects.get(&function.raw()) {
                    Some(Object::Function(_)) => {}
                    _ => return Err(format!("{:?} is not a function", function)),
                }
            }
        }
        let pipeline = RenderPipelineId(self.alloc(Object::RenderPipeline));
        self.record(Call::NewRenderPipelineState(pipeline));
        Ok(pipeline)
    }

    fn new_compute_pipeline_state(&self, function: FunctionId) -> Result<ComputePipelineId, String> {
        let name = match self.state.lock().objects.get(&function.raw()) {
            Some(Object::Function(name)) => name.clone(),
            _ => return Err(format!("{:?} is not a function", function)),
        };
        let pipeline = ComputePipelineId(self.alloc(Object::ComputePipeline(name)));
        self.record(Call::NewComputePipelineState(pipeline));
        Ok(pipeline)
    }

    fn new_depth_stencil_state(&self, _desc: &mtl::DepthStencilDescriptor) -> DepthStencilId {
        DepthStencilId(self.alloc(Object::DepthStencil))
    }

    fn next_drawable(&self, layer: LayerId) -> Option<DrawableId> {
        let (unavailable, (width, height)) = {
            let state = self.state.lock();
            let size = state.drawable_sizes.get(&layer).copied().unwrap_or((1, 1));
            (state.drawable_unavailable, size)
        };
        if unavailable {
            self.record(Call::NextDrawable(None));
            return None;
        }
        let texture = TextureId(self.alloc(Object::Texture(SoftTexture {
            desc: mtl::TextureDescriptor {
                texture_type: mtl::MTLTextureType::D2,
                pixel_format: mtl::MTLPixelFormat::BGRA8Unorm,
                width,
                height,
                depth: 1,
                mipmap_level_count: 1,
                array_length: 1,
                sample_count: 1,
                usage: mtl::MTLTextureUsage::RENDER_TARGET,
                storage_mode: mtl::MTLStorageMode::Private,
            },
            images: FxHashMap::default(),
        })));
        let drawable = DrawableId(self.alloc(Object::Drawable(texture)));
        self.record(Call::NextDrawable(Some(drawable)));
        Some(drawable)
    }

    fn drawable_texture(&self, drawable: DrawableId) -> TextureId {
        match self.state.lock().objects.get(&drawable.raw()) {
            Some(&Object::Drawable(texture)) => texture,
            _ => TextureId(drawable.raw()),
        }
    }

    fn set_drawable_size(&self, layer: LayerId, width: u64, height: u64) {
        self.state.lock().drawable_sizes.insert(layer, (width, height));
    }

    fn new_command_buffer(&self, retain_references: bool) -> CommandBufferId {
        let command_buffer = CommandBufferId(self.alloc(Object::CommandBuffer { committed: false }));
        self.record(Call::NewCommandBuffer {
            command_buffer,
            retain_references,
        });
        command_buffer
    }

    fn add_completed_handler(&self, command_buffer: CommandBufferId, handler: CompletedHandler) {
        self.state
            .lock()
            .handlers
            .entry(command_buffer)
            .or_default()
            .push(handler);
    }

    fn present_drawable(&self, command_buffer: CommandBufferId, drawable: DrawableId) {
        self.record(Call::PresentDrawable(command_buffer, drawable));
    }

    fn commit(&self, command_buffer: CommandBufferId) {
        let mut errors = Vec::new();
        {
            let mut state = self.state.lock();
            match state.objects.get_mut(&command_buffer.raw()) {
                Some(Object::CommandBuffer { committed }) if !*committed => *committed = true,
                _ => errors.push(format!("{:?} can not be committed", command_buffer)),
            }
            let open_encoders = state
                .objects
                .values()
                .filter(|object| match **object {
                    Object::Encoder {
                        command_buffer: owner,
                        ..
                    } => owner == command_buffer,
                    _ => false,
                })
                .count();
            if open_encoders != 0 {
                errors.push(format!(
                    "{:?} committed with {} encoders still open",
                    command_buffer, open_encoders
                ));
            }
            for op in state.ops.remove(&command_buffer).unwrap_or_default() {
                if let Err(message) = state.execute(op) {
                    errors.push(message);
                }
            }
            state.calls.push(Call::Commit(command_buffer));
            state.committed += 1;
            state.pending.push(command_buffer);
        }
        for message in errors {
            self.validation_error(message);
        }
        if self.config.auto_complete {
            self.complete_pending();
        }
    }

    fn new_render_command_encoder(
        &self,
        command_buffer: CommandBufferId,
        desc: &mtl::RenderPassDescriptor,
    ) -> RenderEncoderId {
        let encoder = RenderEncoderId(self.alloc(Object::Encoder {
            command_buffer,
            compute: None,
        }));
        self.record(Call::NewRenderCommandEncoder(encoder, desc.clone()));
        encoder
    }

    fn new_blit_command_encoder(&self, command_buffer: CommandBufferId) -> BlitEncoderId {
        let encoder = BlitEncoderId(self.alloc(Object::Encoder {
            command_buffer,
            compute: None,
        }));
        self.record(Call::NewBlitCommandEncoder(encoder));
        encoder
    }

    fn new_compute_command_encoder(&self, command_buffer: CommandBufferId) -> ComputeEncoderId {
        let encoder = ComputeEncoderId(self.alloc(Object::Encoder {
            command_buffer,
            compute: Some(ComputeBindings::default()),
        }));
        self.record(Call::NewComputeCommandEncoder(encoder));
        encoder
    }

    fn end_encoding(&self, encoder: RawId) {
        self.record(Call::EndEncoding(encoder));
    }

    fn push_debug_group(&self, target: RawId, label: &str) {
        self.record(Call::PushDebugGroup(target, label.to_string()));
    }

    fn pop_debug_group(&self, target: RawId) {
        self.record(Call::PopDebugGroup(target));
    }

    fn insert_debug_signpost(&self, target: RawId, label: &str) {
        self.record(Call::InsertDebugSignpost(target, label.to_string()));
    }

    fn set_buffer(&self, target: BindTarget, index: u64, buffer: BufferId, offset: u64) {
        let mut state = self.state.lock();
        if let BindTarget::Compute(encoder) = target {
            if let Some(bindings) = state.compute_bindings(encoder) {
                bindings.buffers.insert(index, (buffer, offset));
                bindings.bytes.remove(&index);
            }
        }
        state.calls.push(Call::SetBuffer {
            target,
            index,
            buffer,
            offset,
        });
    }

    fn set_buffer_offset(&self, target: BindTarget, index: u64, offset: u64) {
        let mut state = self.state.lock();
        if let BindTarget::Compute(encoder) = target {
            if let Some(bindings) = state.compute_bindings(encoder) {
                if let Some(binding) = bindings.buffers.get_mut(&index) {
                    binding.1 = offset;
                }
            }
        }
        state.calls.push(Call::SetBufferOffset {
            target,
            index,
            offset,
        });
    }

    fn set_bytes(&self, target: BindTarget, index: u64, data: &[u8]) {
        let mut state = self.state.lock();
        if let BindTarget::Compute(encoder) = target {
            if let Some(bindings) = state.compute_bindings(encoder) {
                bindings.buffers.remove(&index);
                bindings.bytes.insert(index, data.to_vec());
            }
        }
        state.calls.push(Call::SetBytes {
            target,
            index,
            data: data.to_vec(),
        });
    }

    fn set_texture(&self, target: BindTarget, index: u64, texture: TextureId) {
        self.record(Call::SetTexture {
            target,
            index,
            texture,
        });
    }

    fn set_sampler_state(&self, target: BindTarget, index: u64, sampler: SamplerId) {
        self.record(Call::SetSamplerState {
            target,
            index,
            sampler,
        });
    }

    fn set_render_pipeline_state(&self, _encoder: RenderEncoderId, pipeline: RenderPipelineId) {
        self.record(Call::SetRenderPipelineState(pipeline));
    }

    fn set_cull_mode(&self, _encoder: RenderEncoderId, mode: mtl::MTLCullMode) {
        self.record(Call::SetCullMode(mode));
    }

    fn set_front_facing_winding(&self, _encoder: RenderEncoderId, winding: mtl::MTLWinding) {
        self.record(Call::SetFrontFacingWinding(winding));
    }

    fn set_triangle_fill_mode(&self, _encoder: RenderEncoderId, mode: mtl::MTLTriangleFillMode) {
        self.record(Call::SetTriangleFillMode(mode));
    }

    fn set_blend_color(&self, _encoder: RenderEncoderId, color: [f32; 4]) {
        self.record(Call::SetBlendColor(color));
    }

    fn set_depth_stencil_state(&self, _encoder: RenderEncoderId, state: DepthStencilId) {
        self.record(Call::SetDepthStencilState(state));
    }

    fn set_depth_clip_mode(&self, _encoder: RenderEncoderId, mode: mtl::MTLDepthClipMode) {
        self.record(Call::SetDepthClipMode(mode));
    }

    fn set_stencil_reference_value(&self, _encoder: RenderEncoderId, value: u32) {
        self.record(Call::SetStencilReferenceValue(value));
    }

    fn set_viewport(&self, _encoder: RenderEncoderId, viewport: mtl::MTLViewport) {
        self.record(Call::SetViewport(viewport));
    }

    fn set_viewports(&self, _encoder: RenderEncoderId, viewports: &[mtl::MTLViewport]) {
        self.record(Call::SetViewports(viewports.to_vec()));
    }

    fn set_scissor_rect(&self, _encoder: RenderEncoderId, rect: mtl::MTLScissorRect) {
        self.record(Call::SetScissorRect(rect));
    }

    fn set_scissor_rects(&self, _encoder: RenderEncoderId, rects: &[mtl::MTLScissorRect]) {
        self.record(Call::SetScissorRects(rects.to_vec()));
    }

    fn draw_primitives(
        &self,
        _encoder: RenderEncoderId,
        _primitive_type: mtl::MTLPrimitiveType,
        vertex_start: u64,
        vertex_count: u64,
    ) {
        self.record(Call::DrawPrimitives {
            vertex_start,
            vertex_count,
        });
    }

    fn draw_primitives_instanced(
        &self,
        _encoder: RenderEncoderId,
        _primitive_type: mtl::MTLPrimitiveType,
        vertex_start: u64,
        vertex_count: u64,
        instance_count: u64,
    ) {
        self.record(Call::DrawPrimitivesInstanced {
            vertex_start,
            vertex_count,
            instance_count,
        });
    }

    fn draw_primitives_instanced_base_instance(
        &self,
        _encoder: RenderEncoderId,
        _primitive_type: mtl::MTLPrimitiveType,
        vertex_start: u64,
        vertex_count: u64,
        instance_count: u64,
        base_instance: u64,
    ) {
        self.record(Call::DrawPrimitivesInstancedBaseInstance {
            vertex_start,
            vertex_count,
            instance_count,
            base_instance,
        });
    }

    fn draw_indexed_primitives(
        &self,
        _encoder: RenderEncoderId,
        _primitive_type: mtl::MTLPrimitiveType,
        index_count: u64,
        index_type: mtl::MTLIndexType,
        _index_buffer: BufferId,
        index_buffer_offset: u64,
    ) {
        self.record(Call::DrawIndexedPrimitives {
            index_count,
            index_type,
            index_buffer_offset,
        });
    }

    fn draw_indexed_primitives_instanced(
        &self,
        _encoder: RenderEncoderId,
        _primitive_type: mtl::MTLPrimitiveType,
        index_count: u64,
        index_type: mtl::MTLIndexType,
        _index_buffer: BufferId,
        index_buffer_offset: u64,
        instance_count: u64,
    ) {
        self.record(Call::DrawIndexedPrimitivesInstanced {
            index_count,
            index_type,
            index_buffer_offset,
            instance_count,
        });
    }

    fn draw_indexed_primitives_instanced_base_instance(
        &self,
        _encoder: RenderEncoderId,
        _primitive_type: mtl::MTLPrimitiveType,
        index_count: u64,
        index_type: mtl::MTLIndexType,
        _index_buffer: BufferId,
        index_buffer_offset: u64,
        instance_count: u64,
        base_vertex: i64,
        base_instance: u64,
    ) {
        self.record(Call::DrawIndexedPrimitivesInstancedBaseInstance {
            index_count,
            index_type,
            index_buffer_offset,
            instance_count,
            base_vertex,
            base_instance,
        });
    }

    fn draw_primitives_indirect(
        &self,
        _encoder: RenderEncoderId,
        _primitive_type: mtl::MTLPrimitiveType,
        indirect_buffer: BufferId,
        indirect_buffer_offset: u64,
    ) {
        self.record(Call::DrawPrimitivesIndirect {
            indirect_buffer,
            indirect_buffer_offset,
        });
    }

    fn draw_indexed_primitives_indirect(
        &self,
        _encoder: RenderEncoderId,
        _primitive_type: mtl::MTLPrimitiveType,
        _index_type: mtl::MTLIndexType,
        _index_buffer: BufferId,
        index_buffer_offset: u64,
        indirect_buffer: BufferId,
        indirect_buffer_offset: u64,
    ) {
        self.record(Call::DrawIndexedPrimitivesIndirect {
            index_buffer_offset,
            indirect_buffer,
            indirect_buffer_offset,
        });
    }

    fn set_compute_pipeline_state(&self, encoder: ComputeEncoderId, pipeline: ComputePipelineId) {
        let mut state = self.state.lock();
        if let Some(bindings) = state.compute_bindings(encoder) {
            bindings.pipeline = Some(pipeline);
        }
        state.calls.push(Call::SetComputePipelineState(pipeline));
    }

    fn dispatch_thread_groups(
        &self,
        encoder: ComputeEncoderId,
        thread_groups: mtl::MTLSize,
        threads_per_group: mtl::MTLSize,
    ) {
        let copy = {
            let mut state = self.state.lock();
            state.calls.push(Call::DispatchThreadGroups {
                thread_groups,
                threads_per_group,
            });
            let bindings = match state.compute_bindings(encoder) {
                Some(bindings) => bindings,
                None => return,
            };
            let pipeline = bindings.pipeline;
            let src = bindings.buffers.get(&0).copied();
            let dst = bindings.buffers.get(&1).copied();
            let info = bindings.bytes.get(&2).cloned();
            let is_copy_kernel = match pipeline.and_then(|id| state.objects.get(&id.raw())) {
                Some(Object::ComputePipeline(name)) => name == super::device::COPY_BYTES_ENTRY_POINT,
                _ => false,
            };
            if !is_copy_kernel {
                return;
            }
            match (src, dst, info) {
                (Some(src), Some(dst), Some(info)) if info.len() >= 12 => {
                    let word = |index: usize| {
                        let mut bytes = [0u8; 4];
                        bytes.copy_from_slice(&info[index * 4..index * 4 + 4]);
                        u32::from_ne_bytes(bytes) as u64
                    };
                    Ok(Op::CopyBuffer {
                        src: src.0,
                        src_offset: src.1 + word(0),
                        dst: dst.0,
                        dst_offset: dst.1 + word(1),
                        size: word(2),
                    })
                }
                _ => Err("copy kernel dispatched without its arguments".to_string()),
            }
        };
        match copy {
            Ok(op) => self.state.lock().record_op(encoder.raw(), op),
            Err(message) => self.validation_error(message),
        }
    }

    fn dispatch_thread_groups_indirect(
        &self,
        _encoder: ComputeEncoderId,
        indirect_buffer: BufferId,
        indirect_buffer_offset: u64,
        _threads_per_group: mtl::MTLSize,
    ) {
        self.record(Call::DispatchThreadGroupsIndirect {
            indirect_buffer,
            indirect_buffer_offset,
        });
    }

    fn copy_from_buffer(
        &self,
        encoder: BlitEncoderId,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) {
        if src_offset % 4 != 0 || dst_offset % 4 != 0 || size % 4 != 0 {
            self.validation_error(format!(
                "blit copy {}+{} -> {}+{} is not 4-byte aligned",
                src_offset, size, dst_offset, size
            ));
        }
        let mut state = self.state.lock();
        state.calls.push(Call::CopyFromBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
        state.record_op(
            encoder.raw(),
            Op::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            },
        );
    }

    fn copy_from_buffer_to_texture(
        &self,
        encoder: BlitEncoderId,
        src: BufferId,
        src_offset: u64,
        src_bytes_per_row: u64,
        src_bytes_per_image: u64,
        src_size: mtl::MTLSize,
        dst: TextureId,
        dst_slice: u64,
        dst_level: u64,
        dst_origin: mtl::MTLOrigin,
    ) {
        let mut state = self.state.lock();
        state.calls.push(Call::CopyFromBufferToTexture {
            src,
            src_offset,
            dst,
            dst_slice,
            dst_level,
        });
        state.record_op(
            encoder.raw(),
            Op::BufferToTexture {
                src,
                src_offset,
                bytes_per_row: src_bytes_per_row,
                bytes_per_image: src_bytes_per_image,
                size: src_size,
                dst,
                slice: dst_slice,
                level: dst_level,
                origin: dst_origin,
            },
        );
    }

    fn copy_from_texture_to_buffer(
        &self,
        encoder: BlitEncoderId,
        src: TextureId,
        src_slice: u64,
        src_level: u64,
        src_origin: mtl::MTLOrigin,
        src_size: mtl::MTLSize,
        dst: BufferId,
        dst_offset: u64,
        dst_bytes_per_row: u64,
        dst_bytes_per_image: u64,
    ) {
        let mut state = self.state.lock();
        state.calls.push(Call::CopyFromTextureToBuffer {
            src,
            src_slice,
            src_level,
            dst,
            dst_offset,
        });
        state.record_op(
            encoder.raw(),
            Op::TextureToBuffer {
                src,
                slice: src_slice,
                level: src_level,
                origin: src_origin,
                size: src_size,
                dst,
                dst_offset,
                bytes_per_row: dst_bytes_per_row,
                bytes_per_image: dst_bytes_per_image,
            },
        );
    }

    fn copy_from_texture(
        &self,
        encoder: BlitEncoderId,
        src: TextureId,
        src_slice: u64,
        src_level: u64,
        src_origin: mtl::MTLOrigin,
        src_size: mtl::MTLSize,
        dst: TextureId,
        dst_slice: u64,
        dst_level: u64,
        dst_origin: mtl::MTLOrigin,
    ) {
        let mut state = self.state.lock();
        state.calls.push(Call::CopyFromTexture { src, dst });
        state.record_op(
            encoder.raw(),
            Op::CopyTexture {
                src,
                src_slice,
                src_level,
                src_origin,
                size: src_size,
                dst,
                dst_slice,
                dst_level,
                dst_origin,
            },
        );
    }

    fn generate_mipmaps(&self, _encoder: BlitEncoderId, texture: TextureId) {
        self.record(Call::GenerateMipmaps(texture));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metal::native::{Device as _, NativeObject as _};

    fn image_desc(format: mtl::MTLPixelFormat, width: u64, height: u64) -> mtl::TextureDescriptor {
        mtl::TextureDescriptor {
            texture_type: mtl::MTLTextureType::D2,
            pixel_format: format,
            width,
            height,
            depth: 1,
            mipmap_level_count: 1,
            array_length: 1,
            sample_count: 1,
            usage: mtl::MTLTextureUsage::SHADER_READ,
            storage_mode: mtl::MTLStorageMode::Private,
        }
    }

    #[test]
    fn blits_run_on_commit() {
        let device = SoftDevice::new(SoftDeviceConfig::default());
        let src = device.new_buffer(8, mtl::MTLStorageMode::Shared).unwrap();
        let dst = device.new_buffer(8, mtl::MTLStorageMode::Private).unwrap();
        device.write_buffer(src, 0, &[1, 2, 3, 4, 5, 6, 7, 8]);

        let cb = device.new_command_buffer(true);
        let blit = device.new_blit_command_encoder(cb);
        device.copy_from_buffer(blit, src, 4, dst, 0, 4);
        device.end_encoding(blit.raw());
        device.release(blit.raw());
        assert_eq!(device.buffer_contents(dst).unwrap(), vec![0; 8]);

        device.commit(cb);
        assert_eq!(device.buffer_contents(dst).unwrap(), vec![5, 6, 7, 8, 0, 0, 0, 0]);
        assert!(device.validation_errors().is_empty());
    }

    #[test]
    fn compressed_images_are_addressed_by_block() {
        let device = SoftDevice::new(SoftDeviceConfig::default());
        let texture = device
            .new_texture(&image_desc(mtl::MTLPixelFormat::BC1_RGBA, 8, 8))
            .unwrap();
        let staging = device.new_buffer(16, mtl::MTLStorageMode::Shared).unwrap();
        device.write_buffer(staging, 0, &[7; 16]);

        let cb = device.new_command_buffer(true);
        let blit = device.new_blit_command_encoder(cb);
        device.copy_from_buffer_to_texture(
            blit,
            staging,
            0,
            8,
            0,
            mtl::MTLSize::new(4, 8, 1),
            texture,
            0,
            0,
            mtl::MTLOrigin { x: 4, y: 0, z: 0 },
        );
        device.end_encoding(blit.raw());
        device.release(blit.raw());
        device.commit(cb);

        let image = device.texture_contents(texture, 0, 0).unwrap();
        // two rows of two 8-byte blocks, the right column written
        assert_eq!(&image[..8], &[0; 8]);
        assert_eq!(&image[8..16], &[7; 8]);
        assert_eq!(&image[16..24], &[0; 8]);
        assert_eq!(&image[24..32], &[7; 8]);
    }

    #[test]
    fn double_release_is_reported() {
        let device = SoftDevice::new(SoftDeviceConfig::default());
        let sampler = device
            .new_sampler(&mtl::SamplerDescriptor {
                address_modes: [mtl::MTLSamplerAddressMode::Repeat; 3],
                min_filter: mtl::MTLSamplerMinMagFilter::Linear,
                mag_filter: mtl::MTLSamplerMinMagFilter::Linear,
                mip_filter: mtl::MTLSamplerMipFilter::Linear,
                compare_function: None,
                max_anisotropy: 1,
                lod_min_clamp: 0.0,
                lod_max_clamp: 32.0,
                border_color: mtl::MTLSamplerBorderColor::TransparentBlack,
            })
            .unwrap();
        device.release(sampler.raw());
        device.release(sampler.raw());
        assert_eq!(device.invalid_releases(), 1);
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn sources_with_errors_fail_to_compile() {
        let device = SoftDevice::new(SoftDeviceConfig::default());
        assert!(device
            .new_library_with_source("#error unsupported\nvoid main() {}")
            .is_err());
        let library = device
            .new_library_with_source("vertex float4 vs_main() {}")
            .unwrap();
        assert!(device.get_function(library, "vs_main").is_some());
        assert!(device.get_function(library, "fs_main").is_none());
    }
}
