//! The surface of the Metal API that the backend calls through.
//!
//! Objects are addressed by copyable raw ids. Ownership is explicit: whoever
//! holds the id of an object it created is responsible for calling
//! [`Device::release`] exactly once, usually through [`Retained`].

use std::{fmt, num::NonZeroU64, sync::Arc};

use arrayvec::ArrayVec;
use bitflags::bitflags;

/// Untyped identity of any native object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawId(pub NonZeroU64);

pub trait NativeObject: Copy + fmt::Debug {
    fn raw(self) -> RawId;
}

macro_rules! native_ids {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
            pub struct $name(pub RawId);

            impl NativeObject for $name {
                fn raw(self) -> RawId {
                    self.0
                }
            }
        )*
    };
}

native_ids!(
    BufferId,
    TextureId,
    SamplerId,
    LibraryId,
    FunctionId,
    RenderPipelineId,
    ComputePipelineId,
    DepthStencilId,
    CommandBufferId,
    RenderEncoderId,
    BlitEncoderId,
    ComputeEncoderId,
    LayerId,
    DrawableId,
);

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLPixelFormat {
    Invalid,
    R8Unorm,
    R8Snorm,
    R8Uint,
    R8Sint,
    R16Unorm,
    R16Uint,
    R16Float,
    R32Uint,
    R32Sint,
    R32Float,
    RG8Unorm,
    RG16Float,
    RG32Float,
    RGBA8Unorm,
    RGBA8Unorm_sRGB,
    RGBA8Uint,
    BGRA8Unorm,
    BGRA8Unorm_sRGB,
    RGB10A2Unorm,
    RG11B10Float,
    RGBA16Float,
    RGBA32Uint,
    RGBA32Float,
    Depth16Unorm,
    Depth32Float,
    Depth24Unorm_Stencil8,
    Depth32Float_Stencil8,
    BC1_RGBA,
    BC1_RGBA_sRGB,
    BC2_RGBA,
    BC3_RGBA,
    BC4_RUnorm,
    BC5_RGUnorm,
    BC7_RGBAUnorm,
    BC7_RGBAUnorm_sRGB,
    ETC2_RGB8,
    EAC_RGBA8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLGPUFamily {
    Apple1,
    Apple2,
    Apple3,
    Apple4,
    Apple5,
    Apple6,
    Apple7,
    Mac1,
    Mac2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLStorageMode {
    Shared,
    Managed,
    Private,
    Memoryless,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLTextureType {
    D1,
    D1Array,
    D2,
    D2Array,
    D2Multisample,
    Cube,
    CubeArray,
    D3,
}

bitflags!(
    pub struct MTLTextureUsage: u8 {
        const SHADER_READ = 1;
        const SHADER_WRITE = 2;
        const RENDER_TARGET = 4;
        const PIXEL_FORMAT_VIEW = 8;
    }
);

bitflags!(
    pub struct MTLColorWriteMask: u8 {
        const RED = 8;
        const GREEN = 4;
        const BLUE = 2;
        const ALPHA = 1;
    }
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLLoadAction {
    DontCare,
    Load,
    Clear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLStoreAction {
    DontCare,
    Store,
    MultisampleResolve,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLPrimitiveType {
    Point,
    Line,
    LineStrip,
    Triangle,
    TriangleStrip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLIndexType {
    UInt16,
    UInt32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLCullMode {
    None,
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLWinding {
    Clockwise,
    CounterClockwise,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLTriangleFillMode {
    Fill,
    Lines,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLDepthClipMode {
    Clip,
    Clamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLCompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLStencilOperation {
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLBlendFactor {
    Zero,
    One,
    SourceColor,
    OneMinusSourceColor,
    SourceAlpha,
    OneMinusSourceAlpha,
    DestinationColor,
    OneMinusDestinationColor,
    DestinationAlpha,
    OneMinusDestinationAlpha,
    BlendColor,
    OneMinusBlendColor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLBlendOperation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLSamplerAddressMode {
    Repeat,
    MirrorRepeat,
    ClampToEdge,
    ClampToBorderColor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLSamplerMinMagFilter {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLSamplerMipFilter {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLSamplerBorderColor {
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLVertexFormat {
    Float,
    Float2,
    Float3,
    Float4,
    Char4Normalized,
    UChar4Normalized,
    Short2,
    UInt,
    UInt2,
    UInt4,
    Int,
    Int4,
    Half4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MTLVertexStepFunction {
    PerVertex,
    PerInstance,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MTLOrigin {
    pub x: u64,
    pub y: u64,
    pub z: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MTLSize {
    pub width: u64,
    pub height: u64,
    pub depth: u64,
}

impl MTLSize {
    pub const fn new(width: u64, height: u64, depth: u64) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MTLViewport {
    pub origin_x: f64,
    pub origin_y: f64,
    pub width: f64,
    pub height: f64,
    pub znear: f64,
    pub zfar: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MTLScissorRect {
    pub x: u64,
    pub y: u64,
    pub width: u64,
    pub height: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MTLClearColor {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub alpha: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureDescriptor {
    pub texture_type: MTLTextureType,
    pub pixel_format: MTLPixelFormat,
    pub width: u64,
    pub height: u64,
    pub depth: u64,
    pub mipmap_level_count: u64,
    pub array_length: u64,
    pub sample_count: u64,
    pub usage: MTLTextureUsage,
    pub storage_mode: MTLStorageMode,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SamplerDescriptor {
    pub address_modes: [MTLSamplerAddressMode; 3],
    pub min_filter: MTLSamplerMinMagFilter,
    pub mag_filter: MTLSamplerMinMagFilter,
    pub mip_filter: MTLSamplerMipFilter,
    pub compare_function: Option<MTLCompareFunction>,
    pub max_anisotropy: u64,
    pub lod_min_clamp: f32,
    pub lod_max_clamp: f32,
    pub border_color: MTLSamplerBorderColor,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorAttachmentDescriptor {
    pub texture: TextureId,
    pub level: u64,
    pub slice: u64,
    pub load_action: MTLLoadAction,
    pub store_action: MTLStoreAction,
    pub clear_color: MTLClearColor,
    pub resolve_texture: Option<TextureId>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthAttachmentDescriptor {
    pub texture: TextureId,
    pub level: u64,
    pub slice: u64,
    pub load_action: MTLLoadAction,
    pub store_action: MTLStoreAction,
    pub clear_depth: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StencilAttachmentDescriptor {
    pub texture: TextureId,
    pub level: u64,
    pub slice: u64,
    pub load_action: MTLLoadAction,
    pub store_action: MTLStoreAction,
    pub clear_stencil: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderPassDescriptor {
    pub color_attachments: ArrayVec<ColorAttachmentDescriptor, { crate::MAX_COLOR_TARGETS }>,
    pub depth_attachment: Option<DepthAttachmentDescriptor>,
    pub stencil_attachment: Option<StencilAttachmentDescriptor>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorAttachmentPipelineDescriptor {
    pub pixel_format: MTLPixelFormat,
    pub write_mask: MTLColorWriteMask,
    pub blending_enabled: bool,
    pub rgb_blend_operation: MTLBlendOperation,
    pub alpha_blend_operation: MTLBlendOperation,
    pub source_rgb_blend_factor: MTLBlendFactor,
    pub source_alpha_blend_factor: MTLBlendFactor,
    pub destination_rgb_blend_factor: MTLBlendFactor,
    pub destination_alpha_blend_factor: MTLBlendFactor,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VertexAttributeDescriptor {
    pub format: MTLVertexFormat,
    pub offset: u64,
    pub buffer_index: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VertexBufferLayoutDescriptor {
    pub stride: u64,
    pub step_function: MTLVertexStepFunction,
    pub step_rate: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderPipelineDescriptor {
    pub vertex_function: FunctionId,
    pub fragment_function: Option<FunctionId>,
    pub vertex_attributes: Vec<VertexAttributeDescriptor>,
    pub vertex_layouts: Vec<VertexBufferLayoutDescriptor>,
    pub color_attachments: Vec<ColorAttachmentPipelineDescriptor>,
    pub depth_attachment_pixel_format: MTLPixelFormat,
    pub stencil_attachment_pixel_format: MTLPixelFormat,
    pub sample_count: u64,
    pub alpha_to_coverage_enabled: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StencilDescriptor {
    pub stencil_failure_operation: MTLStencilOperation,
    pub depth_failure_operation: MTLStencilOperation,
    pub depth_stencil_pass_operation: MTLStencilOperation,
    pub stencil_compare_function: MTLCompareFunction,
    pub read_mask: u32,
    pub write_mask: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthStencilDescriptor {
    pub depth_compare_function: MTLCompareFunction,
    pub depth_write_enabled: bool,
    pub front_face_stencil: Option<StencilDescriptor>,
    pub back_face_stencil: Option<StencilDescriptor>,
}

/// Where a resource bind lands: a render encoder stage or a compute encoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindTarget {
    Vertex(RenderEncoderId),
    Fragment(RenderEncoderId),
    Compute(ComputeEncoderId),
}

pub type CompletedHandler = Box<dyn FnOnce() + Send + 'static>;

/// A Metal device together with its command queue.
pub trait Device: fmt::Debug + Send + Sync {
    fn name(&self) -> String;
    fn supports_family(&self, family: MTLGPUFamily) -> bool;
    fn supports_depth24_stencil8(&self) -> bool;
    fn max_buffers_per_stage(&self) -> u32;

    /// Releases one ownership of `object`.
    fn release(&self, object: RawId);
    fn set_label(&self, object: RawId, label: &str);

    fn new_buffer(&self, length: u64, storage_mode: MTLStorageMode) -> Option<BufferId>;
    /// Writes through the CPU mapping of a shared or managed buffer.
    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]);
    fn read_buffer(&self, buffer: BufferId, offset: u64, data: &mut [u8]);
    fn new_texture(&self, desc: &TextureDescriptor) -> Option<TextureId>;
    fn new_sampler(&self, desc: &SamplerDescriptor) -> Option<SamplerId>;
    fn new_library_with_source(&self, source: &str) -> Result<LibraryId, String>;
    fn get_function(&self, library: LibraryId, name: &str) -> Option<FunctionId>;
    fn new_render_pipeline_state(
        &self,
        desc: &RenderPipelineDescriptor,
    ) -> Result<RenderPipelineId, String>;
    fn new_compute_pipeline_state(&self, function: FunctionId)
        -> Result<ComputePipelineId, String>;
    fn new_depth_stencil_state(&self, desc: &DepthStencilDescriptor) -> DepthStencilId;

    fn next_drawable(&self, layer: LayerId) -> Option<DrawableId>;
    fn drawable_texture(&self, drawable: DrawableId) -> TextureId;
    fn set_drawable_size(&self, layer: LayerId, width: u64, height: u64);

    fn new_command_buffer(&self, retain_references: bool) -> CommandBufferId;
    fn add_completed_handler(&self, command_buffer: CommandBufferId, handler: CompletedHandler);
    fn present_drawable(&self, command_buffer: CommandBufferId, drawable: DrawableId);
    fn commit(&self, command_buffer: CommandBufferId);

    fn new_render_command_encoder(
        &self,
        command_buffer: CommandBufferId,
        desc: &RenderPassDescriptor,
    ) -> RenderEncoderId;
    fn new_blit_command_encoder(&self, command_buffer: CommandBufferId) -> BlitEncoderId;
    fn new_compute_command_encoder(&self, command_buffer: CommandBufferId) -> ComputeEncoderId;
    fn end_encoding(&self, encoder: RawId);

    /// Debug groups apply to encoders and command buffers alike.
    fn push_debug_group(&self, target: RawId, label: &str);
    fn pop_debug_group(&self, target: RawId);
    fn insert_debug_signpost(&self, target: RawId, label: &str);

    fn set_buffer(&self, target: BindTarget, index: u64, buffer: BufferId, offset: u64);
    fn set_buffer_offset(&self, target: BindTarget, index: u64, offset: u64);
    fn set_bytes(&self, target: BindTarget, index: u64, data: &[u8]);
    fn set_texture(&self, target: BindTarget, index: u64, texture: TextureId);
    fn set_sampler_state(&self, target: BindTarget, index: u64, sampler: SamplerId);

    fn set_render_pipeline_state(&self, encoder: RenderEncoderId, pipeline: RenderPipelineId);
    fn set_cull_mode(&self, encoder: RenderEncoderId, mode: MTLCullMode);
    fn set_front_facing_winding(&self, encoder: RenderEncoderId, winding: MTLWinding);
    fn set_triangle_fill_mode(&self, encoder: RenderEncoderId, mode: MTLTriangleFillMode);
    fn set_blend_color(&self, encoder: RenderEncoderId, color: [f32; 4]);
    fn set_depth_stencil_state(&self, encoder: RenderEncoderId, state: DepthStencilId);
    fn set_depth_clip_mode(&self, encoder: RenderEncoderId, mode: MTLDepthClipMode);
    fn set_stencil_reference_value(&self, encoder: RenderEncoderId, value: u32);
    fn set_viewport(&self, encoder: RenderEncoderId, viewport: MTLViewport);
    fn set_viewports(&self, encoder: RenderEncoderId, viewports: &[MTLViewport]);
    fn set_scissor_rect(&self, encoder: RenderEncoderId, rect: MTLScissorRect);
    fn set_scissor_rects(&self, encoder: RenderEncoderId, rects: &[MTLScissorRect]);

    fn draw_primitives(
        &self,
        encoder: RenderEncoderId,
        primitive_type: MTLPrimitiveType,
        vertex_start: u64,
        vertex_count: u64,
    );
    fn draw_primitives_instanced(
        &self,
        encoder: RenderEncoderId,
        primitive_type: MTLPrimitiveType,
        vertex_start: u64,
        vertex_count: u64,
        instance_count: u64,
    );
    fn draw_primitives_instanced_base_instance(
        &self,
        encoder: RenderEncoderId,
        primitive_type: MTLPrimitiveType,
        vertex_start: u64,
        vertex_count: u64,
        instance_count: u64,
        base_instance: u64,
    );
    fn draw_indexed_primitives(
        &self,
        encoder: RenderEncoderId,
        primitive_type: MTLPrimitiveType,
        index_count: u64,
        index_type: MTLIndexType,
        index_buffer: BufferId,
        index_buffer_offset: u64,
    );
    fn draw_indexed_primitives_instanced(
        &self,
        encoder: RenderEncoderId,
        primitive_type: MTLPrimitiveType,
        index_count: u64,
        index_type: MTLIndexType,
        index_buffer: BufferId,
        index_buffer_offset: u64,
        instance_count: u64,
    );
    fn draw_indexed_primitives_instanced_base_instance(
        &self,
        encoder: RenderEncoderId,
        primitive_type: MTLPrimitiveType,
        index_count: u64,
        index_type: MTLIndexType,
        index_buffer: BufferId,
        index_buffer_offset: u64,
        instance_count: u64,
        base_vertex: i64,
        base_instance: u64,
    );
    fn draw_primitives_indirect(
        &self,
        encoder: RenderEncoderId,
        primitive_type: MTLPrimitiveType,
        indirect_buffer: BufferId,
        indirect_buffer_offset: u64,
    );
    fn draw_indexed_primitives_indirect(
        &self,
        encoder: RenderEncoderId,
        primitive_type: MTLPrimitiveType,
        index_type: MTLIndexType,
        index_buffer: BufferId,
        index_buffer_offset: u64,
        indirect_buffer: BufferId,
        indirect_buffer_offset: u64,
    );

    fn set_compute_pipeline_state(&self, encoder: ComputeEncoderId, pipeline: ComputePipelineId);
    fn dispatch_thread_groups(
        &self,
        encoder: ComputeEncoderId,
        thread_groups: MTLSize,
        threads_per_group: MTLSize,
    );
    fn dispatch_thread_groups_indirect(
        &self,
        encoder: ComputeEncoderId,
        indirect_buffer: BufferId,
        indirect_buffer_offset: u64,
        threads_per_group: MTLSize,
    );

    fn copy_from_buffer(
        &self,
        encoder: BlitEncoderId,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    );
    fn copy_from_buffer_to_texture(
        &self,
        encoder: BlitEncoderId,
        src: BufferId,
        src_offset: u64,
        src_bytes_per_row: u64,
        src_bytes_per_image: u64,
        src_size: MTLSize,
        dst: TextureId,
        dst_slice: u64,
        dst_level: u64,
        dst_origin: MTLOrigin,
    );
    fn copy_from_texture_to_buffer(
        &self,
        encoder: BlitEncoderId,
        src: TextureId,
        src_slice: u64,
        src_level: u64,
        src_origin: MTLOrigin,
        src_size: MTLSize,
        dst: BufferId,
        dst_offset: u64,
        dst_bytes_per_row: u64,
        dst_bytes_per_image: u64,
    );
    fn copy_from_texture(
        &self,
        encoder: BlitEncoderId,
        src: TextureId,
        src_slice: u64,
        src_level: u64,
        src_origin: MTLOrigin,
        src_size: MTLSize,
        dst: TextureId,
        dst_slice: u64,
        dst_level: u64,
        dst_origin: MTLOrigin,
    );
    fn generate_mipmaps(&self, encoder: BlitEncoderId, texture: TextureId);
}

/// Sole ownership of a native object, released exactly once.
///
/// Not `Clone`: transferring ownership moves the token.
#[derive(Debug)]
pub struct Retained<T: NativeObject> {
    id: T,
    device: Arc<dyn Device>,
    released: bool,
}

impl<T: NativeObject> Retained<T> {
    /// Takes ownership of a freshly created object.
    pub fn new(device: &Arc<dyn Device>, id: T) -> Self {
        Self {
            id,
            device: Arc::clone(device),
            released: false,
        }
    }

    pub fn id(&self) -> T {
        self.id
    }

    /// Hands ownership over to the caller without releasing.
    pub fn into_raw(mut self) -> T {
        self.released = true;
        self.id
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.device.release(self.id.raw());
        }
    }
}

impl<T: NativeObject> Drop for Retained<T> {
    fn drop(&mut self) {
        self.release_once();
    }
}
