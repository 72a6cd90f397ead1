/*! This library describes a command recording and execution engine that
 *  sits on top of native graphics APIs.
 *
 *  The public surface is shared by every backend:
 *  - Backend selection is done at compile time through the [`Api`] trait.
 *  - Resources are wrapped objects owning exactly one native handle and are
 *    shared through `Arc`. Disposal is explicit and idempotent.
 *  - Command lists validate caller contracts and report violations as
 *    [`CommandError`]. A frame whose swapchain image is not available is
 *    not an error; draws against it are skipped.
 *  - Native state is diffed against what has already been bound, so
 *    redundant native calls are not issued.
 *
 *  The native graphics APIs themselves are reached through narrow binding
 *  traits (`metal::native::Device`, `gles::native::Context`), so the engine
 *  can be driven by a real driver binding or by the software bindings used
 *  by the test-suite.
 */

#![allow(
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Redundant matching is more explicit.
    clippy::redundant_pattern_matching,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
    // Backend operations mirror native entry points.
    clippy::too_many_arguments,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
)]

mod cache;
mod fence;
pub mod format;
mod track;

#[cfg(feature = "gles")]
pub mod gles;
#[cfg(feature = "metal")]
pub mod metal;

use std::{
    borrow::Cow,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use bitflags::bitflags;
use thiserror::Error;

pub use fence::Fence;
pub use format::{FormatDescription, PixelFormat};

/// Maximum number of color attachments in a framebuffer.
pub const MAX_COLOR_TARGETS: usize = 8;
/// Maximum number of viewports and scissor rectangles tracked per command list.
pub const MAX_VIEWPORTS: usize = 16;
/// Maximum number of vertex buffer slots.
pub const MAX_VERTEX_BUFFERS: usize = 16;
/// Maximum number of resource sets a pipeline can reference.
pub const MAX_RESOURCE_SETS: usize = 8;
/// Alignment required by native buffer copy primitives, in bytes.
pub const COPY_BUFFER_ALIGNMENT: BufferAddress = 4;

pub type Label<'a> = Option<&'a str>;
pub type BufferAddress = u64;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum DeviceError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("device is lost")]
    Lost,
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum ResourceError {
    #[error("format {format:?} does not support {usage:?} on this device")]
    UnsupportedFormat {
        format: PixelFormat,
        usage: TextureUsage,
    },
    #[error("invalid description: {0}")]
    InvalidDescription(String),
    #[error("resource {index} does not match its layout element, expected {expected:?}")]
    KindMismatch { index: usize, expected: ResourceKind },
    #[error("layout declares {expected} elements but {actual} resources were given")]
    ResourceCount { expected: usize, actual: usize },
    #[error("{0} is not CPU-accessible, it must be created with staging usage")]
    NotStaging(&'static str),
    #[error("{0} has been disposed")]
    Disposed(&'static str),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum ShaderError {
    #[error("compilation failed: {0}")]
    Compilation(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum PipelineError {
    #[error("compilation failed for stage {stage:?}: {message}")]
    Compilation {
        stage: ShaderStages,
        message: String,
    },
    #[error("linkage failed: {0}")]
    Linkage(String),
    #[error("too many resource layouts: {0}")]
    TooManyResourceLayouts(usize),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Caller contract violations detected while recording or submitting.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum CommandError {
    #[error("command list is not recording, call `begin` first")]
    NotRecording,
    #[error("command list has not been ended")]
    NotEnded,
    #[error("no {0} pipeline is bound")]
    NoPipeline(&'static str),
    #[error("no framebuffer is bound")]
    NoFramebuffer,
    #[error("no index buffer is bound")]
    NoIndexBuffer,
    #[error("no resource set is bound at slot {0}")]
    MissingResourceSet(u32),
    #[error("{0} is not supported by this device")]
    Unsupported(&'static str),
    #[error("{0}")]
    MissingUsage(&'static str),
    #[error("{what} slot {slot} is out of range")]
    SlotOutOfRange { what: &'static str, slot: u32 },
    #[error("resource set at slot {0} is incompatible with the pipeline's resource layout")]
    IncompatibleResourceSet(u32),
    #[error("expected {expected} dynamic offsets, got {actual}")]
    DynamicOffsetCount { expected: usize, actual: usize },
    #[error("color target {0} is out of range for the bound framebuffer")]
    ColorTargetOutOfRange(u32),
    #[error("the bound framebuffer has no depth target")]
    NoDepthTarget,
    #[error("pop_debug_group called without a matching push")]
    UnbalancedDebugGroup,
    #[error("invalid copy: {0}")]
    InvalidCopy(String),
    #[error("{0} has been disposed")]
    Disposed(&'static str),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl From<ResourceError> for CommandError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::Disposed(what) => Self::Disposed(what),
            ResourceError::Device(err) => Self::Device(err),
            other => Self::InvalidCopy(other.to_string()),
        }
    }
}

impl From<CommandError> for ResourceError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Disposed(what) => Self::Disposed(what),
            CommandError::Device(err) => Self::Device(err),
            other => Self::InvalidDescription(other.to_string()),
        }
    }
}

/// Engine-wide settings chosen when a device is opened.
#[derive(Clone, Debug)]
pub struct DeviceOptions {
    /// Attach labels to native command buffers and encoders.
    pub debug: bool,
    /// Let the native command buffers retain the resources they reference.
    pub retain_command_buffer_references: bool,
    /// Back swapchain depth targets with memoryless storage where available.
    pub prefer_memoryless_depth: bool,
    /// Number of idle staging buffers kept around for reuse.
    pub staging_pool_capacity: usize,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            debug: cfg!(debug_assertions),
            retain_command_buffer_references: true,
            prefer_memoryless_depth: true,
            staging_pool_capacity: 16,
        }
    }
}

impl DeviceOptions {
    /// Defaults, overridden by `GFX_EXEC_DEBUG`, `GFX_EXEC_RETAIN_REFERENCES`
    /// and `GFX_EXEC_STAGING_POOL` when they are set.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(debug) = bool_from_env("GFX_EXEC_DEBUG") {
            options.debug = debug;
        }
        if let Some(retain) = bool_from_env("GFX_EXEC_RETAIN_REFERENCES") {
            options.retain_command_buffer_references = retain;
        }
        if let Some(capacity) = std::env::var("GFX_EXEC_STAGING_POOL")
            .ok()
            .and_then(|value| value.trim().parse().ok())
        {
            options.staging_pool_capacity = capacity;
        }
        options
    }
}

fn bool_from_env(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}

pub trait Api: Clone + Sized + 'static {
    type Device: Device<Self>;
    type CommandList: CommandList<Self>;

    type Buffer: Dispose + fmt::Debug + Send + Sync + 'static;
    type Texture: Dispose + fmt::Debug + Send + Sync + 'static;
    type Sampler: Dispose + fmt::Debug + Send + Sync + 'static;
    type Shader: Dispose + fmt::Debug + Send + Sync;
    type ResourceLayout: fmt::Debug + Send + Sync;
    type ResourceSet: Dispose + fmt::Debug + Send + Sync;
    type Pipeline: Dispose + fmt::Debug + Send + Sync;
    type Framebuffer: Dispose + fmt::Debug + Send + Sync;
    type Swapchain: Swapchain<Self> + fmt::Debug + Send + Sync;
}

/// A presentable surface and the framebuffer that renders into it.
pub trait Swapchain<A: Api> {
    /// Framebuffer whose color target is the current presentable image.
    fn framebuffer(&self) -> &Arc<A::Framebuffer>;
    fn resize(&self, width: u32, height: u32);
}

/// Explicit, idempotent release of the native object owned by a wrapper.
pub trait Dispose {
    /// Releases the native handle. Calling this more than once is a no-op.
    fn dispose(&self);
    fn is_disposed(&self) -> bool;
}

pub trait Device<A: Api> {
    fn create_buffer(&self, desc: &BufferDescription) -> Result<A::Buffer, ResourceError>;
    fn create_texture(&self, desc: &TextureDescription) -> Result<A::Texture, ResourceError>;
    fn create_sampler(&self, desc: &SamplerDescription) -> Result<A::Sampler, DeviceError>;
    fn create_shader(&self, desc: &ShaderDescription) -> Result<A::Shader, ShaderError>;
    fn create_resource_layout(
        &self,
        desc: &ResourceLayoutDescription,
    ) -> Result<A::ResourceLayout, ResourceError>;
    fn create_resource_set(
        &self,
        desc: &ResourceSetDescription<A>,
    ) -> Result<A::ResourceSet, ResourceError>;
    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescription<A>,
    ) -> Result<A::Pipeline, PipelineError>;
    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDescription<A>,
    ) -> Result<A::Pipeline, PipelineError>;
    fn create_framebuffer(
        &self,
        desc: &FramebufferDescription<A>,
    ) -> Result<A::Framebuffer, ResourceError>;
    fn create_command_list(&self) -> Result<A::CommandList, DeviceError>;
    fn create_swapchain(&self, desc: &SwapchainDescription) -> Result<A::Swapchain, ResourceError>;

    /// Submits an ended command list for execution.
    ///
    /// `fence`, if given, is set once the GPU has finished the work.
    fn submit_commands(
        &self,
        list: &mut A::CommandList,
        fence: Option<&Arc<Fence>>,
    ) -> Result<(), CommandError>;

    /// Uploads `data` into `buffer` at `offset`, outside of any command list.
    fn update_buffer(
        &self,
        buffer: &A::Buffer,
        offset: BufferAddress,
        data: &[u8],
    ) -> Result<(), ResourceError>;
    /// Uploads tightly packed texel data into one subresource region.
    fn update_texture(
        &self,
        texture: &A::Texture,
        region: &TextureRegion,
        data: &[u8],
    ) -> Result<(), ResourceError>;
    /// Reads back from a staging buffer.
    fn read_buffer(
        &self,
        buffer: &A::Buffer,
        offset: BufferAddress,
        data: &mut [u8],
    ) -> Result<(), ResourceError>;
    /// Reads a region of a staging texture into tightly packed `data`.
    fn read_texture(
        &self,
        texture: &A::Texture,
        region: &TextureRegion,
        data: &mut [u8],
    ) -> Result<(), ResourceError>;

    /// Presents the current image of `swapchain`, if one was acquired.
    fn present(&self, swapchain: &A::Swapchain) -> Result<(), DeviceError>;

    fn format_support(&self, format: PixelFormat) -> FormatSupport;

    /// Blocks until every submitted command list has completed.
    fn wait_for_idle(&self, timeout: Duration) -> bool;
}

pub trait CommandList<A: Api> {
    /// Starts a new recording cycle. All cached binding state is reset.
    fn begin(&mut self) -> Result<(), CommandError>;
    /// Finishes recording. Pending clears are never dropped.
    fn end(&mut self) -> Result<(), CommandError>;

    fn set_pipeline(&mut self, pipeline: &Arc<A::Pipeline>) -> Result<(), CommandError>;
    fn set_framebuffer(&mut self, framebuffer: &Arc<A::Framebuffer>) -> Result<(), CommandError>;
    fn set_viewport(&mut self, index: u32, viewport: &Viewport) -> Result<(), CommandError>;
    fn set_scissor_rect(&mut self, index: u32, rect: &ScissorRect) -> Result<(), CommandError>;
    fn set_vertex_buffer(
        &mut self,
        index: u32,
        buffer: &A::Buffer,
        offset: BufferAddress,
    ) -> Result<(), CommandError>;
    fn set_index_buffer(
        &mut self,
        buffer: &A::Buffer,
        format: IndexFormat,
        offset: BufferAddress,
    ) -> Result<(), CommandError>;
    fn set_graphics_resource_set(
        &mut self,
        slot: u32,
        set: &Arc<A::ResourceSet>,
        dynamic_offsets: &[u32],
    ) -> Result<(), CommandError>;
    fn set_compute_resource_set(
        &mut self,
        slot: u32,
        set: &Arc<A::ResourceSet>,
        dynamic_offsets: &[u32],
    ) -> Result<(), CommandError>;

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        vertex_start: u32,
        instance_start: u32,
    ) -> Result<(), CommandError>;
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        index_start: u32,
        vertex_offset: i32,
        instance_start: u32,
    ) -> Result<(), CommandError>;
    fn draw_indirect(
        &mut self,
        buffer: &A::Buffer,
        offset: BufferAddress,
        draw_count: u32,
        stride: u32,
    ) -> Result<(), CommandError>;
    fn draw_indexed_indirect(
        &mut self,
        buffer: &A::Buffer,
        offset: BufferAddress,
        draw_count: u32,
        stride: u32,
    ) -> Result<(), CommandError>;
    fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32)
        -> Result<(), CommandError>;
    fn dispatch_indirect(
        &mut self,
        buffer: &A::Buffer,
        offset: BufferAddress,
    ) -> Result<(), CommandError>;

    fn copy_buffer(
        &mut self,
        src: &A::Buffer,
        src_offset: BufferAddress,
        dst: &A::Buffer,
        dst_offset: BufferAddress,
        size: BufferAddress,
    ) -> Result<(), CommandError>;
    fn copy_texture(
        &mut self,
        src: &A::Texture,
        dst: &A::Texture,
        copy: &TextureCopy,
    ) -> Result<(), CommandError>;
    fn update_buffer(
        &mut self,
        buffer: &A::Buffer,
        offset: BufferAddress,
        data: &[u8],
    ) -> Result<(), CommandError>;
    fn resolve_texture(&mut self, src: &A::Texture, dst: &A::Texture) -> Result<(), CommandError>;
    fn generate_mipmaps(&mut self, texture: &A::Texture) -> Result<(), CommandError>;

    fn clear_color_target(&mut self, index: u32, color: Color) -> Result<(), CommandError>;
    fn clear_depth_stencil(&mut self, depth: f32, stencil: u8) -> Result<(), CommandError>;

    fn push_debug_group(&mut self, label: &str) -> Result<(), CommandError>;
    fn pop_debug_group(&mut self) -> Result<(), CommandError>;
    fn insert_debug_marker(&mut self, label: &str) -> Result<(), CommandError>;
}

bitflags!(
    pub struct ShaderStages: u8 {
        const VERTEX = 1;
        const FRAGMENT = 2;
        const COMPUTE = 4;
        const GRAPHICS = Self::VERTEX.bits | Self::FRAGMENT.bits;
    }
);

bitflags!(
    pub struct BufferUsage: u16 {
        const VERTEX = 1;
        const INDEX = 2;
        const UNIFORM = 4;
        const STRUCTURED_READ_ONLY = 8;
        const STRUCTURED_READ_WRITE = 16;
        const INDIRECT = 32;
        /// Updated frequently from the CPU.
        const DYNAMIC = 64;
        /// CPU-accessible, used for uploads and read-backs.
        const STAGING = 128;
    }
);

bitflags!(
    pub struct TextureUsage: u16 {
        const SAMPLED = 1;
        const STORAGE = 2;
        const RENDER_TARGET = 4;
        const DEPTH_STENCIL = 8;
        const CUBEMAP = 16;
        /// No native image, backed by a linear CPU-accessible buffer.
        const STAGING = 32;
        const GENERATE_MIPMAPS = 64;
    }
);

bitflags!(
    pub struct ResourceLayoutElementOptions: u8 {
        /// Takes a caller-supplied byte offset at bind time.
        const DYNAMIC_BINDING = 1;
    }
);

bitflags!(
    /// What a pixel format can be used for on a given device.
    pub struct FormatSupport: u8 {
        const SAMPLED = 1;
        const STORAGE = 2;
        const RENDER_TARGET = 4;
        const DEPTH_STENCIL = 8;
        const STAGING = 16;
    }
);

impl FormatSupport {
    /// The capability a texture usage needs from its format.
    pub fn required_for(usage: TextureUsage) -> Self {
        let mut required = Self::empty();
        required.set(Self::SAMPLED, usage.contains(TextureUsage::SAMPLED));
        required.set(Self::STORAGE, usage.contains(TextureUsage::STORAGE));
        required.set(
            Self::RENDER_TARGET,
            usage.contains(TextureUsage::RENDER_TARGET),
        );
        required.set(
            Self::DEPTH_STENCIL,
            usage.contains(TextureUsage::DEPTH_STENCIL),
        );
        required.set(Self::STAGING, usage.contains(TextureUsage::STAGING));
        required
    }
}

bitflags!(
    pub struct ColorWriteMask: u8 {
        const RED = 1;
        const GREEN = 2;
        const BLUE = 4;
        const ALPHA = 8;
        const ALL = Self::RED.bits | Self::GREEN.bits | Self::BLUE.bits | Self::ALPHA.bits;
    }
);

/// Class of a resource-layout element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    UniformBuffer,
    StructuredBufferReadOnly,
    StructuredBufferReadWrite,
    TextureReadOnly,
    TextureReadWrite,
    Sampler,
}

impl ResourceKind {
    pub fn is_buffer(self) -> bool {
        match self {
            Self::UniformBuffer | Self::StructuredBufferReadOnly | Self::StructuredBufferReadWrite => {
                true
            }
            _ => false,
        }
    }

    pub fn is_texture(self) -> bool {
        match self {
            Self::TextureReadOnly | Self::TextureReadWrite => true,
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    UInt16,
    UInt32,
}

impl IndexFormat {
    pub fn size(self) -> BufferAddress {
        match self {
            Self::UInt16 => 2,
            Self::UInt32 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaceCullMode {
    None,
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrontFace {
    Clockwise,
    CounterClockwise,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PolygonFillMode {
    Solid,
    Wireframe,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComparisonKind {
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
pub enum BlendFactor {
    Zero,
    One,
    SourceAlpha,
    InverseSourceAlpha,
    DestinationAlpha,
    InverseDestinationAlpha,
    SourceColor,
    InverseSourceColor,
    DestinationColor,
    InverseDestinationColor,
    BlendFactor,
    InverseBlendFactor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFunction {
    Add,
    Subtract,
    ReverseSubtract,
    Minimum,
    Maximum,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StencilOperation {
    Keep,
    Zero,
    Replace,
    IncrementAndClamp,
    DecrementAndClamp,
    Invert,
    IncrementAndWrap,
    DecrementAndWrap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplerAddressMode {
    Wrap,
    Mirror,
    Clamp,
    Border,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplerBorderColor {
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureType {
    D1,
    D2,
    D3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexElementFormat {
    Float1,
    Float2,
    Float3,
    Float4,
    Byte4Norm,
    UByte4Norm,
    Short2,
    UInt1,
    UInt2,
    UInt4,
    Int1,
    Int4,
    Half4,
}

impl VertexElementFormat {
    pub fn size(self) -> u32 {
        match self {
            Self::Float1 | Self::UInt1 | Self::Int1 | Self::Byte4Norm | Self::UByte4Norm => 4,
            Self::Short2 => 4,
            Self::Float2 | Self::UInt2 | Self::Half4 => 8,
            Self::Float3 => 12,
            Self::Float4 | Self::UInt4 | Self::Int4 => 16,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    pub const RED: Self = Self::new(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Self = Self::new(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Self = Self::new(0.0, 0.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Origin3d {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Origin3d {
    pub const ZERO: Self = Self { x: 0, y: 0, z: 0 };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BufferDescription<'a> {
    pub label: Label<'a>,
    pub size: BufferAddress,
    pub usage: BufferUsage,
    /// Element stride of structured buffers, zero otherwise.
    pub structure_byte_stride: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureDescription<'a> {
    pub label: Label<'a>,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: PixelFormat,
    pub usage: TextureUsage,
    pub texture_type: TextureType,
    pub sample_count: u32,
}

impl<'a> TextureDescription<'a> {
    pub fn texture_2d(
        width: u32,
        height: u32,
        mip_levels: u32,
        array_layers: u32,
        format: PixelFormat,
        usage: TextureUsage,
    ) -> Self {
        Self {
            label: None,
            width,
            height,
            depth: 1,
            mip_levels,
            array_layers,
            format,
            usage,
            texture_type: TextureType::D2,
            sample_count: 1,
        }
    }

    pub fn texture_3d(
        width: u32,
        height: u32,
        depth: u32,
        mip_levels: u32,
        format: PixelFormat,
        usage: TextureUsage,
    ) -> Self {
        Self {
            depth,
            texture_type: TextureType::D3,
            ..Self::texture_2d(width, height, mip_levels, 1, format, usage)
        }
    }

    /// Number of 2D images per mip level: cube faces count individually.
    pub fn layer_count(&self) -> u32 {
        if self.usage.contains(TextureUsage::CUBEMAP) {
            self.array_layers * 6
        } else {
            self.array_layers
        }
    }

    pub fn is_staging(&self) -> bool {
        self.usage.contains(TextureUsage::STAGING)
    }

    /// Copy of the description that can outlive its label.
    pub(crate) fn to_unlabeled(&self) -> TextureDescription<'static> {
        TextureDescription {
            label: None,
            width: self.width,
            height: self.height,
            depth: self.depth,
            mip_levels: self.mip_levels,
            array_layers: self.array_layers,
            format: self.format,
            usage: self.usage,
            texture_type: self.texture_type,
            sample_count: self.sample_count,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ResourceError> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(ResourceError::InvalidDescription(format!(
                "texture dimensions must be non-zero, got {}x{}x{}",
                self.width, self.height, self.depth
            )));
        }
        if self.mip_levels == 0 || self.array_layers == 0 {
            return Err(ResourceError::InvalidDescription(
                "texture needs at least one mip level and one array layer".to_string(),
            ));
        }
        let max_dimension = self.width.max(self.height).max(self.depth);
        if self.mip_levels > 32 - max_dimension.leading_zeros() {
            return Err(ResourceError::InvalidDescription(format!(
                "{} mip levels do not fit a {}x{}x{} texture",
                self.mip_levels, self.width, self.height, self.depth
            )));
        }
        if self.texture_type == TextureType::D3 && self.array_layers != 1 {
            return Err(ResourceError::InvalidDescription(
                "3D textures can not have array layers".to_string(),
            ));
        }
        if self.sample_count > 1 && (self.mip_levels != 1 || self.is_staging()) {
            return Err(ResourceError::InvalidDescription(
                "multisampled textures have a single mip level and can not be staging".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct SamplerDescription<'a> {
    pub label: Label<'a>,
    pub address_modes: [SamplerAddressMode; 3],
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub comparison: Option<ComparisonKind>,
    pub max_anisotropy: u32,
    pub min_lod: f32,
    pub max_lod: f32,
    pub lod_bias: i32,
    pub border_color: SamplerBorderColor,
}

impl Default for SamplerDescription<'_> {
    fn default() -> Self {
        Self {
            label: None,
            address_modes: [SamplerAddressMode::Wrap; 3],
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Linear,
            comparison: None,
            max_anisotropy: 0,
            min_lod: 0.0,
            max_lod: 32.0,
            lod_bias: 0,
            border_color: SamplerBorderColor::TransparentBlack,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ShaderDescription<'a> {
    pub label: Label<'a>,
    pub stage: ShaderStages,
    /// Backend-specific shader source (MSL for Metal, GLSL for GL).
    pub source: Cow<'a, str>,
    pub entry_point: Cow<'a, str>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceLayoutElement {
    /// Name of the shader variable, used by backends that bind by name.
    pub name: String,
    pub kind: ResourceKind,
    pub stages: ShaderStages,
    pub options: ResourceLayoutElementOptions,
}

impl ResourceLayoutElement {
    pub fn new(name: impl Into<String>, kind: ResourceKind, stages: ShaderStages) -> Self {
        Self {
            name: name.into(),
            kind,
            stages,
            options: ResourceLayoutElementOptions::empty(),
        }
    }

    pub fn dynamic(mut self) -> Self {
        self.options |= ResourceLayoutElementOptions::DYNAMIC_BINDING;
        self
    }

    pub fn is_dynamic(&self) -> bool {
        self.options
            .contains(ResourceLayoutElementOptions::DYNAMIC_BINDING)
    }
}

#[derive(Clone, Debug)]
pub struct ResourceLayoutDescription<'a> {
    pub label: Label<'a>,
    pub elements: Cow<'a, [ResourceLayoutElement]>,
}

#[derive(Debug)]
pub struct BufferRange<A: Api> {
    pub buffer: Arc<A::Buffer>,
    pub offset: BufferAddress,
    pub size: BufferAddress,
}

// Rust gets confused about the impl requirements for `A`
impl<A: Api> Clone for BufferRange<A> {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            offset: self.offset,
            size: self.size,
        }
    }
}

#[derive(Debug)]
pub enum BindableResource<A: Api> {
    Buffer(BufferRange<A>),
    Texture(Arc<A::Texture>),
    Sampler(Arc<A::Sampler>),
}

// Rust gets confused about the impl requirements for `A`
impl<A: Api> Clone for BindableResource<A> {
    fn clone(&self) -> Self {
        match *self {
            Self::Buffer(ref range) => Self::Buffer(range.clone()),
            Self::Texture(ref texture) => Self::Texture(Arc::clone(texture)),
            Self::Sampler(ref sampler) => Self::Sampler(Arc::clone(sampler)),
        }
    }
}

#[derive(Debug)]
pub struct ResourceSetDescription<'a, A: Api> {
    pub label: Label<'a>,
    pub layout: &'a Arc<A::ResourceLayout>,
    pub resources: &'a [BindableResource<A>],
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlendAttachment {
    pub blend_enabled: bool,
    pub color_write_mask: ColorWriteMask,
    pub source_color_factor: BlendFactor,
    pub destination_color_factor: BlendFactor,
    pub color_function: BlendFunction,
    pub source_alpha_factor: BlendFactor,
    pub destination_alpha_factor: BlendFactor,
    pub alpha_function: BlendFunction,
}

impl BlendAttachment {
    pub const OVERRIDE: Self = Self {
        blend_enabled: false,
        color_write_mask: ColorWriteMask::ALL,
        source_color_factor: BlendFactor::One,
        destination_color_factor: BlendFactor::Zero,
        color_function: BlendFunction::Add,
        source_alpha_factor: BlendFactor::One,
        destination_alpha_factor: BlendFactor::Zero,
        alpha_function: BlendFunction::Add,
    };

    pub const ALPHA_BLEND: Self = Self {
        blend_enabled: true,
        source_color_factor: BlendFactor::SourceAlpha,
        destination_color_factor: BlendFactor::InverseSourceAlpha,
        source_alpha_factor: BlendFactor::SourceAlpha,
        destination_alpha_factor: BlendFactor::InverseSourceAlpha,
        ..Self::OVERRIDE
    };
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlendState {
    pub blend_factor: Color,
    pub attachments: Vec<BlendAttachment>,
    pub alpha_to_coverage: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilBehavior {
    pub fail: StencilOperation,
    pub pass: StencilOperation,
    pub depth_fail: StencilOperation,
    pub comparison: ComparisonKind,
}

impl Default for StencilBehavior {
    fn default() -> Self {
        Self {
            fail: StencilOperation::Keep,
            pass: StencilOperation::Keep,
            depth_fail: StencilOperation::Keep,
            comparison: ComparisonKind::Always,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_test_enabled: bool,
    pub depth_write_enabled: bool,
    pub depth_comparison: ComparisonKind,
    pub stencil_test_enabled: bool,
    pub stencil_front: StencilBehavior,
    pub stencil_back: StencilBehavior,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub stencil_reference: u32,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test_enabled: true,
            depth_write_enabled: true,
            depth_comparison: ComparisonKind::LessEqual,
            stencil_test_enabled: false,
            stencil_front: StencilBehavior::default(),
            stencil_back: StencilBehavior::default(),
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
            stencil_reference: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RasterizerState {
    pub cull_mode: FaceCullMode,
    pub fill_mode: PolygonFillMode,
    pub front_face: FrontFace,
    pub depth_clip_enabled: bool,
    pub scissor_test_enabled: bool,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            cull_mode: FaceCullMode::Back,
            fill_mode: PolygonFillMode::Solid,
            front_face: FrontFace::Clockwise,
            depth_clip_enabled: true,
            scissor_test_enabled: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VertexElement {
    pub name: String,
    pub format: VertexElementFormat,
    pub offset: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VertexLayout {
    pub stride: u32,
    /// Zero for per-vertex data, otherwise the number of instances per step.
    pub instance_step_rate: u32,
    pub elements: Vec<VertexElement>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutputDescription {
    pub color_formats: Vec<PixelFormat>,
    pub depth_format: Option<PixelFormat>,
    pub sample_count: u32,
}

#[derive(Debug)]
pub struct GraphicsPipelineDescription<'a, A: Api> {
    pub label: Label<'a>,
    pub blend_state: BlendState,
    pub depth_stencil_state: DepthStencilState,
    pub rasterizer_state: RasterizerState,
    pub topology: PrimitiveTopology,
    pub vertex_layouts: &'a [VertexLayout],
    pub vertex_shader: &'a A::Shader,
    pub fragment_shader: Option<&'a A::Shader>,
    pub resource_layouts: &'a [Arc<A::ResourceLayout>],
    pub outputs: OutputDescription,
}

#[derive(Debug)]
pub struct ComputePipelineDescription<'a, A: Api> {
    pub label: Label<'a>,
    pub shader: &'a A::Shader,
    pub resource_layouts: &'a [Arc<A::ResourceLayout>],
    pub thread_group_size: [u32; 3],
}

#[derive(Debug)]
pub struct FramebufferAttachment<'a, A: Api> {
    pub target: &'a Arc<A::Texture>,
    pub mip_level: u32,
    pub array_layer: u32,
}

#[derive(Debug)]
pub struct FramebufferDescription<'a, A: Api> {
    pub label: Label<'a>,
    pub color_targets: &'a [FramebufferAttachment<'a, A>],
    pub depth_target: Option<FramebufferAttachment<'a, A>>,
}

/// Opaque handle of a native presentation surface, such as a layer pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

#[derive(Clone, Debug)]
pub struct SwapchainDescription<'a> {
    pub label: Label<'a>,
    pub surface: SurfaceHandle,
    pub width: u32,
    pub height: u32,
    pub color_srgb: bool,
    pub depth_format: Option<PixelFormat>,
    pub vsync: bool,
}

/// A texture-to-texture copy, applied to `layer_count` consecutive layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureCopy {
    pub src_origin: Origin3d,
    pub src_mip_level: u32,
    pub src_base_array_layer: u32,
    pub dst_origin: Origin3d,
    pub dst_mip_level: u32,
    pub dst_base_array_layer: u32,
    pub size: Extent3d,
    pub layer_count: u32,
}

impl TextureCopy {
    /// Copies the whole `mip_level` of `layer` between same-shaped textures.
    pub fn whole_level(desc: &TextureDescription, mip_level: u32, layer: u32) -> Self {
        let (width, height, depth) = format::mip_dimensions(desc, mip_level);
        Self {
            src_origin: Origin3d::ZERO,
            src_mip_level: mip_level,
            src_base_array_layer: layer,
            dst_origin: Origin3d::ZERO,
            dst_mip_level: mip_level,
            dst_base_array_layer: layer,
            size: Extent3d::new(width, height, depth),
            layer_count: 1,
        }
    }
}

/// A region of one texture subresource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureRegion {
    pub origin: Origin3d,
    pub size: Extent3d,
    pub mip_level: u32,
    pub array_layer: u32,
}

/// Returns true if two layouts can be used interchangeably.
pub(crate) fn layouts_compatible(
    expected: &[ResourceLayoutElement],
    actual: &[ResourceLayoutElement],
) -> bool {
    expected.len() == actual.len()
        && expected.iter().zip(actual).all(|(e, a)| {
            e.kind == a.kind && e.stages == a.stages && e.options == a.options
        })
}

/// Set-once flag backing [`Dispose`] implementations.
#[derive(Debug, Default)]
pub(crate) struct DisposeFlag(AtomicBool);

impl DisposeFlag {
    /// Returns true only for the first caller.
    pub(crate) fn mark(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[test]
fn test_dispose_flag_is_set_once() {
    let flag = DisposeFlag::default();
    assert!(!flag.is_set());
    assert!(flag.mark());
    assert!(!flag.mark());
    assert!(flag.is_set());
}

#[test]
fn test_layout_compatibility_ignores_names() {
    let a = [ResourceLayoutElement::new(
        "u_Projection",
        ResourceKind::UniformBuffer,
        ShaderStages::VERTEX,
    )];
    let b = [ResourceLayoutElement::new(
        "Projection",
        ResourceKind::UniformBuffer,
        ShaderStages::VERTEX,
    )];
    let c = [ResourceLayoutElement::new(
        "Projection",
        ResourceKind::UniformBuffer,
        ShaderStages::VERTEX,
    )
    .dynamic()];
    assert!(layouts_compatible(&a, &b));
    assert!(!layouts_compatible(&a, &c));
    assert!(!layouts_compatible(&a, &[]));
}
