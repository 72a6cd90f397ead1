/*!
# OpenGL (ES) backend internals.

## Binding model

GL binds resources to numbered units per kind rather than per stage: uniform
buffer binding points, shader storage binding points, texture units and image
units. Resource set N takes the units that follow those of sets 0..N, counted
per kind. Programs learn which unit each named block or sampler uniform reads
from when they are linked, so element names in a resource layout must match
the names used in the shader source.

GLSL has no separate sampler objects. A sampler element is applied to the unit
of the last read-only texture element before it, unless another sampler took
that texture already; in that case it gets a texture unit of its own.

## Recording

Nothing touches the context while a command list records. Commands are
validated, stored, and translated into GL calls when the list is submitted
(see `queue.rs`).

## Staging

Staging textures are pixel buffer objects laid out as described in
[`crate::format`]. Staging and dynamic buffers can be read back by the CPU.
!*/

mod command;
mod conv;
mod device;
pub mod native;
mod queue;
pub mod soft;

use std::{fmt, ops, sync::Arc};

use arrayvec::ArrayVec;
use bitflags::bitflags;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use self::native::{
    BufferId, FramebufferId, ProgramId, SamplerId, ShaderId, TextureId, VertexArrayId,
};
use crate::{
    BindableResource, ColorWriteMask, CommandError, DeviceOptions, Dispose, DisposeFlag,
    PixelFormat, ResourceKind, ResourceLayoutElement, ShaderStages, TextureDescription,
    MAX_COLOR_TARGETS, MAX_RESOURCE_SETS, MAX_VERTEX_BUFFERS,
};

pub use command::CommandList;
pub use device::Device;

#[derive(Clone, Debug)]
pub struct Api;

impl crate::Api for Api {
    type Device = Device;
    type CommandList = CommandList;

    type Buffer = Buffer;
    type Texture = Texture;
    type Sampler = Sampler;
    type Shader = Shader;
    type ResourceLayout = ResourceLayout;
    type ResourceSet = ResourceSet;
    type Pipeline = Pipeline;
    type Framebuffer = Framebuffer;
    type Swapchain = Swapchain;
}

bitflags! {
    /// Features of the context that change how commands are executed.
    pub struct PrivateCapabilities: u32 {
        /// `glCopyImageSubData`
        const COPY_IMAGE = 1 << 0;
        /// `glDrawElementsBaseVertex` and friends.
        const BASE_VERTEX = 1 << 1;
        /// `glDraw*BaseInstance`
        const BASE_INSTANCE = 1 << 2;
        /// Indexed viewports and scissor rectangles.
        const MULTI_VIEWPORT = 1 << 3;
        /// Compute shaders, storage buffers and image units.
        const COMPUTE = 1 << 4;
        const INDIRECT_DRAW = 1 << 5;
        /// Debug groups, markers and object labels.
        const DEBUG_FNS = 1 << 6;
        /// Per draw buffer blend state and color masks.
        const INDEXED_DRAW_BUFFERS = 1 << 7;
        const DEPTH_CLAMP = 1 << 8;
        const POLYGON_MODE = 1 << 9;
        /// `glGetCompressedTextureSubImage`
        const GET_TEXTURE_SUB_IMAGE = 1 << 10;
        const FORMAT_BC = 1 << 11;
        const FORMAT_ETC2 = 1 << 12;
        const SAMPLER_LOD_BIAS = 1 << 13;
        const ANISOTROPY = 1 << 14;
    }
}

impl PrivateCapabilities {
    fn new(gl: &dyn native::Context) -> Self {
        let version = gl.version();
        let desktop = |major, minor| version.desktop_at_least(major, minor);
        let es = |major, minor| version.es_at_least(major, minor);
        let ext = |name| gl.supports_extension(name);

        let mut caps = Self::empty();
        caps.set(
            Self::COPY_IMAGE,
            desktop(4, 3) || es(3, 2) || ext("GL_ARB_copy_image"),
        );
        caps.set(Self::BASE_VERTEX, desktop(3, 2) || es(3, 2));
        caps.set(
            Self::BASE_INSTANCE,
            desktop(4, 2) || ext("GL_EXT_base_instance"),
        );
        caps.set(
            Self::MULTI_VIEWPORT,
            desktop(4, 1) || ext("GL_OES_viewport_array"),
        );
        caps.set(Self::COMPUTE, desktop(4, 3) || es(3, 1));
        caps.set(Self::INDIRECT_DRAW, desktop(4, 0) || es(3, 1));
        caps.set(
            Self::DEBUG_FNS,
            desktop(4, 3) || es(3, 2) || ext("GL_KHR_debug"),
        );
        caps.set(
            Self::INDEXED_DRAW_BUFFERS,
            desktop(4, 0) || es(3, 2) || ext("GL_OES_draw_buffers_indexed"),
        );
        caps.set(
            Self::DEPTH_CLAMP,
            !version.is_embedded || ext("GL_EXT_depth_clamp"),
        );
        caps.set(Self::POLYGON_MODE, !version.is_embedded);
        caps.set(Self::GET_TEXTURE_SUB_IMAGE, desktop(4, 5));
        caps.set(
            Self::FORMAT_BC,
            ext("GL_EXT_texture_compression_s3tc")
                && (desktop(4, 2) || ext("GL_EXT_texture_compression_bptc")),
        );
        caps.set(
            Self::FORMAT_ETC2,
            version.is_embedded || desktop(4, 3) || ext("GL_ARB_ES3_compatibility"),
        );
        caps.set(Self::SAMPLER_LOD_BIAS, !version.is_embedded);
        caps.set(
            Self::ANISOTROPY,
            desktop(4, 6) || ext("GL_EXT_texture_filter_anisotropic"),
        );
        caps
    }
}

#[derive(Clone, Copy, Debug)]
struct Limits {
    max_texture_units: u32,
    max_uniform_buffer_bindings: u32,
    max_storage_buffer_bindings: u32,
    max_image_units: u32,
    max_viewports: u32,
    max_draw_buffers: u32,
}

impl Limits {
    fn new(gl: &dyn native::Context, caps: PrivateCapabilities) -> Self {
        let get = |parameter| gl.get_parameter_i32(parameter).max(0) as u32;
        let compute = caps.contains(PrivateCapabilities::COMPUTE);
        Self {
            max_texture_units: get(native::MAX_COMBINED_TEXTURE_IMAGE_UNITS),
            max_uniform_buffer_bindings: get(native::MAX_UNIFORM_BUFFER_BINDINGS),
            max_storage_buffer_bindings: if compute {
                get(native::MAX_SHADER_STORAGE_BUFFER_BINDINGS)
            } else {
                0
            },
            max_image_units: if compute {
                get(native::MAX_IMAGE_UNITS)
            } else {
                0
            },
            max_viewports: if caps.contains(PrivateCapabilities::MULTI_VIEWPORT) {
                get(native::MAX_VIEWPORTS).max(1)
            } else {
                1
            },
            max_draw_buffers: get(native::MAX_DRAW_BUFFERS).max(1),
        }
    }
}

/// A GL context and the lock serializing access to it.
///
/// The lock is reentrant: resource wrappers delete their objects on drop,
/// which can happen while the executor holds the context.
pub struct AdapterContext {
    raw: Arc<dyn native::Context>,
    lock: ReentrantMutex<()>,
}

impl fmt::Debug for AdapterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterContext")
            .field("raw", &self.raw)
            .finish()
    }
}

impl AdapterContext {
    fn new(raw: Arc<dyn native::Context>) -> Self {
        Self {
            raw,
            lock: ReentrantMutex::new(()),
        }
    }

    /// Obtain a lock to the context.
    pub fn lock(&self) -> AdapterContextLock<'_> {
        AdapterContextLock {
            raw: &self.raw,
            _guard: self.lock.lock(),
        }
    }
}

pub struct AdapterContextLock<'a> {
    raw: &'a Arc<dyn native::Context>,
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl ops::Deref for AdapterContextLock<'_> {
    type Target = dyn native::Context;

    fn deref(&self) -> &Self::Target {
        &**self.raw
    }
}

struct DeviceShared {
    context: Arc<AdapterContext>,
    private_caps: PrivateCapabilities,
    limits: Limits,
    options: DeviceOptions,
    /// Vertex array object every draw goes through.
    vao: VertexArrayId,
    /// Scratch framebuffers for copies, read-backs and resolves.
    copy_fbo: FramebufferId,
    draw_fbo: FramebufferId,
}

impl fmt::Debug for DeviceShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceShared")
            .field("context", &self.context)
            .field("private_caps", &self.private_caps)
            .field("limits", &self.limits)
            .finish()
    }
}

impl DeviceShared {
    fn set_label(&self, gl: &dyn native::Context, identifier: u32, name: u32, label: crate::Label) {
        if let Some(label) = label {
            if self.private_caps.contains(PrivateCapabilities::DEBUG_FNS) {
                gl.object_label(identifier, name, Some(label));
            }
        }
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        let gl = self.context.lock();
        gl.delete_framebuffer(self.copy_fbo);
        gl.delete_framebuffer(self.draw_fbo);
        gl.delete_vertex_array(self.vao);
    }
}

#[derive(Debug)]
pub struct Buffer {
    raw: BufferId,
    size: crate::BufferAddress,
    usage: crate::BufferUsage,
    context: Arc<AdapterContext>,
    disposed: DisposeFlag,
}

impl Buffer {
    pub fn size(&self) -> crate::BufferAddress {
        self.size
    }

    pub fn usage(&self) -> crate::BufferUsage {
        self.usage
    }

    pub fn raw_handle(&self) -> BufferId {
        self.raw
    }

    fn is_cpu_visible(&self) -> bool {
        self.usage
            .intersects(crate::BufferUsage::STAGING | crate::BufferUsage::DYNAMIC)
    }

    fn native(&self) -> Result<BufferId, CommandError> {
        if self.disposed.is_set() {
            Err(CommandError::Disposed("buffer"))
        } else {
            Ok(self.raw)
        }
    }
}

impl Dispose for Buffer {
    fn dispose(&self) {
        if self.disposed.mark() {
            self.context.lock().delete_buffer(self.raw);
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_set()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum TextureStorage {
    Image { raw: TextureId, target: u32 },
    /// Pixel buffer standing in for a staging texture.
    Staging(BufferId),
}

#[derive(Debug)]
pub struct Texture {
    raw: TextureStorage,
    desc: TextureDescription<'static>,
    context: Arc<AdapterContext>,
    disposed: DisposeFlag,
}

impl Texture {
    pub fn description(&self) -> &TextureDescription<'static> {
        &self.desc
    }

    pub fn format(&self) -> PixelFormat {
        self.desc.format
    }

    pub fn is_staging(&self) -> bool {
        match self.raw {
            TextureStorage::Staging(_) => true,
            TextureStorage::Image { .. } => false,
        }
    }

    /// GL texture name, if the texture has one.
    pub fn raw_handle(&self) -> Option<TextureId> {
        match self.raw {
            TextureStorage::Image { raw, .. } => Some(raw),
            TextureStorage::Staging(_) => None,
        }
    }

    /// Pixel buffer backing a staging texture.
    pub fn staging_buffer(&self) -> Option<BufferId> {
        match self.raw {
            TextureStorage::Staging(raw) => Some(raw),
            TextureStorage::Image { .. } => None,
        }
    }

    fn storage(&self) -> Result<TextureStorage, CommandError> {
        if self.disposed.is_set() {
            Err(CommandError::Disposed("texture"))
        } else {
            Ok(self.raw)
        }
    }

    /// Texture name and target.
    fn image(&self) -> Result<(TextureId, u32), CommandError> {
        match self.storage()? {
            TextureStorage::Image { raw, target } => Ok((raw, target)),
            TextureStorage::Staging(_) => Err(CommandError::MissingUsage(
                "staging textures can not be used as GPU images",
            )),
        }
    }
}

impl Dispose for Texture {
    fn dispose(&self) {
        if self.disposed.mark() {
            let gl = self.context.lock();
            match self.raw {
                TextureStorage::Image { raw, .. } => gl.delete_texture(raw),
                TextureStorage::Staging(raw) => gl.delete_buffer(raw),
            }
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_set()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[derive(Debug)]
pub struct Sampler {
    raw: SamplerId,
    context: Arc<AdapterContext>,
    disposed: DisposeFlag,
}

impl Sampler {
    pub fn raw_handle(&self) -> SamplerId {
        self.raw
    }

    fn native(&self) -> Result<SamplerId, CommandError> {
        if self.disposed.is_set() {
            Err(CommandError::Disposed("sampler"))
        } else {
            Ok(self.raw)
        }
    }
}

impl Dispose for Sampler {
    fn dispose(&self) {
        if self.disposed.mark() {
            self.context.lock().delete_sampler(self.raw);
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_set()
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A compiled shader object.
#[derive(Debug)]
pub struct Shader {
    raw: ShaderId,
    stage: ShaderStages,
    context: Arc<AdapterContext>,
    disposed: DisposeFlag,
}

impl Dispose for Shader {
    fn dispose(&self) {
        if self.disposed.mark() {
            self.context.lock().delete_shader(self.raw);
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_set()
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Kind of GL unit a resource is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Register {
    UniformBuffer,
    StorageBuffer,
    Texture,
    Image,
}

impl Register {
    fn for_kind(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::UniformBuffer => Self::UniformBuffer,
            ResourceKind::StructuredBufferReadOnly | ResourceKind::StructuredBufferReadWrite => {
                Self::StorageBuffer
            }
            ResourceKind::TextureReadOnly | ResourceKind::Sampler => Self::Texture,
            ResourceKind::TextureReadWrite => Self::Image,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct RegisterCounters {
    uniform_buffers: u32,
    storage_buffers: u32,
    textures: u32,
    images: u32,
}

impl RegisterCounters {
    fn get(&self, register: Register) -> u32 {
        match register {
            Register::UniformBuffer => self.uniform_buffers,
            Register::StorageBuffer => self.storage_buffers,
            Register::Texture => self.textures,
            Register::Image => self.images,
        }
    }

    fn slot_mut(&mut self, register: Register) -> &mut u32 {
        match register {
            Register::UniformBuffer => &mut self.uniform_buffers,
            Register::StorageBuffer => &mut self.storage_buffers,
            Register::Texture => &mut self.textures,
            Register::Image => &mut self.images,
        }
    }
}

impl ops::Add for RegisterCounters {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            uniform_buffers: self.uniform_buffers + other.uniform_buffers,
            storage_buffers: self.storage_buffers + other.storage_buffers,
            textures: self.textures + other.textures,
            images: self.images + other.images,
        }
    }
}

/// Where one layout element lands, relative to its set's base units.
#[derive(Clone, Copy, Debug)]
struct ElementBinding {
    register: Register,
    index: u32,
    dynamic_index: Option<usize>,
}

#[derive(Debug)]
pub struct ResourceLayout {
    elements: Vec<ResourceLayoutElement>,
    bindings: Vec<ElementBinding>,
    counters: RegisterCounters,
    dynamic_count: usize,
}

impl ResourceLayout {
    fn new(elements: &[ResourceLayoutElement]) -> Self {
        let mut counters = RegisterCounters::default();
        let mut dynamic_count = 0;
        let mut unpaired_texture = None;
        let bindings = elements
            .iter()
            .map(|element| {
                let register = Register::for_kind(element.kind);
                let paired = match element.kind {
                    ResourceKind::Sampler => unpaired_texture.take(),
                    _ => None,
                };
                let index = match paired {
                    Some(unit) => unit,
                    None => {
                        let counter = counters.slot_mut(register);
                        *counter += 1;
                        *counter - 1
                    }
                };
                if element.kind == ResourceKind::TextureReadOnly {
                    unpaired_texture = Some(index);
                }
                let dynamic_index = if element.is_dynamic() {
                    dynamic_count += 1;
                    Some(dynamic_count - 1)
                } else {
                    None
                };
                ElementBinding {
                    register,
                    index,
                    dynamic_index,
                }
            })
            .collect();
        Self {
            elements: elements.to_vec(),
            bindings,
            counters,
            dynamic_count,
        }
    }

    pub fn elements(&self) -> &[ResourceLayoutElement] {
        &self.elements
    }

    pub fn dynamic_count(&self) -> usize {
        self.dynamic_count
    }
}

#[derive(Debug)]
pub struct ResourceSet {
    layout: Arc<ResourceLayout>,
    resources: Vec<BindableResource<Api>>,
    disposed: DisposeFlag,
}

impl ResourceSet {
    pub fn layout(&self) -> &Arc<ResourceLayout> {
        &self.layout
    }
}

impl Dispose for ResourceSet {
    fn dispose(&self) {
        self.disposed.mark();
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_set()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct BlendComponent {
    src: u32,
    dst: u32,
    equation: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct BlendDesc {
    color: BlendComponent,
    alpha: BlendComponent,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct ColorTargetDesc {
    blend: Option<BlendDesc>,
    write_mask: ColorWriteMask,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct StencilSide {
    function: u32,
    reference: i32,
    mask: u32,
    fail: u32,
    depth_fail: u32,
    pass: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct StencilState {
    front: StencilSide,
    back: StencilSide,
    write_mask: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct DepthState {
    function: u32,
    write: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct VertexBufferDesc {
    stride: u32,
    divisor: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct AttributeDesc {
    location: u32,
    buffer_index: u32,
    offset: u32,
    format: conv::VertexFormatDesc,
}

/// Fixed-function state applied when a graphics pipeline is used.
#[derive(Debug)]
struct RenderPipelineState {
    primitive: u32,
    vertex_buffers: ArrayVec<VertexBufferDesc, MAX_VERTEX_BUFFERS>,
    attributes: Vec<AttributeDesc>,
    color_targets: ArrayVec<ColorTargetDesc, MAX_COLOR_TARGETS>,
    depth: Option<DepthState>,
    stencil: Option<StencilState>,
    front_face: u32,
    cull_face: Option<u32>,
    /// `None` where the context can only fill.
    polygon_mode: Option<u32>,
    depth_clamp: bool,
    blend_color: [f32; 4],
    alpha_to_coverage: bool,
    scissor_test_enabled: bool,
}

#[derive(Debug)]
enum PipelineKind {
    Render(RenderPipelineState),
    Compute,
}

fn base_indices(
    layouts: &[Arc<ResourceLayout>],
) -> ArrayVec<RegisterCounters, MAX_RESOURCE_SETS> {
    let mut next = RegisterCounters::default();
    layouts
        .iter()
        .map(|layout| {
            let base = next;
            next = next + layout.counters;
            base
        })
        .collect()
}

#[derive(Debug)]
pub struct Pipeline {
    program: ProgramId,
    kind: PipelineKind,
    resource_layouts: ArrayVec<Arc<ResourceLayout>, MAX_RESOURCE_SETS>,
    /// Per-set first unit of each kind.
    base_indices: ArrayVec<RegisterCounters, MAX_RESOURCE_SETS>,
    context: Arc<AdapterContext>,
    disposed: DisposeFlag,
}

impl Pipeline {
    pub fn is_compute(&self) -> bool {
        match self.kind {
            PipelineKind::Compute => true,
            PipelineKind::Render(_) => false,
        }
    }

    pub fn resource_layouts(&self) -> &[Arc<ResourceLayout>] {
        &self.resource_layouts
    }

    pub fn raw_program(&self) -> ProgramId {
        self.program
    }

    fn render_state(&self) -> Option<&RenderPipelineState> {
        match self.kind {
            PipelineKind::Render(ref state) => Some(state),
            PipelineKind::Compute => None,
        }
    }

    fn native(&self) -> Result<ProgramId, CommandError> {
        if self.disposed.is_set() {
            Err(CommandError::Disposed("pipeline"))
        } else {
            Ok(self.program)
        }
    }
}

impl Dispose for Pipeline {
    fn dispose(&self) {
        if self.disposed.mark() {
            self.context.lock().delete_program(self.program);
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_set()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[derive(Debug)]
struct Attachment {
    texture: Arc<Texture>,
    mip_level: u32,
    array_layer: u32,
}

/// Attaches one subresource of a texture to the framebuffer bound at `fbo_target`.
fn attach_texture(
    gl: &dyn native::Context,
    fbo_target: u32,
    attachment: u32,
    texture: TextureId,
    target: u32,
    mip_level: u32,
    layer: u32,
) {
    if conv::is_layered_target(target) {
        gl.framebuffer_texture_layer(
            fbo_target,
            attachment,
            Some(texture),
            mip_level as i32,
            layer as i32,
        );
    } else if target == native::TEXTURE_CUBE_MAP {
        gl.framebuffer_texture_2d(
            fbo_target,
            attachment,
            native::CUBEMAP_FACES[layer as usize],
            Some(texture),
            mip_level as i32,
        );
    } else {
        gl.framebuffer_texture_2d(fbo_target, attachment, target, Some(texture), mip_level as i32);
    }
}

/// Attachment point of a depth or depth-stencil format.
fn depth_attachment(format: PixelFormat) -> u32 {
    if format.has_stencil() {
        native::DEPTH_STENCIL_ATTACHMENT
    } else {
        native::DEPTH_ATTACHMENT
    }
}

#[derive(Debug)]
struct SurfaceState {
    size: Mutex<(u32, u32)>,
    depth_format: Option<PixelFormat>,
}

#[derive(Debug)]
pub struct Framebuffer {
    /// `None` for the default framebuffer of the window surface.
    raw: Option<FramebufferId>,
    color_targets: ArrayVec<Attachment, MAX_COLOR_TARGETS>,
    depth_target: Option<Attachment>,
    surface: Option<Arc<SurfaceState>>,
    size: (u32, u32),
    context: Arc<AdapterContext>,
    disposed: DisposeFlag,
}

impl Framebuffer {
    pub fn color_target_count(&self) -> usize {
        match self.surface {
            Some(_) => 1,
            None => self.color_targets.len(),
        }
    }

    pub fn has_depth_target(&self) -> bool {
        self.depth_format().is_some()
    }

    pub fn size(&self) -> (u32, u32) {
        match self.surface {
            Some(ref surface) => *surface.size.lock(),
            None => self.size,
        }
    }

    pub fn raw_handle(&self) -> Option<FramebufferId> {
        self.raw
    }

    fn depth_format(&self) -> Option<PixelFormat> {
        match self.surface {
            Some(ref surface) => surface.depth_format,
            None => self
                .depth_target
                .as_ref()
                .map(|attachment| attachment.texture.format()),
        }
    }

    fn native(&self) -> Result<Option<FramebufferId>, CommandError> {
        if self.disposed.is_set() {
            return Err(CommandError::Disposed("framebuffer"));
        }
        for attachment in self.color_targets.iter().chain(self.depth_target.iter()) {
            attachment.texture.storage()?;
        }
        Ok(self.raw)
    }
}

impl Dispose for Framebuffer {
    fn dispose(&self) {
        if self.disposed.mark() {
            if let Some(raw) = self.raw {
                self.context.lock().delete_framebuffer(raw);
            }
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_set()
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// The window surface of the context, presented with `swap_buffers`.
#[derive(Debug)]
pub struct Swapchain {
    surface: Arc<SurfaceState>,
    framebuffer: Arc<Framebuffer>,
    context: Arc<AdapterContext>,
}

impl crate::Swapchain<Api> for Swapchain {
    fn framebuffer(&self) -> &Arc<Framebuffer> {
        &self.framebuffer
    }

    fn resize(&self, width: u32, height: u32) {
        *self.surface.size.lock() = (width, height);
        self.context.lock().resize_surface(width, height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceLayoutElement as Element;

    #[test]
    fn samplers_share_the_unit_of_their_texture() {
        let layout = ResourceLayout::new(&[
            Element::new("Globals", ResourceKind::UniformBuffer, ShaderStages::VERTEX),
            Element::new("u_Albedo", ResourceKind::TextureReadOnly, ShaderStages::FRAGMENT),
            Element::new("s_Albedo", ResourceKind::Sampler, ShaderStages::FRAGMENT),
            Element::new("u_Normal", ResourceKind::TextureReadOnly, ShaderStages::FRAGMENT),
            Element::new("s_Normal", ResourceKind::Sampler, ShaderStages::FRAGMENT),
            Element::new("s_Extra", ResourceKind::Sampler, ShaderStages::FRAGMENT),
        ]);
        let units = layout
            .bindings
            .iter()
            .map(|binding| (binding.register, binding.index))
            .collect::<Vec<_>>();
        assert_eq!(
            units,
            [
                (Register::UniformBuffer, 0),
                (Register::Texture, 0),
                (Register::Texture, 0),
                (Register::Texture, 1),
                (Register::Texture, 1),
                (Register::Texture, 2),
            ]
        );
        assert_eq!(layout.counters.textures, 3);
        assert_eq!(layout.counters.uniform_buffers, 1);
    }

    #[test]
    fn sets_follow_each_other_per_kind() {
        let first = Arc::new(ResourceLayout::new(&[
            Element::new("Camera", ResourceKind::UniformBuffer, ShaderStages::VERTEX),
            Element::new("Particles", ResourceKind::StructuredBufferReadWrite, ShaderStages::COMPUTE),
            Element::new("u_Output", ResourceKind::TextureReadWrite, ShaderStages::COMPUTE),
        ]));
        let second = Arc::new(ResourceLayout::new(&[
            Element::new("Model", ResourceKind::UniformBuffer, ShaderStages::VERTEX).dynamic(),
            Element::new("u_Input", ResourceKind::TextureReadOnly, ShaderStages::COMPUTE),
        ]));
        assert_eq!(second.dynamic_count(), 1);
        let bases = base_indices(&[first, second]);
        assert_eq!(bases[0], RegisterCounters::default());
        assert_eq!(
            bases[1],
            RegisterCounters {
                uniform_buffers: 1,
                storage_buffers: 1,
                textures: 0,
                images: 1,
            }
        );
    }
}
