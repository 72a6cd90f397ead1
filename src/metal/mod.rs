/*!
# Metal backend internals.

## Binding model

Metal has flat per-stage tables of buffers, textures, and samplers. Vertex
buffers take the first entries of the vertex stage buffer table. Resource set 0
follows them, then resource set 1, and so on. Each stage only counts the
resources visible to it, so a set's base index in a stage is the sum of that
stage's per-kind counts over every lower set.

## Storage

Buffers are private unless they are staging or dynamic, in which case they are
shared with the CPU. Staging textures have no native image at all: they are a
shared buffer laid out as described in [`crate::format`].
!*/

mod command;
mod conv;
mod device;
pub mod native;
pub mod soft;
mod surface;

use std::{fmt, ops, sync::Arc};

use arrayvec::ArrayVec;

use self::native::{
    BufferId, CommandBufferId, ComputePipelineId, DepthStencilId, FunctionId, LibraryId,
    MTLGPUFamily, Retained, SamplerId, TextureId,
};
use crate::{
    track::SubmissionTracker, BindableResource, CommandError, DeviceOptions, Dispose,
    DisposeFlag, PixelFormat, ResourceKind, ResourceLayoutElement, ShaderStages,
    TextureDescription, MAX_COLOR_TARGETS, MAX_RESOURCE_SETS,
};

pub use command::CommandList;
pub use device::Device;
pub use surface::Swapchain;

#[derive(Clone, Debug)]
pub struct Api;

type ResourceIndex = u32;

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

#[derive(Clone, Debug)]
struct PrivateCapabilities {
    multi_viewport: bool,
    memoryless: bool,
    base_vertex_instance: bool,
    depth_clip_mode: bool,
    format_bc: bool,
    format_etc2: bool,
    format_depth24_stencil8: bool,
    max_buffers_per_stage: ResourceIndex,
}

impl PrivateCapabilities {
    fn new(device: &dyn native::Device) -> Self {
        let family_mac = device.supports_family(MTLGPUFamily::Mac1)
            || device.supports_family(MTLGPUFamily::Mac2);
        let apple = |family| device.supports_family(family);
        Self {
            multi_viewport: family_mac || apple(MTLGPUFamily::Apple5),
            memoryless: apple(MTLGPUFamily::Apple2),
            base_vertex_instance: family_mac || apple(MTLGPUFamily::Apple3),
            depth_clip_mode: family_mac || apple(MTLGPUFamily::Apple3),
            format_bc: family_mac,
            format_etc2: apple(MTLGPUFamily::Apple1),
            format_depth24_stencil8: family_mac && device.supports_depth24_stencil8(),
            max_buffers_per_stage: device.max_buffers_per_stage(),
        }
    }
}

struct DeviceShared {
    raw: Arc<dyn native::Device>,
    private_caps: PrivateCapabilities,
    options: DeviceOptions,
    tracker: Arc<SubmissionTracker<CommandBufferId, Buffer>>,
    /// Byte-granular buffer copy used when the blit path is misaligned.
    unaligned_copy_pipeline: Retained<ComputePipelineId>,
}

impl fmt::Debug for DeviceShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceShared")
            .field("raw", &self.raw)
            .field("private_caps", &self.private_caps)
            .finish()
    }
}

#[derive(Debug)]
pub struct Buffer {
    raw: BufferId,
    size: crate::BufferAddress,
    usage: crate::BufferUsage,
    storage_mode: native::MTLStorageMode,
    device: Arc<dyn native::Device>,
    disposed: DisposeFlag,
}

impl Buffer {
    pub fn size(&self) -> crate::BufferAddress {
        self.size
    }

    pub fn usage(&self) -> crate::BufferUsage {
        self.usage
    }

    /// Native handle, for inspection through a native binding.
    pub fn raw_handle(&self) -> BufferId {
        self.raw
    }

    fn is_cpu_visible(&self) -> bool {
        self.storage_mode == native::MTLStorageMode::Shared
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
            self.device.release(native::NativeObject::raw(self.raw));
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
    Image(TextureId),
    /// Linear CPU-visible storage standing in for a staging texture.
    Staging(BufferId),
}

#[derive(Debug)]
pub struct Texture {
    raw: TextureStorage,
    desc: TextureDescription<'static>,
    memoryless: bool,
    device: Arc<dyn native::Device>,
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
            TextureStorage::Image(_) => false,
        }
    }

    /// Native image handle, if the texture has one.
    pub fn raw_handle(&self) -> Option<TextureId> {
        match self.raw {
            TextureStorage::Image(id) => Some(id),
            TextureStorage::Staging(_) => None,
        }
    }

    fn storage(&self) -> Result<TextureStorage, CommandError> {
        if self.disposed.is_set() {
            Err(CommandError::Disposed("texture"))
        } else {
            Ok(self.raw)
        }
    }

    fn image(&self) -> Result<TextureId, CommandError> {
        match self.storage()? {
            TextureStorage::Image(id) => Ok(id),
            TextureStorage::Staging(_) => Err(CommandError::MissingUsage(
                "staging textures can not be used as GPU images",
            )),
        }
    }
}

impl Dispose for Texture {
    fn dispose(&self) {
        if self.disposed.mark() {
            let raw = match self.raw {
                TextureStorage::Image(id) => native::NativeObject::raw(id),
                TextureStorage::Staging(id) => native::NativeObject::raw(id),
            };
            self.device.release(raw);
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
    device: Arc<dyn native::Device>,
    disposed: DisposeFlag,
}

impl Sampler {
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
            self.device.release(native::NativeObject::raw(self.raw));
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

#[derive(Debug)]
pub struct Shader {
    library: LibraryId,
    function: FunctionId,
    stage: ShaderStages,
    device: Arc<dyn native::Device>,
    disposed: DisposeFlag,
}

impl Dispose for Shader {
    fn dispose(&self) {
        if self.disposed.mark() {
            self.device.release(native::NativeObject::raw(self.function));
            self.device.release(native::NativeObject::raw(self.library));
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

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct ResourceData<T> {
    buffers: T,
    textures: T,
    samplers: T,
}

impl ResourceData<ResourceIndex> {
    fn slot_mut(&mut self, kind: ResourceKind) -> &mut ResourceIndex {
        match kind {
            ResourceKind::UniformBuffer
            | ResourceKind::StructuredBufferReadOnly
            | ResourceKind::StructuredBufferReadWrite => &mut self.buffers,
            ResourceKind::TextureReadOnly | ResourceKind::TextureReadWrite => &mut self.textures,
            ResourceKind::Sampler => &mut self.samplers,
        }
    }
}

impl ops::Add for ResourceData<ResourceIndex> {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            buffers: self.buffers + other.buffers,
            textures: self.textures + other.textures,
            samplers: self.samplers + other.samplers,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Stage {
    Vertex,
    Fragment,
    Compute,
}

impl Stage {
    fn flag(self) -> ShaderStages {
        match self {
            Self::Vertex => ShaderStages::VERTEX,
            Self::Fragment => ShaderStages::FRAGMENT,
            Self::Compute => ShaderStages::COMPUTE,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
struct MultiStageData<T> {
    vs: T,
    fs: T,
    cs: T,
}

impl<T> ops::Index<Stage> for MultiStageData<T> {
    type Output = T;
    fn index(&self, stage: Stage) -> &T {
        match stage {
            Stage::Vertex => &self.vs,
            Stage::Fragment => &self.fs,
            Stage::Compute => &self.cs,
        }
    }
}

impl<T> ops::IndexMut<Stage> for MultiStageData<T> {
    fn index_mut(&mut self, stage: Stage) -> &mut T {
        match stage {
            Stage::Vertex => &mut self.vs,
            Stage::Fragment => &mut self.fs,
            Stage::Compute => &mut self.cs,
        }
    }
}

type MultiStageResourceCounters = MultiStageData<ResourceData<ResourceIndex>>;

/// Where one layout element lands in each stage's native tables.
#[derive(Clone, Debug)]
struct ElementBinding {
    /// Index relative to the set's base, per stage the element is visible to.
    slots: MultiStageData<Option<ResourceIndex>>,
    dynamic_index: Option<usize>,
}

#[derive(Debug)]
pub struct ResourceLayout {
    elements: Vec<ResourceLayoutElement>,
    bindings: Vec<ElementBinding>,
    counters: MultiStageResourceCounters,
    dynamic_count: usize,
}

impl ResourceLayout {
    fn new(elements: &[ResourceLayoutElement]) -> Self {
        let mut counters = MultiStageResourceCounters::default();
        let mut dynamic_count = 0;
        let bindings = elements
            .iter()
            .map(|element| {
                let mut slots = MultiStageData::default();
                for &stage in [Stage::Vertex, Stage::Fragment, Stage::Compute].iter() {
                    if element.stages.contains(stage.flag()) {
                        let counter = counters[stage].slot_mut(element.kind);
                        slots[stage] = Some(*counter);
                        *counter += 1;
                    }
                }
                let dynamic_index = if element.is_dynamic() {
                    dynamic_count += 1;
                    Some(dynamic_count - 1)
                } else {
                    None
                };
                ElementBinding {
                    slots,
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

/// Fixed-function state applied to a render encoder when a pipeline is used.
#[derive(Debug)]
struct RenderPipelineState {
    raw: native::RenderPipelineId,
    primitive_type: native::MTLPrimitiveType,
    cull_mode: native::MTLCullMode,
    winding: native::MTLWinding,
    fill_mode: native::MTLTriangleFillMode,
    depth_clip_mode: Option<native::MTLDepthClipMode>,
    depth_stencil: DepthStencilId,
    stencil_reference: u32,
    blend_color: [f32; 4],
    scissor_test_enabled: bool,
}

#[derive(Debug)]
struct ComputePipelineState {
    raw: ComputePipelineId,
    threads_per_group: native::MTLSize,
}

#[derive(Debug)]
enum PipelineKind {
    Render(RenderPipelineState),
    Compute(ComputePipelineState),
}

#[derive(Debug)]
pub struct Pipeline {
    kind: PipelineKind,
    resource_layouts: ArrayVec<Arc<ResourceLayout>, MAX_RESOURCE_SETS>,
    /// Per-set first native index in each stage table.
    base_indices: ArrayVec<MultiStageResourceCounters, MAX_RESOURCE_SETS>,
    vertex_buffer_count: u32,
    device: Arc<dyn native::Device>,
    disposed: DisposeFlag,
}

impl Pipeline {
    fn new(
        kind: PipelineKind,
        layouts: &[Arc<ResourceLayout>],
        vertex_buffer_count: u32,
        device: &Arc<dyn native::Device>,
    ) -> Self {
        let mut next = MultiStageResourceCounters::default();
        next.vs.buffers = vertex_buffer_count;
        let mut base_indices = ArrayVec::new();
        for layout in layouts {
            base_indices.push(next.clone());
            next.vs = next.vs + layout.counters.vs;
            next.fs = next.fs + layout.counters.fs;
            next.cs = next.cs + layout.counters.cs;
        }
        Self {
            kind,
            resource_layouts: layouts.iter().cloned().collect(),
            base_indices,
            vertex_buffer_count,
            device: Arc::clone(device),
            disposed: DisposeFlag::default(),
        }
    }

    pub fn is_compute(&self) -> bool {
        match self.kind {
            PipelineKind::Compute(_) => true,
            PipelineKind::Render(_) => false,
        }
    }

    pub fn resource_layouts(&self) -> &[Arc<ResourceLayout>] {
        &self.resource_layouts
    }

    fn render_state(&self) -> Option<&RenderPipelineState> {
        match self.kind {
            PipelineKind::Render(ref state) => Some(state),
            PipelineKind::Compute(_) => None,
        }
    }

    fn compute_state(&self) -> Option<&ComputePipelineState> {
        match self.kind {
            PipelineKind::Compute(ref state) => Some(state),
            PipelineKind::Render(_) => None,
        }
    }
}

impl Dispose for Pipeline {
    fn dispose(&self) {
        if self.disposed.mark() {
            match self.kind {
                PipelineKind::Render(ref state) => {
                    self.device.release(native::NativeObject::raw(state.raw));
                    self.device
                        .release(native::NativeObject::raw(state.depth_stencil));
                }
                PipelineKind::Compute(ref state) => {
                    self.device.release(native::NativeObject::raw(state.raw));
                }
            }
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

/// Native attachments of a framebuffer for one render pass.
#[derive(Debug)]
struct ResolvedAttachments {
    colors: ArrayVec<(TextureId, u32, u32), MAX_COLOR_TARGETS>,
    depth: Option<ResolvedDepth>,
}

#[derive(Debug)]
struct ResolvedDepth {
    texture: TextureId,
    mip_level: u32,
    array_layer: u32,
    memoryless: bool,
    has_stencil: bool,
}

impl ResolvedDepth {
    fn from_attachment(attachment: &Attachment) -> Result<Self, CommandError> {
        Ok(Self {
            texture: attachment.texture.image()?,
            mip_level: attachment.mip_level,
            array_layer: attachment.array_layer,
            memoryless: attachment.texture.memoryless,
            has_stencil: attachment.texture.format().has_stencil(),
        })
    }
}

#[derive(Debug)]
pub struct Framebuffer {
    color_targets: ArrayVec<Attachment, MAX_COLOR_TARGETS>,
    depth_target: Option<Attachment>,
    surface: Option<Arc<surface::SurfaceState>>,
    size: (u32, u32),
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
        match self.surface {
            Some(ref surface) => surface.depth_format.is_some(),
            None => self.depth_target.is_some(),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        match self.surface {
            Some(ref surface) => surface.size(),
            None => self.size,
        }
    }

    /// Returns `None` when the presentable image is not available.
    fn resolve(&self) -> Result<Option<ResolvedAttachments>, CommandError> {
        if self.disposed.is_set() {
            return Err(CommandError::Disposed("framebuffer"));
        }
        let mut colors = ArrayVec::new();
        let depth = match self.surface {
            Some(ref surface) => {
                let texture = match surface.acquire_drawable() {
                    Some(texture) => texture,
                    None => return Ok(None),
                };
                colors.push((texture, 0, 0));
                match surface.depth_texture() {
                    Some(depth) => Some(ResolvedDepth {
                        texture: depth.image()?,
                        mip_level: 0,
                        array_layer: 0,
                        memoryless: depth.memoryless,
                        has_stencil: depth.format().has_stencil(),
                    }),
                    None => None,
                }
            }
            None => {
                for target in self.color_targets.iter() {
                    colors.push((target.texture.image()?, target.mip_level, target.array_layer));
                }
                match self.depth_target {
                    Some(ref target) => Some(ResolvedDepth::from_attachment(target)?),
                    None => None,
                }
            }
        };
        Ok(Some(ResolvedAttachments { colors, depth }))
    }
}

impl Dispose for Framebuffer {
    fn dispose(&self) {
        self.disposed.mark();
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_set()
    }
}
