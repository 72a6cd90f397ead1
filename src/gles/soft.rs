//! Software implementation of the GL context surface.
//!
//! Every state-changing call is recorded. Buffer and texture memory live on
//! the heap, and uploads, read-backs, copies, blits and clears of texture
//! attachments are executed. Rasterization is not emulated: draws only show
//! up in the call log.

use std::{
    fmt,
    num::NonZeroU32,
    sync::atomic::{AtomicU32, Ordering},
};

use fxhash::FxHashMap;
use parking_lot::Mutex;

use super::native::{
    self as gl, BufferId, CompressedPixelUnpackData, FramebufferId, NativeObject as _,
    PixelPackData, PixelUnpackData, ProgramId, SamplerId, ShaderId, TextureId, UniformLocation,
    Version, VertexArrayId,
};

/// What the software context reports about itself.
#[derive(Clone, Debug)]
pub struct SoftContextConfig {
    pub version: Version,
    pub renderer: String,
    pub extensions: Vec<String>,
    pub max_texture_units: i32,
    pub max_uniform_buffer_bindings: i32,
    pub max_storage_buffer_bindings: i32,
    pub max_image_units: i32,
    pub max_viewports: i32,
    pub max_draw_buffers: i32,
}

impl Default for SoftContextConfig {
    fn default() -> Self {
        Self {
            version: Version::new(4, 5, false),
            renderer: "Soft GL (4.5 core)".to_string(),
            extensions: vec![
                "GL_EXT_texture_compression_s3tc".to_string(),
                "GL_EXT_texture_filter_anisotropic".to_string(),
            ],
            max_texture_units: 32,
            max_uniform_buffer_bindings: 24,
            max_storage_buffer_bindings: 8,
            max_image_units: 8,
            max_viewports: 16,
            max_draw_buffers: 8,
        }
    }
}

impl SoftContextConfig {
    /// A bare GL ES 3.0 context: no compute, no base vertex, no copy image,
    /// one blend state for all draw buffers.
    pub fn gles30() -> Self {
        Self {
            version: Version::new(3, 0, true),
            renderer: "Soft GL (ES 3.0)".to_string(),
            extensions: Vec::new(),
            max_texture_units: 16,
            max_uniform_buffer_bindings: 12,
            max_storage_buffer_bindings: 0,
            max_image_units: 0,
            max_viewports: 1,
            max_draw_buffers: 4,
        }
    }

    pub fn gles32() -> Self {
        Self {
            version: Version::new(3, 2, true),
            renderer: "Soft GL (ES 3.2)".to_string(),
            max_viewports: 1,
            ..Self::gles30()
        }
    }
}

/// A recorded GL call.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    BindBuffer {
        target: u32,
        buffer: Option<BufferId>,
    },
    BindBufferRange {
        target: u32,
        index: u32,
        buffer: Option<BufferId>,
        offset: i32,
        size: i32,
    },
    BufferData {
        buffer: BufferId,
        size: i32,
    },
    BufferSubData {
        buffer: BufferId,
        offset: i32,
        size: usize,
    },
    CopyBufferSubData {
        src: BufferId,
        dst: BufferId,
        src_offset: i32,
        dst_offset: i32,
        size: i32,
    },
    ActiveTexture(u32),
    BindTexture {
        target: u32,
        texture: Option<TextureId>,
    },
    TexStorage {
        texture: TextureId,
        internal_format: u32,
        size: [i32; 3],
        levels: i32,
    },
    TexSubImage {
        target: u32,
        level: i32,
        offset: [i32; 3],
        size: [i32; 3],
    },
    CompressedTexSubImage {
        target: u32,
        level: i32,
        offset: [i32; 3],
        size: [i32; 3],
    },
    GetCompressedTextureSubImage {
        texture: TextureId,
        level: i32,
    },
    CopyImageSubData {
        src: TextureId,
        dst: TextureId,
        size: [i32; 3],
    },
    CopyTexSubImage2d {
        target: u32,
        level: i32,
    },
    GenerateMipmap(u32),
    PixelStore(u32, i32),
    ReadPixels {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    BindSampler {
        unit: u32,
        sampler: Option<SamplerId>,
    },
    UseProgram(Option<ProgramId>),
    Uniform1i {
        location: UniformLocation,
        value: i32,
    },
    UniformBlockBinding {
        program: ProgramId,
        index: u32,
        binding: u32,
    },
    ShaderStorageBlockBinding {
        program: ProgramId,
        index: u32,
        binding: u32,
    },
    BindVertexArray(Option<VertexArrayId>),
    EnableVertexAttribArray(u32),
    DisableVertexAttribArray(u32),
    VertexAttribPointer {
        index: u32,
        size: i32,
        data_type: u32,
        normalized: bool,
        integer: bool,
        stride: i32,
        offset: i32,
    },
    VertexAttribDivisor {
        index: u32,
        divisor: u32,
    },
    BindFramebuffer {
        target: u32,
        framebuffer: Option<FramebufferId>,
    },
    FramebufferTexture {
        target: u32,
        attachment: u32,
        texture: Option<TextureId>,
        level: i32,
        layer: i32,
    },
    DrawBuffers(Vec<u32>),
    ReadBuffer(u32),
    BlitFramebuffer {
        src: [i32; 4],
        dst: [i32; 4],
        mask: u32,
        filter: u32,
    },
    Enable(u32),
    Disable(u32),
    EnableDrawBuffer(u32, u32),
    DisableDrawBuffer(u32, u32),
    Viewport([i32; 4]),
    DepthRange(f32, f32),
    ViewportArray(Vec<[f32; 4]>),
    DepthRangeArray(Vec<[f64; 2]>),
    Scissor([i32; 4]),
    ScissorArray(Vec<[i32; 4]>),
    FrontFace(u32),
    CullFace(u32),
    PolygonMode(u32),
    BlendColor([f32; 4]),
    BlendEquation {
        draw_buffer: Option<u32>,
        color: u32,
        alpha: u32,
    },
    BlendFunc {
        draw_buffer: Option<u32>,
        factors: [u32; 4],
    },
    ColorMask {
        draw_buffer: Option<u32>,
        mask: [bool; 4],
    },
    DepthFunc(u32),
    DepthMask(bool),
    StencilFunc {
        face: u32,
        function: u32,
        reference: i32,
        mask: u32,
    },
    StencilOp {
        face: u32,
        fail: u32,
        depth_fail: u32,
        pass: u32,
    },
    StencilMask {
        face: u32,
        mask: u32,
    },
    ClearBuffer {
        target: u32,
        draw_buffer: u32,
        values: Vec<f32>,
    },
    ClearDepthStencil {
        depth: f32,
        stencil: i32,
    },
    DrawArrays {
        mode: u32,
        first: i32,
        count: i32,
    },
    DrawArraysInstanced {
        mode: u32,
        first: i32,
        count: i32,
        instance_count: i32,
    },
    DrawArraysInstancedBaseInstance {
        mode: u32,
        first: i32,
        count: i32,
        instance_count: i32,
        base_instance: u32,
    },
    DrawElements {
        mode: u32,
        count: i32,
        element_type: u32,
        offset: i32,
    },
    DrawElementsInstanced {
        mode: u32,
        count: i32,
        element_type: u32,
        offset: i32,
        instance_count: i32,
    },
    DrawElementsBaseVertex {
        mode: u32,
        count: i32,
        element_type: u32,
        offset: i32,
        base_vertex: i32,
    },
    DrawElementsInstancedBaseVertex {
        mode: u32,
        count: i32,
        element_type: u32,
        offset: i32,
        instance_count: i32,
        base_vertex: i32,
    },
    DrawElementsInstancedBaseVertexBaseInstance {
        mode: u32,
        count: i32,
        element_type: u32,
        offset: i32,
        instance_count: i32,
        base_vertex: i32,
        base_instance: u32,
    },
    DrawArraysIndirect {
        mode: u32,
        offset: i32,
    },
    DrawElementsIndirect {
        mode: u32,
        element_type: u32,
        offset: i32,
    },
    DispatchCompute([u32; 3]),
    DispatchComputeIndirect(i32),
    MemoryBarrier(u32),
    BindImageTexture {
        unit: u32,
        texture: Option<TextureId>,
        layered: bool,
        access: u32,
        format: u32,
    },
    PushDebugGroup(String),
    PopDebugGroup,
    DebugMessageInsert(String),
    Flush,
    Finish,
    SwapBuffers,
    SetSwapInterval(i32),
    ResizeSurface(u32, u32),
}

impl Call {
    pub fn is_draw(&self) -> bool {
        match *self {
            Self::DrawArrays { .. }
            | Self::DrawArraysInstanced { .. }
            | Self::DrawArraysInstancedBaseInstance { .. }
            | Self::DrawElements { .. }
            | Self::DrawElementsInstanced { .. }
            | Self::DrawElementsBaseVertex { .. }
            | Self::DrawElementsInstancedBaseVertex { .. }
            | Self::DrawElementsInstancedBaseVertexBaseInstance { .. }
            | Self::DrawArraysIndirect { .. }
            | Self::DrawElementsIndirect { .. } => true,
            _ => false,
        }
    }
}

/// Block edge in texels and block size in bytes of an internal format.
fn block_info(internal_format: u32) -> Option<(u32, u32)> {
    Some(match internal_format {
        gl::R8 | gl::R8_SNORM | gl::R8UI | gl::R8I => (1, 1),
        gl::R16 | gl::R16UI | gl::R16F | gl::RG8 | gl::DEPTH_COMPONENT16 => (1, 2),
        gl::R32UI
        | gl::R32I
        | gl::R32F
        | gl::RG16F
        | gl::RGBA8
        | gl::SRGB8_ALPHA8
        | gl::RGBA8UI
        | gl::RGB10_A2
        | gl::R11F_G11F_B10F
        | gl::DEPTH_COMPONENT32F
        | gl::DEPTH24_STENCIL8 => (1, 4),
        gl::RG32F | gl::RGBA16F | gl::DEPTH32F_STENCIL8 => (1, 8),
        gl::RGBA32UI | gl::RGBA32F => (1, 16),
        gl::COMPRESSED_RGBA_S3TC_DXT1_EXT
        | gl::COMPRESSED_SRGB_ALPHA_S3TC_DXT1_EXT
        | gl::COMPRESSED_RED_RGTC1
        | gl::COMPRESSED_RGB8_ETC2 => (4, 8),
        gl::COMPRESSED_RGBA_S3TC_DXT3_EXT
        | gl::COMPRESSED_RGBA_S3TC_DXT5_EXT
        | gl::COMPRESSED_RG_RGTC2
        | gl::COMPRESSED_RGBA_BPTC_UNORM
        | gl::COMPRESSED_SRGB_ALPHA_BPTC_UNORM
        | gl::COMPRESSED_RGBA8_ETC2_EAC => (4, 16),
        _ => return None,
    })
}

/// Texel bytes of a clear value, for the formats clears are emulated for.
fn encode_clear(internal_format: u32, values: &[f32]) -> Option<Vec<u8>> {
    let unorm = |count: usize| {
        values
            .iter()
            .take(count)
            .map(|value| (value.max(0.0).min(1.0) * 255.0).round() as u8)
            .collect::<Vec<_>>()
    };
    let float = |count: usize| {
        values
            .iter()
            .take(count)
            .flat_map(|value| value.to_le_bytes().to_vec())
            .collect::<Vec<_>>()
    };
    Some(match internal_format {
        gl::R8 => unorm(1),
        gl::RG8 => unorm(2),
        gl::RGBA8 | gl::SRGB8_ALPHA8 => unorm(4),
        gl::R32F | gl::DEPTH_COMPONENT32F => float(1),
        gl::RG32F => float(2),
        gl::RGBA32F => float(4),
        _ => return None,
    })
}

fn div_round_up(value: u32, align: u32) -> u32 {
    (value + align - 1) / align
}

#[derive(Clone, Copy, Debug)]
struct Storage {
    internal_format: u32,
    width: u32,
    height: u32,
    /// Depth of a 3D texture, layer count otherwise.
    depth: u32,
    levels: u32,
    volume: bool,
}

/// Placement of the texels of one `(level, z)` image.
#[derive(Clone, Copy, Debug)]
struct ImageLayout {
    block_dimension: u32,
    block_size: u32,
    width: u32,
    height: u32,
    row_pitch: usize,
}

impl ImageLayout {
    fn new(storage: &Storage, level: u32) -> Option<Self> {
        let (block_dimension, block_size) = block_info(storage.internal_format)?;
        let width = (storage.width >> level).max(1);
        let height = (storage.height >> level).max(1);
        Some(Self {
            block_dimension,
            block_size,
            width,
            height,
            row_pitch: (div_round_up(width, block_dimension) * block_size) as usize,
        })
    }

    fn size(&self) -> usize {
        self.row_pitch * self.rows(self.height) as usize
    }

    fn rows(&self, height: u32) -> u32 {
        div_round_up(height, self.block_dimension)
    }

    fn row_bytes(&self, width: u32) -> usize {
        (div_round_up(width, self.block_dimension) * self.block_size) as usize
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y / self.block_dimension) as usize * self.row_pitch
            + ((x / self.block_dimension) * self.block_size) as usize
    }
}

#[derive(Debug, Default)]
struct SoftTexture {
    /// Set by the first bind.
    target: Option<u32>,
    storage: Option<Storage>,
    images: FxHashMap<(u32, u32), Vec<u8>>,
}

#[derive(Debug)]
struct SoftShader {
    ty: u32,
    source: String,
    compiled: bool,
    log: String,
}

#[derive(Debug, Default)]
struct SoftProgram {
    shaders: Vec<ShaderId>,
    linked: bool,
    log: String,
    sources: Vec<(u32, String)>,
    attributes: Vec<String>,
    /// Names handed out as uniform locations and block indices.
    names: Vec<String>,
    uniforms: FxHashMap<String, i32>,
    block_bindings: FxHashMap<String, u32>,
}

impl SoftProgram {
    fn declares(&self, name: &str) -> bool {
        self.linked && self.sources.iter().any(|(_, source)| contains_word(source, name))
    }

    fn intern(&mut self, name: &str) -> u32 {
        match self.names.iter().position(|known| known == name) {
            Some(index) => index as u32,
            None => {
                self.names.push(name.to_string());
                self.names.len() as u32 - 1
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Attached {
    texture: TextureId,
    level: u32,
    z: u32,
}

#[derive(Debug)]
struct SoftFramebuffer {
    attachments: FxHashMap<u32, Attached>,
    draw_buffers: Vec<u32>,
    read_buffer: u32,
}

#[derive(Debug)]
enum Object {
    Buffer(Vec<u8>),
    Texture(SoftTexture),
    Sampler(FxHashMap<u32, Vec<f32>>),
    Shader(SoftShader),
    Program(SoftProgram),
    VertexArray,
    Framebuffer(SoftFramebuffer),
}

fn contains_word(source: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    source.match_indices(word).any(|(start, _)| {
        let before = source[..start].chars().next_back();
        let after = source[start + word.len()..].chars().next();
        !before.map_or(false, is_ident) && !after.map_or(false, is_ident)
    })
}

/// Names of the `in` variables of a vertex shader, in declaration order.
fn vertex_inputs(source: &str) -> Vec<String> {
    source
        .split(';')
        .filter_map(|statement| {
            let mut statement = statement
                .rsplit(|c: char| c == '\n' || c == '{' || c == '}')
                .next()?
                .trim();
            if statement.starts_with("layout") {
                statement = statement.find(')').map_or("", |end| statement[end + 1..].trim());
            }
            let mut tokens = statement.split_whitespace();
            if tokens.next() != Some("in") {
                return None;
            }
            let name = tokens.last()?;
            Some(name.split('[').next().unwrap_or(name).to_string())
        })
        .collect()
}

#[derive(Default)]
struct State {
    objects: FxHashMap<u32, Object>,
    labels: FxHashMap<(u32, u32), String>,
    calls: Vec<Call>,
    validation_errors: Vec<String>,
    buffer_bindings: FxHashMap<u32, BufferId>,
    active_unit: u32,
    texture_units: FxHashMap<(u32, u32), TextureId>,
    pixel_store: FxHashMap<u32, i32>,
    read_framebuffer: Option<FramebufferId>,
    draw_framebuffer: Option<FramebufferId>,
    current_program: Option<ProgramId>,
    surface_size: (u32, u32),
}

impl State {
    fn buffer(&self, id: BufferId) -> Option<&Vec<u8>> {
        match self.objects.get(&id.raw()) {
            Some(Object::Buffer(data)) => Some(data),
            _ => None,
        }
    }

    fn buffer_mut(&mut self, id: BufferId) -> Option<&mut Vec<u8>> {
        match self.objects.get_mut(&id.raw()) {
            Some(Object::Buffer(data)) => Some(data),
            _ => None,
        }
    }

    fn bound_buffer(&self, target: u32) -> Result<BufferId, String> {
        self.buffer_bindings
            .get(&target)
            .cloned()
            .ok_or_else(|| format!("no buffer bound to {:#x}", target))
    }

    fn texture_mut(&mut self, id: TextureId) -> Option<&mut SoftTexture> {
        match self.objects.get_mut(&id.raw()) {
            Some(Object::Texture(texture)) => Some(texture),
            _ => None,
        }
    }

    fn program_mut(&mut self, id: ProgramId) -> Option<&mut SoftProgram> {
        match self.objects.get_mut(&id.raw()) {
            Some(Object::Program(program)) => Some(program),
            _ => None,
        }
    }

    fn framebuffer(&self, id: FramebufferId) -> Option<&SoftFramebuffer> {
        match self.objects.get(&id.raw()) {
            Some(Object::Framebuffer(framebuffer)) => Some(framebuffer),
            _ => None,
        }
    }

    fn framebuffer_mut(&mut self, id: FramebufferId) -> Option<&mut SoftFramebuffer> {
        match self.objects.get_mut(&id.raw()) {
            Some(Object::Framebuffer(framebuffer)) => Some(framebuffer),
            _ => None,
        }
    }

    /// Texture bound to `target` on the active unit, and the layer a cube
    /// face target selects.
    fn bound_texture(&self, target: u32) -> Result<(TextureId, u32), String> {
        let (base, face) = match target.checked_sub(gl::TEXTURE_CUBE_MAP_POSITIVE_X) {
            Some(face) if face < 6 => (gl::TEXTURE_CUBE_MAP, face),
            _ => (target, 0),
        };
        self.texture_units
            .get(&(self.active_unit, base))
            .map(|&texture| (texture, face))
            .ok_or_else(|| format!("no texture bound to {:#x}", target))
    }

    fn pixel_store(&self, parameter: u32) -> u32 {
        self.pixel_store.get(&parameter).cloned().unwrap_or(0).max(0) as u32
    }

    fn image_mut(
        &mut self,
        texture: TextureId,
        level: u32,
        z: u32,
    ) -> Result<(ImageLayout, &mut Vec<u8>), String> {
        let texture_ref = self
            .texture_mut(texture)
            .ok_or_else(|| format!("{:?} is not a live texture", texture))?;
        let storage = texture_ref
            .storage
            .ok_or_else(|| format!("{:?} has no storage", texture))?;
        if level >= storage.levels {
            return Err(format!("{:?} has no level {}", texture, level));
        }
        let slices = if storage.volume {
            (storage.depth >> level).max(1)
        } else {
            storage.depth
        };
        if z >= slices {
            return Err(format!("{:?} has no slice {} at level {}", texture, z, level));
        }
        let layout = ImageLayout::new(&storage, level)
            .ok_or_else(|| format!("unknown internal format {:#x}", storage.internal_format))?;
        let image = texture_ref
            .images
            .entry((level, z))
            .or_insert_with(|| vec![0; layout.size()]);
        Ok((layout, image))
    }

    fn check_extent(layout: &ImageLayout, x: u32, y: u32, width: u32, height: u32) -> Result<(), String> {
        if x + width > layout.width || y + height > layout.height {
            Err(format!(
                "region {}x{} at ({}, {}) exceeds the {}x{} image",
                width, height, x, y, layout.width, layout.height
            ))
        } else {
            Ok(())
        }
    }

    /// Writes rows of blocks from `src` into a region of a texture.
    fn write_region(
        &mut self,
        texture: TextureId,
        level: u32,
        origin: [u32; 3],
        size: [u32; 3],
        src: &[u8],
        row_pitch: usize,
        image_pitch: usize,
    ) -> Result<(), String> {
        let [x, y, z] = origin;
        let [width, height, depth] = size;
        for slice in 0..depth {
            let (layout, image) = self.image_mut(texture, level, z + slice)?;
            Self::check_extent(&layout, x, y, width, height)?;
            let row_bytes = layout.row_bytes(width);
            for row in 0..layout.rows(height) {
                let start = slice as usize * image_pitch + row as usize * row_pitch;
                let bytes = src
                    .get(start..start + row_bytes)
                    .ok_or_else(|| "texel source is too small".to_string())?;
                let dst_start = layout.offset(x, y + row * layout.block_dimension);
                image[dst_start..dst_start + row_bytes].copy_from_slice(bytes);
            }
        }
        Ok(())
    }

    /// Reads a region of a texture as tightly packed rows of blocks.
    fn read_region(
        &mut self,
        texture: TextureId,
        level: u32,
        origin: [u32; 3],
        size: [u32; 3],
    ) -> Result<(Vec<u8>, usize, u32), String> {
        let [x, y, z] = origin;
        let [width, height, depth] = size;
        let mut packed = Vec::new();
        let mut shape = (0, 0);
        for slice in 0..depth {
            let (layout, image) = self.image_mut(texture, level, z + slice)?;
            Self::check_extent(&layout, x, y, width, height)?;
            let row_bytes = layout.row_bytes(width);
            shape = (row_bytes, layout.rows(height));
            for row in 0..layout.rows(height) {
                let start = layout.offset(x, y + row * layout.block_dimension);
                packed.extend_from_slice(&image[start..start + row_bytes]);
            }
        }
        Ok((packed, shape.0, shape.1))
    }

    fn unpack_source(&self, pixels: PixelUnpackData) -> Result<Vec<u8>, String> {
        match pixels {
            PixelUnpackData::Slice(data) => Ok(data.to_vec()),
            PixelUnpackData::BufferOffset(offset) => {
                let buffer = self.bound_buffer(gl::PIXEL_UNPACK_BUFFER)?;
                self.buffer(buffer)
                    .and_then(|data| data.get(offset as usize..))
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| format!("unpack offset {} is outside of {:?}", offset, buffer))
            }
        }
    }

    /// Stores packed rows at a pitch, into the pack buffer or client memory.
    fn store_packed(
        &mut self,
        pixels: PixelPackData,
        packed: &[u8],
        row_bytes: usize,
        row_pitch: usize,
    ) -> Result<(), String> {
        let (dst, base): (&mut [u8], usize) = match pixels {
            PixelPackData::Slice(data) => (data, 0),
            PixelPackData::BufferOffset(offset) => {
                let buffer = self.bound_buffer(gl::PIXEL_PACK_BUFFER)?;
                let data = self
                    .buffer_mut(buffer)
                    .ok_or_else(|| format!("{:?} is not a live buffer", buffer))?;
                (data.as_mut_slice(), offset as usize)
            }
        };
        if row_bytes == 0 {
            return Ok(());
        }
        for (row, bytes) in packed.chunks(row_bytes).enumerate() {
            let start = base + row * row_pitch;
            dst.get_mut(start..start + bytes.len())
                .ok_or_else(|| "pack destination is too small".to_string())?
                .copy_from_slice(bytes);
        }
        Ok(())
    }

    fn attachment(&self, framebuffer: Option<FramebufferId>, attachment: u32) -> Result<Attached, String> {
        let framebuffer = framebuffer
            .ok_or_else(|| "the default framebuffer is not emulated".to_string())?;
        self.framebuffer(framebuffer)
            .and_then(|fb| fb.attachments.get(&attachment).cloned())
            .ok_or_else(|| format!("{:?} has nothing at {:#x}", framebuffer, attachment))
    }

    fn read_attachment(&self) -> Result<Attached, String> {
        let framebuffer = self
            .read_framebuffer
            .ok_or_else(|| "the default framebuffer is not emulated".to_string())?;
        let read_buffer = self
            .framebuffer(framebuffer)
            .map(|fb| fb.read_buffer)
            .ok_or_else(|| format!("{:?} is not a live framebuffer", framebuffer))?;
        self.attachment(Some(framebuffer), read_buffer)
    }

    fn fill(&mut self, attached: Attached, texel: &[u8]) -> Result<(), String> {
        let (layout, image) = self.image_mut(attached.texture, attached.level, attached.z)?;
        if layout.block_size as usize != texel.len() {
            return Err(format!("clear value of {} bytes for {}-byte texels", texel.len(), layout.block_size));
        }
        for chunk in image.chunks_mut(texel.len()) {
            chunk.copy_from_slice(texel);
        }
        Ok(())
    }

    fn clear_attachment(&mut self, target: u32, draw_buffer: u32, values: &[f32]) -> Result<(), String> {
        let framebuffer = match self.draw_framebuffer {
            Some(framebuffer) => framebuffer,
            None => return Ok(()),
        };
        let attachment = match target {
            gl::COLOR => self
                .framebuffer(framebuffer)
                .and_then(|fb| fb.draw_buffers.get(draw_buffer as usize).cloned())
                .unwrap_or(gl::NONE),
            gl::DEPTH => {
                let has_depth = self
                    .framebuffer(framebuffer)
                    .map_or(false, |fb| fb.attachments.contains_key(&gl::DEPTH_ATTACHMENT));
                if has_depth {
                    gl::DEPTH_ATTACHMENT
                } else {
                    gl::DEPTH_STENCIL_ATTACHMENT
                }
            }
            _ => return Err(format!("cannot clear {:#x} with floats", target)),
        };
        if attachment == gl::NONE {
            return Ok(());
        }
        let attached = self.attachment(Some(framebuffer), attachment)?;
        let internal_format = self.storage_format(attached.texture)?;
        match encode_clear(internal_format, values) {
            Some(texel) => self.fill(attached, &texel),
            None => {
                log::trace!("Clears of format {:#x} are not emulated", internal_format);
                Ok(())
            }
        }
    }

    fn storage_format(&mut self, texture: TextureId) -> Result<u32, String> {
        self.texture_mut(texture)
            .and_then(|texture| texture.storage)
            .map(|storage| storage.internal_format)
            .ok_or_else(|| format!("{:?} has no storage", texture))
    }

    fn clear_depth_stencil(&mut self, depth: f32, stencil: i32) -> Result<(), String> {
        if self.draw_framebuffer.is_none() {
            return Ok(());
        }
        let attached = self.attachment(self.draw_framebuffer, gl::DEPTH_STENCIL_ATTACHMENT)?;
        let texel = match self.storage_format(attached.texture)? {
            gl::DEPTH24_STENCIL8 => {
                let depth = (depth.max(0.0).min(1.0) * 0x00FF_FFFF as f32).round() as u32;
                ((depth << 8) | (stencil as u32 & 0xFF)).to_le_bytes().to_vec()
            }
            gl::DEPTH32F_STENCIL8 => {
                let mut texel = depth.to_le_bytes().to_vec();
                texel.extend_from_slice(&[stencil as u8, 0, 0, 0]);
                texel
            }
            other => return Err(format!("{:#x} has no stencil", other)),
        };
        self.fill(attached, &texel)
    }

    fn copy_texture(
        &mut self,
        src: Attached,
        src_origin: [u32; 3],
        dst: Attached,
        dst_origin: [u32; 3],
        size: [u32; 3],
    ) -> Result<(), String> {
        let (packed, row_bytes, rows) = self.read_region(src.texture, src.level, src_origin, size)?;
        let row_pitch = row_bytes;
        self.write_region(
            dst.texture,
            dst.level,
            dst_origin,
            size,
            &packed,
            row_pitch,
            row_pitch * rows as usize,
        )
    }
}

/// A GL context that runs on the CPU.
pub struct SoftContext {
    config: SoftContextConfig,
    next_id: AtomicU32,
    state: Mutex<State>,
}

impl fmt::Debug for SoftContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftContext")
            .field("version", &self.config.version)
            .field("renderer", &self.config.renderer)
            .finish()
    }
}

impl SoftContext {
    pub fn new(config: SoftContextConfig) -> Self {
        Self {
            config,
            next_id: AtomicU32::new(1),
            state: Mutex::new(State {
                surface_size: (1, 1),
                ..State::default()
            }),
        }
    }

    fn alloc(&self, object: Object) -> Result<NonZeroU32, String> {
        let id = NonZeroU32::new(self.next_id.fetch_add(1, Ordering::Relaxed))
            .ok_or_else(|| "object names exhausted".to_string())?;
        self.state.lock().objects.insert(id.get(), object);
        Ok(id)
    }

    fn delete(&self, name: u32) {
        let mut state = self.state.lock();
        if state.objects.remove(&name).is_none() {
            drop(state);
            self.validation_error(format!("deleting object {} which is not alive", name));
        }
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }

    fn validation_error(&self, message: String) {
        log::warn!("Soft GL validation: {}", message);
        self.state.lock().validation_errors.push(message);
    }

    fn check(&self, result: Result<(), String>) {
        if let Err(message) = result {
            self.validation_error(message);
        }
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
        self.state.lock().buffer(buffer).cloned()
    }

    /// Contents of one image of a texture: a mip level of an array layer,
    /// cube face or depth slice.
    pub fn texture_image(&self, texture: TextureId, level: u32, z: u32) -> Option<Vec<u8>> {
        self.state
            .lock()
            .image_mut(texture, level, z)
            .ok()
            .map(|(_, image)| image.clone())
    }

    /// Number of objects created and not deleted yet.
    pub fn live_objects(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Misuse a driver would flag with a GL error or a debug message.
    pub fn validation_errors(&self) -> Vec<String> {
        self.state.lock().validation_errors.clone()
    }

    /// Value last assigned to a sampler uniform of a program.
    pub fn uniform_value(&self, program: ProgramId, name: &str) -> Option<i32> {
        self.state
            .lock()
            .program_mut(program)
            .and_then(|program| program.uniforms.get(name).cloned())
    }

    /// Binding point assigned to a uniform or storage block of a program.
    pub fn block_binding(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.state
            .lock()
            .program_mut(program)
            .and_then(|program| program.block_bindings.get(name).cloned())
    }

    pub fn sampler_parameter(&self, sampler: SamplerId, parameter: u32) -> Option<Vec<f32>> {
        match self.state.lock().objects.get(&sampler.raw()) {
            Some(Object::Sampler(parameters)) => parameters.get(&parameter).cloned(),
            _ => None,
        }
    }

    pub fn label(&self, identifier: u32, name: u32) -> Option<String> {
        self.state.lock().labels.get(&(identifier, name)).cloned()
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.state.lock().surface_size
    }

    fn set_sampler_parameter(&self, sampler: SamplerId, parameter: u32, values: Vec<f32>) {
        let stored = match self.state.lock().objects.get_mut(&sampler.raw()) {
            Some(Object::Sampler(parameters)) => {
                parameters.insert(parameter, values);
                true
            }
            _ => false,
        };
        if !stored {
            self.validation_error(format!("{:?} is not a live sampler", sampler));
        }
    }

    fn block_binding_call(&self, program: ProgramId, index: u32, binding: u32) {
        let mut state = self.state.lock();
        let name = state
            .program_mut(program)
            .and_then(|program| program.names.get(index as usize).cloned());
        match name {
            Some(name) => {
                if let Some(program) = state.program_mut(program) {
                    program.block_bindings.insert(name, binding);
                }
            }
            None => {
                drop(state);
                self.validation_error(format!("{:?} has no block {}", program, index));
            }
        }
    }

    fn block_index(&self, program: ProgramId, name: &str) -> Option<u32> {
        let mut state = self.state.lock();
        let program = state.program_mut(program)?;
        if program.declares(name) {
            Some(program.intern(name))
        } else {
            None
        }
    }

    fn check_draw(&self) {
        if self.state.lock().current_program.is_none() {
            self.validation_error("draw without a program".to_string());
        }
    }

    fn tex_sub_image(
        &self,
        target: u32,
        level: i32,
        offset: [i32; 3],
        size: [i32; 3],
        pixels: PixelUnpackData,
    ) -> Result<(), String> {
        let mut state = self.state.lock();
        let (texture, face) = state.bound_texture(target)?;
        let data = state.unpack_source(pixels)?;
        let internal_format = state.storage_format(texture)?;
        let (_, block_size) = block_info(internal_format)
            .ok_or_else(|| format!("unknown internal format {:#x}", internal_format))?;
        let [width, height, depth] = [size[0] as u32, size[1] as u32, size[2] as u32];
        let row_length = match state.pixel_store(gl::UNPACK_ROW_LENGTH) {
            0 => width,
            length => length,
        };
        let image_height = match state.pixel_store(gl::UNPACK_IMAGE_HEIGHT) {
            0 => height,
            image_height => image_height,
        };
        let row_pitch = (row_length * block_size) as usize;
        state.write_region(
            texture,
            level as u32,
            [offset[0] as u32, offset[1] as u32, offset[2] as u32 + face],
            [width, height, depth],
            &data,
            row_pitch,
            row_pitch * image_height as usize,
        )
    }

    fn compressed_tex_sub_image(
        &self,
        target: u32,
        level: i32,
        offset: [i32; 3],
        size: [i32; 3],
        pixels: CompressedPixelUnpackData,
    ) -> Result<(), String> {
        let mut state = self.state.lock();
        let (texture, face) = state.bound_texture(target)?;
        let data = match pixels {
            CompressedPixelUnpackData::Slice(data) => data.to_vec(),
            CompressedPixelUnpackData::BufferRange(range) => {
                let buffer = state.bound_buffer(gl::PIXEL_UNPACK_BUFFER)?;
                state
                    .buffer(buffer)
                    .and_then(|data| data.get(range.start as usize..range.end as usize))
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| format!("{:?} is outside of {:?}", range, buffer))?
            }
        };
        let internal_format = state.storage_format(texture)?;
        let (block_dimension, block_size) = block_info(internal_format)
            .ok_or_else(|| format!("unknown internal format {:#x}", internal_format))?;
        let [width, height, depth] = [size[0] as u32, size[1] as u32, size[2] as u32];
        let row_pitch = (div_round_up(width, block_dimension) * block_size) as usize;
        let image_pitch = row_pitch * div_round_up(height, block_dimension) as usize;
        if data.len() < image_pitch * depth as usize {
            return Err(format!(
                "compressed upload of {} bytes, {} expected",
                data.len(),
                image_pitch * depth as usize
            ));
        }
        state.write_region(
            texture,
            level as u32,
            [offset[0] as u32, offset[1] as u32, offset[2] as u32 + face],
            [width, height, depth],
            &data,
            row_pitch,
            image_pitch,
        )
    }
}

impl gl::Context for SoftContext {
    fn version(&self) -> Version {
        self.config.version
    }

    fn renderer(&self) -> String {
        self.config.renderer.clone()
    }

    fn supports_extension(&self, name: &str) -> bool {
        self.config.extensions.iter().any(|extension| extension == name)
    }

    fn get_parameter_i32(&self, parameter: u32) -> i32 {
        match parameter {
            gl::MAX_COMBINED_TEXTURE_IMAGE_UNITS => self.config.max_texture_units,
            gl::MAX_UNIFORM_BUFFER_BINDINGS => self.config.max_uniform_buffer_bindings,
            gl::MAX_SHADER_STORAGE_BUFFER_BINDINGS => self.config.max_storage_buffer_bindings,
            gl::MAX_IMAGE_UNITS => self.config.max_image_units,
            gl::MAX_VIEWPORTS => self.config.max_viewports,
            gl::MAX_DRAW_BUFFERS => self.config.max_draw_buffers,
            _ => 0,
        }
    }

    fn get_error(&self) -> u32 {
        gl::NO_ERROR
    }

    fn create_buffer(&self) -> Result<BufferId, String> {
        self.alloc(Object::Buffer(Vec::new())).map(BufferId)
    }

    fn delete_buffer(&self, buffer: BufferId) {
        self.delete(buffer.raw());
    }

    fn bind_buffer(&self, target: u32, buffer: Option<BufferId>) {
        let mut state = self.state.lock();
        match buffer {
            Some(buffer) => state.buffer_bindings.insert(target, buffer),
            None => state.buffer_bindings.remove(&target),
        };
        state.calls.push(Call::BindBuffer { target, buffer });
    }

    fn bind_buffer_range(&self, target: u32, index: u32, buffer: Option<BufferId>, offset: i32, size: i32) {
        let mut state = self.state.lock();
        if let Some(buffer) = buffer {
            state.buffer_bindings.insert(target, buffer);
            let in_bounds = state
                .buffer(buffer)
                .map_or(false, |data| offset >= 0 && size > 0 && (offset + size) as usize <= data.len());
            if !in_bounds {
                drop(state);
                self.validation_error(format!(
                    "binding {} bytes at {} of {:?} to {:#x}[{}]",
                    size, offset, buffer, target, index
                ));
                state = self.state.lock();
            }
        }
        state.calls.push(Call::BindBufferRange {
            target,
            index,
            buffer,
            offset,
            size,
        });
    }

    fn buffer_data_size(&self, target: u32, size: i32, _usage: u32) {
        let mut state = self.state.lock();
        let result = state.bound_buffer(target).and_then(|buffer| {
            let data = state
                .buffer_mut(buffer)
                .ok_or_else(|| format!("{:?} is not a live buffer", buffer))?;
            *data = vec![0; size.max(0) as usize];
            Ok(buffer)
        });
        match result {
            Ok(buffer) => state.calls.push(Call::BufferData { buffer, size }),
            Err(message) => {
                drop(state);
                self.validation_error(message);
            }
        }
    }

    fn buffer_sub_data_u8_slice(&self, target: u32, offset: i32, data: &[u8]) {
        let mut state = self.state.lock();
        let result = state.bound_buffer(target).and_then(|buffer| {
            let contents = state
                .buffer_mut(buffer)
                .ok_or_else(|| format!("{:?} is not a live buffer", buffer))?;
            let start = offset.max(0) as usize;
            contents
                .get_mut(start..start + data.len())
                .ok_or_else(|| format!("writing {} bytes at {} of {:?}", data.len(), offset, buffer))?
                .copy_from_slice(data);
            Ok(buffer)
        });
        match result {
            Ok(buffer) => state.calls.push(Call::BufferSubData {
                buffer,
                offset,
                size: data.len(),
            }),
            Err(message) => {
                drop(state);
                self.validation_error(message);
            }
        }
    }

    fn get_buffer_sub_data(&self, target: u32, offset: i32, data: &mut [u8]) {
        let state = self.state.lock();
        let result = state.bound_buffer(target).and_then(|buffer| {
            let start = offset.max(0) as usize;
            state
                .buffer(buffer)
                .and_then(|contents| contents.get(start..start + data.len()))
                .map(|bytes| data.copy_from_slice(bytes))
                .ok_or_else(|| format!("reading {} bytes at {} of {:?}", data.len(), offset, buffer))
        });
        drop(state);
        self.check(result);
    }

    fn copy_buffer_sub_data(&self, src_target: u32, dst_target: u32, src_offset: i32, dst_offset: i32, size: i32) {
        let mut state = self.state.lock();
        let result = (|| {
            let src = state.bound_buffer(src_target)?;
            let dst = state.bound_buffer(dst_target)?;
            let (src_start, dst_start, size) = (src_offset as usize, dst_offset as usize, size as usize);
            let bytes = state
                .buffer(src)
                .and_then(|data| data.get(src_start..src_start + size))
                .map(<[u8]>::to_vec)
                .ok_or_else(|| format!("buffer copy reads outside of {:?}", src))?;
            state
                .buffer_mut(dst)
                .and_then(|data| data.get_mut(dst_start..dst_start + size))
                .ok_or_else(|| format!("buffer copy writes outside of {:?}", dst))?
                .copy_from_slice(&bytes);
            Ok((src, dst))
        })();
        match result {
            Ok((src, dst)) => state.calls.push(Call::CopyBufferSubData {
                src,
                dst,
                src_offset,
                dst_offset,
                size,
            }),
            Err(message) => {
                drop(state);
                self.validation_error(message);
            }
        }
    }

    fn create_texture(&self) -> Result<TextureId, String> {
        self.alloc(Object::Texture(SoftTexture::default())).map(TextureId)
    }

    fn delete_texture(&self, texture: TextureId) {
        self.delete(texture.raw());
        self.state
            .lock()
            .texture_units
            .retain(|_, bound| *bound != texture);
    }

    fn active_texture(&self, unit: u32) {
        let mut state = self.state.lock();
        state.active_unit = unit.saturating_sub(gl::TEXTURE0);
        state.calls.push(Call::ActiveTexture(unit));
    }

    fn bind_texture(&self, target: u32, texture: Option<TextureId>) {
        let mut state = self.state.lock();
        let unit = state.active_unit;
        let result = match texture {
            Some(texture) => {
                let known = state
                    .texture_mut(texture)
                    .map(|soft| *soft.target.get_or_insert(target));
                match known {
                    Some(first) if first == target => {
                        state.texture_units.insert((unit, target), texture);
                        Ok(())
                    }
                    Some(first) => Err(format!(
                        "{:?} was created as {:#x}, bound as {:#x}",
                        texture, first, target
                    )),
                    None => Err(format!("{:?} is not a live texture", texture)),
                }
            }
            None => {
                state.texture_units.remove(&(unit, target));
                Ok(())
            }
        };
        state.calls.push(Call::BindTexture { target, texture });
        drop(state);
        self.check(result);
    }

    fn tex_storage_2d(&self, target: u32, levels: i32, internal_format: u32, width: i32, height: i32) {
        let layers = if target == gl::TEXTURE_CUBE_MAP { 6 } else { 1 };
        self.tex_storage_3d(target, levels, internal_format, width, height, layers);
    }

    fn tex_storage_3d(&self, target: u32, levels: i32, internal_format: u32, width: i32, height: i32, depth: i32) {
        let mut state = self.state.lock();
        let result = state.bound_texture(target).and_then(|(texture, _)| {
            if block_info(internal_format).is_none() {
                return Err(format!("unknown internal format {:#x}", internal_format));
            }
            let soft = state
                .texture_mut(texture)
                .ok_or_else(|| format!("{:?} is not a live texture", texture))?;
            if soft.storage.is_some() {
                return Err(format!("{:?} already has storage", texture));
            }
            soft.storage = Some(Storage {
                internal_format,
                width: width as u32,
                height: height as u32,
                depth: depth as u32,
                levels: levels as u32,
                volume: target == gl::TEXTURE_3D,
            });
            Ok(texture)
        });
        match result {
            Ok(texture) => state.calls.push(Call::TexStorage {
                texture,
                internal_format,
                size: [width, height, depth],
                levels,
            }),
            Err(message) => {
                drop(state);
                self.validation_error(message);
            }
        }
    }

    fn tex_storage_2d_multisample(
        &self,
        target: u32,
        _samples: i32,
        internal_format: u32,
        width: i32,
        height: i32,
        _fixed_sample_locations: bool,
    ) {
        // samples collapse into one texel
        self.tex_storage_3d(target, 1, internal_format, width, height, 1);
    }

    fn tex_parameter_i32(&self, _target: u32, _parameter: u32, _value: i32) {}

    fn tex_sub_image_2d(
        &self,
        target: u32,
        level: i32,
        x_offset: i32,
        y_offset: i32,
        width: i32,
        height: i32,
        _format: u32,
        _ty: u32,
        pixels: PixelUnpackData,
    ) {
        let result = self.tex_sub_image(target, level, [x_offset, y_offset, 0], [width, height, 1], pixels);
        self.record(Call::TexSubImage {
            target,
            level,
            offset: [x_offset, y_offset, 0],
            size: [width, height, 1],
        });
        self.check(result);
    }

    fn tex_sub_image_3d(
        &self,
        target: u32,
        level: i32,
        x_offset: i32,
        y_offset: i32,
        z_offset: i32,
        width: i32,
        height: i32,
        depth: i32,
        _format: u32,
        _ty: u32,
        pixels: PixelUnpackData,
    ) {
        let offset = [x_offset, y_offset, z_offset];
        let size = [width, height, depth];
        let result = self.tex_sub_image(target, level, offset, size, pixels);
        self.record(Call::TexSubImage {
            target,
            level,
            offset,
            size,
        });
        self.check(result);
    }

    fn compressed_tex_sub_image_2d(
        &self,
        target: u32,
        level: i32,
        x_offset: i32,
        y_offset: i32,
        width: i32,
        height: i32,
        _format: u32,
        pixels: CompressedPixelUnpackData,
    ) {
        let offset = [x_offset, y_offset, 0];
        let size = [width, height, 1];
        let result = self.compressed_tex_sub_image(target, level, offset, size, pixels);
        self.record(Call::CompressedTexSubImage {
            target,
            level,
            offset,
            size,
        });
        self.check(result);
    }

    fn compressed_tex_sub_image_3d(
        &self,
        target: u32,
        level: i32,
        x_offset: i32,
        y_offset: i32,
        z_offset: i32,
        width: i32,
        height: i32,
        depth: i32,
        _format: u32,
        pixels: CompressedPixelUnpackData,
    ) {
        let offset = [x_offset, y_offset, z_offset];
        let size = [width, height, depth];
        let result = self.compressed_tex_sub_image(target, level, offset, size, pixels);
        self.record(Call::CompressedTexSubImage {
            target,
            level,
            offset,
            size,
        });
        self.check(result);
    }

    fn get_compressed_texture_sub_image(
        &self,
        texture: TextureId,
        level: i32,
        x_offset: i32,
        y_offset: i32,
        z_offset: i32,
        width: i32,
        height: i32,
        depth: i32,
        pixels: PixelPackData,
    ) {
        let mut state = self.state.lock();
        let result = state
            .read_region(
                texture,
                level as u32,
                [x_offset as u32, y_offset as u32, z_offset as u32],
                [width as u32, height as u32, depth as u32],
            )
            .and_then(|(packed, row_bytes, _)| state.store_packed(pixels, &packed, row_bytes, row_bytes));
        state.calls.push(Call::GetCompressedTextureSubImage { texture, level });
        drop(state);
        self.check(result);
    }

    fn copy_image_sub_data(
        &self,
        src: TextureId,
        _src_target: u32,
        src_level: i32,
        src_x: i32,
        src_y: i32,
        src_z: i32,
        dst: TextureId,
        _dst_target: u32,
        dst_level: i32,
        dst_x: i32,
        dst_y: i32,
        dst_z: i32,
        width: i32,
        height: i32,
        depth: i32,
    ) {
        let mut state = self.state.lock();
        let result = state.copy_texture(
            Attached {
                texture: src,
                level: src_level as u32,
                z: 0,
            },
            [src_x as u32, src_y as u32, src_z as u32],
            Attached {
                texture: dst,
                level: dst_level as u32,
                z: 0,
            },
            [dst_x as u32, dst_y as u32, dst_z as u32],
            [width as u32, height as u32, depth as u32],
        );
        state.calls.push(Call::CopyImageSubData {
            src,
            dst,
            size: [width, height, depth],
        });
        drop(state);
        self.check(result);
    }

    fn copy_tex_sub_image_2d(
        &self,
        target: u32,
        level: i32,
        x_offset: i32,
        y_offset: i32,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) {
        let mut state = self.state.lock();
        let result = state.read_attachment().and_then(|src| {
            let (dst, face) = state.bound_texture(target)?;
            state.copy_texture(
                src,
                [x as u32, y as u32, src.z],
                Attached {
                    texture: dst,
                    level: level as u32,
                    z: 0,
                },
                [x_offset as u32, y_offset as u32, face],
                [width as u32, height as u32, 1],
            )
        });
        state.calls.push(Call::CopyTexSubImage2d { target, level });
        drop(state);
        self.check(result);
    }

    fn generate_mipmap(&self, target: u32) {
        self.record(Call::GenerateMipmap(target));
    }

    fn pixel_store_i32(&self, parameter: u32, value: i32) {
        let mut state = self.state.lock();
        state.pixel_store.insert(parameter, value);
        state.calls.push(Call::PixelStore(parameter, value));
    }

    fn read_pixels(&self, x: i32, y: i32, width: i32, height: i32, _format: u32, _ty: u32, pixels: PixelPackData) {
        let mut state = self.state.lock();
        let result = state.read_attachment().and_then(|src| {
            let (packed, row_bytes, _) = state.read_region(
                src.texture,
                src.level,
                [x as u32, y as u32, src.z],
                [width as u32, height as u32, 1],
            )?;
            let texel_size = if width > 0 { row_bytes / width as usize } else { 0 };
            let row_pitch = match state.pixel_store(gl::PACK_ROW_LENGTH) {
                0 => row_bytes,
                length => length as usize * texel_size,
            };
            state.store_packed(pixels, &packed, row_bytes, row_pitch)
        });
        state.calls.push(Call::ReadPixels {
            x,
            y,
            width,
            height,
        });
        drop(state);
        self.check(result);
    }

    fn create_sampler(&self) -> Result<SamplerId, String> {
        self.alloc(Object::Sampler(FxHashMap::default())).map(SamplerId)
    }

    fn delete_sampler(&self, sampler: SamplerId) {
        self.delete(sampler.raw());
    }

    fn bind_sampler(&self, unit: u32, sampler: Option<SamplerId>) {
        self.record(Call::BindSampler { unit, sampler });
    }

    fn sampler_parameter_i32(&self, sampler: SamplerId, parameter: u32, value: i32) {
        self.set_sampler_parameter(sampler, parameter, vec![value as f32]);
    }

    fn sampler_parameter_f32(&self, sampler: SamplerId, parameter: u32, value: f32) {
        self.set_sampler_parameter(sampler, parameter, vec![value]);
    }

    fn sampler_parameter_f32_slice(&self, sampler: SamplerId, parameter: u32, values: &[f32]) {
        self.set_sampler_parameter(sampler, parameter, values.to_vec());
    }

    fn create_shader(&self, shader_type: u32) -> Result<ShaderId, String> {
        match shader_type {
            gl::VERTEX_SHADER | gl::FRAGMENT_SHADER | gl::COMPUTE_SHADER => {}
            _ => return Err(format!("unknown shader type {:#x}", shader_type)),
        }
        self.alloc(Object::Shader(SoftShader {
            ty: shader_type,
            source: String::new(),
            compiled: false,
            log: String::new(),
        }))
        .map(ShaderId)
    }

    fn shader_source(&self, shader: ShaderId, source: &str) {
        if let Some(Object::Shader(soft)) = self.state.lock().objects.get_mut(&shader.raw()) {
            soft.source = source.to_string();
        }
    }

    fn compile_shader(&self, shader: ShaderId) {
        if let Some(Object::Shader(soft)) = self.state.lock().objects.get_mut(&shader.raw()) {
            match soft.source.lines().find(|line| line.trim_start().starts_with("#error")) {
                Some(line) => {
                    soft.compiled = false;
                    soft.log = format!("0:1: error: {}", line.trim());
                }
                None if soft.source.trim().is_empty() => {
                    soft.compiled = false;
                    soft.log = "0:0: error: empty source".to_string();
                }
                None => {
                    soft.compiled = true;
                    soft.log.clear();
                }
            }
        }
    }

    fn get_shader_compile_status(&self, shader: ShaderId) -> bool {
        match self.state.lock().objects.get(&shader.raw()) {
            Some(Object::Shader(soft)) => soft.compiled,
            _ => false,
        }
    }

    fn get_shader_info_log(&self, shader: ShaderId) -> String {
        match self.state.lock().objects.get(&shader.raw()) {
            Some(Object::Shader(soft)) => soft.log.clone(),
            _ => String::new(),
        }
    }

    fn delete_shader(&self, shader: ShaderId) {
        self.delete(shader.raw());
    }

    fn create_program(&self) -> Result<ProgramId, String> {
        self.alloc(Object::Program(SoftProgram::default())).map(ProgramId)
    }

    fn attach_shader(&self, program: ProgramId, shader: ShaderId) {
        if let Some(soft) = self.state.lock().program_mut(program) {
            soft.shaders.push(shader);
        }
    }

    fn detach_shader(&self, program: ProgramId, shader: ShaderId) {
        if let Some(soft) = self.state.lock().program_mut(program) {
            soft.shaders.retain(|&attached| attached != shader);
        }
    }

    fn link_program(&self, program: ProgramId) {
        let mut state = self.state.lock();
        let shaders = match state.program_mut(program) {
            Some(soft) => soft.shaders.clone(),
            None => return,
        };
        let mut sources = Vec::new();
        let mut log = String::new();
        if shaders.is_empty() {
            log = "no shaders attached".to_string();
        }
        for shader in shaders {
            match state.objects.get(&shader.raw()) {
                Some(Object::Shader(soft)) if soft.compiled => {
                    sources.push((soft.ty, soft.source.clone()))
                }
                _ => log = format!("{:?} is not compiled", shader),
            }
        }
        if let Some(soft) = state.program_mut(program) {
            soft.linked = log.is_empty();
            soft.log = log;
            if soft.linked {
                soft.attributes = sources
                    .iter()
                    .filter(|(ty, _)| *ty == gl::VERTEX_SHADER)
                    .flat_map(|(_, source)| vertex_inputs(source))
                    .collect();
                soft.sources = sources;
            }
        }
    }

    fn get_program_link_status(&self, program: ProgramId) -> bool {
        self.state
            .lock()
            .program_mut(program)
            .map_or(false, |soft| soft.linked)
    }

    fn get_program_info_log(&self, program: ProgramId) -> String {
        self.state
            .lock()
            .program_mut(program)
            .map(|soft| soft.log.clone())
            .unwrap_or_default()
    }

    fn delete_program(&self, program: ProgramId) {
        self.delete(program.raw());
    }

    fn use_program(&self, program: Option<ProgramId>) {
        let mut state = self.state.lock();
        state.current_program = program;
        state.calls.push(Call::UseProgram(program));
    }

    fn get_attrib_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.state
            .lock()
            .program_mut(program)?
            .attributes
            .iter()
            .position(|attribute| attribute == name)
            .map(|location| location as u32)
    }

    fn get_uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.block_index(program, name).map(UniformLocation)
    }

    fn uniform_1_i32(&self, location: Option<UniformLocation>, value: i32) {
        let location = match location {
            Some(location) => location,
            None => return,
        };
        let mut state = self.state.lock();
        let result = match state.current_program {
            Some(program) => match state.program_mut(program) {
                Some(soft) => match soft.names.get(location.0 as usize).cloned() {
                    Some(name) => {
                        soft.uniforms.insert(name, value);
                        Ok(())
                    }
                    None => Err(format!("{:?} has no uniform at {:?}", program, location)),
                },
                None => Err(format!("{:?} is not a live program", program)),
            },
            None => Err("setting a uniform without a program".to_string()),
        };
        state.calls.push(Call::Uniform1i { location, value });
        drop(state);
        self.check(result);
    }

    fn get_uniform_block_index(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.block_index(program, name)
    }

    fn uniform_block_binding(&self, program: ProgramId, index: u32, binding: u32) {
        self.block_binding_call(program, index, binding);
        self.record(Call::UniformBlockBinding {
            program,
            index,
            binding,
        });
    }

    fn get_shader_storage_block_index(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.block_index(program, name)
    }

    fn shader_storage_block_binding(&self, program: ProgramId, index: u32, binding: u32) {
        self.block_binding_call(program, index, binding);
        self.record(Call::ShaderStorageBlockBinding {
            program,
            index,
            binding,
        });
    }

    fn create_vertex_array(&self) -> Result<VertexArrayId, String> {
        self.alloc(Object::VertexArray).map(VertexArrayId)
    }

    fn delete_vertex_array(&self, vertex_array: VertexArrayId) {
        self.delete(vertex_array.raw());
    }

    fn bind_vertex_array(&self, vertex_array: Option<VertexArrayId>) {
        self.record(Call::BindVertexArray(vertex_array));
    }

    fn enable_vertex_attrib_array(&self, index: u32) {
        self.record(Call::EnableVertexAttribArray(index));
    }

    fn disable_vertex_attrib_array(&self, index: u32) {
        self.record(Call::DisableVertexAttribArray(index));
    }

    fn vertex_attrib_pointer_f32(
        &self,
        index: u32,
        size: i32,
        data_type: u32,
        normalized: bool,
        stride: i32,
        offset: i32,
    ) {
        self.record(Call::VertexAttribPointer {
            index,
            size,
            data_type,
            normalized,
            integer: false,
            stride,
            offset,
        });
    }

    fn vertex_attrib_pointer_i32(&self, index: u32, size: i32, data_type: u32, stride: i32, offset: i32) {
        self.record(Call::VertexAttribPointer {
            index,
            size,
            data_type,
            normalized: false,
            integer: true,
            stride,
            offset,
        });
    }

    fn vertex_attrib_divisor(&self, index: u32, divisor: u32) {
        self.record(Call::VertexAttribDivisor { index, divisor });
    }

    fn create_framebuffer(&self) -> Result<FramebufferId, String> {
        self.alloc(Object::Framebuffer(SoftFramebuffer {
            attachments: FxHashMap::default(),
            draw_buffers: vec![gl::COLOR_ATTACHMENT0],
            read_buffer: gl::COLOR_ATTACHMENT0,
        }))
        .map(FramebufferId)
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        self.delete(framebuffer.raw());
    }

    fn bind_framebuffer(&self, target: u32, framebuffer: Option<FramebufferId>) {
        let mut state = self.state.lock();
        match target {
            gl::READ_FRAMEBUFFER => state.read_framebuffer = framebuffer,
            gl::DRAW_FRAMEBUFFER => state.draw_framebuffer = framebuffer,
            _ => {
                state.read_framebuffer = framebuffer;
                state.draw_framebuffer = framebuffer;
            }
        }
        state.calls.push(Call::BindFramebuffer {
            target,
            framebuffer,
        });
    }

    fn framebuffer_texture_2d(
        &self,
        target: u32,
        attachment: u32,
        texture_target: u32,
        texture: Option<TextureId>,
        level: i32,
    ) {
        let face = match texture_target.checked_sub(gl::TEXTURE_CUBE_MAP_POSITIVE_X) {
            Some(face) if face < 6 => face as i32,
            _ => 0,
        };
        self.framebuffer_texture_layer(target, attachment, texture, level, face);
    }

    fn framebuffer_texture_layer(
        &self,
        target: u32,
        attachment: u32,
        texture: Option<TextureId>,
        level: i32,
        layer: i32,
    ) {
        let mut state = self.state.lock();
        let bound = match target {
            gl::READ_FRAMEBUFFER => state.read_framebuffer,
            _ => state.draw_framebuffer,
        };
        let result = match bound.and_then(|framebuffer| state.framebuffer_mut(framebuffer)) {
            Some(framebuffer) => {
                match texture {
                    Some(texture) => framebuffer.attachments.insert(
                        attachment,
                        Attached {
                            texture,
                            level: level as u32,
                            z: layer as u32,
                        },
                    ),
                    None => framebuffer.attachments.remove(&attachment),
                };
                Ok(())
            }
            None => Err(format!("attaching to framebuffer {:?}", bound)),
        };
        state.calls.push(Call::FramebufferTexture {
            target,
            attachment,
            texture,
            level,
            layer,
        });
        drop(state);
        self.check(result);
    }

    fn check_framebuffer_status(&self, target: u32) -> u32 {
        let state = self.state.lock();
        let bound = match target {
            gl::READ_FRAMEBUFFER => state.read_framebuffer,
            _ => state.draw_framebuffer,
        };
        match bound.and_then(|framebuffer| state.framebuffer(framebuffer)) {
            Some(framebuffer) if framebuffer.attachments.is_empty() => 0x8CDD,
            _ => gl::FRAMEBUFFER_COMPLETE,
        }
    }

    fn draw_buffers(&self, buffers: &[u32]) {
        let mut state = self.state.lock();
        if let Some(framebuffer) = state.draw_framebuffer {
            if let Some(framebuffer) = state.framebuffer_mut(framebuffer) {
                framebuffer.draw_buffers = buffers.to_vec();
            }
        }
        state.calls.push(Call::DrawBuffers(buffers.to_vec()));
    }

    fn read_buffer(&self, src: u32) {
        let mut state = self.state.lock();
        if let Some(framebuffer) = state.read_framebuffer {
            if let Some(framebuffer) = state.framebuffer_mut(framebuffer) {
                framebuffer.read_buffer = src;
            }
        }
        state.calls.push(Call::ReadBuffer(src));
    }

    fn blit_framebuffer(
        &self,
        src_x0: i32,
        src_y0: i32,
        src_x1: i32,
        src_y1: i32,
        dst_x0: i32,
        dst_y0: i32,
        dst_x1: i32,
        dst_y1: i32,
        mask: u32,
        filter: u32,
    ) {
        let mut state = self.state.lock();
        let result = (|| {
            let (width, height) = (src_x1 - src_x0, src_y1 - src_y0);
            if (width, height) != (dst_x1 - dst_x0, dst_y1 - dst_y0) {
                return Err("scaling blits are not emulated".to_string());
            }
            let src = state.read_attachment()?;
            let draw_buffer = state
                .draw_framebuffer
                .and_then(|framebuffer| state.framebuffer(framebuffer))
                .and_then(|framebuffer| framebuffer.draw_buffers.first().cloned())
                .unwrap_or(gl::COLOR_ATTACHMENT0);
            let dst = state.attachment(state.draw_framebuffer, draw_buffer)?;
            state.copy_texture(
                src,
                [src_x0 as u32, src_y0 as u32, src.z],
                dst,
                [dst_x0 as u32, dst_y0 as u32, dst.z],
                [width as u32, height as u32, 1],
            )
        })();
        state.calls.push(Call::BlitFramebuffer {
            src: [src_x0, src_y0, src_x1, src_y1],
            dst: [dst_x0, dst_y0, dst_x1, dst_y1],
            mask,
            filter,
        });
        drop(state);
        self.check(result);
    }

    fn enable(&self, parameter: u32) {
        self.record(Call::Enable(parameter));
    }

    fn disable(&self, parameter: u32) {
        self.record(Call::Disable(parameter));
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        self.record(Call::Viewport([x, y, width, height]));
    }

    fn depth_range_f32(&self, near: f32, far: f32) {
        self.record(Call::DepthRange(near, far));
    }

    fn viewport_f32_slice(&self, first: u32, count: i32, values: &[[f32; 4]]) {
        if first as usize + count.max(0) as usize > self.config.max_viewports as usize {
            self.validation_error(format!("{} viewports from {}", count, first));
        }
        self.record(Call::ViewportArray(values.to_vec()));
    }

    fn depth_range_f64_slice(&self, _first: u32, _count: i32, values: &[[f64; 2]]) {
        self.record(Call::DepthRangeArray(values.to_vec()));
    }

    fn scissor(&self, x: i32, y: i32, width: i32, height: i32) {
        self.record(Call::Scissor([x, y, width, height]));
    }

    fn scissor_slice(&self, _first: u32, _count: i32, scissors: &[[i32; 4]]) {
        self.record(Call::ScissorArray(scissors.to_vec()));
    }

    fn front_face(&self, value: u32) {
        self.record(Call::FrontFace(value));
    }

    fn cull_face(&self, value: u32) {
        self.record(Call::CullFace(value));
    }

    fn polygon_mode(&self, _face: u32, mode: u32) {
        if self.config.version.is_embedded {
            self.validation_error("glPolygonMode on GL ES".to_string());
        }
        self.record(Call::PolygonMode(mode));
    }

    fn blend_color(&self, red: f32, green: f32, blue: f32, alpha: f32) {
        self.record(Call::BlendColor([red, green, blue, alpha]));
    }

    fn blend_equation_separate(&self, mode_rgb: u32, mode_alpha: u32) {
        self.record(Call::BlendEquation {
            draw_buffer: None,
            color: mode_rgb,
            alpha: mode_alpha,
        });
    }

    fn blend_func_separate(&self, src_rgb: u32, dst_rgb: u32, src_alpha: u32, dst_alpha: u32) {
        self.record(Call::BlendFunc {
            draw_buffer: None,
            factors: [src_rgb, dst_rgb, src_alpha, dst_alpha],
        });
    }

    fn blend_equation_separate_draw_buffer(&self, draw_buffer: u32, mode_rgb: u32, mode_alpha: u32) {
        self.record(Call::BlendEquation {
            draw_buffer: Some(draw_buffer),
            color: mode_rgb,
            alpha: mode_alpha,
        });
    }

    fn blend_func_separate_draw_buffer(
        &self,
        draw_buffer: u32,
        src_rgb: u32,
        dst_rgb: u32,
        src_alpha: u32,
        dst_alpha: u32,
    ) {
        self.record(Call::BlendFunc {
            draw_buffer: Some(draw_buffer),
            factors: [src_rgb, dst_rgb, src_alpha, dst_alpha],
        });
    }

    fn enable_draw_buffer(&self, parameter: u32, draw_buffer: u32) {
        self.record(Call::EnableDrawBuffer(parameter, draw_buffer));
    }

    fn disable_draw_buffer(&self, parameter: u32, draw_buffer: u32) {
        self.record(Call::DisableDrawBuffer(parameter, draw_buffer));
    }

    fn color_mask(&self, red: bool, green: bool, blue: bool, alpha: bool) {
        self.record(Call::ColorMask {
            draw_buffer: None,
            mask: [red, green, blue, alpha],
        });
    }

    fn color_mask_draw_buffer(&self, draw_buffer: u32, red: bool, green: bool, blue: bool, alpha: bool) {
        self.record(Call::ColorMask {
            draw_buffer: Some(draw_buffer),
            mask: [red, green, blue, alpha],
        });
    }

    fn depth_func(&self, func: u32) {
        self.record(Call::DepthFunc(func));
    }

    fn depth_mask(&self, value: bool) {
        self.record(Call::DepthMask(value));
    }

    fn stencil_func_separate(&self, face: u32, func: u32, reference: i32, mask: u32) {
        self.record(Call::StencilFunc {
            face,
            function: func,
            reference,
            mask,
        });
    }

    fn stencil_op_separate(&self, face: u32, stencil_fail: u32, depth_fail: u32, pass: u32) {
        self.record(Call::StencilOp {
            face,
            fail: stencil_fail,
            depth_fail,
            pass,
        });
    }

    fn stencil_mask_separate(&self, face: u32, mask: u32) {
        self.record(Call::StencilMask { face, mask });
    }

    fn clear_buffer_f32_slice(&self, target: u32, draw_buffer: u32, values: &[f32]) {
        let mut state = self.state.lock();
        let result = state.clear_attachment(target, draw_buffer, values);
        state.calls.push(Call::ClearBuffer {
            target,
            draw_buffer,
            values: values.to_vec(),
        });
        drop(state);
        self.check(result);
    }

    fn clear_buffer_depth_stencil(&self, _target: u32, _draw_buffer: u32, depth: f32, stencil: i32) {
        let mut state = self.state.lock();
        let result = state.clear_depth_stencil(depth, stencil);
        state.calls.push(Call::ClearDepthStencil { depth, stencil });
        drop(state);
        self.check(result);
    }

    fn draw_arrays(&self, mode: u32, first: i32, count: i32) {
        self.check_draw();
        self.record(Call::DrawArrays { mode, first, count });
    }

    fn draw_arrays_instanced(&self, mode: u32, first: i32, count: i32, instance_count: i32) {
        self.check_draw();
        self.record(Call::DrawArraysInstanced {
            mode,
            first,
            count,
            instance_count,
        });
    }

    fn draw_arrays_instanced_base_instance(
        &self,
        mode: u32,
        first: i32,
        count: i32,
        instance_count: i32,
        base_instance: u32,
    ) {
        self.check_draw();
        self.record(Call::DrawArraysInstancedBaseInstance {
            mode,
            first,
            count,
            instance_count,
            base_instance,
        });
    }

    fn draw_elements(&self, mode: u32, count: i32, element_type: u32, offset: i32) {
        self.check_draw();
        self.record(Call::DrawElements {
            mode,
            count,
            element_type,
            offset,
        });
    }

    fn draw_elements_instanced(&self, mode: u32, count: i32, element_type: u32, offset: i32, instance_count: i32) {
        self.check_draw();
        self.record(Call::DrawElementsInstanced {
            mode,
            count,
            element_type,
            offset,
            instance_count,
        });
    }

    fn draw_elements_base_vertex(&self, mode: u32, count: i32, element_type: u32, offset: i32, base_vertex: i32) {
        self.check_draw();
        self.record(Call::DrawElementsBaseVertex {
            mode,
            count,
            element_type,
            offset,
            base_vertex,
        });
    }

    fn draw_elements_instanced_base_vertex(
        &self,
        mode: u32,
        count: i32,
        element_type: u32,
        offset: i32,
        instance_count: i32,
        base_vertex: i32,
    ) {
        self.check_draw();
        self.record(Call::DrawElementsInstancedBaseVertex {
            mode,
            count,
            element_type,
            offset,
            instance_count,
            base_vertex,
        });
    }

    fn draw_elements_instanced_base_vertex_base_instance(
        &self,
        mode: u32,
        count: i32,
        element_type: u32,
        offset: i32,
        instance_count: i32,
        base_vertex: i32,
        base_instance: u32,
    ) {
        self.check_draw();
        self.record(Call::DrawElementsInstancedBaseVertexBaseInstance {
            mode,
            count,
            element_type,
            offset,
            instance_count,
            base_vertex,
            base_instance,
        });
    }

    fn draw_arrays_indirect_offset(&self, mode: u32, offset: i32) {
        self.check_draw();
        self.record(Call::DrawArraysIndirect { mode, offset });
    }

    fn draw_elements_indirect_offset(&self, mode: u32, element_type: u32, offset: i32) {
        self.check_draw();
        self.record(Call::DrawElementsIndirect {
            mode,
            element_type,
            offset,
        });
    }

    fn dispatch_compute(&self, groups_x: u32, groups_y: u32, groups_z: u32) {
        self.check_draw();
        self.record(Call::DispatchCompute([groups_x, groups_y, groups_z]));
    }

    fn dispatch_compute_indirect(&self, offset: i32) {
        self.check_draw();
        self.record(Call::DispatchComputeIndirect(offset));
    }

    fn memory_barrier(&self, barriers: u32) {
        self.record(Call::MemoryBarrier(barriers));
    }

    fn bind_image_texture(
        &self,
        unit: u32,
        texture: Option<TextureId>,
        _level: i32,
        layered: bool,
        _layer: i32,
        access: u32,
        format: u32,
    ) {
        self.record(Call::BindImageTexture {
            unit,
            texture,
            layered,
            access,
            format,
        });
    }

    fn push_debug_group(&self, _source: u32, _id: u32, message: &str) {
        self.record(Call::PushDebugGroup(message.to_string()));
    }

    fn pop_debug_group(&self) {
        self.record(Call::PopDebugGroup);
    }

    fn debug_message_insert(&self, _source: u32, _ty: u32, _id: u32, _severity: u32, message: &str) {
        self.record(Call::DebugMessageInsert(message.to_string()));
    }

    fn object_label(&self, identifier: u32, name: u32, label: Option<&str>) {
        let mut state = self.state.lock();
        match label {
            Some(label) => state.labels.insert((identifier, name), label.to_string()),
            None => state.labels.remove(&(identifier, name)),
        };
    }

    fn flush(&self) {
        self.record(Call::Flush);
    }

    fn finish(&self) {
        self.record(Call::Finish);
    }

    fn swap_buffers(&self) {
        self.record(Call::SwapBuffers);
    }

    fn set_swap_interval(&self, interval: i32) {
        self.record(Call::SetSwapInterval(interval));
    }

    fn resize_surface(&self, width: u32, height: u32) {
        let mut state = self.state.lock();
        state.surface_size = (width, height);
        state.calls.push(Call::ResizeSurface(width, height));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gles::native::Context as _;

    fn texture_2d(gl: &SoftContext, internal_format: u32, width: i32, height: i32) -> TextureId {
        let texture = gl.create_texture().unwrap();
        gl.bind_texture(gl::TEXTURE_2D, Some(texture));
        gl.tex_storage_2d(gl::TEXTURE_2D, 1, internal_format, width, height);
        texture
    }

    #[test]
    fn uploads_honor_the_row_length() {
        let gl = SoftContext::new(SoftContextConfig::default());
        let texture = texture_2d(&gl, gl::R8, 4, 2);
        gl.pixel_store_i32(gl::UNPACK_ROW_LENGTH, 3);
        // two rows of three texels, the last one of each row skipped
        let texels = [1, 2, 9, 3, 4, 9];
        gl.tex_sub_image_2d(
            gl::TEXTURE_2D,
            0,
            1,
            0,
            2,
            2,
            gl::RED,
            gl::UNSIGNED_BYTE,
            PixelUnpackData::Slice(&texels),
        );
        assert_eq!(gl.texture_image(texture, 0, 0).unwrap(), vec![0, 1, 2, 0, 0, 3, 4, 0]);
        assert!(gl.validation_errors().is_empty());
    }

    #[test]
    fn read_pixels_goes_through_the_read_framebuffer() {
        let gl = SoftContext::new(SoftContextConfig::default());
        let texture = texture_2d(&gl, gl::RG8, 2, 2);
        gl.tex_sub_image_2d(
            gl::TEXTURE_2D,
            0,
            0,
            0,
            2,
            2,
            gl::RG,
            gl::UNSIGNED_BYTE,
            PixelUnpackData::Slice(&[1, 2, 3, 4, 5, 6, 7, 8]),
        );
        let fbo = gl.create_framebuffer().unwrap();
        gl.bind_framebuffer(gl::READ_FRAMEBUFFER, Some(fbo));
        gl.framebuffer_texture_2d(
            gl::READ_FRAMEBUFFER,
            gl::COLOR_ATTACHMENT0,
            gl::TEXTURE_2D,
            Some(texture),
            0,
        );
        let mut out = [0u8; 4];
        gl.read_pixels(0, 1, 2, 1, gl::RG, gl::UNSIGNED_BYTE, PixelPackData::Slice(&mut out));
        assert_eq!(out, [5, 6, 7, 8]);
    }

    #[test]
    fn compressed_uploads_are_addressed_by_block() {
        let gl = SoftContext::new(SoftContextConfig::default());
        let texture = texture_2d(&gl, gl::COMPRESSED_RGBA_S3TC_DXT1_EXT, 8, 4);
        gl.compressed_tex_sub_image_2d(
            gl::TEXTURE_2D,
            0,
            4,
            0,
            4,
            4,
            gl::COMPRESSED_RGBA_S3TC_DXT1_EXT,
            CompressedPixelUnpackData::Slice(&[7; 8]),
        );
        let image = gl.texture_image(texture, 0, 0).unwrap();
        assert_eq!(&image[..8], &[0; 8]);
        assert_eq!(&image[8..], &[7; 8]);
    }

    #[test]
    fn color_clears_fill_the_draw_buffer() {
        let gl = SoftContext::new(SoftContextConfig::default());
        let texture = texture_2d(&gl, gl::RGBA8, 2, 1);
        let fbo = gl.create_framebuffer().unwrap();
        gl.bind_framebuffer(gl::DRAW_FRAMEBUFFER, Some(fbo));
        gl.framebuffer_texture_2d(
            gl::DRAW_FRAMEBUFFER,
            gl::COLOR_ATTACHMENT0,
            gl::TEXTURE_2D,
            Some(texture),
            0,
        );
        gl.clear_buffer_f32_slice(gl::COLOR, 0, &[1.0, 0.0, 0.0, 1.0]);
        assert_eq!(
            gl.texture_image(texture, 0, 0).unwrap(),
            vec![255, 0, 0, 255, 255, 0, 0, 255]
        );
    }

    #[test]
    fn attribute_locations_follow_declaration_order() {
        let gl = SoftContext::new(SoftContextConfig::default());
        let vs = gl.create_shader(gl::VERTEX_SHADER).unwrap();
        gl.shader_source(
            vs,
            "#version 330 core\nin vec3 a_Position;\nlayout(location = 1) in vec2 a_Uv;\nuniform Globals { mat4 u_Mvp; };\nvoid main() { gl_Position = u_Mvp * vec4(a_Position, 1.0); }",
        );
        gl.compile_shader(vs);
        assert!(gl.get_shader_compile_status(vs));
        let program = gl.create_program().unwrap();
        gl.attach_shader(program, vs);
        gl.link_program(program);
        assert!(gl.get_program_link_status(program));
        assert_eq!(gl.get_attrib_location(program, "a_Position"), Some(0));
        assert_eq!(gl.get_attrib_location(program, "a_Uv"), Some(1));
        assert!(gl.get_uniform_block_index(program, "Globals").is_some());
        assert!(gl.get_uniform_block_index(program, "Global").is_none());
    }

    #[test]
    fn broken_shaders_fail_to_link() {
        let gl = SoftContext::new(SoftContextConfig::default());
        let fs = gl.create_shader(gl::FRAGMENT_SHADER).unwrap();
        gl.shader_source(fs, "#error no fragment stage\nvoid main() {}");
        gl.compile_shader(fs);
        assert!(!gl.get_shader_compile_status(fs));
        assert!(gl.get_shader_info_log(fs).contains("no fragment stage"));

        let program = gl.create_program().unwrap();
        gl.attach_shader(program, fs);
        gl.link_program(program);
        assert!(!gl.get_program_link_status(program));
        gl.delete_program(program);
        gl.delete_shader(fs);
        gl.delete_shader(fs);
        assert_eq!(gl.validation_errors().len(), 1);
        assert_eq!(gl.live_objects(), 0);
    }
}
