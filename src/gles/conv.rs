use super::native as gl;
use crate::{
    BlendFactor, BlendFunction, ComparisonKind, FaceCullMode, FilterMode, FormatSupport,
    FrontFace, IndexFormat, PixelFormat, PolygonFillMode, PrimitiveTopology, SamplerAddressMode,
    SamplerBorderColor, StencilOperation, TextureDescription, TextureType, TextureUsage,
    VertexElementFormat,
};

/// How the texels of a format are named in GL calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatDescription {
    pub internal: u32,
    pub external: u32,
    pub data_type: u32,
}

pub fn describe_texture_format(format: PixelFormat) -> FormatDescription {
    use PixelFormat as Pf;

    let (internal, external, data_type) = match format {
        Pf::R8Unorm => (gl::R8, gl::RED, gl::UNSIGNED_BYTE),
        Pf::R8Snorm => (gl::R8_SNORM, gl::RED, gl::BYTE),
        Pf::R8Uint => (gl::R8UI, gl::RED_INTEGER, gl::UNSIGNED_BYTE),
        Pf::R8Sint => (gl::R8I, gl::RED_INTEGER, gl::BYTE),
        Pf::R16Unorm => (gl::R16, gl::RED, gl::UNSIGNED_SHORT),
        Pf::R16Uint => (gl::R16UI, gl::RED_INTEGER, gl::UNSIGNED_SHORT),
        Pf::R16Float => (gl::R16F, gl::RED, gl::HALF_FLOAT),
        Pf::R32Uint => (gl::R32UI, gl::RED_INTEGER, gl::UNSIGNED_INT),
        Pf::R32Sint => (gl::R32I, gl::RED_INTEGER, gl::INT),
        Pf::R32Float => (gl::R32F, gl::RED, gl::FLOAT),
        Pf::Rg8Unorm => (gl::RG8, gl::RG, gl::UNSIGNED_BYTE),
        Pf::Rg16Float => (gl::RG16F, gl::RG, gl::HALF_FLOAT),
        Pf::Rg32Float => (gl::RG32F, gl::RG, gl::FLOAT),
        Pf::Rgba8Unorm => (gl::RGBA8, gl::RGBA, gl::UNSIGNED_BYTE),
        Pf::Rgba8UnormSrgb => (gl::SRGB8_ALPHA8, gl::RGBA, gl::UNSIGNED_BYTE),
        Pf::Rgba8Uint => (gl::RGBA8UI, gl::RGBA_INTEGER, gl::UNSIGNED_BYTE),
        Pf::Bgra8Unorm => (gl::RGBA8, gl::BGRA, gl::UNSIGNED_BYTE),
        Pf::Bgra8UnormSrgb => (gl::SRGB8_ALPHA8, gl::BGRA, gl::UNSIGNED_BYTE),
        Pf::Rgb10a2Unorm => (gl::RGB10_A2, gl::RGBA, gl::UNSIGNED_INT_2_10_10_10_REV),
        Pf::Rg11b10Float => (gl::R11F_G11F_B10F, gl::RGB, gl::UNSIGNED_INT_10F_11F_11F_REV),
        Pf::Rgba16Float => (gl::RGBA16F, gl::RGBA, gl::HALF_FLOAT),
        Pf::Rgba32Uint => (gl::RGBA32UI, gl::RGBA_INTEGER, gl::UNSIGNED_INT),
        Pf::Rgba32Float => (gl::RGBA32F, gl::RGBA, gl::FLOAT),
        Pf::Depth16Unorm => (gl::DEPTH_COMPONENT16, gl::DEPTH_COMPONENT, gl::UNSIGNED_SHORT),
        Pf::Depth32Float => (gl::DEPTH_COMPONENT32F, gl::DEPTH_COMPONENT, gl::FLOAT),
        Pf::Depth24UnormStencil8 => (gl::DEPTH24_STENCIL8, gl::DEPTH_STENCIL, gl::UNSIGNED_INT_24_8),
        Pf::Depth32FloatStencil8 => (
            gl::DEPTH32F_STENCIL8,
            gl::DEPTH_STENCIL,
            gl::FLOAT_32_UNSIGNED_INT_24_8_REV,
        ),
        Pf::Bc1RgbaUnorm => (gl::COMPRESSED_RGBA_S3TC_DXT1_EXT, gl::RGBA, gl::UNSIGNED_BYTE),
        Pf::Bc1RgbaUnormSrgb => (
            gl::COMPRESSED_SRGB_ALPHA_S3TC_DXT1_EXT,
            gl::RGBA,
            gl::UNSIGNED_BYTE,
        ),
        Pf::Bc2Unorm => (gl::COMPRESSED_RGBA_S3TC_DXT3_EXT, gl::RGBA, gl::UNSIGNED_BYTE),
        Pf::Bc3Unorm => (gl::COMPRESSED_RGBA_S3TC_DXT5_EXT, gl::RGBA, gl::UNSIGNED_BYTE),
        Pf::Bc4Unorm => (gl::COMPRESSED_RED_RGTC1, gl::RED, gl::UNSIGNED_BYTE),
        Pf::Bc5Unorm => (gl::COMPRESSED_RG_RGTC2, gl::RG, gl::UNSIGNED_BYTE),
        Pf::Bc7Unorm => (gl::COMPRESSED_RGBA_BPTC_UNORM, gl::RGBA, gl::UNSIGNED_BYTE),
        Pf::Bc7UnormSrgb => (gl::COMPRESSED_SRGB_ALPHA_BPTC_UNORM, gl::RGBA, gl::UNSIGNED_BYTE),
        Pf::Etc2Rgb8Unorm => (gl::COMPRESSED_RGB8_ETC2, gl::RGB, gl::UNSIGNED_BYTE),
        Pf::Etc2Rgba8Unorm => (gl::COMPRESSED_RGBA8_ETC2_EAC, gl::RGBA, gl::UNSIGNED_BYTE),
    };

    FormatDescription {
        internal,
        external,
        data_type,
    }
}

pub fn format_support(caps: super::PrivateCapabilities, format: PixelFormat) -> FormatSupport {
    use super::PrivateCapabilities as Pc;

    if format.is_bc() && !caps.contains(Pc::FORMAT_BC) {
        return FormatSupport::empty();
    }
    if format.is_etc2() && !caps.contains(Pc::FORMAT_ETC2) {
        return FormatSupport::empty();
    }

    if format.is_compressed() {
        FormatSupport::SAMPLED | FormatSupport::STAGING
    } else if format.is_depth_stencil() {
        FormatSupport::SAMPLED | FormatSupport::DEPTH_STENCIL | FormatSupport::STAGING
    } else {
        let mut support =
            FormatSupport::SAMPLED | FormatSupport::RENDER_TARGET | FormatSupport::STAGING;
        let storable = match format {
            PixelFormat::Rgba8UnormSrgb
            | PixelFormat::Bgra8Unorm
            | PixelFormat::Bgra8UnormSrgb
            | PixelFormat::Rg11b10Float => false,
            _ => true,
        };
        if storable && caps.contains(Pc::COMPUTE) {
            support |= FormatSupport::STORAGE;
        }
        support
    }
}

/// Texture target of an image. There are no 1D textures in GL ES, so they
/// are 2D images with a height of one everywhere.
pub fn map_texture_target(desc: &TextureDescription) -> u32 {
    match desc.texture_type {
        TextureType::D2 if desc.usage.contains(TextureUsage::CUBEMAP) => {
            if desc.array_layers > 1 {
                gl::TEXTURE_CUBE_MAP_ARRAY
            } else {
                gl::TEXTURE_CUBE_MAP
            }
        }
        TextureType::D2 if desc.sample_count > 1 => gl::TEXTURE_2D_MULTISAMPLE,
        TextureType::D1 | TextureType::D2 if desc.array_layers > 1 => gl::TEXTURE_2D_ARRAY,
        TextureType::D1 | TextureType::D2 => gl::TEXTURE_2D,
        TextureType::D3 => gl::TEXTURE_3D,
    }
}

/// Targets whose layers are addressed through a third coordinate.
pub fn is_layered_target(target: u32) -> bool {
    match target {
        gl::TEXTURE_2D_ARRAY | gl::TEXTURE_3D | gl::TEXTURE_CUBE_MAP_ARRAY => true,
        _ => false,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexAttribKind {
    /// `glVertexAttribPointer`
    Float,
    /// `glVertexAttribIPointer`
    Integer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexFormatDesc {
    pub element_count: i32,
    pub element_format: u32,
    pub normalized: bool,
    pub attrib_kind: VertexAttribKind,
}

pub fn describe_vertex_format(format: VertexElementFormat) -> VertexFormatDesc {
    use VertexAttribKind as Vak;
    use VertexElementFormat as Vef;

    let (element_count, element_format, normalized, attrib_kind) = match format {
        Vef::Float1 => (1, gl::FLOAT, false, Vak::Float),
        Vef::Float2 => (2, gl::FLOAT, false, Vak::Float),
        Vef::Float3 => (3, gl::FLOAT, false, Vak::Float),
        Vef::Float4 => (4, gl::FLOAT, false, Vak::Float),
        Vef::Byte4Norm => (4, gl::BYTE, true, Vak::Float),
        Vef::UByte4Norm => (4, gl::UNSIGNED_BYTE, true, Vak::Float),
        Vef::Short2 => (2, gl::SHORT, false, Vak::Integer),
        Vef::UInt1 => (1, gl::UNSIGNED_INT, false, Vak::Integer),
        Vef::UInt2 => (2, gl::UNSIGNED_INT, false, Vak::Integer),
        Vef::UInt4 => (4, gl::UNSIGNED_INT, false, Vak::Integer),
        Vef::Int1 => (1, gl::INT, false, Vak::Integer),
        Vef::Int4 => (4, gl::INT, false, Vak::Integer),
        Vef::Half4 => (4, gl::HALF_FLOAT, false, Vak::Float),
    };

    VertexFormatDesc {
        element_count,
        element_format,
        normalized,
        attrib_kind,
    }
}

pub fn map_primitive_topology(topology: PrimitiveTopology) -> u32 {
    match topology {
        PrimitiveTopology::PointList => gl::POINTS,
        PrimitiveTopology::LineList => gl::LINES,
        PrimitiveTopology::LineStrip => gl::LINE_STRIP,
        PrimitiveTopology::TriangleList => gl::TRIANGLES,
        PrimitiveTopology::TriangleStrip => gl::TRIANGLE_STRIP,
    }
}

pub fn map_index_type(format: IndexFormat) -> u32 {
    match format {
        IndexFormat::UInt16 => gl::UNSIGNED_SHORT,
        IndexFormat::UInt32 => gl::UNSIGNED_INT,
    }
}

pub fn map_compare_func(kind: ComparisonKind) -> u32 {
    use ComparisonKind as Ck;
    match kind {
        Ck::Never => gl::NEVER,
        Ck::Less => gl::LESS,
        Ck::Equal => gl::EQUAL,
        Ck::LessEqual => gl::LEQUAL,
        Ck::Greater => gl::GREATER,
        Ck::NotEqual => gl::NOTEQUAL,
        Ck::GreaterEqual => gl::GEQUAL,
        Ck::Always => gl::ALWAYS,
    }
}

pub fn map_stencil_op(operation: StencilOperation) -> u32 {
    use StencilOperation as So;
    match operation {
        So::Keep => gl::KEEP,
        So::Zero => gl::ZERO,
        So::Replace => gl::REPLACE,
        So::IncrementAndClamp => gl::INCR,
        So::DecrementAndClamp => gl::DECR,
        So::Invert => gl::INVERT,
        So::IncrementAndWrap => gl::INCR_WRAP,
        So::DecrementAndWrap => gl::DECR_WRAP,
    }
}

pub fn map_blend_factor(factor: BlendFactor) -> u32 {
    use BlendFactor as Bf;
    match factor {
        Bf::Zero => gl::ZERO,
        Bf::One => gl::ONE,
        Bf::SourceAlpha => gl::SRC_ALPHA,
        Bf::InverseSourceAlpha => gl::ONE_MINUS_SRC_ALPHA,
        Bf::DestinationAlpha => gl::DST_ALPHA,
        Bf::InverseDestinationAlpha => gl::ONE_MINUS_DST_ALPHA,
        Bf::SourceColor => gl::SRC_COLOR,
        Bf::InverseSourceColor => gl::ONE_MINUS_SRC_COLOR,
        Bf::DestinationColor => gl::DST_COLOR,
        Bf::InverseDestinationColor => gl::ONE_MINUS_DST_COLOR,
        Bf::BlendFactor => gl::CONSTANT_COLOR,
        Bf::InverseBlendFactor => gl::ONE_MINUS_CONSTANT_COLOR,
    }
}

pub fn map_blend_equation(function: BlendFunction) -> u32 {
    match function {
        BlendFunction::Add => gl::FUNC_ADD,
        BlendFunction::Subtract => gl::FUNC_SUBTRACT,
        BlendFunction::ReverseSubtract => gl::FUNC_REVERSE_SUBTRACT,
        BlendFunction::Minimum => gl::MIN,
        BlendFunction::Maximum => gl::MAX,
    }
}

/// `None` disables face culling.
pub fn map_cull_face(mode: FaceCullMode) -> Option<u32> {
    match mode {
        FaceCullMode::None => None,
        FaceCullMode::Front => Some(gl::FRONT),
        FaceCullMode::Back => Some(gl::BACK),
    }
}

pub fn map_front_face(face: FrontFace) -> u32 {
    match face {
        FrontFace::Clockwise => gl::CW,
        FrontFace::CounterClockwise => gl::CCW,
    }
}

pub fn map_polygon_mode(mode: PolygonFillMode) -> u32 {
    match mode {
        PolygonFillMode::Solid => gl::FILL,
        PolygonFillMode::Wireframe => gl::LINE,
    }
}

/// Returns the `(min, mag)` filters.
pub fn map_filter_modes(min: FilterMode, mag: FilterMode, mip: FilterMode) -> (u32, u32) {
    use FilterMode as Fm;

    let mag_filter = match mag {
        Fm::Nearest => gl::NEAREST,
        Fm::Linear => gl::LINEAR,
    };
    let min_filter = match (min, mip) {
        (Fm::Nearest, Fm::Nearest) => gl::NEAREST_MIPMAP_NEAREST,
        (Fm::Nearest, Fm::Linear) => gl::NEAREST_MIPMAP_LINEAR,
        (Fm::Linear, Fm::Nearest) => gl::LINEAR_MIPMAP_NEAREST,
        (Fm::Linear, Fm::Linear) => gl::LINEAR_MIPMAP_LINEAR,
    };
    (min_filter, mag_filter)
}

pub fn map_address_mode(mode: SamplerAddressMode) -> u32 {
    match mode {
        SamplerAddressMode::Wrap => gl::REPEAT,
        SamplerAddressMode::Mirror => gl::MIRRORED_REPEAT,
        SamplerAddressMode::Clamp => gl::CLAMP_TO_EDGE,
        SamplerAddressMode::Border => gl::CLAMP_TO_BORDER,
    }
}

pub fn map_border_color(color: SamplerBorderColor) -> [f32; 4] {
    match color {
        SamplerBorderColor::TransparentBlack => [0.0; 4],
        SamplerBorderColor::OpaqueBlack => [0.0, 0.0, 0.0, 1.0],
        SamplerBorderColor::OpaqueWhite => [1.0; 4],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gles::PrivateCapabilities;

    #[test]
    fn compressed_formats_follow_capabilities() {
        let none = PrivateCapabilities::empty();
        assert!(format_support(none, PixelFormat::Bc1RgbaUnorm).is_empty());
        assert!(format_support(none, PixelFormat::Etc2Rgb8Unorm).is_empty());
        let bc = format_support(PrivateCapabilities::FORMAT_BC, PixelFormat::Bc3Unorm);
        assert_eq!(bc, FormatSupport::SAMPLED | FormatSupport::STAGING);
    }

    #[test]
    fn storage_needs_compute() {
        let plain = format_support(PrivateCapabilities::empty(), PixelFormat::Rgba8Unorm);
        assert!(!plain.contains(FormatSupport::STORAGE));
        let compute = format_support(PrivateCapabilities::COMPUTE, PixelFormat::Rgba8Unorm);
        assert!(compute.contains(FormatSupport::STORAGE | FormatSupport::RENDER_TARGET));
        let srgb = format_support(PrivateCapabilities::COMPUTE, PixelFormat::Rgba8UnormSrgb);
        assert!(!srgb.contains(FormatSupport::STORAGE));
    }

    #[test]
    fn texture_targets() {
        let usage = TextureUsage::SAMPLED;
        let desc = TextureDescription::texture_2d(8, 8, 1, 1, PixelFormat::Rgba8Unorm, usage);
        assert_eq!(map_texture_target(&desc), gl::TEXTURE_2D);
        let array = TextureDescription::texture_2d(8, 8, 1, 4, PixelFormat::Rgba8Unorm, usage);
        assert_eq!(map_texture_target(&array), gl::TEXTURE_2D_ARRAY);
        let cube = TextureDescription::texture_2d(
            8,
            8,
            1,
            1,
            PixelFormat::Rgba8Unorm,
            usage | TextureUsage::CUBEMAP,
        );
        assert_eq!(map_texture_target(&cube), gl::TEXTURE_CUBE_MAP);
        let volume = TextureDescription::texture_3d(8, 8, 8, 1, PixelFormat::R8Unorm, usage);
        assert_eq!(map_texture_target(&volume), gl::TEXTURE_3D);
        assert!(is_layered_target(gl::TEXTURE_3D));
        assert!(!is_layered_target(gl::TEXTURE_CUBE_MAP));
    }

    #[test]
    fn min_filter_combines_mip_filter() {
        let (min, mag) = map_filter_modes(FilterMode::Linear, FilterMode::Nearest, FilterMode::Nearest);
        assert_eq!(min, gl::LINEAR_MIPMAP_NEAREST);
        assert_eq!(mag, gl::NEAREST);
    }

    #[test]
    fn integer_vertex_formats_use_integer_pointers() {
        assert_eq!(
            describe_vertex_format(VertexElementFormat::UInt2).attrib_kind,
            VertexAttribKind::Integer
        );
        let norm = describe_vertex_format(VertexElementFormat::UByte4Norm);
        assert!(norm.normalized);
        assert_eq!(norm.attrib_kind, VertexAttribKind::Float);
    }
}
