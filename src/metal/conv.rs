use super::native as mtl;
use crate::{FormatSupport, PixelFormat, TextureDescription, TextureUsage};

pub fn map_pixel_format(format: PixelFormat) -> mtl::MTLPixelFormat {
    use mtl::MTLPixelFormat as Mf;
    use PixelFormat as Pf;
    match format {
        Pf::R8Unorm => Mf::R8Unorm,
        Pf::R8Snorm => Mf::R8Snorm,
        Pf::R8Uint => Mf::R8Uint,
        Pf::R8Sint => Mf::R8Sint,
        Pf::R16Unorm => Mf::R16Unorm,
        Pf::R16Uint => Mf::R16Uint,
        Pf::R16Float => Mf::R16Float,
        Pf::R32Uint => Mf::R32Uint,
        Pf::R32Sint => Mf::R32Sint,
        Pf::R32Float => Mf::R32Float,
        Pf::Rg8Unorm => Mf::RG8Unorm,
        Pf::Rg16Float => Mf::RG16Float,
        Pf::Rg32Float => Mf::RG32Float,
        Pf::Rgba8Unorm => Mf::RGBA8Unorm,
        Pf::Rgba8UnormSrgb => Mf::RGBA8Unorm_sRGB,
        Pf::Rgba8Uint => Mf::RGBA8Uint,
        Pf::Bgra8Unorm => Mf::BGRA8Unorm,
        Pf::Bgra8UnormSrgb => Mf::BGRA8Unorm_sRGB,
        Pf::Rgb10a2Unorm => Mf::RGB10A2Unorm,
        Pf::Rg11b10Float => Mf::RG11B10Float,
        Pf::Rgba16Float => Mf::RGBA16Float,
        Pf::Rgba32Uint => Mf::RGBA32Uint,
        Pf::Rgba32Float => Mf::RGBA32Float,
        Pf::Depth16Unorm => Mf::Depth16Unorm,
        Pf::Depth32Float => Mf::Depth32Float,
        Pf::Depth24UnormStencil8 => Mf::Depth24Unorm_Stencil8,
        Pf::Depth32FloatStencil8 => Mf::Depth32Float_Stencil8,
        Pf::Bc1RgbaUnorm => Mf::BC1_RGBA,
        Pf::Bc1RgbaUnormSrgb => Mf::BC1_RGBA_sRGB,
        Pf::Bc2Unorm => Mf::BC2_RGBA,
        Pf::Bc3Unorm => Mf::BC3_RGBA,
        Pf::Bc4Unorm => Mf::BC4_RUnorm,
        Pf::Bc5Unorm => Mf::BC5_RGUnorm,
        Pf::Bc7Unorm => Mf::BC7_RGBAUnorm,
        Pf::Bc7UnormSrgb => Mf::BC7_RGBAUnorm_sRGB,
        Pf::Etc2Rgb8Unorm => Mf::ETC2_RGB8,
        Pf::Etc2Rgba8Unorm => Mf::EAC_RGBA8,
    }
}

pub fn format_support(caps: &super::PrivateCapabilities, format: PixelFormat) -> FormatSupport {
    if format.is_bc() && !caps.format_bc {
        return FormatSupport::empty();
    }
    if format.is_etc2() && !caps.format_etc2 {
        return FormatSupport::empty();
    }
    if format == PixelFormat::Depth24UnormStencil8 && !caps.format_depth24_stencil8 {
        return FormatSupport::empty();
    }

    if format.is_compressed() {
        FormatSupport::SAMPLED | FormatSupport::STAGING
    } else if format.is_depth_stencil() {
        FormatSupport::SAMPLED | FormatSupport::DEPTH_STENCIL | FormatSupport::STAGING
    } else {
        FormatSupport::SAMPLED
            | FormatSupport::STORAGE
            | FormatSupport::RENDER_TARGET
            | FormatSupport::STAGING
    }
}

pub fn map_texture_type(desc: &TextureDescription) -> mtl::MTLTextureType {
    use mtl::MTLTextureType as Tt;
    match desc.texture_type {
        crate::TextureType::D1 if desc.array_layers > 1 => Tt::D1Array,
        crate::TextureType::D1 => Tt::D1,
        crate::TextureType::D2 if desc.usage.contains(TextureUsage::CUBEMAP) => {
            if desc.array_layers > 1 {
                Tt::CubeArray
            } else {
                Tt::Cube
            }
        }
        crate::TextureType::D2 if desc.sample_count > 1 => Tt::D2Multisample,
        crate::TextureType::D2 if desc.array_layers > 1 => Tt::D2Array,
        crate::TextureType::D2 => Tt::D2,
        crate::TextureType::D3 => Tt::D3,
    }
}

pub fn map_texture_usage(usage: TextureUsage) -> mtl::MTLTextureUsage {
    let mut mtl_usage = mtl::MTLTextureUsage::empty();
    mtl_usage.set(
        mtl::MTLTextureUsage::RENDER_TARGET,
        usage.intersects(TextureUsage::RENDER_TARGET | TextureUsage::DEPTH_STENCIL),
    );
    mtl_usage.set(
        mtl::MTLTextureUsage::SHADER_READ,
        usage.intersects(TextureUsage::SAMPLED | TextureUsage::STORAGE),
    );
    mtl_usage.set(
        mtl::MTLTextureUsage::SHADER_WRITE,
        usage.contains(TextureUsage::STORAGE),
    );
    mtl_usage
}

pub fn map_primitive_type(topology: crate::PrimitiveTopology) -> mtl::MTLPrimitiveType {
    use crate::PrimitiveTopology as Pt;
    use mtl::MTLPrimitiveType::*;
    match topology {
        Pt::PointList => Point,
        Pt::LineList => Line,
        Pt::LineStrip => LineStrip,
        Pt::TriangleList => Triangle,
        Pt::TriangleStrip => TriangleStrip,
    }
}

pub fn map_index_type(format: crate::IndexFormat) -> mtl::MTLIndexType {
    match format {
        crate::IndexFormat::UInt16 => mtl::MTLIndexType::UInt16,
        crate::IndexFormat::UInt32 => mtl::MTLIndexType::UInt32,
    }
}

pub fn map_cull_mode(mode: crate::FaceCullMode) -> mtl::MTLCullMode {
    match mode {
        crate::FaceCullMode::None => mtl::MTLCullMode::None,
        crate::FaceCullMode::Front => mtl::MTLCullMode::Front,
        crate::FaceCullMode::Back => mtl::MTLCullMode::Back,
    }
}

pub fn map_winding(face: crate::FrontFace) -> mtl::MTLWinding {
    match face {
        crate::FrontFace::Clockwise => mtl::MTLWinding::Clockwise,
        crate::FrontFace::CounterClockwise => mtl::MTLWinding::CounterClockwise,
    }
}

pub fn map_fill_mode(mode: crate::PolygonFillMode) -> mtl::MTLTriangleFillMode {
    match mode {
        crate::PolygonFillMode::Solid => mtl::MTLTriangleFillMode::Fill,
        crate::PolygonFillMode::Wireframe => mtl::MTLTriangleFillMode::Lines,
    }
}

pub fn map_depth_clip_mode(depth_clip_enabled: bool) -> mtl::MTLDepthClipMode {
    if depth_clip_enabled {
        mtl::MTLDepthClipMode::Clip
    } else {
        mtl::MTLDepthClipMode::Clamp
    }
}

pub fn map_compare_function(fun: crate::ComparisonKind) -> mtl::MTLCompareFunction {
    use crate::ComparisonKind as Ck;
    use mtl::MTLCompareFunction::*;
    match fun {
        Ck::Never => Never,
        Ck::Less => Less,
        Ck::Equal => Equal,
        Ck::LessEqual => LessEqual,
        Ck::Greater => Greater,
        Ck::NotEqual => NotEqual,
        Ck::GreaterEqual => GreaterEqual,
        Ck::Always => Always,
    }
}

pub fn map_stencil_op(op: crate::StencilOperation) -> mtl::MTLStencilOperation {
    use crate::StencilOperation as So;
    use mtl::MTLStencilOperation::*;
    match op {
        So::Keep => Keep,
        So::Zero => Zero,
        So::Replace => Replace,
        So::IncrementAndClamp => IncrementClamp,
        So::DecrementAndClamp => DecrementClamp,
        So::Invert => Invert,
        So::IncrementAndWrap => IncrementWrap,
        So::DecrementAndWrap => DecrementWrap,
    }
}

pub fn map_stencil_descriptor(
    behavior: &crate::StencilBehavior,
    state: &crate::DepthStencilState,
) -> mtl::StencilDescriptor {
    mtl::StencilDescriptor {
        stencil_failure_operation: map_stencil_op(behavior.fail),
        depth_failure_operation: map_stencil_op(behavior.depth_fail),
        depth_stencil_pass_operation: map_stencil_op(behavior.pass),
        stencil_compare_function: map_compare_function(behavior.comparison),
        read_mask: state.stencil_read_mask as u32,
        write_mask: state.stencil_write_mask as u32,
    }
}

pub fn map_depth_stencil(state: &crate::DepthStencilState) -> mtl::DepthStencilDescriptor {
    let (front, back) = if state.stencil_test_enabled {
        (
            Some(map_stencil_descriptor(&state.stencil_front, state)),
            Some(map_stencil_descriptor(&state.stencil_back, state)),
        )
    } else {
        (None, None)
    };
    mtl::DepthStencilDescriptor {
        depth_compare_function: if state.depth_test_enabled {
            map_compare_function(state.depth_comparison)
        } else {
            mtl::MTLCompareFunction::Always
        },
        depth_write_enabled: state.depth_test_enabled && state.depth_write_enabled,
        front_face_stencil: front,
        back_face_stencil: back,
    }
}

pub fn map_blend_factor(factor: crate::BlendFactor) -> mtl::MTLBlendFactor {
    use crate::BlendFactor as Bf;
    use mtl::MTLBlendFactor::*;
    match factor {
        Bf::Zero => Zero,
        Bf::One => One,
        Bf::SourceAlpha => SourceAlpha,
        Bf::InverseSourceAlpha => OneMinusSourceAlpha,
        Bf::DestinationAlpha => DestinationAlpha,
        Bf::InverseDestinationAlpha => OneMinusDestinationAlpha,
        Bf::SourceColor => SourceColor,
        Bf::InverseSourceColor => OneMinusSourceColor,
        Bf::DestinationColor => DestinationColor,
        Bf::InverseDestinationColor => OneMinusDestinationColor,
        Bf::BlendFactor => BlendColor,
        Bf::InverseBlendFactor => OneMinusBlendColor,
    }
}

pub fn map_blend_op(function: crate::BlendFunction) -> mtl::MTLBlendOperation {
    use crate::BlendFunction as Bf;
    use mtl::MTLBlendOperation::*;
    match function {
        Bf::Add => Add,
        Bf::Subtract => Subtract,
        Bf::ReverseSubtract => ReverseSubtract,
        Bf::Minimum => Min,
        Bf::Maximum => Max,
    }
}

pub fn map_color_write(mask: crate::ColorWriteMask) -> mtl::MTLColorWriteMask {
    let mut raw_mask = mtl::MTLColorWriteMask::empty();
    raw_mask.set(
        mtl::MTLColorWriteMask::RED,
        mask.contains(crate::ColorWriteMask::RED),
    );
    raw_mask.set(
        mtl::MTLColorWriteMask::GREEN,
        mask.contains(crate::ColorWriteMask::GREEN),
    );
    raw_mask.set(
        mtl::MTLColorWriteMask::BLUE,
        mask.contains(crate::ColorWriteMask::BLUE),
    );
    raw_mask.set(
        mtl::MTLColorWriteMask::ALPHA,
        mask.contains(crate::ColorWriteMask::ALPHA),
    );
    raw_mask
}

pub fn map_color_attachment(
    format: PixelFormat,
    blend: &crate::BlendAttachment,
) -> mtl::ColorAttachmentPipelineDescriptor {
    mtl::ColorAttachmentPipelineDescriptor {
        pixel_format: map_pixel_format(format),
        write_mask: map_color_write(blend.color_write_mask),
        blending_enabled: blend.blend_enabled,
        rgb_blend_operation: map_blend_op(blend.color_function),
        alpha_blend_operation: map_blend_op(blend.alpha_function),
        source_rgb_blend_factor: map_blend_factor(blend.source_color_factor),
        source_alpha_blend_factor: map_blend_factor(blend.source_alpha_factor),
        destination_rgb_blend_factor: map_blend_factor(blend.destination_color_factor),
        destination_alpha_blend_factor: map_blend_factor(blend.destination_alpha_factor),
    }
}

pub fn map_vertex_format(format: crate::VertexElementFormat) -> mtl::MTLVertexFormat {
    use crate::VertexElementFormat as Vf;
    use mtl::MTLVertexFormat::*;
    match format {
        Vf::Float1 => Float,
        Vf::Float2 => Float2,
        Vf::Float3 => Float3,
        Vf::Float4 => Float4,
        Vf::Byte4Norm => Char4Normalized,
        Vf::UByte4Norm => UChar4Normalized,
        Vf::Short2 => Short2,
        Vf::UInt1 => UInt,
        Vf::UInt2 => UInt2,
        Vf::UInt4 => UInt4,
        Vf::Int1 => Int,
        Vf::Int4 => Int4,
        Vf::Half4 => Half4,
    }
}

pub fn map_address_mode(mode: crate::SamplerAddressMode) -> mtl::MTLSamplerAddressMode {
    use crate::SamplerAddressMode as Am;
    use mtl::MTLSamplerAddressMode::*;
    match mode {
        Am::Wrap => Repeat,
        Am::Mirror => MirrorRepeat,
        Am::Clamp => ClampToEdge,
        Am::Border => ClampToBorderColor,
    }
}

pub fn map_filter_mode(filter: crate::FilterMode) -> mtl::MTLSamplerMinMagFilter {
    match filter {
        crate::FilterMode::Nearest => mtl::MTLSamplerMinMagFilter::Nearest,
        crate::FilterMode::Linear => mtl::MTLSamplerMinMagFilter::Linear,
    }
}

pub fn map_mip_filter(filter: crate::FilterMode) -> mtl::MTLSamplerMipFilter {
    match filter {
        crate::FilterMode::Nearest => mtl::MTLSamplerMipFilter::Nearest,
        crate::FilterMode::Linear => mtl::MTLSamplerMipFilter::Linear,
    }
}

pub fn map_border_color(color: crate::SamplerBorderColor) -> mtl::MTLSamplerBorderColor {
    match color {
        crate::SamplerBorderColor::TransparentBlack => mtl::MTLSamplerBorderColor::TransparentBlack,
        crate::SamplerBorderColor::OpaqueBlack => mtl::MTLSamplerBorderColor::OpaqueBlack,
        crate::SamplerBorderColor::OpaqueWhite => mtl::MTLSamplerBorderColor::OpaqueWhite,
    }
}

pub fn map_viewport(viewport: &crate::Viewport) -> mtl::MTLViewport {
    mtl::MTLViewport {
        origin_x: viewport.x as f64,
        origin_y: viewport.y as f64,
        width: viewport.width as f64,
        height: viewport.height as f64,
        znear: viewport.min_depth as f64,
        zfar: viewport.max_depth as f64,
    }
}

pub fn map_scissor(rect: &crate::ScissorRect) -> mtl::MTLScissorRect {
    mtl::MTLScissorRect {
        x: rect.x as u64,
        y: rect.y as u64,
        width: rect.width as u64,
        height: rect.height as u64,
    }
}

pub fn map_clear_color(color: &crate::Color) -> mtl::MTLClearColor {
    mtl::MTLClearColor {
        red: color.r as f64,
        green: color.g as f64,
        blue: color.b as f64,
        alpha: color.a as f64,
    }
}

pub fn map_origin(origin: &crate::Origin3d) -> mtl::MTLOrigin {
    mtl::MTLOrigin {
        x: origin.x as u64,
        y: origin.y as u64,
        z: origin.z as u64,
    }
}

pub fn map_size(width: u32, height: u32, depth: u32) -> mtl::MTLSize {
    mtl::MTLSize::new(width as u64, height as u64, depth as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(mac: bool) -> super::super::PrivateCapabilities {
        super::super::PrivateCapabilities {
            multi_viewport: mac,
            memoryless: !mac,
            base_vertex_instance: true,
            depth_clip_mode: true,
            format_bc: mac,
            format_etc2: !mac,
            format_depth24_stencil8: false,
            max_buffers_per_stage: 31,
        }
    }

    #[test]
    fn compressed_formats_follow_the_gpu_family() {
        assert!(format_support(&caps(true), PixelFormat::Bc3Unorm).contains(FormatSupport::SAMPLED));
        assert!(format_support(&caps(true), PixelFormat::Etc2Rgb8Unorm).is_empty());
        assert!(format_support(&caps(false), PixelFormat::Bc3Unorm).is_empty());
        assert!(!format_support(&caps(false), PixelFormat::Etc2Rgba8Unorm)
            .contains(FormatSupport::RENDER_TARGET));
    }

    #[test]
    fn depth24_needs_explicit_support() {
        assert!(format_support(&caps(true), PixelFormat::Depth24UnormStencil8).is_empty());
        assert!(format_support(&caps(true), PixelFormat::Depth32FloatStencil8)
            .contains(FormatSupport::DEPTH_STENCIL));
    }

    #[test]
    fn cube_textures_map_to_cube_types() {
        let mut desc = TextureDescription::texture_2d(
            4,
            4,
            1,
            1,
            PixelFormat::Rgba8Unorm,
            TextureUsage::SAMPLED | TextureUsage::CUBEMAP,
        );
        assert_eq!(map_texture_type(&desc), mtl::MTLTextureType::Cube);
        desc.array_layers = 2;
        assert_eq!(map_texture_type(&desc), mtl::MTLTextureType::CubeArray);
        desc.usage = TextureUsage::SAMPLED;
        assert_eq!(map_texture_type(&desc), mtl::MTLTextureType::D2Array);
    }
}
