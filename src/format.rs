//! Pixel formats and the linear layout math shared by every backend.
//!
//! Staging textures have no native image. Their texels live in a linear
//! buffer laid out array-layer major: every mip level of layer 0, followed by
//! every mip level of layer 1, and so on. Each subresource is a sequence of
//! depth slices made of rows of blocks, where a block is one texel for
//! uncompressed formats and a 4x4 texel tile for block-compressed ones.

use bitflags::bitflags;

use crate::{BufferAddress, Origin3d, TextureDescription, TextureRegion};

bitflags!(
    pub struct FormatAspects: u8 {
        const COLOR = 1;
        const DEPTH = 2;
        const STENCIL = 4;
        const DEPTH_STENCIL = Self::DEPTH.bits | Self::STENCIL.bits;
    }
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
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
    Rg8Unorm,
    Rg16Float,
    Rg32Float,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba8Uint,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgb10a2Unorm,
    Rg11b10Float,
    Rgba16Float,
    Rgba32Uint,
    Rgba32Float,
    Depth16Unorm,
    Depth32Float,
    Depth24UnormStencil8,
    Depth32FloatStencil8,
    Bc1RgbaUnorm,
    Bc1RgbaUnormSrgb,
    Bc2Unorm,
    Bc3Unorm,
    Bc4Unorm,
    Bc5Unorm,
    Bc7Unorm,
    Bc7UnormSrgb,
    Etc2Rgb8Unorm,
    Etc2Rgba8Unorm,
}

/// Static facts about a pixel format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatDescription {
    /// Width and height of one block, in texels.
    pub block_dimension: u32,
    /// Size of one block, in bytes.
    pub block_size: u32,
    pub aspects: FormatAspects,
    pub compressed: bool,
}

impl PixelFormat {
    pub fn describe(self) -> FormatDescription {
        use PixelFormat as Pf;

        let (block_size, aspects) = match self {
            Pf::R8Unorm | Pf::R8Snorm | Pf::R8Uint | Pf::R8Sint => (1, FormatAspects::COLOR),
            Pf::R16Unorm | Pf::R16Uint | Pf::R16Float | Pf::Rg8Unorm => (2, FormatAspects::COLOR),
            Pf::R32Uint
            | Pf::R32Sint
            | Pf::R32Float
            | Pf::Rg16Float
            | Pf::Rgba8Unorm
            | Pf::Rgba8UnormSrgb
            | Pf::Rgba8Uint
            | Pf::Bgra8Unorm
            | Pf::Bgra8UnormSrgb
            | Pf::Rgb10a2Unorm
            | Pf::Rg11b10Float => (4, FormatAspects::COLOR),
            Pf::Rg32Float | Pf::Rgba16Float => (8, FormatAspects::COLOR),
            Pf::Rgba32Uint | Pf::Rgba32Float => (16, FormatAspects::COLOR),
            Pf::Depth16Unorm => (2, FormatAspects::DEPTH),
            Pf::Depth32Float => (4, FormatAspects::DEPTH),
            Pf::Depth24UnormStencil8 => (4, FormatAspects::DEPTH_STENCIL),
            Pf::Depth32FloatStencil8 => (8, FormatAspects::DEPTH_STENCIL),
            Pf::Bc1RgbaUnorm
            | Pf::Bc1RgbaUnormSrgb
            | Pf::Bc4Unorm
            | Pf::Etc2Rgb8Unorm => {
                return FormatDescription {
                    block_dimension: 4,
                    block_size: 8,
                    aspects: FormatAspects::COLOR,
                    compressed: true,
                }
            }
            Pf::Bc2Unorm
            | Pf::Bc3Unorm
            | Pf::Bc5Unorm
            | Pf::Bc7Unorm
            | Pf::Bc7UnormSrgb
            | Pf::Etc2Rgba8Unorm => {
                return FormatDescription {
                    block_dimension: 4,
                    block_size: 16,
                    aspects: FormatAspects::COLOR,
                    compressed: true,
                }
            }
        };

        FormatDescription {
            block_dimension: 1,
            block_size,
            aspects,
            compressed: false,
        }
    }

    pub fn is_compressed(self) -> bool {
        self.describe().compressed
    }

    pub fn is_depth_stencil(self) -> bool {
        !self.describe().aspects.contains(FormatAspects::COLOR)
    }

    pub fn has_stencil(self) -> bool {
        self.describe().aspects.contains(FormatAspects::STENCIL)
    }

    pub fn is_bc(self) -> bool {
        use PixelFormat as Pf;
        match self {
            Pf::Bc1RgbaUnorm
            | Pf::Bc1RgbaUnormSrgb
            | Pf::Bc2Unorm
            | Pf::Bc3Unorm
            | Pf::Bc4Unorm
            | Pf::Bc5Unorm
            | Pf::Bc7Unorm
            | Pf::Bc7UnormSrgb => true,
            _ => false,
        }
    }

    pub fn is_etc2(self) -> bool {
        match self {
            Self::Etc2Rgb8Unorm | Self::Etc2Rgba8Unorm => true,
            _ => false,
        }
    }

    /// Bytes between two consecutive rows of blocks.
    pub fn row_pitch(self, width: u32) -> u32 {
        let desc = self.describe();
        if desc.compressed {
            div_round_up(width, desc.block_dimension) * desc.block_size
        } else {
            width * desc.block_size
        }
    }

    /// Number of rows of blocks covering `height` texels.
    pub fn num_rows(self, height: u32) -> u32 {
        div_round_up(height, self.describe().block_dimension)
    }

    /// Bytes between two consecutive depth slices.
    pub fn depth_pitch(self, width: u32, height: u32) -> u32 {
        self.row_pitch(width) * self.num_rows(height)
    }

    pub fn region_size(self, width: u32, height: u32, depth: u32) -> BufferAddress {
        self.depth_pitch(width, height) as BufferAddress * depth as BufferAddress
    }

    /// Byte offset of the block containing texel `(x, y, z)`.
    pub fn texel_offset(self, row_pitch: u32, depth_pitch: u32, x: u32, y: u32, z: u32) -> BufferAddress {
        let desc = self.describe();
        depth_pitch as BufferAddress * z as BufferAddress
            + row_pitch as BufferAddress * (y / desc.block_dimension) as BufferAddress
            + desc.block_size as BufferAddress * (x / desc.block_dimension) as BufferAddress
    }
}

/// Pitches and size of one subresource in linear staging storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubresourceLayout {
    pub offset: BufferAddress,
    pub row_pitch: u32,
    pub depth_pitch: u32,
    pub size: BufferAddress,
}

pub(crate) fn div_round_up(value: u32, align: u32) -> u32 {
    (value + align - 1) / align
}

pub(crate) fn align_to(value: BufferAddress, align: BufferAddress) -> BufferAddress {
    (value + align - 1) / align * align
}

/// Texel dimensions of a mip level, never smaller than one.
pub fn mip_dimensions(desc: &TextureDescription, mip_level: u32) -> (u32, u32, u32) {
    (
        (desc.width >> mip_level).max(1),
        (desc.height >> mip_level).max(1),
        (desc.depth >> mip_level).max(1),
    )
}

fn mip_size(desc: &TextureDescription, mip_level: u32) -> BufferAddress {
    let (width, height, depth) = mip_dimensions(desc, mip_level);
    desc.format.region_size(width, height, depth)
}

fn layer_size(desc: &TextureDescription) -> BufferAddress {
    (0..desc.mip_levels).map(|level| mip_size(desc, level)).sum()
}

/// Offset of `(mip_level, array_layer)` in linear staging storage.
pub fn subresource_offset(desc: &TextureDescription, mip_level: u32, array_layer: u32) -> BufferAddress {
    let lower_mips: BufferAddress = (0..mip_level).map(|level| mip_size(desc, level)).sum();
    layer_size(desc) * array_layer as BufferAddress + lower_mips
}

pub fn subresource_layout(
    desc: &TextureDescription,
    mip_level: u32,
    array_layer: u32,
) -> SubresourceLayout {
    let block = desc.format.describe().block_dimension;
    let (width, height, depth) = mip_dimensions(desc, mip_level);
    // storage always covers at least one whole block
    let (width, height) = (width.max(block), height.max(block));
    let row_pitch = desc.format.row_pitch(width);
    let depth_pitch = desc.format.depth_pitch(width, height);
    SubresourceLayout {
        offset: subresource_offset(desc, mip_level, array_layer),
        row_pitch,
        depth_pitch,
        size: depth_pitch as BufferAddress * depth as BufferAddress,
    }
}

/// Size of the linear buffer backing a staging texture.
pub fn total_staging_size(desc: &TextureDescription) -> BufferAddress {
    layer_size(desc) * desc.layer_count() as BufferAddress
}

/// Copy extent for a region of a mip level.
///
/// Regions narrower than a block but wider than a tiny mip level are clamped
/// to the mip level, so the copy still addresses exactly one block.
pub fn copy_extent(
    format: PixelFormat,
    mip_width: u32,
    mip_height: u32,
    width: u32,
    height: u32,
) -> (u32, u32) {
    let block = format.describe().block_dimension;
    let clamp = |size: u32, mip: u32| {
        if size > mip && size <= block {
            mip
        } else {
            size
        }
    };
    (clamp(width, mip_width), clamp(height, mip_height))
}

/// Checks that a region lies within one subresource and returns its copy
/// extent after the sub-block clamp.
pub(crate) fn validate_region(
    desc: &TextureDescription,
    origin: &Origin3d,
    mip_level: u32,
    array_layer: u32,
    size: &crate::Extent3d,
) -> Result<(u32, u32), String> {
    if mip_level >= desc.mip_levels {
        return Err(format!(
            "mip level {} is out of range, the texture has {}",
            mip_level, desc.mip_levels
        ));
    }
    if array_layer >= desc.layer_count() {
        return Err(format!(
            "array layer {} is out of range, the texture has {}",
            array_layer,
            desc.layer_count()
        ));
    }
    let (mip_width, mip_height, mip_depth) = mip_dimensions(desc, mip_level);
    let (width, height) = copy_extent(desc.format, mip_width, mip_height, size.width, size.height);
    if origin.x + width > mip_width
        || origin.y + height > mip_height
        || origin.z + size.depth > mip_depth
    {
        return Err(format!(
            "region {:?}+{:?} exceeds mip level {} of size {}x{}x{}",
            origin, size, mip_level, mip_width, mip_height, mip_depth
        ));
    }
    Ok((width, height))
}

/// One contiguous row of blocks of a region, in linear staging storage and
/// in tightly packed client memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RowCopy {
    pub staging_offset: BufferAddress,
    pub packed_offset: BufferAddress,
    pub size: BufferAddress,
}

/// Size of a region in tightly packed client memory.
pub(crate) fn packed_size(format: PixelFormat, width: u32, height: u32, depth: u32) -> BufferAddress {
    format.region_size(width, height, depth)
}

/// Splits `region` of a staging texture into contiguous rows of blocks.
pub(crate) fn region_rows(
    desc: &TextureDescription,
    region: &TextureRegion,
    copy_width: u32,
    copy_height: u32,
) -> impl Iterator<Item = RowCopy> {
    let format = desc.format;
    let block = format.describe().block_dimension;
    let layout = subresource_layout(desc, region.mip_level, region.array_layer);
    let row_size = format.row_pitch(copy_width) as BufferAddress;
    let rows = format.num_rows(copy_height);
    let origin = region.origin;
    (0..region.size.depth).flat_map(move |z| {
        (0..rows).map(move |row| RowCopy {
            staging_offset: layout.offset
                + format.texel_offset(
                    layout.row_pitch,
                    layout.depth_pitch,
                    origin.x,
                    origin.y + row * block,
                    origin.z + z,
                ),
            packed_offset: (z * rows + row) as BufferAddress * row_size,
            size: row_size,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TextureUsage;

    fn staging(width: u32, height: u32, mips: u32, layers: u32, format: PixelFormat) -> TextureDescription<'static> {
        TextureDescription::texture_2d(width, height, mips, layers, format, TextureUsage::STAGING)
    }

    #[test]
    fn block_facts() {
        let bc1 = PixelFormat::Bc1RgbaUnorm.describe();
        assert_eq!((bc1.block_dimension, bc1.block_size), (4, 8));
        let bc3 = PixelFormat::Bc3Unorm.describe();
        assert_eq!((bc3.block_dimension, bc3.block_size), (4, 16));
        let etc = PixelFormat::Etc2Rgba8Unorm.describe();
        assert_eq!((etc.block_dimension, etc.block_size), (4, 16));
        let rgba = PixelFormat::Rgba8Unorm.describe();
        assert_eq!((rgba.block_dimension, rgba.block_size), (1, 4));
        assert!(PixelFormat::Depth24UnormStencil8.has_stencil());
        assert!(!PixelFormat::Depth32Float.has_stencil());
        assert!(PixelFormat::Depth16Unorm.is_depth_stencil());
    }

    #[test]
    fn pitches() {
        assert_eq!(PixelFormat::Rgba8Unorm.row_pitch(7), 28);
        assert_eq!(PixelFormat::Rgba8Unorm.num_rows(5), 5);
        assert_eq!(PixelFormat::Bc1RgbaUnorm.row_pitch(7), 16);
        assert_eq!(PixelFormat::Bc1RgbaUnorm.num_rows(5), 2);
        assert_eq!(PixelFormat::Bc3Unorm.depth_pitch(16, 16), 256);
        assert_eq!(PixelFormat::Bc3Unorm.row_pitch(1), 16);
    }

    #[test]
    fn mip_chain_offsets() {
        let desc = staging(16, 16, 3, 2, PixelFormat::Rgba8Unorm);
        // 16x16 + 8x8 + 4x4 texels of 4 bytes
        let layer = (256 + 64 + 16) * 4;
        assert_eq!(subresource_offset(&desc, 0, 0), 0);
        assert_eq!(subresource_offset(&desc, 1, 0), 1024);
        assert_eq!(subresource_offset(&desc, 2, 0), 1280);
        assert_eq!(subresource_offset(&desc, 0, 1), layer);
        assert_eq!(subresource_offset(&desc, 2, 1), layer + 1280);
        assert_eq!(total_staging_size(&desc), 2 * layer);
    }

    #[test]
    fn compressed_tail_mips_take_a_full_block() {
        let desc = staging(8, 8, 4, 1, PixelFormat::Bc1RgbaUnorm);
        // 8x8 = 4 blocks, 4x4, 2x2 and 1x1 = 1 block each
        assert_eq!(total_staging_size(&desc), (4 + 1 + 1 + 1) * 8);
        let layout = subresource_layout(&desc, 3, 0);
        assert_eq!(layout.row_pitch, 8);
        assert_eq!(layout.depth_pitch, 8);
        assert_eq!(layout.offset, 6 * 8);
    }

    #[test]
    fn cubemap_layers() {
        let mut desc = staging(4, 4, 1, 1, PixelFormat::R8Unorm);
        desc.usage |= TextureUsage::CUBEMAP;
        assert_eq!(total_staging_size(&desc), 6 * 16);
        assert_eq!(subresource_offset(&desc, 0, 5), 5 * 16);
    }

    #[test]
    fn sub_block_regions_are_clamped_to_the_mip() {
        let bc = PixelFormat::Bc1RgbaUnorm;
        assert_eq!(copy_extent(bc, 2, 2, 4, 4), (2, 2));
        assert_eq!(copy_extent(bc, 16, 16, 4, 4), (4, 4));
        assert_eq!(copy_extent(bc, 2, 2, 8, 8), (8, 8));
        assert_eq!(copy_extent(PixelFormat::Rgba8Unorm, 2, 2, 1, 1), (1, 1));
    }

    #[test]
    fn region_rows_walk_blocks() {
        let desc = staging(8, 8, 2, 1, PixelFormat::Bc1RgbaUnorm);
        let region = TextureRegion {
            origin: Origin3d { x: 4, y: 0, z: 0 },
            size: crate::Extent3d::new(4, 8, 1),
            mip_level: 0,
            array_layer: 0,
        };
        let (width, height) =
            validate_region(&desc, &region.origin, 0, 0, &region.size).unwrap();
        let rows: Vec<_> = region_rows(&desc, &region, width, height).collect();
        assert_eq!(
            rows,
            vec![
                RowCopy {
                    staging_offset: 8,
                    packed_offset: 0,
                    size: 8
                },
                RowCopy {
                    staging_offset: 24,
                    packed_offset: 8,
                    size: 8
                },
            ]
        );
        assert_eq!(packed_size(desc.format, width, height, 1), 16);
    }

    #[test]
    fn regions_outside_the_mip_are_rejected() {
        let desc = staging(8, 8, 2, 1, PixelFormat::Rgba8Unorm);
        let size = crate::Extent3d::new(4, 4, 1);
        assert!(validate_region(&desc, &Origin3d::ZERO, 1, 0, &size).is_ok());
        assert!(validate_region(&desc, &Origin3d { x: 1, y: 0, z: 0 }, 1, 0, &size).is_err());
        assert!(validate_region(&desc, &Origin3d::ZERO, 2, 0, &size).is_err());
        assert!(validate_region(&desc, &Origin3d::ZERO, 0, 1, &size).is_err());
    }

    #[test]
    fn texel_addressing_uses_whole_blocks() {
        let bc = PixelFormat::Bc3Unorm;
        let row = bc.row_pitch(16);
        let depth = bc.depth_pitch(16, 16);
        assert_eq!(bc.texel_offset(row, depth, 4, 4, 0), (row + 16) as BufferAddress);
        assert_eq!(bc.texel_offset(row, depth, 5, 6, 1), (depth + row + 16) as BufferAddress);
        let rgba = PixelFormat::Rgba8Unorm;
        assert_eq!(rgba.texel_offset(64, 1024, 3, 2, 0), 2 * 64 + 12);
    }
}
