//! The surface of the OpenGL (ES) API that the backend calls through.
//!
//! Method names and argument order follow the C entry points, so a binding to
//! a real driver is a thin forwarding layer. Object names are non-zero, the
//! `None` name stands for GL's object 0.

use std::{fmt, num::NonZeroU32, ops::Range};

/// Name of a GL object, as passed to `glObjectLabel`.
pub trait NativeObject: Copy + fmt::Debug {
    fn raw(self) -> u32;
}

macro_rules! native_ids {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub NonZeroU32);

            impl NativeObject for $name {
                fn raw(self) -> u32 {
                    self.0.get()
                }
            }
        )*
    };
}

native_ids!(
    BufferId,
    TextureId,
    SamplerId,
    ShaderId,
    ProgramId,
    FramebufferId,
    VertexArrayId,
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub is_embedded: bool,
}

impl Version {
    pub const fn new(major: u32, minor: u32, is_embedded: bool) -> Self {
        Self {
            major,
            minor,
            is_embedded,
        }
    }

    /// True for desktop GL of at least `major.minor`.
    pub fn desktop_at_least(&self, major: u32, minor: u32) -> bool {
        !self.is_embedded && (self.major, self.minor) >= (major, minor)
    }

    /// True for GL ES of at least `major.minor`.
    pub fn es_at_least(&self, major: u32, minor: u32) -> bool {
        self.is_embedded && (self.major, self.minor) >= (major, minor)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_embedded {
            write!(f, "OpenGL ES {}.{}", self.major, self.minor)
        } else {
            write!(f, "OpenGL {}.{}", self.major, self.minor)
        }
    }
}

/// Source of a texel upload.
#[derive(Debug)]
pub enum PixelUnpackData<'a> {
    /// Offset into the buffer bound to `PIXEL_UNPACK_BUFFER`.
    BufferOffset(u32),
    Slice(&'a [u8]),
}

/// Destination of a texel read-back.
#[derive(Debug)]
pub enum PixelPackData<'a> {
    /// Offset into the buffer bound to `PIXEL_PACK_BUFFER`.
    BufferOffset(u32),
    Slice(&'a mut [u8]),
}

#[derive(Debug)]
pub enum CompressedPixelUnpackData<'a> {
    /// Byte range of the buffer bound to `PIXEL_UNPACK_BUFFER`.
    BufferRange(Range<u32>),
    Slice(&'a [u8]),
}

/// Entry points of one GL context.
///
/// Calls must come from one thread at a time; the device serializes them.
pub trait Context: fmt::Debug + Send + Sync {
    fn version(&self) -> Version;
    fn renderer(&self) -> String;
    fn supports_extension(&self, name: &str) -> bool;
    fn get_parameter_i32(&self, parameter: u32) -> i32;
    fn get_error(&self) -> u32;

    fn create_buffer(&self) -> Result<BufferId, String>;
    fn delete_buffer(&self, buffer: BufferId);
    fn bind_buffer(&self, target: u32, buffer: Option<BufferId>);
    fn bind_buffer_range(
        &self,
        target: u32,
        index: u32,
        buffer: Option<BufferId>,
        offset: i32,
        size: i32,
    );
    fn buffer_data_size(&self, target: u32, size: i32, usage: u32);
    fn buffer_sub_data_u8_slice(&self, target: u32, offset: i32, data: &[u8]);
    fn get_buffer_sub_data(&self, target: u32, offset: i32, data: &mut [u8]);
    fn copy_buffer_sub_data(
        &self,
        src_target: u32,
        dst_target: u32,
        src_offset: i32,
        dst_offset: i32,
        size: i32,
    );

    fn create_texture(&self) -> Result<TextureId, String>;
    fn delete_texture(&self, texture: TextureId);
    fn active_texture(&self, unit: u32);
    fn bind_texture(&self, target: u32, texture: Option<TextureId>);
    fn tex_storage_2d(&self, target: u32, levels: i32, internal_format: u32, width: i32, height: i32);
    fn tex_storage_3d(
        &self,
        target: u32,
        levels: i32,
        internal_format: u32,
        width: i32,
        height: i32,
        depth: i32,
    );
    fn tex_storage_2d_multisample(
        &self,
        target: u32,
        samples: i32,
        internal_format: u32,
        width: i32,
        height: i32,
        fixed_sample_locations: bool,
    );
    fn tex_parameter_i32(&self, target: u32, parameter: u32, value: i32);
    fn tex_sub_image_2d(
        &self,
        target: u32,
        level: i32,
        x_offset: i32,
        y_offset: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        pixels: PixelUnpackData,
    );
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
        format: u32,
        ty: u32,
        pixels: PixelUnpackData,
    );
    fn compressed_tex_sub_image_2d(
        &self,
        target: u32,
        level: i32,
        x_offset: i32,
        y_offset: i32,
        width: i32,
        height: i32,
        format: u32,
        pixels: CompressedPixelUnpackData,
    );
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
        format: u32,
        pixels: CompressedPixelUnpackData,
    );
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
    );
    fn copy_image_sub_data(
        &self,
        src: TextureId,
        src_target: u32,
        src_level: i32,
        src_x: i32,
        src_y: i32,
        src_z: i32,
        dst: TextureId,
        dst_target: u32,
        dst_level: i32,
        dst_x: i32,
        dst_y: i32,
        dst_z: i32,
        width: i32,
        height: i32,
        depth: i32,
    );
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
    );
    fn generate_mipmap(&self, target: u32);
    fn pixel_store_i32(&self, parameter: u32, value: i32);
    fn read_pixels(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        pixels: PixelPackData,
    );

    fn create_sampler(&self) -> Result<SamplerId, String>;
    fn delete_sampler(&self, sampler: SamplerId);
    fn bind_sampler(&self, unit: u32, sampler: Option<SamplerId>);
    fn sampler_parameter_i32(&self, sampler: SamplerId, parameter: u32, value: i32);
    fn sampler_parameter_f32(&self, sampler: SamplerId, parameter: u32, value: f32);
    fn sampler_parameter_f32_slice(&self, sampler: SamplerId, parameter: u32, values: &[f32]);

    fn create_shader(&self, shader_type: u32) -> Result<ShaderId, String>;
    fn shader_source(&self, shader: ShaderId, source: &str);
    fn compile_shader(&self, shader: ShaderId);
    fn get_shader_compile_status(&self, shader: ShaderId) -> bool;
    fn get_shader_info_log(&self, shader: ShaderId) -> String;
    fn delete_shader(&self, shader: ShaderId);
    fn create_program(&self) -> Result<ProgramId, String>;
    fn attach_shader(&self, program: ProgramId, shader: ShaderId);
    fn detach_shader(&self, program: ProgramId, shader: ShaderId);
    fn link_program(&self, program: ProgramId);
    fn get_program_link_status(&self, program: ProgramId) -> bool;
    fn get_program_info_log(&self, program: ProgramId) -> String;
    fn delete_program(&self, program: ProgramId);
    fn use_program(&self, program: Option<ProgramId>);
    fn get_attrib_location(&self, program: ProgramId, name: &str) -> Option<u32>;
    fn get_uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    fn uniform_1_i32(&self, location: Option<UniformLocation>, value: i32);
    fn get_uniform_block_index(&self, program: ProgramId, name: &str) -> Option<u32>;
    fn uniform_block_binding(&self, program: ProgramId, index: u32, binding: u32);
    fn get_shader_storage_block_index(&self, program: ProgramId, name: &str) -> Option<u32>;
    fn shader_storage_block_binding(&self, program: ProgramId, index: u32, binding: u32);

    fn create_vertex_array(&self) -> Result<VertexArrayId, String>;
    fn delete_vertex_array(&self, vertex_array: VertexArrayId);
    fn bind_vertex_array(&self, vertex_array: Option<VertexArrayId>);
    fn enable_vertex_attrib_array(&self, index: u32);
    fn disable_vertex_attrib_array(&self, index: u32);
    fn vertex_attrib_pointer_f32(
        &self,
        index: u32,
        size: i32,
        data_type: u32,
        normalized: bool,
        stride: i32,
        offset: i32,
    );
    fn vertex_attrib_pointer_i32(&self, index: u32, size: i32, data_type: u32, stride: i32, offset: i32);
    fn vertex_attrib_divisor(&self, index: u32, divisor: u32);

    fn create_framebuffer(&self) -> Result<FramebufferId, String>;
    fn delete_framebuffer(&self, framebuffer: FramebufferId);
    fn bind_framebuffer(&self, target: u32, framebuffer: Option<FramebufferId>);
    fn framebuffer_texture_2d(
        &self,
        target: u32,
        attachment: u32,
        texture_target: u32,
        texture: Option<TextureId>,
        level: i32,
    );
    fn framebuffer_texture_layer(
        &self,
        target: u32,
        attachment: u32,
        texture: Option<TextureId>,
        level: i32,
        layer: i32,
    );
    fn check_framebuffer_status(&self, target: u32) -> u32;
    fn draw_buffers(&self, buffers: &[u32]);
    fn read_buffer(&self, src: u32);
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
    );

    fn enable(&self, parameter: u32);
    fn disable(&self, parameter: u32);
    fn viewport(&self, x: i32, y: i32, width: i32, height: i32);
    fn depth_range_f32(&self, near: f32, far: f32);
    fn viewport_f32_slice(&self, first: u32, count: i32, values: &[[f32; 4]]);
    fn depth_range_f64_slice(&self, first: u32, count: i32, values: &[[f64; 2]]);
    fn scissor(&self, x: i32, y: i32, width: i32, height: i32);
    fn scissor_slice(&self, first: u32, count: i32, scissors: &[[i32; 4]]);
    fn front_face(&self, value: u32);
    fn cull_face(&self, value: u32);
    fn polygon_mode(&self, face: u32, mode: u32);
    fn blend_color(&self, red: f32, green: f32, blue: f32, alpha: f32);
    fn blend_equation_separate(&self, mode_rgb: u32, mode_alpha: u32);
    fn blend_func_separate(&self, src_rgb: u32, dst_rgb: u32, src_alpha: u32, dst_alpha: u32);
    fn blend_equation_separate_draw_buffer(&self, draw_buffer: u32, mode_rgb: u32, mode_alpha: u32);
    fn blend_func_separate_draw_buffer(
        &self,
        draw_buffer: u32,
        src_rgb: u32,
        dst_rgb: u32,
        src_alpha: u32,
        dst_alpha: u32,
    );
    fn enable_draw_buffer(&self, parameter: u32, draw_buffer: u32);
    fn disable_draw_buffer(&self, parameter: u32, draw_buffer: u32);
    fn color_mask(&self, red: bool, green: bool, blue: bool, alpha: bool);
    fn color_mask_draw_buffer(&self, draw_buffer: u32, red: bool, green: bool, blue: bool, alpha: bool);
    fn depth_func(&self, func: u32);
    fn depth_mask(&self, value: bool);
    fn stencil_func_separate(&self, face: u32, func: u32, reference: i32, mask: u32);
    fn stencil_op_separate(&self, face: u32, stencil_fail: u32, depth_fail: u32, pass: u32);
    fn stencil_mask_separate(&self, face: u32, mask: u32);

    fn clear_buffer_f32_slice(&self, target: u32, draw_buffer: u32, values: &[f32]);
    fn clear_buffer_depth_stencil(&self, target: u32, draw_buffer: u32, depth: f32, stencil: i32);

    fn draw_arrays(&self, mode: u32, first: i32, count: i32);
    fn draw_arrays_instanced(&self, mode: u32, first: i32, count: i32, instance_count: i32);
    fn draw_arrays_instanced_base_instance(
        &self,
        mode: u32,
        first: i32,
        count: i32,
        instance_count: i32,
        base_instance: u32,
    );
    fn draw_elements(&self, mode: u32, count: i32, element_type: u32, offset: i32);
    fn draw_elements_instanced(
        &self,
        mode: u32,
        count: i32,
        element_type: u32,
        offset: i32,
        instance_count: i32,
    );
    fn draw_elements_base_vertex(
        &self,
        mode: u32,
        count: i32,
        element_type: u32,
        offset: i32,
        base_vertex: i32,
    );
    fn draw_elements_instanced_base_vertex(
        &self,
        mode: u32,
        count: i32,
        element_type: u32,
        offset: i32,
        instance_count: i32,
        base_vertex: i32,
    );
    fn draw_elements_instanced_base_vertex_base_instance(
        &self,
        mode: u32,
        count: i32,
        element_type: u32,
        offset: i32,
        instance_count: i32,
        base_vertex: i32,
        base_instance: u32,
    );
    fn draw_arrays_indirect_offset(&self, mode: u32, offset: i32);
    fn draw_elements_indirect_offset(&self, mode: u32, element_type: u32, offset: i32);
    fn dispatch_compute(&self, groups_x: u32, groups_y: u32, groups_z: u32);
    fn dispatch_compute_indirect(&self, offset: i32);
    fn memory_barrier(&self, barriers: u32);
    fn bind_image_texture(
        &self,
        unit: u32,
        texture: Option<TextureId>,
        level: i32,
        layered: bool,
        layer: i32,
        access: u32,
        format: u32,
    );

    fn push_debug_group(&self, source: u32, id: u32, message: &str);
    fn pop_debug_group(&self);
    fn debug_message_insert(&self, source: u32, ty: u32, id: u32, severity: u32, message: &str);
    fn object_label(&self, identifier: u32, name: u32, label: Option<&str>);

    fn flush(&self);
    fn finish(&self);

    /// Presents the back buffer of the context's window surface.
    fn swap_buffers(&self);
    fn set_swap_interval(&self, interval: i32);
    fn resize_surface(&self, width: u32, height: u32);
}

pub const NONE: u32 = 0;
pub const NO_ERROR: u32 = 0;
pub const ZERO: u32 = 0;
pub const ONE: u32 = 1;

pub const ARRAY_BUFFER: u32 = 0x8892;
pub const ELEMENT_ARRAY_BUFFER: u32 = 0x8893;
pub const UNIFORM_BUFFER: u32 = 0x8A11;
pub const SHADER_STORAGE_BUFFER: u32 = 0x90D2;
pub const COPY_READ_BUFFER: u32 = 0x8F36;
pub const COPY_WRITE_BUFFER: u32 = 0x8F37;
pub const PIXEL_PACK_BUFFER: u32 = 0x88EB;
pub const PIXEL_UNPACK_BUFFER: u32 = 0x88EC;
pub const DRAW_INDIRECT_BUFFER: u32 = 0x8F3F;
pub const DISPATCH_INDIRECT_BUFFER: u32 = 0x90EE;

pub const STATIC_DRAW: u32 = 0x88E4;
pub const DYNAMIC_DRAW: u32 = 0x88E8;
pub const DYNAMIC_READ: u32 = 0x88E9;

pub const TEXTURE_1D: u32 = 0x0DE0;
pub const TEXTURE_2D: u32 = 0x0DE1;
pub const TEXTURE_3D: u32 = 0x806F;
pub const TEXTURE_1D_ARRAY: u32 = 0x8C18;
pub const TEXTURE_2D_ARRAY: u32 = 0x8C1A;
pub const TEXTURE_CUBE_MAP: u32 = 0x8513;
pub const TEXTURE_CUBE_MAP_POSITIVE_X: u32 = 0x8515;
pub const TEXTURE_CUBE_MAP_ARRAY: u32 = 0x9009;
pub const TEXTURE_2D_MULTISAMPLE: u32 = 0x9100;
pub const TEXTURE0: u32 = 0x84C0;

pub const TEXTURE_MAG_FILTER: u32 = 0x2800;
pub const TEXTURE_MIN_FILTER: u32 = 0x2801;
pub const TEXTURE_WRAP_S: u32 = 0x2802;
pub const TEXTURE_WRAP_T: u32 = 0x2803;
pub const TEXTURE_WRAP_R: u32 = 0x8072;
pub const TEXTURE_MIN_LOD: u32 = 0x813A;
pub const TEXTURE_MAX_LOD: u32 = 0x813B;
pub const TEXTURE_MAX_LEVEL: u32 = 0x813D;
pub const TEXTURE_LOD_BIAS: u32 = 0x8501;
pub const TEXTURE_BORDER_COLOR: u32 = 0x1004;
pub const TEXTURE_COMPARE_MODE: u32 = 0x884C;
pub const TEXTURE_COMPARE_FUNC: u32 = 0x884D;
pub const COMPARE_REF_TO_TEXTURE: u32 = 0x884E;
pub const TEXTURE_MAX_ANISOTROPY_EXT: u32 = 0x84FE;

pub const NEAREST: u32 = 0x2600;
pub const LINEAR: u32 = 0x2601;
pub const NEAREST_MIPMAP_NEAREST: u32 = 0x2700;
pub const LINEAR_MIPMAP_NEAREST: u32 = 0x2701;
pub const NEAREST_MIPMAP_LINEAR: u32 = 0x2702;
pub const LINEAR_MIPMAP_LINEAR: u32 = 0x2703;

pub const REPEAT: u32 = 0x2901;
pub const CLAMP_TO_EDGE: u32 = 0x812F;
pub const CLAMP_TO_BORDER: u32 = 0x812D;
pub const MIRRORED_REPEAT: u32 = 0x8370;

pub const NEVER: u32 = 0x0200;
pub const LESS: u32 = 0x0201;
pub const EQUAL: u32 = 0x0202;
pub const LEQUAL: u32 = 0x0203;
pub const GREATER: u32 = 0x0204;
pub const NOTEQUAL: u32 = 0x0205;
pub const GEQUAL: u32 = 0x0206;
pub const ALWAYS: u32 = 0x0207;

pub const UNPACK_ROW_LENGTH: u32 = 0x0CF2;
pub const UNPACK_ALIGNMENT: u32 = 0x0CF5;
pub const UNPACK_IMAGE_HEIGHT: u32 = 0x806E;
pub const PACK_ROW_LENGTH: u32 = 0x0D02;
pub const PACK_ALIGNMENT: u32 = 0x0D05;
pub const PACK_IMAGE_HEIGHT: u32 = 0x806C;

pub const RED: u32 = 0x1903;
pub const RG: u32 = 0x8227;
pub const RGB: u32 = 0x1907;
pub const RGBA: u32 = 0x1908;
pub const BGRA: u32 = 0x80E1;
pub const RED_INTEGER: u32 = 0x8D94;
pub const RG_INTEGER: u32 = 0x8228;
pub const RGBA_INTEGER: u32 = 0x8D99;
pub const DEPTH_COMPONENT: u32 = 0x1902;
pub const DEPTH_STENCIL: u32 = 0x84F9;

pub const BYTE: u32 = 0x1400;
pub const UNSIGNED_BYTE: u32 = 0x1401;
pub const SHORT: u32 = 0x1402;
pub const UNSIGNED_SHORT: u32 = 0x1403;
pub const INT: u32 = 0x1404;
pub const UNSIGNED_INT: u32 = 0x1405;
pub const FLOAT: u32 = 0x1406;
pub const HALF_FLOAT: u32 = 0x140B;
pub const UNSIGNED_INT_2_10_10_10_REV: u32 = 0x8368;
pub const UNSIGNED_INT_10F_11F_11F_REV: u32 = 0x8C3B;
pub const UNSIGNED_INT_24_8: u32 = 0x84FA;
pub const FLOAT_32_UNSIGNED_INT_24_8_REV: u32 = 0x8DAD;

pub const R8: u32 = 0x8229;
pub const R8_SNORM: u32 = 0x8F94;
pub const R8UI: u32 = 0x8232;
pub const R8I: u32 = 0x8231;
pub const R16: u32 = 0x822A;
pub const R16UI: u32 = 0x8234;
pub const R16F: u32 = 0x822D;
pub const R32UI: u32 = 0x8236;
pub const R32I: u32 = 0x8235;
pub const R32F: u32 = 0x822E;
pub const RG8: u32 = 0x822B;
pub const RG16F: u32 = 0x822F;
pub const RG32F: u32 = 0x8230;
pub const RGBA8: u32 = 0x8058;
pub const SRGB8_ALPHA8: u32 = 0x8C43;
pub const RGBA8UI: u32 = 0x8D7C;
pub const RGB10_A2: u32 = 0x8059;
pub const R11F_G11F_B10F: u32 = 0x8C3A;
pub const RGBA16F: u32 = 0x881A;
pub const RGBA32UI: u32 = 0x8D70;
pub const RGBA32F: u32 = 0x8814;
pub const DEPTH_COMPONENT16: u32 = 0x81A5;
pub const DEPTH_COMPONENT32F: u32 = 0x8CAC;
pub const DEPTH24_STENCIL8: u32 = 0x88F0;
pub const DEPTH32F_STENCIL8: u32 = 0x8CAD;

pub const COMPRESSED_RGBA_S3TC_DXT1_EXT: u32 = 0x83F1;
pub const COMPRESSED_RGBA_S3TC_DXT3_EXT: u32 = 0x83F2;
pub const COMPRESSED_RGBA_S3TC_DXT5_EXT: u32 = 0x83F3;
pub const COMPRESSED_SRGB_ALPHA_S3TC_DXT1_EXT: u32 = 0x8C4D;
pub const COMPRESSED_RED_RGTC1: u32 = 0x8DBB;
pub const COMPRESSED_RG_RGTC2: u32 = 0x8DBD;
pub const COMPRESSED_RGBA_BPTC_UNORM: u32 = 0x8E8C;
pub const COMPRESSED_SRGB_ALPHA_BPTC_UNORM: u32 = 0x8E8D;
pub const COMPRESSED_RGB8_ETC2: u32 = 0x9274;
pub const COMPRESSED_RGBA8_ETC2_EAC: u32 = 0x9278;

pub const FRAMEBUFFER: u32 = 0x8D40;
pub const READ_FRAMEBUFFER: u32 = 0x8CA8;
pub const DRAW_FRAMEBUFFER: u32 = 0x8CA9;
pub const COLOR_ATTACHMENT0: u32 = 0x8CE0;
pub const DEPTH_ATTACHMENT: u32 = 0x8D00;
pub const DEPTH_STENCIL_ATTACHMENT: u32 = 0x821A;
pub const FRAMEBUFFER_COMPLETE: u32 = 0x8CD5;
pub const COLOR_BUFFER_BIT: u32 = 0x4000;

pub const COLOR: u32 = 0x1800;
pub const DEPTH: u32 = 0x1801;
pub const STENCIL: u32 = 0x1802;

pub const CULL_FACE: u32 = 0x0B44;
pub const DEPTH_TEST: u32 = 0x0B71;
pub const STENCIL_TEST: u32 = 0x0B90;
pub const BLEND: u32 = 0x0BE2;
pub const SCISSOR_TEST: u32 = 0x0C11;
pub const DEPTH_CLAMP: u32 = 0x864F;
pub const SAMPLE_ALPHA_TO_COVERAGE: u32 = 0x809E;
pub const FRAMEBUFFER_SRGB: u32 = 0x8DB9;

pub const FRONT: u32 = 0x0404;
pub const BACK: u32 = 0x0405;
pub const FRONT_AND_BACK: u32 = 0x0408;
pub const CW: u32 = 0x0900;
pub const CCW: u32 = 0x0901;
pub const LINE: u32 = 0x1B01;
pub const FILL: u32 = 0x1B02;

pub const FUNC_ADD: u32 = 0x8006;
pub const MIN: u32 = 0x8007;
pub const MAX: u32 = 0x8008;
pub const FUNC_SUBTRACT: u32 = 0x800A;
pub const FUNC_REVERSE_SUBTRACT: u32 = 0x800B;

pub const SRC_COLOR: u32 = 0x0300;
pub const ONE_MINUS_SRC_COLOR: u32 = 0x0301;
pub const SRC_ALPHA: u32 = 0x0302;
pub const ONE_MINUS_SRC_ALPHA: u32 = 0x0303;
pub const DST_ALPHA: u32 = 0x0304;
pub const ONE_MINUS_DST_ALPHA: u32 = 0x0305;
pub const DST_COLOR: u32 = 0x0306;
pub const ONE_MINUS_DST_COLOR: u32 = 0x0307;
pub const CONSTANT_COLOR: u32 = 0x8001;
pub const ONE_MINUS_CONSTANT_COLOR: u32 = 0x8002;

pub const KEEP: u32 = 0x1E00;
pub const REPLACE: u32 = 0x1E01;
pub const INCR: u32 = 0x1E02;
pub const DECR: u32 = 0x1E03;
pub const INVERT: u32 = 0x150A;
pub const INCR_WRAP: u32 = 0x8507;
pub const DECR_WRAP: u32 = 0x8508;

pub const POINTS: u32 = 0x0000;
pub const LINES: u32 = 0x0001;
pub const LINE_STRIP: u32 = 0x0003;
pub const TRIANGLES: u32 = 0x0004;
pub const TRIANGLE_STRIP: u32 = 0x0005;

pub const FRAGMENT_SHADER: u32 = 0x8B30;
pub const VERTEX_SHADER: u32 = 0x8B31;
pub const COMPUTE_SHADER: u32 = 0x91B9;

pub const ALL_BARRIER_BITS: u32 = 0xFFFF_FFFF;
pub const READ_ONLY: u32 = 0x88B8;
pub const READ_WRITE: u32 = 0x88BA;

pub const DEBUG_SOURCE_APPLICATION: u32 = 0x824A;
pub const DEBUG_TYPE_MARKER: u32 = 0x8268;
pub const DEBUG_SEVERITY_NOTIFICATION: u32 = 0x826B;

pub const BUFFER: u32 = 0x82E0;
pub const SHADER: u32 = 0x82E1;
pub const PROGRAM: u32 = 0x82E2;
pub const SAMPLER: u32 = 0x82E6;
pub const TEXTURE: u32 = 0x1702;

pub const MAX_COMBINED_TEXTURE_IMAGE_UNITS: u32 = 0x8B4D;
pub const MAX_UNIFORM_BUFFER_BINDINGS: u32 = 0x8A2F;
pub const MAX_SHADER_STORAGE_BUFFER_BINDINGS: u32 = 0x90DD;
pub const MAX_VIEWPORTS: u32 = 0x825B;
pub const MAX_DRAW_BUFFERS: u32 = 0x8824;
pub const MAX_IMAGE_UNITS: u32 = 0x8F38;

/// Faces of a cube map, in array layer order.
pub const CUBEMAP_FACES: [u32; 6] = [
    TEXTURE_CUBE_MAP_POSITIVE_X,
    TEXTURE_CUBE_MAP_POSITIVE_X + 1,
    TEXTURE_CUBE_MAP_POSITIVE_X + 2,
    TEXTURE_CUBE_MAP_POSITIVE_X + 3,
    TEXTURE_CUBE_MAP_POSITIVE_X + 4,
    TEXTURE_CUBE_MAP_POSITIVE_X + 5,
];

#[test]
fn test_version_ordering() {
    let es31 = Version::new(3, 1, true);
    assert!(es31.es_at_least(3, 0));
    assert!(!es31.es_at_least(3, 2));
    assert!(!es31.desktop_at_least(3, 0));
    assert!(Version::new(4, 5, false).desktop_at_least(4, 3));
    assert_eq!(es31.to_string(), "OpenGL ES 3.1");
}
