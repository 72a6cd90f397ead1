use std::sync::Arc;

use arrayvec::ArrayVec;
use smallvec::SmallVec;

use super::{
    command::{BindPoint, Command as C, CommandBuffer, Subresource},
    conv,
    native::{self, BufferId, CompressedPixelUnpackData, PixelPackData, PixelUnpackData, ProgramId, SamplerId, TextureId},
    DeviceShared, PrivateCapabilities, RenderPipelineState,
};
use crate::{
    cache::SlotCache, BindableResource, BufferAddress, Color, ColorWriteMask, CommandError,
    Extent3d, IndexFormat, PixelFormat, ResourceKind, ScissorRect, Viewport, MAX_COLOR_TARGETS,
    MAX_RESOURCE_SETS, MAX_VERTEX_BUFFERS, MAX_VIEWPORTS,
};

const DEBUG_ID: u32 = 0;

/// Where texel data of an upload comes from.
#[derive(Debug)]
pub(super) enum TexelSource<'a> {
    /// Tightly packed client memory.
    Slice(&'a [u8]),
    /// The buffer bound to `PIXEL_UNPACK_BUFFER`, laid out with the given pitches.
    Buffer {
        offset: BufferAddress,
        row_pitch: u32,
        depth_pitch: u32,
    },
}

/// Writes a region of texels into one subresource of an image.
pub(super) fn upload_texture(
    gl: &dyn native::Context,
    dst: &Subresource,
    format: PixelFormat,
    size: Extent3d,
    source: TexelSource,
) {
    let info = format.describe();
    let format_desc = conv::describe_texture_format(format);
    let (base, row_pitch, depth_pitch) = match source {
        TexelSource::Slice(_) => (
            0,
            format.row_pitch(size.width),
            format.depth_pitch(size.width, size.height),
        ),
        TexelSource::Buffer {
            offset,
            row_pitch,
            depth_pitch,
        } => (offset, row_pitch, depth_pitch),
    };
    let (x, y) = (dst.origin.x as i32, dst.origin.y as i32);

    gl.bind_texture(dst.target, Some(dst.raw));
    if !info.compressed {
        gl.pixel_store_i32(native::UNPACK_ROW_LENGTH, (row_pitch / info.block_size) as i32);
        gl.pixel_store_i32(native::UNPACK_IMAGE_HEIGHT, (depth_pitch / row_pitch) as i32);
        let pixels = match source {
            TexelSource::Slice(data) => PixelUnpackData::Slice(data),
            TexelSource::Buffer { .. } => PixelUnpackData::BufferOffset(base as u32),
        };
        if dst.is_layered() {
            gl.tex_sub_image_3d(
                dst.target,
                dst.level as i32,
                x,
                y,
                dst.z(0) as i32,
                size.width as i32,
                size.height as i32,
                size.depth as i32,
                format_desc.external,
                format_desc.data_type,
                pixels,
            );
        } else {
            gl.tex_sub_image_2d(
                dst.face_target(),
                dst.level as i32,
                x,
                y,
                size.width as i32,
                size.height as i32,
                format_desc.external,
                format_desc.data_type,
                pixels,
            );
        }
        gl.pixel_store_i32(native::UNPACK_ROW_LENGTH, 0);
        gl.pixel_store_i32(native::UNPACK_IMAGE_HEIGHT, 0);
    } else {
        // compressed uploads can't describe a pitch, so go one row of blocks at a time
        let block = info.block_dimension;
        let row_size = format.row_pitch(size.width);
        for z in 0..size.depth {
            for row in 0..format.num_rows(size.height) {
                let offset = z * depth_pitch + row * row_pitch;
                let rows = block.min(size.height - row * block);
                let pixels = match source {
                    TexelSource::Slice(data) => CompressedPixelUnpackData::Slice(
                        &data[offset as usize..(offset + row_size) as usize],
                    ),
                    TexelSource::Buffer { .. } => {
                        let start = (base + offset as BufferAddress) as u32;
                        CompressedPixelUnpackData::BufferRange(start..start + row_size)
                    }
                };
                let y = y + (row * block) as i32;
                if dst.is_layered() {
                    gl.compressed_tex_sub_image_3d(
                        dst.target,
                        dst.level as i32,
                        x,
                        y,
                        dst.z(z) as i32,
                        size.width as i32,
                        rows as i32,
                        1,
                        format_desc.internal,
                        pixels,
                    );
                } else {
                    gl.compressed_tex_sub_image_2d(
                        dst.face_target(),
                        dst.level as i32,
                        x,
                        y,
                        size.width as i32,
                        rows as i32,
                        format_desc.internal,
                        pixels,
                    );
                }
            }
        }
    }
}

#[derive(Debug)]
struct BoundSet {
    set: Arc<super::ResourceSet>,
    dynamic_offsets: SmallVec<[u32; 4]>,
    /// Whether the GL units reflect this set.
    active: bool,
}

#[derive(Clone, Copy, Debug)]
struct VertexBufferBinding {
    buffer: BufferId,
    offset: BufferAddress,
    active: bool,
}

#[derive(Clone, Copy, Debug)]
struct IndexBinding {
    buffer: BufferId,
    format: IndexFormat,
    offset: BufferAddress,
}

/// Replays one command buffer against the context, skipping GL calls whose
/// effect is already in place.
struct Executor<'a> {
    shared: &'a DeviceShared,
    gl: &'a dyn native::Context,

    framebuffer: Option<Arc<super::Framebuffer>>,
    draw_framebuffer: Option<native::FramebufferId>,
    clear_colors: [Option<Color>; MAX_COLOR_TARGETS],
    clear_depth: Option<(f32, u8)>,

    viewports: ArrayVec<Viewport, MAX_VIEWPORTS>,
    viewports_changed: bool,
    scissors: ArrayVec<ScissorRect, MAX_VIEWPORTS>,
    scissors_changed: bool,
    applied_scissor_test: Option<bool>,

    graphics_pipeline: Option<Arc<super::Pipeline>>,
    compute_pipeline: Option<Arc<super::Pipeline>>,
    current_program: Option<ProgramId>,
    /// Pipeline whose fixed-function state is in effect.
    last_render_pipeline: Option<Arc<super::Pipeline>>,

    graphics_sets: [Option<BoundSet>; MAX_RESOURCE_SETS],
    compute_sets: [Option<BoundSet>; MAX_RESOURCE_SETS],
    last_bind_point: Option<BindPoint>,
    vertex_buffers: [Option<VertexBufferBinding>; MAX_VERTEX_BUFFERS],
    enabled_attributes: u64,
    index: Option<IndexBinding>,
    bound_index_buffer: Option<BufferId>,

    uniform_buffers: SlotCache<(BufferId, BufferAddress, BufferAddress)>,
    storage_buffers: SlotCache<(BufferId, BufferAddress, BufferAddress)>,
    textures: SlotCache<TextureId>,
    images: SlotCache<TextureId>,
    samplers: SlotCache<SamplerId>,

    debug_group_depth: u32,
}

impl<'a> Executor<'a> {
    fn new(shared: &'a DeviceShared, gl: &'a dyn native::Context) -> Self {
        Self {
            shared,
            gl,
            framebuffer: None,
            draw_framebuffer: None,
            clear_colors: [None; MAX_COLOR_TARGETS],
            clear_depth: None,
            viewports: ArrayVec::new(),
            viewports_changed: false,
            scissors: ArrayVec::new(),
            scissors_changed: false,
            applied_scissor_test: None,
            graphics_pipeline: None,
            compute_pipeline: None,
            current_program: None,
            last_render_pipeline: None,
            graphics_sets: Default::default(),
            compute_sets: Default::default(),
            last_bind_point: None,
            vertex_buffers: [None; MAX_VERTEX_BUFFERS],
            enabled_attributes: 0,
            index: None,
            bound_index_buffer: None,
            uniform_buffers: SlotCache::default(),
            storage_buffers: SlotCache::default(),
            textures: SlotCache::default(),
            images: SlotCache::default(),
            samplers: SlotCache::default(),
            debug_group_depth: 0,
        }
    }

    fn has_cap(&self, caps: PrivateCapabilities) -> bool {
        self.shared.private_caps.contains(caps)
    }

    /// Puts the context into the state every submission starts from.
    fn reset_state(&mut self) {
        let gl = self.gl;
        gl.bind_vertex_array(Some(self.shared.vao));
        gl.use_program(None);
        gl.bind_framebuffer(native::FRAMEBUFFER, None);
        gl.bind_buffer(native::ELEMENT_ARRAY_BUFFER, None);
        gl.disable(native::DEPTH_TEST);
        gl.disable(native::STENCIL_TEST);
        gl.disable(native::SCISSOR_TEST);
        gl.disable(native::BLEND);
        gl.disable(native::CULL_FACE);
        gl.disable(native::SAMPLE_ALPHA_TO_COVERAGE);
        if self.has_cap(PrivateCapabilities::DEPTH_CLAMP) {
            gl.disable(native::DEPTH_CLAMP);
        }
        gl.pixel_store_i32(native::UNPACK_ALIGNMENT, 1);
        gl.pixel_store_i32(native::PACK_ALIGNMENT, 1);
    }

    fn finish(&mut self) {
        let gl = self.gl;
        while self.debug_group_depth != 0 {
            gl.pop_debug_group();
            self.debug_group_depth -= 1;
        }
        for location in 0..64 {
            if self.enabled_attributes & (1 << location) != 0 {
                gl.disable_vertex_attrib_array(location);
            }
        }
        self.enabled_attributes = 0;
        if self.clear_depth.is_some() || self.clear_colors.iter().any(Option::is_some) {
            log::debug!("Dropping clears recorded without any framebuffer");
        }
        gl.use_program(None);
    }

    fn deactivate_sets(&mut self, bind_point: BindPoint) {
        let sets = match bind_point {
            BindPoint::Graphics => &mut self.graphics_sets,
            BindPoint::Compute => &mut self.compute_sets,
        };
        for bound in sets.iter_mut().flatten() {
            bound.active = false;
        }
    }

    fn deactivate_vertex_buffers(&mut self) {
        for binding in self.vertex_buffers.iter_mut().flatten() {
            binding.active = false;
        }
    }

    /// Forgets texture unit contents after a copy rebound textures.
    fn invalidate_texture_bindings(&mut self) {
        self.textures.clear();
        self.deactivate_sets(BindPoint::Graphics);
        self.deactivate_sets(BindPoint::Compute);
    }

    /// Graphics and compute share the GL units, so a switch invalidates
    /// whatever the other bind point left there.
    fn switch_bind_point(&mut self, bind_point: BindPoint) {
        if self.last_bind_point != Some(bind_point) {
            if self.last_bind_point.is_some() {
                self.deactivate_sets(BindPoint::Graphics);
                self.deactivate_sets(BindPoint::Compute);
            }
            self.last_bind_point = Some(bind_point);
        }
    }

    fn use_program(&mut self, program: ProgramId) {
        if self.current_program != Some(program) {
            self.gl.use_program(Some(program));
            self.current_program = Some(program);
        }
    }

    fn bind_draw_framebuffer(&mut self, raw: Option<native::FramebufferId>) {
        if self.draw_framebuffer != raw {
            self.gl.bind_framebuffer(native::DRAW_FRAMEBUFFER, raw);
            self.draw_framebuffer = raw;
        }
    }

    fn apply_color_mask(&self, index: u32, mask: ColorWriteMask) {
        let (r, g, b, a) = (
            mask.contains(ColorWriteMask::RED),
            mask.contains(ColorWriteMask::GREEN),
            mask.contains(ColorWriteMask::BLUE),
            mask.contains(ColorWriteMask::ALPHA),
        );
        if self.has_cap(PrivateCapabilities::INDEXED_DRAW_BUFFERS) {
            self.gl.color_mask_draw_buffer(index, r, g, b, a);
        } else {
            self.gl.color_mask(r, g, b, a);
        }
    }

    /// Applies pending clears to the bound framebuffer, each to its own
    /// attachment.
    fn apply_clears(&mut self) {
        let framebuffer = match self.framebuffer {
            Some(ref framebuffer) => Arc::clone(framebuffer),
            None => return,
        };
        if self.clear_depth.is_none() && self.clear_colors.iter().all(Option::is_none) {
            return;
        }
        let gl = self.gl;
        gl.disable(native::SCISSOR_TEST);
        self.applied_scissor_test = None;
        for index in 0..MAX_COLOR_TARGETS {
            if let Some(color) = self.clear_colors[index].take() {
                self.apply_color_mask(index as u32, ColorWriteMask::ALL);
                gl.clear_buffer_f32_slice(
                    native::COLOR,
                    index as u32,
                    &[color.r, color.g, color.b, color.a],
                );
            }
        }
        if let Some((depth, stencil)) = self.clear_depth.take() {
            gl.depth_mask(true);
            match framebuffer.depth_format() {
                Some(format) if format.has_stencil() => {
                    gl.stencil_mask_separate(native::FRONT_AND_BACK, !0);
                    gl.clear_buffer_depth_stencil(native::DEPTH_STENCIL, 0, depth, stencil as i32);
                }
                Some(_) => gl.clear_buffer_f32_slice(native::DEPTH, 0, &[depth]),
                None => {}
            }
        }
        // masks were forced open
        self.last_render_pipeline = None;
        log::trace!("Applied clears to framebuffer {:?}", framebuffer.raw);
    }

    fn flush_viewports(&mut self, framebuffer_height: u32) {
        if !self.viewports_changed || self.viewports.is_empty() {
            return;
        }
        let gl = self.gl;
        // GL puts the origin at the bottom left
        let flip = |viewport: &Viewport| {
            [
                viewport.x,
                framebuffer_height as f32 - viewport.y - viewport.height,
                viewport.width,
                viewport.height,
            ]
        };
        if self.has_cap(PrivateCapabilities::MULTI_VIEWPORT) && self.viewports.len() > 1 {
            let count = self
                .viewports
                .len()
                .min(self.shared.limits.max_viewports as usize);
            let rects = self.viewports[..count]
                .iter()
                .map(flip)
                .collect::<ArrayVec<_, MAX_VIEWPORTS>>();
            let depths = self.viewports[..count]
                .iter()
                .map(|viewport| [viewport.min_depth as f64, viewport.max_depth as f64])
                .collect::<ArrayVec<_, MAX_VIEWPORTS>>();
            gl.viewport_f32_slice(0, count as i32, &rects);
            gl.depth_range_f64_slice(0, count as i32, &depths);
        } else {
            let viewport = &self.viewports[0];
            let [x, y, width, height] = flip(viewport);
            gl.viewport(x as i32, y as i32, width as i32, height as i32);
            gl.depth_range_f32(viewport.min_depth, viewport.max_depth);
        }
        self.viewports_changed = false;
    }

    fn flush_scissors(&mut self, framebuffer_height: u32, scissor_test_enabled: bool) {
        let gl = self.gl;
        if !scissor_test_enabled {
            if self.applied_scissor_test != Some(false) {
                gl.disable(native::SCISSOR_TEST);
                self.applied_scissor_test = Some(false);
            }
            return;
        }
        if self.applied_scissor_test != Some(true) {
            gl.enable(native::SCISSOR_TEST);
        }
        if (self.scissors_changed || self.applied_scissor_test != Some(true))
            && !self.scissors.is_empty()
        {
            let flip = |rect: &ScissorRect| {
                [
                    rect.x as i32,
                    framebuffer_height as i32 - rect.y as i32 - rect.height as i32,
                    rect.width as i32,
                    rect.height as i32,
                ]
            };
            if self.has_cap(PrivateCapabilities::MULTI_VIEWPORT) && self.scissors.len() > 1 {
                let count = self
                    .scissors
                    .len()
                    .min(self.shared.limits.max_viewports as usize);
                let rects = self.scissors[..count]
                    .iter()
                    .map(flip)
                    .collect::<ArrayVec<_, MAX_VIEWPORTS>>();
                gl.scissor_slice(0, count as i32, &rects);
            } else {
                let [x, y, width, height] = flip(&self.scissors[0]);
                gl.scissor(x, y, width, height);
            }
            self.scissors_changed = false;
        }
        self.applied_scissor_test = Some(true);
    }

    fn apply_color_target(&self, index: u32, desc: &super::ColorTargetDesc) {
        let gl = self.gl;
        self.apply_color_mask(index, desc.write_mask);
        if self.has_cap(PrivateCapabilities::INDEXED_DRAW_BUFFERS) {
            match desc.blend {
                Some(ref blend) => {
                    gl.enable_draw_buffer(native::BLEND, index);
                    gl.blend_equation_separate_draw_buffer(
                        index,
                        blend.color.equation,
                        blend.alpha.equation,
                    );
                    gl.blend_func_separate_draw_buffer(
                        index,
                        blend.color.src,
                        blend.color.dst,
                        blend.alpha.src,
                        blend.alpha.dst,
                    );
                }
                None => gl.disable_draw_buffer(native::BLEND, index),
            }
        } else {
            match desc.blend {
                Some(ref blend) => {
                    gl.enable(native::BLEND);
                    gl.blend_equation_separate(blend.color.equation, blend.alpha.equation);
                    gl.blend_func_separate(
                        blend.color.src,
                        blend.color.dst,
                        blend.alpha.src,
                        blend.alpha.dst,
                    );
                }
                None => gl.disable(native::BLEND),
            }
        }
    }

    fn apply_stencil(&self, stencil: Option<&super::StencilState>) {
        let gl = self.gl;
        match stencil {
            Some(stencil) => {
                gl.enable(native::STENCIL_TEST);
                for &(face, side) in [(native::FRONT, &stencil.front), (native::BACK, &stencil.back)].iter() {
                    gl.stencil_func_separate(face, side.function, side.reference, side.mask);
                    gl.stencil_op_separate(face, side.fail, side.depth_fail, side.pass);
                }
                gl.stencil_mask_separate(native::FRONT_AND_BACK, stencil.write_mask);
            }
            None => gl.disable(native::STENCIL_TEST),
        }
    }

    /// Applies the fixed-function state of `pipeline` that differs from the
    /// state currently in effect.
    fn flush_render_pipeline(&mut self, pipeline: &Arc<super::Pipeline>, new: &RenderPipelineState) {
        if let Some(ref last) = self.last_render_pipeline {
            if Arc::ptr_eq(last, pipeline) {
                return;
            }
        }
        let last = self.last_render_pipeline.take();
        let old = last.as_ref().and_then(|last| last.render_state());
        let gl = self.gl;

        // without indexed draw buffers, GL has one blend state for all targets
        let indexed = self.has_cap(PrivateCapabilities::INDEXED_DRAW_BUFFERS);
        for (index, desc) in new.color_targets.iter().enumerate() {
            if !indexed && index > 0 {
                if *desc != new.color_targets[0] {
                    log::warn!("Color target {} blend state differs from target 0, ignoring it", index);
                }
                continue;
            }
            if old.map_or(true, |old| old.color_targets.get(index) != Some(desc)) {
                self.apply_color_target(index as u32, desc);
            }
        }
        if old.map_or(true, |old| old.blend_color != new.blend_color) {
            let [r, g, b, a] = new.blend_color;
            gl.blend_color(r, g, b, a);
        }
        if old.map_or(true, |old| old.alpha_to_coverage != new.alpha_to_coverage) {
            if new.alpha_to_coverage {
                gl.enable(native::SAMPLE_ALPHA_TO_COVERAGE);
            } else {
                gl.disable(native::SAMPLE_ALPHA_TO_COVERAGE);
            }
        }
        if old.map_or(true, |old| old.depth != new.depth) {
            match new.depth {
                Some(depth) => {
                    gl.enable(native::DEPTH_TEST);
                    gl.depth_func(depth.function);
                    gl.depth_mask(depth.write);
                }
                None => {
                    gl.disable(native::DEPTH_TEST);
                    gl.depth_mask(false);
                }
            }
        }
        if old.map_or(true, |old| old.stencil != new.stencil) {
            self.apply_stencil(new.stencil.as_ref());
        }
        if old.map_or(true, |old| old.front_face != new.front_face) {
            gl.front_face(new.front_face);
        }
        if old.map_or(true, |old| old.cull_face != new.cull_face) {
            match new.cull_face {
                Some(face) => {
                    gl.enable(native::CULL_FACE);
                    gl.cull_face(face);
                }
                None => gl.disable(native::CULL_FACE),
            }
        }
        if let Some(mode) = new.polygon_mode {
            if old.map_or(true, |old| old.polygon_mode != Some(mode)) {
                gl.polygon_mode(native::FRONT_AND_BACK, mode);
            }
        }
        if self.has_cap(PrivateCapabilities::DEPTH_CLAMP)
            && old.map_or(true, |old| old.depth_clamp != new.depth_clamp)
        {
            if new.depth_clamp {
                gl.enable(native::DEPTH_CLAMP);
            } else {
                gl.disable(native::DEPTH_CLAMP);
            }
        }

        self.last_render_pipeline = Some(Arc::clone(pipeline));
    }

    fn activate_resource_set(
        &mut self,
        bound: &BoundSet,
        base: &super::RegisterCounters,
    ) -> Result<(), CommandError> {
        let gl = self.gl;
        let layout = bound.set.layout();
        for ((element, binding), resource) in layout
            .elements
            .iter()
            .zip(layout.bindings.iter())
            .zip(bound.set.resources.iter())
        {
            let unit = base.get(binding.register) + binding.index;
            match *resource {
                BindableResource::Buffer(ref range) => {
                    let raw = range.buffer.native()?;
                    let dynamic_offset = match binding.dynamic_index {
                        Some(index) => bound.dynamic_offsets[index] as BufferAddress,
                        None => 0,
                    };
                    let offset = range.offset + dynamic_offset;
                    // zero binds the rest of the buffer
                    let size = match range.size {
                        0 => range.buffer.size.saturating_sub(offset),
                        size => size,
                    };
                    let (target, cache) = match binding.register {
                        super::Register::UniformBuffer => {
                            (native::UNIFORM_BUFFER, &mut self.uniform_buffers)
                        }
                        _ => (native::SHADER_STORAGE_BUFFER, &mut self.storage_buffers),
                    };
                    if cache.update(unit, (raw, offset, size)) {
                        gl.bind_buffer_range(target, unit, Some(raw), gl_offset(offset)?, gl_offset(size)?);
                    }
                }
                BindableResource::Texture(ref texture) => {
                    let (raw, target) = texture.image()?;
                    if element.kind == ResourceKind::TextureReadWrite {
                        if self.images.update(unit, raw) {
                            let internal = conv::describe_texture_format(texture.format()).internal;
                            gl.bind_image_texture(
                                unit,
                                Some(raw),
                                0,
                                conv::is_layered_target(target),
                                0,
                                native::READ_WRITE,
                                internal,
                            );
                        }
                    } else if self.textures.update(unit, raw) {
                        gl.active_texture(native::TEXTURE0 + unit);
                        gl.bind_texture(target, Some(raw));
                    }
                }
                BindableResource::Sampler(ref sampler) => {
                    let raw = sampler.native()?;
                    if self.samplers.update(unit, raw) {
                        gl.bind_sampler(unit, Some(raw));
                    }
                }
            }
        }
        Ok(())
    }

    fn flush_resource_sets(
        &mut self,
        bind_point: BindPoint,
        pipeline: &super::Pipeline,
    ) -> Result<(), CommandError> {
        for (slot, base) in pipeline.base_indices.iter().enumerate() {
            let sets = match bind_point {
                BindPoint::Graphics => &mut self.graphics_sets,
                BindPoint::Compute => &mut self.compute_sets,
            };
            // taken out while the units are updated, put back below
            let mut bound = match sets[slot].take() {
                Some(bound) => bound,
                None => continue,
            };
            let result = if bound.active {
                Ok(())
            } else {
                self.activate_resource_set(&bound, base)
            };
            bound.active = result.is_ok();
            match bind_point {
                BindPoint::Graphics => self.graphics_sets[slot] = Some(bound),
                BindPoint::Compute => self.compute_sets[slot] = Some(bound),
            }
            result?;
        }
        Ok(())
    }

    fn flush_vertex_buffers(&mut self, state: &RenderPipelineState) -> Result<(), CommandError> {
        let gl = self.gl;
        let mut wanted = 0u64;
        for attribute in state.attributes.iter() {
            wanted |= 1 << attribute.location;
        }
        for location in 0..64 {
            let bit = 1u64 << location;
            if self.enabled_attributes & bit != 0 && wanted & bit == 0 {
                gl.disable_vertex_attrib_array(location);
            }
        }
        self.enabled_attributes &= wanted;

        for (index, desc) in state.vertex_buffers.iter().enumerate() {
            let binding = match self.vertex_buffers[index] {
                Some(ref mut binding) if !binding.active => binding,
                _ => continue,
            };
            binding.active = true;
            gl.bind_buffer(native::ARRAY_BUFFER, Some(binding.buffer));
            for attribute in state
                .attributes
                .iter()
                .filter(|attribute| attribute.buffer_index == index as u32)
            {
                let format = &attribute.format;
                let offset = gl_offset(binding.offset + attribute.offset as BufferAddress)?;
                match format.attrib_kind {
                    conv::VertexAttribKind::Float => gl.vertex_attrib_pointer_f32(
                        attribute.location,
                        format.element_count,
                        format.element_format,
                        format.normalized,
                        desc.stride as i32,
                        offset,
                    ),
                    conv::VertexAttribKind::Integer => gl.vertex_attrib_pointer_i32(
                        attribute.location,
                        format.element_count,
                        format.element_format,
                        desc.stride as i32,
                        offset,
                    ),
                }
                gl.vertex_attrib_divisor(attribute.location, desc.divisor);
                let bit = 1u64 << attribute.location;
                if self.enabled_attributes & bit == 0 {
                    gl.enable_vertex_attrib_array(attribute.location);
                    self.enabled_attributes |= bit;
                }
            }
        }
        Ok(())
    }

    /// Brings the context up to date for a draw and returns its primitive.
    fn pre_draw(&mut self) -> Result<u32, CommandError> {
        let pipeline = self
            .graphics_pipeline
            .clone()
            .ok_or(CommandError::NoPipeline("graphics"))?;
        let state = pipeline
            .render_state()
            .ok_or(CommandError::NoPipeline("graphics"))?;
        let (_, height) = self
            .framebuffer
            .as_ref()
            .ok_or(CommandError::NoFramebuffer)?
            .size();

        self.switch_bind_point(BindPoint::Graphics);
        self.use_program(pipeline.native()?);
        self.flush_viewports(height);
        self.flush_scissors(height, state.scissor_test_enabled);
        self.flush_render_pipeline(&pipeline, state);
        self.flush_resource_sets(BindPoint::Graphics, &pipeline)?;
        self.flush_vertex_buffers(state)?;
        Ok(state.primitive)
    }

    fn flush_index_buffer(&mut self) -> Result<IndexBinding, CommandError> {
        let index = self.index.ok_or(CommandError::NoIndexBuffer)?;
        if self.bound_index_buffer != Some(index.buffer) {
            self.gl
                .bind_buffer(native::ELEMENT_ARRAY_BUFFER, Some(index.buffer));
            self.bound_index_buffer = Some(index.buffer);
        }
        Ok(index)
    }

    fn pre_dispatch(&mut self) -> Result<(), CommandError> {
        let pipeline = self
            .compute_pipeline
            .clone()
            .ok_or(CommandError::NoPipeline("compute"))?;
        self.switch_bind_point(BindPoint::Compute);
        self.use_program(pipeline.native()?);
        self.flush_resource_sets(BindPoint::Compute, &pipeline)
    }

    fn set_framebuffer(&mut self, framebuffer: &Arc<super::Framebuffer>) -> Result<(), CommandError> {
        let raw = framebuffer.native()?;
        self.bind_draw_framebuffer(raw);

        // clears recorded without a framebuffer carry over to this one
        let color_count = framebuffer.color_target_count();
        for clear in self.clear_colors[color_count..].iter_mut() {
            *clear = None;
        }
        if !framebuffer.has_depth_target() {
            self.clear_depth = None;
        }

        let (width, height) = framebuffer.size();
        let count = color_count.max(1);
        let viewport = Viewport {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = ScissorRect {
            x: 0,
            y: 0,
            width,
            height,
        };
        self.viewports = std::iter::repeat(viewport).take(count).collect();
        self.scissors = std::iter::repeat(scissor).take(count).collect();
        self.viewports_changed = true;
        self.scissors_changed = true;
        self.applied_scissor_test = None;
        self.framebuffer = Some(Arc::clone(framebuffer));
        self.apply_clears();
        Ok(())
    }

    /// Restores the draw framebuffer after a copy borrowed the binding.
    fn restore_framebuffers(&mut self) {
        let gl = self.gl;
        gl.bind_framebuffer(native::READ_FRAMEBUFFER, None);
        gl.bind_framebuffer(native::DRAW_FRAMEBUFFER, self.draw_framebuffer);
    }

    fn copy_texture_to_buffer(
        &mut self,
        src: &Subresource,
        format: PixelFormat,
        size: Extent3d,
        dst_offset: BufferAddress,
        row_pitch: u32,
        depth_pitch: u32,
    ) {
        let gl = self.gl;
        let info = format.describe();
        if info.compressed {
            let block = info.block_dimension;
            for z in 0..size.depth {
                for row in 0..format.num_rows(size.height) {
                    let offset = dst_offset
                        + z as BufferAddress * depth_pitch as BufferAddress
                        + row as BufferAddress * row_pitch as BufferAddress;
                    gl.get_compressed_texture_sub_image(
                        src.raw,
                        src.level as i32,
                        src.origin.x as i32,
                        (src.origin.y + row * block) as i32,
                        src.z(z) as i32,
                        size.width as i32,
                        block.min(size.height - row * block) as i32,
                        1,
                        PixelPackData::BufferOffset(offset as u32),
                    );
                }
            }
            return;
        }

        let format_desc = conv::describe_texture_format(format);
        gl.bind_framebuffer(native::READ_FRAMEBUFFER, Some(self.shared.copy_fbo));
        gl.read_buffer(native::COLOR_ATTACHMENT0);
        gl.pixel_store_i32(native::PACK_ROW_LENGTH, (row_pitch / info.block_size) as i32);
        for z in 0..size.depth {
            super::attach_texture(
                gl,
                native::READ_FRAMEBUFFER,
                native::COLOR_ATTACHMENT0,
                src.raw,
                src.target,
                src.level,
                src.z(z),
            );
            let offset = dst_offset + z as BufferAddress * depth_pitch as BufferAddress;
            gl.read_pixels(
                src.origin.x as i32,
                src.origin.y as i32,
                size.width as i32,
                size.height as i32,
                format_desc.external,
                format_desc.data_type,
                PixelPackData::BufferOffset(offset as u32),
            );
        }
        gl.pixel_store_i32(native::PACK_ROW_LENGTH, 0);
        self.restore_framebuffers();
    }

    fn copy_texture_to_texture(&mut self, src: &Subresource, dst: &Subresource, size: Extent3d) {
        let gl = self.gl;
        if self.has_cap(PrivateCapabilities::COPY_IMAGE) {
            gl.copy_image_sub_data(
                src.raw,
                src.target,
                src.level as i32,
                src.origin.x as i32,
                src.origin.y as i32,
                src.z(0) as i32,
                dst.raw,
                dst.target,
                dst.level as i32,
                dst.origin.x as i32,
                dst.origin.y as i32,
                dst.z(0) as i32,
                size.width as i32,
                size.height as i32,
                size.depth as i32,
            );
            return;
        }

        gl.bind_framebuffer(native::READ_FRAMEBUFFER, Some(self.shared.copy_fbo));
        super::attach_texture(
            gl,
            native::READ_FRAMEBUFFER,
            native::COLOR_ATTACHMENT0,
            src.raw,
            src.target,
            src.level,
            src.z(0),
        );
        gl.read_buffer(native::COLOR_ATTACHMENT0);
        gl.bind_texture(dst.target, Some(dst.raw));
        gl.copy_tex_sub_image_2d(
            dst.face_target(),
            dst.level as i32,
            dst.origin.x as i32,
            dst.origin.y as i32,
            src.origin.x as i32,
            src.origin.y as i32,
            size.width as i32,
            size.height as i32,
        );
        self.restore_framebuffers();
        self.invalidate_texture_bindings();
    }

    fn resolve_texture(&mut self, src: &Subresource, dst: &Subresource, width: u32, height: u32) {
        let gl = self.gl;
        gl.disable(native::SCISSOR_TEST);
        self.applied_scissor_test = None;
        gl.bind_framebuffer(native::READ_FRAMEBUFFER, Some(self.shared.copy_fbo));
        super::attach_texture(
            gl,
            native::READ_FRAMEBUFFER,
            native::COLOR_ATTACHMENT0,
            src.raw,
            src.target,
            src.level,
            src.layer,
        );
        gl.read_buffer(native::COLOR_ATTACHMENT0);
        gl.bind_framebuffer(native::DRAW_FRAMEBUFFER, Some(self.shared.draw_fbo));
        super::attach_texture(
            gl,
            native::DRAW_FRAMEBUFFER,
            native::COLOR_ATTACHMENT0,
            dst.raw,
            dst.target,
            dst.level,
            dst.layer,
        );
        gl.blit_framebuffer(
            0,
            0,
            width as i32,
            height as i32,
            0,
            0,
            width as i32,
            height as i32,
            native::COLOR_BUFFER_BIT,
            native::NEAREST,
        );
        self.restore_framebuffers();
    }

    fn process(&mut self, command: &C, data_bytes: &[u8]) -> Result<(), CommandError> {
        let gl = self.gl;
        match *command {
            C::SetFramebuffer(ref framebuffer) => self.set_framebuffer(framebuffer)?,
            C::SetPipeline(ref pipeline) => {
                pipeline.native()?;
                if pipeline.is_compute() {
                    self.compute_pipeline = Some(Arc::clone(pipeline));
                    self.deactivate_sets(BindPoint::Compute);
                } else {
                    self.graphics_pipeline = Some(Arc::clone(pipeline));
                    self.deactivate_sets(BindPoint::Graphics);
                    self.deactivate_vertex_buffers();
                }
            }
            C::SetViewport {
                index,
                ref viewport,
            } => {
                let index = index as usize;
                while self.viewports.len() <= index {
                    self.viewports.push(Viewport::default());
                }
                if self.viewports[index] != *viewport {
                    self.viewports[index] = *viewport;
                    self.viewports_changed = true;
                }
            }
            C::SetScissor { index, ref rect } => {
                let index = index as usize;
                while self.scissors.len() <= index {
                    self.scissors.push(ScissorRect::default());
                }
                if self.scissors[index] != *rect {
                    self.scissors[index] = *rect;
                    self.scissors_changed = true;
                }
            }
            C::SetVertexBuffer {
                index,
                buffer,
                offset,
            } => {
                let entry = &mut self.vertex_buffers[index as usize];
                let unchanged = match *entry {
                    Some(ref binding) => binding.buffer == buffer && binding.offset == offset,
                    None => false,
                };
                if !unchanged {
                    *entry = Some(VertexBufferBinding {
                        buffer,
                        offset,
                        active: false,
                    });
                }
            }
            C::SetIndexBuffer {
                buffer,
                format,
                offset,
            } => {
                self.index = Some(IndexBinding {
                    buffer,
                    format,
                    offset,
                });
            }
            C::SetResourceSet {
                bind_point,
                slot,
                ref set,
                ref dynamic_offsets,
            } => {
                let entry = match bind_point {
                    BindPoint::Graphics => &mut self.graphics_sets[slot as usize],
                    BindPoint::Compute => &mut self.compute_sets[slot as usize],
                };
                let changed = match *entry {
                    Some(ref bound) => {
                        !Arc::ptr_eq(&bound.set, set) || bound.dynamic_offsets != *dynamic_offsets
                    }
                    None => true,
                };
                if changed {
                    *entry = Some(BoundSet {
                        set: Arc::clone(set),
                        dynamic_offsets: dynamic_offsets.clone(),
                        active: false,
                    });
                }
            }
            C::Draw {
                vertex_count,
                instance_count,
                vertex_start,
                instance_start,
            } => {
                let primitive = self.pre_draw()?;
                let (first, count) = (vertex_start as i32, vertex_count as i32);
                if instance_start != 0 {
                    gl.draw_arrays_instanced_base_instance(
                        primitive,
                        first,
                        count,
                        instance_count as i32,
                        instance_start,
                    );
                } else if instance_count != 1 {
                    gl.draw_arrays_instanced(primitive, first, count, instance_count as i32);
                } else {
                    gl.draw_arrays(primitive, first, count);
                }
            }
            C::DrawIndexed {
                index_count,
                instance_count,
                index_start,
                vertex_offset,
                instance_start,
            } => {
                let primitive = self.pre_draw()?;
                let index = self.flush_index_buffer()?;
                let index_type = conv::map_index_type(index.format);
                let offset = gl_offset(index.offset + index_start as BufferAddress * index.format.size())?;
                let count = index_count as i32;
                if instance_start != 0 {
                    gl.draw_elements_instanced_base_vertex_base_instance(
                        primitive,
                        count,
                        index_type,
                        offset,
                        instance_count as i32,
                        vertex_offset,
                        instance_start,
                    );
                } else if vertex_offset != 0 {
                    if instance_count != 1 {
                        gl.draw_elements_instanced_base_vertex(
                            primitive,
                            count,
                            index_type,
                            offset,
                            instance_count as i32,
                            vertex_offset,
                        );
                    } else {
                        gl.draw_elements_base_vertex(primitive, count, index_type, offset, vertex_offset);
                    }
                } else if instance_count != 1 {
                    gl.draw_elements_instanced(
                        primitive,
                        count,
                        index_type,
                        offset,
                        instance_count as i32,
                    );
                } else {
                    gl.draw_elements(primitive, count, index_type, offset);
                }
            }
            C::DrawIndirect {
                buffer,
                offset,
                indexed,
            } => {
                let primitive = self.pre_draw()?;
                gl.bind_buffer(native::DRAW_INDIRECT_BUFFER, Some(buffer));
                if indexed {
                    let index = self.flush_index_buffer()?;
                    gl.draw_elements_indirect_offset(
                        primitive,
                        conv::map_index_type(index.format),
                        gl_offset(offset)?,
                    );
                } else {
                    gl.draw_arrays_indirect_offset(primitive, gl_offset(offset)?);
                }
            }
            C::Dispatch([x, y, z]) => {
                self.pre_dispatch()?;
                gl.dispatch_compute(x, y, z);
                gl.memory_barrier(native::ALL_BARRIER_BITS);
            }
            C::DispatchIndirect { buffer, offset } => {
                self.pre_dispatch()?;
                gl.bind_buffer(native::DISPATCH_INDIRECT_BUFFER, Some(buffer));
                gl.dispatch_compute_indirect(gl_offset(offset)?);
                gl.memory_barrier(native::ALL_BARRIER_BITS);
            }
            C::CopyBufferToBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                gl.bind_buffer(native::COPY_READ_BUFFER, Some(src));
                gl.bind_buffer(native::COPY_WRITE_BUFFER, Some(dst));
                gl.copy_buffer_sub_data(
                    native::COPY_READ_BUFFER,
                    native::COPY_WRITE_BUFFER,
                    gl_offset(src_offset)?,
                    gl_offset(dst_offset)?,
                    gl_offset(size)?,
                );
                gl.bind_buffer(native::COPY_READ_BUFFER, None);
                gl.bind_buffer(native::COPY_WRITE_BUFFER, None);
            }
            C::UpdateBuffer {
                dst,
                offset,
                ref data,
            } => {
                gl.bind_buffer(native::COPY_WRITE_BUFFER, Some(dst));
                gl.buffer_sub_data_u8_slice(
                    native::COPY_WRITE_BUFFER,
                    gl_offset(offset)?,
                    &data_bytes[data.start as usize..data.end as usize],
                );
                gl.bind_buffer(native::COPY_WRITE_BUFFER, None);
            }
            C::CopyBufferToTexture {
                src,
                src_offset,
                row_pitch,
                depth_pitch,
                ref dst,
                format,
                size,
            } => {
                gl.bind_buffer(native::PIXEL_UNPACK_BUFFER, Some(src));
                upload_texture(
                    gl,
                    dst,
                    format,
                    size,
                    TexelSource::Buffer {
                        offset: src_offset,
                        row_pitch,
                        depth_pitch,
                    },
                );
                gl.bind_buffer(native::PIXEL_UNPACK_BUFFER, None);
                self.invalidate_texture_bindings();
            }
            C::CopyTextureToBuffer {
                ref src,
                format,
                size,
                dst,
                dst_offset,
                row_pitch,
                depth_pitch,
            } => {
                gl.bind_buffer(native::PIXEL_PACK_BUFFER, Some(dst));
                self.copy_texture_to_buffer(src, format, size, dst_offset, row_pitch, depth_pitch);
                gl.bind_buffer(native::PIXEL_PACK_BUFFER, None);
            }
            C::CopyTextureToTexture {
                ref src,
                ref dst,
                size,
            } => self.copy_texture_to_texture(src, dst, size),
            C::ResolveTexture {
                ref src,
                ref dst,
                width,
                height,
            } => self.resolve_texture(src, dst, width, height),
            C::GenerateMipmaps { texture, target } => {
                gl.bind_texture(target, Some(texture));
                gl.generate_mipmap(target);
                self.invalidate_texture_bindings();
            }
            C::ClearColor { index, color } => {
                self.clear_colors[index as usize] = Some(color);
                self.apply_clears();
            }
            C::ClearDepthStencil { depth, stencil } => {
                self.clear_depth = Some((depth, stencil));
                self.apply_clears();
            }
            C::PushDebugGroup(ref range) => {
                if self.has_cap(PrivateCapabilities::DEBUG_FNS) {
                    let marker = String::from_utf8_lossy(&data_bytes[range.start as usize..range.end as usize]);
                    gl.push_debug_group(native::DEBUG_SOURCE_APPLICATION, DEBUG_ID, &marker);
                    self.debug_group_depth += 1;
                }
            }
            C::PopDebugGroup => {
                if self.debug_group_depth != 0 {
                    gl.pop_debug_group();
                    self.debug_group_depth -= 1;
                }
            }
            C::InsertDebugMarker(ref range) => {
                if self.has_cap(PrivateCapabilities::DEBUG_FNS) {
                    let marker = String::from_utf8_lossy(&data_bytes[range.start as usize..range.end as usize]);
                    gl.debug_message_insert(
                        native::DEBUG_SOURCE_APPLICATION,
                        native::DEBUG_TYPE_MARKER,
                        DEBUG_ID,
                        native::DEBUG_SEVERITY_NOTIFICATION,
                        &marker,
                    );
                }
            }
        }
        Ok(())
    }
}

/// GL takes buffer offsets and sizes as signed 32-bit values.
fn gl_offset(value: BufferAddress) -> Result<i32, CommandError> {
    i32::try_from(value).map_err(|_| {
        CommandError::InvalidCopy(format!("buffer offset {} is past the GL offset range", value))
    })
}

/// Runs the commands of one submission on the context.
pub(super) fn execute(
    shared: &DeviceShared,
    gl: &dyn native::Context,
    cmd_buffer: &CommandBuffer,
) -> Result<(), CommandError> {
    profiling::scope!("execute GL commands");
    let mut executor = Executor::new(shared, gl);
    executor.reset_state();
    let result = cmd_buffer
        .commands
        .iter()
        .try_for_each(|command| executor.process(command, &cmd_buffer.data_bytes));
    executor.finish();
    if let Err(ref error) = result {
        log::error!("GL submission stopped early: {}", error);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_offsets_past_the_gl_range_are_rejected() {
        assert_eq!(gl_offset(0).unwrap(), 0);
        assert_eq!(gl_offset(i32::MAX as BufferAddress).unwrap(), i32::MAX);
        assert!(matches!(
            gl_offset(i32::MAX as BufferAddress + 1),
            Err(CommandError::InvalidCopy(_))
        ));
        assert!(gl_offset(3 << 30).is_err());
    }
}
