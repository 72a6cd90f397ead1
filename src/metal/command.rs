use std::sync::Arc;

use arrayvec::ArrayVec;
use smallvec::SmallVec;

use super::{
    conv,
    native::{
        self, BindTarget, BlitEncoderId, BufferId, CommandBufferId, ComputeEncoderId,
        NativeObject as _, RawId, RenderEncoderId, Retained, SamplerId, TextureId,
    },
    MultiStageData, MultiStageResourceCounters, Stage, TextureStorage,
};
use crate::{
    cache::{BufferBind, BufferSlotCache, SlotCache},
    format, BindableResource, BufferAddress, BufferUsage, Color, CommandError, Dispose,
    IndexFormat, ScissorRect, TextureType, TextureUsage, Viewport, MAX_COLOR_TARGETS,
    MAX_RESOURCE_SETS, MAX_VERTEX_BUFFERS, MAX_VIEWPORTS,
};

const WORD_SIZE: BufferAddress = crate::COPY_BUFFER_ALIGNMENT;

/// Buffer slots of the byte copy kernel.
const COPY_SRC_SLOT: u32 = 0;
const COPY_DST_SLOT: u32 = 1;
const COPY_INFO_SLOT: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordingState {
    Initial,
    Recording,
    Ended,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BindPoint {
    Graphics,
    Compute,
}

#[derive(Debug)]
struct BoundSet {
    set: Arc<super::ResourceSet>,
    dynamic_offsets: SmallVec<[u32; 4]>,
    /// Whether the native tables reflect this set for the current encoder.
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
    offset: BufferAddress,
    format: IndexFormat,
}

#[derive(Debug, Default)]
struct StageCache {
    buffers: BufferSlotCache<BufferId>,
    textures: SlotCache<TextureId>,
    samplers: SlotCache<SamplerId>,
}

impl StageCache {
    fn clear(&mut self) {
        self.buffers.clear();
        self.textures.clear();
        self.samplers.clear();
    }
}

#[derive(Debug, Default)]
struct CommandState {
    render: Option<Retained<RenderEncoderId>>,
    blit: Option<Retained<BlitEncoderId>>,
    compute: Option<Retained<ComputeEncoderId>>,

    framebuffer: Option<Arc<super::Framebuffer>>,
    /// Whether a render pass was started since the framebuffer was bound.
    ever_active: bool,
    clear_colors: [Option<Color>; MAX_COLOR_TARGETS],
    clear_depth: Option<(f32, u8)>,

    viewports: ArrayVec<Viewport, MAX_VIEWPORTS>,
    viewports_changed: bool,
    scissors: ArrayVec<ScissorRect, MAX_VIEWPORTS>,
    scissors_changed: bool,
    /// `Some(true)` once the user scissors are applied in the open render
    /// pass, `Some(false)` once the full framebuffer rect is.
    applied_scissor_test: Option<bool>,

    graphics_pipeline: Option<Arc<super::Pipeline>>,
    last_graphics_pipeline: Option<Arc<super::Pipeline>>,
    compute_pipeline: Option<Arc<super::Pipeline>>,
    last_compute_pipeline: Option<Arc<super::Pipeline>>,

    graphics_sets: [Option<BoundSet>; MAX_RESOURCE_SETS],
    compute_sets: [Option<BoundSet>; MAX_RESOURCE_SETS],
    vertex_buffers: [Option<VertexBufferBinding>; MAX_VERTEX_BUFFERS],
    index: Option<IndexBinding>,

    caches: MultiStageData<StageCache>,
    debug_group_depth: u32,
}

impl CommandState {
    fn sets_mut(&mut self, bind_point: BindPoint) -> &mut [Option<BoundSet>; MAX_RESOURCE_SETS] {
        match bind_point {
            BindPoint::Graphics => &mut self.graphics_sets,
            BindPoint::Compute => &mut self.compute_sets,
        }
    }

    fn deactivate_sets(&mut self, bind_point: BindPoint) {
        for bound in self.sets_mut(bind_point).iter_mut().flatten() {
            bound.active = false;
        }
    }

    fn deactivate_vertex_buffers(&mut self) {
        for binding in self.vertex_buffers.iter_mut().flatten() {
            binding.active = false;
        }
    }

    fn has_pending_clears(&self) -> bool {
        self.clear_depth.is_some() || self.clear_colors.iter().any(Option::is_some)
    }
}

/// Records commands into one native command buffer at a time.
///
/// Render, compute and blit encoders are opened lazily and at most one is
/// open at any time. Clears are deferred into the load actions of the next
/// render pass over the bound framebuffer.
#[derive(Debug)]
pub struct CommandList {
    shared: Arc<super::DeviceShared>,
    raw_cmd_buf: Option<Retained<CommandBufferId>>,
    recording: RecordingState,
    state: CommandState,
}

fn bind_buffer(
    raw: &dyn native::Device,
    cache: &mut BufferSlotCache<BufferId>,
    target: BindTarget,
    index: u32,
    buffer: BufferId,
    offset: BufferAddress,
) {
    match cache.update(index, buffer, offset) {
        BufferBind::Full => raw.set_buffer(target, index as u64, buffer, offset),
        BufferBind::OffsetOnly => raw.set_buffer_offset(target, index as u64, offset),
        BufferBind::Unchanged => {}
    }
}

/// Pushes the resources of `bound` into the native tables of every stage in
/// `targets`, skipping slots that already hold the same object.
fn activate_resource_set(
    raw: &dyn native::Device,
    caches: &mut MultiStageData<StageCache>,
    targets: &[(Stage, BindTarget)],
    base: &MultiStageResourceCounters,
    bound: &BoundSet,
) -> Result<(), CommandError> {
    let layout = bound.set.layout();
    for (binding, resource) in layout.bindings.iter().zip(bound.set.resources.iter()) {
        for &(stage, target) in targets {
            let slot = match binding.slots[stage] {
                Some(slot) => slot,
                None => continue,
            };
            let base = &base[stage];
            let cache = &mut caches[stage];
            match *resource {
                BindableResource::Buffer(ref range) => {
                    let dynamic_offset = match binding.dynamic_index {
                        Some(index) => bound.dynamic_offsets[index] as BufferAddress,
                        None => 0,
                    };
                    bind_buffer(
                        raw,
                        &mut cache.buffers,
                        target,
                        base.buffers + slot,
                        range.buffer.native()?,
                        range.offset + dynamic_offset,
                    );
                }
                BindableResource::Texture(ref texture) => {
                    let index = base.textures + slot;
                    let id = texture.image()?;
                    if cache.textures.update(index, id) {
                        raw.set_texture(target, index as u64, id);
                    }
                }
                BindableResource::Sampler(ref sampler) => {
                    let index = base.samplers + slot;
                    let id = sampler.native()?;
                    if cache.samplers.update(index, id) {
                        raw.set_sampler_state(target, index as u64, id);
                    }
                }
            }
        }
    }
    Ok(())
}

fn check_buffer_range(
    what: &str,
    buffer: &super::Buffer,
    offset: BufferAddress,
    size: BufferAddress,
) -> Result<(), CommandError> {
    match offset.checked_add(size) {
        Some(end) if end <= buffer.size => Ok(()),
        _ => Err(CommandError::InvalidCopy(format!(
            "{} range {}+{} is out of bounds of a {} byte buffer",
            what, offset, size, buffer.size
        ))),
    }
}

impl CommandList {
    pub(super) fn new(shared: Arc<super::DeviceShared>) -> Self {
        Self {
            shared,
            raw_cmd_buf: None,
            recording: RecordingState::Initial,
            state: CommandState::default(),
        }
    }

    fn command_buffer(&self) -> Result<CommandBufferId, CommandError> {
        match (self.recording, self.raw_cmd_buf.as_ref()) {
            (RecordingState::Recording, Some(cmd_buf)) => Ok(cmd_buf.id()),
            _ => Err(CommandError::NotRecording),
        }
    }

    fn end_encoder<T: native::NativeObject>(&self, encoder: Retained<T>) {
        self.shared.raw.end_encoding(encoder.id().raw());
        encoder.release();
    }

    fn enter_blit(&mut self) -> Result<BlitEncoderId, CommandError> {
        if let Some(ref blit) = self.state.blit {
            return Ok(blit.id());
        }
        let cmd_buf = self.command_buffer()?;
        self.ensure_no_render_pass();
        self.ensure_no_compute();
        let raw = self.shared.raw.new_blit_command_encoder(cmd_buf);
        self.state.blit = Some(Retained::new(&self.shared.raw, raw));
        Ok(raw)
    }

    fn ensure_no_blit(&mut self) {
        if let Some(encoder) = self.state.blit.take() {
            self.end_encoder(encoder);
        }
    }

    fn enter_compute(&mut self) -> Result<ComputeEncoderId, CommandError> {
        if let Some(ref compute) = self.state.compute {
            return Ok(compute.id());
        }
        let cmd_buf = self.command_buffer()?;
        self.ensure_no_render_pass();
        self.ensure_no_blit();
        let raw = self.shared.raw.new_compute_command_encoder(cmd_buf);
        self.state.compute = Some(Retained::new(&self.shared.raw, raw));
        Ok(raw)
    }

    fn ensure_no_compute(&mut self) {
        if let Some(encoder) = self.state.compute.take() {
            self.end_encoder(encoder);
            self.state.caches.cs.clear();
            self.state.last_compute_pipeline = None;
            self.state.deactivate_sets(BindPoint::Compute);
        }
    }

    /// Opens a render pass over the bound framebuffer, consuming the pending
    /// clears. Returns false if the framebuffer has nothing to render into.
    fn begin_current_render_pass(&mut self) -> Result<bool, CommandError> {
        let cmd_buf = self.command_buffer()?;
        let framebuffer = match self.state.framebuffer {
            Some(ref framebuffer) => Arc::clone(framebuffer),
            None => return Err(CommandError::NoFramebuffer),
        };
        let attachments = match framebuffer.resolve()? {
            Some(attachments) => attachments,
            None => return Ok(false),
        };
        self.ensure_no_blit();
        self.ensure_no_compute();

        let mut desc = native::RenderPassDescriptor::default();
        for (index, &(texture, level, slice)) in attachments.colors.iter().enumerate() {
            let clear = self.state.clear_colors[index].take();
            desc.color_attachments.push(native::ColorAttachmentDescriptor {
                texture,
                level: level as u64,
                slice: slice as u64,
                load_action: match clear {
                    Some(_) => native::MTLLoadAction::Clear,
                    None => native::MTLLoadAction::Load,
                },
                store_action: native::MTLStoreAction::Store,
                clear_color: clear
                    .map(|color| conv::map_clear_color(&color))
                    .unwrap_or_default(),
                resolve_texture: None,
            });
        }
        if let Some(ref depth) = attachments.depth {
            let clear = self.state.clear_depth.take();
            let load_action = match clear {
                Some(_) => native::MTLLoadAction::Clear,
                None if depth.memoryless => native::MTLLoadAction::DontCare,
                None => native::MTLLoadAction::Load,
            };
            let store_action = if depth.memoryless {
                native::MTLStoreAction::DontCare
            } else {
                native::MTLStoreAction::Store
            };
            desc.depth_attachment = Some(native::DepthAttachmentDescriptor {
                texture: depth.texture,
                level: depth.mip_level as u64,
                slice: depth.array_layer as u64,
                load_action,
                store_action,
                clear_depth: clear.map_or(1.0, |(value, _)| value as f64),
            });
            if depth.has_stencil {
                desc.stencil_attachment = Some(native::StencilAttachmentDescriptor {
                    texture: depth.texture,
                    level: depth.mip_level as u64,
                    slice: depth.array_layer as u64,
                    load_action,
                    store_action,
                    clear_stencil: clear.map_or(0, |(_, value)| value as u32),
                });
            }
        }

        let raw = self.shared.raw.new_render_command_encoder(cmd_buf, &desc);
        if self.shared.options.debug {
            self.shared.raw.set_label(raw.raw(), "render pass");
        }
        self.state.render = Some(Retained::new(&self.shared.raw, raw));
        self.state.ever_active = true;
        log::trace!(
            "Began a render pass with {} color attachments",
            desc.color_attachments.len()
        );
        Ok(true)
    }

    fn end_current_render_pass(&mut self) {
        if let Some(encoder) = self.state.render.take() {
            self.end_encoder(encoder);
            let state = &mut self.state;
            state.last_graphics_pipeline = None;
            state.caches.vs.clear();
            state.caches.fs.clear();
            state.deactivate_sets(BindPoint::Graphics);
            state.deactivate_vertex_buffers();
            state.viewports_changed = true;
            state.scissors_changed = true;
            state.applied_scissor_test = None;
        }
    }

    fn ensure_no_render_pass(&mut self) {
        self.end_current_render_pass();
    }

    fn ensure_render_pass(&mut self) -> Result<bool, CommandError> {
        self.ensure_no_blit();
        self.ensure_no_compute();
        if self.state.render.is_some() {
            Ok(true)
        } else {
            self.begin_current_render_pass()
        }
    }

    /// Runs an empty render pass over the bound framebuffer if it was never
    /// rendered to or has clears that haven't been applied yet.
    fn flush_framebuffer(&mut self) -> Result<(), CommandError> {
        let needs_pass = self.state.render.is_none()
            && self.state.framebuffer.is_some()
            && (!self.state.ever_active || self.state.has_pending_clears());
        if needs_pass && self.begin_current_render_pass()? {
            self.end_current_render_pass();
        }
        Ok(())
    }

    fn discard(&mut self) {
        self.ensure_no_render_pass();
        self.ensure_no_blit();
        self.ensure_no_compute();
        if let Some(cmd_buf) = self.raw_cmd_buf.take() {
            // staging memory tied to this command buffer is free again
            self.shared.tracker.abandon(cmd_buf.id());
            cmd_buf.release();
        }
    }

    /// Hands the ended native command buffer over for submission.
    pub(super) fn take_for_submit(&mut self) -> Result<Retained<CommandBufferId>, CommandError> {
        if self.recording != RecordingState::Ended {
            return Err(CommandError::NotEnded);
        }
        let cmd_buf = self.raw_cmd_buf.take().ok_or(CommandError::NotEnded)?;
        self.recording = RecordingState::Initial;
        Ok(cmd_buf)
    }

    fn flush_viewports(&mut self, encoder: RenderEncoderId) {
        if !self.state.viewports_changed || self.state.viewports.is_empty() {
            return;
        }
        if self.shared.private_caps.multi_viewport && self.state.viewports.len() > 1 {
            let viewports = self
                .state
                .viewports
                .iter()
                .map(conv::map_viewport)
                .collect::<ArrayVec<_, MAX_VIEWPORTS>>();
            self.shared.raw.set_viewports(encoder, &viewports);
        } else {
            self.shared
                .raw
                .set_viewport(encoder, conv::map_viewport(&self.state.viewports[0]));
        }
        self.state.viewports_changed = false;
    }

    fn apply_scissors(&self, encoder: RenderEncoderId, rects: &[ScissorRect]) {
        if rects.is_empty() {
            return;
        }
        if self.shared.private_caps.multi_viewport && rects.len() > 1 {
            let rects = rects
                .iter()
                .map(conv::map_scissor)
                .collect::<ArrayVec<_, MAX_VIEWPORTS>>();
            self.shared.raw.set_scissor_rects(encoder, &rects);
        } else {
            self.shared
                .raw
                .set_scissor_rect(encoder, conv::map_scissor(&rects[0]));
        }
    }

    fn flush_scissors(&mut self, encoder: RenderEncoderId, scissor_test_enabled: bool) {
        if scissor_test_enabled {
            if self.state.scissors_changed || self.state.applied_scissor_test != Some(true) {
                self.apply_scissors(encoder, &self.state.scissors);
                self.state.scissors_changed = false;
            }
        } else if self.state.applied_scissor_test != Some(false) {
            let (width, height) = match self.state.framebuffer {
                Some(ref framebuffer) => framebuffer.size(),
                None => return,
            };
            let full = ScissorRect {
                x: 0,
                y: 0,
                width,
                height,
            };
            let rects = vec![full; self.state.scissors.len().max(1)];
            self.apply_scissors(encoder, &rects);
        }
        self.state.applied_scissor_test = Some(scissor_test_enabled);
    }

    /// Applies the fixed-function state of `pipeline` that differs from the
    /// last pipeline used in this render pass.
    fn flush_render_pipeline(
        &mut self,
        encoder: RenderEncoderId,
        pipeline: &Arc<super::Pipeline>,
    ) -> Result<(), CommandError> {
        if let Some(ref last) = self.state.last_graphics_pipeline {
            if Arc::ptr_eq(last, pipeline) {
                return Ok(());
            }
        }
        let new = pipeline
            .render_state()
            .ok_or(CommandError::NoPipeline("graphics"))?;
        let has_depth_target = self
            .state
            .framebuffer
            .as_ref()
            .map_or(false, |framebuffer| framebuffer.has_depth_target());
        let old = self
            .state
            .last_graphics_pipeline
            .as_ref()
            .and_then(|last| last.render_state());
        let raw = &self.shared.raw;

        if old.map_or(true, |old| old.raw != new.raw) {
            raw.set_render_pipeline_state(encoder, new.raw);
        }
        if old.map_or(true, |old| old.cull_mode != new.cull_mode) {
            raw.set_cull_mode(encoder, new.cull_mode);
        }
        if old.map_or(true, |old| old.winding != new.winding) {
            raw.set_front_facing_winding(encoder, new.winding);
        }
        if old.map_or(true, |old| old.fill_mode != new.fill_mode) {
            raw.set_triangle_fill_mode(encoder, new.fill_mode);
        }
        if old.map_or(true, |old| old.blend_color != new.blend_color) {
            raw.set_blend_color(encoder, new.blend_color);
        }
        if has_depth_target {
            if old.map_or(true, |old| old.depth_stencil != new.depth_stencil) {
                raw.set_depth_stencil_state(encoder, new.depth_stencil);
            }
            if let Some(mode) = new.depth_clip_mode {
                if old.map_or(true, |old| old.depth_clip_mode != Some(mode)) {
                    raw.set_depth_clip_mode(encoder, mode);
                }
            }
            if old.map_or(true, |old| old.stencil_reference != new.stencil_reference) {
                raw.set_stencil_reference_value(encoder, new.stencil_reference);
            }
        }

        self.state.last_graphics_pipeline = Some(Arc::clone(pipeline));
        Ok(())
    }

    fn flush_resource_sets(
        &mut self,
        bind_point: BindPoint,
        pipeline: &super::Pipeline,
        targets: &[(Stage, BindTarget)],
    ) -> Result<(), CommandError> {
        let raw = &*self.shared.raw;
        let state = &mut self.state;
        let sets = match bind_point {
            BindPoint::Graphics => &mut state.graphics_sets,
            BindPoint::Compute => &mut state.compute_sets,
        };
        for (entry, base) in sets.iter_mut().zip(pipeline.base_indices.iter()) {
            if let Some(ref mut bound) = *entry {
                if !bound.active {
                    activate_resource_set(raw, &mut state.caches, targets, base, bound)?;
                    bound.active = true;
                }
            }
        }
        Ok(())
    }

    fn flush_vertex_buffers(&mut self, encoder: RenderEncoderId, count: u32) {
        let raw = &*self.shared.raw;
        let state = &mut self.state;
        for (index, entry) in state
            .vertex_buffers
            .iter_mut()
            .enumerate()
            .take(count as usize)
        {
            if let Some(ref mut binding) = *entry {
                if !binding.active {
                    bind_buffer(
                        raw,
                        &mut state.caches.vs.buffers,
                        BindTarget::Vertex(encoder),
                        index as u32,
                        binding.buffer,
                        binding.offset,
                    );
                    binding.active = true;
                }
            }
        }
    }

    fn check_sets_bound(&self, bind_point: BindPoint, pipeline: &super::Pipeline) -> Result<(), CommandError> {
        let sets = match bind_point {
            BindPoint::Graphics => &self.state.graphics_sets,
            BindPoint::Compute => &self.state.compute_sets,
        };
        // sets outlive pipeline changes
        for (slot, (bound, expected)) in sets
            .iter()
            .zip(pipeline.resource_layouts())
            .enumerate()
        {
            let layout = match *bound {
                Some(ref bound) => bound.set.layout(),
                None => return Err(CommandError::MissingResourceSet(slot as u32)),
            };
            if !Arc::ptr_eq(layout, expected)
                && !crate::layouts_compatible(expected.elements(), layout.elements())
            {
                return Err(CommandError::IncompatibleResourceSet(slot as u32));
            }
        }
        Ok(())
    }

    /// Brings the render encoder up to date for a draw. Returns `None` if
    /// the draw has to be skipped because nothing can be rendered into.
    fn pre_draw(
        &mut self,
    ) -> Result<Option<(RenderEncoderId, native::MTLPrimitiveType)>, CommandError> {
        self.command_buffer()?;
        let pipeline = self
            .state
            .graphics_pipeline
            .clone()
            .ok_or(CommandError::NoPipeline("graphics"))?;
        let render_state = pipeline
            .render_state()
            .ok_or(CommandError::NoPipeline("graphics"))?;
        if self.state.framebuffer.is_none() {
            return Err(CommandError::NoFramebuffer);
        }
        self.check_sets_bound(BindPoint::Graphics, &pipeline)?;

        if !self.ensure_render_pass()? {
            log::warn!("Skipping a draw, the framebuffer has no image to render into");
            return Ok(None);
        }
        let encoder = match self.state.render {
            Some(ref render) => render.id(),
            None => return Ok(None),
        };

        self.flush_viewports(encoder);
        self.flush_scissors(encoder, render_state.scissor_test_enabled);
        self.flush_render_pipeline(encoder, &pipeline)?;
        self.flush_resource_sets(
            BindPoint::Graphics,
            &pipeline,
            &[
                (Stage::Vertex, BindTarget::Vertex(encoder)),
                (Stage::Fragment, BindTarget::Fragment(encoder)),
            ],
        )?;
        self.flush_vertex_buffers(encoder, pipeline.vertex_buffer_count);
        Ok(Some((encoder, render_state.primitive_type)))
    }

    fn pre_dispatch(&mut self) -> Result<(ComputeEncoderId, native::MTLSize), CommandError> {
        self.command_buffer()?;
        let pipeline = self
            .state
            .compute_pipeline
            .clone()
            .ok_or(CommandError::NoPipeline("compute"))?;
        let compute_state = pipeline
            .compute_state()
            .ok_or(CommandError::NoPipeline("compute"))?;
        self.check_sets_bound(BindPoint::Compute, &pipeline)?;

        let encoder = self.enter_compute()?;
        let unchanged = self
            .state
            .last_compute_pipeline
            .as_ref()
            .map_or(false, |last| Arc::ptr_eq(last, &pipeline));
        if !unchanged {
            self.shared
                .raw
                .set_compute_pipeline_state(encoder, compute_state.raw);
            self.state.last_compute_pipeline = Some(Arc::clone(&pipeline));
        }
        self.flush_resource_sets(
            BindPoint::Compute,
            &pipeline,
            &[(Stage::Compute, BindTarget::Compute(encoder))],
        )?;
        Ok((encoder, compute_state.threads_per_group))
    }

    fn check_base_vertex_instance(&self, what: &'static str) -> Result<(), CommandError> {
        if self.shared.private_caps.base_vertex_instance {
            Ok(())
        } else {
            Err(CommandError::Unsupported(what))
        }
    }

    /// Copies between buffers with the blit encoder when everything is word
    /// aligned, and with the byte copy kernel otherwise.
    fn copy_buffer_region(
        &mut self,
        src: BufferId,
        src_offset: BufferAddress,
        dst: BufferId,
        dst_offset: BufferAddress,
        size: BufferAddress,
    ) -> Result<(), CommandError> {
        if src_offset % WORD_SIZE == 0 && dst_offset % WORD_SIZE == 0 && size % WORD_SIZE == 0 {
            let encoder = self.enter_blit()?;
            self.shared
                .raw
                .copy_from_buffer(encoder, src, src_offset, dst, dst_offset, size);
            Ok(())
        } else {
            self.copy_buffer_unaligned(src, src_offset, dst, dst_offset, size)
        }
    }

    // TODO: the kernel runs on a single thread; split large copies over a
    // thread grid once callers start doing big unaligned uploads.
    fn copy_buffer_unaligned(
        &mut self,
        src: BufferId,
        src_offset: BufferAddress,
        dst: BufferId,
        dst_offset: BufferAddress,
        size: BufferAddress,
    ) -> Result<(), CommandError> {
        let narrow = |value: BufferAddress| {
            if value > u32::MAX as BufferAddress {
                Err(CommandError::InvalidCopy(format!(
                    "unaligned copies are limited to 32-bit offsets, got {}",
                    value
                )))
            } else {
                Ok(value as u32)
            }
        };
        let info = [narrow(src_offset)?, narrow(dst_offset)?, narrow(size)?];

        let encoder = self.enter_compute()?;
        let raw = &*self.shared.raw;
        raw.set_compute_pipeline_state(encoder, self.shared.unaligned_copy_pipeline.id());
        let target = BindTarget::Compute(encoder);
        let cache = &mut self.state.caches.cs.buffers;
        bind_buffer(raw, cache, target, COPY_SRC_SLOT, src, 0);
        bind_buffer(raw, cache, target, COPY_DST_SLOT, dst, 0);
        let mut bytes = ArrayVec::<u8, 12>::new();
        for word in info.iter() {
            bytes.extend(word.to_ne_bytes().iter().copied());
        }
        raw.set_bytes(target, COPY_INFO_SLOT as u64, &bytes);
        cache.invalidate(COPY_INFO_SLOT);
        raw.dispatch_thread_groups(
            encoder,
            native::MTLSize::new(1, 1, 1),
            native::MTLSize::new(1, 1, 1),
        );

        // the user pipeline and its sets have to be restored before the next dispatch
        self.state.last_compute_pipeline = None;
        self.state.deactivate_sets(BindPoint::Compute);
        Ok(())
    }

    /// Uploads tightly packed texel data into an image through a staging buffer.
    pub(super) fn upload_texture(
        &mut self,
        texture: &super::Texture,
        region: &crate::TextureRegion,
        (width, height): (u32, u32),
        data: &[u8],
    ) -> Result<(), CommandError> {
        let cmd_buf = self.command_buffer()?;
        let dst = texture.image()?;
        let format = texture.format();
        let size = format::packed_size(format, width, height, region.size.depth);
        let bytes_per_row = format.row_pitch(width) as u64;
        let bytes_per_image = match texture.desc.texture_type {
            TextureType::D3 => format.depth_pitch(width, height) as u64,
            _ => 0,
        };

        let staging = self.shared.acquire_staging(size)?;
        self.shared
            .raw
            .write_buffer(staging.raw.raw, 0, &data[..size as usize]);
        let encoder = self.enter_blit()?;
        self.shared.raw.copy_from_buffer_to_texture(
            encoder,
            staging.raw.raw,
            0,
            bytes_per_row,
            bytes_per_image,
            conv::map_size(width, height, region.size.depth),
            dst,
            region.array_layer as u64,
            region.mip_level as u64,
            conv::map_origin(&region.origin),
        );
        self.shared.tracker.attach_staging(cmd_buf, staging);
        Ok(())
    }

    fn copy_texture_layer(
        &mut self,
        src: &super::Texture,
        dst: &super::Texture,
        copy: &crate::TextureCopy,
        layer: u32,
    ) -> Result<(), CommandError> {
        let format = src.format();
        let src_layer = copy.src_base_array_layer + layer;
        let dst_layer = copy.dst_base_array_layer + layer;
        let depth = copy.size.depth;

        match (src.storage()?, dst.storage()?) {
            (TextureStorage::Staging(src_buffer), TextureStorage::Image(dst_texture)) => {
                let layout = format::subresource_layout(&src.desc, copy.src_mip_level, src_layer);
                let (mip_width, mip_height, _) =
                    format::mip_dimensions(&dst.desc, copy.dst_mip_level);
                let (width, height) =
                    format::copy_extent(format, mip_width, mip_height, copy.size.width, copy.size.height);
                let src_offset = layout.offset
                    + format.texel_offset(
                        layout.row_pitch,
                        layout.depth_pitch,
                        copy.src_origin.x,
                        copy.src_origin.y,
                        copy.src_origin.z,
                    );
                let bytes_per_image = match dst.desc.texture_type {
                    TextureType::D3 => layout.depth_pitch as u64,
                    _ => 0,
                };
                let encoder = self.enter_blit()?;
                self.shared.raw.copy_from_buffer_to_texture(
                    encoder,
                    src_buffer,
                    src_offset,
                    layout.row_pitch as u64,
                    bytes_per_image,
                    conv::map_size(width, height, depth),
                    dst_texture,
                    dst_layer as u64,
                    copy.dst_mip_level as u64,
                    conv::map_origin(&copy.dst_origin),
                );
            }
            (TextureStorage::Image(src_texture), TextureStorage::Staging(dst_buffer)) => {
                let layout = format::subresource_layout(&dst.desc, copy.dst_mip_level, dst_layer);
                let (mip_width, mip_height, _) =
                    format::mip_dimensions(&src.desc, copy.src_mip_level);
                let (width, height) =
                    format::copy_extent(format, mip_width, mip_height, copy.size.width, copy.size.height);
                let dst_offset = layout.offset
                    + format.texel_offset(
                        layout.row_pitch,
                        layout.depth_pitch,
                        copy.dst_origin.x,
                        copy.dst_origin.y,
                        copy.dst_origin.z,
                    );
                let bytes_per_image = match src.desc.texture_type {
                    TextureType::D3 => layout.depth_pitch as u64,
                    _ => 0,
                };
                let encoder = self.enter_blit()?;
                self.shared.raw.copy_from_texture_to_buffer(
                    encoder,
                    src_texture,
                    src_layer as u64,
                    copy.src_mip_level as u64,
                    conv::map_origin(&copy.src_origin),
                    conv::map_size(width, height, depth),
                    dst_buffer,
                    dst_offset,
                    layout.row_pitch as u64,
                    bytes_per_image,
                );
            }
            (TextureStorage::Staging(src_buffer), TextureStorage::Staging(dst_buffer)) => {
                let src_layout =
                    format::subresource_layout(&src.desc, copy.src_mip_level, src_layer);
                let dst_layout =
                    format::subresource_layout(&dst.desc, copy.dst_mip_level, dst_layer);
                let (mip_width, mip_height, _) =
                    format::mip_dimensions(&src.desc, copy.src_mip_level);
                let (width, height) =
                    format::copy_extent(format, mip_width, mip_height, copy.size.width, copy.size.height);
                let block = format.describe().block_dimension;
                let row_size = format.row_pitch(width) as BufferAddress;
                for z in 0..depth {
                    for row in 0..format.num_rows(height) {
                        let src_offset = src_layout.offset
                            + format.texel_offset(
                                src_layout.row_pitch,
                                src_layout.depth_pitch,
                                copy.src_origin.x,
                                copy.src_origin.y + row * block,
                                copy.src_origin.z + z,
                            );
                        let dst_offset = dst_layout.offset
                            + format.texel_offset(
                                dst_layout.row_pitch,
                                dst_layout.depth_pitch,
                                copy.dst_origin.x,
                                copy.dst_origin.y + row * block,
                                copy.dst_origin.z + z,
                            );
                        self.copy_buffer_region(
                            src_buffer, src_offset, dst_buffer, dst_offset, row_size,
                        )?;
                    }
                }
            }
            (TextureStorage::Image(src_texture), TextureStorage::Image(dst_texture)) => {
                let (mip_width, mip_height, _) =
                    format::mip_dimensions(&src.desc, copy.src_mip_level);
                let (width, height) =
                    format::copy_extent(format, mip_width, mip_height, copy.size.width, copy.size.height);
                let encoder = self.enter_blit()?;
                self.shared.raw.copy_from_texture(
                    encoder,
                    src_texture,
                    src_layer as u64,
                    copy.src_mip_level as u64,
                    conv::map_origin(&copy.src_origin),
                    conv::map_size(width, height, depth),
                    dst_texture,
                    dst_layer as u64,
                    copy.dst_mip_level as u64,
                    conv::map_origin(&copy.dst_origin),
                );
            }
        }
        Ok(())
    }

    fn debug_target(&self) -> Result<RawId, CommandError> {
        let cmd_buf = self.command_buffer()?;
        Ok(if let Some(ref render) = self.state.render {
            render.id().raw()
        } else if let Some(ref compute) = self.state.compute {
            compute.id().raw()
        } else if let Some(ref blit) = self.state.blit {
            blit.id().raw()
        } else {
            cmd_buf.raw()
        })
    }

    fn set_resource_set(
        &mut self,
        bind_point: BindPoint,
        slot: u32,
        set: &Arc<super::ResourceSet>,
        dynamic_offsets: &[u32],
    ) -> Result<(), CommandError> {
        self.command_buffer()?;
        let pipeline = match bind_point {
            BindPoint::Graphics => self.state.graphics_pipeline.as_ref(),
            BindPoint::Compute => self.state.compute_pipeline.as_ref(),
        };
        let pipeline = pipeline.ok_or(CommandError::NoPipeline(match bind_point {
            BindPoint::Graphics => "graphics",
            BindPoint::Compute => "compute",
        }))?;
        let expected = pipeline
            .resource_layouts()
            .get(slot as usize)
            .ok_or(CommandError::SlotOutOfRange {
                what: "resource set",
                slot,
            })?;
        if set.is_disposed() {
            return Err(CommandError::Disposed("resource set"));
        }
        if !crate::layouts_compatible(expected.elements(), set.layout().elements()) {
            return Err(CommandError::IncompatibleResourceSet(slot));
        }
        if dynamic_offsets.len() != set.layout().dynamic_count() {
            return Err(CommandError::DynamicOffsetCount {
                expected: set.layout().dynamic_count(),
                actual: dynamic_offsets.len(),
            });
        }

        let entry = &mut self.state.sets_mut(bind_point)[slot as usize];
        let changed = match *entry {
            Some(ref bound) => {
                !Arc::ptr_eq(&bound.set, set) || bound.dynamic_offsets[..] != *dynamic_offsets
            }
            None => true,
        };
        if changed {
            *entry = Some(BoundSet {
                set: Arc::clone(set),
                dynamic_offsets: SmallVec::from_slice(dynamic_offsets),
                active: false,
            });
        }
        Ok(())
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        self.discard();
    }
}

impl crate::CommandList<super::Api> for CommandList {
    fn begin(&mut self) -> Result<(), CommandError> {
        profiling::scope!("CommandList::begin");
        self.discard();
        let raw = self
            .shared
            .raw
            .new_command_buffer(self.shared.options.retain_command_buffer_references);
        if self.shared.options.debug {
            self.shared.raw.set_label(raw.raw(), "command list");
        }
        self.raw_cmd_buf = Some(Retained::new(&self.shared.raw, raw));
        self.state = CommandState::default();
        self.recording = RecordingState::Recording;
        Ok(())
    }

    fn end(&mut self) -> Result<(), CommandError> {
        self.command_buffer()?;
        self.ensure_no_blit();
        self.ensure_no_compute();
        self.flush_framebuffer()?;
        self.ensure_no_render_pass();
        if self.state.debug_group_depth != 0 {
            log::warn!(
                "Command list ended with {} debug groups still open",
                self.state.debug_group_depth
            );
        }
        self.recording = RecordingState::Ended;
        Ok(())
    }

    fn set_pipeline(&mut self, pipeline: &Arc<super::Pipeline>) -> Result<(), CommandError> {
        self.command_buffer()?;
        if pipeline.is_disposed() {
            return Err(CommandError::Disposed("pipeline"));
        }
        if pipeline.is_compute() {
            self.state.compute_pipeline = Some(Arc::clone(pipeline));
            self.state.deactivate_sets(BindPoint::Compute);
        } else {
            self.state.graphics_pipeline = Some(Arc::clone(pipeline));
            self.state.deactivate_sets(BindPoint::Graphics);
            self.state.deactivate_vertex_buffers();
        }
        Ok(())
    }

    fn set_framebuffer(&mut self, framebuffer: &Arc<super::Framebuffer>) -> Result<(), CommandError> {
        self.command_buffer()?;
        if framebuffer.is_disposed() {
            return Err(CommandError::Disposed("framebuffer"));
        }
        self.flush_framebuffer()?;
        self.ensure_no_render_pass();
        if self.state.framebuffer.is_some() {
            // the previous framebuffer had nothing to render into
            self.state.clear_colors = [None; MAX_COLOR_TARGETS];
            self.state.clear_depth = None;
        }

        // clears recorded without a framebuffer carry over to this one
        let color_count = framebuffer.color_target_count();
        for clear in self.state.clear_colors[color_count..].iter_mut() {
            *clear = None;
        }
        if !framebuffer.has_depth_target() {
            self.state.clear_depth = None;
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
        self.state.viewports = std::iter::repeat(viewport).take(count).collect();
        self.state.scissors = std::iter::repeat(scissor).take(count).collect();
        self.state.viewports_changed = true;
        self.state.scissors_changed = true;
        self.state.framebuffer = Some(Arc::clone(framebuffer));
        self.state.ever_active = false;
        Ok(())
    }

    fn set_viewport(&mut self, index: u32, viewport: &Viewport) -> Result<(), CommandError> {
        self.command_buffer()?;
        let index = index as usize;
        if index >= MAX_VIEWPORTS {
            return Err(CommandError::SlotOutOfRange {
                what: "viewport",
                slot: index as u32,
            });
        }
        let viewports = &mut self.state.viewports;
        while viewports.len() <= index {
            viewports.push(Viewport::default());
        }
        if viewports[index] != *viewport {
            viewports[index] = *viewport;
            self.state.viewports_changed = true;
        }
        Ok(())
    }

    fn set_scissor_rect(&mut self, index: u32, rect: &ScissorRect) -> Result<(), CommandError> {
        self.command_buffer()?;
        let index = index as usize;
        if index >= MAX_VIEWPORTS {
            return Err(CommandError::SlotOutOfRange {
                what: "scissor rect",
                slot: index as u32,
            });
        }
        let scissors = &mut self.state.scissors;
        while scissors.len() <= index {
            scissors.push(ScissorRect::default());
        }
        if scissors[index] != *rect {
            scissors[index] = *rect;
            self.state.scissors_changed = true;
        }
        Ok(())
    }

    fn set_vertex_buffer(
        &mut self,
        index: u32,
        buffer: &super::Buffer,
        offset: BufferAddress,
    ) -> Result<(), CommandError> {
        self.command_buffer()?;
        if index as usize >= MAX_VERTEX_BUFFERS {
            return Err(CommandError::SlotOutOfRange {
                what: "vertex buffer",
                slot: index,
            });
        }
        let raw = buffer.native()?;
        if !buffer.usage.contains(BufferUsage::VERTEX) {
            return Err(CommandError::MissingUsage("vertex buffers need VERTEX usage"));
        }
        let entry = &mut self.state.vertex_buffers[index as usize];
        let unchanged = match *entry {
            Some(ref binding) => binding.buffer == raw && binding.offset == offset,
            None => false,
        };
        if !unchanged {
            *entry = Some(VertexBufferBinding {
                buffer: raw,
                offset,
                active: false,
            });
        }
        Ok(())
    }

    fn set_index_buffer(
        &mut self,
        buffer: &super::Buffer,
        format: IndexFormat,
        offset: BufferAddress,
    ) -> Result<(), CommandError> {
        self.command_buffer()?;
        let raw = buffer.native()?;
        if !buffer.usage.contains(BufferUsage::INDEX) {
            return Err(CommandError::MissingUsage("index buffers need INDEX usage"));
        }
        self.state.index = Some(IndexBinding {
            buffer: raw,
            offset,
            format,
        });
        Ok(())
    }

    fn set_graphics_resource_set(
        &mut self,
        slot: u32,
        set: &Arc<super::ResourceSet>,
        dynamic_offsets: &[u32],
    ) -> Result<(), CommandError> {
        self.set_resource_set(BindPoint::Graphics, slot, set, dynamic_offsets)
    }

    fn set_compute_resource_set(
        &mut self,
        slot: u32,
        set: &Arc<super::ResourceSet>,
        dynamic_offsets: &[u32],
    ) -> Result<(), CommandError> {
        self.set_resource_set(BindPoint::Compute, slot, set, dynamic_offsets)
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        vertex_start: u32,
        instance_start: u32,
    ) -> Result<(), CommandError> {
        if instance_start != 0 {
            self.check_base_vertex_instance("base instance")?;
        }
        let (encoder, primitive_type) = match self.pre_draw()? {
            Some(ready) => ready,
            None => return Ok(()),
        };
        let raw = &self.shared.raw;
        if instance_start != 0 {
            raw.draw_primitives_instanced_base_instance(
                encoder,
                primitive_type,
                vertex_start as u64,
                vertex_count as u64,
                instance_count as u64,
                instance_start as u64,
            );
        } else if instance_count != 1 {
            raw.draw_primitives_instanced(
                encoder,
                primitive_type,
                vertex_start as u64,
                vertex_count as u64,
                instance_count as u64,
            );
        } else {
            raw.draw_primitives(
                encoder,
                primitive_type,
                vertex_start as u64,
                vertex_count as u64,
            );
        }
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        index_start: u32,
        vertex_offset: i32,
        instance_start: u32,
    ) -> Result<(), CommandError> {
        let index = self.state.index.ok_or(CommandError::NoIndexBuffer)?;
        if vertex_offset != 0 || instance_start != 0 {
            self.check_base_vertex_instance("base vertex and base instance")?;
        }
        let (encoder, primitive_type) = match self.pre_draw()? {
            Some(ready) => ready,
            None => return Ok(()),
        };
        let raw = &self.shared.raw;
        let index_type = conv::map_index_type(index.format);
        let offset = index.offset + index_start as BufferAddress * index.format.size();
        if vertex_offset != 0 || instance_start != 0 {
            raw.draw_indexed_primitives_instanced_base_instance(
                encoder,
                primitive_type,
                index_count as u64,
                index_type,
                index.buffer,
                offset,
                instance_count as u64,
                vertex_offset as i64,
                instance_start as u64,
            );
        } else if instance_count != 1 {
            raw.draw_indexed_primitives_instanced(
                encoder,
                primitive_type,
                index_count as u64,
                index_type,
                index.buffer,
                offset,
                instance_count as u64,
            );
        } else {
            raw.draw_indexed_primitives(
                encoder,
                primitive_type,
                index_count as u64,
                index_type,
                index.buffer,
                offset,
            );
        }
        Ok(())
    }

    fn draw_indirect(
        &mut self,
        buffer: &super::Buffer,
        offset: BufferAddress,
        draw_count: u32,
        stride: u32,
    ) -> Result<(), CommandError> {
        let indirect = buffer.native()?;
        if !buffer.usage.contains(BufferUsage::INDIRECT) {
            return Err(CommandError::MissingUsage("indirect buffers need INDIRECT usage"));
        }
        let (encoder, primitive_type) = match self.pre_draw()? {
            Some(ready) => ready,
            None => return Ok(()),
        };
        for draw in 0..draw_count as BufferAddress {
            self.shared.raw.draw_primitives_indirect(
                encoder,
                primitive_type,
                indirect,
                offset + draw * stride as BufferAddress,
            );
        }
        Ok(())
    }

    fn draw_indexed_indirect(
        &mut self,
        buffer: &super::Buffer,
        offset: BufferAddress,
        draw_count: u32,
        stride: u32,
    ) -> Result<(), CommandError> {
        let index = self.state.index.ok_or(CommandError::NoIndexBuffer)?;
        let indirect = buffer.native()?;
        if !buffer.usage.contains(BufferUsage::INDIRECT) {
            return Err(CommandError::MissingUsage("indirect buffers need INDIRECT usage"));
        }
        let (encoder, primitive_type) = match self.pre_draw()? {
            Some(ready) => ready,
            None => return Ok(()),
        };
        let index_type = conv::map_index_type(index.format);
        for draw in 0..draw_count as BufferAddress {
            self.shared.raw.draw_indexed_primitives_indirect(
                encoder,
                primitive_type,
                index_type,
                index.buffer,
                index.offset,
                indirect,
                offset + draw * stride as BufferAddress,
            );
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    ) -> Result<(), CommandError> {
        let (encoder, threads_per_group) = self.pre_dispatch()?;
        self.shared.raw.dispatch_thread_groups(
            encoder,
            conv::map_size(group_count_x, group_count_y, group_count_z),
            threads_per_group,
        );
        Ok(())
    }

    fn dispatch_indirect(
        &mut self,
        buffer: &super::Buffer,
        offset: BufferAddress,
    ) -> Result<(), CommandError> {
        let indirect = buffer.native()?;
        if !buffer.usage.contains(BufferUsage::INDIRECT) {
            return Err(CommandError::MissingUsage("indirect buffers need INDIRECT usage"));
        }
        let (encoder, threads_per_group) = self.pre_dispatch()?;
        self.shared
            .raw
            .dispatch_thread_groups_indirect(encoder, indirect, offset, threads_per_group);
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        src: &super::Buffer,
        src_offset: BufferAddress,
        dst: &super::Buffer,
        dst_offset: BufferAddress,
        size: BufferAddress,
    ) -> Result<(), CommandError> {
        self.command_buffer()?;
        let src_raw = src.native()?;
        let dst_raw = dst.native()?;
        check_buffer_range("source", src, src_offset, size)?;
        check_buffer_range("destination", dst, dst_offset, size)?;
        if size == 0 {
            return Ok(());
        }
        self.copy_buffer_region(src_raw, src_offset, dst_raw, dst_offset, size)
    }

    fn copy_texture(
        &mut self,
        src: &super::Texture,
        dst: &super::Texture,
        copy: &crate::TextureCopy,
    ) -> Result<(), CommandError> {
        self.command_buffer()?;
        src.storage()?;
        dst.storage()?;
        if copy.layer_count == 0 {
            return Ok(());
        }
        if src.format().describe().block_size != dst.format().describe().block_size {
            return Err(CommandError::InvalidCopy(format!(
                "{:?} and {:?} are not copy compatible",
                src.format(),
                dst.format()
            )));
        }
        let last_layer = copy.layer_count - 1;
        format::validate_region(
            &src.desc,
            &copy.src_origin,
            copy.src_mip_level,
            copy.src_base_array_layer + last_layer,
            &copy.size,
        )
        .map_err(CommandError::InvalidCopy)?;
        format::validate_region(
            &dst.desc,
            &copy.dst_origin,
            copy.dst_mip_level,
            copy.dst_base_array_layer + last_layer,
            &copy.size,
        )
        .map_err(CommandError::InvalidCopy)?;

        for layer in 0..copy.layer_count {
            self.copy_texture_layer(src, dst, copy, layer)?;
        }
        Ok(())
    }

    fn update_buffer(
        &mut self,
        buffer: &super::Buffer,
        offset: BufferAddress,
        data: &[u8],
    ) -> Result<(), CommandError> {
        let cmd_buf = self.command_buffer()?;
        let dst = buffer.native()?;
        let size = data.len() as BufferAddress;
        check_buffer_range("update", buffer, offset, size)?;
        if size == 0 {
            return Ok(());
        }
        // A ragged tail is only safe to round up when it ends the buffer.
        let use_compute =
            offset % WORD_SIZE != 0 || (size % WORD_SIZE != 0 && offset + size != buffer.size);

        let staging = self.shared.acquire_staging(size)?;
        self.shared.raw.write_buffer(staging.raw.raw, 0, data);
        if use_compute {
            self.copy_buffer_unaligned(staging.raw.raw, 0, dst, offset, size)?;
        } else {
            let encoder = self.enter_blit()?;
            self.shared.raw.copy_from_buffer(
                encoder,
                staging.raw.raw,
                0,
                dst,
                offset,
                format::align_to(size, WORD_SIZE),
            );
        }
        self.shared.tracker.attach_staging(cmd_buf, staging);
        Ok(())
    }

    fn resolve_texture(
        &mut self,
        src: &super::Texture,
        dst: &super::Texture,
    ) -> Result<(), CommandError> {
        let cmd_buf = self.command_buffer()?;
        let src_raw = src.image()?;
        let dst_raw = dst.image()?;
        if src.desc.sample_count <= 1 || dst.desc.sample_count > 1 {
            return Err(CommandError::InvalidCopy(
                "resolve goes from a multisampled texture to a single-sampled one".to_string(),
            ));
        }
        if src.format() != dst.format() {
            return Err(CommandError::InvalidCopy(format!(
                "can not resolve {:?} into {:?}",
                src.format(),
                dst.format()
            )));
        }
        self.ensure_no_render_pass();
        self.ensure_no_blit();
        self.ensure_no_compute();

        let mut desc = native::RenderPassDescriptor::default();
        desc.color_attachments.push(native::ColorAttachmentDescriptor {
            texture: src_raw,
            level: 0,
            slice: 0,
            load_action: native::MTLLoadAction::Load,
            store_action: native::MTLStoreAction::MultisampleResolve,
            clear_color: native::MTLClearColor::default(),
            resolve_texture: Some(dst_raw),
        });
        let encoder = self.shared.raw.new_render_command_encoder(cmd_buf, &desc);
        self.end_encoder(Retained::new(&self.shared.raw, encoder));
        Ok(())
    }

    fn generate_mipmaps(&mut self, texture: &super::Texture) -> Result<(), CommandError> {
        self.command_buffer()?;
        let raw = texture.image()?;
        if !texture.desc.usage.contains(TextureUsage::GENERATE_MIPMAPS) {
            return Err(CommandError::MissingUsage(
                "mipmap generation needs GENERATE_MIPMAPS usage",
            ));
        }
        let encoder = self.enter_blit()?;
        self.shared.raw.generate_mipmaps(encoder, raw);
        Ok(())
    }

    fn clear_color_target(&mut self, index: u32, color: Color) -> Result<(), CommandError> {
        self.command_buffer()?;
        let limit = match self.state.framebuffer {
            Some(ref framebuffer) => framebuffer.color_target_count(),
            None => MAX_COLOR_TARGETS,
        };
        if index as usize >= limit {
            return Err(CommandError::ColorTargetOutOfRange(index));
        }
        self.ensure_no_render_pass();
        self.state.clear_colors[index as usize] = Some(color);
        Ok(())
    }

    fn clear_depth_stencil(&mut self, depth: f32, stencil: u8) -> Result<(), CommandError> {
        self.command_buffer()?;
        if let Some(ref framebuffer) = self.state.framebuffer {
            if !framebuffer.has_depth_target() {
                return Err(CommandError::NoDepthTarget);
            }
        }
        self.ensure_no_render_pass();
        self.state.clear_depth = Some((depth, stencil));
        Ok(())
    }

    fn push_debug_group(&mut self, label: &str) -> Result<(), CommandError> {
        let target = self.debug_target()?;
        self.shared.raw.push_debug_group(target, label);
        self.state.debug_group_depth += 1;
        Ok(())
    }

    fn pop_debug_group(&mut self) -> Result<(), CommandError> {
        let target = self.debug_target()?;
        if self.state.debug_group_depth == 0 {
            return Err(CommandError::UnbalancedDebugGroup);
        }
        self.shared.raw.pop_debug_group(target);
        self.state.debug_group_depth -= 1;
        Ok(())
    }

    fn insert_debug_marker(&mut self, label: &str) -> Result<(), CommandError> {
        let target = self.debug_target()?;
        self.shared.raw.insert_debug_signpost(target, label);
        Ok(())
    }
}
