use std::sync::Arc;

use arrayvec::ArrayVec;
use parking_lot::Mutex;

use super::native::{self, DrawableId, LayerId, Retained, TextureId};
use crate::{DisposeFlag, PixelFormat, ResourceError, TextureDescription, TextureUsage};

/// Presentation state shared by a swapchain and its framebuffer.
#[derive(Debug)]
pub(super) struct SurfaceState {
    shared: Arc<super::DeviceShared>,
    layer: LayerId,
    pub(super) color_format: PixelFormat,
    pub(super) depth_format: Option<PixelFormat>,
    size: Mutex<(u32, u32)>,
    drawable: Mutex<Option<(Retained<DrawableId>, TextureId)>>,
    depth: Mutex<Option<Arc<super::Texture>>>,
}

impl SurfaceState {
    pub(super) fn size(&self) -> (u32, u32) {
        *self.size.lock()
    }

    /// Color texture of the current drawable, acquiring one if needed.
    pub(super) fn acquire_drawable(&self) -> Option<TextureId> {
        let mut drawable = self.drawable.lock();
        if let Some((_, texture)) = *drawable {
            return Some(texture);
        }
        let raw = self.shared.raw.next_drawable(self.layer)?;
        let texture = self.shared.raw.drawable_texture(raw);
        *drawable = Some((Retained::new(&self.shared.raw, raw), texture));
        Some(texture)
    }

    pub(super) fn take_drawable(&self) -> Option<Retained<DrawableId>> {
        self.drawable.lock().take().map(|(drawable, _)| drawable)
    }

    pub(super) fn depth_texture(&self) -> Option<Arc<super::Texture>> {
        self.depth.lock().clone()
    }

    fn create_depth(&self, width: u32, height: u32) -> Result<(), ResourceError> {
        let format = match self.depth_format {
            Some(format) => format,
            None => return Ok(()),
        };
        let desc = TextureDescription::texture_2d(
            width,
            height,
            1,
            1,
            format,
            TextureUsage::DEPTH_STENCIL,
        );
        let texture = self.shared.create_texture(&desc, true)?;
        *self.depth.lock() = Some(Arc::new(texture));
        Ok(())
    }
}

#[derive(Debug)]
pub struct Swapchain {
    state: Arc<SurfaceState>,
    framebuffer: Arc<super::Framebuffer>,
}

impl Swapchain {
    pub(super) fn new(
        shared: &Arc<super::DeviceShared>,
        desc: &crate::SwapchainDescription,
    ) -> Result<Self, ResourceError> {
        let layer = native::RawId(
            std::num::NonZeroU64::new(desc.surface.0).ok_or_else(|| {
                ResourceError::InvalidDescription("null surface handle".to_string())
            })?,
        );
        let color_format = if desc.color_srgb {
            PixelFormat::Bgra8UnormSrgb
        } else {
            PixelFormat::Bgra8Unorm
        };
        let state = Arc::new(SurfaceState {
            shared: Arc::clone(shared),
            layer: LayerId(layer),
            color_format,
            depth_format: desc.depth_format,
            size: Mutex::new((desc.width, desc.height)),
            drawable: Mutex::new(None),
            depth: Mutex::new(None),
        });
        if let Some(label) = desc.label {
            shared.raw.set_label(layer, label);
        }
        shared
            .raw
            .set_drawable_size(LayerId(layer), desc.width as u64, desc.height as u64);
        state.create_depth(desc.width, desc.height)?;

        let framebuffer = Arc::new(super::Framebuffer {
            color_targets: ArrayVec::new(),
            depth_target: None,
            surface: Some(Arc::clone(&state)),
            size: (desc.width, desc.height),
            disposed: DisposeFlag::default(),
        });
        Ok(Self { state, framebuffer })
    }

    pub(super) fn state(&self) -> &SurfaceState {
        &self.state
    }

    pub fn color_format(&self) -> PixelFormat {
        self.state.color_format
    }
}

impl crate::Swapchain<super::Api> for Swapchain {
    fn framebuffer(&self) -> &Arc<super::Framebuffer> {
        &self.framebuffer
    }

    fn resize(&self, width: u32, height: u32) {
        *self.state.size.lock() = (width, height);
        self.state
            .shared
            .raw
            .set_drawable_size(self.state.layer, width as u64, height as u64);
        // the next drawable comes at the new size
        drop(self.state.take_drawable());
        if let Err(err) = self.state.create_depth(width, height) {
            log::error!("Unable to recreate the swapchain depth target: {}", err);
        }
    }
}
