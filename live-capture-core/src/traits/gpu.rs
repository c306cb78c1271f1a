use std::sync::Arc;

use crate::models::error::CaptureError;
use crate::models::render::{DrawParams, EncoderSurface, RenderTarget, Rotation, StillImage};

/// Which drawing backend the render thread runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RendererKind {
    /// Preview goes to a visible surface; stills are read from the preview.
    OnScreen,
    /// Preview is a 1x1 offscreen buffer; stills are read from the encoder
    /// target.
    OffScreen,
}

/// A post-processing filter program. Opaque to the core; interpreted by the
/// [`GpuContext`].
pub trait FilterRender: Send {
    fn name(&self) -> &str;
}

/// GPU rendering context (EGL/GL, Metal...).
///
/// Lives on the render thread only. It is not `Send`: it is created there by
/// a [`GpuContextFactory`] and released there.
pub trait GpuContext {
    /// Texture the camera writes into.
    fn camera_texture_id(&self) -> u32;

    fn make_current(&mut self, target: RenderTarget) -> Result<(), CaptureError>;

    /// Latch the latest camera image into the texture.
    fn update_texture(&mut self) -> Result<(), CaptureError>;

    fn draw(&mut self, target: RenderTarget, params: &DrawParams) -> Result<(), CaptureError>;

    fn swap_buffers(&mut self, target: RenderTarget) -> Result<(), CaptureError>;

    /// Create the window surface for the encoder's input.
    fn attach_encoder_surface(&mut self, surface: &EncoderSurface) -> Result<(), CaptureError>;

    fn release_encoder_surface(&mut self);

    fn read_pixels(
        &mut self,
        target: RenderTarget,
        width: u32,
        height: u32,
    ) -> Result<StillImage, CaptureError>;

    fn set_filter(&mut self, position: usize, filter: Box<dyn FilterRender>);

    fn set_antialiasing(&mut self, enabled: bool);

    fn set_camera_rotation(&mut self, rotation: Rotation);

    fn set_camera_flip(&mut self, horizontal: bool, vertical: bool);

    /// Destroy every GPU object. Last call on this context.
    fn release(&mut self);
}

/// Creates a [`GpuContext`] on the calling (render) thread.
pub trait GpuContextFactory: Send + Sync {
    fn create(
        &self,
        kind: RendererKind,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn GpuContext>, CaptureError>;
}

pub type SharedGpuContextFactory = Arc<dyn GpuContextFactory>;
