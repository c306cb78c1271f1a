use std::sync::Arc;

use crate::models::error::CaptureError;
use crate::models::render::EncoderSurface;
use crate::models::state::CameraFacing;
use crate::render::frame_signal::FrameSignal;

/// The GPU texture the camera writes into, plus the edge-triggered signal it
/// raises after each update.
///
/// Handed out by the render thread once its context is ready.
#[derive(Debug, Clone)]
pub struct CameraTexture {
    texture_id: u32,
    signal: Arc<FrameSignal>,
}

impl CameraTexture {
    pub(crate) fn new(texture_id: u32, signal: Arc<FrameSignal>) -> Self {
        Self { texture_id, signal }
    }

    pub fn texture_id(&self) -> u32 {
        self.texture_id
    }

    /// Called by the camera binding after it has written a new frame.
    ///
    /// Bursts coalesce: the render thread only ever draws the latest frame.
    pub fn notify_frame_available(&self) {
        self.signal.notify_frame();
    }
}

/// Platform camera binding.
///
/// Implemented outside this crate (Camera2, V4L2, AVFoundation...).
pub trait CameraSource: Send {
    /// Route camera output into the render thread's texture.
    fn prepare_texture(&mut self, texture: CameraTexture, width: u32, height: u32);

    /// Route camera output straight to its own preview and, when given, to
    /// the encoder surface. Used without a render thread.
    fn prepare_surface(&mut self, encoder: Option<EncoderSurface>);

    fn open(&mut self, facing: CameraFacing) -> Result<(), CaptureError>;

    /// Reopen whichever camera was used last (back camera if none).
    fn open_last(&mut self) -> Result<(), CaptureError>;

    fn close(&mut self);

    /// Stop feeding the encoder surface while keeping the preview alive.
    fn stop_repeating_encoder(&mut self);

    fn switch_camera(&mut self) -> Result<(), CaptureError>;

    fn set_zoom(&mut self, level: f32);

    fn zoom(&self) -> f32;

    fn max_zoom(&self) -> f32;

    /// Torch on/off. Fails if the current camera has no flash unit.
    fn set_lantern(&mut self, enabled: bool) -> Result<(), CaptureError>;

    fn is_running(&self) -> bool;
}
