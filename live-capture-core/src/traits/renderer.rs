use crate::models::error::CaptureError;
use crate::models::render::{EncoderSurface, RenderStats, Rotation, StillImage};
use crate::traits::camera_source::CameraTexture;
use crate::traits::gpu::{FilterRender, RendererKind};

/// One-shot still capture callback, invoked on the render thread.
pub type PhotoCallback = Box<dyn FnOnce(StillImage) + Send + 'static>;

/// Capability set of a rendering backend.
///
/// Every mutating call only queues or records a request; draws happen on the
/// backend's own thread.
pub trait Renderer: Send {
    fn kind(&self) -> RendererKind;

    /// Reset per-binding settings to their defaults. Only valid while stopped.
    fn init(&mut self);

    fn set_encoder_size(&mut self, width: u32, height: u32);

    fn set_preview_size(&mut self, width: u32, height: u32);

    /// Start the render thread and block until its GPU context is ready.
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Stop the render thread. Bounded and idempotent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Texture for the camera, available while running.
    fn camera_texture(&self) -> Option<CameraTexture>;

    fn add_encoder_binding(&self, surface: EncoderSurface);

    /// Detach the encoder target. Returns after the render thread has
    /// released it.
    fn remove_encoder_binding(&self);

    fn has_encoder_binding(&self) -> bool;

    fn set_filter(&self, position: usize, filter: Box<dyn FilterRender>);

    fn enable_antialiasing(&self, enabled: bool);

    /// Cap the encoder draw rate. Preview is never throttled.
    fn set_fps(&self, fps: u32);

    fn set_camera_rotation(&self, rotation: Rotation);

    fn set_camera_flip(&self, horizontal: bool, vertical: bool);

    fn set_stream_rotation(&self, rotation: Rotation);

    fn set_stream_flip(&self, horizontal: bool, vertical: bool);

    fn set_preview_rotation(&self, rotation: Rotation);

    fn set_preview_flip(&self, horizontal: bool, vertical: bool);

    fn mute_video(&self);

    fn unmute_video(&self);

    fn is_video_muted(&self) -> bool;

    fn take_photo(&self, callback: PhotoCallback);

    fn stats(&self) -> RenderStats;
}
