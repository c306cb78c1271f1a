use crate::models::config::{AudioConfig, VideoConfig};
use crate::models::error::CaptureError;
use crate::models::media::Frame;
use crate::models::render::EncoderSurface;
use crate::session::pipeline::EncoderOutput;

/// Hardware video encoder.
///
/// Encoded units, formats and parameter sets are emitted asynchronously
/// through the [`EncoderOutput`] given in [`set_output`](Self::set_output),
/// typically from the codec's own callback thread.
pub trait VideoEncoder: Send {
    fn set_output(&mut self, output: EncoderOutput);

    /// Configure the codec. Returns `UnsupportedConfiguration` if the
    /// codec/profile/size combination is not available on this device.
    fn prepare(&mut self, config: &VideoConfig) -> Result<(), CaptureError>;

    fn start(&mut self) -> Result<(), CaptureError>;

    fn stop(&mut self);

    /// Recreate the input surface without a full reinitialization.
    fn reset(&mut self) -> Result<(), CaptureError>;

    /// The drawable the encoder consumes, once prepared.
    fn input_surface(&self) -> Option<EncoderSurface>;

    /// Permitted while running.
    fn set_bitrate_on_fly(&mut self, bitrate: u32);

    fn set_fps(&mut self, fps: u32);

    fn is_running(&self) -> bool;
}

/// Hardware audio encoder fed with raw PCM frames from the capture loop.
pub trait AudioEncoder: Send {
    fn set_output(&mut self, output: EncoderOutput);

    fn prepare(&mut self, config: &AudioConfig, max_input_size: usize) -> Result<(), CaptureError>;

    fn start(&mut self) -> Result<(), CaptureError>;

    fn stop(&mut self);

    /// Called on the audio capture thread for every frame.
    fn input_pcm(&mut self, frame: Frame);

    fn is_running(&self) -> bool;
}
