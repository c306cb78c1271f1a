use crate::models::config::AudioConfig;
use crate::models::error::CaptureError;

/// Blocking microphone handle.
///
/// Owned by the audio capture thread while the loop runs; every method is
/// called from a single thread at a time.
pub trait AudioDevice: Send {
    /// Create the input with the given format and activate the requested
    /// DSP (echo canceler, noise suppressor).
    fn open(&mut self, config: &AudioConfig) -> Result<(), CaptureError>;

    fn start(&mut self) -> Result<(), CaptureError>;

    /// Block until `buffer` is filled or the device has data. `Ok(0)` or an
    /// error means the device is gone.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, CaptureError>;

    /// Stop and release the hardware handle. `open` must be called again
    /// before the next `start`.
    fn release(&mut self);

    fn is_open(&self) -> bool;
}

/// PCM post-processing applied to unmuted microphone buffers.
///
/// Swappable at any time; the capture loop picks up the new effect on its
/// next read.
pub trait AudioEffect: Send + Sync {
    fn process(&self, pcm: &mut [u8]);
}
