use crate::traits::audio_device::AudioEffect;

/// Identity effect, installed by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAudioEffect;

impl AudioEffect for NoAudioEffect {
    fn process(&self, _pcm: &mut [u8]) {}
}

/// Linear gain on signed 16-bit little-endian PCM, clamped to the sample range.
///
/// A trailing odd byte is left untouched.
#[derive(Debug, Clone, Copy)]
pub struct GainEffect {
    gain: f32,
}

impl GainEffect {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: gain.max(0.0),
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl AudioEffect for GainEffect {
    fn process(&self, pcm: &mut [u8]) {
        for chunk in pcm.chunks_exact_mut(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]) as f32;
            let scaled = (sample * self.gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            chunk.copy_from_slice(&scaled.to_le_bytes());
        }
    }
}
