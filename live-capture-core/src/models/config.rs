use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;
use super::render::Rotation;

/// Sample rates the audio path accepts.
pub const SUPPORTED_SAMPLE_RATES: [u32; 6] = [8000, 16000, 22050, 32000, 44100, 48000];

/// Video encoder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoConfig {
    /// Width in pixels (default: 640).
    pub width: u32,

    /// Height in pixels (default: 480).
    pub height: u32,

    /// Target frame rate (default: 30). Also caps the encoder draw rate.
    pub fps: u32,

    /// Bitrate in bits per second (default: 1200 * 1024).
    pub bitrate: u32,

    /// Rotate with the encoder instead of on the GPU.
    pub hardware_rotation: bool,

    /// Seconds between key frames (default: 2).
    pub i_frame_interval: u32,

    /// Stream rotation (0, 90, 180, 270).
    pub rotation: Rotation,

    /// Codec profile, or None for the encoder's default.
    pub profile: Option<u32>,

    /// Codec profile level. Only meaningful together with `profile`.
    pub profile_level: Option<u32>,
}

impl VideoConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!("invalid resolution: {}x{}", self.width, self.height));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(format!(
                "resolution must be even: {}x{}",
                self.width, self.height
            ));
        }
        if self.fps == 0 || self.fps > 120 {
            return Err(format!("unsupported fps: {}", self.fps));
        }
        if self.bitrate == 0 {
            return Err("bitrate must be positive".into());
        }
        if self.profile_level.is_some() && self.profile.is_none() {
            return Err("profile level requires a profile".into());
        }
        Ok(())
    }

    /// Size of the drawable the encoder consumes, accounting for rotation.
    pub fn encoder_surface_size(&self) -> (u32, u32) {
        if self.rotation.is_portrait() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            bitrate: 1200 * 1024,
            hardware_rotation: false,
            i_frame_interval: 2,
            rotation: Rotation::Deg0,
            profile: None,
            profile_level: None,
        }
    }
}

/// Audio encoder and microphone configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioConfig {
    /// Bitrate in bits per second (default: 64 * 1024).
    pub bitrate: u32,

    /// Sample rate in Hz (default: 32000).
    pub sample_rate: u32,

    /// Two channels instead of one (default: true).
    pub stereo: bool,

    /// Activate the platform echo canceler on the input device.
    pub echo_canceler: bool,

    /// Activate the platform noise suppressor on the input device.
    pub noise_suppressor: bool,
}

impl AudioConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(format!("unsupported sample rate: {}", self.sample_rate));
        }
        if self.bitrate == 0 {
            return Err("bitrate must be positive".into());
        }
        Ok(())
    }

    pub fn channels(&self) -> u16 {
        if self.stereo {
            2
        } else {
            1
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            bitrate: 64 * 1024,
            sample_rate: 32000,
            stereo: true,
            echo_canceler: false,
            noise_suppressor: false,
        }
    }
}

/// Reconnection budget used by [`RetryPolicy`](crate::session::retry::RetryPolicy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Maximum accepted retries per stream (default: 3).
    pub max_retries: u32,

    /// Failure reasons containing any of these substrings are never retried.
    pub fatal_reasons: Vec<String>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            fatal_reasons: vec!["Endpoint malformed".into()],
        }
    }
}

/// Bounded waits used when tearing down worker threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TeardownConfig {
    pub render_join_timeout_ms: u64,
    pub audio_join_timeout_ms: u64,
    pub binding_ack_timeout_ms: u64,
}

impl TeardownConfig {
    pub fn render_join_timeout(&self) -> Duration {
        Duration::from_millis(self.render_join_timeout_ms)
    }

    pub fn audio_join_timeout(&self) -> Duration {
        Duration::from_millis(self.audio_join_timeout_ms)
    }

    pub fn binding_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.binding_ack_timeout_ms)
    }
}

impl Default for TeardownConfig {
    fn default() -> Self {
        Self {
            render_join_timeout_ms: 500,
            audio_join_timeout_ms: 1000,
            binding_ack_timeout_ms: 500,
        }
    }
}

/// Everything a host needs to describe a session, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub video: VideoConfig,
    pub audio: AudioConfig,
    pub retry: RetrySettings,
    pub teardown: TeardownConfig,

    /// Write `<recording>.metadata.json` after a recording stops.
    pub write_metadata_sidecar: bool,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.video.validate()?;
        self.audio.validate()?;
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, CaptureError> {
        let config: SessionConfig = serde_json::from_str(json)
            .map_err(|e| CaptureError::Config(format!("failed to parse session config: {}", e)))?;
        config.validate().map_err(CaptureError::Config)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CaptureError> {
        let json = fs::read_to_string(path).map_err(|e| {
            CaptureError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }
}
