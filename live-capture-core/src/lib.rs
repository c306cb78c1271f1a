//! # live-capture-core
//!
//! Platform-agnostic core of a mobile live-capture pipeline.
//!
//! Camera frames go through a GPU render thread (or straight into the video
//! encoder in passthrough mode), microphone PCM goes through a capture loop,
//! and both encoders feed a local recording and a network stream at the same
//! time. Platform bindings (camera, codecs, GL context, muxer, RTMP/RTSP/SRT
//! client) implement the traits in [`traits`] and plug into the
//! [`SessionController`].
//!
//! ## Architecture
//!
//! ```text
//! live-capture-core (this crate)
//! ├── traits/       ← CameraSource, VideoEncoder, AudioEncoder, AudioDevice, GpuContext, Renderer, sinks
//! ├── models/       ← CaptureError, SessionState, SessionConfig, Frame, EncodedUnit, events
//! ├── render/       ← FrameRenderThread, FrameSignal, FpsLimiter
//! ├── audio/        ← AudioCaptureLoop, audio effects
//! ├── recording/    ← RecordingCoordinator (key-frame gating, pause/resume, checksum)
//! ├── session/      ← SessionController, state machine, dispatch, stream retry
//! └── storage/      ← recording metadata sidecar
//! ```

pub mod audio;
pub mod models;
pub mod recording;
pub mod render;
pub mod session;
pub mod storage;
pub mod traits;

#[cfg(test)]
mod test_support;

// Re-export key types at crate root for convenience.
pub use audio::effect::{GainEffect, NoAudioEffect};
pub use audio::microphone::AudioCaptureLoop;
pub use models::config::{AudioConfig, RetrySettings, SessionConfig, TeardownConfig, VideoConfig};
pub use models::error::CaptureError;
pub use models::events::{ConnectionEvent, SessionEvent, StreamStats};
pub use models::media::{EncodedUnit, Frame, MediaKind, ParameterSets, TrackFormat};
pub use models::recording_result::{RecordingMetadata, RecordingResult};
pub use models::render::{EncoderSurface, RenderStats, Rotation, StillImage};
pub use models::state::{CameraFacing, RecordStatus, SessionState};
pub use recording::coordinator::RecordingCoordinator;
pub use render::render_thread::FrameRenderThread;
pub use session::controller::{RenderMode, SessionComponents, SessionController};
pub use session::pipeline::{ConnectionListener, EncoderOutput};
pub use traits::audio_device::{AudioDevice, AudioEffect};
pub use traits::camera_source::{CameraSource, CameraTexture};
pub use traits::encoder::{AudioEncoder, VideoEncoder};
pub use traits::gpu::{FilterRender, GpuContext, GpuContextFactory, RendererKind};
pub use traits::renderer::{PhotoCallback, Renderer};
pub use traits::sinks::{NetworkStreamer, RecordWriter};
