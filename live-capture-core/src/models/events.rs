use super::error::CaptureError;
use super::recording_result::RecordingResult;
use super::state::{RecordStatus, SessionState};

/// Connection lifecycle reported by a [`NetworkStreamer`](crate::NetworkStreamer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Failed(String),
    /// New measured upload bitrate in bits per second.
    BitrateChanged(u64),
    Disconnected,
    AuthError,
    AuthSuccess,
}

/// Runtime notifications delivered to the host on the controller's event
/// channel.
///
/// Failures that happen on worker threads end up here rather than being
/// returned from a call.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Connection(ConnectionEvent),
    RecordStatusChanged(RecordStatus),
    RecordingFinished(RecordingResult),
    /// The microphone read loop ended on its own (device loss). Sinks are
    /// left running; the host decides what to stop. Carries
    /// [`CaptureError::DeviceReadFailed`].
    MicrophoneLost(CaptureError),
    /// Encoded video frames per second over the last second.
    Fps(u32),
    Error(CaptureError),
}

/// Counters reported by the network streamer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub sent_audio_frames: u64,
    pub sent_video_frames: u64,
    pub dropped_audio_frames: u64,
    pub dropped_video_frames: u64,
}
