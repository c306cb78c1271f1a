use serde::{Deserialize, Serialize};

/// Session state machine.
///
/// ```text
///                 start_preview
///        Idle  ───────────────▶  PreviewOnly
///         │  ▲                     │  ▲
/// start_* │  │ stop_* (teardown)   │  │ stop_* (teardown, preview kept)
///         ▼  │                     ▼  │
///    Streaming ◀──── stop_record ──── RecordingAndStreaming
///         │                              ▲      │
///         └──────── start_record ────────┘      │ stop_stream
///                                               ▼
///                                           Recording
/// ```
///
/// Encoders run iff the state is `Recording`, `Streaming` or
/// `RecordingAndStreaming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    #[default]
    Idle,
    PreviewOnly,
    Recording,
    Streaming,
    RecordingAndStreaming,
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming | Self::RecordingAndStreaming)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording | Self::RecordingAndStreaming)
    }

    /// Whether the shared encoders are running in this state.
    pub fn encoders_active(&self) -> bool {
        self.is_streaming() || self.is_recording()
    }
}

/// Local recording status.
///
/// ```text
/// Idle → Starting → Running ↔ Paused
///           │          │        │
///           └──────────┴────────┴──▶ Stopped
/// ```
///
/// `Starting` waits for track formats and the first video key frame before
/// anything reaches the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordStatus {
    #[default]
    Idle,
    Starting,
    Running,
    Paused,
    Stopped,
}

impl RecordStatus {
    /// Whether a recording is in progress (including not-yet-written and
    /// paused), i.e. whether it depends on the shared encoders.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Paused)
    }
}

/// Which physical camera to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    #[default]
    Back,
    Front,
}
