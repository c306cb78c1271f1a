use std::path::Path;

use crate::models::error::CaptureError;
use crate::models::events::StreamStats;
use crate::models::media::{EncodedUnit, ParameterSets, TrackFormat};
use crate::session::pipeline::ConnectionListener;

/// Container writer for local recordings (MP4 muxer or similar).
pub trait RecordWriter: Send {
    /// Open the output. Fails with `Io` if the path is unwritable or the
    /// writer is already active.
    fn start(&mut self, path: &Path) -> Result<(), CaptureError>;

    /// Declare a track. Called for every expected track before the first
    /// `write`.
    fn add_track(&mut self, format: &TrackFormat) -> Result<(), CaptureError>;

    fn write(&mut self, unit: &EncodedUnit) -> Result<(), CaptureError>;

    /// Finalize the container.
    fn stop(&mut self) -> Result<(), CaptureError>;
}

/// Network client (RTMP, RTSP, SRT...).
///
/// Connection lifecycle changes are reported through the
/// [`ConnectionListener`] given in [`set_listener`](Self::set_listener).
pub trait NetworkStreamer: Send {
    fn set_listener(&mut self, listener: ConnectionListener);

    /// Begin connecting. Immediate failures (malformed URL) are returned;
    /// everything later arrives as a `ConnectionEvent`.
    fn connect(&mut self, url: &str) -> Result<(), CaptureError>;

    fn disconnect(&mut self);

    fn send_parameter_sets(&mut self, sets: &ParameterSets);

    fn send(&mut self, unit: &EncodedUnit);

    fn set_authorization(&mut self, user: &str, password: &str);

    fn stats(&self) -> StreamStats {
        StreamStats::default()
    }
}
