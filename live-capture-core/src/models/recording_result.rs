use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::media::TrackFormat;

/// Result returned when a local recording stops.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub file_path: PathBuf,
    pub duration_secs: f64,
    pub metadata: RecordingMetadata,
    /// SHA-256 of every payload byte handed to the writer.
    pub checksum: String,
}

/// Metadata stored alongside a recording.
///
/// Serializable for the JSON sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMetadata {
    pub id: String,
    pub file_path: String,
    pub duration_secs: f64,
    pub created_at: String,
    pub video_units: u64,
    pub audio_units: u64,
    pub bytes_written: u64,
    pub checksum: String,
    pub tracks: Vec<TrackFormat>,
}

impl RecordingMetadata {
    pub fn new(
        file_path: &str,
        duration_secs: f64,
        counts: (u64, u64, u64),
        checksum: &str,
        tracks: Vec<TrackFormat>,
    ) -> Self {
        let (video_units, audio_units, bytes_written) = counts;
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_path: file_path.to_string(),
            duration_secs,
            created_at: chrono::Utc::now().to_rfc3339(),
            video_units,
            audio_units,
            bytes_written,
            checksum: checksum.to_string(),
            tracks,
        }
    }
}
