use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A PCM buffer view produced by one microphone read.
///
/// Immutable once created. Muted frames share the capture loop's
/// pre-allocated silence buffer instead of copying device data.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Arc<[u8]>,
    offset: usize,
    length: usize,
    timestamp: Duration,
    muted: bool,
}

impl Frame {
    /// Create a frame over `data[offset..offset + length]`.
    ///
    /// The range is clamped to the buffer.
    pub fn new(data: Arc<[u8]>, offset: usize, length: usize, timestamp: Duration, muted: bool) -> Self {
        let offset = offset.min(data.len());
        let length = length.min(data.len() - offset);
        Self {
            data,
            offset,
            length,
            timestamp,
            muted,
        }
    }

    /// The PCM bytes this frame refers to.
    pub fn bytes(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.length]
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Time since the capture loop started.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Whether this frame refers to the given backing buffer.
    pub fn shares_buffer(&self, buffer: &Arc<[u8]>) -> bool {
        Arc::ptr_eq(&self.data, buffer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

/// One encoded access unit emitted by a hardware encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedUnit {
    pub kind: MediaKind,
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds.
    pub pts_us: i64,
    pub key_frame: bool,
}

impl EncodedUnit {
    pub fn video(data: Vec<u8>, pts_us: i64, key_frame: bool) -> Self {
        Self {
            kind: MediaKind::Video,
            data,
            pts_us,
            key_frame,
        }
    }

    pub fn audio(data: Vec<u8>, pts_us: i64) -> Self {
        Self {
            kind: MediaKind::Audio,
            data,
            pts_us,
            key_frame: false,
        }
    }

    /// Copy of this unit with a shifted timestamp.
    pub fn with_pts(&self, pts_us: i64) -> Self {
        Self {
            pts_us,
            ..self.clone()
        }
    }
}

/// Output format negotiated by an encoder, needed by the record writer
/// before the first unit of that track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TrackFormat {
    Video {
        codec: String,
        width: u32,
        height: u32,
        fps: u32,
    },
    Audio {
        codec: String,
        sample_rate: u32,
        channels: u16,
    },
}

impl TrackFormat {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Video { .. } => MediaKind::Video,
            Self::Audio { .. } => MediaKind::Audio,
        }
    }
}

/// Codec parameter sets (SPS/PPS, plus VPS for HEVC) forwarded to the
/// network streamer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSets {
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
    pub vps: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_views_requested_range() {
        let data: Arc<[u8]> = Arc::from(vec![1u8, 2, 3, 4, 5]);
        let frame = Frame::new(data.clone(), 1, 3, Duration::from_millis(10), false);
        assert_eq!(frame.bytes(), &[2, 3, 4]);
        assert_eq!(frame.len(), 3);
        assert!(frame.shares_buffer(&data));
    }

    #[test]
    fn frame_range_is_clamped() {
        let data: Arc<[u8]> = Arc::from(vec![0u8; 4]);
        let frame = Frame::new(data, 2, 100, Duration::ZERO, true);
        assert_eq!(frame.len(), 2);
        assert!(frame.is_muted());
    }

    #[test]
    fn track_format_kind() {
        let format = TrackFormat::Audio {
            codec: "aac".into(),
            sample_rate: 44100,
            channels: 2,
        };
        assert_eq!(format.kind(), MediaKind::Audio);
    }
}
