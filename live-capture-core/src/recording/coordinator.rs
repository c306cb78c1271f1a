use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError};
use sha2::{Digest, Sha256};

use crate::models::error::CaptureError;
use crate::models::events::SessionEvent;
use crate::models::media::{EncodedUnit, MediaKind, TrackFormat};
use crate::models::recording_result::{RecordingMetadata, RecordingResult};
use crate::models::state::RecordStatus;
use crate::traits::sinks::RecordWriter;

/// Gap left between the last unit before a pause and the first unit after it.
const RESUME_STEP_US: i64 = 1_000;

/// Local recording sink sharing the encoders' output with the network path.
///
/// ```text
/// start_record ─▶ Starting ──(formats + video key frame)──▶ Running
///                                                          │   ▲
///                                              pause_record│   │resume_record
///                                                          ▼   │ (next key frame)
///                                                          Paused
/// ```
///
/// Track formats are remembered across recordings, because encoders that are
/// already running for a stream will not announce them again.
pub struct RecordingCoordinator {
    writer: Box<dyn RecordWriter>,
    status: RecordStatus,
    file_path: Option<PathBuf>,
    expect_video: bool,
    expect_audio: bool,
    video_format: Option<TrackFormat>,
    audio_format: Option<TrackFormat>,
    waiting_key_frame: bool,
    pts_offset_us: i64,
    last_raw_pts_us: Option<i64>,
    resume_pending: bool,
    hasher: Sha256,
    video_units: u64,
    audio_units: u64,
    bytes_written: u64,
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    paused_total: Duration,
    events: Option<Sender<SessionEvent>>,
}

impl RecordingCoordinator {
    pub fn new(writer: Box<dyn RecordWriter>) -> Self {
        Self {
            writer,
            status: RecordStatus::Idle,
            file_path: None,
            expect_video: true,
            expect_audio: true,
            video_format: None,
            audio_format: None,
            waiting_key_frame: true,
            pts_offset_us: 0,
            last_raw_pts_us: None,
            resume_pending: false,
            hasher: Sha256::new(),
            video_units: 0,
            audio_units: 0,
            bytes_written: 0,
            started_at: None,
            paused_at: None,
            paused_total: Duration::ZERO,
            events: None,
        }
    }

    pub fn set_event_sender(&mut self, events: Sender<SessionEvent>) {
        self.events = Some(events);
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Remember a negotiated track format.
    pub fn set_track_format(&mut self, format: TrackFormat) {
        log::debug!("Recorder received {:?} format", format.kind());
        match format.kind() {
            MediaKind::Video => self.video_format = Some(format),
            MediaKind::Audio => self.audio_format = Some(format),
        }
    }

    /// Forget the negotiated formats. Called when the encoders are torn down.
    pub fn reset_formats(&mut self) {
        self.video_format = None;
        self.audio_format = None;
    }

    /// Open the writer and wait for the tracks to become writable.
    pub fn start_record(
        &mut self,
        path: &Path,
        expect_video: bool,
        expect_audio: bool,
    ) -> Result<(), CaptureError> {
        if self.status.is_active() {
            return Err(CaptureError::Io("a recording is already active".into()));
        }
        if !expect_video && !expect_audio {
            return Err(CaptureError::InvalidState("recording needs at least one track".into()));
        }
        self.writer.start(path)?;

        self.file_path = Some(path.to_path_buf());
        self.expect_video = expect_video;
        self.expect_audio = expect_audio;
        self.waiting_key_frame = expect_video;
        self.pts_offset_us = 0;
        self.last_raw_pts_us = None;
        self.resume_pending = false;
        self.hasher = Sha256::new();
        self.video_units = 0;
        self.audio_units = 0;
        self.bytes_written = 0;
        self.started_at = Some(Instant::now());
        self.paused_at = None;
        self.paused_total = Duration::ZERO;

        log::info!("Recording to {}", path.display());
        self.set_status(RecordStatus::Starting);
        Ok(())
    }

    /// Hand one encoded unit to the writer if the recording accepts it.
    ///
    /// Returns whether the unit was written.
    pub fn write_unit(&mut self, unit: &EncodedUnit) -> Result<bool, CaptureError> {
        match self.status {
            RecordStatus::Starting => {
                if !self.formats_ready() || !self.accepts_after_gate(unit) {
                    return Ok(false);
                }
                self.add_tracks()?;
                self.set_status(RecordStatus::Running);
            }
            RecordStatus::Running => {
                if !self.accepts_after_gate(unit) {
                    return Ok(false);
                }
            }
            _ => return Ok(false),
        }

        if !self.tracks_expect(unit.kind) {
            return Ok(false);
        }

        if self.resume_pending {
            if let Some(last) = self.last_raw_pts_us {
                self.pts_offset_us += (unit.pts_us - last - RESUME_STEP_US).max(0);
            }
            self.resume_pending = false;
        }

        let shifted = unit.pts_us - self.pts_offset_us;
        if shifted < 0 {
            return Ok(false);
        }
        let out = if self.pts_offset_us == 0 {
            unit.clone()
        } else {
            unit.with_pts(shifted)
        };
        self.writer.write(&out)?;

        self.hasher.update(&unit.data);
        self.bytes_written += unit.data.len() as u64;
        match unit.kind {
            MediaKind::Video => self.video_units += 1,
            MediaKind::Audio => self.audio_units += 1,
        }
        self.last_raw_pts_us = Some(self.last_raw_pts_us.map_or(unit.pts_us, |p| p.max(unit.pts_us)));
        Ok(true)
    }

    /// Suspend writing. Encoders and the network path are unaffected.
    pub fn pause_record(&mut self) -> Result<(), CaptureError> {
        match self.status {
            RecordStatus::Running | RecordStatus::Starting => {
                self.paused_at = Some(Instant::now());
                self.set_status(RecordStatus::Paused);
                Ok(())
            }
            RecordStatus::Paused => Ok(()),
            other => Err(CaptureError::InvalidState(format!(
                "cannot pause a recording in state {:?}",
                other
            ))),
        }
    }

    /// Resume writing at the next video key frame.
    pub fn resume_record(&mut self) -> Result<(), CaptureError> {
        if self.status != RecordStatus::Paused {
            return Err(CaptureError::InvalidState(format!(
                "cannot resume a recording in state {:?}",
                self.status
            )));
        }
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += paused_at.elapsed();
        }
        self.waiting_key_frame = self.expect_video;
        if self.last_raw_pts_us.is_some() {
            self.resume_pending = true;
            self.set_status(RecordStatus::Running);
        } else {
            // Nothing written yet: go back to waiting for formats.
            self.set_status(RecordStatus::Starting);
        }
        Ok(())
    }

    /// Finalize the file and report what was written.
    pub fn stop_record(&mut self) -> Result<RecordingResult, CaptureError> {
        if !self.status.is_active() {
            return Err(CaptureError::InvalidState("no recording in progress".into()));
        }
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += paused_at.elapsed();
        }

        let finalized = self.writer.stop();
        self.set_status(RecordStatus::Stopped);
        finalized?;

        let duration = self
            .started_at
            .take()
            .map(|start| start.elapsed().saturating_sub(self.paused_total))
            .unwrap_or_default()
            .as_secs_f64();
        let checksum = hex_encode(&std::mem::take(&mut self.hasher).finalize());
        let file_path = self.file_path.take().unwrap_or_default();

        let metadata = RecordingMetadata::new(
            &file_path.to_string_lossy(),
            duration,
            (self.video_units, self.audio_units, self.bytes_written),
            &checksum,
            self.expected_formats(),
        );
        log::info!(
            "Recording finished: {} ({:.1}s, {} bytes)",
            file_path.display(),
            duration,
            self.bytes_written
        );

        Ok(RecordingResult {
            file_path,
            duration_secs: duration,
            metadata,
            checksum,
        })
    }

    fn tracks_expect(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Video => self.expect_video,
            MediaKind::Audio => self.expect_audio,
        }
    }

    fn formats_ready(&self) -> bool {
        (!self.expect_video || self.video_format.is_some())
            && (!self.expect_audio || self.audio_format.is_some())
    }

    /// Key frame gate: once a video key frame has passed, everything does.
    fn accepts_after_gate(&mut self, unit: &EncodedUnit) -> bool {
        if !self.waiting_key_frame {
            return true;
        }
        if unit.kind == MediaKind::Video && unit.key_frame {
            self.waiting_key_frame = false;
            return true;
        }
        false
    }

    fn expected_formats(&self) -> Vec<TrackFormat> {
        let video = self.video_format.iter().filter(|_| self.expect_video);
        let audio = self.audio_format.iter().filter(|_| self.expect_audio);
        video.chain(audio).cloned().collect()
    }

    fn add_tracks(&mut self) -> Result<(), CaptureError> {
        for format in self.expected_formats() {
            self.writer.add_track(&format)?;
        }
        Ok(())
    }

    fn set_status(&mut self, status: RecordStatus) {
        if self.status == status {
            return;
        }
        log::debug!("Record status {:?} -> {:?}", self.status, status);
        self.status = status;
        if let Some(events) = &self.events {
            if let Err(TrySendError::Full(_)) = events.try_send(SessionEvent::RecordStatusChanged(status)) {
                log::warn!("Event channel full; dropped record status {:?}", status);
            }
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
