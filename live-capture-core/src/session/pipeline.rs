use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::models::error::CaptureError;
use crate::models::events::{ConnectionEvent, SessionEvent};
use crate::models::media::{EncodedUnit, MediaKind, ParameterSets, TrackFormat};
use crate::recording::coordinator::RecordingCoordinator;
use crate::session::retry::RetryPolicy;
use crate::traits::sinks::NetworkStreamer;

/// Everything encoder and connection callbacks report, funnelled into one
/// single-consumer channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineMessage {
    Format(TrackFormat),
    ParameterSets(ParameterSets),
    Encoded(EncodedUnit),
    Connection(ConnectionEvent),
    MicrophoneLost(CaptureError),
    Shutdown,
}

/// Handle given to encoders for reporting their output. Cheap to clone and
/// usable from any thread.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    tx: Sender<PipelineMessage>,
}

impl EncoderOutput {
    pub(crate) fn new(tx: Sender<PipelineMessage>) -> Self {
        Self { tx }
    }

    pub fn format(&self, format: TrackFormat) {
        let _ = self.tx.send(PipelineMessage::Format(format));
    }

    pub fn parameter_sets(&self, sets: ParameterSets) {
        let _ = self.tx.send(PipelineMessage::ParameterSets(sets));
    }

    pub fn unit(&self, unit: EncodedUnit) {
        let _ = self.tx.send(PipelineMessage::Encoded(unit));
    }
}

/// Handle given to the network streamer for reporting connection changes.
#[derive(Debug, Clone)]
pub struct ConnectionListener {
    tx: Sender<PipelineMessage>,
}

impl ConnectionListener {
    pub(crate) fn new(tx: Sender<PipelineMessage>) -> Self {
        Self { tx }
    }

    pub fn notify(&self, event: ConnectionEvent) {
        let _ = self.tx.send(PipelineMessage::Connection(event));
    }
}

/// Non-blocking producer side of the caller's event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(tx: Sender<SessionEvent>) -> Self {
        Self { tx }
    }

    pub fn sender(&self) -> Sender<SessionEvent> {
        self.tx.clone()
    }

    /// Deliver an event, dropping it if the caller is not keeping up.
    pub fn emit(&self, event: SessionEvent) {
        if let Err(TrySendError::Full(event)) = self.tx.try_send(event) {
            log::warn!("Event channel full; dropped {:?}", event);
        }
    }
}

/// Longest pause between units that still counts as one continuous window.
const MAX_TICK_GAP: Duration = Duration::from_secs(2);

/// Counts encoded video units and reports a rate once per second.
///
/// A pause longer than [`MAX_TICK_GAP`] starts a new window instead of
/// folding the idle time into the next report.
#[derive(Debug)]
pub struct FpsMeter {
    window_start: Option<Instant>,
    last_tick: Option<Instant>,
    count: u32,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self {
            window_start: None,
            last_tick: None,
            count: 0,
        }
    }

    /// Record one unit; returns the rate when a full second has elapsed.
    pub fn tick(&mut self, now: Instant) -> Option<u32> {
        let stale = self
            .last_tick
            .map_or(false, |last| now.saturating_duration_since(last) >= MAX_TICK_GAP);
        if stale {
            self.reset();
        }
        self.last_tick = Some(now);

        let start = *self.window_start.get_or_insert(now);
        self.count += 1;
        if now.saturating_duration_since(start) >= Duration::from_secs(1) {
            let fps = self.count;
            self.count = 0;
            self.window_start = Some(now);
            return Some(fps);
        }
        None
    }

    pub fn reset(&mut self) {
        self.window_start = None;
        self.last_tick = None;
        self.count = 0;
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer of the pipeline channel, running on `session-dispatch`.
///
/// Routes every encoded unit to the recorder and, once the streamer has
/// connected, to the network streamer.
pub(crate) struct Dispatcher {
    /// Set by the controller only after `connect` succeeded.
    pub stream_open: Arc<AtomicBool>,
    pub recorder: Arc<Mutex<RecordingCoordinator>>,
    pub streamer: Arc<Mutex<Box<dyn NetworkStreamer>>>,
    pub parameter_sets: Arc<Mutex<Option<ParameterSets>>>,
    pub retry_policy: Arc<Mutex<RetryPolicy>>,
    pub events: EventSink,
    pub fps: FpsMeter,
}

impl Dispatcher {
    pub fn run(mut self, rx: Receiver<PipelineMessage>) {
        for message in rx.iter() {
            if !self.handle(message) {
                break;
            }
        }
        log::debug!("Session dispatch stopped");
    }

    fn handle(&mut self, message: PipelineMessage) -> bool {
        match message {
            PipelineMessage::Format(format) => {
                // A new video format means a freshly started encoder.
                if format.kind() == MediaKind::Video {
                    self.fps.reset();
                }
                self.recorder.lock().set_track_format(format);
            }
            PipelineMessage::ParameterSets(sets) => {
                // Cache first: a concurrent connect sends whatever is cached.
                *self.parameter_sets.lock() = Some(sets.clone());
                let mut streamer = self.streamer.lock();
                if self.streaming() {
                    streamer.send_parameter_sets(&sets);
                }
            }
            PipelineMessage::Encoded(unit) => self.route(unit),
            PipelineMessage::Connection(event) => {
                if event == ConnectionEvent::Connected {
                    self.retry_policy.lock().reset();
                }
                self.events.emit(SessionEvent::Connection(event));
            }
            PipelineMessage::MicrophoneLost(error) => {
                self.events.emit(SessionEvent::MicrophoneLost(error));
            }
            PipelineMessage::Shutdown => return false,
        }
        true
    }

    fn route(&mut self, unit: EncodedUnit) {
        if unit.kind == MediaKind::Video {
            if let Some(fps) = self.fps.tick(Instant::now()) {
                self.events.emit(SessionEvent::Fps(fps));
            }
        }

        let written = self.recorder.lock().write_unit(&unit);
        if let Err(e) = written {
            log::error!("Record writer failed: {}", e);
            self.events.emit(SessionEvent::Error(e));
        }

        let mut streamer = self.streamer.lock();
        if self.streaming() {
            streamer.send(&unit);
        }
    }

    /// Only meaningful with the streamer lock held; the controller flips the
    /// flag under the same lock.
    fn streaming(&self) -> bool {
        self.stream_open.load(Ordering::SeqCst)
    }
}
