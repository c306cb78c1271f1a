use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::audio::microphone::{AudioCaptureLoop, FrameSink};
use crate::models::config::{AudioConfig, SessionConfig, TeardownConfig, VideoConfig};
use crate::models::error::CaptureError;
use crate::models::events::{SessionEvent, StreamStats};
use crate::models::media::ParameterSets;
use crate::models::recording_result::RecordingResult;
use crate::models::render::{EncoderSurface, RenderStats, Rotation};
use crate::models::state::{CameraFacing, RecordStatus, SessionState};
use crate::recording::coordinator::RecordingCoordinator;
use crate::render::render_thread::FrameRenderThread;
use crate::session::pipeline::{
    ConnectionListener, Dispatcher, EncoderOutput, EventSink, FpsMeter, PipelineMessage,
};
use crate::session::retry::{RetryPolicy, RetryPredicate, RetryWorker};
use crate::session::state_machine::{
    Consumer, SessionStateMachine, StartAction, StopAction, Transition,
};
use crate::storage::metadata;
use crate::traits::audio_device::{AudioDevice, AudioEffect};
use crate::traits::camera_source::CameraSource;
use crate::traits::encoder::{AudioEncoder, VideoEncoder};
use crate::traits::gpu::{FilterRender, RendererKind, SharedGpuContextFactory};
use crate::traits::renderer::{PhotoCallback, Renderer};
use crate::traits::sinks::{NetworkStreamer, RecordWriter};

/// Capacity of the caller's event channel.
const EVENT_CAPACITY: usize = 256;

/// Platform collaborators handed to a [`SessionController`].
pub struct SessionComponents {
    pub camera: Box<dyn CameraSource>,
    pub video_encoder: Box<dyn VideoEncoder>,
    pub audio_encoder: Box<dyn AudioEncoder>,
    pub microphone: Box<dyn AudioDevice>,
    pub writer: Box<dyn RecordWriter>,
    pub streamer: Box<dyn NetworkStreamer>,
}

/// How camera frames reach the encoder.
#[derive(Clone)]
pub enum RenderMode {
    /// Render thread drawing to a visible preview.
    OnScreen(SharedGpuContextFactory),
    /// Render thread with an offscreen preview; runs without any UI.
    OffScreen(SharedGpuContextFactory),
    /// No render thread: the camera writes straight into the encoder surface.
    Passthrough { background: bool },
}

impl RenderMode {
    /// Background sessions close the camera when encoding stops and never
    /// show a preview on their own.
    pub fn is_background(&self) -> bool {
        match self {
            Self::OnScreen(_) => false,
            Self::OffScreen(_) => true,
            Self::Passthrough { background } => *background,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Self::OnScreen(_) => "on-screen",
            Self::OffScreen(_) => "off-screen",
            Self::Passthrough { .. } => "passthrough",
        }
    }

    fn build_renderer(&self, teardown: &TeardownConfig) -> Option<Box<dyn Renderer>> {
        let (kind, factory) = match self {
            Self::OnScreen(factory) => (RendererKind::OnScreen, factory),
            Self::OffScreen(factory) => (RendererKind::OffScreen, factory),
            Self::Passthrough { .. } => return None,
        };
        let renderer = FrameRenderThread::new(kind, Arc::clone(factory))
            .with_timeouts(teardown.render_join_timeout(), teardown.binding_ack_timeout());
        Some(Box::new(renderer))
    }
}

/// State guarded by the controller's operation lock.
///
/// Every start/stop/retry path runs with this lock held. Lock order is
/// operations → state machine → recorder / streamer / audio encoder.
struct Inner {
    camera: Box<dyn CameraSource>,
    video_encoder: Box<dyn VideoEncoder>,
    renderer: Option<Box<dyn Renderer>>,
    background: bool,
    /// The host asked for a preview; it survives encoder teardown.
    preview_requested: bool,
    config: SessionConfig,
    video_config: Option<VideoConfig>,
    audio_config: Option<AudioConfig>,
    camera_size: Option<(u32, u32)>,
    facing: CameraFacing,
    stream_url: Option<String>,
    retry: Option<RetryWorker>,

    state: Arc<Mutex<SessionStateMachine>>,
    recorder: Arc<Mutex<RecordingCoordinator>>,
    streamer: Arc<Mutex<Box<dyn NetworkStreamer>>>,
    /// Units flow to the streamer only while set; written under the
    /// streamer lock.
    stream_open: Arc<AtomicBool>,
    audio_encoder: Arc<Mutex<Box<dyn AudioEncoder>>>,
    microphone: Arc<AudioCaptureLoop>,
    parameter_sets: Arc<Mutex<Option<ParameterSets>>>,
    retry_policy: Arc<Mutex<RetryPolicy>>,
    events: EventSink,
}

/// Top-level orchestrator of one capture session.
///
/// Owns the camera, both encoders, the microphone loop, the optional render
/// thread, the recorder and the streamer. Recording and streaming share the
/// encoders: the first consumer to start bootstraps the pipeline and the
/// last one to stop tears it down.
///
/// All methods take `&self`; the controller can be shared across threads.
pub struct SessionController {
    ops: Arc<Mutex<Inner>>,
    state: Arc<Mutex<SessionStateMachine>>,
    recorder: Arc<Mutex<RecordingCoordinator>>,
    streamer: Arc<Mutex<Box<dyn NetworkStreamer>>>,
    microphone: Arc<AudioCaptureLoop>,
    retry_policy: Arc<Mutex<RetryPolicy>>,
    events_rx: Receiver<SessionEvent>,
    pipeline_tx: Sender<PipelineMessage>,
    dispatch: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        components: SessionComponents,
        mode: RenderMode,
        config: SessionConfig,
    ) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::Config)?;

        let SessionComponents {
            camera,
            mut video_encoder,
            mut audio_encoder,
            microphone,
            writer,
            mut streamer,
        } = components;

        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_CAPACITY);
        let (pipeline_tx, pipeline_rx) = crossbeam_channel::unbounded();
        let events = EventSink::new(events_tx);

        video_encoder.set_output(EncoderOutput::new(pipeline_tx.clone()));
        audio_encoder.set_output(EncoderOutput::new(pipeline_tx.clone()));
        streamer.set_listener(ConnectionListener::new(pipeline_tx.clone()));

        let microphone = Arc::new(
            AudioCaptureLoop::new(microphone).with_join_timeout(config.teardown.audio_join_timeout()),
        );
        let loss_tx = pipeline_tx.clone();
        microphone.set_loss_listener(Arc::new(move |error| {
            let _ = loss_tx.send(PipelineMessage::MicrophoneLost(error.clone()));
        }));

        let mut recorder = RecordingCoordinator::new(writer);
        recorder.set_event_sender(events.sender());

        let state = Arc::new(Mutex::new(SessionStateMachine::new()));
        let recorder = Arc::new(Mutex::new(recorder));
        let streamer = Arc::new(Mutex::new(streamer));
        let parameter_sets = Arc::new(Mutex::new(None));
        let retry_policy = Arc::new(Mutex::new(RetryPolicy::new(&config.retry)));
        let stream_open = Arc::new(AtomicBool::new(false));

        let dispatcher = Dispatcher {
            stream_open: Arc::clone(&stream_open),
            recorder: Arc::clone(&recorder),
            streamer: Arc::clone(&streamer),
            parameter_sets: Arc::clone(&parameter_sets),
            retry_policy: Arc::clone(&retry_policy),
            events: events.clone(),
            fps: FpsMeter::new(),
        };
        let dispatch = thread::Builder::new()
            .name("session-dispatch".into())
            .spawn(move || dispatcher.run(pipeline_rx))
            .map_err(|e| CaptureError::Unknown(format!("failed to spawn dispatch thread: {}", e)))?;

        let inner = Inner {
            camera,
            video_encoder,
            renderer: mode.build_renderer(&config.teardown),
            background: mode.is_background(),
            preview_requested: false,
            config,
            video_config: None,
            audio_config: None,
            camera_size: None,
            facing: CameraFacing::default(),
            stream_url: None,
            retry: None,
            state: Arc::clone(&state),
            recorder: Arc::clone(&recorder),
            streamer: Arc::clone(&streamer),
            stream_open,
            audio_encoder: Arc::new(Mutex::new(audio_encoder)),
            microphone: Arc::clone(&microphone),
            parameter_sets,
            retry_policy: Arc::clone(&retry_policy),
            events,
        };

        Ok(Self {
            ops: Arc::new(Mutex::new(inner)),
            state,
            recorder,
            streamer,
            microphone,
            retry_policy,
            events_rx,
            pipeline_tx,
            dispatch: Mutex::new(Some(dispatch)),
        })
    }

    /// Receiver for session events. Every clone competes for the same events.
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events_rx.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().state()
    }

    pub fn is_streaming(&self) -> bool {
        self.state().is_streaming()
    }

    pub fn is_recording(&self) -> bool {
        self.state().is_recording()
    }

    // --- Configuration ---

    pub fn prepare_video(&self, config: VideoConfig) -> Result<(), CaptureError> {
        self.ops.lock().prepare_video(config)
    }

    pub fn prepare_audio(&self, config: AudioConfig) -> Result<(), CaptureError> {
        self.ops.lock().prepare_audio(config)
    }

    /// Prepare both encoders from the session's [`SessionConfig`].
    pub fn prepare_from_config(&self) -> Result<(), CaptureError> {
        let mut inner = self.ops.lock();
        let (video, audio) = (inner.config.video.clone(), inner.config.audio.clone());
        inner.prepare_video(video)?;
        inner.prepare_audio(audio)
    }

    // --- Streaming ---

    pub fn start_stream(&self, url: &str) -> Result<(), CaptureError> {
        self.ops.lock().start_stream(url)
    }

    pub fn stop_stream(&self) {
        self.ops.lock().stop_stream();
    }

    /// Accept or refuse a reconnection for `reason`. When accepted, the
    /// encoder surface is refreshed now and the streamer reconnects after
    /// `delay`.
    pub fn retry(&self, delay: Duration, reason: &str) -> bool {
        let weak = Arc::downgrade(&self.ops);
        self.ops.lock().retry(delay, reason, weak)
    }

    pub fn set_retry_predicate(&self, predicate: RetryPredicate) {
        self.retry_policy.lock().set_predicate(predicate);
    }

    pub fn set_authorization(&self, user: &str, password: &str) {
        self.streamer.lock().set_authorization(user, password);
    }

    pub fn stream_stats(&self) -> StreamStats {
        self.streamer.lock().stats()
    }

    // --- Recording ---

    pub fn start_record(&self, path: &Path) -> Result<(), CaptureError> {
        self.ops.lock().start_record(path)
    }

    /// Stop recording. Returns `None` if no recording was active.
    pub fn stop_record(&self) -> Result<Option<RecordingResult>, CaptureError> {
        self.ops.lock().stop_record()
    }

    pub fn pause_record(&self) -> Result<(), CaptureError> {
        let _ops = self.ops.lock();
        self.recorder.lock().pause_record()
    }

    pub fn resume_record(&self) -> Result<(), CaptureError> {
        let _ops = self.ops.lock();
        self.recorder.lock().resume_record()
    }

    pub fn record_status(&self) -> RecordStatus {
        self.recorder.lock().status()
    }

    // --- Preview ---

    pub fn start_preview(
        &self,
        facing: CameraFacing,
        width: u32,
        height: u32,
        rotation: Rotation,
    ) -> Result<(), CaptureError> {
        self.ops.lock().start_preview(facing, width, height, rotation)
    }

    pub fn stop_preview(&self) {
        self.ops.lock().stop_preview();
    }

    /// Swap the rendering backend, keeping whatever is running alive.
    pub fn replace_renderer(&self, mode: RenderMode) -> Result<(), CaptureError> {
        self.ops.lock().replace_renderer(mode)
    }

    // --- Camera ---

    pub fn switch_camera(&self) -> Result<(), CaptureError> {
        let mut inner = self.ops.lock();
        inner.camera.switch_camera()?;
        inner.facing = match inner.facing {
            CameraFacing::Back => CameraFacing::Front,
            CameraFacing::Front => CameraFacing::Back,
        };
        log::info!("Switched to {:?} camera", inner.facing);
        Ok(())
    }

    pub fn camera_facing(&self) -> CameraFacing {
        self.ops.lock().facing
    }

    pub fn set_zoom(&self, level: f32) {
        self.ops.lock().camera.set_zoom(level);
    }

    pub fn zoom(&self) -> f32 {
        self.ops.lock().camera.zoom()
    }

    pub fn max_zoom(&self) -> f32 {
        self.ops.lock().camera.max_zoom()
    }

    pub fn enable_lantern(&self) -> Result<(), CaptureError> {
        self.ops.lock().camera.set_lantern(true)
    }

    pub fn disable_lantern(&self) -> Result<(), CaptureError> {
        self.ops.lock().camera.set_lantern(false)
    }

    // --- Audio ---

    pub fn mute_audio(&self) {
        self.microphone.mute();
    }

    pub fn unmute_audio(&self) {
        self.microphone.unmute();
    }

    pub fn is_audio_muted(&self) -> bool {
        self.microphone.is_muted()
    }

    pub fn set_audio_effect(&self, effect: Arc<dyn AudioEffect>) {
        self.microphone.set_effect(effect);
    }

    // --- Video ---

    pub fn mute_video(&self) -> Result<(), CaptureError> {
        self.ops.lock().with_renderer(|r| r.mute_video())
    }

    pub fn unmute_video(&self) -> Result<(), CaptureError> {
        self.ops.lock().with_renderer(|r| r.unmute_video())
    }

    pub fn is_video_muted(&self) -> bool {
        self.ops
            .lock()
            .renderer
            .as_ref()
            .map_or(false, |r| r.is_video_muted())
    }

    pub fn set_video_bitrate_on_fly(&self, bitrate: u32) {
        let mut inner = self.ops.lock();
        if let Some(config) = inner.video_config.as_mut() {
            config.bitrate = bitrate;
        }
        if inner.video_encoder.is_running() {
            inner.video_encoder.set_bitrate_on_fly(bitrate);
        }
    }

    /// Cap the encoded frame rate without restarting anything.
    pub fn set_limit_fps_on_fly(&self, fps: u32) {
        let mut inner = self.ops.lock();
        if let Some(renderer) = inner.renderer.as_ref() {
            renderer.set_fps(fps);
        }
        inner.video_encoder.set_fps(fps);
    }

    pub fn set_filter(&self, position: usize, filter: Box<dyn FilterRender>) -> Result<(), CaptureError> {
        self.ops.lock().with_renderer(|r| r.set_filter(position, filter))
    }

    pub fn enable_antialiasing(&self, enabled: bool) -> Result<(), CaptureError> {
        self.ops.lock().with_renderer(|r| r.enable_antialiasing(enabled))
    }

    pub fn take_photo(&self, callback: PhotoCallback) -> Result<(), CaptureError> {
        self.ops.lock().with_renderer(|r| r.take_photo(callback))
    }

    pub fn set_stream_rotation(&self, rotation: Rotation) -> Result<(), CaptureError> {
        self.ops.lock().with_renderer(|r| r.set_stream_rotation(rotation))
    }

    pub fn set_stream_flip(&self, horizontal: bool, vertical: bool) -> Result<(), CaptureError> {
        self.ops
            .lock()
            .with_renderer(|r| r.set_stream_flip(horizontal, vertical))
    }

    /// Rotate only the preview; the encoded stream keeps its own rotation.
    pub fn set_preview_rotation(&self, rotation: Rotation) -> Result<(), CaptureError> {
        self.ops.lock().with_renderer(|r| r.set_preview_rotation(rotation))
    }

    pub fn set_preview_flip(&self, horizontal: bool, vertical: bool) -> Result<(), CaptureError> {
        self.ops
            .lock()
            .with_renderer(|r| r.set_preview_flip(horizontal, vertical))
    }

    pub fn render_stats(&self) -> Option<RenderStats> {
        self.ops.lock().renderer.as_ref().map(|r| r.stats())
    }

    /// Stop everything and the dispatch thread. Idempotent; also run on drop.
    pub fn shutdown(&self) {
        let Some(dispatch) = self.dispatch.lock().take() else {
            return;
        };
        self.ops.lock().shutdown();
        let _ = self.pipeline_tx.send(PipelineMessage::Shutdown);
        if dispatch.join().is_err() {
            log::error!("Session dispatch thread panicked");
        }
        log::info!("Session shut down");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn current_state(&self) -> SessionState {
        self.state.lock().state()
    }

    /// Whether the camera and render path stay up once encoding stops.
    fn keeps_preview(&self) -> bool {
        self.preview_requested && !self.background
    }

    fn emit_transition<A>(&self, transition: &Transition<A>) {
        if transition.from != transition.to {
            log::info!("Session state: {:?} -> {:?}", transition.from, transition.to);
            self.events.emit(SessionEvent::StateChanged(transition.to));
        }
    }

    fn emit_state(&self, state: SessionState) {
        self.events.emit(SessionEvent::StateChanged(state));
    }

    fn with_renderer<F>(&self, f: F) -> Result<(), CaptureError>
    where
        F: FnOnce(&dyn Renderer),
    {
        match self.renderer.as_deref() {
            Some(renderer) => {
                f(renderer);
                Ok(())
            }
            None => Err(CaptureError::InvalidState(
                "operation requires a render thread".into(),
            )),
        }
    }

    fn prepare_video(&mut self, config: VideoConfig) -> Result<(), CaptureError> {
        config
            .validate()
            .map_err(CaptureError::UnsupportedConfiguration)?;

        if self.current_state().encoders_active() {
            let same_size = self
                .video_config
                .as_ref()
                .map_or(false, |current| current.resolution() == config.resolution());
            if !same_size {
                return Err(CaptureError::InvalidState(
                    "cannot change the video size while encoding".into(),
                ));
            }
            self.video_encoder.set_bitrate_on_fly(config.bitrate);
            self.video_encoder.set_fps(config.fps);
            if let Some(renderer) = self.renderer.as_ref() {
                renderer.set_fps(config.fps);
            }
            self.video_config = Some(config);
            return Ok(());
        }

        if self.current_state() == SessionState::PreviewOnly
            && self.camera_size != Some(config.resolution())
        {
            log::info!("Preview size differs from the new video size; stopping preview");
            self.stop_preview();
        }

        self.video_encoder.prepare(&config)?;
        log::info!(
            "Video prepared: {}x{}@{} {} bps",
            config.width,
            config.height,
            config.fps,
            config.bitrate
        );
        self.video_config = Some(config);
        Ok(())
    }

    fn prepare_audio(&mut self, config: AudioConfig) -> Result<(), CaptureError> {
        if self.current_state().encoders_active() {
            return Err(CaptureError::InvalidState(
                "cannot reconfigure audio while encoding".into(),
            ));
        }
        self.microphone.configure(&config)?;
        self.audio_encoder
            .lock()
            .prepare(&config, self.microphone.max_input_size())?;
        log::info!(
            "Audio prepared: {} Hz, {} channel(s), {} bps",
            config.sample_rate,
            config.channels(),
            config.bitrate
        );
        self.audio_config = Some(config);
        Ok(())
    }

    fn require_video_config(&self) -> Result<VideoConfig, CaptureError> {
        self.video_config
            .clone()
            .ok_or_else(|| CaptureError::InvalidState("prepare_video must succeed first".into()))
    }

    // --- Stream / record lifecycle ---

    fn start_stream(&mut self, url: &str) -> Result<(), CaptureError> {
        let config = self.require_video_config()?;
        let transition = self.state.lock().begin(Consumer::Stream)?;

        if let Err(e) = self.apply_start(&transition, &config) {
            self.state.lock().restore(transition.from);
            return Err(e);
        }

        self.retry_policy.lock().reset();
        self.stream_url = Some(url.to_string());
        if let Err(e) = self.connect_stream(url) {
            log::error!("Failed to connect to {}: {}", url, e);
            self.stream_url = None;
            let rollback = self.state.lock().end(Consumer::Stream, self.keeps_preview());
            if rollback.action == StopAction::Teardown {
                self.teardown();
            }
            if rollback.to != transition.from {
                self.emit_state(rollback.to);
            }
            return Err(e);
        }

        self.emit_transition(&transition);
        Ok(())
    }

    fn stop_stream(&mut self) {
        if let Some(worker) = self.retry.take() {
            worker.cancel();
        }
        let transition = self.state.lock().end(Consumer::Stream, self.keeps_preview());
        if transition.action == StopAction::NotActive {
            return;
        }

        self.close_stream();
        self.stream_url = None;
        if transition.action == StopAction::Teardown {
            self.teardown();
        }
        self.emit_transition(&transition);
    }

    fn start_record(&mut self, path: &Path) -> Result<(), CaptureError> {
        let config = self.require_video_config()?;
        let transition = self.state.lock().begin(Consumer::Record)?;

        let expect_audio = self.audio_config.is_some();
        if let Err(e) = self.recorder.lock().start_record(path, true, expect_audio) {
            self.state.lock().restore(transition.from);
            return Err(e);
        }

        if let Err(e) = self.apply_start(&transition, &config) {
            let _ = self.recorder.lock().stop_record();
            self.state.lock().restore(transition.from);
            return Err(e);
        }

        self.emit_transition(&transition);
        Ok(())
    }

    fn stop_record(&mut self) -> Result<Option<RecordingResult>, CaptureError> {
        let transition = self.state.lock().end(Consumer::Record, self.keeps_preview());
        if transition.action == StopAction::NotActive {
            return Ok(None);
        }

        let result = self.recorder.lock().stop_record();
        if transition.action == StopAction::Teardown {
            self.teardown();
        }
        self.emit_transition(&transition);

        let result = result?;
        if self.config.write_metadata_sidecar {
            if let Err(e) = metadata::write_metadata(&result.metadata, &result.file_path) {
                log::error!("Failed to write metadata sidecar: {}", e);
                self.events.emit(SessionEvent::Error(e));
            }
        }
        self.events.emit(SessionEvent::RecordingFinished(result.clone()));
        Ok(Some(result))
    }

    fn apply_start(
        &mut self,
        transition: &Transition<StartAction>,
        config: &VideoConfig,
    ) -> Result<(), CaptureError> {
        match transition.action {
            StartAction::Bootstrap => self.bootstrap(config),
            StartAction::RebindEncoderSurface => self.rebind_encoder_surface(),
        }
    }

    fn connect_stream(&self, url: &str) -> Result<(), CaptureError> {
        let mut streamer = self.streamer.lock();
        streamer.connect(url)?;
        self.stream_open.store(true, Ordering::SeqCst);
        if let Some(sets) = self.parameter_sets.lock().as_ref() {
            streamer.send_parameter_sets(sets);
        }
        log::info!("Connecting to {}", url);
        Ok(())
    }

    fn close_stream(&self) {
        let mut streamer = self.streamer.lock();
        self.stream_open.store(false, Ordering::SeqCst);
        streamer.disconnect();
    }

    /// Start encoders, render path, microphone and camera, in that order.
    /// Anything already started is torn down again on failure.
    fn bootstrap(&mut self, config: &VideoConfig) -> Result<(), CaptureError> {
        let result = self.try_bootstrap(config);
        if let Err(e) = &result {
            log::error!("Pipeline bootstrap failed: {}", e);
            self.teardown();
            if !self.camera.is_running() {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.stop();
                }
            }
        }
        result
    }

    fn try_bootstrap(&mut self, config: &VideoConfig) -> Result<(), CaptureError> {
        self.video_encoder.start()?;
        let with_audio = self.audio_config.is_some();
        if with_audio {
            self.audio_encoder.lock().start()?;
        }
        log::info!("Encoders started");

        self.start_render_path(config)?;

        if with_audio {
            let encoder = Arc::clone(&self.audio_encoder);
            let sink: FrameSink = Arc::new(move |frame| encoder.lock().input_pcm(frame));
            self.microphone.start(sink)?;
        }

        self.open_camera_for(config)
    }

    fn encoder_surface(&self) -> Result<EncoderSurface, CaptureError> {
        self.video_encoder
            .input_surface()
            .ok_or_else(|| CaptureError::Encoder("video encoder has no input surface".into()))
    }

    fn start_render_path(&mut self, config: &VideoConfig) -> Result<(), CaptureError> {
        let surface = self.encoder_surface()?;
        let Some(renderer) = self.renderer.as_mut() else {
            self.camera.prepare_surface(Some(surface));
            return Ok(());
        };

        let (width, height) = config.encoder_surface_size();
        renderer.set_encoder_size(width, height);
        renderer.set_fps(config.fps);
        let fresh = !renderer.is_running();
        if fresh {
            renderer.init();
            renderer.start()?;
            renderer.set_camera_rotation(config.rotation.camera_texture_rotation());
        }
        // The camera is about to be (re)opened: either the texture is new or
        // the camera runs at another size.
        if fresh || self.camera_size != Some(config.resolution()) {
            let texture = renderer.camera_texture().ok_or_else(|| {
                CaptureError::Render("render thread has no camera texture".into())
            })?;
            self.camera
                .prepare_texture(texture, config.width, config.height);
            if fresh && self.camera.is_running() {
                self.camera.close();
                self.camera_size = None;
            }
        }
        renderer.add_encoder_binding(surface);
        Ok(())
    }

    /// Open the camera unless it already runs at the target resolution.
    fn open_camera_for(&mut self, config: &VideoConfig) -> Result<(), CaptureError> {
        let target = config.resolution();
        let passthrough = self.renderer.is_none();
        let running_at_target = self.camera.is_running() && self.camera_size == Some(target);

        if running_at_target && !passthrough {
            return Ok(());
        }
        if self.camera.is_running() {
            // Passthrough sessions must restart the capture request to include
            // the encoder surface.
            self.camera.close();
            self.camera.open_last()?;
        } else {
            self.camera.open(self.facing)?;
        }
        self.camera_size = Some(target);
        log::info!("Camera opened at {}x{}", target.0, target.1);
        Ok(())
    }

    /// Swap the encoder surface so a new consumer starts on a fresh key frame.
    fn rebind_encoder_surface(&mut self) -> Result<(), CaptureError> {
        match self.renderer.as_ref() {
            Some(renderer) => {
                renderer.remove_encoder_binding();
                self.video_encoder.reset()?;
                renderer.add_encoder_binding(self.encoder_surface()?);
            }
            None => {
                self.camera.close();
                self.video_encoder.reset()?;
                let surface = self.encoder_surface()?;
                self.camera.prepare_surface(Some(surface));
                self.camera.open_last()?;
            }
        }
        log::debug!("Encoder surface rebound");
        Ok(())
    }

    /// Tear down the shared pipeline once the last consumer is gone.
    fn teardown(&mut self) {
        self.microphone.stop();
        if let Some(renderer) = self.renderer.as_ref() {
            renderer.remove_encoder_binding();
        }

        if !self.keeps_preview() {
            if let Some(renderer) = self.renderer.as_mut() {
                renderer.stop();
            }
            self.camera.close();
            self.camera_size = None;
        } else if self.renderer.is_none() {
            self.camera.stop_repeating_encoder();
        }

        self.video_encoder.stop();
        self.audio_encoder.lock().stop();
        self.recorder.lock().reset_formats();
        *self.parameter_sets.lock() = None;
        log::info!("Encoders stopped");
    }

    fn retry(&mut self, delay: Duration, reason: &str, ops: Weak<Mutex<Inner>>) -> bool {
        if !self.current_state().is_streaming() {
            return false;
        }
        let Some(url) = self.stream_url.clone() else {
            return false;
        };
        if !self.retry_policy.lock().should_retry(reason) {
            return false;
        }

        if let Some(previous) = self.retry.take() {
            previous.cancel();
        }
        if let Err(e) = self.rebind_encoder_surface() {
            log::error!("Failed to rebind encoder surface for retry: {}", e);
        }

        let spawned = RetryWorker::spawn(delay, move |token| {
            let Some(ops) = ops.upgrade() else {
                return;
            };
            let mut inner = ops.lock();
            if token.is_cancelled() || !inner.current_state().is_streaming() {
                return;
            }
            inner.close_stream();
            if let Err(e) = inner.connect_stream(&url) {
                log::error!("Reconnect to {} failed: {}", url, e);
                inner.events.emit(SessionEvent::Error(e));
            }
        });

        match spawned {
            Ok(worker) => {
                log::info!("Retrying stream in {:?} ({})", delay, reason);
                self.retry = Some(worker);
                true
            }
            Err(e) => {
                log::error!("{}", e);
                false
            }
        }
    }

    // --- Preview ---

    fn start_preview(
        &mut self,
        facing: CameraFacing,
        width: u32,
        height: u32,
        rotation: Rotation,
    ) -> Result<(), CaptureError> {
        if self.background {
            log::debug!("Preview ignored for a background session");
            return Ok(());
        }
        let state = self.current_state();
        if state.encoders_active() {
            self.preview_requested = true;
            return Ok(());
        }
        if state == SessionState::PreviewOnly
            && self.camera.is_running()
            && self.camera_size == Some((width, height))
            && self.facing == facing
        {
            return Ok(());
        }

        match self.renderer.as_mut() {
            Some(renderer) => {
                if !renderer.is_running() {
                    renderer.init();
                    renderer.set_preview_size(width, height);
                    renderer.set_encoder_size(width, height);
                    renderer.start()?;
                }
                renderer.set_camera_rotation(rotation.camera_texture_rotation());
                let texture = renderer.camera_texture().ok_or_else(|| {
                    CaptureError::Render("render thread has no camera texture".into())
                })?;
                self.camera.prepare_texture(texture, width, height);
            }
            None => self.camera.prepare_surface(None),
        }

        if self.camera.is_running() {
            self.camera.close();
        }
        self.facing = facing;
        if let Err(e) = self.camera.open(facing) {
            if let Some(renderer) = self.renderer.as_mut() {
                renderer.stop();
            }
            return Err(e);
        }
        self.camera_size = Some((width, height));
        self.preview_requested = true;

        if self.state.lock().start_preview() {
            self.emit_state(SessionState::PreviewOnly);
        }
        log::info!("Preview started at {}x{}", width, height);
        Ok(())
    }

    fn stop_preview(&mut self) {
        self.preview_requested = false;
        if self.current_state() != SessionState::PreviewOnly {
            return;
        }
        self.camera.close();
        self.camera_size = None;
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.stop();
        }
        if self.state.lock().stop_preview() {
            self.emit_state(SessionState::Idle);
        }
        log::info!("Preview stopped");
    }

    fn replace_renderer(&mut self, mode: RenderMode) -> Result<(), CaptureError> {
        let state = self.current_state();
        let replacement = mode.build_renderer(&self.config.teardown);

        if state.is_idle() {
            if let Some(mut old) = self.renderer.take() {
                old.stop();
            }
            self.renderer = replacement;
            self.background = mode.is_background();
            return Ok(());
        }

        let (Some(mut renderer), true) = (replacement, self.renderer.is_some()) else {
            return Err(CaptureError::UnsupportedConfiguration(
                "switching between rendered and passthrough paths requires an idle session".into(),
            ));
        };

        let (width, height) = match (&self.video_config, self.camera_size) {
            (Some(config), _) if state.encoders_active() => config.encoder_surface_size(),
            (_, Some(size)) => size,
            (Some(config), None) => config.encoder_surface_size(),
            (None, None) => (1, 1),
        };
        let rotation = self
            .video_config
            .as_ref()
            .map(|c| c.rotation)
            .unwrap_or_default();

        let surface = if state.encoders_active() {
            Some(self.encoder_surface()?)
        } else {
            None
        };

        // The replacement must be up before the running path is touched; a
        // failure here leaves the old renderer and camera as they were.
        renderer.init();
        renderer.set_preview_size(width, height);
        renderer.set_encoder_size(width, height);
        if let Some(config) = &self.video_config {
            renderer.set_fps(config.fps);
        }
        renderer.start()?;
        renderer.set_camera_rotation(rotation.camera_texture_rotation());
        let Some(texture) = renderer.camera_texture() else {
            renderer.stop();
            return Err(CaptureError::Render("render thread has no camera texture".into()));
        };

        if let Some(mut old) = self.renderer.take() {
            old.remove_encoder_binding();
            old.stop();
        }
        self.camera.close();
        let (cam_w, cam_h) = self.camera_size.unwrap_or((width, height));
        self.camera.prepare_texture(texture, cam_w, cam_h);
        if let Some(surface) = surface {
            renderer.add_encoder_binding(surface);
        }
        self.renderer = Some(renderer);
        self.background = mode.is_background();
        if let Err(e) = self.camera.open_last() {
            log::error!("Camera did not reopen on the new render backend: {}", e);
            self.camera_size = None;
            return Err(e);
        }
        log::info!("Render backend replaced ({})", mode.kind_name());
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(worker) = self.retry.take() {
            worker.cancel();
        }
        self.preview_requested = false;
        self.stop_stream();
        match self.stop_record() {
            Ok(_) => {}
            Err(e) => log::error!("Failed to finalize recording on shutdown: {}", e),
        }
        // Any preview left running, whatever the mode.
        if self.camera.is_running() {
            self.camera.close();
        }
        self.camera_size = None;
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.stop();
        }
        self.microphone.stop();
        if self.state.lock().stop_preview() {
            self.emit_state(SessionState::Idle);
        }
    }
}
