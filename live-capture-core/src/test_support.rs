//! Mock collaborators shared by the unit tests. Each mock is a cheap handle
//! over shared state, so a test keeps a clone to inspect calls after handing
//! the original to the code under test.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::config::{AudioConfig, VideoConfig};
use crate::models::error::CaptureError;
use crate::models::events::{ConnectionEvent, StreamStats};
use crate::models::media::{EncodedUnit, Frame, MediaKind, ParameterSets, TrackFormat};
use crate::models::render::{DrawParams, EncoderSurface, RenderTarget, Rotation, StillImage};
use crate::models::state::CameraFacing;
use crate::session::controller::SessionComponents;
use crate::session::pipeline::{ConnectionListener, EncoderOutput};
use crate::traits::audio_device::AudioDevice;
use crate::traits::camera_source::{CameraSource, CameraTexture};
use crate::traits::encoder::{AudioEncoder, VideoEncoder};
use crate::traits::gpu::{FilterRender, GpuContext, GpuContextFactory, RendererKind};
use crate::traits::sinks::{NetworkStreamer, RecordWriter};

/// Poll `condition` every millisecond until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

pub fn video_format() -> TrackFormat {
    TrackFormat::Video {
        codec: "video/avc".into(),
        width: 1280,
        height: 720,
        fps: 30,
    }
}

pub fn audio_format() -> TrackFormat {
    TrackFormat::Audio {
        codec: "audio/mp4a-latm".into(),
        sample_rate: 44100,
        channels: 2,
    }
}

pub fn parameter_sets() -> ParameterSets {
    ParameterSets {
        sps: vec![0x67, 0x42],
        pps: vec![0x68, 0xce],
        vps: None,
    }
}

// --- GPU ---

#[derive(Debug, Clone, PartialEq)]
pub enum GpuOp {
    Created,
    MakeCurrent(RenderTarget),
    UpdateTexture,
    Draw(RenderTarget, DrawParams),
    Swap(RenderTarget),
    AttachEncoderSurface(u64),
    ReleaseEncoderSurface,
    ReadPixels(RenderTarget),
    SetFilter(String),
    Antialiasing(bool),
    CameraRotation(Rotation),
    CameraFlip(bool, bool),
    Released,
}

#[derive(Clone, Default)]
pub struct MockGpuFactory {
    ops: Arc<Mutex<Vec<GpuOp>>>,
    draw_delay: Arc<Mutex<Duration>>,
    fail: bool,
}

impl MockGpuFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Make every preview draw block for `delay`.
    pub fn set_draw_delay(&self, delay: Duration) {
        *self.draw_delay.lock() = delay;
    }

    pub fn ops(&self) -> Vec<GpuOp> {
        self.ops.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&GpuOp) -> bool) -> usize {
        self.ops.lock().iter().filter(|op| predicate(op)).count()
    }
}

impl GpuContextFactory for MockGpuFactory {
    fn create(
        &self,
        _kind: RendererKind,
        _width: u32,
        _height: u32,
    ) -> Result<Box<dyn GpuContext>, CaptureError> {
        if self.fail {
            return Err(CaptureError::Render("no EGL display".into()));
        }
        self.ops.lock().push(GpuOp::Created);
        Ok(Box::new(MockGpu {
            ops: Arc::clone(&self.ops),
            draw_delay: Arc::clone(&self.draw_delay),
        }))
    }
}

struct MockGpu {
    ops: Arc<Mutex<Vec<GpuOp>>>,
    draw_delay: Arc<Mutex<Duration>>,
}

impl MockGpu {
    fn record(&self, op: GpuOp) {
        self.ops.lock().push(op);
    }
}

impl GpuContext for MockGpu {
    fn camera_texture_id(&self) -> u32 {
        7
    }

    fn make_current(&mut self, target: RenderTarget) -> Result<(), CaptureError> {
        self.record(GpuOp::MakeCurrent(target));
        Ok(())
    }

    fn update_texture(&mut self) -> Result<(), CaptureError> {
        self.record(GpuOp::UpdateTexture);
        Ok(())
    }

    fn draw(&mut self, target: RenderTarget, params: &DrawParams) -> Result<(), CaptureError> {
        let delay = *self.draw_delay.lock();
        if target == RenderTarget::Preview && !delay.is_zero() {
            thread::sleep(delay);
        }
        self.record(GpuOp::Draw(target, *params));
        Ok(())
    }

    fn swap_buffers(&mut self, target: RenderTarget) -> Result<(), CaptureError> {
        self.record(GpuOp::Swap(target));
        Ok(())
    }

    fn attach_encoder_surface(&mut self, surface: &EncoderSurface) -> Result<(), CaptureError> {
        self.record(GpuOp::AttachEncoderSurface(surface.id));
        Ok(())
    }

    fn release_encoder_surface(&mut self) {
        self.record(GpuOp::ReleaseEncoderSurface);
    }

    fn read_pixels(
        &mut self,
        target: RenderTarget,
        width: u32,
        height: u32,
    ) -> Result<StillImage, CaptureError> {
        self.record(GpuOp::ReadPixels(target));
        Ok(StillImage {
            width,
            height,
            rgba: vec![0; (width * height * 4) as usize],
        })
    }

    fn set_filter(&mut self, _position: usize, filter: Box<dyn FilterRender>) {
        self.record(GpuOp::SetFilter(filter.name().to_string()));
    }

    fn set_antialiasing(&mut self, enabled: bool) {
        self.record(GpuOp::Antialiasing(enabled));
    }

    fn set_camera_rotation(&mut self, rotation: Rotation) {
        self.record(GpuOp::CameraRotation(rotation));
    }

    fn set_camera_flip(&mut self, horizontal: bool, vertical: bool) {
        self.record(GpuOp::CameraFlip(horizontal, vertical));
    }

    fn release(&mut self) {
        self.record(GpuOp::Released);
    }
}

pub struct NamedFilter(pub String);

impl FilterRender for NamedFilter {
    fn name(&self) -> &str {
        &self.0
    }
}

// --- Camera ---

#[derive(Debug, Default)]
pub struct CameraState {
    pub opens: usize,
    pub closes: usize,
    pub running: bool,
    pub facing: CameraFacing,
    pub texture: Option<CameraTexture>,
    pub texture_size: Option<(u32, u32)>,
    pub encoder_surface: Option<EncoderSurface>,
    pub stop_repeating: usize,
    pub switches: usize,
    pub zoom: f32,
    pub lantern: bool,
    pub fail_open: bool,
}

#[derive(Clone, Default)]
pub struct MockCamera {
    state: Arc<Mutex<CameraState>>,
}

impl MockCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<Mutex<CameraState>> {
        Arc::clone(&self.state)
    }

    /// Simulate the camera writing a frame into the render texture.
    pub fn push_frame(&self) -> bool {
        match &self.state.lock().texture {
            Some(texture) => {
                texture.notify_frame_available();
                true
            }
            None => false,
        }
    }
}

impl CameraSource for MockCamera {
    fn prepare_texture(&mut self, texture: CameraTexture, width: u32, height: u32) {
        let mut state = self.state.lock();
        state.texture = Some(texture);
        state.texture_size = Some((width, height));
    }

    fn prepare_surface(&mut self, encoder: Option<EncoderSurface>) {
        self.state.lock().encoder_surface = encoder;
    }

    fn open(&mut self, facing: CameraFacing) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(CaptureError::DeviceUnavailable("camera in use".into()));
        }
        state.opens += 1;
        state.running = true;
        state.facing = facing;
        Ok(())
    }

    fn open_last(&mut self) -> Result<(), CaptureError> {
        let facing = self.state.lock().facing;
        self.open(facing)
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        if state.running {
            state.closes += 1;
        }
        state.running = false;
    }

    fn stop_repeating_encoder(&mut self) {
        let mut state = self.state.lock();
        state.stop_repeating += 1;
        state.encoder_surface = None;
    }

    fn switch_camera(&mut self) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        state.switches += 1;
        state.facing = match state.facing {
            CameraFacing::Back => CameraFacing::Front,
            CameraFacing::Front => CameraFacing::Back,
        };
        Ok(())
    }

    fn set_zoom(&mut self, level: f32) {
        self.state.lock().zoom = level.clamp(1.0, 8.0);
    }

    fn zoom(&self) -> f32 {
        self.state.lock().zoom
    }

    fn max_zoom(&self) -> f32 {
        8.0
    }

    fn set_lantern(&mut self, enabled: bool) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        if state.facing == CameraFacing::Front && enabled {
            return Err(CaptureError::DeviceUnavailable("front camera has no flash".into()));
        }
        state.lantern = enabled;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }
}

// --- Encoders ---

#[derive(Debug, Default)]
pub struct VideoEncoderState {
    pub prepares: usize,
    pub starts: usize,
    pub stops: usize,
    pub resets: usize,
    pub running: bool,
    pub config: Option<VideoConfig>,
    pub surface_id: u64,
    pub bitrate: u32,
    pub fps: u32,
    pub fail_prepare: bool,
    pub output: Option<EncoderOutput>,
}

#[derive(Clone, Default)]
pub struct MockVideoEncoder {
    state: Arc<Mutex<VideoEncoderState>>,
}

impl MockVideoEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<Mutex<VideoEncoderState>> {
        Arc::clone(&self.state)
    }

    /// Emit an encoded video unit as the codec callback would.
    pub fn emit(&self, pts_us: i64, key_frame: bool) {
        let output = self.state.lock().output.clone();
        if let Some(output) = output {
            output.unit(EncodedUnit::video(vec![0, 0, 0, 1, 0x65], pts_us, key_frame));
        }
    }
}

impl VideoEncoder for MockVideoEncoder {
    fn set_output(&mut self, output: EncoderOutput) {
        self.state.lock().output = Some(output);
    }

    fn prepare(&mut self, config: &VideoConfig) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        if state.fail_prepare {
            return Err(CaptureError::UnsupportedConfiguration(
                "no encoder for this profile".into(),
            ));
        }
        state.prepares += 1;
        state.config = Some(config.clone());
        state.bitrate = config.bitrate;
        state.fps = config.fps;
        state.surface_id = 1;
        Ok(())
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        state.starts += 1;
        state.running = true;
        if let Some(output) = &state.output {
            output.format(video_format());
            output.parameter_sets(parameter_sets());
        }
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        if state.running {
            state.stops += 1;
        }
        state.running = false;
    }

    fn reset(&mut self) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        state.resets += 1;
        state.surface_id += 1;
        Ok(())
    }

    fn input_surface(&self) -> Option<EncoderSurface> {
        let state = self.state.lock();
        let config = state.config.as_ref()?;
        let (width, height) = config.encoder_surface_size();
        Some(EncoderSurface::new(state.surface_id, width, height))
    }

    fn set_bitrate_on_fly(&mut self, bitrate: u32) {
        self.state.lock().bitrate = bitrate;
    }

    fn set_fps(&mut self, fps: u32) {
        self.state.lock().fps = fps;
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }
}

#[derive(Debug, Default)]
pub struct AudioEncoderState {
    pub prepares: usize,
    pub starts: usize,
    pub stops: usize,
    pub running: bool,
    pub max_input_size: usize,
    pub frames: usize,
    pub muted_frames: usize,
    pub output: Option<EncoderOutput>,
}

#[derive(Clone, Default)]
pub struct MockAudioEncoder {
    state: Arc<Mutex<AudioEncoderState>>,
}

impl MockAudioEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<Mutex<AudioEncoderState>> {
        Arc::clone(&self.state)
    }

    pub fn emit(&self, pts_us: i64) {
        let output = self.state.lock().output.clone();
        if let Some(output) = output {
            output.unit(EncodedUnit::audio(vec![0x21, 0x10], pts_us));
        }
    }
}

impl AudioEncoder for MockAudioEncoder {
    fn set_output(&mut self, output: EncoderOutput) {
        self.state.lock().output = Some(output);
    }

    fn prepare(&mut self, _config: &AudioConfig, max_input_size: usize) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        state.prepares += 1;
        state.max_input_size = max_input_size;
        Ok(())
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        state.starts += 1;
        state.running = true;
        if let Some(output) = &state.output {
            output.format(audio_format());
        }
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        if state.running {
            state.stops += 1;
        }
        state.running = false;
    }

    fn input_pcm(&mut self, frame: Frame) {
        let mut state = self.state.lock();
        state.frames += 1;
        if frame.is_muted() {
            state.muted_frames += 1;
        }
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }
}

// --- Microphone ---

#[derive(Debug, Default)]
pub struct MicState {
    pub opens: usize,
    pub starts: usize,
    pub releases: usize,
    pub reads: usize,
    pub open: bool,
    pub fill: u8,
    pub fail_open: bool,
    pub end_after: Option<usize>,
}

#[derive(Clone, Default)]
pub struct MockAudioDevice {
    state: Arc<Mutex<MicState>>,
}

impl MockAudioDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<Mutex<MicState>> {
        Arc::clone(&self.state)
    }

    pub fn set_fill(&self, byte: u8) {
        self.state.lock().fill = byte;
    }

    pub fn fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Deliver `reads` buffers, then report the device gone.
    pub fn end_after(&self, reads: usize) {
        self.state.lock().end_after = Some(reads);
    }
}

impl AudioDevice for MockAudioDevice {
    fn open(&mut self, _config: &AudioConfig) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(CaptureError::Unknown("AudioRecord init failed".into()));
        }
        state.opens += 1;
        state.open = true;
        Ok(())
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        self.state.lock().starts += 1;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, CaptureError> {
        thread::sleep(Duration::from_millis(2));
        let mut state = self.state.lock();
        state.reads += 1;
        if state.end_after.map_or(false, |limit| state.reads > limit) {
            return Ok(0);
        }
        buffer.fill(state.fill);
        Ok(buffer.len())
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        state.releases += 1;
        state.open = false;
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

// --- Sinks ---

#[derive(Debug, Default)]
pub struct WriterState {
    pub started: Vec<PathBuf>,
    pub tracks: Vec<TrackFormat>,
    pub units: Vec<EncodedUnit>,
    pub stops: usize,
    pub active: bool,
    pub fail_start: bool,
}

#[derive(Clone, Default)]
pub struct MockRecordWriter {
    state: Arc<Mutex<WriterState>>,
}

impl MockRecordWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_start(&self, fail: bool) {
        self.state.lock().fail_start = fail;
    }

    pub fn tracks(&self) -> Vec<TrackFormat> {
        self.state.lock().tracks.clone()
    }

    pub fn units(&self) -> Vec<EncodedUnit> {
        self.state.lock().units.clone()
    }

    pub fn stops(&self) -> usize {
        self.state.lock().stops
    }

    pub fn started(&self) -> Vec<PathBuf> {
        self.state.lock().started.clone()
    }
}

impl RecordWriter for MockRecordWriter {
    fn start(&mut self, path: &Path) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        if state.fail_start {
            return Err(CaptureError::Io(format!("{} is read-only", path.display())));
        }
        if state.active {
            return Err(CaptureError::Io("writer already active".into()));
        }
        state.active = true;
        state.tracks.clear();
        state.started.push(path.to_path_buf());
        Ok(())
    }

    fn add_track(&mut self, format: &TrackFormat) -> Result<(), CaptureError> {
        self.state.lock().tracks.push(format.clone());
        Ok(())
    }

    fn write(&mut self, unit: &EncodedUnit) -> Result<(), CaptureError> {
        self.state.lock().units.push(unit.clone());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        state.active = false;
        state.stops += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct StreamerState {
    pub connects: Vec<String>,
    pub disconnects: usize,
    pub sent: Vec<EncodedUnit>,
    pub parameter_sets: Vec<ParameterSets>,
    pub authorization: Option<(String, String)>,
    pub listener: Option<ConnectionListener>,
    pub fail_connect: bool,
    pub connected: bool,
    /// Units or parameter sets handed over while not connected.
    pub unconnected_sends: usize,
}

#[derive(Clone, Default)]
pub struct MockStreamer {
    state: Arc<Mutex<StreamerState>>,
}

impl MockStreamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<Mutex<StreamerState>> {
        Arc::clone(&self.state)
    }

    /// Report a connection event as the client's network thread would.
    pub fn report(&self, event: ConnectionEvent) {
        let listener = self.state.lock().listener.clone();
        if let Some(listener) = listener {
            listener.notify(event);
        }
    }
}

impl NetworkStreamer for MockStreamer {
    fn set_listener(&mut self, listener: ConnectionListener) {
        self.state.lock().listener = Some(listener);
    }

    fn connect(&mut self, url: &str) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        if state.fail_connect || !url.contains("://") {
            return Err(CaptureError::ConnectionFailed(
                "Endpoint malformed, should be rtmp://ip:port/appname/streamname".into(),
            ));
        }
        state.connects.push(url.to_string());
        state.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.state.lock();
        state.disconnects += 1;
        state.connected = false;
    }

    fn send_parameter_sets(&mut self, sets: &ParameterSets) {
        let mut state = self.state.lock();
        if !state.connected {
            state.unconnected_sends += 1;
        }
        state.parameter_sets.push(sets.clone());
    }

    fn send(&mut self, unit: &EncodedUnit) {
        let mut state = self.state.lock();
        if !state.connected {
            state.unconnected_sends += 1;
        }
        state.sent.push(unit.clone());
    }

    fn set_authorization(&mut self, user: &str, password: &str) {
        self.state.lock().authorization = Some((user.to_string(), password.to_string()));
    }

    fn stats(&self) -> StreamStats {
        let state = self.state.lock();
        StreamStats {
            sent_video_frames: state.sent.iter().filter(|u| u.kind == MediaKind::Video).count() as u64,
            sent_audio_frames: state.sent.iter().filter(|u| u.kind == MediaKind::Audio).count() as u64,
            ..Default::default()
        }
    }
}

/// Every mock a session needs, with handles kept for inspection.
#[derive(Clone, Default)]
pub struct MockSession {
    pub camera: MockCamera,
    pub video: MockVideoEncoder,
    pub audio: MockAudioEncoder,
    pub mic: MockAudioDevice,
    pub writer: MockRecordWriter,
    pub streamer: MockStreamer,
    pub gpu: MockGpuFactory,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn components(&self) -> SessionComponents {
        SessionComponents {
            camera: Box::new(self.camera.clone()),
            video_encoder: Box::new(self.video.clone()),
            audio_encoder: Box::new(self.audio.clone()),
            microphone: Box::new(self.mic.clone()),
            writer: Box::new(self.writer.clone()),
            streamer: Box::new(self.streamer.clone()),
        }
    }
}
