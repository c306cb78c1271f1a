use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

use crate::models::error::CaptureError;
use crate::models::render::{
    DrawParams, EncoderSurface, RenderBudget, RenderStats, RenderTarget, Rotation, StillImage,
};
use crate::render::fps_limiter::FpsLimiter;
use crate::render::frame_signal::FrameSignal;
use crate::traits::camera_source::CameraTexture;
use crate::traits::gpu::{FilterRender, GpuContext, RendererKind, SharedGpuContextFactory};
use crate::traits::renderer::{PhotoCallback, Renderer};

/// Upper bound on a single idle wait, so a lost wake-up can only stall the
/// loop briefly.
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Requests applied by the render thread between frames.
enum RenderCommand {
    SetFilter {
        position: usize,
        filter: Box<dyn FilterRender>,
    },
    Antialiasing(bool),
    CameraRotation(Rotation),
    CameraFlip(bool, bool),
}

/// Binding state shared between the control API and the draw step.
///
/// The same mutex guards mutation and the encoder draw, so a draw always
/// runs against one consistent snapshot.
struct Bindings {
    preview_size: (u32, u32),
    encoder_size: (u32, u32),
    preview: RenderBudget,
    encoder: RenderBudget,
    limiter: FpsLimiter,
    encoder_surface: Option<EncoderSurface>,
    /// Bumped on every attach/detach request.
    generation: u64,
    /// Last generation the render thread reconciled.
    applied_generation: u64,
    photo: Option<PhotoCallback>,
    thread_alive: bool,
    thread_epoch: u64,
}

impl Bindings {
    fn new() -> Self {
        Self {
            preview_size: (1, 1),
            encoder_size: (640, 480),
            preview: RenderBudget::default(),
            encoder: RenderBudget::default(),
            limiter: FpsLimiter::new(0),
            encoder_surface: None,
            generation: 0,
            applied_generation: 0,
            photo: None,
            thread_alive: false,
            thread_epoch: 0,
        }
    }

    fn mark_thread_gone(&mut self, epoch: u64) {
        if self.thread_epoch == epoch {
            self.thread_alive = false;
            self.applied_generation = self.generation;
        }
    }
}

#[derive(Default)]
struct Counters {
    preview_frames: AtomicU64,
    encoder_frames: AtomicU64,
    skipped_encoder_frames: AtomicU64,
}

struct RenderShared {
    bindings: Mutex<Bindings>,
    applied: Condvar,
    counters: Counters,
}

/// Single-threaded owner of the GPU context.
///
/// The render thread waits on the camera's frame signal, draws every frame to
/// the preview target and, budget permitting, to the encoder target. Callers
/// never draw: they queue requests that the thread applies between frames.
pub struct FrameRenderThread {
    kind: RendererKind,
    factory: SharedGpuContextFactory,
    shared: Arc<RenderShared>,
    commands_tx: Sender<RenderCommand>,
    commands_rx: Receiver<RenderCommand>,
    signal: Arc<FrameSignal>,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    exit_rx: Option<Receiver<()>>,
    texture: Option<CameraTexture>,
    join_timeout: Duration,
    ack_timeout: Duration,
}

impl FrameRenderThread {
    pub fn new(kind: RendererKind, factory: SharedGpuContextFactory) -> Self {
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
        Self {
            kind,
            factory,
            shared: Arc::new(RenderShared {
                bindings: Mutex::new(Bindings::new()),
                applied: Condvar::new(),
                counters: Counters::default(),
            }),
            commands_tx,
            commands_rx,
            signal: Arc::new(FrameSignal::new()),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            exit_rx: None,
            texture: None,
            join_timeout: Duration::from_millis(500),
            ack_timeout: Duration::from_millis(500),
        }
    }

    /// Override the bounded waits used by `stop` and `remove_encoder_binding`.
    pub fn with_timeouts(mut self, join_timeout: Duration, ack_timeout: Duration) -> Self {
        self.join_timeout = join_timeout;
        self.ack_timeout = ack_timeout;
        self
    }

    fn send_command(&self, command: RenderCommand) {
        if self.commands_tx.send(command).is_ok() {
            self.signal.wake();
        }
    }
}

impl Renderer for FrameRenderThread {
    fn kind(&self) -> RendererKind {
        self.kind
    }

    fn init(&mut self) {
        let mut b = self.shared.bindings.lock();
        let fps = b.encoder.fps;
        b.preview = RenderBudget::default();
        b.encoder = RenderBudget {
            fps,
            ..Default::default()
        };
        drop(b);
        let _ = self.commands_tx.send(RenderCommand::CameraFlip(false, false));
    }

    fn set_encoder_size(&mut self, width: u32, height: u32) {
        self.shared.bindings.lock().encoder_size = (width, height);
    }

    fn set_preview_size(&mut self, width: u32, height: u32) {
        self.shared.bindings.lock().preview_size = (width, height);
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        if self.is_running() {
            return Ok(());
        }

        let running = Arc::new(AtomicBool::new(true));
        let signal = Arc::new(FrameSignal::new());
        let epoch = {
            let mut b = self.shared.bindings.lock();
            b.thread_epoch += 1;
            b.thread_alive = true;
            // A fresh context has nothing attached yet.
            if b.encoder_surface.is_some() {
                b.generation += 1;
            } else {
                b.applied_generation = b.generation;
            }
            let fps = b.encoder.fps;
            b.limiter.set_fps(fps);
            b.thread_epoch
        };

        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (exit_tx, exit_rx) = crossbeam_channel::bounded(1);
        let render_loop = RenderLoop {
            kind: self.kind,
            shared: Arc::clone(&self.shared),
            signal: Arc::clone(&signal),
            commands: self.commands_rx.clone(),
            running: Arc::clone(&running),
            attached: None,
            epoch,
        };
        let factory = Arc::clone(&self.factory);

        let handle = thread::Builder::new()
            .name("frame-render".into())
            .spawn(move || {
                render_loop.run(factory, ready_tx);
                let _ = exit_tx.send(());
            })
            .map_err(|e| {
                self.shared.bindings.lock().mark_thread_gone(epoch);
                CaptureError::Unknown(format!("failed to spawn render thread: {}", e))
            })?;

        match ready_rx.recv() {
            Ok(Ok(texture_id)) => {
                self.texture = Some(CameraTexture::new(texture_id, Arc::clone(&signal)));
                self.signal = signal;
                self.running = running;
                self.handle = Some(handle);
                self.exit_rx = Some(exit_rx);
                log::info!("Render thread started ({:?})", self.kind);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                self.shared.bindings.lock().mark_thread_gone(epoch);
                Err(CaptureError::Render(
                    "render thread exited before its context was ready".into(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        self.signal.wake();

        let exited = match self.exit_rx.take() {
            Some(rx) => !matches!(rx.recv_timeout(self.join_timeout), Err(RecvTimeoutError::Timeout)),
            None => true,
        };

        if exited {
            if handle.join().is_err() {
                log::error!("Render thread panicked");
            }
            log::info!("Render thread stopped");
        } else {
            log::warn!(
                "Render thread did not exit within {:?}; interrupting",
                self.join_timeout
            );
            self.signal.close();
            let mut b = self.shared.bindings.lock();
            let epoch = b.thread_epoch;
            b.mark_thread_gone(epoch);
            self.shared.applied.notify_all();
        }
        self.texture = None;
    }

    fn is_running(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::SeqCst)
    }

    fn camera_texture(&self) -> Option<CameraTexture> {
        self.texture.clone()
    }

    fn add_encoder_binding(&self, surface: EncoderSurface) {
        {
            let mut b = self.shared.bindings.lock();
            b.encoder_surface = Some(surface);
            b.generation += 1;
        }
        log::debug!("Encoder binding requested: surface {}", surface.id);
        self.signal.wake();
    }

    fn remove_encoder_binding(&self) {
        let mut b = self.shared.bindings.lock();
        if b.encoder_surface.is_none() && b.applied_generation == b.generation {
            return;
        }
        b.encoder_surface = None;
        b.generation += 1;
        let target = b.generation;

        if !b.thread_alive {
            b.applied_generation = target;
            return;
        }

        self.signal.wake();
        let deadline = Instant::now() + self.ack_timeout;
        while b.applied_generation < target && b.thread_alive {
            if self.shared.applied.wait_until(&mut b, deadline).timed_out() {
                log::warn!(
                    "Render thread did not release the encoder surface within {:?}",
                    self.ack_timeout
                );
                break;
            }
        }
        log::debug!("Encoder binding removed");
    }

    fn has_encoder_binding(&self) -> bool {
        self.shared.bindings.lock().encoder_surface.is_some()
    }

    fn set_filter(&self, position: usize, filter: Box<dyn FilterRender>) {
        self.send_command(RenderCommand::SetFilter { position, filter });
    }

    fn enable_antialiasing(&self, enabled: bool) {
        self.send_command(RenderCommand::Antialiasing(enabled));
    }

    fn set_fps(&self, fps: u32) {
        let mut b = self.shared.bindings.lock();
        b.encoder.fps = fps;
        b.limiter.set_fps(fps);
    }

    fn set_camera_rotation(&self, rotation: Rotation) {
        self.send_command(RenderCommand::CameraRotation(rotation));
    }

    fn set_camera_flip(&self, horizontal: bool, vertical: bool) {
        self.send_command(RenderCommand::CameraFlip(horizontal, vertical));
    }

    fn set_stream_rotation(&self, rotation: Rotation) {
        self.shared.bindings.lock().encoder.rotation = rotation;
    }

    fn set_stream_flip(&self, horizontal: bool, vertical: bool) {
        let mut b = self.shared.bindings.lock();
        b.encoder.flip_horizontal = horizontal;
        b.encoder.flip_vertical = vertical;
    }

    fn set_preview_rotation(&self, rotation: Rotation) {
        self.shared.bindings.lock().preview.rotation = rotation;
    }

    fn set_preview_flip(&self, horizontal: bool, vertical: bool) {
        let mut b = self.shared.bindings.lock();
        b.preview.flip_horizontal = horizontal;
        b.preview.flip_vertical = vertical;
    }

    fn mute_video(&self) {
        self.shared.bindings.lock().encoder.muted = true;
    }

    fn unmute_video(&self) {
        self.shared.bindings.lock().encoder.muted = false;
    }

    fn is_video_muted(&self) -> bool {
        self.shared.bindings.lock().encoder.muted
    }

    fn take_photo(&self, callback: PhotoCallback) {
        self.shared.bindings.lock().photo = Some(callback);
    }

    fn stats(&self) -> RenderStats {
        let c = &self.shared.counters;
        RenderStats {
            preview_frames: c.preview_frames.load(Ordering::Relaxed),
            encoder_frames: c.encoder_frames.load(Ordering::Relaxed),
            skipped_encoder_frames: c.skipped_encoder_frames.load(Ordering::Relaxed),
        }
    }
}

impl Drop for FrameRenderThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State moved onto the render thread.
struct RenderLoop {
    kind: RendererKind,
    shared: Arc<RenderShared>,
    signal: Arc<FrameSignal>,
    commands: Receiver<RenderCommand>,
    running: Arc<AtomicBool>,
    attached: Option<EncoderSurface>,
    epoch: u64,
}

impl RenderLoop {
    fn run(
        mut self,
        factory: SharedGpuContextFactory,
        ready_tx: Sender<Result<u32, CaptureError>>,
    ) {
        let (width, height) = self.shared.bindings.lock().encoder_size;
        let mut gpu = match factory.create(self.kind, width, height) {
            Ok(gpu) => gpu,
            Err(e) => {
                log::error!("Failed to create GPU context: {}", e);
                self.finish();
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        let _ = ready_tx.send(Ok(gpu.camera_texture_id()));

        while self.running.load(Ordering::SeqCst) {
            let wake = self.signal.wait(IDLE_WAIT);
            if wake.closed || !self.running.load(Ordering::SeqCst) {
                break;
            }
            if wake.frame {
                self.draw_preview(gpu.as_mut());
            }
            self.encoder_step(gpu.as_mut(), wake.frame);
            self.apply_commands(gpu.as_mut());
        }

        if self.attached.take().is_some() {
            gpu.release_encoder_surface();
        }
        gpu.release();
        self.finish();
    }

    fn finish(&self) {
        self.shared.bindings.lock().mark_thread_gone(self.epoch);
        self.shared.applied.notify_all();
    }

    fn draw_preview(&mut self, gpu: &mut dyn GpuContext) {
        let (params, photo) = {
            let mut b = self.shared.bindings.lock();
            let (w, h) = b.preview_size;
            let params = DrawParams::from_budget(w, h, &b.preview);
            let photo = match self.kind {
                RendererKind::OnScreen => b.photo.take(),
                RendererKind::OffScreen => None,
            };
            (params, photo)
        };

        let drawn = gpu
            .make_current(RenderTarget::Preview)
            .and_then(|_| gpu.update_texture())
            .and_then(|_| gpu.draw(RenderTarget::Preview, &params));
        if let Err(e) = drawn {
            log::error!("Preview draw failed: {}", e);
            return;
        }

        let still = photo.map(|cb| (cb, gpu.read_pixels(RenderTarget::Preview, params.width, params.height)));

        if let Err(e) = gpu.swap_buffers(RenderTarget::Preview) {
            log::error!("Preview swap failed: {}", e);
        }
        self.shared.counters.preview_frames.fetch_add(1, Ordering::Relaxed);
        deliver_photo(still);
    }

    fn encoder_step(&mut self, gpu: &mut dyn GpuContext, frame: bool) {
        let mut b = self.shared.bindings.lock();

        if b.applied_generation != b.generation {
            if self.attached.take().is_some() {
                gpu.release_encoder_surface();
                log::debug!("Encoder surface released");
            }
            if let Some(surface) = b.encoder_surface {
                match gpu.attach_encoder_surface(&surface) {
                    Ok(()) => {
                        self.attached = Some(surface);
                        log::debug!("Encoder surface {} attached", surface.id);
                    }
                    Err(e) => log::error!("Failed to attach encoder surface: {}", e),
                }
            }
            b.applied_generation = b.generation;
            self.shared.applied.notify_all();
        }

        if !frame || self.attached.is_none() {
            return;
        }
        if b.limiter.should_skip(Instant::now()) {
            self.shared
                .counters
                .skipped_encoder_frames
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        let (w, h) = b.encoder_size;
        let params = DrawParams::from_budget(w, h, &b.encoder);
        let drawn = gpu
            .make_current(RenderTarget::Encoder)
            .and_then(|_| gpu.draw(RenderTarget::Encoder, &params));
        if let Err(e) = drawn {
            log::error!("Encoder draw failed: {}", e);
            return;
        }

        let still = match self.kind {
            RendererKind::OffScreen => b
                .photo
                .take()
                .map(|cb| (cb, gpu.read_pixels(RenderTarget::Encoder, w, h))),
            RendererKind::OnScreen => None,
        };

        if let Err(e) = gpu.swap_buffers(RenderTarget::Encoder) {
            log::error!("Encoder swap failed: {}", e);
        }
        self.shared.counters.encoder_frames.fetch_add(1, Ordering::Relaxed);
        drop(b);
        deliver_photo(still);
    }

    fn apply_commands(&mut self, gpu: &mut dyn GpuContext) {
        for command in self.commands.try_iter() {
            match command {
                RenderCommand::SetFilter { position, filter } => {
                    log::debug!("Applying filter '{}' at {}", filter.name(), position);
                    gpu.set_filter(position, filter);
                }
                RenderCommand::Antialiasing(enabled) => gpu.set_antialiasing(enabled),
                RenderCommand::CameraRotation(rotation) => gpu.set_camera_rotation(rotation),
                RenderCommand::CameraFlip(h, v) => gpu.set_camera_flip(h, v),
            }
        }
    }
}

fn deliver_photo(still: Option<(PhotoCallback, Result<StillImage, CaptureError>)>) {
    match still {
        Some((callback, Ok(image))) => callback(image),
        Some((_, Err(e))) => log::error!("Still capture failed: {}", e),
        None => {}
    }
}
