use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};

use crate::audio::effect::NoAudioEffect;
use crate::models::config::AudioConfig;
use crate::models::error::CaptureError;
use crate::models::media::Frame;
use crate::traits::audio_device::{AudioDevice, AudioEffect};

/// Bytes requested from the device per read.
pub const BUFFER_SIZE: usize = 4096;

/// Receives every frame produced by the capture thread.
pub type FrameSink = Arc<dyn Fn(Frame) + Send + Sync>;

/// Notified on the capture thread when the device stops delivering data,
/// always with [`CaptureError::DeviceReadFailed`].
pub type LossListener = Arc<dyn Fn(&CaptureError) + Send + Sync>;

struct Worker {
    handle: thread::JoinHandle<()>,
    done_rx: Receiver<Box<dyn AudioDevice>>,
}

/// Blocking microphone reader running on its own `audio-capture` thread.
///
/// The thread owns the device while it runs and hands it back on exit, after
/// releasing it. All methods take `&self`, so the loop can be stopped from
/// any thread.
pub struct AudioCaptureLoop {
    device: Mutex<Option<Box<dyn AudioDevice>>>,
    config: Mutex<Option<AudioConfig>>,
    running: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    effect: Arc<RwLock<Arc<dyn AudioEffect>>>,
    silence: Arc<[u8]>,
    loss_listener: Mutex<Option<LossListener>>,
    worker: Mutex<Option<Worker>>,
    join_timeout: Duration,
}

impl AudioCaptureLoop {
    pub fn new(device: Box<dyn AudioDevice>) -> Self {
        Self {
            device: Mutex::new(Some(device)),
            config: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            muted: Arc::new(AtomicBool::new(false)),
            effect: Arc::new(RwLock::new(Arc::new(NoAudioEffect))),
            silence: Arc::from(vec![0u8; BUFFER_SIZE]),
            loss_listener: Mutex::new(None),
            worker: Mutex::new(None),
            join_timeout: Duration::from_millis(1000),
        }
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Open the device with `config`. Refused while the loop runs.
    pub fn configure(&self, config: &AudioConfig) -> Result<(), CaptureError> {
        config
            .validate()
            .map_err(CaptureError::UnsupportedConfiguration)?;
        let _worker = self.worker.lock();
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::InvalidState(
                "cannot reconfigure the microphone while capturing".into(),
            ));
        }
        let mut slot = self.device.lock();
        let device = slot.as_mut().ok_or_else(|| {
            CaptureError::DeviceUnavailable("microphone handle is held by a stalled capture thread".into())
        })?;
        if device.is_open() {
            device.release();
        }
        device.open(config).map_err(|e| match e {
            CaptureError::DeviceUnavailable(_) => e,
            other => CaptureError::DeviceUnavailable(other.to_string()),
        })?;
        *self.config.lock() = Some(config.clone());
        log::info!(
            "Microphone configured: {} Hz, {} channel(s), aec={}, ns={}",
            config.sample_rate,
            config.channels(),
            config.echo_canceler,
            config.noise_suppressor
        );
        Ok(())
    }

    pub fn set_loss_listener(&self, listener: LossListener) {
        *self.loss_listener.lock() = Some(listener);
    }

    /// Start the read loop. Idempotent while running.
    pub fn start(&self, sink: FrameSink) -> Result<(), CaptureError> {
        let mut worker = self.worker.lock();
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(previous) = worker.take() {
            if let Err(stalled) = self.reclaim(previous) {
                *worker = Some(stalled);
                return Err(CaptureError::DeviceUnavailable(
                    "previous capture thread still holds the microphone".into(),
                ));
            }
        }

        let mut device = self.device.lock().take().ok_or_else(|| {
            CaptureError::DeviceUnavailable("microphone handle not available".into())
        })?;
        if let Err(e) = self.open_and_start(device.as_mut()) {
            *self.device.lock() = Some(device);
            return Err(e);
        }

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let capture = CaptureThread {
            running: Arc::clone(&self.running),
            muted: Arc::clone(&self.muted),
            effect: Arc::clone(&self.effect),
            silence: Arc::clone(&self.silence),
            sink,
            loss_listener: self.loss_listener.lock().clone(),
        };

        // The device is handed over only once the thread exists, so a failed
        // spawn cannot take it down with the closure.
        let (device_tx, device_rx) = crossbeam_channel::bounded::<Box<dyn AudioDevice>>(1);
        self.running.store(true, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                if let Ok(device) = device_rx.recv() {
                    capture.run(device, done_tx);
                }
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.abandon_start(device);
                return Err(CaptureError::Unknown(format!("failed to spawn audio thread: {}", e)));
            }
        };
        if let Err(returned) = device_tx.send(device) {
            let _ = handle.join();
            self.abandon_start(returned.into_inner());
            return Err(CaptureError::Unknown("audio thread exited before receiving the microphone".into()));
        }

        *worker = Some(Worker { handle, done_rx });
        log::info!("Microphone capture started");
        Ok(())
    }

    /// Undo `open_and_start` for a device that never reached its thread.
    fn abandon_start(&self, mut device: Box<dyn AudioDevice>) {
        self.running.store(false, Ordering::SeqCst);
        device.release();
        *self.device.lock() = Some(device);
    }

    /// Stop the loop and wait (bounded) for the thread to release the device.
    pub fn stop(&self) {
        let mut worker = self.worker.lock();
        self.running.store(false, Ordering::SeqCst);
        let Some(current) = worker.take() else {
            return;
        };
        match self.reclaim(current) {
            Ok(()) => log::info!("Microphone capture stopped"),
            Err(stalled) => {
                log::warn!(
                    "Audio capture thread did not exit within {:?}; detaching",
                    self.join_timeout
                );
                *worker = Some(stalled);
            }
        }
    }

    fn reclaim(&self, worker: Worker) -> Result<(), Worker> {
        match worker.done_rx.recv_timeout(self.join_timeout) {
            Ok(device) => {
                *self.device.lock() = Some(device);
                let _ = worker.handle.join();
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(worker),
            Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    log::error!("Audio capture thread panicked; microphone handle lost");
                }
                Ok(())
            }
        }
    }

    fn open_and_start(&self, device: &mut dyn AudioDevice) -> Result<(), CaptureError> {
        if !device.is_open() {
            let config = self.config.lock().clone().ok_or_else(|| {
                CaptureError::InvalidState("microphone not configured".into())
            })?;
            device.open(&config)?;
        }
        device.start()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn mute(&self) {
        self.muted.store(true, Ordering::SeqCst);
    }

    pub fn unmute(&self) {
        self.muted.store(false, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Replace the effect applied to unmuted buffers. Takes effect on the
    /// next read.
    pub fn set_effect(&self, effect: Arc<dyn AudioEffect>) {
        *self.effect.write() = effect;
    }

    /// Largest frame the encoder will be handed.
    pub fn max_input_size(&self) -> usize {
        BUFFER_SIZE
    }

    /// The buffer muted frames refer to.
    pub fn silence(&self) -> &Arc<[u8]> {
        &self.silence
    }
}

impl Drop for AudioCaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CaptureThread {
    running: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    effect: Arc<RwLock<Arc<dyn AudioEffect>>>,
    silence: Arc<[u8]>,
    sink: FrameSink,
    loss_listener: Option<LossListener>,
}

impl CaptureThread {
    fn run(self, mut device: Box<dyn AudioDevice>, done_tx: Sender<Box<dyn AudioDevice>>) {
        let started = Instant::now();
        let mut buffer = vec![0u8; BUFFER_SIZE];

        let loss = loop {
            if !self.running.load(Ordering::SeqCst) {
                break None;
            }
            let read = device.read(&mut buffer);
            let timestamp = started.elapsed();
            match read {
                Ok(0) => {
                    break Some(CaptureError::DeviceReadFailed(
                        "microphone returned no data".into(),
                    ))
                }
                Err(e @ CaptureError::DeviceReadFailed(_)) => break Some(e),
                Err(e) => break Some(CaptureError::DeviceReadFailed(e.to_string())),
                Ok(n) => {
                    let n = n.min(BUFFER_SIZE);
                    (self.sink)(self.frame(&mut buffer[..n], timestamp));
                }
            }
        };

        self.running.store(false, Ordering::SeqCst);
        device.release();

        if let Some(error) = loss {
            log::error!("Microphone lost: {}", error);
            if let Some(listener) = &self.loss_listener {
                listener(&error);
            }
        }
        let _ = done_tx.send(device);
    }

    fn frame(&self, pcm: &mut [u8], timestamp: Duration) -> Frame {
        if self.muted.load(Ordering::SeqCst) {
            return Frame::new(Arc::clone(&self.silence), 0, pcm.len(), timestamp, true);
        }
        let effect = Arc::clone(&*self.effect.read());
        effect.process(pcm);
        Frame::new(Arc::from(&*pcm), 0, pcm.len(), timestamp, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::effect::GainEffect;
    use crate::test_support::{wait_until, MockAudioDevice};

    fn collecting_sink() -> (FrameSink, Arc<Mutex<Vec<Frame>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink_frames = Arc::clone(&frames);
        let sink: FrameSink = Arc::new(move |frame| sink_frames.lock().push(frame));
        (sink, frames)
    }

    fn configured(device: MockAudioDevice) -> AudioCaptureLoop {
        let mic = AudioCaptureLoop::new(Box::new(device));
        mic.configure(&AudioConfig::default()).unwrap();
        mic
    }

    #[test]
    fn start_requires_configuration() {
        let mic = AudioCaptureLoop::new(Box::new(MockAudioDevice::new()));
        let (sink, _) = collecting_sink();
        assert!(matches!(mic.start(sink), Err(CaptureError::InvalidState(_))));
        assert!(!mic.is_running());
    }

    #[test]
    fn configure_maps_open_failure_to_device_unavailable() {
        let device = MockAudioDevice::new();
        device.fail_open(true);
        let mic = AudioCaptureLoop::new(Box::new(device));
        assert!(matches!(
            mic.configure(&AudioConfig::default()),
            Err(CaptureError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn frames_carry_device_content() {
        let device = MockAudioDevice::new();
        device.set_fill(0x10);
        let mic = configured(device);
        let (sink, frames) = collecting_sink();
        mic.start(sink).unwrap();
        assert!(wait_until(Duration::from_secs(2), || frames.lock().len() >= 3));
        mic.stop();

        let frames = frames.lock();
        assert!(frames.iter().all(|f| !f.is_muted() && f.bytes().iter().all(|b| *b == 0x10)));
        assert!(frames.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
    }

    #[test]
    fn muted_frame_equals_silence_buffer() {
        let device = MockAudioDevice::new();
        device.set_fill(0x55);
        let mic = configured(device);
        mic.mute();
        let (sink, frames) = collecting_sink();
        mic.start(sink).unwrap();
        assert!(wait_until(Duration::from_secs(2), || !frames.lock().is_empty()));
        mic.stop();

        let first = frames.lock()[0].clone();
        assert!(first.is_muted());
        assert!(first.shares_buffer(mic.silence()));
        assert_eq!(first.bytes(), &mic.silence()[..]);
    }

    #[test]
    fn mute_and_unmute_apply_within_one_read() {
        let device = MockAudioDevice::new();
        device.set_fill(0x02);
        let mic = configured(device);
        mic.set_effect(Arc::new(GainEffect::new(3.0)));
        let (sink, frames) = collecting_sink();
        mic.start(sink).unwrap();
        assert!(wait_until(Duration::from_secs(2), || !frames.lock().is_empty()));

        mic.mute();
        let at_mute = frames.lock().len();
        assert!(wait_until(Duration::from_secs(2), || frames.lock().len() >= at_mute + 3));
        assert!(frames.lock()[at_mute + 1..].iter().all(|f| f.is_muted()));

        mic.unmute();
        let at_unmute = frames.lock().len();
        assert!(wait_until(Duration::from_secs(2), || frames.lock().len() >= at_unmute + 3));
        mic.stop();

        let frames = frames.lock();
        let restored = &frames[at_unmute + 1];
        assert!(!restored.is_muted());
        // 0x0202 * 3 = 0x0606
        assert!(restored.bytes().iter().all(|b| *b == 0x06));
    }

    #[test]
    fn effect_swap_does_not_stop_the_loop() {
        let device = MockAudioDevice::new();
        device.set_fill(0x01);
        let mic = configured(device);
        let (sink, frames) = collecting_sink();
        mic.start(sink).unwrap();

        mic.set_effect(Arc::new(GainEffect::new(2.0)));
        let at_swap = frames.lock().len();
        assert!(wait_until(Duration::from_secs(2), || frames.lock().len() >= at_swap + 3));
        assert!(mic.is_running());
        mic.stop();

        assert!(frames.lock()[at_swap + 1].bytes().iter().all(|b| *b == 0x02));
    }

    #[test]
    fn device_loss_ends_loop_and_notifies() {
        let device = MockAudioDevice::new();
        device.end_after(2);
        let state = device.state();
        let mic = configured(device);

        let (tx, rx) = crossbeam_channel::bounded(1);
        mic.set_loss_listener(Arc::new(move |error| {
            let _ = tx.send(error.clone());
        }));
        let (sink, frames) = collecting_sink();
        mic.start(sink).unwrap();

        let error = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(error, CaptureError::DeviceReadFailed(_)));
        assert!(wait_until(Duration::from_secs(2), || !mic.is_running()));
        assert_eq!(frames.lock().len(), 2);
        assert_eq!(state.lock().releases, 1);
    }

    #[test]
    fn stop_releases_device_and_restart_reopens() {
        let device = MockAudioDevice::new();
        let state = device.state();
        let mic = configured(device);

        let (sink, _) = collecting_sink();
        mic.start(Arc::clone(&sink)).unwrap();
        mic.stop();
        mic.stop();
        assert!(!mic.is_running());
        assert_eq!(state.lock().releases, 1);

        mic.start(sink).unwrap();
        assert!(mic.is_running());
        mic.stop();
        let state = state.lock();
        assert_eq!(state.opens, 2);
        assert_eq!(state.releases, 2);
    }

    #[test]
    fn device_is_kept_when_the_thread_never_takes_it() {
        let device = MockAudioDevice::new();
        let state = device.state();
        let mic = configured(device);

        let mut held = mic.device.lock().take().unwrap();
        held.start().unwrap();
        mic.running.store(true, Ordering::SeqCst);
        mic.abandon_start(held);

        assert!(!mic.is_running());
        assert_eq!(state.lock().releases, 1);

        let (sink, frames) = collecting_sink();
        mic.start(sink).unwrap();
        assert!(wait_until(Duration::from_secs(2), || !frames.lock().is_empty()));
        mic.stop();
        assert_eq!(state.lock().opens, 2);
    }

    #[test]
    fn start_is_idempotent() {
        let device = MockAudioDevice::new();
        let state = device.state();
        let mic = configured(device);
        let (sink, _) = collecting_sink();
        mic.start(Arc::clone(&sink)).unwrap();
        mic.start(sink).unwrap();
        mic.stop();
        assert_eq!(state.lock().starts, 1);
    }

    #[test]
    fn configure_refused_while_running() {
        let mic = configured(MockAudioDevice::new());
        let (sink, _) = collecting_sink();
        mic.start(sink).unwrap();
        assert!(matches!(
            mic.configure(&AudioConfig::default()),
            Err(CaptureError::InvalidState(_))
        ));
        mic.stop();
    }
}
