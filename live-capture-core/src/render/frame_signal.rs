use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Why a [`FrameSignal::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Wake {
    /// A new camera frame is ready.
    pub frame: bool,
    /// A control request (binding change, stop) needs the loop's attention.
    pub control: bool,
    /// The signal was closed; every further wait returns immediately.
    pub closed: bool,
}

#[derive(Debug, Default)]
struct Flags {
    frame_available: bool,
    control: bool,
    closed: bool,
}

/// Edge-triggered "new camera frame" signal shared between the camera
/// callback and the render thread.
///
/// Notifications coalesce: any number of `notify_frame` calls between two
/// waits produce a single wake, so there is never a frame backlog.
#[derive(Debug, Default)]
pub struct FrameSignal {
    flags: Mutex<Flags>,
    cond: Condvar,
}

impl FrameSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify_frame(&self) {
        let mut flags = self.flags.lock();
        flags.frame_available = true;
        self.cond.notify_all();
    }

    pub fn wake(&self) {
        let mut flags = self.flags.lock();
        flags.control = true;
        self.cond.notify_all();
    }

    /// Wake the waiter now and on every later wait.
    pub fn close(&self) {
        let mut flags = self.flags.lock();
        flags.closed = true;
        self.cond.notify_all();
    }

    /// Block until a frame or control wake arrives, or `timeout` elapses.
    ///
    /// Consumes the pending frame and control flags.
    pub fn wait(&self, timeout: Duration) -> Wake {
        let mut flags = self.flags.lock();
        if !flags.frame_available && !flags.control && !flags.closed {
            let _ = self
                .cond
                .wait_while_for(&mut flags, |f| !f.frame_available && !f.control && !f.closed, timeout);
        }
        let wake = Wake {
            frame: flags.frame_available,
            control: flags.control,
            closed: flags.closed,
        };
        flags.frame_available = false;
        flags.control = false;
        wake
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn bursts_coalesce_into_one_wake() {
        let signal = FrameSignal::new();
        for _ in 0..5 {
            signal.notify_frame();
        }

        let wake = signal.wait(Duration::from_millis(10));
        assert!(wake.frame);
        assert!(!wake.control);

        let wake = signal.wait(Duration::from_millis(10));
        assert!(!wake.frame, "second wait must not see the coalesced burst");
    }

    #[test]
    fn wait_times_out_without_notification() {
        let signal = FrameSignal::new();
        let start = Instant::now();
        let wake = signal.wait(Duration::from_millis(20));
        assert_eq!(wake, Wake::default());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn notify_from_other_thread_wakes_waiter() {
        let signal = Arc::new(FrameSignal::new());
        let notifier = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            notifier.notify_frame();
        });

        let wake = signal.wait(Duration::from_secs(2));
        assert!(wake.frame);
        handle.join().unwrap();
    }

    #[test]
    fn close_is_sticky() {
        let signal = FrameSignal::new();
        signal.close();
        assert!(signal.wait(Duration::from_secs(1)).closed);
        assert!(signal.wait(Duration::from_secs(1)).closed);
    }

    #[test]
    fn control_wake_is_distinct_from_frame() {
        let signal = FrameSignal::new();
        signal.wake();
        let wake = signal.wait(Duration::from_millis(10));
        assert!(wake.control);
        assert!(!wake.frame);
    }
}
