use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};

use crate::models::config::RetrySettings;
use crate::models::error::CaptureError;

/// Caller-supplied veto on a failure reason.
pub type RetryPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Decides whether a failed connection is worth another attempt.
///
/// Rejects reasons matching a fatal pattern or the caller's predicate, and
/// stops accepting once the budget is spent. A successful connection
/// refills the budget.
pub struct RetryPolicy {
    max_retries: u32,
    fatal_reasons: Vec<String>,
    predicate: Option<RetryPredicate>,
    attempts: u32,
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            fatal_reasons: settings.fatal_reasons.clone(),
            predicate: None,
            attempts: 0,
        }
    }

    pub fn set_predicate(&mut self, predicate: RetryPredicate) {
        self.predicate = Some(predicate);
    }

    /// Consume one attempt if `reason` may be retried.
    pub fn should_retry(&mut self, reason: &str) -> bool {
        if self.fatal_reasons.iter().any(|fatal| reason.contains(fatal.as_str())) {
            log::debug!("Not retrying fatal failure: {}", reason);
            return false;
        }
        if let Some(predicate) = &self.predicate {
            if !predicate(reason) {
                return false;
            }
        }
        if self.attempts >= self.max_retries {
            log::warn!("Retry budget of {} exhausted", self.max_retries);
            return false;
        }
        self.attempts += 1;
        true
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("fatal_reasons", &self.fatal_reasons)
            .field("has_predicate", &self.predicate.is_some())
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// Cancellation flag shared between a [`RetryWorker`] and its task.
#[derive(Debug, Clone, Default)]
pub struct RetryToken(Arc<AtomicBool>);

impl RetryToken {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Runs a task once after a delay on the `stream-retry` thread, unless
/// cancelled first.
///
/// Cancelling never joins: the task may be blocked on a lock the canceller
/// holds. Tasks must check the token after taking their locks.
pub struct RetryWorker {
    token: RetryToken,
    cancel_tx: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RetryWorker {
    pub fn spawn<F>(delay: Duration, task: F) -> Result<Self, CaptureError>
    where
        F: FnOnce(&RetryToken) + Send + 'static,
    {
        let token = RetryToken::default();
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);
        let task_token = token.clone();

        let handle = thread::Builder::new()
            .name("stream-retry".into())
            .spawn(move || match cancel_rx.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) if !task_token.is_cancelled() => task(&task_token),
                _ => log::debug!("Retry cancelled"),
            })
            .map_err(|e| CaptureError::Unknown(format!("failed to spawn retry thread: {}", e)))?;

        Ok(Self {
            token,
            cancel_tx,
            handle: Some(handle),
        })
    }

    pub fn cancel(&self) {
        self.token.cancel();
        let _ = self.cancel_tx.try_send(());
    }

    /// Wait for the worker to exit. Only call without holding locks the task
    /// may need.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RetryWorker {
    fn drop(&mut self) {
        self.cancel();
    }
}
