use crate::models::error::CaptureError;
use crate::models::state::SessionState;

/// The two consumers sharing the encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumer {
    Stream,
    Record,
}

/// What the controller must do after a consumer was added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAction {
    /// Nothing was encoding: start encoders, render path, microphone, camera.
    Bootstrap,
    /// The other consumer is active: only refresh the encoder surface so the
    /// new consumer starts on a key frame.
    RebindEncoderSurface,
}

/// What the controller must do after a consumer was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopAction {
    /// Last consumer gone: tear the shared pipeline down.
    Teardown,
    /// The other consumer still needs the encoders.
    KeepEncoders,
    /// The consumer was not active.
    NotActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<A> {
    pub from: SessionState,
    pub to: SessionState,
    pub action: A,
}

/// Guarded transitions over [`SessionState`].
///
/// Each call is a compare-and-transition: the state is checked and updated
/// in one step, so two racing stops can never both observe "last consumer".
#[derive(Debug, Default)]
pub struct SessionStateMachine {
    state: SessionState,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn begin(&mut self, consumer: Consumer) -> Result<Transition<StartAction>, CaptureError> {
        use SessionState::*;

        let from = self.state;
        let (to, action) = match (consumer, from) {
            (Consumer::Stream, Idle | PreviewOnly) => (Streaming, StartAction::Bootstrap),
            (Consumer::Stream, Recording) => (RecordingAndStreaming, StartAction::RebindEncoderSurface),
            (Consumer::Record, Idle | PreviewOnly) => (Recording, StartAction::Bootstrap),
            (Consumer::Record, Streaming) => (RecordingAndStreaming, StartAction::RebindEncoderSurface),
            (Consumer::Stream, Streaming | RecordingAndStreaming) => {
                return Err(CaptureError::InvalidState("stream already active".into()))
            }
            (Consumer::Record, Recording | RecordingAndStreaming) => {
                return Err(CaptureError::InvalidState("recording already active".into()))
            }
        };
        self.state = to;
        log::debug!("Session {:?} -> {:?} ({:?})", from, to, action);
        Ok(Transition { from, to, action })
    }

    /// Remove a consumer. `keep_preview` selects the resting state after a
    /// teardown.
    pub fn end(&mut self, consumer: Consumer, keep_preview: bool) -> Transition<StopAction> {
        use SessionState::*;

        let from = self.state;
        let rest = if keep_preview { PreviewOnly } else { Idle };
        let (to, action) = match (consumer, from) {
            (Consumer::Stream, Streaming) | (Consumer::Record, Recording) => (rest, StopAction::Teardown),
            (Consumer::Stream, RecordingAndStreaming) => (Recording, StopAction::KeepEncoders),
            (Consumer::Record, RecordingAndStreaming) => (Streaming, StopAction::KeepEncoders),
            _ => (from, StopAction::NotActive),
        };
        self.state = to;
        if action != StopAction::NotActive {
            log::debug!("Session {:?} -> {:?} ({:?})", from, to, action);
        }
        Transition { from, to, action }
    }

    /// Idle → PreviewOnly. Returns whether the state changed.
    pub fn start_preview(&mut self) -> bool {
        if self.state == SessionState::Idle {
            self.state = SessionState::PreviewOnly;
            return true;
        }
        false
    }

    /// PreviewOnly → Idle. Returns whether the state changed.
    pub fn stop_preview(&mut self) -> bool {
        if self.state == SessionState::PreviewOnly {
            self.state = SessionState::Idle;
            return true;
        }
        false
    }

    /// Roll back a failed transition.
    pub fn restore(&mut self, state: SessionState) {
        log::debug!("Session {:?} restored to {:?}", self.state, state);
        self.state = state;
    }
}
