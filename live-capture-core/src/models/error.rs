use thiserror::Error;

/// Errors that can occur while preparing or driving a capture session.
///
/// Configuration-time failures are returned synchronously from `prepare_*` and
/// `start_*`. Failures that happen on a worker thread are reported as
/// [`SessionEvent`](crate::SessionEvent)s instead, since they cannot propagate
/// to the control thread.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Camera or microphone is busy or absent.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The encoder cannot satisfy the requested codec/profile/size.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// Operation not allowed in the current session state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A capture source stopped delivering data mid-session.
    #[error("device read failed: {0}")]
    DeviceReadFailed(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("encoder error: {0}")]
    Encoder(String),

    /// Record file is unwritable or a writer is already active.
    #[error("I/O error: {0}")]
    Io(String),

    /// Configuration could not be parsed or loaded.
    #[error("config error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_reason() {
        let err = CaptureError::DeviceUnavailable("camera busy".into());
        assert_eq!(err.to_string(), "device unavailable: camera busy");

        let err = CaptureError::Io("/readonly/out.mp4".into());
        assert_eq!(err.to_string(), "I/O error: /readonly/out.mp4");
    }
}
