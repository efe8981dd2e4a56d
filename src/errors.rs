use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

/// Errors surfaced by the camera session.
///
/// Capability downgrades are not errors; they are reported through
/// [`crate::capability::CapabilityDowngrade`] values on a successful bind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Invalid or inconsistent request. Never retried automatically.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The camera provider rejected the use-case set. The session is left unbound.
    #[error("Bind failure: {0}")]
    BindFailure(String),
    /// A photo or video operation failed after a successful bind.
    #[error("Capture error: {0}")]
    CaptureFailure(String),
    /// A hardware acknowledgement did not arrive within the bounded wait.
    #[error("Timeout: {0}")]
    Timeout(String),
    /// Pixel format conversion failed.
    #[error("Conversion error: {0}")]
    Conversion(String),
    /// The session execution context has shut down.
    #[error("Session closed: {0}")]
    Closed(String),
    /// Runtime configuration file could not be read, written or validated.
    #[error("Config error: {0}")]
    Config(String),
}

impl SessionError {
    pub fn configuration(message: impl Into<String>) -> Self {
        SessionError::Configuration(message.into())
    }

    pub fn closed() -> Self {
        SessionError::Closed("session context is no longer running".to_string())
    }

    /// Whether the session is guaranteed to be unbound after this error.
    pub fn leaves_session_unbound(&self) -> bool {
        matches!(self, SessionError::BindFailure(_) | SessionError::Closed(_))
    }
}

/// Failure reported by a [`crate::platform::CameraProvider`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("camera busy: {0}")]
    Busy(String),
    #[error("camera disconnected: {0}")]
    Disconnected(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Other(String),
}

impl From<ProviderError> for SessionError {
    fn from(error: ProviderError) -> Self {
        SessionError::BindFailure(error.to_string())
    }
}

impl From<std::io::Error> for SessionError {
    fn from(error: std::io::Error) -> Self {
        SessionError::CaptureFailure(format!("IO error: {}", error))
    }
}

/// Lock a mutex, taking the data back from a panicked holder
pub(crate) fn recover_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        let error = SessionError::BindFailure("camera held by another process".to_string());
        assert_eq!(
            error.to_string(),
            "Bind failure: camera held by another process"
        );
        assert_eq!(
            SessionError::configuration("bad").to_string(),
            "Configuration error: bad"
        );
    }

    #[test]
    fn test_provider_error_maps_to_bind_failure() {
        let error: SessionError = ProviderError::Busy("back".to_string()).into();
        assert!(matches!(error, SessionError::BindFailure(ref msg) if msg.contains("busy")));
        assert!(error.leaves_session_unbound());
    }

    #[test]
    fn test_capture_failure_does_not_unbind() {
        let error = SessionError::CaptureFailure("disk full".to_string());
        assert!(!error.leaves_session_unbound());
    }
}
