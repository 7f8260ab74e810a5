// SPDX-License-Identifier: GPL-3.0-only

//! Error types for camera control

use crate::backends::camera::BackendError;
use crate::storage::StorageError;

/// Result type alias using CameraError
pub type CameraResult<T> = Result<T, CameraError>;

/// Every failure the controller can report
///
/// Failures found synchronously inside a public call are returned from it;
/// failures found inside a hardware callback are emitted once as
/// [`CameraEvent::Error`](crate::session::CameraEvent::Error).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    #[error("Camera permission not granted")]
    PermissionDenied,

    #[error("No camera device available")]
    NoDeviceAvailable,

    /// Requested still size is not advertised; open continues with the fallback
    #[error("Unsupported resolution {requested}, using {fallback}")]
    UnsupportedResolution { requested: String, fallback: String },

    #[error("Camera session configuration failed")]
    SessionConfigFailed,

    #[error("Failed to start preview: {0}")]
    PreviewStartFailed(String),

    #[error("Failed to restart preview: {0}")]
    PreviewRestartFailed(String),

    #[error("Picture capture failed: {0}")]
    CaptureFailed(String),

    #[error("Failed to prepare recorder: {0}")]
    RecorderPrepareFailed(String),

    #[error("Failed to start recorder: {0}")]
    RecorderStartFailed(String),

    #[error("Failed to stop recorder: {0}")]
    RecorderStopFailed(String),

    /// Slow motion is not possible at the requested size
    #[error("Slow motion unsupported: {0}")]
    CapabilityUnsupported(String),

    #[error("Camera disconnected")]
    HardwareDisconnected,

    #[error("Camera error: {0}")]
    DeviceError(i32),

    #[error("Storage failure: {0}")]
    IoFailure(String),

    #[error("Camera is already open")]
    AlreadyOpen,

    /// Operation needs an open device or an active session
    #[error("Camera is not ready")]
    NotReady,

    #[error("Recording already in progress")]
    RecordingInProgress,

    #[error("No recording in progress")]
    NotRecording,

    #[error("Camera backend error: {0}")]
    Backend(String),
}

impl From<BackendError> for CameraError {
    fn from(err: BackendError) -> Self {
        CameraError::Backend(err.to_string())
    }
}

impl From<StorageError> for CameraError {
    fn from(err: StorageError) -> Self {
        CameraError::IoFailure(err.to_string())
    }
}

impl From<std::io::Error> for CameraError {
    fn from(err: std::io::Error) -> Self {
        CameraError::IoFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_short_sentences() {
        assert_eq!(CameraError::DeviceError(3).to_string(), "Camera error: 3");
        assert_eq!(CameraError::HardwareDisconnected.to_string(), "Camera disconnected");
        assert_eq!(
            CameraError::UnsupportedResolution {
                requested: "123x45".into(),
                fallback: "1920x1080".into()
            }
            .to_string(),
            "Unsupported resolution 123x45, using 1920x1080"
        );
    }

    #[test]
    fn test_conversions() {
        let backend: CameraError = BackendError::Closed("session".into()).into();
        assert_eq!(backend, CameraError::Backend("Resource closed: session".into()));

        let io: CameraError = std::io::Error::other("disk full").into();
        assert_eq!(io, CameraError::IoFailure("disk full".into()));
    }
}
