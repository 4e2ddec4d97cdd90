use thiserror::Error;

/// Transport is disconnected or failed to connect. Never fatal: the transport
/// retries on its own and registration is replayed on recovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectivityError {
    #[error("failed to connect: {0}")]
    ConnectFailed(String),
    #[error("connection lost: {0}")]
    Dropped(String),
}

/// Failure of the blob upload. Aborts the whole attachment send.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("upload request failed: {0}")]
    Network(String),
    #[error("upload rejected with status {status}")]
    Status { status: u16 },
    #[error("invalid upload response: {0}")]
    InvalidResponse(String),
    #[error("could not read attachment: {0}")]
    Read(String),
    #[error("connection lost before the attachment could be sent")]
    ConnectionLost,
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("no audio input device found")]
    DeviceNotFound,
    #[error("audio constraints could not be satisfied: {0}")]
    ConstraintsUnsatisfiable(String),
    #[error("a recording is already in progress")]
    AlreadyRecording,
    #[error("no recording in progress")]
    NotRecording,
    #[error("failed to encode recording: {0}")]
    Encode(String),
}

/// Recorded payload is below the minimum size; the recording is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no audio captured ({bytes} bytes, minimum {minimum})")]
pub struct EmptyCaptureError {
    pub bytes: usize,
    pub minimum: usize,
}

/// Outcome of stopping a recording that produced nothing sendable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordingError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Empty(#[from] EmptyCaptureError),
}

/// Failure of a REST collaborator other than upload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("server responded with status {status}")]
    Status { status: u16 },
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("server url cannot carry path segments")]
    InvalidBaseUrl,
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("chat session is no longer running")]
pub struct SessionClosed;
