//! High-level error types
//!
//! Every failure the SDK surfaces maps onto one [`ErrorKind`], the stable
//! taxonomy callers branch on. The `Error` value itself keeps the lower-layer
//! source for logging.

use std::fmt;

use uru4k_types::{Finger, Score, UserId};

pub type Result<T> = std::result::Result<T, Error>;

/// Stable classification of SDK failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DeviceNotFound,
    PermissionDenied,
    DeviceInitFailed,
    ProtocolTimeout,
    ProtocolError,
    DecodeTooSmall,
    DecodeInvalidLineCount,
    CaptureFailed,
    CaptureCancelled,
    MatchingFailed,
    VerificationFailed,
    IdentificationFailed,
    TemplateNotFound,
    NoTemplatesInGallery,
    BackendError,
    NetworkError,
    CacheDecryptionFailed,
    UnknownError,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::DeviceNotFound => "DEVICE_NOT_FOUND",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::DeviceInitFailed => "DEVICE_INIT_FAILED",
            Self::ProtocolTimeout => "PROTOCOL_TIMEOUT",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::DecodeTooSmall => "DECODE_TOO_SMALL",
            Self::DecodeInvalidLineCount => "DECODE_INVALID_LINE_COUNT",
            Self::CaptureFailed => "CAPTURE_FAILED",
            Self::CaptureCancelled => "CAPTURE_CANCELLED",
            Self::MatchingFailed => "MATCHING_FAILED",
            Self::VerificationFailed => "VERIFICATION_FAILED",
            Self::IdentificationFailed => "IDENTIFICATION_FAILED",
            Self::TemplateNotFound => "TEMPLATE_NOT_FOUND",
            Self::NoTemplatesInGallery => "NO_TEMPLATES_IN_GALLERY",
            Self::BackendError => "BACKEND_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::CacheDecryptionFailed => "CACHE_DECRYPTION_FAILED",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] uru4k_transport::Error),

    #[error("Core protocol error: {0}")]
    Core(#[from] uru4k_core::Error),

    #[error("Type error: {0}")]
    Types(#[from] uru4k_types::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Capture cancelled")]
    CaptureCancelled,

    #[error("An enrollment is already in progress")]
    EnrollmentInProgress,

    #[error("Matching failed: {0}")]
    MatchingFailed(String),

    #[error("Verification failed: score {score} below threshold {threshold}")]
    VerificationFailed { score: Score, threshold: Score },

    #[error("Identification failed: no candidate cleared the threshold (best {best:?})")]
    IdentificationFailed { best: Option<Score> },

    #[error("No template for user {user_id} (finger {finger:?})")]
    TemplateNotFound {
        user_id: UserId,
        finger: Option<Finger>,
    },

    #[error("Gallery is empty")]
    NoTemplatesInGallery,

    #[error("Backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Invalid response from backend: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Cached template could not be decrypted")]
    CacheDecryptionFailed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Unknown(String),
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        use uru4k_transport::Error as T;

        match self {
            Self::Transport(e) => match e {
                T::DeviceNotFound { .. } => ErrorKind::DeviceNotFound,
                T::PermissionDenied(_) => ErrorKind::PermissionDenied,
                T::InitFailed(_) => ErrorKind::DeviceInitFailed,
                T::Timeout { .. } => ErrorKind::ProtocolTimeout,
                T::NotOpen | T::AlreadyOpen | T::Disconnected | T::Usb(_) => {
                    ErrorKind::ProtocolError
                }
            },
            Self::Core(e) => match e {
                uru4k_core::Error::FrameTooSmall { .. } => ErrorKind::DecodeTooSmall,
                uru4k_core::Error::InvalidLineCount { .. } => ErrorKind::DecodeInvalidLineCount,
                _ => ErrorKind::ProtocolError,
            },
            Self::Protocol(_) => ErrorKind::ProtocolError,
            Self::Timeout { .. } => ErrorKind::ProtocolTimeout,
            Self::CaptureFailed(_) | Self::EnrollmentInProgress => ErrorKind::CaptureFailed,
            Self::CaptureCancelled => ErrorKind::CaptureCancelled,
            Self::MatchingFailed(_) => ErrorKind::MatchingFailed,
            Self::VerificationFailed { .. } => ErrorKind::VerificationFailed,
            Self::IdentificationFailed { .. } => ErrorKind::IdentificationFailed,
            Self::TemplateNotFound { .. } => ErrorKind::TemplateNotFound,
            Self::NoTemplatesInGallery => ErrorKind::NoTemplatesInGallery,
            Self::Backend { .. } | Self::InvalidResponse(_) => ErrorKind::BackendError,
            Self::Network(_) => ErrorKind::NetworkError,
            Self::CacheDecryptionFailed => ErrorKind::CacheDecryptionFailed,
            Self::Types(_) | Self::Config(_) | Self::Io(_) | Self::Unknown(_) => {
                ErrorKind::UnknownError
            }
        }
    }

    /// Caller may retry the whole operation
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ProtocolTimeout
                | ErrorKind::ProtocolError
                | ErrorKind::DecodeTooSmall
                | ErrorKind::DecodeInvalidLineCount
                | ErrorKind::CaptureFailed
                | ErrorKind::CaptureCancelled
                | ErrorKind::VerificationFailed
                | ErrorKind::IdentificationFailed
                | ErrorKind::NetworkError
        )
    }

    /// Device handle is gone and must be reopened
    pub fn requires_reopen(&self) -> bool {
        matches!(self, Self::Transport(e) if e.requires_reopen())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Unknown(format!("background task failed: {}", e))
    }
}
