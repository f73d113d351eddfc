use std::fmt;

use serde::{Deserialize, Serialize};

/// Classified upload failure category.
///
/// Serialized in SCREAMING_SNAKE_CASE so the wire values double as the
/// error codes surfaced to API consumers and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NetworkError,
    Timeout,
    ConnectionLost,
    ServerError,
    FileTooLarge,
    FileTooSmall,
    InvalidFileType,
    InvalidFileName,
    EmptyFile,
    CorruptedFile,
    PermissionDenied,
    StorageFull,
    QuotaExceeded,
    ProcessingFailed,
    VirusDetected,
    ContentRejected,
    UploadCancelled,
    MaxRetriesExceeded,
    UnknownError,
}

impl ErrorKind {
    /// Whether failures of this kind are worth retrying at all.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::Timeout | Self::ConnectionLost | Self::ServerError
        )
    }

    /// Retry ceiling for this kind; the engine caps it with its own config.
    pub fn retry_ceiling(&self) -> u32 {
        match self {
            Self::NetworkError | Self::Timeout | Self::ConnectionLost => 10,
            Self::ServerError => 5,
            _ => 0,
        }
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::ServerError => "SERVER_ERROR",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::FileTooSmall => "FILE_TOO_SMALL",
            Self::InvalidFileType => "INVALID_FILE_TYPE",
            Self::InvalidFileName => "INVALID_FILE_NAME",
            Self::EmptyFile => "EMPTY_FILE",
            Self::CorruptedFile => "CORRUPTED_FILE",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::StorageFull => "STORAGE_FULL",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::ProcessingFailed => "PROCESSING_FAILED",
            Self::VirusDetected => "VIRUS_DETECTED",
            Self::ContentRejected => "CONTENT_REJECTED",
            Self::UploadCancelled => "UPLOAD_CANCELLED",
            Self::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

/// A classified, user-presentable upload failure.
///
/// `retryable` and `max_retries` are derived from the kind at construction
/// and travel with the error, so callers can render retry hints without
/// re-classifying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub retryable: bool,
    pub max_retries: u32,
}

impl UploadError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            retryable: kind.retryable(),
            max_retries: kind.retry_ceiling(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Cancellation marker. Never counted against retry budgets.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::UploadCancelled, "upload cancelled")
    }

    /// Wraps the last error seen once a retry budget runs out.
    pub fn retries_exhausted(attempts: u32, last: &UploadError) -> Self {
        Self {
            kind: ErrorKind::MaxRetriesExceeded,
            message: format!("giving up after {attempts} attempts: {}", last.message),
            details: Some(last.kind.as_code().to_string()),
            retryable: false,
            max_retries: 0,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::UploadCancelled
    }
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_code(), self.message)
    }
}

impl std::error::Error for UploadError {}
