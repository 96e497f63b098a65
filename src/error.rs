//! Error taxonomy shared by every provisioning and synthesis component.
//!
//! Each failure carries a stable machine-readable [`ErrorKind`], a human
//! message, and (where one exists) the underlying error as its `source`.

use std::fmt;

use serde::Serialize;

/// Boxed underlying cause kept on a [`PiperError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = PiperError> = std::result::Result<T, E>;

/// Stable error categories. Never collapsed into a generic variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    UnsupportedPlatform,
    NetworkError,
    BinaryNotFound,
    BinaryDownloadFailed,
    BinaryPermissionDenied,
    BinaryCorrupt,
    ModelNotFound,
    ModelDownloadFailed,
    ModelCorrupt,
    SynthesisFailed,
    SynthesisTimeout,
    EmptyText,
    TextTooLong,
    NoAudioPlayer,
    PlaybackError,
    TempFileError,
}

impl ErrorKind {
    /// Machine-readable code, e.g. `"BINARY_CORRUPT"`.
    pub fn code(self) -> &'static str {
        match self {
            Self::UnsupportedPlatform => "UNSUPPORTED_PLATFORM",
            Self::NetworkError => "NETWORK_ERROR",
            Self::BinaryNotFound => "BINARY_NOT_FOUND",
            Self::BinaryDownloadFailed => "BINARY_DOWNLOAD_FAILED",
            Self::BinaryPermissionDenied => "BINARY_PERMISSION_DENIED",
            Self::BinaryCorrupt => "BINARY_CORRUPT",
            Self::ModelNotFound => "MODEL_NOT_FOUND",
            Self::ModelDownloadFailed => "MODEL_DOWNLOAD_FAILED",
            Self::ModelCorrupt => "MODEL_CORRUPT",
            Self::SynthesisFailed => "SYNTHESIS_FAILED",
            Self::SynthesisTimeout => "SYNTHESIS_TIMEOUT",
            Self::EmptyText => "EMPTY_TEXT",
            Self::TextTooLong => "TEXT_TOO_LONG",
            Self::NoAudioPlayer => "NO_AUDIO_PLAYER",
            Self::PlaybackError => "PLAYBACK_ERROR",
            Self::TempFileError => "TEMP_FILE_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error returned by every public operation of this crate.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct PiperError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl PiperError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Build an error that keeps `source` as its traceable cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Re-label this error under another kind, keeping it as the cause.
    ///
    /// Used where one component's failure surfaces as another's, e.g. a
    /// `NetworkError` from the fetcher becoming `BinaryDownloadFailed`.
    pub fn rewrap(self, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::with_source(kind, message, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_codes_are_screaming_snake_case() {
        assert_eq!(ErrorKind::UnsupportedPlatform.code(), "UNSUPPORTED_PLATFORM");
        assert_eq!(ErrorKind::TempFileError.code(), "TEMP_FILE_ERROR");
        let json = serde_json::to_string(&ErrorKind::SynthesisTimeout).unwrap();
        assert_eq!(json, "\"SYNTHESIS_TIMEOUT\"");
    }

    #[test]
    fn test_source_is_retained() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = PiperError::with_source(ErrorKind::ModelCorrupt, "bad weights", io);
        assert_eq!(err.kind(), ErrorKind::ModelCorrupt);
        assert_eq!(err.to_string(), "bad weights");
        assert_eq!(err.source().unwrap().to_string(), "disk gone");
    }

    #[test]
    fn test_rewrap_chains_original() {
        let inner = PiperError::new(ErrorKind::NetworkError, "HTTP 500");
        let outer = inner.rewrap(ErrorKind::BinaryDownloadFailed, "could not fetch piper");
        assert_eq!(outer.kind(), ErrorKind::BinaryDownloadFailed);
        let cause = outer
            .source()
            .and_then(|s| s.downcast_ref::<PiperError>())
            .unwrap();
        assert_eq!(cause.kind(), ErrorKind::NetworkError);
    }
}
