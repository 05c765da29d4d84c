use std::path::PathBuf;

use thiserror::Error;

use crate::ingest::UploadKind;

/// Rejections that leave every piece of state untouched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing name")]
    MissingName,
    #[error("no content provided")]
    NoContent,
    #[error("file '{filename}' is not an accepted {kind} upload")]
    UnsupportedExtension { kind: UploadKind, filename: String },
    #[error("unknown category '{0}'")]
    UnknownCategory(String),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("I/O error at '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("submission log error: {0}")]
    Csv(#[from] csv::Error),

    #[error("submission log '{}' has an unexpected header", .path.display())]
    LogHeader { path: PathBuf },

    #[error("encoding error: {0}")]
    Encode(String),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("no capture session started for '{0}'")]
    CaptureNotStarted(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("background task failed: {0}")]
    Worker(String),
}

impl ArchiveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiveError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_messages() {
        assert_eq!(ValidationError::MissingName.to_string(), "missing name");
        assert_eq!(ValidationError::NoContent.to_string(), "no content provided");

        let err: ArchiveError = ValidationError::NoContent.into();
        assert!(err.to_string().contains("no content provided"));
    }

    #[test]
    fn test_io_error_display_includes_path() {
        let err = ArchiveError::io(
            "audio_clips/x.wav",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("audio_clips/x.wav"));
        assert!(msg.contains("denied"));
    }
}
