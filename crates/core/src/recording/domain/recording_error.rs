use std::path::PathBuf;

use thiserror::Error;

/// Session-level recording failures, the only kind reported to the
/// presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordingError {
    #[error("a recording is already in progress")]
    AlreadyRecording,
    #[error("could not open {destination}: {reason}")]
    Open {
        destination: PathBuf,
        reason: String,
    },
    #[error("could not finalize recording: {0}")]
    Finalize(String),
    #[error("recording writer failed: {0}")]
    WriterFailed(String),
    #[error("recording contains no video frames")]
    EmptyRecording,
}
